use std::sync::Arc;

use cuesync_core::broadcast::{LayerState, PlayStateData};
use cuesync_core::clock::ManualClock;
use cuesync_core::file::CueFile;
use cuesync_protocol::broadcast::{DownstreamEndpoint, UpstreamEndpoint};
use cuesync_protocol::{CueStore, EndpointOptions, RequestError};

use crate::*;

fn playing(hash: &str, start: f64) -> PlayStateData {
    PlayStateData {
        layers: vec![LayerState {
            file_hash: hash.to_string(),
            effective_start_time_millis: start,
            amplitude: 1.0,
            play_speed: 1.0,
        }],
    }
}

#[tokio::test]
async fn downstream_fetches_files_by_hash() {
    let store = CueStore::new();
    let hash = store.insert(CueFile::empty(1_200.0));
    let options = EndpointOptions::default();
    let link = broadcast_link(Arc::new(store), &options, &options);

    let file = within("file", link.downstream.get_file(&hash)).await.unwrap();
    assert_eq!(file, CueFile::empty(1_200.0));
    assert_eq!(file.content_hash(), hash);

    let err = within("error", link.downstream.get_file("unknown")).await.unwrap_err();
    assert_eq!(err, RequestError::Remote("unknown file: unknown".to_string()));
}

#[tokio::test]
async fn play_state_and_ping_report_cross_the_link() {
    // Downstream runs 50ms ahead of upstream; the in-process round trip is
    // instantaneous on these clocks, so the offset is exactly 50.
    let upstream_clock = ManualClock::new(1_000.0);
    let downstream_clock = ManualClock::new(1_050.0);
    let upstream_options = EndpointOptions::default().with_clock(upstream_clock);
    let downstream_options = EndpointOptions::default().with_clock(downstream_clock);
    let link = broadcast_link(Arc::new(CueStore::new()), &upstream_options, &downstream_options);

    let mut states = link.downstream.subscribe();
    link.upstream.send_state(&playing("abc123", 5_000.0));

    let state = within("translated state", states.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(state, playing("abc123", 5_050.0));

    let sample = link.downstream.latest_ping().unwrap();
    assert_eq!(sample.ping, 0.0);
    assert_eq!(sample.diff, 50.0);

    // The downstream reports its sample back to the upstream.
    eventually("downstream ping report", || link.upstream.downstream_ping().is_some()).await;
    assert_eq!(link.upstream.downstream_ping().unwrap().diff, 50.0);
}

#[tokio::test]
async fn later_states_replace_earlier_ones() {
    let options = EndpointOptions::default().with_clock(ManualClock::new(10_000.0));
    let link = broadcast_link(Arc::new(CueStore::new()), &options, &options);
    let mut states = link.downstream.subscribe();

    link.upstream.send_state(&playing("first", 1.0));
    within("first state", states.wait_for(|s| s.as_ref() == Some(&playing("first", 1.0))))
        .await
        .unwrap();

    link.upstream.send_state(&PlayStateData::default());
    within("empty state", states.wait_for(|s| s.as_ref().is_some_and(|s| s.layers.is_empty())))
        .await
        .unwrap();
}

#[tokio::test]
async fn closing_the_downstream_can_reject_outstanding_fetches() {
    // Nobody reads this side's frames, so nothing is ever answered.
    let (down_tx, _down_rx) = tokio::sync::mpsc::unbounded_channel();
    let downstream = Arc::new(DownstreamEndpoint::new(down_tx, &EndpointOptions::default()));
    downstream.closed();
    eventually("pinger stopped", || downstream.endpoint().pending_requests() == 0).await;

    let fetch = tokio::spawn({
        let downstream = downstream.clone();
        async move { downstream.get_file("abc123").await }
    });
    eventually("request in flight", || downstream.endpoint().pending_requests() == 1).await;

    downstream.endpoint().reject_all_pending();
    let result = within("rejection", fetch).await.unwrap();
    assert_eq!(result.unwrap_err(), RequestError::Closed);
}

#[tokio::test]
async fn state_waits_for_the_first_clock_sample() {
    let (up_tx, mut up_rx) = tokio::sync::mpsc::unbounded_channel();
    let (down_tx, down_rx) = tokio::sync::mpsc::unbounded_channel();
    let upstream_options = EndpointOptions::default().with_clock(ManualClock::new(1_000.0));
    let downstream_options = EndpointOptions::default().with_clock(ManualClock::new(1_050.0));
    let upstream = Arc::new(UpstreamEndpoint::new(
        up_tx,
        Arc::new(CueStore::new()),
        &upstream_options,
    ));
    let downstream = Arc::new(DownstreamEndpoint::new(down_tx, &downstream_options));

    // The state arrives while the downstream's first ping is still unanswered.
    upstream.send_state(&playing("abc123", 1_000.0));
    let frame = up_rx.recv().await.unwrap();
    downstream.receive(&frame);
    assert_eq!(downstream.state(), None);

    pipe(up_rx, {
        let downstream = downstream.clone();
        move |frame| downstream.receive(frame)
    });
    pipe(down_rx, {
        let upstream = upstream.clone();
        move |frame| upstream.receive(frame)
    });

    let mut states = downstream.subscribe();
    let state = within("translated state", states.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .clone();
    assert_eq!(state, Some(playing("abc123", 1_050.0)));
}
