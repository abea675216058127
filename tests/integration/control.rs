use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use cuesync_core::clock::ManualClock;
use cuesync_core::control::{ControlLayer, ControlLayerState, ControlPlayState, ControlRequest, MediaFile};
use cuesync_protocol::control::{ControlHandler, ControllerEndpoint, ServerEndpoint};
use cuesync_protocol::{EndpointOptions, RequestError};

use crate::*;

/// Accepts everything except seeking, and remembers what it was asked.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<ControlRequest>>,
}

impl ControlHandler for Recorder {
    fn handle_control(&self, request: ControlRequest) -> BoxFuture<'static, anyhow::Result<bool>> {
        let accepted = !matches!(request, ControlRequest::GoToTime { .. });
        self.seen.lock().unwrap().push(request);
        Box::pin(async move { Ok(accepted) })
    }
}

fn state() -> ControlPlayState {
    ControlPlayState {
        layers: vec![
            ControlLayer {
                file: MediaFile::Path {
                    path: "/music/intro.mp3".to_string(),
                },
                state: ControlLayerState::Playing {
                    effective_start_time_millis: 100.0,
                    play_speed: 1.0,
                },
            },
            ControlLayer {
                file: MediaFile::Path {
                    path: "/music/outro.mp3".to_string(),
                },
                state: ControlLayerState::Paused {
                    position_millis: 2_500.0,
                },
            },
        ],
    }
}

struct ControlLink {
    server: Arc<ServerEndpoint>,
    controller: Arc<ControllerEndpoint>,
    server_rx: mpsc::UnboundedReceiver<String>,
    controller_rx: mpsc::UnboundedReceiver<String>,
}

impl ControlLink {
    /// Endpoints exist but nothing flows until [`connect`](Self::connect).
    fn new(server_options: &EndpointOptions, controller_options: &EndpointOptions) -> Self {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        Self {
            server: Arc::new(ServerEndpoint::new(server_tx, server_options)),
            controller: Arc::new(ControllerEndpoint::new(controller_tx, controller_options)),
            server_rx,
            controller_rx,
        }
    }

    fn connect(self) -> (Arc<ServerEndpoint>, Arc<ControllerEndpoint>) {
        pipe(self.server_rx, {
            let controller = self.controller.clone();
            move |frame| controller.receive(frame)
        });
        pipe(self.controller_rx, {
            let server = self.server.clone();
            move |frame| server.receive(frame)
        });
        (self.server, self.controller)
    }
}

#[tokio::test]
async fn controller_state_waits_for_the_first_clock_sample() {
    // Server clock 500ms ahead of the controller's.
    let server_options = EndpointOptions::default().with_clock(ManualClock::new(2_000.0));
    let controller_options = EndpointOptions::default().with_clock(ManualClock::new(1_500.0));
    let mut link = ControlLink::new(&server_options, &controller_options);

    // Deliver the state before any ping has been answered.
    link.controller.send_state(&state());
    let frame = link.controller_rx.recv().await.unwrap();
    link.server.receive(&frame);
    assert_eq!(link.server.state(), None);

    let (server, _controller) = link.connect();
    let mut states = server.subscribe();
    let translated = within("translated state", states.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .clone()
        .unwrap();

    assert_eq!(server.latest_ping().unwrap().diff, 500.0);
    assert_eq!(
        translated.layers[0].state,
        ControlLayerState::Playing {
            effective_start_time_millis: 600.0,
            play_speed: 1.0,
        }
    );
    // Positions are not times and stay put.
    assert_eq!(translated.layers[1].state, state().layers[1].state);
}

#[tokio::test]
async fn commands_reach_the_control_handler() {
    let options = EndpointOptions::default();
    let (server, controller) = ControlLink::new(&options, &options).connect();
    let recorder = Arc::new(Recorder::default());
    controller.set_control_handler(recorder.clone());

    assert_eq!(within("toggle", server.send_control(ControlRequest::Toggle)).await, Ok(true));
    assert_eq!(
        within("speed", server.send_control(ControlRequest::PlaySpeed { play_speed: 2.0 })).await,
        Ok(true)
    );
    assert_eq!(
        within(
            "seek",
            server.send_control(ControlRequest::GoToTime {
                position_millis: 30_000.0
            })
        )
        .await,
        Ok(false)
    );

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ControlRequest::Toggle,
            ControlRequest::PlaySpeed { play_speed: 2.0 },
            ControlRequest::GoToTime {
                position_millis: 30_000.0
            },
        ]
    );
}

#[tokio::test]
async fn commands_without_a_handler_are_rejected() {
    let options = EndpointOptions::default();
    let (server, _controller) = ControlLink::new(&options, &options).connect();

    let result = within("pause", server.send_control(ControlRequest::Pause)).await;
    assert_eq!(result, Err(RequestError::Remote("no control handler set".to_string())));
}

#[tokio::test]
async fn closing_the_server_clears_its_state() {
    let options = EndpointOptions::default().with_clock(ManualClock::new(1_000.0));
    let (server, controller) = ControlLink::new(&options, &options).connect();
    let mut states = server.subscribe();

    controller.send_state(&state());
    within("state", states.wait_for(|s| s.is_some())).await.unwrap();

    server.closed();
    assert_eq!(server.state(), None);
}
