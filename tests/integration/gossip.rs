use std::sync::Arc;

use cuesync_core::metadata::ConnectionMetadataNotification;
use cuesync_protocol::{ConnectionMetadataManager, CueStore, EndpointOptions, MetadataListener};

use crate::*;

fn node(name: &str) -> (ConnectionMetadataManager, EndpointOptions) {
    let manager = ConnectionMetadataManager::new(Some(name));
    let options = EndpointOptions::default().with_metadata(manager.clone());
    (manager, options)
}

/// Receive snapshots until one satisfies `done`.
async fn converge<F>(listener: &mut MetadataListener, done: F) -> ConnectionMetadataNotification
where
    F: Fn(&ConnectionMetadataNotification) -> bool,
{
    within("converged topology", async {
        loop {
            let snapshot = listener.receiver.recv().await.unwrap();
            if done(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
}

fn distance(snapshot: &ConnectionMetadataNotification, uuid: &str) -> Option<u32> {
    snapshot.node(uuid).map(|n| n.distance)
}

#[tokio::test]
async fn listener_sees_the_whole_chain() {
    // a <- b <- c, each arrow a broadcast link (upstream <- downstream).
    let (a, a_options) = node("a");
    let (b, b_options) = node("b");
    let (c, c_options) = node("c");
    let _ab = broadcast_link(Arc::new(CueStore::new()), &a_options, &b_options);
    let _bc = broadcast_link(Arc::new(CueStore::new()), &b_options, &c_options);

    let mut listener = a.add_listener();
    let first = listener.receiver.recv().await.unwrap();
    assert_eq!(first.own_uuid, a.self_uuid());

    let snapshot = converge(&mut listener, |s| s.nodes.len() == 3).await;
    assert_eq!(distance(&snapshot, &a.self_uuid()), Some(0));
    assert_eq!(distance(&snapshot, &b.self_uuid()), Some(1));
    assert_eq!(distance(&snapshot, &c.self_uuid()), Some(2));

    let c_node = snapshot.node(&c.self_uuid()).unwrap();
    assert_eq!(c_node.name.as_deref(), Some("c"));
    assert!(!c_node.wants_metadata);
    assert!(snapshot.node(&a.self_uuid()).unwrap().wants_metadata);
}

#[tokio::test]
async fn peers_learn_each_others_uuids() {
    let (a, a_options) = node("a");
    let (b, b_options) = node("b");
    let _ab = broadcast_link(Arc::new(CueStore::new()), &a_options, &b_options);

    let mut listener = a.add_listener();
    let b_uuid = b.self_uuid();
    let snapshot = converge(&mut listener, |s| {
        s.node(&b_uuid).is_some_and(|b| {
            b.connections
                .get("upstream")
                .is_some_and(|peers| peers.iter().any(|p| p.uuid.as_deref() == Some(a.self_uuid().as_str())))
        })
    })
    .await;

    let own = snapshot.node(&a.self_uuid()).unwrap();
    let downstreams = &own.connections["downstream"];
    assert_eq!(downstreams.len(), 1);
    assert_eq!(downstreams[0].uuid.as_deref(), Some(b_uuid.as_str()));
}

#[tokio::test]
async fn removing_the_listener_retracts_interest() {
    let (a, a_options) = node("a");
    let (b, b_options) = node("b");
    let _ab = broadcast_link(Arc::new(CueStore::new()), &a_options, &b_options);

    let listener = a.add_listener();
    let a_uuid = a.self_uuid();
    eventually("b learns a wants updates", || {
        b.snapshot().node(&a_uuid).is_some_and(|n| n.wants_metadata)
    })
    .await;
    assert!(b.nodes_want_updates());

    a.remove_listener(listener.id);
    eventually("b learns a stopped listening", || {
        b.snapshot().node(&a_uuid).is_some_and(|n| !n.wants_metadata)
    })
    .await;
    assert!(!b.nodes_want_updates());
}
