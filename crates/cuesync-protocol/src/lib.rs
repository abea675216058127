//! cuesync-protocol: endpoints, clock sync, gossip and the broadcast and
//! control roles built on them.
//!
//! Nothing here owns a socket. Endpoints write frames to an [`Outbound`]
//! channel and are fed frames through `receive`; [`client::connect`] and
//! the daemon's server glue those channels to WebSockets.

pub mod broadcast;
pub mod client;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod metadata;
pub mod options;
pub mod pinging;
pub mod store;

pub use endpoint::{Endpoint, EndpointId, Handler, Outbound};
pub use error::RequestError;
pub use metadata::{ConnectionMetadataManager, ListenerId, MetadataListener};
pub use options::EndpointOptions;
pub use pinging::{PingSample, PingSettings, Pinger};
pub use store::{CueStore, FileResolver};

use std::sync::{Mutex, MutexGuard};

/// Lock, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
