//! cuesync-core: wire vocabulary, cue-file model and configuration.
//! All other cuesync crates depend on this one.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod control;
pub mod file;
pub mod message;
pub mod metadata;

pub use clock::{Clock, SharedClock, SystemClock};
pub use message::{Message, PingProtocol, Protocol, RawMessage, RequestId, ReservedNotification};
pub use metadata::{ConnectionInfo, ConnectionMetadataNode, ConnectionMetadataNotification};
