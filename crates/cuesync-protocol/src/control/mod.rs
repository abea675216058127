//! Control roles.
//!
//! A [`ControllerEndpoint`] runs next to the media source and reports what
//! is playing. A [`ServerEndpoint`] runs in the daemon, keeps a clock offset
//! to the controller and can send it playback commands.

mod controller;
mod server;

pub use controller::{ControlHandler, ControllerEndpoint};
pub use server::ServerEndpoint;

/// Connection type a server registers its controllers under.
pub const CONTROLLER_CONNECTION: &str = "controller";
/// Connection type a controller registers its server under.
pub const SERVER_CONNECTION: &str = "server";
