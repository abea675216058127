//! CLI command modules.

pub mod command;
pub mod http;
pub mod live;
pub mod status;

/// Where the daemon lives.
pub struct Target {
    pub host: String,
    pub port: u16,
}
