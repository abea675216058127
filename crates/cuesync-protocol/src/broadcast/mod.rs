//! Broadcast roles.
//!
//! An [`UpstreamEndpoint`] serves play state and cue files to one
//! downstream peer. A [`DownstreamEndpoint`] consumes them, translating
//! every timestamp to the local clock before handing state to the
//! application.

mod downstream;
mod upstream;

pub use downstream::DownstreamEndpoint;
pub use upstream::{DownstreamPing, UpstreamEndpoint};

/// Connection type an upstream registers its peers under.
pub const DOWNSTREAM_CONNECTION: &str = "downstream";
/// Connection type a downstream registers its peer under.
pub const UPSTREAM_CONNECTION: &str = "upstream";
