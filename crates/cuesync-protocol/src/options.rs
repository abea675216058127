use cuesync_core::clock::{system_clock, SharedClock};
use cuesync_core::config::ProtocolConfig;
use cuesync_core::message::Protocol;

use crate::endpoint::{Endpoint, Outbound};
use crate::metadata::ConnectionMetadataManager;
use crate::pinging::PingSettings;

/// Settings shared by every role constructor.
#[derive(Clone)]
pub struct EndpointOptions {
    pub clock: SharedClock,
    pub ping: PingSettings,
    /// Set to take part in connection-metadata gossip.
    pub metadata: Option<ConnectionMetadataManager>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            clock: system_clock(),
            ping: PingSettings::default(),
            metadata: None,
        }
    }
}

impl EndpointOptions {
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            ping: PingSettings::from(config),
            ..Self::default()
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ping(mut self, ping: PingSettings) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_metadata(mut self, manager: ConnectionMetadataManager) -> Self {
        self.metadata = Some(manager);
        self
    }

    pub(crate) fn endpoint<P: Protocol>(&self, outbound: Outbound, connection_type: &str) -> Endpoint<P> {
        match &self.metadata {
            Some(manager) => Endpoint::with_metadata(outbound, manager, connection_type),
            None => Endpoint::new(outbound),
        }
    }
}
