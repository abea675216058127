//! Configuration system for cuesync.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CUESYNC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cuesync/config.toml
//!   3. ~/.config/cuesync/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default port for the daemon's WebSocket and HTTP server.
pub const DEFAULT_PORT: u16 = 8120;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CuesyncConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human-readable name advertised in connection metadata.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addr: String,
    pub port: u16,
    /// Parent upstream to relay from, e.g. `ws://host:8120/listen`.
    /// Empty = this node is the origin of play state.
    pub upstream_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of `*.json` cue files served by content hash.
    pub cue_dir: PathBuf,
}

/// Timing knobs of the protocol layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Period between clock-offset probes once a probe has succeeded.
    pub ping_interval_ms: u64,
    /// First retry delay after a failed probe. Doubles on every failure.
    pub ping_initial_backoff_ms: u64,
    /// A probe with no answer within this time counts as failed.
    pub ping_timeout_ms: u64,
    /// A node that wants metadata only keeps gossip flowing while its
    /// last update is younger than this.
    pub metadata_liveness_ms: u64,
}

impl ProtocolConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.ping_initial_backoff_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn metadata_liveness(&self) -> Duration {
        Duration::from_millis(self.metadata_liveness_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "cuesyncd".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            upstream_url: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cue_dir: data_dir().join("cues"),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 10_000,
            ping_initial_backoff_ms: 1_000,
            ping_timeout_ms: 5_000,
            metadata_liveness_ms: 10_000,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cuesync")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("cuesync")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CuesyncConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CuesyncConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CUESYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CuesyncConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// The upstream to relay from, if any.
    pub fn upstream_url(&self) -> Option<&str> {
        let url = self.network.upstream_url.trim();
        (!url.is_empty()).then_some(url)
    }

    /// Apply CUESYNC_* overrides, reading variables through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CUESYNC_NODE__NAME") {
            self.node.name = v;
        }
        if let Some(v) = var("CUESYNC_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = var("CUESYNC_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = var("CUESYNC_NETWORK__UPSTREAM_URL") {
            self.network.upstream_url = v;
        }
        if let Some(v) = var("CUESYNC_STORAGE__CUE_DIR") {
            self.storage.cue_dir = PathBuf::from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_timings() {
        let config = CuesyncConfig::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.protocol.ping_interval(), Duration::from_secs(10));
        assert_eq!(config.protocol.metadata_liveness(), Duration::from_secs(10));
        assert!(config.upstream_url().is_none());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = CuesyncConfig::default();
        config.apply_env_overrides(|key| match key {
            "CUESYNC_NETWORK__PORT" => Some("9000".to_string()),
            "CUESYNC_NETWORK__UPSTREAM_URL" => Some("ws://parent:8120/listen".to_string()),
            "CUESYNC_NODE__NAME" => Some("relay".to_string()),
            _ => None,
        });
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.upstream_url(), Some("ws://parent:8120/listen"));
        assert_eq!(config.node.name, "relay");
    }

    #[test]
    fn bad_port_override_is_ignored() {
        let mut config = CuesyncConfig::default();
        config.apply_env_overrides(|key| {
            (key == "CUESYNC_NETWORK__PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.network.port, DEFAULT_PORT);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: CuesyncConfig = toml::from_str("[protocol]\nping_interval_ms = 250\n").unwrap();
        assert_eq!(config.protocol.ping_interval_ms, 250);
        assert_eq!(config.protocol.ping_timeout_ms, 5_000);
        assert_eq!(config.node.name, "cuesyncd");
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("cuesync-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        std::env::set_var("CUESYNC_CONFIG", config_path.to_str().unwrap());

        let path = CuesyncConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = CuesyncConfig::load().expect("load should succeed");
        assert_eq!(config.protocol.ping_initial_backoff_ms, 1_000);

        std::env::remove_var("CUESYNC_CONFIG");
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
