//! # Engine Configuration
//!
//! JSON configuration for the capture source, the classifier and the event
//! sink. Every field has a default, so an empty object (or no file at all)
//! yields the stock behaviour:
//!
//! ```json
//! {
//!   "capture":    { "filter": "ip", "buffer_size": 10485760, "snaplen": 65535,
//!                   "promiscuous": true, "read_timeout_ms": 100 },
//!   "classifier": { "mode": "significant", "dns_cache_capacity": 4096,
//!                   "app_data_capacity": 16384 },
//!   "sink":       { "dedup_ip_pairs": false }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors raised while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Capture source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// BPF filter expression, passed to the capture source unchanged.
    pub filter: String,
    /// Kernel buffer size in bytes.
    pub buffer_size: u32,
    /// Receive buffer size; longer frames are truncated to it.
    pub snaplen: u32,
    pub promiscuous: bool,
    /// How long a blocking read may wait before the dispatch loop rechecks
    /// whether it was stopped.
    pub read_timeout_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            filter: "ip".to_string(),
            buffer_size: 10 * 1024 * 1024,
            snaplen: 65535,
            promiscuous: true,
            read_timeout_ms: 100,
        }
    }
}

/// Which packets the classifier emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// TLS phases, DNS markers, named packets, UDP and TCP handshake or
    /// teardown segments.
    #[default]
    Significant,
    /// Every IPv4 TCP, UDP and ICMP packet.
    Unfiltered,
}

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub mode: FilterMode,
    /// Addresses remembered by the DNS answer cache.
    pub dns_cache_capacity: usize,
    /// Connections remembered as having reported Application Data.
    pub app_data_capacity: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Significant,
            dns_cache_capacity: 4096,
            app_data_capacity: 16384,
        }
    }
}

/// Event sink settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Forward only the first packet of each source/destination IP pair.
    pub dedup_ip_pairs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub classifier: ClassifierConfig,
    pub sink: SinkConfig,
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
