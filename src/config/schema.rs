//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tunnel.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::Secret;

/// Root configuration for the tunnel server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Session and protocol limits.
    pub tunnel: TunnelSettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Cosmetic response padding.
    pub padding: PaddingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl TunnelConfig {
    /// The configured secret, if it parses.
    pub fn secret(&self) -> Option<Secret> {
        self.tunnel.secret.parse().ok()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Protocol and session limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Shared client secret in UUID text form.
    pub secret: String,

    /// Path prefix for uplink and downlink routes.
    pub base_path: String,

    /// Maximum chunks queued for the upstream per session.
    pub max_buffered_chunks: usize,

    /// Maximum size of a single uplink chunk.
    pub max_chunk_bytes: usize,

    /// Sessions with no activity for this long are evicted.
    pub idle_timeout_secs: u64,

    /// Sessions without an attached downlink are evicted after this long.
    pub bootstrap_timeout_secs: u64,

    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,

    /// Chunks buffered between the downlink pump and the HTTP response.
    pub downlink_queue_chunks: usize,

    /// Read size used by the downlink pump.
    pub downlink_read_bytes: usize,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            base_path: "/tunnel".to_string(),
            max_buffered_chunks: 64,
            max_chunk_bytes: 1024 * 1024, // 1MB
            idle_timeout_secs: 30,
            bootstrap_timeout_secs: 10,
            sweep_interval_secs: 5,
            downlink_queue_chunks: 16,
            downlink_read_bytes: 16 * 1024,
        }
    }
}

impl TunnelSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Uplink request timeout in seconds. Downlink streams are not bounded.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Random-length `X-Padding` response header.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaddingConfig {
    pub enabled: bool,
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_bytes: 100,
            max_bytes: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable `/admin/status`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
        }
    }
}
