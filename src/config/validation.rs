//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits >= 1)
//! - Check cross-field constraints (bootstrap timeout below idle timeout)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::TunnelConfig;
use crate::protocol::Secret;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let tunnel = &config.tunnel;

    if tunnel.secret.parse::<Secret>().is_err() {
        errors.push(ValidationError::new("tunnel.secret", "must be a UUID"));
    }
    if !tunnel.base_path.starts_with('/') {
        errors.push(ValidationError::new("tunnel.base_path", "must start with '/'"));
    }
    if tunnel.base_path.contains(['{', '}', '*']) {
        errors.push(ValidationError::new("tunnel.base_path", "must not contain route captures"));
    }
    if tunnel.max_buffered_chunks == 0 {
        errors.push(ValidationError::new("tunnel.max_buffered_chunks", "must be at least 1"));
    }
    if tunnel.max_chunk_bytes == 0 {
        errors.push(ValidationError::new("tunnel.max_chunk_bytes", "must be at least 1"));
    }
    if tunnel.downlink_queue_chunks == 0 {
        errors.push(ValidationError::new("tunnel.downlink_queue_chunks", "must be at least 1"));
    }
    if tunnel.downlink_read_bytes == 0 {
        errors.push(ValidationError::new("tunnel.downlink_read_bytes", "must be at least 1"));
    }
    if tunnel.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("tunnel.idle_timeout_secs", "must be positive"));
    }
    if tunnel.bootstrap_timeout_secs == 0 {
        errors.push(ValidationError::new("tunnel.bootstrap_timeout_secs", "must be positive"));
    }
    if tunnel.bootstrap_timeout_secs >= tunnel.idle_timeout_secs {
        errors.push(ValidationError::new(
            "tunnel.bootstrap_timeout_secs",
            "must be shorter than tunnel.idle_timeout_secs",
        ));
    }
    if tunnel.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("tunnel.sweep_interval_secs", "must be positive"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be positive"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be positive"));
    }
    if config.padding.min_bytes > config.padding.max_bytes {
        errors.push(ValidationError::new("padding.min_bytes", "must not exceed padding.max_bytes"));
    }
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
