//! Handshake decoding errors.

use thiserror::Error;

/// Reasons a handshake is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The source ended before the header was complete.
    #[error("truncated input: got {got} of {need} bytes")]
    TruncatedInput { got: usize, need: usize },

    /// The 16-byte secret does not match the configured one.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Only the TCP stream command is supported.
    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("invalid address type {0:#04x}")]
    InvalidAddressType(u8),

    /// Domain address was empty or not UTF-8.
    #[error("invalid hostname")]
    InvalidHostname,

    /// The byte source failed with something other than EOF.
    #[error("read failed: {0}")]
    Io(String),
}

impl HandshakeError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeError::TruncatedInput { .. } => "truncated_input",
            HandshakeError::AuthenticationFailed => "authentication_failed",
            HandshakeError::UnsupportedCommand(_) => "unsupported_command",
            HandshakeError::InvalidAddressType(_) => "invalid_address_type",
            HandshakeError::InvalidHostname => "invalid_hostname",
            HandshakeError::Io(_) => "read_failed",
        }
    }
}
