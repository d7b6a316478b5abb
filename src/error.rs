//! Tunnel error taxonomy.

use thiserror::Error;

use crate::protocol::HandshakeError;

/// Errors raised by the session and relay layers.
///
/// The HTTP layer maps each variant to a status code; the `Display` text is
/// for logs only and never reaches the client.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Chunk 0 did not carry a valid handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),

    /// A sequence number beyond the next expected one arrived.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// The uplink queue was full.
    #[error("uplink buffer overflow ({capacity} chunks)")]
    BufferOverflow { capacity: usize },

    #[error("chunk of {len} bytes exceeds limit of {limit}")]
    ChunkTooLarge { len: usize, limit: usize },

    /// The destination could not be reached.
    #[error("upstream {destination} unreachable: {reason}")]
    UpstreamUnreachable { destination: String, reason: String },

    /// No session with this id exists.
    #[error("session not found")]
    SessionNotFound,

    /// The session was torn down while the request was waiting on it.
    #[error("session expired")]
    SessionExpired,

    #[error("internal error: {0}")]
    Internal(String),
}

impl TunnelError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::HandshakeFailed(e) => e.kind(),
            TunnelError::SequenceGap { .. } => "sequence_gap",
            TunnelError::BufferOverflow { .. } => "buffer_overflow",
            TunnelError::ChunkTooLarge { .. } => "chunk_too_large",
            TunnelError::UpstreamUnreachable { .. } => "upstream_unreachable",
            TunnelError::SessionNotFound => "session_not_found",
            TunnelError::SessionExpired => "session_expired",
            TunnelError::Internal(_) => "internal",
        }
    }

    /// Whether this error ends the session it was raised on.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TunnelError::HandshakeFailed(_)
                | TunnelError::SequenceGap { .. }
                | TunnelError::BufferOverflow { .. }
                | TunnelError::UpstreamUnreachable { .. }
                | TunnelError::Internal(_)
        )
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
