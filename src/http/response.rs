//! Response shaping.
//!
//! # Responsibilities
//! - Map tunnel errors to HTTP status codes
//! - Decorate tunnel responses with cache and padding headers
//!
//! # Design Decisions
//! - Error bodies are fixed strings per status; detail goes to the log only
//! - Padding is random noise with no protocol meaning

use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::PaddingConfig;
use crate::error::TunnelError;

pub const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
pub const X_PADDING: HeaderName = HeaderName::from_static("x-padding");

impl TunnelError {
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelError::HandshakeFailed(_)
            | TunnelError::SequenceGap { .. }
            | TunnelError::BufferOverflow { .. }
            | TunnelError::ChunkTooLarge { .. } => StatusCode::BAD_REQUEST,
            TunnelError::SessionNotFound | TunnelError::SessionExpired => StatusCode::NOT_FOUND,
            TunnelError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            TunnelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        generic(self.status())
    }
}

/// A response whose body says nothing beyond the status.
pub fn generic(status: StatusCode) -> Response {
    let body = match status {
        StatusCode::BAD_REQUEST => "bad request",
        StatusCode::NOT_FOUND => "not found",
        StatusCode::BAD_GATEWAY => "bad gateway",
        _ => "internal error",
    };
    (status, body).into_response()
}

/// Add no-cache, no-buffering and padding headers to a tunnel response.
pub async fn decorate(State(padding): State<PaddingConfig>, mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    if padding.enabled {
        if let Ok(value) = HeaderValue::from_str(&padding_value(&padding)) {
            headers.insert(X_PADDING, value);
        }
    }
    response
}

fn padding_value(config: &PaddingConfig) -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(config.min_bytes..=config.max_bytes.max(config.min_bytes));
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
