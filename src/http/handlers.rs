//! Tunnel endpoints.
//!
//! - `POST {base}/{session_id}/{seq}`: raw uplink chunk, answered with an
//!   empty 200 once sequenced
//! - `GET {base}/{session_id}`: streamed downlink body for as long as the
//!   session lives

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::rejection::{BytesRejection, FailedToBufferBody};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream;

use crate::error::TunnelError;
use crate::http::response::generic;
use crate::http::server::AppState;
use crate::observability::metrics;

pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((session_id, seq)): Path<(String, String)>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let Ok(seq) = seq.parse::<u64>() else {
        tracing::debug!(session_id = %session_id, "Non-numeric sequence number");
        return generic(StatusCode::BAD_REQUEST);
    };

    let chunk = match body {
        Ok(chunk) => chunk,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            let limit = state.config.tunnel.max_chunk_bytes;
            let err = TunnelError::ChunkTooLarge {
                len: limit.saturating_add(1),
                limit,
            };
            metrics::record_error(err.kind());
            return rejected(&session_id, Some(seq), err);
        }
        Err(rejection) => {
            tracing::debug!(session_id = %session_id, seq, error = %rejection, "Failed to read chunk body");
            return generic(StatusCode::BAD_REQUEST);
        }
    };

    let len = chunk.len();
    match state.store.admit(&session_id, seq, chunk).await {
        Ok(admission) => {
            tracing::debug!(session_id = %session_id, seq, bytes = len, ?admission, "Chunk acknowledged");
            StatusCode::OK.into_response()
        }
        Err(err) => rejected(&session_id, Some(seq), err),
    }
}

pub async fn open_downlink(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let rx = match state.store.attach(&session_id).await {
        Ok(rx) => rx,
        Err(err) => {
            metrics::record_error(err.kind());
            return rejected(&session_id, None, err);
        }
    };
    tracing::debug!(session_id = %session_id, "Downlink attached");

    let body = stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<_, Infallible>(chunk), rx))
    });

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

fn rejected(session_id: &str, seq: Option<u64>, err: TunnelError) -> Response {
    match err.status() {
        StatusCode::NOT_FOUND => {
            tracing::debug!(session_id = %session_id, ?seq, error = %err, "Unknown session")
        }
        StatusCode::BAD_GATEWAY | StatusCode::INTERNAL_SERVER_ERROR => {
            tracing::error!(session_id = %session_id, ?seq, kind = err.kind(), error = %err, "Tunnel request failed")
        }
        _ => {
            tracing::warn!(session_id = %session_id, ?seq, kind = err.kind(), error = %err, "Tunnel request rejected")
        }
    }
    err.into_response()
}
