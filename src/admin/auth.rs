use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;
use crate::protocol::constant_time_eq;

/// Require `Authorization: Bearer <admin.api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if bearer_matches(header, &state.config.admin.api_key) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// An empty key never matches.
fn bearer_matches(header: Option<&str>, api_key: &str) -> bool {
    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => !api_key.is_empty() && constant_time_eq(token.as_bytes(), api_key.as_bytes()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_must_match_exactly() {
        assert!(bearer_matches(Some("Bearer secret-key"), "secret-key"));
        assert!(!bearer_matches(Some("Bearer secret-kez"), "secret-key"));
        assert!(!bearer_matches(Some("Bearer secret"), "secret-key"));
        assert!(!bearer_matches(Some("secret-key"), "secret-key"));
        assert!(!bearer_matches(None, "secret-key"));
        assert!(!bearer_matches(Some("Bearer "), ""));
    }
}
