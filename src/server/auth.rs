//! Shared-secret request authorization
//!
//! The token may arrive in the `X-StageCue-Token` header, an
//! `Authorization: Bearer` header, or a `token` query/body parameter. An
//! empty configured token disables every check. Rejections are uniform: no
//! hint about which credential field was wrong.

use axum::http::{header, HeaderMap};

/// Custom header carrying the shared secret.
pub const TOKEN_HEADER: &str = "x-stagecue-token";

/// Compare a presented token against the configured one.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    expected.is_empty() || expected == presented
}

/// Check every place a request may carry the token.
pub fn request_authorized(
    expected: &str,
    headers: &HeaderMap,
    query_token: Option<&str>,
    body_token: Option<&str>,
) -> bool {
    if expected.is_empty() {
        return true;
    }

    if let Some(value) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        if token_matches(expected, value) {
            return true;
        }
    }

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(bearer) = value.trim().strip_prefix("Bearer ") {
            if token_matches(expected, bearer.trim()) {
                return true;
            }
        }
    }

    if query_token.is_some_and(|t| token_matches(expected, t)) {
        return true;
    }
    if body_token.is_some_and(|t| token_matches(expected, t)) {
        return true;
    }

    false
}
