use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::router::RelayState;

fn key_matches(candidate: &str, expected: &str) -> bool {
    bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()))
}

/// Every key the caller presented, in lookup order:
/// `x-relay-key` header, `Authorization: Bearer`, then `?key=`.
fn presented_keys(headers: &HeaderMap, query: Option<&str>) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(key) = headers.get("x-relay-key").and_then(|v| v.to_str().ok()) {
        keys.push(key.to_string());
    }
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .and_then(|auth| {
            auth.strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("bearer "))
        })
    {
        keys.push(token.trim().to_string());
    }
    if let Some(qs) = query {
        keys.extend(
            url::form_urlencoded::parse(qs.as_bytes())
                .filter(|(k, _)| k == "key")
                .map(|(_, v)| v.into_owned()),
        );
    }
    keys
}

/// Reject the request unless one presented key equals the relay key.
/// An empty relay key rejects everything.
pub fn ensure_authorized(
    headers: &HeaderMap,
    query: Option<&str>,
    expected: &str,
) -> Result<(), Response> {
    let authorized = !expected.is_empty()
        && presented_keys(headers, query)
            .iter()
            .any(|key| key_matches(key, expected));
    if authorized {
        return Ok(());
    }
    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"code": "unauthorized", "message": "invalid or missing relay key"}})),
    )
        .into_response())
}

#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<RelayState> for RequireKeyAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RelayState,
    ) -> Result<Self, Self::Rejection> {
        ensure_authorized(&parts.headers, parts.uri.query(), &state.relay_key)?;
        Ok(Self)
    }
}
