use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::error::ApiError;

/// Check the bearer token against the configured shared secret.
///
/// Without a secret every request is accepted.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Ok(());
    };

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match token {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
