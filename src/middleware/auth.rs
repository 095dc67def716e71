//! Gateway access-key check shared by both inference entrypoints.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::errors::AppError;

const AUTH_COOKIE: &str = "auth_token";

/// Pull the caller's key from `x-api-key`, then `Authorization: Bearer`,
/// then the `auth_token` cookie.
pub fn extract_caller_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = header_str(headers, "x-api-key").filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }

    if let Some(token) = header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// Check the caller against the configured secret.
///
/// With no secret configured every caller is admitted. Returns the key the
/// caller presented (if any) so the fallback candidate can reuse it.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<Option<String>, AppError> {
    let presented = extract_caller_key(headers);

    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Ok(presented);
    };

    match presented {
        Some(key) if bool::from(key.as_bytes().ct_eq(secret.as_bytes())) => Ok(Some(key)),
        _ => Err(AppError::Unauthorized),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}
