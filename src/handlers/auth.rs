//! Static bearer-token check for write endpoints.

use crate::errors::AppError;
use axum::http::{HeaderMap, header};

/// Accept the request when `Authorization: Bearer <secret>` matches.
///
/// With no secret configured every request is accepted.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<(), AppError> {
    let Some(secret) = secret else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == secret => Ok(()),
        _ => Err(AppError::unauthorized()),
    }
}
