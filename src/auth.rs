use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sha1::Digest;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
struct Claims {
    sub: String,
}

/// Resolve the calling user from the `Authorization: Bearer` token.
/// Outside production, an `x-user-id` header may stand in when dev auth
/// overrides are enabled.
pub fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(user_id.to_string());
        }
    }

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    let secret = state.config.auth_jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("AUTH_JWT_SECRET is not configured".to_string())
    })?;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized("invalid or expired token".to_string()))?;

    Ok(decoded.claims.sub)
}

/// SHA-1 hex of a raw access token. Only the hash is ever persisted; the
/// raw token is handed to the guest once, at booking creation.
pub fn hash_access_token(raw_token: &str) -> String {
    sha1::Sha1::digest(raw_token.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
