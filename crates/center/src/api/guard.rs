//! Admin auth guard — an Axum extractor handlers opt into by adding
//! `_guard: AdminGuard` to their parameter list.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Enforces the admin bearer token.
///
/// The configured token is kept only as a SHA-256 digest; the provided
/// token is hashed and compared in constant time so neither content nor
/// length leaks through timing. With no token configured the admin surface
/// is disabled outright.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_hash) = &state.admin_token_hash else {
            return Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": "admin endpoints disabled: no admin token configured"
                })),
            ));
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if provided_hash
            .as_slice()
            .ct_eq(expected_hash.as_slice())
            .unwrap_u8()
            != 1
        {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "invalid admin token" })),
            ));
        }
        Ok(AdminGuard)
    }
}
