//! Token issue and revocation handlers.

use crate::auth::{self, AuthUser};
use crate::error::RelayError;
use crate::storage::RelayStorage;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

/// `PUT /user/token`: exchange Basic credentials for a bearer token
pub async fn issue(
    State(storage): State<RelayStorage>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, RelayError> {
    let (user, password) = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(auth::parse_basic)
        .ok_or_else(|| RelayError::Auth("Missing credentials".to_string()))?;

    let hash = storage.password_hash(&user)?;
    let verified = match hash {
        Some(hash) => tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
            .await
            .map_err(|e| RelayError::Internal(format!("Verifier task failed: {}", e)))?,
        None => false,
    };
    if !verified {
        tracing::info!(user = %user, "Rejected token request");
        return Err(RelayError::Auth("Invalid username or password".to_string()));
    }

    let token = auth::new_token();
    storage.insert_token(&token, &user, Utc::now().timestamp_millis())?;
    tracing::info!(user = %user, "Issued token");

    Ok(Json(TokenResponse { token }))
}

/// `DELETE /user/token`: revoke a token of the authenticated account
pub async fn revoke(
    State(storage): State<RelayStorage>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<RevokeRequest>,
) -> Result<StatusCode, RelayError> {
    if storage.delete_token(&user, &req.token)? {
        tracing::info!(user = %user, "Revoked token");
    }
    Ok(StatusCode::NO_CONTENT)
}
