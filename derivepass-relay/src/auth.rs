//! Account passwords and bearer-token auth for the relay.

use crate::error::RelayError;
use crate::storage::RelayStorage;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use rand::RngCore;

/// Bytes of randomness in an issued token
pub const TOKEN_BYTES: usize = 32;

/// Authenticated account name, attached to the request by [`auth_middleware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Hash an account password in PHC string form (Argon2id, default costs)
pub fn hash_password(password: &str) -> Result<String, RelayError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| RelayError::Internal(format!("Failed to encode salt: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| RelayError::Internal(format!("Hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC hash
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create an account with a freshly hashed password
pub fn create_user(storage: &RelayStorage, name: &str, password: &str) -> Result<(), RelayError> {
    if name.is_empty() || name.contains(':') {
        return Err(RelayError::BadRequest(
            "User name must be non-empty and must not contain ':'".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(RelayError::BadRequest("Password can't be empty".to_string()));
    }

    let hash = hash_password(password)?;
    storage.insert_user(name, &hash, chrono::Utc::now().timestamp_millis())
}

/// Split a `Basic` authorization header into user and password
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Auth middleware: resolves the bearer token to its account.
pub async fn auth_middleware(
    State(storage): State<RelayStorage>,
    mut request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .ok_or_else(|| RelayError::Auth("Missing bearer token".to_string()))?;

    let user = storage
        .token_user(token)?
        .ok_or_else(|| RelayError::Auth("Invalid token".to_string()))?;

    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}
