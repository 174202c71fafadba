use argon2::{
    password_hash::{rand_core::OsRng, rand_core::RngCore, SaltString},
    Argon2,
    PasswordHash,
    PasswordHasher,
    PasswordVerifier,
};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::app_state::AppState;
use crate::config::AuthConfig;
use crate::errors::ServerError;

const ACCESS_KIND: &str = "access";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub iat: u64,
    pub exp: u64,
    pub kind: String,
}

#[derive(Debug)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub expires_in: u64,
}

pub async fn auth_user_id(state: &AppState, headers: &HeaderMap) -> Result<i64, ServerError> {
    let token = bearer_token(headers)?;
    let claims = decode_access_token(&state.auth, &token)
        .map_err(|_| ServerError::unauthorized("invalid token"))?;

    // A token outlives neither its user nor their deactivation.
    let active = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM users WHERE id = ?1 AND is_active = 1",
    )
    .bind(claims.sub)
    .fetch_optional(&state.pool)
    .await?;
    if active.is_none() {
        return Err(ServerError::unauthorized("invalid token"));
    }
    Ok(claims.sub)
}

pub async fn require_staff(state: &AppState, user_id: i64) -> Result<(), ServerError> {
    let is_staff = sqlx::query_scalar::<_, bool>(
        "SELECT is_staff FROM users WHERE id = ?1 AND is_active = 1",
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .unwrap_or(false);

    if !is_staff {
        return Err(ServerError::forbidden("staff only"));
    }
    Ok(())
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, ServerError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let token = value.strip_prefix("Bearer ").unwrap_or("").trim();
    if token.is_empty() {
        return Err(ServerError::unauthorized(
            "missing bearer token",
        ));
    }
    Ok(token.to_string())
}

pub fn encode_access_token(
    auth: &AuthConfig,
    user_id: i64,
    now_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        iat: now_secs,
        exp: now_secs + auth.access_ttl_seconds,
        kind: ACCESS_KIND.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
}

pub fn decode_access_token(
    auth: &AuthConfig,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    if data.claims.kind != ACCESS_KIND {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
    }
    Ok(data.claims)
}

/// Signs a fresh access token and stores the hash of a new refresh token.
pub async fn issue_token_pair(
    pool: &SqlitePool,
    auth: &AuthConfig,
    user_id: i64,
) -> Result<TokenPair, ServerError> {
    let access = encode_access_token(auth, user_id, now_secs())
        .map_err(|e| ServerError::internal(format!("token encode error: {e}")))?;

    let refresh = generate_token();
    let refresh_hash = hash_token(&refresh);
    let ttl = auth.refresh_ttl_seconds as i64;

    sqlx::query(
        "INSERT INTO user_tokens (user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, datetime('now', '+' || ?3 || ' seconds'), datetime('now'))",
    )
    .bind(user_id)
    .bind(&refresh_hash)
    .bind(ttl)
    .execute(pool)
    .await?;

    Ok(TokenPair {
        access,
        refresh,
        expires_in: auth.access_ttl_seconds,
    })
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| format!("password hash error: {e}"))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(hash: &str, password: &str) -> Result<(), String> {
    let parsed = PasswordHash::new(hash).map_err(|e| format!("password hash parse error: {e}"))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|e| format!("password verify error: {e}"))
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
