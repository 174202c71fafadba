use axum::{extract::State, http::{HeaderMap, StatusCode}, Json};

use crate::app_state::AppState;
use crate::auth::{auth_user_id, hash_token, issue_token_pair, verify_password};
use crate::errors::ServerError;
use crate::models::{LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, TokenResponse};

const TOKEN_TYPE: &str = "Bearer";

#[derive(sqlx::FromRow)]
struct LoginRow {
    id: i64,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    phone: String,
    profile_image_url: Option<String>,
    is_staff: bool,
    is_active: bool,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let email = payload.email.trim().to_lowercase();
    let password = payload.password.as_str();
    if email.is_empty() || password.is_empty() {
        return Err(ServerError::bad_request("email and password required"));
    }

    let row = sqlx::query_as::<_, LoginRow>(
        "SELECT id, email, password_hash, first_name, last_name, phone, profile_image_url, is_staff, is_active FROM users WHERE email = ?1",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ServerError::unauthorized("invalid credentials"))?;

    verify_password(&row.password_hash, password)
        .map_err(|_| ServerError::unauthorized("invalid credentials"))?;

    if !row.is_active {
        return Err(ServerError::unauthorized("account disabled"));
    }

    let tokens = issue_token_pair(&state.pool, &state.auth, row.id).await?;
    tracing::info!(user_id = row.id, "login");

    Ok(Json(LoginResponse {
        access: tokens.access,
        refresh: tokens.refresh,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: tokens.expires_in,
        user_id: row.id,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
        phone: row.phone,
        profile_image_url: row.profile_image_url,
        is_admin: row.is_staff,
    }))
}

/// Exchanges a refresh token for a new pair; the presented token is consumed.
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    let token = payload.refresh.trim();
    if token.is_empty() {
        return Err(ServerError::bad_request("refresh token required"));
    }

    let user_id = sqlx::query_scalar::<_, i64>(
        "DELETE FROM user_tokens WHERE token_hash = ?1 AND expires_at > datetime('now') RETURNING user_id",
    )
    .bind(hash_token(token))
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ServerError::unauthorized("invalid refresh token"))?;

    let active = sqlx::query_scalar::<_, bool>("SELECT is_active FROM users WHERE id = ?1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .unwrap_or(false);
    if !active {
        return Err(ServerError::unauthorized("invalid refresh token"));
    }

    let tokens = issue_token_pair(&state.pool, &state.auth, user_id).await?;
    Ok(Json(TokenResponse {
        access: tokens.access,
        refresh: tokens.refresh,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: tokens.expires_in,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    let refresh = payload
        .and_then(|Json(body)| body.refresh)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    let revoked = match refresh {
        Some(token) => sqlx::query("DELETE FROM user_tokens WHERE user_id = ?1 AND token_hash = ?2")
            .bind(user_id)
            .bind(hash_token(&token))
            .execute(&state.pool)
            .await?
            .rows_affected(),
        None => sqlx::query("DELETE FROM user_tokens WHERE user_id = ?1")
            .bind(user_id)
            .execute(&state.pool)
            .await?
            .rows_affected(),
    };

    tracing::debug!(user_id, revoked, "logout");
    Ok(StatusCode::NO_CONTENT)
}
