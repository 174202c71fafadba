use axum::Json;
use axum::extract::State;
use axum::http::{
  HeaderMap,
  StatusCode
};

use crate::app_state::AppState;
use crate::auth::{
  auth_user_id,
  hash_password
};
use crate::errors::{
  ServerError,
  map_db_error
};
use crate::models::{
  CreateUserRequest,
  UpdateUserRequest,
  UserResponse
};
use crate::validation::{
  check_image_url,
  check_password,
  check_phone,
  normalize_email,
  required_text
};

const MAX_NAME_LEN: usize = 150;

const USER_COLUMNS: &str =
  "id, email, first_name, last_name, \
   phone, profile_image_url, is_staff";

pub async fn create_user(
  State(state): State<AppState>,
  Json(payload): Json<
    CreateUserRequest
  >
) -> Result<
  (StatusCode, Json<UserResponse>),
  ServerError
> {
  let email =
    normalize_email(&payload.email)?;

  check_password(&payload.password)?;

  let first_name = required_text(
    "first_name",
    &payload.first_name,
    MAX_NAME_LEN
  )?;

  let last_name = required_text(
    "last_name",
    &payload.last_name,
    MAX_NAME_LEN
  )?;

  let phone = payload.phone.trim();

  check_phone(phone)?;

  let image_url = payload
    .profile_image_url
    .as_deref()
    .map(str::trim)
    .filter(|url| !url.is_empty());

  if let Some(url) = image_url {
    check_image_url(url)?;
  }

  let password_hash = hash_password(
    &payload.password
  )
  .map_err(ServerError::internal)?;

  let user_id =
    sqlx::query_scalar::<_, i64>(
      "INSERT INTO users (email, \
       password_hash, first_name, \
       last_name, phone, \
       profile_image_url, created_at) \
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
       datetime('now')) RETURNING id"
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(phone)
    .bind(image_url)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
      map_db_error(
        e,
        "email already registered"
      )
    })?;

  tracing::info!(
    user_id,
    "user registered"
  );

  let user =
    load_user(&state, user_id).await?;

  Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_me(
  State(state): State<AppState>,
  headers: HeaderMap
) -> Result<
  Json<UserResponse>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  Ok(Json(
    load_user(&state, user_id).await?
  ))
}

pub async fn update_me(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<
    UpdateUserRequest
  >
) -> Result<
  Json<UserResponse>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let first_name = payload
    .first_name
    .as_deref()
    .map(|v| {
      required_text(
        "first_name",
        v,
        MAX_NAME_LEN
      )
    })
    .transpose()?;

  let last_name = payload
    .last_name
    .as_deref()
    .map(|v| {
      required_text(
        "last_name",
        v,
        MAX_NAME_LEN
      )
    })
    .transpose()?;

  let phone =
    payload.phone.as_deref().map(str::trim);

  if let Some(phone) = phone {
    check_phone(phone)?;
  }

  // An empty string clears the picture.
  let image_url = payload
    .profile_image_url
    .as_deref()
    .map(str::trim);

  if let Some(url) = image_url
    .filter(|url| !url.is_empty())
  {
    check_image_url(url)?;
  }

  let password_hash = match payload
    .password
    .as_deref()
  {
    | Some(password) => {
      check_password(password)?;
      Some(
        hash_password(password)
          .map_err(ServerError::internal)?
      )
    }
    | None => None
  };

  let result = sqlx::query(
    "UPDATE users SET first_name = \
     COALESCE(?1, first_name), \
     last_name = COALESCE(?2, \
     last_name), phone = COALESCE(?3, \
     phone), profile_image_url = CASE \
     WHEN ?4 IS NULL THEN \
     profile_image_url WHEN ?4 = '' THEN \
     NULL ELSE ?4 END, password_hash = \
     COALESCE(?5, password_hash) WHERE \
     id = ?6"
  )
  .bind(first_name)
  .bind(last_name)
  .bind(phone)
  .bind(image_url)
  .bind(password_hash.as_deref())
  .bind(user_id)
  .execute(&state.pool)
  .await?;

  if result.rows_affected() == 0 {
    return Err(ServerError::not_found(
      "user not found"
    ));
  }

  if password_hash.is_some() {
    sqlx::query(
      "DELETE FROM user_tokens WHERE \
       user_id = ?1"
    )
    .bind(user_id)
    .execute(&state.pool)
    .await?;
  }

  Ok(Json(
    load_user(&state, user_id).await?
  ))
}

pub async fn delete_me(
  State(state): State<AppState>,
  headers: HeaderMap
) -> Result<StatusCode, ServerError> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let result = sqlx::query(
    "DELETE FROM users WHERE id = ?1"
  )
  .bind(user_id)
  .execute(&state.pool)
  .await
  .map_err(|e| {
    map_db_error(
      e,
      "user has records that block \
       deletion"
    )
  })?;

  if result.rows_affected() == 0 {
    return Err(ServerError::not_found(
      "user not found"
    ));
  }

  tracing::info!(user_id, "user deleted");

  Ok(StatusCode::NO_CONTENT)
}

async fn load_user(
  state: &AppState,
  user_id: i64
) -> Result<UserResponse, ServerError> {
  let query = format!(
    "SELECT {USER_COLUMNS} FROM users \
     WHERE id = ?1"
  );

  sqlx::query_as::<_, UserResponse>(
    &query
  )
  .bind(user_id)
  .fetch_optional(&state.pool)
  .await?
  .ok_or_else(|| {
    ServerError::not_found(
      "user not found"
    )
  })
}
