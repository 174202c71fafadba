use axum::Json;
use axum::extract::{
  Path,
  State
};
use axum::http::{
  HeaderMap,
  StatusCode
};
use sqlx::SqlitePool;

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::ServerError;
use crate::models::{
  AddCartItemRequest,
  CartItemRow,
  CartResponse,
  UpdateCartItemRequest
};

#[derive(sqlx::FromRow)]
struct OwnedItem {
  quantity: i64,
  stock:    i64,
  attached: bool
}

pub async fn view_cart(
  State(state): State<AppState>,
  headers: HeaderMap
) -> Result<
  Json<CartResponse>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  Ok(Json(
    open_cart(&state.pool, user_id)
      .await?
  ))
}

pub async fn add_item(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<
    AddCartItemRequest
  >
) -> Result<
  (StatusCode, Json<CartResponse>),
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let quantity =
    payload.quantity.unwrap_or(1);

  if quantity < 1 {
    return Err(ServerError::bad_request(
      "quantity must be at least 1"
    ));
  }

  let stock =
    sqlx::query_scalar::<_, i64>(
      "SELECT stock FROM products WHERE \
       id = ?1"
    )
    .bind(payload.product_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| {
      ServerError::not_found(
        "product not found"
      )
    })?;

  let existing = sqlx::query_as::<
    _,
    (i64, i64)
  >(
    "SELECT id, quantity FROM cart_items \
     WHERE user_id = ?1 AND product_id = \
     ?2 AND purchased = 0 AND order_id IS \
     NULL"
  )
  .bind(user_id)
  .bind(payload.product_id)
  .fetch_optional(&state.pool)
  .await?;

  let total = existing
    .map(|(_, q)| q)
    .unwrap_or(0)
    .checked_add(quantity)
    .filter(|total| *total <= stock);

  let Some(total) = total else {
    return Err(ServerError::bad_request(
      format!(
        "only {stock} units in stock"
      )
    ));
  };

  match existing {
    | Some((item_id, _)) => {
      sqlx::query(
        "UPDATE cart_items SET quantity \
         = ?1 WHERE id = ?2"
      )
      .bind(total)
      .bind(item_id)
      .execute(&state.pool)
      .await?;
    }
    | None => {
      sqlx::query(
        "INSERT INTO cart_items \
         (user_id, product_id, \
         quantity, created_at) VALUES \
         (?1, ?2, ?3, datetime('now'))"
      )
      .bind(user_id)
      .bind(payload.product_id)
      .bind(total)
      .execute(&state.pool)
      .await?;
    }
  }

  tracing::debug!(
    user_id,
    product_id = payload.product_id,
    quantity = total,
    "cart item added"
  );

  Ok((
    StatusCode::CREATED,
    Json(
      open_cart(&state.pool, user_id)
        .await?
    )
  ))
}

pub async fn update_item(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(item_id): Path<i64>,
  Json(payload): Json<
    UpdateCartItemRequest
  >
) -> Result<
  Json<CartResponse>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  if payload.quantity < 1 {
    return Err(ServerError::bad_request(
      "quantity must be at least 1"
    ));
  }

  let item = load_open_item(
    &state.pool,
    user_id,
    item_id
  )
  .await?;

  if payload.quantity > item.stock {
    return Err(ServerError::bad_request(
      format!(
        "only {} units in stock",
        item.stock
      )
    ));
  }

  if payload.quantity != item.quantity {
    sqlx::query(
      "UPDATE cart_items SET quantity = \
       ?1 WHERE id = ?2"
    )
    .bind(payload.quantity)
    .bind(item_id)
    .execute(&state.pool)
    .await?;
  }

  Ok(Json(
    open_cart(&state.pool, user_id)
      .await?
  ))
}

pub async fn remove_item(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(item_id): Path<i64>
) -> Result<StatusCode, ServerError> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  load_open_item(
    &state.pool,
    user_id,
    item_id
  )
  .await?;

  sqlx::query(
    "DELETE FROM cart_items WHERE id = \
     ?1"
  )
  .bind(item_id)
  .execute(&state.pool)
  .await?;

  Ok(StatusCode::NO_CONTENT)
}

/// Items of other users are reported as
/// absent.
async fn load_open_item(
  pool: &SqlitePool,
  user_id: i64,
  item_id: i64
) -> Result<OwnedItem, ServerError> {
  let item = sqlx::query_as::<
    _,
    OwnedItem
  >(
    "SELECT ci.quantity, p.stock, \
     (ci.purchased = 1 OR ci.order_id IS \
     NOT NULL) AS attached FROM \
     cart_items ci JOIN products p ON \
     p.id = ci.product_id WHERE ci.id = \
     ?1 AND ci.user_id = ?2"
  )
  .bind(item_id)
  .bind(user_id)
  .fetch_optional(pool)
  .await?
  .ok_or_else(|| {
    ServerError::not_found(
      "cart item not found"
    )
  })?;

  if item.attached {
    return Err(ServerError::conflict(
      "cart item already belongs to an \
       order"
    ));
  }

  Ok(item)
}

pub(crate) async fn open_cart(
  pool: &SqlitePool,
  user_id: i64
) -> Result<CartResponse, sqlx::Error> {
  let items = sqlx::query_as::<
    _,
    CartItemRow
  >(
    "SELECT ci.id, ci.product_id, p.name \
     AS product_name, p.price_cents AS \
     unit_price_cents, ci.quantity, \
     p.price_cents * ci.quantity AS \
     subtotal_cents FROM cart_items ci \
     JOIN products p ON p.id = \
     ci.product_id WHERE ci.user_id = ?1 \
     AND ci.purchased = 0 AND ci.order_id \
     IS NULL ORDER BY ci.id"
  )
  .bind(user_id)
  .fetch_all(pool)
  .await?;

  let total_cents = items
    .iter()
    .map(|item| item.subtotal_cents)
    .sum();

  let item_count = items
    .iter()
    .map(|item| item.quantity)
    .sum();

  Ok(CartResponse {
    items,
    item_count,
    total_cents
  })
}
