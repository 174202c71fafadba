use axum::Json;
use axum::extract::{
  Path,
  Query,
  State
};
use axum::http::{
  HeaderMap,
  StatusCode
};
use sqlx::SqlitePool;

use crate::app_state::AppState;
use crate::auth::{
  auth_user_id,
  require_staff
};
use crate::errors::ServerError;
use crate::models::{
  AdminOrderQuery,
  AdminOrderRow,
  CheckoutRequest,
  OrderDetail,
  OrderItemRow,
  OrderRow,
  OrderSummary
};
use crate::payments::load_payment;
use crate::status::OrderStatus;
use crate::validation::{
  MAX_ADDRESS_LEN,
  parse_delivery_date,
  required_text
};

#[derive(sqlx::FromRow)]
struct CheckoutLine {
  cart_item_id:     i64,
  product_id:       i64,
  product_name:     String,
  unit_price_cents: i64,
  quantity:         i64,
  stock:            i64
}

/// Per-line subtotals, or `None` when a
/// line or the order total leaves `i64`.
fn order_subtotals(
  lines: &[CheckoutLine]
) -> Option<Vec<i64>> {
  let subtotals = lines
    .iter()
    .map(|line| {
      line
        .unit_price_cents
        .checked_mul(line.quantity)
    })
    .collect::<Option<Vec<_>>>()?;

  subtotals
    .iter()
    .try_fold(0_i64, |acc, s| {
      acc.checked_add(*s)
    })?;

  Some(subtotals)
}

const ORDER_TOTAL: &str =
  "COALESCE((SELECT SUM(oi.subtotal_cents) \
   FROM order_items oi WHERE oi.order_id \
   = o.id), 0) AS total_cents";

/// Turns the caller's open cart into an
/// order. Stock is checked and decremented
/// in the same transaction that snapshots
/// the lines.
pub async fn checkout(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<CheckoutRequest>
) -> Result<
  (StatusCode, Json<OrderDetail>),
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let address = required_text(
    "delivery_address",
    &payload.delivery_address,
    MAX_ADDRESS_LEN
  )?;

  let delivery_date = payload
    .delivery_date
    .as_deref()
    .map(str::trim)
    .filter(|d| !d.is_empty())
    .map(parse_delivery_date)
    .transpose()?;

  let mut tx = state.pool.begin().await?;

  let lines = sqlx::query_as::<
    _,
    CheckoutLine
  >(
    "SELECT ci.id AS cart_item_id, \
     ci.product_id, p.name AS \
     product_name, p.price_cents AS \
     unit_price_cents, ci.quantity, \
     p.stock FROM cart_items ci JOIN \
     products p ON p.id = ci.product_id \
     WHERE ci.user_id = ?1 AND \
     ci.purchased = 0 AND ci.order_id IS \
     NULL ORDER BY ci.id"
  )
  .bind(user_id)
  .fetch_all(&mut *tx)
  .await?;

  if lines.is_empty() {
    return Err(ServerError::bad_request(
      "cart is empty"
    ));
  }

  if let Some(short) = lines
    .iter()
    .find(|line| line.quantity > line.stock)
  {
    return Err(ServerError::conflict(
      format!(
        "insufficient stock for {}",
        short.product_name
      )
    ));
  }

  let subtotals = order_subtotals(&lines)
    .ok_or_else(|| {
      ServerError::bad_request(
        "order total out of range"
      )
    })?;

  let order_id =
    sqlx::query_scalar::<_, i64>(
      "INSERT INTO orders (user_id, \
       status, delivery_address, \
       delivery_date, created_at, \
       updated_at) VALUES (?1, ?2, ?3, \
       ?4, datetime('now'), \
       datetime('now')) RETURNING id"
    )
    .bind(user_id)
    .bind(OrderStatus::Pending.as_str())
    .bind(address)
    .bind(delivery_date.as_deref())
    .fetch_one(&mut *tx)
    .await?;

  for (line, subtotal) in
    lines.iter().zip(subtotals)
  {
    let decremented = sqlx::query(
      "UPDATE products SET stock = stock \
       - ?1 WHERE id = ?2 AND stock >= ?1"
    )
    .bind(line.quantity)
    .bind(line.product_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if decremented == 0 {
      return Err(ServerError::conflict(
        format!(
          "insufficient stock for {}",
          line.product_name
        )
      ));
    }

    sqlx::query(
      "INSERT INTO order_items \
       (order_id, product_id, \
       product_name, unit_price_cents, \
       quantity, subtotal_cents) VALUES \
       (?1, ?2, ?3, ?4, ?5, ?6)"
    )
    .bind(order_id)
    .bind(line.product_id)
    .bind(&line.product_name)
    .bind(line.unit_price_cents)
    .bind(line.quantity)
    .bind(subtotal)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
      "UPDATE cart_items SET order_id = \
       ?1 WHERE id = ?2"
    )
    .bind(order_id)
    .bind(line.cart_item_id)
    .execute(&mut *tx)
    .await?;
  }

  tx.commit().await?;

  tracing::info!(
    order_id,
    user_id,
    lines = lines.len(),
    "order created"
  );

  let order =
    load_order_row(&state.pool, order_id)
      .await?;

  Ok((
    StatusCode::CREATED,
    Json(
      load_order_detail(&state.pool, order)
        .await?
    )
  ))
}

pub async fn list_orders(
  State(state): State<AppState>,
  headers: HeaderMap
) -> Result<
  Json<Vec<OrderSummary>>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let query = format!(
    "SELECT o.id, o.status, \
     o.delivery_address, \
     o.delivery_date, o.created_at, \
     {ORDER_TOTAL} FROM orders o WHERE \
     o.user_id = ?1 ORDER BY o.id DESC"
  );

  let rows = sqlx::query_as::<
    _,
    OrderSummary
  >(&query)
  .bind(user_id)
  .fetch_all(&state.pool)
  .await?;

  Ok(Json(rows))
}

pub async fn order_detail(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(order_id): Path<i64>
) -> Result<
  Json<OrderDetail>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let order = load_owned_order(
    &state.pool,
    user_id,
    order_id
  )
  .await?;

  Ok(Json(
    load_order_detail(&state.pool, order)
      .await?
  ))
}

pub async fn admin_orders(
  State(state): State<AppState>,
  headers: HeaderMap,
  Query(query): Query<AdminOrderQuery>
) -> Result<
  Json<Vec<AdminOrderRow>>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  require_staff(&state, user_id).await?;

  let status = match query
    .status
    .as_deref()
    .map(str::trim)
    .filter(|s| !s.is_empty())
  {
    | Some(raw) => {
      Some(
        OrderStatus::parse(raw).ok_or_else(
          || {
            ServerError::bad_request(
              format!(
                "unknown order status: \
                 {raw}"
              )
            )
          }
        )?
      )
    }
    | None => None
  };

  let sql = format!(
    "SELECT o.id, o.user_id, u.email, \
     o.status, o.delivery_address, \
     o.created_at, {ORDER_TOTAL} FROM \
     orders o JOIN users u ON u.id = \
     o.user_id WHERE (?1 IS NULL OR \
     o.status = ?1) ORDER BY o.id DESC"
  );

  let rows = sqlx::query_as::<
    _,
    AdminOrderRow
  >(&sql)
  .bind(status.map(OrderStatus::as_str))
  .fetch_all(&state.pool)
  .await?;

  Ok(Json(rows))
}

async fn load_order_row(
  pool: &SqlitePool,
  order_id: i64
) -> Result<OrderRow, ServerError> {
  sqlx::query_as::<_, OrderRow>(
    "SELECT id, user_id, status, \
     delivery_address, delivery_date, \
     created_at, updated_at FROM orders \
     WHERE id = ?1"
  )
  .bind(order_id)
  .fetch_optional(pool)
  .await?
  .ok_or_else(|| {
    ServerError::not_found(
      "order not found"
    )
  })
}

/// 404 when the order does not exist, 403
/// when it belongs to someone else.
pub(crate) async fn load_owned_order(
  pool: &SqlitePool,
  user_id: i64,
  order_id: i64
) -> Result<OrderRow, ServerError> {
  let order =
    load_order_row(pool, order_id).await?;

  if order.user_id != user_id {
    tracing::warn!(
      order_id,
      user_id,
      "order access denied"
    );
    return Err(ServerError::forbidden(
      "order belongs to another user"
    ));
  }

  Ok(order)
}

pub(crate) async fn load_order_detail(
  pool: &SqlitePool,
  order: OrderRow
) -> Result<OrderDetail, ServerError> {
  let items = sqlx::query_as::<
    _,
    OrderItemRow
  >(
    "SELECT product_id, product_name, \
     unit_price_cents, quantity, \
     subtotal_cents FROM order_items \
     WHERE order_id = ?1 ORDER BY id"
  )
  .bind(order.id)
  .fetch_all(pool)
  .await?;

  let total_cents = items
    .iter()
    .map(|item| item.subtotal_cents)
    .sum();

  let payment =
    load_payment(pool, order.id).await?;

  Ok(OrderDetail {
    id: order.id,
    user_id: order.user_id,
    status: order.status,
    delivery_address: order
      .delivery_address,
    delivery_date: order.delivery_date,
    created_at: order.created_at,
    updated_at: order.updated_at,
    items,
    total_cents,
    payment
  })
}

pub(crate) async fn reload_order_detail(
  pool: &SqlitePool,
  order_id: i64
) -> Result<OrderDetail, ServerError> {
  let order =
    load_order_row(pool, order_id).await?;

  load_order_detail(pool, order).await
}
