//! Payment record persistence. Every write that touches the payment, its
//! order and the order's cart items runs inside one transaction.

use sqlx::SqlitePool;

use crate::models::PaymentResponse;
use crate::status::{
  OrderStatus,
  PAYMENT_PENDING,
  next_order_status
};

pub const PROVIDER_MERCADOPAGO: &str =
  "mercadopago";

pub const PROVIDER_PAYU: &str = "payu";

/// What a gateway reported about one
/// order's payment.
#[derive(Debug)]

pub struct GatewayUpdate<'a> {
  pub provider:            &'a str,
  pub external_payment_id: Option<&'a str>,
  pub external_reference:  &'a str,
  pub status:              &'a str,
  pub status_detail:       Option<&'a str>,
  pub amount_cents:        Option<i64>,
  pub raw_payload:         &'a serde_json::Value
}

/// A checkout session opened with a
/// gateway for one order.
#[derive(Debug)]

pub struct CheckoutStart<'a> {
  pub provider:           &'a str,
  pub preference_id:      Option<&'a str>,
  pub external_reference: &'a str,
  pub amount_cents:       i64,
  pub raw_payload:        &'a serde_json::Value
}

const PAYMENT_COLUMNS: &str = "id, \
                               order_id, \
                               provider, \
                               preference_id, \
                               external_payment_id, \
                               external_reference, \
                               status, \
                               status_detail, \
                               amount_cents, \
                               created_at, \
                               updated_at";

pub async fn load_payment(
  pool: &SqlitePool,
  order_id: i64
) -> Result<
  Option<PaymentResponse>,
  sqlx::Error
> {
  let query = format!(
    "SELECT {PAYMENT_COLUMNS} FROM \
     payments WHERE order_id = ?1"
  );

  sqlx::query_as::<_, PaymentResponse>(
    &query
  )
  .bind(order_id)
  .fetch_optional(pool)
  .await
}

/// Resolves a gateway reference back to
/// an order: first through the stored
/// payment reference, then as a bare
/// order id.
pub async fn order_id_for_reference(
  pool: &SqlitePool,
  reference: &str
) -> Result<Option<i64>, sqlx::Error> {
  let reference = reference.trim();

  if reference.is_empty() {
    return Ok(None);
  }

  let stored = sqlx::query_scalar::<
    _,
    i64
  >(
    "SELECT order_id FROM payments \
     WHERE external_reference = ?1"
  )
  .bind(reference)
  .fetch_optional(pool)
  .await?;

  if stored.is_some() {
    return Ok(stored);
  }

  let Ok(order_id) =
    reference.parse::<i64>()
  else {
    return Ok(None);
  };

  sqlx::query_scalar::<_, i64>(
    "SELECT id FROM orders WHERE id = \
     ?1"
  )
  .bind(order_id)
  .fetch_optional(pool)
  .await
}

/// Opens (or reopens) the order's payment
/// record in `pending` and moves the order
/// to `payment_in_process`. Returns the
/// payment record id.
pub async fn start_checkout(
  pool: &SqlitePool,
  order_id: i64,
  start: &CheckoutStart<'_>
) -> Result<i64, sqlx::Error> {
  let mut tx = pool.begin().await?;

  sqlx::query(
    "INSERT INTO payments (order_id, \
     provider, preference_id, \
     external_payment_id, \
     external_reference, status, \
     status_detail, amount_cents, \
     raw_payload, created_at, \
     updated_at) VALUES (?1, ?2, ?3, \
     NULL, ?4, ?5, NULL, ?6, ?7, \
     datetime('now'), datetime('now')) \
     ON CONFLICT(order_id) DO UPDATE SET \
     provider = excluded.provider, \
     preference_id = \
     excluded.preference_id, \
     external_payment_id = NULL, \
     external_reference = \
     excluded.external_reference, \
     status = excluded.status, \
     status_detail = NULL, amount_cents \
     = excluded.amount_cents, \
     raw_payload = excluded.raw_payload, \
     updated_at = datetime('now')"
  )
  .bind(order_id)
  .bind(start.provider)
  .bind(start.preference_id)
  .bind(start.external_reference)
  .bind(PAYMENT_PENDING)
  .bind(start.amount_cents)
  .bind(start.raw_payload.to_string())
  .execute(&mut *tx)
  .await?;

  sqlx::query(
    "UPDATE orders SET status = ?1, \
     updated_at = datetime('now') WHERE \
     id = ?2"
  )
  .bind(
    OrderStatus::PaymentInProcess
      .as_str()
  )
  .bind(order_id)
  .execute(&mut *tx)
  .await?;

  let payment_id =
    sqlx::query_scalar::<_, i64>(
      "SELECT id FROM payments WHERE \
       order_id = ?1"
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

  tx.commit().await?;

  tracing::info!(
    order_id,
    payment_id,
    provider = start.provider,
    "checkout started"
  );

  Ok(payment_id)
}

/// Records a gateway status on the order's
/// payment, moves the order accordingly
/// and, on approval, marks the order's
/// cart items purchased. `None` when the
/// order does not exist.
pub async fn apply_gateway_status(
  pool: &SqlitePool,
  order_id: i64,
  update: &GatewayUpdate<'_>
) -> Result<Option<OrderStatus>, sqlx::Error>
{
  let mut tx = pool.begin().await?;

  let current =
    sqlx::query_scalar::<_, String>(
      "SELECT status FROM orders WHERE \
       id = ?1"
    )
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await?;

  let Some(current) = current else {
    return Ok(None);
  };

  let amount_cents = match update
    .amount_cents
  {
    | Some(amount) => amount,
    | None => {
      sqlx::query_scalar::<_, i64>(
        "SELECT \
         COALESCE(SUM(subtotal_cents), 0) \
         FROM order_items WHERE order_id \
         = ?1"
      )
      .bind(order_id)
      .fetch_one(&mut *tx)
      .await?
    }
  };

  sqlx::query(
    "INSERT INTO payments (order_id, \
     provider, preference_id, \
     external_payment_id, \
     external_reference, status, \
     status_detail, amount_cents, \
     raw_payload, created_at, \
     updated_at) VALUES (?1, ?2, NULL, \
     ?3, ?4, ?5, ?6, ?7, ?8, \
     datetime('now'), datetime('now')) \
     ON CONFLICT(order_id) DO UPDATE SET \
     provider = excluded.provider, \
     external_payment_id = \
     COALESCE(excluded.\
     external_payment_id, \
     payments.external_payment_id), \
     external_reference = \
     excluded.external_reference, \
     status = excluded.status, \
     status_detail = \
     excluded.status_detail, \
     amount_cents = \
     excluded.amount_cents, \
     raw_payload = excluded.raw_payload, \
     updated_at = datetime('now')"
  )
  .bind(order_id)
  .bind(update.provider)
  .bind(update.external_payment_id)
  .bind(update.external_reference)
  .bind(update.status)
  .bind(update.status_detail)
  .bind(amount_cents)
  .bind(update.raw_payload.to_string())
  .execute(&mut *tx)
  .await?;

  let next = next_order_status(
    OrderStatus::parse(&current),
    update.status
  );

  sqlx::query(
    "UPDATE orders SET status = ?1, \
     updated_at = datetime('now') WHERE \
     id = ?2"
  )
  .bind(next.as_str())
  .bind(order_id)
  .execute(&mut *tx)
  .await?;

  if next == OrderStatus::Paid {
    sqlx::query(
      "UPDATE cart_items SET purchased = \
       1 WHERE order_id = ?1"
    )
    .bind(order_id)
    .execute(&mut *tx)
    .await?;
  }

  tx.commit().await?;

  tracing::info!(
    order_id,
    provider = update.provider,
    payment_status = update.status,
    previous = %current,
    order_status = next.as_str(),
    "payment reconciled"
  );

  Ok(Some(next))
}
