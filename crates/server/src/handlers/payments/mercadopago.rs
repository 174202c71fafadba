use axum::Json;
use axum::body::Bytes;
use axum::extract::{
  Path,
  Query,
  State
};
use axum::http::HeaderMap;

use crate::app_state::AppState;
use crate::auth::auth_user_id;
use crate::errors::ServerError;
use crate::gateway::{
  BackUrls,
  PaymentInfo,
  PreferenceItem,
  PreferenceRequest,
  cents_to_units,
  is_valid_payment_id,
  json_id,
  units_to_cents,
  verify_webhook_signature
};
use crate::handlers::orders::{
  load_order_detail,
  load_owned_order,
  reload_order_detail
};
use crate::models::{
  CreatePreferenceRequest,
  FinalizePaymentRequest,
  MercadoPagoPublicConfig,
  OrderDetail,
  OrderItemRow,
  PaymentResponse,
  PreferenceResponse,
  WebhookAck,
  WebhookQuery
};
use crate::payments::{
  CheckoutStart,
  GatewayUpdate,
  PROVIDER_MERCADOPAGO,
  apply_gateway_status,
  load_payment,
  order_id_for_reference,
  start_checkout
};
use crate::status::{
  OrderStatus,
  is_unsettled
};

const PAYMENT_TOPIC: &str = "payment";

pub async fn public_config(
  State(state): State<AppState>
) -> Json<MercadoPagoPublicConfig> {
  Json(MercadoPagoPublicConfig {
    public_key:  state
      .mercadopago_config
      .public_key
      .clone(),
    currency_id: state
      .mercadopago_config
      .currency_id
      .clone()
  })
}

pub async fn create_preference(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<
    CreatePreferenceRequest
  >
) -> Result<
  Json<PreferenceResponse>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  let order = load_owned_order(
    &state.pool,
    user_id,
    payload.order_id
  )
  .await?;

  if OrderStatus::parse(&order.status)
    == Some(OrderStatus::Paid)
  {
    return Err(ServerError::conflict(
      "order already paid"
    ));
  }

  let detail =
    load_order_detail(&state.pool, order)
      .await?;

  if detail.items.is_empty() {
    return Err(ServerError::bad_request(
      "order has no items"
    ));
  }

  let config = &state.mercadopago_config;

  let back_urls = match payload
    .redirect_url
    .as_deref()
    .map(|url| url.trim().trim_end_matches('/'))
    .filter(|url| !url.is_empty())
  {
    | Some(base) => {
      BackUrls {
        success: format!("{base}/success"),
        failure: format!("{base}/failure"),
        pending: format!("{base}/pending")
      }
    }
    | None => {
      BackUrls {
        success: config.success_url.clone(),
        failure: config.failure_url.clone(),
        pending: config.pending_url.clone()
      }
    }
  };

  let reference = detail.id.to_string();

  let request = PreferenceRequest {
    items: preference_items(
      &detail.items,
      &config.currency_id
    ),
    back_urls,
    auto_return: "approved".to_string(),
    external_reference: reference.clone(),
    notification_url: config
      .notification_url
      .clone()
  };

  let preference = state
    .mercadopago
    .create_preference(&request)
    .await
    .map_err(|e| {
      tracing::warn!(
        order_id = detail.id,
        error = %e,
        "preference creation failed"
      );
      ServerError::from(e)
    })?;

  let payment_id = start_checkout(
    &state.pool,
    detail.id,
    &CheckoutStart {
      provider:           PROVIDER_MERCADOPAGO,
      preference_id:      Some(
        preference.id.as_str()
      ),
      external_reference: &reference,
      amount_cents:       detail
        .total_cents,
      raw_payload:        &preference.raw
    }
  )
  .await?;

  Ok(Json(PreferenceResponse {
    preference_id: preference.id,
    public_key: config.public_key.clone(),
    init_point: preference.init_point,
    sandbox_init_point: preference
      .sandbox_init_point,
    payment_id
  }))
}

/// Provider notification. Accepts the
/// legacy `?topic=payment&id=` form and the
/// `{"type":"payment","data":{"id":..}}`
/// form.
pub async fn webhook(
  State(state): State<AppState>,
  Query(query): Query<WebhookQuery>,
  headers: HeaderMap,
  body: Bytes
) -> Result<Json<WebhookAck>, ServerError>
{
  let body: serde_json::Value =
    if body.is_empty() {
      serde_json::Value::Null
    } else {
      serde_json::from_slice(&body)
        .unwrap_or(serde_json::Value::Null)
    };

  let topic = query
    .topic
    .clone()
    .or_else(|| query.kind.clone())
    .or_else(|| {
      body["type"]
        .as_str()
        .or_else(|| body["topic"].as_str())
        .map(str::to_string)
    })
    .unwrap_or_default();

  if topic != PAYMENT_TOPIC {
    tracing::debug!(
      topic = %topic,
      "webhook topic ignored"
    );
    return Ok(ack("ignored"));
  }

  let payment_id = query
    .data_id
    .clone()
    .or_else(|| query.id.clone())
    .or_else(|| json_id(&body["data"]["id"]))
    .map(|id| id.trim().to_string())
    .filter(|id| !id.is_empty())
    .ok_or_else(|| {
      ServerError::bad_request(
        "payment id missing"
      )
    })?;

  if !is_valid_payment_id(&payment_id) {
    return Err(ServerError::bad_request(
      "malformed payment id"
    ));
  }

  if let Some(secret) = state
    .mercadopago_config
    .webhook_secret
    .as_deref()
    .filter(|s| !s.trim().is_empty())
  {
    let signature =
      header_str(&headers, "x-signature");

    let request_id =
      header_str(&headers, "x-request-id");

    if !verify_webhook_signature(
      secret,
      signature,
      request_id,
      &payment_id
    ) {
      tracing::warn!(
        payment_id = %payment_id,
        "webhook signature rejected"
      );
      return Err(ServerError::unauthorized(
        "invalid webhook signature"
      ));
    }
  }

  let info = state
    .mercadopago
    .get_payment(&payment_id)
    .await
    .map_err(|e| {
      tracing::warn!(
        payment_id = %payment_id,
        error = %e,
        "webhook payment lookup failed"
      );
      ServerError::from(e)
    })?;

  let reference = info
    .external_reference
    .clone()
    .unwrap_or_default();

  let Some(order_id) =
    order_id_for_reference(
      &state.pool,
      &reference
    )
    .await?
  else {
    tracing::warn!(
      payment_id = %info.id,
      reference = %reference,
      "webhook for unknown order"
    );
    return Ok(ack("ignored"));
  };

  match reconcile(&state, order_id, &info)
    .await?
  {
    | Some(_) => Ok(ack("processed")),
    | None => Ok(ack("ignored"))
  }
}

/// Payment state for the order's owner,
/// refreshed from the gateway while it is
/// still unsettled.
pub async fn poll_payment(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(order_id): Path<i64>
) -> Result<
  Json<PaymentResponse>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  load_owned_order(
    &state.pool,
    user_id,
    order_id
  )
  .await?;

  let payment =
    load_payment(&state.pool, order_id)
      .await?
      .ok_or_else(|| {
        ServerError::not_found(
          "payment not found"
        )
      })?;

  let external_id = payment
    .external_payment_id
    .clone()
    .filter(|_| {
      payment.provider
        == PROVIDER_MERCADOPAGO
        && is_unsettled(&payment.status)
    });

  let Some(external_id) = external_id
  else {
    return Ok(Json(payment));
  };

  match state
    .mercadopago
    .get_payment(&external_id)
    .await
  {
    | Ok(info) => {
      reconcile(&state, order_id, &info)
        .await?;
    }
    | Err(e) => {
      tracing::warn!(
        order_id,
        payment_id = %external_id,
        error = %e,
        "payment poll failed"
      );
      return Ok(Json(payment));
    }
  }

  let refreshed =
    load_payment(&state.pool, order_id)
      .await?
      .unwrap_or(payment);

  Ok(Json(refreshed))
}

/// Called once the buyer is redirected
/// back with the gateway payment id.
pub async fn finalize_payment(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(order_id): Path<i64>,
  Json(payload): Json<
    FinalizePaymentRequest
  >
) -> Result<
  Json<OrderDetail>,
  ServerError
> {
  let user_id =
    auth_user_id(&state, &headers)
      .await?;

  load_owned_order(
    &state.pool,
    user_id,
    order_id
  )
  .await?;

  let payment_id =
    payload.payment_id.trim();

  if payment_id.is_empty() {
    return Err(ServerError::bad_request(
      "payment_id required"
    ));
  }

  if !is_valid_payment_id(payment_id) {
    return Err(ServerError::bad_request(
      "malformed payment id"
    ));
  }

  let info = state
    .mercadopago
    .get_payment(payment_id)
    .await?;

  let reference = info
    .external_reference
    .as_deref()
    .unwrap_or_default();

  let owner = order_id_for_reference(
    &state.pool,
    reference
  )
  .await?;

  if owner != Some(order_id) {
    return Err(ServerError::bad_request(
      "payment does not belong to this \
       order"
    ));
  }

  reconcile(&state, order_id, &info)
    .await?;

  Ok(Json(
    reload_order_detail(
      &state.pool,
      order_id
    )
    .await?
  ))
}

async fn reconcile(
  state: &AppState,
  order_id: i64,
  info: &PaymentInfo
) -> Result<Option<OrderStatus>, ServerError>
{
  let reference = info
    .external_reference
    .clone()
    .unwrap_or_else(|| order_id.to_string());

  let status = apply_gateway_status(
    &state.pool,
    order_id,
    &GatewayUpdate {
      provider:            PROVIDER_MERCADOPAGO,
      external_payment_id: Some(
        info.id.as_str()
      ),
      external_reference:  &reference,
      status:              &info.status,
      status_detail:       info
        .status_detail
        .as_deref(),
      amount_cents:        info
        .transaction_amount
        .map(units_to_cents),
      raw_payload:         &info.raw
    }
  )
  .await?;

  Ok(status)
}

fn preference_items(
  items: &[OrderItemRow],
  currency_id: &str
) -> Vec<PreferenceItem> {
  items
    .iter()
    .map(|item| {
      PreferenceItem {
        title:       item
          .product_name
          .clone(),
        quantity:    item.quantity,
        unit_price:  cents_to_units(
          item.unit_price_cents
        ),
        currency_id: currency_id
          .to_string()
      }
    })
    .collect()
}

fn header_str<'a>(
  headers: &'a HeaderMap,
  name: &str
) -> &'a str {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default()
}

fn ack(status: &str) -> Json<WebhookAck> {
  Json(WebhookAck {
    status: status.to_string()
  })
}
