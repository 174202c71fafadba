use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};

use crate::app_state::AppState;
use crate::auth::{auth_user_id, now_secs};
use crate::errors::ServerError;
use crate::gateway::{
    confirmation_signature, units_to_cents, Buyer, CardDetails, PayuTransaction,
};
use crate::handlers::orders::{load_order_detail, load_owned_order};
use crate::models::{
    PayuNotification, PayuPublicConfig, PayuTransactionRequest, PayuTransactionResponse,
    WebhookAck,
};
use crate::payments::{apply_gateway_status, order_id_for_reference, GatewayUpdate, PROVIDER_PAYU};
use crate::status::{payu_state_pol_to_status, payu_state_to_status, OrderStatus};

const SUCCESS_CODE: &str = "SUCCESS";

pub async fn public_config(State(state): State<AppState>) -> Json<PayuPublicConfig> {
    let cfg = &state.payu_config;
    Json(PayuPublicConfig {
        merchant_id: cfg.merchant_id.clone(),
        account_id: cfg.account_id.clone(),
        currency: cfg.currency.clone(),
        country: cfg.country.clone(),
        test: cfg.test,
    })
}

pub async fn create_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PayuTransactionRequest>,
) -> Result<(StatusCode, Json<PayuTransactionResponse>), ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;

    let missing = missing_fields(&payload);
    if !missing.is_empty() {
        return Err(ServerError::bad_request(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }
    let order_id = payload.order_id.unwrap_or_default();

    let order = load_owned_order(&state.pool, user_id, order_id).await?;
    if OrderStatus::parse(&order.status) == Some(OrderStatus::Paid) {
        return Err(ServerError::conflict("order already paid"));
    }
    let detail = load_order_detail(&state.pool, order).await?;
    if detail.items.is_empty() {
        return Err(ServerError::bad_request("order has no items"));
    }

    let reference = format!("ORDER-{order_id}-{}", now_secs());
    let payer_name = text(&payload.payer_name);
    let transaction = PayuTransaction {
        reference: reference.clone(),
        description: payload
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Order {order_id}")),
        amount_cents: detail.total_cents,
        buyer: Buyer {
            full_name: payer_name.clone(),
            email: text(&payload.payer_email),
            dni_number: text(&payload.payer_document),
        },
        card: CardDetails {
            number: text(&payload.credit_card_number),
            security_code: text(&payload.credit_card_security_code),
            expiration_date: text(&payload.credit_card_expiration_date),
            holder_name: payer_name,
        },
        payment_method: text(&payload.payment_method).to_uppercase(),
        installments: payload.installments.unwrap_or(1).max(1),
        device_session_id: text(&payload.device_session_id),
        ip_address: client_ip(&headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string(),
    };

    let result = state.payu.submit_transaction(&transaction).await.map_err(|e| {
        tracing::warn!(order_id, reference = %reference, error = %e, "payu transaction failed");
        ServerError::from(e)
    })?;

    if result.code != SUCCESS_CODE {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| format!("payu returned {}", result.code));
        tracing::info!(order_id, reference = %reference, error = %message, "payu rejected request");
        return Err(ServerError::bad_request(message));
    }

    let payment_status = payu_state_to_status(result.state.as_deref().unwrap_or_default());
    let order_status = apply_gateway_status(
        &state.pool,
        order_id,
        &GatewayUpdate {
            provider: PROVIDER_PAYU,
            external_payment_id: result.transaction_id.as_deref(),
            external_reference: &reference,
            status: payment_status,
            status_detail: result.response_code.as_deref(),
            amount_cents: Some(detail.total_cents),
            raw_payload: &result.raw,
        },
    )
    .await?
    .ok_or_else(|| ServerError::not_found("order not found"))?;

    Ok((
        StatusCode::CREATED,
        Json(PayuTransactionResponse {
            status: result.state,
            response_code: result.response_code,
            response_message: result.response_message,
            transaction_id: result.transaction_id,
            payu_order_id: result.order_id,
            reference_code: reference,
            order_status: order_status.as_str().to_string(),
        }),
    ))
}

/// PayU confirmation callback, form-encoded or JSON.
pub async fn notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServerError> {
    let notification = parse_notification(&headers, &body)?;
    let cfg = &state.payu_config;

    let expected = confirmation_signature(
        &cfg.api_key,
        &cfg.merchant_id,
        &notification.reference_sale,
        &notification.value,
        &notification.currency,
        &notification.state_pol,
    )
    .ok_or_else(|| ServerError::bad_request("invalid value"))?;

    if !expected.eq_ignore_ascii_case(notification.sign.trim()) {
        tracing::warn!(reference = %notification.reference_sale, "payu signature rejected");
        return Err(ServerError::unauthorized("invalid signature"));
    }

    let Some(order_id) = order_id_for_reference(&state.pool, &notification.reference_sale).await?
    else {
        tracing::warn!(reference = %notification.reference_sale, "payu notification for unknown order");
        return Ok(ack("ignored"));
    };

    let raw = serde_json::to_value(&notification).map_err(|e| ServerError::internal(e.to_string()))?;
    let amount_cents = notification.value.trim().parse::<f64>().ok().map(units_to_cents);

    apply_gateway_status(
        &state.pool,
        order_id,
        &GatewayUpdate {
            provider: PROVIDER_PAYU,
            external_payment_id: notification.transaction_id.as_deref(),
            external_reference: &notification.reference_sale,
            status: payu_state_pol_to_status(&notification.state_pol),
            status_detail: notification.response_message_pol.as_deref(),
            amount_cents,
            raw_payload: &raw,
        },
    )
    .await?;

    Ok(ack("processed"))
}

fn parse_notification(headers: &HeaderMap, body: &[u8]) -> Result<PayuNotification, ServerError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));

    let parsed = if is_json {
        serde_json::from_slice::<PayuNotification>(body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes::<PayuNotification>(body).map_err(|e| e.to_string())
    };
    let notification =
        parsed.map_err(|e| ServerError::bad_request(format!("invalid notification: {e}")))?;

    if notification.reference_sale.trim().is_empty() || notification.state_pol.trim().is_empty() {
        return Err(ServerError::bad_request("reference_sale and state_pol required"));
    }
    Ok(notification)
}

fn missing_fields(payload: &PayuTransactionRequest) -> Vec<&'static str> {
    let required = [
        ("credit_card_number", &payload.credit_card_number),
        ("credit_card_expiration_date", &payload.credit_card_expiration_date),
        ("credit_card_security_code", &payload.credit_card_security_code),
        ("payment_method", &payload.payment_method),
        ("payer_name", &payload.payer_name),
        ("payer_email", &payload.payer_email),
        ("device_session_id", &payload.device_session_id),
    ];

    let mut missing = Vec::new();
    if payload.order_id.is_none() {
        missing.push("order_id");
    }
    missing.extend(
        required
            .iter()
            .filter(|(_, value)| value.as_deref().map(str::trim).unwrap_or_default().is_empty())
            .map(|(name, _)| *name),
    );
    missing
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("127.0.0.1")
        .to_string()
}

fn ack(status: &str) -> Json<WebhookAck> {
    Json(WebhookAck {
        status: status.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_are_named() {
        let payload = PayuTransactionRequest {
            order_id: Some(1),
            credit_card_number: Some("4097440000000004".into()),
            payer_name: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(
            missing_fields(&payload),
            vec![
                "credit_card_expiration_date",
                "credit_card_security_code",
                "payment_method",
                "payer_name",
                "payer_email",
                "device_session_id",
            ]
        );
    }

    #[test]
    fn notification_parses_form_and_json() {
        let mut form = HeaderMap::new();
        form.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let parsed = parse_notification(
            &form,
            b"reference_sale=ORDER-1-1&state_pol=4&value=10.00&currency=ARS&sign=abc",
        )
        .unwrap();
        assert_eq!(parsed.reference_sale, "ORDER-1-1");
        assert_eq!(parsed.value, "10.00");

        let mut json = HeaderMap::new();
        json.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let parsed = parse_notification(
            &json,
            br#"{"reference_sale":"ORDER-2-1","state_pol":"6","value":"5.5","currency":"ARS","sign":"x"}"#,
        )
        .unwrap();
        assert_eq!(parsed.state_pol, "6");

        assert!(parse_notification(&json, b"{}").is_err());
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "127.0.0.1");
        headers.insert("x-forwarded-for", "10.0.0.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.0.0.7");
    }
}
