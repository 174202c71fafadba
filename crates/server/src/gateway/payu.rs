//! Reqwest-backed PayU Latam client for direct card transactions, plus the
//! MD5 signatures PayU uses on requests and confirmation callbacks.
use md5::{Digest, Md5};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    cents_to_units, json_id, GatewayError, PayuGateway, PayuTransaction, PayuTransactionResult,
};
use crate::config::PayuConfig;

pub struct ReqwestPayu {
    client: reqwest::Client,
    config: PayuConfig,
}

impl ReqwestPayu {
    pub fn new(config: &PayuConfig, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_idle_timeout(std::time::Duration::from_secs(120))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn payload(&self, tx: &PayuTransaction) -> serde_json::Value {
        let cfg = &self.config;
        let signature = transaction_signature(
            &cfg.api_key,
            &cfg.merchant_id,
            &tx.reference,
            tx.amount_cents,
            &cfg.currency,
        );
        let person = json!({
            "fullName": tx.buyer.full_name,
            "emailAddress": tx.buyer.email,
            "dniNumber": tx.buyer.dni_number,
        });

        let mut order = json!({
            "accountId": cfg.account_id,
            "referenceCode": tx.reference,
            "description": tx.description,
            "language": "es",
            "signature": signature,
            "additionalValues": {
                "TX_VALUE": {
                    "value": cents_to_units(tx.amount_cents),
                    "currency": cfg.currency,
                }
            },
            "buyer": person.clone(),
        });
        if let Some(url) = &cfg.notify_url {
            order["notifyUrl"] = json!(url);
        }

        json!({
            "language": "es",
            "command": "SUBMIT_TRANSACTION",
            "merchant": {
                "apiKey": cfg.api_key,
                "apiLogin": cfg.api_login,
            },
            "transaction": {
                "order": order,
                "payer": person,
                "creditCard": {
                    "number": tx.card.number,
                    "securityCode": tx.card.security_code,
                    "expirationDate": tx.card.expiration_date,
                    "name": tx.card.holder_name,
                },
                "extraParameters": {
                    "INSTALLMENTS_NUMBER": tx.installments,
                },
                "type": "AUTHORIZATION_AND_CAPTURE",
                "paymentMethod": tx.payment_method,
                "paymentCountry": cfg.country,
                "deviceSessionId": tx.device_session_id,
                "ipAddress": tx.ip_address,
                "userAgent": tx.user_agent,
            },
            "test": cfg.test,
        })
    }
}

#[async_trait::async_trait]
impl PayuGateway for ReqwestPayu {
    async fn submit_transaction(
        &self,
        transaction: &PayuTransaction,
    ) -> Result<PayuTransactionResult, GatewayError> {
        if self.config.api_key.trim().is_empty() || self.config.api_login.trim().is_empty() {
            return Err(GatewayError::NotConfigured("payu api credentials"));
        }

        let url = self.config.base_url.as_str();
        debug!(url, reference = %transaction.reference, "submitting payu transaction");
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&self.payload(transaction))
            .send()
            .await
            .map_err(|e| {
                warn!(url, error = %e, "payu request failed");
                GatewayError::Transport(e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(parse_transaction_result(raw))
    }
}

fn parse_transaction_result(raw: serde_json::Value) -> PayuTransactionResult {
    let tx = &raw["transactionResponse"];
    let text = |v: &serde_json::Value| v.as_str().map(str::to_string);
    PayuTransactionResult {
        code: raw["code"].as_str().unwrap_or("ERROR").to_string(),
        error: text(&raw["error"]),
        state: text(&tx["state"]),
        response_code: text(&tx["responseCode"]),
        response_message: text(&tx["responseMessage"])
            .or_else(|| text(&tx["paymentNetworkResponseErrorMessage"])),
        transaction_id: json_id(&tx["transactionId"]),
        order_id: json_id(&tx["orderId"]),
        raw,
    }
}

/// `1234` cents -> `"12.34"`.
pub fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

pub fn transaction_signature(
    api_key: &str,
    merchant_id: &str,
    reference: &str,
    amount_cents: i64,
    currency: &str,
) -> String {
    md5_hex(&format!(
        "{api_key}~{merchant_id}~{reference}~{}~{currency}",
        format_amount(amount_cents)
    ))
}

/// Confirmation values are signed with one decimal when the second decimal
/// is zero (`150.00` -> `150.0`), otherwise with two.
pub fn format_confirmation_value(value: &str) -> Option<String> {
    let parsed: f64 = value.trim().parse().ok()?;
    let cents = (parsed * 100.0).round() as i64;
    if cents % 10 == 0 {
        Some(format!("{:.1}", cents as f64 / 100.0))
    } else {
        Some(format!("{:.2}", cents as f64 / 100.0))
    }
}

pub fn confirmation_signature(
    api_key: &str,
    merchant_id: &str,
    reference_sale: &str,
    value: &str,
    currency: &str,
    state_pol: &str,
) -> Option<String> {
    let value = format_confirmation_value(value)?;
    Some(md5_hex(&format!(
        "{api_key}~{merchant_id}~{reference_sale}~{value}~{currency}~{state_pol}"
    )))
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
