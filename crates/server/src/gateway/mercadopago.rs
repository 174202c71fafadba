//! Reqwest-backed MercadoPago client: preference creation and payment lookup.
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use super::{
    is_valid_payment_id, json_id, GatewayError, MercadoPagoGateway, PaymentInfo, Preference,
    PreferenceRequest,
};
use crate::config::MercadoPagoConfig;

pub struct ReqwestMercadoPago {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct PreferenceFields {
    id: String,
    init_point: String,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

impl ReqwestMercadoPago {
    pub fn new(config: &MercadoPagoConfig, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_idle_timeout(std::time::Duration::from_secs(120))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn token(&self) -> Result<&str, GatewayError> {
        let token = self.access_token.trim();
        if token.is_empty() {
            return Err(GatewayError::NotConfigured("mercadopago access token"));
        }
        Ok(token)
    }

    async fn read_json(
        resp: reqwest::Response,
        expected: &[StatusCode],
    ) -> Result<serde_json::Value, GatewayError> {
        let status = resp.status();
        if !expected.contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MercadoPagoGateway for ReqwestMercadoPago {
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<Preference, GatewayError> {
        let url = format!("{}/checkout/preferences", self.base_url);
        debug!(url, external_reference = %request.external_reference, "creating preference");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.token()?)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(url, error = %e, "preference request failed");
                GatewayError::Transport(e)
            })?;

        let raw = Self::read_json(resp, &[StatusCode::CREATED, StatusCode::OK]).await?;
        let fields: PreferenceFields = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Decode(format!("preference: {e}")))?;

        Ok(Preference {
            id: fields.id,
            init_point: fields.init_point,
            sandbox_init_point: fields.sandbox_init_point,
            raw,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentInfo, GatewayError> {
        if !is_valid_payment_id(payment_id) {
            return Err(GatewayError::InvalidId(payment_id.to_string()));
        }
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        debug!(url, "payment lookup");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| {
                warn!(url, error = %e, "payment lookup failed");
                GatewayError::Transport(e)
            })?;

        let raw = Self::read_json(resp, &[StatusCode::OK]).await?;
        parse_payment(raw)
    }
}

fn parse_payment(raw: serde_json::Value) -> Result<PaymentInfo, GatewayError> {
    let id = json_id(&raw["id"]).ok_or_else(|| GatewayError::Decode("payment id missing".into()))?;
    let status = raw["status"]
        .as_str()
        .ok_or_else(|| GatewayError::Decode("payment status missing".into()))?
        .to_string();

    Ok(PaymentInfo {
        id,
        status,
        status_detail: raw["status_detail"].as_str().map(str::to_string),
        external_reference: json_id(&raw["external_reference"]),
        transaction_amount: raw["transaction_amount"].as_f64(),
        raw,
    })
}

type HmacSha256 = Hmac<Sha256>;

/// Checks an `x-signature` header (`ts=<ts>,v1=<hex>`) against the manifest
/// `id:<data_id>;request-id:<request_id>;ts:<ts>;` signed with the webhook secret.
pub fn verify_webhook_signature(
    secret: &str,
    signature_header: &str,
    request_id: &str,
    data_id: &str,
) -> bool {
    let mut ts = None;
    let mut v1 = None;
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.trim()),
            Some(("v1", value)) => v1 = Some(value.trim()),
            _ => {}
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else {
        return false;
    };
    let Ok(expected) = hex::decode(v1) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    // Alphanumeric ids are signed lowercased.
    let data_id = data_id.to_ascii_lowercase();
    mac.update(format!("id:{data_id};request-id:{request_id};ts:{ts};").as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
pub(crate) fn sign_webhook(secret: &str, request_id: &str, data_id: &str, ts: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(format!("id:{data_id};request-id:{request_id};ts:{ts};").as_bytes());
    format!("ts={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
}
