//! Payment gateway ports. Handlers only see these traits; the reqwest-backed
//! adapters live in the submodules and tests plug in fakes.

mod mercadopago;
mod payu;

pub use mercadopago::{
  ReqwestMercadoPago,
  verify_webhook_signature
};
pub use payu::{
  ReqwestPayu,
  confirmation_signature,
  format_confirmation_value,
  format_amount,
  transaction_signature
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]

pub enum GatewayError {
  #[error("gateway transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error(
    "gateway returned status {status}: \
     {body}"
  )]
  Status {
    status: u16,
    body:   String
  },
  #[error("gateway response invalid: {0}")]
  Decode(String),
  #[error("gateway not configured: {0}")]
  NotConfigured(&'static str),
  #[error("malformed gateway id: {0:?}")]
  InvalidId(String)
}

#[derive(Debug, Clone, Serialize)]

pub struct PreferenceItem {
  pub title:       String,
  pub quantity:    i64,
  pub unit_price:  f64,
  pub currency_id: String
}

#[derive(Debug, Clone, Serialize)]

pub struct BackUrls {
  pub success: String,
  pub failure: String,
  pub pending: String
}

#[derive(Debug, Clone, Serialize)]

pub struct PreferenceRequest {
  pub items:              Vec<PreferenceItem>,
  pub back_urls:          BackUrls,
  pub auto_return:        String,
  pub external_reference: String,
  #[serde(
    skip_serializing_if = "Option::is_none"
  )]
  pub notification_url:   Option<String>
}

#[derive(Debug, Clone)]

pub struct Preference {
  pub id:                 String,
  pub init_point:         String,
  pub sandbox_init_point: Option<String>,
  pub raw:                serde_json::Value
}

/// A payment as reported by the checkout
/// gateway's lookup endpoint.
#[derive(Debug, Clone)]

pub struct PaymentInfo {
  pub id:                 String,
  pub status:             String,
  pub status_detail:      Option<String>,
  pub external_reference: Option<String>,
  pub transaction_amount: Option<f64>,
  pub raw:                serde_json::Value
}

#[derive(Debug, Clone)]

pub struct CardDetails {
  pub number:          String,
  pub security_code:   String,
  pub expiration_date: String,
  pub holder_name:     String
}

#[derive(Debug, Clone)]

pub struct Buyer {
  pub full_name:  String,
  pub email:      String,
  pub dni_number: String
}

#[derive(Debug, Clone)]

pub struct PayuTransaction {
  pub reference:         String,
  pub description:       String,
  pub amount_cents:      i64,
  pub buyer:             Buyer,
  pub card:              CardDetails,
  pub payment_method:    String,
  pub installments:      u32,
  pub device_session_id: String,
  pub ip_address:        String,
  pub user_agent:        String
}

#[derive(Debug, Clone)]

pub struct PayuTransactionResult {
  pub code:             String,
  pub error:            Option<String>,
  pub state:            Option<String>,
  pub response_code:    Option<String>,
  pub response_message: Option<String>,
  pub transaction_id:   Option<String>,
  pub order_id:         Option<String>,
  pub raw:              serde_json::Value
}

#[async_trait::async_trait]
pub trait MercadoPagoGateway:
  Send + Sync
{
  async fn create_preference(
    &self,
    request: &PreferenceRequest
  ) -> Result<Preference, GatewayError>;

  async fn get_payment(
    &self,
    payment_id: &str
  ) -> Result<PaymentInfo, GatewayError>;
}

#[async_trait::async_trait]
pub trait PayuGateway: Send + Sync {
  async fn submit_transaction(
    &self,
    transaction: &PayuTransaction
  ) -> Result<
    PayuTransactionResult,
    GatewayError
  >;
}

pub fn cents_to_units(cents: i64) -> f64 {
  cents as f64 / 100.0
}

pub fn units_to_cents(units: f64) -> i64 {
  (units * 100.0).round() as i64
}

const MAX_PAYMENT_ID_LEN: usize = 64;

/// Payment ids travel inside a URL path,
/// so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_payment_id(
  id: &str
) -> bool {
  !id.is_empty()
    && id.len() <= MAX_PAYMENT_ID_LEN
    && id.bytes().all(|b| {
      b.is_ascii_alphanumeric()
        || b == b'_'
        || b == b'-'
    })
}

/// Ids come back as JSON numbers from one
/// endpoint and strings from another.
pub(crate) fn json_id(
  value: &serde_json::Value
) -> Option<String> {
  match value {
    | serde_json::Value::String(s)
      if !s.is_empty() =>
    {
      Some(s.clone())
    }
    | serde_json::Value::Number(n) => {
      Some(n.to_string())
    }
    | _ => None
  }
}
