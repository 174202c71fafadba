use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::{
  AuthConfig,
  ConfigError,
  MercadoPagoConfig,
  PayuConfig,
  ServerConfig
};
use crate::gateway::{
  MercadoPagoGateway,
  PayuGateway,
  ReqwestMercadoPago,
  ReqwestPayu
};

#[derive(Clone)]
pub struct AppState {
  pub pool:               SqlitePool,
  pub auth:               Arc<AuthConfig>,
  pub mercadopago:        Arc<dyn MercadoPagoGateway>,
  pub mercadopago_config: Arc<MercadoPagoConfig>,
  pub payu:               Arc<dyn PayuGateway>,
  pub payu_config:        Arc<PayuConfig>
}

pub const USER_AGENT: &str =
  "ispc-food-server/0.1";

impl AppState {
  /// Wires the reqwest-backed gateway
  /// adapters from configuration.
  pub fn from_config(
    config: &ServerConfig,
    pool: SqlitePool
  ) -> Result<Self, ConfigError> {
    let mercadopago =
      ReqwestMercadoPago::new(
        &config.mercadopago,
        USER_AGENT
      )
      .map_err(|e| {
        ConfigError::Invalid(format!(
          "mercadopago client: {e}"
        ))
      })?;

    let payu = ReqwestPayu::new(
      &config.payu,
      USER_AGENT
    )
    .map_err(|e| {
      ConfigError::Invalid(format!(
        "payu client: {e}"
      ))
    })?;

    Ok(Self {
      pool,
      auth: Arc::new(config.auth.clone()),
      mercadopago: Arc::new(mercadopago),
      mercadopago_config: Arc::new(
        config.mercadopago.clone()
      ),
      payu: Arc::new(payu),
      payu_config: Arc::new(
        config.payu.clone()
      )
    })
  }
}
