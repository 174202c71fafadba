use std::path::{
  Path,
  PathBuf
};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]

pub enum ConfigError {
  #[error("config IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("config parse error: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("config invalid: {0}")]
  Invalid(String),
  #[error(
    "schema validation failed for {name}: \
     {}",
    problems.join("; ")
  )]
  Schema {
    name:     String,
    problems: Vec<String>
  },
  #[error(transparent)]
  Db(#[from] crate::db::DbError)
}

/// Compiled-in `res/schemas/server.schema.json`.
pub const CONFIG_SCHEMA: &str =
  include_str!(
    "../res/schemas/server.schema.json"
  );

const MAX_REPORTED_PROBLEMS: usize = 5;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]

pub enum AppMode {
  Dev,
  Prod
}

#[derive(Debug, Deserialize)]

pub struct ServerConfig {
  pub app:         AppConfig,
  pub http:        HttpConfig,
  pub sqlite:      SqliteConfig,
  pub logging:     LoggingConfig,
  pub auth:        AuthConfig,
  pub dev:         DevConfig,
  pub seed:        Option<SeedConfig>,
  pub mercadopago: MercadoPagoConfig,
  pub payu:        PayuConfig
}

#[derive(Debug, Deserialize)]

pub struct AppConfig {
  pub mode:     AppMode,
  pub timezone: Option<String>
}

#[derive(Debug, Deserialize)]

pub struct HttpConfig {
  pub host: String,
  pub port: u16
}

#[derive(Debug, Deserialize)]

pub struct SqliteConfig {
  pub path:            String,
  #[serde(default = "default_max_connections")]
  pub max_connections: u32
}

fn default_max_connections() -> u32 {
  8
}

#[derive(Debug, Deserialize)]

pub struct LoggingConfig {
  pub level: Option<String>,
  /// Colour codes in the fmt output.
  /// Defaults to on in dev mode only.
  pub ansi:  Option<bool>
}

#[derive(Debug, Clone, Deserialize)]

pub struct AuthConfig {
  #[serde(default)]
  pub jwt_secret:          String,
  pub access_ttl_seconds:  u64,
  pub refresh_ttl_seconds: u64
}

#[derive(Debug, Deserialize)]

pub struct DevConfig {
  pub reset_on_start: bool
}

#[derive(Debug, Deserialize)]

pub struct SeedConfig {
  pub email:    String,
  pub password: String
}

/// Checkout-redirect gateway. Credentials
/// are usually injected through the
/// environment rather than the file.
#[derive(Debug, Clone, Deserialize)]

pub struct MercadoPagoConfig {
  pub base_url:         String,
  #[serde(default)]
  pub access_token:     String,
  #[serde(default)]
  pub public_key:       String,
  pub webhook_secret:   Option<String>,
  pub notification_url: Option<String>,
  pub success_url:      String,
  pub failure_url:      String,
  pub pending_url:      String,
  pub currency_id:      String
}

/// Direct card-processing gateway.
#[derive(Debug, Clone, Deserialize)]

pub struct PayuConfig {
  pub base_url:    String,
  #[serde(default)]
  pub api_key:     String,
  #[serde(default)]
  pub api_login:   String,
  pub merchant_id: String,
  pub account_id:  String,
  pub currency:    String,
  pub country:     String,
  pub test:        bool,
  pub notify_url:  Option<String>
}

impl ServerConfig {
  pub async fn load(
    path: &Path
  ) -> Result<Self, ConfigError> {
    let base_dir = path
      .parent()
      .ok_or_else(|| {
        ConfigError::Invalid(
          "config path has no parent"
            .into()
        )
      })?;

    let schema = load_schema(
      &base_dir
        .join("schemas")
        .join("server.schema.json")
    )
    .await;

    let content =
      tokio::fs::read_to_string(path)
        .await?;

    validate_toml(
      &schema,
      &content,
      &path.display().to_string()
    )?;

    let mut config: ServerConfig =
      toml::from_str(&content)?;

    config.apply_env_overrides(|key| {
      std::env::var(key).ok()
    });

    config.validate()?;

    Ok(config)
  }

  /// Secrets from the environment win
  /// over whatever the file carries.
  pub fn apply_env_overrides<F>(
    &mut self,
    lookup: F
  ) where
    F: Fn(&str) -> Option<String>
  {
    let non_empty = |key: &str| {
      lookup(key).filter(|v| {
        !v.trim().is_empty()
      })
    };

    if let Some(v) =
      non_empty("FOOD_JWT_SECRET")
    {
      self.auth.jwt_secret = v;
    }

    if let Some(v) = non_empty(
      "MERCADOPAGO_ACCESS_TOKEN"
    ) {
      self.mercadopago.access_token = v;
    }

    if let Some(v) =
      non_empty("MERCADOPAGO_PUBLIC_KEY")
    {
      self.mercadopago.public_key = v;
    }

    if let Some(v) = non_empty(
      "MERCADOPAGO_WEBHOOK_SECRET"
    ) {
      self.mercadopago.webhook_secret =
        Some(v);
    }

    if let Some(v) =
      non_empty("PAYU_API_KEY")
    {
      self.payu.api_key = v;
    }

    if let Some(v) =
      non_empty("PAYU_API_LOGIN")
    {
      self.payu.api_login = v;
    }
  }

  pub fn validate(
    &self
  ) -> Result<(), ConfigError> {
    if self.auth.jwt_secret.trim().len()
      < 16
    {
      return Err(ConfigError::Invalid(
        "auth.jwt_secret must be at \
         least 16 characters (set \
         FOOD_JWT_SECRET)"
          .into()
      ));
    }

    if self.auth.access_ttl_seconds == 0
      || self.auth.refresh_ttl_seconds
        == 0
    {
      return Err(ConfigError::Invalid(
        "auth token ttl must be positive"
          .into()
      ));
    }

    if self.app.mode == AppMode::Prod {
      if self
        .mercadopago
        .access_token
        .trim()
        .is_empty()
      {
        tracing::warn!(
          "mercadopago access token \
           missing; checkout will fail"
        );
      }

      if self.payu.api_key.trim().is_empty()
      {
        tracing::warn!(
          "payu api key missing; card \
           payments will fail"
        );
      }
    }

    Ok(())
  }

  pub fn sqlite_path(
    &self,
    base_dir: &Path
  ) -> PathBuf {
    let raw = self.sqlite.path.trim();

    if raw.is_empty() {
      return base_dir
        .join("food.sqlite");
    }

    base_dir.join(raw)
  }
}

/// The schema shipped next to the config
/// wins; otherwise the compiled-in copy.
async fn load_schema(path: &Path) -> String {
  match tokio::fs::read_to_string(path)
    .await
  {
    | Ok(schema) => schema,
    | Err(_) => {
      tracing::debug!(
        path = %path.display(),
        "using compiled-in config schema"
      );
      CONFIG_SCHEMA.to_string()
    }
  }
}

pub fn validate_toml(
  schema: &str,
  toml_input: &str,
  name: &str
) -> Result<(), ConfigError> {
  let schema: serde_json::Value =
    serde_json::from_str(schema)
      .map_err(|e| {
        ConfigError::Invalid(format!(
          "config schema is not JSON: {e}"
        ))
      })?;

  let validator =
    jsonschema::validator_for(&schema)
      .map_err(|e| {
        ConfigError::Invalid(format!(
          "config schema rejected: {e}"
        ))
      })?;

  let document: serde_json::Value =
    toml::from_str::<toml::Value>(
      toml_input
    )
    .map_err(ConfigError::Parse)
    .and_then(|value| {
      serde_json::to_value(value).map_err(
        |e| {
          ConfigError::Invalid(format!(
            "{name}: {e}"
          ))
        }
      )
    })?;

  let problems: Vec<String> = validator
    .iter_errors(&document)
    .take(MAX_REPORTED_PROBLEMS)
    .map(|err| {
      let at = err.instance_path.to_string();

      if at.is_empty() {
        err.to_string()
      } else {
        format!("{at}: {err}")
      }
    })
    .collect();

  if problems.is_empty() {
    return Ok(());
  }

  Err(ConfigError::Schema {
    name: name.to_string(),
    problems
  })
}
