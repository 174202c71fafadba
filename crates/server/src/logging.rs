use tracing_subscriber::EnvFilter;

use crate::config::{
  AppMode,
  ConfigError,
  ServerConfig
};

/// Overrides `[logging].level` when set.
pub const LOG_ENV: &str = "FOOD_LOG";

const DEFAULT_DIRECTIVES: &str =
  "info,sqlx=warn";

pub fn init_tracing(
  config: &ServerConfig
) -> Result<(), ConfigError> {
  let directives = filter_directives(
    config,
    std::env::var(LOG_ENV).ok()
  );

  let filter =
    EnvFilter::try_new(&directives)
      .map_err(|e| {
        ConfigError::Invalid(format!(
          "invalid log filter \
           {directives:?}: {e}"
        ))
      })?;

  let ansi = config
    .logging
    .ansi
    .unwrap_or(
      config.app.mode == AppMode::Dev
    );

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(ansi)
    .with_target(true)
    .init();

  tracing::debug!(
    filter = %directives,
    "tracing initialised"
  );

  Ok(())
}

fn filter_directives(
  config: &ServerConfig,
  env_override: Option<String>
) -> String {
  env_override
    .or_else(|| config.logging.level.clone())
    .map(|level| level.trim().to_string())
    .filter(|level| !level.is_empty())
    .unwrap_or_else(|| {
      DEFAULT_DIRECTIVES.to_string()
    })
}
