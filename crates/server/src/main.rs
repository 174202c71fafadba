use std::net::SocketAddr;
use std::path::PathBuf;

use food_server::app_state::AppState;
use food_server::config::{AppMode, ConfigError, ServerConfig};
use food_server::{db, handlers, logging, schema};
use tokio::net::TcpListener;

const DEFAULT_CONFIG: &str = "crates/server/res/config.toml";

#[tokio::main]
async fn main() -> Result<(), ConfigError> {
    let config_path = std::env::var_os("SERVER_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = ServerConfig::load(&config_path).await?;
    logging::init_tracing(&config)?;
    tracing::info!(
        mode = ?config.app.mode,
        timezone = config.app.timezone.as_deref().unwrap_or("UTC"),
        config = %config_path.display(),
        "starting food server"
    );

    let pool = db::connect_db(&config, &config_path).await?;
    schema::apply_server_schema(&pool, &config_path).await?;

    if config.app.mode == AppMode::Dev && config.dev.reset_on_start {
        db::reset_server_data(&pool).await?;
    }
    if let Some(seed) = &config.seed {
        db::ensure_default_user(&pool, &seed.email, &seed.password).await?;
    }

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("http bind address: {e}")))?;

    let app = handlers::router(AppState::from_config(&config, pool.clone())?);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested, draining connections");
}
