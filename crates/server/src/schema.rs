use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use crate::db::DbError;

/// Compiled-in `res/sql/sqlite/schema.sql`, used when no copy sits next to the config.
pub const SQLITE_SCHEMA: &str = include_str!("../res/sql/sqlite/schema.sql");

pub fn schema_path(config_path: &Path) -> Option<PathBuf> {
    config_path
        .parent()
        .map(|dir| dir.join("sql").join("sqlite").join("schema.sql"))
}

pub async fn apply_server_schema(pool: &SqlitePool, config_path: &Path) -> Result<(), DbError> {
    let path = schema_path(config_path).ok_or(DbError::NoBaseDir)?;
    let script = match tokio::fs::read_to_string(&path).await {
        Ok(script) => script,
        Err(_) => {
            tracing::warn!(path = %path.display(), "schema file missing, using compiled-in schema");
            SQLITE_SCHEMA.to_string()
        }
    };
    execute_schema_sqlite(pool, &script).await
}

/// Every statement is `IF NOT EXISTS`, so re-running on a live database is a no-op.
pub async fn execute_schema_sqlite(pool: &SqlitePool, script: &str) -> Result<(), DbError> {
    sqlx::raw_sql(script)
        .execute(pool)
        .await
        .map_err(DbError::Schema)?;
    Ok(())
}
