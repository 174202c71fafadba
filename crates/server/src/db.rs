use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
  SqliteConnectOptions,
  SqliteJournalMode,
  SqlitePoolOptions
};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::auth::hash_password;
use crate::config::ServerConfig;

/// Tables in child-before-parent order.
const DATA_TABLES: [&str; 8] = [
  "payments",
  "cart_items",
  "order_items",
  "orders",
  "products",
  "categories",
  "user_tokens",
  "users"
];

#[derive(Debug, Error)]

pub enum DbError {
  #[error("config path has no parent")]
  NoBaseDir,
  #[error("sqlite open {url} failed: {source}")]
  Open {
    url:    String,
    source: sqlx::Error
  },
  #[error("schema statement failed: {0}")]
  Schema(sqlx::Error),
  #[error("clearing {table} failed: {source}")]
  Reset {
    table:  &'static str,
    source: sqlx::Error
  },
  #[error("seeding {email} failed: {reason}")]
  Seed {
    email:  String,
    reason: String
  }
}

pub async fn connect_db(
  config: &ServerConfig,
  config_path: &Path
) -> Result<SqlitePool, DbError> {
  let base_dir = config_path
    .parent()
    .ok_or(DbError::NoBaseDir)?;

  let url = format!(
    "sqlite://{}",
    config.sqlite_path(base_dir).display()
  );

  let options = open_options(&url)?
    .journal_mode(SqliteJournalMode::Wal)
    .busy_timeout(Duration::from_secs(5));

  let pool = SqlitePoolOptions::new()
    .max_connections(
      config.sqlite.max_connections.max(1)
    )
    .connect_with(options)
    .await
    .map_err(|source| {
      DbError::Open {
        url: url.clone(),
        source
      }
    })?;

  tracing::info!(url = %url, "sqlite pool ready");

  Ok(pool)
}

/// Single-connection in-memory database;
/// every pooled connection would otherwise
/// see its own empty database.
pub async fn connect_memory(
) -> Result<SqlitePool, DbError> {
  let url = "sqlite::memory:";

  SqlitePoolOptions::new()
    .max_connections(1)
    .connect_with(open_options(url)?)
    .await
    .map_err(|source| {
      DbError::Open {
        url: url.to_string(),
        source
      }
    })
}

fn open_options(
  url: &str
) -> Result<SqliteConnectOptions, DbError> {
  let options =
    SqliteConnectOptions::from_str(url)
      .map_err(|source| {
        DbError::Open {
          url: url.to_string(),
          source
        }
      })?;

  Ok(
    options
      .create_if_missing(true)
      .foreign_keys(true)
  )
}

/// Empties every data table. Dev mode
/// only; tables the schema has not created
/// yet are skipped.
pub async fn reset_server_data(
  pool: &SqlitePool
) -> Result<(), DbError> {
  let mut tx = pool
    .begin()
    .await
    .map_err(DbError::Schema)?;

  for table in DATA_TABLES {
    let outcome = sqlx::query(&format!(
      "DELETE FROM {table}"
    ))
    .execute(&mut *tx)
    .await;

    match outcome {
      | Ok(done) => {
        tracing::debug!(
          table,
          rows = done.rows_affected(),
          "table cleared"
        );
      }
      | Err(e) if is_missing_table(&e) => {}
      | Err(source) => {
        return Err(DbError::Reset {
          table,
          source
        });
      }
    }
  }

  tx.commit()
    .await
    .map_err(DbError::Schema)?;

  tracing::warn!(
    "dev reset removed all orders, \
     carts and users"
  );

  Ok(())
}

fn is_missing_table(e: &sqlx::Error) -> bool {
  match e {
    | sqlx::Error::Database(db_err) => {
      db_err
        .message()
        .contains("no such table")
    }
    | _ => false
  }
}

/// Creates the seed administrator unless
/// the email is already registered.
pub async fn ensure_default_user(
  pool: &SqlitePool,
  email: &str,
  password: &str
) -> Result<(), DbError> {
  let email = email.trim().to_lowercase();

  let seed_error = |reason: String| {
    DbError::Seed {
      email: email.clone(),
      reason
    }
  };

  let password_hash =
    hash_password(password)
      .map_err(seed_error)?;

  let result = sqlx::query(
    "INSERT OR IGNORE INTO users \
     (email, password_hash, \
     first_name, last_name, phone, \
     is_staff, created_at) VALUES \
     (?1, ?2, 'Admin', 'ISPC Food', \
     '', 1, datetime('now'))"
  )
  .bind(&email)
  .bind(password_hash)
  .execute(pool)
  .await
  .map_err(|e| seed_error(e.to_string()))?;

  if result.rows_affected() > 0 {
    tracing::info!(
      email = %email,
      "default admin user created"
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::execute_schema_sqlite;

  #[tokio::test]
  async fn reset_tolerates_missing_tables() {
    let pool = connect_memory().await.unwrap();

    reset_server_data(&pool).await.unwrap();
  }

  #[tokio::test]
  async fn default_user_is_created_once() {
    let pool = connect_memory().await.unwrap();
    execute_schema_sqlite(
      &pool,
      crate::schema::SQLITE_SCHEMA
    )
    .await
    .unwrap();

    for _ in 0..2 {
      ensure_default_user(
        &pool,
        " Admin@ISPCFood.local ",
        "admin-password"
      )
      .await
      .unwrap();
    }

    let (count, staff): (i64, i64) =
      sqlx::query_as(
        "SELECT COUNT(*), MAX(is_staff) \
         FROM users WHERE email = \
         'admin@ispcfood.local'"
      )
      .fetch_one(&pool)
      .await
      .unwrap();

    assert_eq!(count, 1);
    assert_eq!(staff, 1);

    reset_server_data(&pool).await.unwrap();

    let left: i64 = sqlx::query_scalar(
      "SELECT COUNT(*) FROM users"
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(left, 0);
  }
}
