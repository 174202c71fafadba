use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  bail
};
use clap::{
  Parser,
  Subcommand
};
use food_server::auth::hash_password;
use food_server::config::ServerConfig;
use food_server::errors::ServerError;
use food_server::validation::{
  check_image_url,
  check_password,
  check_phone,
  is_valid_image_url,
  normalize_email
};
use food_server::{
  db,
  schema
};
use sqlx::SqlitePool;

#[derive(Parser)]
#[command(
  author,
  version,
  about = "ISPC food ops CLI"
)]

struct Args {
  /// Path to config.toml (defaults to
  /// SERVER_CONFIG_PATH or
  /// crates/server/res/config.toml).
  #[arg(long, global = true)]
  config:  Option<PathBuf>,
  #[command(subcommand)]
  command: Command
}

#[derive(Subcommand)]

enum Command {
  /// Validate the server config (schema
  /// + semantic checks).
  Validate {
    config_path: Option<PathBuf>
  },
  /// Create a user, or replace one with
  /// the same email.
  CreateUser {
    #[arg(long)]
    email:      String,
    #[arg(long)]
    password:   String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name:  String,
    #[arg(long)]
    phone:      String,
    #[arg(long)]
    image_url:  Option<String>,
    #[arg(long)]
    staff:      bool,
    /// Delete an existing user with this
    /// email first.
    #[arg(long)]
    replace:    bool
  },
  /// Report users whose profile image URL
  /// is malformed.
  Images {
    /// Clear the malformed URLs.
    #[arg(long)]
    fix: bool
  }
}

#[tokio::main]

async fn main() -> anyhow::Result<()> {
  let args = Args::parse();

  match args.command {
    | Command::Validate {
      config_path
    } => {
      let cfg_path = pick_config_path(
        config_path.or(args.config)
      );

      ServerConfig::load(&cfg_path)
        .await
        .with_context(|| {
          format!(
            "config {}",
            cfg_path.display()
          )
        })?;

      println!(
        "ok: config validated at {}",
        cfg_path.display()
      );
    }
    | Command::CreateUser {
      email,
      password,
      first_name,
      last_name,
      phone,
      image_url,
      staff,
      replace
    } => {
      let email = normalize_email(&email)
        .map_err(invalid)?;

      check_password(&password)
        .map_err(invalid)?;

      check_phone(&phone)
        .map_err(invalid)?;

      if let Some(url) = &image_url {
        check_image_url(url)
          .map_err(invalid)?;
      }

      let pool =
        open_pool(args.config).await?;

      let existing =
        sqlx::query_scalar::<_, i64>(
          "SELECT id FROM users WHERE \
           email = ?1"
        )
        .bind(&email)
        .fetch_optional(&pool)
        .await?;

      if let Some(id) = existing {
        if !replace {
          bail!(
            "user {email} already exists \
             (use --replace)"
          );
        }

        sqlx::query(
          "DELETE FROM users WHERE id = ?1"
        )
        .bind(id)
        .execute(&pool)
        .await?;

        println!(
          "removed existing user {email}"
        );
      }

      let password_hash =
        hash_password(&password)
          .map_err(anyhow::Error::msg)?;

      let user_id =
        sqlx::query_scalar::<_, i64>(
          "INSERT INTO users (email, \
           password_hash, first_name, \
           last_name, phone, \
           profile_image_url, is_staff, \
           created_at) VALUES (?1, ?2, \
           ?3, ?4, ?5, ?6, ?7, \
           datetime('now')) RETURNING id"
        )
        .bind(&email)
        .bind(password_hash)
        .bind(first_name.trim())
        .bind(last_name.trim())
        .bind(phone.trim())
        .bind(image_url.as_deref())
        .bind(staff)
        .fetch_one(&pool)
        .await?;

      println!(
        "ok: created user {email} (id \
         {user_id}, staff {staff})"
      );
    }
    | Command::Images {
      fix
    } => {
      let pool =
        open_pool(args.config).await?;

      let rows = sqlx::query_as::<
        _,
        (i64, String, String)
      >(
        "SELECT id, email, \
         profile_image_url FROM users \
         WHERE profile_image_url IS NOT \
         NULL AND profile_image_url <> '' \
         ORDER BY id"
      )
      .fetch_all(&pool)
      .await?;

      let broken: Vec<_> = rows
        .into_iter()
        .filter(|(_, _, url)| {
          !is_valid_image_url(url)
        })
        .collect();

      for (id, email, url) in &broken {
        println!("{id}\t{email}\t{url}");
      }

      if fix && !broken.is_empty() {
        for (id, ..) in &broken {
          sqlx::query(
            "UPDATE users SET \
             profile_image_url = NULL \
             WHERE id = ?1"
          )
          .bind(*id)
          .execute(&pool)
          .await?;
        }

        println!(
          "ok: cleared {} image urls",
          broken.len()
        );
      } else {
        println!(
          "ok: {} malformed image urls",
          broken.len()
        );
      }
    }
  }

  Ok(())
}

async fn open_pool(
  config_path: Option<PathBuf>
) -> anyhow::Result<SqlitePool> {
  let cfg_path =
    pick_config_path(config_path);

  let config =
    ServerConfig::load(&cfg_path).await?;

  let pool =
    db::connect_db(&config, &cfg_path)
      .await?;

  schema::apply_server_schema(
    &pool, &cfg_path
  )
  .await?;

  Ok(pool)
}

fn invalid(
  err: ServerError
) -> anyhow::Error {
  anyhow::anyhow!(
    "{}",
    err.message()
  )
}

fn pick_config_path(
  config_path: Option<PathBuf>
) -> PathBuf {
  if let Some(path) = config_path {
    return path;
  }

  if let Ok(path) =
    std::env::var("SERVER_CONFIG_PATH")
  {
    return PathBuf::from(path);
  }

  Path::new("crates")
    .join("server")
    .join("res")
    .join("config.toml")
}
