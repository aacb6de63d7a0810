//! SQLite database connection management.
//!
//! The vector index lives in a single SQLite file. Connections run in WAL
//! mode so the server can answer queries while an upload is being
//! indexed, with a busy timeout so concurrent session writers wait for the
//! lock instead of failing. The file and its parent directories are
//! created on first use.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;
use crate::migrate;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a connection pool to the configured SQLite database.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))
}

/// Connect and make sure the schema exists.
pub async fn open(config: &Config) -> Result<SqlitePool> {
    let pool = connect(config).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}
