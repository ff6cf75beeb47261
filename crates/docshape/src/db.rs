//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database with WAL mode
//! enabled. The database file and its parent directories are created
//! automatically if they don't exist.
//!
//! WAL allows concurrent readers alongside a single writer, so the HTTP
//! server can answer schema and record queries while an ingest is running.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.db.path).await
}

/// Create a connection pool to the SQLite database at `db_path`.
///
/// Returns a pool with up to 5 connections.
pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    Ok(pool)
}
