//! Database schema migrations.
//!
//! All statements are idempotent (`IF NOT EXISTS`), so running them on
//! every start is safe.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `chunks` | audit trail of detected chunks |
//! | `records` | parsed records, one row each, grouped by `collection` |
//! | `schema_registry` | schema versions, unique per `(source_id, version)` |
//! | `schema_evolution_log` | one row per schema transition |

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database, apply migrations and close the pool.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply all migrations on an existing pool.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            content TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            source_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            data_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS schema_registry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            generated_at TEXT NOT NULL,
            schema_json TEXT NOT NULL,
            UNIQUE(source_id, version)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS schema_evolution_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            from_version INTEGER NOT NULL,
            to_version INTEGER NOT NULL,
            diff_json TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id)",
        "CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, id)",
        "CREATE INDEX IF NOT EXISTS idx_evolution_log_source ON schema_evolution_log(source_id, to_version)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Migration failed: {}", statement.trim()))?;
    }

    Ok(())
}
