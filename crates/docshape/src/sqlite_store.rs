//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the tables created by
//! [`migrate`](crate::migrate). Schemas and evolution-log entries are stored
//! as JSON documents next to the columns the queries filter on.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use docshape_core::models::{data_collection, Chunk, EvolutionLogEntry, Record, Schema};
use docshape_core::store::{
    quarantine_collection, ChunkTypeCount, SourceOverview, Store, StoreError,
};

use crate::{db, migrate};

/// SQLite implementation of the [`Store`] trait.
///
/// Wraps a [`SqlitePool`]. Open with [`SqliteStore::open`] and release with
/// [`Store::close`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and apply migrations.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::migrate(&pool)
            .await
            .context("Failed to migrate database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, StoreError> {
    serde_json::from_str(json).map_err(StoreError::backend)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(StoreError::backend)
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_chunks(
        &self,
        source_id: &str,
        run_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (source_id, run_id, chunk_type, content,
                                    start_offset, end_offset, content_hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(source_id)
            .bind(run_id)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.content)
            .bind(chunk.start as i64)
            .bind(chunk.end as i64)
            .bind(content_hash(&chunk.content))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn save_records(
        &self,
        source_id: &str,
        run_id: &str,
        records: &[Record],
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let collection = data_collection(source_id);
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for record in records {
            sqlx::query(
                "INSERT INTO records (collection, source_id, run_id, data_json, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&collection)
            .bind(source_id)
            .bind(run_id)
            .bind(to_json(record)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn current_schema(&self, source_id: &str) -> Result<Option<Schema>, StoreError> {
        let row = sqlx::query(
            "SELECT schema_json FROM schema_registry WHERE source_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.map(|r| from_json(&r.get::<String, _>("schema_json")))
            .transpose()
    }

    async fn save_schema(
        &self,
        schema: &Schema,
        log_entry: Option<&EvolutionLogEntry>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let inserted = sqlx::query(
            "INSERT INTO schema_registry (source_id, version, generated_at, schema_json) VALUES (?, ?, ?, ?)",
        )
        .bind(&schema.source_id)
        .bind(schema.version)
        .bind(schema.generated_at.to_rfc3339())
        .bind(to_json(schema)?)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(StoreError::VersionConflict {
                    source_id: schema.source_id.clone(),
                    version: schema.version,
                });
            }
            return Err(StoreError::backend(err));
        }

        if let Some(entry) = log_entry {
            sqlx::query(
                r#"
                INSERT INTO schema_evolution_log (source_id, from_version, to_version, diff_json, timestamp)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.source_id)
            .bind(entry.from_version)
            .bind(entry.to_version)
            .bind(to_json(&entry.diff)?)
            .bind(entry.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn schema_history(&self, source_id: &str) -> Result<Vec<Schema>, StoreError> {
        let rows = sqlx::query(
            "SELECT schema_json FROM schema_registry WHERE source_id = ? ORDER BY version ASC",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter()
            .map(|r| from_json(&r.get::<String, _>("schema_json")))
            .collect()
    }

    async fn evolution_log(&self, source_id: &str) -> Result<Vec<EvolutionLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, from_version, to_version, diff_json, timestamp
            FROM schema_evolution_log
            WHERE source_id = ?
            ORDER BY to_version ASC
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                Ok(EvolutionLogEntry {
                    source_id: row.get("source_id"),
                    from_version: row.get("from_version"),
                    to_version: row.get("to_version"),
                    diff: from_json(&row.get::<String, _>("diff_json"))?,
                    timestamp: parse_timestamp(&timestamp)?,
                })
            })
            .collect()
    }

    async fn list_sources(&self) -> Result<Vec<SourceOverview>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.source_id, s.version, s.generated_at,
                   (SELECT COUNT(*) FROM records r WHERE r.collection = 'data_' || s.source_id) AS record_count,
                   (SELECT COUNT(*) FROM chunks c WHERE c.source_id = s.source_id) AS chunk_count
            FROM schema_registry s
            WHERE s.version = (SELECT MAX(version) FROM schema_registry WHERE source_id = s.source_id)
            ORDER BY s.source_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter()
            .map(|row| {
                let generated_at: String = row.get("generated_at");
                Ok(SourceOverview {
                    source_id: row.get("source_id"),
                    schema_version: row.get("version"),
                    last_ingest: Some(parse_timestamp(&generated_at)?),
                    record_count: row.get("record_count"),
                    chunk_count: row.get("chunk_count"),
                })
            })
            .collect()
    }

    async fn records(
        &self,
        source_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(
            "SELECT data_json FROM records WHERE collection = ? ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(data_collection(source_id))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter()
            .map(|r| from_json(&r.get::<String, _>("data_json")))
            .collect()
    }

    async fn chunk_type_counts(&self, source_id: &str) -> Result<Vec<ChunkTypeCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_type, COUNT(*) AS count
            FROM chunks
            WHERE source_id = ?
            GROUP BY chunk_type
            ORDER BY chunk_type
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(rows
            .iter()
            .map(|row| ChunkTypeCount {
                chunk_type: row.get("chunk_type"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn quarantine(&self, source_id: &str) -> Result<String, StoreError> {
        let collection = data_collection(source_id);
        let target = quarantine_collection(source_id, Utc::now());

        let result = sqlx::query("UPDATE records SET collection = ? WHERE collection = ?")
            .bind(&target)
            .bind(&collection)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("collection {}", collection)));
        }
        Ok(target)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(StoreError::backend)
}
