//! Storage abstraction for docshape.
//!
//! The [`Store`] trait defines every persistence operation the pipeline and
//! its front ends need, enabling pluggable backends (SQLite, in-memory).
//!
//! A store holds four collections:
//!
//! | Collection | Semantics |
//! |------------|-----------|
//! | chunks | audit trail of detected chunks, keyed by source |
//! | records | per-source data collection (`data_<source_id>`), append-only |
//! | schema registry | immutable schema versions, unique per `(source_id, version)` |
//! | evolution log | append-only schema transitions |
//!
//! Implementations must reject a second schema with an existing
//! `(source_id, version)` pair with [`StoreError::VersionConflict`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Chunk, EvolutionLogEntry, Record, Schema};

/// Storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The schema registry already holds this version for the source.
    #[error("schema version {version} for source '{source_id}' already exists")]
    VersionConflict { source_id: String, version: i64 },

    /// The addressed collection or source does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(err.into())
    }
}

/// One row of the source listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOverview {
    pub source_id: String,
    pub schema_version: i64,
    pub last_ingest: Option<DateTime<Utc>>,
    pub record_count: i64,
    pub chunk_count: i64,
}

/// Number of stored chunks of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkTypeCount {
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub count: i64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_chunks`](Store::save_chunks) | Append detected chunks to the audit collection |
/// | [`save_records`](Store::save_records) | Append records to `data_<source_id>` |
/// | [`current_schema`](Store::current_schema) | Highest schema version of a source |
/// | [`save_schema`](Store::save_schema) | Insert a schema version and its log entry atomically |
/// | [`schema_history`](Store::schema_history) | All versions, ascending |
/// | [`evolution_log`](Store::evolution_log) | All transitions, ascending |
/// | [`list_sources`](Store::list_sources) | Per-source overview |
/// | [`records`](Store::records) | Page through stored records |
/// | [`chunk_type_counts`](Store::chunk_type_counts) | Chunk type distribution |
/// | [`quarantine`](Store::quarantine) | Move a source's records aside |
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_chunks(
        &self,
        source_id: &str,
        run_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), StoreError>;

    async fn save_records(
        &self,
        source_id: &str,
        run_id: &str,
        records: &[Record],
    ) -> Result<(), StoreError>;

    async fn current_schema(&self, source_id: &str) -> Result<Option<Schema>, StoreError>;

    /// Insert `schema` and, for non-initial versions, its log entry.
    ///
    /// Both are written or neither is. Fails with
    /// [`StoreError::VersionConflict`] if the version already exists.
    async fn save_schema(
        &self,
        schema: &Schema,
        log_entry: Option<&EvolutionLogEntry>,
    ) -> Result<(), StoreError>;

    async fn schema_history(&self, source_id: &str) -> Result<Vec<Schema>, StoreError>;

    async fn evolution_log(&self, source_id: &str) -> Result<Vec<EvolutionLogEntry>, StoreError>;

    async fn list_sources(&self) -> Result<Vec<SourceOverview>, StoreError>;

    /// Records of `data_<source_id>` in insertion order.
    async fn records(
        &self,
        source_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Record>, StoreError>;

    async fn chunk_type_counts(&self, source_id: &str) -> Result<Vec<ChunkTypeCount>, StoreError>;

    /// Rename `data_<source_id>` to `quarantine_<source_id>_<unix_ts>`.
    ///
    /// Returns the new collection name, or [`StoreError::NotFound`] when the
    /// source has no records.
    async fn quarantine(&self, source_id: &str) -> Result<String, StoreError>;

    /// Release backend resources. The store must not be used afterwards.
    async fn close(&self) {}
}

/// Name of the collection a quarantined source's records move to.
pub fn quarantine_collection(source_id: &str, at: DateTime<Utc>) -> String {
    format!("quarantine_{}_{}", source_id, at.timestamp())
}
