//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. The schema
//! registry enforces `(source_id, version)` uniqueness under the write
//! lock, matching the unique index of the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{data_collection, Chunk, EvolutionLogEntry, Record, Schema};

use super::{quarantine_collection, ChunkTypeCount, SourceOverview, Store, StoreError};

struct StoredChunk {
    source_id: String,
    chunk: Chunk,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
    /// Collection name → records in insertion order.
    collections: RwLock<HashMap<String, Vec<Record>>>,
    schemas: RwLock<Vec<Schema>>,
    log: RwLock<Vec<EvolutionLogEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all record collections, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::backend(anyhow::anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_chunks(
        &self,
        source_id: &str,
        _run_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), StoreError> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        stored.extend(chunks.iter().map(|c| StoredChunk {
            source_id: source_id.to_string(),
            chunk: c.clone(),
        }));
        Ok(())
    }

    async fn save_records(
        &self,
        source_id: &str,
        _run_id: &str,
        records: &[Record],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut collections = self.collections.write().map_err(poisoned)?;
        collections
            .entry(data_collection(source_id))
            .or_default()
            .extend(records.iter().cloned());
        Ok(())
    }

    async fn current_schema(&self, source_id: &str) -> Result<Option<Schema>, StoreError> {
        let schemas = self.schemas.read().map_err(poisoned)?;
        Ok(schemas
            .iter()
            .filter(|s| s.source_id == source_id)
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn save_schema(
        &self,
        schema: &Schema,
        log_entry: Option<&EvolutionLogEntry>,
    ) -> Result<(), StoreError> {
        let mut schemas = self.schemas.write().map_err(poisoned)?;
        if schemas
            .iter()
            .any(|s| s.source_id == schema.source_id && s.version == schema.version)
        {
            return Err(StoreError::VersionConflict {
                source_id: schema.source_id.clone(),
                version: schema.version,
            });
        }
        // Hold the schema lock while appending the log entry so both land together.
        if let Some(entry) = log_entry {
            self.log.write().map_err(poisoned)?.push(entry.clone());
        }
        schemas.push(schema.clone());
        Ok(())
    }

    async fn schema_history(&self, source_id: &str) -> Result<Vec<Schema>, StoreError> {
        let schemas = self.schemas.read().map_err(poisoned)?;
        let mut history: Vec<Schema> = schemas
            .iter()
            .filter(|s| s.source_id == source_id)
            .cloned()
            .collect();
        history.sort_by_key(|s| s.version);
        Ok(history)
    }

    async fn evolution_log(&self, source_id: &str) -> Result<Vec<EvolutionLogEntry>, StoreError> {
        let log = self.log.read().map_err(poisoned)?;
        let mut entries: Vec<EvolutionLogEntry> = log
            .iter()
            .filter(|e| e.source_id == source_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.to_version);
        Ok(entries)
    }

    async fn list_sources(&self) -> Result<Vec<SourceOverview>, StoreError> {
        let schemas = self.schemas.read().map_err(poisoned)?;
        let collections = self.collections.read().map_err(poisoned)?;
        let chunks = self.chunks.read().map_err(poisoned)?;

        let mut latest: BTreeMap<&str, &Schema> = BTreeMap::new();
        for schema in schemas.iter() {
            let entry = latest.entry(schema.source_id.as_str()).or_insert(schema);
            if schema.version > entry.version {
                *entry = schema;
            }
        }

        Ok(latest
            .into_iter()
            .map(|(source_id, schema)| SourceOverview {
                source_id: source_id.to_string(),
                schema_version: schema.version,
                last_ingest: Some(schema.generated_at),
                record_count: collections
                    .get(&data_collection(source_id))
                    .map_or(0, |r| r.len() as i64),
                chunk_count: chunks.iter().filter(|c| c.source_id == source_id).count() as i64,
            })
            .collect())
    }

    async fn records(
        &self,
        source_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Record>, StoreError> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(&data_collection(source_id))
            .map(|records| {
                records
                    .iter()
                    .skip(offset.max(0) as usize)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn chunk_type_counts(&self, source_id: &str) -> Result<Vec<ChunkTypeCount>, StoreError> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for stored in chunks.iter().filter(|c| c.source_id == source_id) {
            *counts.entry(stored.chunk.chunk_type.to_string()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(chunk_type, count)| ChunkTypeCount { chunk_type, count })
            .collect())
    }

    async fn quarantine(&self, source_id: &str) -> Result<String, StoreError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let name = data_collection(source_id);
        let records = collections
            .remove(&name)
            .ok_or_else(|| StoreError::NotFound(format!("collection {}", name)))?;
        let target = quarantine_collection(source_id, Utc::now());
        collections.insert(target.clone(), records);
        Ok(target)
    }
}
