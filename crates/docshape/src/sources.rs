//! Source listing, summaries, record browsing and quarantine.
//!
//! The query functions ([`build_summary`], [`records_page`]) are shared by
//! the CLI commands in this module and the HTTP server.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use docshape_core::models::{Record, SuggestedType};
use docshape_core::store::{ChunkTypeCount, Store, StoreError};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Maximum number of fields listed in a summary.
pub const TOP_FIELDS: usize = 30;

/// Default page size for record listings.
pub const DEFAULT_RECORD_LIMIT: i64 = 100;

/// How often a field of the latest schema was observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldUsage {
    pub field: String,
    pub count: u64,
    pub suggested_type: SuggestedType,
    pub nullable: bool,
}

/// One point of a source's schema history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionPoint {
    /// `v<version>`.
    pub version_label: String,
    pub field_count: usize,
    pub generated_at: DateTime<Utc>,
}

/// Compact overview of one source, for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub chunk_types: Vec<ChunkTypeCount>,
    pub top_fields: Vec<FieldUsage>,
    pub schema_history: Vec<VersionPoint>,
}

/// Summarize `source_id`. Returns `None` when the source has no schema.
pub async fn build_summary(
    store: &dyn Store,
    source_id: &str,
) -> Result<Option<SourceSummary>, StoreError> {
    let history = store.schema_history(source_id).await?;
    let Some(latest) = history.last() else {
        return Ok(None);
    };

    let mut top_fields: Vec<FieldUsage> = latest
        .fields
        .iter()
        .map(|(name, info)| FieldUsage {
            field: name.clone(),
            count: info.count,
            suggested_type: info.suggested_type,
            nullable: info.nullable,
        })
        .collect();
    // Field map iteration is sorted by name, so ties stay alphabetical.
    top_fields.sort_by(|a, b| b.count.cmp(&a.count));
    top_fields.truncate(TOP_FIELDS);

    let schema_history = history
        .iter()
        .map(|s| VersionPoint {
            version_label: format!("v{}", s.version),
            field_count: s.fields.len(),
            generated_at: s.generated_at,
        })
        .collect();

    Ok(Some(SourceSummary {
        source_id: source_id.to_string(),
        chunk_types: store.chunk_type_counts(source_id).await?,
        top_fields,
        schema_history,
    }))
}

/// Page `page` (0-based) of `limit` records of `source_id`.
pub async fn records_page(
    store: &dyn Store,
    source_id: &str,
    limit: i64,
    page: i64,
) -> Result<Vec<Record>, StoreError> {
    let limit = limit.max(0);
    store
        .records(source_id, limit, page.max(0).saturating_mul(limit))
        .await
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(&config.db.path).await?))
}

/// `dshape sources`: print a table of all sources.
pub async fn list_sources(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let sources = store.list_sources().await?;
    store.close().await;

    if sources.is_empty() {
        println!("No sources ingested yet.");
        return Ok(());
    }

    println!(
        "{:<24} {:>7} {:>8} {:>7}   {}",
        "SOURCE", "VERSION", "RECORDS", "CHUNKS", "LAST INGEST"
    );
    for s in &sources {
        let last = s
            .last_ingest
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<24} {:>7} {:>8} {:>7}   {}",
            s.source_id, s.schema_version, s.record_count, s.chunk_count, last
        );
    }
    Ok(())
}

/// `dshape summary <source>`: print the summary as JSON.
pub async fn show_summary(config: &Config, source_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let summary = build_summary(store.as_ref(), source_id).await;
    store.close().await;

    match summary? {
        Some(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        None => bail!("No schema found for source: {}", source_id),
    }
}

/// `dshape records <source>`: print one page of records as JSON.
pub async fn show_records(config: &Config, source_id: &str, limit: i64, page: i64) -> Result<()> {
    let store = open_store(config).await?;
    let records = records_page(store.as_ref(), source_id, limit, page).await;
    store.close().await;

    println!("{}", serde_json::to_string_pretty(&records?)?);
    Ok(())
}

/// `dshape quarantine <source> --confirm`: move a source's records aside.
pub async fn quarantine(config: &Config, source_id: &str, confirm: bool) -> Result<()> {
    if !confirm {
        bail!(
            "Refusing to quarantine '{}' without --confirm",
            source_id
        );
    }
    let store = open_store(config).await?;
    let moved = store.quarantine(source_id).await;
    store.close().await;

    let target = moved?;
    tracing::info!(source_id, %target, "source quarantined");
    println!("quarantined {} -> {}", source_id, target);
    Ok(())
}
