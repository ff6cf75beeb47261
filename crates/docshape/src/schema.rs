//! Schema inspection commands.
//!
//! `dshape schema <source>` prints the current schema (or, with
//! `--history`, every version) and `dshape log <source>` prints the
//! evolution log. All output is pretty-printed JSON on stdout.

use anyhow::{bail, Result};

use docshape_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// CLI entry point for `dshape schema`.
pub async fn show_schema(config: &Config, source_id: &str, history: bool) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;

    let output = if history {
        let versions = store.schema_history(source_id).await;
        store.close().await;
        serde_json::to_string_pretty(&versions?)?
    } else {
        let current = store.current_schema(source_id).await;
        store.close().await;
        match current? {
            Some(schema) => serde_json::to_string_pretty(&schema)?,
            None => bail!("No schema found for source: {}", source_id),
        }
    };

    println!("{}", output);
    Ok(())
}

/// CLI entry point for `dshape log`.
pub async fn show_log(config: &Config, source_id: &str) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let entries = store.evolution_log(source_id).await;
    store.close().await;

    println!("{}", serde_json::to_string_pretty(&entries?)?);
    Ok(())
}
