//! Configuration parsing and validation.
//!
//! docshape is configured via a TOML file (default `config/dshape.toml`).
//! Only `[db]` is required; every other section has defaults.
//!
//! ```toml
//! [db]
//! path = "./data/dshape.sqlite"
//!
//! [ingest]
//! supported_extensions = [".txt", ".pdf", ".md", ".html"]
//!
//! [[detection.rules]]
//! tag = "kv"
//! pattern = '^([^:]+):\s*(.+)$'
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ingest_root = "./inbox"
//! cors_origins = ["http://localhost:5173"]
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! When `[[detection.rules]]` is absent the built-in rule set is used. When
//! present it replaces the built-in set entirely; rule order is the order
//! chunks of equal start offset are reported in.

use anyhow::{Context, Result};
use docshape_core::detect::{default_rules, ChunkDetector, DetectionRule};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// File extensions accepted by the extractor, with leading dot.
    #[serde(default = "default_extensions")]
    pub supported_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_extensions(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [".txt", ".pdf", ".md", ".html"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<DetectionRule>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl DetectionConfig {
    /// Compile the configured rules.
    pub fn detector(&self) -> Result<ChunkDetector> {
        ChunkDetector::new(&self.rules).context("invalid detection rule")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory `POST /ingest` may read from. Request paths are resolved
    /// against it and must stay inside it.
    #[serde(default = "default_ingest_root")]
    pub ingest_root: PathBuf,
    /// Browser origins allowed by CORS.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ingest_root: default_ingest_root(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

fn default_ingest_root() -> PathBuf {
    PathBuf::from("./inbox")
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    for ext in &config.ingest.supported_extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            anyhow::bail!(
                "ingest.supported_extensions entries must look like '.txt', got '{}'",
                ext
            );
        }
    }

    if config.server.ingest_root.as_os_str().is_empty() {
        anyhow::bail!("server.ingest_root must not be empty");
    }

    for origin in &config.server.cors_origins {
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            anyhow::bail!(
                "server.cors_origins entries must be http(s) origins, got '{}'",
                origin
            );
        }
    }

    let mut seen = HashSet::new();
    for rule in &config.detection.rules {
        if rule.tag.trim().is_empty() {
            anyhow::bail!("detection.rules tag must not be empty");
        }
        if !seen.insert(rule.tag.as_str()) {
            anyhow::bail!("duplicate detection rule tag: '{}'", rule.tag);
        }
    }

    // Compile once so bad patterns fail here instead of at first ingest.
    config.detection.detector()?;

    Ok(config)
}
