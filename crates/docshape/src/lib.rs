//! # docshape
//!
//! **Ingest semi-structured text into structured records with a versioned,
//! self-evolving schema per source.**
//!
//! Files (plain text, markdown, HTML, PDF) are reduced to text, segmented
//! into typed chunks (JSON, CSV, key-value, YAML, HTML tables), parsed into
//! records, and stored in SQLite. Every ingestion infers a schema for the
//! batch and diffs it against the source's stored schema, producing a new
//! version and an evolution-log entry.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌────────────────────────────┐   ┌───────────┐
//! │ FileExtractor │──▶│          Pipeline          │──▶│  SQLite   │
//! │ txt/md/html/  │   │ detect → parse → infer →   │   │  store    │
//! │ pdf           │   │ evolve (per-source lock)   │   │           │
//! └───────────────┘   └────────────────────────────┘   └─────┬─────┘
//!                                                            │
//!                                          ┌─────────────────┤
//!                                          ▼                 ▼
//!                                     ┌──────────┐     ┌──────────┐
//!                                     │   CLI    │     │   HTTP   │
//!                                     │ (dshape) │     │  (axum)  │
//!                                     └──────────┘     └──────────┘
//! ```
//!
//! The backend-independent parts (detection, parsing, inference, evolution,
//! the `Store` trait) live in the `docshape-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! dshape init
//! dshape ingest ./reports/q1.txt --source sales
//! dshape schema sales
//! dshape log sales
//! dshape serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing-subscriber` setup |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | SQLite implementation of the `Store` trait |
//! | [`extract`] | Allow-listed file → text extraction |
//! | [`ingest`] | The ingestion `Pipeline` and `dshape ingest` |
//! | [`schema`] | `dshape schema` and `dshape log` |
//! | [`sources`] | Source listing, summaries, record pages, quarantine |
//! | [`server`] | JSON HTTP API (Axum) with CORS |

pub mod config;
pub mod db;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod schema;
pub mod server;
pub mod sources;
pub mod sqlite_store;

pub use docshape_core::{models, store};
pub use ingest::{Pipeline, RunReport};
