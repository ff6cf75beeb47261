//! # docshape core
//!
//! Backend-independent logic of the docshape ingestion pipeline: data
//! models, chunk detection, chunk parsing, schema inference, schema
//! evolution and the store abstraction.
//!
//! This crate contains no tokio runtime, sqlx, or filesystem I/O. The
//! application crate wires these pieces to SQLite, the CLI and the HTTP
//! server.
//!
//! ```text
//! text ──► ChunkDetector ──► ChunkParser ──► infer_schema ──► evolve ──► Store
//! ```

pub mod detect;
pub mod error;
pub mod evolve;
pub mod extract;
pub mod infer;
pub mod models;
pub mod parse;
pub mod store;

pub use detect::{ChunkDetector, DetectionRule};
pub use error::{PipelineError, Stage};
pub use extract::{ExtractError, TextExtractor};
pub use parse::{ChunkParser, ParseOutcome};
pub use store::{Store, StoreError};
