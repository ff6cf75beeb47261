//! Error taxonomy of an ingestion run.
//!
//! Per-chunk parse failures are not errors: they are recovered locally as
//! [`ParseOutcome::Fallback`](crate::parse::ParseOutcome::Fallback) and the
//! run continues. Everything in [`PipelineError`] aborts the run.

use std::fmt;

use crate::extract::ExtractError;
use crate::store::StoreError;

/// The pipeline stage that performs a storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SaveChunks,
    CurrentSchema,
    SaveSchema,
    SaveRecords,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SaveChunks => "save_chunks",
            Stage::CurrentSchema => "current_schema",
            Stage::SaveSchema => "save_schema",
            Stage::SaveRecords => "save_records",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal ingestion error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The file extension is not allow-listed. Nothing has been written.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// Text extraction failed. Nothing has been written.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Another writer already produced this version for the source.
    /// Retry against the now-current version.
    #[error("schema version {version} for source '{source_id}' already exists")]
    SchemaVersionConflict { source_id: String, version: i64 },

    /// A write or read against the store failed. Earlier stages may have
    /// committed already.
    #[error("storage error during {stage}: {source}")]
    Storage {
        stage: Stage,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// Attach the failing stage to a store error, lifting version conflicts
    /// into their own variant.
    pub fn storage(stage: Stage, err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { source_id, version } => {
                PipelineError::SchemaVersionConflict { source_id, version }
            }
            other => PipelineError::Storage {
                stage,
                source: other,
            },
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) => "unsupported_format",
            PipelineError::Extraction(_) => "extraction_error",
            PipelineError::SchemaVersionConflict { .. } => "schema_version_conflict",
            PipelineError::Storage { .. } => "storage_error",
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsupportedFormat(ext) => PipelineError::UnsupportedFormat(ext),
            other => PipelineError::Extraction(other.to_string()),
        }
    }
}
