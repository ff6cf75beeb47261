//! Text extraction abstraction.
//!
//! The pipeline consumes plain UTF-8 text. Turning a file (PDF, HTML,
//! markdown, ...) into that text is the job of a [`TextExtractor`]
//! implementation supplied by the caller.

use std::path::Path;

/// Extraction failure.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The file extension is not in the allow-list.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but its content could not be converted to text.
    #[error("failed to extract text from {path}: {message}")]
    Malformed { path: String, message: String },
}

/// Converts a file into plain UTF-8 text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}
