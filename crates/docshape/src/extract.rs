//! File-based text extraction.
//!
//! [`FileExtractor`] is the default [`TextExtractor`]: it checks the file
//! extension against an allow-list and turns the file into plain UTF-8
//! text.
//!
//! | Extension | Method |
//! |-----------|--------|
//! | `.txt`, `.md` (and any other allow-listed type) | read as UTF-8, invalid bytes replaced |
//! | `.html`, `.htm` | visible text via `scraper`, `script`/`style` dropped |
//! | `.pdf` | `pdf-extract` |

use std::path::Path;

use docshape_core::extract::{ExtractError, TextExtractor};
use scraper::{Html, Node};

use crate::config::IngestConfig;

/// Allow-listed file extractor.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    /// Lowercased extensions with leading dot.
    extensions: Vec<String>,
}

impl FileExtractor {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.supported_extensions)
    }

    /// Lowercased extension of `path` with leading dot, or `""`.
    fn extension_of(path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }

    pub fn supports(&self, path: &Path) -> bool {
        let ext = Self::extension_of(path);
        self.extensions.iter().any(|e| *e == ext)
    }
}

impl Default for FileExtractor {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let ext = Self::extension_of(path);
        if !self.supports(path) {
            let shown = if ext.is_empty() {
                path.display().to_string()
            } else {
                ext
            };
            return Err(ExtractError::UnsupportedFormat(shown));
        }

        let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;

        match ext.as_str() {
            ".pdf" => {
                pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Malformed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
            ".html" | ".htm" => Ok(html_to_text(&String::from_utf8_lossy(&bytes))),
            _ => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

/// Visible text of an HTML document, one text node per line.
///
/// Runs of blank lines collapse to a single blank line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
        });
        if hidden {
            continue;
        }
        for line in text.lines() {
            lines.push(line.trim().to_string());
        }
    }

    let mut out = String::new();
    let mut blank_run = false;
    for line in lines {
        if line.is_empty() {
            blank_run = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = false;
    }
    out
}
