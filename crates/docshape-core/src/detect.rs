//! Pattern-driven chunk detection.
//!
//! Segments raw text into typed [`Chunk`]s using an ordered list of
//! [`DetectionRule`]s. Every rule is evaluated against the whole text with
//! multi-line and dot-matches-newline semantics; matches from all rules are
//! pooled, sorted by start offset, and adjacent chunks of the same type are
//! merged.
//!
//! There is no priority between types: when a `kv` rule and a `yaml` rule
//! both match the same span, both chunks are kept.
//!
//! A `json` match that holds several whitespace-separated values is split
//! into one chunk per value before merging.

use regex::{Regex, RegexBuilder};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::models::{Chunk, ChunkType};

/// Separator inserted between the contents of merged chunks.
const MERGE_SEPARATOR: &str = "\n\n";

/// One tag → pattern entry of the detection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub tag: String,
    pub pattern: String,
}

impl DetectionRule {
    pub fn new(tag: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            pattern: pattern.into(),
        }
    }
}

/// The built-in rule set, in evaluation order.
pub fn default_rules() -> Vec<DetectionRule> {
    vec![
        DetectionRule::new("json", r"\{.*?\}[ \t]*$"),
        DetectionRule::new("html", r"<[^>]+>.*?</[^>]+>"),
        DetectionRule::new("csv", r"^[^,\n]+(,[^,\n]+)+$"),
        DetectionRule::new("kv", r"^([^:]+):\s*(.+)$"),
        DetectionRule::new("yaml", r"^\s*[a-zA-Z0-9_]+:\s*.+$"),
    ]
}

/// A detection rule failed to compile.
#[derive(Debug, thiserror::Error)]
#[error("invalid pattern for chunk type '{tag}': {source}")]
pub struct InvalidPattern {
    pub tag: String,
    #[source]
    pub source: regex::Error,
}

/// Compiled chunk detector.
#[derive(Debug, Clone)]
pub struct ChunkDetector {
    rules: Vec<(ChunkType, Regex)>,
}

impl ChunkDetector {
    /// Compile `rules` in order. Fails on the first pattern that does not compile.
    pub fn new(rules: &[DetectionRule]) -> Result<Self, InvalidPattern> {
        let compiled = rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(&rule.pattern)
                    .multi_line(true)
                    .dot_matches_new_line(true)
                    .build()
                    .map(|re| (ChunkType::from(rule.tag.as_str()), re))
                    .map_err(|source| InvalidPattern {
                        tag: rule.tag.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules: compiled })
    }

    /// Detector built from [`default_rules`].
    pub fn with_default_rules() -> Result<Self, InvalidPattern> {
        Self::new(&default_rules())
    }

    /// Tags of the configured rules, in evaluation order.
    pub fn tags(&self) -> impl Iterator<Item = &ChunkType> {
        self.rules.iter().map(|(tag, _)| tag)
    }

    /// Split `text` into typed chunks.
    ///
    /// Always returns at least one chunk, sorted ascending by `start`. When
    /// no rule matches, the whole text becomes a single `raw` chunk.
    pub fn detect(&self, text: &str) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for (chunk_type, re) in &self.rules {
            for m in re.find_iter(text) {
                if m.start() == m.end() {
                    continue;
                }
                let spans = if *chunk_type == ChunkType::Json {
                    split_json_values(text, m.start(), m.end())
                } else {
                    vec![(m.start(), m.end())]
                };
                for (start, end) in spans {
                    chunks.push(Chunk {
                        chunk_type: chunk_type.clone(),
                        content: text[start..end].trim().to_string(),
                        start,
                        end,
                    });
                }
            }
        }

        if chunks.is_empty() {
            return vec![Chunk {
                chunk_type: ChunkType::Raw,
                content: text.trim().to_string(),
                start: 0,
                end: text.len(),
            }];
        }

        // Stable: equal starts keep rule order.
        chunks.sort_by_key(|c| c.start);
        merge_adjacent(chunks)
    }
}

/// Spans of the individual values when a json match holds several
/// whitespace-separated objects, such as `{"a": 1}    {"b": 2}` on one line.
/// Anything that is not a clean sequence of two or more values is returned
/// as the single original span.
fn split_json_values(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let span = &text[start..end];
    let mut stream = serde_json::Deserializer::from_str(span).into_iter::<IgnoredAny>();
    let mut spans = Vec::new();
    let mut offset = 0;
    while let Some(item) = stream.next() {
        if item.is_err() {
            return vec![(start, end)];
        }
        let value_end = stream.byte_offset();
        let piece = &span[offset..value_end];
        let value_start = offset + (piece.len() - piece.trim_start().len());
        spans.push((start + value_start, start + value_end));
        offset = value_end;
    }
    if spans.len() < 2 {
        vec![(start, end)]
    } else {
        spans
    }
}

/// Merge consecutive chunks of the same type that overlap or touch.
fn merge_adjacent(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(prev) if prev.chunk_type == chunk.chunk_type && chunk.start <= prev.end + 1 => {
                prev.content.push_str(MERGE_SEPARATOR);
                prev.content.push_str(&chunk.content);
                prev.end = prev.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}
