//! Per-type chunk parsing with raw fallback.
//!
//! [`ChunkParser`] dispatches on the chunk type through a lookup table of
//! [`ParseFn`]s. A chunk that fails to parse, or parses into nothing, is
//! never dropped: it becomes a single fallback record carrying the
//! (truncated) raw content and the chunk type.
//!
//! | Type | Records produced |
//! |------|------------------|
//! | `json` | one per object; one per array element; scalars wrapped |
//! | `csv` | one per data row, keyed by the header line |
//! | `kv` | one record of `key: value` lines (values are strings) |
//! | `yaml` | one per mapping document / sequence element; scalars wrapped |
//! | `html` | one per table row, keyed by `<th>` cells or `col_N` |
//! | anything else | the fallback record |

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use crate::models::{into_record, Chunk, ChunkType, Record};

/// Maximum number of characters of raw content kept in a fallback record.
pub const FALLBACK_MAX_CHARS: usize = 1000;

/// Field holding the raw content in a fallback record.
pub const RAW_FIELD: &str = "_raw";
/// Field holding the chunk type in a fallback record.
pub const CHUNK_TYPE_FIELD: &str = "_chunk_type";

/// A per-type parse failure. Always recovered by the fallback record.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("html: {0}")]
    Html(String),
}

/// Parses the content of one chunk into records.
pub type ParseFn = fn(&str) -> Result<Vec<Record>, ParseError>;

/// The result of parsing one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The chunk parsed into one or more records.
    Parsed(Vec<Record>),
    /// The chunk could not be parsed; `record` preserves its content.
    Fallback { record: Record, reason: String },
}

impl ParseOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback { .. })
    }

    /// The records of this outcome. Never empty.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            ParseOutcome::Parsed(records) => records,
            ParseOutcome::Fallback { record, .. } => vec![record],
        }
    }
}

/// Lookup table from chunk type to parse function.
#[derive(Clone)]
pub struct ChunkParser {
    parsers: HashMap<ChunkType, ParseFn>,
}

impl std::fmt::Debug for ChunkParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.parsers.keys().map(ChunkType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ChunkParser").field("types", &types).finish()
    }
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    /// Parser with the built-in `json`, `csv`, `kv`, `yaml` and `html` handlers.
    pub fn new() -> Self {
        let mut parsers: HashMap<ChunkType, ParseFn> = HashMap::new();
        parsers.insert(ChunkType::Json, parse_json);
        parsers.insert(ChunkType::Csv, parse_csv);
        parsers.insert(ChunkType::Kv, parse_kv);
        parsers.insert(ChunkType::Yaml, parse_yaml);
        parsers.insert(ChunkType::Html, parse_html_table);
        Self { parsers }
    }

    /// Register (or replace) the handler for a chunk type.
    pub fn register(&mut self, chunk_type: ChunkType, parse: ParseFn) {
        self.parsers.insert(chunk_type, parse);
    }

    /// Parse one chunk. Never fails and never yields zero records.
    pub fn parse(&self, chunk: &Chunk) -> ParseOutcome {
        let Some(parse) = self.parsers.get(&chunk.chunk_type) else {
            return ParseOutcome::Fallback {
                record: fallback_record(chunk),
                reason: format!("no parser for chunk type '{}'", chunk.chunk_type),
            };
        };

        match parse(&chunk.content) {
            Ok(records) if !records.is_empty() => ParseOutcome::Parsed(records),
            Ok(_) => {
                tracing::debug!(
                    chunk_type = %chunk.chunk_type,
                    start = chunk.start,
                    "chunk produced no records, keeping raw content"
                );
                ParseOutcome::Fallback {
                    record: fallback_record(chunk),
                    reason: "no records".to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    chunk_type = %chunk.chunk_type,
                    start = chunk.start,
                    error = %e,
                    "parse warning, keeping raw content"
                );
                ParseOutcome::Fallback {
                    record: fallback_record(chunk),
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// `{"_raw": <content, max 1000 chars>, "_chunk_type": <type>}`.
pub fn fallback_record(chunk: &Chunk) -> Record {
    let content = chunk.content.trim();
    let snippet = match content.char_indices().nth(FALLBACK_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    };
    let mut record = Record::new();
    record.insert(RAW_FIELD.to_string(), Value::String(snippet));
    record.insert(
        CHUNK_TYPE_FIELD.to_string(),
        Value::String(chunk.chunk_type.to_string()),
    );
    record
}

fn parse_json(content: &str) -> Result<Vec<Record>, ParseError> {
    let value: Value = serde_json::from_str(content)?;
    Ok(match value {
        Value::Array(items) => items.into_iter().map(into_record).collect(),
        other => vec![into_record(other)],
    })
}

fn parse_csv(content: &str) -> Result<Vec<Record>, ParseError> {
    // Merged csv chunks are joined by blank lines.
    let body = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = row
                    .get(i)
                    .map(|cell| Value::String(cell.to_string()))
                    .unwrap_or(Value::Null);
                (name.to_string(), value)
            })
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn parse_kv(content: &str) -> Result<Vec<Record>, ParseError> {
    let mut record = Record::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            record.insert(
                key.trim().to_string(),
                Value::String(value.trim().to_string()),
            );
        }
    }
    Ok(if record.is_empty() {
        Vec::new()
    } else {
        vec![record]
    })
}

fn parse_yaml(content: &str) -> Result<Vec<Record>, ParseError> {
    let mut records = Vec::new();
    // Straight into JSON values: a repeated key keeps its last value.
    for document in serde_yaml::Deserializer::from_str(content) {
        match Value::deserialize(document)? {
            Value::Null => continue,
            Value::Array(items) => records.extend(items.into_iter().map(into_record)),
            other => records.push(into_record(other)),
        }
    }
    Ok(records)
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Html(e.to_string()))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn parse_html_table(content: &str) -> Result<Vec<Record>, ParseError> {
    // Bare rows outside a <table> are dropped by the HTML parser. Lone cells
    // are not wrapped, so they never turn into a synthesized row.
    let lower = content.to_ascii_lowercase();
    let markup = if !lower.contains("<table") && lower.contains("<tr") {
        format!("<table>{}</table>", content)
    } else {
        content.to_string()
    };
    let fragment = Html::parse_fragment(&markup);
    let row_sel = selector("tr")?;
    let header_sel = selector("th")?;
    let cell_sel = selector("td, th")?;

    let rows: Vec<ElementRef<'_>> = fragment.select(&row_sel).collect();
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let header_cells: Vec<String> = first.select(&header_sel).map(cell_text).collect();
    let (headers, data_rows) = if header_cells.is_empty() {
        let width = first.select(&cell_sel).count();
        let synthesized: Vec<String> = (0..width).map(|i| format!("col_{}", i)).collect();
        (synthesized, &rows[..])
    } else {
        (header_cells, &rows[1..])
    };

    let records = data_rows
        .iter()
        .map(|row| {
            let mut cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
            if cells.len() < headers.len() {
                cells.resize(headers.len(), String::new());
            }
            headers
                .iter()
                .cloned()
                .zip(cells.into_iter().map(Value::String))
                .collect::<Record>()
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(chunk_type: ChunkType, content: &str) -> Chunk {
        Chunk {
            chunk_type,
            content: content.to_string(),
            start: 0,
            end: content.len().max(1),
        }
    }

    fn records(chunk_type: ChunkType, content: &str) -> Vec<Value> {
        ChunkParser::new()
            .parse(&chunk(chunk_type, content))
            .into_records()
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    fn assert_fallback(outcome: &ParseOutcome, chunk_type: &str) {
        match outcome {
            ParseOutcome::Fallback { record, .. } => {
                assert_eq!(record.len(), 2);
                assert!(record.contains_key(RAW_FIELD));
                assert_eq!(record[CHUNK_TYPE_FIELD], json!(chunk_type));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn json_object_is_one_record() {
        let out = records(ChunkType::Json, r#"{"a":1,"b":"x"}"#);
        assert_eq!(out, vec![json!({"a": 1, "b": "x"})]);
    }

    #[test]
    fn json_array_yields_record_per_element() {
        let out = records(ChunkType::Json, r#"[{"a":1}, 2, "three"]"#);
        assert_eq!(
            out,
            vec![json!({"a": 1}), json!({"value": 2}), json!({"value": "three"})]
        );
    }

    #[test]
    fn json_field_order_is_preserved() {
        let out = records(ChunkType::Json, r#"{"z":1,"a":2}"#);
        let keys: Vec<&String> = out[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn malformed_json_falls_back() {
        let parser = ChunkParser::new();
        let outcome = parser.parse(&chunk(ChunkType::Json, "{\"a\": 1} {\"b\": 2}"));
        assert_fallback(&outcome, "json");
    }

    #[test]
    fn empty_json_array_falls_back() {
        let outcome = ChunkParser::new().parse(&chunk(ChunkType::Json, "[]"));
        assert_fallback(&outcome, "json");
    }

    #[test]
    fn kv_values_are_strings() {
        let out = records(ChunkType::Kv, "name: Ann\nage: 30");
        assert_eq!(out, vec![json!({"name": "Ann", "age": "30"})]);
    }

    #[test]
    fn kv_splits_on_first_colon_and_ignores_other_lines() {
        let out = records(ChunkType::Kv, "url: http://x.test:80\nno colon here\n  key :  v  ");
        assert_eq!(out, vec![json!({"url": "http://x.test:80", "key": "v"})]);
    }

    #[test]
    fn kv_without_any_colon_falls_back() {
        let outcome = ChunkParser::new().parse(&chunk(ChunkType::Kv, "nothing to see"));
        assert_fallback(&outcome, "kv");
    }

    #[test]
    fn csv_rows_are_keyed_by_header() {
        let out = records(ChunkType::Csv, "id,name\n\n1,ann\n\n2,bob");
        assert_eq!(
            out,
            vec![json!({"id": "1", "name": "ann"}), json!({"id": "2", "name": "bob"})]
        );
    }

    #[test]
    fn csv_short_rows_get_null() {
        let out = records(ChunkType::Csv, "a,b,c\n1,2");
        assert_eq!(out, vec![json!({"a": "1", "b": "2", "c": null})]);
    }

    #[test]
    fn csv_header_only_falls_back() {
        let outcome = ChunkParser::new().parse(&chunk(ChunkType::Csv, "a,b,c"));
        assert_fallback(&outcome, "csv");
    }

    #[test]
    fn yaml_multi_document_stream() {
        let text = "name: ann\nage: 30\n---\n- 1\n- {k: v}\n---\nplain scalar\n";
        let out = records(ChunkType::Yaml, text);
        assert_eq!(
            out,
            vec![
                json!({"name": "ann", "age": 30}),
                json!({"value": 1}),
                json!({"k": "v"}),
                json!({"value": "plain scalar"}),
            ]
        );
    }

    #[test]
    fn yaml_non_string_keys_become_strings() {
        let out = records(ChunkType::Yaml, "1: one\ntrue: yes");
        assert_eq!(out, vec![json!({"1": "one", "true": "yes"})]);
    }

    #[test]
    fn yaml_repeated_keys_keep_the_last_value() {
        let out = records(ChunkType::Yaml, "name: Ann\nage: 30\n\nname: Bob\nage: 41");
        assert_eq!(out, vec![json!({"name": "Bob", "age": 41})]);
    }

    #[test]
    fn invalid_yaml_falls_back() {
        let outcome = ChunkParser::new().parse(&chunk(ChunkType::Yaml, "a: [1, 2\nb: }"));
        assert_fallback(&outcome, "yaml");
    }

    #[test]
    fn html_table_with_header_row() {
        let html = "<table><tr><th>name</th><th>age</th></tr>\
                    <tr><td>ann</td><td>30</td></tr>\
                    <tr><td>bob</td></tr></table>";
        let out = records(ChunkType::Html, html);
        assert_eq!(
            out,
            vec![
                json!({"name": "ann", "age": "30"}),
                json!({"name": "bob", "age": ""}),
            ]
        );
    }

    #[test]
    fn html_table_without_header_synthesizes_columns() {
        let html = "<tr><td> a </td><td>b</td></tr>\n\n<tr><td>c</td><td>d</td></tr>";
        let out = records(ChunkType::Html, html);
        assert_eq!(
            out,
            vec![
                json!({"col_0": "a", "col_1": "b"}),
                json!({"col_0": "c", "col_1": "d"}),
            ]
        );
    }

    #[test]
    fn html_cells_without_a_row_fall_back() {
        let outcome = ChunkParser::new().parse(&chunk(ChunkType::Html, "<td>a</td><td>b</td>"));
        assert_fallback(&outcome, "html");
    }

    #[test]
    fn html_without_rows_falls_back() {
        let outcome = ChunkParser::new().parse(&chunk(ChunkType::Html, "<p>hello</p>"));
        assert_fallback(&outcome, "html");
    }

    #[test]
    fn raw_and_unknown_types_fall_back() {
        let parser = ChunkParser::new();
        assert_fallback(&parser.parse(&chunk(ChunkType::Raw, "text")), "raw");
        assert_fallback(
            &parser.parse(&chunk(ChunkType::Other("md".into()), "# x")),
            "md",
        );
    }

    #[test]
    fn fallback_truncates_long_content() {
        let long = "é".repeat(FALLBACK_MAX_CHARS + 5);
        let record = fallback_record(&chunk(ChunkType::Raw, &long));
        let raw = record[RAW_FIELD].as_str().unwrap();
        assert!(raw.ends_with("..."));
        assert_eq!(raw.chars().count(), FALLBACK_MAX_CHARS + 3);
    }

    #[test]
    fn fallback_keeps_short_content_intact() {
        let record = fallback_record(&chunk(ChunkType::Raw, "  short  "));
        assert_eq!(record[RAW_FIELD], json!("short"));
    }

    #[test]
    fn registered_parser_replaces_fallback() {
        fn lines(content: &str) -> Result<Vec<Record>, ParseError> {
            Ok(content
                .lines()
                .map(|l| into_record(Value::String(l.to_string())))
                .collect())
        }
        let mut parser = ChunkParser::new();
        parser.register(ChunkType::Raw, lines);
        let out = parser.parse(&chunk(ChunkType::Raw, "a\nb")).into_records();
        assert_eq!(out.len(), 2);
    }
}
