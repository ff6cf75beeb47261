//! Core data models used throughout docshape.
//!
//! These types represent the chunks, records, schemas, and evolution log
//! entries that flow through the ingestion pipeline and into the store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A flat mapping of field name to value, parsed from one chunk.
///
/// Values may themselves be nested objects or arrays. Field order is the
/// order in which the parser produced them.
pub type Record = serde_json::Map<String, Value>;

/// Wrap a non-mapping value as `{"value": x}`.
pub fn wrap_value(value: Value) -> Record {
    let mut record = Record::new();
    record.insert("value".to_string(), value);
    record
}

/// Normalize any parsed value into a record: mappings pass through,
/// everything else is wrapped.
pub fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => wrap_value(other),
    }
}

/// The structural type of a detected chunk.
///
/// Tags outside the built-in set are preserved as [`ChunkType::Other`] so
/// that externally configured detection rules round-trip; the parser treats
/// them like [`ChunkType::Raw`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChunkType {
    Json,
    Csv,
    Kv,
    Yaml,
    Html,
    Raw,
    Other(String),
}

impl ChunkType {
    pub fn as_str(&self) -> &str {
        match self {
            ChunkType::Json => "json",
            ChunkType::Csv => "csv",
            ChunkType::Kv => "kv",
            ChunkType::Yaml => "yaml",
            ChunkType::Html => "html",
            ChunkType::Raw => "raw",
            ChunkType::Other(tag) => tag,
        }
    }
}

impl From<&str> for ChunkType {
    fn from(tag: &str) -> Self {
        match tag {
            "json" => ChunkType::Json,
            "csv" => ChunkType::Csv,
            "kv" => ChunkType::Kv,
            "yaml" => ChunkType::Yaml,
            "html" => ChunkType::Html,
            "raw" => ChunkType::Raw,
            other => ChunkType::Other(other.to_string()),
        }
    }
}

impl From<String> for ChunkType {
    fn from(tag: String) -> Self {
        ChunkType::from(tag.as_str())
    }
}

impl From<ChunkType> for String {
    fn from(chunk_type: ChunkType) -> Self {
        chunk_type.as_str().to_string()
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous span of the input text tagged with its detected type.
///
/// `start`/`end` are byte offsets into the text the chunk was detected in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub content: String,
    pub start: usize,
    pub end: usize,
}

/// Structural type of a single value.
///
/// Variants are declared in lexicographic order of their tag so that the
/// derived `Ord` matches sorting by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Array,
    Boolean,
    Decimal,
    Integer,
    Null,
    Object,
    String,
}

impl TypeTag {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => TypeTag::Integer,
            Value::Number(_) => TypeTag::Decimal,
            Value::String(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Object(_) => TypeTag::Object,
        }
    }
}

/// The column type suggested for a field after inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedType {
    Integer,
    Decimal,
    Date,
    String,
    Boolean,
    Null,
    Object,
    Array,
}

impl From<TypeTag> for SuggestedType {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Array => SuggestedType::Array,
            TypeTag::Boolean => SuggestedType::Boolean,
            TypeTag::Decimal => SuggestedType::Decimal,
            TypeTag::Integer => SuggestedType::Integer,
            TypeTag::Null => SuggestedType::Null,
            TypeTag::Object => SuggestedType::Object,
            TypeTag::String => SuggestedType::String,
        }
    }
}

impl fmt::Display for SuggestedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuggestedType::Integer => "integer",
            SuggestedType::Decimal => "decimal",
            SuggestedType::Date => "date",
            SuggestedType::String => "string",
            SuggestedType::Boolean => "boolean",
            SuggestedType::Null => "null",
            SuggestedType::Object => "object",
            SuggestedType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Per-field statistics for one ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Observed type tags, serialized as a sorted list.
    pub types: BTreeSet<TypeTag>,
    /// Number of `null` values observed.
    pub nulls: u64,
    /// Number of records in which the field appeared.
    #[serde(default)]
    pub count: u64,
    /// Up to three first-seen values.
    pub examples: Vec<Value>,
    pub suggested_type: SuggestedType,
    pub nullable: bool,
}

/// Output of schema inference over one batch of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaGuess {
    pub fields: BTreeMap<String, FieldInfo>,
    pub primary_key_candidates: Vec<String>,
}

/// Stores the schema is advertised as loadable into.
pub const COMPATIBLE_DBS: [&str; 2] = ["sqlite", "postgresql"];

/// An immutable, versioned schema snapshot for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: String,
    pub source_id: String,
    pub version: i64,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub compatible_dbs: Vec<String>,
    pub fields: BTreeMap<String, FieldInfo>,
    pub primary_key_candidates: Vec<String>,
    pub migration_notes: Option<String>,
}

impl Schema {
    /// Build the schema snapshot for `version` from an inference result.
    pub fn from_guess(
        source_id: &str,
        version: i64,
        guess: SchemaGuess,
        migration_notes: Option<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_id: format!("schema_v{}", version),
            source_id: source_id.to_string(),
            version,
            generated_at,
            compatible_dbs: COMPATIBLE_DBS.iter().map(|s| s.to_string()).collect(),
            fields: guess.fields,
            primary_key_candidates: guess.primary_key_candidates,
            migration_notes,
        }
    }

    /// The first schema for a source: the guess verbatim, as version 1.
    pub fn initial(source_id: &str, guess: SchemaGuess, generated_at: DateTime<Utc>) -> Self {
        Self::from_guess(source_id, 1, guess, None, generated_at)
    }
}

/// A field whose suggested type differs between two schema versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub field: String,
    pub from: SuggestedType,
    pub to: SuggestedType,
}

/// Field-level differences between two consecutive schema versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub type_changed: Vec<TypeChange>,
    pub nullable_changed: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.type_changed.is_empty()
            && self.nullable_changed.is_empty()
    }
}

/// Append-only record of one schema transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionLogEntry {
    pub source_id: String,
    pub from_version: i64,
    pub to_version: i64,
    pub diff: SchemaDiff,
    pub timestamp: DateTime<Utc>,
}

/// Name of the record collection that holds a source's data.
pub fn data_collection(source_id: &str) -> String {
    format!("data_{}", source_id)
}
