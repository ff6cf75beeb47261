//! Field-level schema inference over one batch of records.
//!
//! Every `(key, value)` pair of every record contributes to that field's
//! [`FieldStats`]: its structural type tag, a null count, an occurrence
//! count, and up to three first-seen example values. The stats are then
//! reduced into [`FieldInfo`]s with a suggested column type.
//!
//! Inference only ever sees the batch it is given. A field that existed in
//! earlier ingestions of the same source but is absent here simply does not
//! appear in the result.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::models::{FieldInfo, Record, SchemaGuess, SuggestedType, TypeTag};

/// Number of example values kept per field.
pub const MAX_EXAMPLES: usize = 3;

/// Field names considered as primary-key candidates, in order.
const PRIMARY_KEY_NAMES: [&str; 2] = ["id", "key"];

/// Running statistics for one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStats {
    pub types: BTreeSet<TypeTag>,
    pub nulls: u64,
    pub count: u64,
    pub examples: Vec<Value>,
}

impl FieldStats {
    pub fn observe(&mut self, value: &Value) {
        self.types.insert(TypeTag::of(value));
        self.count += 1;
        if value.is_null() {
            self.nulls += 1;
        }
        if self.examples.len() < MAX_EXAMPLES {
            self.examples.push(value.clone());
        }
    }

    /// Fold in stats computed over a later slice of the same batch.
    ///
    /// Examples from `self` come first, so merging partial results in
    /// record order reproduces the sequential result.
    pub fn merge(&mut self, later: FieldStats) {
        self.types.extend(later.types);
        self.nulls += later.nulls;
        self.count += later.count;
        let room = MAX_EXAMPLES.saturating_sub(self.examples.len());
        self.examples.extend(later.examples.into_iter().take(room));
    }

    pub fn finish(self) -> FieldInfo {
        let suggested_type = suggest_type(&self.types, self.examples.first());
        FieldInfo {
            types: self.types,
            nulls: self.nulls,
            count: self.count,
            examples: self.examples,
            suggested_type,
            nullable: self.nulls > 0,
        }
    }
}

/// Accumulate stats for every field of every record.
pub fn collect_stats(records: &[Record]) -> BTreeMap<String, FieldStats> {
    let mut stats: BTreeMap<String, FieldStats> = BTreeMap::new();
    for record in records {
        for (key, value) in record {
            stats.entry(key.clone()).or_default().observe(value);
        }
    }
    stats
}

/// Infer a schema guess for one batch of records.
pub fn infer_schema(records: &[Record]) -> SchemaGuess {
    let fields: BTreeMap<String, FieldInfo> = collect_stats(records)
        .into_iter()
        .map(|(name, stats)| (name, stats.finish()))
        .collect();

    // Zero nulls in this batch is the only requirement; presence and
    // uniqueness are not checked.
    let primary_key_candidates = PRIMARY_KEY_NAMES
        .iter()
        .filter(|name| fields.get(**name).is_some_and(|f| f.nulls == 0))
        .map(|name| name.to_string())
        .collect();

    SchemaGuess {
        fields,
        primary_key_candidates,
    }
}

fn suggest_type(types: &BTreeSet<TypeTag>, first_example: Option<&Value>) -> SuggestedType {
    let has_integer = types.contains(&TypeTag::Integer);
    let has_decimal = types.contains(&TypeTag::Decimal);

    if has_integer && !has_decimal {
        SuggestedType::Integer
    } else if has_decimal {
        SuggestedType::Decimal
    } else if types.contains(&TypeTag::String) {
        let sample = match first_example {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if has_date_prefix(&sample) {
            SuggestedType::Date
        } else {
            SuggestedType::String
        }
    } else {
        types
            .iter()
            .next()
            .map(|tag| SuggestedType::from(*tag))
            .unwrap_or(SuggestedType::String)
    }
}

/// `YYYY-MM-DD` at the start of the string.
fn has_date_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::into_record;
    use serde_json::json;

    fn batch(values: Vec<Value>) -> Vec<Record> {
        values.into_iter().map(into_record).collect()
    }

    #[test]
    fn infers_types_nullability_and_primary_key() {
        let records = batch(vec![
            json!({"id": 1, "name": "a"}),
            json!({"id": 2, "name": "b", "extra": null}),
        ]);
        let guess = infer_schema(&records);

        let id = &guess.fields["id"];
        assert_eq!(id.suggested_type, SuggestedType::Integer);
        assert!(!id.nullable);
        let name = &guess.fields["name"];
        assert_eq!(name.suggested_type, SuggestedType::String);
        assert!(!name.nullable);
        let extra = &guess.fields["extra"];
        assert!(extra.nullable);
        assert_eq!(extra.nulls, 1);
        assert_eq!(guess.primary_key_candidates, vec!["id".to_string()]);
    }

    #[test]
    fn empty_batch_yields_empty_guess() {
        let guess = infer_schema(&[]);
        assert!(guess.fields.is_empty());
        assert!(guess.primary_key_candidates.is_empty());
    }

    #[test]
    fn decimal_wins_over_integer() {
        let guess = infer_schema(&batch(vec![json!({"x": 1}), json!({"x": 2.5})]));
        assert_eq!(guess.fields["x"].suggested_type, SuggestedType::Decimal);
    }

    #[test]
    fn integer_wins_over_string_when_no_decimal() {
        let guess = infer_schema(&batch(vec![json!({"x": "n/a"}), json!({"x": 4})]));
        assert_eq!(guess.fields["x"].suggested_type, SuggestedType::Integer);
    }

    #[test]
    fn date_is_detected_from_first_example_only() {
        let guess = infer_schema(&batch(vec![
            json!({"d": "2024-03-01T10:00:00Z", "e": "soon"}),
            json!({"d": "whenever", "e": "2024-03-01"}),
        ]));
        assert_eq!(guess.fields["d"].suggested_type, SuggestedType::Date);
        assert_eq!(guess.fields["e"].suggested_type, SuggestedType::String);
    }

    #[test]
    fn other_types_use_lexicographically_first_tag() {
        let guess = infer_schema(&batch(vec![
            json!({"flag": true, "tags": ["a"], "meta": {"k": 1}}),
            json!({"flag": null, "tags": null, "meta": null}),
        ]));
        assert_eq!(guess.fields["flag"].suggested_type, SuggestedType::Boolean);
        assert_eq!(guess.fields["tags"].suggested_type, SuggestedType::Array);
        assert_eq!(guess.fields["meta"].suggested_type, SuggestedType::Null);
        assert!(guess.fields["meta"].nullable);
    }

    #[test]
    fn examples_are_first_three_seen() {
        let records = batch((0..10).map(|i| json!({"n": i})).collect());
        let guess = infer_schema(&records);
        assert_eq!(guess.fields["n"].examples, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(guess.fields["n"].count, 10);
    }

    #[test]
    fn primary_key_ignores_absence_but_not_nulls() {
        let guess = infer_schema(&batch(vec![
            json!({"id": 1, "key": "a"}),
            json!({"other": 1, "key": null}),
        ]));
        assert_eq!(guess.primary_key_candidates, vec!["id".to_string()]);
    }

    #[test]
    fn key_is_a_candidate_after_id() {
        let guess = infer_schema(&batch(vec![json!({"key": "k", "id": "i"})]));
        assert_eq!(
            guess.primary_key_candidates,
            vec!["id".to_string(), "key".to_string()]
        );
    }

    #[test]
    fn inference_is_deterministic() {
        let records = batch(vec![
            json!({"a": 1, "b": "x", "c": [1]}),
            json!({"a": 2.0, "b": null, "c": {"k": true}}),
            json!({"a": "s", "b": "2020-01-01"}),
        ]);
        let first = infer_schema(&records);
        let second = infer_schema(&records);
        assert_eq!(first, second);
        let types: Vec<TypeTag> = first.fields["a"].types.iter().copied().collect();
        assert_eq!(types, vec![TypeTag::Decimal, TypeTag::Integer, TypeTag::String]);
    }

    #[test]
    fn merging_partial_stats_matches_sequential_pass() {
        let records = batch((0..6).map(|i| json!({"v": i, "w": null})).collect());
        let whole = collect_stats(&records);

        let mut left = collect_stats(&records[..1]);
        for (name, stats) in collect_stats(&records[1..]) {
            left.entry(name).or_default().merge(stats);
        }
        assert_eq!(left, whole);
    }

    #[test]
    fn date_prefix_shape() {
        assert!(has_date_prefix("1999-12-31"));
        assert!(has_date_prefix("1999-12-31 and more"));
        assert!(!has_date_prefix("1999/12/31"));
        assert!(!has_date_prefix("99-12-31"));
        assert!(!has_date_prefix(""));
    }
}
