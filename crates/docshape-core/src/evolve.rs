//! Diff-based schema versioning.
//!
//! Compares the current stored schema of a source with the schema guess of
//! a new batch and produces the next version together with the evolution
//! log entry describing the transition.
//!
//! The evolved schema carries the guess's field map in full. Fields that
//! disappeared from the batch are reported in `removed` and are otherwise
//! only retained in the previous schema version and the evolution log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{EvolutionLogEntry, FieldInfo, Schema, SchemaDiff, SchemaGuess, TypeChange};

/// The result of evolving a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Evolution {
    pub schema: Schema,
    pub log_entry: EvolutionLogEntry,
}

impl Evolution {
    pub fn diff(&self) -> &SchemaDiff {
        &self.log_entry.diff
    }
}

/// Partition field names into added, removed, type-changed and nullable-changed.
pub fn diff_fields(
    old: &BTreeMap<String, FieldInfo>,
    new: &BTreeMap<String, FieldInfo>,
) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for (name, new_info) in new {
        let Some(old_info) = old.get(name) else {
            diff.added.push(name.clone());
            continue;
        };
        if old_info.suggested_type != new_info.suggested_type {
            diff.type_changed.push(TypeChange {
                field: name.clone(),
                from: old_info.suggested_type,
                to: new_info.suggested_type,
            });
        }
        if old_info.nullable != new_info.nullable {
            diff.nullable_changed.push(name.clone());
        }
    }

    diff.removed = old
        .keys()
        .filter(|name| !new.contains_key(*name))
        .cloned()
        .collect();

    diff
}

/// Human-readable summary of additions and type changes, if any.
pub fn migration_notes(diff: &SchemaDiff) -> Option<String> {
    let mut notes = Vec::new();
    if !diff.added.is_empty() {
        notes.push(format!("Added: {}", diff.added.join(", ")));
    }
    for change in &diff.type_changed {
        notes.push(format!("{}: {} to {}", change.field, change.from, change.to));
    }
    if notes.is_empty() {
        None
    } else {
        Some(notes.join("; "))
    }
}

/// Produce version `current.version + 1` from `guess`.
pub fn evolve(current: &Schema, guess: SchemaGuess, now: DateTime<Utc>) -> Evolution {
    let diff = diff_fields(&current.fields, &guess.fields);
    let version = current.version + 1;
    let schema = Schema::from_guess(
        &current.source_id,
        version,
        guess,
        migration_notes(&diff),
        now,
    );
    let log_entry = EvolutionLogEntry {
        source_id: current.source_id.clone(),
        from_version: current.version,
        to_version: version,
        diff,
        timestamp: now,
    };
    Evolution { schema, log_entry }
}
