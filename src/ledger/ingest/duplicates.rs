use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ledger::ingest::catalog::Catalog;
use crate::ledger::ingest::model::{
    Column, ColumnType, DUPLICATE_STATUS, DuplicateStatus, RecordSet, Value, ValueKey,
};

/// Columns forming the duplicate key of a set: the catalog's key fields that
/// are present, or every column when none are.
pub fn key_fields(set: &RecordSet, catalog: &Catalog) -> Vec<String> {
    let declared: Vec<String> = catalog
        .entry(&set.category)
        .map(|entry| {
            entry
                .duplicate_keys
                .iter()
                .filter(|name| set.has_column(name))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    if !declared.is_empty() {
        return declared;
    }
    debug!(category = %set.category, "no duplicate keys available, using every column");
    set.column_names()
        .into_iter()
        .filter(|name| *name != DUPLICATE_STATUS)
        .map(str::to_string)
        .collect()
}

/// Labels every row by its key group: singletons are `NO duplicates`, the
/// first row of a larger group `HAS duplicates` and the rest `IS duplicate`.
pub fn classify(set: &RecordSet, keys: &[String]) -> Vec<DuplicateStatus> {
    let row_key = |row: usize| -> Vec<ValueKey> {
        keys.iter()
            .map(|name| set.get(row, name).map_or(ValueKey::Null, Value::key))
            .collect()
    };

    let mut sizes: HashMap<Vec<ValueKey>, usize> = HashMap::new();
    let row_keys: Vec<Vec<ValueKey>> = (0..set.len()).map(row_key).collect();
    for key in &row_keys {
        *sizes.entry(key.clone()).or_default() += 1;
    }

    let mut seen: HashSet<&Vec<ValueKey>> = HashSet::new();
    row_keys
        .iter()
        .map(|key| {
            if sizes[key] == 1 {
                DuplicateStatus::NoDuplicates
            } else if seen.insert(key) {
                DuplicateStatus::HasDuplicates
            } else {
                DuplicateStatus::IsDuplicate
            }
        })
        .collect()
}

/// Adds (or refreshes) the `Duplicate Status` column.
pub fn detect(mut set: RecordSet, catalog: &Catalog) -> RecordSet {
    let keys = key_fields(&set, catalog);
    let statuses = classify(&set, &keys);
    let values = statuses
        .into_iter()
        .map(|status| Value::text(status.label()))
        .collect();
    set.put_column(Column::new(DUPLICATE_STATUS, ColumnType::Text, values));
    set
}

/// Reads the status column back; rows without a recognised label count as
/// unique.
pub fn statuses(set: &RecordSet) -> Vec<DuplicateStatus> {
    match set.values(DUPLICATE_STATUS) {
        Some(values) => values
            .iter()
            .map(|value| {
                value
                    .as_text()
                    .and_then(DuplicateStatus::parse)
                    .unwrap_or(DuplicateStatus::NoDuplicates)
            })
            .collect(),
        None => vec![DuplicateStatus::NoDuplicates; set.len()],
    }
}
