//! Column mapping and type coercion.
//!
//! [`ColumnMapper::map_columns`] renames the matched columns of a raw sheet to
//! their canonical names and attaches provenance and group columns. A sheet
//! may stack several tables under repeated copies of its header row; those
//! rows only separate blocks and never become records.
//! [`ColumnMapper::coerce`] then types every column according to the catalog.
//! Neither step raises on bad data: unparsable numbers become null and
//! unparsable dates pass through as text.

pub mod dates;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::ledger::ingest::catalog::{Catalog, CatalogEntry};
use crate::ledger::ingest::matcher::SchemaMatch;
use crate::ledger::ingest::model::{
    CATEGORY_GROUP, Cell, Column, ColumnType, DATA_GROUP, DERIVED_COLUMNS, ORIGIN_FILE,
    ORIGIN_SHEET, RawSheet, RecordSet, STATEMENT_GROUP, Value,
};

#[derive(Debug, Clone, Copy)]
pub struct ColumnMapper<'a> {
    catalog: &'a Catalog,
}

impl<'a> ColumnMapper<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Renames and types a classified sheet in one go.
    pub fn normalize(
        &self,
        sheet: &RawSheet,
        entry: &CatalogEntry,
        schema_match: &SchemaMatch,
        origin_file: &str,
    ) -> RecordSet {
        self.coerce(self.map_columns(sheet, entry, schema_match, origin_file))
    }

    /// Positional rename. The columns of the returned set are still untyped:
    /// values keep the variant read from the cell until [`Self::coerce`] runs.
    pub fn map_columns(
        &self,
        sheet: &RawSheet,
        entry: &CatalogEntry,
        schema_match: &SchemaMatch,
        origin_file: &str,
    ) -> RecordSet {
        let header_tokens = entry.header_tokens();
        let mut blocks = 1;
        let data: Vec<&Vec<Cell>> = sheet
            .rows
            .iter()
            .skip(schema_match.header_row + 1)
            .filter(|row| !row.iter().all(Cell::is_empty))
            .filter(|row| {
                let repeated = is_header_row(row, header_tokens);
                blocks += usize::from(repeated);
                !repeated
            })
            .collect();
        if blocks > 1 {
            debug!(sheet = %sheet.name, category = %entry.id, blocks, "sheet holds several tables");
        }

        let positions = column_positions(entry.output_headers().len(), &schema_match.positions);
        let columns = entry
            .output_headers()
            .iter()
            .zip(positions)
            .map(|(name, position)| {
                let values = data
                    .iter()
                    .map(|row| row.get(position).map_or(Value::Null, raw_value))
                    .collect();
                Column::new(name.clone(), ColumnType::Text, values)
            })
            .collect();

        let mut set = RecordSet::from_columns(entry.id.clone(), columns);
        if set.columns().is_empty() {
            set = RecordSet::new(entry.id.clone(), data.len());
        }
        attach_provenance(&mut set, origin_file, &sheet.name);
        attach_group_columns(&mut set, entry);
        trace!(category = %entry.id, rows = set.len(), "columns mapped");
        set
    }

    /// Types every column by its declared catalog type. Provenance and group
    /// columns stay text.
    pub fn coerce(&self, mut set: RecordSet) -> RecordSet {
        let resolver = self.catalog.date_resolver();
        let names: Vec<String> = set.column_names().iter().map(|s| s.to_string()).collect();
        for name in names {
            let kind = if DERIVED_COLUMNS.contains(&name.as_str()) {
                ColumnType::Text
            } else {
                self.catalog.field_type(&name)
            };
            if let Some(column) = set.column_mut(&name) {
                column.kind = kind;
                for value in &mut column.values {
                    *value = match kind {
                        ColumnType::Float => to_float(value),
                        ColumnType::Date => resolver.resolve_value(value),
                        ColumnType::Text => to_text(value),
                    };
                }
            }
        }
        set
    }

    /// Re-applies group columns and coercion to a set that already carries
    /// canonical names. Running it on its own output changes nothing.
    pub fn renormalize(&self, mut set: RecordSet, entry: &CatalogEntry) -> RecordSet {
        attach_group_columns(&mut set, entry);
        self.coerce(set)
    }
}

/// Source column index for every output header: matched positions first, then
/// the columns immediately after the last matched one.
fn column_positions(headers: usize, matched: &[usize]) -> Vec<usize> {
    let last = matched.last().copied();
    (0..headers)
        .map(|i| match matched.get(i) {
            Some(&position) => position,
            None => match last {
                Some(last) => last + (i - matched.len()) + 1,
                None => i,
            },
        })
        .collect()
}

/// A row carrying every header token of the entry, as the header row does.
fn is_header_row(row: &[Cell], header_tokens: &HashSet<String>) -> bool {
    if header_tokens.is_empty() {
        return false;
    }
    let tokens: HashSet<String> = row.iter().map(Cell::token).collect();
    header_tokens.is_subset(&tokens)
}

/// Writes ORIGIN_FILE and ORIGIN_SHEETNAME on every row.
pub fn attach_provenance(set: &mut RecordSet, origin_file: &str, origin_sheet: &str) {
    let rows = set.len();
    set.put_column(Column::constant_text(ORIGIN_FILE, origin_file, rows));
    set.put_column(Column::constant_text(ORIGIN_SHEET, origin_sheet, rows));
}

/// Writes the catalog's data, category and statement groups for the entry.
/// Groups the entry does not declare are left off the set.
pub fn attach_group_columns(set: &mut RecordSet, entry: &CatalogEntry) {
    let rows = set.len();
    for (name, value) in [
        (DATA_GROUP, &entry.data_group),
        (CATEGORY_GROUP, &entry.category_group),
        (STATEMENT_GROUP, &entry.statement_group),
    ] {
        if let Some(value) = value {
            set.put_column(Column::constant_text(name, value, rows));
        }
    }
}

fn raw_value(cell: &Cell) -> Value {
    match cell {
        Cell::Empty => Value::Null,
        Cell::Int(value) => Value::Float(*value as f64),
        Cell::Float(value) => Value::Float(*value),
        Cell::DateTime(value) => Value::Date(*value),
        Cell::Bool(value) => Value::Text(value.to_string()),
        Cell::Text(value) => {
            let cleaned = clean_text(value);
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Text(cleaned)
            }
        }
    }
}

/// Trims and replaces characters spreadsheets cannot store: backspace becomes
/// `<|>` and non-breaking spaces are removed.
pub fn clean_text(raw: &str) -> String {
    raw.replace('\u{8}', "<|>")
        .replace('\u{a0}', "")
        .trim()
        .to_string()
}

/// Parses a decimal after removing thousands separators, quotes and
/// whitespace. Anything else becomes null.
pub fn parse_float(raw: &str) -> Option<f64> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '\'') && !c.is_whitespace())
        .collect();
    if stripped.is_empty() {
        return None;
    }
    stripped.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn to_float(value: &Value) -> Value {
    match value {
        Value::Float(number) if number.is_finite() => Value::Float(*number),
        Value::Text(text) => parse_float(text).map_or(Value::Null, Value::Float),
        _ => Value::Null,
    }
}

fn to_text(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Text(text) => {
            let cleaned = clean_text(text);
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Text(cleaned)
            }
        }
        other => Value::Text(other.render()),
    }
}

