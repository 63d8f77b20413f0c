use std::path::Path;

use crate::ledger::ingest::error::Result;
use crate::ledger::ingest::model::{Cell, RawSheet};

/// Reads a CSV file as a single sheet named after the file stem. Every cell
/// stays text; typing happens during normalization like any other sheet.
pub fn read_csv(path: &Path) -> Result<RawSheet> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Sheet1")
        .to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(RawSheet::new(name, rows))
}
