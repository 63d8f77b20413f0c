//! Header-row recognition.
//!
//! The leading rows of a sheet are scanned for a row whose tokens line up with
//! a catalog entry's source headers. An exact set match anywhere in the scan
//! window beats a subset match, so a later, precise header row wins over an
//! earlier row that merely contains the headers among other text.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::ledger::ingest::catalog::{Catalog, CatalogEntry};
use crate::ledger::ingest::model::{Cell, RawSheet, UNKNOWN_CATEGORY};

/// Rows inspected when no explicit limit is configured.
pub const DEFAULT_MAX_SCAN_ROWS: usize = 25;

/// Classification of one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaMatch {
    pub category: String,
    pub header_row: usize,
    /// Column indices of the header row whose token belongs to the entry's
    /// header set, in row order.
    pub positions: Vec<usize>,
}

impl SchemaMatch {
    pub fn unknown() -> Self {
        Self {
            category: UNKNOWN_CATEGORY.to_string(),
            header_row: 0,
            positions: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.category == UNKNOWN_CATEGORY
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaMatcher<'a> {
    catalog: &'a Catalog,
    max_scan_rows: usize,
}

impl<'a> SchemaMatcher<'a> {
    pub fn new(catalog: &'a Catalog, max_scan_rows: usize) -> Self {
        Self {
            catalog,
            max_scan_rows,
        }
    }

    pub fn match_sheet(&self, sheet: &RawSheet) -> SchemaMatch {
        let limit = sheet.len().min(self.max_scan_rows);
        let rows: Vec<HashSet<String>> = sheet.rows[..limit].iter().map(|row| row_tokens(row)).collect();
        let candidates: Vec<&CatalogEntry> = self
            .catalog
            .entries()
            .iter()
            .filter(|entry| !entry.header_tokens().is_empty())
            .collect();

        let exact = rows.iter().enumerate().find_map(|(row_idx, tokens)| {
            candidates
                .iter()
                .find(|entry| entry.header_tokens() == tokens)
                .map(|entry| (row_idx, *entry))
        });
        let found = exact.or_else(|| {
            rows.iter().enumerate().find_map(|(row_idx, tokens)| {
                candidates
                    .iter()
                    .find(|entry| entry.header_tokens().is_subset(tokens))
                    .map(|entry| (row_idx, *entry))
            })
        });

        match found {
            Some((header_row, entry)) => {
                let positions = sheet.rows[header_row]
                    .iter()
                    .enumerate()
                    .filter(|(_, cell)| entry.header_tokens().contains(&cell.token()))
                    .map(|(idx, _)| idx)
                    .collect();
                debug!(
                    sheet = %sheet.name,
                    category = %entry.id,
                    header_row,
                    exact = exact.is_some(),
                    "sheet classified"
                );
                SchemaMatch {
                    category: entry.id.clone(),
                    header_row,
                    positions,
                }
            }
            None => {
                debug!(sheet = %sheet.name, scanned = limit, "no catalog entry matched");
                SchemaMatch::unknown()
            }
        }
    }
}

fn row_tokens(row: &[Cell]) -> HashSet<String> {
    row.iter()
        .map(|cell| cell.token())
        .filter(|token| !token.is_empty())
        .collect()
}
