use std::collections::HashSet;
use std::path::Path;

use rust_xlsxwriter::Workbook;

use crate::ledger::ingest::analysis::GroupedSets;
use crate::ledger::ingest::error::Result;
use crate::ledger::ingest::model::{RecordSet, Value};

const MAX_SHEET_NAME: usize = 31;
const FORBIDDEN: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Writes every grouped record set to its own worksheet, groups in order.
pub fn write_grouped_sets(path: &Path, groups: &GroupedSets) -> Result<()> {
    write_record_sets(path, groups.values().flat_map(|categories| categories.values()))
}

/// Writes record sets as plain worksheets named after their category, with a
/// header row and an autofilter table over the data.
pub fn write_record_sets<'a>(
    path: &Path,
    sets: impl IntoIterator<Item = &'a RecordSet>,
) -> Result<()> {
    let mut workbook_writer = Workbook::new();
    let mut used_names = HashSet::new();

    for set in sets {
        let worksheet = workbook_writer.add_worksheet();
        worksheet.set_name(&sheet_name(&set.category, &mut used_names))?;

        for (col_idx, column) in set.columns().iter().enumerate() {
            worksheet.write_string(0, col_idx as u16, &column.name)?;
            for (row_idx, value) in column.values.iter().enumerate() {
                let row = (row_idx + 1) as u32;
                match value {
                    Value::Null => {}
                    Value::Float(number) => {
                        worksheet.write_number(row, col_idx as u16, *number)?;
                    }
                    other => {
                        worksheet.write_string(row, col_idx as u16, &other.render())?;
                    }
                }
            }
        }

        if !set.is_empty() && !set.columns().is_empty() {
            let mut excel_table = rust_xlsxwriter::Table::new();
            excel_table.set_autofilter(true);
            let col_end = (set.columns().len() as u16).saturating_sub(1);
            worksheet.add_table(0, 0, set.len() as u32, col_end, &excel_table)?;
        }
    }

    workbook_writer.save(path)?;
    Ok(())
}

/// Excel sheet names are capped at 31 characters, cannot contain `[]:*?/\`
/// and must be unique case-insensitively.
pub fn sheet_name(category: &str, used: &mut HashSet<String>) -> String {
    let cleaned: String = category
        .chars()
        .map(|ch| if FORBIDDEN.contains(&ch) { '_' } else { ch })
        .collect();
    let cleaned = cleaned.trim_matches('\'').trim();
    let base: String = if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned.chars().take(MAX_SHEET_NAME).collect()
    };

    let mut candidate = base.clone();
    let mut counter = 2;
    while !used.insert(candidate.to_lowercase()) {
        let suffix = format!("_{counter}");
        let room = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
        candidate = format!("{}{suffix}", base.chars().take(room).collect::<String>());
        counter += 1;
    }
    candidate
}
