pub mod csv_read;
pub mod excel_read;
pub mod excel_write;

use std::path::Path;

use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::RawSheet;

/// Extensions read through the spreadsheet reader.
pub const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// One sheet of a source file, or the reason it could not be read.
pub type SheetRead = (String, Result<RawSheet>);

pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| ext == "csv" || WORKBOOK_EXTENSIONS.contains(&ext.as_str()))
}

/// Reads every sheet of a workbook, or the single pseudo-sheet of a CSV file.
/// A sheet that fails to parse is reported in place so its siblings are still
/// processed.
pub fn read_source(path: &Path) -> Result<Vec<SheetRead>> {
    match extension(path).as_deref() {
        Some("csv") => {
            let sheet = csv_read::read_csv(path)?;
            Ok(vec![(sheet.name.clone(), Ok(sheet))])
        }
        Some(ext) if WORKBOOK_EXTENSIONS.contains(&ext) => excel_read::read_workbook(path),
        _ => Err(IngestError::UnsupportedInput(path.to_path_buf())),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}
