use std::path::Path;

use calamine::{DataType, Range, Reader, open_workbook_auto};
use tracing::debug;

use crate::ledger::ingest::error::Result;
use crate::ledger::ingest::io::SheetRead;
use crate::ledger::ingest::model::{Cell, RawSheet};
use crate::ledger::ingest::normalize::dates::serial_to_datetime;

/// Reads every worksheet of a workbook into untyped grids, in workbook order.
pub fn read_workbook(path: &Path) -> Result<Vec<SheetRead>> {
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names().to_vec();

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let sheet = match workbook.worksheet_range(&name) {
            Some(Ok(range)) => Ok(range_to_sheet(&name, &range)),
            Some(Err(error)) => Err(error.into()),
            None => Ok(RawSheet::new(name.clone(), Vec::new())),
        };
        if let Ok(sheet) = &sheet {
            debug!(sheet = %name, rows = sheet.len(), "read worksheet");
        }
        sheets.push((name, sheet));
    }
    Ok(sheets)
}

/// Converts a calamine range, padding the leading rows and columns the range
/// skipped so that positions match the sheet.
pub fn range_to_sheet(name: &str, range: &Range<DataType>) -> RawSheet {
    let (row_offset, col_offset) = range
        .start()
        .map(|(row, col)| (row as usize, col as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col_offset];
        cells.extend(row.iter().map(to_cell));
        rows.push(cells);
    }
    RawSheet::new(name, rows)
}

fn to_cell(cell: &DataType) -> Cell {
    match cell {
        DataType::Empty => Cell::Empty,
        DataType::Int(value) => Cell::Int(*value),
        DataType::Float(value) => Cell::Float(*value),
        DataType::String(value) => Cell::Text(value.clone()),
        DataType::Bool(value) => Cell::Bool(*value),
        DataType::DateTime(serial) => match serial_to_datetime(*serial) {
            Some(date) => Cell::DateTime(date),
            None => Cell::Float(*serial),
        },
        DataType::Error(_) => Cell::Empty,
        other => Cell::Text(other.to_string()),
    }
}
