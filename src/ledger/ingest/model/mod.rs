use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Category assigned to sheets that match no catalog entry.
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";
/// Statement group used for record sets that carry no group column.
pub const FALLBACK_GROUP: &str = "Other Financial Data";

pub const TRANSACTION_DATE: &str = "TRANSACTION DATE";
pub const ORIGIN_FILE: &str = "ORIGIN_FILE";
pub const ORIGIN_SHEET: &str = "ORIGIN_SHEETNAME";
pub const DATA_GROUP: &str = "DATA GROUP";
pub const CATEGORY_GROUP: &str = "CATEGORY GROUP";
pub const STATEMENT_GROUP: &str = "FINANCIAL STATEMENT GROUP";
pub const TRANSACTION_CATEGORY: &str = "TRANSACTION CATEGORY";
pub const DUPLICATE_STATUS: &str = "Duplicate Status";
pub const REFUND_STATUS: &str = "REFUND STATUS";
pub const YEAR: &str = "YEAR";
pub const MONTH: &str = "MONTH";
pub const DAY: &str = "DAY";
pub const YEAR_MONTH: &str = "YEAR-MONTH";

/// Columns attached by the engine rather than read from the source sheet.
pub const DERIVED_COLUMNS: [&str; 5] = [
    ORIGIN_FILE,
    ORIGIN_SHEET,
    DATA_GROUP,
    CATEGORY_GROUP,
    STATEMENT_GROUP,
];

/// A single untyped cell as read from a workbook or CSV file.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Plain string rendering used when a cell is treated as text.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Int(value) => value.to_string(),
            Cell::Float(value) => value.to_string(),
            Cell::Text(value) => value.clone(),
            Cell::Bool(value) => value.to_string(),
            Cell::DateTime(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Case and whitespace normalised form used for header comparison.
    pub fn token(&self) -> String {
        normalize_token(&self.to_text())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }
}

/// Upper-cases and trims a header token.
pub fn normalize_token(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// An untyped grid of cells read from one worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Builds a sheet from string cells; empty strings become [`Cell::Empty`].
    pub fn from_strings<R, C>(name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| {
                        let cell = cell.as_ref();
                        if cell.is_empty() {
                            Cell::Empty
                        } else {
                            Cell::Text(cell.to_string())
                        }
                    })
                    .collect()
            })
            .collect();
        Self::new(name, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|cells| cells.get(col))
    }
}

/// Declared type of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Float,
    Date,
    Text,
}

/// A typed cell value. Date columns may also hold [`Value::Text`] when the raw
/// value could not be resolved to a date; callers must tolerate that.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Float(f64),
    Date(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) if !value.is_nan() => Some(*value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    /// String rendering used for categorical comparison and text coercion.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Float(value) => value.to_string(),
            Value::Date(value) => {
                if value.time() == chrono::NaiveTime::MIN {
                    value.format("%Y-%m-%d").to_string()
                } else {
                    value.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
            Value::Text(value) => value.clone(),
        }
    }

    /// Hashable representation used for grouping and duplicate keys.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Float(value) if value.is_nan() => ValueKey::Null,
            Value::Float(value) => {
                let value = if *value == 0.0 { 0.0 } else { *value };
                ValueKey::Float(value.to_bits())
            }
            Value::Date(value) => ValueKey::Date(*value),
            Value::Text(value) => ValueKey::Text(value.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Null,
    Float(u64),
    Date(NaiveDateTime),
    Text(String),
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    /// Column holding the same text in every row.
    pub fn constant_text(name: impl Into<String>, value: &str, rows: usize) -> Self {
        Self::new(name, ColumnType::Text, vec![Value::text(value); rows])
    }
}

/// Columnar table bound to one category. All columns share the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    pub category: String,
    columns: Vec<Column>,
    rows: usize,
}

impl RecordSet {
    pub fn new(category: impl Into<String>, rows: usize) -> Self {
        Self {
            category: category.into(),
            columns: Vec::new(),
            rows,
        }
    }

    /// Builds a set from columns; shorter columns are padded with nulls.
    pub fn from_columns(category: impl Into<String>, columns: Vec<Column>) -> Self {
        let rows = columns.iter().map(|c| c.values.len()).max().unwrap_or(0);
        let mut set = Self::new(category, rows);
        for column in columns {
            set.put_column(column);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn values(&self, name: &str) -> Option<&[Value]> {
        self.column(name).map(|c| c.values.as_slice())
    }

    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|c| c.values.get(row))
    }

    pub fn set(&mut self, row: usize, name: &str, value: Value) {
        if let Some(slot) = self
            .column_mut(name)
            .and_then(|column| column.values.get_mut(row))
        {
            *slot = value;
        }
    }

    /// Inserts or replaces a column, resizing it to the set's row count.
    pub fn put_column(&mut self, mut column: Column) {
        column.values.resize(self.rows, Value::Null);
        match self.position(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        self.position(name).map(|idx| self.columns.remove(idx))
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        self.remove_column(to);
        if let Some(column) = self.column_mut(from) {
            column.name = to.to_string();
        }
    }

    /// Values of one row in column order.
    pub fn row(&self, row: usize) -> Vec<&Value> {
        self.columns.iter().map(|c| &c.values[row]).collect()
    }

    /// New set containing the given rows, in the given order. Indices may repeat.
    pub fn select_rows(&self, indices: &[usize]) -> RecordSet {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let values = indices.iter().map(|&i| column.values[i].clone()).collect();
                Column::new(column.name.clone(), column.kind, values)
            })
            .collect();
        RecordSet {
            category: self.category.clone(),
            columns,
            rows: indices.len(),
        }
    }

    pub fn retain_rows<F>(&self, mut keep: F) -> RecordSet
    where
        F: FnMut(usize) -> bool,
    {
        let indices: Vec<usize> = (0..self.rows).filter(|&i| keep(i)).collect();
        self.select_rows(&indices)
    }

    /// Appends the rows of `other`, aligning columns by name. Columns missing
    /// on either side are filled with nulls.
    pub fn append(&mut self, other: &RecordSet) {
        let before = self.rows;
        let total = before + other.rows;
        for column in &mut self.columns {
            match other.column(&column.name) {
                Some(theirs) => column.values.extend(theirs.values.iter().cloned()),
                None => column.values.resize(total, Value::Null),
            }
        }
        for theirs in &other.columns {
            if !self.has_column(&theirs.name) {
                let mut values = vec![Value::Null; before];
                values.extend(theirs.values.iter().cloned());
                self.columns
                    .push(Column::new(theirs.name.clone(), theirs.kind, values));
            }
        }
        self.rows = total;
    }

    /// Column name → type lookup used by the expression checker.
    pub fn schema(&self) -> HashMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.kind))
            .collect()
    }
}

#[derive(Serialize)]
struct ColumnHeader<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: ColumnType,
}

#[derive(Serialize)]
struct RecordSetView<'a> {
    category: &'a str,
    columns: Vec<ColumnHeader<'a>>,
    rows: Vec<Vec<&'a Value>>,
}

impl Serialize for RecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RecordSetView {
            category: &self.category,
            columns: self
                .columns
                .iter()
                .map(|c| ColumnHeader {
                    name: &c.name,
                    kind: c.kind,
                })
                .collect(),
            rows: (0..self.rows).map(|i| self.row(i)).collect(),
        }
        .serialize(serializer)
    }
}

/// Per-record duplicate classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DuplicateStatus {
    #[serde(rename = "NO duplicates")]
    NoDuplicates,
    #[serde(rename = "HAS duplicates")]
    HasDuplicates,
    #[serde(rename = "IS duplicate")]
    IsDuplicate,
}

impl DuplicateStatus {
    pub const ALL: [DuplicateStatus; 3] = [
        DuplicateStatus::NoDuplicates,
        DuplicateStatus::HasDuplicates,
        DuplicateStatus::IsDuplicate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DuplicateStatus::NoDuplicates => "NO duplicates",
            DuplicateStatus::HasDuplicates => "HAS duplicates",
            DuplicateStatus::IsDuplicate => "IS duplicate",
        }
    }

    /// Case-insensitive parse of a stored label.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = normalize_token(raw);
        Self::ALL
            .into_iter()
            .find(|status| status.label().to_uppercase() == upper)
    }

    /// Clean records are the ones kept for concentration analysis.
    pub fn is_clean(self) -> bool {
        !matches!(self, DuplicateStatus::IsDuplicate)
    }
}

impl fmt::Display for DuplicateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of refund matching for a single operation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    NormalSale,
    Refunded,
    RefundedMatch,
    RefundNoMatch,
}

impl RefundStatus {
    pub fn label(self) -> &'static str {
        match self {
            RefundStatus::NormalSale => "NORMAL SALE",
            RefundStatus::Refunded => "REFUNDED",
            RefundStatus::RefundedMatch => "REFUNDED MATCH",
            RefundStatus::RefundNoMatch => "REFUND NO MATCH",
        }
    }
}

/// Classification of a recoverable problem recorded on the batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnrecognizedSchema,
    SheetProcessing,
    JoinKeyMissing,
    FileRead,
    FileRejected,
    Timeout,
    Cancelled,
}

/// A recoverable problem contained at file, sheet or transform level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub file: String,
    pub sheet: Option<String>,
    pub category: Option<String>,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: file.into(),
            sheet: None,
            category: None,
            message: message.into(),
        }
    }

    pub fn on_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn for_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}
