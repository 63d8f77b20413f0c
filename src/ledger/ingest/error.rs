use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error type covering the failures that can occur while the engine loads its
/// catalog, reads uploaded files, or emits reports.
///
/// Per-sheet problems (unrecognized layouts, failed transforms, timeouts) are
/// not errors: they are recorded as [`Issue`](crate::model::Issue)s on the batch
/// report so that one bad sheet never aborts its siblings.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the spreadsheet reader.
    #[error("workbook read error: {0}")]
    WorkbookRead(#[from] calamine::Error),

    /// Errors bubbled up from the CSV reader.
    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// The catalog source is unreachable or malformed. Fatal: nothing can be
    /// categorised without it.
    #[error("catalog load failure: {0}")]
    CatalogLoad(String),

    /// Raised when a derived-column expression fails to parse or type-check.
    #[error("expression error in '{source_text}': {message}")]
    Expression {
        source_text: String,
        message: String,
    },

    /// Raised when a category transform cannot run against the record set it
    /// was given, typically because a required column is absent.
    #[error("transform '{name}' failed: {message}")]
    Transform { name: String, message: String },

    /// Raised when a comparison references a missing or mistyped field.
    #[error("comparison error: {0}")]
    Comparison(String),

    /// Raised when a file has an extension the engine cannot read.
    #[error("unsupported input file: {0}")]
    UnsupportedInput(PathBuf),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when a batch exceeds the configured upload limits.
    #[error("batch rejected: {0}")]
    BatchLimit(String),

    /// Raised when the worker pool for a batch cannot be started.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl IngestError {
    pub(crate) fn catalog(message: impl Into<String>) -> Self {
        IngestError::CatalogLoad(message.into())
    }

    pub(crate) fn transform(name: &str, message: impl Into<String>) -> Self {
        IngestError::Transform {
            name: name.to_string(),
            message: message.into(),
        }
    }
}
