//! Batch orchestration.
//!
//! An [`Engine`] takes a batch of uploaded files through classification,
//! column mapping, the category transforms and, once every file is done,
//! grouping and analysis. Files are normalized in parallel on a bounded rayon
//! pool; output order always follows input order. Problems confined to one
//! file or sheet become [`Issue`]s on the report instead of errors; a sheet
//! that panics is reported as failed and its siblings carry on.
//!
//! The per-file deadline is checked before every sheet after the first and
//! between transform stages of those sheets, so each file gets at least its
//! first sheet processed. Cancellation is checked at every one of those
//! points, including the first sheet.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::ledger::ingest::analysis::compare::{self, CategoryComparison, ComparisonFilter};
use crate::ledger::ingest::analysis::{AggregationEngine, DateSpan, GroupAnalysis, GroupedSets};
use crate::ledger::ingest::catalog::Catalog;
use crate::ledger::ingest::config::EngineConfig;
use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::io::{self, SheetRead};
use crate::ledger::ingest::matcher::{SchemaMatch, SchemaMatcher};
use crate::ledger::ingest::model::{
    Issue, IssueKind, RawSheet, RecordSet, TRANSACTION_DATE, UNKNOWN_CATEGORY, Value,
};
use crate::ledger::ingest::normalize::ColumnMapper;
use crate::ledger::ingest::normalize::dates::is_valid_transaction_date;
use crate::ledger::ingest::postprocess::{Stage, TransformContext, run_stage};

/// A file already read into sheets.
#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub sheets: Vec<SheetRead>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, sheets: Vec<RawSheet>) -> Self {
        Self {
            name: name.into(),
            sheets: sheets
                .into_iter()
                .map(|sheet| (sheet.name.clone(), Ok(sheet)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStatus {
    Processed,
    Unrecognized,
    Failed,
    TimedOut,
    Cancelled,
}

/// Upload metadata for one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetOutcome {
    pub file: String,
    pub sheet: String,
    pub category: String,
    pub header_row: Option<usize>,
    pub records: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub status: SheetStatus,
}

impl SheetOutcome {
    fn new(file: &str, sheet: &str, status: SheetStatus) -> Self {
        Self {
            file: file.to_string(),
            sheet: sheet.to_string(),
            category: UNKNOWN_CATEGORY.to_string(),
            header_row: None,
            records: 0,
            min_date: None,
            max_date: None,
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub files: usize,
    pub sheets: usize,
    pub processed_sheets: usize,
    pub unrecognized_sheets: usize,
    pub failed_sheets: usize,
    pub timed_out_sheets: usize,
    pub cancelled_sheets: usize,
    pub records: usize,
    pub categories: usize,
}

impl BatchSummary {
    fn of(files: usize, sheets: &[SheetOutcome], groups: &GroupedSets) -> Self {
        let count = |status: SheetStatus| sheets.iter().filter(|s| s.status == status).count();
        Self {
            files,
            sheets: sheets.len(),
            processed_sheets: count(SheetStatus::Processed),
            unrecognized_sheets: count(SheetStatus::Unrecognized),
            failed_sheets: count(SheetStatus::Failed),
            timed_out_sheets: count(SheetStatus::TimedOut),
            cancelled_sheets: count(SheetStatus::Cancelled),
            records: groups
                .values()
                .flat_map(|categories| categories.values())
                .map(RecordSet::len)
                .sum(),
            categories: groups.values().map(BTreeMap::len).sum(),
        }
    }
}

/// Everything a batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub groups: GroupedSets,
    pub analyses: BTreeMap<String, GroupAnalysis>,
    pub comparisons: Vec<CategoryComparison>,
    pub sheets: Vec<SheetOutcome>,
    pub issues: Vec<Issue>,
    pub summary: BatchSummary,
}

/// Batch-wide cancellation flag, checked between sheets and transform stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Classification of one sheet, as reported by [`Engine::classify`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetMatch {
    pub file: String,
    pub sheet: String,
    #[serde(flatten)]
    pub schema: SchemaMatch,
}

#[derive(Debug, Default)]
struct FileResult {
    sets: Vec<RecordSet>,
    sheets: Vec<SheetOutcome>,
    issues: Vec<Issue>,
}

/// Why processing of a file stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

impl Interrupt {
    fn status(self) -> SheetStatus {
        match self {
            Interrupt::Timeout => SheetStatus::TimedOut,
            Interrupt::Cancelled => SheetStatus::Cancelled,
        }
    }

    fn issue(self, file: &str, sheet: &str) -> Issue {
        let (kind, message) = match self {
            Interrupt::Timeout => (IssueKind::Timeout, "file processing deadline exceeded"),
            Interrupt::Cancelled => (IssueKind::Cancelled, "batch was cancelled"),
        };
        Issue::new(kind, file, message).on_sheet(sheet)
    }
}

enum SheetResult {
    Done {
        sets: Vec<RecordSet>,
        outcome: SheetOutcome,
        issues: Vec<Issue>,
    },
    Interrupted(Interrupt),
}

pub struct Engine {
    catalog: Arc<Catalog>,
    config: EngineConfig,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self {
            catalog,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle that stops the batch at its next checkpoint.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Reports the category and header row of every sheet in a file, without
    /// normalizing anything.
    pub fn classify(&self, path: &Path) -> Result<Vec<SheetMatch>> {
        let file = display_name(path);
        let matcher = SchemaMatcher::new(&self.catalog, self.config.max_scan_rows);
        let mut matches = Vec::new();
        for (sheet_name, sheet) in io::read_source(path)? {
            match sheet {
                Ok(sheet) => matches.push(SheetMatch {
                    file: file.clone(),
                    sheet: sheet_name,
                    schema: matcher.match_sheet(&sheet),
                }),
                Err(error) => warn!(file = %file, sheet = %sheet_name, %error, "sheet unreadable"),
            }
        }
        Ok(matches)
    }

    /// Reads and processes a batch of files.
    #[instrument(level = "info", skip_all, fields(files = paths.len()))]
    pub fn process_files(&self, paths: &[PathBuf]) -> Result<BatchReport> {
        self.check_batch_size(paths.len())?;
        let pool = self.pool()?;
        let results: Vec<FileResult> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| self.process_path(path))
                .collect()
        });
        self.finish(paths.len(), results)
    }

    /// Processes files that were already read into sheets.
    #[instrument(level = "info", skip_all, fields(files = sources.len()))]
    pub fn process_sources(&self, sources: Vec<SourceFile>) -> Result<BatchReport> {
        self.check_batch_size(sources.len())?;
        let pool = self.pool()?;
        let files = sources.len();
        let results: Vec<FileResult> = pool.install(|| {
            sources
                .into_par_iter()
                .map(|source| self.process_source(source, Instant::now()))
                .collect()
        });
        self.finish(files, results)
    }

    /// Compares two categories of a processed batch, using the catalog's
    /// comparison rules for the pair when it has any. Only rows admitted by
    /// `filter` take part.
    pub fn compare(
        &self,
        groups: &GroupedSets,
        a: &str,
        b: &str,
        filter: &ComparisonFilter,
    ) -> Result<CategoryComparison> {
        let find = |category: &str| {
            groups
                .values()
                .find_map(|categories| categories.get(category))
                .ok_or_else(|| {
                    IngestError::Comparison(format!(
                        "category '{category}' has no records in this batch"
                    ))
                })
        };
        let set_a = find(a)?;
        let set_b = find(b)?;
        let (pairs, aggregations) = compare::comparison_plan(&self.catalog, set_a, set_b);
        compare::compare_filtered(set_a, set_b, &pairs, &aggregations, filter)
    }

    fn check_batch_size(&self, files: usize) -> Result<()> {
        if files > self.config.max_files_per_batch {
            return Err(IngestError::BatchLimit(format!(
                "{files} files submitted, at most {} allowed per batch",
                self.config.max_files_per_batch
            )));
        }
        Ok(())
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()?)
    }

    fn finish(&self, files: usize, results: Vec<FileResult>) -> Result<BatchReport> {
        let mut sets = Vec::new();
        let mut sheets = Vec::new();
        let mut issues = Vec::new();
        for result in results {
            sets.extend(result.sets);
            sheets.extend(result.sheets);
            issues.extend(result.issues);
        }

        let engine = AggregationEngine::new(&self.catalog, self.config.top_n.clone());
        let (groups, analyses) = engine.run(sets);
        let summary = BatchSummary::of(files, &sheets, &groups);
        info!(
            processed = summary.processed_sheets,
            unrecognized = summary.unrecognized_sheets,
            failed = summary.failed_sheets,
            records = summary.records,
            "batch processed"
        );
        Ok(BatchReport {
            batch_id: Uuid::new_v4(),
            groups,
            analyses,
            comparisons: Vec::new(),
            sheets,
            issues,
            summary,
        })
    }

    fn process_path(&self, path: &Path) -> FileResult {
        let started = Instant::now();
        let file = display_name(path);
        let rejected = |kind: IssueKind, message: String| FileResult {
            issues: vec![Issue::new(kind, file.clone(), message)],
            ..FileResult::default()
        };

        let size = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(error) => return rejected(IssueKind::FileRead, error.to_string()),
        };
        if size > self.config.max_file_size_bytes() {
            return rejected(
                IssueKind::FileRejected,
                format!(
                    "file is {size} bytes, larger than the {} MB limit",
                    self.config.max_file_size_mb
                ),
            );
        }
        match io::read_source(path) {
            Ok(sheets) => self.process_source(SourceFile { name: file, sheets }, started),
            Err(error) => rejected(IssueKind::FileRead, error.to_string()),
        }
    }

    #[instrument(level = "debug", skip_all, fields(file = %source.name))]
    fn process_source(&self, source: SourceFile, started: Instant) -> FileResult {
        let mut result = FileResult::default();
        let mut interrupted = None;

        for (index, (sheet_name, sheet)) in source.sheets.into_iter().enumerate() {
            let deadline = index > 0;
            if interrupted.is_none() {
                interrupted = self.interrupt(started, deadline);
            }
            if let Some(interrupt) = interrupted {
                result
                    .sheets
                    .push(SheetOutcome::new(&source.name, &sheet_name, interrupt.status()));
                result.issues.push(interrupt.issue(&source.name, &sheet_name));
                continue;
            }

            let sheet = match sheet {
                Ok(sheet) => sheet,
                Err(error) => {
                    result
                        .sheets
                        .push(SheetOutcome::new(&source.name, &sheet_name, SheetStatus::Failed));
                    result.issues.push(
                        Issue::new(IssueKind::SheetProcessing, &source.name, error.to_string())
                            .on_sheet(&sheet_name),
                    );
                    continue;
                }
            };

            let processed = isolate(&source.name, &sheet_name, || {
                self.process_sheet(&source.name, &sheet, started, deadline)
            });
            match processed {
                SheetResult::Done {
                    sets,
                    outcome,
                    issues,
                } => {
                    result.sets.extend(sets);
                    result.sheets.push(outcome);
                    result.issues.extend(issues);
                }
                SheetResult::Interrupted(interrupt) => {
                    interrupted = Some(interrupt);
                    result
                        .sheets
                        .push(SheetOutcome::new(&source.name, &sheet_name, interrupt.status()));
                    result.issues.push(interrupt.issue(&source.name, &sheet_name));
                }
            }
        }

        debug!(
            sheets = result.sheets.len(),
            records = result.sets.iter().map(RecordSet::len).sum::<usize>(),
            "file processed"
        );
        result
    }

    fn process_sheet(
        &self,
        file: &str,
        sheet: &RawSheet,
        started: Instant,
        deadline: bool,
    ) -> SheetResult {
        let matcher = SchemaMatcher::new(&self.catalog, self.config.max_scan_rows);
        let schema = matcher.match_sheet(sheet);
        let mut outcome = SheetOutcome::new(file, &sheet.name, SheetStatus::Processed);

        let Some(entry) = self
            .catalog
            .entry(&schema.category)
            .filter(|_| !schema.is_unknown())
        else {
            debug!(sheet = %sheet.name, "no catalog entry matches");
            outcome.status = SheetStatus::Unrecognized;
            outcome.header_row = Some(schema.header_row);
            return SheetResult::Done {
                sets: Vec::new(),
                outcome,
                issues: vec![
                    Issue::new(
                        IssueKind::UnrecognizedSchema,
                        file,
                        "no catalog entry matches the sheet headers",
                    )
                    .on_sheet(&sheet.name),
                ],
            };
        };
        outcome.category = entry.id.clone();
        outcome.header_row = Some(schema.header_row);

        let fail = |mut outcome: SheetOutcome, error: IngestError| {
            warn!(sheet = %sheet.name, category = %entry.id, %error, "sheet processing failed");
            outcome.status = SheetStatus::Failed;
            SheetResult::Done {
                sets: Vec::new(),
                outcome,
                issues: vec![
                    Issue::new(IssueKind::SheetProcessing, file, error.to_string())
                        .on_sheet(&sheet.name)
                        .for_category(&entry.id),
                ],
            }
        };

        let mapper = ColumnMapper::new(&self.catalog);
        let ctx = TransformContext {
            catalog: &self.catalog,
        };
        let mapped = mapper.map_columns(sheet, entry, &schema, file);

        if let Some(interrupt) = self.interrupt(started, deadline) {
            return SheetResult::Interrupted(interrupt);
        }
        let raw = match run_stage(mapped, entry, Stage::Raw, &ctx) {
            Ok(raw) => raw,
            Err(error) => return fail(outcome, error),
        };
        let mut warnings = raw.warnings;

        let mut sets = Vec::with_capacity(raw.sets.len());
        for set in raw.sets {
            if let Some(interrupt) = self.interrupt(started, deadline) {
                return SheetResult::Interrupted(interrupt);
            }
            let typed = mapper.coerce(set);
            let Some(owner) = self.catalog.entry(&typed.category) else {
                sets.push(typed);
                continue;
            };
            match run_stage(typed, owner, Stage::Typed, &ctx) {
                Ok(done) => {
                    sets.extend(done.sets);
                    warnings.extend(done.warnings);
                }
                Err(error) => return fail(outcome, error),
            }
        }

        let issues = warnings
            .into_iter()
            .map(|warning| {
                Issue::new(warning.kind, file, warning.message)
                    .on_sheet(&sheet.name)
                    .for_category(&entry.id)
            })
            .collect();

        let span = sets
            .iter()
            .map(|set| {
                DateSpan::of(
                    set.values(TRANSACTION_DATE)
                        .unwrap_or_default()
                        .iter()
                        .filter(|value: &&Value| is_valid_transaction_date(value)),
                )
            })
            .fold(DateSpan::default(), DateSpan::merge);
        outcome.records = sets.iter().map(RecordSet::len).sum();
        outcome.min_date = span.from;
        outcome.max_date = span.to;
        debug!(
            sheet = %sheet.name,
            category = %entry.id,
            header_row = schema.header_row,
            records = outcome.records,
            "sheet normalized"
        );
        SheetResult::Done {
            sets,
            outcome,
            issues,
        }
    }

    fn interrupt(&self, started: Instant, deadline: bool) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if deadline && started.elapsed() >= self.config.file_timeout() {
            Some(Interrupt::Timeout)
        } else {
            None
        }
    }
}

/// Runs one sheet's work, turning a panic into a failed sheet.
fn isolate<F>(file: &str, sheet: &str, work: F) -> SheetResult
where
    F: FnOnce() -> SheetResult,
{
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(file = %file, sheet = %sheet, %message, "sheet processing panicked");
        SheetResult::Done {
            sets: Vec::new(),
            outcome: SheetOutcome::new(file, sheet, SheetStatus::Failed),
            issues: vec![
                Issue::new(
                    IssueKind::SheetProcessing,
                    file,
                    format!("sheet processing panicked: {message}"),
                )
                .on_sheet(sheet),
            ],
        }
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_panicking_sheet_becomes_a_failed_outcome() {
        let result = isolate("upload.xlsx", "Broken", || panic!("row 7 out of range"));
        let SheetResult::Done {
            sets,
            outcome,
            issues,
        } = result
        else {
            panic!("a panic must not interrupt the file");
        };
        assert!(sets.is_empty());
        assert_eq!(outcome.status, SheetStatus::Failed);
        assert_eq!(outcome.sheet, "Broken");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::SheetProcessing);
        assert_eq!(issues[0].sheet.as_deref(), Some("Broken"));
        assert!(issues[0].message.contains("row 7 out of range"));
    }

    #[test]
    fn formatted_panic_messages_are_kept() {
        let row = 12;
        let SheetResult::Done { issues, .. } =
            isolate("upload.xlsx", "Broken", || panic!("bad row {row}"))
        else {
            panic!("a panic must not interrupt the file");
        };
        assert!(issues[0].message.ends_with("bad row 12"));
    }
}
