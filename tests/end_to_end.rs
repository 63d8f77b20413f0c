mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use calamine::{Reader, open_workbook_auto};
use chrono::NaiveDate;
use common::{LEGACY_SALES, PURCHASES, catalog, legacy_header_row, number, sheet, text, write_workbook};
use ledger_ingest::IngestError;
use ledger_ingest::analysis::compare::{ComparisonFilter, ComparisonResult};
use ledger_ingest::config::EngineConfig;
use ledger_ingest::io::excel_write::write_grouped_sets;
use ledger_ingest::model::{DUPLICATE_STATUS, IssueKind, TRANSACTION_DATE, Value};
use ledger_ingest::pipeline::{Engine, SheetStatus, SourceFile};
use tempfile::tempdir;

fn engine_with(config: EngineConfig) -> Engine {
    Engine::new(Arc::new(catalog()), config)
}

fn engine() -> Engine {
    engine_with(EngineConfig {
        workers: 2,
        ..EngineConfig::default()
    })
}

fn write_sales_export(path: &Path) {
    write_workbook(
        path,
        &[
            (
                "Sales",
                vec![
                    vec![text("EBM sales export")],
                    vec![],
                    legacy_header_row(),
                    vec![
                        text("INV-1"),
                        text("SDC-1"),
                        text("100200300"),
                        text("Acme"),
                        text("05/03/2024"),
                        number(-250.0),
                        number(2.0),
                        text("1,234.50"),
                    ],
                    vec![
                        text("INV-2"),
                        text("SDC-1"),
                        text("100200301"),
                        text("Beta"),
                        text("06/03/2024"),
                        number(10.0),
                        number(1.0),
                        number(10.0),
                    ],
                    vec![
                        text("INV-1"),
                        text("SDC-1"),
                        text("100200300"),
                        text("Acme"),
                        text("07/03/2024"),
                        number(5.0),
                        number(1.0),
                        number(5.0),
                    ],
                ],
            ),
            ("Notes", vec![vec![text("prepared by finance")]]),
        ],
    );
}

fn write_purchases_csv(path: &Path) {
    std::fs::write(
        path,
        "Supplier Name,Supplier Tin,Invoice Date,Amount\n\
         Acme,100200300,01/03/2024,400\n\
         Delta,100200999,02/03/2024,\"1,000.00\"\n",
    )
    .unwrap();
}

fn day(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

#[test]
fn workbook_batch_is_classified_normalized_and_grouped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.xlsx");
    write_sales_export(&path);

    let report = engine().process_files(&[path]).unwrap();

    assert_eq!(report.summary.files, 1);
    assert_eq!(report.summary.sheets, 2);
    assert_eq!(report.summary.processed_sheets, 1);
    assert_eq!(report.summary.unrecognized_sheets, 1);
    assert_eq!(report.summary.records, 3);

    let sales = &report.sheets[0];
    assert_eq!(sales.file, "sales.xlsx");
    assert_eq!(sales.category, LEGACY_SALES);
    assert_eq!(sales.header_row, Some(2));
    assert_eq!(sales.records, 3);
    assert_eq!(sales.min_date, day(2024, 3, 5));
    assert_eq!(sales.max_date, day(2024, 3, 7));
    assert_eq!(report.sheets[1].status, SheetStatus::Unrecognized);
    assert_eq!(report.sheets[1].header_row, Some(0));

    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, IssueKind::UnrecognizedSchema);
    assert_eq!(report.issues[0].sheet.as_deref(), Some("Notes"));

    let set = &report.groups["SALES"][LEGACY_SALES];
    assert_eq!(set.get(0, "TOTAL AMOUNT"), Some(&Value::Float(1234.5)));
    assert_eq!(set.get(0, "UNIT PRICE"), Some(&Value::Float(250.0)));
    assert_eq!(set.get(0, "QUANTITY"), Some(&Value::Float(-2.0)));
    assert!(matches!(set.get(2, TRANSACTION_DATE), Some(Value::Date(_))));

    let statuses: Vec<String> = set
        .values(DUPLICATE_STATUS)
        .unwrap()
        .iter()
        .map(Value::render)
        .collect();
    assert_eq!(statuses, vec!["HAS duplicates", "NO duplicates", "IS duplicate"]);

    let analysis = &report.analyses["SALES"];
    assert_eq!(analysis.categories[LEGACY_SALES].duplicate_summary.is_duplicate, 1);
}

#[test]
fn csv_sources_are_processed_alongside_workbooks() {
    let dir = tempdir().unwrap();
    let sales = dir.path().join("sales.xlsx");
    let purchases = dir.path().join("purchases.csv");
    write_sales_export(&sales);
    write_purchases_csv(&purchases);

    let engine = engine();
    let report = engine.process_files(&[sales, purchases]).unwrap();

    assert_eq!(report.summary.files, 2);
    let bought = &report.groups["COGS-EXPENSES"][PURCHASES];
    assert_eq!(bought.len(), 2);
    assert_eq!(bought.get(1, "AMOUNT"), Some(&Value::Float(1000.0)));
    let csv_sheet = report
        .sheets
        .iter()
        .find(|outcome| outcome.file == "purchases.csv")
        .unwrap();
    assert_eq!(csv_sheet.sheet, "purchases");
    assert_eq!(csv_sheet.category, PURCHASES);

    let comparison = engine
        .compare(&report.groups, LEGACY_SALES, PURCHASES, &ComparisonFilter::default())
        .unwrap();
    assert_eq!(comparison.results.len(), 1);
    assert!(matches!(
        &comparison.results[0],
        ComparisonResult::Categorical { field_a, .. } if field_a == TRANSACTION_DATE
    ));

    let missing = engine
        .compare(&report.groups, LEGACY_SALES, "PAYROLL", &ComparisonFilter::default())
        .unwrap_err();
    assert!(matches!(missing, IngestError::Comparison(_)));
}

#[test]
fn classify_reports_each_sheet() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.xlsx");
    write_sales_export(&path);

    let matches = engine().classify(&path).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].sheet, "Sales");
    assert_eq!(matches[0].schema.category, LEGACY_SALES);
    assert_eq!(matches[0].schema.header_row, 2);
    assert!(matches[1].schema.is_unknown());
}

#[test]
fn oversized_batches_are_refused() {
    let engine = engine_with(EngineConfig {
        max_files_per_batch: 1,
        ..EngineConfig::default()
    });
    let paths = vec![PathBuf::from("a.xlsx"), PathBuf::from("b.xlsx")];
    assert!(matches!(
        engine.process_files(&paths),
        Err(IngestError::BatchLimit(_))
    ));
}

#[test]
fn oversized_and_missing_files_become_issues() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.xlsx");
    write_sales_export(&path);
    let engine = engine_with(EngineConfig {
        max_file_size_mb: 0,
        workers: 1,
        ..EngineConfig::default()
    });

    let report = engine
        .process_files(&[path, dir.path().join("absent.xlsx")])
        .unwrap();
    let kinds: Vec<IssueKind> = report.issues.iter().map(|issue| issue.kind).collect();
    assert_eq!(kinds, vec![IssueKind::FileRejected, IssueKind::FileRead]);
    assert_eq!(report.issues[1].file, "absent.xlsx");
    assert!(report.sheets.is_empty());
    assert!(report.groups.is_empty());
}

#[test]
fn files_past_their_deadline_keep_the_sheets_already_done() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.xlsx");
    write_sales_export(&path);
    let engine = engine_with(EngineConfig {
        file_timeout_secs: 0,
        workers: 1,
        ..EngineConfig::default()
    });

    let report = engine.process_files(&[path]).unwrap();

    let statuses: Vec<SheetStatus> = report.sheets.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![SheetStatus::Processed, SheetStatus::TimedOut]);
    assert_eq!(report.summary.timed_out_sheets, 1);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, IssueKind::Timeout);
    assert_eq!(report.issues[0].sheet.as_deref(), Some("Notes"));
    assert_eq!(report.groups["SALES"][LEGACY_SALES].len(), 3);
}

#[test]
fn a_deadline_stops_every_remaining_sheet_of_the_file() {
    let engine = engine_with(EngineConfig {
        file_timeout_secs: 0,
        workers: 1,
        ..EngineConfig::default()
    });
    let bank = ["Value Date", "Narration", "Debit", "Credit", "Balance"];
    let source = SourceFile::new(
        "upload.xlsx",
        vec![
            sheet("Bank", &[&bank, &["01/02/2024", "Opening", "", "", "100"]]),
            sheet("Sales", &[&common::LEGACY_HEADERS]),
            sheet("Notes", &[&["prepared by finance"]]),
        ],
    );

    let report = engine.process_sources(vec![source]).unwrap();

    assert_eq!(report.summary.processed_sheets, 1);
    assert_eq!(report.summary.timed_out_sheets, 2);
    let timed_out: Vec<&str> = report
        .issues
        .iter()
        .filter(|issue| issue.kind == IssueKind::Timeout)
        .filter_map(|issue| issue.sheet.as_deref())
        .collect();
    assert_eq!(timed_out, vec!["Sales", "Notes"]);
    assert_eq!(report.groups["BANK"][common::BANK_STATEMENT].len(), 1);
}

#[test]
fn cancelled_batches_mark_every_sheet() {
    let engine = engine();
    engine.cancel_token().cancel();

    let source = SourceFile::new(
        "upload.xlsx",
        vec![
            sheet("First", &[&common::LEGACY_HEADERS]),
            sheet("Second", &[&["Value Date", "Narration", "Debit", "Credit", "Balance"]]),
        ],
    );
    let report = engine.process_sources(vec![source]).unwrap();

    assert_eq!(report.summary.cancelled_sheets, 2);
    assert!(report.sheets.iter().all(|s| s.status == SheetStatus::Cancelled));
    assert!(report.issues.iter().all(|i| i.kind == IssueKind::Cancelled));
    assert!(report.groups.is_empty());
}

#[test]
fn grouped_sets_are_written_one_sheet_per_category() {
    let dir = tempdir().unwrap();
    let sales = dir.path().join("sales.xlsx");
    let purchases = dir.path().join("purchases.csv");
    write_sales_export(&sales);
    write_purchases_csv(&purchases);
    let report = engine().process_files(&[sales, purchases]).unwrap();

    let output = dir.path().join("normalized.xlsx");
    write_grouped_sets(&output, &report.groups).unwrap();

    let workbook = open_workbook_auto(&output).unwrap();
    let names = workbook.sheet_names().to_vec();
    assert_eq!(names, vec![PURCHASES.to_string(), LEGACY_SALES.to_string()]);
}

#[test]
fn report_serializes_to_json() {
    let source = SourceFile::new(
        "upload.xlsx",
        vec![sheet(
            "Bank",
            &[
                &["Value Date", "Narration", "Debit", "Credit", "Balance"],
                &["01/02/2024", "Opening", "", "", "100"],
            ],
        )],
    );
    let report = engine().process_sources(vec![source]).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["summary"]["processed_sheets"], 1);
    assert_eq!(json["sheets"][0]["status"], "processed");
    assert!(json["batch_id"].is_string());
    assert!(json["groups"]["BANK"][common::BANK_STATEMENT].is_object());
}
