mod common;

use std::path::Path;

use common::{Fx, LEGACY_SALES, PURCHASES, catalog, catalog_document, number, text, write_workbook};
use ledger_ingest::IngestError;
use ledger_ingest::analysis::compare::Aggregation;
use ledger_ingest::catalog::{Catalog, DEFAULT_DATE_FORMATS};
use ledger_ingest::model::ColumnType;
use ledger_ingest::postprocess::Stage;
use serde_json::json;
use tempfile::tempdir;

fn rejected(document: serde_json::Value) -> String {
    match Catalog::from_json_str(&document.to_string()) {
        Err(IngestError::CatalogLoad(message)) => message,
        Err(other) => panic!("expected a catalog error, got {other}"),
        Ok(_) => panic!("catalog should have been rejected"),
    }
}

#[test]
fn fixture_catalog_compiles() {
    let catalog = catalog();
    assert_eq!(catalog.entries().len(), 3);
    assert_eq!(catalog.entries()[0].id, LEGACY_SALES);
    assert_eq!(catalog.field_type("TOTAL AMOUNT"), ColumnType::Float);
    assert_eq!(catalog.field_type("TRANSACTION DATE"), ColumnType::Date);
    assert_eq!(catalog.field_type("BUYER NAME"), ColumnType::Text);
    assert_eq!(catalog.date_formats().len(), DEFAULT_DATE_FORMATS.len());

    let legacy = catalog.entry(LEGACY_SALES).unwrap();
    assert!(legacy.header_tokens().contains("INVOICE NO"));
    assert_eq!(legacy.output_headers()[0], "INVOICE NUMBER");
    assert_eq!(legacy.transforms_for(Stage::Typed).count(), 1);
    assert_eq!(legacy.transforms_for(Stage::Raw).count(), 0);

    let groups: Vec<&str> = catalog.statement_groups().into_iter().collect();
    assert_eq!(groups, vec!["BANK", "COGS-EXPENSES", "SALES"]);
    assert_eq!(catalog.categories_in_group("SALES").count(), 1);
}

#[test]
fn empty_catalogs_are_rejected() {
    let message = rejected(json!({ "categories": [] }));
    assert!(message.contains("no categories"));
}

#[test]
fn a_field_cannot_be_both_float_and_date() {
    let mut document = catalog_document();
    document["field_types"]["date"] = json!(["TRANSACTION DATE", "AMOUNT"]);
    assert!(rejected(document).contains("AMOUNT"));
}

#[test]
fn reserved_and_repeated_ids_are_rejected() {
    let mut document = catalog_document();
    document["categories"][1]["id"] = json!("UNKNOWN");
    assert!(rejected(document).contains("reserved"));

    let mut document = catalog_document();
    document["categories"][2]["id"] = json!(LEGACY_SALES);
    assert!(rejected(document).contains("duplicate category id"));
}

#[test]
fn repeated_canonical_headers_are_rejected() {
    let mut document = catalog_document();
    document["categories"][2]["canonical_headers"] =
        json!(["SUPPLIER NAME", "AMOUNT", "TRANSACTION DATE", "AMOUNT"]);
    assert!(rejected(document).contains("repeats canonical header"));
}

#[test]
fn comparison_rules_must_name_known_categories() {
    let mut document = catalog_document();
    document["comparison_rules"] = json!([
        { "category_a": LEGACY_SALES, "category_b": "PAYROLL" }
    ]);
    assert!(rejected(document).contains("PAYROLL"));
}

#[test]
fn comparison_rules_are_ordered_and_filtered() {
    let mut document = catalog_document();
    document["comparison_rules"] = json!([
        { "category_a": LEGACY_SALES, "category_b": PURCHASES, "priority": 5 },
        { "category_a": PURCHASES, "category_b": LEGACY_SALES, "priority": 1 },
        { "category_a": LEGACY_SALES, "category_b": PURCHASES, "priority": 0, "enabled": false }
    ]);
    let catalog = common::catalog_from(document);
    let priorities: Vec<u32> = catalog.comparison_rules().map(|rule| rule.priority).collect();
    assert_eq!(priorities, vec![1, 5]);
}

#[test]
fn load_rejects_missing_and_unsupported_sources() {
    let dir = tempdir().unwrap();
    let missing = Catalog::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(missing, IngestError::CatalogLoad(_)));

    let yaml = dir.path().join("catalog.yaml");
    std::fs::write(&yaml, "categories: []").unwrap();
    let unsupported = Catalog::load(&yaml).unwrap_err();
    assert!(matches!(unsupported, IngestError::CatalogLoad(ref m) if m.contains("unsupported")));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert!(matches!(
        Catalog::load(&broken),
        Err(IngestError::CatalogLoad(_))
    ));
}

#[test]
fn load_reads_json_documents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, catalog_document().to_string()).unwrap();

    let catalog = Catalog::load(&path).unwrap();
    assert!(catalog.entry(PURCHASES).is_some());
}

fn column_major(columns: &[(&'static str, &[&'static str])]) -> Vec<Vec<Fx>> {
    let depth = columns.iter().map(|(_, values)| values.len()).max().unwrap_or(0);
    let mut rows = vec![columns.iter().map(|(name, _)| text(*name)).collect::<Vec<_>>()];
    for idx in 0..depth {
        rows.push(
            columns
                .iter()
                .map(|(_, values)| values.get(idx).map_or(Fx::Blank, |value| text(*value)))
                .collect(),
        );
    }
    rows
}

fn table(header: &[&'static str], rows: &[&[&'static str]]) -> Vec<Vec<Fx>> {
    let mut out = vec![header.iter().map(|name| text(*name)).collect::<Vec<_>>()];
    for row in rows {
        out.push(
            row.iter()
                .map(|value| if value.is_empty() { Fx::Blank } else { text(*value) })
                .collect(),
        );
    }
    out
}

fn write_parameter_workbook(path: &Path) {
    let sign_exchange = r#"{"kind":"sign_exchange","price":"UNIT PRICE","quantity":"QUANTITY"}"#;
    let mut comparison = table(
        &["CATEGORY 1", "CATEGORY 2", "FIELD 1", "FIELD 2", "AGGREGATION", "ENABLED"],
        &[
            &["SALES", "PURCHASES", "TOTAL AMOUNT", "AMOUNT", "sum, count", "yes"],
            &["SALES", "PURCHASES", "BUYER NAME", "SUPPLIER NAME", "", "yes"],
        ],
    );
    comparison[0].push(text("PRIORITY"));
    comparison[1].push(number(1.0));
    comparison[2].push(number(1.0));

    write_workbook(
        path,
        &[
            (
                "FileHeaders",
                column_major(&[
                    ("SALES", &["Invoice No", "Date", "Unit Price", "Quantity", "Total Amount", "Buyer Name"]),
                    ("PURCHASES", &["Supplier", "Invoice Date", "Amount"]),
                ]),
            ),
            (
                "FindapHeaders",
                column_major(&[
                    (
                        "SALES",
                        &["INVOICE NUMBER", "TRANSACTION DATE", "UNIT PRICE", "QUANTITY", "TOTAL AMOUNT", "BUYER NAME"],
                    ),
                    ("PURCHASES", &["SUPPLIER NAME", "TRANSACTION DATE", "AMOUNT"]),
                    ("SALES DETAIL", &["INVOICE NUMBER", "ITEM"]),
                ]),
            ),
            (
                "Categories_sheetnames",
                table(
                    &["Category", "Data Group", "Category Group", "Financial Statement Group"],
                    &[
                        &["SALES", "EBM", "EBM SALES", "SALES"],
                        &["PURCHASES", "", "", "COGS-EXPENSES"],
                    ],
                ),
            ),
            (
                "Dataformat",
                table(
                    &["FORMAT FLOAT", "FORMAT DATE"],
                    &[
                        &["UNIT PRICE", "TRANSACTION DATE"],
                        &["QUANTITY", ""],
                        &["TOTAL AMOUNT", ""],
                        &["AMOUNT", ""],
                    ],
                ),
            ),
            ("Dates formats", table(&["DATES FORMATS"], &[&["%d/%m/%Y"], &["%Y-%m-%d"]])),
            ("Check_duplicates", column_major(&[("SALES", &["INVOICE NUMBER"])])),
            (
                "NUMERIC_FIELDS_CONFIG",
                table(&["FIELD_PATTERN", "ACTION"], &[&["AMOUNT", "include"], &["PRICE", "exclude"]]),
            ),
            ("COMPARISON", comparison),
            ("TRANSFORMS", table(&["CATEGORY", "RULE"], &[&["SALES", sign_exchange]])),
        ],
    );
}

#[test]
fn parameter_workbook_loads_into_a_catalog() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("parameters.xlsx");
    write_parameter_workbook(&path);

    let catalog = Catalog::load(&path).unwrap();
    let ids: Vec<&str> = catalog.entries().iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec!["SALES", "PURCHASES", "SALES DETAIL"]);

    let sales = catalog.entry("SALES").unwrap();
    assert_eq!(sales.source_headers.len(), 6);
    assert_eq!(sales.canonical_headers[4], "TOTAL AMOUNT");
    assert_eq!(sales.data_group.as_deref(), Some("EBM"));
    assert_eq!(sales.category_group.as_deref(), Some("EBM SALES"));
    assert_eq!(sales.statement_group.as_deref(), Some("SALES"));
    assert_eq!(sales.duplicate_keys, vec!["INVOICE NUMBER".to_string()]);
    assert_eq!(sales.transforms.len(), 1);
    assert_eq!(sales.field_type("TRANSACTION DATE"), ColumnType::Date);

    let purchases = catalog.entry("PURCHASES").unwrap();
    assert_eq!(purchases.data_group, None);
    assert!(purchases.duplicate_keys.is_empty());

    let detail = catalog.entry("SALES DETAIL").unwrap();
    assert!(detail.source_headers.is_empty());
    assert!(detail.header_tokens().is_empty());

    assert_eq!(catalog.date_formats(), &["%d/%m/%Y".to_string(), "%Y-%m-%d".to_string()]);
    assert!(catalog.numeric_fields().admits("TOTAL AMOUNT"));
    assert!(!catalog.numeric_fields().admits("UNIT PRICE"));

    let rules: Vec<_> = catalog.comparison_rules().collect();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].priority, 1);
    assert_eq!(rules[0].fields.len(), 2);
    assert_eq!(rules[0].aggregations, vec![Aggregation::Sum, Aggregation::Count]);
}

#[test]
fn parameter_workbook_without_required_sheets_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.xlsx");
    write_workbook(
        &path,
        &[("FileHeaders", column_major(&[("SALES", &["Invoice No"])]))],
    );

    let error = Catalog::load(&path).unwrap_err();
    assert!(matches!(error, IngestError::CatalogLoad(ref m) if m.contains("FindapHeaders")));
}

#[test]
fn derive_expressions_are_checked_against_the_mapped_columns() {
    let mut document = catalog_document();
    document["categories"][0]["transforms"] = json!([
        { "kind": "derive", "column": "NET", "expression": "[TOTAL AMOUNT] - [DISCOUNT]" }
    ]);
    let message = rejected(document);
    assert!(message.contains(LEGACY_SALES));
    assert!(message.contains("DISCOUNT"));

    let mut document = catalog_document();
    document["categories"][0]["transforms"] = json!([
        { "kind": "derive", "column": "BAD", "expression": "[BUYER NAME] * 2" }
    ]);
    assert!(rejected(document).contains("numeric operands"));
}

#[test]
fn derive_sees_columns_added_by_earlier_rules() {
    let mut document = catalog_document();
    document["categories"][0]["transforms"] = json!([
        { "kind": "derive", "column": "GROSS", "expression": "[UNIT PRICE] * [QUANTITY]" },
        { "kind": "derive", "column": "GAP", "expression": "[TOTAL AMOUNT] - [GROSS]" },
        { "kind": "derive", "column": "SOURCE", "expression": "[ORIGIN_FILE] & ' / ' & [BUYER NAME]" }
    ]);
    let catalog = common::catalog_from(document);
    assert_eq!(catalog.entry(LEGACY_SALES).unwrap().transforms.len(), 3);

    let mut document = catalog_document();
    document["categories"][0]["transforms"] = json!([
        { "kind": "drop_columns", "columns": ["QUANTITY"] },
        { "kind": "derive", "column": "GROSS", "expression": "[UNIT PRICE] * [QUANTITY]" }
    ]);
    assert!(rejected(document).contains("QUANTITY"));
}

#[test]
fn deeply_nested_expressions_are_rejected() {
    let nested = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
    let mut document = catalog_document();
    document["categories"][0]["transforms"] = json!([
        { "kind": "derive", "column": "DEEP", "expression": nested }
    ]);
    assert!(rejected(document).contains("nested"));

    let negated = format!("{}1", "-".repeat(10_000));
    let mut document = catalog_document();
    document["categories"][0]["transforms"] = json!([
        { "kind": "derive", "column": "DEEP", "expression": negated }
    ]);
    assert!(rejected(document).contains("nested"));
}
