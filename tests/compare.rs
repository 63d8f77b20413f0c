mod common;

use chrono::NaiveDate;
use common::{LEGACY_SALES, PURCHASES, catalog, catalog_document, catalog_from};
use ledger_ingest::IngestError;
use ledger_ingest::analysis::compare::{
    Aggregation, ComparisonFilter, ComparisonResult, DISPLAY_LIMIT, compare, compare_filtered,
    comparison_plan, display_list,
};
use ledger_ingest::model::{
    Column, ColumnType, DUPLICATE_STATUS, DuplicateStatus, ORIGIN_FILE, RecordSet,
    TRANSACTION_DATE, Value,
};
use serde_json::json;

fn floats(name: &str, values: &[Option<f64>]) -> Column {
    Column::new(
        name,
        ColumnType::Float,
        values
            .iter()
            .map(|value| value.map_or(Value::Null, Value::Float))
            .collect(),
    )
}

fn text(name: &str, values: &[&str]) -> Column {
    Column::new(
        name,
        ColumnType::Text,
        values.iter().map(|value| Value::text(*value)).collect(),
    )
}

fn sales() -> RecordSet {
    let mut set = RecordSet::from_columns(
        LEGACY_SALES,
        vec![
            text("BUYER NAME", &["Acme", "Beta", "Acme"]),
            floats("TOTAL AMOUNT", &[Some(10.0), Some(20.0), None]),
        ],
    );
    set.put_column(Column::constant_text(ORIGIN_FILE, "sales.xlsx", 3));
    set.put_column(text(DUPLICATE_STATUS, &["NO duplicates"; 3]));
    set
}

fn purchases() -> RecordSet {
    let mut set = RecordSet::from_columns(
        PURCHASES,
        vec![
            text("BUYER NAME", &["Acme", "Gamma"]),
            floats("AMOUNT", &[Some(5.0), Some(7.0)]),
        ],
    );
    set.put_column(Column::constant_text(ORIGIN_FILE, "purchases.xlsx", 2));
    set.put_column(text(DUPLICATE_STATUS, &["NO duplicates"; 2]));
    set
}

#[test]
fn aggregations_parse_case_insensitively() {
    assert_eq!(Aggregation::parse(" SUM "), Some(Aggregation::Sum));
    assert_eq!(Aggregation::parse("avg"), Some(Aggregation::Mean));
    assert_eq!(Aggregation::parse("Count"), Some(Aggregation::Count));
    assert_eq!(Aggregation::parse("median"), None);
}

#[test]
fn aggregations_of_empty_columns() {
    assert_eq!(Aggregation::Sum.apply(&[]), Some(0.0));
    assert_eq!(Aggregation::Count.apply(&[]), Some(0.0));
    assert_eq!(Aggregation::Mean.apply(&[]), None);
    assert_eq!(Aggregation::Min.apply(&[]), None);
    assert_eq!(Aggregation::Max.apply(&[3.0, -1.0, 2.0]), Some(3.0));
    assert_eq!(Aggregation::Mean.apply(&[1.0, 2.0]), Some(1.5));
}

#[test]
fn numeric_pairs_report_aggregate_differences() {
    let pairs = vec![("TOTAL AMOUNT".to_string(), "AMOUNT".to_string())];
    let result = compare(
        &sales(),
        &purchases(),
        &pairs,
        &[Aggregation::Sum, Aggregation::Count],
    )
    .unwrap();

    assert_eq!(result.category_a, LEGACY_SALES);
    assert_eq!(result.category_b, PURCHASES);
    assert_eq!(
        result.results,
        vec![
            ComparisonResult::Numeric {
                field_a: "TOTAL AMOUNT".into(),
                field_b: "AMOUNT".into(),
                aggregation: Aggregation::Sum,
                value_a: Some(30.0),
                value_b: Some(12.0),
                difference: Some(18.0),
            },
            ComparisonResult::Numeric {
                field_a: "TOTAL AMOUNT".into(),
                field_b: "AMOUNT".into(),
                aggregation: Aggregation::Count,
                value_a: Some(2.0),
                value_b: Some(2.0),
                difference: Some(0.0),
            },
        ]
    );
}

#[test]
fn no_aggregations_means_all_of_them() {
    let pairs = vec![("TOTAL AMOUNT".to_string(), "AMOUNT".to_string())];
    let result = compare(&sales(), &purchases(), &pairs, &[]).unwrap();
    assert_eq!(result.results.len(), Aggregation::ALL.len());
}

#[test]
fn text_pairs_compare_distinct_values() {
    let pairs = vec![("BUYER NAME".to_string(), "BUYER NAME".to_string())];
    let result = compare(&sales(), &purchases(), &pairs, &[]).unwrap();

    let ComparisonResult::Categorical {
        distinct_count_a,
        distinct_count_b,
        difference,
        missing_in_a,
        missing_in_b,
        missing_in_a_full,
        ..
    } = &result.results[0]
    else {
        panic!("expected a categorical result, got {:?}", result.results[0]);
    };
    assert_eq!(*distinct_count_a, 2);
    assert_eq!(*distinct_count_b, 2);
    assert_eq!(*difference, 0);
    assert_eq!(missing_in_a, &vec!["Gamma".to_string()]);
    assert_eq!(missing_in_b, &vec!["Beta".to_string()]);
    assert_eq!(missing_in_a_full, "Gamma");
}

#[test]
fn long_lists_are_shortened_for_display() {
    let items: Vec<String> = (1..=13).map(|i| format!("v{i:02}")).collect();
    let shown = display_list(&items);
    assert!(shown.starts_with("v01, v02"));
    assert!(shown.ends_with("... (+3 more)"));
    assert_eq!(shown.matches(", ").count(), DISPLAY_LIMIT - 1);

    let short = display_list(&items[..2]);
    assert_eq!(short, "v01, v02");
}

#[test]
fn unknown_fields_are_rejected() {
    let pairs = vec![("TOTAL AMOUNT".to_string(), "NOT THERE".to_string())];
    let error = compare(&sales(), &purchases(), &pairs, &[]).unwrap_err();
    assert!(matches!(error, IngestError::Comparison(ref message) if message.contains("NOT THERE")));
}

#[test]
fn plan_uses_catalog_rules_in_either_orientation() {
    let mut document = catalog_document();
    document["comparison_rules"] = json!([
        {
            "category_a": PURCHASES,
            "category_b": LEGACY_SALES,
            "priority": 2,
            "fields": [["AMOUNT", "TOTAL AMOUNT"]],
            "aggregations": ["sum"]
        },
        {
            "category_a": LEGACY_SALES,
            "category_b": PURCHASES,
            "priority": 1,
            "enabled": false,
            "fields": [["BUYER NAME", "BUYER NAME"]]
        }
    ]);
    let catalog = catalog_from(document);

    let (pairs, aggregations) = comparison_plan(&catalog, &sales(), &purchases());
    assert_eq!(
        pairs,
        vec![("TOTAL AMOUNT".to_string(), "AMOUNT".to_string())]
    );
    assert_eq!(aggregations, vec![Aggregation::Sum]);
}

#[test]
fn plan_falls_back_to_shared_business_columns() {
    let catalog = catalog();
    let (pairs, aggregations) = comparison_plan(&catalog, &sales(), &purchases());
    assert_eq!(
        pairs,
        vec![("BUYER NAME".to_string(), "BUYER NAME".to_string())]
    );
    assert!(aggregations.is_empty());
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn dated(mut set: RecordSet, days: &[Option<NaiveDate>], statuses: &[&str]) -> RecordSet {
    let afternoon = |day: NaiveDate| Value::Date(day.and_hms_opt(15, 30, 0).unwrap());
    set.put_column(Column::new(
        TRANSACTION_DATE,
        ColumnType::Date,
        days.iter()
            .map(|day| day.map_or(Value::text("N/A"), afternoon))
            .collect(),
    ));
    set.put_column(text(DUPLICATE_STATUS, statuses));
    set
}

fn amount_pairs() -> Vec<(String, String)> {
    vec![("TOTAL AMOUNT".to_string(), "AMOUNT".to_string())]
}

fn sums(result: &[ComparisonResult]) -> (Option<f64>, Option<f64>) {
    match &result[0] {
        ComparisonResult::Numeric { value_a, value_b, .. } => (*value_a, *value_b),
        other => panic!("expected a numeric result, got {other:?}"),
    }
}

#[test]
fn date_window_keeps_whole_days_at_both_ends() {
    let a = dated(
        sales(),
        &[Some(day(2024, 1, 31)), Some(day(2024, 2, 29)), None],
        &["NO duplicates"; 3],
    );
    let b = dated(
        purchases(),
        &[Some(day(2024, 2, 1)), Some(day(2024, 3, 1))],
        &["NO duplicates"; 2],
    );
    let filter = ComparisonFilter {
        from: Some(day(2024, 2, 1)),
        to: Some(day(2024, 2, 29)),
        statuses: Vec::new(),
    };

    let result = compare_filtered(&a, &b, &amount_pairs(), &[Aggregation::Sum], &filter).unwrap();
    assert_eq!(result.records_a, 1);
    assert_eq!(result.records_b, 1);
    assert_eq!(sums(&result.results), (Some(20.0), Some(5.0)));
    assert_eq!(result.filter, filter);
}

#[test]
fn copies_can_be_left_out_of_a_comparison() {
    let a = dated(
        sales(),
        &[Some(day(2024, 1, 1)); 3],
        &["HAS duplicates", "IS duplicate", "NO duplicates"],
    );
    let b = dated(
        purchases(),
        &[Some(day(2024, 1, 1)); 2],
        &["NO duplicates", "IS duplicate"],
    );
    let filter = ComparisonFilter {
        statuses: vec![DuplicateStatus::NoDuplicates, DuplicateStatus::HasDuplicates],
        ..ComparisonFilter::default()
    };

    let result = compare_filtered(&a, &b, &amount_pairs(), &[Aggregation::Sum], &filter).unwrap();
    assert_eq!((result.records_a, result.records_b), (2, 1));
    assert_eq!(sums(&result.results), (Some(10.0), Some(5.0)));
}

#[test]
fn sets_without_the_filtered_columns_are_not_narrowed() {
    let filter = ComparisonFilter {
        from: Some(day(2030, 1, 1)),
        ..ComparisonFilter::default()
    };
    let plain = sales();
    assert!(!plain.has_column(TRANSACTION_DATE));
    assert_eq!(filter.apply(&plain).len(), 3);

    let open = compare_filtered(
        &sales(),
        &purchases(),
        &amount_pairs(),
        &[],
        &ComparisonFilter::default(),
    )
    .unwrap();
    assert!(open.filter.is_open());
    assert_eq!((open.records_a, open.records_b), (3, 2));
}
