mod common;

use common::{BANK_STATEMENT, PURCHASES, catalog};
use ledger_ingest::duplicates::{classify, detect, key_fields, statuses};
use ledger_ingest::model::{
    Column, ColumnType, DUPLICATE_STATUS, DuplicateStatus, RecordSet, Value,
};

fn text_column(name: &str, values: &[&str]) -> Column {
    Column::new(
        name,
        ColumnType::Text,
        values
            .iter()
            .map(|value| {
                if value.is_empty() {
                    Value::Null
                } else {
                    Value::text(*value)
                }
            })
            .collect(),
    )
}

fn float_column(name: &str, values: &[f64]) -> Column {
    Column::new(
        name,
        ColumnType::Float,
        values.iter().copied().map(Value::Float).collect(),
    )
}

#[test]
fn groups_label_first_row_has_and_the_rest_is() {
    let set = RecordSet::from_columns(
        PURCHASES,
        vec![text_column("KEY", &["a", "b", "a", "c", "a"])],
    );
    let labels = classify(&set, &["KEY".to_string()]);
    assert_eq!(
        labels,
        vec![
            DuplicateStatus::HasDuplicates,
            DuplicateStatus::NoDuplicates,
            DuplicateStatus::IsDuplicate,
            DuplicateStatus::NoDuplicates,
            DuplicateStatus::IsDuplicate,
        ]
    );
}

#[test]
fn nulls_in_key_fields_compare_equal() {
    let set = RecordSet::from_columns(
        PURCHASES,
        vec![
            text_column("SUPPLIER TIN", &["", "", "1"]),
            float_column("AMOUNT", &[5.0, 5.0, 5.0]),
        ],
    );
    let keys = vec!["SUPPLIER TIN".to_string(), "AMOUNT".to_string()];
    assert_eq!(
        classify(&set, &keys),
        vec![
            DuplicateStatus::HasDuplicates,
            DuplicateStatus::IsDuplicate,
            DuplicateStatus::NoDuplicates,
        ]
    );
}

#[test]
fn declared_keys_missing_from_the_set_are_skipped() {
    let catalog = catalog();
    let set = RecordSet::from_columns(
        PURCHASES,
        vec![
            text_column("SUPPLIER TIN", &["1", "1"]),
            text_column("SUPPLIER NAME", &["x", "y"]),
        ],
    );
    assert_eq!(key_fields(&set, &catalog), vec!["SUPPLIER TIN".to_string()]);
}

#[test]
fn categories_without_keys_use_every_column() {
    let catalog = catalog();
    let set = RecordSet::from_columns(
        BANK_STATEMENT,
        vec![
            text_column("DESCRIPTION", &["fee", "fee", "fee"]),
            float_column("DEBIT", &[1.0, 1.0, 2.0]),
        ],
    );
    assert_eq!(
        key_fields(&set, &catalog),
        vec!["DESCRIPTION".to_string(), "DEBIT".to_string()]
    );

    let tagged = detect(set, &catalog);
    assert_eq!(
        statuses(&tagged),
        vec![
            DuplicateStatus::HasDuplicates,
            DuplicateStatus::IsDuplicate,
            DuplicateStatus::NoDuplicates,
        ]
    );
}

#[test]
fn detection_is_stable_when_rerun() {
    let catalog = catalog();
    let set = RecordSet::from_columns(
        BANK_STATEMENT,
        vec![text_column("DESCRIPTION", &["a", "a", "b"])],
    );
    let once = detect(set, &catalog);
    let twice = detect(once.clone(), &catalog);
    assert_eq!(once, twice);

    let labels: Vec<&str> = once
        .values(DUPLICATE_STATUS)
        .unwrap()
        .iter()
        .filter_map(Value::as_text)
        .collect();
    assert_eq!(labels, vec!["HAS duplicates", "IS duplicate", "NO duplicates"]);
}

#[test]
fn sets_without_a_status_column_count_as_unique() {
    let set = RecordSet::from_columns(PURCHASES, vec![text_column("KEY", &["a", "a"])]);
    assert_eq!(statuses(&set), vec![DuplicateStatus::NoDuplicates; 2]);
}
