//! Pairwise comparison of two categories.
//!
//! Numeric field pairs are compared through an aggregation (`agg(a) - agg(b)`);
//! any other pair is compared as a set of distinct values. A
//! [`ComparisonFilter`] narrows both sides to a date window and to selected
//! duplicate statuses first.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ledger::ingest::catalog::Catalog;
use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::{
    ColumnType, DAY, DERIVED_COLUMNS, DUPLICATE_STATUS, DuplicateStatus, MONTH, RecordSet,
    TRANSACTION_DATE, Value, YEAR, YEAR_MONTH,
};

/// Items shown in the short form of a missing-values list.
pub const DISPLAY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl Aggregation {
    pub const ALL: [Aggregation; 5] = [
        Aggregation::Sum,
        Aggregation::Mean,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::Count,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(Aggregation::Sum),
            "mean" | "avg" | "average" => Some(Aggregation::Mean),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "count" => Some(Aggregation::Count),
            _ => None,
        }
    }

    /// Applies the aggregation to non-null values. Mean, min and max of an
    /// empty column are undefined.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        match self {
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::Count => Some(values.len() as f64),
            Aggregation::Mean if values.is_empty() => None,
            Aggregation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Min => values.iter().copied().reduce(f64::min),
            Aggregation::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonResult {
    Numeric {
        field_a: String,
        field_b: String,
        aggregation: Aggregation,
        value_a: Option<f64>,
        value_b: Option<f64>,
        difference: Option<f64>,
    },
    Categorical {
        field_a: String,
        field_b: String,
        distinct_count_a: usize,
        distinct_count_b: usize,
        difference: i64,
        /// Values present in B but not in A, sorted.
        missing_in_a: Vec<String>,
        /// Values present in A but not in B, sorted.
        missing_in_b: Vec<String>,
        missing_in_a_display: String,
        missing_in_b_display: String,
        missing_in_a_full: String,
        missing_in_b_full: String,
    },
}

/// Rows admitted to a comparison. An unset bound or an empty status list
/// leaves that dimension open; a set without the TRANSACTION DATE or
/// Duplicate Status column is not narrowed on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonFilter {
    /// First day of the window, inclusive.
    pub from: Option<NaiveDate>,
    /// Last day of the window, inclusive of the whole day.
    pub to: Option<NaiveDate>,
    pub statuses: Vec<DuplicateStatus>,
}

impl ComparisonFilter {
    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none() && self.statuses.is_empty()
    }

    /// Rows of `set` dated inside the window whose duplicate status is
    /// selected. Undated rows fall outside any window.
    pub fn apply(&self, set: &RecordSet) -> RecordSet {
        let windowed = self.from.is_some() || self.to.is_some();
        let dates = set.values(TRANSACTION_DATE).filter(|_| windowed);
        let statuses = set
            .values(DUPLICATE_STATUS)
            .filter(|_| !self.statuses.is_empty());
        set.retain_rows(|row| {
            let in_window = dates.is_none_or(|values| {
                values[row].as_date().is_some_and(|stamp| {
                    let day = stamp.date();
                    self.from.is_none_or(|from| day >= from) && self.to.is_none_or(|to| day <= to)
                })
            });
            let selected = statuses.is_none_or(|values| {
                DuplicateStatus::parse(&values[row].render())
                    .is_some_and(|status| self.statuses.contains(&status))
            });
            in_window && selected
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryComparison {
    pub category_a: String,
    pub category_b: String,
    /// Records of each side that took part in the comparison.
    pub records_a: usize,
    pub records_b: usize,
    #[serde(skip_serializing_if = "ComparisonFilter::is_open")]
    pub filter: ComparisonFilter,
    pub results: Vec<ComparisonResult>,
}

/// Compares two record sets field pair by field pair. An empty aggregation
/// list means every aggregation.
pub fn compare(
    a: &RecordSet,
    b: &RecordSet,
    pairs: &[(String, String)],
    aggregations: &[Aggregation],
) -> Result<CategoryComparison> {
    let aggregations = if aggregations.is_empty() {
        &Aggregation::ALL[..]
    } else {
        aggregations
    };
    let mut results = Vec::new();
    for (field_a, field_b) in pairs {
        let column_a = a.column(field_a).ok_or_else(|| missing(field_a, &a.category))?;
        let column_b = b.column(field_b).ok_or_else(|| missing(field_b, &b.category))?;
        if column_a.kind == ColumnType::Float && column_b.kind == ColumnType::Float {
            let values_a: Vec<f64> = column_a.values.iter().filter_map(|v| v.as_f64()).collect();
            let values_b: Vec<f64> = column_b.values.iter().filter_map(|v| v.as_f64()).collect();
            for aggregation in aggregations {
                let value_a = aggregation.apply(&values_a);
                let value_b = aggregation.apply(&values_b);
                let difference = value_a.zip(value_b).map(|(x, y)| x - y);
                results.push(ComparisonResult::Numeric {
                    field_a: field_a.clone(),
                    field_b: field_b.clone(),
                    aggregation: *aggregation,
                    value_a,
                    value_b,
                    difference,
                });
            }
        } else {
            let distinct = |values: &[Value]| -> BTreeSet<String> {
                values
                    .iter()
                    .filter(|value| !value.is_null())
                    .map(|value| value.render())
                    .collect()
            };
            let set_a = distinct(&column_a.values);
            let set_b = distinct(&column_b.values);
            let missing_in_a: Vec<String> = set_b.difference(&set_a).cloned().collect();
            let missing_in_b: Vec<String> = set_a.difference(&set_b).cloned().collect();
            results.push(ComparisonResult::Categorical {
                field_a: field_a.clone(),
                field_b: field_b.clone(),
                distinct_count_a: set_a.len(),
                distinct_count_b: set_b.len(),
                difference: set_a.len() as i64 - set_b.len() as i64,
                missing_in_a_display: display_list(&missing_in_a),
                missing_in_b_display: display_list(&missing_in_b),
                missing_in_a_full: missing_in_a.join("; "),
                missing_in_b_full: missing_in_b.join("; "),
                missing_in_a,
                missing_in_b,
            });
        }
    }
    Ok(CategoryComparison {
        category_a: a.category.clone(),
        category_b: b.category.clone(),
        records_a: a.len(),
        records_b: b.len(),
        filter: ComparisonFilter::default(),
        results,
    })
}

/// Narrows both sets with `filter`, then compares them.
pub fn compare_filtered(
    a: &RecordSet,
    b: &RecordSet,
    pairs: &[(String, String)],
    aggregations: &[Aggregation],
    filter: &ComparisonFilter,
) -> Result<CategoryComparison> {
    if filter.is_open() {
        return compare(a, b, pairs, aggregations);
    }
    let mut comparison = compare(&filter.apply(a), &filter.apply(b), pairs, aggregations)?;
    comparison.filter = filter.clone();
    Ok(comparison)
}

fn missing(field: &str, category: &str) -> IngestError {
    IngestError::Comparison(format!("field '{field}' is not a column of '{category}'"))
}

/// First [`DISPLAY_LIMIT`] items joined by commas, with a count of the rest.
pub fn display_list(items: &[String]) -> String {
    let shown = items
        .iter()
        .take(DISPLAY_LIMIT)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > DISPLAY_LIMIT {
        format!("{shown}... (+{} more)", items.len() - DISPLAY_LIMIT)
    } else {
        shown
    }
}

/// Field pairs and aggregations for comparing `a` with `b`: the enabled
/// catalog rules for the pair (either orientation, by priority), or else every
/// column name the two sets share apart from engine-added ones.
pub fn comparison_plan(
    catalog: &Catalog,
    a: &RecordSet,
    b: &RecordSet,
) -> (Vec<(String, String)>, Vec<Aggregation>) {
    let mut pairs = Vec::new();
    let mut aggregations = Vec::new();
    for rule in catalog.comparison_rules() {
        let swapped = if rule.category_a == a.category && rule.category_b == b.category {
            false
        } else if rule.category_a == b.category && rule.category_b == a.category {
            true
        } else {
            continue;
        };
        for (x, y) in &rule.fields {
            let pair = if swapped {
                (y.clone(), x.clone())
            } else {
                (x.clone(), y.clone())
            };
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        for aggregation in &rule.aggregations {
            if !aggregations.contains(aggregation) {
                aggregations.push(*aggregation);
            }
        }
    }
    if !pairs.is_empty() {
        return (pairs, aggregations);
    }

    let engine_columns = [DUPLICATE_STATUS, YEAR, MONTH, DAY, YEAR_MONTH];
    let common = a
        .column_names()
        .into_iter()
        .filter(|name| b.has_column(name))
        .filter(|name| !DERIVED_COLUMNS.contains(name) && !engine_columns.contains(name))
        .map(|name| (name.to_string(), name.to_string()))
        .collect();
    (common, aggregations)
}
