//! Grouping and per-category analysis of normalized record sets.
//!
//! Record sets from every file are partitioned by statement group and
//! category, merged, checked for duplicates and then summarised: yearly totals,
//! duplicate counts, partner concentration and group-level statistics.

pub mod compare;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::ledger::ingest::catalog::Catalog;
use crate::ledger::ingest::duplicates;
use crate::ledger::ingest::model::{
    Column, ColumnType, DAY, DuplicateStatus, FALLBACK_GROUP, MONTH, RecordSet, STATEMENT_GROUP,
    TRANSACTION_DATE, UNKNOWN_CATEGORY, Value, YEAR, YEAR_MONTH,
};

/// Concentration thresholds used when none are configured.
pub const DEFAULT_TOP_N: [usize; 3] = [5, 10, 20];

/// statement group → category → merged record set.
pub type GroupedSets = BTreeMap<String, BTreeMap<String, RecordSet>>;

/// Earliest and latest transaction date of a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateSpan {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateSpan {
    pub fn of<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        values
            .into_iter()
            .filter_map(Value::as_date)
            .map(|date| date.date())
            .fold(DateSpan::default(), |span, date| DateSpan {
                from: Some(span.from.map_or(date, |from| from.min(date))),
                to: Some(span.to.map_or(date, |to| to.max(date))),
            })
    }

    pub fn merge(self, other: DateSpan) -> DateSpan {
        let pick = |a: Option<NaiveDate>, b: Option<NaiveDate>, f: fn(NaiveDate, NaiveDate) -> NaiveDate| {
            match (a, b) {
                (Some(a), Some(b)) => Some(f(a, b)),
                (a, b) => a.or(b),
            }
        };
        DateSpan {
            from: pick(self.from, other.from, std::cmp::min),
            to: pick(self.to, other.to, std::cmp::max),
        }
    }

    /// `dd-Mon-YYYY to dd-Mon-YYYY`, or `N/A` when no date is known.
    pub fn display(&self) -> String {
        match (self.from, self.to) {
            (Some(from), Some(to)) => format!("{} to {}", display_date(from), display_date(to)),
            _ => "N/A".to_string(),
        }
    }
}

pub fn display_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlySummaryRow {
    pub year: i32,
    pub date_range: String,
    pub totals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DuplicateSummary {
    pub no_duplicates: usize,
    pub has_duplicates: usize,
    pub is_duplicate: usize,
}

impl DuplicateSummary {
    pub fn of(statuses: &[DuplicateStatus]) -> Self {
        statuses
            .iter()
            .fold(DuplicateSummary::default(), |mut summary, status| {
                match status {
                    DuplicateStatus::NoDuplicates => summary.no_duplicates += 1,
                    DuplicateStatus::HasDuplicates => summary.has_duplicates += 1,
                    DuplicateStatus::IsDuplicate => summary.is_duplicate += 1,
                }
                summary
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartnerType {
    Clients,
    Suppliers,
}

impl PartnerType {
    /// Sales and revenue groups talk about clients, everything else about
    /// suppliers.
    pub fn for_group(group: &str) -> Self {
        let group = group.to_uppercase();
        if group.contains("SALES") || group.contains("REVENUE") {
            PartnerType::Clients
        } else {
            PartnerType::Suppliers
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationRow {
    pub year: i32,
    pub top_n: usize,
    pub total_amount: f64,
    pub share_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Concentration {
    pub partner_column: String,
    pub partner_type: PartnerType,
    pub rows: Vec<ConcentrationRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAnalysis {
    pub category: String,
    pub total_records: usize,
    pub date_range: DateSpan,
    pub duplicate_summary: DuplicateSummary,
    pub numeric_fields: Vec<String>,
    pub yearly_summary: Vec<YearlySummaryRow>,
    pub concentration: Option<Concentration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatistics {
    pub total_records: usize,
    pub total_categories: usize,
    pub date_range: DateSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAnalysis {
    pub group: String,
    pub statistics: GroupStatistics,
    pub categories: BTreeMap<String, CategoryAnalysis>,
}

/// Partitions record sets by statement group and category, concatenating
/// contributions from different files. Unknown sets are skipped; sets without
/// a group column land in [`FALLBACK_GROUP`].
pub fn organize(sets: impl IntoIterator<Item = RecordSet>) -> GroupedSets {
    let mut grouped = GroupedSets::new();
    for set in sets {
        if set.category == UNKNOWN_CATEGORY || set.category.trim().is_empty() {
            continue;
        }
        for (group, part) in split_by_group(set) {
            match grouped.entry(group).or_default().entry(part.category.clone()) {
                Entry::Occupied(mut slot) => slot.get_mut().append(&part),
                Entry::Vacant(slot) => {
                    slot.insert(part);
                }
            }
        }
    }
    grouped
}

fn split_by_group(set: RecordSet) -> Vec<(String, RecordSet)> {
    if !set.has_column(STATEMENT_GROUP) {
        return vec![(FALLBACK_GROUP.to_string(), set)];
    }
    let values = set.values(STATEMENT_GROUP).unwrap_or_default();
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Vec<usize>> = HashMap::new();
    for (row, value) in values.iter().enumerate() {
        let group = if value.is_blank() {
            FALLBACK_GROUP.to_string()
        } else {
            value.render()
        };
        rows.entry(group.clone())
            .or_insert_with(|| {
                order.push(group);
                Vec::new()
            })
            .push(row);
    }
    if order.len() == 1 {
        return vec![(order.remove(0), set)];
    }
    order
        .into_iter()
        .map(|group| {
            let part = set.select_rows(&rows[&group]);
            (group, part)
        })
        .collect()
}

/// Adds YEAR, MONTH (`Jan`), DAY (`01`) and YEAR-MONTH (`2021-01`) from the
/// transaction date. Rows without a date get nulls.
pub fn add_date_parts(set: &mut RecordSet) {
    let Some(dates) = set.values(TRANSACTION_DATE) else {
        return;
    };
    let parts: [(&str, &str); 4] = [(YEAR, "%Y"), (MONTH, "%b"), (DAY, "%d"), (YEAR_MONTH, "%Y-%m")];
    let columns: Vec<Column> = parts
        .iter()
        .map(|(name, format)| {
            let values = dates
                .iter()
                .map(|value| match value.as_date() {
                    Some(date) => Value::Text(date.format(format).to_string()),
                    None => Value::Null,
                })
                .collect();
            Column::new(*name, ColumnType::Text, values)
        })
        .collect();
    for column in columns {
        set.put_column(column);
    }
}

/// Computes every per-category and per-group summary.
#[derive(Debug, Clone)]
pub struct AggregationEngine<'a> {
    catalog: &'a Catalog,
    top_n: Vec<usize>,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(catalog: &'a Catalog, top_n: Vec<usize>) -> Self {
        Self { catalog, top_n }
    }

    /// Groups the sets, tags duplicates and date parts on every merged set,
    /// and analyses each group.
    #[instrument(level = "info", skip_all)]
    pub fn run(&self, sets: Vec<RecordSet>) -> (GroupedSets, BTreeMap<String, GroupAnalysis>) {
        let mut grouped = organize(sets);
        let mut analyses = BTreeMap::new();
        for (group, categories) in grouped.iter_mut() {
            *categories = std::mem::take(categories)
                .into_iter()
                .map(|(category, set)| {
                    let mut set = duplicates::detect(set, self.catalog);
                    add_date_parts(&mut set);
                    (category, set)
                })
                .collect();
            let analysis = GroupAnalysis {
                group: group.clone(),
                statistics: group_statistics(categories.values()),
                categories: categories
                    .iter()
                    .map(|(category, set)| (category.clone(), self.analyze_category(set, group)))
                    .collect(),
            };
            debug!(group = %group, categories = categories.len(), "group analysed");
            analyses.insert(group.clone(), analysis);
        }
        (grouped, analyses)
    }

    pub fn analyze_category(&self, set: &RecordSet, group: &str) -> CategoryAnalysis {
        let statuses = duplicates::statuses(set);
        CategoryAnalysis {
            category: set.category.clone(),
            total_records: set.len(),
            date_range: DateSpan::of(set.values(TRANSACTION_DATE).unwrap_or_default()),
            duplicate_summary: DuplicateSummary::of(&statuses),
            numeric_fields: self.numeric_fields(set),
            yearly_summary: self.yearly_summary(set),
            concentration: self.concentration(set, group),
        }
    }

    /// Float columns admitted by the catalog's include/exclude patterns.
    pub fn numeric_fields(&self, set: &RecordSet) -> Vec<String> {
        let patterns = self.catalog.numeric_fields();
        set.columns()
            .iter()
            .filter(|column| column.kind == ColumnType::Float && patterns.admits(&column.name))
            .map(|column| column.name.clone())
            .collect()
    }

    pub fn yearly_summary(&self, set: &RecordSet) -> Vec<YearlySummaryRow> {
        let fields = self.numeric_fields(set);
        let Some(dates) = set.values(TRANSACTION_DATE) else {
            return Vec::new();
        };
        if fields.is_empty() {
            return Vec::new();
        }

        let mut years: BTreeMap<i32, (DateSpan, BTreeMap<String, f64>)> = BTreeMap::new();
        for (row, value) in dates.iter().enumerate() {
            let Some(date) = value.as_date() else {
                continue;
            };
            let (span, totals) = years.entry(date.year()).or_default();
            *span = span.merge(DateSpan::of([value]));
            for field in &fields {
                let amount = set.get(row, field).and_then(Value::as_f64).unwrap_or(0.0);
                *totals.entry(field.clone()).or_default() += amount;
            }
        }
        years
            .into_iter()
            .map(|(year, (span, totals))| YearlySummaryRow {
                year,
                date_range: span.display(),
                totals,
            })
            .collect()
    }

    /// Top-N partner shares per year over records that are not flagged as
    /// copies.
    pub fn concentration(&self, set: &RecordSet, group: &str) -> Option<Concentration> {
        let partner_column = partner_column(set)?;
        let dates = set.values(TRANSACTION_DATE)?;
        let fields = self.numeric_fields(set);
        if fields.is_empty() {
            return None;
        }
        let statuses = duplicates::statuses(set);
        let partners = set.values(&partner_column)?;

        let mut yearly: BTreeMap<i32, BTreeMap<String, f64>> = BTreeMap::new();
        for row in 0..set.len() {
            if !statuses[row].is_clean() || partners[row].is_blank() {
                continue;
            }
            let Some(date) = dates[row].as_date() else {
                continue;
            };
            let amount: f64 = fields
                .iter()
                .filter_map(|field| set.get(row, field).and_then(Value::as_f64))
                .sum();
            *yearly
                .entry(date.year())
                .or_default()
                .entry(partners[row].render())
                .or_default() += amount;
        }

        let mut rows = Vec::new();
        for (year, by_partner) in yearly {
            let mut amounts: Vec<f64> = by_partner.into_values().collect();
            amounts.sort_by(|a, b| b.total_cmp(a));
            let year_total: f64 = amounts.iter().sum();
            for &n in &self.top_n {
                if n == 0 || amounts.len() < n {
                    continue;
                }
                let total_amount: f64 = amounts[..n].iter().sum();
                let share_percent = if year_total > 0.0 {
                    total_amount / year_total * 100.0
                } else {
                    0.0
                };
                rows.push(ConcentrationRow {
                    year,
                    top_n: n,
                    total_amount,
                    share_percent,
                });
            }
        }
        Some(Concentration {
            partner_column,
            partner_type: PartnerType::for_group(group),
            rows,
        })
    }
}

/// First column naming a supplier, else a buyer, else a client or customer.
pub fn partner_column(set: &RecordSet) -> Option<String> {
    let names = set.column_names();
    let find = |patterns: &[&str]| {
        names
            .iter()
            .find(|name| {
                let upper = name.to_uppercase();
                patterns.iter().any(|pattern| upper.contains(pattern))
            })
            .map(|name| name.to_string())
    };
    find(&["SUPPLIER NAME"])
        .or_else(|| find(&["BUYER NAME"]))
        .or_else(|| find(&["CLIENT NAME", "CUSTOMER NAME"]))
}

pub fn group_statistics<'s>(sets: impl Iterator<Item = &'s RecordSet>) -> GroupStatistics {
    let mut statistics = GroupStatistics {
        total_records: 0,
        total_categories: 0,
        date_range: DateSpan::default(),
    };
    for set in sets {
        statistics.total_records += set.len();
        statistics.total_categories += 1;
        statistics.date_range = statistics
            .date_range
            .merge(DateSpan::of(set.values(TRANSACTION_DATE).unwrap_or_default()));
    }
    statistics
}
