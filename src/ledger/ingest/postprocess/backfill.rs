use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Days, NaiveDate, NaiveTime};

use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::{
    ColumnType, IssueKind, ORIGIN_FILE, ORIGIN_SHEET, RecordSet, Value, ValueKey,
};
use crate::ledger::ingest::postprocess::{
    RecordTransform, TransformContext, Transformed, require_column,
};

/// Longest span a single group may be expanded over.
const MAX_BACKFILL_DAYS: u64 = 36_600;

/// Fills calendar gaps of daily series (balances, rates) by carrying the
/// previous day's row forward.
#[derive(Debug, Clone)]
pub struct MissingDateBackfill {
    pub date_field: String,
    /// Columns identifying one series. Defaults to every text column other
    /// than the date and provenance columns.
    pub group_by: Option<Vec<String>>,
}

impl RecordTransform for MissingDateBackfill {
    fn name(&self) -> &'static str {
        "missing_date_backfill"
    }

    fn apply(&self, set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        let dates = require_column(&set, self.name(), &self.date_field)?;
        let group_columns = self.group_columns(&set)?;

        let mut seen: HashSet<(NaiveDate, Vec<ValueKey>)> = HashSet::new();
        let mut groups: Vec<BTreeMap<NaiveDate, usize>> = Vec::new();
        let mut group_index: HashMap<Vec<ValueKey>, usize> = HashMap::new();
        let mut undated = Vec::new();

        for (row, value) in dates.iter().enumerate() {
            let Some(date) = value.as_date().map(|d| d.date()) else {
                undated.push(row);
                continue;
            };
            let key: Vec<ValueKey> = group_columns
                .iter()
                .map(|name| set.get(row, name).map_or(ValueKey::Null, Value::key))
                .collect();
            if !seen.insert((date, key.clone())) {
                continue;
            }
            let idx = *group_index.entry(key).or_insert_with(|| {
                groups.push(BTreeMap::new());
                groups.len() - 1
            });
            groups[idx].insert(date, row);
        }

        let mut order: Vec<usize> = Vec::new();
        let mut filled: Vec<(usize, NaiveDate)> = Vec::new();
        for series in &groups {
            let (Some((&first, _)), Some((&last, _))) =
                (series.first_key_value(), series.last_key_value())
            else {
                continue;
            };
            let span = (last - first).num_days() as u64;
            if span > MAX_BACKFILL_DAYS {
                return Err(IngestError::transform(
                    self.name(),
                    format!("date range {first}..{last} is too wide to expand"),
                ));
            }
            let mut previous = series[&first];
            for offset in 0..=span {
                let day = first + Days::new(offset);
                match series.get(&day) {
                    Some(&row) => {
                        previous = row;
                        order.push(row);
                    }
                    None => {
                        filled.push((order.len(), day));
                        order.push(previous);
                    }
                }
            }
        }

        let skipped = undated.len();
        order.extend(undated);
        let mut output = set.select_rows(&order);
        for (position, day) in filled {
            output.set(position, &self.date_field, Value::Date(day.and_time(NaiveTime::MIN)));
        }

        let mut transformed = Transformed::single(output);
        if skipped > 0 {
            transformed = transformed.warn(
                IssueKind::SheetProcessing,
                format!("{skipped} row(s) without a parsed date were kept without backfilling"),
            );
        }
        Ok(transformed)
    }
}

impl MissingDateBackfill {
    fn group_columns(&self, set: &RecordSet) -> Result<Vec<String>> {
        match &self.group_by {
            Some(columns) => {
                for name in columns {
                    require_column(set, self.name(), name)?;
                }
                Ok(columns.clone())
            }
            None => Ok(set
                .columns()
                .iter()
                .filter(|column| column.kind == ColumnType::Text)
                .map(|column| column.name.as_str())
                .filter(|name| ![self.date_field.as_str(), ORIGIN_FILE, ORIGIN_SHEET].contains(name))
                .map(str::to_string)
                .collect()),
        }
    }
}
