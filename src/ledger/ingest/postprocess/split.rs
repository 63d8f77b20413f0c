use std::collections::HashMap;

use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::{
    Column, ColumnType, DERIVED_COLUMNS, IssueKind, ORIGIN_FILE, ORIGIN_SHEET, RecordSet, Value,
    ValueKey,
};
use crate::ledger::ingest::normalize::attach_group_columns;
use crate::ledger::ingest::normalize::dates::is_valid_transaction_date;
use crate::ledger::ingest::postprocess::{
    RecordTransform, Stage, TransformContext, Transformed, require_column,
};

/// Filler written into detail columns that have no source value.
pub const DETAIL_FILLER: &str = "-";

/// Splits an export that interleaves summary rows (dated) with their detail
/// lines (undated) into two record sets.
#[derive(Debug, Clone)]
pub struct SummaryDetailSplit {
    pub criteria: String,
    pub excluded_values: Vec<String>,
    pub date_field: String,
    pub detail_category: String,
    /// (summary column, detail column) pairs identifying the parent summary.
    pub join_keys: Vec<(String, String)>,
    /// (summary column, detail column) pairs copied from the parent summary.
    pub copy_fields: Vec<(String, String)>,
}

impl RecordTransform for SummaryDetailSplit {
    fn name(&self) -> &'static str {
        "summary_detail_split"
    }

    fn stage(&self) -> Stage {
        Stage::Raw
    }

    fn referenced_categories(&self) -> Vec<&str> {
        vec![self.detail_category.as_str()]
    }

    fn apply(&self, set: RecordSet, ctx: &TransformContext<'_>) -> Result<Transformed> {
        let criteria = require_column(&set, self.name(), &self.criteria)?;
        let dates = require_column(&set, self.name(), &self.date_field)?;
        let resolver = ctx.catalog.date_resolver();

        let kept: Vec<bool> = criteria
            .iter()
            .map(|value| {
                !value.is_blank()
                    && !self
                        .excluded_values
                        .iter()
                        .any(|excluded| excluded.trim() == value.render().trim())
            })
            .collect();
        let dated: Vec<bool> = dates
            .iter()
            .map(|value| is_valid_transaction_date(&resolver.resolve_value(value)))
            .collect();

        let summary = set.retain_rows(|i| kept[i] && dated[i]);
        let detail_rows = set.retain_rows(|i| kept[i] && !dated[i]);

        let detail_entry = ctx.catalog.entry(&self.detail_category).ok_or_else(|| {
            IngestError::transform(
                self.name(),
                format!("unknown detail category '{}'", self.detail_category),
            )
        })?;
        let mut detail = rename_positionally(
            &detail_rows,
            &self.detail_category,
            detail_entry.output_headers(),
        );
        attach_group_columns(&mut detail, detail_entry);

        let mut output = Transformed::default();
        match self.missing_join_key(&summary, &detail) {
            Some(missing) => {
                output = output.warn(
                    IssueKind::JoinKeyMissing,
                    format!(
                        "detail rows of '{}' not enriched: join key '{missing}' is missing",
                        self.detail_category
                    ),
                );
            }
            None if !self.join_keys.is_empty() => self.enrich(&summary, &mut detail),
            None => {}
        }

        output.sets = vec![summary, detail];
        Ok(output)
    }
}

impl SummaryDetailSplit {
    fn missing_join_key<'a>(&'a self, summary: &RecordSet, detail: &RecordSet) -> Option<&'a str> {
        self.join_keys.iter().find_map(|(summary_key, detail_key)| {
            if !summary.has_column(summary_key) {
                Some(summary_key.as_str())
            } else if !detail.has_column(detail_key) {
                Some(detail_key.as_str())
            } else {
                None
            }
        })
    }

    /// Copies declared fields from the first summary row sharing all join keys.
    fn enrich(&self, summary: &RecordSet, detail: &mut RecordSet) {
        let mut parents: HashMap<Vec<ValueKey>, usize> = HashMap::new();
        for row in 0..summary.len() {
            let key = self
                .join_keys
                .iter()
                .map(|(summary_key, _)| key_of(summary.get(row, summary_key)))
                .collect();
            parents.entry(key).or_insert(row);
        }

        for (_, detail_col) in &self.copy_fields {
            if !detail.has_column(detail_col) {
                detail.put_column(Column::constant_text(
                    detail_col.as_str(),
                    DETAIL_FILLER,
                    detail.len(),
                ));
            }
        }

        for row in 0..detail.len() {
            let key: Vec<ValueKey> = self
                .join_keys
                .iter()
                .map(|(_, detail_key)| key_of(detail.get(row, detail_key)))
                .collect();
            let Some(&parent) = parents.get(&key) else {
                continue;
            };
            for (summary_col, detail_col) in &self.copy_fields {
                let value = summary.get(parent, summary_col).cloned().unwrap_or(Value::Null);
                detail.set(row, detail_col, value);
            }
        }
    }
}

fn key_of(value: Option<&Value>) -> ValueKey {
    value.map_or(ValueKey::Null, |value| Value::text(value.render()).key())
}

/// Renames the non-derived columns of `rows` onto `headers` by position,
/// dropping extra columns and padding missing ones with [`DETAIL_FILLER`].
fn rename_positionally(rows: &RecordSet, category: &str, headers: &[String]) -> RecordSet {
    let source: Vec<&Column> = rows
        .columns()
        .iter()
        .filter(|column| !DERIVED_COLUMNS.contains(&column.name.as_str()))
        .collect();
    let mut columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| match source.get(idx) {
            Some(column) => Column::new(header.clone(), ColumnType::Text, column.values.clone()),
            None => Column::constant_text(header.as_str(), DETAIL_FILLER, rows.len()),
        })
        .collect();
    for name in [ORIGIN_FILE, ORIGIN_SHEET] {
        if let Some(column) = rows.column(name) {
            columns.push(column.clone());
        }
    }
    let mut detail = RecordSet::new(category, rows.len());
    for column in columns {
        detail.put_column(column);
    }
    detail
}
