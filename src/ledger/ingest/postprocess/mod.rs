//! Category-specific business transforms.
//!
//! Each catalog entry carries an ordered list of [`TransformRule`]s compiled
//! from their serialized [`TransformSpec`] when the catalog loads. Rules run in
//! one of two [`Stage`]s: `Raw` rules see the renamed but untyped record set,
//! `Typed` rules run after coercion. A rule may fan one set out into several
//! (summary/detail splitting); later rules of the entry only apply to the sets
//! that still belong to it.
//!
//! At catalog load every entry's rules are replayed over the columns its
//! sheets map to ([`check_entry_schema`]), so an expression naming a missing
//! column or mixing types rejects the catalog instead of failing on data.

pub mod backfill;
pub mod columns;
pub mod refund;
pub mod split;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::ingest::catalog::{Catalog, CatalogEntry};
use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::model::{
    ColumnType, DERIVED_COLUMNS, IssueKind, RecordSet, TRANSACTION_DATE, Value,
};

pub use backfill::MissingDateBackfill;
pub use columns::{DeriveColumn, DropColumns, GroupFromTin, Harmonize, PeriodEndDate, SignExchange};
pub use refund::RefundMatching;
pub use split::SummaryDetailSplit;

/// Column names and types of a record set as it moves through the rules.
pub type ColumnSchema = HashMap<String, ColumnType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Raw,
    Typed,
}

fn default_date_field() -> String {
    TRANSACTION_DATE.to_string()
}

fn default_normal_code() -> String {
    "NS".to_string()
}

fn default_refund_code() -> String {
    "NR".to_string()
}

fn default_capture() -> usize {
    1
}

/// Per-key totals joined onto every row as `<field>_by_<key>` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub by: String,
    pub fields: Vec<String>,
}

/// One output column of a harmonized layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonizedColumn {
    pub name: String,
    #[serde(default)]
    pub from: Option<String>,
}

/// Serialized transform as it appears in a catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    SignExchange {
        price: String,
        quantity: String,
    },
    SummaryDetailSplit {
        criteria: String,
        #[serde(default)]
        excluded_values: Vec<String>,
        #[serde(default = "default_date_field")]
        date_field: String,
        detail_category: String,
        #[serde(default)]
        join_keys: Vec<(String, String)>,
        #[serde(default)]
        copy_fields: Vec<(String, String)>,
    },
    MissingDateBackfill {
        #[serde(default = "default_date_field")]
        date_field: String,
        #[serde(default)]
        group_by: Option<Vec<String>>,
    },
    RefundMatching {
        operation_field: String,
        #[serde(default = "default_normal_code")]
        normal_code: String,
        #[serde(default = "default_refund_code")]
        refund_code: String,
        match_fields: Vec<String>,
        #[serde(default)]
        group_totals: Vec<GroupTotal>,
    },
    GroupFromTin {
        supplier_tin: String,
        client_tin: String,
        #[serde(default = "default_date_field")]
        date_field: String,
    },
    Derive {
        column: String,
        expression: String,
    },
    DropColumns {
        columns: Vec<String>,
    },
    Harmonize {
        columns: Vec<HarmonizedColumn>,
    },
    PeriodEndDate {
        pattern: String,
        #[serde(default = "default_capture")]
        capture: usize,
        format: String,
        #[serde(default = "default_date_field")]
        date_field: String,
    },
}

/// Read-only state a transform may consult.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub catalog: &'a Catalog,
}

/// A recoverable condition met while transforming.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformWarning {
    pub kind: IssueKind,
    pub message: String,
}

/// Output of a transform: one or more record sets plus warnings.
#[derive(Debug, Default)]
pub struct Transformed {
    pub sets: Vec<RecordSet>,
    pub warnings: Vec<TransformWarning>,
}

impl Transformed {
    pub fn single(set: RecordSet) -> Self {
        Self {
            sets: vec![set],
            warnings: Vec::new(),
        }
    }

    pub fn warn(mut self, kind: IssueKind, message: impl Into<String>) -> Self {
        self.warnings.push(TransformWarning {
            kind,
            message: message.into(),
        });
        self
    }
}

/// A category-specific rewrite of a record set.
pub trait RecordTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage {
        Stage::Typed
    }

    /// Categories other than the owning one this transform produces.
    fn referenced_categories(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Applies the rule's effect on column names and types to `schema`.
    /// `types` are the catalog's declared field types.
    fn declare(&self, _schema: &mut ColumnSchema, _types: &ColumnSchema) -> Result<()> {
        Ok(())
    }

    fn apply(&self, set: RecordSet, ctx: &TransformContext<'_>) -> Result<Transformed>;
}

/// Compiled transform, one variant per supported kind.
#[derive(Debug, Clone)]
pub enum TransformRule {
    SignExchange(SignExchange),
    SummaryDetailSplit(SummaryDetailSplit),
    MissingDateBackfill(MissingDateBackfill),
    RefundMatching(RefundMatching),
    GroupFromTin(GroupFromTin),
    Derive(DeriveColumn),
    DropColumns(DropColumns),
    Harmonize(Harmonize),
    PeriodEndDate(PeriodEndDate),
}

impl TransformRule {
    /// Validates a serialized rule, parsing any expression or pattern it
    /// carries.
    pub fn compile(spec: &TransformSpec) -> Result<Self> {
        let rule = match spec.clone() {
            TransformSpec::SignExchange { price, quantity } => {
                TransformRule::SignExchange(SignExchange { price, quantity })
            }
            TransformSpec::SummaryDetailSplit {
                criteria,
                excluded_values,
                date_field,
                detail_category,
                join_keys,
                copy_fields,
            } => TransformRule::SummaryDetailSplit(SummaryDetailSplit {
                criteria,
                excluded_values,
                date_field,
                detail_category,
                join_keys,
                copy_fields,
            }),
            TransformSpec::MissingDateBackfill {
                date_field,
                group_by,
            } => TransformRule::MissingDateBackfill(MissingDateBackfill {
                date_field,
                group_by,
            }),
            TransformSpec::RefundMatching {
                operation_field,
                normal_code,
                refund_code,
                match_fields,
                group_totals,
            } => {
                if match_fields.is_empty() {
                    return Err(IngestError::catalog(
                        "refund_matching needs at least one match field",
                    ));
                }
                TransformRule::RefundMatching(RefundMatching {
                    operation_field,
                    normal_code,
                    refund_code,
                    match_fields,
                    group_totals,
                })
            }
            TransformSpec::GroupFromTin {
                supplier_tin,
                client_tin,
                date_field,
            } => TransformRule::GroupFromTin(GroupFromTin {
                supplier_tin,
                client_tin,
                date_field,
            }),
            TransformSpec::Derive { column, expression } => {
                TransformRule::Derive(DeriveColumn::new(column, &expression)?)
            }
            TransformSpec::DropColumns { columns } => {
                TransformRule::DropColumns(DropColumns { columns })
            }
            TransformSpec::Harmonize { columns } => {
                if columns.is_empty() {
                    return Err(IngestError::catalog("harmonize needs at least one column"));
                }
                TransformRule::Harmonize(Harmonize { columns })
            }
            TransformSpec::PeriodEndDate {
                pattern,
                capture,
                format,
                date_field,
            } => TransformRule::PeriodEndDate(PeriodEndDate::new(
                &pattern, capture, format, date_field,
            )?),
        };
        Ok(rule)
    }

    fn inner(&self) -> &dyn RecordTransform {
        match self {
            TransformRule::SignExchange(rule) => rule,
            TransformRule::SummaryDetailSplit(rule) => rule,
            TransformRule::MissingDateBackfill(rule) => rule,
            TransformRule::RefundMatching(rule) => rule,
            TransformRule::GroupFromTin(rule) => rule,
            TransformRule::Derive(rule) => rule,
            TransformRule::DropColumns(rule) => rule,
            TransformRule::Harmonize(rule) => rule,
            TransformRule::PeriodEndDate(rule) => rule,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner().name()
    }

    pub fn stage(&self) -> Stage {
        self.inner().stage()
    }

    pub fn referenced_categories(&self) -> Vec<&str> {
        self.inner().referenced_categories()
    }

    pub fn declare(&self, schema: &mut ColumnSchema, types: &ColumnSchema) -> Result<()> {
        self.inner().declare(schema, types)
    }

    pub fn apply(&self, set: RecordSet, ctx: &TransformContext<'_>) -> Result<Transformed> {
        self.inner().apply(set, ctx)
    }
}

/// Replays `rules` over a set mapped to `headers`: raw rules on text
/// columns, then typed rules after the same coercion the mapper applies.
pub fn check_entry_schema(
    headers: &[String],
    rules: &[TransformRule],
    types: &ColumnSchema,
) -> Result<()> {
    let mut schema: ColumnSchema = headers
        .iter()
        .map(String::as_str)
        .chain(DERIVED_COLUMNS)
        .map(|name| (name.to_string(), ColumnType::Text))
        .collect();
    for rule in rules.iter().filter(|rule| rule.stage() == Stage::Raw) {
        rule.declare(&mut schema, types)?;
    }
    for (name, kind) in schema.iter_mut() {
        *kind = if DERIVED_COLUMNS.contains(&name.as_str()) {
            ColumnType::Text
        } else {
            types.get(name).copied().unwrap_or(ColumnType::Text)
        };
    }
    for rule in rules.iter().filter(|rule| rule.stage() == Stage::Typed) {
        rule.declare(&mut schema, types)?;
    }
    Ok(())
}

/// Runs the entry's rules for one stage in declaration order.
pub fn run_stage(
    set: RecordSet,
    entry: &CatalogEntry,
    stage: Stage,
    ctx: &TransformContext<'_>,
) -> Result<Transformed> {
    let mut current = vec![set];
    let mut warnings = Vec::new();
    for rule in entry.transforms_for(stage) {
        let mut next = Vec::with_capacity(current.len());
        for set in current {
            if set.category != entry.id {
                next.push(set);
                continue;
            }
            let before = set.len();
            let output = rule.apply(set, ctx)?;
            debug!(
                category = %entry.id,
                transform = rule.name(),
                rows_in = before,
                rows_out = output.sets.iter().map(RecordSet::len).sum::<usize>(),
                "transform applied"
            );
            next.extend(output.sets);
            warnings.extend(output.warnings);
        }
        current = next;
    }
    Ok(Transformed {
        sets: current,
        warnings,
    })
}

/// Looks up a column a transform cannot run without.
pub(crate) fn require_column<'s>(
    set: &'s RecordSet,
    transform: &str,
    name: &str,
) -> Result<&'s [Value]> {
    set.values(name).ok_or_else(|| {
        IngestError::transform(
            transform,
            format!("column '{name}' is missing from category '{}'", set.category),
        )
    })
}
