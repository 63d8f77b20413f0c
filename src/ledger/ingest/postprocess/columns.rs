//! Column-level transforms: sign fixes, derived and harmonized columns, and
//! values inferred from the data or its file name.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::ledger::ingest::error::{IngestError, Result};
use crate::ledger::ingest::expr::Formula;
use crate::ledger::ingest::model::{
    Column, ColumnType, DERIVED_COLUMNS, ORIGIN_FILE, RecordSet, STATEMENT_GROUP,
    TRANSACTION_CATEGORY, UNKNOWN_CATEGORY, Value, ValueKey,
};
use crate::ledger::ingest::postprocess::{
    ColumnSchema, HarmonizedColumn, RecordTransform, TransformContext, Transformed,
    require_column,
};

/// Turns negative prices positive, moving the sign onto the quantity.
#[derive(Debug, Clone)]
pub struct SignExchange {
    pub price: String,
    pub quantity: String,
}

impl RecordTransform for SignExchange {
    fn name(&self) -> &'static str {
        "sign_exchange"
    }

    fn apply(&self, mut set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        let prices = require_column(&set, self.name(), &self.price)?.to_vec();
        require_column(&set, self.name(), &self.quantity)?;
        for (row, price) in prices.iter().enumerate() {
            let Some(price) = price.as_f64().filter(|p| *p < 0.0) else {
                continue;
            };
            set.set(row, &self.price, Value::Float(price.abs()));
            if let Some(quantity) = set.get(row, &self.quantity).and_then(Value::as_f64) {
                set.set(row, &self.quantity, Value::Float(-quantity.abs()));
            }
        }
        Ok(Transformed::single(set))
    }
}

/// Infers whether an e-invoicing export is a sales or a purchases register
/// from which side's TIN is constant.
#[derive(Debug, Clone)]
pub struct GroupFromTin {
    pub supplier_tin: String,
    pub client_tin: String,
    pub date_field: String,
}

impl RecordTransform for GroupFromTin {
    fn name(&self) -> &'static str {
        "group_from_tin"
    }

    fn declare(&self, schema: &mut ColumnSchema, _types: &ColumnSchema) -> Result<()> {
        for name in [TRANSACTION_CATEGORY, STATEMENT_GROUP] {
            schema.insert(name.to_string(), ColumnType::Text);
        }
        Ok(())
    }

    fn apply(&self, set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        let dates = require_column(&set, self.name(), &self.date_field)?;
        let keep: Vec<bool> = dates.iter().map(|value| !value.is_blank()).collect();
        let mut set = set.retain_rows(|row| keep[row]);

        let labels = match (
            distinct_count(&set, &self.supplier_tin),
            distinct_count(&set, &self.client_tin),
        ) {
            (Some(1), Some(_)) => Some(("SALES", "SALES")),
            (Some(_), Some(1)) => Some(("PURCHASES", "COGS-EXPENSES")),
            (Some(_), Some(_)) => None,
            _ => Some((UNKNOWN_CATEGORY, UNKNOWN_CATEGORY)),
        };
        if let Some((category, group)) = labels {
            let rows = set.len();
            set.put_column(Column::constant_text(TRANSACTION_CATEGORY, category, rows));
            set.put_column(Column::constant_text(STATEMENT_GROUP, group, rows));
        }
        Ok(Transformed::single(set))
    }
}

fn distinct_count(set: &RecordSet, name: &str) -> Option<usize> {
    set.values(name).map(|values| {
        values
            .iter()
            .filter(|value| !value.is_blank())
            .map(Value::key)
            .collect::<HashSet<ValueKey>>()
            .len()
    })
}

/// Adds (or replaces) a column computed from a typed expression.
#[derive(Debug, Clone)]
pub struct DeriveColumn {
    pub column: String,
    pub formula: Formula,
}

impl DeriveColumn {
    pub fn new(column: String, expression: &str) -> Result<Self> {
        Ok(Self {
            column,
            formula: Formula::parse(expression)?,
        })
    }
}

impl RecordTransform for DeriveColumn {
    fn name(&self) -> &'static str {
        "derive"
    }

    fn declare(&self, schema: &mut ColumnSchema, _types: &ColumnSchema) -> Result<()> {
        let kind = self.formula.check(schema)?;
        schema.insert(self.column.clone(), kind);
        Ok(())
    }

    fn apply(&self, mut set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        let kind = self.formula.check(&set.schema())?;
        let values = (0..set.len())
            .map(|row| self.formula.eval(&set, row))
            .collect();
        set.put_column(Column::new(self.column.clone(), kind, values));
        Ok(Transformed::single(set))
    }
}

/// Removes columns; absent names are ignored.
#[derive(Debug, Clone)]
pub struct DropColumns {
    pub columns: Vec<String>,
}

impl RecordTransform for DropColumns {
    fn name(&self) -> &'static str {
        "drop_columns"
    }

    fn declare(&self, schema: &mut ColumnSchema, _types: &ColumnSchema) -> Result<()> {
        for name in &self.columns {
            schema.remove(name);
        }
        Ok(())
    }

    fn apply(&self, mut set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        for name in &self.columns {
            set.remove_column(name);
        }
        Ok(Transformed::single(set))
    }
}

/// Reshapes a set into a fixed column layout. Provenance and group columns
/// not named in the layout are carried along after it.
#[derive(Debug, Clone)]
pub struct Harmonize {
    pub columns: Vec<HarmonizedColumn>,
}

impl RecordTransform for Harmonize {
    fn name(&self) -> &'static str {
        "harmonize"
    }

    fn declare(&self, schema: &mut ColumnSchema, types: &ColumnSchema) -> Result<()> {
        let mut output: ColumnSchema = self
            .columns
            .iter()
            .map(|target| {
                let source = target.from.as_deref().unwrap_or(&target.name);
                let kind = schema
                    .get(source)
                    .or_else(|| types.get(&target.name))
                    .copied()
                    .unwrap_or(ColumnType::Text);
                (target.name.clone(), kind)
            })
            .collect();
        for name in DERIVED_COLUMNS {
            if schema.contains_key(name) {
                output.entry(name.to_string()).or_insert(ColumnType::Text);
            }
        }
        *schema = output;
        Ok(())
    }

    fn apply(&self, set: RecordSet, ctx: &TransformContext<'_>) -> Result<Transformed> {
        let mut output = RecordSet::new(set.category.clone(), set.len());
        for target in &self.columns {
            let source = target.from.as_deref().unwrap_or(&target.name);
            let column = match set.column(source) {
                Some(column) => Column::new(target.name.clone(), column.kind, column.values.clone()),
                None => Column::new(
                    target.name.clone(),
                    ctx.catalog.field_type(&target.name),
                    Vec::new(),
                ),
            };
            output.put_column(column);
        }
        for name in DERIVED_COLUMNS {
            if output.has_column(name) {
                continue;
            }
            if let Some(column) = set.column(name) {
                output.put_column(column.clone());
            }
        }
        Ok(Transformed::single(output))
    }
}

/// Gives undated rows the period end date embedded in their origin file name.
#[derive(Debug, Clone)]
pub struct PeriodEndDate {
    pub pattern: Regex,
    pub capture: usize,
    pub format: String,
    pub date_field: String,
}

impl PeriodEndDate {
    pub fn new(pattern: &str, capture: usize, format: String, date_field: String) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|error| {
            IngestError::catalog(format!("invalid period_end_date pattern: {error}"))
        })?;
        if capture == 0 || capture >= pattern.captures_len() {
            return Err(IngestError::catalog(format!(
                "period_end_date capture group {capture} does not exist in the pattern"
            )));
        }
        Ok(Self {
            pattern,
            capture,
            format,
            date_field,
        })
    }

    fn end_date(&self, origin: &str) -> Option<NaiveDate> {
        let captures = self.pattern.captures(origin)?;
        let raw = captures.get(self.capture)?.as_str();
        NaiveDate::parse_from_str(raw, &self.format).ok()
    }
}

impl RecordTransform for PeriodEndDate {
    fn name(&self) -> &'static str {
        "period_end_date"
    }

    fn declare(&self, schema: &mut ColumnSchema, _types: &ColumnSchema) -> Result<()> {
        if let Some(kind) = schema.get_mut(&self.date_field) {
            *kind = ColumnType::Date;
        }
        Ok(())
    }

    fn apply(&self, mut set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        let origins: Vec<String> = require_column(&set, self.name(), ORIGIN_FILE)?
            .iter()
            .map(Value::render)
            .collect();
        let dates = require_column(&set, self.name(), &self.date_field)?;
        let undated: Vec<usize> = dates
            .iter()
            .enumerate()
            .filter(|(_, value)| value.as_date().is_none())
            .map(|(row, _)| row)
            .collect();
        for row in undated {
            if let Some(date) = self.end_date(&origins[row]) {
                set.set(row, &self.date_field, Value::Date(date.and_time(NaiveTime::MIN)));
            }
        }
        if let Some(column) = set.column_mut(&self.date_field) {
            column.kind = ColumnType::Date;
        }
        Ok(Transformed::single(set))
    }
}
