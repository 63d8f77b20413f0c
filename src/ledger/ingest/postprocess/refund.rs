use std::collections::{HashMap, VecDeque};

use crate::ledger::ingest::error::Result;
use crate::ledger::ingest::model::{
    Column, ColumnType, REFUND_STATUS, RecordSet, RefundStatus, Value, ValueKey,
};
use crate::ledger::ingest::postprocess::{
    ColumnSchema, GroupTotal, RecordTransform, TransformContext, Transformed, require_column,
};

/// Pairs refund operations with the sale they reverse.
///
/// Rows are walked in input order. A normal operation joins the queue of its
/// match tuple; a refund consumes the oldest unconsumed normal row with the
/// same tuple, marking it `REFUNDED` and itself `REFUNDED MATCH`. Refunds with
/// nothing to consume are `REFUND NO MATCH`. Rows with any other operation
/// code keep a null status.
#[derive(Debug, Clone)]
pub struct RefundMatching {
    pub operation_field: String,
    pub normal_code: String,
    pub refund_code: String,
    pub match_fields: Vec<String>,
    pub group_totals: Vec<GroupTotal>,
}

impl RecordTransform for RefundMatching {
    fn name(&self) -> &'static str {
        "refund_matching"
    }

    fn declare(&self, schema: &mut ColumnSchema, _types: &ColumnSchema) -> Result<()> {
        for total in &self.group_totals {
            for field in &total.fields {
                schema.insert(format!("{field}_by_{}", total.by), ColumnType::Float);
            }
        }
        schema.insert(REFUND_STATUS.to_string(), ColumnType::Text);
        Ok(())
    }

    fn apply(&self, mut set: RecordSet, _ctx: &TransformContext<'_>) -> Result<Transformed> {
        let operations: Vec<String> = require_column(&set, self.name(), &self.operation_field)?
            .iter()
            .map(|value| value.render().trim().to_uppercase())
            .collect();

        let mut tuple_fields = self.match_fields.clone();
        for total in &self.group_totals {
            for column in self.group_total_columns(&set, total)? {
                tuple_fields.push(column.name.clone());
                set.put_column(column);
            }
        }
        for name in &tuple_fields {
            require_column(&set, self.name(), name)?;
        }

        let normal = self.normal_code.trim().to_uppercase();
        let refund = self.refund_code.trim().to_uppercase();
        let mut statuses: Vec<Option<RefundStatus>> = vec![None; set.len()];
        let mut open: HashMap<Vec<ValueKey>, VecDeque<usize>> = HashMap::new();

        for (row, operation) in operations.iter().enumerate() {
            let key = || -> Vec<ValueKey> {
                tuple_fields
                    .iter()
                    .map(|name| set.get(row, name).map_or(ValueKey::Null, Value::key))
                    .collect()
            };
            if *operation == normal {
                statuses[row] = Some(RefundStatus::NormalSale);
                open.entry(key()).or_default().push_back(row);
            } else if *operation == refund {
                match open.get_mut(&key()).and_then(VecDeque::pop_front) {
                    Some(sale) => {
                        statuses[sale] = Some(RefundStatus::Refunded);
                        statuses[row] = Some(RefundStatus::RefundedMatch);
                    }
                    None => statuses[row] = Some(RefundStatus::RefundNoMatch),
                }
            }
        }

        let values = statuses
            .into_iter()
            .map(|status| status.map_or(Value::Null, |s| Value::text(s.label())))
            .collect();
        set.put_column(Column::new(REFUND_STATUS, ColumnType::Text, values));
        Ok(Transformed::single(set))
    }
}

impl RefundMatching {
    /// One `<field>_by_<key>` column per summed field.
    fn group_total_columns(&self, set: &RecordSet, total: &GroupTotal) -> Result<Vec<Column>> {
        let keys: Vec<ValueKey> = require_column(set, self.name(), &total.by)?
            .iter()
            .map(Value::key)
            .collect();
        let mut columns = Vec::with_capacity(total.fields.len());
        for field in &total.fields {
            let values = require_column(set, self.name(), field)?;
            let mut sums: HashMap<&ValueKey, f64> = HashMap::new();
            for (key, value) in keys.iter().zip(values) {
                *sums.entry(key).or_default() += value.as_f64().unwrap_or(0.0);
            }
            let totals = keys
                .iter()
                .map(|key| Value::Float(sums.get(key).copied().unwrap_or(0.0)))
                .collect();
            columns.push(Column::new(
                format!("{field}_by_{}", total.by),
                ColumnType::Float,
                totals,
            ));
        }
        Ok(columns)
    }
}
