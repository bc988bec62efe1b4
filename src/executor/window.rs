//! Window function execution
//!
//! rowNumber, rank, denseRank, lag, lead and running sum/avg/count/min/max,
//! each computed per `partitionBy` group in `orderBy` order. The input rows
//! keep their order; only the computation is sorted.
use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use super::aggregate::Accumulator;
use super::cancel::CancellationToken;
use super::conditions::{canonical_key, compare_for_sort};
use super::join::Relation;
use crate::parser::{AggregateFunction, OrderBy, SortOrder, WindowFunction, WindowSpec};
use crate::types::{DatabaseError, RowView};

pub struct WindowFunctionExecutor;

impl WindowFunctionExecutor {
    /// Compute `spec` for every row and store it under the spec's output name
    pub fn apply(
        relation: &mut Relation,
        spec: &WindowSpec,
        cancel: &CancellationToken,
    ) -> Result<(), DatabaseError> {
        let values = Self::execute(relation, spec, cancel)?;
        let name = spec.output_name().to_string();
        for (row, value) in relation.rows.iter_mut().zip(values) {
            row.insert(name.clone(), value);
        }
        if !relation.columns.contains(&name) {
            relation.columns.push(name);
        }
        Ok(())
    }

    /// One result value per input row, in input order
    pub fn execute(
        relation: &Relation,
        spec: &WindowSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, DatabaseError> {
        let needs_field = !matches!(
            spec.function,
            WindowFunction::RowNumber | WindowFunction::Rank | WindowFunction::DenseRank | WindowFunction::Count
        );
        if needs_field && spec.field.is_none() {
            return Err(DatabaseError::InvalidQuery(format!(
                "window function {} needs a field",
                spec.function.name()
            )));
        }

        let mut results = vec![Value::Null; relation.len()];

        for partition in Self::partition_rows(relation, &spec.partition_by) {
            cancel.check()?;
            let sorted = Self::sort_rows(relation, partition, &spec.order_by);

            let partition_results = match spec.function {
                WindowFunction::RowNumber => Self::compute_row_number(&sorted),
                WindowFunction::Rank => Self::compute_rank(relation, &sorted, &spec.order_by, false),
                WindowFunction::DenseRank => Self::compute_rank(relation, &sorted, &spec.order_by, true),
                WindowFunction::Lag => Self::compute_shift(relation, &sorted, spec, false),
                WindowFunction::Lead => Self::compute_shift(relation, &sorted, spec, true),
                WindowFunction::Sum => Self::compute_running(relation, &sorted, spec, AggregateFunction::Sum),
                WindowFunction::Avg => Self::compute_running(relation, &sorted, spec, AggregateFunction::Avg),
                WindowFunction::Count => Self::compute_running(relation, &sorted, spec, AggregateFunction::Count),
                WindowFunction::Min => Self::compute_running(relation, &sorted, spec, AggregateFunction::Min),
                WindowFunction::Max => Self::compute_running(relation, &sorted, spec, AggregateFunction::Max),
            };

            // Map results back to original row positions
            for (row_idx, value) in sorted.into_iter().zip(partition_results) {
                results[row_idx] = value;
            }
        }

        Ok(results)
    }

    /// Row indexes per partition, partitions in order of first appearance
    fn partition_rows(relation: &Relation, partition_by: &[String]) -> Vec<Vec<usize>> {
        let mut partitions: Vec<Vec<usize>> = Vec::new();
        let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();

        for i in 0..relation.len() {
            let row = relation.scoped(i);
            let key: Vec<Option<String>> = partition_by
                .iter()
                .map(|path| row.field(path).and_then(canonical_key))
                .collect();
            match index.get(&key) {
                Some(&slot) => partitions[slot].push(i),
                None => {
                    index.insert(key, partitions.len());
                    partitions.push(vec![i]);
                }
            }
        }
        partitions
    }

    /// Stable sort: ties keep input order
    fn sort_rows(relation: &Relation, mut rows: Vec<usize>, order_by: &[OrderBy]) -> Vec<usize> {
        if !order_by.is_empty() {
            rows.sort_by(|&a, &b| Self::cmp_rows(relation, a, b, order_by));
        }
        rows
    }

    fn cmp_rows(relation: &Relation, a: usize, b: usize, order_by: &[OrderBy]) -> Ordering {
        let (ra, rb) = (relation.scoped(a), relation.scoped(b));
        for key in order_by {
            let cmp = compare_for_sort(ra.field(&key.field), rb.field(&key.field));
            if cmp != Ordering::Equal {
                return if key.direction == SortOrder::Asc { cmp } else { cmp.reverse() };
            }
        }
        Ordering::Equal
    }

    fn compute_row_number(rows: &[usize]) -> Vec<Value> {
        (1..=rows.len()).map(Value::from).collect()
    }

    /// rank leaves gaps after ties, denseRank does not
    fn compute_rank(relation: &Relation, rows: &[usize], order_by: &[OrderBy], dense: bool) -> Vec<Value> {
        let mut results = Vec::with_capacity(rows.len());
        let mut rank = 0usize;
        for (pos, &row) in rows.iter().enumerate() {
            let tied = pos > 0 && Self::cmp_rows(relation, rows[pos - 1], row, order_by) == Ordering::Equal;
            if !tied {
                rank = if dense { rank + 1 } else { pos + 1 };
            }
            results.push(Value::from(rank));
        }
        results
    }

    /// lag (`forward == false`) or lead by `offset` rows
    fn compute_shift(relation: &Relation, rows: &[usize], spec: &WindowSpec, forward: bool) -> Vec<Value> {
        let field = spec.field.as_deref().unwrap_or_default();
        let offset = spec.offset.unwrap_or(1);
        let fallback = spec.default.clone().unwrap_or(Value::Null);

        (0..rows.len())
            .map(|pos| {
                let target = if forward {
                    pos.checked_add(offset).filter(|t| *t < rows.len())
                } else {
                    pos.checked_sub(offset)
                };
                target
                    .and_then(|t| relation.scoped(rows[t]).field(field).cloned())
                    .unwrap_or_else(|| fallback.clone())
            })
            .collect()
    }

    /// Cumulative aggregate in window order; rows tied on the order keys share
    /// the value at the end of their peer group. No order means the whole
    /// partition.
    fn compute_running(
        relation: &Relation,
        rows: &[usize],
        spec: &WindowSpec,
        function: AggregateFunction,
    ) -> Vec<Value> {
        let field = spec.field.as_deref();
        let mut acc = Accumulator::new(function, field.is_none());

        if spec.order_by.is_empty() {
            for &row in rows {
                acc.push(field.and_then(|f| relation.scoped(row).lookup(f)));
            }
            return vec![acc.value(); rows.len()];
        }

        let mut results = vec![Value::Null; rows.len()];
        let mut start = 0;
        while start < rows.len() {
            let mut end = start;
            while end < rows.len()
                && Self::cmp_rows(relation, rows[start], rows[end], &spec.order_by) == Ordering::Equal
            {
                acc.push(field.and_then(|f| relation.scoped(rows[end]).lookup(f)));
                end += 1;
            }
            let value = acc.value();
            for slot in &mut results[start..end] {
                *slot = value.clone();
            }
            start = end;
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;
    use serde_json::json;

    fn rel(values: &[Value]) -> Relation {
        Relation::new(
            values
                .iter()
                .map(|v| Document::from_value(v.clone()).unwrap())
                .collect(),
            Vec::new(),
        )
    }

    fn run(relation: &Relation, spec: &WindowSpec) -> Vec<Value> {
        WindowFunctionExecutor::execute(relation, spec, &CancellationToken::new()).unwrap()
    }

    fn scores() -> Relation {
        rel(&[
            json!({"team": "a", "score": 10}),
            json!({"team": "b", "score": 7}),
            json!({"team": "a", "score": 30}),
            json!({"team": "a", "score": 10}),
            json!({"team": "b", "score": 9}),
        ])
    }

    #[test]
    fn test_row_number_partitioned() {
        let mut spec = WindowSpec::new(WindowFunction::RowNumber);
        spec.partition_by = vec!["team".into()];
        spec.order_by = vec![OrderBy::desc("score")];
        assert_eq!(run(&scores(), &spec), vec![json!(2), json!(2), json!(1), json!(3), json!(1)]);
    }

    #[test]
    fn test_rank_and_dense_rank_with_ties() {
        let mut spec = WindowSpec::new(WindowFunction::Rank);
        spec.order_by = vec![OrderBy::asc("score")];
        // sorted: 7, 9, 10, 10, 30
        assert_eq!(run(&scores(), &spec), vec![json!(3), json!(1), json!(5), json!(3), json!(2)]);

        spec.function = WindowFunction::DenseRank;
        assert_eq!(run(&scores(), &spec), vec![json!(3), json!(1), json!(4), json!(3), json!(2)]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let mut spec = WindowSpec::new(WindowFunction::RowNumber);
        spec.order_by = vec![OrderBy::asc("score")];
        let out = run(&scores(), &spec);
        // The two 10s keep input order: index 0 before index 3
        assert_eq!(out[0], json!(3));
        assert_eq!(out[3], json!(4));
    }

    #[test]
    fn test_lag_and_lead() {
        let mut spec = WindowSpec::new(WindowFunction::Lag);
        spec.field = Some("score".into());
        spec.partition_by = vec!["team".into()];
        assert_eq!(run(&scores(), &spec), vec![Value::Null, Value::Null, json!(10), json!(30), json!(7)]);

        spec.function = WindowFunction::Lead;
        spec.default = Some(json!(0));
        assert_eq!(run(&scores(), &spec), vec![json!(30), json!(9), json!(10), json!(0), json!(0)]);
    }

    #[test]
    fn test_running_sum_shares_value_across_peers() {
        let mut spec = WindowSpec::new(WindowFunction::Sum);
        spec.field = Some("score".into());
        spec.order_by = vec![OrderBy::asc("score")];
        // 7 -> 7, 9 -> 16, 10,10 -> 36, 30 -> 66
        assert_eq!(run(&scores(), &spec), vec![json!(36), json!(7), json!(66), json!(36), json!(16)]);
    }

    #[test]
    fn test_running_sum_over_qualified_field() {
        let relation = scores().with_alias("s");
        let mut spec = WindowSpec::new(WindowFunction::Sum);
        spec.field = Some("s.score".into());
        spec.partition_by = vec!["s.team".into()];
        spec.order_by = vec![OrderBy::asc("s.score")];
        assert_eq!(run(&relation, &spec), vec![json!(20), json!(7), json!(50), json!(20), json!(16)]);

        spec.order_by.clear();
        assert_eq!(run(&relation, &spec), vec![json!(50), json!(16), json!(50), json!(50), json!(16)]);
    }

    #[test]
    fn test_aggregate_without_order_covers_partition() {
        let mut spec = WindowSpec::new(WindowFunction::Max);
        spec.field = Some("score".into());
        spec.partition_by = vec!["team".into()];
        assert_eq!(run(&scores(), &spec), vec![json!(30), json!(9), json!(30), json!(30), json!(9)]);

        let count = WindowSpec::new(WindowFunction::Count);
        assert_eq!(run(&scores(), &count), vec![json!(5); 5]);
    }

    #[test]
    fn test_apply_preserves_row_order() {
        let mut relation = scores();
        let mut spec = WindowSpec::new(WindowFunction::RowNumber);
        spec.order_by = vec![OrderBy::desc("score")];
        spec.alias = Some("pos".into());
        WindowFunctionExecutor::apply(&mut relation, &spec, &CancellationToken::new()).unwrap();

        let teams: Vec<&Value> = relation.rows.iter().map(|r| r.get("team").unwrap()).collect();
        assert_eq!(teams, vec![&json!("a"), &json!("b"), &json!("a"), &json!("a"), &json!("b")]);
        assert_eq!(relation.rows[2].get("pos"), Some(&json!(1)));
        assert!(relation.columns.contains(&"pos".to_string()));
    }

    #[test]
    fn test_lag_without_field_is_invalid() {
        let spec = WindowSpec::new(WindowFunction::Lag);
        let err = WindowFunctionExecutor::execute(&scores(), &spec, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind(), "InvalidQuery");
    }
}
