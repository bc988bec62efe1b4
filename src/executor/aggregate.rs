//! Group-by and aggregate computation
//!
//! Groups come out in order of first appearance. An empty key list is one
//! implicit group over the whole input, so it yields exactly one row even
//! for empty input.
use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Number, Value};

use super::cancel::CancellationToken;
use super::conditions::{canonical_key, compare_for_sort, to_number};
use super::join::Relation;
use crate::parser::{AggregateFunction, AggregateSpec};
use crate::types::{DatabaseError, Document, RowView};

const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Running state of one aggregate.
///
/// Nulls and absent values are skipped by everything except `count(*)`.
#[derive(Debug, Clone)]
pub(crate) enum Accumulator {
    CountRows(u64),
    CountValues(u64),
    Sum {
        int_sum: Option<i64>,
        float_sum: f64,
        seen: u64,
    },
    Avg {
        sum: f64,
        seen: u64,
    },
    Extreme {
        want: Ordering,
        best: Option<Value>,
    },
}

impl Accumulator {
    /// `counts_rows` selects `count(*)` over `count(field)`
    pub(crate) const fn new(function: AggregateFunction, counts_rows: bool) -> Self {
        match function {
            AggregateFunction::Count if counts_rows => Self::CountRows(0),
            AggregateFunction::Count => Self::CountValues(0),
            AggregateFunction::Sum => Self::Sum {
                int_sum: Some(0),
                float_sum: 0.0,
                seen: 0,
            },
            AggregateFunction::Avg => Self::Avg { sum: 0.0, seen: 0 },
            AggregateFunction::Min => Self::Extreme {
                want: Ordering::Less,
                best: None,
            },
            AggregateFunction::Max => Self::Extreme {
                want: Ordering::Greater,
                best: None,
            },
        }
    }

    pub(crate) fn push(&mut self, value: Option<&Value>) {
        let value = value.filter(|v| !v.is_null());
        match self {
            Self::CountRows(n) => *n += 1,
            Self::CountValues(n) => {
                if value.is_some() {
                    *n += 1;
                }
            }
            Self::Sum {
                int_sum,
                float_sum,
                seen,
            } => {
                let Some(v) = value else { return };
                let Some(f) = to_number(v) else { return };
                *seen += 1;
                *float_sum += f;
                *int_sum = match (*int_sum, v.as_i64()) {
                    (Some(acc), Some(i)) => acc.checked_add(i),
                    _ => None,
                };
            }
            Self::Avg { sum, seen } => {
                if let Some(f) = value.and_then(to_number) {
                    *sum += f;
                    *seen += 1;
                }
            }
            Self::Extreme { want, best } => {
                let Some(v) = value else { return };
                let replace = best
                    .as_ref()
                    .is_none_or(|b| compare_for_sort(Some(v), Some(b)) == *want);
                if replace {
                    *best = Some(v.clone());
                }
            }
        }
    }

    /// Current result; empty sum/avg/min/max are null
    pub(crate) fn value(&self) -> Value {
        match self {
            Self::CountRows(n) | Self::CountValues(n) => Value::from(*n),
            Self::Sum {
                int_sum,
                float_sum,
                seen,
            } => match (seen, int_sum) {
                (0, _) => Value::Null,
                (_, Some(i)) => Value::from(*i),
                (_, None) => float_value(*float_sum),
            },
            Self::Avg { sum, seen } => {
                if *seen == 0 {
                    Value::Null
                } else {
                    float_value(*sum / *seen as f64)
                }
            }
            Self::Extreme { best, .. } => best.clone().unwrap_or(Value::Null),
        }
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

struct Group {
    key_values: Vec<Value>,
    accumulators: Vec<Accumulator>,
}

pub struct AggregateExecutor;

impl AggregateExecutor {
    /// One output row per group: the group-by fields (named as written)
    /// followed by each aggregate under its output name
    pub fn aggregate(
        input: &Relation,
        group_by: &[String],
        aggregates: &[AggregateSpec],
        cancel: &CancellationToken,
    ) -> Result<Relation, DatabaseError> {
        for spec in aggregates {
            if spec.function != AggregateFunction::Count && spec.field.is_none() {
                return Err(DatabaseError::InvalidQuery(format!(
                    "{} needs a field",
                    spec.function.name()
                )));
            }
        }

        let fresh = || -> Vec<Accumulator> {
            aggregates
                .iter()
                .map(|s| Accumulator::new(s.function, s.field.is_none()))
                .collect()
        };

        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();

        if group_by.is_empty() {
            groups.push(Group {
                key_values: Vec::new(),
                accumulators: fresh(),
            });
            index.insert(Vec::new(), 0);
        }

        for i in 0..input.len() {
            cancel.check_every(i, CANCEL_CHECK_INTERVAL)?;
            let row = input.scoped(i);

            let key_values: Vec<Value> = group_by
                .iter()
                .map(|path| row.field(path).cloned().unwrap_or(Value::Null))
                .collect();
            let key: Vec<Option<String>> = key_values.iter().map(canonical_key).collect();

            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.push(Group {
                        key_values,
                        accumulators: fresh(),
                    });
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };

            for (acc, spec) in groups[slot].accumulators.iter_mut().zip(aggregates) {
                acc.push(spec.field.as_deref().and_then(|f| row.field(f)));
            }
        }

        let mut columns: Vec<String> = group_by.to_vec();
        columns.extend(aggregates.iter().map(|s| s.output_name().to_string()));

        let rows = groups
            .into_iter()
            .map(|group| {
                let mut doc = Document::new();
                for (name, value) in group_by.iter().zip(group.key_values) {
                    doc.insert(name.clone(), value);
                }
                for (spec, acc) in aggregates.iter().zip(&group.accumulators) {
                    doc.insert(spec.output_name(), acc.value());
                }
                doc
            })
            .collect();

        Ok(Relation::new(rows, columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn spec(function: AggregateFunction, field: Option<&str>) -> AggregateSpec {
        AggregateSpec::new(function, field)
    }

    fn run(input: &Relation, group_by: &[&str], aggregates: &[AggregateSpec]) -> Vec<Value> {
        let group_by: Vec<String> = group_by.iter().map(|s| (*s).to_string()).collect();
        AggregateExecutor::aggregate(input, &group_by, aggregates, &CancellationToken::new())
            .unwrap()
            .rows
            .into_iter()
            .map(Document::into_value)
            .collect()
    }

    #[test]
    fn test_group_sum() {
        let input = rel(&[json!({"g": "x", "v": 1}), json!({"g": "x", "v": 3}), json!({"g": "y", "v": 5})]);
        let out = run(&input, &["g"], &[spec(AggregateFunction::Sum, Some("v"))]);
        assert_eq!(out, vec![json!({"g": "x", "sum": 4}), json!({"g": "y", "sum": 5})]);
    }

    #[test]
    fn test_count_star_vs_count_field() {
        let input = rel(&[json!({"v": 1}), json!({"v": null}), json!({})]);
        let mut by_field = spec(AggregateFunction::Count, Some("v"));
        by_field.alias = Some("nonNull".into());
        let out = run(&input, &[], &[spec(AggregateFunction::Count, None), by_field]);
        assert_eq!(out, vec![json!({"count": 3, "nonNull": 1})]);
    }

    #[test]
    fn test_nulls_excluded_from_numeric_aggregates() {
        let input = rel(&[json!({"v": 2}), json!({"v": null}), json!({"v": 4.5}), json!({"w": 1})]);
        let out = run(
            &input,
            &[],
            &[
                spec(AggregateFunction::Sum, Some("v")),
                spec(AggregateFunction::Avg, Some("v")),
                spec(AggregateFunction::Min, Some("v")),
                spec(AggregateFunction::Max, Some("v")),
            ],
        );
        assert_eq!(out, vec![json!({"sum": 6.5, "avg": 3.25, "min": 2, "max": 4.5})]);
    }

    #[test]
    fn test_empty_input_single_implicit_group() {
        let input = rel(&[]);
        let out = run(
            &input,
            &[],
            &[spec(AggregateFunction::Count, None), spec(AggregateFunction::Sum, Some("v"))],
        );
        assert_eq!(out, vec![json!({"count": 0, "sum": null})]);
        assert!(run(&input, &["g"], &[spec(AggregateFunction::Count, None)]).is_empty());
    }

    #[test]
    fn test_null_and_missing_keys_share_a_group() {
        let input = rel(&[json!({"g": null, "v": 1}), json!({"v": 2}), json!({"g": 1, "v": 3}), json!({"g": 1.0, "v": 4})]);
        let out = run(&input, &["g"], &[spec(AggregateFunction::Sum, Some("v"))]);
        assert_eq!(out, vec![json!({"g": null, "sum": 3}), json!({"g": 1, "sum": 7})]);
    }

    #[test]
    fn test_multi_column_keys_stay_distinct() {
        let input = rel(&[
            json!({"a": "x\u{1f}s:y", "b": "z", "v": 1}),
            json!({"a": "x", "b": "y\u{1f}s:z", "v": 2}),
        ]);
        let out = run(&input, &["a", "b"], &[spec(AggregateFunction::Sum, Some("v"))]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["sum"], json!(1));
        assert_eq!(out[1]["sum"], json!(2));
    }

    #[test]
    fn test_sum_without_field_is_invalid() {
        let err = AggregateExecutor::aggregate(
            &rel(&[]),
            &[],
            &[spec(AggregateFunction::Sum, None)],
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidQuery");
    }

    #[test]
    fn test_min_max_on_strings() {
        let input = rel(&[json!({"s": "pear"}), json!({"s": "apple"}), json!({"s": "zucchini"})]);
        let out = run(
            &input,
            &[],
            &[spec(AggregateFunction::Min, Some("s")), spec(AggregateFunction::Max, Some("s"))],
        );
        assert_eq!(out, vec![json!({"min": "apple", "max": "zucchini"})]);
    }
}
