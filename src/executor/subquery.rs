// Subquery resolution
//
// Subqueries appear in three places:
// - comparison operands: a scalar, or a value set for `in` / `notIn`
// - `exists` tests
// - projection columns, one scalar per output row
// Derived tables (`from` / join sources) are run directly by the query
// executor and never pass through here.
//
// A subquery is correlated when its own `where`, `having` or join
// predicates contain `{"outer": path}`. Correlated subqueries are bound to
// the current outer row and re-run per row; uncorrelated ones run once per
// CTE scope and are served from the cache afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::join::Relation;
use crate::parser::{Comparison, JoinCondition, Operand, Operator, Predicate, Query};
use crate::types::{DatabaseError, RowView};

/// Per-query subquery bookkeeping: result cache and correlated-cost guard
#[derive(Debug)]
pub struct SubqueryState {
    cache: HashMap<String, Arc<Relation>>,
    allow_correlated: bool,
    max_correlated: usize,
    pub correlated_evaluations: usize,
    pub cache_hits: usize,
}

impl SubqueryState {
    #[must_use]
    pub fn new(allow_correlated: bool, max_correlated: usize) -> Self {
        Self {
            cache: HashMap::new(),
            allow_correlated,
            max_correlated,
            correlated_evaluations: 0,
            cache_hits: 0,
        }
    }

    /// Number of distinct subquery results held
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Runs nested queries on behalf of [`SubqueryExecutor`]
pub trait SubqueryRunner {
    /// Execute a complete (already bound) query
    fn run_subquery(&mut self, query: &Query) -> Result<Relation, DatabaseError>;

    fn subquery_state(&mut self) -> &mut SubqueryState;

    /// Identifies the CTE scope nested queries resolve names in. Results
    /// are only reused within the same scope.
    fn scope_key(&self) -> usize;
}

pub struct SubqueryExecutor;

impl SubqueryExecutor {
    /// True if the query's own predicates reference the enclosing row.
    ///
    /// Nested subqueries are not inspected: their `outer` refers to this
    /// query's rows, not to ours.
    #[must_use]
    pub fn is_correlated(query: &Query) -> bool {
        let in_joins = query.joins.iter().any(|join| match &join.on {
            JoinCondition::Predicate(p) => Self::references_outer(p),
            JoinCondition::Keys { .. } => false,
        });
        in_joins
            || query
                .filter
                .iter()
                .chain(query.having.iter())
                .any(Self::references_outer)
    }

    fn references_outer(predicate: &Predicate) -> bool {
        match predicate {
            Predicate::And { and: items } | Predicate::Or { or: items } => {
                items.iter().any(Self::references_outer)
            }
            Predicate::Not { not } => Self::references_outer(not),
            Predicate::Exists { .. } => false,
            Predicate::Compare(c) => matches!(c.value, Operand::Outer { .. }),
        }
    }

    /// True if the predicate contains any subquery operand or `exists`
    #[must_use]
    pub fn has_subqueries(predicate: &Predicate) -> bool {
        match predicate {
            Predicate::And { and: items } | Predicate::Or { or: items } => {
                items.iter().any(Self::has_subqueries)
            }
            Predicate::Not { not } => Self::has_subqueries(not),
            Predicate::Exists { .. } => true,
            Predicate::Compare(c) => matches!(c.value, Operand::Subquery { .. }),
        }
    }

    /// True if binding the predicate needs the row it will be tested against
    #[must_use]
    pub fn depends_on_row(predicate: &Predicate) -> bool {
        match predicate {
            Predicate::And { and: items } | Predicate::Or { or: items } => {
                items.iter().any(Self::depends_on_row)
            }
            Predicate::Not { not } => Self::depends_on_row(not),
            Predicate::Exists { exists } => Self::is_correlated(exists),
            Predicate::Compare(c) => match &c.value {
                Operand::Subquery { subquery } => Self::is_correlated(subquery),
                _ => false,
            },
        }
    }

    /// Copy of `query` with every `outer` operand in its own predicates
    /// replaced by the outer row's value (null when the field is absent)
    #[must_use]
    pub fn bind_outer(query: &Query, outer: &dyn RowView) -> Query {
        let mut bound = query.clone();
        for join in &mut bound.joins {
            if let JoinCondition::Predicate(p) = &mut join.on {
                Self::bind_outer_predicate(p, outer);
            }
        }
        for p in bound.filter.iter_mut().chain(bound.having.iter_mut()) {
            Self::bind_outer_predicate(p, outer);
        }
        bound
    }

    fn bind_outer_predicate(predicate: &mut Predicate, outer: &dyn RowView) {
        match predicate {
            Predicate::And { and: items } | Predicate::Or { or: items } => {
                for item in items {
                    Self::bind_outer_predicate(item, outer);
                }
            }
            Predicate::Not { not } => Self::bind_outer_predicate(not, outer),
            Predicate::Exists { .. } => {}
            Predicate::Compare(c) => {
                if let Operand::Outer { outer: path } = &c.value {
                    let value = outer.field(path).cloned().unwrap_or(Value::Null);
                    c.value = Operand::Literal(value);
                }
            }
        }
    }

    /// Resolve every subquery operand and `exists` in `predicate` into
    /// literals, leaving a predicate the filter translator accepts
    pub fn bind(
        predicate: &Predicate,
        outer: Option<&dyn RowView>,
        runner: &mut dyn SubqueryRunner,
    ) -> Result<Predicate, DatabaseError> {
        match predicate {
            Predicate::And { and } => {
                let mut bound = Vec::with_capacity(and.len());
                for item in and {
                    bound.push(Self::bind(item, outer, runner)?);
                }
                Ok(Predicate::And { and: bound })
            }
            Predicate::Or { or } => {
                let mut bound = Vec::with_capacity(or.len());
                for item in or {
                    bound.push(Self::bind(item, outer, runner)?);
                }
                Ok(Predicate::Or { or: bound })
            }
            Predicate::Not { not } => Ok(Predicate::Not {
                not: Box::new(Self::bind(not, outer, runner)?),
            }),
            // An empty `and` is true and an empty `or` is false
            Predicate::Exists { exists } => {
                let relation = Self::evaluate(exists, outer, runner)?;
                Ok(if relation.is_empty() {
                    Predicate::Or { or: Vec::new() }
                } else {
                    Predicate::And { and: Vec::new() }
                })
            }
            Predicate::Compare(c) => {
                let Operand::Subquery { subquery } = &c.value else {
                    return Ok(predicate.clone());
                };
                let value = if matches!(c.op, Operator::In | Operator::NotIn) {
                    Self::set(subquery, outer, runner)?
                } else {
                    Self::scalar(subquery, outer, runner)?
                };
                Ok(Predicate::Compare(Comparison {
                    field: c.field.clone(),
                    op: c.op,
                    value: Operand::Literal(value),
                    case_insensitive: c.case_insensitive,
                }))
            }
        }
    }

    /// First value of the first row; null when the subquery is empty
    pub fn scalar(
        query: &Query,
        outer: Option<&dyn RowView>,
        runner: &mut dyn SubqueryRunner,
    ) -> Result<Value, DatabaseError> {
        let relation = Self::evaluate(query, outer, runner)?;
        let Some(first) = relation.rows.first() else {
            return Ok(Value::Null);
        };
        if first.len() > 1 {
            return Err(DatabaseError::SubqueryShapeError(format!(
                "scalar subquery returned {} columns",
                first.len()
            )));
        }
        Ok(first.iter().next().map_or(Value::Null, |(_, v)| v.clone()))
    }

    /// The single column of every row, as a JSON array
    pub fn set(
        query: &Query,
        outer: Option<&dyn RowView>,
        runner: &mut dyn SubqueryRunner,
    ) -> Result<Value, DatabaseError> {
        let relation = Self::evaluate(query, outer, runner)?;
        let mut values = Vec::with_capacity(relation.len());
        for row in &relation.rows {
            if row.len() != 1 {
                return Err(DatabaseError::SubqueryShapeError(format!(
                    "set subquery rows must have exactly one column, found {}",
                    row.len()
                )));
            }
            values.extend(row.iter().map(|(_, v)| v.clone()));
        }
        Ok(Value::Array(values))
    }

    /// Run `query` (bound to `outer` first when correlated), reusing a
    /// previous result for the same query text in the same scope
    pub fn evaluate(
        query: &Query,
        outer: Option<&dyn RowView>,
        runner: &mut dyn SubqueryRunner,
    ) -> Result<Arc<Relation>, DatabaseError> {
        let correlated = Self::is_correlated(query);
        let bound;
        let effective = if correlated {
            let Some(row) = outer else {
                return Err(DatabaseError::InvalidQuery(
                    "correlated subquery used where no outer row is available".to_string(),
                ));
            };
            bound = Self::bind_outer(query, row);
            &bound
        } else {
            query
        };

        let key = format!("{}:{}", runner.scope_key(), serde_json::to_string(effective)?);
        let cached = runner.subquery_state().cache.get(&key).cloned();
        if let Some(hit) = cached {
            runner.subquery_state().cache_hits += 1;
            return Ok(hit);
        }

        if correlated {
            let state = runner.subquery_state();
            if !state.allow_correlated {
                return Err(DatabaseError::CostLimitExceeded(
                    "correlated subqueries are disabled for this query".to_string(),
                ));
            }
            if state.correlated_evaluations >= state.max_correlated {
                return Err(DatabaseError::CostLimitExceeded(format!(
                    "more than {} correlated subquery evaluations",
                    state.max_correlated
                )));
            }
            state.correlated_evaluations += 1;
            if state.correlated_evaluations == 1 {
                debug!("correlated subquery: evaluating once per outer row");
            }
        }

        let relation = Arc::new(runner.run_subquery(effective)?);
        runner
            .subquery_state()
            .cache
            .insert(key, Arc::clone(&relation));
        Ok(relation)
    }
}
