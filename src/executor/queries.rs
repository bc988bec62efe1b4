//! Query pipeline
//!
//! A query runs as a chain of stages over [`Relation`]s:
//! source, joins, where, group/aggregate, having, windows, orderBy,
//! distinct/offset/limit, projection. CTEs are validated before anything
//! runs and materialized on first reference. Subquery operands are bound to
//! literals before a predicate is translated; correlated ones per row.
use std::collections::HashSet;
use std::ops::Range;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::aggregate::AggregateExecutor;
use super::cancel::CancellationToken;
use super::conditions::{compare_for_sort, FilterTranslator};
use super::cte::{CteScope, CteValidator, CteView};
use super::join::{JoinExecutor, JoinPredicate, Relation};
use super::subquery::{SubqueryExecutor, SubqueryRunner, SubqueryState};
use super::window::WindowFunctionExecutor;
use crate::parser::{JoinCondition, OrderBy, Predicate, Projection, Query, SortOrder, Source};
use crate::types::{DatabaseError, Document, RowView};

const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Where base tables come from
pub trait TableSource: Send + Sync {
    /// Every row of `table`; `NotFound` if the table does not exist
    fn scan(&self, table: &str, cancel: &CancellationToken) -> Result<TableScan, DatabaseError>;
}

pub struct TableScan {
    pub relation: Relation,
    /// Partitions read to produce the rows
    pub partitions: usize,
}

/// Per-query execution limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    /// Reject correlated subqueries outright when false
    pub allow_correlated: bool,
    /// Upper bound on correlated subquery executions per query
    pub max_correlated_evaluations: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            allow_correlated: true,
            max_correlated_evaluations: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub partitions_scanned: usize,
    pub rows_scanned: usize,
    pub correlated_evaluations: usize,
    pub subquery_cache_hits: usize,
    pub ctes_materialized: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Document>,
    /// Row count before offset/limit, when `countTotal` was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub stats: QueryStats,
}

pub struct QueryExecutor;

impl QueryExecutor {
    pub fn execute(
        source: &dyn TableSource,
        query: &Query,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        let started = Instant::now();
        CteValidator::validate(query)?;

        let mut run = Run {
            source,
            cancel,
            subqueries: SubqueryState::new(options.allow_correlated, options.max_correlated_evaluations),
            stats: QueryStats::default(),
            next_scope: 0,
        };
        let output = run.execute(query, None)?;

        let mut stats = run.stats;
        stats.correlated_evaluations = run.subqueries.correlated_evaluations;
        stats.subquery_cache_hits = run.subqueries.cache_hits;
        stats.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(
            rows = output.relation.len(),
            total = output.total,
            partitions = stats.partitions_scanned,
            correlated = stats.correlated_evaluations,
            elapsed_ms = stats.elapsed_ms,
            "query finished"
        );

        Ok(QueryResult {
            columns: output.relation.columns,
            rows: output.relation.rows,
            total: query.count_total.then_some(output.total),
            stats,
        })
    }
}

struct Output {
    relation: Relation,
    total: usize,
}

/// State shared by every query level of one execution
struct Run<'s> {
    source: &'s dyn TableSource,
    cancel: &'s CancellationToken,
    subqueries: SubqueryState,
    stats: QueryStats,
    next_scope: usize,
}

impl Run<'_> {
    fn execute<'q>(&mut self, query: &'q Query, parent: Option<CteView<'q>>) -> Result<Output, DatabaseError> {
        self.cancel.check()?;

        let scope;
        let view = if query.ctes.is_empty() {
            parent
        } else {
            self.next_scope += 1;
            scope = CteScope::new(self.next_scope, &query.ctes, parent);
            Some(scope.view())
        };

        let mut stage = Instant::now();
        let mut relation = self.resolve_source(&query.from, view)?;
        trace_stage("source", &relation, &mut stage);

        for join in &query.joins {
            self.cancel.check()?;
            let right = self.resolve_source(&join.source, view)?;
            let predicate = match &join.on {
                JoinCondition::Keys { left, right } => JoinPredicate::Keys {
                    left: left.clone(),
                    right: right.clone(),
                },
                JoinCondition::Predicate(p) => {
                    let bound = self.bind_uncorrelated(p, view, "a join condition")?;
                    JoinPredicate::Filter(FilterTranslator::translate(&bound)?)
                }
            };
            relation = JoinExecutor::join(&relation, &right, join.join_type, &predicate, self.cancel)?.relation;
            trace_stage("join", &relation, &mut stage);
        }

        if let Some(filter) = &query.filter {
            relation = self.filter_relation(relation, filter, view)?;
            trace_stage("where", &relation, &mut stage);
        }

        if !query.group_by.is_empty() || !query.aggregates.is_empty() {
            relation = AggregateExecutor::aggregate(&relation, &query.group_by, &query.aggregates, self.cancel)?;
            trace_stage("aggregate", &relation, &mut stage);
            if let Some(having) = &query.having {
                relation = self.filter_relation(relation, having, view)?;
                trace_stage("having", &relation, &mut stage);
            }
        } else if query.having.is_some() {
            return Err(DatabaseError::InvalidQuery(
                "having requires groupBy or aggregates".to_string(),
            ));
        }

        for spec in &query.window_specs {
            WindowFunctionExecutor::apply(&mut relation, spec, self.cancel)?;
        }
        if !query.window_specs.is_empty() {
            trace_stage("window", &relation, &mut stage);
        }

        if !query.order_by.is_empty() {
            sort_relation(&mut relation, &query.order_by);
            trace_stage("order", &relation, &mut stage);
        }

        let columns = output_columns(&relation, &query.select);
        let (rows, total) = if query.distinct {
            let projected = self.project_rows(&relation, 0..relation.len(), &query.select, view)?;
            let mut seen = HashSet::new();
            let mut unique = Vec::new();
            for doc in projected {
                if seen.insert(serde_json::to_string(&doc)?) {
                    unique.push(doc);
                }
            }
            let total = unique.len();
            let range = page(total, query.offset, query.limit);
            (unique.drain(range).collect(), total)
        } else {
            let total = relation.len();
            let range = page(total, query.offset, query.limit);
            (self.project_rows(&relation, range, &query.select, view)?, total)
        };

        let relation = Relation {
            columns,
            rows,
            ..Relation::default()
        };
        trace_stage("project", &relation, &mut stage);
        Ok(Output { relation, total })
    }

    /// Rows of a table, CTE or derived table, addressable by the source alias
    fn resolve_source(&mut self, source: &Source, view: Option<CteView<'_>>) -> Result<Relation, DatabaseError> {
        let relation = match source {
            Source::Subquery { subquery, .. } => self.execute(subquery, view)?.relation,
            Source::Named(name) | Source::Table { table: name, .. } => {
                let cte = match view {
                    Some(v) => v.resolve(name, |definition, inner| {
                        self.stats.ctes_materialized += 1;
                        debug!(cte = %definition.name, "materializing CTE");
                        self.execute(&definition.query, Some(inner)).map(|o| o.relation)
                    })?,
                    None => None,
                };
                match cte {
                    Some(rows) => Relation::clone(&rows),
                    None => {
                        let scan = self.source.scan(name, self.cancel)?;
                        self.stats.partitions_scanned += scan.partitions;
                        self.stats.rows_scanned += scan.relation.len();
                        scan.relation
                    }
                }
            }
        };
        Ok(relation.with_alias(source.alias()))
    }

    /// Bind a predicate that must not depend on the row it filters
    fn bind_uncorrelated(
        &mut self,
        predicate: &Predicate,
        view: Option<CteView<'_>>,
        context: &str,
    ) -> Result<Predicate, DatabaseError> {
        if !SubqueryExecutor::has_subqueries(predicate) {
            return Ok(predicate.clone());
        }
        if SubqueryExecutor::depends_on_row(predicate) {
            return Err(DatabaseError::InvalidQuery(format!(
                "correlated subqueries are not supported in {context}"
            )));
        }
        let mut runner = ScopedRunner { run: self, scope: view };
        SubqueryExecutor::bind(predicate, None, &mut runner)
    }

    fn filter_relation(
        &mut self,
        mut relation: Relation,
        predicate: &Predicate,
        view: Option<CteView<'_>>,
    ) -> Result<Relation, DatabaseError> {
        let mut keep = Vec::with_capacity(relation.len());

        if SubqueryExecutor::depends_on_row(predicate) {
            let mut runner = ScopedRunner { run: self, scope: view };
            for i in 0..relation.len() {
                runner.run.cancel.check()?;
                let row = relation.scoped(i);
                let bound = SubqueryExecutor::bind(predicate, Some(&row), &mut runner)?;
                keep.push(FilterTranslator::translate(&bound)?.matches(&row));
            }
        } else {
            let bound = self.bind_uncorrelated(predicate, view, "this filter")?;
            let filter = FilterTranslator::translate(&bound)?;
            for i in 0..relation.len() {
                self.cancel.check_every(i, CANCEL_CHECK_INTERVAL)?;
                keep.push(filter.matches(&relation.scoped(i)));
            }
        }

        relation.retain_rows(&keep);
        Ok(relation)
    }

    fn project_rows(
        &mut self,
        relation: &Relation,
        range: Range<usize>,
        select: &[Projection],
        view: Option<CteView<'_>>,
    ) -> Result<Vec<Document>, DatabaseError> {
        if select.is_empty() {
            return Ok(relation.rows[range].to_vec());
        }

        let mut out = Vec::with_capacity(range.len());
        let mut runner = ScopedRunner { run: self, scope: view };
        for i in range {
            runner.run.cancel.check_every(i, CANCEL_CHECK_INTERVAL)?;
            let row = relation.scoped(i);
            let mut doc = Document::new();
            for item in select {
                match item {
                    Projection::Column(path) if path == "*" => doc.merge_from(row.doc),
                    Projection::Column(path) => {
                        doc.insert(path.clone(), row.field(path).cloned().unwrap_or(Value::Null));
                    }
                    Projection::Field { field, alias } => {
                        let name = alias.as_deref().unwrap_or(field.as_str());
                        doc.insert(name, row.field(field).cloned().unwrap_or(Value::Null));
                    }
                    Projection::Subquery { subquery, alias } => {
                        let value = SubqueryExecutor::scalar(subquery, Some(&row), &mut runner)?;
                        doc.insert(alias.clone(), value);
                    }
                }
            }
            out.push(doc);
        }
        Ok(out)
    }
}

/// Runs subqueries of one query level inside that level's CTE scope
struct ScopedRunner<'r, 's, 'q> {
    run: &'r mut Run<'s>,
    scope: Option<CteView<'q>>,
}

impl SubqueryRunner for ScopedRunner<'_, '_, '_> {
    fn run_subquery(&mut self, query: &Query) -> Result<Relation, DatabaseError> {
        self.run.execute(query, self.scope).map(|output| output.relation)
    }

    fn subquery_state(&mut self) -> &mut SubqueryState {
        &mut self.run.subqueries
    }

    fn scope_key(&self) -> usize {
        self.scope.map_or(0, |view| view.key())
    }
}

fn trace_stage(stage: &'static str, relation: &Relation, started: &mut Instant) {
    debug!(stage, rows = relation.len(), elapsed = ?started.elapsed(), "query stage");
    *started = Instant::now();
}

/// Stable multi-key sort; nulls and missing values first
fn sort_relation(relation: &mut Relation, order_by: &[OrderBy]) {
    relation.sort_rows_by(|ra, rb| {
        for key in order_by {
            let cmp = compare_for_sort(ra.field(&key.field), rb.field(&key.field));
            if cmp.is_ne() {
                return if key.direction == SortOrder::Asc { cmp } else { cmp.reverse() };
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn output_columns(relation: &Relation, select: &[Projection]) -> Vec<String> {
    if select.is_empty() {
        return relation.columns.clone();
    }
    let mut columns: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !columns.iter().any(|c| c == name) {
            columns.push(name.to_string());
        }
    };
    for item in select {
        match item {
            Projection::Column(path) if path == "*" => relation.columns.iter().for_each(|c| push(c.as_str())),
            Projection::Column(path) => push(path.as_str()),
            Projection::Field { field, alias } => push(alias.as_deref().unwrap_or(field.as_str())),
            Projection::Subquery { alias, .. } => push(alias.as_str()),
        }
    }
    columns
}

/// Row range selected by `offset` / `limit`
fn page(len: usize, offset: Option<usize>, limit: Option<usize>) -> Range<usize> {
    let start = offset.unwrap_or(0).min(len);
    let end = limit.map_or(len, |l| start.saturating_add(l).min(len));
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tables {
        tables: HashMap<String, Vec<Value>>,
        scans: AtomicUsize,
    }

    impl Tables {
        fn shop() -> Self {
            let mut tables = HashMap::new();
            tables.insert(
                "customers".to_string(),
                vec![
                    json!({"_id": "c1", "name": "Ann", "city": "Oslo"}),
                    json!({"_id": "c2", "name": "Bob", "city": "Rome"}),
                    json!({"_id": "c3", "name": "Cid", "city": "Oslo"}),
                ],
            );
            tables.insert(
                "orders".to_string(),
                vec![
                    json!({"_id": "o1", "customer": "c1", "total": 10}),
                    json!({"_id": "o2", "customer": "c1", "total": 30}),
                    json!({"_id": "o3", "customer": "c2", "total": 5}),
                ],
            );
            Self {
                tables,
                scans: AtomicUsize::new(0),
            }
        }
    }

    impl TableSource for Tables {
        fn scan(&self, table: &str, cancel: &CancellationToken) -> Result<TableScan, DatabaseError> {
            cancel.check()?;
            let rows = self
                .tables
                .get(table)
                .ok_or_else(|| DatabaseError::NotFound(format!("table '{table}'")))?;
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(TableScan {
                relation: Relation::new(
                    rows.iter().map(|v| Document::from_value(v.clone()).unwrap()).collect(),
                    Vec::new(),
                ),
                partitions: 1,
            })
        }
    }

    /// Every scan returns a different single row
    struct Ticking {
        calls: AtomicUsize,
    }

    impl TableSource for Ticking {
        fn scan(&self, _table: &str, _cancel: &CancellationToken) -> Result<TableScan, DatabaseError> {
            let tick = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TableScan {
                relation: Relation::new(vec![Document::from_value(json!({"tick": tick})).unwrap()], Vec::new()),
                partitions: 1,
            })
        }
    }

    fn run(source: &dyn TableSource, query: &str) -> Result<QueryResult, DatabaseError> {
        QueryExecutor::execute(
            source,
            &parse_query(query).unwrap(),
            &QueryOptions::default(),
            &CancellationToken::new(),
        )
    }

    fn values(result: &QueryResult) -> Vec<Value> {
        result.rows.iter().cloned().map(Document::into_value).collect()
    }

    #[test]
    fn test_filter_order_and_paging() {
        let source = Tables::shop();
        let result = run(
            &source,
            r#"{"from": "customers", "where": {"field": "city", "op": "eq", "value": "Oslo"},
                "orderBy": [{"field": "name", "direction": "desc"}], "select": ["name"], "countTotal": true}"#,
        )
        .unwrap();
        assert_eq!(values(&result), vec![json!({"name": "Cid"}), json!({"name": "Ann"})]);
        assert_eq!(result.total, Some(2));
        assert_eq!(result.columns, vec!["name"]);

        let page = run(
            &source,
            r#"{"from": "customers", "orderBy": [{"field": "name"}], "select": ["name"],
                "offset": 1, "limit": 1, "countTotal": true}"#,
        )
        .unwrap();
        assert_eq!(values(&page), vec![json!({"name": "Bob"})]);
        assert_eq!(page.total, Some(3));
        assert_eq!(page.stats.partitions_scanned, 1);
    }

    #[test]
    fn test_left_join_null_fills_unmatched() {
        let result = run(
            &Tables::shop(),
            r#"{"from": {"table": "customers", "alias": "c"},
                "joins": [{"type": "left", "source": {"table": "orders", "alias": "o"},
                           "on": {"left": "c._id", "right": "o.customer"}}],
                "select": ["name", "total"]}"#,
        )
        .unwrap();
        assert_eq!(
            values(&result),
            vec![
                json!({"name": "Ann", "total": 10}),
                json!({"name": "Ann", "total": 30}),
                json!({"name": "Bob", "total": 5}),
                json!({"name": "Cid", "total": null}),
            ]
        );
    }

    #[test]
    fn test_group_having_order() {
        let source = Tables::shop();
        let all = run(
            &source,
            r#"{"from": "orders", "groupBy": ["customer"], "aggregates": [{"function": "sum", "field": "total"}],
                "orderBy": [{"field": "sum", "direction": "desc"}]}"#,
        )
        .unwrap();
        assert_eq!(
            values(&all),
            vec![json!({"customer": "c1", "sum": 40}), json!({"customer": "c2", "sum": 5})]
        );

        let filtered = run(
            &source,
            r#"{"from": "orders", "groupBy": ["customer"], "aggregates": [{"function": "sum", "field": "total"}],
                "having": {"field": "sum", "op": "gt", "value": 10}}"#,
        )
        .unwrap();
        assert_eq!(values(&filtered), vec![json!({"customer": "c1", "sum": 40})]);
    }

    #[test]
    fn test_having_without_grouping_is_invalid() {
        let err = run(&Tables::shop(), r#"{"from": "orders", "having": {"field": "x", "op": "eq", "value": 1}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidQuery");
    }

    #[test]
    fn test_cte_referenced_twice_is_evaluated_once() {
        let source = Ticking {
            calls: AtomicUsize::new(0),
        };
        let result = run(
            &source,
            r#"{"ctes": [{"name": "snap", "query": {"from": "clock"}}],
                "from": "snap",
                "joins": [{"source": {"table": "snap", "alias": "again"}, "on": {"left": "tick", "right": "again.tick"}}]}"#,
        )
        .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.stats.ctes_materialized, 1);
    }

    #[test]
    fn test_cte_chain() {
        let result = run(
            &Tables::shop(),
            r#"{"ctes": [{"name": "big", "query": {"from": "orders", "where": {"field": "total", "op": "gte", "value": 10}}},
                         {"name": "bigCustomers", "query": {"from": "big", "select": ["customer"], "distinct": true}}],
                "from": "bigCustomers"}"#,
        )
        .unwrap();
        assert_eq!(values(&result), vec![json!({"customer": "c1"})]);
        assert_eq!(result.stats.ctes_materialized, 2);
    }

    #[test]
    fn test_cyclic_cte_fails_before_scanning() {
        let source = Tables::shop();
        let err = run(
            &source,
            r#"{"ctes": [{"name": "a", "query": {"from": "b"}}, {"name": "b", "query": {"from": "orders"}}],
                "from": "a"}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "CyclicCteReferenceError");
        assert_eq!(source.scans.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_correlated_exists() {
        let result = run(
            &Tables::shop(),
            r#"{"from": "customers",
                "where": {"exists": {"from": "orders",
                    "where": {"field": "customer", "op": "eq", "value": {"outer": "_id"}}}},
                "select": ["name"]}"#,
        )
        .unwrap();
        assert_eq!(values(&result), vec![json!({"name": "Ann"}), json!({"name": "Bob"})]);
        assert_eq!(result.stats.correlated_evaluations, 3);
    }

    #[test]
    fn test_scalar_subquery_column() {
        let result = run(
            &Tables::shop(),
            r#"{"from": "customers",
                "select": ["name", {"subquery": {"from": "orders", "aggregates": [{"function": "count"}],
                    "where": {"field": "customer", "op": "eq", "value": {"outer": "_id"}}}, "alias": "orders"}]}"#,
        )
        .unwrap();
        assert_eq!(
            values(&result),
            vec![
                json!({"name": "Ann", "orders": 2}),
                json!({"name": "Bob", "orders": 1}),
                json!({"name": "Cid", "orders": 0}),
            ]
        );
        assert_eq!(result.columns, vec!["name", "orders"]);
    }

    #[test]
    fn test_uncorrelated_in_subquery_runs_once() {
        let source = Tables::shop();
        let result = run(
            &source,
            r#"{"from": "customers",
                "where": {"field": "_id", "op": "in", "value": {"subquery":
                    {"from": "orders", "where": {"field": "total", "op": "gt", "value": 8}, "select": ["customer"]}}},
                "select": ["name"]}"#,
        )
        .unwrap();
        assert_eq!(values(&result), vec![json!({"name": "Ann"})]);
        // customers once, orders once
        assert_eq!(source.scans.load(Ordering::SeqCst), 2);
        assert_eq!(result.stats.correlated_evaluations, 0);
    }

    #[test]
    fn test_correlated_subqueries_can_be_disabled() {
        let query = parse_query(
            r#"{"from": "customers", "where": {"exists": {"from": "orders",
                "where": {"field": "customer", "op": "eq", "value": {"outer": "_id"}}}}}"#,
        )
        .unwrap();
        let options = QueryOptions {
            allow_correlated: false,
            ..QueryOptions::default()
        };
        let err = QueryExecutor::execute(&Tables::shop(), &query, &options, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind(), "CostLimitExceeded");
    }

    #[test]
    fn test_correlated_subquery_in_join_condition_is_rejected() {
        let err = run(
            &Tables::shop(),
            r#"{"from": "customers", "joins": [{"source": "orders", "on": {"exists": {"from": "orders",
                "where": {"field": "customer", "op": "eq", "value": {"outer": "_id"}}}}}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidQuery");
    }

    #[test]
    fn test_distinct_then_page() {
        let source = Tables::shop();
        let result = run(
            &source,
            r#"{"from": "orders", "select": ["customer"], "distinct": true, "countTotal": true}"#,
        )
        .unwrap();
        assert_eq!(values(&result), vec![json!({"customer": "c1"}), json!({"customer": "c2"})]);
        assert_eq!(result.total, Some(2));

        let second = run(
            &source,
            r#"{"from": "orders", "select": ["customer"], "distinct": true, "offset": 1}"#,
        )
        .unwrap();
        assert_eq!(values(&second), vec![json!({"customer": "c2"})]);
    }

    #[test]
    fn test_window_rank_in_pipeline() {
        let result = run(
            &Tables::shop(),
            r#"{"from": "orders",
                "windowSpecs": [{"function": "rank", "orderBy": [{"field": "total", "direction": "desc"}], "alias": "place"}],
                "orderBy": [{"field": "place"}], "select": ["_id", "place"]}"#,
        )
        .unwrap();
        assert_eq!(
            values(&result),
            vec![
                json!({"_id": "o2", "place": 1}),
                json!({"_id": "o1", "place": 2}),
                json!({"_id": "o3", "place": 3}),
            ]
        );
    }

    #[test]
    fn test_derived_table_alias() {
        let result = run(
            &Tables::shop(),
            r#"{"from": {"subquery": {"from": "orders", "where": {"field": "total", "op": "gte", "value": 10}}, "alias": "big"},
                "where": {"field": "big.total", "op": "gt", "value": 10},
                "select": [{"field": "big._id", "alias": "id"}]}"#,
        )
        .unwrap();
        assert_eq!(values(&result), vec![json!({"id": "o2"})]);
    }

    #[test]
    fn test_star_projection_with_extra_column() {
        let result = run(
            &Tables::shop(),
            r#"{"from": "customers", "where": {"field": "_id", "op": "eq", "value": "c2"},
                "select": ["*", {"field": "city", "alias": "town"}]}"#,
        )
        .unwrap();
        assert_eq!(
            values(&result),
            vec![json!({"_id": "c2", "name": "Bob", "city": "Rome", "town": "Rome"})]
        );
        assert_eq!(result.columns, vec!["_id", "name", "city", "town"]);
    }

    #[test]
    fn test_unknown_table_is_not_found() {
        let err = run(&Tables::shop(), r#"{"from": "missing"}"#).unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_cancelled_query_stops() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = QueryExecutor::execute(
            &Tables::shop(),
            &Query::from_table("orders"),
            &QueryOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::Cancelled));
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page(5, None, None), 0..5);
        assert_eq!(page(5, Some(2), Some(2)), 2..4);
        assert_eq!(page(5, Some(9), Some(2)), 5..5);
        assert_eq!(page(5, Some(3), Some(usize::MAX)), 3..5);
    }
}
