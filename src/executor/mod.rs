/// Executor module - turns a query document into rows
///
/// Structure:
/// - conditions: predicate translation and evaluation
/// - join: inner/outer joins over relations
/// - aggregate: groupBy and aggregate functions
/// - window: window functions
/// - subquery: scalar / set / exists subqueries, correlation
/// - cte: common table expressions
/// - queries: the pipeline tying the stages together
/// - cancel: cooperative cancellation

pub mod aggregate;
pub mod cancel;
pub mod conditions;
pub mod cte;
pub mod join;
pub mod queries;
pub mod subquery;
pub mod window;

pub use aggregate::AggregateExecutor;
pub use cancel::CancellationToken;
pub use conditions::{Filter, FilterTranslator};
pub use cte::{CteScope, CteValidator, CteView};
pub use join::{JoinExecutor, JoinPredicate, JoinedRelation, Provenance, Relation, ScopedRow};
pub use queries::{QueryExecutor, QueryOptions, QueryResult, QueryStats, TableScan, TableSource};
pub use subquery::{SubqueryExecutor, SubqueryRunner, SubqueryState};
pub use window::WindowFunctionExecutor;
