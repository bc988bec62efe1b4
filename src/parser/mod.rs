// Module declarations
mod query;

// Re-export all public types
pub use query::{
    AggregateFunction,
    AggregateSpec,
    Comparison,
    CteDefinition,
    JoinClause,
    JoinCondition,
    JoinType,
    Operand,
    Operator,
    OrderBy,
    Predicate,
    Projection,
    Query,
    SortOrder,
    Source,
    WindowFunction,
    WindowSpec,
};

use crate::types::DatabaseError;

/// Parse a JSON query document
pub fn parse_query(input: &str) -> Result<Query, DatabaseError> {
    serde_json::from_str(input.trim()).map_err(|e| DatabaseError::InvalidQuery(e.to_string()))
}

/// Parse a standalone JSON predicate (used for filters and `having`)
pub fn parse_predicate(input: &str) -> Result<Predicate, DatabaseError> {
    serde_json::from_str(input.trim()).map_err(|e| DatabaseError::InvalidQuery(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_query() {
        let q = parse_query(r#"{"from": "orders"}"#).unwrap();
        assert_eq!(q, Query::from_table("orders"));
        assert_eq!(q.from.alias(), "orders");
    }

    #[test]
    fn test_parse_full_query() {
        let q = parse_query(
            r#"{
                "ctes": [{"name": "big", "query": {"from": "orders", "where": {"field": "total", "op": "gt", "value": 100}}}],
                "from": {"table": "big", "alias": "o"},
                "joins": [{"type": "left", "source": {"table": "customers", "alias": "c"},
                           "on": {"left": "o.customerId", "right": "c._id"}}],
                "where": {"and": [{"field": "c.country", "op": "eq", "value": "NO"},
                                  {"not": {"field": "o.note", "op": "isNull"}}]},
                "groupBy": ["c.name"],
                "aggregates": [{"function": "sum", "field": "o.total", "alias": "spent"}, {"function": "count"}],
                "having": {"field": "spent", "op": ">=", "value": 10},
                "windowSpecs": [{"function": "rank", "orderBy": [{"field": "spent", "direction": "desc"}], "alias": "r"}],
                "orderBy": [{"field": "spent", "direction": "desc"}],
                "select": ["c.name", {"field": "spent", "alias": "total"}],
                "limit": 5,
                "countTotal": true
            }"#,
        )
        .unwrap();

        assert_eq!(q.ctes.len(), 1);
        assert_eq!(q.from.alias(), "o");
        assert_eq!(q.joins[0].join_type, JoinType::Left);
        assert!(matches!(q.joins[0].on, JoinCondition::Keys { .. }));
        assert!(matches!(q.filter, Some(Predicate::And { .. })));
        assert_eq!(q.aggregates[1].output_name(), "count");
        assert_eq!(q.window_specs[0].function, WindowFunction::Rank);
        assert_eq!(q.order_by[0].direction, SortOrder::Desc);
        assert_eq!(q.select.len(), 2);
        assert!(q.count_total);
    }

    #[test]
    fn test_operand_variants() {
        let p = parse_predicate(r#"{"field": "a", "op": "eq", "value": {"field": "b"}}"#).unwrap();
        let Predicate::Compare(c) = p else { panic!("expected comparison") };
        assert_eq!(c.value, Operand::Field { field: "b".into() });

        let p = parse_predicate(r#"{"field": "a", "op": "eq", "value": {"outer": "o.id"}}"#).unwrap();
        let Predicate::Compare(c) = p else { panic!("expected comparison") };
        assert_eq!(c.value, Operand::Outer { outer: "o.id".into() });

        let p = parse_predicate(r#"{"field": "a", "op": "in", "value": {"subquery": {"from": "t"}}}"#).unwrap();
        let Predicate::Compare(c) = p else { panic!("expected comparison") };
        assert!(matches!(c.value, Operand::Subquery { .. }));

        let p = parse_predicate(r#"{"field": "a", "op": "in", "value": [1, 2]}"#).unwrap();
        let Predicate::Compare(c) = p else { panic!("expected comparison") };
        assert_eq!(c.value, Operand::Literal(json!([1, 2])));
    }

    #[test]
    fn test_missing_value_defaults_to_null() {
        let p = parse_predicate(r#"{"field": "a", "op": "isNull"}"#).unwrap();
        let Predicate::Compare(c) = p else { panic!("expected comparison") };
        assert_eq!(c.value, Operand::Literal(serde_json::Value::Null));
    }

    #[test]
    fn test_unknown_query_field_is_invalid() {
        let err = parse_query(r#"{"from": "t", "groupby": ["x"]}"#).unwrap_err();
        assert_eq!(err.kind(), "InvalidQuery");
    }

    #[test]
    fn test_subqueries_are_collected() {
        let q = parse_query(
            r#"{"from": "t",
                "where": {"or": [{"exists": {"from": "u"}},
                                 {"field": "x", "op": "eq", "value": {"subquery": {"from": "v"}}}]},
                "select": [{"subquery": {"from": "w"}, "alias": "s"}]}"#,
        )
        .unwrap();
        let names: Vec<&str> = q.subqueries().iter().map(|s| s.from.alias()).collect();
        assert_eq!(names, vec!["u", "v", "w"]);
    }
}
