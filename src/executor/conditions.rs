//! Filter translation for `where`, `having` and join predicates
//!
//! Turns a declarative predicate tree into a [`Filter`], a pure evaluator
//! over any [`RowView`]. Subquery and outer-row operands must already be
//! bound to literals (see `SubqueryExecutor::bind`).
//!
//! Missing fields make a comparison false, never an error, so partial
//! documents cannot break a scan.
use std::cmp::Ordering;

use serde_json::Value;

use crate::parser::{Comparison, Operand, Operator, Predicate};
use crate::types::{DatabaseError, RowView};

/// Maximum nesting depth accepted for a predicate tree
const MAX_PREDICATE_DEPTH: usize = 32;

/// A translated predicate, ready to run against rows
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    node: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(bool),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Compare {
        field: String,
        op: Operator,
        rhs: Rhs,
        case_insensitive: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Rhs {
    Literal(Value),
    Field(String),
}

impl Filter {
    /// Filter that accepts every row
    #[must_use]
    pub const fn accept_all() -> Self {
        Self {
            node: Node::Const(true),
        }
    }

    pub fn matches<R: RowView + ?Sized>(&self, row: &R) -> bool {
        Self::eval(&self.node, row)
    }

    fn eval<R: RowView + ?Sized>(node: &Node, row: &R) -> bool {
        match node {
            Node::Const(b) => *b,
            Node::And(items) => items.iter().all(|n| Self::eval(n, row)),
            Node::Or(items) => items.iter().any(|n| Self::eval(n, row)),
            Node::Not(inner) => !Self::eval(inner, row),
            Node::Compare {
                field,
                op,
                rhs,
                case_insensitive,
            } => {
                let left = row.field(field);
                match op {
                    Operator::IsNull => return left.is_none_or(Value::is_null),
                    Operator::IsNotNull => return left.is_some_and(|v| !v.is_null()),
                    _ => {}
                }
                let Some(left) = left else {
                    return false;
                };
                let right = match rhs {
                    Rhs::Literal(v) => v,
                    Rhs::Field(path) => match row.field(path) {
                        Some(v) => v,
                        None => return false,
                    },
                };
                FilterTranslator::compare(left, *op, right, *case_insensitive)
            }
        }
    }
}

pub struct FilterTranslator;

impl FilterTranslator {
    /// Translate a bound predicate tree into an evaluator
    pub fn translate(predicate: &Predicate) -> Result<Filter, DatabaseError> {
        Ok(Filter {
            node: Self::translate_node(predicate, 0)?,
        })
    }

    /// Translate an optional predicate; `None` accepts everything
    pub fn translate_opt(predicate: Option<&Predicate>) -> Result<Filter, DatabaseError> {
        predicate.map_or_else(|| Ok(Filter::accept_all()), Self::translate)
    }

    fn translate_node(predicate: &Predicate, depth: usize) -> Result<Node, DatabaseError> {
        if depth > MAX_PREDICATE_DEPTH {
            return Err(DatabaseError::InvalidQuery(format!(
                "predicate nesting exceeds {MAX_PREDICATE_DEPTH} levels"
            )));
        }

        match predicate {
            Predicate::And { and } => Ok(Node::And(
                and.iter()
                    .map(|p| Self::translate_node(p, depth + 1))
                    .collect::<Result<_, _>>()?,
            )),
            Predicate::Or { or } => Ok(Node::Or(
                or.iter()
                    .map(|p| Self::translate_node(p, depth + 1))
                    .collect::<Result<_, _>>()?,
            )),
            Predicate::Not { not } => Ok(Node::Not(Box::new(Self::translate_node(not, depth + 1)?))),
            Predicate::Exists { .. } => Err(DatabaseError::InvalidQuery(
                "exists subquery was not resolved before filtering".to_string(),
            )),
            Predicate::Compare(comparison) => Self::translate_comparison(comparison),
        }
    }

    fn translate_comparison(c: &Comparison) -> Result<Node, DatabaseError> {
        let rhs = match &c.value {
            Operand::Literal(v) => Rhs::Literal(v.clone()),
            Operand::Field { field } => Rhs::Field(field.clone()),
            Operand::Outer { outer } => {
                return Err(DatabaseError::InvalidQuery(format!(
                    "outer reference '{outer}' used outside a subquery"
                )))
            }
            Operand::Subquery { .. } => {
                return Err(DatabaseError::InvalidQuery(
                    "subquery operand was not resolved before filtering".to_string(),
                ))
            }
        };

        if let Rhs::Literal(value) = &rhs {
            match c.op {
                Operator::In | Operator::NotIn if !value.is_array() => {
                    return Err(DatabaseError::InvalidQuery(format!(
                        "'{}' needs an array value",
                        c.field
                    )));
                }
                Operator::Between if value.as_array().is_none_or(|a| a.len() != 2) => {
                    return Err(DatabaseError::InvalidQuery(format!(
                        "between on '{}' needs [low, high]",
                        c.field
                    )));
                }
                Operator::Like if !value.is_string() => {
                    return Err(DatabaseError::InvalidQuery(format!(
                        "like on '{}' needs a string pattern",
                        c.field
                    )));
                }
                _ => {}
            }
        }

        Ok(Node::Compare {
            field: c.field.clone(),
            op: c.op,
            rhs,
            case_insensitive: c.case_insensitive,
        })
    }

    /// Apply one operator to two present values
    fn compare(left: &Value, op: Operator, right: &Value, ci: bool) -> bool {
        match op {
            Operator::Eq => values_equal(left, right, ci),
            Operator::Ne => !values_equal(left, right, ci),
            Operator::Gt => numeric_cmp(left, right) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                numeric_cmp(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => numeric_cmp(left, right) == Some(Ordering::Less),
            Operator::Lte => matches!(
                numeric_cmp(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Between => match right.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    matches!(numeric_cmp(left, low), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(numeric_cmp(left, high), Some(Ordering::Less | Ordering::Equal))
                }
                _ => false,
            },
            Operator::In => right
                .as_array()
                .is_some_and(|set| set.iter().any(|v| values_equal(left, v, ci))),
            Operator::NotIn => right
                .as_array()
                .is_some_and(|set| !set.iter().any(|v| values_equal(left, v, ci))),
            Operator::Contains => match (left, right) {
                (Value::String(s), Value::String(needle)) => {
                    with_case(s, ci).contains(with_case(needle, ci).as_str())
                }
                (Value::Array(items), item) => items.iter().any(|v| values_equal(v, item, ci)),
                _ => false,
            },
            Operator::StartsWith => match (left, right) {
                (Value::String(s), Value::String(prefix)) => {
                    with_case(s, ci).starts_with(with_case(prefix, ci).as_str())
                }
                _ => false,
            },
            Operator::EndsWith => match (left, right) {
                (Value::String(s), Value::String(suffix)) => {
                    with_case(s, ci).ends_with(with_case(suffix, ci).as_str())
                }
                _ => false,
            },
            Operator::Like => match (left, right) {
                (Value::String(s), Value::String(pattern)) => {
                    Self::like_pattern_match(&with_case(s, ci), &with_case(pattern, ci))
                }
                _ => false,
            },
            Operator::IsNull => left.is_null(),
            Operator::IsNotNull => !left.is_null(),
        }
    }

    /// SQL LIKE: `%` matches any run of characters, `_` exactly one.
    ///
    /// Greedy scan that backtracks only to the most recent `%`, so the cost
    /// is O(text * pattern) at worst.
    fn like_pattern_match(text: &str, pattern: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();

        let (mut t, mut p) = (0, 0);
        // pattern index after the last `%`, and the text index it was matched at
        let mut resume: Option<(usize, usize)> = None;

        while t < text.len() {
            match pattern.get(p) {
                Some('%') => {
                    p += 1;
                    resume = Some((p, t));
                }
                Some('_') => {
                    p += 1;
                    t += 1;
                }
                Some(c) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                _ => match resume {
                    // let the last `%` swallow one more character
                    Some((after, start)) => {
                        p = after;
                        t = start + 1;
                        resume = Some((after, start + 1));
                    }
                    None => return false,
                },
            }
        }
        pattern[p..].iter().all(|c| *c == '%')
    }
}

fn with_case(s: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        s.to_lowercase()
    } else {
        s.to_string()
    }
}

/// Type-aware equality; numbers compare by value (`1 == 1.0`)
#[must_use]
pub fn values_equal(left: &Value, right: &Value, case_insensitive: bool) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::String(a), Value::String(b)) if case_insensitive => {
            a.to_lowercase() == b.to_lowercase()
        }
        _ => left == right,
    }
}

/// Numeric view of a value: numbers and numeric strings. Booleans are not numbers.
#[must_use]
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn numeric_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    to_number(left)?.partial_cmp(&to_number(right)?)
}

/// Canonical hash key for joins and grouping. `None` for null.
#[must_use]
pub fn canonical_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(format!("b:{b}")),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => format!("n:{i}"),
            None => format!("n:{}", n.as_f64().unwrap_or(f64::NAN)),
        }),
        Value::String(s) => Some(format!("s:{s}")),
        other => Some(format!("j:{other}")),
    }
}

/// Total order used by `orderBy` and window ordering.
///
/// Missing and null sort first, then booleans, numbers, strings, arrays,
/// objects.
#[must_use]
pub fn compare_for_sort(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(a @ (Value::Array(_) | Value::Object(_))), Some(b)) if rank(Some(a)) == rank(Some(b)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(left).cmp(&rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_predicate;
    use crate::types::Document;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn filter(json: &str) -> Filter {
        FilterTranslator::translate(&parse_predicate(json).unwrap()).unwrap()
    }

    fn alice() -> Document {
        doc(json!({"name": "Alice", "age": 30, "score": "12.5", "tags": ["a", "b"],
                   "address": {"city": "Oslo"}, "nickname": null}))
    }

    #[test]
    fn test_equals_condition() {
        let row = alice();
        assert!(filter(r#"{"field": "name", "op": "eq", "value": "Alice"}"#).matches(&row));
        assert!(!filter(r#"{"field": "name", "op": "eq", "value": "Bob"}"#).matches(&row));
        assert!(filter(r#"{"field": "age", "op": "eq", "value": 30.0}"#).matches(&row));
    }

    #[test]
    fn test_not_equals_condition() {
        let row = alice();
        assert!(filter(r#"{"field": "age", "op": "ne", "value": 25}"#).matches(&row));
        assert!(!filter(r#"{"field": "age", "op": "ne", "value": 30}"#).matches(&row));
    }

    #[test]
    fn test_numeric_comparisons_coerce() {
        let row = alice();
        assert!(filter(r#"{"field": "age", "op": "gt", "value": 25}"#).matches(&row));
        assert!(filter(r#"{"field": "age", "op": "lte", "value": "30"}"#).matches(&row));
        assert!(filter(r#"{"field": "score", "op": "gt", "value": 12}"#).matches(&row));
        // Not coercible: predicate fails, no error
        assert!(!filter(r#"{"field": "name", "op": "gt", "value": 1}"#).matches(&row));
        assert!(!filter(r#"{"field": "name", "op": "lt", "value": 1}"#).matches(&row));
    }

    #[test]
    fn test_unknown_field_is_false() {
        let row = alice();
        assert!(!filter(r#"{"field": "missing", "op": "eq", "value": 1}"#).matches(&row));
        assert!(!filter(r#"{"field": "missing", "op": "ne", "value": 1}"#).matches(&row));
        assert!(filter(r#"{"field": "missing", "op": "isNull"}"#).matches(&row));
        assert!(filter(r#"{"field": "nickname", "op": "isNull"}"#).matches(&row));
        assert!(!filter(r#"{"field": "nickname", "op": "isNotNull"}"#).matches(&row));
    }

    #[test]
    fn test_in_and_not_in() {
        let row = alice();
        assert!(filter(r#"{"field": "age", "op": "in", "value": [1, 30]}"#).matches(&row));
        assert!(!filter(r#"{"field": "age", "op": "notIn", "value": [1, 30]}"#).matches(&row));
        assert!(filter(r#"{"field": "name", "op": "notIn", "value": ["Bob"]}"#).matches(&row));
    }

    #[test]
    fn test_string_operators() {
        let row = alice();
        assert!(filter(r#"{"field": "name", "op": "contains", "value": "lic"}"#).matches(&row));
        assert!(!filter(r#"{"field": "name", "op": "contains", "value": "LIC"}"#).matches(&row));
        assert!(filter(r#"{"field": "name", "op": "contains", "value": "LIC", "caseInsensitive": true}"#)
            .matches(&row));
        assert!(filter(r#"{"field": "name", "op": "startsWith", "value": "Al"}"#).matches(&row));
        assert!(filter(r#"{"field": "name", "op": "endsWith", "value": "ce"}"#).matches(&row));
        assert!(filter(r#"{"field": "tags", "op": "contains", "value": "b"}"#).matches(&row));
    }

    #[test]
    fn test_like_with_many_wildcards_stays_fast() {
        let text = "a".repeat(2_000);
        let started = std::time::Instant::now();
        assert!(!FilterTranslator::like_pattern_match(&text, "%a%a%a%a%a%a%a%b"));
        assert!(FilterTranslator::like_pattern_match(&text, "%a%a%a%a%a%a%a%"));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_like_patterns() {
        assert!(FilterTranslator::like_pattern_match("Alice", "A%"));
        assert!(FilterTranslator::like_pattern_match("Alice", "%ice"));
        assert!(FilterTranslator::like_pattern_match("Alice", "A_ice"));
        assert!(FilterTranslator::like_pattern_match("Alice", "%%l%"));
        assert!(!FilterTranslator::like_pattern_match("Alice", "A_ce"));
        assert!(!FilterTranslator::like_pattern_match("", "_"));
        assert!(FilterTranslator::like_pattern_match("", "%"));
        assert!(FilterTranslator::like_pattern_match("abcabd", "%ab_"));
        assert!(!FilterTranslator::like_pattern_match("abc", "%b"));
    }

    #[test]
    fn test_between() {
        let row = alice();
        assert!(filter(r#"{"field": "age", "op": "between", "value": [30, 40]}"#).matches(&row));
        assert!(!filter(r#"{"field": "age", "op": "between", "value": [31, 40]}"#).matches(&row));
    }

    #[test]
    fn test_boolean_combinators() {
        let row = alice();
        assert!(filter(
            r#"{"and": [{"field": "age", "op": "gte", "value": 30},
                        {"or": [{"field": "name", "op": "eq", "value": "Bob"},
                                {"field": "address.city", "op": "eq", "value": "Oslo"}]}]}"#
        )
        .matches(&row));
        assert!(filter(r#"{"not": {"field": "missing", "op": "eq", "value": 1}}"#).matches(&row));
        assert!(filter(r#"{"and": []}"#).matches(&row));
        assert!(!filter(r#"{"or": []}"#).matches(&row));
    }

    #[test]
    fn test_field_operand() {
        let row = doc(json!({"a": 3, "b": 2}));
        assert!(filter(r#"{"field": "a", "op": "gt", "value": {"field": "b"}}"#).matches(&row));
        assert!(!filter(r#"{"field": "a", "op": "gt", "value": {"field": "c"}}"#).matches(&row));
    }

    #[test]
    fn test_malformed_operands_are_rejected() {
        for json in [
            r#"{"field": "a", "op": "in", "value": 3}"#,
            r#"{"field": "a", "op": "between", "value": [1]}"#,
            r#"{"field": "a", "op": "like", "value": 3}"#,
            r#"{"field": "a", "op": "eq", "value": {"outer": "x"}}"#,
            r#"{"exists": {"from": "t"}}"#,
        ] {
            let err = FilterTranslator::translate(&parse_predicate(json).unwrap()).unwrap_err();
            assert_eq!(err.kind(), "InvalidQuery", "{json}");
        }
    }

    #[test]
    fn test_canonical_key_normalises_numbers() {
        assert_eq!(canonical_key(&json!(1)), canonical_key(&json!(1.0)));
        assert_ne!(canonical_key(&json!(1)), canonical_key(&json!("1")));
        assert_eq!(canonical_key(&Value::Null), None);
    }

    #[test]
    fn test_sort_order() {
        let mut values = vec![json!("b"), json!(2), Value::Null, json!(true), json!(1.5), json!("a")];
        values.sort_by(|a, b| compare_for_sort(Some(a), Some(b)));
        assert_eq!(values, vec![Value::Null, json!(true), json!(1.5), json!(2), json!("a"), json!("b")]);
        assert_eq!(compare_for_sort(None, Some(&json!(0))), Ordering::Less);
    }
}
