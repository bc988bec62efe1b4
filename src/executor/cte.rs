//! Common table expressions
//!
//! Every query level with a `ctes` list gets a [`CteScope`]. A CTE is
//! materialized the first time anything references it, and every later
//! reference sees the same rows. Name lookup walks outward through the
//! enclosing scopes, so subqueries see their parents' CTEs; a CTE body only
//! sees the CTEs defined before it.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::join::Relation;
use crate::parser::{CteDefinition, Query};
use crate::types::DatabaseError;

pub struct CteScope<'q> {
    id: usize,
    parent: Option<CteView<'q>>,
    ctes: &'q [CteDefinition],
    cache: RefCell<HashMap<usize, Arc<Relation>>>,
}

/// A scope plus how many of its CTEs are visible from the current position
#[derive(Clone, Copy)]
pub struct CteView<'q> {
    scope: &'q CteScope<'q>,
    limit: usize,
}

impl<'q> CteScope<'q> {
    /// `id` must be unique among the scopes of one query execution
    #[must_use]
    pub fn new(id: usize, ctes: &'q [CteDefinition], parent: Option<CteView<'q>>) -> Self {
        Self {
            id,
            parent,
            ctes,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// View from the query body: every CTE of this scope is visible
    #[must_use]
    pub fn view(&'q self) -> CteView<'q> {
        CteView {
            scope: self,
            limit: self.ctes.len(),
        }
    }

    /// Number of CTEs materialized so far
    #[must_use]
    pub fn materialized(&self) -> usize {
        self.cache.borrow().len()
    }

    fn materialize<F>(&'q self, index: usize, run: F) -> Result<Arc<Relation>, DatabaseError>
    where
        F: FnOnce(&'q CteDefinition, CteView<'q>) -> Result<Relation, DatabaseError>,
    {
        let cached = self.cache.borrow().get(&index).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        // The body may resolve earlier CTEs of this scope, so no borrow is
        // held while it runs
        let definition = &self.ctes[index];
        let relation = Arc::new(run(
            definition,
            CteView {
                scope: self,
                limit: index,
            },
        )?);
        self.cache.borrow_mut().insert(index, Arc::clone(&relation));
        Ok(relation)
    }
}

impl<'q> CteView<'q> {
    /// Identity of the underlying scope, used to key subquery results
    #[must_use]
    pub fn key(&self) -> usize {
        self.scope.id
    }

    /// True if `name` resolves to a CTE visible from here
    #[must_use]
    pub fn defines(&self, name: &str) -> bool {
        let mut view = Some(*self);
        while let Some(current) = view {
            if current.visible().iter().any(|c| c.name == name) {
                return true;
            }
            view = current.scope.parent;
        }
        false
    }

    /// Rows of the CTE called `name`, materializing it with `run` on first
    /// use. `None` when no visible CTE has that name.
    pub fn resolve<F>(self, name: &str, run: F) -> Result<Option<Arc<Relation>>, DatabaseError>
    where
        F: FnOnce(&'q CteDefinition, CteView<'q>) -> Result<Relation, DatabaseError>,
    {
        let mut view = Some(self);
        while let Some(current) = view {
            if let Some(index) = current.visible().iter().position(|c| c.name == name) {
                return current.scope.materialize(index, run).map(Some);
            }
            view = current.scope.parent;
        }
        Ok(None)
    }

    fn visible(&self) -> &'q [CteDefinition] {
        &self.scope.ctes[..self.limit]
    }
}

pub struct CteValidator;

impl CteValidator {
    /// Check CTE ordering for `query` and every query nested in it.
    ///
    /// A body referencing its own name or a CTE defined after it is
    /// `CyclicCteReference`; a name defined twice in one list is `InvalidQuery`.
    pub fn validate(query: &Query) -> Result<(), DatabaseError> {
        let mut seen = HashSet::new();
        for (position, cte) in query.ctes.iter().enumerate() {
            if !seen.insert(cte.name.as_str()) {
                return Err(DatabaseError::InvalidQuery(format!(
                    "CTE '{}' is defined more than once",
                    cte.name
                )));
            }

            let mut references = Vec::new();
            Self::collect_references(&cte.query, &HashSet::new(), &mut references);
            for name in references {
                let defined_at = query.ctes.iter().position(|c| c.name == name);
                if defined_at.is_some_and(|at| at >= position) {
                    return Err(DatabaseError::CyclicCteReference(format!(
                        "CTE '{}' references '{}', which is not defined before it",
                        cte.name, name
                    )));
                }
            }
            Self::validate(&cte.query)?;
        }

        for nested in query.subqueries() {
            Self::validate(nested)?;
        }
        Ok(())
    }

    /// Source names read by `query` and its nested queries, skipping names
    /// that a nested `ctes` list defines for itself
    fn collect_references<'a>(query: &'a Query, shadowed: &HashSet<&'a str>, out: &mut Vec<&'a str>) {
        let mut shadowed = shadowed.clone();
        shadowed.extend(query.ctes.iter().map(|c| c.name.as_str()));

        let sources = std::iter::once(&query.from).chain(query.joins.iter().map(|j| &j.source));
        for source in sources {
            if let Some(name) = source.table_name() {
                if !shadowed.contains(name) {
                    out.push(name);
                }
            }
        }
        for cte in &query.ctes {
            Self::collect_references(&cte.query, &shadowed, out);
        }
        for nested in query.subqueries() {
            Self::collect_references(nested, &shadowed, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use crate::types::Document;
    use serde_json::json;
    use std::cell::Cell;

    fn one_row(v: serde_json::Value) -> Relation {
        Relation::new(vec![Document::from_value(v).unwrap()], Vec::new())
    }

    #[test]
    fn test_materializes_once() {
        let query = parse_query(
            r#"{"ctes": [{"name": "big", "query": {"from": "orders"}}], "from": "big"}"#,
        )
        .unwrap();
        let scope = CteScope::new(1, &query.ctes, None);
        let runs = Cell::new(0);
        let run = |_: &CteDefinition, _: CteView<'_>| {
            runs.set(runs.get() + 1);
            Ok(one_row(json!({"n": runs.get()})))
        };

        let first = scope.view().resolve("big", run).unwrap().unwrap();
        let second = scope.view().resolve("big", run).unwrap().unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(first, second);
        assert_eq!(scope.materialized(), 1);
        assert!(scope.view().resolve("orders", run).unwrap().is_none());
    }

    #[test]
    fn test_body_sees_only_earlier_ctes() {
        let query = parse_query(
            r#"{"ctes": [{"name": "a", "query": {"from": "t"}},
                         {"name": "b", "query": {"from": "a"}}], "from": "b"}"#,
        )
        .unwrap();
        let scope = CteScope::new(1, &query.ctes, None);

        let b = scope
            .view()
            .resolve("b", |def, view| {
                assert_eq!(def.name, "b");
                assert!(view.defines("a"));
                assert!(!view.defines("b"));
                let a = view
                    .resolve("a", |_, inner| {
                        assert!(!inner.defines("a"));
                        Ok(one_row(json!({"from": "a"})))
                    })?
                    .unwrap();
                Ok((*a).clone())
            })
            .unwrap()
            .unwrap();
        assert_eq!(b.rows[0].get("from"), Some(&json!("a")));
        assert_eq!(scope.materialized(), 2);
    }

    #[test]
    fn test_nested_scope_falls_back_to_parent() {
        let outer = parse_query(r#"{"ctes": [{"name": "p", "query": {"from": "t"}}], "from": "p"}"#).unwrap();
        let parent = CteScope::new(1, &outer.ctes, None);
        let child = CteScope::new(2, &[], Some(parent.view()));
        assert!(child.view().defines("p"));
        assert_ne!(child.view().key(), parent.view().key());
    }

    #[test]
    fn test_forward_reference_is_cyclic() {
        let query = parse_query(
            r#"{"ctes": [{"name": "a", "query": {"from": "b"}},
                         {"name": "b", "query": {"from": "t"}}], "from": "a"}"#,
        )
        .unwrap();
        let err = CteValidator::validate(&query).unwrap_err();
        assert_eq!(err.kind(), "CyclicCteReferenceError");
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let query = parse_query(
            r#"{"ctes": [{"name": "a", "query": {"from": "t",
                "where": {"exists": {"from": "a"}}}}], "from": "a"}"#,
        )
        .unwrap();
        assert_eq!(CteValidator::validate(&query).unwrap_err().kind(), "CyclicCteReferenceError");
    }

    #[test]
    fn test_backward_reference_and_shadowing_are_fine() {
        let query = parse_query(
            r#"{"ctes": [{"name": "a", "query": {"from": "t"}},
                         {"name": "b", "query": {"from": "a", "joins": [{"source": "a", "on": {"left": "k", "right": "k"}}]}},
                         {"name": "c", "query": {"ctes": [{"name": "d", "query": {"from": "b"}}], "from": "d"}},
                         {"name": "d", "query": {"from": "c"}}],
                "from": "d"}"#,
        )
        .unwrap();
        assert!(CteValidator::validate(&query).is_ok());
    }

    #[test]
    fn test_duplicate_name_is_invalid() {
        let query = parse_query(
            r#"{"ctes": [{"name": "a", "query": {"from": "t"}},
                         {"name": "a", "query": {"from": "t"}}], "from": "a"}"#,
        )
        .unwrap();
        assert_eq!(CteValidator::validate(&query).unwrap_err().kind(), "InvalidQuery");
    }

    #[test]
    fn test_nested_query_ctes_are_validated() {
        let query = parse_query(
            r#"{"from": "t", "where": {"exists": {"ctes": [
                {"name": "x", "query": {"from": "y"}},
                {"name": "y", "query": {"from": "t"}}], "from": "x"}}}"#,
        )
        .unwrap();
        assert_eq!(CteValidator::validate(&query).unwrap_err().kind(), "CyclicCteReferenceError");
    }
}
