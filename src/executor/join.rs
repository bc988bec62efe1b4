//! Join processor (inner / left / right / full)
//!
//! Equality joins hash the smaller input on the canonical key value and
//! probe with the other; any other predicate falls back to a nested loop.
//! Output is in left input order, each left row's matches in right input
//! order, then unmatched right rows.
use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::cancel::CancellationToken;
use super::conditions::{canonical_key, Filter};
use crate::parser::JoinType;
use crate::types::{DatabaseError, Document, RowView};

const CANCEL_CHECK_INTERVAL: usize = 1024;

/// A row set flowing between pipeline stages.
///
/// `columns` is every field name the relation is known to carry (schema
/// columns plus observed keys) and drives outer-join null-fill. `aliases`
/// are the source names whose prefix (`alias.field`) resolves into these rows.
/// `scopes` holds, per row, each alias's own document in `aliases` order, so a
/// qualified path still sees its side after a join merged the row; it is empty
/// when every alias resolves against the row itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub columns: Vec<String>,
    pub rows: Vec<Document>,
    pub aliases: Vec<String>,
    pub scopes: Vec<Vec<Document>>,
}

impl Relation {
    /// Build from rows; `known_columns` come first, then any other observed key
    #[must_use]
    pub fn new(rows: Vec<Document>, known_columns: Vec<String>) -> Self {
        let mut columns = known_columns;
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self {
            columns,
            rows,
            aliases: Vec::new(),
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases = vec![alias.into()];
        self.scopes = Vec::new();
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// View of row `i` that also resolves `alias.field` paths
    #[must_use]
    pub fn scoped(&self, i: usize) -> ScopedRow<'_> {
        let scope = self.scopes.get(i).map_or(&[][..], Vec::as_slice);
        ScopedRow::new(&self.rows[i], &self.aliases, scope)
    }

    /// Each alias's document for row `i`, in `aliases` order
    fn alias_docs(&self, i: usize) -> Vec<Document> {
        match self.scopes.get(i) {
            Some(scope) => scope.clone(),
            None => vec![self.rows[i].clone(); self.aliases.len()],
        }
    }

    /// Keep row `i` when `keep[i]` is set
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.rows.retain(|_| flags.next().copied().unwrap_or(false));
        if !self.scopes.is_empty() {
            let mut flags = keep.iter();
            self.scopes.retain(|_| flags.next().copied().unwrap_or(false));
        }
    }

    /// Stable sort of the rows (and their scopes) by `compare`
    pub fn sort_rows_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&ScopedRow<'_>, &ScopedRow<'_>) -> std::cmp::Ordering,
    {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| compare(&self.scoped(a), &self.scoped(b)));

        let mut rows: Vec<Option<Document>> = std::mem::take(&mut self.rows).into_iter().map(Some).collect();
        self.rows = order.iter().filter_map(|&i| rows[i].take()).collect();
        if !self.scopes.is_empty() {
            let mut scopes: Vec<Option<Vec<Document>>> =
                std::mem::take(&mut self.scopes).into_iter().map(Some).collect();
            self.scopes = order.iter().filter_map(|&i| scopes[i].take()).collect();
        }
    }
}

/// A document plus the aliases it may be addressed through
#[derive(Debug, Clone, Copy)]
pub struct ScopedRow<'a> {
    pub doc: &'a Document,
    aliases: &'a [String],
    scope: &'a [Document],
}

impl<'a> ScopedRow<'a> {
    #[must_use]
    pub const fn new(doc: &'a Document, aliases: &'a [String], scope: &'a [Document]) -> Self {
        Self { doc, aliases, scope }
    }

    /// The document `alias` names in this row, if the row carries that alias
    fn alias_doc(&self, alias: &str) -> Option<&'a Document> {
        let i = self.aliases.iter().position(|a| a == alias)?;
        Some(self.scope.get(i).unwrap_or(self.doc))
    }

    /// Like [`RowView::field`], borrowing from the relation rather than the view
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&'a Value> {
        if let Some((prefix, rest)) = path.split_once('.') {
            if let Some(doc) = self.alias_doc(prefix) {
                return doc.field(rest).or_else(|| self.doc.field(path));
            }
        }
        self.doc.field(path)
    }
}

impl RowView for ScopedRow<'_> {
    fn field(&self, path: &str) -> Option<&Value> {
        self.lookup(path)
    }
}

/// A candidate (left, right) pair seen by a join predicate.
///
/// Qualified paths go to the side owning the alias; unqualified paths
/// prefer the right side, matching the merge precedence.
pub struct JoinedView<'a> {
    left: ScopedRow<'a>,
    right: ScopedRow<'a>,
}

impl RowView for JoinedView<'_> {
    fn field(&self, path: &str) -> Option<&Value> {
        if let Some((prefix, rest)) = path.split_once('.') {
            if let Some(doc) = self.right.alias_doc(prefix).or_else(|| self.left.alias_doc(prefix)) {
                return doc.field(rest);
            }
        }
        self.right.doc.field(path).or_else(|| self.left.doc.field(path))
    }
}

/// Which inputs contributed to an output row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Both,
    /// Unmatched left row, right fields null-filled
    LeftOnly,
    /// Unmatched right row, left fields null-filled
    RightOnly,
}

/// How paired rows are matched
#[derive(Debug, Clone)]
pub enum JoinPredicate {
    /// `left` resolved on the left row equals `right` resolved on the right row
    Keys { left: String, right: String },
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRelation {
    pub relation: Relation,
    /// One tag per output row
    pub provenance: Vec<Provenance>,
}

pub struct JoinExecutor;

impl JoinExecutor {
    pub fn join(
        left: &Relation,
        right: &Relation,
        join_type: JoinType,
        predicate: &JoinPredicate,
        cancel: &CancellationToken,
    ) -> Result<JoinedRelation, DatabaseError> {
        let matches = match predicate {
            JoinPredicate::Keys {
                left: left_key,
                right: right_key,
            } => Self::hash_matches(left, right, left_key, right_key, cancel)?,
            JoinPredicate::Filter(filter) => {
                debug!(left = left.len(), right = right.len(), "nested loop join");
                Self::nested_loop_matches(left, right, filter, cancel)?
            }
        };

        let keep_left = matches!(join_type, JoinType::Left | JoinType::Full);
        let keep_right = matches!(join_type, JoinType::Right | JoinType::Full);

        let mut rows = Vec::new();
        let mut scopes = Vec::new();
        let mut provenance = Vec::new();
        let left_blank = vec![Document::new(); left.aliases.len()];
        let right_blank = vec![Document::new(); right.aliases.len()];
        let mut right_matched = vec![false; right.len()];

        for (l, right_indexes) in matches.iter().enumerate() {
            let left_row = &left.rows[l];
            if right_indexes.is_empty() {
                if keep_left {
                    rows.push(Self::null_filled(left_row, &right.columns));
                    scopes.push([left.alias_docs(l), right_blank.clone()].concat());
                    provenance.push(Provenance::LeftOnly);
                }
                continue;
            }
            for &r in right_indexes {
                right_matched[r] = true;
                let mut merged = left_row.clone();
                merged.merge_from(&right.rows[r]);
                rows.push(merged);
                scopes.push([left.alias_docs(l), right.alias_docs(r)].concat());
                provenance.push(Provenance::Both);
            }
        }

        if keep_right {
            for (r, matched) in right_matched.iter().enumerate() {
                if !matched {
                    let mut filled = Document::new();
                    for column in &left.columns {
                        if !right.rows[r].contains_key(column) {
                            filled.insert(column.clone(), Value::Null);
                        }
                    }
                    filled.merge_from(&right.rows[r]);
                    rows.push(filled);
                    scopes.push([left_blank.clone(), right.alias_docs(r)].concat());
                    provenance.push(Provenance::RightOnly);
                }
            }
        }

        let mut columns = left.columns.clone();
        for c in &right.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
        let mut aliases = left.aliases.clone();
        aliases.extend(right.aliases.iter().cloned());

        Ok(JoinedRelation {
            relation: Relation {
                columns,
                rows,
                aliases,
                scopes,
            },
            provenance,
        })
    }

    /// For each left row, the indexes of matching right rows in right order
    fn hash_matches(
        left: &Relation,
        right: &Relation,
        left_key: &str,
        right_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<usize>>, DatabaseError> {
        let mut matches = vec![Vec::new(); left.len()];
        let key_of = |rel: &Relation, i: usize, path: &str| rel.scoped(i).field(path).and_then(canonical_key);

        if right.len() <= left.len() {
            debug!(build = "right", rows = right.len(), "hash join");
            let mut table: HashMap<String, Vec<usize>> = HashMap::new();
            for r in 0..right.len() {
                cancel.check_every(r, CANCEL_CHECK_INTERVAL)?;
                if let Some(k) = key_of(right, r, right_key) {
                    table.entry(k).or_default().push(r);
                }
            }
            for (l, slot) in matches.iter_mut().enumerate() {
                cancel.check_every(l, CANCEL_CHECK_INTERVAL)?;
                if let Some(hits) = key_of(left, l, left_key).and_then(|k| table.get(&k)) {
                    slot.extend_from_slice(hits);
                }
            }
        } else {
            debug!(build = "left", rows = left.len(), "hash join");
            let mut table: HashMap<String, Vec<usize>> = HashMap::new();
            for l in 0..left.len() {
                cancel.check_every(l, CANCEL_CHECK_INTERVAL)?;
                if let Some(k) = key_of(left, l, left_key) {
                    table.entry(k).or_default().push(l);
                }
            }
            for r in 0..right.len() {
                cancel.check_every(r, CANCEL_CHECK_INTERVAL)?;
                if let Some(hits) = key_of(right, r, right_key).and_then(|k| table.get(&k)) {
                    for &l in hits {
                        matches[l].push(r);
                    }
                }
            }
        }
        Ok(matches)
    }

    fn nested_loop_matches(
        left: &Relation,
        right: &Relation,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<usize>>, DatabaseError> {
        let mut matches = vec![Vec::new(); left.len()];
        for (l, slot) in matches.iter_mut().enumerate() {
            cancel.check()?;
            for r in 0..right.len() {
                let view = JoinedView {
                    left: left.scoped(l),
                    right: right.scoped(r),
                };
                if filter.matches(&view) {
                    slot.push(r);
                }
            }
        }
        Ok(matches)
    }

    /// Copy of `row` with every absent `columns` entry set to null
    fn null_filled(row: &Document, columns: &[String]) -> Document {
        let mut filled = row.clone();
        for column in columns {
            if !filled.contains_key(column) {
                filled.insert(column.clone(), Value::Null);
            }
        }
        filled
    }
}
