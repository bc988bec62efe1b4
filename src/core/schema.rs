use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{json_type_name, Document};

/// Declared JSON type of a column. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ColumnType {
    /// Type observed for a value; `null` carries no type information
    #[must_use]
    pub const fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Boolean,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::Null => Self::Any,
        }
    }

    #[must_use]
    pub const fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Any, _)
                | (_, Value::Null)
                | (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Object, Value::Object(_))
                | (Self::Array, Value::Array(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
}

impl Column {
    #[must_use]
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            required: false,
        }
    }

    #[must_use]
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            required: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ViolationKind {
    MissingRequired,
    TypeMismatch { expected: ColumnType, found: String },
    ColumnRemoved,
    TypeChanged { from: ColumnType, to: ColumnType },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub column: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::MissingRequired => {
                write!(f, "required column '{}' is missing", self.column)
            }
            ViolationKind::TypeMismatch { expected, found } => write!(
                f,
                "column '{}' expects {expected}, found {found}",
                self.column
            ),
            ViolationKind::ColumnRemoved => {
                write!(f, "column '{}' was removed from the schema", self.column)
            }
            ViolationKind::TypeChanged { from, to } => write!(
                f,
                "column '{}' changed type from {from} to {to}",
                self.column
            ),
        }
    }
}

/// Outcome of validating a row: callers pick how strict to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ok,
    Warnings(Vec<SchemaViolation>),
}

impl Validation {
    fn from_violations(violations: Vec<SchemaViolation>) -> Self {
        if violations.is_empty() {
            Self::Ok
        } else {
            Self::Warnings(violations)
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub fn warnings(&self) -> &[SchemaViolation] {
        match self {
            Self::Ok => &[],
            Self::Warnings(w) => w,
        }
    }

    #[must_use]
    pub fn into_warnings(self) -> Vec<SchemaViolation> {
        match self {
            Self::Ok => Vec::new(),
            Self::Warnings(w) => w,
        }
    }
}

/// Ordered column list for one logical table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    #[must_use]
    pub const fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Permissive inference: every observed key becomes an optional column
    #[must_use]
    pub fn infer(doc: &Document) -> Self {
        let columns = doc
            .user_fields()
            .map(|(name, value)| Column::optional(name.clone(), ColumnType::of(value)))
            .collect();
        Self { columns }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Append unseen keys of `doc` as optional columns. Returns the added names.
    pub fn widen(&mut self, doc: &Document) -> Vec<String> {
        let mut added = Vec::new();
        for (name, value) in doc.user_fields() {
            if self.column(name).is_none() {
                self.columns
                    .push(Column::optional(name.clone(), ColumnType::of(value)));
                added.push(name.clone());
            }
        }
        added
    }

    #[must_use]
    pub fn validate(&self, doc: &Document) -> Validation {
        let mut violations = Vec::new();
        for column in &self.columns {
            match doc.get(&column.name) {
                None | Some(Value::Null) if column.required => violations.push(SchemaViolation {
                    column: column.name.clone(),
                    kind: ViolationKind::MissingRequired,
                }),
                Some(value) if !column.column_type.accepts(value) => {
                    violations.push(SchemaViolation {
                        column: column.name.clone(),
                        kind: ViolationKind::TypeMismatch {
                            expected: column.column_type,
                            found: json_type_name(value).to_string(),
                        },
                    });
                }
                _ => {}
            }
        }
        Validation::from_violations(violations)
    }

    /// Narrowing and type changes going from `self` to `next`
    #[must_use]
    pub fn diff(&self, next: &Self) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        for old in &self.columns {
            match next.column(&old.name) {
                None => violations.push(SchemaViolation {
                    column: old.name.clone(),
                    kind: ViolationKind::ColumnRemoved,
                }),
                Some(new)
                    if old.column_type != new.column_type
                        && old.column_type != ColumnType::Any =>
                {
                    violations.push(SchemaViolation {
                        column: old.name.clone(),
                        kind: ViolationKind::TypeChanged {
                            from: old.column_type,
                            to: new.column_type,
                        },
                    });
                }
                _ => {}
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_infer_makes_optional_columns() {
        let schema = Schema::infer(&doc(json!({"name": "Ann", "age": 3, "tags": [], "x": null})));
        assert_eq!(
            schema.columns,
            vec![
                Column::optional("name", ColumnType::String),
                Column::optional("age", ColumnType::Number),
                Column::optional("tags", ColumnType::Array),
                Column::optional("x", ColumnType::Any),
            ]
        );
    }

    #[test]
    fn test_infer_skips_bookkeeping_fields() {
        let mut d = doc(json!({"a": 1}));
        d.assign_identity();
        assert_eq!(Schema::infer(&d).column_names(), vec!["a"]);
    }

    #[test]
    fn test_validate_reports_without_failing() {
        let schema = Schema::new(vec![
            Column::required("name", ColumnType::String),
            Column::optional("age", ColumnType::Number),
        ]);
        let result = schema.validate(&doc(json!({"age": "old"})));
        let warnings = result.warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].kind, ViolationKind::MissingRequired);
        assert!(matches!(warnings[1].kind, ViolationKind::TypeMismatch { .. }));

        assert!(schema.validate(&doc(json!({"name": "Bo", "age": null}))).is_ok());
    }

    #[test]
    fn test_widen_appends_new_columns_only() {
        let mut schema = Schema::infer(&doc(json!({"a": 1})));
        let added = schema.widen(&doc(json!({"a": "changed", "b": true})));
        assert_eq!(added, vec!["b"]);
        assert_eq!(schema.column("a").unwrap().column_type, ColumnType::Number);
        assert_eq!(schema.column("b").unwrap().column_type, ColumnType::Boolean);
    }

    #[test]
    fn test_diff_reports_narrowing_and_type_changes() {
        let old = Schema::new(vec![
            Column::optional("a", ColumnType::Number),
            Column::optional("b", ColumnType::String),
            Column::optional("c", ColumnType::Any),
        ]);
        let new = Schema::new(vec![
            Column::optional("a", ColumnType::String),
            Column::optional("c", ColumnType::Number),
            Column::optional("d", ColumnType::Number),
        ]);
        let violations = old.diff(&new);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].column, "a");
        assert_eq!(violations[1].kind, ViolationKind::ColumnRemoved);
    }

    #[test]
    fn test_violation_serializes_with_kind_tag() {
        let v = SchemaViolation {
            column: "a".to_string(),
            kind: ViolationKind::MissingRequired,
        };
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({"column": "a", "kind": "missingRequired"})
        );
    }
}
