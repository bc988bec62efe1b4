use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declarative query document.
///
/// ```json
/// { "ctes": [...], "from": "orders", "joins": [...], "where": {...},
///   "groupBy": [...], "aggregates": [...], "having": {...},
///   "windowSpecs": [...], "orderBy": [...], "select": [...],
///   "limit": 10, "offset": 0, "countTotal": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ctes: Vec<CteDefinition>,
    pub from: Source,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<JoinClause>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub window_specs: Vec<WindowSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// Empty means every field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<Projection>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default)]
    pub count_total: bool,
}

impl Query {
    /// `SELECT * FROM <table>`
    #[must_use]
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            ctes: Vec::new(),
            from: Source::Named(table.into()),
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            aggregates: Vec::new(),
            having: None,
            window_specs: Vec::new(),
            order_by: Vec::new(),
            select: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
            count_total: false,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    /// Every subquery nested anywhere in this query, outermost first
    pub fn subqueries(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        if let Source::Subquery { subquery, .. } = &self.from {
            out.push(subquery.as_ref());
        }
        for join in &self.joins {
            if let Source::Subquery { subquery, .. } = &join.source {
                out.push(subquery.as_ref());
            }
            if let JoinCondition::Predicate(p) = &join.on {
                p.collect_subqueries(&mut out);
            }
        }
        for predicate in self.filter.iter().chain(self.having.iter()) {
            predicate.collect_subqueries(&mut out);
        }
        for projection in &self.select {
            if let Projection::Subquery { subquery, .. } = projection {
                out.push(subquery.as_ref());
            }
        }
        out
    }
}

/// Where rows come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    /// A table or CTE name
    Named(String),
    Table {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    /// Derived table
    Subquery { subquery: Box<Query>, alias: String },
}

impl Source {
    /// Name used to qualify this source's fields (`alias.field`)
    #[must_use]
    pub fn alias(&self) -> &str {
        match self {
            Self::Named(name) => name.as_str(),
            Self::Table { table, alias } => alias.as_deref().unwrap_or(table.as_str()),
            Self::Subquery { alias, .. } => alias.as_str(),
        }
    }

    /// The table or CTE this source reads, if it is not a derived table
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) | Self::Table { table: name, .. } => Some(name.as_str()),
            Self::Subquery { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinType {
    #[default]
    Inner,
    #[serde(alias = "leftOuter")]
    Left,
    #[serde(alias = "rightOuter")]
    Right,
    #[serde(alias = "fullOuter")]
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClause {
    #[serde(rename = "type", default)]
    pub join_type: JoinType,
    #[serde(alias = "table")]
    pub source: Source,
    pub on: JoinCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinCondition {
    /// `left = right`, each side resolved against its own input
    Keys { left: String, right: String },
    /// Arbitrary predicate over the paired rows
    Predicate(Predicate),
}

/// Boolean predicate tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    And { and: Vec<Predicate> },
    Or { or: Vec<Predicate> },
    Not { not: Box<Predicate> },
    Exists { exists: Box<Query> },
    Compare(Comparison),
}

impl Predicate {
    #[must_use]
    pub fn compare(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self::Compare(Comparison {
            field: field.into(),
            op,
            value: Operand::Literal(value),
            case_insensitive: false,
        })
    }

    #[must_use]
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::compare(field, Operator::Eq, value)
    }

    fn collect_subqueries<'a>(&'a self, out: &mut Vec<&'a Query>) {
        match self {
            Self::And { and: items } | Self::Or { or: items } => {
                for p in items {
                    p.collect_subqueries(out);
                }
            }
            Self::Not { not } => not.collect_subqueries(out),
            Self::Exists { exists } => out.push(exists),
            Self::Compare(c) => {
                if let Operand::Subquery { subquery } = &c.value {
                    out.push(subquery);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: Operand,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    #[serde(alias = "=", alias = "equals")]
    Eq,
    #[serde(alias = "!=", alias = "notEquals")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
    Like,
    Between,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// Another field of the same row
    Field { field: String },
    /// A field of the enclosing query's current row; makes a subquery correlated
    Outer { outer: String },
    Subquery { subquery: Box<Query> },
    Literal(Value),
}

impl Default for Operand {
    fn default() -> Self {
        Self::Literal(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortOrder,
}

impl OrderBy {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    #[serde(alias = "average")]
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// `function(field) AS alias`; `count` without a field is `count(*)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregateSpec {
    #[must_use]
    pub fn new(function: AggregateFunction, field: Option<&str>) -> Self {
        Self {
            function,
            field: field.map(str::to_string),
            alias: None,
        }
    }

    #[must_use]
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.function.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl WindowFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RowNumber => "rowNumber",
            Self::Rank => "rank",
            Self::DenseRank => "denseRank",
            Self::Lag => "lag",
            Self::Lead => "lead",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSpec {
    pub function: WindowFunction,
    /// Input field for lag/lead and the cumulative aggregates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub partition_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Row distance for lag/lead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Value used when lag/lead runs off the partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl WindowSpec {
    #[must_use]
    pub fn new(function: WindowFunction) -> Self {
        Self {
            function,
            field: None,
            partition_by: Vec::new(),
            order_by: Vec::new(),
            alias: None,
            offset: None,
            default: None,
        }
    }

    #[must_use]
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.function.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    /// A field path, or `*`
    Column(String),
    Field {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    /// Scalar subquery evaluated per output row
    Subquery { subquery: Box<Query>, alias: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CteDefinition {
    pub name: String,
    pub query: Query,
}
