//! Leaf entities of the query model.
//!
//! Everything here is plain data. Invariants that span several entities
//! (join endpoints, filter/subquery links) are maintained by the mutators on
//! [`QueryContext`](super::QueryContext) and [`QueryModel`](super::QueryModel).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identity and layout
// ============================================================================

/// Stable, opaque identifier for every entity in the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canvas position of a table box. Never interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Canvas frame of a subquery or CTE container. Never interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// ============================================================================
// Vocabulary enums
// ============================================================================

/// Join flavour drawn on a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    /// Keyword sequence emitted before the joined table.
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

/// Operator of a WHERE filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterOperator {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "NOT ILIKE")]
    NotILike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "NOT BETWEEN")]
    NotBetween,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
    #[serde(rename = "IS TRUE")]
    IsTrue,
    #[serde(rename = "IS FALSE")]
    IsFalse,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 18] = [
        FilterOperator::Eq,
        FilterOperator::NotEq,
        FilterOperator::Lt,
        FilterOperator::LtEq,
        FilterOperator::Gt,
        FilterOperator::GtEq,
        FilterOperator::Like,
        FilterOperator::NotLike,
        FilterOperator::ILike,
        FilterOperator::NotILike,
        FilterOperator::In,
        FilterOperator::NotIn,
        FilterOperator::Between,
        FilterOperator::NotBetween,
        FilterOperator::IsNull,
        FilterOperator::IsNotNull,
        FilterOperator::IsTrue,
        FilterOperator::IsFalse,
    ];

    pub fn as_sql(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Lt => "<",
            FilterOperator::LtEq => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::GtEq => ">=",
            FilterOperator::Like => "LIKE",
            FilterOperator::NotLike => "NOT LIKE",
            FilterOperator::ILike => "ILIKE",
            FilterOperator::NotILike => "NOT ILIKE",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT IN",
            FilterOperator::Between => "BETWEEN",
            FilterOperator::NotBetween => "NOT BETWEEN",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
            FilterOperator::IsTrue => "IS TRUE",
            FilterOperator::IsFalse => "IS FALSE",
        }
    }

    /// Parse the SQL spelling, ignoring case and surrounding whitespace.
    pub fn from_sql(text: &str) -> Option<Self> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let normalized = normalized.to_ascii_uppercase();
        let normalized = if normalized == "<>" { "!=" } else { normalized.as_str() };
        Self::ALL.into_iter().find(|op| op.as_sql() == normalized)
    }

    /// Operators rendered as `column OPERATOR` with no operand.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            FilterOperator::IsNull
                | FilterOperator::IsNotNull
                | FilterOperator::IsTrue
                | FilterOperator::IsFalse
        )
    }

    /// Operators whose value is spliced raw into `IN (...)`.
    pub fn is_list(self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }

    /// Operators whose value is spliced raw as `low AND high`.
    pub fn is_range(self) -> bool {
        matches!(self, FilterOperator::Between | FilterOperator::NotBetween)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Numeric comparison used by HAVING conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[default]
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
}

impl ComparisonOperator {
    pub fn as_sql(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::NotEq => "!=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::LtEq => "<=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::GtEq => ">=",
        }
    }
}

/// How a filter or having condition is chained to the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    pub fn as_sql(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    /// Recognize an aggregate by function name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunction::Count),
            "SUM" => Some(AggregateFunction::Sum),
            "AVG" => Some(AggregateFunction::Avg),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Where a nested query context is spliced into its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubqueryRole {
    /// Right-hand side of a WHERE comparison, linked to one filter.
    Where,
    /// Derived table in the FROM clause.
    From,
    /// Scalar expression in the SELECT list.
    Select,
}

/// Row limit: a literal count or a `{{name}}` template placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Limit {
    Count(u64),
    Placeholder(String),
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Count(n) => write!(f, "{}", n),
            Limit::Placeholder(p) => f.write_str(p),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Aggregate wrapped around a single selected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAggregate {
    pub function: AggregateFunction,
    #[serde(default)]
    pub alias: Option<String>,
}

/// A table box on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub id: EntityId,
    pub name: String,
    pub position: Position,
    /// Declared columns in schema order. May be empty when the schema is unknown.
    pub columns: Vec<String>,
    /// Selected column names, unique, in selection order.
    pub selected: Vec<String>,
    pub aggregates: BTreeMap<String, ColumnAggregate>,
    /// Set when this entry materializes a CTE of the same model.
    pub cte: Option<EntityId>,
}

impl TableRef {
    pub fn new(name: impl Into<String>, columns: Vec<String>, position: Position) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            position,
            columns,
            selected: Vec::new(),
            aggregates: BTreeMap::new(),
            cte: None,
        }
    }

    pub fn is_selected(&self, column: &str) -> bool {
        self.selected.iter().any(|c| c == column)
    }

    /// Add a column to the selection. Returns false if it was already selected.
    pub fn select(&mut self, column: &str) -> bool {
        if self.is_selected(column) {
            return false;
        }
        self.selected.push(column.to_string());
        true
    }

    /// Remove a column from the selection, dropping its aggregate.
    pub fn deselect(&mut self, column: &str) -> bool {
        let before = self.selected.len();
        self.selected.retain(|c| c != column);
        self.aggregates.remove(column);
        before != self.selected.len()
    }

    /// Selected columns in canonical order: declared order first, then any
    /// undeclared selections in the order they were picked.
    pub fn ordered_selection(&self) -> Vec<&str> {
        let mut ordered: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| self.is_selected(c))
            .map(String::as_str)
            .collect();
        for column in &self.selected {
            if !self.columns.contains(column) {
                ordered.push(column);
            }
        }
        ordered
    }
}

/// Equality join between two tables of the same context.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub id: EntityId,
    pub source_table: EntityId,
    pub source_column: String,
    pub target_table: EntityId,
    pub target_column: String,
    pub kind: JoinKind,
}

/// Right-hand side of a filter. Literal values and subquery links exclude
/// each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOperand {
    Value(String),
    Subquery(EntityId),
}

impl Default for FilterOperand {
    fn default() -> Self {
        FilterOperand::Value(String::new())
    }
}

impl FilterOperand {
    pub fn value(&self) -> Option<&str> {
        match self {
            FilterOperand::Value(v) => Some(v),
            FilterOperand::Subquery(_) => None,
        }
    }

    pub fn subquery(&self) -> Option<&EntityId> {
        match self {
            FilterOperand::Subquery(id) => Some(id),
            FilterOperand::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub id: EntityId,
    /// `table.column` text. Tolerated verbatim even when malformed.
    pub column: String,
    pub operator: FilterOperator,
    pub operand: FilterOperand,
    /// Joins this filter to the next one.
    pub connector: Connector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub id: EntityId,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    pub id: EntityId,
    pub function: AggregateFunction,
    /// Column reference or `*`.
    pub column: String,
    pub operator: ComparisonOperator,
    pub value: String,
    pub connector: Connector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub id: EntityId,
    pub column: String,
    pub direction: SortDirection,
}

/// Aggregate expression in the SELECT list, independent of column aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectAggregate {
    pub id: EntityId,
    pub function: AggregateFunction,
    pub expression: String,
    pub alias: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_selection_follows_declared_columns() {
        let mut table = TableRef::new(
            "orders",
            vec!["id".into(), "customer_id".into(), "total".into()],
            Position::default(),
        );
        table.select("total");
        table.select("note");
        table.select("id");

        assert_eq!(table.ordered_selection(), vec!["id", "total", "note"]);
    }

    #[test]
    fn test_select_is_idempotent() {
        let mut table = TableRef::new("orders", Vec::new(), Position::default());
        assert!(table.select("id"));
        assert!(!table.select("id"));
        assert_eq!(table.selected, vec!["id".to_string()]);
    }

    #[test]
    fn test_deselect_drops_aggregate() {
        let mut table = TableRef::new("orders", Vec::new(), Position::default());
        table.select("total");
        table.aggregates.insert(
            "total".into(),
            ColumnAggregate {
                function: AggregateFunction::Sum,
                alias: None,
            },
        );

        assert!(table.deselect("total"));
        assert!(table.aggregates.is_empty());
        assert!(!table.deselect("total"));
    }

    #[test]
    fn test_filter_operator_from_sql() {
        assert_eq!(FilterOperator::from_sql("<>"), Some(FilterOperator::NotEq));
        assert_eq!(
            FilterOperator::from_sql("is  not null"),
            Some(FilterOperator::IsNotNull)
        );
        assert_eq!(FilterOperator::from_sql("~~"), None);
    }

    #[test]
    fn test_limit_serializes_untagged() {
        let count = serde_json::to_string(&Limit::Count(10)).unwrap();
        let placeholder = serde_json::to_string(&Limit::Placeholder("{{n}}".into())).unwrap();
        assert_eq!(count, "10");
        assert_eq!(placeholder, "\"{{n}}\"");
    }

    #[test]
    fn test_operator_serde_uses_sql_spelling() {
        let json = serde_json::to_string(&FilterOperator::NotBetween).unwrap();
        assert_eq!(json, "\"NOT BETWEEN\"");
        let op: FilterOperator = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, FilterOperator::GtEq);
    }
}
