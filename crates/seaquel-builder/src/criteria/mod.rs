//! Lesson criteria: predicates over the model and the authoritative SQL.
//!
//! Every predicate searches all contexts of the model tree (root, CTEs and
//! nested subqueries) and never fails; anything it cannot resolve counts as
//! "not satisfied". Identifier comparisons ignore ASCII case.

mod challenge;

pub use challenge::{Challenge, ChallengeProgress, CriterionOutcome};

use crate::model::{
    AggregateFunction, FilterOperator, JoinKind, QueryContext, QueryModel, SortDirection,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A check against the model and the SQL text currently in force.
pub type Predicate = Box<dyn Fn(&QueryModel, &str) -> bool>;

/// Strip identifier quotes and fold case.
fn normalize(ident: &str) -> String {
    ident.replace('"', "").trim().to_ascii_lowercase()
}

/// `wanted` may be bare (`price`) or qualified (`products.price`).
fn column_matches(model_column: &str, wanted: &str) -> bool {
    let have = normalize(model_column);
    let wanted = normalize(wanted);
    if have == wanted {
        return true;
    }
    !wanted.contains('.') && have.rsplit('.').next() == Some(wanted.as_str())
}

fn any_context(model: &QueryModel, check: impl Fn(&QueryContext) -> bool) -> bool {
    model.contexts().into_iter().any(check)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

pub fn has_table(table: impl Into<String>) -> Predicate {
    let table = table.into();
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.tables.iter().any(|t| t.name.eq_ignore_ascii_case(&table))
        })
    })
}

/// A column selected on a table, with or without an aggregate.
pub fn has_column(table: impl Into<String>, column: impl Into<String>) -> Predicate {
    let (table, column) = (table.into(), column.into());
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.tables.iter().any(|t| {
                t.name.eq_ignore_ascii_case(&table)
                    && t.selected.iter().any(|c| c.eq_ignore_ascii_case(&column))
            })
        })
    })
}

/// A join between two tables, drawn in either direction.
pub fn has_join(left: impl Into<String>, right: impl Into<String>) -> Predicate {
    let (left, right) = (left.into(), right.into());
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.joins.iter().any(|join| {
                let source = ctx.table_name(&join.source_table);
                let target = ctx.table_name(&join.target_table);
                (source.eq_ignore_ascii_case(&left) && target.eq_ignore_ascii_case(&right))
                    || (source.eq_ignore_ascii_case(&right) && target.eq_ignore_ascii_case(&left))
            })
        })
    })
}

pub fn has_join_type(kind: JoinKind) -> Predicate {
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| ctx.joins.iter().any(|j| j.kind == kind))
    })
}

/// A filter on `column`, optionally with a given operator and literal value.
pub fn has_filter(
    column: impl Into<String>,
    operator: Option<FilterOperator>,
    value: Option<String>,
) -> Predicate {
    let column = column.into();
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.filters.iter().any(|filter| {
                column_matches(&filter.column, &column)
                    && operator.map_or(true, |op| filter.operator == op)
                    && value
                        .as_deref()
                        .map_or(true, |v| filter.operand.value() == Some(v.trim()))
            })
        })
    })
}

pub fn has_group_by(column: impl Into<String>) -> Predicate {
    let column = column.into();
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.group_by.iter().any(|g| column_matches(&g.column, &column))
        })
    })
}

pub fn has_having(function: Option<AggregateFunction>, column: Option<String>) -> Predicate {
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.having.iter().any(|having| {
                function.map_or(true, |f| having.function == f)
                    && column
                        .as_deref()
                        .map_or(true, |c| column_matches(&having.column, c))
            })
        })
    })
}

pub fn has_order_by(column: impl Into<String>, direction: Option<SortDirection>) -> Predicate {
    let column = column.into();
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| {
            ctx.order_by.iter().any(|o| {
                column_matches(&o.column, &column) && direction.map_or(true, |d| o.direction == d)
            })
        })
    })
}

/// Any LIMIT, or one whose text (count or placeholder) equals `value`.
pub fn has_limit(value: Option<String>) -> Predicate {
    Box::new(move |model: &QueryModel, _: &str| {
        any_context(model, |ctx| match (&ctx.limit, value.as_deref()) {
            (Some(_), None) => true,
            (Some(limit), Some(value)) => limit.to_string() == value.trim(),
            (None, _) => false,
        })
    })
}

/// Case-insensitive substring of the SQL with whitespace runs collapsed.
pub fn sql_contains(keyword: impl Into<String>) -> Predicate {
    let keyword = collapse_whitespace(&keyword.into());
    Box::new(move |_: &QueryModel, sql: &str| collapse_whitespace(sql).contains(&keyword))
}

/// Serializable form of the predicate constructors, for lesson files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    HasTable {
        table: String,
    },
    HasColumn {
        table: String,
        column: String,
    },
    HasJoin {
        left: String,
        right: String,
    },
    HasJoinType {
        join_type: JoinKind,
    },
    HasFilter {
        column: String,
        #[serde(default)]
        operator: Option<FilterOperator>,
        #[serde(default)]
        value: Option<String>,
    },
    HasGroupBy {
        column: String,
    },
    HasHaving {
        #[serde(default)]
        function: Option<AggregateFunction>,
        #[serde(default)]
        column: Option<String>,
    },
    HasOrderBy {
        column: String,
        #[serde(default)]
        direction: Option<SortDirection>,
    },
    HasLimit {
        #[serde(default)]
        value: Option<String>,
    },
    SqlContains {
        keyword: String,
    },
}

impl Criterion {
    pub fn predicate(&self) -> Predicate {
        match self.clone() {
            Criterion::HasTable { table } => has_table(table),
            Criterion::HasColumn { table, column } => has_column(table, column),
            Criterion::HasJoin { left, right } => has_join(left, right),
            Criterion::HasJoinType { join_type } => has_join_type(join_type),
            Criterion::HasFilter {
                column,
                operator,
                value,
            } => has_filter(column, operator, value),
            Criterion::HasGroupBy { column } => has_group_by(column),
            Criterion::HasHaving { function, column } => has_having(function, column),
            Criterion::HasOrderBy { column, direction } => has_order_by(column, direction),
            Criterion::HasLimit { value } => has_limit(value),
            Criterion::SqlContains { keyword } => sql_contains(keyword),
        }
    }

    pub fn is_satisfied(&self, model: &QueryModel, sql: &str) -> bool {
        (self.predicate())(model, sql)
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::HasTable { table } => write!(f, "uses table {}", table),
            Criterion::HasColumn { table, column } => write!(f, "selects {}.{}", table, column),
            Criterion::HasJoin { left, right } => write!(f, "joins {} and {}", left, right),
            Criterion::HasJoinType { join_type } => write!(f, "uses {}", join_type.keyword()),
            Criterion::HasFilter {
                column,
                operator,
                value,
            } => {
                write!(f, "filters on {}", column)?;
                if let Some(operator) = operator {
                    write!(f, " {}", operator.as_sql())?;
                }
                if let Some(value) = value {
                    write!(f, " {}", value)?;
                }
                Ok(())
            }
            Criterion::HasGroupBy { column } => write!(f, "groups by {}", column),
            Criterion::HasHaving { function, column } => {
                f.write_str("has a HAVING condition")?;
                match (function, column) {
                    (Some(function), Some(column)) => {
                        write!(f, " on {}({})", function.as_sql(), column)
                    }
                    (Some(function), None) => write!(f, " on {}", function.as_sql()),
                    (None, Some(column)) => write!(f, " on {}", column),
                    (None, None) => Ok(()),
                }
            }
            Criterion::HasOrderBy { column, direction } => {
                write!(f, "orders by {}", column)?;
                match direction {
                    Some(direction) => write!(f, " {}", direction.as_sql()),
                    None => Ok(()),
                }
            }
            Criterion::HasLimit { value: Some(value) } => write!(f, "limits to {}", value),
            Criterion::HasLimit { value: None } => f.write_str("has a LIMIT"),
            Criterion::SqlContains { keyword } => write!(f, "SQL contains {}", keyword),
        }
    }
}
