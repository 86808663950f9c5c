//! Read-only diagnostics over a query model.
//!
//! Mutators keep the tree structurally valid, but models also arrive from
//! persisted JSON and from hosts that edit fields directly. `diagnose` reports
//! what the generator would silently paper over.

use crate::model::{column_qualifier, EntityId, Limit, QueryContext, QueryModel, SubqueryRole};
use crate::render::joins_with_overridden_kind;
use crate::syntax::is_placeholder;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// The offending entity, when there is one.
    pub entity: Option<EntityId>,
}

impl Diagnostic {
    fn error(message: impl Into<String>, entity: &EntityId) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            entity: Some(entity.clone()),
        }
    }

    fn warning(message: impl Into<String>, entity: &EntityId) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            entity: Some(entity.clone()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.entity {
            Some(entity) => write!(f, "{}: {} [{}]", severity, self.message, entity),
            None => write!(f, "{}: {}", severity, self.message),
        }
    }
}

/// Everything suspicious about `model`, errors before warnings.
pub fn diagnose(model: &QueryModel) -> Vec<Diagnostic> {
    let mut found = Vec::new();

    let mut names = HashSet::new();
    for cte in &model.ctes {
        if cte.name.trim().is_empty() {
            found.push(Diagnostic::error("CTE has an empty name", &cte.id));
        } else if !names.insert(cte.name.to_ascii_lowercase()) {
            found.push(Diagnostic::error(
                format!("CTE name {} is used more than once", cte.name),
                &cte.id,
            ));
        }
    }

    model.walk(&mut |ctx| {
        for table in &ctx.tables {
            if let Some(cte) = &table.cte {
                if model.cte(cte).is_none() {
                    found.push(Diagnostic::error(
                        format!("table {} reads from a CTE that no longer exists", table.name),
                        &table.id,
                    ));
                }
            }
        }
        diagnose_context(ctx, &mut found);
    });

    found.sort_by(|a, b| b.severity.cmp(&a.severity));
    found
}

fn diagnose_context(ctx: &QueryContext, found: &mut Vec<Diagnostic>) {
    for join in &ctx.joins {
        if ctx.table(&join.source_table).is_none() || ctx.table(&join.target_table).is_none() {
            found.push(Diagnostic::error("join endpoint is missing", &join.id));
        } else if join.source_table == join.target_table {
            found.push(Diagnostic::warning(
                "join connects a table to itself and is not rendered",
                &join.id,
            ));
        }
    }
    for (join, rendered) in joins_with_overridden_kind(ctx) {
        found.push(Diagnostic::warning(
            format!(
                "{} is rendered as {}, the join it is ANDed onto",
                join.kind.keyword(),
                rendered.keyword()
            ),
            &join.id,
        ));
    }

    let known = |column: &str| match column_qualifier(column) {
        None => true,
        Some(qualifier) => {
            ctx.tables
                .iter()
                .any(|t| t.name.eq_ignore_ascii_case(qualifier))
                || ctx.subqueries.iter().any(|s| {
                    s.role == SubqueryRole::From
                        && s.alias
                            .as_deref()
                            .is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
                })
        }
    };
    let unknown_table = |clause: &str, column: &str| {
        format!("{} column {} refers to a table not in this query", clause, column)
    };

    for filter in &ctx.filters {
        if !known(&filter.column) {
            found.push(Diagnostic::warning(unknown_table("filter", &filter.column), &filter.id));
        }
        if let Some(sub) = filter.operand.subquery() {
            if ctx.subquery(sub).is_none() {
                found.push(Diagnostic::error(
                    "filter is linked to a subquery that no longer exists",
                    &filter.id,
                ));
            }
        }
    }
    for group in &ctx.group_by {
        if !known(&group.column) {
            found.push(Diagnostic::warning(unknown_table("GROUP BY", &group.column), &group.id));
        }
    }
    for having in &ctx.having {
        if !known(&having.column) {
            found.push(Diagnostic::warning(unknown_table("HAVING", &having.column), &having.id));
        }
    }
    for order in &ctx.order_by {
        if !known(&order.column) {
            found.push(Diagnostic::warning(unknown_table("ORDER BY", &order.column), &order.id));
        }
    }

    for sub in &ctx.subqueries {
        if sub.role == SubqueryRole::Where {
            let linked = sub.linked_filter.as_ref().and_then(|id| ctx.filter(id));
            if linked.map_or(true, |f| f.operand.subquery() != Some(&sub.id)) {
                found.push(Diagnostic::warning(
                    "WHERE subquery is not linked to any filter and is not rendered",
                    &sub.id,
                ));
            }
        }
        if sub.context.has_no_source() {
            found.push(Diagnostic::warning("subquery has no tables", &sub.id));
        }
    }

    if let Some(Limit::Placeholder(text)) = &ctx.limit {
        if !is_placeholder(text) {
            found.push(Diagnostic {
                severity: Severity::Error,
                message: format!("LIMIT {} is neither a number nor a {{{{name}}}} placeholder", text),
                entity: None,
            });
        }
    }
}
