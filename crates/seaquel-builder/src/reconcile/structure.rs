//! Structural form of a query for equivalence checks.
//!
//! Two texts are equivalent when they build the same structure. Identity,
//! geometry and layout are not part of it; neither is anything the generator
//! never renders (CTEs without a source, unlinked WHERE subqueries).

use crate::model::{Connector, QueryContext, QueryModel, SubqueryRole};
use crate::render::column_ref;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryStructure {
    /// CTE name and body, in declaration order.
    pub ctes: Vec<(String, ContextStructure)>,
    pub root: ContextStructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextStructure {
    pub tables: BTreeSet<String>,
    /// Plain selected columns as `table.column`.
    pub columns: BTreeSet<String>,
    /// `(source, source column, target, target column, kind)`; the FROM
    /// arrangement can change join order without changing meaning.
    pub joins: BTreeSet<(String, String, String, String, &'static str)>,
    pub filters: Vec<FilterShape>,
    pub group_by: Vec<String>,
    pub having: Vec<HavingShape>,
    pub order_by: Vec<(String, &'static str)>,
    pub limit: Option<String>,
    /// Column aggregates followed by select aggregates, in render order.
    pub aggregates: Vec<(&'static str, String, Option<String>)>,
    /// FROM subqueries, then SELECT subqueries.
    pub subqueries: Vec<(&'static str, Option<String>, ContextStructure)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterShape {
    pub column: String,
    pub operator: &'static str,
    pub value: String,
    pub subquery: Option<Box<ContextStructure>>,
    pub connector: Connector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HavingShape {
    pub function: &'static str,
    pub column: String,
    pub operator: &'static str,
    pub value: String,
    pub connector: Connector,
}

impl QueryStructure {
    pub fn of_model(model: &QueryModel) -> Self {
        let ctes = model
            .ctes
            .iter()
            .filter(|cte| !cte.context.has_no_source())
            .map(|cte| (cte.name.clone(), ContextStructure::of_context(&cte.context)))
            .collect();
        Self {
            ctes,
            root: ContextStructure::of_context(&model.root),
        }
    }
}

impl ContextStructure {
    pub fn of_context(ctx: &QueryContext) -> Self {
        let mut structure = Self::default();

        for table in &ctx.tables {
            structure.tables.insert(table.name.clone());
            for column in table.ordered_selection() {
                match table.aggregates.get(column) {
                    Some(aggregate) => structure.aggregates.push((
                        aggregate.function.as_sql(),
                        column_ref(&table.name, column),
                        aggregate.alias.clone(),
                    )),
                    None => {
                        structure.columns.insert(column_ref(&table.name, column));
                    }
                }
            }
        }
        for aggregate in &ctx.select_aggregates {
            structure.aggregates.push((
                aggregate.function.as_sql(),
                aggregate.expression.clone(),
                aggregate.alias.clone(),
            ));
        }

        for join in &ctx.joins {
            let (Some(source), Some(target)) =
                (ctx.table(&join.source_table), ctx.table(&join.target_table))
            else {
                continue;
            };
            structure.joins.insert((
                source.name.clone(),
                join.source_column.clone(),
                target.name.clone(),
                join.target_column.clone(),
                join.kind.keyword(),
            ));
        }

        for filter in &ctx.filters {
            let linked = filter
                .operand
                .subquery()
                .and_then(|id| ctx.subquery(id))
                .map(|sub| Box::new(Self::of_context(&sub.context)));
            let value = match (&linked, filter.operand.value()) {
                (None, Some(value)) if !filter.operator.is_unary() => value.to_string(),
                _ => String::new(),
            };
            structure.filters.push(FilterShape {
                column: filter.column.clone(),
                operator: filter.operator.as_sql(),
                value,
                subquery: linked,
                connector: filter.connector,
            });
        }
        if let Some(last) = structure.filters.last_mut() {
            last.connector = Connector::And;
        }

        structure.group_by = ctx.group_by.iter().map(|g| g.column.clone()).collect();

        structure.having = ctx
            .having
            .iter()
            .map(|h| HavingShape {
                function: h.function.as_sql(),
                column: h.column.clone(),
                operator: h.operator.as_sql(),
                value: h.value.clone(),
                connector: h.connector,
            })
            .collect();
        if let Some(last) = structure.having.last_mut() {
            last.connector = Connector::And;
        }

        structure.order_by = ctx
            .order_by
            .iter()
            .map(|o| (o.column.clone(), o.direction.as_sql()))
            .collect();
        structure.limit = ctx.limit.as_ref().map(ToString::to_string);

        for role in [SubqueryRole::From, SubqueryRole::Select] {
            for sub in ctx.subqueries.iter().filter(|s| s.role == role) {
                let label = match role {
                    SubqueryRole::From => "from",
                    _ => "select",
                };
                structure
                    .subqueries
                    .push((label, sub.alias.clone(), Self::of_context(&sub.context)));
            }
        }

        structure
    }
}
