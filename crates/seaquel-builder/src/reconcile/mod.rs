//! SQL text back into the query model.
//!
//! A text edit is parsed, rebuilt into a model (or one context of it) and
//! compared structurally with what the canvas already says. Identity and
//! layout of surviving entities are carried over so the canvas does not jump.

mod build;
mod structure;

pub use structure::{ContextStructure, FilterShape, HavingShape, QueryStructure};

use crate::catalog::SchemaCatalog;
use crate::config::SqlDialect;
use crate::error::{ParseError, ParseResult};
use crate::model::{
    ActiveContext, ColumnAggregate, Cte, EntityId, FilterOperand, QueryContext, QueryModel,
    SubqueryRole,
};
use crate::render::{column_ref, SqlGenerator};
use crate::syntax::parse_query;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of applying edited text to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The text means what the model already says.
    Unchanged,
    /// The text describes a different query; this is the model to adopt.
    Replace(QueryModel),
    /// The text cannot be represented on the canvas and is kept verbatim.
    Override { reason: ParseError },
}

impl Reconciliation {
    pub fn is_override(&self) -> bool {
        matches!(self, Self::Override { .. })
    }
}

/// Parses SQL text against a dialect and a schema catalog.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    dialect: SqlDialect,
    catalog: &'a SchemaCatalog,
}

impl<'a> Reconciler<'a> {
    pub fn new(dialect: SqlDialect, catalog: &'a SchemaCatalog) -> Self {
        Self { dialect, catalog }
    }

    /// Build a whole model, CTEs included, from query text.
    pub fn parse_model(&self, sql: &str) -> ParseResult<QueryModel> {
        let query = parse_query(sql, self.dialect)?;
        build::build_model(&query, self.catalog)
    }

    /// Build a single context that may read the given CTEs.
    pub fn parse_context(&self, sql: &str, ctes: &[Cte]) -> ParseResult<QueryContext> {
        let query = parse_query(sql, self.dialect)?;
        build::build_context(&query, ctes, self.catalog)
    }

    pub fn structure(&self, sql: &str) -> ParseResult<QueryStructure> {
        self.parse_model(sql).map(|model| QueryStructure::of_model(&model))
    }

    /// Apply edited text to the active context of `model`.
    pub fn reconcile(
        &self,
        text: &str,
        model: &QueryModel,
        active: &ActiveContext,
    ) -> Reconciliation {
        match self.try_reconcile(text, model, active) {
            Ok(None) => {
                debug!(?active, "text matches model");
                Reconciliation::Unchanged
            }
            Ok(Some(next)) => {
                debug!(?active, "text replaces model");
                Reconciliation::Replace(next)
            }
            Err(reason) => {
                debug!(?active, %reason, "keeping text as override");
                Reconciliation::Override { reason }
            }
        }
    }

    /// True when `text` and `generated` build the same structure in the
    /// active context, so the user's formatting can be kept.
    pub fn is_equivalent(
        &self,
        text: &str,
        generated: &str,
        model: &QueryModel,
        active: &ActiveContext,
    ) -> bool {
        if text == generated {
            return true;
        }
        match active {
            ActiveContext::Root => match (self.structure(text), self.structure(generated)) {
                (Ok(left), Ok(right)) => left == right,
                _ => false,
            },
            _ => {
                let scope = cte_scope(model, active);
                match (
                    self.parse_context(text, scope),
                    self.parse_context(generated, scope),
                ) {
                    (Ok(left), Ok(right)) => {
                        ContextStructure::of_context(&left) == ContextStructure::of_context(&right)
                    }
                    _ => false,
                }
            }
        }
    }

    fn try_reconcile(
        &self,
        text: &str,
        model: &QueryModel,
        active: &ActiveContext,
    ) -> ParseResult<Option<QueryModel>> {
        // Compare against the model as it round-trips through text, so parts
        // the generator cannot render do not count as a change.
        let generator = SqlGenerator::compact();

        if let ActiveContext::Root = active {
            let parsed = self.parse_model(text)?;
            let current = self
                .structure(&generator.generate(model))
                .unwrap_or_else(|_| QueryStructure::of_model(model));
            if QueryStructure::of_model(&parsed) == current {
                return Ok(None);
            }
            let mut next = parsed;
            carry_over_model(model, &mut next);
            return Ok(Some(next));
        }

        let current = model
            .context(active)
            .ok_or_else(|| ParseError::unsupported("editing a context that no longer exists"))?;
        let scope = cte_scope(model, active);
        let mut parsed = self.parse_context(text, scope)?;
        let current_structure = self
            .parse_context(&generator.generate_context(current), scope)
            .map(|ctx| ContextStructure::of_context(&ctx))
            .unwrap_or_else(|_| ContextStructure::of_context(current));
        if ContextStructure::of_context(&parsed) == current_structure {
            return Ok(None);
        }

        carry_over_context(current, &mut parsed);
        let mut next = model.clone();
        if let Some(ctx) = next.context_mut(active) {
            *ctx = parsed;
        }
        if let ActiveContext::Cte(id) = active {
            next.refresh_cte_columns(id);
        }
        Ok(Some(next))
    }
}

/// CTEs visible from the active context: earlier ones for a CTE body, all of
/// them otherwise.
fn cte_scope<'m>(model: &'m QueryModel, active: &ActiveContext) -> &'m [Cte] {
    match active {
        ActiveContext::Cte(id) => {
            let end = model
                .ctes
                .iter()
                .position(|c| &c.id == id)
                .unwrap_or(model.ctes.len());
            &model.ctes[..end]
        }
        _ => &model.ctes,
    }
}

// ============================================================================
// Identity carry-over
// ============================================================================

/// CTEs are matched by name; their ids are rewritten in every table link.
fn carry_over_model(previous: &QueryModel, next: &mut QueryModel) {
    let mut cte_ids: HashMap<EntityId, EntityId> = HashMap::new();
    for cte in &mut next.ctes {
        let Some(old) = previous.cte_by_name(&cte.name) else {
            continue;
        };
        cte_ids.insert(cte.id.clone(), old.id.clone());
        cte.id = old.id.clone();
        cte.geometry = old.geometry;
        carry_over_context(&old.context, &mut cte.context);
    }
    carry_over_context(&previous.root, &mut next.root);

    next.walk_mut(&mut |ctx| {
        for table in &mut ctx.tables {
            if let Some(old) = table.cte.as_ref().and_then(|id| cte_ids.get(id)) {
                table.cte = Some(old.clone());
            }
        }
    });
}

/// Tables are matched by name, subqueries by role and position within that
/// role. Nested contexts of matched subqueries are carried over recursively.
fn carry_over_context(previous: &QueryContext, next: &mut QueryContext) {
    let mut table_ids: HashMap<EntityId, EntityId> = HashMap::new();
    for table in &mut next.tables {
        let Some(old) = previous.table_by_name(&table.name) else {
            continue;
        };
        table_ids.insert(table.id.clone(), old.id.clone());
        table.id = old.id.clone();
        table.position = old.position;
        if table.columns.is_empty() {
            table.columns = old.columns.clone();
        }
    }
    for join in &mut next.joins {
        if let Some(old) = table_ids.get(&join.source_table) {
            join.source_table = old.clone();
        }
        if let Some(old) = table_ids.get(&join.target_table) {
            join.target_table = old.clone();
        }
        let same = previous.joins.iter().find(|j| {
            j.source_table == join.source_table
                && j.target_table == join.target_table
                && j.source_column == join.source_column
                && j.target_column == join.target_column
        });
        if let Some(old) = same {
            join.id = old.id.clone();
        }
    }

    restore_column_aggregates(previous, next);

    // Filters keep their id when the same column sits at the same position.
    let mut filter_ids: HashMap<EntityId, EntityId> = HashMap::new();
    for (filter, old) in next.filters.iter_mut().zip(&previous.filters) {
        if filter.column == old.column {
            filter_ids.insert(filter.id.clone(), old.id.clone());
            filter.id = old.id.clone();
        }
    }

    let mut subquery_ids: HashMap<EntityId, EntityId> = HashMap::new();
    for role in [SubqueryRole::Where, SubqueryRole::From, SubqueryRole::Select] {
        let olds = previous.subqueries.iter().filter(|s| s.role == role);
        let news = next.subqueries.iter_mut().filter(|s| s.role == role);
        for (old, sub) in olds.zip(news) {
            subquery_ids.insert(sub.id.clone(), old.id.clone());
            sub.id = old.id.clone();
            sub.geometry = old.geometry;
            carry_over_context(&old.context, &mut sub.context);
        }
    }
    for sub in &mut next.subqueries {
        if let Some(old) = sub.linked_filter.as_ref().and_then(|id| filter_ids.get(id)) {
            sub.linked_filter = Some(old.clone());
        }
    }
    for filter in &mut next.filters {
        if let FilterOperand::Subquery(id) = &mut filter.operand {
            if let Some(old) = subquery_ids.get(id) {
                *id = old.clone();
            }
        }
    }
}

/// Text has no notion of a column aggregate, so `SUM(t.c)` parses as a select
/// aggregate. Fold it back onto the column where the previous model had it.
fn restore_column_aggregates(previous: &QueryContext, next: &mut QueryContext) {
    for old in &previous.tables {
        for (column, aggregate) in &old.aggregates {
            let expression = column_ref(&old.name, column);
            let Some(index) = next.select_aggregates.iter().position(|a| {
                a.function == aggregate.function
                    && a.expression == expression
                    && a.alias == aggregate.alias
            }) else {
                continue;
            };
            let Some(table) = next.tables.iter_mut().find(|t| t.name == old.name) else {
                continue;
            };
            next.select_aggregates.remove(index);
            table.select(column);
            table.aggregates.insert(
                column.clone(),
                ColumnAggregate {
                    function: aggregate.function,
                    alias: aggregate.alias.clone(),
                },
            );
        }
    }
}
