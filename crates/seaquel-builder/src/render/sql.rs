//! Query model to SQL text.
//!
//! Renders, in order:
//! - a `WITH` block for every CTE that has something to select from
//! - `SELECT` / `FROM` with joins, comma tables and derived tables
//! - `WHERE`, `GROUP BY`, `HAVING`, `ORDER BY`, `LIMIT`
//!
//! Nested contexts (CTE bodies, subqueries) are rendered by the same code.

use super::{column_ref, format_value, quote_ident, quote_path, RenderedQuery};
use crate::config::GeneratorConfig;
use crate::model::{
    Connector, EntityId, Filter, FilterOperand, Having, Join, JoinKind, QueryContext, QueryModel,
    SubqueryRole, TableRef,
};
use crate::syntax::placeholder_names;
use std::collections::HashMap;
use tracing::trace;

const NO_TABLES: &str = "/* no tables selected */";
const NO_COLUMNS: &str = "/* no columns selected */ *";
/// Body of a nested context with nothing to select from. Reads back as an
/// empty context.
pub(crate) const EMPTY_NESTED: &str = "SELECT NULL";

/// SQL generator with configurable layout.
#[derive(Debug, Clone, Default)]
pub struct SqlGenerator {
    config: GeneratorConfig,
}

/// One comma-separated FROM item: a table plus the joins chained onto it.
struct FromGroup<'a> {
    base: &'a TableRef,
    joins: Vec<JoinStep<'a>>,
}

/// A JOIN clause. Further joins between tables it has already placed are
/// ANDed onto its ON condition.
struct JoinStep<'a> {
    kind: JoinKind,
    /// Name of the table this step brings into the FROM clause; empty when
    /// the join points at a table that is gone.
    joined: &'a str,
    conditions: Vec<JoinCondition<'a>>,
}

struct JoinCondition<'a> {
    join: &'a Join,
    source: &'a str,
    source_column: &'a str,
    target: &'a str,
    target_column: &'a str,
}

impl<'a> JoinCondition<'a> {
    fn of(ctx: &'a QueryContext, join: &'a Join) -> Self {
        Self {
            join,
            source: ctx.table_name(&join.source_table),
            source_column: &join.source_column,
            target: ctx.table_name(&join.target_table),
            target_column: &join.target_column,
        }
    }
}

impl<'a> JoinStep<'a> {
    fn new(ctx: &'a QueryContext, join: &'a Join, joined: &'a str) -> Self {
        Self {
            kind: join.kind,
            joined,
            conditions: vec![JoinCondition::of(ctx, join)],
        }
    }
}

/// Where a table sits in the FROM clause: its item, and the step that
/// joined it (`None` for the item's base table).
#[derive(Debug, Clone, Copy)]
struct Placement {
    group: usize,
    step: Option<usize>,
}

impl Placement {
    fn order(self) -> (usize, usize) {
        (self.group, self.step.map_or(0, |step| step + 1))
    }
}

impl SqlGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config: config.clamped(),
        }
    }

    /// Single-line layout.
    pub fn compact() -> Self {
        Self::new(GeneratorConfig::compact())
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Render the whole model with its placeholder list.
    pub fn render(&self, model: &QueryModel) -> RenderedQuery {
        let sql = self.generate(model);
        RenderedQuery {
            placeholders: placeholder_names(&sql),
            sql,
        }
    }

    /// Render the whole model: CTEs, then the root query.
    pub fn generate(&self, model: &QueryModel) -> String {
        if model.root.has_no_source() {
            return NO_TABLES.to_string();
        }
        let ctes: Vec<String> = model
            .ctes
            .iter()
            .filter(|cte| !cte.context.has_no_source())
            .map(|cte| format!("{} AS {}", quote_ident(&cte.name), self.nested(&cte.context)))
            .collect();
        let body = self.generate_context(&model.root);
        trace!(ctes = ctes.len(), bytes = body.len(), "generated SQL");
        if ctes.is_empty() {
            body
        } else {
            let separator = if self.config.pretty { ",\n" } else { ", " };
            format!("WITH {}{}{}", ctes.join(separator), self.clause_separator(), body)
        }
    }

    /// Render a single context as a standalone SELECT (no WITH block).
    pub fn generate_context(&self, ctx: &QueryContext) -> String {
        if ctx.has_no_source() {
            return NO_TABLES.to_string();
        }

        let mut clauses = vec![
            format!("SELECT {}", self.select_list(ctx)),
            format!("FROM {}", self.from_clause(ctx)),
        ];

        if !ctx.filters.is_empty() {
            let conditions = ctx
                .filters
                .iter()
                .map(|f| (self.filter(ctx, f), f.connector));
            clauses.push(format!("WHERE {}", self.chain(conditions)));
        }

        if !ctx.group_by.is_empty() {
            let columns: Vec<&str> = ctx.group_by.iter().map(|g| g.column.as_str()).collect();
            clauses.push(format!("GROUP BY {}", columns.join(", ")));
        }

        if !ctx.having.is_empty() {
            let conditions = ctx.having.iter().map(|h| (having(h), h.connector));
            clauses.push(format!("HAVING {}", self.chain(conditions)));
        }

        if !ctx.order_by.is_empty() {
            let terms: Vec<String> = ctx
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.column, o.direction.as_sql()))
                .collect();
            clauses.push(format!("ORDER BY {}", terms.join(", ")));
        }

        if let Some(limit) = &ctx.limit {
            clauses.push(format!("LIMIT {}", limit));
        }

        clauses.join(self.clause_separator())
    }

    // ========================================================================
    // Clauses
    // ========================================================================

    fn select_list(&self, ctx: &QueryContext) -> String {
        let mut items = Vec::new();

        for table in &ctx.tables {
            for column in table.ordered_selection() {
                let reference = column_ref(&table.name, column);
                match table.aggregates.get(column) {
                    Some(aggregate) => items.push(aliased(
                        format!("{}({})", aggregate.function.as_sql(), reference),
                        aggregate.alias.as_deref(),
                    )),
                    None => items.push(reference),
                }
            }
        }

        for aggregate in &ctx.select_aggregates {
            items.push(aliased(
                format!("{}({})", aggregate.function.as_sql(), aggregate.expression),
                aggregate.alias.as_deref(),
            ));
        }

        for subquery in ctx.subqueries.iter().filter(|s| s.role == SubqueryRole::Select) {
            items.push(aliased(self.nested(&subquery.context), subquery.alias.as_deref()));
        }

        if items.is_empty() {
            NO_COLUMNS.to_string()
        } else {
            items.join(", ")
        }
    }

    fn from_clause(&self, ctx: &QueryContext) -> String {
        let groups = from_groups(ctx);
        let join_separator = if self.config.pretty {
            format!("\n{}", self.pad())
        } else {
            " ".to_string()
        };

        let mut items: Vec<String> = groups
            .iter()
            .map(|group| {
                let mut text = quote_path(&group.base.name);
                for step in &group.joins {
                    let conditions: Vec<String> = step
                        .conditions
                        .iter()
                        .map(|c| {
                            format!(
                                "{} = {}",
                                endpoint_ref(c.source, c.source_column),
                                endpoint_ref(c.target, c.target_column)
                            )
                        })
                        .collect();
                    text.push_str(&join_separator);
                    text.push_str(&format!(
                        "{} {} ON {}",
                        step.kind.keyword(),
                        table_text(step.joined),
                        conditions.join(" AND ")
                    ));
                }
                text
            })
            .collect();

        for subquery in ctx.subqueries.iter().filter(|s| s.role == SubqueryRole::From) {
            items.push(aliased(self.nested(&subquery.context), subquery.alias.as_deref()));
        }

        items.join(", ")
    }

    fn filter(&self, ctx: &QueryContext, filter: &Filter) -> String {
        let operator = filter.operator;
        if operator.is_unary() {
            return format!("{} {}", filter.column, operator);
        }

        let value = match &filter.operand {
            FilterOperand::Subquery(id) => match ctx.subquery(id) {
                Some(subquery) => {
                    return format!(
                        "{} {} {}",
                        filter.column,
                        operator,
                        self.nested(&subquery.context)
                    );
                }
                None => "",
            },
            FilterOperand::Value(value) => value.as_str(),
        };

        if operator.is_list() {
            format!("{} {} ({})", filter.column, operator, value)
        } else if operator.is_range() {
            format!("{} {} {}", filter.column, operator, value)
        } else {
            format!("{} {} {}", filter.column, operator, format_value(value))
        }
    }

    /// Join conditions with the connector each one carries to its successor.
    fn chain(&self, conditions: impl Iterator<Item = (String, Connector)>) -> String {
        let mut out = String::new();
        let mut pending: Option<Connector> = None;
        for (text, connector) in conditions {
            if let Some(previous) = pending {
                if self.config.pretty {
                    out.push_str(&format!("\n{}{} ", self.pad(), previous.as_sql()));
                } else {
                    out.push_str(&format!(" {} ", previous.as_sql()));
                }
            }
            out.push_str(&text);
            pending = Some(connector);
        }
        out
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// A nested context in parentheses, indented in pretty mode.
    fn nested(&self, ctx: &QueryContext) -> String {
        let body = if ctx.has_no_source() {
            EMPTY_NESTED.to_string()
        } else {
            self.generate_context(ctx)
        };
        if self.config.pretty {
            format!("(\n{}\n)", self.indent(&body))
        } else {
            format!("({})", body)
        }
    }

    fn clause_separator(&self) -> &'static str {
        if self.config.pretty {
            "\n"
        } else {
            " "
        }
    }

    fn pad(&self) -> String {
        " ".repeat(self.config.indent)
    }

    fn indent(&self, text: &str) -> String {
        let pad = self.pad();
        text.lines()
            .map(|line| {
                if line.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", pad, line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn aliased(expression: String, alias: Option<&str>) -> String {
    match alias {
        Some(alias) => format!("{} AS {}", expression, quote_ident(alias)),
        None => expression,
    }
}

fn having(having: &Having) -> String {
    format!(
        "{}({}) {} {}",
        having.function.as_sql(),
        having.column,
        having.operator.as_sql(),
        having.value
    )
}

/// Joins ANDed onto a step of a different kind. They render with the
/// step's kind, not their own.
pub(crate) fn joins_with_overridden_kind<'a>(ctx: &'a QueryContext) -> Vec<(&'a Join, JoinKind)> {
    let mut found = Vec::new();
    for group in from_groups(ctx) {
        for step in &group.joins {
            for condition in &step.conditions {
                let join: &'a Join = condition.join;
                if join.kind != step.kind {
                    found.push((join, step.kind));
                }
            }
        }
    }
    found
}

/// Table name in a join, empty when unresolved.
fn table_text(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        quote_path(name)
    }
}

/// `table.column` in a join condition; the table part is empty when unresolved.
fn endpoint_ref(table: &str, column: &str) -> String {
    format!("{}.{}", table_text(table), quote_ident(column))
}

/// Arrange tables into FROM items.
///
/// The first table seeds the first item. Each join brings in its target, or
/// its source when the target is already placed. A join between two placed
/// tables is ANDed onto the step that placed the later of them. Joins
/// touching nothing placed yet wait for a later join to reach them, and
/// otherwise seed a new item. Remaining tables follow as comma items, and
/// joins with a missing endpoint are rendered last with empty names.
fn from_groups(ctx: &QueryContext) -> Vec<FromGroup<'_>> {
    let mut groups: Vec<FromGroup<'_>> = Vec::new();
    let mut placed: HashMap<&EntityId, Placement> = HashMap::new();

    if let Some(first) = ctx.tables.first() {
        placed.insert(&first.id, Placement { group: 0, step: None });
        groups.push(FromGroup {
            base: first,
            joins: Vec::new(),
        });
    }

    let mut pending: Vec<(&Join, &TableRef, &TableRef)> = Vec::new();
    let mut unresolved: Vec<&Join> = Vec::new();
    for join in &ctx.joins {
        match (ctx.table(&join.source_table), ctx.table(&join.target_table)) {
            (Some(source), Some(target)) if source.id == target.id => {
                trace!(join = %join.id, "self-join not rendered")
            }
            (Some(source), Some(target)) => pending.push((join, source, target)),
            _ => unresolved.push(join),
        }
    }

    let order = |table: &TableRef| ctx.tables.iter().position(|t| t.id == table.id);

    while !pending.is_empty() {
        let mut progressed = false;
        let mut waiting = Vec::new();

        for (join, source, target) in pending {
            match (placed.get(&source.id).copied(), placed.get(&target.id).copied()) {
                (Some(anchor), None) => {
                    let group = &mut groups[anchor.group];
                    group.joins.push(JoinStep::new(ctx, join, &target.name));
                    let step = Some(group.joins.len() - 1);
                    placed.insert(&target.id, Placement { group: anchor.group, step });
                    progressed = true;
                }
                (None, Some(anchor)) => {
                    let group = &mut groups[anchor.group];
                    group.joins.push(JoinStep::new(ctx, join, &source.name));
                    let step = Some(group.joins.len() - 1);
                    placed.insert(&source.id, Placement { group: anchor.group, step });
                    progressed = true;
                }
                (Some(left), Some(right)) => {
                    let later = if left.order() >= right.order() { left } else { right };
                    match later.step {
                        Some(step) => groups[later.group].joins[step]
                            .conditions
                            .push(JoinCondition::of(ctx, join)),
                        None => trace!(join = %join.id, "join between two FROM items not rendered"),
                    }
                }
                (None, None) => waiting.push((join, source, target)),
            }
        }

        pending = waiting;
        if !progressed && !pending.is_empty() {
            let (join, source, target) = pending.remove(0);
            let (base, joined) = if order(source) <= order(target) {
                (source, target)
            } else {
                (target, source)
            };
            let group = groups.len();
            placed.insert(&base.id, Placement { group, step: None });
            placed.insert(&joined.id, Placement { group, step: Some(0) });
            groups.push(FromGroup {
                base,
                joins: vec![JoinStep::new(ctx, join, &joined.name)],
            });
        }
    }

    for table in &ctx.tables {
        if !placed.contains_key(&table.id) {
            placed.insert(&table.id, Placement { group: groups.len(), step: None });
            groups.push(FromGroup {
                base: table,
                joins: Vec::new(),
            });
        }
    }

    for join in unresolved {
        trace!(join = %join.id, "join endpoint unresolved; rendering empty reference");
        let anchor = [&join.source_table, &join.target_table]
            .into_iter()
            .find_map(|id| placed.get(id))
            .map_or(0, |placement| placement.group);
        if let Some(group) = groups.get_mut(anchor) {
            group.joins.push(JoinStep::new(ctx, join, ""));
        }
    }

    groups
}
