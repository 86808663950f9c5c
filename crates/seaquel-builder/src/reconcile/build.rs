//! Rebuilding query contexts from a parsed SQL AST.
//!
//! Only the shapes the canvas can draw are accepted; everything else is
//! reported as [`ParseError::Unsupported`] so the caller can keep the text as
//! an override instead of silently dropping parts of it.

use crate::catalog::SchemaCatalog;
use crate::error::{ParseError, ParseResult};
use crate::model::{
    AggregateFunction, ComparisonOperator, Connector, Cte, EntityId, FilterOperand,
    FilterOperator, Geometry, JoinKind, Limit, Position, QueryContext, QueryModel, SortDirection,
    Subquery, SubqueryRole, TableRef,
};
use crate::render::{column_ref, quote_ident};
use crate::syntax::{is_placeholder, unmask};
use sqlparser::ast::{
    BinaryOperator, DuplicateTreatment, Expr, Function, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, JoinConstraint, JoinOperator, ObjectName, OrderByExpr, Query,
    Select, SelectItem, SetExpr, TableFactor, TableWithJoins, UnaryOperator, Value,
};

/// Build a whole model: CTEs first, each able to read the ones before it.
pub(crate) fn build_model(query: &Query, catalog: &SchemaCatalog) -> ParseResult<QueryModel> {
    let mut model = QueryModel::new();

    if let Some(with) = &query.with {
        if with.recursive {
            return Err(ParseError::unsupported("WITH RECURSIVE"));
        }
        for cte in &with.cte_tables {
            if !cte.alias.columns.is_empty() {
                return Err(ParseError::unsupported("CTE column list"));
            }
            let name = cte.alias.name.value.clone();
            if model.cte_by_name(&name).is_some() {
                return Err(ParseError::unsupported(format!("CTE {} defined twice", name)));
            }
            let context = build_context(&cte.query, &model.ctes, catalog)?;
            model.ctes.push(Cte {
                id: EntityId::new(),
                name,
                geometry: Geometry::default(),
                context,
            });
        }
    }

    let root = build_body(query, &model.ctes, catalog)?;
    model.root = root;
    Ok(model)
}

/// Build a nested query, which may read the given CTEs but not declare its own.
pub(crate) fn build_context(
    query: &Query,
    ctes: &[Cte],
    catalog: &SchemaCatalog,
) -> ParseResult<QueryContext> {
    if query.with.is_some() {
        return Err(ParseError::unsupported("WITH inside a nested query"));
    }
    build_body(query, ctes, catalog)
}

fn build_body(query: &Query, ctes: &[Cte], catalog: &SchemaCatalog) -> ParseResult<QueryContext> {
    if query.offset.is_some() {
        return Err(ParseError::unsupported("OFFSET"));
    }
    if query.fetch.is_some() {
        return Err(ParseError::unsupported("FETCH"));
    }

    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        SetExpr::SetOperation { op, .. } => return Err(ParseError::unsupported(op.to_string())),
        SetExpr::Query(_) => return Err(ParseError::unsupported("parenthesized query")),
        _ => return Err(ParseError::unsupported("query body")),
    };
    if is_empty_select(query, select) {
        return Ok(QueryContext::new());
    }

    let mut builder = ContextBuilder {
        catalog,
        ctes,
        ctx: QueryContext::new(),
        sources: Vec::new(),
        output_aliases: Vec::new(),
    };
    builder.select(select)?;

    if let Some(order_by) = &query.order_by {
        for term in &order_by.exprs {
            builder.order_by(term)?;
        }
    }
    if let Some(limit) = &query.limit {
        builder.ctx.limit = Some(limit_value(limit)?);
    }

    Ok(builder.ctx)
}

/// A name visible to column references of the context being built.
struct Source {
    key: String,
    kind: SourceKind,
}

enum SourceKind {
    Table { id: EntityId, name: String },
    Derived,
}

/// Right-hand side of a WHERE condition before it becomes a filter operand.
enum Operand<'q> {
    None,
    Value(String),
    Query(&'q Query),
}

struct ContextBuilder<'a> {
    catalog: &'a SchemaCatalog,
    ctes: &'a [Cte],
    ctx: QueryContext,
    sources: Vec<Source>,
    /// Aliases introduced by the select list, usable in ORDER BY.
    output_aliases: Vec<String>,
}

impl ContextBuilder<'_> {
    fn select(&mut self, select: &Select) -> ParseResult<()> {
        if select.distinct.is_some() {
            return Err(ParseError::unsupported("DISTINCT"));
        }
        if select.top.is_some() {
            return Err(ParseError::unsupported("TOP"));
        }
        if select.into.is_some() {
            return Err(ParseError::unsupported("SELECT INTO"));
        }
        if !select.lateral_views.is_empty() {
            return Err(ParseError::unsupported("LATERAL VIEW"));
        }
        if !select.named_window.is_empty() {
            return Err(ParseError::unsupported("WINDOW"));
        }
        if select.qualify.is_some() {
            return Err(ParseError::unsupported("QUALIFY"));
        }

        for from in &select.from {
            self.from_item(from)?;
        }
        self.projection(&select.projection)?;
        if let Some(selection) = &select.selection {
            self.filters(selection)?;
        }
        self.group_by(&select.group_by)?;
        if let Some(having) = &select.having {
            self.having(having)?;
        }
        Ok(())
    }

    // ========================================================================
    // FROM
    // ========================================================================

    fn from_item(&mut self, from: &TableWithJoins) -> ParseResult<()> {
        self.source(&from.relation)?;

        for join in &from.joins {
            let (kind, constraint) = match &join.join_operator {
                JoinOperator::Inner(constraint, ..) => (JoinKind::Inner, constraint),
                JoinOperator::LeftOuter(constraint, ..) => (JoinKind::Left, constraint),
                JoinOperator::RightOuter(constraint, ..) => (JoinKind::Right, constraint),
                JoinOperator::FullOuter(constraint, ..) => (JoinKind::Full, constraint),
                JoinOperator::CrossJoin { .. } => {
                    self.source(&join.relation)?;
                    continue;
                }
                _ => return Err(ParseError::unsupported("join type")),
            };

            let joined = self
                .source(&join.relation)?
                .ok_or_else(|| ParseError::unsupported("join on a derived table"))?;

            match constraint {
                JoinConstraint::On(condition) => self.join_condition(condition, &joined, kind)?,
                JoinConstraint::None => {}
                _ => return Err(ParseError::unsupported("join without an ON condition")),
            }
        }
        Ok(())
    }

    /// Register a FROM source. Returns the table id for plain tables.
    fn source(&mut self, factor: &TableFactor) -> ParseResult<Option<EntityId>> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(ParseError::unsupported("table function"));
                }
                let table_name = object_name(name);
                if self.ctx.table_by_name(&table_name).is_some() {
                    return Err(ParseError::unsupported(format!(
                        "table {} referenced more than once",
                        table_name
                    )));
                }

                let cte = match name.0.len() {
                    1 => self
                        .ctes
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(&table_name)),
                    _ => None,
                };
                let table = match cte {
                    Some(cte) => {
                        let mut table = TableRef::new(
                            cte.name.clone(),
                            cte.context.output_columns(),
                            Position::default(),
                        );
                        table.cte = Some(cte.id.clone());
                        table
                    }
                    None => TableRef::new(
                        table_name.clone(),
                        self.catalog.columns_or_empty(&table_name),
                        Position::default(),
                    ),
                };

                if let Some(alias) = alias {
                    if !alias.columns.is_empty() {
                        return Err(ParseError::unsupported("table alias column list"));
                    }
                    self.sources.push(Source {
                        key: alias.name.value.clone(),
                        kind: SourceKind::Table {
                            id: table.id.clone(),
                            name: table.name.clone(),
                        },
                    });
                }
                self.sources.push(Source {
                    key: table.name.clone(),
                    kind: SourceKind::Table {
                        id: table.id.clone(),
                        name: table.name.clone(),
                    },
                });
                Ok(Some(self.ctx.push_table(table)))
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
                ..
            } => {
                if *lateral {
                    return Err(ParseError::unsupported("LATERAL"));
                }
                let context = build_context(subquery, self.ctes, self.catalog)?;
                let mut derived = Subquery::new(SubqueryRole::From, Geometry::default());
                if let Some(alias) = alias {
                    if !alias.columns.is_empty() {
                        return Err(ParseError::unsupported("derived table column list"));
                    }
                    derived.alias = Some(alias.name.value.clone());
                    self.sources.push(Source {
                        key: alias.name.value.clone(),
                        kind: SourceKind::Derived,
                    });
                }
                derived.context = context;
                self.ctx.subqueries.push(derived);
                Ok(None)
            }
            TableFactor::NestedJoin { .. } => Err(ParseError::unsupported("parenthesized join")),
            _ => Err(ParseError::unsupported("table source")),
        }
    }

    /// An ON condition: one equality, or several joined by AND. Each
    /// equality becomes its own join of the same kind.
    fn join_condition(
        &mut self,
        condition: &Expr,
        joined: &EntityId,
        kind: JoinKind,
    ) -> ParseResult<()> {
        let mut conjuncts = Vec::new();
        flatten_conditions(condition, &mut conjuncts);
        if conjuncts.iter().any(|(_, connector)| *connector == Connector::Or) {
            return Err(ParseError::unsupported("OR in join condition"));
        }
        for (conjunct, _) in conjuncts {
            self.join_equality(conjunct, joined, kind)?;
        }
        Ok(())
    }

    fn join_equality(
        &mut self,
        condition: &Expr,
        joined: &EntityId,
        kind: JoinKind,
    ) -> ParseResult<()> {
        let Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } = condition
        else {
            return Err(ParseError::unsupported("non-equality join condition"));
        };

        let (source_table, source_column) = self.join_side(left)?;
        let (target_table, target_column) = self.join_side(right)?;
        if source_table == target_table {
            return Err(ParseError::unsupported("join condition within one table"));
        }
        if &source_table != joined && &target_table != joined {
            return Err(ParseError::unsupported(
                "join condition not referencing the joined table",
            ));
        }

        self.ctx
            .add_join(&source_table, source_column, &target_table, target_column, kind)
            .map(|_| ())
            .ok_or_else(|| ParseError::unsupported("join condition"))
    }

    fn join_side(&self, expr: &Expr) -> ParseResult<(EntityId, String)> {
        let not_qualified = || ParseError::unsupported("join condition on unqualified columns");
        let (qualifier, column) = column_parts(expr).ok_or_else(not_qualified)?;
        let qualifier = qualifier.ok_or_else(not_qualified)?;
        match self.lookup(&qualifier) {
            Some(Source {
                kind: SourceKind::Table { id, .. },
                ..
            }) => {
                let column = self.declared_spelling(id, &column);
                Ok((id.clone(), column))
            }
            _ => Err(ParseError::unsupported(format!(
                "join condition on unknown table {}",
                qualifier
            ))),
        }
    }

    // ========================================================================
    // SELECT list
    // ========================================================================

    fn projection(&mut self, items: &[SelectItem]) -> ParseResult<()> {
        // A sole `*` means no explicit selection.
        if let [SelectItem::Wildcard(_)] = items {
            return Ok(());
        }
        for item in items {
            match item {
                SelectItem::Wildcard(_) => {
                    return Err(ParseError::unsupported("* alongside other select items"))
                }
                SelectItem::QualifiedWildcard(name, _) => self.select_all(&object_name(name))?,
                SelectItem::UnnamedExpr(expr) => self.select_expr(expr, None)?,
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.select_expr(expr, Some(alias.value.clone()))?
                }
            }
        }
        Ok(())
    }

    fn select_expr(&mut self, expr: &Expr, alias: Option<String>) -> ParseResult<()> {
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                if alias.is_some() {
                    return Err(ParseError::unsupported("aliased column"));
                }
                let (qualifier, column) = column_parts(expr)
                    .ok_or_else(|| ParseError::unsupported("column reference"))?;
                let table = self.selection_owner(qualifier.as_deref(), &column)?;
                let column = self.declared_spelling(&table, &column);
                self.ctx.select_column(&table, &column);
            }
            Expr::Function(function) => {
                let (function_kind, expression) = self.aggregate_call(function)?.ok_or_else(|| {
                    ParseError::unsupported(format!("function {}", function.name))
                })?;
                if let Some(alias) = &alias {
                    self.output_aliases.push(alias.clone());
                }
                self.ctx
                    .add_select_aggregate(function_kind, expression, alias);
            }
            Expr::Subquery(query) => {
                let context = build_context(query, self.ctes, self.catalog)?;
                let mut scalar = Subquery::new(SubqueryRole::Select, Geometry::default());
                if let Some(alias) = &alias {
                    self.output_aliases.push(alias.clone());
                }
                scalar.alias = alias;
                scalar.context = context;
                self.ctx.subqueries.push(scalar);
            }
            _ => return Err(ParseError::unsupported("expression in select list")),
        }
        Ok(())
    }

    /// Expand `t.*` to the table's declared columns.
    fn select_all(&mut self, qualifier: &str) -> ParseResult<()> {
        let table = match self.lookup(qualifier) {
            Some(Source {
                kind: SourceKind::Table { id, .. },
                ..
            }) => id.clone(),
            Some(_) => return Err(ParseError::unsupported("* of a derived table")),
            None => {
                return Err(ParseError::unsupported(format!(
                    "unknown table {}",
                    qualifier
                )))
            }
        };
        let columns = self
            .ctx
            .table(&table)
            .map(|t| t.columns.clone())
            .unwrap_or_default();
        if columns.is_empty() {
            return Err(ParseError::unsupported(format!(
                "{}.* without known columns",
                qualifier
            )));
        }
        for column in columns {
            self.ctx.select_column(&table, &column);
        }
        Ok(())
    }

    /// Table whose selection a select-list column belongs to.
    fn selection_owner(&self, qualifier: Option<&str>, column: &str) -> ParseResult<EntityId> {
        match qualifier {
            Some(qualifier) => match self.lookup(qualifier) {
                Some(Source {
                    kind: SourceKind::Table { id, .. },
                    ..
                }) => Ok(id.clone()),
                Some(_) => Err(ParseError::unsupported("column of a derived table")),
                None => Err(ParseError::unsupported(format!(
                    "unknown table {}",
                    qualifier
                ))),
            },
            None => self
                .owner(column)
                .map(|t| t.id.clone())
                .ok_or_else(|| ParseError::unsupported(format!("ambiguous column {}", column))),
        }
    }

    /// Recognize an aggregate call, returning its function and argument text.
    /// `Ok(None)` means the function is not an aggregate.
    fn aggregate_call(
        &self,
        function: &Function,
    ) -> ParseResult<Option<(AggregateFunction, String)>> {
        let name = function
            .name
            .0
            .last()
            .map(|ident| ident.value.as_str())
            .unwrap_or_default();
        let Some(kind) = AggregateFunction::from_name(name) else {
            return Ok(None);
        };
        if function.over.is_some() {
            return Err(ParseError::unsupported("window function"));
        }
        if function.filter.is_some() {
            return Err(ParseError::unsupported("aggregate FILTER"));
        }
        if !function.within_group.is_empty() {
            return Err(ParseError::unsupported("WITHIN GROUP"));
        }
        let FunctionArguments::List(list) = &function.args else {
            return Err(ParseError::unsupported(format!("{} without arguments", name)));
        };
        if !list.clauses.is_empty() {
            return Err(ParseError::unsupported("aggregate argument clause"));
        }

        let mut args = Vec::with_capacity(list.args.len());
        for arg in &list.args {
            match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => args.push("*".to_string()),
                FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => {
                    args.push(self.expression_text(expr))
                }
                _ => return Err(ParseError::unsupported("aggregate argument")),
            }
        }
        let mut expression = args.join(", ");
        if matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct)) {
            expression = format!("DISTINCT {}", expression);
        }
        Ok(Some((kind, expression)))
    }

    /// Expression text with column references in canonical form.
    fn expression_text(&self, expr: &Expr) -> String {
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => match column_parts(expr) {
                Some((qualifier, column)) => self.column_text(qualifier.as_deref(), &column),
                None => unmask(&expr.to_string()).into_owned(),
            },
            Expr::BinaryOp { left, op, right } => format!(
                "{} {} {}",
                self.expression_text(left),
                op,
                self.expression_text(right)
            ),
            Expr::Nested(inner) => format!("({})", self.expression_text(inner)),
            other => unmask(&other.to_string()).into_owned(),
        }
    }

    // ========================================================================
    // WHERE / GROUP BY / HAVING / ORDER BY
    // ========================================================================

    fn filters(&mut self, selection: &Expr) -> ParseResult<()> {
        let mut conditions = Vec::new();
        flatten_conditions(selection, &mut conditions);
        for (condition, connector) in conditions {
            self.filter(condition, connector)?;
        }
        Ok(())
    }

    fn filter(&mut self, condition: &Expr, connector: Connector) -> ParseResult<()> {
        let negatable = |negated: bool, plain, negative| if negated { negative } else { plain };

        let (subject, operator, operand) = match condition {
            Expr::BinaryOp { left, op, right } => {
                let operator = filter_operator(op)
                    .ok_or_else(|| ParseError::unsupported(format!("operator {}", op)))?;
                let operand = match right.as_ref() {
                    Expr::Subquery(query) => Operand::Query(query),
                    other => Operand::Value(literal(other)?),
                };
                (left.as_ref(), operator, operand)
            }
            Expr::Like {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => {
                if escape_char.is_some() {
                    return Err(ParseError::unsupported("LIKE ... ESCAPE"));
                }
                let operator = negatable(*negated, FilterOperator::Like, FilterOperator::NotLike);
                (expr.as_ref(), operator, Operand::Value(literal(pattern)?))
            }
            Expr::ILike {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => {
                if escape_char.is_some() {
                    return Err(ParseError::unsupported("ILIKE ... ESCAPE"));
                }
                let operator = negatable(*negated, FilterOperator::ILike, FilterOperator::NotILike);
                (expr.as_ref(), operator, Operand::Value(literal(pattern)?))
            }
            Expr::IsNull(expr) => (expr.as_ref(), FilterOperator::IsNull, Operand::None),
            Expr::IsNotNull(expr) => (expr.as_ref(), FilterOperator::IsNotNull, Operand::None),
            Expr::IsTrue(expr) => (expr.as_ref(), FilterOperator::IsTrue, Operand::None),
            Expr::IsFalse(expr) => (expr.as_ref(), FilterOperator::IsFalse, Operand::None),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let values: Vec<String> = list.iter().map(printed).collect();
                let operator = negatable(*negated, FilterOperator::In, FilterOperator::NotIn);
                (expr.as_ref(), operator, Operand::Value(values.join(", ")))
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let operator = negatable(*negated, FilterOperator::In, FilterOperator::NotIn);
                (expr.as_ref(), operator, Operand::Query(subquery))
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let operator =
                    negatable(*negated, FilterOperator::Between, FilterOperator::NotBetween);
                let range = format!("{} AND {}", printed(low), printed(high));
                (expr.as_ref(), operator, Operand::Value(range))
            }
            Expr::Nested(_) => {
                return Err(ParseError::unsupported("parenthesized condition group"))
            }
            _ => return Err(ParseError::unsupported("WHERE condition")),
        };

        let (qualifier, column) = column_parts(subject)
            .ok_or_else(|| ParseError::unsupported("condition on an expression"))?;
        let column = self.column_text(qualifier.as_deref(), &column);

        let filter_id = match operand {
            Operand::None => self.ctx.add_filter(column, operator, ""),
            Operand::Value(value) => self.ctx.add_filter(column, operator, value),
            Operand::Query(query) => {
                let context = build_context(query, self.ctes, self.catalog)?;
                let filter_id = self.ctx.add_filter(column, operator, "");
                let mut linked = Subquery::new(SubqueryRole::Where, Geometry::default());
                linked.linked_filter = Some(filter_id.clone());
                linked.context = context;
                let subquery_id = linked.id.clone();
                self.ctx.subqueries.push(linked);
                if let Some(filter) = self.ctx.filters.last_mut() {
                    filter.operand = FilterOperand::Subquery(subquery_id);
                }
                filter_id
            }
        };
        if let Some(filter) = self.ctx.filters.iter_mut().find(|f| f.id == filter_id) {
            filter.connector = connector;
        }
        Ok(())
    }

    fn group_by(&mut self, group_by: &GroupByExpr) -> ParseResult<()> {
        match group_by {
            GroupByExpr::Expressions(exprs, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(ParseError::unsupported("GROUP BY modifiers"));
                }
                for expr in exprs {
                    let (qualifier, column) = column_parts(expr)
                        .ok_or_else(|| ParseError::unsupported("GROUP BY expression"))?;
                    let column = self.column_text(qualifier.as_deref(), &column);
                    self.ctx.add_group_by(column);
                }
                Ok(())
            }
            GroupByExpr::All(..) => Err(ParseError::unsupported("GROUP BY ALL")),
        }
    }

    fn having(&mut self, having: &Expr) -> ParseResult<()> {
        let mut conditions = Vec::new();
        flatten_conditions(having, &mut conditions);

        for (condition, connector) in conditions {
            let Expr::BinaryOp { left, op, right } = condition else {
                return Err(ParseError::unsupported("HAVING condition"));
            };
            let operator = comparison_operator(op)
                .ok_or_else(|| ParseError::unsupported(format!("HAVING operator {}", op)))?;
            let Expr::Function(function) = left.as_ref() else {
                return Err(ParseError::unsupported("HAVING condition without aggregate"));
            };
            let (function_kind, column) = self
                .aggregate_call(function)?
                .ok_or_else(|| ParseError::unsupported(format!("function {}", function.name)))?;

            let id = self
                .ctx
                .add_having(function_kind, column, operator, printed(right));
            if let Some(having) = self.ctx.having.iter_mut().find(|h| h.id == id) {
                having.connector = connector;
            }
        }
        Ok(())
    }

    fn order_by(&mut self, term: &OrderByExpr) -> ParseResult<()> {
        if term.nulls_first.is_some() {
            return Err(ParseError::unsupported("NULLS FIRST / NULLS LAST"));
        }
        let column = match &term.expr {
            Expr::Identifier(ident)
                if self
                    .output_aliases
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(&ident.value)) =>
            {
                quote_ident(&ident.value)
            }
            expr @ (Expr::Identifier(_) | Expr::CompoundIdentifier(_)) => {
                let (qualifier, column) = column_parts(expr)
                    .ok_or_else(|| ParseError::unsupported("ORDER BY expression"))?;
                self.column_text(qualifier.as_deref(), &column)
            }
            Expr::Function(function) => {
                let (function_kind, expression) = self
                    .aggregate_call(function)?
                    .ok_or_else(|| ParseError::unsupported("ORDER BY expression"))?;
                format!("{}({})", function_kind.as_sql(), expression)
            }
            _ => return Err(ParseError::unsupported("ORDER BY expression")),
        };
        let direction = match term.asc {
            Some(false) => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        self.ctx.add_order_by(column, direction);
        Ok(())
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    fn lookup(&self, qualifier: &str) -> Option<&Source> {
        self.sources
            .iter()
            .find(|s| s.key.eq_ignore_ascii_case(qualifier))
    }

    /// The single table declaring an unqualified column. With exactly one
    /// table and no derived tables, that table.
    fn owner(&self, column: &str) -> Option<&TableRef> {
        let has_derived = self
            .ctx
            .subqueries
            .iter()
            .any(|s| s.role == SubqueryRole::From);
        if self.ctx.tables.len() == 1 && !has_derived {
            return self.ctx.tables.first();
        }
        let mut owners = self
            .ctx
            .tables
            .iter()
            .filter(|t| t.columns.iter().any(|c| c.eq_ignore_ascii_case(column)));
        let owner = owners.next()?;
        match owners.next() {
            Some(_) => None,
            None => Some(owner),
        }
    }

    /// Canonical `table.column` text for a reference in clause position.
    /// Unknown qualifiers are kept; unresolvable bare columns stay bare.
    fn column_text(&self, qualifier: Option<&str>, column: &str) -> String {
        match qualifier {
            Some(qualifier) => match self.lookup(qualifier) {
                Some(Source {
                    kind: SourceKind::Table { id, name },
                    ..
                }) => column_ref(name, &self.declared_spelling(id, column)),
                _ => column_ref(qualifier, column),
            },
            None => match self.owner(column) {
                Some(table) => column_ref(&table.name, &self.declared_spelling(&table.id, column)),
                None => quote_ident(column),
            },
        }
    }

    /// The declared spelling of a column, matched case-insensitively.
    fn declared_spelling(&self, table: &EntityId, column: &str) -> String {
        self.ctx
            .table(table)
            .and_then(|t| t.columns.iter().find(|c| c.eq_ignore_ascii_case(column)))
            .cloned()
            .unwrap_or_else(|| column.to_string())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `SELECT NULL` with nothing else: how an empty nested context is written.
fn is_empty_select(query: &Query, select: &Select) -> bool {
    select.from.is_empty()
        && select.selection.is_none()
        && select.having.is_none()
        && matches!(&select.group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty())
        && query.order_by.is_none()
        && query.limit.is_none()
        && matches!(
            select.projection.as_slice(),
            [SelectItem::UnnamedExpr(Expr::Value(Value::Null))]
        )
}

/// In-order flattening of an AND/OR tree. Each condition carries the
/// connector that joins it to the next one.
fn flatten_conditions<'e>(expr: &'e Expr, out: &mut Vec<(&'e Expr, Connector)>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: op @ (BinaryOperator::And | BinaryOperator::Or),
            right,
        } => {
            flatten_conditions(left, out);
            if let Some(last) = out.last_mut() {
                last.1 = match op {
                    BinaryOperator::Or => Connector::Or,
                    _ => Connector::And,
                };
            }
            flatten_conditions(right, out);
        }
        _ => out.push((expr, Connector::And)),
    }
}

/// Split a column reference into optional qualifier and column name.
fn column_parts(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.clone())),
        Expr::CompoundIdentifier(parts) => {
            let (column, qualifier) = parts.split_last()?;
            if qualifier.is_empty() {
                return Some((None, column.value.clone()));
            }
            let qualifier: Vec<&str> = qualifier.iter().map(|i| i.value.as_str()).collect();
            Some((Some(qualifier.join(".")), column.value.clone()))
        }
        _ => None,
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Expression text as printed by the AST, with placeholders unmasked.
fn printed(expr: &Expr) -> String {
    unmask(&expr.to_string()).into_owned()
}

/// A literal comparison value: number, string or placeholder.
fn literal(expr: &Expr) -> ParseResult<String> {
    match expr {
        Expr::Value(Value::Number(number, _)) => Ok(number.clone()),
        Expr::Value(Value::SingleQuotedString(text)) => Ok(text.clone()),
        Expr::UnaryOp {
            op: op @ (UnaryOperator::Minus | UnaryOperator::Plus),
            expr,
        } => match expr.as_ref() {
            Expr::Value(Value::Number(number, _)) => Ok(format!("{}{}", op, number)),
            _ => Err(ParseError::unsupported("comparison value")),
        },
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            Err(ParseError::unsupported("column-to-column comparison"))
        }
        _ => Err(ParseError::unsupported("comparison value")),
    }
}

fn limit_value(expr: &Expr) -> ParseResult<Limit> {
    match expr {
        Expr::Value(Value::Number(number, _)) => number
            .parse::<u64>()
            .map(Limit::Count)
            .map_err(|_| ParseError::unsupported(format!("LIMIT {}", number))),
        Expr::Value(Value::SingleQuotedString(text)) if is_placeholder(text) => {
            Ok(Limit::Placeholder(text.clone()))
        }
        _ => Err(ParseError::unsupported("LIMIT expression")),
    }
}

fn filter_operator(op: &BinaryOperator) -> Option<FilterOperator> {
    Some(match op {
        BinaryOperator::Eq => FilterOperator::Eq,
        BinaryOperator::NotEq => FilterOperator::NotEq,
        BinaryOperator::Lt => FilterOperator::Lt,
        BinaryOperator::LtEq => FilterOperator::LtEq,
        BinaryOperator::Gt => FilterOperator::Gt,
        BinaryOperator::GtEq => FilterOperator::GtEq,
        _ => return None,
    })
}

fn comparison_operator(op: &BinaryOperator) -> Option<ComparisonOperator> {
    Some(match op {
        BinaryOperator::Eq => ComparisonOperator::Eq,
        BinaryOperator::NotEq => ComparisonOperator::NotEq,
        BinaryOperator::Lt => ComparisonOperator::Lt,
        BinaryOperator::LtEq => ComparisonOperator::LtEq,
        BinaryOperator::Gt => ComparisonOperator::Gt,
        BinaryOperator::GtEq => ComparisonOperator::GtEq,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqlDialect;
    use crate::syntax::parse_query;
    use test_case::test_case;

    fn build(sql: &str) -> ParseResult<QueryModel> {
        build_with(sql, &SchemaCatalog::new())
    }

    fn build_with(sql: &str, catalog: &SchemaCatalog) -> ParseResult<QueryModel> {
        let query = parse_query(sql, SqlDialect::Generic)?;
        build_model(&query, catalog)
    }

    fn unsupported(sql: &str) -> String {
        match build(sql) {
            Err(ParseError::Unsupported { construct }) => construct,
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    // =========================================================================
    // Sources and joins
    // =========================================================================

    #[test]
    fn test_aliases_resolve_to_table_names() {
        let model = build(
            "SELECT o.id, c.name FROM orders o \
             LEFT JOIN customers AS c ON o.customer_id = c.id \
             WHERE c.country = 'DE'",
        )
        .unwrap();
        let ctx = &model.root;

        assert_eq!(ctx.tables.len(), 2);
        assert_eq!(ctx.tables[0].name, "orders");
        assert_eq!(ctx.tables[0].selected, vec!["id".to_string()]);
        assert_eq!(ctx.tables[1].selected, vec!["name".to_string()]);

        let join = &ctx.joins[0];
        assert_eq!(join.kind, JoinKind::Left);
        assert_eq!(ctx.table_name(&join.source_table), "orders");
        assert_eq!(join.source_column, "customer_id");
        assert_eq!(ctx.table_name(&join.target_table), "customers");

        assert_eq!(ctx.filters[0].column, "customers.country");
        assert_eq!(ctx.filters[0].operand, FilterOperand::Value("DE".into()));
    }

    #[test]
    fn test_and_in_on_condition_adds_joins_of_same_kind() {
        let model = build(
            "SELECT o.id FROM orders o \
             LEFT JOIN customers c ON o.customer_id = c.id AND c.region_id = o.region_id",
        )
        .unwrap();
        let ctx = &model.root;
        assert_eq!(ctx.joins.len(), 2);
        assert!(ctx.joins.iter().all(|j| j.kind == JoinKind::Left));
        assert_eq!(ctx.table_name(&ctx.joins[1].source_table), "customers");
        assert_eq!(ctx.joins[1].source_column, "region_id");
        assert_eq!(ctx.table_name(&ctx.joins[1].target_table), "orders");
    }

    #[test]
    fn test_select_null_is_empty_context() {
        let model = build(
            "SELECT o.id, (SELECT NULL) AS n FROM orders o \
             WHERE o.customer_id IN (SELECT NULL)",
        )
        .unwrap();
        let ctx = &model.root;
        assert_eq!(ctx.subqueries.len(), 2);
        assert!(ctx.subqueries.iter().all(|s| s.context.has_no_source()));
        // The select list is read before WHERE.
        assert_eq!(ctx.subqueries[0].role, SubqueryRole::Select);
        assert_eq!(
            ctx.filters[0].operand.subquery(),
            Some(&ctx.subqueries[1].id)
        );
    }

    #[test]
    fn test_cross_join_becomes_comma_table() {
        let model = build("SELECT a.x FROM a CROSS JOIN b").unwrap();
        assert_eq!(model.root.tables.len(), 2);
        assert!(model.root.joins.is_empty());
    }

    #[test]
    fn test_cte_names_link_tables() {
        let model = build(
            "WITH recent AS (SELECT orders.id FROM orders) SELECT recent.id FROM recent",
        )
        .unwrap();
        assert_eq!(model.ctes.len(), 1);
        let table = &model.root.tables[0];
        assert_eq!(table.cte.as_ref(), Some(&model.ctes[0].id));
        assert_eq!(table.columns, vec!["id".to_string()]);
        assert!(table.is_selected("id"));
    }

    #[test]
    fn test_catalog_resolves_unqualified_columns() {
        let catalog = SchemaCatalog::new()
            .with_table("orders", ["id", "total"])
            .with_table("customers", ["id", "name"]);
        let model = build_with(
            "SELECT name, total FROM orders JOIN customers ON orders.customer_id = customers.id",
            &catalog,
        )
        .unwrap();
        assert!(model.root.tables[0].is_selected("total"));
        assert!(model.root.tables[1].is_selected("name"));

        let err = build_with("SELECT id FROM orders, customers", &catalog).unwrap_err();
        assert_eq!(err, ParseError::unsupported("ambiguous column id"));
    }

    #[test]
    fn test_qualified_wildcard_expands_declared_columns() {
        let catalog = SchemaCatalog::new().with_table("orders", ["id", "total"]);
        let model = build_with("SELECT orders.* FROM orders", &catalog).unwrap();
        assert_eq!(model.root.tables[0].selected.len(), 2);
        assert!(build("SELECT orders.* FROM orders").is_err());
    }

    #[test]
    fn test_sole_star_is_empty_selection() {
        let model = build("SELECT /* no columns selected */ * FROM orders").unwrap();
        assert!(model.root.tables[0].selected.is_empty());
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    #[test]
    fn test_where_flattens_connectors_in_order() {
        let model = build(
            "SELECT t.a FROM t WHERE t.a = 1 AND t.b > 2 OR t.c IS NULL AND t.d IN (1, {{ids}})",
        )
        .unwrap();
        let filters = &model.root.filters;
        let connectors: Vec<Connector> = filters.iter().map(|f| f.connector).collect();
        assert_eq!(
            connectors,
            vec![Connector::And, Connector::Or, Connector::And, Connector::And]
        );
        assert_eq!(filters[2].operator, FilterOperator::IsNull);
        assert_eq!(filters[3].operand, FilterOperand::Value("1, {{ids}}".into()));
    }

    #[test_case("1e5", "1e5" ; "exponent")]
    #[test_case(".5", ".5" ; "leading dot")]
    #[test_case("+5", "+5" ; "explicit plus")]
    #[test_case("-2.5", "-2.5" ; "negative")]
    fn test_numeric_literals_keep_their_text(sql_value: &str, expected: &str) {
        let model = build(&format!("SELECT t.a FROM t WHERE t.a > {}", sql_value)).unwrap();
        assert_eq!(
            model.root.filters[0].operand,
            FilterOperand::Value(expected.into())
        );
    }

    #[test]
    fn test_placeholders_and_ranges() {
        let model = build(
            "SELECT t.a FROM t WHERE t.a = {{x}} AND t.b NOT BETWEEN 1 AND {{hi}} AND t.c LIKE 'A%'",
        )
        .unwrap();
        let filters = &model.root.filters;
        assert_eq!(filters[0].operand, FilterOperand::Value("{{x}}".into()));
        assert_eq!(filters[1].operator, FilterOperator::NotBetween);
        assert_eq!(filters[1].operand, FilterOperand::Value("1 AND {{hi}}".into()));
        assert_eq!(filters[2].operand, FilterOperand::Value("A%".into()));
    }

    #[test]
    fn test_in_subquery_links_filter() {
        let model = build(
            "SELECT o.id FROM orders o WHERE o.customer_id IN \
             (SELECT customers.id FROM customers WHERE customers.vip = 1)",
        )
        .unwrap();
        let ctx = &model.root;
        let filter = &ctx.filters[0];
        let sub = ctx.subquery(filter.operand.subquery().unwrap()).unwrap();
        assert_eq!(sub.role, SubqueryRole::Where);
        assert_eq!(sub.linked_filter.as_ref(), Some(&filter.id));
        assert_eq!(sub.context.tables[0].name, "customers");
        assert_eq!(sub.context.filters.len(), 1);
    }

    #[test]
    fn test_group_by_having_order_limit() {
        let model = build(
            "SELECT customers.country, COUNT(*) AS n FROM customers \
             GROUP BY customers.country HAVING COUNT(*) > 5 OR SUM(customers.spend) >= {{min}} \
             ORDER BY n DESC, customers.country LIMIT {{max_rows}}",
        )
        .unwrap();
        let ctx = &model.root;
        assert_eq!(ctx.group_by[0].column, "customers.country");
        assert_eq!(ctx.having.len(), 2);
        assert_eq!(ctx.having[0].connector, Connector::Or);
        assert_eq!(ctx.having[1].column, "customers.spend");
        assert_eq!(ctx.having[1].value, "{{min}}");
        assert_eq!(ctx.order_by[0].column, "n");
        assert_eq!(ctx.order_by[0].direction, SortDirection::Desc);
        assert_eq!(ctx.order_by[1].direction, SortDirection::Asc);
        assert_eq!(ctx.limit, Some(Limit::Placeholder("{{max_rows}}".into())));
        assert_eq!(ctx.select_aggregates[0].alias.as_deref(), Some("n"));
    }

    #[test]
    fn test_aggregate_expressions_are_canonical() {
        let model = build("SELECT COUNT(DISTINCT o.id), SUM(o.price * o.qty) FROM orders o")
            .unwrap();
        let aggregates = &model.root.select_aggregates;
        assert_eq!(aggregates[0].expression, "DISTINCT orders.id");
        assert_eq!(aggregates[1].expression, "orders.price * orders.qty");
    }

    #[test]
    fn test_derived_and_scalar_subqueries() {
        let model = build(
            "SELECT (SELECT COUNT(*) FROM customers) AS n \
             FROM (SELECT orders.id FROM orders) AS big",
        )
        .unwrap();
        let roles: Vec<SubqueryRole> = model.root.subqueries.iter().map(|s| s.role).collect();
        assert_eq!(roles, vec![SubqueryRole::From, SubqueryRole::Select]);
        assert_eq!(model.root.subqueries[0].alias.as_deref(), Some("big"));
    }

    // =========================================================================
    // Unsupported constructs
    // =========================================================================

    #[test_case("SELECT DISTINCT t.a FROM t", "DISTINCT" ; "distinct")]
    #[test_case("SELECT t.a FROM t LIMIT 5 OFFSET 10", "OFFSET" ; "offset")]
    #[test_case("SELECT t.a FROM t UNION SELECT u.a FROM u", "UNION" ; "union")]
    #[test_case("SELECT a.x FROM a JOIN b ON a.x < b.y", "non-equality join condition" ; "non equality join")]
    #[test_case("SELECT a.x FROM a JOIN b ON a.x = b.y OR a.z = b.z", "OR in join condition" ; "or join")]
    #[test_case("SELECT a.x FROM a JOIN b ON a.x = b.y AND a.z < b.z", "non-equality join condition" ; "and with inequality")]
    #[test_case("SELECT 1", "expression in select list" ; "select without from")]
    #[test_case("SELECT a.x FROM a JOIN b USING (x)", "join without an ON condition" ; "using")]
    #[test_case("SELECT t.a FROM t WHERE (t.a = 1 OR t.b = 2)", "parenthesized condition group" ; "nested group")]
    #[test_case("SELECT t.a FROM t WHERE t.a = t.b", "column-to-column comparison" ; "column comparison")]
    #[test_case("SELECT t.a AS x FROM t", "aliased column" ; "aliased column")]
    #[test_case("SELECT t.a FROM t, t", "table t referenced more than once" ; "duplicate table")]
    #[test_case("SELECT ROW_NUMBER() OVER () FROM t", "function ROW_NUMBER" ; "non aggregate function")]
    #[test_case("SELECT COUNT(*) OVER () FROM t", "window function" ; "window")]
    fn test_unsupported_constructs(sql: &str, construct: &str) {
        assert_eq!(unsupported(sql), construct);
    }

    #[test]
    fn test_nested_with_is_unsupported() {
        let query = parse_query(
            "WITH r AS (SELECT t.a FROM t) SELECT r.a FROM r",
            SqlDialect::Generic,
        )
        .unwrap();
        let err = build_context(&query, &[], &SchemaCatalog::new()).unwrap_err();
        assert_eq!(err, ParseError::unsupported("WITH inside a nested query"));
    }
}
