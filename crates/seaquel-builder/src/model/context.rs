//! One SELECT statement's worth of canvas state, with its mutators.
//!
//! Every mutator is total: a stale id is logged at debug level and ignored,
//! because canvas events routinely race ahead of deletions.

use super::types::*;
use super::Subquery;
use tracing::debug;

/// Bundle of tables, joins, filters etc. defining one SELECT statement.
///
/// The root query, every subquery and every CTE each own one of these.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryContext {
    pub tables: Vec<TableRef>,
    pub joins: Vec<Join>,
    pub filters: Vec<Filter>,
    pub group_by: Vec<GroupBy>,
    pub having: Vec<Having>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Limit>,
    pub select_aggregates: Vec<SelectAggregate>,
    pub subqueries: Vec<Subquery>,
}

/// Partial update for a filter. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
    pub column: Option<String>,
    pub operator: Option<FilterOperator>,
    pub value: Option<String>,
    pub connector: Option<Connector>,
}

/// Partial update for a having condition.
#[derive(Debug, Clone, Default)]
pub struct HavingUpdate {
    pub function: Option<AggregateFunction>,
    pub column: Option<String>,
    pub operator: Option<ComparisonOperator>,
    pub value: Option<String>,
    pub connector: Option<Connector>,
}

/// Partial update for a select aggregate. `alias: Some(None)` clears the alias.
#[derive(Debug, Clone, Default)]
pub struct SelectAggregateUpdate {
    pub function: Option<AggregateFunction>,
    pub expression: Option<String>,
    pub alias: Option<Option<String>>,
}

/// Table qualifier of a `table.column` reference, unquoted.
pub(crate) fn column_qualifier(column: &str) -> Option<&str> {
    let (qualifier, _) = column.rsplit_once('.')?;
    Some(qualifier.trim().trim_matches('"'))
}

fn references_table(column: &str, table: &str) -> bool {
    column_qualifier(column).is_some_and(|q| q.eq_ignore_ascii_case(table))
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing can be rendered after FROM.
    pub fn has_no_source(&self) -> bool {
        self.tables.is_empty()
            && !self
                .subqueries
                .iter()
                .any(|s| s.role == SubqueryRole::From)
    }

    // ========================================================================
    // Tables and columns
    // ========================================================================

    pub fn table(&self, id: &EntityId) -> Option<&TableRef> {
        self.tables.iter().find(|t| &t.id == id)
    }

    pub fn table_mut(&mut self, id: &EntityId) -> Option<&mut TableRef> {
        self.tables.iter_mut().find(|t| &t.id == id)
    }

    /// First table with this name (ASCII case-insensitive).
    pub fn table_by_name(&self, name: &str) -> Option<&TableRef> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Name of a table, or the empty string when the id no longer resolves.
    pub fn table_name(&self, id: &EntityId) -> &str {
        self.table(id).map(|t| t.name.as_str()).unwrap_or("")
    }

    pub fn add_table(
        &mut self,
        name: impl Into<String>,
        columns: Vec<String>,
        position: Position,
    ) -> EntityId {
        self.push_table(TableRef::new(name, columns, position))
    }

    /// Insert a prepared table entry, returning its id.
    pub fn push_table(&mut self, table: TableRef) -> EntityId {
        let id = table.id.clone();
        self.tables.push(table);
        id
    }

    /// Remove a table and everything that references it.
    pub fn remove_table(&mut self, id: &EntityId) -> bool {
        let Some(index) = self.tables.iter().position(|t| &t.id == id) else {
            debug!(table = %id, "ignoring removal of stale table id");
            return false;
        };
        let removed = self.tables.remove(index);

        self.joins
            .retain(|j| &j.source_table != id && &j.target_table != id);

        // Column references are by name; keep them while a same-named table remains.
        if self.table_by_name(&removed.name).is_none() {
            let name = removed.name.as_str();
            let dropped: Vec<EntityId> = self
                .filters
                .iter()
                .filter(|f| references_table(&f.column, name))
                .map(|f| f.id.clone())
                .collect();
            for filter in dropped {
                self.remove_filter(&filter);
            }
            self.group_by.retain(|g| !references_table(&g.column, name));
            self.having.retain(|h| !references_table(&h.column, name));
            self.order_by.retain(|o| !references_table(&o.column, name));
        }
        true
    }

    pub fn move_table(&mut self, id: &EntityId, position: Position) {
        match self.table_mut(id) {
            Some(table) => table.position = position,
            None => debug!(table = %id, "ignoring move of stale table id"),
        }
    }

    /// Flip a column's selection, returning the new state (false for stale ids).
    pub fn toggle_column(&mut self, table_id: &EntityId, column: &str) -> bool {
        let Some(table) = self.table_mut(table_id) else {
            debug!(table = %table_id, column, "ignoring toggle on stale table id");
            return false;
        };
        if table.is_selected(column) {
            table.deselect(column);
            false
        } else {
            table.select(column);
            true
        }
    }

    pub fn select_column(&mut self, table_id: &EntityId, column: &str) {
        if let Some(table) = self.table_mut(table_id) {
            table.select(column);
        }
    }

    pub fn deselect_column(&mut self, table_id: &EntityId, column: &str) {
        if let Some(table) = self.table_mut(table_id) {
            table.deselect(column);
        }
    }

    /// Set or clear a column aggregate. Setting one also selects the column.
    pub fn set_column_aggregate(
        &mut self,
        table_id: &EntityId,
        column: &str,
        aggregate: Option<ColumnAggregate>,
    ) {
        let Some(table) = self.table_mut(table_id) else {
            debug!(table = %table_id, column, "ignoring aggregate on stale table id");
            return;
        };
        match aggregate {
            Some(aggregate) => {
                table.select(column);
                table.aggregates.insert(column.to_string(), aggregate);
            }
            None => {
                table.aggregates.remove(column);
            }
        }
    }

    // ========================================================================
    // Joins
    // ========================================================================

    /// Connect two tables of this context. Returns `None` if either endpoint
    /// is not a table here, or both are the same table.
    pub fn add_join(
        &mut self,
        source_table: &EntityId,
        source_column: impl Into<String>,
        target_table: &EntityId,
        target_column: impl Into<String>,
        kind: JoinKind,
    ) -> Option<EntityId> {
        if self.table(source_table).is_none() || self.table(target_table).is_none() {
            debug!(source = %source_table, target = %target_table, "join endpoint not in context");
            return None;
        }
        if source_table == target_table {
            debug!(table = %source_table, "refusing self-join");
            return None;
        }
        let id = EntityId::new();
        self.joins.push(Join {
            id: id.clone(),
            source_table: source_table.clone(),
            source_column: source_column.into(),
            target_table: target_table.clone(),
            target_column: target_column.into(),
            kind,
        });
        Some(id)
    }

    pub fn set_join_kind(&mut self, id: &EntityId, kind: JoinKind) {
        if let Some(join) = self.joins.iter_mut().find(|j| &j.id == id) {
            join.kind = kind;
        }
    }

    pub fn set_join_columns(
        &mut self,
        id: &EntityId,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) {
        if let Some(join) = self.joins.iter_mut().find(|j| &j.id == id) {
            join.source_column = source_column.into();
            join.target_column = target_column.into();
        }
    }

    pub fn remove_join(&mut self, id: &EntityId) -> bool {
        let before = self.joins.len();
        self.joins.retain(|j| &j.id != id);
        before != self.joins.len()
    }

    // ========================================================================
    // Filters
    // ========================================================================

    pub fn filter(&self, id: &EntityId) -> Option<&Filter> {
        self.filters.iter().find(|f| &f.id == id)
    }

    pub fn add_filter(
        &mut self,
        column: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<String>,
    ) -> EntityId {
        let id = EntityId::new();
        self.filters.push(Filter {
            id: id.clone(),
            column: column.into(),
            operator,
            operand: FilterOperand::Value(value.into()),
            connector: Connector::And,
        });
        id
    }

    /// Apply a partial update. Setting a literal value on a subquery-linked
    /// filter drops the linked subquery.
    pub fn update_filter(&mut self, id: &EntityId, update: FilterUpdate) {
        let Some(filter) = self.filters.iter_mut().find(|f| &f.id == id) else {
            debug!(filter = %id, "ignoring update of stale filter id");
            return;
        };
        if let Some(column) = update.column {
            filter.column = column;
        }
        if let Some(operator) = update.operator {
            filter.operator = operator;
        }
        if let Some(connector) = update.connector {
            filter.connector = connector;
        }
        let orphan = match update.value {
            Some(value) => {
                let previous = std::mem::replace(&mut filter.operand, FilterOperand::Value(value));
                previous.subquery().cloned()
            }
            None => None,
        };
        if let Some(subquery) = orphan {
            self.subqueries.retain(|s| s.id != subquery);
        }
    }

    /// Remove a filter together with the subquery it links, if any.
    pub fn remove_filter(&mut self, id: &EntityId) -> bool {
        let Some(index) = self.filters.iter().position(|f| &f.id == id) else {
            return false;
        };
        let removed = self.filters.remove(index);
        if let Some(subquery) = removed.operand.subquery() {
            self.subqueries.retain(|s| &s.id != subquery);
        }
        true
    }

    // ========================================================================
    // Grouping, ordering, limit, aggregates
    // ========================================================================

    pub fn add_group_by(&mut self, column: impl Into<String>) -> EntityId {
        let id = EntityId::new();
        self.group_by.push(GroupBy {
            id: id.clone(),
            column: column.into(),
        });
        id
    }

    pub fn remove_group_by(&mut self, id: &EntityId) -> bool {
        let before = self.group_by.len();
        self.group_by.retain(|g| &g.id != id);
        before != self.group_by.len()
    }

    pub fn add_having(
        &mut self,
        function: AggregateFunction,
        column: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<String>,
    ) -> EntityId {
        let id = EntityId::new();
        self.having.push(Having {
            id: id.clone(),
            function,
            column: column.into(),
            operator,
            value: value.into(),
            connector: Connector::And,
        });
        id
    }

    pub fn update_having(&mut self, id: &EntityId, update: HavingUpdate) {
        let Some(having) = self.having.iter_mut().find(|h| &h.id == id) else {
            debug!(having = %id, "ignoring update of stale having id");
            return;
        };
        if let Some(function) = update.function {
            having.function = function;
        }
        if let Some(column) = update.column {
            having.column = column;
        }
        if let Some(operator) = update.operator {
            having.operator = operator;
        }
        if let Some(value) = update.value {
            having.value = value;
        }
        if let Some(connector) = update.connector {
            having.connector = connector;
        }
    }

    pub fn remove_having(&mut self, id: &EntityId) -> bool {
        let before = self.having.len();
        self.having.retain(|h| &h.id != id);
        before != self.having.len()
    }

    pub fn add_order_by(&mut self, column: impl Into<String>, direction: SortDirection) -> EntityId {
        let id = EntityId::new();
        self.order_by.push(OrderBy {
            id: id.clone(),
            column: column.into(),
            direction,
        });
        id
    }

    pub fn set_order_direction(&mut self, id: &EntityId, direction: SortDirection) {
        if let Some(order) = self.order_by.iter_mut().find(|o| &o.id == id) {
            order.direction = direction;
        }
    }

    pub fn remove_order_by(&mut self, id: &EntityId) -> bool {
        let before = self.order_by.len();
        self.order_by.retain(|o| &o.id != id);
        before != self.order_by.len()
    }

    pub fn set_limit(&mut self, limit: Option<Limit>) {
        self.limit = limit;
    }

    pub fn add_select_aggregate(
        &mut self,
        function: AggregateFunction,
        expression: impl Into<String>,
        alias: Option<String>,
    ) -> EntityId {
        let id = EntityId::new();
        self.select_aggregates.push(SelectAggregate {
            id: id.clone(),
            function,
            expression: expression.into(),
            alias,
        });
        id
    }

    pub fn update_select_aggregate(&mut self, id: &EntityId, update: SelectAggregateUpdate) {
        let Some(aggregate) = self.select_aggregates.iter_mut().find(|a| &a.id == id) else {
            debug!(aggregate = %id, "ignoring update of stale select aggregate id");
            return;
        };
        if let Some(function) = update.function {
            aggregate.function = function;
        }
        if let Some(expression) = update.expression {
            aggregate.expression = expression;
        }
        if let Some(alias) = update.alias {
            aggregate.alias = alias;
        }
    }

    pub fn remove_select_aggregate(&mut self, id: &EntityId) -> bool {
        let before = self.select_aggregates.len();
        self.select_aggregates.retain(|a| &a.id != id);
        before != self.select_aggregates.len()
    }

    // ========================================================================
    // Direct child subqueries
    // ========================================================================

    pub fn subquery(&self, id: &EntityId) -> Option<&Subquery> {
        self.subqueries.iter().find(|s| &s.id == id)
    }

    pub fn subquery_mut(&mut self, id: &EntityId) -> Option<&mut Subquery> {
        self.subqueries.iter_mut().find(|s| &s.id == id)
    }

    /// Create an empty child subquery. A WHERE subquery may be linked to a
    /// filter of this context right away; a stale filter id yields `None`.
    pub fn add_subquery(
        &mut self,
        role: SubqueryRole,
        linked_filter: Option<&EntityId>,
        geometry: Geometry,
    ) -> Option<EntityId> {
        let mut subquery = Subquery::new(role, geometry);
        let id = subquery.id.clone();
        if let Some(filter_id) = linked_filter {
            if role != SubqueryRole::Where || self.filter(filter_id).is_none() {
                debug!(filter = %filter_id, ?role, "cannot link subquery to filter");
                return None;
            }
            subquery.linked_filter = Some(filter_id.clone());
            self.subqueries.push(subquery);
            self.link_filter_subquery(filter_id, &id);
        } else {
            self.subqueries.push(subquery);
        }
        Some(id)
    }

    /// Point a filter at a WHERE subquery of this context, replacing any
    /// literal value or previous link.
    pub fn link_filter_subquery(&mut self, filter_id: &EntityId, subquery_id: &EntityId) {
        let is_where = self
            .subquery(subquery_id)
            .is_some_and(|s| s.role == SubqueryRole::Where);
        let Some(filter) = self.filters.iter_mut().find(|f| &f.id == filter_id) else {
            return;
        };
        if !is_where {
            return;
        }
        let previous = std::mem::replace(
            &mut filter.operand,
            FilterOperand::Subquery(subquery_id.clone()),
        );
        for subquery in &mut self.subqueries {
            if &subquery.id == subquery_id {
                subquery.linked_filter = Some(filter_id.clone());
            } else if previous.subquery() == Some(&subquery.id) {
                subquery.linked_filter = None;
            }
        }
    }

    /// Remove a direct child subquery; its linked filter reverts to an empty
    /// literal value.
    pub fn remove_subquery(&mut self, id: &EntityId) -> bool {
        let Some(index) = self.subqueries.iter().position(|s| &s.id == id) else {
            return false;
        };
        self.subqueries.remove(index);
        for filter in &mut self.filters {
            if filter.operand.subquery() == Some(id) {
                filter.operand = FilterOperand::Value(String::new());
            }
        }
        true
    }

    pub fn set_subquery_alias(&mut self, id: &EntityId, alias: Option<String>) {
        if let Some(subquery) = self.subquery_mut(id) {
            subquery.alias = alias;
        }
    }

    // ========================================================================
    // Tree walks
    // ========================================================================

    /// Visit this context and every nested subquery context, pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a QueryContext)) {
        visit(self);
        for subquery in &self.subqueries {
            subquery.context.walk(visit);
        }
    }

    /// Mutable pre-order walk.
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut QueryContext)) {
        visit(self);
        for subquery in &mut self.subqueries {
            subquery.context.walk_mut(visit);
        }
    }

    /// Context of the subquery with this id, at any depth below here.
    pub fn find_subquery_context(&self, id: &EntityId) -> Option<&QueryContext> {
        self.subqueries.iter().find_map(|s| {
            if &s.id == id {
                Some(&s.context)
            } else {
                s.context.find_subquery_context(id)
            }
        })
    }

    pub fn find_subquery_context_mut(&mut self, id: &EntityId) -> Option<&mut QueryContext> {
        for subquery in &mut self.subqueries {
            if &subquery.id == id {
                return Some(&mut subquery.context);
            }
            if let Some(found) = subquery.context.find_subquery_context_mut(id) {
                return Some(found);
            }
        }
        None
    }

    /// True if a subquery with this id exists at any depth below here.
    pub fn contains_subquery(&self, id: &EntityId) -> bool {
        self.find_subquery_context(id).is_some()
    }

    /// Remove a subquery at any depth, from whichever context owns it.
    pub fn remove_subquery_deep(&mut self, id: &EntityId) -> bool {
        if self.remove_subquery(id) {
            return true;
        }
        self.subqueries
            .iter_mut()
            .any(|s| s.context.remove_subquery_deep(id))
    }

    /// Names this context exposes to an outer query: selected columns,
    /// aggregate aliases and scalar subquery aliases.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for table in &self.tables {
            for column in table.ordered_selection() {
                let name = table
                    .aggregates
                    .get(column)
                    .and_then(|a| a.alias.clone())
                    .unwrap_or_else(|| column.to_string());
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }
        let aliases = self
            .select_aggregates
            .iter()
            .filter_map(|a| a.alias.clone())
            .chain(
                self.subqueries
                    .iter()
                    .filter(|s| s.role == SubqueryRole::Select)
                    .filter_map(|s| s.alias.clone()),
            );
        for alias in aliases {
            if !columns.contains(&alias) {
                columns.push(alias);
            }
        }
        columns
    }
}
