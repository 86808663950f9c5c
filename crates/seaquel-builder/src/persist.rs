//! Plain-data form of the query model for storage and transport.
//!
//! Sets become ordered lists, maps become `(key, value)` pairs and the filter
//! operand is split into `value` plus an optional `subquery_id`. Every record
//! carries a format `version`; newer versions are refused rather than read
//! half-way.

use crate::error::{PersistError, PersistResult};
use crate::model::{
    AggregateFunction, ColumnAggregate, ComparisonOperator, Connector, Cte, EntityId, Filter,
    FilterOperand, FilterOperator, Geometry, GroupBy, Having, Join, JoinKind, Limit, OrderBy,
    Position, QueryContext, QueryModel, SelectAggregate, SortDirection, Subquery, SubqueryRole,
    TableRef,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Current persisted format version.
pub const FORMAT_VERSION: u32 = 1;

fn current_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedModel {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub ctes: Vec<PersistedCte>,
    #[serde(default)]
    pub root: PersistedContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCte {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub context: PersistedContext,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedContext {
    pub tables: Vec<PersistedTable>,
    pub joins: Vec<PersistedJoin>,
    pub filters: Vec<PersistedFilter>,
    pub group_by: Vec<PersistedGroupBy>,
    pub having: Vec<PersistedHaving>,
    pub order_by: Vec<PersistedOrderBy>,
    pub limit: Option<Limit>,
    pub select_aggregates: Vec<PersistedSelectAggregate>,
    pub subqueries: Vec<PersistedSubquery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTable {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default)]
    pub aggregates: Vec<(String, ColumnAggregate)>,
    #[serde(default)]
    pub cte: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJoin {
    pub id: EntityId,
    pub source_table: EntityId,
    pub source_column: String,
    pub target_table: EntityId,
    pub target_column: String,
    #[serde(default)]
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFilter {
    pub id: EntityId,
    pub column: String,
    #[serde(default)]
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub subquery_id: Option<EntityId>,
    #[serde(default)]
    pub connector: Connector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedGroupBy {
    pub id: EntityId,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHaving {
    pub id: EntityId,
    #[serde(default)]
    pub function: AggregateFunction,
    pub column: String,
    #[serde(default)]
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub connector: Connector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedOrderBy {
    pub id: EntityId,
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSelectAggregate {
    pub id: EntityId,
    #[serde(default)]
    pub function: AggregateFunction,
    pub expression: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSubquery {
    pub id: EntityId,
    pub role: SubqueryRole,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub linked_filter: Option<EntityId>,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub context: PersistedContext,
}

// ============================================================================
// Model -> persisted
// ============================================================================

pub fn to_persisted(model: &QueryModel) -> PersistedModel {
    PersistedModel {
        version: FORMAT_VERSION,
        ctes: model
            .ctes
            .iter()
            .map(|cte| PersistedCte {
                id: cte.id.clone(),
                name: cte.name.clone(),
                geometry: cte.geometry,
                context: persist_context(&cte.context),
            })
            .collect(),
        root: persist_context(&model.root),
    }
}

fn persist_context(ctx: &QueryContext) -> PersistedContext {
    PersistedContext {
        tables: ctx
            .tables
            .iter()
            .map(|t| PersistedTable {
                id: t.id.clone(),
                name: t.name.clone(),
                position: t.position,
                columns: t.columns.clone(),
                selected: t.selected.clone(),
                aggregates: t
                    .aggregates
                    .iter()
                    .map(|(column, aggregate)| (column.clone(), aggregate.clone()))
                    .collect(),
                cte: t.cte.clone(),
            })
            .collect(),
        joins: ctx
            .joins
            .iter()
            .map(|j| PersistedJoin {
                id: j.id.clone(),
                source_table: j.source_table.clone(),
                source_column: j.source_column.clone(),
                target_table: j.target_table.clone(),
                target_column: j.target_column.clone(),
                kind: j.kind,
            })
            .collect(),
        filters: ctx
            .filters
            .iter()
            .map(|f| {
                let (value, subquery_id) = match &f.operand {
                    FilterOperand::Value(value) => (value.clone(), None),
                    FilterOperand::Subquery(id) => (String::new(), Some(id.clone())),
                };
                PersistedFilter {
                    id: f.id.clone(),
                    column: f.column.clone(),
                    operator: f.operator,
                    value,
                    subquery_id,
                    connector: f.connector,
                }
            })
            .collect(),
        group_by: ctx
            .group_by
            .iter()
            .map(|g| PersistedGroupBy {
                id: g.id.clone(),
                column: g.column.clone(),
            })
            .collect(),
        having: ctx
            .having
            .iter()
            .map(|h| PersistedHaving {
                id: h.id.clone(),
                function: h.function,
                column: h.column.clone(),
                operator: h.operator,
                value: h.value.clone(),
                connector: h.connector,
            })
            .collect(),
        order_by: ctx
            .order_by
            .iter()
            .map(|o| PersistedOrderBy {
                id: o.id.clone(),
                column: o.column.clone(),
                direction: o.direction,
            })
            .collect(),
        limit: ctx.limit.clone(),
        select_aggregates: ctx
            .select_aggregates
            .iter()
            .map(|a| PersistedSelectAggregate {
                id: a.id.clone(),
                function: a.function,
                expression: a.expression.clone(),
                alias: a.alias.clone(),
            })
            .collect(),
        subqueries: ctx
            .subqueries
            .iter()
            .map(|s| PersistedSubquery {
                id: s.id.clone(),
                role: s.role,
                alias: s.alias.clone(),
                linked_filter: s.linked_filter.clone(),
                geometry: s.geometry,
                context: persist_context(&s.context),
            })
            .collect(),
    }
}

// ============================================================================
// Persisted -> model
// ============================================================================

pub fn from_persisted(persisted: PersistedModel) -> PersistResult<QueryModel> {
    if persisted.version > FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion {
            found: persisted.version,
            supported: FORMAT_VERSION,
        });
    }
    Ok(QueryModel {
        ctes: persisted
            .ctes
            .into_iter()
            .map(|cte| Cte {
                id: cte.id,
                name: cte.name,
                geometry: cte.geometry,
                context: restore_context(cte.context),
            })
            .collect(),
        root: restore_context(persisted.root),
    })
}

fn restore_context(ctx: PersistedContext) -> QueryContext {
    QueryContext {
        tables: ctx
            .tables
            .into_iter()
            .map(|t| TableRef {
                id: t.id,
                name: t.name,
                position: t.position,
                columns: t.columns,
                selected: t.selected,
                aggregates: t.aggregates.into_iter().collect(),
                cte: t.cte,
            })
            .collect(),
        joins: ctx
            .joins
            .into_iter()
            .map(|j| Join {
                id: j.id,
                source_table: j.source_table,
                source_column: j.source_column,
                target_table: j.target_table,
                target_column: j.target_column,
                kind: j.kind,
            })
            .collect(),
        filters: ctx
            .filters
            .into_iter()
            .map(|f| Filter {
                id: f.id,
                column: f.column,
                operator: f.operator,
                operand: match f.subquery_id {
                    Some(id) => FilterOperand::Subquery(id),
                    None => FilterOperand::Value(f.value),
                },
                connector: f.connector,
            })
            .collect(),
        group_by: ctx
            .group_by
            .into_iter()
            .map(|g| GroupBy {
                id: g.id,
                column: g.column,
            })
            .collect(),
        having: ctx
            .having
            .into_iter()
            .map(|h| Having {
                id: h.id,
                function: h.function,
                column: h.column,
                operator: h.operator,
                value: h.value,
                connector: h.connector,
            })
            .collect(),
        order_by: ctx
            .order_by
            .into_iter()
            .map(|o| OrderBy {
                id: o.id,
                column: o.column,
                direction: o.direction,
            })
            .collect(),
        limit: ctx.limit,
        select_aggregates: ctx
            .select_aggregates
            .into_iter()
            .map(|a| SelectAggregate {
                id: a.id,
                function: a.function,
                expression: a.expression,
                alias: a.alias,
            })
            .collect(),
        subqueries: ctx
            .subqueries
            .into_iter()
            .map(|s| Subquery {
                id: s.id,
                role: s.role,
                alias: s.alias,
                linked_filter: s.linked_filter,
                geometry: s.geometry,
                context: restore_context(s.context),
            })
            .collect(),
    }
}

// ============================================================================
// JSON
// ============================================================================

pub fn to_json(model: &QueryModel) -> PersistResult<String> {
    Ok(serde_json::to_string_pretty(&to_persisted(model))?)
}

pub fn from_json(input: &str) -> PersistResult<QueryModel> {
    let persisted: PersistedModel = serde_json::from_str(input)?;
    debug!(version = persisted.version, ctes = persisted.ctes.len(), "loaded persisted model");
    from_persisted(persisted)
}
