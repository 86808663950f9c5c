//! The query model: an explicit tree of query contexts.
//!
//! The root query and every CTE own a [`QueryContext`]; each context owns its
//! nested [`Subquery`] nodes, recursively. Nodes are addressed by stable
//! [`EntityId`]s and found with generic tree walks, so no operation is written
//! per nesting depth.

mod context;
mod types;

pub use context::{FilterUpdate, HavingUpdate, QueryContext, SelectAggregateUpdate};
pub(crate) use context::column_qualifier;
pub use types::*;

use tracing::debug;

/// A nested query context spliced into its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub id: EntityId,
    pub role: SubqueryRole,
    pub alias: Option<String>,
    /// Filter this subquery feeds (WHERE role only).
    pub linked_filter: Option<EntityId>,
    pub geometry: Geometry,
    pub context: QueryContext,
}

impl Subquery {
    pub fn new(role: SubqueryRole, geometry: Geometry) -> Self {
        Self {
            id: EntityId::new(),
            role,
            alias: None,
            linked_filter: None,
            geometry,
            context: QueryContext::default(),
        }
    }
}

/// A named common table expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub id: EntityId,
    pub name: String,
    pub geometry: Geometry,
    pub context: QueryContext,
}

/// Which context the `active_*` family of operations edits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveContext {
    #[default]
    Root,
    Subquery(EntityId),
    Cte(EntityId),
}

/// The whole canvas: CTEs plus the root query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryModel {
    pub ctes: Vec<Cte>,
    pub root: QueryContext,
}

impl QueryModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Context resolution
    // ========================================================================

    /// Resolve an active-context pointer. `None` when it has gone stale.
    pub fn context(&self, active: &ActiveContext) -> Option<&QueryContext> {
        match active {
            ActiveContext::Root => Some(&self.root),
            ActiveContext::Cte(id) => self.cte(id).map(|c| &c.context),
            ActiveContext::Subquery(id) => self.find_subquery_context(id),
        }
    }

    pub fn context_mut(&mut self, active: &ActiveContext) -> Option<&mut QueryContext> {
        match active {
            ActiveContext::Root => Some(&mut self.root),
            ActiveContext::Cte(id) => self.cte_mut(id).map(|c| &mut c.context),
            ActiveContext::Subquery(id) => self.find_subquery_context_mut(id),
        }
    }

    /// Context of a subquery anywhere in the tree, including inside CTEs.
    pub fn find_subquery_context(&self, id: &EntityId) -> Option<&QueryContext> {
        self.root.find_subquery_context(id).or_else(|| {
            self.ctes
                .iter()
                .find_map(|c| c.context.find_subquery_context(id))
        })
    }

    pub fn find_subquery_context_mut(&mut self, id: &EntityId) -> Option<&mut QueryContext> {
        if self.root.contains_subquery(id) {
            return self.root.find_subquery_context_mut(id);
        }
        self.ctes
            .iter_mut()
            .find_map(|c| c.context.find_subquery_context_mut(id))
    }

    /// Visit every context in the model: root, CTEs, and all nested subqueries.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a QueryContext)) {
        self.root.walk(visit);
        for cte in &self.ctes {
            cte.context.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut QueryContext)) {
        self.root.walk_mut(visit);
        for cte in &mut self.ctes {
            cte.context.walk_mut(visit);
        }
    }

    /// All contexts, pre-order.
    pub fn contexts(&self) -> Vec<&QueryContext> {
        let mut out = Vec::new();
        self.walk(&mut |ctx| out.push(ctx));
        out
    }

    /// True if `inner` is `outer` itself or lives somewhere inside it.
    pub fn is_within(&self, inner: &ActiveContext, outer: &ActiveContext) -> bool {
        if inner == outer {
            return true;
        }
        let Some(container) = self.context(outer) else {
            return false;
        };
        match inner {
            ActiveContext::Root => false,
            ActiveContext::Cte(_) => matches!(outer, ActiveContext::Root),
            ActiveContext::Subquery(id) => match outer {
                ActiveContext::Root => true,
                _ => container.contains_subquery(id),
            },
        }
    }

    // ========================================================================
    // Subqueries anywhere in the tree
    // ========================================================================

    /// Remove a subquery wherever it lives; the owning context unlinks its filter.
    pub fn remove_subquery(&mut self, id: &EntityId) -> bool {
        if self.root.remove_subquery_deep(id) {
            return true;
        }
        let removed = self
            .ctes
            .iter_mut()
            .any(|c| c.context.remove_subquery_deep(id));
        if !removed {
            debug!(subquery = %id, "ignoring removal of stale subquery id");
        }
        removed
    }

    // ========================================================================
    // CTEs
    // ========================================================================

    pub fn cte(&self, id: &EntityId) -> Option<&Cte> {
        self.ctes.iter().find(|c| &c.id == id)
    }

    pub fn cte_mut(&mut self, id: &EntityId) -> Option<&mut Cte> {
        self.ctes.iter_mut().find(|c| &c.id == id)
    }

    pub fn cte_by_name(&self, name: &str) -> Option<&Cte> {
        self.ctes.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn add_cte(&mut self, name: impl Into<String>, geometry: Geometry) -> EntityId {
        let id = EntityId::new();
        self.ctes.push(Cte {
            id: id.clone(),
            name: name.into(),
            geometry,
            context: QueryContext::default(),
        });
        id
    }

    /// Rename a CTE and every table entry that materializes it.
    pub fn rename_cte(&mut self, id: &EntityId, name: impl Into<String>) {
        let name = name.into();
        let Some(cte) = self.cte_mut(id) else {
            debug!(cte = %id, "ignoring rename of stale CTE id");
            return;
        };
        cte.name = name.clone();
        self.walk_mut(&mut |ctx| {
            for table in &mut ctx.tables {
                if table.cte.as_ref() == Some(id) {
                    table.name = name.clone();
                }
            }
        });
    }

    /// Remove a CTE and every table entry, in any context, that references it.
    pub fn remove_cte(&mut self, id: &EntityId) -> bool {
        let before = self.ctes.len();
        self.ctes.retain(|c| &c.id != id);
        if before == self.ctes.len() {
            debug!(cte = %id, "ignoring removal of stale CTE id");
            return false;
        }
        self.walk_mut(&mut |ctx| {
            let referencing: Vec<EntityId> = ctx
                .tables
                .iter()
                .filter(|t| t.cte.as_ref() == Some(id))
                .map(|t| t.id.clone())
                .collect();
            for table in referencing {
                ctx.remove_table(&table);
            }
        });
        true
    }

    /// Add a table entry reading from a CTE into the addressed context.
    pub fn add_cte_reference(
        &mut self,
        target: &ActiveContext,
        cte_id: &EntityId,
        position: Position,
    ) -> Option<EntityId> {
        let cte = self.cte(cte_id)?;
        if target == &ActiveContext::Cte(cte_id.clone()) {
            return None;
        }
        let mut table = TableRef::new(cte.name.clone(), cte.context.output_columns(), position);
        table.cte = Some(cte_id.clone());
        let ctx = self.context_mut(target)?;
        Some(ctx.push_table(table))
    }

    /// Re-read the output columns of a CTE into every table entry linked to it.
    /// Selections of columns the CTE no longer exposes are kept as undeclared.
    pub fn refresh_cte_columns(&mut self, id: &EntityId) {
        let Some(columns) = self.cte(id).map(|c| c.context.output_columns()) else {
            return;
        };
        self.walk_mut(&mut |ctx| {
            for table in &mut ctx.tables {
                if table.cte.as_ref() == Some(id) {
                    table.columns = columns.clone();
                }
            }
        });
    }
}
