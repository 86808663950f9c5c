//! Editing session: owns the model and keeps canvas and SQL text in sync.
//!
//! Canvas edits go through the `active_*` operations, which mutate the active
//! context, regenerate SQL and notify subscribers. Text edits go through
//! [`BuilderSession::apply_text`]. Text that cannot be represented is kept as
//! an override until the next canvas edit; the last valid model is never lost.

use crate::catalog::SchemaCatalog;
use crate::config::EngineConfig;
use crate::criteria::{Challenge, ChallengeProgress};
use crate::error::ParseError;
use crate::model::{
    ActiveContext, AggregateFunction, ColumnAggregate, ComparisonOperator, EntityId,
    FilterOperator, FilterUpdate, Geometry, HavingUpdate, JoinKind, Limit, Position,
    QueryContext, QueryModel, SelectAggregateUpdate, SortDirection, SubqueryRole,
};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::render::SqlGenerator;
use crate::syntax::placeholder_names;
use serde::Serialize;
use std::fmt;
use tracing::{debug, trace};

/// Handle returned by [`BuilderSession::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    Canvas,
    Text,
    Load,
    /// The active context was switched; the editor now shows its SQL.
    Focus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub revision: u64,
    pub origin: ChangeOrigin,
    /// Authoritative SQL after the change.
    pub sql: String,
    pub progress: Option<ChallengeProgress>,
}

/// Result of [`BuilderSession::apply_text`].
#[derive(Debug, Clone, PartialEq)]
pub enum TextOutcome {
    /// The text already matched the model.
    Unchanged,
    /// The model was rebuilt from the text.
    Replaced,
    /// The text is kept verbatim; the model is untouched.
    Override { reason: ParseError },
}

type Subscriber = Box<dyn FnMut(&ChangeEvent)>;

pub struct BuilderSession {
    model: QueryModel,
    active: ActiveContext,
    editor_text: String,
    override_reason: Option<ParseError>,
    catalog: SchemaCatalog,
    config: EngineConfig,
    challenge: Option<Challenge>,
    progress: Option<ChallengeProgress>,
    revision: u64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl fmt::Debug for BuilderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderSession")
            .field("active", &self.active)
            .field("revision", &self.revision)
            .field("override", &self.override_reason)
            .field("tables", &self.model.root.tables.len())
            .field("ctes", &self.model.ctes.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Default for BuilderSession {
    fn default() -> Self {
        Self::new(EngineConfig::default(), SchemaCatalog::default())
    }
}

impl BuilderSession {
    pub fn new(config: EngineConfig, catalog: SchemaCatalog) -> Self {
        let mut session = Self {
            model: QueryModel::new(),
            active: ActiveContext::Root,
            editor_text: String::new(),
            override_reason: None,
            catalog,
            config,
            challenge: None,
            progress: None,
            revision: 0,
            subscribers: Vec::new(),
            next_subscription: 0,
        };
        session.editor_text = session.active_sql();
        session
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn model(&self) -> &QueryModel {
        &self.model
    }

    /// Immutable copy for collaborators that outlive the next edit.
    pub fn snapshot(&self) -> QueryModel {
        self.model.clone()
    }

    pub fn active(&self) -> &ActiveContext {
        &self.active
    }

    pub fn editor_text(&self) -> &str {
        &self.editor_text
    }

    pub fn is_override(&self) -> bool {
        self.override_reason.is_some()
    }

    pub fn override_reason(&self) -> Option<&ParseError> {
        self.override_reason.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn progress(&self) -> Option<&ChallengeProgress> {
        self.progress.as_ref()
    }

    fn generator(&self) -> SqlGenerator {
        SqlGenerator::new(self.config.generator.clone())
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(self.config.parser.dialect, &self.catalog)
    }

    /// Generated SQL of the whole model.
    pub fn generated_sql(&self) -> String {
        self.generator().generate(&self.model)
    }

    /// Generated SQL of the active context alone.
    pub fn active_sql(&self) -> String {
        match (&self.active, self.model.context(&self.active)) {
            (ActiveContext::Root, _) | (_, None) => self.generated_sql(),
            (_, Some(ctx)) => self.generator().generate_context(ctx),
        }
    }

    /// The SQL in force: the editor text while it overrides the model,
    /// otherwise the generated SQL.
    pub fn authoritative_sql(&self) -> String {
        if self.is_override() {
            self.editor_text.clone()
        } else {
            self.generated_sql()
        }
    }

    /// Template placeholder names in the authoritative SQL.
    pub fn placeholders(&self) -> Vec<String> {
        placeholder_names(&self.authoritative_sql())
    }

    // ========================================================================
    // Subscriptions and challenge
    // ========================================================================

    pub fn subscribe(&mut self, callback: impl FnMut(&ChangeEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        before != self.subscribers.len()
    }

    /// Set or clear the challenge evaluated after every change.
    pub fn set_challenge(&mut self, challenge: Option<Challenge>) {
        self.challenge = challenge;
        self.progress = self.evaluate_challenge();
    }

    fn evaluate_challenge(&self) -> Option<ChallengeProgress> {
        let challenge = self.challenge.as_ref()?;
        Some(challenge.evaluate(&self.model, &self.authoritative_sql()))
    }

    // ========================================================================
    // Change propagation
    // ========================================================================

    fn notify(&mut self, origin: ChangeOrigin) {
        self.revision += 1;
        self.progress = self.evaluate_challenge();
        let event = ChangeEvent {
            revision: self.revision,
            origin,
            sql: self.authoritative_sql(),
            progress: self.progress.clone(),
        };
        trace!(revision = event.revision, ?origin, subscribers = self.subscribers.len(), "model changed");
        for (_, callback) in &mut self.subscribers {
            callback(&event);
        }
    }

    /// After a canvas edit: drop any override, re-point a stale active
    /// context, and replace the editor text unless it still means the same.
    fn after_canvas_change(&mut self) {
        if self.override_reason.take().is_some() {
            debug!("canvas edit cleared text override");
        }
        if self.model.context(&self.active).is_none() {
            debug!(active = ?self.active, "active context removed, returning to root");
            self.active = ActiveContext::Root;
        }
        let generated = self.active_sql();
        let keep = self
            .reconciler()
            .is_equivalent(&self.editor_text, &generated, &self.model, &self.active);
        if !keep {
            self.editor_text = generated;
        }
        self.notify(ChangeOrigin::Canvas);
    }

    /// Run a mutation against the active context. `None` when the active
    /// pointer has gone stale.
    fn edit<R>(&mut self, mutate: impl FnOnce(&mut QueryContext) -> R) -> Option<R> {
        let Some(ctx) = self.model.context_mut(&self.active) else {
            debug!(active = ?self.active, "ignoring edit of stale active context");
            return None;
        };
        let result = mutate(ctx);
        if let ActiveContext::Cte(id) = &self.active {
            let id = id.clone();
            self.model.refresh_cte_columns(&id);
        }
        self.after_canvas_change();
        Some(result)
    }

    /// Run a mutation against the whole model.
    fn edit_model<R>(&mut self, mutate: impl FnOnce(&mut QueryModel) -> R) -> R {
        let result = mutate(&mut self.model);
        self.after_canvas_change();
        result
    }

    /// Replace the model wholesale, e.g. after loading a saved canvas.
    pub fn load(&mut self, model: QueryModel) {
        self.model = model;
        self.active = ActiveContext::Root;
        self.override_reason = None;
        self.editor_text = self.active_sql();
        self.notify(ChangeOrigin::Load);
    }

    // ========================================================================
    // Text edits
    // ========================================================================

    /// Apply the editor's text to the active context.
    pub fn apply_text(&mut self, text: &str) -> TextOutcome {
        self.editor_text = text.to_string();
        let outcome = self.reconciler().reconcile(text, &self.model, &self.active);
        let result = match outcome {
            Reconciliation::Unchanged => {
                self.override_reason = None;
                TextOutcome::Unchanged
            }
            Reconciliation::Replace(next) => {
                self.model = next;
                self.override_reason = None;
                TextOutcome::Replaced
            }
            Reconciliation::Override { reason } => {
                if self.override_reason.is_none() {
                    debug!(%reason, "text override engaged");
                }
                self.override_reason = Some(reason.clone());
                TextOutcome::Override { reason }
            }
        };
        self.notify(ChangeOrigin::Text);
        result
    }

    // ========================================================================
    // Active pointer
    // ========================================================================

    /// Switch the context edited by `active_*` operations. Stale targets are
    /// refused.
    pub fn set_active(&mut self, active: ActiveContext) -> bool {
        if self.model.context(&active).is_none() {
            debug!(?active, "refusing to activate stale context");
            return false;
        }
        self.active = active;
        self.override_reason = None;
        self.editor_text = self.active_sql();
        self.notify(ChangeOrigin::Focus);
        true
    }

    // ========================================================================
    // Active-context operations
    // ========================================================================

    /// Add a table by name; declared columns come from the catalog.
    pub fn active_add_table(&mut self, name: &str, position: Position) -> Option<EntityId> {
        let columns = self.catalog.columns_or_empty(name);
        self.edit(|ctx| ctx.add_table(name, columns, position))
    }

    pub fn active_add_table_with_columns(
        &mut self,
        name: &str,
        columns: Vec<String>,
        position: Position,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_table(name, columns, position))
    }

    pub fn active_remove_table(&mut self, table: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_table(table)).unwrap_or(false)
    }

    pub fn active_move_table(&mut self, table: &EntityId, position: Position) {
        self.edit(|ctx| ctx.move_table(table, position));
    }

    /// Returns the new selection state.
    pub fn active_toggle_column(&mut self, table: &EntityId, column: &str) -> bool {
        self.edit(|ctx| ctx.toggle_column(table, column))
            .unwrap_or(false)
    }

    pub fn active_set_column_aggregate(
        &mut self,
        table: &EntityId,
        column: &str,
        aggregate: Option<ColumnAggregate>,
    ) {
        self.edit(|ctx| ctx.set_column_aggregate(table, column, aggregate));
    }

    pub fn active_add_join(
        &mut self,
        source_table: &EntityId,
        source_column: &str,
        target_table: &EntityId,
        target_column: &str,
        kind: JoinKind,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_join(source_table, source_column, target_table, target_column, kind))
            .flatten()
    }

    pub fn active_set_join_kind(&mut self, join: &EntityId, kind: JoinKind) {
        self.edit(|ctx| ctx.set_join_kind(join, kind));
    }

    pub fn active_remove_join(&mut self, join: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_join(join)).unwrap_or(false)
    }

    pub fn active_add_filter(
        &mut self,
        column: &str,
        operator: FilterOperator,
        value: &str,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_filter(column, operator, value))
    }

    pub fn active_update_filter(&mut self, filter: &EntityId, update: FilterUpdate) {
        self.edit(|ctx| ctx.update_filter(filter, update));
    }

    pub fn active_remove_filter(&mut self, filter: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_filter(filter)).unwrap_or(false)
    }

    pub fn active_add_group_by(&mut self, column: &str) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_group_by(column))
    }

    pub fn active_remove_group_by(&mut self, group_by: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_group_by(group_by))
            .unwrap_or(false)
    }

    pub fn active_add_having(
        &mut self,
        function: AggregateFunction,
        column: &str,
        operator: ComparisonOperator,
        value: &str,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_having(function, column, operator, value))
    }

    pub fn active_update_having(&mut self, having: &EntityId, update: HavingUpdate) {
        self.edit(|ctx| ctx.update_having(having, update));
    }

    pub fn active_remove_having(&mut self, having: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_having(having)).unwrap_or(false)
    }

    pub fn active_add_order_by(
        &mut self,
        column: &str,
        direction: SortDirection,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_order_by(column, direction))
    }

    pub fn active_set_order_direction(&mut self, order_by: &EntityId, direction: SortDirection) {
        self.edit(|ctx| ctx.set_order_direction(order_by, direction));
    }

    pub fn active_remove_order_by(&mut self, order_by: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_order_by(order_by))
            .unwrap_or(false)
    }

    pub fn active_set_limit(&mut self, limit: Option<Limit>) {
        self.edit(|ctx| ctx.set_limit(limit));
    }

    pub fn active_add_select_aggregate(
        &mut self,
        function: AggregateFunction,
        expression: &str,
        alias: Option<String>,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_select_aggregate(function, expression, alias))
    }

    pub fn active_update_select_aggregate(
        &mut self,
        aggregate: &EntityId,
        update: SelectAggregateUpdate,
    ) {
        self.edit(|ctx| ctx.update_select_aggregate(aggregate, update));
    }

    pub fn active_remove_select_aggregate(&mut self, aggregate: &EntityId) -> bool {
        self.edit(|ctx| ctx.remove_select_aggregate(aggregate))
            .unwrap_or(false)
    }

    /// Add a child subquery to the active context, optionally feeding a filter.
    pub fn active_add_subquery(
        &mut self,
        role: SubqueryRole,
        linked_filter: Option<&EntityId>,
        geometry: Geometry,
    ) -> Option<EntityId> {
        self.edit(|ctx| ctx.add_subquery(role, linked_filter, geometry))
            .flatten()
    }

    pub fn active_link_filter_subquery(&mut self, filter: &EntityId, subquery: &EntityId) {
        self.edit(|ctx| ctx.link_filter_subquery(filter, subquery));
    }

    pub fn active_set_subquery_alias(&mut self, subquery: &EntityId, alias: Option<String>) {
        self.edit(|ctx| ctx.set_subquery_alias(subquery, alias));
    }

    /// Read a CTE from the active context.
    pub fn active_add_cte_reference(
        &mut self,
        cte: &EntityId,
        position: Position,
    ) -> Option<EntityId> {
        let active = self.active.clone();
        self.edit_model(|model| model.add_cte_reference(&active, cte, position))
    }

    // ========================================================================
    // Model-level operations
    // ========================================================================

    /// Remove a subquery wherever it lives. The active pointer falls back to
    /// the root if it pointed into the removed subtree.
    pub fn remove_subquery(&mut self, subquery: &EntityId) -> bool {
        self.edit_model(|model| model.remove_subquery(subquery))
    }

    pub fn add_cte(&mut self, name: &str, geometry: Geometry) -> EntityId {
        self.edit_model(|model| model.add_cte(name, geometry))
    }

    pub fn rename_cte(&mut self, cte: &EntityId, name: &str) {
        self.edit_model(|model| model.rename_cte(cte, name));
    }

    pub fn remove_cte(&mut self, cte: &EntityId) -> bool {
        self.edit_model(|model| model.remove_cte(cte))
    }
}
