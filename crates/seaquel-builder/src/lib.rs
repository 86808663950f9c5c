//! Core of the Seaquel visual query builder
//!
//! A canvas of tables, joins and clause items is held as a [`QueryModel`].
//! The model renders to SQL, and edited SQL text is read back into the model
//! whenever the canvas can represent it.
//!
//! ## Features
//!
//! - **Query model**: tables, joins, filters, grouping, ordering, limits,
//!   aggregates, nested subqueries and CTEs with stable entity ids
//! - **SQL generation**: deterministic, pretty or compact, with `{{name}}`
//!   template placeholders passed through verbatim
//! - **Reconciliation**: edited text is parsed and either replaces the model
//!   (keeping ids and canvas positions) or is kept as an override
//! - **Criteria**: model-level predicates and TOML/JSON lesson challenges
//! - **Persistence**: versioned JSON documents for saved canvases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seaquel_builder::{BuilderSession, Position, SchemaCatalog, EngineConfig};
//!
//! let catalog = SchemaCatalog::new().with_table("orders", ["id", "total"]);
//! let mut session = BuilderSession::new(EngineConfig::default(), catalog);
//!
//! let orders = session.active_add_table("orders", Position::default()).unwrap();
//! session.active_toggle_column(&orders, "total");
//! assert_eq!(session.editor_text(), "SELECT orders.total\nFROM orders");
//!
//! // Text edits flow back into the model
//! session.apply_text("SELECT orders.id FROM orders LIMIT 5");
//! ```

pub mod catalog;
pub mod config;
pub mod criteria;
pub mod error;
pub mod model;
pub mod persist;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod syntax;
pub mod validate;

// Re-exports
pub use catalog::SchemaCatalog;
pub use config::{EngineConfig, GeneratorConfig, ParserConfig, SqlDialect};
pub use criteria::{Challenge, ChallengeProgress, Criterion, Predicate};
pub use error::{ConfigError, ConfigResult, ParseError, ParseResult, PersistError, PersistResult};
pub use model::{
    ActiveContext, AggregateFunction, ColumnAggregate, ComparisonOperator, Connector, Cte,
    EntityId, Filter, FilterOperand, FilterOperator, Geometry, JoinKind, Limit, Position,
    QueryContext, QueryModel, SortDirection, Subquery, SubqueryRole, TableRef,
};
pub use reconcile::{QueryStructure, Reconciler, Reconciliation};
pub use render::{generate, RenderedQuery, SqlGenerator};
pub use session::{BuilderSession, ChangeEvent, ChangeOrigin, SubscriptionId, TextOutcome};
pub use syntax::placeholder_names;
pub use validate::{diagnose, Diagnostic, Severity};
