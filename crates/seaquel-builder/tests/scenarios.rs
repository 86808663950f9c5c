//! End-to-end editing scenarios driven through `BuilderSession`.

use insta::assert_snapshot;
use seaquel_builder::{
    ActiveContext, BuilderSession, Challenge, EngineConfig, FilterOperator, GeneratorConfig,
    Geometry, JoinKind, Limit, Position, SchemaCatalog, SortDirection, SubqueryRole, TextOutcome,
};

// ============================================================================
// Helpers
// ============================================================================

fn shop() -> SchemaCatalog {
    SchemaCatalog::new()
        .with_table("orders", ["id", "customer_id", "total", "created_at"])
        .with_table("customers", ["id", "name", "country"])
        .with_table("products", ["id", "name", "price"])
}

fn compact_session() -> BuilderSession {
    let config = EngineConfig {
        generator: GeneratorConfig::compact(),
        ..EngineConfig::default()
    };
    BuilderSession::new(config, shop())
}

// ============================================================================
// Canvas to SQL
// ============================================================================

#[test]
fn selected_columns_render_in_declared_order() {
    let mut session = compact_session();
    let orders = session
        .active_add_table("orders", Position::default())
        .unwrap();
    session.active_toggle_column(&orders, "total");
    session.active_toggle_column(&orders, "id");

    assert_eq!(
        session.authoritative_sql(),
        "SELECT orders.id, orders.total FROM orders"
    );
}

#[test]
fn left_join_renders_on_clause() {
    let mut session = compact_session();
    let orders = session
        .active_add_table("orders", Position::default())
        .unwrap();
    let customers = session
        .active_add_table("customers", Position::new(240.0, 0.0))
        .unwrap();
    session.active_toggle_column(&orders, "id");
    session.active_add_join(&orders, "customer_id", &customers, "id", JoinKind::Left);

    assert_eq!(
        session.authoritative_sql(),
        "SELECT orders.id FROM orders LEFT JOIN customers ON orders.customer_id = customers.id"
    );
}

#[test]
fn numeric_and_placeholder_filters_stay_unquoted() {
    let mut session = compact_session();
    let products = session
        .active_add_table("products", Position::default())
        .unwrap();
    session.active_toggle_column(&products, "name");
    session.active_add_filter("products.price", FilterOperator::Gt, "50");
    session.active_add_filter("products.name", FilterOperator::Eq, "{{product}}");
    session.active_set_limit(Some(Limit::Placeholder("{{max_rows}}".into())));

    assert_eq!(
        session.authoritative_sql(),
        "SELECT products.name FROM products WHERE products.price > 50 \
         AND products.name = {{product}} LIMIT {{max_rows}}"
    );
    assert_eq!(session.placeholders(), vec!["product", "max_rows"]);
}

#[test]
fn cte_referenced_at_top_level() {
    let mut session = BuilderSession::new(EngineConfig::default(), shop());
    let cte = session.add_cte("recent", Geometry::default());

    assert!(session.set_active(ActiveContext::Cte(cte.clone())));
    let orders = session
        .active_add_table("orders", Position::default())
        .unwrap();
    session.active_toggle_column(&orders, "id");
    session.active_toggle_column(&orders, "customer_id");
    session.active_add_filter("orders.created_at", FilterOperator::Gt, "{{since}}");

    assert!(session.set_active(ActiveContext::Root));
    let recent = session
        .active_add_cte_reference(&cte, Position::default())
        .unwrap();
    session.active_toggle_column(&recent, "customer_id");
    session.active_add_order_by("recent.customer_id", SortDirection::Desc);

    assert_snapshot!(session.authoritative_sql(), @r"
    WITH recent AS (
      SELECT orders.id, orders.customer_id
      FROM orders
      WHERE orders.created_at > {{since}}
    )
    SELECT recent.customer_id
    FROM recent
    ORDER BY recent.customer_id DESC
    ");
}

#[test]
fn empty_states_render_placeholder_comments() {
    let mut session = compact_session();
    assert_eq!(session.authoritative_sql(), "/* no tables selected */");

    session.active_add_table("orders", Position::default());
    assert_eq!(
        session.authoritative_sql(),
        "SELECT /* no columns selected */ * FROM orders"
    );
}

#[test]
fn removing_a_table_cascades() {
    let mut session = compact_session();
    let orders = session
        .active_add_table("orders", Position::default())
        .unwrap();
    let customers = session
        .active_add_table("customers", Position::default())
        .unwrap();
    session.active_add_join(&orders, "customer_id", &customers, "id", JoinKind::Inner);
    session.active_add_filter("customers.country", FilterOperator::Eq, "NL");
    session.active_add_order_by("customers.name", SortDirection::Asc);

    assert!(session.active_remove_table(&customers));
    let root = &session.model().root;
    assert!(root.joins.is_empty());
    assert!(root.filters.is_empty());
    assert!(root.order_by.is_empty());
    assert_eq!(
        session.authoritative_sql(),
        "SELECT /* no columns selected */ * FROM orders"
    );
}

// ============================================================================
// SQL to canvas
// ============================================================================

#[test]
fn typed_query_builds_canvas() {
    let mut session = compact_session();
    let outcome = session.apply_text(
        "select c.country, count(o.id) as orders
         from orders o
         join customers c on o.customer_id = c.id
         where o.total >= 100 or c.country = 'NL'
         group by c.country
         having count(o.id) > 3
         order by orders desc
         limit 20",
    );
    assert_eq!(outcome, TextOutcome::Replaced);
    assert!(!session.is_override());

    let root = &session.model().root;
    assert_eq!(root.tables.len(), 2);
    assert_eq!(root.filters.len(), 2);
    assert_eq!(root.group_by[0].column, "customers.country");
    assert_eq!(root.having[0].value, "3");
    assert_eq!(root.limit, Some(Limit::Count(20)));

    // The typed text stays in the editor; canvas SQL is canonical.
    assert!(session.editor_text().starts_with("select c.country"));
    assert_eq!(
        session.generated_sql(),
        "SELECT customers.country, COUNT(orders.id) AS orders \
         FROM orders INNER JOIN customers ON orders.customer_id = customers.id \
         WHERE orders.total >= 100 OR customers.country = 'NL' \
         GROUP BY customers.country HAVING COUNT(orders.id) > 3 \
         ORDER BY orders DESC LIMIT 20"
    );
}

#[test]
fn unsupported_text_is_kept_until_canvas_edit() {
    let mut session = compact_session();
    session.apply_text("SELECT orders.id FROM orders");
    let model = session.snapshot();

    let text = "SELECT orders.id FROM orders UNION SELECT customers.id FROM customers";
    let outcome = session.apply_text(text);
    assert!(matches!(outcome, TextOutcome::Override { .. }));
    assert_eq!(session.authoritative_sql(), text);
    assert_eq!(session.model(), &model);

    let orders = session.model().root.tables[0].id.clone();
    session.active_toggle_column(&orders, "total");
    assert!(!session.is_override());
    assert_eq!(
        session.authoritative_sql(),
        "SELECT orders.id, orders.total FROM orders"
    );
}

#[test]
fn where_subquery_round_trips_through_text() {
    let mut session = compact_session();
    let customers = session
        .active_add_table("customers", Position::default())
        .unwrap();
    session.active_toggle_column(&customers, "name");
    let filter = session
        .active_add_filter("customers.id", FilterOperator::In, "")
        .unwrap();
    let sub = session
        .active_add_subquery(SubqueryRole::Where, Some(&filter), Geometry::default())
        .unwrap();

    assert!(session.set_active(ActiveContext::Subquery(sub.clone())));
    let outcome = session.apply_text("SELECT orders.customer_id FROM orders WHERE orders.total > 100");
    assert_eq!(outcome, TextOutcome::Replaced);

    assert_eq!(
        session.generated_sql(),
        "SELECT customers.name FROM customers WHERE customers.id IN \
         (SELECT orders.customer_id FROM orders WHERE orders.total > 100)"
    );
    // The subquery kept its identity, so the active pointer is still valid.
    assert_eq!(session.active(), &ActiveContext::Subquery(sub));
}

#[test]
fn empty_where_subquery_text_reads_back_unchanged() {
    let mut session = compact_session();
    let orders = session
        .active_add_table("orders", Position::default())
        .unwrap();
    session.active_toggle_column(&orders, "id");
    let filter = session
        .active_add_filter("orders.customer_id", FilterOperator::In, "")
        .unwrap();
    session
        .active_add_subquery(SubqueryRole::Where, Some(&filter), Geometry::default())
        .unwrap();

    let generated = session.generated_sql();
    assert_eq!(
        generated,
        "SELECT orders.id FROM orders WHERE orders.customer_id IN (SELECT NULL)"
    );
    let before = session.snapshot();
    assert_eq!(session.apply_text(&generated), TextOutcome::Unchanged);
    assert!(!session.is_override());
    assert_eq!(session.model(), &before);
}

#[test]
fn and_joined_on_condition_round_trips() {
    let mut session = compact_session();
    let text = "SELECT o.id FROM orders o \
                LEFT JOIN customers c ON o.customer_id = c.id AND o.created_at = c.created_at";
    assert_eq!(session.apply_text(text), TextOutcome::Replaced);

    let joins = &session.model().root.joins;
    assert_eq!(joins.len(), 2);
    assert!(joins.iter().all(|j| j.kind == JoinKind::Left));

    let generated = session.generated_sql();
    assert_eq!(
        generated,
        "SELECT orders.id FROM orders LEFT JOIN customers \
         ON orders.customer_id = customers.id AND orders.created_at = customers.created_at"
    );
    assert_eq!(session.apply_text(&generated), TextOutcome::Unchanged);
}

// ============================================================================
// Challenges
// ============================================================================

#[test]
fn challenge_completes_as_query_grows() {
    let challenge = Challenge::from_toml_str(
        r#"
        id = "big-orders"
        title = "Big orders per country"
        hints = ["Join orders to customers", "Group by country"]

        [[criteria]]
        kind = "has_join"
        left = "customers"
        right = "orders"

        [[criteria]]
        kind = "has_group_by"
        column = "country"

        [[criteria]]
        kind = "sql_contains"
        keyword = "count("
        "#,
    )
    .unwrap();

    let mut session = compact_session();
    session.set_challenge(Some(challenge));
    assert_eq!(session.progress().unwrap().satisfied_count(), 0);

    session.apply_text(
        "SELECT customers.country, COUNT(orders.id) FROM orders \
         JOIN customers ON orders.customer_id = customers.id",
    );
    assert_eq!(session.progress().unwrap().satisfied_count(), 2);

    session.active_add_group_by("customers.country");
    let progress = session.progress().unwrap();
    assert!(progress.is_complete(), "{:?}", progress);
}
