//! Property tests: generated SQL reads back into the same query.
//!
//! # Invariants
//!
//! 1. **Round trip**: parsing `generate(M)` yields the structure of `M`
//! 2. **Normal form**: once read back, regenerating and rereading reproduces
//!    the text
//! 3. **Determinism**: generating twice yields identical text
//! 4. **Persistence**: `from_json(to_json(M)) == M`

use proptest::prelude::*;
use seaquel_builder::persist::{from_json, to_json};
use seaquel_builder::reconcile::QueryStructure;
use seaquel_builder::{
    ActiveContext, AggregateFunction, ColumnAggregate, ComparisonOperator, Connector,
    FilterOperator, GeneratorConfig, Geometry, JoinKind, Limit, Position, QueryContext,
    QueryModel, Reconciler, SchemaCatalog, SortDirection, SqlDialect, SqlGenerator, SubqueryRole,
};

// ============================================================================
// Model generation
// ============================================================================

const TABLES: [(&str, [&str; 3]); 3] = [
    ("orders", ["id", "customer_id", "total"]),
    ("customers", ["id", "name", "country"]),
    ("products", ["id", "price", "category"]),
];

fn catalog() -> SchemaCatalog {
    TABLES
        .iter()
        .fold(SchemaCatalog::new(), |catalog, (name, columns)| {
            catalog.with_table(*name, *columns)
        })
}

/// A column of one of the first `count` tables, picked by raw indices.
fn column(count: usize, table: usize, column: usize) -> String {
    let (name, columns) = TABLES[table % count];
    format!("{}.{}", name, columns[column % 3])
}

fn declared(name: &str, columns: &[&str; 3]) -> (String, Vec<String>) {
    (name.to_string(), columns.iter().map(|c| c.to_string()).collect())
}

#[derive(Debug, Clone)]
struct FilterSpec {
    table: usize,
    column: usize,
    operator: FilterOperator,
    value: String,
    connector: Connector,
}

/// Join from table `source` to the table `offset` places after it.
#[derive(Debug, Clone)]
struct JoinSpec {
    source: usize,
    offset: usize,
    source_column: usize,
    target_column: usize,
}

#[derive(Debug, Clone)]
struct AggregateSpec {
    function: AggregateFunction,
    /// `None` aggregates `*`.
    column: Option<(usize, usize)>,
    alias: Option<String>,
}

#[derive(Debug, Clone)]
struct HavingSpec {
    function: AggregateFunction,
    column: Option<(usize, usize)>,
    operator: ComparisonOperator,
    value: String,
    connector: Connector,
}

/// One table with one selected column; `None` leaves the context empty.
type BodySpec = Option<(usize, usize)>;

#[derive(Debug, Clone)]
struct SubquerySpec {
    /// Filter `(table, column, operator)` reading from a WHERE subquery.
    where_in: Option<(usize, usize, FilterOperator, BodySpec)>,
    /// Derived table alias and body.
    derived: Option<(String, BodySpec)>,
    /// Scalar select alias, and whether it counts rows of a table.
    scalar: Option<(Option<String>, Option<usize>)>,
    /// CTE body, and whether the root reads from it.
    cte: Option<((usize, usize), bool)>,
}

#[derive(Debug, Clone)]
struct QuerySpec {
    table_count: usize,
    selections: Vec<[bool; 3]>,
    column_aggregates: Vec<(usize, usize, AggregateFunction, Option<String>)>,
    select_aggregates: Vec<AggregateSpec>,
    join_kind: JoinKind,
    joins: Vec<JoinSpec>,
    filters: Vec<FilterSpec>,
    subqueries: SubquerySpec,
    group_by: Vec<(usize, usize)>,
    having: Vec<HavingSpec>,
    order_by: Vec<(usize, usize, SortDirection)>,
    limit: Option<Limit>,
}

fn arb_join_kind() -> impl Strategy<Value = JoinKind> {
    prop_oneof![
        Just(JoinKind::Inner),
        Just(JoinKind::Left),
        Just(JoinKind::Right),
        Just(JoinKind::Full),
    ]
}

fn arb_function() -> impl Strategy<Value = AggregateFunction> {
    prop_oneof![
        Just(AggregateFunction::Count),
        Just(AggregateFunction::Sum),
        Just(AggregateFunction::Avg),
        Just(AggregateFunction::Min),
        Just(AggregateFunction::Max),
    ]
}

fn arb_comparison() -> impl Strategy<Value = ComparisonOperator> {
    prop_oneof![
        Just(ComparisonOperator::Eq),
        Just(ComparisonOperator::NotEq),
        Just(ComparisonOperator::Lt),
        Just(ComparisonOperator::LtEq),
        Just(ComparisonOperator::Gt),
        Just(ComparisonOperator::GtEq),
    ]
}

fn arb_operator() -> impl Strategy<Value = FilterOperator> {
    prop_oneof![
        Just(FilterOperator::Eq),
        Just(FilterOperator::NotEq),
        Just(FilterOperator::Lt),
        Just(FilterOperator::GtEq),
        Just(FilterOperator::Like),
        Just(FilterOperator::IsNull),
        Just(FilterOperator::IsNotNull),
        Just(FilterOperator::In),
        Just(FilterOperator::NotIn),
        Just(FilterOperator::Between),
        Just(FilterOperator::NotBetween),
    ]
}

fn arb_placeholder() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,6}".prop_map(|name| format!("{{{{{}}}}}", name))
}

fn arb_alias(prefix: &'static str) -> impl Strategy<Value = String> {
    "[a-z]{1,6}".prop_map(move |word| format!("{}_{}", prefix, word))
}

/// Numbers in the spellings people type.
fn arb_number() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..10_000).prop_map(|n| n.to_string()),
        (1u32..1000).prop_map(|n| format!("-{}", n)),
        (1u32..1000).prop_map(|n| format!("+{}", n)),
        (1u32..100).prop_map(|n| format!(".{}", n)),
        (1u32..10, 1u32..20).prop_map(|(m, e)| format!("{}e{}", m, e)),
    ]
}

fn arb_value() -> impl Strategy<Value = String> {
    prop_oneof![arb_number(), "[a-z]{1,8}", arb_placeholder()]
}

fn arb_bound() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..1000).prop_map(|n| n.to_string()),
        (1u32..1000).prop_map(|n| format!("-{}", n)),
        arb_placeholder(),
    ]
}

fn arb_list() -> impl Strategy<Value = String> {
    let item = prop_oneof![
        arb_bound(),
        "[a-z]{1,6}".prop_map(|word| format!("'{}'", word)),
    ];
    prop::collection::vec(item, 1..4).prop_map(|items| items.join(", "))
}

fn arb_range() -> impl Strategy<Value = String> {
    (arb_bound(), arb_bound()).prop_map(|(low, high)| format!("{} AND {}", low, high))
}

fn arb_connector() -> impl Strategy<Value = Connector> {
    prop_oneof![Just(Connector::And), Just(Connector::Or)]
}

fn arb_direction() -> impl Strategy<Value = SortDirection> {
    prop_oneof![Just(SortDirection::Asc), Just(SortDirection::Desc)]
}

fn arb_filter() -> impl Strategy<Value = FilterSpec> {
    (
        0usize..3,
        0usize..3,
        arb_operator(),
        (arb_value(), arb_list(), arb_range()),
        arb_connector(),
    )
        .prop_map(
            |(table, column, operator, (value, list, range), connector)| FilterSpec {
                table,
                column,
                operator,
                value: if operator.is_unary() {
                    String::new()
                } else if operator.is_list() {
                    list
                } else if operator.is_range() {
                    range
                } else {
                    value
                },
                connector,
            },
        )
}

fn arb_join() -> impl Strategy<Value = JoinSpec> {
    (0usize..3, 1usize..3, 0usize..3, 0usize..3).prop_map(
        |(source, offset, source_column, target_column)| JoinSpec {
            source,
            offset,
            source_column,
            target_column,
        },
    )
}

fn arb_select_aggregate() -> impl Strategy<Value = AggregateSpec> {
    (
        arb_function(),
        prop::option::of((0usize..3, 0usize..3)),
        prop::option::of(arb_alias("a")),
    )
        .prop_map(|(function, column, alias)| AggregateSpec {
            // Only COUNT reads `*`.
            function: if column.is_none() {
                AggregateFunction::Count
            } else {
                function
            },
            column,
            alias,
        })
}

fn arb_having() -> impl Strategy<Value = HavingSpec> {
    (
        arb_function(),
        prop::option::of((0usize..3, 0usize..3)),
        arb_comparison(),
        prop_oneof![(0u32..500).prop_map(|n| n.to_string()), arb_placeholder()],
        arb_connector(),
    )
        .prop_map(|(function, column, operator, value, connector)| HavingSpec {
            function: if column.is_none() {
                AggregateFunction::Count
            } else {
                function
            },
            column,
            operator,
            value,
            connector,
        })
}

fn arb_body() -> impl Strategy<Value = BodySpec> {
    prop::option::of((0usize..3, 0usize..3))
}

fn arb_subqueries() -> impl Strategy<Value = SubquerySpec> {
    let where_operator = prop_oneof![
        Just(FilterOperator::In),
        Just(FilterOperator::NotIn),
        Just(FilterOperator::Eq),
    ];
    (
        prop::option::of((0usize..3, 0usize..3, where_operator, arb_body())),
        prop::option::of((arb_alias("d"), arb_body())),
        prop::option::of((prop::option::of(arb_alias("s")), prop::option::of(0usize..3))),
        prop::option::of(((0usize..3, 0usize..3), any::<bool>())),
    )
        .prop_map(|(where_in, derived, scalar, cte)| SubquerySpec {
            where_in,
            derived,
            scalar,
            cte,
        })
}

fn arb_limit() -> impl Strategy<Value = Option<Limit>> {
    prop_oneof![
        Just(None),
        (1u64..1000).prop_map(|n| Some(Limit::Count(n))),
        arb_placeholder().prop_map(|name| Some(Limit::Placeholder(name))),
    ]
}

fn arb_query() -> impl Strategy<Value = QuerySpec> {
    let shape = (
        1usize..=3,
        prop::collection::vec(prop::array::uniform3(any::<bool>()), 3),
        prop::collection::vec(
            (0usize..3, 0usize..3, arb_function(), prop::option::of(arb_alias("a"))),
            0..3,
        ),
        prop::collection::vec(arb_select_aggregate(), 0..3),
        arb_join_kind(),
        prop::collection::vec(arb_join(), 0..5),
    );
    let clauses = (
        prop::collection::vec(arb_filter(), 0..4),
        arb_subqueries(),
        prop::collection::vec((0usize..3, 0usize..3), 0..3),
        prop::collection::vec(arb_having(), 0..3),
        prop::collection::vec((0usize..3, 0usize..3, arb_direction()), 0..3),
        arb_limit(),
    );
    (shape, clauses).prop_map(
        |(
            (table_count, selections, column_aggregates, select_aggregates, join_kind, joins),
            (filters, subqueries, group_by, having, order_by, limit),
        )| QuerySpec {
            table_count,
            selections,
            column_aggregates,
            select_aggregates,
            join_kind,
            joins,
            filters,
            subqueries,
            group_by,
            having,
            order_by,
            limit,
        },
    )
}

/// Fill a nested context from its body; `count_rows` selects `COUNT(*)`
/// instead of the column.
fn fill_body(ctx: &mut QueryContext, body: BodySpec, count_rows: bool) {
    let Some((table, col)) = body else {
        return;
    };
    let (name, columns) = declared(TABLES[table].0, &TABLES[table].1);
    let id = ctx.add_table(name, columns, Position::default());
    if count_rows {
        ctx.add_select_aggregate(AggregateFunction::Count, "*", None);
    } else {
        ctx.select_column(&id, TABLES[table].1[col]);
    }
}

fn aggregate_target(count: usize, column: Option<(usize, usize)>) -> String {
    match column {
        Some((table, col)) => self::column(count, table, col),
        None => "*".to_string(),
    }
}

fn build(spec: &QuerySpec) -> QueryModel {
    let mut model = QueryModel::new();
    let count = spec.table_count;

    let cte = spec.subqueries.cte.map(|((table, col), referenced)| {
        let id = model.add_cte("recent", Geometry::default());
        if let Some(body) = model.context_mut(&ActiveContext::Cte(id.clone())) {
            fill_body(body, Some((table, col)), false);
        }
        (id, TABLES[table].1[col], referenced)
    });

    let ctx = &mut model.root;
    let ids: Vec<_> = TABLES[..count]
        .iter()
        .map(|(name, columns)| {
            let (name, columns) = declared(name, columns);
            ctx.add_table(name, columns, Position::default())
        })
        .collect();

    for (index, selected) in spec.selections.iter().take(count).enumerate() {
        for (column, on) in selected.iter().enumerate() {
            if *on {
                ctx.select_column(&ids[index], TABLES[index].1[column]);
            }
        }
    }
    for (table, col, function, alias) in &spec.column_aggregates {
        let table = table % count;
        ctx.set_column_aggregate(
            &ids[table],
            TABLES[table].1[*col],
            Some(ColumnAggregate {
                function: *function,
                alias: alias.clone(),
            }),
        );
    }
    for aggregate in &spec.select_aggregates {
        ctx.add_select_aggregate(
            aggregate.function,
            aggregate_target(count, aggregate.column),
            aggregate.alias.clone(),
        );
    }

    if count > 1 {
        for join in &spec.joins {
            let source = join.source % count;
            let target = (source + join.offset) % count;
            if source == target {
                continue;
            }
            ctx.add_join(
                &ids[source],
                TABLES[source].1[join.source_column],
                &ids[target],
                TABLES[target].1[join.target_column],
                spec.join_kind,
            );
        }
    }

    for filter in &spec.filters {
        let id = ctx.add_filter(
            column(count, filter.table, filter.column),
            filter.operator,
            filter.value.clone(),
        );
        if let Some(added) = ctx.filters.iter_mut().find(|f| f.id == id) {
            added.connector = filter.connector;
        }
    }

    let subqueries = &spec.subqueries;
    if let Some((table, col, operator, body)) = subqueries.where_in {
        let filter = ctx.add_filter(column(count, table, col), operator, "");
        if let Some(sub) = ctx.add_subquery(SubqueryRole::Where, Some(&filter), Geometry::default())
        {
            if let Some(inner) = ctx.subquery_mut(&sub) {
                fill_body(&mut inner.context, body, false);
            }
        }
    }
    if let Some((alias, body)) = &subqueries.derived {
        if let Some(sub) = ctx.add_subquery(SubqueryRole::From, None, Geometry::default()) {
            ctx.set_subquery_alias(&sub, Some(alias.clone()));
            if let Some(inner) = ctx.subquery_mut(&sub) {
                fill_body(&mut inner.context, *body, false);
            }
        }
    }
    if let Some((alias, table)) = &subqueries.scalar {
        if let Some(sub) = ctx.add_subquery(SubqueryRole::Select, None, Geometry::default()) {
            ctx.set_subquery_alias(&sub, alias.clone());
            if let Some(inner) = ctx.subquery_mut(&sub) {
                fill_body(&mut inner.context, table.map(|t| (t, 0)), true);
            }
        }
    }

    for (table, col) in &spec.group_by {
        ctx.add_group_by(column(count, *table, *col));
    }
    for having in &spec.having {
        let id = ctx.add_having(
            having.function,
            aggregate_target(count, having.column),
            having.operator,
            having.value.clone(),
        );
        if let Some(added) = ctx.having.iter_mut().find(|h| h.id == id) {
            added.connector = having.connector;
        }
    }
    for (table, col, direction) in &spec.order_by {
        ctx.add_order_by(column(count, *table, *col), *direction);
    }
    ctx.set_limit(spec.limit.clone());

    if let Some((cte, output, true)) = cte {
        if let Some(recent) =
            model.add_cte_reference(&ActiveContext::Root, &cte, Position::default())
        {
            model.root.select_column(&recent, output);
        }
    }
    model
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn generated_sql_parses_to_same_structure(spec in arb_query(), pretty in any::<bool>()) {
        let model = build(&spec);
        let generator = SqlGenerator::new(GeneratorConfig { pretty, ..GeneratorConfig::default() });
        let sql = generator.generate(&model);

        let catalog = catalog();
        let reconciler = Reconciler::new(SqlDialect::Generic, &catalog);
        let parsed = reconciler.structure(&sql);
        prop_assert!(parsed.is_ok(), "failed to read back {}: {:?}", sql, parsed);
        prop_assert_eq!(parsed.unwrap(), QueryStructure::of_model(&model), "sql: {}", sql);
    }

    #[test]
    fn read_back_model_regenerates_a_fixpoint(spec in arb_query()) {
        let generator = SqlGenerator::compact();
        let catalog = catalog();
        let reconciler = Reconciler::new(SqlDialect::Generic, &catalog);

        let sql = generator.generate(&build(&spec));
        let once = reconciler.parse_model(&sql);
        prop_assert!(once.is_ok(), "failed to read back {}", sql);
        let normal = generator.generate(&once.unwrap());

        let twice = reconciler.parse_model(&normal);
        prop_assert!(twice.is_ok(), "failed to read back {}", normal);
        prop_assert_eq!(generator.generate(&twice.unwrap()), normal);
    }

    #[test]
    fn generation_is_deterministic(spec in arb_query()) {
        let model = build(&spec);
        let generator = SqlGenerator::default();
        prop_assert_eq!(generator.generate(&model), generator.generate(&model.clone()));
    }

    #[test]
    fn persisted_json_reloads_identically(spec in arb_query()) {
        let model = build(&spec);
        let json = to_json(&model).unwrap();
        prop_assert_eq!(from_json(&json).unwrap(), model);
    }
}

#[test]
fn selection_order_does_not_change_select_order() {
    let mut forward = QueryModel::new();
    let a = forward.root.add_table(
        "orders",
        vec!["id".into(), "customer_id".into(), "total".into()],
        Position::default(),
    );
    forward.root.select_column(&a, "id");
    forward.root.select_column(&a, "total");

    let mut backward = QueryModel::new();
    let b = backward.root.add_table(
        "orders",
        vec!["id".into(), "customer_id".into(), "total".into()],
        Position::default(),
    );
    backward.root.select_column(&b, "total");
    backward.root.select_column(&b, "id");

    let generator = SqlGenerator::compact();
    assert_eq!(generator.generate(&forward), generator.generate(&backward));
}

#[test]
fn arbitrary_join_pairs_read_back_as_written() {
    let mut model = QueryModel::new();
    let ctx = &mut model.root;
    let ids: Vec<_> = TABLES
        .iter()
        .map(|(name, columns)| {
            let (name, columns) = declared(name, columns);
            ctx.add_table(name, columns, Position::default())
        })
        .collect();
    ctx.select_column(&ids[0], "id");
    ctx.add_join(&ids[2], "id", &ids[0], "id", JoinKind::Left);
    ctx.add_join(&ids[1], "id", &ids[2], "price", JoinKind::Left);
    ctx.add_join(&ids[0], "customer_id", &ids[1], "id", JoinKind::Left);

    let sql = SqlGenerator::compact().generate(&model);
    assert_eq!(
        sql,
        "SELECT orders.id FROM orders \
         LEFT JOIN products ON products.id = orders.id \
         LEFT JOIN customers ON customers.id = products.price \
         AND orders.customer_id = customers.id"
    );
    let catalog = catalog();
    let parsed = Reconciler::new(SqlDialect::Generic, &catalog).structure(&sql);
    assert_eq!(parsed.unwrap(), QueryStructure::of_model(&model));
}
