use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polyglot_optimizer::{
    optimize, optimize_with_rules, parse_one, traverse_scope, MappingSchema, OptimizationRule,
    OptimizerConfig, Rule,
};

const SIMPLE_SELECT: &str = "SELECT a, b FROM x WHERE a > 1";

const DERIVED_SELECT: &str = r#"
SELECT y.a, y.total
FROM (
    SELECT x.a AS a, SUM(x.b) AS total
    FROM x
    GROUP BY x.a
) AS y
WHERE y.a > 10 AND y.total < 1000
"#;

// TPC-H Q3
const SHIPPING_PRIORITY: &str = r#"
SELECT
    l_orderkey,
    SUM(l_extendedprice * (1 - l_discount)) AS revenue,
    o_orderdate,
    o_shippriority
FROM customer, orders, lineitem
WHERE c_mktsegment = 'BUILDING'
    AND c_custkey = o_custkey
    AND l_orderkey = o_orderkey
    AND o_orderdate < '1995-03-15'
    AND l_shipdate > '1995-03-15'
GROUP BY l_orderkey, o_orderdate, o_shippriority
ORDER BY revenue DESC, o_orderdate
LIMIT 10
"#;

// TPC-H Q4
const ORDER_PRIORITY: &str = r#"
SELECT o_orderpriority, COUNT(*) AS order_count
FROM orders
WHERE o_orderdate >= '1993-07-01'
    AND o_orderdate < '1993-10-01'
    AND EXISTS (
        SELECT *
        FROM lineitem
        WHERE l_orderkey = o_orderkey AND l_commitdate < l_receiptdate
    )
GROUP BY o_orderpriority
ORDER BY o_orderpriority
"#;

fn schema() -> MappingSchema {
    let tables: [(&str, &[(&str, &str)]); 4] = [
        ("x", &[("a", "INT"), ("b", "INT")]),
        (
            "customer",
            &[
                ("c_custkey", "BIGINT"),
                ("c_name", "VARCHAR"),
                ("c_mktsegment", "VARCHAR"),
            ],
        ),
        (
            "orders",
            &[
                ("o_orderkey", "BIGINT"),
                ("o_custkey", "BIGINT"),
                ("o_orderdate", "DATE"),
                ("o_orderpriority", "VARCHAR"),
                ("o_shippriority", "INT"),
            ],
        ),
        (
            "lineitem",
            &[
                ("l_orderkey", "BIGINT"),
                ("l_extendedprice", "DOUBLE"),
                ("l_discount", "DOUBLE"),
                ("l_shipdate", "DATE"),
                ("l_commitdate", "DATE"),
                ("l_receiptdate", "DATE"),
            ],
        ),
    ];
    tables
        .iter()
        .fold(MappingSchema::new(), |schema, (name, columns)| {
            schema
                .with_table(name, columns)
                .expect("benchmark schema is valid")
        })
}

fn bench_optimize_by_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    let schema = schema();
    let config = OptimizerConfig::new().with_schema(&schema);

    let queries = [
        ("simple", SIMPLE_SELECT),
        ("derived", DERIVED_SELECT),
        ("tpch_q3", SHIPPING_PRIORITY),
        ("tpch_q4", ORDER_PRIORITY),
    ];

    for (name, sql) in queries {
        let ast = parse_one(sql).expect("benchmark query parses");
        group.bench_with_input(BenchmarkId::new("default_rules", name), &ast, |b, ast| {
            b.iter(|| optimize(black_box(ast.clone()), Some(&schema)))
        });
        group.bench_with_input(BenchmarkId::new("qualify", name), &ast, |b, ast| {
            let rules: [&dyn Rule; 2] = [
                &OptimizationRule::QualifyTables,
                &OptimizationRule::QualifyColumns,
            ];
            b.iter(|| optimize_with_rules(black_box(ast.clone()), &config, &rules))
        });
    }

    group.finish();
}

fn bench_scope_traversal(c: &mut Criterion) {
    let ast = parse_one(ORDER_PRIORITY).expect("benchmark query parses");
    c.bench_function("traverse_scope", |b| {
        b.iter(|| traverse_scope(black_box(&ast)))
    });
}

criterion_group!(benches, bench_optimize_by_query, bench_scope_traversal);
criterion_main!(benches);
