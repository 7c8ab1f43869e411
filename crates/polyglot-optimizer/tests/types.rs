//! Type inference tests through the public API

mod common;

use common::typed_schema;
use polyglot_optimizer::parser::Parser;
use polyglot_optimizer::{annotate_types, coerce, optimize, parse_one, DataType, TypeKind};
use pretty_assertions::assert_eq;

/// Types of the root select's projections after the full pipeline
fn optimized_projection_types(sql: &str) -> Vec<String> {
    let schema = typed_schema();
    let ast = optimize(parse_one(sql).unwrap(), Some(&schema)).unwrap();
    ast.selects(ast.root())
        .iter()
        .map(|p| ast.data_type(*p).unwrap().to_string())
        .collect()
}

#[test]
fn test_null_plus_two() {
    let ast = annotate_types(Parser::parse_expression_sql("NULL + 2").unwrap(), None).unwrap();
    let root = ast.root();
    assert!(ast.data_type(root).unwrap().is(TypeKind::Null));
}

#[test]
fn test_aggregates_over_smallint() {
    assert_eq!(
        optimized_projection_types(
            "SELECT AVG(l_quantity) AS a, SUM(l_quantity) AS s, MAX(l_quantity) AS m FROM lineitem"
        ),
        vec!["DOUBLE", "BIGINT", "SMALLINT"]
    );
}

#[test]
fn test_projection_types_after_optimization() {
    assert_eq!(
        optimized_projection_types(
            "SELECT o_orderdate + INTERVAL '1' DAY AS d, o_totalprice * 2 AS p, UPPER(o_comment) AS c FROM orders"
        ),
        vec!["DATE", "DOUBLE", "VARCHAR"]
    );
}

#[test]
fn test_join_projection_types() {
    assert_eq!(
        optimized_projection_types(
            "SELECT c.c_name, SUM(o.o_totalprice) AS total FROM customer AS c JOIN orders AS o ON c.c_custkey = o.o_custkey GROUP BY c.c_name"
        ),
        vec!["VARCHAR", "DOUBLE"]
    );
}

#[test]
fn test_date_comparison_is_canonicalized() {
    let schema = typed_schema();
    let sql = polyglot_optimizer::optimize_sql(
        "SELECT o_orderkey FROM orders WHERE o_orderdate < '1995-01-01'",
        Some(&schema),
    )
    .unwrap();
    assert_eq!(
        sql,
        "SELECT orders.o_orderkey AS o_orderkey FROM orders AS orders WHERE orders.o_orderdate < CAST('1995-01-01' AS DATE)"
    );
}

#[test]
fn test_coerce_prefers_wider_type() {
    let int = DataType::new(TypeKind::Int);
    let double = DataType::new(TypeKind::Double);
    let text = DataType::new(TypeKind::VarChar);

    assert!(coerce(&int, &double).is(TypeKind::Double));
    assert!(coerce(&double, &int).is(TypeKind::Double));
    assert!(coerce(&DataType::null(), &text).is(TypeKind::VarChar));
    assert!(coerce(&DataType::unknown(), &int).is(TypeKind::Unknown));
}
