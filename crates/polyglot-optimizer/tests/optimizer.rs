//! Optimizer Tests
//!
//! Runs the per-rule fixtures from optimizer.json, then the whole pipeline
//! over a few complete queries.

mod common;

use common::{run_fixture, schema, typed_schema, TestResult, OPTIMIZER_FIXTURES};
use polyglot_optimizer::{
    optimize, optimize_sql, optimize_with_rules, parse_one, ArgKey, OptimizationRule,
    OptimizerConfig, Rule,
};
use pretty_assertions::assert_eq;

#[test]
fn test_optimizer_fixtures() {
    let schema = schema();
    let mut failures = Vec::new();

    for test in &OPTIMIZER_FIXTURES.tests {
        if let TestResult::Fail { expected, actual } = run_fixture(test, &schema) {
            failures.push(format!(
                "{}\n  expected: {}\n  actual:   {}",
                test.label(),
                expected,
                actual
            ));
        }
    }

    assert!(
        failures.is_empty(),
        "{} of {} fixtures failed:\n{}",
        failures.len(),
        OPTIMIZER_FIXTURES.tests.len(),
        failures.join("\n")
    );
}

#[test]
fn test_fixture_rules_exist() {
    for test in &OPTIMIZER_FIXTURES.tests {
        for rule in &test.rules {
            assert!(common::rule_by_name(rule).is_some(), "unknown rule {}", rule);
        }
    }
}

#[test]
fn test_pipeline_expands_alias_references() {
    let schema = schema();
    assert_eq!(
        optimize_sql("SELECT a + 1 AS d, d + 1 AS e FROM x", Some(&schema)).unwrap(),
        "SELECT x.a + 1 AS d, x.a + 2 AS e FROM x AS x"
    );
}

#[test]
fn test_pipeline_merges_derived_table() {
    let schema = schema();
    assert_eq!(
        optimize_sql(
            "SELECT y.a FROM (SELECT x.a AS a, x.b AS b FROM x) AS y WHERE y.a > 1",
            Some(&schema)
        )
        .unwrap(),
        "SELECT x.a AS a FROM x AS x WHERE x.a > 1"
    );
}

#[test]
fn test_pipeline_removes_tautology() {
    let schema = schema();
    assert_eq!(
        optimize_sql("SELECT a FROM x WHERE 1 = 1", Some(&schema)).unwrap(),
        "SELECT x.a AS a FROM x AS x"
    );
}

#[test]
fn test_pipeline_is_stable() {
    let schema = schema();
    for sql in [
        "SELECT a FROM x WHERE 1 = 1",
        "SELECT a + 1 AS d, d + 1 AS e FROM x",
    ] {
        let once = optimize_sql(sql, Some(&schema)).unwrap();
        let twice = optimize_sql(&once, Some(&schema)).unwrap();
        assert_eq!(once, twice, "optimizing {} twice", sql);
    }
}

#[test]
fn test_pipeline_without_schema() {
    assert_eq!(optimize_sql("SELECT 1 AS a", None).unwrap(), "SELECT 1 AS a");
}

#[test]
fn test_pipeline_reports_ambiguous_column() {
    let schema = schema();
    let err = optimize_sql("SELECT b FROM x JOIN y ON x.a = y.c", Some(&schema)).unwrap_err();
    assert!(
        err.to_string().contains("Ambiguous columns: b"),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_pipeline_annotates_root_projection() {
    let schema = typed_schema();
    let ast = optimize(
        parse_one("SELECT SUM(l_quantity) AS q FROM lineitem").unwrap(),
        Some(&schema),
    )
    .unwrap();
    let root = ast.root();
    let projection = ast.list(root, ArgKey::Expressions)[0];
    assert_eq!(ast.data_type(projection).unwrap().to_string(), "BIGINT");
}

#[test]
fn test_config_db_reaches_table_qualification() {
    let config = OptimizerConfig::new().with_db("db");
    let rules: [&dyn Rule; 1] = [&OptimizationRule::QualifyTables];
    let ast = optimize_with_rules(parse_one("SELECT 1 FROM z").unwrap(), &config, &rules).unwrap();
    assert_eq!(ast.to_sql(), "SELECT 1 FROM db.z AS z");
}

#[test]
fn test_pipeline_normalizes_disjunction_of_conjunctions() {
    let schema = schema();
    let sql = optimize_sql(
        "SELECT x.a FROM x WHERE (x.a = 1 AND x.b = 2) OR (x.a = 3 AND x.b = 4)",
        Some(&schema),
    )
    .unwrap();
    assert!(sql.starts_with("SELECT x.a AS a FROM x AS x WHERE "), "{}", sql);
    for predicate in ["x.a = 1", "x.b = 2", "x.a = 3", "x.b = 4"] {
        assert!(sql.contains(predicate), "{} lost {}", sql, predicate);
    }
    let condition = &sql["SELECT x.a AS a FROM x AS x WHERE ".len()..];
    assert!(!condition.trim().is_empty() && !condition.starts_with(' '), "{}", sql);
}

#[test]
fn test_pipeline_unnests_nested_in_subqueries() {
    let schema = schema();
    let sql = optimize_sql(
        "SELECT x.a FROM x WHERE x.b IN (SELECT y.b FROM y WHERE y.c IN (SELECT z.c FROM z WHERE z.b = y.b))",
        Some(&schema),
    )
    .unwrap();
    assert!(!sql.contains("IN (SELECT"), "subquery left in {}", sql);
    assert!(sql.contains("_u_0") && sql.contains("_u_1"), "{}", sql);
}

