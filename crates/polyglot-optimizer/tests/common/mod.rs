//! Common test utilities for the optimizer integration tests

#![allow(dead_code)]

use once_cell::sync::Lazy;
use polyglot_optimizer::{
    optimize_with_rules, parse_one, MappingSchema, OptimizationRule, OptimizerConfig, Rule,
    DEFAULT_RULES,
};
use serde::Deserialize;
use std::fs;

/// Path to the fixtures directory
const FIXTURES_PATH: &str = "tests/fixtures";

/// Per-rule fixtures from optimizer.json
#[derive(Debug, Deserialize)]
pub struct OptimizerFixtures {
    pub tests: Vec<OptimizerTest>,
}

/// A single optimizer test case
#[derive(Debug, Deserialize)]
pub struct OptimizerTest {
    #[serde(default)]
    pub title: Option<String>,
    /// Rules to run, by name, in order
    pub rules: Vec<String>,
    pub sql: String,
    /// Expected output (None means output should match input)
    #[serde(default)]
    pub expected: Option<String>,
    /// Expected error message, when the rules must fail
    #[serde(default)]
    pub error: Option<String>,
    /// Default database for table qualification
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
}

impl OptimizerTest {
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => format!("{} ({})", title, self.rules.join(", ")),
            None => format!("{} ({})", self.sql, self.rules.join(", ")),
        }
    }
}

/// Lazily load the optimizer fixtures
pub static OPTIMIZER_FIXTURES: Lazy<OptimizerFixtures> = Lazy::new(|| {
    let path = format!("{}/optimizer.json", FIXTURES_PATH);
    let content = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e));
    serde_json::from_str(&content).unwrap_or_else(|e| panic!("Failed to parse {}: {}", path, e))
});

/// Tables x(a, b), y(b, c) and z(b, c), all INT
pub fn schema() -> MappingSchema {
    MappingSchema::new()
        .with_table("x", &[("a", "INT"), ("b", "INT")])
        .unwrap()
        .with_table("y", &[("b", "INT"), ("c", "INT")])
        .unwrap()
        .with_table("z", &[("b", "INT"), ("c", "INT")])
        .unwrap()
}

/// A small TPC-H style schema with mixed column types
pub fn typed_schema() -> MappingSchema {
    MappingSchema::new()
        .with_table(
            "orders",
            &[
                ("o_orderkey", "BIGINT"),
                ("o_custkey", "BIGINT"),
                ("o_totalprice", "DOUBLE"),
                ("o_orderdate", "DATE"),
                ("o_comment", "VARCHAR"),
            ],
        )
        .unwrap()
        .with_table(
            "customer",
            &[
                ("c_custkey", "BIGINT"),
                ("c_name", "VARCHAR"),
                ("c_nationkey", "INT"),
                ("c_acctbal", "DECIMAL"),
            ],
        )
        .unwrap()
        .with_table(
            "lineitem",
            &[
                ("l_orderkey", "BIGINT"),
                ("l_quantity", "SMALLINT"),
                ("l_extendedprice", "DOUBLE"),
                ("l_shipdate", "DATE"),
            ],
        )
        .unwrap()
}

/// Look up a built-in rule by its name
pub fn rule_by_name(name: &str) -> Option<OptimizationRule> {
    DEFAULT_RULES.iter().copied().find(|rule| rule.name() == name)
}

/// Parse `sql`, run the named rules and render the result
pub fn run_rules(
    sql: &str,
    rules: &[String],
    config: &OptimizerConfig<'_>,
) -> Result<String, String> {
    let rules: Vec<OptimizationRule> = rules
        .iter()
        .map(|name| rule_by_name(name).ok_or_else(|| format!("Unknown rule: {}", name)))
        .collect::<Result<_, _>>()?;
    let rules: Vec<&dyn Rule> = rules.iter().map(|rule| rule as &dyn Rule).collect();
    let ast = parse_one(sql).map_err(|e| e.to_string())?;
    optimize_with_rules(ast, config, &rules)
        .map(|ast| ast.to_sql())
        .map_err(|e| e.to_string())
}

/// Result of running one fixture
#[derive(Debug)]
pub enum TestResult {
    Pass,
    Fail { expected: String, actual: String },
}

/// Run a fixture against `schema`
pub fn run_fixture(test: &OptimizerTest, schema: &MappingSchema) -> TestResult {
    let mut config = OptimizerConfig::new().with_schema(schema);
    if let Some(db) = &test.db {
        config = config.with_db(db);
    }
    if let Some(catalog) = &test.catalog {
        config = config.with_catalog(catalog);
    }

    let outcome = run_rules(&test.sql, &test.rules, &config);
    let (expected, actual) = match (&test.error, outcome) {
        (Some(error), Err(actual)) => (error.clone(), actual),
        (Some(error), Ok(actual)) => (error.clone(), actual),
        (None, Ok(actual)) => (
            test.expected.clone().unwrap_or_else(|| test.sql.clone()),
            actual,
        ),
        (None, Err(actual)) => (
            test.expected.clone().unwrap_or_else(|| test.sql.clone()),
            format!("error: {}", actual),
        ),
    };

    if expected == actual {
        TestResult::Pass
    } else {
        TestResult::Fail { expected, actual }
    }
}
