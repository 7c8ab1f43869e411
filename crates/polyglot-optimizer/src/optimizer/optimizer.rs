//! Optimizer Orchestration Module
//!
//! This module provides the main entry point for SQL optimization,
//! coordinating multiple optimization passes in the correct order.

use tracing::{debug, debug_span};

use crate::error::Result;
use crate::expressions::Ast;
use crate::schema::{MappingSchema, Schema};

use super::annotate_types::annotate_types;
use super::canonicalize::canonicalize;
use super::eliminate_ctes::eliminate_ctes;
use super::eliminate_joins::eliminate_joins;
use super::eliminate_subqueries::eliminate_subqueries;
use super::expand_multi_table_selects::expand_multi_table_selects;
use super::isolate_table_selects::isolate_table_selects;
use super::lower_identities::lower_identities;
use super::merge_subqueries::merge_subqueries;
use super::normalize::{normalize, DEFAULT_MAX_DISTANCE};
use super::optimize_joins::optimize_joins;
use super::pushdown_predicates::pushdown_predicates;
use super::pushdown_projections::pushdown_projections;
use super::qualify_columns::{qualify_columns, validate_qualify_columns, QualifyColumnsOptions};
use super::qualify_tables::{qualify_tables, QualifyTablesOptions};
use super::simplify::simplify;
use super::unnest_subqueries::unnest_subqueries;

/// Optimizer configuration
#[derive(Clone, Copy)]
pub struct OptimizerConfig<'a> {
    /// Database schema for column resolution and type inference
    pub schema: Option<&'a dyn Schema>,
    /// Default database name
    pub db: Option<&'a str>,
    /// Default catalog name
    pub catalog: Option<&'a str>,
    /// Refuse merges that would put more than one source in a scope
    pub leave_tables_isolated: bool,
    /// Normalize conditions to DNF instead of CNF
    pub dnf: bool,
    /// Distance limit above which normalization is skipped
    pub max_distance: usize,
}

impl Default for OptimizerConfig<'_> {
    fn default() -> Self {
        Self {
            schema: None,
            db: None,
            catalog: None,
            leave_tables_isolated: false,
            dnf: false,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

impl<'a> OptimizerConfig<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: &'a dyn Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_db(mut self, db: &'a str) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_catalog(mut self, catalog: &'a str) -> Self {
        self.catalog = Some(catalog);
        self
    }
}

/// A tree-to-tree rewrite the optimizer can run
pub trait Rule {
    fn name(&self) -> &'static str;

    fn apply(&self, ast: Ast, config: &OptimizerConfig<'_>) -> Result<Ast>;
}

/// Built-in optimization rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizationRule {
    /// Lower-case unquoted identifiers
    LowerIdentities,
    /// Alias every source and fill in default db and catalog
    QualifyTables,
    /// Wrap base tables of multi-source scopes in their own select
    IsolateTableSelects,
    /// Qualify columns and expand stars
    QualifyColumns,
    /// Reject queries with columns that could not be qualified
    ValidateQualifyColumns,
    /// Push projections down to eliminate unused columns early
    PushdownProjections,
    /// Normalize boolean expressions
    Normalize,
    /// Unnest subqueries into joins
    UnnestSubqueries,
    /// Turn comma joins into cross joins
    ExpandMultiTableSelects,
    /// Push predicates down to filter data early
    PushdownPredicates,
    /// Optimize join order and remove cross joins
    OptimizeJoins,
    /// Eliminate derived tables by converting to CTEs
    EliminateSubqueries,
    /// Merge subqueries into outer queries
    MergeSubqueries,
    /// Remove joins that cannot change the result
    EliminateJoins,
    /// Remove unused CTEs
    EliminateCtes,
    /// Simplify expressions
    Simplify,
    /// Annotate expressions with type information
    AnnotateTypes,
    /// Convert expressions to canonical form
    Canonicalize,
}

/// Default optimization rules in order of execution
pub const DEFAULT_RULES: &[OptimizationRule] = &[
    OptimizationRule::LowerIdentities,
    OptimizationRule::QualifyTables,
    OptimizationRule::IsolateTableSelects,
    OptimizationRule::QualifyColumns,
    OptimizationRule::ValidateQualifyColumns,
    OptimizationRule::PushdownProjections,
    OptimizationRule::Normalize,
    OptimizationRule::UnnestSubqueries,
    OptimizationRule::ExpandMultiTableSelects,
    OptimizationRule::PushdownPredicates,
    OptimizationRule::OptimizeJoins,
    OptimizationRule::EliminateSubqueries,
    OptimizationRule::MergeSubqueries,
    OptimizationRule::EliminateJoins,
    OptimizationRule::EliminateCtes,
    OptimizationRule::Simplify,
    OptimizationRule::AnnotateTypes,
    OptimizationRule::Canonicalize,
];

impl Rule for OptimizationRule {
    fn name(&self) -> &'static str {
        match self {
            OptimizationRule::LowerIdentities => "lower_identities",
            OptimizationRule::QualifyTables => "qualify_tables",
            OptimizationRule::IsolateTableSelects => "isolate_table_selects",
            OptimizationRule::QualifyColumns => "qualify_columns",
            OptimizationRule::ValidateQualifyColumns => "validate_qualify_columns",
            OptimizationRule::PushdownProjections => "pushdown_projections",
            OptimizationRule::Normalize => "normalize",
            OptimizationRule::UnnestSubqueries => "unnest_subqueries",
            OptimizationRule::ExpandMultiTableSelects => "expand_multi_table_selects",
            OptimizationRule::PushdownPredicates => "pushdown_predicates",
            OptimizationRule::OptimizeJoins => "optimize_joins",
            OptimizationRule::EliminateSubqueries => "eliminate_subqueries",
            OptimizationRule::MergeSubqueries => "merge_subqueries",
            OptimizationRule::EliminateJoins => "eliminate_joins",
            OptimizationRule::EliminateCtes => "eliminate_ctes",
            OptimizationRule::Simplify => "simplify",
            OptimizationRule::AnnotateTypes => "annotate_types",
            OptimizationRule::Canonicalize => "canonicalize",
        }
    }

    fn apply(&self, ast: Ast, config: &OptimizerConfig<'_>) -> Result<Ast> {
        // Passes that need a schema fall back to an empty one
        let empty = MappingSchema::new();
        let schema: &dyn Schema = match config.schema {
            Some(schema) => schema,
            None => &empty,
        };

        match self {
            OptimizationRule::LowerIdentities => lower_identities(ast),
            OptimizationRule::QualifyTables => {
                let options = QualifyTablesOptions {
                    db: config.db.map(str::to_string),
                    catalog: config.catalog.map(str::to_string),
                };
                qualify_tables(ast, &options)
            }
            OptimizationRule::IsolateTableSelects => isolate_table_selects(ast, schema),
            OptimizationRule::QualifyColumns => {
                qualify_columns(ast, schema, &QualifyColumnsOptions::default())
            }
            OptimizationRule::ValidateQualifyColumns => validate_qualify_columns(ast),
            OptimizationRule::PushdownProjections => pushdown_projections(ast, schema, true),
            OptimizationRule::Normalize => normalize(ast, config.dnf, config.max_distance),
            OptimizationRule::UnnestSubqueries => unnest_subqueries(ast),
            OptimizationRule::ExpandMultiTableSelects => expand_multi_table_selects(ast),
            OptimizationRule::PushdownPredicates => pushdown_predicates(ast),
            OptimizationRule::OptimizeJoins => optimize_joins(ast),
            OptimizationRule::EliminateSubqueries => eliminate_subqueries(ast),
            OptimizationRule::MergeSubqueries => {
                merge_subqueries(ast, config.leave_tables_isolated)
            }
            OptimizationRule::EliminateJoins => eliminate_joins(ast),
            OptimizationRule::EliminateCtes => eliminate_ctes(ast),
            OptimizationRule::Simplify => simplify(ast),
            OptimizationRule::AnnotateTypes => annotate_types(ast, config.schema),
            OptimizationRule::Canonicalize => canonicalize(ast),
        }
    }
}

/// Optimize a query using the default set of rules.
///
/// ```
/// use polyglot_optimizer::optimizer::optimizer::{optimize, OptimizerConfig};
/// use polyglot_optimizer::parser::parse_one;
/// use polyglot_optimizer::schema::MappingSchema;
///
/// let schema = MappingSchema::new().with_table("x", &[("a", "INT"), ("b", "INT")]).unwrap();
/// let config = OptimizerConfig::new().with_schema(&schema);
/// let ast = optimize(parse_one("SELECT a FROM x WHERE 1 = 1").unwrap(), &config).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT x.a AS a FROM x AS x");
/// ```
pub fn optimize(ast: Ast, config: &OptimizerConfig<'_>) -> Result<Ast> {
    let rules: Vec<&dyn Rule> = DEFAULT_RULES.iter().map(|rule| rule as &dyn Rule).collect();
    optimize_with_rules(ast, config, &rules)
}

/// Optimize a query using a custom sequence of rules.
///
/// The first failing rule aborts the pipeline.
pub fn optimize_with_rules(
    mut ast: Ast,
    config: &OptimizerConfig<'_>,
    rules: &[&dyn Rule],
) -> Result<Ast> {
    let span = debug_span!("optimize", rules = rules.len());
    let _enter = span.enter();
    for rule in rules {
        debug!(rule = rule.name(), "applying rule");
        ast = rule.apply(ast, config)?;
    }
    Ok(ast)
}
