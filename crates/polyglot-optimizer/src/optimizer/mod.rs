//! SQL Optimizer Module
//!
//! This module contains the optimization passes, one module per pass, and
//! the driver that runs them in order. Every pass takes the tree by value
//! and hands back the rewritten tree.

/// Type annotation and coercion for SQL expressions
pub mod annotate_types;
/// Canonicalization of SQL expressions into standard form
pub mod canonicalize;
/// Elimination of unused Common Table Expressions
pub mod eliminate_ctes;
/// Elimination of unused JOIN operations
pub mod eliminate_joins;
/// Lifting of derived tables into CTEs
pub mod eliminate_subqueries;
/// Comma joins to explicit cross joins
pub mod expand_multi_table_selects;
/// Isolation of table references into subqueries
pub mod isolate_table_selects;
/// Lower-casing of unquoted identifiers
pub mod lower_identities;
/// Merging of derived tables and CTEs into their consumers
pub mod merge_subqueries;
/// Boolean expression normalization (CNF/DNF)
pub mod normalize;
/// JOIN reordering and cross-join optimization
pub mod optimize_joins;
/// Main optimizer entry point and rule orchestration
#[allow(clippy::module_inception)]
pub mod optimizer;
/// Predicate pushdown into subqueries and JOINs
pub mod pushdown_predicates;
/// Projection pushdown to eliminate unused columns
pub mod pushdown_projections;
/// Column qualification and star expansion
pub mod qualify_columns;
/// Table reference qualification with catalog and schema
pub mod qualify_tables;
/// Boolean and algebraic expression simplification
pub mod simplify;
/// Rewriting of subqueries as joins
pub mod unnest_subqueries;

/// Type annotation, type coercion classes, and the type annotator engine
pub use annotate_types::{annotate_types, coerce, TypeAnnotator, TypeCoercionClass};
pub use canonicalize::canonicalize;
/// CTE elimination and reference checking
pub use eliminate_ctes::{eliminate_ctes, is_cte_referenced};
pub use eliminate_joins::{eliminate_joins, join_condition};
pub use eliminate_subqueries::eliminate_subqueries;
pub use expand_multi_table_selects::expand_multi_table_selects;
pub use isolate_table_selects::isolate_table_selects;
pub use lower_identities::lower_identities;
pub use merge_subqueries::{merge_ctes, merge_derived_tables, merge_subqueries};
/// Boolean normalization, distance computation, and related utilities
pub use normalize::{
    normalization_distance, normalize, normalized, NormalizeError, DEFAULT_MAX_DISTANCE,
};
/// JOIN optimization, reordering, normalization, and reorderability checks
pub use optimize_joins::{is_reorderable, normalize_joins, optimize_joins, reorder_joins};
/// Full optimizer pipeline and rule configuration
pub use optimizer::{
    optimize, optimize_with_rules, OptimizationRule, OptimizerConfig, Rule, DEFAULT_RULES,
};
pub use pushdown_predicates::{pushdown_predicates, replace_aliases};
pub use pushdown_projections::{default_selection, pushdown_projections};
/// Column qualification, validation and output handling
pub use qualify_columns::{
    expand_laterals, qualify_columns, qualify_outputs, validate_qualify_columns,
    QualifyColumnsOptions,
};
pub use qualify_tables::{qualify_tables, QualifyTablesOptions};
/// Expression simplification and truthiness checks
pub use simplify::{always_false, always_true, is_false, is_null, is_zero, simplify, Simplifier};
pub use unnest_subqueries::unnest_subqueries;
