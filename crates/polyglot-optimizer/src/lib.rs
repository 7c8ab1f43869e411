//! Polyglot Optimizer - scope-aware SQL query optimization
//!
//! This library rewrites SQL query trees into equivalent, normalized forms.
//!
//! # Architecture
//!
//! The library follows a pipeline architecture:
//! 1. **Tokenizer / Parser** - Read SQL text into an [`Ast`] arena
//! 2. **Scope** - Build the resolution contexts of every query in the tree
//! 3. **Optimizer** - Run the qualification and rewrite passes in order
//! 4. **Generator** - Render the tree back to canonical SQL
//!
//! Every pass is also available on its own under [`optimizer`].

pub mod builder;
pub mod error;
pub mod expressions;
pub mod generator;
pub mod helper;
pub mod optimizer;
pub mod parser;
pub mod resolver;
pub mod schema;
pub mod scope;
pub mod tokens;
pub mod traversal;

pub use error::{Error, Result};
pub use expressions::{Arg, ArgKey, Ast, DataType, ExprId, Kind, TypeKind};
pub use generator::Generator;
pub use helper::{find_new_name, is_float, is_int, name_sequence, seq_get, tsort, while_changing};
pub use optimizer::{
    annotate_types, coerce, optimize_with_rules, OptimizationRule, OptimizerConfig, Rule,
    TypeAnnotator, TypeCoercionClass, DEFAULT_RULES,
};
pub use parser::Parser;
pub use resolver::{is_column_ambiguous, Resolver};
pub use schema::{ColumnInfo, MappingSchema, Schema, SchemaError};
pub use scope::{
    build_scope, find_all_in_scope, find_in_scope, traverse_scope, walk_in_scope, Scope, ScopeId,
    ScopeTree, ScopeType, Source,
};
pub use tokens::{Token, TokenType, Tokenizer};
pub use traversal::{contains_aggregate, contains_subquery, is_aggregate, BfsIter, DfsIter};

/// Parse a single SQL query into an AST.
///
/// # Example
/// ```
/// let ast = polyglot_optimizer::parse_one("SELECT a FROM x").unwrap();
/// assert_eq!(ast.to_sql(), "SELECT a FROM x");
/// ```
pub fn parse_one(sql: &str) -> Result<Ast> {
    parser::parse_one(sql)
}

/// Generate canonical SQL from an AST.
pub fn generate(ast: &Ast) -> String {
    Generator::new().generate(ast)
}

/// Optimize a query with the default pipeline.
///
/// # Arguments
/// * `ast` - The query to optimize
/// * `schema` - Table columns and types, if known
///
/// # Example
/// ```
/// use polyglot_optimizer::{optimize, parse_one, MappingSchema};
///
/// let schema = MappingSchema::new().with_table("x", &[("a", "INT")]).unwrap();
/// let ast = optimize(parse_one("SELECT a FROM x").unwrap(), Some(&schema)).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT x.a AS a FROM x AS x");
/// ```
pub fn optimize(ast: Ast, schema: Option<&dyn Schema>) -> Result<Ast> {
    let config = OptimizerConfig {
        schema,
        ..OptimizerConfig::default()
    };
    optimizer::optimize(ast, &config)
}

/// Parse, optimize and render a query in one call.
pub fn optimize_sql(sql: &str, schema: Option<&dyn Schema>) -> Result<String> {
    let ast = optimize(parse_one(sql)?, schema)?;
    Ok(generate(&ast))
}
