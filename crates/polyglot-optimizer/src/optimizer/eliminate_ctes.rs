//! CTE Elimination Module
//!
//! This module provides functionality for removing unused CTEs
//! from SQL expressions.

use crate::error::Result;
use crate::expressions::{ArgKey, Ast, Kind};
use crate::scope::{build_scope, Source};
use tracing::trace;

/// Remove unused CTEs from an expression.
///
/// Scopes are visited outermost first, so a CTE that was only read by
/// another unused CTE is removed in the same pass.
///
/// ```
/// use polyglot_optimizer::optimizer::eliminate_ctes::eliminate_ctes;
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = parse_one("WITH y AS (SELECT a FROM x) SELECT a FROM z").unwrap();
/// let ast = eliminate_ctes(ast).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT a FROM z");
/// ```
pub fn eliminate_ctes(mut ast: Ast) -> Result<Ast> {
    let (tree, root) = build_scope(&ast)?;
    let mut ref_count = tree.ref_count(&ast, root)?;

    for scope in tree.traverse(root).into_iter().rev() {
        if !tree.scope(scope).is_cte() {
            continue;
        }
        if ref_count.get(&Source::Scope(scope)).copied().unwrap_or(0) > 0 {
            continue;
        }
        let Some(cte) = ast
            .parent(tree.expression(scope))
            .filter(|p| ast.is(*p, Kind::Cte))
        else {
            continue;
        };

        // Sources of the removed CTE lose one reference
        for (_, source) in tree.selected_sources(&ast, scope)?.values() {
            if let Some(count) = ref_count.get_mut(source) {
                *count = count.saturating_sub(1);
            }
        }

        let with = ast.parent(cte);
        ast.detach(cte);
        if let Some(with) = with {
            if ast.list(with, ArgKey::Expressions).is_empty() {
                ast.detach(with);
            }
        }
        trace!(cte = %ast.alias(cte), "eliminated unused CTE");
    }

    Ok(ast)
}

/// Whether a CTE named `name` is selected from anywhere in the tree
pub fn is_cte_referenced(ast: &Ast, name: &str) -> Result<bool> {
    let (tree, root) = build_scope(ast)?;
    let ref_count = tree.ref_count(ast, root)?;
    Ok(tree.traverse(root).into_iter().any(|scope| {
        tree.scope(scope).is_cte()
            && ast
                .parent(tree.expression(scope))
                .is_some_and(|cte| ast.alias(cte) == name)
            && ref_count.get(&Source::Scope(scope)).copied().unwrap_or(0) > 0
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn eliminate(sql: &str) -> String {
        eliminate_ctes(parse_one(sql).unwrap()).unwrap().to_sql()
    }

    #[test]
    fn test_remove_unused_cte() {
        assert_eq!(
            eliminate("WITH y AS (SELECT a FROM x) SELECT a FROM z"),
            "SELECT a FROM z"
        );
    }

    #[test]
    fn test_keep_used_cte() {
        let sql = "WITH y AS (SELECT a FROM x) SELECT a FROM y";
        assert_eq!(eliminate(sql), sql);
    }

    #[test]
    fn test_remove_chain_of_unused_ctes() {
        assert_eq!(
            eliminate("WITH y AS (SELECT a FROM x), z AS (SELECT a FROM y) SELECT a FROM w"),
            "SELECT a FROM w"
        );
    }

    #[test]
    fn test_remove_only_unused_ctes() {
        assert_eq!(
            eliminate("WITH y AS (SELECT a FROM x), z AS (SELECT b FROM x) SELECT a FROM y"),
            "WITH y AS (SELECT a FROM x) SELECT a FROM y"
        );
    }

    #[test]
    fn test_cte_used_in_subquery() {
        let sql = "WITH y AS (SELECT a FROM x) SELECT a FROM z WHERE a IN (SELECT a FROM y)";
        assert_eq!(eliminate(sql), sql);
    }

    #[test]
    fn test_is_cte_referenced() {
        let ast = parse_one("WITH y AS (SELECT a FROM x), z AS (SELECT a FROM x) SELECT a FROM y").unwrap();
        assert!(is_cte_referenced(&ast, "y").unwrap());
        assert!(!is_cte_referenced(&ast, "z").unwrap());
    }
}
