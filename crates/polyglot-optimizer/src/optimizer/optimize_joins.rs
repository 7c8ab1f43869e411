//! Join Optimization Module
//!
//! This module provides functionality for optimizing JOIN operations:
//! - Moving predicates that reference a cross-joined table into its ON
//! - Reordering joins based on predicate dependencies
//! - Normalizing join syntax (removing unnecessary INNER/OUTER keywords)

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::tsort;
use indexmap::{IndexMap, IndexSet};
use tracing::trace;

/// Optimize joins by removing cross joins and reordering based on dependencies.
///
/// ```
/// use polyglot_optimizer::optimizer::optimize_joins::optimize_joins;
/// use polyglot_optimizer::parser::parse_one;
///
/// let sql = "SELECT * FROM x CROSS JOIN y JOIN z ON x.a = z.a AND y.a = z.a";
/// let ast = optimize_joins(parse_one(sql).unwrap()).unwrap();
/// assert_eq!(
///     ast.to_sql(),
///     "SELECT * FROM x JOIN z ON x.a = z.a AND TRUE JOIN y ON y.a = z.a"
/// );
/// ```
pub fn optimize_joins(mut ast: Ast) -> Result<Ast> {
    let root = ast.root();
    for select in ast.find_all(root, Kind::Select) {
        optimize_cross_joins(&mut ast, select);
    }
    reorder_joins(&mut ast);
    normalize_joins(&mut ast);
    Ok(ast)
}

/// Alias or name of the source a join reads
fn join_name(ast: &Ast, join: ExprId) -> String {
    ast.get(join, ArgKey::This)
        .map(|source| ast.alias_or_name(source))
        .unwrap_or_default()
}

/// Tables referenced in a join's ON, the joined table itself excluded
fn other_table_names(ast: &Ast, join: ExprId) -> IndexSet<String> {
    let Some(on) = ast.get(join, ArgKey::On) else {
        return IndexSet::new();
    };
    let own = join_name(ast, join);
    ast.column_table_names(on)
        .into_iter()
        .filter(|name| *name != own)
        .collect()
}

fn optimize_cross_joins(ast: &mut Ast, select: ExprId) {
    let joins = ast.list(select, ArgKey::Joins).to_vec();
    let mut references: IndexMap<String, Vec<ExprId>> = IndexMap::new();
    let mut cross_joins = Vec::new();

    for &join in &joins {
        let tables = other_table_names(ast, join);
        if tables.is_empty() {
            cross_joins.push((join_name(ast, join), join));
        } else {
            for table in tables {
                references.entry(table).or_default().push(join);
            }
        }
    }

    for (name, cross_join) in cross_joins {
        let Some(dependents) = references.get(&name) else {
            continue;
        };
        for &dependent in dependents {
            let Some(on) = ast.get(dependent, ArgKey::On) else {
                continue;
            };
            let operator = ast.kind(on);
            if !operator.is_connector() || other_table_names(ast, dependent).len() < 2 {
                continue;
            }
            for predicate in ast.flatten(on) {
                if !ast.column_table_names(predicate).contains(&name) {
                    continue;
                }
                let placeholder = builder::boolean(ast, true);
                ast.replace(predicate, placeholder);
                let combined = match ast.get(cross_join, ArgKey::On) {
                    Some(existing) => {
                        ast.detach(existing);
                        builder::binary(ast, operator, existing, predicate)
                    }
                    None => predicate,
                };
                ast.set(cross_join, ArgKey::On, Some(combined));
                ast.remove_arg(cross_join, ArgKey::JoinKind);
                trace!(table = %name, "moved join predicate into cross join");
            }
        }
    }
}

/// Reorder joins by topological sort based on predicate dependencies.
///
/// Only applies to selects whose joins are all inner or cross joins.
pub fn reorder_joins(ast: &mut Ast) {
    let root = ast.root();
    for from in ast.find_all(root, Kind::From) {
        let Some(parent) = ast.parent(from) else {
            continue;
        };
        let joins = ast.list(parent, ArgKey::Joins).to_vec();
        if joins.is_empty() || !is_reorderable(ast, &joins) {
            continue;
        }

        let from_name = ast
            .list(from, ArgKey::Expressions)
            .first()
            .map(|source| ast.alias_or_name(*source))
            .unwrap_or_default();
        let mut joins_by_name: IndexMap<String, ExprId> = IndexMap::new();
        for &join in &joins {
            joins_by_name.insert(join_name(ast, join), join);
        }
        if joins_by_name.len() != joins.len() {
            continue;
        }
        let dag: IndexMap<String, IndexSet<String>> = joins_by_name
            .iter()
            .map(|(name, join)| (name.clone(), other_table_names(ast, *join)))
            .collect();
        let Ok(order) = tsort(&dag) else {
            continue;
        };
        let reordered: Vec<ExprId> = order
            .iter()
            .filter(|name| **name != from_name)
            .filter_map(|name| joins_by_name.get(name).copied())
            .collect();
        if reordered.len() == joins.len() && reordered != joins {
            trace!("reordered joins");
            ast.set_list(parent, ArgKey::Joins, reordered);
        }
    }
}

/// Normalize join syntax by removing unnecessary keywords.
///
/// - Joins without ON, USING, side or kind become CROSS joins
/// - CROSS joins lose their ON
/// - INNER and OUTER kind words are dropped
/// - Remaining joins without ON or USING get ON TRUE
pub fn normalize_joins(ast: &mut Ast) {
    let root = ast.root();
    for join in ast.find_all(root, Kind::Join) {
        let bare = ast.get(join, ArgKey::On).is_none()
            && ast.list(join, ArgKey::Using).is_empty()
            && ast.text(join, ArgKey::Side).is_none()
            && ast.text(join, ArgKey::JoinKind).is_none();
        if bare {
            ast.set_text(join, ArgKey::JoinKind, "CROSS");
        }

        if ast.text(join, ArgKey::JoinKind) == Some("CROSS") {
            ast.set(join, ArgKey::On, None);
        } else {
            ast.remove_arg(join, ArgKey::JoinKind);
            if ast.get(join, ArgKey::On).is_none() && ast.list(join, ArgKey::Using).is_empty() {
                let on = builder::boolean(ast, true);
                ast.set(join, ArgKey::On, Some(on));
            }
        }
    }
}

/// Joins with a side (LEFT, RIGHT, FULL) cannot be reordered.
pub fn is_reorderable(ast: &Ast, joins: &[ExprId]) -> bool {
    joins.iter().all(|join| {
        ast.text(*join, ArgKey::Side).is_none()
            && matches!(ast.text(*join, ArgKey::JoinKind), None | Some("INNER" | "CROSS"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn optimize(sql: &str) -> String {
        optimize_joins(parse_one(sql).unwrap()).unwrap().to_sql()
    }

    #[test]
    fn test_cross_join_gets_predicate() {
        assert_eq!(
            optimize("SELECT * FROM x CROSS JOIN y JOIN z ON x.a = z.a AND y.a = z.a"),
            "SELECT * FROM x JOIN z ON x.a = z.a AND TRUE JOIN y ON y.a = z.a"
        );
    }

    #[test]
    fn test_single_table_predicate_stays() {
        assert_eq!(
            optimize("SELECT * FROM x CROSS JOIN y JOIN z ON y.a = z.a"),
            "SELECT * FROM x CROSS JOIN y JOIN z ON y.a = z.a"
        );
    }

    #[test]
    fn test_reorder_by_dependency() {
        assert_eq!(
            optimize("SELECT * FROM x JOIN y ON y.a = z.a JOIN z ON z.a = x.a"),
            "SELECT * FROM x JOIN z ON z.a = x.a JOIN y ON y.a = z.a"
        );
    }

    #[test]
    fn test_outer_joins_not_reordered() {
        assert_eq!(
            optimize("SELECT * FROM x LEFT JOIN y ON y.a = z.a JOIN z ON z.a = x.a"),
            "SELECT * FROM x LEFT JOIN y ON y.a = z.a JOIN z ON z.a = x.a"
        );
    }

    #[test]
    fn test_normalize_kind_words() {
        assert_eq!(
            optimize("SELECT * FROM x INNER JOIN y ON x.a = y.a LEFT OUTER JOIN z ON x.a = z.a"),
            "SELECT * FROM x JOIN y ON x.a = y.a LEFT JOIN z ON x.a = z.a"
        );
    }

    #[test]
    fn test_bare_join_becomes_cross() {
        assert_eq!(optimize("SELECT * FROM x JOIN y"), "SELECT * FROM x CROSS JOIN y");
        assert_eq!(optimize("SELECT * FROM x LEFT JOIN y"), "SELECT * FROM x LEFT JOIN y ON TRUE");
    }

    #[test]
    fn test_is_reorderable() {
        let ast = parse_one("SELECT * FROM x JOIN y ON x.a = y.a CROSS JOIN z").unwrap();
        let select = ast.root();
        assert!(is_reorderable(&ast, ast.list(select, ArgKey::Joins)));

        let ast = parse_one("SELECT * FROM x RIGHT JOIN y ON x.a = y.a").unwrap();
        let select = ast.root();
        assert!(!is_reorderable(&ast, ast.list(select, ArgKey::Joins)));
    }
}
