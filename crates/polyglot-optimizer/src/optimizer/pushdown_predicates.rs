//! Predicate Pushdown Module
//!
//! Pushes WHERE predicates down into derived tables, CTEs and inner JOINs
//! so rows are filtered as early as possible.
//!
//! When a predicate of the outer query only references columns of one
//! nested query, it moves into that query's WHERE (or HAVING when it reads
//! an aggregate) with the outer column references replaced by the inner
//! projection expressions.

use super::normalize::normalized;
use super::simplify::{always_true, simplify_expression};
use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::scope::{traverse_scope, ScopeId, ScopeTree, Source};
use crate::traversal::{columns_in, contains_aggregate, contains_subquery, contains_window};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

type Sources = IndexMap<String, (ExprId, Source)>;

struct Context<'a> {
    tree: &'a ScopeTree,
    ref_count: &'a HashMap<Source, usize>,
    sources: Sources,
    join_index: HashMap<String, usize>,
    from_where: bool,
}

/// Rewrite the tree to push predicates into FROMs and JOINs.
///
/// ```
/// use polyglot_optimizer::optimizer::pushdown_predicates::pushdown_predicates;
/// use polyglot_optimizer::parser::parse_one;
///
/// let sql = "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x) AS y WHERE y.a = 1";
/// let ast = pushdown_predicates(parse_one(sql).unwrap()).unwrap();
/// assert_eq!(
///     ast.to_sql(),
///     "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x WHERE x.a = 1) AS y"
/// );
/// ```
pub fn pushdown_predicates(mut ast: Ast) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;
    let Some(root) = tree.root() else {
        return Ok(ast);
    };
    let ref_count = tree.ref_count(&ast, root)?;
    let mut touched: Vec<(ExprId, ArgKey)> = Vec::new();

    for scope in tree.traverse(root).into_iter().rev() {
        let select = tree.expression(scope);
        if !ast.is(select, Kind::Select) {
            continue;
        }
        let joins = ast.list(select, ArgKey::Joins).to_vec();

        let condition = ast
            .get(select, ArgKey::Where)
            .and_then(|clause| ast.get(clause, ArgKey::This));
        if let (Some(condition), Some(sources)) =
            (condition, where_candidates(&ast, &tree, scope, &joins)?)
        {
            let join_index = joins
                .iter()
                .enumerate()
                .filter_map(|(i, join)| ast.get(*join, ArgKey::This).map(|s| (ast.alias_or_name(s), i)))
                .collect();
            let context = Context {
                tree: &tree,
                ref_count: &ref_count,
                sources,
                join_index,
                from_where: true,
            };
            pushdown(&mut ast, condition, &context);
            touched.push((select, ArgKey::Where));
        }

        // Join conditions only move into the join's own source
        for join in joins {
            if matches!(ast.text(join, ArgKey::Side), Some("RIGHT" | "FULL")) {
                continue;
            }
            let (Some(source), Some(on)) = (ast.get(join, ArgKey::This), ast.get(join, ArgKey::On))
            else {
                continue;
            };
            let name = ast.alias_or_name(source);
            let selected = tree.selected_sources(&ast, scope)?;
            let Some(entry) = selected.get(&name) else {
                continue;
            };
            let context = Context {
                tree: &tree,
                ref_count: &ref_count,
                sources: IndexMap::from([(name, *entry)]),
                join_index: HashMap::new(),
                from_where: false,
            };
            pushdown(&mut ast, on, &context);
            touched.push((join, ArgKey::On));
        }
    }

    for (node, key) in touched {
        let Some(condition) = ast.get(node, key) else {
            continue;
        };
        if key == ArgKey::Where {
            let condition = ast.get(condition, ArgKey::This);
            if let Some(condition) = condition {
                let condition = simplify_expression(&mut ast, condition);
                if always_true(&ast, condition) {
                    ast.remove_arg(node, ArgKey::Where);
                }
            }
        } else {
            simplify_expression(&mut ast, condition);
        }
    }

    Ok(ast)
}

/// Sources a WHERE predicate of the scope may move into. Outer joins make
/// the other side nullable: a FULL join blocks pushdown altogether and a
/// RIGHT join leaves only its own source.
fn where_candidates(
    ast: &Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    joins: &[ExprId],
) -> Result<Option<Sources>> {
    if joins
        .iter()
        .any(|join| ast.text(*join, ArgKey::Side) == Some("FULL"))
    {
        return Ok(None);
    }
    let mut sources = tree.selected_sources(ast, scope)?;
    let right = joins
        .iter()
        .rev()
        .find(|join| ast.text(**join, ArgKey::Side) == Some("RIGHT"))
        .and_then(|join| ast.get(*join, ArgKey::This));
    if let Some(right) = right {
        let name = ast.alias_or_name(right);
        sources.retain(|source, _| *source == name);
    }
    Ok(Some(sources))
}

fn pushdown(ast: &mut Ast, condition: ExprId, context: &Context<'_>) {
    let condition = simplify_expression(ast, condition);
    let cnf_like = normalized(ast, condition, false) || !normalized(ast, condition, true);
    let connector = if cnf_like { Kind::And } else { Kind::Or };
    let predicates = if ast.is(condition, connector) {
        ast.flatten(condition)
    } else {
        vec![condition]
    };

    if cnf_like {
        pushdown_cnf(ast, &predicates, context);
    } else {
        pushdown_dnf(ast, &predicates, context);
    }
}

/// Each conjunct moves on its own and is replaced by TRUE where it was
fn pushdown_cnf(ast: &mut Ast, predicates: &[ExprId], context: &Context<'_>) {
    for &predicate in predicates {
        if contains_subquery(ast, predicate) {
            continue;
        }
        let tables: Vec<String> = sorted_tables(ast, predicate);
        let nodes = nodes_for_tables(ast, &tables, context);

        for (name, node) in nodes {
            if ast.is(node, Kind::Join) {
                let Some(&index) = context.join_index.get(&name) else {
                    continue;
                };
                let joined_before = tables
                    .iter()
                    .filter(|t| **t != name)
                    .all(|t| context.join_index.get(t).map_or(true, |i| *i < index));
                if !joined_before {
                    continue;
                }
                let placeholder = builder::boolean(ast, true);
                ast.replace(predicate, placeholder);
                builder::add_join_condition(ast, node, predicate);
                trace!(source = %name, "pushed predicate into join");
                break;
            }

            if !aliases_cover(ast, node, predicate) {
                continue;
            }
            let inner = replace_aliases(ast, node, predicate);
            let placeholder = builder::boolean(ast, true);
            ast.replace(predicate, placeholder);
            push_into_select(ast, node, inner);
            trace!(source = %name, "pushed predicate into source");
            break;
        }
    }
}

/// A disjunction can only push the part every branch agrees on: for each
/// table referenced in all branches, the OR of each branch's conjuncts on
/// that table alone. The original condition stays in place.
fn pushdown_dnf(ast: &mut Ast, predicates: &[ExprId], context: &Context<'_>) {
    let mut common: Option<BTreeSet<String>> = None;
    for &predicate in predicates {
        let tables: BTreeSet<String> = ast.column_table_names(predicate).into_iter().collect();
        common = Some(match common {
            Some(common) => common.intersection(&tables).cloned().collect(),
            None => tables,
        });
    }

    for table in common.unwrap_or_default() {
        let mut branches: Vec<Vec<ExprId>> = Vec::with_capacity(predicates.len());
        for &predicate in predicates {
            let conjuncts = if ast.is(predicate, Kind::And) {
                ast.flatten(predicate)
            } else {
                vec![predicate]
            };
            let own: Vec<ExprId> = conjuncts
                .into_iter()
                .filter(|c| ast.column_table_names(*c) == [table.as_str()] && !contains_subquery(ast, *c))
                .collect();
            if own.is_empty() {
                break;
            }
            branches.push(own);
        }
        if branches.len() != predicates.len() {
            continue;
        }

        let nodes = nodes_for_tables(ast, std::slice::from_ref(&table), context);
        let Some(&node) = nodes.get(&table) else {
            continue;
        };

        let mut disjuncts = Vec::with_capacity(branches.len());
        for own in branches {
            let copies = own.into_iter().map(|c| ast.copy(c)).collect();
            disjuncts.extend(builder::and(ast, copies));
        }
        let Some(condition) = builder::or(ast, disjuncts) else {
            continue;
        };

        if ast.is(node, Kind::Join) {
            builder::add_join_condition(ast, node, condition);
        } else if aliases_cover(ast, node, condition) {
            let inner = replace_aliases(ast, node, condition);
            push_into_select(ast, node, inner);
        } else {
            continue;
        }
        trace!(source = %table, "pushed disjunction");
    }
}

fn sorted_tables(ast: &Ast, predicate: ExprId) -> Vec<String> {
    let mut tables = ast.column_table_names(predicate);
    tables.sort();
    tables
}

/// Where a predicate on `tables` can go, keyed by table: an inner join's
/// ON clause or the select of a nested query
fn nodes_for_tables(ast: &Ast, tables: &[String], context: &Context<'_>) -> IndexMap<String, ExprId> {
    let mut nodes = IndexMap::new();

    for table in tables {
        let Some(&(node, source)) = context.sources.get(table) else {
            continue;
        };

        let mut target = None;
        if context.from_where {
            let parent = ast.find_ancestor(node, |k| matches!(k, Kind::Join | Kind::From));
            match parent {
                Some(join) if ast.is(join, Kind::Join) => match ast.text(join, ArgKey::Side) {
                    None => target = Some(join),
                    Some("RIGHT") => {}
                    Some(_) => return IndexMap::new(),
                },
                Some(_) => {}
                None => continue,
            }
        }

        let target = match target {
            Some(join) => join,
            None => match source {
                Source::Scope(child) if !context.tree.scope(child).is_udtf() => {
                    if is_recursive_cte(ast, context.tree, child) {
                        return IndexMap::new();
                    }
                    context.tree.expression(child)
                }
                _ => continue,
            },
        };

        if ast.is(target, Kind::Join) {
            nodes.insert(table.clone(), target);
        } else if ast.is(target, Kind::Select)
            && tables.len() == 1
            && accepts_predicates(ast, target, source, context)
        {
            nodes.insert(table.clone(), target);
        }
    }
    nodes
}

/// Grouped, windowed, limited or multiply-referenced queries would change
/// meaning with an extra filter
fn accepts_predicates(ast: &Ast, select: ExprId, source: Source, context: &Context<'_>) -> bool {
    let windowed = ast
        .list(select, ArgKey::Expressions)
        .iter()
        .any(|projection| contains_window(ast, *projection));
    ast.get(select, ArgKey::Group).is_none()
        && ast.get(select, ArgKey::Limit).is_none()
        && ast.get(select, ArgKey::Offset).is_none()
        && !windowed
        && context.ref_count.get(&source).copied().unwrap_or(0) < 2
}

fn is_recursive_cte(ast: &Ast, tree: &ScopeTree, scope: ScopeId) -> bool {
    let scope = tree.scope(scope);
    scope.is_cte()
        && scope.parent.is_some_and(|parent| {
            ast.get(tree.expression(parent), ArgKey::With)
                .is_some_and(|with| ast.flag(with, ArgKey::Recursive))
        })
}

fn push_into_select(ast: &mut Ast, select: ExprId, condition: ExprId) {
    if contains_aggregate(ast, condition) {
        builder::add_condition(ast, select, ArgKey::Having, condition);
    } else {
        builder::add_where(ast, select, condition);
    }
}

fn projection_aliases(ast: &Ast, select: ExprId) -> HashMap<String, ExprId> {
    ast.selects(select)
        .iter()
        .map(|projection| (ast.alias_or_name(*projection), ast.unalias(*projection)))
        .collect()
}

fn aliases_cover(ast: &Ast, select: ExprId, predicate: ExprId) -> bool {
    let aliases = projection_aliases(ast, select);
    columns_in(ast, predicate)
        .iter()
        .all(|column| aliases.contains_key(ast.name(*column)))
}

/// Copy of `predicate` with column references to the projections of
/// `source` replaced by the projected expressions
pub fn replace_aliases(ast: &mut Ast, source: ExprId, predicate: ExprId) -> ExprId {
    let aliases = projection_aliases(ast, source);
    let copy = ast.copy(predicate);
    ast.transform(copy, &mut |ast: &mut Ast, node: ExprId| {
        if !ast.is(node, Kind::Column) {
            return node;
        }
        match aliases.get(ast.name(node)) {
            Some(&target) => ast.copy(target),
            None => node,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn pushdown(sql: &str) -> String {
        pushdown_predicates(parse_one(sql).unwrap()).unwrap().to_sql()
    }

    #[test]
    fn test_pushdown_into_derived_table() {
        assert_eq!(
            pushdown("SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x) AS y WHERE y.a = 1"),
            "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x WHERE x.a = 1) AS y"
        );
    }

    #[test]
    fn test_pushdown_keeps_other_conjuncts() {
        assert_eq!(
            pushdown(
                "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x) AS y WHERE y.a = 1 AND RAND() > 0.5"
            ),
            "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x WHERE x.a = 1) AS y WHERE RAND() > 0.5"
        );
    }

    #[test]
    fn test_pushdown_into_single_use_cte() {
        assert_eq!(
            pushdown("WITH y AS (SELECT x.a AS a FROM x AS x) SELECT y.a AS a FROM y AS y WHERE y.a = 1"),
            "WITH y AS (SELECT x.a AS a FROM x AS x WHERE x.a = 1) SELECT y.a AS a FROM y AS y"
        );
    }

    #[test]
    fn test_multi_use_cte_untouched() {
        let sql = "WITH y AS (SELECT x.a AS a FROM x AS x) SELECT y.a AS a FROM y AS y CROSS JOIN y AS z WHERE y.a = 1";
        assert_eq!(pushdown(sql), sql);
    }

    #[test]
    fn test_pushdown_through_inner_join() {
        assert_eq!(
            pushdown(
                "SELECT x.a AS a FROM x AS x JOIN (SELECT y.a AS a FROM y AS y) AS y ON x.a = y.a WHERE y.a = 1"
            ),
            "SELECT x.a AS a FROM x AS x JOIN (SELECT y.a AS a FROM y AS y WHERE y.a = 1) AS y ON x.a = y.a"
        );
    }

    #[test]
    fn test_left_join_side_not_pushed() {
        let sql = "SELECT x.a AS a FROM x AS x LEFT JOIN (SELECT y.a AS a FROM y AS y) AS y ON x.a = y.a WHERE y.a = 1";
        assert_eq!(pushdown(sql), sql);
    }

    #[test]
    fn test_right_join_restricts_sources() {
        let sql = "SELECT x.a AS a FROM (SELECT x.a AS a FROM x AS x) AS x RIGHT JOIN y AS y ON x.a = y.a WHERE x.a = 1";
        assert_eq!(pushdown(sql), sql);
    }

    #[test]
    fn test_grouped_source_untouched() {
        let sql = "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x GROUP BY x.a) AS y WHERE y.a = 1";
        assert_eq!(pushdown(sql), sql);
    }

    #[test]
    fn test_aggregate_goes_to_having() {
        assert_eq!(
            pushdown("SELECT y.s AS s FROM (SELECT SUM(x.a) AS s FROM x AS x) AS y WHERE y.s > 1"),
            "SELECT y.s AS s FROM (SELECT SUM(x.a) AS s FROM x AS x HAVING SUM(x.a) > 1) AS y"
        );
    }

    #[test]
    fn test_dnf_pushes_common_table() {
        assert_eq!(
            pushdown(
                "SELECT y.a AS a FROM (SELECT x.a AS a, x.b AS b FROM x AS x) AS y WHERE (y.a = 1 AND y.b = 2) OR y.a = 3"
            ),
            "SELECT y.a AS a FROM (SELECT x.a AS a, x.b AS b FROM x AS x WHERE x.a = 1 AND x.b = 2 OR x.a = 3) AS y WHERE y.a = 1 AND y.b = 2 OR y.a = 3"
        );
    }

    #[test]
    fn test_replace_aliases() {
        let mut ast = parse_one("SELECT x.a + 1 AS b FROM x AS x").unwrap();
        let select = ast.root();
        let predicate = crate::parser::Parser::parse_expression_sql("y.b > 2").unwrap();
        let predicate = ast.import(&predicate, predicate.root());
        let replaced = replace_aliases(&mut ast, select, predicate);
        assert_eq!(ast.sql(replaced), "x.a + 1 > 2");
    }
}
