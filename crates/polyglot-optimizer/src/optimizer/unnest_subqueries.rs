//! Subquery Unnesting Module
//!
//! Rewrites subqueries in expressions into joins so they are evaluated once
//! instead of once per outer row:
//!
//! - An uncorrelated scalar subquery becomes a CROSS JOIN.
//! - An uncorrelated `IN` subquery becomes a grouped LEFT JOIN plus a
//!   `NOT key IS NULL` filter.
//! - A subquery correlated only through equalities in a plain conjunctive
//!   WHERE becomes a LEFT JOIN grouped on the correlation keys.
//!
//! Generated sources are named `_u_0`, `_u_1`, ...

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::name_sequence;
use crate::scope::{traverse_scope, ScopeId, ScopeTree};
use crate::traversal::{columns_in, contains_aggregate, is_condition_operator, is_function_named};
use std::collections::HashSet;
use tracing::trace;

/// Rewrite subqueries as joins wherever the rewrite is known to be safe.
///
/// ```
/// use polyglot_optimizer::optimizer::unnest_subqueries::unnest_subqueries;
/// use polyglot_optimizer::parser::parse_one;
///
/// let sql = "SELECT * FROM x AS x WHERE x.a IN (SELECT y.a AS a FROM y AS y)";
/// let ast = unnest_subqueries(parse_one(sql).unwrap()).unwrap();
/// assert_eq!(
///     ast.to_sql(),
///     "SELECT * FROM x AS x LEFT JOIN (SELECT y.a AS a FROM y AS y GROUP BY y.a) AS _u_0 \
///      ON x.a = _u_0.a WHERE NOT _u_0.a IS NULL"
/// );
/// ```
pub fn unnest_subqueries(mut ast: Ast) -> Result<Ast> {
    let mut next_alias = name_sequence("_u_");
    while unnest_next(&mut ast, &mut next_alias)? {}
    Ok(ast)
}

/// Rewrite the first subquery, innermost first, that can be turned into a
/// join. Scopes are rebuilt on every call since a rewrite adds join sources
/// to the enclosing select. Returns whether the tree changed.
fn unnest_next(ast: &mut Ast, next_alias: &mut impl FnMut() -> String) -> Result<bool> {
    let tree = traverse_scope(ast)?;

    for &scope in tree.order() {
        if !tree.scope(scope).is_subquery() {
            continue;
        }
        let select = tree.expression(scope);
        let Some(parent_select) = ast.parent_select(select) else {
            continue;
        };
        if ast.get(parent_select, ArgKey::From).is_none() {
            continue;
        }

        let before = ast.to_sql();
        let external = tree.external_columns(ast, scope)?;
        if external.is_empty() {
            unnest(ast, select, parent_select, next_alias);
        } else {
            decorrelate(ast, &tree, scope, parent_select, &external, next_alias)?;
        }
        if ast.to_sql() != before {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Nearest ancestor of `id` below `parent_select` matching `pred`
fn ancestor_within(ast: &Ast, id: ExprId, parent_select: ExprId, pred: impl Fn(Kind) -> bool) -> Option<ExprId> {
    ast.ancestors(id)
        .take_while(|a| *a != parent_select)
        .find(|a| pred(ast.kind(*a)))
}

fn enclosing_clause(ast: &Ast, id: ExprId, parent_select: ExprId) -> Option<ExprId> {
    ancestor_within(ast, id, parent_select, |k| {
        matches!(k, Kind::Where | Kind::Having | Kind::Join)
    })
}

/// Whether a reference placed at `id` must be aggregated because the outer
/// query aggregates
fn needs_aggregate(ast: &Ast, id: ExprId, parent_select: ExprId) -> bool {
    match enclosing_clause(ast, id, parent_select) {
        Some(clause) => ast.is(clause, Kind::Having),
        None => {
            ast.get(parent_select, ArgKey::Group).is_some()
                || ast
                    .list(parent_select, ArgKey::Expressions)
                    .iter()
                    .any(|projection| contains_aggregate(ast, *projection))
        }
    }
}

fn not_null(ast: &mut Ast, column: ExprId) -> ExprId {
    let null = builder::null(ast);
    let is_null = builder::binary(ast, Kind::Is, column, null);
    builder::not(ast, is_null)
}

/// Put `replacement` where the subquery predicate `node` was. Inside a
/// join condition the predicate becomes TRUE and the filter moves to WHERE.
fn replace_predicate(ast: &mut Ast, node: ExprId, replacement: ExprId, parent_select: ExprId) {
    let in_join = enclosing_clause(ast, node, parent_select).is_some_and(|c| ast.is(c, Kind::Join));
    if in_join {
        let placeholder = builder::boolean(ast, true);
        ast.replace(node, placeholder);
        builder::add_where(ast, parent_select, replacement);
    } else {
        ast.replace(node, replacement);
    }
}

fn set_group(ast: &mut Ast, select: ExprId, expressions: Vec<ExprId>) {
    if expressions.is_empty() {
        return;
    }
    let group = ast.add(Kind::Group);
    ast.set_list(group, ArgKey::Expressions, expressions);
    ast.set(select, ArgKey::Group, Some(group));
}

fn join_source(
    ast: &mut Ast,
    parent_select: ExprId,
    select: ExprId,
    alias: &str,
    on: Option<ExprId>,
    side: Option<&str>,
) {
    let source = builder::subquery(ast, select, Some(alias));
    let kind = if on.is_none() { Some("CROSS") } else { None };
    let join = builder::join(ast, source, on, side, kind);
    builder::add_join(ast, parent_select, join);
}

fn unnest(ast: &mut Ast, select: ExprId, parent_select: ExprId, next_alias: &mut impl FnMut() -> String) {
    if ast.selects(select).len() != 1 {
        return;
    }
    let Some(predicate) = ancestor_within(ast, select, parent_select, is_condition_operator) else {
        return;
    };

    if !ast.is(predicate, Kind::In) {
        unnest_scalar(ast, select, parent_select, next_alias);
        return;
    }
    if ast.get(predicate, ArgKey::Query) != Some(select)
        || ast.get(select, ArgKey::Limit).is_some()
        || ast.get(select, ArgKey::Offset).is_some()
    {
        return;
    }
    let Some(column) = ast.get(predicate, ArgKey::This) else {
        return;
    };

    let select = if ast.kind(select).is_set_operation() {
        wrap_set_operation(ast, select, next_alias)
    } else {
        select
    };
    let Some(&value) = ast.selects(select).first() else {
        return;
    };
    let value_name = ast.alias_or_name(value);
    if value_name.is_empty() {
        return;
    }
    let value_expr = ast.unalias(value);

    let alias = next_alias();
    let key = builder::column(ast, &value_name, Some(&alias));
    let filter = not_null(ast, key);
    replace_predicate(ast, predicate, filter, parent_select);

    let select = match ast.get(select, ArgKey::Group) {
        Some(group) => {
            let grouped: HashSet<String> = ast
                .list(group, ArgKey::Expressions)
                .iter()
                .map(|e| ast.sql(*e))
                .collect();
            if grouped == HashSet::from([ast.sql(value_expr)]) {
                select
            } else {
                regroup(ast, select, &value_name)
            }
        }
        None => {
            if !contains_aggregate(ast, value_expr) {
                let key = ast.copy(value_expr);
                set_group(ast, select, vec![key]);
            }
            select
        }
    };

    let join_key = builder::column(ast, &value_name, Some(&alias));
    let on = builder::binary(ast, Kind::Eq, column, join_key);
    join_source(ast, parent_select, select, &alias, Some(on), Some("LEFT"));
    trace!(alias = %alias, "unnested IN subquery");
}

fn unnest_scalar(ast: &mut Ast, select: ExprId, parent_select: ExprId, next_alias: &mut impl FnMut() -> String) {
    let Some(subquery) = ast.parent(select).filter(|p| ast.is(*p, Kind::Subquery)) else {
        return;
    };
    let Some(&value) = ast.selects(select).first() else {
        return;
    };
    let name = ast.alias_or_name(value);
    if name.is_empty() {
        return;
    }

    let alias = next_alias();
    let mut column = builder::column(ast, &name, Some(&alias));
    if needs_aggregate(ast, subquery, parent_select) {
        column = builder::func(ast, "MAX", vec![column]);
    }
    ast.replace(subquery, column);
    join_source(ast, parent_select, select, &alias, None, None);
    trace!(alias = %alias, "unnested scalar subquery");
}

/// `IN (a UNION b)` reads from `(SELECT ... FROM (a UNION b) AS _u_n)`
fn wrap_set_operation(ast: &mut Ast, query: ExprId, next_alias: &mut impl FnMut() -> String) -> ExprId {
    let names = ast.named_selects(query);
    let alias = next_alias();
    let holder = builder::null(ast);
    ast.replace(query, holder);
    let source = builder::subquery(ast, query, Some(&alias));
    let projections = names
        .iter()
        .map(|name| builder::column(ast, name, Some(&alias)))
        .collect();
    let select = builder::select_from(ast, projections, source);
    ast.replace(holder, select)
}

/// `SELECT _q.v AS v FROM (<select>) AS _q GROUP BY _q.v`
fn regroup(ast: &mut Ast, select: ExprId, value_name: &str) -> ExprId {
    let holder = builder::null(ast);
    ast.replace(select, holder);
    let source = builder::subquery(ast, select, Some("_q"));
    let column = builder::column(ast, value_name, Some("_q"));
    let projection = builder::alias(ast, column, value_name);
    let outer = builder::select_from(ast, vec![projection], source);
    let key = builder::column(ast, value_name, Some("_q"));
    set_group(ast, outer, vec![key]);
    ast.replace(holder, outer)
}

enum Usage {
    Exists(ExprId),
    In(ExprId),
    Scalar(ExprId),
}

struct Correlation {
    predicate: ExprId,
    key: ExprId,
    outer: ExprId,
}

fn decorrelate(
    ast: &mut Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    parent_select: ExprId,
    external: &[ExprId],
    next_alias: &mut impl FnMut() -> String,
) -> Result<()> {
    let select = tree.expression(scope);
    if !ast.is(select, Kind::Select) || ast.selects(select).len() != 1 {
        return Ok(());
    }
    let blocked = [ArgKey::Group, ArgKey::Having, ArgKey::Limit, ArgKey::Offset]
        .iter()
        .any(|key| ast.get(select, *key).is_some());
    let Some(clause) = ast.get(select, ArgKey::Where) else {
        return Ok(());
    };
    let Some(condition) = ast.get(clause, ArgKey::This) else {
        return Ok(());
    };
    if blocked || ast.find(condition, Kind::Or).is_some() {
        return Ok(());
    }

    // Correlation must be with the directly enclosing query
    let Some(parent_scope) = tree.scope(scope).parent else {
        return Ok(());
    };
    let outer_sources = tree.selected_sources(ast, parent_scope)?;
    if !external
        .iter()
        .all(|c| outer_sources.contains_key(ast.column_table(*c)))
    {
        return Ok(());
    }

    let Some(correlations) = find_correlations(ast, clause, condition, external) else {
        return Ok(());
    };

    let value = ast.selects(select)[0];
    let usage = match ast.parent(select) {
        Some(p) if ast.is(p, Kind::Exists) => Usage::Exists(p),
        Some(p) if ast.is(p, Kind::In) && ast.get(p, ArgKey::Query) == Some(select) => {
            if contains_aggregate(ast, value) {
                return Ok(());
            }
            Usage::In(p)
        }
        Some(p) if ast.is(p, Kind::Subquery) => Usage::Scalar(p),
        _ => return Ok(()),
    };
    let value_name = ast.alias_or_name(value);
    if value_name.is_empty() && !matches!(usage, Usage::Exists(_)) {
        return Ok(());
    }
    let value_expr = ast.unalias(value);
    let value_sql = ast.sql(value_expr);

    let alias = next_alias();
    let mut projections = match usage {
        Usage::Exists(_) => Vec::new(),
        _ => vec![value],
    };
    let mut group = Vec::new();
    let mut on = Vec::new();
    let mut key_aliases: Vec<(String, String)> = Vec::new();
    let mut value_is_key = false;

    for correlation in &correlations {
        let key_sql = ast.sql(correlation.key);
        let existing = key_aliases.iter().find(|(sql, _)| *sql == key_sql).map(|(_, a)| a.clone());
        let key_alias = match existing {
            Some(key_alias) => key_alias,
            None => {
                let key_alias = if !matches!(usage, Usage::Exists(_)) && key_sql == value_sql {
                    value_is_key = true;
                    value_name.clone()
                } else {
                    let key_alias = next_alias();
                    let copy = ast.copy(correlation.key);
                    projections.push(builder::alias(ast, copy, &key_alias));
                    key_alias
                };
                group.push(ast.copy(correlation.key));
                key_aliases.push((key_sql, key_alias.clone()));
                key_alias
            }
        };
        let outer = ast.copy(correlation.outer);
        let inner = builder::column(ast, &key_alias, Some(&alias));
        on.push(builder::binary(ast, Kind::Eq, outer, inner));
    }

    let replacement = match usage {
        Usage::Exists(_) => {
            let Some((_, first)) = key_aliases.first() else {
                return Ok(());
            };
            let first = first.clone();
            let column = builder::column(ast, &first, Some(&alias));
            not_null(ast, column)
        }
        Usage::In(node) => {
            if !value_is_key {
                group.push(ast.copy(value_expr));
            }
            if let Some(operand) = ast.get(node, ArgKey::This) {
                let inner = builder::column(ast, &value_name, Some(&alias));
                on.push(builder::binary(ast, Kind::Eq, operand, inner));
            }
            let column = builder::column(ast, &value_name, Some(&alias));
            not_null(ast, column)
        }
        Usage::Scalar(subquery) => {
            let counts = ast
                .walk(value_expr)
                .into_iter()
                .any(|n| is_function_named(ast, n, "COUNT"));
            if !value_is_key && !contains_aggregate(ast, value_expr) {
                let max = builder::func(ast, "MAX", vec![value_expr]);
                if ast.is(value, Kind::Alias) {
                    ast.set(value, ArgKey::This, Some(max));
                } else {
                    projections[0] = builder::alias(ast, max, &value_name);
                }
            }
            let mut column = builder::column(ast, &value_name, Some(&alias));
            if counts {
                let zero = builder::number(ast, "0");
                column = builder::func(ast, "COALESCE", vec![column, zero]);
            }
            if needs_aggregate(ast, subquery, parent_select) {
                column = builder::func(ast, "MAX", vec![column]);
            }
            column
        }
    };

    // Remove the correlation predicates from the inner WHERE
    let removed: HashSet<ExprId> = correlations.iter().map(|c| c.predicate).collect();
    let remaining: Vec<ExprId> = conjuncts(ast, condition)
        .into_iter()
        .filter(|c| !removed.contains(c))
        .collect();
    match builder::and(ast, remaining) {
        Some(rest) => ast.set(clause, ArgKey::This, Some(rest)),
        None => ast.remove_arg(select, ArgKey::Where),
    }

    ast.set_list(select, ArgKey::Expressions, projections);
    set_group(ast, select, group);

    let node = match usage {
        Usage::Exists(node) | Usage::In(node) | Usage::Scalar(node) => node,
    };
    replace_predicate(ast, node, replacement, parent_select);

    let on = builder::and(ast, on);
    join_source(ast, parent_select, select, &alias, on, Some("LEFT"));
    trace!(alias = %alias, "decorrelated subquery");
    Ok(())
}

fn conjuncts(ast: &Ast, condition: ExprId) -> Vec<ExprId> {
    if ast.is(condition, Kind::And) {
        ast.flatten(condition)
    } else {
        vec![ast.unnest(condition)]
    }
}

/// Equality conjuncts tying inner keys to outer columns, or None when some
/// outer reference is used in any other way
fn find_correlations(
    ast: &Ast,
    clause: ExprId,
    condition: ExprId,
    external: &[ExprId],
) -> Option<Vec<Correlation>> {
    let conjuncts = conjuncts(ast, condition);
    let external: HashSet<ExprId> = external.iter().copied().collect();
    let mut correlations: Vec<Correlation> = Vec::new();

    for &column in &external {
        if !ast.ancestors(column).any(|a| a == clause) {
            return None;
        }
        let predicate = ast
            .ancestors(column)
            .take_while(|a| *a != clause)
            .find(|a| ast.kind(*a).is_predicate())?;
        if !ast.is(predicate, Kind::Eq) || !conjuncts.contains(&predicate) {
            return None;
        }
        if correlations.iter().any(|c| c.predicate == predicate) {
            continue;
        }
        let left = ast.get(predicate, ArgKey::This)?;
        let right = ast.get(predicate, ArgKey::Expression)?;
        let (outer, key) = if ast.walk(left).contains(&column) {
            (left, right)
        } else {
            (right, left)
        };
        let key_is_inner = columns_in(ast, key).iter().all(|c| !external.contains(c));
        let outer_is_outer = columns_in(ast, outer).iter().all(|c| external.contains(c));
        if !key_is_inner || !outer_is_outer || columns_in(ast, key).is_empty() {
            return None;
        }
        correlations.push(Correlation {
            predicate,
            key,
            outer,
        });
    }

    // Keep the conjunct order for deterministic output
    correlations.sort_by_key(|c| conjuncts.iter().position(|p| *p == c.predicate));
    (!correlations.is_empty()).then_some(correlations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn unnest_sql(sql: &str) -> String {
        unnest_subqueries(parse_one(sql).unwrap()).unwrap().to_sql()
    }

    #[test]
    fn test_uncorrelated_in() {
        assert_eq!(
            unnest_sql("SELECT * FROM x AS x WHERE x.a IN (SELECT y.a AS a FROM y AS y)"),
            "SELECT * FROM x AS x LEFT JOIN (SELECT y.a AS a FROM y AS y GROUP BY y.a) AS _u_0 ON x.a = _u_0.a WHERE NOT _u_0.a IS NULL"
        );
    }

    #[test]
    fn test_uncorrelated_in_with_other_grouping() {
        assert_eq!(
            unnest_sql(
                "SELECT * FROM x AS x WHERE x.a IN (SELECT y.a AS a FROM y AS y GROUP BY y.a, y.b)"
            ),
            "SELECT * FROM x AS x LEFT JOIN (SELECT _q.a AS a FROM (SELECT y.a AS a FROM y AS y GROUP BY y.a, y.b) AS _q GROUP BY _q.a) AS _u_0 ON x.a = _u_0.a WHERE NOT _u_0.a IS NULL"
        );
    }

    #[test]
    fn test_uncorrelated_scalar() {
        assert_eq!(
            unnest_sql("SELECT x.a AS a FROM x AS x WHERE x.a = (SELECT MAX(y.a) AS a FROM y AS y)"),
            "SELECT x.a AS a FROM x AS x CROSS JOIN (SELECT MAX(y.a) AS a FROM y AS y) AS _u_0 WHERE x.a = _u_0.a"
        );
    }

    #[test]
    fn test_uncorrelated_scalar_in_having() {
        assert_eq!(
            unnest_sql(
                "SELECT x.a AS a FROM x AS x GROUP BY x.a HAVING SUM(x.b) > (SELECT MAX(y.b) AS b FROM y AS y)"
            ),
            "SELECT x.a AS a FROM x AS x CROSS JOIN (SELECT MAX(y.b) AS b FROM y AS y) AS _u_0 GROUP BY x.a HAVING SUM(x.b) > MAX(_u_0.b)"
        );
    }

    #[test]
    fn test_correlated_exists() {
        assert_eq!(
            unnest_sql(
                "SELECT x.a AS a FROM x AS x WHERE EXISTS(SELECT 1 AS _ FROM y AS y WHERE y.b = x.b)"
            ),
            "SELECT x.a AS a FROM x AS x LEFT JOIN (SELECT y.b AS _u_1 FROM y AS y GROUP BY y.b) AS _u_0 ON x.b = _u_0._u_1 WHERE NOT _u_0._u_1 IS NULL"
        );
    }

    #[test]
    fn test_correlated_in() {
        assert_eq!(
            unnest_sql(
                "SELECT x.a AS a FROM x AS x WHERE x.a IN (SELECT y.a AS a FROM y AS y WHERE y.b = x.b)"
            ),
            "SELECT x.a AS a FROM x AS x LEFT JOIN (SELECT y.a AS a, y.b AS _u_1 FROM y AS y GROUP BY y.b, y.a) AS _u_0 ON x.b = _u_0._u_1 AND x.a = _u_0.a WHERE NOT _u_0.a IS NULL"
        );
    }

    #[test]
    fn test_correlated_count_is_coalesced() {
        assert_eq!(
            unnest_sql(
                "SELECT x.a AS a, (SELECT COUNT(*) AS c FROM y AS y WHERE y.b = x.b) AS c FROM x AS x"
            ),
            "SELECT x.a AS a, COALESCE(_u_0.c, 0) AS c FROM x AS x LEFT JOIN (SELECT COUNT(*) AS c, y.b AS _u_1 FROM y AS y GROUP BY y.b) AS _u_0 ON x.b = _u_0._u_1"
        );
    }

    #[test]
    fn test_correlated_scalar_gets_max() {
        assert_eq!(
            unnest_sql(
                "SELECT x.a AS a FROM x AS x WHERE x.c = (SELECT y.c AS c FROM y AS y WHERE y.b = x.b AND y.d = 1)"
            ),
            "SELECT x.a AS a FROM x AS x LEFT JOIN (SELECT MAX(y.c) AS c, y.b AS _u_1 FROM y AS y WHERE y.d = 1 GROUP BY y.b) AS _u_0 ON x.b = _u_0._u_1 WHERE x.c = _u_0.c"
        );
    }

    #[test]
    fn test_non_equality_correlation_untouched() {
        let sql = "SELECT x.a AS a FROM x AS x WHERE EXISTS(SELECT 1 AS _ FROM y AS y WHERE y.b > x.b)";
        assert_eq!(unnest_sql(sql), sql);
    }

    #[test]
    fn test_disjunctive_correlation_untouched() {
        let sql = "SELECT x.a AS a FROM x AS x WHERE EXISTS(SELECT 1 AS _ FROM y AS y WHERE y.b = x.b OR y.c = 1)";
        assert_eq!(unnest_sql(sql), sql);
    }

    #[test]
    fn test_uncorrelated_exists_untouched() {
        let sql = "SELECT x.a AS a FROM x AS x WHERE EXISTS(SELECT 1 AS _ FROM y AS y)";
        assert_eq!(unnest_sql(sql), sql);
    }

    #[test]
    fn test_nested_in_unnests_both_levels() {
        let sql = unnest_sql(
            "SELECT x.a FROM x AS x WHERE x.b IN (SELECT y.b AS b FROM y AS y WHERE y.c IN (SELECT z.c AS c FROM z AS z WHERE z.b = y.b))",
        );
        assert!(!sql.contains("IN (SELECT"), "subquery left in {}", sql);
        assert!(sql.contains("AS _u_0"), "inner join missing in {}", sql);
        assert!(sql.contains("AS _u_1"), "outer join missing in {}", sql);
        assert!(sql.starts_with("SELECT x.a FROM x AS x LEFT JOIN"), "{}", sql);
    }
}
