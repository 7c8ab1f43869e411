//! Subquery Merging Module
//!
//! Inlines CTEs and derived tables into the query that selects from them:
//!
//! ```sql
//! -- Before:
//! SELECT a FROM (SELECT x.a FROM x) CROSS JOIN y
//! -- After:
//! SELECT x.a FROM x CROSS JOIN y
//! ```
//!
//! A merge happens only when the inner query neither aggregates nor limits
//! its rows, and the outer joins would see the same rows afterwards.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::find_new_name;
use crate::scope::{traverse_scope, ScopeId, ScopeTree, Source};
use crate::traversal::{contains_aggregate, contains_subquery, is_aggregate};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Select args that make an inner query unsafe to inline
const UNMERGEABLE_ARGS: &[ArgKey] = &[
    ArgKey::With,
    ArgKey::Laterals,
    ArgKey::Group,
    ArgKey::Having,
    ArgKey::Limit,
    ArgKey::Offset,
];

/// Merge CTEs and derived tables into their outer queries.
///
/// With `leave_tables_isolated`, a merge that would leave the outer query
/// selecting from more than one source is skipped.
///
/// ```
/// use polyglot_optimizer::optimizer::merge_subqueries::merge_subqueries;
/// use polyglot_optimizer::parser::parse_one;
///
/// let sql = "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x) AS y";
/// let ast = merge_subqueries(parse_one(sql).unwrap(), false).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT x.a AS a FROM x AS x");
/// ```
pub fn merge_subqueries(ast: Ast, leave_tables_isolated: bool) -> Result<Ast> {
    let ast = merge_ctes(ast, leave_tables_isolated)?;
    merge_derived_tables(ast, leave_tables_isolated)
}

/// Inline CTEs as derived tables into every query that reads them, when the
/// merge is safe for each of those queries. The derived tables are merged
/// by [`merge_derived_tables`].
pub fn merge_ctes(mut ast: Ast, leave_tables_isolated: bool) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;

    let mut selections: IndexMap<ScopeId, Vec<(ScopeId, ExprId)>> = IndexMap::new();
    for &outer in tree.order() {
        for (table, source) in tree.selected_sources(&ast, outer)?.values() {
            if let Source::Scope(inner) = source {
                if tree.scope(*inner).is_cte() {
                    selections.entry(*inner).or_default().push((outer, *table));
                }
            }
        }
    }

    for (inner, uses) in selections {
        let body = tree.expression(inner);
        let Some(cte) = ast.parent(body).filter(|p| ast.is(*p, Kind::Cte)) else {
            continue;
        };
        if !ast.alias_column_names(cte).is_empty() {
            continue;
        }
        let mut safe = true;
        for (outer, table) in &uses {
            let Some(from_or_join) = from_or_join(&ast, *table) else {
                safe = false;
                break;
            };
            if !mergeable(&ast, &tree, *outer, inner, leave_tables_isolated, from_or_join)? {
                safe = false;
                break;
            }
        }
        if !safe {
            continue;
        }

        let last = uses.len() - 1;
        for (i, (_, table)) in uses.iter().enumerate() {
            let query = if i == last { body } else { ast.copy(body) };
            let alias = ast.alias_or_name(*table);
            let derived = builder::subquery(&mut ast, query, Some(&alias));
            ast.replace(*table, derived);
        }
        pop_cte(&mut ast, cte);
        trace!(cte = %ast.alias(cte), consumers = uses.len(), "inlined CTE");
    }

    Ok(ast)
}

fn pop_cte(ast: &mut Ast, cte: ExprId) {
    let with = ast.parent(cte);
    ast.detach(cte);
    if let Some(with) = with {
        if ast.list(with, ArgKey::Expressions).is_empty() {
            ast.detach(with);
        }
    }
}

/// Merge derived tables into their outer queries.
pub fn merge_derived_tables(mut ast: Ast, leave_tables_isolated: bool) -> Result<Ast> {
    let mut tree = traverse_scope(&ast)?;

    for outer in tree.order().to_vec() {
        for subquery in tree.derived_tables(&ast, outer) {
            let alias = ast.alias_or_name(subquery);
            let Some(Source::Scope(inner)) = tree.scope(outer).sources.get(&alias).copied() else {
                continue;
            };
            let Some(from_or_join) = from_or_join(&ast, subquery) else {
                continue;
            };
            if !mergeable(&ast, &tree, outer, inner, leave_tables_isolated, from_or_join)? {
                continue;
            }

            rename_inner_sources(&mut ast, &mut tree, outer, inner, &alias)?;
            merge_from(&mut ast, &mut tree, outer, inner, subquery, &alias);
            merge_expressions(&mut ast, &tree, outer, inner, &alias)?;
            merge_joins(&mut ast, &mut tree, outer, inner, from_or_join);
            merge_where(&mut ast, &tree, outer, inner, from_or_join);
            merge_order(&mut ast, &tree, outer, inner)?;
            adopt_child_scopes(&mut tree, outer, inner);
            trace!(alias = %alias, "merged derived table");
        }
    }

    Ok(ast)
}

fn from_or_join(ast: &Ast, source: ExprId) -> Option<ExprId> {
    ast.find_ancestor(source, |k| matches!(k, Kind::From | Kind::Join))
}

fn join_name(ast: &Ast, join: ExprId) -> String {
    ast.get(join, ArgKey::This)
        .map(|source| ast.alias_or_name(source))
        .unwrap_or_default()
}

fn mergeable(
    ast: &Ast,
    tree: &ScopeTree,
    outer: ScopeId,
    inner: ScopeId,
    leave_tables_isolated: bool,
    from_or_join: ExprId,
) -> Result<bool> {
    let outer_select = tree.expression(outer);
    let inner_select = ast.unnest(tree.expression(inner));

    if !ast.is(outer_select, Kind::Select)
        || ast.list(outer_select, ArgKey::Expressions).iter().any(|s| ast.is_star(*s))
        || !ast.is(inner_select, Kind::Select)
        || ast.flag(inner_select, ArgKey::Distinct)
        || UNMERGEABLE_ARGS.iter().any(|key| ast.get(inner_select, *key).is_some())
    {
        return Ok(false);
    }
    let sources_in_from = ast
        .get(inner_select, ArgKey::From)
        .map(|from| ast.list(from, ArgKey::Expressions).len())
        .unwrap_or(0);
    if sources_in_from != 1 {
        return Ok(false);
    }

    let projections = ast.list(inner_select, ArgKey::Expressions);
    if projections.iter().any(|p| {
        ast.is_star(*p)
            || contains_aggregate(ast, *p)
            || contains_subquery(ast, *p)
            || ast.kind(*p).is_query()
    }) {
        return Ok(false);
    }

    if leave_tables_isolated && tree.selected_sources(ast, outer)?.len() > 1 {
        return Ok(false);
    }

    let inner_where = ast.get(inner_select, ArgKey::Where).is_some();
    let outer_joins = ast.list(outer_select, ArgKey::Joins);
    if inner_where {
        if ast.is(from_or_join, Kind::Join) && ast.text(from_or_join, ArgKey::Side).is_some() {
            return Ok(false);
        }
        if ast.is(from_or_join, Kind::From)
            && outer_joins
                .iter()
                .any(|j| matches!(ast.text(*j, ArgKey::Side), Some("FULL" | "RIGHT")))
        {
            return Ok(false);
        }
    }

    if ast.get(inner_select, ArgKey::Order).is_some() && tree.scope(outer).is_union() {
        return Ok(false);
    }

    // Every outer reference must name an inner projection
    let alias = source_alias(ast, from_or_join);
    let names: HashSet<String> = projections.iter().map(|p| ast.alias_or_name(*p)).collect();
    let outer_columns = tree.columns(ast, outer)?;
    if outer_columns
        .iter()
        .any(|c| ast.column_table(*c) == alias && !names.contains(ast.name(*c)))
    {
        return Ok(false);
    }

    Ok(!joins_on_inner_join(ast, inner_select, from_or_join)
        && !window_in_unmergeable_operation(ast, inner_select, &alias, &outer_columns)
        && !is_recursive(ast, outer_select, inner_select))
}

/// Alias of the source held by a FROM or JOIN
fn source_alias(ast: &Ast, from_or_join: ExprId) -> String {
    if ast.is(from_or_join, Kind::Join) {
        join_name(ast, from_or_join)
    } else {
        ast.list(from_or_join, ArgKey::Expressions)
            .first()
            .map(|s| ast.alias_or_name(*s))
            .unwrap_or_default()
    }
}

/// Inner columns used in the outer ON must all come from the inner FROM
/// table, e.g. `JOIN (SELECT z.a AS a FROM y JOIN z) AS q ON x.a = q.a`
/// cannot be merged
fn joins_on_inner_join(ast: &Ast, inner_select: ExprId, from_or_join: ExprId) -> bool {
    if !ast.is(from_or_join, Kind::Join) {
        return false;
    }
    let Some(on) = ast.get(from_or_join, ArgKey::On) else {
        return false;
    };
    let alias = join_name(ast, from_or_join);
    let Some(inner_from_table) = ast
        .get(inner_select, ArgKey::From)
        .and_then(|from| ast.list(from, ArgKey::Expressions).first().copied())
        .map(|source| ast.alias_or_name(source))
    else {
        return false;
    };
    let projections: HashMap<String, ExprId> = ast
        .list(inner_select, ArgKey::Expressions)
        .iter()
        .map(|p| (ast.alias_or_name(*p), *p))
        .collect();

    ast.find_all(on, Kind::Column)
        .into_iter()
        .filter(|c| ast.column_table(*c) == alias)
        .filter_map(|c| projections.get(ast.name(c)))
        .flat_map(|p| ast.find_all(*p, Kind::Column))
        .any(|c| ast.column_table(c) != inner_from_table)
}

/// A window output must not be filtered, grouped, ordered, joined on or
/// aggregated by the outer query
fn window_in_unmergeable_operation(
    ast: &Ast,
    inner_select: ExprId,
    alias: &str,
    outer_columns: &[ExprId],
) -> bool {
    let window_aliases: HashSet<String> = ast
        .list(inner_select, ArgKey::Expressions)
        .iter()
        .filter(|s| ast.find(**s, Kind::Window).is_some())
        .map(|s| ast.alias_or_name(*s))
        .collect();
    if window_aliases.is_empty() {
        return false;
    }
    outer_columns.iter().any(|column| {
        ast.column_table(*column) == alias
            && window_aliases.contains(ast.name(*column))
            && ast.ancestors(*column).any(|a| {
                matches!(
                    ast.kind(a),
                    Kind::Where | Kind::Group | Kind::Order | Kind::Join | Kind::Having
                ) || is_aggregate(ast, a)
            })
    })
}

/// The outer query is a branch of the recursive CTE being merged
fn is_recursive(ast: &Ast, outer_select: ExprId, inner_select: ExprId) -> bool {
    let Some(cte) = ast.parent(inner_select).filter(|p| ast.is(*p, Kind::Cte)) else {
        return false;
    };
    ast.ancestors(outer_select).any(|a| a == cte)
}

/// Rename inner sources whose names are already used by the outer query
fn rename_inner_sources(
    ast: &mut Ast,
    tree: &mut ScopeTree,
    outer: ScopeId,
    inner: ScopeId,
    alias: &str,
) -> Result<()> {
    let inner_sources = tree.selected_sources(ast, inner)?;
    let outer_sources = tree.selected_sources(ast, outer)?;
    let mut taken: HashSet<String> = inner_sources
        .keys()
        .chain(outer_sources.keys())
        .cloned()
        .collect();
    let conflicts: Vec<String> = inner_sources
        .keys()
        .filter(|name| outer_sources.contains_key(*name) && name.as_str() != alias)
        .cloned()
        .collect();

    for conflict in conflicts {
        let new_name = find_new_name(&taken, &conflict);
        taken.insert(new_name.clone());
        if let Some((source, _)) = inner_sources.get(&conflict) {
            let new_alias = builder::table_alias(ast, &new_name);
            ast.set(*source, ArgKey::Alias, Some(new_alias));
        }
        for column in tree.source_columns(ast, inner, &conflict)? {
            let table = builder::identifier(ast, &new_name);
            ast.set(column, ArgKey::Table, Some(table));
        }
        tree.scope_mut(inner).rename_source(&conflict, new_name.clone());
        trace!(from = %conflict, to = %new_name, "renamed inner source");
    }
    Ok(())
}

/// Put the inner FROM source where the derived table was
fn merge_from(
    ast: &mut Ast,
    tree: &mut ScopeTree,
    outer: ScopeId,
    inner: ScopeId,
    node_to_replace: ExprId,
    alias: &str,
) {
    let inner_select = tree.expression(inner);
    let Some(new_source) = ast
        .get(inner_select, ArgKey::From)
        .and_then(|from| ast.list(from, ArgKey::Expressions).first().copied())
    else {
        return;
    };
    ast.replace(node_to_replace, new_source);

    let name = ast.alias_or_name(new_source);
    let source = tree.scope(inner).sources.get(&name).copied();
    let outer_scope = tree.scope_mut(outer);
    outer_scope.remove_source(alias);
    if let Some(source) = source {
        outer_scope.add_source(name, source);
    }
}

/// Replace outer references to the derived table with the inner projections
fn merge_expressions(
    ast: &mut Ast,
    tree: &ScopeTree,
    outer: ScopeId,
    inner: ScopeId,
    alias: &str,
) -> Result<()> {
    let mut outer_columns: HashMap<String, Vec<ExprId>> = HashMap::new();
    for column in tree.columns(ast, outer)? {
        if ast.column_table(column) == alias {
            outer_columns
                .entry(ast.name(column).to_string())
                .or_default()
                .push(column);
        }
    }

    let inner_select = tree.expression(inner);
    for projection in ast.list(inner_select, ArgKey::Expressions).to_vec() {
        let name = ast.alias_or_name(projection);
        let Some(columns) = outer_columns.get(&name) else {
            continue;
        };
        let expression = ast.unalias(projection);
        for &column in columns {
            let copy = ast.copy(expression);
            ast.replace(column, copy);
        }
    }
    Ok(())
}

/// Move inner joins into the outer query, right after the merged source
fn merge_joins(ast: &mut Ast, tree: &mut ScopeTree, outer: ScopeId, inner: ScopeId, from_or_join: ExprId) {
    let inner_select = tree.expression(inner);
    let new_joins = ast.list(inner_select, ArgKey::Joins).to_vec();
    if new_joins.is_empty() {
        return;
    }
    for &join in &new_joins {
        let name = join_name(ast, join);
        if let Some(source) = tree.scope(inner).sources.get(&name).copied() {
            tree.scope_mut(outer).add_source(name, source);
        }
    }

    let outer_select = tree.expression(outer);
    let mut joins = ast.list(outer_select, ArgKey::Joins).to_vec();
    let position = joins
        .iter()
        .position(|j| *j == from_or_join)
        .map(|i| i + 1)
        .unwrap_or(0);
    joins.splice(position..position, new_joins);
    ast.set_list(outer_select, ArgKey::Joins, joins);
}

/// Move the inner WHERE into the outer join condition when it only reads
/// tables joined so far, otherwise into the outer WHERE
fn merge_where(ast: &mut Ast, tree: &ScopeTree, outer: ScopeId, inner: ScopeId, from_or_join: ExprId) {
    let inner_select = tree.expression(inner);
    let Some(condition) = ast
        .get(inner_select, ArgKey::Where)
        .and_then(|w| ast.get(w, ArgKey::This))
    else {
        return;
    };
    let outer_select = tree.expression(outer);

    if ast.is(from_or_join, Kind::Join) {
        let mut sources: HashSet<String> = HashSet::new();
        if let Some(from) = ast.get(outer_select, ArgKey::From) {
            sources.insert(source_alias(ast, from));
        }
        for &join in ast.list(outer_select, ArgKey::Joins) {
            sources.insert(join_name(ast, join));
            if join == from_or_join {
                break;
            }
        }
        if ast
            .column_table_names(condition)
            .iter()
            .all(|t| sources.contains(t))
        {
            ast.detach(condition);
            builder::add_join_condition(ast, from_or_join, condition);
            return;
        }
    }

    ast.detach(condition);
    builder::add_where(ast, outer_select, condition);
}

/// Keep the inner ORDER BY only when the outer query is a plain projection
fn merge_order(ast: &mut Ast, tree: &ScopeTree, outer: ScopeId, inner: ScopeId) -> Result<()> {
    let outer_select = tree.expression(outer);
    let busy = [ArgKey::Group, ArgKey::Joins, ArgKey::Where, ArgKey::Order, ArgKey::Having]
        .iter()
        .any(|key| ast.get(outer_select, *key).is_some() || !ast.list(outer_select, *key).is_empty());
    if busy
        || tree.selected_sources(ast, outer)?.len() != 1
        || ast
            .list(outer_select, ArgKey::Expressions)
            .iter()
            .any(|p| contains_aggregate(ast, *p))
    {
        return Ok(());
    }
    let inner_select = tree.expression(inner);
    if let Some(order) = ast.get(inner_select, ArgKey::Order) {
        ast.set(outer_select, ArgKey::Order, Some(order));
    }
    Ok(())
}

/// Scopes nested in the merged query now belong to the outer scope
fn adopt_child_scopes(tree: &mut ScopeTree, outer: ScopeId, inner: ScopeId) {
    let inner_scope = tree.scope(inner);
    let subqueries = inner_scope.subquery_scopes.clone();
    let derived = inner_scope.derived_table_scopes.clone();
    let udtfs = inner_scope.udtf_scopes.clone();
    let tables = inner_scope.table_scopes.clone();

    for child in subqueries.iter().chain(&tables) {
        tree.scope_mut(*child).parent = Some(outer);
    }
    let outer_scope = tree.scope_mut(outer);
    outer_scope.derived_table_scopes.retain(|s| *s != inner);
    outer_scope.table_scopes.retain(|s| *s != inner);
    outer_scope.subquery_scopes.extend(subqueries);
    outer_scope.derived_table_scopes.extend(derived);
    outer_scope.udtf_scopes.extend(udtfs);
    outer_scope.table_scopes.extend(tables);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn merge(sql: &str) -> String {
        merge_subqueries(parse_one(sql).unwrap(), false).unwrap().to_sql()
    }

    #[test]
    fn test_merge_derived_table() {
        assert_eq!(
            merge("SELECT x.a AS a FROM (SELECT x.a AS a FROM x AS x) AS x"),
            "SELECT x.a AS a FROM x AS x"
        );
    }

    #[test]
    fn test_merge_cte() {
        assert_eq!(
            merge("WITH y AS (SELECT x.a AS a FROM x AS x) SELECT y.a AS a FROM y AS y"),
            "SELECT x.a AS a FROM x AS x"
        );
    }

    #[test]
    fn test_merge_where() {
        assert_eq!(
            merge("SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x WHERE x.b = 1) AS y WHERE y.a = 2"),
            "SELECT x.a AS a FROM x AS x WHERE x.a = 2 AND x.b = 1"
        );
    }

    #[test]
    fn test_merge_renames_conflicting_source() {
        assert_eq!(
            merge("SELECT x.a AS a, y.b AS b FROM x AS x JOIN (SELECT x.b AS b FROM x AS x) AS y ON x.a = y.b"),
            "SELECT x.a AS a, x_2.b AS b FROM x AS x JOIN x AS x_2 ON x.a = x_2.b"
        );
    }

    #[test]
    fn test_merge_inner_where_into_join() {
        assert_eq!(
            merge("SELECT x.a AS a FROM x AS x JOIN (SELECT y.a AS a FROM y AS y WHERE y.b = 1) AS z ON x.a = z.a"),
            "SELECT x.a AS a FROM x AS x JOIN y AS y ON x.a = y.a AND y.b = 1"
        );
    }

    #[test]
    fn test_merge_inner_joins() {
        assert_eq!(
            merge("SELECT q.a AS a FROM (SELECT y.a AS a FROM y AS y JOIN z AS z ON y.a = z.a) AS q"),
            "SELECT y.a AS a FROM y AS y JOIN z AS z ON y.a = z.a"
        );
    }

    #[test]
    fn test_multi_use_cte_merged_everywhere() {
        assert_eq!(
            merge("WITH y AS (SELECT x.a AS a FROM x AS x) SELECT y.a AS a FROM y AS y JOIN y AS z ON y.a = z.a"),
            "SELECT x.a AS a FROM x AS x JOIN x AS x_2 ON x.a = x_2.a"
        );
    }

    #[test]
    fn test_keep_order_for_plain_outer() {
        assert_eq!(
            merge("SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x ORDER BY x.a) AS y"),
            "SELECT x.a AS a FROM x AS x ORDER BY x.a"
        );
    }

    #[test]
    fn test_no_merge_of_aggregate() {
        let sql = "SELECT y.a AS a FROM (SELECT SUM(x.a) AS a FROM x AS x) AS y";
        assert_eq!(merge(sql), sql);
    }

    #[test]
    fn test_no_merge_of_distinct_or_limit() {
        let sql = "SELECT y.a AS a FROM (SELECT DISTINCT x.a AS a FROM x AS x) AS y";
        assert_eq!(merge(sql), sql);
        let sql = "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x LIMIT 1) AS y";
        assert_eq!(merge(sql), sql);
    }

    #[test]
    fn test_no_merge_of_filtered_outer_join_side() {
        let sql = "SELECT x.a AS a FROM x AS x LEFT JOIN (SELECT y.a AS a FROM y AS y WHERE y.b = 1) AS z ON x.a = z.a";
        assert_eq!(merge(sql), sql);
    }

    #[test]
    fn test_no_merge_when_joining_on_inner_join_table() {
        let sql = "SELECT x.a AS a FROM x AS x JOIN (SELECT z.a AS a FROM y AS y JOIN z AS z ON y.b = z.b) AS q ON x.a = q.a";
        assert_eq!(merge(sql), sql);
    }

    #[test]
    fn test_no_merge_of_filtered_window() {
        let sql = "SELECT y.a AS a FROM (SELECT x.a AS a, ROW_NUMBER() OVER (ORDER BY x.a) AS r FROM x AS x) AS y WHERE y.r = 1";
        assert_eq!(merge(sql), sql);
    }

    #[test]
    fn test_leave_tables_isolated() {
        let sql = "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x) AS y JOIN z AS z ON y.a = z.a";
        let ast = merge_subqueries(parse_one(sql).unwrap(), true).unwrap();
        assert_eq!(ast.to_sql(), sql);
    }

    #[test]
    fn test_multi_use_cte_left_when_unsafe_for_one() {
        let sql = "WITH y AS (SELECT x.a AS a FROM x AS x WHERE x.b = 1) SELECT y.a AS a FROM y AS y LEFT JOIN y AS z ON y.a = z.a";
        assert_eq!(merge(sql), sql);
    }
}
