//! Join Elimination Module
//!
//! This module removes joins that cannot change the result of a query. A
//! join can be eliminated when no columns from the joined source are
//! referenced outside the ON clause and the join neither filters nor
//! multiplies rows:
//!
//! - a LEFT JOIN whose join keys cover a unique combination of the joined
//!   query's outputs (DISTINCT, GROUP BY or a single row)
//! - a join without condition against a query returning exactly one row

use super::normalize::normalized;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::scope::{traverse_scope, ScopeId, ScopeTree, Source};
use crate::traversal::is_aggregate;
use std::collections::HashSet;
use tracing::trace;

/// Remove unused joins from an expression.
///
/// Scopes with unqualified columns are skipped, since it cannot be told
/// which source such a column belongs to.
///
/// ```
/// use polyglot_optimizer::optimizer::eliminate_joins::eliminate_joins;
/// use polyglot_optimizer::parser::parse_one;
///
/// let sql = "SELECT x.a AS a FROM x AS x LEFT JOIN (SELECT y.b AS b FROM y AS y GROUP BY y.b) AS y ON x.b = y.b";
/// let ast = eliminate_joins(parse_one(sql).unwrap()).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT x.a AS a FROM x AS x");
/// ```
pub fn eliminate_joins(mut ast: Ast) -> Result<Ast> {
    let mut tree = traverse_scope(&ast)?;

    for scope in tree.order().to_vec() {
        if !tree.unqualified_columns(&ast, scope)?.is_empty() {
            continue;
        }
        let select = tree.expression(scope);
        let joins = ast.list(select, ArgKey::Joins).to_vec();

        // Reversed so chains of unused joins go away together
        for join in joins.into_iter().rev() {
            let alias = join_name(&ast, join);
            if should_eliminate_join(&ast, &tree, scope, join, &alias)? {
                ast.detach(join);
                tree.scope_mut(scope).remove_source(&alias);
                trace!(alias = %alias, "eliminated join");
            }
        }
    }

    Ok(ast)
}

fn join_name(ast: &Ast, join: ExprId) -> String {
    ast.get(join, ArgKey::This)
        .map(|source| ast.alias_or_name(source))
        .unwrap_or_default()
}

fn should_eliminate_join(
    ast: &Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    join: ExprId,
    alias: &str,
) -> Result<bool> {
    let Some(Source::Scope(inner)) = tree.scope(scope).sources.get(alias).copied() else {
        return Ok(false);
    };
    if join_is_used(ast, tree, scope, join, alias)? {
        return Ok(false);
    }
    let left_join_on_unique = ast.text(join, ArgKey::Side) == Some("LEFT")
        && is_joined_on_all_unique_outputs(ast, tree, inner, join);
    let unconditioned_single_row = ast.get(join, ArgKey::On).is_none()
        && ast.list(join, ArgKey::Using).is_empty()
        && has_single_output_row(ast, tree.expression(inner));
    Ok(left_join_on_unique || unconditioned_single_row)
}

/// Whether the joined source is read anywhere but its own ON clause
fn join_is_used(ast: &Ast, tree: &ScopeTree, scope: ScopeId, join: ExprId, alias: &str) -> Result<bool> {
    let on_columns: HashSet<ExprId> = ast
        .get(join, ArgKey::On)
        .map(|on| ast.find_all(on, Kind::Column).into_iter().collect())
        .unwrap_or_default();
    Ok(tree
        .source_columns(ast, scope, alias)?
        .iter()
        .any(|column| !on_columns.contains(column)))
}

fn is_joined_on_all_unique_outputs(ast: &Ast, tree: &ScopeTree, inner: ScopeId, join: ExprId) -> bool {
    let unique_outputs = unique_outputs(ast, tree.expression(inner));
    if unique_outputs.is_empty() {
        return false;
    }
    let (_, join_keys) = join_condition(ast, join);
    let keyed: HashSet<String> = join_keys
        .iter()
        .filter(|key| ast.is(**key, Kind::Column))
        .map(|key| ast.name(*key).to_string())
        .collect();
    unique_outputs.iter().all(|output| keyed.contains(output))
}

/// Output columns of a query that hold a unique combination per row
fn unique_outputs(ast: &Ast, select: ExprId) -> HashSet<String> {
    if !ast.is(select, Kind::Select) {
        return HashSet::new();
    }
    if ast.flag(select, ArgKey::Distinct) {
        return ast.named_selects(select).into_iter().collect();
    }
    if let Some(group) = ast.get(select, ArgKey::Group) {
        let grouped: Vec<String> = ast
            .list(group, ArgKey::Expressions)
            .iter()
            .map(|e| ast.sql(*e))
            .collect();
        let mut grouped_outputs = HashSet::new();
        let mut unique = HashSet::new();
        for &projection in ast.selects(select) {
            let output = ast.sql(ast.unalias(projection));
            if grouped.contains(&output) {
                grouped_outputs.insert(output);
                unique.insert(ast.alias_or_name(projection));
            }
        }
        // Every grouped expression must be an output
        return if grouped.iter().all(|g| grouped_outputs.contains(g)) {
            unique
        } else {
            HashSet::new()
        };
    }
    if has_single_output_row(ast, select) {
        return ast.named_selects(select).into_iter().collect();
    }
    HashSet::new()
}

fn has_single_output_row(ast: &Ast, select: ExprId) -> bool {
    if !ast.is(select, Kind::Select) {
        return false;
    }
    let all_aggregates = ast
        .selects(select)
        .iter()
        .all(|projection| is_aggregate(ast, ast.unalias(*projection)));
    let limit_one = ast
        .get(select, ArgKey::Limit)
        .and_then(|limit| ast.get(limit, ArgKey::This))
        .and_then(|value| ast.literal_value(value))
        == Some("1");
    (all_aggregates && ast.get(select, ArgKey::Group).is_none())
        || limit_one
        || ast.get(select, ArgKey::From).is_none()
}

/// Split the equality conjuncts of a join condition into the keys of the
/// already joined sources and the keys of the joined source.
///
/// ```
/// use polyglot_optimizer::optimizer::eliminate_joins::join_condition;
/// use polyglot_optimizer::expressions::ArgKey;
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = parse_one("SELECT 1 FROM x JOIN y ON x.a = y.b AND y.b > 1").unwrap();
/// let join = ast.list(ast.root(), ArgKey::Joins)[0];
/// let (source_keys, join_keys) = join_condition(&ast, join);
/// assert_eq!(ast.sql(source_keys[0]), "x.a");
/// assert_eq!(ast.sql(join_keys[0]), "y.b");
/// ```
pub fn join_condition(ast: &Ast, join: ExprId) -> (Vec<ExprId>, Vec<ExprId>) {
    let mut source_keys = Vec::new();
    let mut join_keys = Vec::new();
    let Some(on) = ast.get(join, ArgKey::On) else {
        return (source_keys, join_keys);
    };
    let on = ast.unnest(on);
    if !normalized(ast, on, false) {
        return (source_keys, join_keys);
    }

    let name = join_name(ast, join);
    let conjuncts = if ast.is(on, Kind::And) {
        ast.flatten(on)
    } else {
        vec![on]
    };
    for condition in conjuncts {
        if !ast.is(condition, Kind::Eq) {
            continue;
        }
        let (Some(left), Some(right)) = (
            ast.get(condition, ArgKey::This).map(|l| ast.unnest(l)),
            ast.get(condition, ArgKey::Expression).map(|r| ast.unnest(r)),
        ) else {
            continue;
        };
        let left_tables = ast.column_table_names(left);
        let right_tables = ast.column_table_names(right);
        if left_tables.contains(&name) && !right_tables.contains(&name) {
            join_keys.push(left);
            source_keys.push(right);
        } else if right_tables.contains(&name) && !left_tables.contains(&name) {
            join_keys.push(right);
            source_keys.push(left);
        }
    }
    (source_keys, join_keys)
}
