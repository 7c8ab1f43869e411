//! Projection Pushdown Module
//!
//! Removes projections of nested queries that no enclosing query reads.
//! Scopes are visited outermost first so that pruning a projection can in
//! turn leave columns of deeper sources unreferenced.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::resolver::Resolver;
use crate::schema::Schema;
use crate::scope::{traverse_scope, ScopeId, ScopeTree, Source};
use crate::traversal::contains_aggregate;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

/// Column names an enclosing query reads from a scope
#[derive(Debug, Clone, PartialEq, Eq)]
enum Referenced {
    All,
    Columns(HashSet<String>),
}

impl Referenced {
    fn contains(&self, name: &str) -> bool {
        match self {
            Referenced::All => true,
            Referenced::Columns(columns) => columns.contains(name),
        }
    }

    fn extend(&mut self, names: impl IntoIterator<Item = String>) {
        if let Referenced::Columns(columns) = self {
            columns.extend(names);
        }
    }
}

/// Rewrite the tree to remove unused projections.
///
/// ```
/// use polyglot_optimizer::optimizer::pushdown_projections::pushdown_projections;
/// use polyglot_optimizer::parser::parse_one;
/// use polyglot_optimizer::schema::MappingSchema;
///
/// let sql = "SELECT y.a AS a FROM (SELECT x.a AS a, x.b AS b FROM x AS x) AS y";
/// let ast = pushdown_projections(parse_one(sql).unwrap(), &MappingSchema::new(), true).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT y.a AS a FROM (SELECT x.a AS a FROM x AS x) AS y");
/// ```
pub fn pushdown_projections(
    mut ast: Ast,
    schema: &dyn Schema,
    remove_unused_selections: bool,
) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;
    let mut referenced: HashMap<ScopeId, Referenced> = HashMap::new();
    let mut source_column_alias_count: HashMap<ScopeId, usize> = HashMap::new();

    for &scope in tree.order().iter().rev() {
        let expression = tree.expression(scope);
        let mut parent_selections = referenced.get(&scope).cloned().unwrap_or(Referenced::All);
        let alias_count = source_column_alias_count.get(&scope).copied().unwrap_or(0);

        let parent_distinct = tree
            .scope(scope)
            .parent
            .is_some_and(|p| ast.flag(tree.expression(p), ArgKey::Distinct));
        if ast.flag(expression, ArgKey::Distinct) || parent_distinct {
            parent_selections = Referenced::All;
        }

        if !ast.is(expression, Kind::Select) {
            continue;
        }
        if remove_unused_selections {
            remove_unused_selections_in(&mut ast, &tree, scope, &parent_selections, schema, alias_count)?;
        }
        if ast.list(expression, ArgKey::Expressions).iter().any(|s| ast.is_star(*s)) {
            continue;
        }

        let mut selects: HashMap<String, HashSet<String>> = HashMap::new();
        for column in tree.columns(&ast, scope)? {
            selects
                .entry(ast.column_table(column).to_string())
                .or_default()
                .insert(ast.name(column).to_string());
        }

        for (name, (node, source)) in tree.selected_sources(&ast, scope)? {
            let Source::Scope(child) = source else {
                continue;
            };
            let columns = selects.get(&name).cloned().unwrap_or_default();
            referenced
                .entry(child)
                .or_insert_with(|| Referenced::Columns(HashSet::new()))
                .extend(columns);

            let column_aliases = ast.alias_column_names(node);
            if !column_aliases.is_empty() {
                source_column_alias_count.insert(child, column_aliases.len());
            }
        }
    }

    Ok(ast)
}

fn remove_unused_selections_in(
    ast: &mut Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    parent_selections: &Referenced,
    schema: &dyn Schema,
    mut alias_count: usize,
) -> Result<()> {
    let expression = tree.expression(scope);

    // Unqualified ORDER BY names are taken as output references
    let order_refs: HashSet<String> = match ast.get(expression, ArgKey::Order) {
        Some(order) => ast
            .find_all(order, Kind::Column)
            .into_iter()
            .filter(|c| ast.column_table(*c).is_empty())
            .map(|c| ast.name(c).to_string())
            .collect(),
        None => HashSet::new(),
    };

    let mut new_selections = Vec::new();
    let mut removed = false;
    let mut star = false;
    let mut aggregated = false;

    for selection in ast.list(expression, ArgKey::Expressions).to_vec() {
        let name = ast.alias_or_name(selection);
        if parent_selections.contains(&name) || order_refs.contains(&name) || alias_count > 0 {
            new_selections.push(selection);
            alias_count = alias_count.saturating_sub(1);
        } else {
            star |= ast.is_star(selection);
            aggregated |= contains_aggregate(ast, selection);
            removed = true;
        }
    }

    if !removed {
        return Ok(());
    }

    if star {
        if let Referenced::Columns(wanted) = parent_selections {
            let mut resolver = Resolver::new(tree, scope, schema, false);
            let names: HashSet<String> =
                new_selections.iter().map(|s| ast.alias_or_name(*s)).collect();
            let missing: BTreeSet<&String> = wanted.iter().filter(|n| !names.contains(*n)).collect();
            for name in missing {
                let table = resolver.get_table(ast, name)?;
                let column = builder::column(ast, name, table.as_deref());
                new_selections.push(builder::alias(ast, column, name));
            }
        }
    }

    if new_selections.is_empty() {
        new_selections.push(default_selection(ast, aggregated));
    }

    trace!(scope, kept = new_selections.len(), "pruned unused projections");
    ast.set_list(expression, ArgKey::Expressions, new_selections);
    Ok(())
}

/// Placeholder projection for a query whose projections were all removed:
/// `1 AS _`, or `MAX(1) AS _` when the query aggregated so it keeps
/// returning a single row
pub fn default_selection(ast: &mut Ast, aggregated: bool) -> ExprId {
    let one = builder::number(ast, "1");
    let value = if aggregated {
        builder::func(ast, "MAX", vec![one])
    } else {
        one
    };
    builder::alias(ast, value, "_")
}
