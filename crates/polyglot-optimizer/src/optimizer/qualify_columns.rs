//! Column Qualification Module
//!
//! Qualifies every column reference with the source it comes from, expands
//! stars into explicit column lists and names every projection.

use crate::builder;
use crate::error::{Error, Result};
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::is_int;
use crate::resolver::Resolver;
use crate::schema::Schema;
use crate::scope::{find_all_in_scope, traverse_scope, walk_in_scope, ScopeId, ScopeTree};
use crate::traversal::{contains_aggregate, is_aggregate};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// Options for column qualification
#[derive(Debug, Clone)]
pub struct QualifyColumnsOptions {
    /// Replace references to projection aliases with the aliased expression
    pub expand_alias_refs: bool,
    /// Replace `*` and `t.*` with explicit column lists
    pub expand_stars: bool,
    /// Assume a lone source with unknown columns provides unresolved columns.
    /// Defaults to true when the schema is empty.
    pub infer_schema: Option<bool>,
}

impl Default for QualifyColumnsOptions {
    fn default() -> Self {
        Self {
            expand_alias_refs: true,
            expand_stars: true,
            infer_schema: None,
        }
    }
}

impl QualifyColumnsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expand_alias_refs(mut self, expand: bool) -> Self {
        self.expand_alias_refs = expand;
        self
    }

    pub fn with_expand_stars(mut self, expand: bool) -> Self {
        self.expand_stars = expand;
        self
    }

    pub fn with_infer_schema(mut self, infer: bool) -> Self {
        self.infer_schema = Some(infer);
        self
    }
}

/// Rewrite the tree to have fully qualified columns.
///
/// Expects sources to be aliased already, see
/// [`qualify_tables`](super::qualify_tables::qualify_tables).
///
/// ```
/// use polyglot_optimizer::optimizer::qualify_columns::{qualify_columns, QualifyColumnsOptions};
/// use polyglot_optimizer::parser::parse_one;
/// use polyglot_optimizer::schema::MappingSchema;
///
/// let schema = MappingSchema::new().with_table("tbl", &[("col", "INT")]).unwrap();
/// let ast = parse_one("SELECT col FROM tbl AS tbl").unwrap();
/// let ast = qualify_columns(ast, &schema, &QualifyColumnsOptions::default()).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT tbl.col AS col FROM tbl AS tbl");
/// ```
pub fn qualify_columns(
    mut ast: Ast,
    schema: &dyn Schema,
    options: &QualifyColumnsOptions,
) -> Result<Ast> {
    let infer_schema = options.infer_schema.unwrap_or_else(|| schema.is_empty());
    let tree = traverse_scope(&ast)?;

    for &scope in tree.order() {
        let collected = tree.collect(&ast, scope);
        pop_table_column_aliases(&mut ast, &collected.ctes);
        pop_table_column_aliases(&mut ast, &collected.derived_tables);

        let mut resolver = Resolver::new(&tree, scope, schema, infer_schema);
        let using_column_tables = expand_using(&mut ast, &tree, scope, &mut resolver)?;

        if schema.is_empty() && options.expand_alias_refs {
            expand_alias_refs(&mut ast, &tree, scope, &mut resolver)?;
        }
        qualify_scope_columns(&mut ast, &tree, scope, &mut resolver)?;
        if !schema.is_empty() && options.expand_alias_refs {
            expand_alias_refs(&mut ast, &tree, scope, &mut resolver)?;
        }

        if !ast.kind(tree.expression(scope)).is_udtf() {
            if options.expand_stars {
                expand_stars(&mut ast, &tree, scope, &mut resolver, &using_column_tables)?;
            }
            qualify_outputs(&mut ast, &tree, scope);
        }

        expand_group_by(&mut ast, tree.expression(scope))?;
        expand_order_by(&mut ast, tree.expression(scope), &mut resolver)?;
        check_set_operation(&ast, tree.expression(scope))?;
    }

    Ok(ast)
}

/// Replace references to earlier projection aliases inside later
/// projections with the aliased expression:
/// `SELECT a + 1 AS d, d + 1 AS e` becomes `SELECT a + 1 AS d, a + 1 + 1 AS e`.
pub fn expand_laterals(mut ast: Ast) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;
    for &scope in tree.order() {
        let expression = tree.expression(scope);
        if ast.is(expression, Kind::Select) {
            expand_projection_aliases(&mut ast, expression)?;
        }
    }
    Ok(ast)
}

/// Fail when any column is left unqualified, or when a qualified column
/// points at a source that is neither local nor an enclosing scope's.
pub fn validate_qualify_columns(ast: Ast) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;
    let mut unqualified: Vec<ExprId> = Vec::new();

    for &scope in tree.order() {
        if !ast.is(tree.expression(scope), Kind::Select) {
            continue;
        }
        let unknown = tree
            .external_columns(&ast, scope)?
            .into_iter()
            .find(|c| !ast.column_table(*c).is_empty());
        if let Some(column) = unknown {
            if !tree.is_correlated_subquery(&ast, scope)? {
                return Err(Error::optimize(format!(
                    "Unknown table: '{}' for column '{}'",
                    ast.column_table(column),
                    ast.sql(column)
                )));
            }
        }
        unqualified.extend(tree.unqualified_columns(&ast, scope)?);
    }

    if !unqualified.is_empty() {
        return Err(Error::optimize(format!(
            "Ambiguous columns: {}",
            unqualified.iter().map(|c| ast.sql(*c)).join(", ")
        )));
    }
    Ok(ast)
}

/// Drop `AS t(a, b)` column lists; the inner scope has already renamed its
/// projections to match
fn pop_table_column_aliases(ast: &mut Ast, derived_tables: &[ExprId]) {
    for derived in derived_tables {
        let recursive = ast.is(*derived, Kind::Cte)
            && ast
                .parent(*derived)
                .is_some_and(|with| ast.flag(with, ArgKey::Recursive));
        if recursive {
            continue;
        }
        if let Some(alias) = ast.get(*derived, ArgKey::Alias) {
            ast.remove_arg(alias, ArgKey::Columns);
        }
    }
}

/// Turn `JOIN ... USING (c)` into `ON` equalities. Returns, per joined
/// column name, the sources that provide it, in join order.
fn expand_using(
    ast: &mut Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    resolver: &mut Resolver<'_>,
) -> Result<IndexMap<String, IndexSet<String>>> {
    let expression = tree.expression(scope);
    let joins = ast.list(expression, ArgKey::Joins).to_vec();
    let mut column_tables: IndexMap<String, IndexSet<String>> = IndexMap::new();
    if joins.iter().all(|j| ast.list(*j, ArgKey::Using).is_empty()) {
        return Ok(column_tables);
    }

    let join_names: HashSet<String> = joins
        .iter()
        .filter_map(|j| ast.get(*j, ArgKey::This))
        .map(|source| ast.alias_or_name(source))
        .collect();
    let selected: Vec<String> = tree.selected_sources(ast, scope)?.keys().cloned().collect();
    let mut ordered: Vec<String> = selected
        .iter()
        .filter(|name| !join_names.contains(*name))
        .cloned()
        .collect();

    for join in joins {
        let using = ast.list(join, ArgKey::Using).to_vec();
        if using.is_empty() {
            continue;
        }
        let Some(join_source) = ast.get(join, ArgKey::This) else {
            continue;
        };
        let join_table = ast.alias_or_name(join_source);

        let mut columns: IndexMap<String, String> = IndexMap::new();
        for name in selected.iter().filter(|n| ordered.contains(*n)) {
            for column in resolver.get_source_columns(ast, name, false)? {
                columns.entry(column).or_insert_with(|| name.clone());
            }
        }
        let source_table = ordered.last().cloned().ok_or_else(|| {
            Error::optimize(format!("Cannot automatically join: {join_table}"))
        })?;
        ordered.push(join_table.clone());
        let join_columns = resolver.get_source_columns(ast, &join_table, false)?;

        let mut conditions = Vec::new();
        for identifier in using {
            let name = ast.name(identifier).to_string();
            let table = columns.get(&name).cloned();
            if table.is_none() || !join_columns.contains(&name) {
                let known = !columns.is_empty() && !columns.contains_key("*");
                if known && !join_columns.is_empty() {
                    return Err(Error::optimize(format!(
                        "Cannot automatically join: {name}"
                    )));
                }
            }
            let table = table.unwrap_or_else(|| source_table.clone());

            let left = builder::column(ast, &name, Some(table.as_str()));
            let right = builder::column(ast, &name, Some(join_table.as_str()));
            conditions.push(builder::binary(ast, Kind::Eq, left, right));

            let tables = column_tables.entry(name).or_default();
            tables.insert(table);
            tables.insert(join_table.clone());
        }

        ast.remove_arg(join, ArgKey::Using);
        let on = builder::and(ast, conditions);
        ast.set(join, ArgKey::On, on);
    }

    for column in tree.columns(ast, scope)? {
        if !ast.column_table(column).is_empty() {
            continue;
        }
        let name = ast.name(column).to_string();
        let Some(tables) = column_tables.get(&name) else {
            continue;
        };
        let operands: Vec<ExprId> = tables
            .iter()
            .map(|table| builder::column(ast, &name, Some(table.as_str())))
            .collect();
        let in_projection = ast.parent(column).is_some_and(|p| ast.is(p, Kind::Select));
        let mut replacement = builder::func(ast, "COALESCE", operands);
        if in_projection {
            replacement = builder::alias(ast, replacement, &name);
        }
        ast.replace(column, replacement);
    }

    Ok(column_tables)
}

fn qualify_scope_columns(
    ast: &mut Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    resolver: &mut Resolver<'_>,
) -> Result<()> {
    let expression = tree.expression(scope);
    let mut columns = tree.columns(ast, scope)?;

    // Unqualified ORDER BY and HAVING names are output aliases unless they
    // sit inside an expression and a source provides them.
    if ast.is(expression, Kind::Select) {
        let all_columns = resolver.all_columns(ast)?;
        for key in [ArgKey::Order, ArgKey::Having] {
            let Some(clause) = ast.get(expression, key) else {
                continue;
            };
            for column in find_all_in_scope(ast, clause, |ast, n| ast.is(n, Kind::Column), false) {
                if !ast.column_table(column).is_empty()
                    || ast.is_star(column)
                    || columns.contains(&column)
                    || !all_columns.contains(ast.name(column))
                {
                    continue;
                }
                let missed = if key == ArgKey::Order {
                    !ast.parent(column).is_some_and(|p| ast.is(p, Kind::Ordered))
                } else {
                    ast.ancestors(column).any(|a| is_aggregate(ast, a))
                };
                if missed {
                    columns.push(column);
                }
            }
        }
    }

    let sources = &tree.scope(scope).sources;
    for column in columns {
        let table = ast.column_table(column).to_string();
        let name = ast.name(column).to_string();

        if !table.is_empty() {
            if sources.contains_key(&table) {
                let source_columns = resolver.get_source_columns(ast, &table, false)?;
                if !source_columns.is_empty()
                    && !source_columns.contains(&name)
                    && !source_columns.iter().any(|c| c == "*")
                {
                    return Err(Error::optimize(format!("Unknown column: {name}")));
                }
            }
            continue;
        }

        if let Some(table) = resolver.get_table(ast, &name)? {
            if !table.is_empty() {
                let table = builder::identifier(ast, &table);
                ast.set(column, ArgKey::Table, Some(table));
            }
        }
    }
    Ok(())
}

/// Expand references to projection aliases in later projections, WHERE,
/// GROUP BY and HAVING
fn expand_alias_refs(
    ast: &mut Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    resolver: &mut Resolver<'_>,
) -> Result<()> {
    let expression = tree.expression(scope);
    if !ast.is(expression, Kind::Select) {
        return Ok(());
    }

    let aliases = expand_projection_aliases(ast, expression)?;

    let clause = |ast: &Ast, key| ast.get(expression, key);
    if let Some(node) = clause(ast, ArgKey::Where) {
        replace_alias_refs(ast, node, &aliases, None, false)?;
    }
    if let Some(node) = clause(ast, ArgKey::Group) {
        replace_alias_refs(ast, node, &aliases, None, true)?;
    }
    if let Some(node) = clause(ast, ArgKey::Having) {
        replace_alias_refs(ast, node, &aliases, Some(resolver), false)?;
    }
    Ok(())
}

type AliasMap = HashMap<String, (ExprId, usize)>;

/// Rewrite alias references inside projections, left to right. Returns the
/// alias name to (aliased expression, 1-based position) map.
fn expand_projection_aliases(ast: &mut Ast, select: ExprId) -> Result<AliasMap> {
    let mut aliases: AliasMap = HashMap::new();
    let count = ast.list(select, ArgKey::Expressions).len();

    for i in 0..count {
        let Some(&projection) = ast.list(select, ArgKey::Expressions).get(i) else {
            break;
        };
        let bare_name = ast
            .is(projection, Kind::Column)
            .then(|| ast.name(projection).to_string());
        replace_alias_refs(ast, projection, &aliases, None, false)?;

        let projection = ast.list(select, ArgKey::Expressions)[i];
        if let Some(name) = bare_name {
            // A bare reference that was expanded keeps its output name
            if !ast.is(projection, Kind::Column) {
                let aliased = builder::alias(ast, projection, &name);
                ast.insert(select, ArgKey::Expressions, i, aliased);
            }
        }

        let projection = ast.list(select, ArgKey::Expressions)[i];
        if ast.is(projection, Kind::Alias) {
            if let Some(this) = ast.get(projection, ArgKey::This) {
                aliases.insert(ast.alias(projection).to_string(), (this, i + 1));
            }
        }
    }
    Ok(aliases)
}

fn replace_alias_refs(
    ast: &mut Ast,
    node: ExprId,
    aliases: &AliasMap,
    mut resolver: Option<&mut Resolver<'_>>,
    literal_index: bool,
) -> Result<()> {
    let resolve_table = resolver.is_some();
    let columns = find_all_in_scope(
        ast,
        node,
        |ast, n| ast.is(n, Kind::Column) && !ast.is_star(n),
        false,
    );

    for column in columns {
        if !ast.column_table(column).is_empty() {
            continue;
        }
        let name = ast.name(column).to_string();
        let table = match resolver.as_deref_mut() {
            Some(resolver) => resolver.get_table(ast, &name)?.filter(|t| !t.is_empty()),
            None => None,
        };
        let alias_expr = aliases.get(&name).copied();
        let double_agg = alias_expr.is_some_and(|(expr, _)| {
            contains_aggregate(ast, expr) && ast.ancestors(column).any(|a| is_aggregate(ast, a))
        });

        match (table, alias_expr) {
            (Some(table), None) => {
                let table = builder::identifier(ast, &table);
                ast.set(column, ArgKey::Table, Some(table));
            }
            (Some(table), Some(_)) if double_agg => {
                let table = builder::identifier(ast, &table);
                ast.set(column, ArgKey::Table, Some(table));
            }
            (_, Some((expr, index))) if !double_agg => {
                if ast.is(expr, Kind::Literal) && (literal_index || resolve_table) {
                    if literal_index {
                        let position = builder::number(ast, &index.to_string());
                        ast.replace(column, position);
                    }
                } else {
                    let copy = ast.copy(expr);
                    ast.replace(column, copy);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Replace `*` and `t.*` projections with the columns of their sources
fn expand_stars(
    ast: &mut Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    resolver: &mut Resolver<'_>,
    using_column_tables: &IndexMap<String, IndexSet<String>>,
) -> Result<()> {
    let expression = tree.expression(scope);
    if !ast.is(expression, Kind::Select) {
        return Ok(());
    }
    let projections = ast.list(expression, ArgKey::Expressions).to_vec();
    if !projections.iter().any(|p| ast.is_star(*p)) {
        return Ok(());
    }

    let selected: Vec<String> = tree.selected_sources(ast, scope)?.keys().cloned().collect();
    let sources = &tree.scope(scope).sources;
    let mut new_selections = Vec::new();
    let mut except_columns: HashMap<String, HashSet<String>> = HashMap::new();
    let mut replace_columns: HashMap<String, HashMap<String, ExprId>> = HashMap::new();
    let mut coalesced: HashSet<String> = HashSet::new();

    for projection in projections {
        let (tables, star) = if ast.is(projection, Kind::Star) {
            (selected.clone(), projection)
        } else if ast.is_star(projection) {
            let star = ast.get(projection, ArgKey::This).unwrap_or(projection);
            (vec![ast.column_table(projection).to_string()], star)
        } else {
            new_selections.push(projection);
            continue;
        };

        let except: HashSet<String> = ast
            .list(star, ArgKey::Except)
            .iter()
            .map(|c| ast.name(*c).to_string())
            .collect();
        let replace: HashMap<String, ExprId> = ast
            .list(star, ArgKey::Replace)
            .iter()
            .map(|r| (ast.alias(*r).to_string(), *r))
            .collect();
        for table in &tables {
            if !except.is_empty() {
                except_columns.insert(table.clone(), except.clone());
            }
            if !replace.is_empty() {
                replace_columns.insert(table.clone(), replace.clone());
            }
        }

        for table in &tables {
            if !sources.contains_key(table) {
                return Err(Error::optimize(format!("Unknown table: {table}")));
            }
            let columns = resolver.get_source_columns(ast, table, true)?;
            if columns.is_empty() || columns.iter().any(|c| c == "*") {
                // Unknown columns; leave every star of the scope in place
                return Ok(());
            }

            for name in columns {
                if let Some(joined) = using_column_tables.get(&name).filter(|t| t.contains(table)) {
                    if !coalesced.insert(name.clone()) {
                        continue;
                    }
                    let operands: Vec<ExprId> = joined
                        .iter()
                        .map(|t| builder::column(ast, &name, Some(t.as_str())))
                        .collect();
                    let coalesce = builder::func(ast, "COALESCE", operands);
                    new_selections.push(builder::alias(ast, coalesce, &name));
                } else if except_columns
                    .get(table)
                    .is_some_and(|except| except.contains(&name))
                {
                    continue;
                } else if let Some(replacement) =
                    replace_columns.get(table).and_then(|r| r.get(&name))
                {
                    new_selections.push(ast.copy(*replacement));
                } else {
                    new_selections.push(builder::column(ast, &name, Some(table.as_str())));
                }
            }
        }
    }

    ast.set_list(expression, ArgKey::Expressions, new_selections);
    Ok(())
}

/// Alias every projection, using the scope's outer column names when the
/// enclosing query declares them
pub fn qualify_outputs(ast: &mut Ast, tree: &ScopeTree, scope: ScopeId) {
    let expression = tree.expression(scope);
    let outer = &tree.scope(scope).outer_column_list;
    let target = if ast.is(expression, Kind::Select) {
        expression
    } else if ast.kind(expression).is_set_operation() && !outer.is_empty() {
        leftmost_select(ast, expression)
    } else {
        return;
    };

    let selects = ast.list(target, ArgKey::Expressions).to_vec();
    let mut new_selections = Vec::with_capacity(selects.len());
    for (i, selection) in selects.into_iter().enumerate() {
        let mut selection = selection;
        if !ast.is(selection, Kind::Alias) && !ast.is_star(selection) {
            let name = match ast.output_name(selection) {
                name if name.is_empty() => format!("_col_{i}"),
                name => name,
            };
            selection = builder::alias(ast, selection, &name);
        }
        if let Some(name) = outer.get(i).filter(|n| !n.is_empty()) {
            if ast.is(selection, Kind::Alias) {
                let name = builder::identifier(ast, name);
                ast.set(selection, ArgKey::Alias, Some(name));
            }
        }
        new_selections.push(selection);
    }
    ast.set_list(target, ArgKey::Expressions, new_selections);
}

fn leftmost_select(ast: &Ast, mut query: ExprId) -> ExprId {
    while ast.kind(query).is_set_operation() {
        match ast.get(query, ArgKey::This) {
            Some(left) => query = ast.unwrap_subquery(left),
            None => break,
        }
    }
    query
}

fn expand_group_by(ast: &mut Ast, select: ExprId) -> Result<()> {
    let Some(group) = ast.get(select, ArgKey::Group) else {
        return Ok(());
    };
    let expressions = ast.list(group, ArgKey::Expressions).to_vec();
    let expanded = expand_positional_references(ast, select, expressions)?;
    ast.set_list(group, ArgKey::Expressions, expanded);
    Ok(())
}

fn expand_order_by(ast: &mut Ast, select: ExprId, resolver: &mut Resolver<'_>) -> Result<()> {
    if !ast.is(select, Kind::Select) {
        return Ok(());
    }
    let Some(order) = ast.get(select, ArgKey::Order) else {
        return Ok(());
    };
    for ordered in ast.list(order, ArgKey::Expressions).to_vec() {
        let Some(this) = ast.get(ordered, ArgKey::This) else {
            continue;
        };
        // Aggregates in ORDER BY read source columns, never output aliases
        let aggregated: Vec<ExprId> = walk_in_scope(ast, this, false)
            .into_iter()
            .filter(|n| is_aggregate(ast, *n))
            .flat_map(|agg| ast.find_all(agg, Kind::Column))
            .filter(|c| ast.column_table(*c).is_empty() && !ast.is_star(*c))
            .collect();
        for column in aggregated {
            let name = ast.name(column).to_string();
            if let Some(table) = resolver.get_table(ast, &name)?.filter(|t| !t.is_empty()) {
                let table = builder::identifier(ast, &table);
                ast.set(column, ArgKey::Table, Some(table));
            }
        }

        let expanded = expand_positional_references(ast, select, vec![this])?;
        if let Some(&new) = expanded.first() {
            if new != this {
                ast.replace(this, new);
            }
        }
    }
    Ok(())
}

/// Replace `1`, `2`, ... with a copy of the projection at that position
fn expand_positional_references(
    ast: &mut Ast,
    select: ExprId,
    expressions: Vec<ExprId>,
) -> Result<Vec<ExprId>> {
    let mut expanded = Vec::with_capacity(expressions.len());
    for node in expressions {
        let position = ast
            .literal_value(node)
            .filter(|v| ast.is_number(node) && is_int(v))
            .and_then(|v| v.parse::<usize>().ok());
        let Some(position) = position else {
            expanded.push(node);
            continue;
        };
        let projection = position
            .checked_sub(1)
            .and_then(|i| ast.selects(select).get(i).copied())
            .ok_or_else(|| Error::optimize(format!("Unknown output column: {position}")))?;
        let target = ast.unalias(projection);
        if ast.is(target, Kind::Literal) {
            expanded.push(node);
        } else {
            expanded.push(ast.copy(target));
        }
    }
    Ok(expanded)
}

/// Both branches of a set operation must project the same number of columns
fn check_set_operation(ast: &Ast, expression: ExprId) -> Result<()> {
    if !ast.kind(expression).is_set_operation() {
        return Ok(());
    }
    let (Some(left), Some(right)) = (
        ast.get(expression, ArgKey::This),
        ast.get(expression, ArgKey::Expression),
    ) else {
        return Ok(());
    };
    let (left, right) = (ast.selects(left), ast.selects(right));
    let has_star = left.iter().chain(right).any(|s| ast.is_star(*s));
    if !has_star && left.len() != right.len() {
        return Err(Error::optimize(format!(
            "Invalid set operation: branches project {} and {} columns",
            left.len(),
            right.len()
        )));
    }
    Ok(())
}
