//! Scope Analysis Module
//!
//! A scope is the resolution context of one SELECT-like construct: a select,
//! a set operation or one of its branches, a CTE body, a derived table, a
//! subquery or a table function. [`traverse_scope`] builds every scope of a
//! query into a [`ScopeTree`] arena in post-order, children before parents.
//!
//! Scopes only hold node handles into the [`Ast`] they were built from. Their
//! derived properties (columns, selected sources, ...) are recomputed from the
//! tree on each call, so they stay accurate while a pass edits expressions
//! inside a scope. Passes that restructure queries rebuild the tree.

use crate::error::{Error, Result};
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::find_new_name;
use crate::traversal::{BfsIter, DfsIter};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Index of a scope inside its [`ScopeTree`]
pub type ScopeId = usize;

/// Type of scope in a SQL query, relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeType {
    /// Root scope of the query
    Root,
    /// Subquery scope (e.g., WHERE x IN (SELECT ...))
    Subquery,
    /// Derived table scope (e.g., FROM (SELECT ...) AS t)
    DerivedTable,
    /// Common Table Expression scope
    Cte,
    /// Branch of a UNION/INTERSECT/EXCEPT
    Union,
    /// Table function scope (VALUES, LATERAL VIEW)
    Udtf,
}

/// What a source name in a scope is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// A base table node
    Table(ExprId),
    /// A nested scope (CTE, derived table or table function)
    Scope(ScopeId),
}

/// Nodes found directly in a scope, without descending into child scopes
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub tables: Vec<ExprId>,
    pub ctes: Vec<ExprId>,
    pub subqueries: Vec<ExprId>,
    pub derived_tables: Vec<ExprId>,
    pub udtfs: Vec<ExprId>,
    pub raw_columns: Vec<ExprId>,
}

/// Represents a scope in a SQL query
#[derive(Debug, Clone)]
pub struct Scope {
    /// The query or table function at the root of this scope
    pub expression: ExprId,

    /// Type of this scope relative to its parent
    pub scope_type: ScopeType,

    /// Source name to table or scope
    pub sources: IndexMap<String, Source>,

    /// Sources to the left of a table function, visible inside it
    pub lateral_sources: IndexMap<String, Source>,

    /// Column names the outer query declares for this scope,
    /// e.g. `(SELECT ...) AS y(col1, col2)` gives `["col1", "col2"]`
    pub outer_column_list: Vec<String>,

    pub parent: Option<ScopeId>,

    pub subquery_scopes: Vec<ScopeId>,
    pub derived_table_scopes: Vec<ScopeId>,
    pub cte_scopes: Vec<ScopeId>,
    pub udtf_scopes: Vec<ScopeId>,
    /// derived_table_scopes and udtf_scopes in definition order
    pub table_scopes: Vec<ScopeId>,
    /// Left and right branch of a set operation
    pub union_scopes: Vec<ScopeId>,
}

impl Scope {
    fn new(
        expression: ExprId,
        scope_type: ScopeType,
        mut sources: IndexMap<String, Source>,
        lateral_sources: IndexMap<String, Source>,
        outer_column_list: Vec<String>,
        parent: Option<ScopeId>,
    ) -> Self {
        for (name, source) in &lateral_sources {
            sources.insert(name.clone(), *source);
        }
        Self {
            expression,
            scope_type,
            sources,
            lateral_sources,
            outer_column_list,
            parent,
            subquery_scopes: Vec::new(),
            derived_table_scopes: Vec::new(),
            cte_scopes: Vec::new(),
            udtf_scopes: Vec::new(),
            table_scopes: Vec::new(),
            union_scopes: Vec::new(),
        }
    }

    pub fn is_subquery(&self) -> bool {
        self.scope_type == ScopeType::Subquery
    }

    pub fn is_derived_table(&self) -> bool {
        self.scope_type == ScopeType::DerivedTable
    }

    pub fn is_cte(&self) -> bool {
        self.scope_type == ScopeType::Cte
    }

    pub fn is_root(&self) -> bool {
        self.scope_type == ScopeType::Root
    }

    pub fn is_udtf(&self) -> bool {
        self.scope_type == ScopeType::Udtf
    }

    pub fn is_union(&self) -> bool {
        self.scope_type == ScopeType::Union
    }

    /// Add or rebind a source
    pub fn add_source(&mut self, name: impl Into<String>, source: Source) {
        self.sources.insert(name.into(), source);
    }

    pub fn remove_source(&mut self, name: &str) {
        self.sources.shift_remove(name);
    }

    /// Rebind a source under a new name
    pub fn rename_source(&mut self, old_name: &str, new_name: impl Into<String>) {
        if let Some(source) = self.sources.shift_remove(old_name) {
            self.sources.insert(new_name.into(), source);
        }
    }
}

/// Every scope of a query, stored by [`ScopeId`]
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    order: Vec<ScopeId>,
}

impl ScopeTree {
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id]
    }

    /// Scopes in traversal order: children before their parent, the root last
    pub fn order(&self) -> &[ScopeId] {
        &self.order
    }

    /// The outermost scope
    pub fn root(&self) -> Option<ScopeId> {
        self.order.last().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Expression of a scope
    pub fn expression(&self, id: ScopeId) -> ExprId {
        self.scopes[id].expression
    }

    /// Post-order walk of the scope subtree under `id`: CTEs, set-operation
    /// branches, table sources, subqueries, then `id` itself
    pub fn traverse(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut result = Vec::new();
        self.traverse_into(id, &mut result);
        result
    }

    fn traverse_into(&self, id: ScopeId, result: &mut Vec<ScopeId>) {
        let scope = &self.scopes[id];
        for child in scope
            .cte_scopes
            .iter()
            .chain(&scope.union_scopes)
            .chain(&scope.table_scopes)
            .chain(&scope.subquery_scopes)
        {
            self.traverse_into(*child, result);
        }
        result.push(id);
    }

    /// Nodes of a scope's own expression, grouped by role
    pub fn collect(&self, ast: &Ast, id: ScopeId) -> Collected {
        let expression = self.scopes[id].expression;
        let mut collected = Collected::default();
        for node in walk_in_scope(ast, expression, false) {
            if node == expression {
                continue;
            }
            let kind = ast.kind(node);
            if kind == Kind::Column && !ast.is_star(node) {
                collected.raw_columns.push(node);
            } else if kind == Kind::Table {
                collected.tables.push(node);
            } else if kind.is_udtf() {
                collected.udtfs.push(node);
            } else if kind == Kind::Cte {
                collected.ctes.push(node);
            } else if kind == Kind::Subquery && is_table_position(ast, node) {
                collected.derived_tables.push(node);
            } else if kind.is_query() || kind == Kind::Subquery {
                collected.subqueries.push(node);
            }
        }
        collected
    }

    pub fn tables(&self, ast: &Ast, id: ScopeId) -> Vec<ExprId> {
        self.collect(ast, id).tables
    }

    pub fn ctes(&self, ast: &Ast, id: ScopeId) -> Vec<ExprId> {
        self.collect(ast, id).ctes
    }

    pub fn derived_tables(&self, ast: &Ast, id: ScopeId) -> Vec<ExprId> {
        self.collect(ast, id).derived_tables
    }

    pub fn udtfs(&self, ast: &Ast, id: ScopeId) -> Vec<ExprId> {
        self.collect(ast, id).udtfs
    }

    pub fn subqueries(&self, ast: &Ast, id: ScopeId) -> Vec<ExprId> {
        self.collect(ast, id).subqueries
    }

    /// Column references of this scope, plus columns of correlated subqueries
    /// and table functions that point back into it. Unqualified ORDER BY and
    /// HAVING references to the scope's own output names are left out.
    pub fn columns(&self, ast: &Ast, id: ScopeId) -> Result<Vec<ExprId>> {
        let scope = &self.scopes[id];
        let mut candidates = self.collect(ast, id).raw_columns;
        for child in scope.subquery_scopes.iter().chain(&scope.udtf_scopes) {
            candidates.extend(self.external_columns(ast, *child)?);
        }

        let named_selects: HashSet<String> =
            ast.named_selects(scope.expression).into_iter().collect();

        Ok(candidates
            .into_iter()
            .filter(|column| {
                let ancestor =
                    ast.find_ancestor(*column, |k| matches!(k, Kind::Order | Kind::Having));
                match ancestor {
                    None => true,
                    Some(ancestor) => {
                        !ast.parent(ancestor).is_some_and(|p| ast.is(p, Kind::Select))
                            || !ast.column_table(*column).is_empty()
                            || !named_selects.contains(ast.name(*column))
                    }
                }
            })
            .collect())
    }

    /// Sources actually selected from in FROM, JOIN and LATERAL, keyed by
    /// name: the referencing node (table, derived table or table function)
    /// and what it is bound to
    pub fn selected_sources(
        &self,
        ast: &Ast,
        id: ScopeId,
    ) -> Result<IndexMap<String, (ExprId, Source)>> {
        let scope = &self.scopes[id];
        let collected = self.collect(ast, id);

        let mut referenced: Vec<(String, ExprId)> = Vec::new();
        for table in collected.tables {
            referenced.push((ast.alias_or_name(table), table));
        }
        for node in collected.derived_tables.into_iter().chain(collected.udtfs) {
            referenced.push((ast.alias(node).to_string(), node));
        }

        let mut result = IndexMap::new();
        for (name, node) in referenced {
            if result.contains_key(&name) {
                return Err(Error::optimize(format!("Alias already used: {name}")));
            }
            if let Some(source) = scope.sources.get(&name) {
                result.insert(name, (node, *source));
            }
        }
        Ok(result)
    }

    /// Sources of a scope that are CTE scopes
    pub fn cte_sources(&self, id: ScopeId) -> IndexMap<String, ScopeId> {
        self.scopes[id]
            .sources
            .iter()
            .filter_map(|(name, source)| match source {
                Source::Scope(child) if self.scopes[*child].is_cte() => {
                    Some((name.clone(), *child))
                }
                _ => None,
            })
            .collect()
    }

    /// Projections of the scope's query
    pub fn selects<'a>(&self, ast: &'a Ast, id: ScopeId) -> &'a [ExprId] {
        ast.selects(self.scopes[id].expression)
    }

    /// Columns whose qualifier is not a source selected in this scope
    pub fn external_columns(&self, ast: &Ast, id: ScopeId) -> Result<Vec<ExprId>> {
        let selected = self.selected_sources(ast, id)?;
        Ok(self
            .columns(ast, id)?
            .into_iter()
            .filter(|c| !selected.contains_key(ast.column_table(*c)))
            .collect())
    }

    pub fn unqualified_columns(&self, ast: &Ast, id: ScopeId) -> Result<Vec<ExprId>> {
        Ok(self
            .columns(ast, id)?
            .into_iter()
            .filter(|c| ast.column_table(*c).is_empty())
            .collect())
    }

    /// Columns of this scope qualified with `source_name`
    pub fn source_columns(&self, ast: &Ast, id: ScopeId, source_name: &str) -> Result<Vec<ExprId>> {
        Ok(self
            .columns(ast, id)?
            .into_iter()
            .filter(|c| ast.column_table(*c) == source_name)
            .collect())
    }

    pub fn is_correlated_subquery(&self, ast: &Ast, id: ScopeId) -> Result<bool> {
        Ok(self.scopes[id].is_subquery() && !self.external_columns(ast, id)?.is_empty())
    }

    /// How many times each source is selected across the scopes under `id`
    pub fn ref_count(&self, ast: &Ast, id: ScopeId) -> Result<HashMap<Source, usize>> {
        let mut counts = HashMap::new();
        for scope in self.traverse(id) {
            for (_, source) in self.selected_sources(ast, scope)?.values() {
                *counts.entry(*source).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// First node of the scope matching `predicate`, breadth-first
    pub fn find(&self, ast: &Ast, id: ScopeId, predicate: impl Fn(&Ast, ExprId) -> bool) -> Option<ExprId> {
        find_in_scope(ast, self.scopes[id].expression, predicate, true)
    }

    /// All nodes of the scope matching `predicate`, breadth-first
    pub fn find_all(&self, ast: &Ast, id: ScopeId, predicate: impl Fn(&Ast, ExprId) -> bool) -> Vec<ExprId> {
        find_all_in_scope(ast, self.scopes[id].expression, predicate, true)
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    fn push_scope(&mut self, scope: Scope) -> ScopeId {
        self.scopes.push(scope);
        self.scopes.len() - 1
    }

    /// Create an inner scope that sees the CTEs of `parent` plus `chain_sources`
    fn branch(
        &mut self,
        ast: &Ast,
        parent: ScopeId,
        expression: ExprId,
        scope_type: ScopeType,
        chain_sources: IndexMap<String, Source>,
        lateral_sources: IndexMap<String, Source>,
        outer_column_list: Vec<String>,
    ) -> ScopeId {
        let mut sources: IndexMap<String, Source> = self
            .cte_sources(parent)
            .into_iter()
            .map(|(name, id)| (name, Source::Scope(id)))
            .collect();
        sources.extend(chain_sources);
        self.push_scope(Scope::new(
            ast.unwrap_subquery(expression),
            scope_type,
            sources,
            lateral_sources,
            outer_column_list,
            Some(parent),
        ))
    }

    fn traverse_scope(&mut self, ast: &Ast, id: ScopeId) -> Result<()> {
        let expression = self.scopes[id].expression;
        let kind = ast.kind(expression);
        if kind == Kind::Select {
            self.traverse_ctes(ast, id)?;
            self.traverse_tables(ast, id)?;
            self.traverse_subqueries(ast, id)?;
        } else if kind.is_set_operation() {
            self.traverse_ctes(ast, id)?;
            for key in [ArgKey::This, ArgKey::Expression] {
                let branch = ast.get(expression, key).ok_or_else(|| {
                    Error::optimize(format!("Set operation is missing a branch: {}", ast.sql(expression)))
                })?;
                let child = self.branch(
                    ast,
                    id,
                    branch,
                    ScopeType::Union,
                    IndexMap::new(),
                    IndexMap::new(),
                    Vec::new(),
                );
                self.traverse_scope(ast, child)?;
                self.scopes[id].union_scopes.push(child);
            }
        } else if kind == Kind::Subquery {
            self.traverse_subqueries(ast, id)?;
        } else if !kind.is_udtf() {
            return Err(Error::optimize(format!(
                "Unexpected expression type: {kind:?}"
            )));
        }
        self.order.push(id);
        Ok(())
    }

    fn traverse_ctes(&mut self, ast: &Ast, id: ScopeId) -> Result<()> {
        let expression = self.scopes[id].expression;
        let recursive = ast
            .get(expression, ArgKey::With)
            .is_some_and(|with| ast.flag(with, ArgKey::Recursive));
        let mut sources: IndexMap<String, Source> = IndexMap::new();

        for cte in self.ctes(ast, id) {
            let Some(body) = ast.get(cte, ArgKey::This) else {
                continue;
            };
            let alias = ast.alias(cte).to_string();

            // A recursive CTE reads from its anchor, the left branch of its body
            let recursive_scope = match ast.get(ast.unwrap_subquery(body), ArgKey::This) {
                Some(anchor) if recursive && ast.kind(ast.unwrap_subquery(body)).is_set_operation() => Some(
                    self.branch(
                        ast,
                        id,
                        anchor,
                        ScopeType::Cte,
                        IndexMap::new(),
                        IndexMap::new(),
                        Vec::new(),
                    ),
                ),
                _ => None,
            };

            let start = self.order.len();
            let child = self.branch(
                ast,
                id,
                body,
                ScopeType::Cte,
                sources.clone(),
                IndexMap::new(),
                ast.alias_column_names(cte),
            );
            self.traverse_scope(ast, child)?;

            if let Some(recursive_scope) = recursive_scope {
                for yielded in self.order[start..].to_vec() {
                    self.scopes[yielded].add_source(alias.clone(), Source::Scope(recursive_scope));
                }
            }
            sources.insert(alias, Source::Scope(child));
            self.scopes[id].cte_scopes.push(child);
        }

        self.scopes[id].sources.extend(sources);
        Ok(())
    }

    fn traverse_tables(&mut self, ast: &Ast, id: ScopeId) -> Result<()> {
        let expression = self.scopes[id].expression;
        let mut sources: IndexMap<String, Source> = IndexMap::new();

        let mut expressions: Vec<ExprId> = Vec::new();
        if let Some(from) = ast.get(expression, ArgKey::From) {
            expressions.extend_from_slice(ast.list(from, ArgKey::Expressions));
        }
        for join in ast.list(expression, ArgKey::Joins) {
            expressions.extend(ast.get(*join, ArgKey::This));
        }
        expressions.extend_from_slice(ast.list(expression, ArgKey::Laterals));

        for source in expressions {
            if ast.is(source, Kind::Table) {
                let table_name = ast.name(source).to_string();
                let source_name = ast.alias_or_name(source);
                if let Some(parent_source) = self.scopes[id].sources.get(&table_name) {
                    // A reference to an enclosing source such as a CTE
                    sources.insert(source_name, *parent_source);
                } else if sources.contains_key(&source_name) {
                    let taken: HashSet<String> = sources.keys().cloned().collect();
                    sources.insert(find_new_name(&taken, &table_name), Source::Table(source));
                } else {
                    sources.insert(source_name, Source::Table(source));
                }
                continue;
            }

            let (scope_type, lateral_sources) = if ast.kind(source).is_udtf() {
                (ScopeType::Udtf, sources.clone())
            } else {
                (ScopeType::DerivedTable, IndexMap::new())
            };
            let child = self.branch(
                ast,
                id,
                source,
                scope_type,
                IndexMap::new(),
                lateral_sources,
                ast.alias_column_names(source),
            );
            self.traverse_scope(ast, child)?;

            sources.insert(ast.alias(source).to_string(), Source::Scope(child));
            let scope = &mut self.scopes[id];
            if scope_type == ScopeType::Udtf {
                scope.udtf_scopes.push(child);
            } else {
                scope.derived_table_scopes.push(child);
            }
            scope.table_scopes.push(child);
        }

        self.scopes[id].sources.extend(sources);
        Ok(())
    }

    fn traverse_subqueries(&mut self, ast: &Ast, id: ScopeId) -> Result<()> {
        for subquery in self.subqueries(ast, id) {
            let child = self.branch(
                ast,
                id,
                subquery,
                ScopeType::Subquery,
                IndexMap::new(),
                IndexMap::new(),
                Vec::new(),
            );
            self.traverse_scope(ast, child)?;
            self.scopes[id].subquery_scopes.push(child);
        }
        Ok(())
    }
}

/// Whether a derived table sits in FROM or JOIN
fn is_table_position(ast: &Ast, id: ExprId) -> bool {
    ast.parent(id)
        .is_some_and(|p| matches!(ast.kind(p), Kind::From | Kind::Join))
}

/// Nodes that open a child scope
fn starts_scope(ast: &Ast, id: ExprId) -> bool {
    let kind = ast.kind(id);
    kind == Kind::Cte || kind == Kind::Subquery || kind.is_udtf() || kind.is_query()
}

/// Build every scope of the query rooted at the tree's root.
///
/// ```
/// use polyglot_optimizer::parser::parse_one;
/// use polyglot_optimizer::scope::traverse_scope;
///
/// let ast = parse_one("SELECT a FROM (SELECT a FROM x) AS y").unwrap();
/// let tree = traverse_scope(&ast).unwrap();
/// let order = tree.order();
/// assert_eq!(ast.sql(tree.expression(order[0])), "SELECT a FROM x");
/// assert_eq!(tree.scope(order[1]).sources.keys().collect::<Vec<_>>(), vec!["y"]);
/// ```
pub fn traverse_scope(ast: &Ast) -> Result<ScopeTree> {
    traverse_scope_at(ast, ast.root())
}

/// Build the scopes of the query at `expression`
pub fn traverse_scope_at(ast: &Ast, expression: ExprId) -> Result<ScopeTree> {
    let mut tree = ScopeTree::default();
    let root = tree.push_scope(Scope::new(
        expression,
        ScopeType::Root,
        IndexMap::new(),
        IndexMap::new(),
        Vec::new(),
        None,
    ));
    tree.traverse_scope(ast, root)?;
    Ok(tree)
}

/// Build the scope tree and return it with the id of the root scope
pub fn build_scope(ast: &Ast) -> Result<(ScopeTree, ScopeId)> {
    let tree = traverse_scope(ast)?;
    let root = tree
        .root()
        .ok_or_else(|| Error::optimize("Query has no scope"))?;
    Ok((tree, root))
}

/// Nodes under `expression`, `expression` included, without entering nodes
/// that open a child scope (those nodes themselves are still listed)
pub fn walk_in_scope(ast: &Ast, expression: ExprId, bfs: bool) -> Vec<ExprId> {
    let prune = move |ast: &Ast, node: ExprId| node != expression && starts_scope(ast, node);
    if bfs {
        BfsIter::new(ast, expression).with_prune(prune).collect()
    } else {
        DfsIter::new(ast, expression).with_prune(prune).collect()
    }
}

pub fn find_in_scope(
    ast: &Ast,
    expression: ExprId,
    predicate: impl Fn(&Ast, ExprId) -> bool,
    bfs: bool,
) -> Option<ExprId> {
    walk_in_scope(ast, expression, bfs)
        .into_iter()
        .find(|n| predicate(ast, *n))
}

pub fn find_all_in_scope(
    ast: &Ast,
    expression: ExprId,
    predicate: impl Fn(&Ast, ExprId) -> bool,
    bfs: bool,
) -> Vec<ExprId> {
    walk_in_scope(ast, expression, bfs)
        .into_iter()
        .filter(|n| predicate(ast, *n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn build(sql: &str) -> (Ast, ScopeTree, ScopeId) {
        let ast = parse_one(sql).unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        (ast, tree, root)
    }

    #[test]
    fn test_simple_select_scope() {
        let (ast, tree, root) = build("SELECT a, b FROM t");
        let scope = tree.scope(root);

        assert!(scope.is_root());
        assert!(scope.sources.contains_key("t"));
        assert_eq!(tree.columns(&ast, root).unwrap().len(), 2);
    }

    #[test]
    fn test_derived_table_scope() {
        let (ast, tree, root) = build("SELECT x.a FROM (SELECT a FROM t) AS x");

        assert!(tree.scope(root).sources.contains_key("x"));
        assert_eq!(tree.scope(root).derived_table_scopes.len(), 1);

        let derived = tree.scope(root).derived_table_scopes[0];
        assert!(tree.scope(derived).is_derived_table());
        assert!(tree.scope(derived).sources.contains_key("t"));
        assert_eq!(ast.sql(tree.expression(derived)), "SELECT a FROM t");
    }

    #[test]
    fn test_non_correlated_subquery() {
        let (ast, tree, root) = build("SELECT * FROM t WHERE EXISTS(SELECT s.b FROM s)");
        let subquery = tree.scope(root).subquery_scopes[0];

        assert!(tree.scope(subquery).is_subquery());
        assert!(tree.scope(subquery).sources.contains_key("s"));
        assert!(tree.external_columns(&ast, subquery).unwrap().is_empty());
        assert!(!tree.is_correlated_subquery(&ast, subquery).unwrap());
    }

    #[test]
    fn test_unqualified_subquery_column_is_external() {
        // Before column qualification nothing ties `b` to `s`
        let (ast, tree, root) = build("SELECT * FROM t WHERE EXISTS(SELECT b FROM s)");
        let subquery = tree.scope(root).subquery_scopes[0];

        let external: Vec<String> = tree
            .external_columns(&ast, subquery)
            .unwrap()
            .iter()
            .map(|c| ast.sql(*c))
            .collect();
        assert_eq!(external, vec!["b"]);
    }

    #[test]
    fn test_correlated_subquery() {
        let (ast, tree, root) = build("SELECT * FROM t WHERE EXISTS(SELECT s.b FROM s WHERE s.x = t.y)");
        let subquery = tree.scope(root).subquery_scopes[0];

        let external = tree.external_columns(&ast, subquery).unwrap();
        assert_eq!(external.len(), 1);
        assert_eq!(ast.sql(external[0]), "t.y");
        assert!(tree.is_correlated_subquery(&ast, subquery).unwrap());

        // The outer scope sees the correlated reference as one of its columns
        let columns: Vec<String> = tree
            .columns(&ast, root)
            .unwrap()
            .iter()
            .map(|c| ast.sql(*c))
            .collect();
        assert_eq!(columns, vec!["t.y"]);
    }

    #[test]
    fn test_cte_scope() {
        let (_, tree, root) = build("WITH cte AS (SELECT a FROM t) SELECT * FROM cte");

        assert_eq!(tree.scope(root).cte_scopes.len(), 1);
        assert!(tree.cte_sources(root).contains_key("cte"));
        let cte = tree.scope(root).cte_scopes[0];
        assert!(tree.scope(cte).is_cte());
        assert_eq!(tree.scope(root).sources.get("cte"), Some(&Source::Scope(cte)));
    }

    #[test]
    fn test_later_cte_sees_earlier_one() {
        let (_, tree, root) = build("WITH a AS (SELECT 1 AS x), b AS (SELECT x FROM a) SELECT * FROM b");
        let ctes = &tree.scope(root).cte_scopes;

        assert!(!tree.scope(ctes[0]).sources.contains_key("b"));
        assert_eq!(tree.scope(ctes[1]).sources.get("a"), Some(&Source::Scope(ctes[0])));
    }

    #[test]
    fn test_union_scopes() {
        let (ast, tree, root) = build("SELECT a FROM x UNION ALL SELECT a FROM y");
        let branches = &tree.scope(root).union_scopes;

        assert_eq!(branches.len(), 2);
        assert!(tree.scope(branches[0]).is_union());
        assert_eq!(ast.sql(tree.expression(branches[1])), "SELECT a FROM y");
        assert_eq!(tree.order(), &[branches[0], branches[1], root]);
    }

    #[test]
    fn test_duplicate_alias() {
        let (ast, tree, root) = build("SELECT 1 FROM x AS a JOIN y AS a ON TRUE");
        let err = tree.selected_sources(&ast, root).unwrap_err();
        assert_eq!(err.to_string(), "Optimize error: Alias already used: a");
    }

    #[test]
    fn test_same_table_twice_gets_new_name() {
        let (_, tree, root) = build("SELECT 1 FROM x, x");
        let names: Vec<&String> = tree.scope(root).sources.keys().collect();
        assert_eq!(names, vec!["x", "x_2"]);
    }

    #[test]
    fn test_lateral_sources() {
        let (_, tree, root) = build("SELECT c FROM x LATERAL VIEW EXPLODE(x.arr) t AS c");
        let udtf = tree.scope(root).udtf_scopes[0];

        assert!(tree.scope(udtf).is_udtf());
        assert!(tree.scope(udtf).lateral_sources.contains_key("x"));
        assert!(tree.scope(udtf).sources.contains_key("x"));
        assert_eq!(tree.scope(udtf).outer_column_list, vec!["c"]);
    }

    #[test]
    fn test_order_by_alias_is_not_a_column() {
        let (ast, tree, root) = build("SELECT a AS b FROM x ORDER BY b, x.b, c");
        let columns: Vec<String> = tree
            .columns(&ast, root)
            .unwrap()
            .iter()
            .map(|c| ast.sql(*c))
            .collect();
        assert_eq!(columns, vec!["a", "x.b", "c"]);
    }

    #[test]
    fn test_source_management() {
        let (_, mut tree, root) = build("SELECT * FROM t");
        let table = *tree.scope(root).sources.get("t").unwrap();

        tree.scope_mut(root).rename_source("t", "u");
        assert_eq!(tree.scope(root).sources.get("u"), Some(&table));
        tree.scope_mut(root).remove_source("u");
        assert!(tree.scope(root).sources.is_empty());
    }

    #[test]
    fn test_ref_count() {
        let (ast, tree, root) =
            build("WITH c AS (SELECT 1 AS a) SELECT * FROM c AS c1 JOIN c AS c2 ON TRUE");
        let cte = tree.scope(root).cte_scopes[0];
        let counts = tree.ref_count(&ast, root).unwrap();
        assert_eq!(counts.get(&Source::Scope(cte)), Some(&2));
    }

    #[test]
    fn test_find_in_scope_stops_at_subqueries() {
        let ast = parse_one("SELECT a FROM x WHERE a IN (SELECT b FROM y)").unwrap();
        let columns = find_all_in_scope(&ast, ast.root(), |ast, n| ast.is(n, Kind::Column), false);
        let names: Vec<&str> = columns.iter().map(|c| ast.name(*c)).collect();
        assert_eq!(names, vec!["a", "a"]);
        assert!(find_in_scope(&ast, ast.root(), |ast, n| ast.is(n, Kind::Table) && ast.name(n) == "y", true).is_none());
    }

    #[test]
    fn test_unexpected_root() {
        let ast = crate::parser::Parser::parse_expression_sql("a + 1").unwrap();
        assert!(traverse_scope(&ast).is_err());
    }
}
