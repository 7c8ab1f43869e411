//! Subquery Elimination Module
//!
//! Lifts derived tables and nested CTEs into CTEs on the outermost query.
//! Structurally identical queries share one CTE, and the resulting WITH keeps
//! every CTE after the CTEs it reads from.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::find_new_name;
use crate::scope::{traverse_scope_at, ScopeId, ScopeTree, ScopeType, Source};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Rewrite derived tables as references to CTEs.
///
/// ```
/// use polyglot_optimizer::optimizer::eliminate_subqueries::eliminate_subqueries;
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = parse_one("SELECT a FROM (SELECT * FROM x) AS y").unwrap();
/// let ast = eliminate_subqueries(ast).unwrap();
/// assert_eq!(ast.to_sql(), "WITH y AS (SELECT * FROM x) SELECT a FROM y AS y");
/// ```
pub fn eliminate_subqueries(mut ast: Ast) -> Result<Ast> {
    let query = ast.unwrap_subquery(ast.root());
    if !ast.kind(query).is_query() {
        return Ok(ast);
    }
    let tree = traverse_scope_at(&ast, query)?;
    let Some(root) = tree.root() else {
        return Ok(ast);
    };

    let mut lifter = Lifter {
        tree: &tree,
        taken: HashSet::new(),
        existing: HashMap::new(),
    };

    // Names of root CTEs and of every table are unavailable for new CTEs
    for &cte_scope in &tree.scope(root).cte_scopes {
        if let Some(cte) = cte_node(&ast, tree.expression(cte_scope)) {
            lifter.taken.insert(ast.alias(cte).to_string());
        }
    }
    for scope in tree.traverse(root) {
        for source in tree.scope(scope).sources.values() {
            if let Source::Table(table) = source {
                lifter.taken.insert(ast.name(*table).to_string());
            }
        }
    }

    let recursive = match ast.get(query, ArgKey::With) {
        Some(with) => {
            for &cte in ast.list(with, ArgKey::Expressions) {
                if let Some(body) = ast.get(cte, ArgKey::This) {
                    lifter.existing.insert(ast.sql(body), ast.alias(cte).to_string());
                }
            }
            ast.flag(with, ArgKey::Recursive)
        }
        None => false,
    };

    let mut new_ctes = Vec::new();

    // Derived tables inside an existing CTE must come before that CTE
    for &cte_scope in &tree.scope(root).cte_scopes {
        for scope in tree.traverse(cte_scope) {
            if scope == cte_scope {
                continue;
            }
            new_ctes.extend(lifter.eliminate(&mut ast, scope));
        }
        new_ctes.extend(cte_node(&ast, tree.expression(cte_scope)));
    }

    let root_scope = tree.scope(root);
    let rest: Vec<ScopeId> = root_scope
        .union_scopes
        .iter()
        .chain(&root_scope.subquery_scopes)
        .chain(&root_scope.table_scopes)
        .copied()
        .collect();
    for scope in rest {
        for child in tree.traverse(scope) {
            new_ctes.extend(lifter.eliminate(&mut ast, child));
        }
    }

    if !new_ctes.is_empty() {
        let with = ast.add(Kind::With);
        ast.set_flag(with, ArgKey::Recursive, recursive);
        ast.set_list(with, ArgKey::Expressions, new_ctes);
        ast.set(query, ArgKey::With, Some(with));
    }
    Ok(ast)
}

fn cte_node(ast: &Ast, body: ExprId) -> Option<ExprId> {
    ast.parent(body).filter(|p| ast.is(*p, Kind::Cte))
}

struct Lifter<'a> {
    tree: &'a ScopeTree,
    /// Names already bound to a table or CTE
    taken: HashSet<String>,
    /// Rendered CTE body -> CTE name
    existing: HashMap<String, String>,
}

impl Lifter<'_> {
    fn eliminate(&mut self, ast: &mut Ast, scope: ScopeId) -> Option<ExprId> {
        match self.tree.scope(scope).scope_type {
            ScopeType::DerivedTable => self.eliminate_derived_table(ast, scope),
            ScopeType::Cte => self.eliminate_cte(ast, scope),
            _ => None,
        }
    }

    fn eliminate_derived_table(&mut self, ast: &mut Ast, scope: ScopeId) -> Option<ExprId> {
        let expression = self.tree.expression(scope);
        // The outermost wrapper is what sits in FROM or JOIN
        let mut to_replace = ast.parent(expression)?;
        while let Some(parent) = ast
            .parent(to_replace)
            .filter(|p| matches!(ast.kind(*p), Kind::Subquery | Kind::Paren))
        {
            to_replace = parent;
        }
        let alias = ast.alias(to_replace).to_string();

        let (name, cte) = self.new_cte(ast, scope);
        let alias = if alias.is_empty() { name.clone() } else { alias };
        let table = builder::table(ast, &name, Some(&alias));
        ast.replace(to_replace, table);
        trace!(cte = %name, "lifted derived table into CTE");
        cte
    }

    fn eliminate_cte(&mut self, ast: &mut Ast, scope: ScopeId) -> Option<ExprId> {
        let expression = self.tree.expression(scope);
        let old_cte = cte_node(ast, expression)?;
        let with = ast.parent(old_cte);

        let (name, cte) = self.new_cte(ast, scope);
        ast.detach(old_cte);
        if let Some(with) = with {
            if ast.list(with, ArgKey::Expressions).is_empty() {
                ast.detach(with);
            }
        }

        // Point every reference at the lifted name
        if let Some(parent) = self.tree.scope(scope).parent {
            for child in self.tree.traverse(parent) {
                let Ok(sources) = self.tree.selected_sources(ast, child) else {
                    continue;
                };
                for (table, source) in sources.values() {
                    if *source == Source::Scope(scope) {
                        let alias = ast.alias_or_name(*table);
                        let new_table = builder::table(ast, &name, Some(&alias));
                        ast.replace(*table, new_table);
                    }
                }
            }
        }
        trace!(cte = %name, "lifted nested CTE");
        cte
    }

    /// Name for the lifted query and its new CTE node; no node is created
    /// when a structurally identical CTE already exists
    fn new_cte(&mut self, ast: &mut Ast, scope: ScopeId) -> (String, Option<ExprId>) {
        let expression = self.tree.expression(scope);
        let key = ast.sql(expression);
        let duplicate = self.existing.get(&key).cloned();

        let mut name = ast
            .parent(expression)
            .map(|p| ast.alias(p).to_string())
            .unwrap_or_default();
        if name.is_empty() {
            name = find_new_name(&self.taken, "cte");
        }
        if let Some(duplicate) = &duplicate {
            name = duplicate.clone();
        } else if self.taken.contains(&name) {
            name = find_new_name(&self.taken, &name);
        }
        self.taken.insert(name.clone());

        if duplicate.is_some() {
            return (name, None);
        }
        self.existing.insert(key, name.clone());
        let cte = builder::unary(ast, Kind::Cte, expression);
        let alias = builder::table_alias(ast, &name);
        ast.set(cte, ArgKey::Alias, Some(alias));
        (name, Some(cte))
    }
}
