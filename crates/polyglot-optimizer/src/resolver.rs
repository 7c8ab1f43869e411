//! Column Resolver Module
//!
//! Finds which source of a scope an unqualified column belongs to, using
//! schema information for base tables and projection names for nested
//! scopes.

use crate::error::{Error, Result};
use crate::expressions::Ast;
use crate::schema::{table_path, Schema, SchemaError};
use crate::scope::{ScopeId, ScopeTree, Source};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Helper for resolving columns to their source tables.
///
/// Results are cached per source, so a resolver should not outlive edits
/// that change the sources of its scope.
pub struct Resolver<'a> {
    tree: &'a ScopeTree,
    scope: ScopeId,
    schema: &'a dyn Schema,
    infer_schema: bool,
    source_columns_cache: HashMap<(String, bool), Vec<String>>,
    all_source_columns: Option<IndexMap<String, Vec<String>>>,
    unambiguous_columns: Option<HashMap<String, String>>,
}

impl<'a> Resolver<'a> {
    pub fn new(tree: &'a ScopeTree, scope: ScopeId, schema: &'a dyn Schema, infer_schema: bool) -> Self {
        Self {
            tree,
            scope,
            schema,
            infer_schema,
            source_columns_cache: HashMap::new(),
            all_source_columns: None,
            unambiguous_columns: None,
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Name of the source that provides `column_name`.
    ///
    /// A column found in exactly one source resolves to it. Otherwise, when
    /// schema inference is on and exactly one source has unknown columns,
    /// that source is assumed.
    pub fn get_table(&mut self, ast: &Ast, column_name: &str) -> Result<Option<String>> {
        if self.unambiguous_columns.is_none() {
            let all = self.all_source_columns(ast)?.clone();
            self.unambiguous_columns = Some(unambiguous_columns(&all));
        }
        if let Some(table) = self
            .unambiguous_columns
            .as_ref()
            .and_then(|columns| columns.get(column_name))
        {
            return Ok(Some(table.clone()));
        }

        if self.infer_schema {
            let without_schema: Vec<&String> = self
                .all_source_columns(ast)?
                .iter()
                .filter(|(_, columns)| columns.is_empty() || columns.iter().any(|c| c == "*"))
                .map(|(name, _)| name)
                .collect();
            if let [only] = without_schema.as_slice() {
                return Ok(Some((*only).clone()));
            }
        }

        Ok(None)
    }

    /// Every column name provided by any source of the scope
    pub fn all_columns(&mut self, ast: &Ast) -> Result<HashSet<String>> {
        Ok(self
            .all_source_columns(ast)?
            .values()
            .flatten()
            .cloned()
            .collect())
    }

    /// Column names a source of the scope provides.
    ///
    /// Base tables read the schema (an unknown table has no known columns),
    /// table functions use their declared column aliases and nested queries
    /// use their output names. Column aliases declared where the source is
    /// selected (`AS t(a, b)`) override positionally.
    pub fn get_source_columns(
        &mut self,
        ast: &Ast,
        name: &str,
        only_visible: bool,
    ) -> Result<Vec<String>> {
        let key = (name.to_string(), only_visible);
        if let Some(columns) = self.source_columns_cache.get(&key) {
            return Ok(columns.clone());
        }

        let scope = self.tree.scope(self.scope);
        let source = scope
            .sources
            .get(name)
            .ok_or_else(|| Error::optimize(format!("Unknown table: {name}")))?;

        let mut columns = match source {
            Source::Table(table) => {
                match self.schema.column_names(&table_path(ast, *table), only_visible) {
                    Ok(columns) => columns,
                    Err(SchemaError::TableNotFound(_)) => Vec::new(),
                    Err(err) => return Err(err.into()),
                }
            }
            Source::Scope(child) => {
                let expression = self.tree.expression(*child);
                let columns = if ast.kind(expression).is_udtf() {
                    ast.alias_column_names(expression)
                } else {
                    ast.named_selects(expression)
                };
                let declared = &self.tree.scope(*child).outer_column_list;
                if declared.is_empty() {
                    columns
                } else {
                    override_names(columns, declared.clone())
                }
            }
        };

        let selected = self.tree.selected_sources(ast, self.scope)?;
        if let Some((node, _)) = selected.get(name) {
            let aliases = ast.alias_column_names(*node);
            if !aliases.is_empty() {
                columns = override_names(columns, aliases);
            }
        }

        self.source_columns_cache.insert(key, columns.clone());
        Ok(columns)
    }

    /// Columns of every selected and lateral source, in source order
    fn all_source_columns(&mut self, ast: &Ast) -> Result<&IndexMap<String, Vec<String>>> {
        if self.all_source_columns.is_none() {
            let scope = self.tree.scope(self.scope);
            let mut names: Vec<String> = self
                .tree
                .selected_sources(ast, self.scope)?
                .keys()
                .cloned()
                .collect();
            names.extend(scope.lateral_sources.keys().cloned());

            let mut all = IndexMap::new();
            for name in names {
                let columns = self.get_source_columns(ast, &name, false)?;
                all.insert(name, columns);
            }
            self.all_source_columns = Some(all);
        }
        Ok(self.all_source_columns.get_or_insert_with(IndexMap::new))
    }
}

/// `aliases` replace `columns` position by position; extra entries of
/// either list are kept
fn override_names(columns: Vec<String>, aliases: Vec<String>) -> Vec<String> {
    let len = columns.len().max(aliases.len());
    (0..len)
        .map(|i| match (aliases.get(i), columns.get(i)) {
            (Some(alias), _) if !alias.is_empty() => alias.clone(),
            (_, Some(column)) => column.clone(),
            (Some(alias), None) => alias.clone(),
            (None, None) => String::new(),
        })
        .collect()
}

/// Columns that appear in exactly one source, mapped to that source
fn unambiguous_columns(source_columns: &IndexMap<String, Vec<String>>) -> HashMap<String, String> {
    let mut result: HashMap<String, String> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (table, columns) in source_columns {
        let unique: HashSet<&str> = columns.iter().map(String::as_str).collect();
        for column in &unique {
            if seen.contains(column) {
                result.remove(*column);
            } else {
                result.insert((*column).to_string(), table.clone());
            }
        }
        seen.extend(unique);
    }

    result
}

/// Whether `column_name` is provided by more than one source of the scope
pub fn is_column_ambiguous(
    ast: &Ast,
    tree: &ScopeTree,
    scope: ScopeId,
    schema: &dyn Schema,
    column_name: &str,
) -> Result<bool> {
    let mut resolver = Resolver::new(tree, scope, schema, false);
    let count = resolver
        .all_source_columns(ast)?
        .values()
        .filter(|columns| columns.iter().any(|c| c == column_name))
        .count();
    Ok(count > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;
    use crate::schema::MappingSchema;
    use crate::scope::build_scope;

    fn create_test_schema() -> MappingSchema {
        MappingSchema::new()
            .with_table("x", &[("a", "INT"), ("b", "INT")])
            .unwrap()
            .with_table("y", &[("b", "INT"), ("c", "INT")])
            .unwrap()
    }

    #[test]
    fn test_resolver_basic() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT a FROM x").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(resolver.get_table(&ast, "a").unwrap(), Some("x".to_string()));
        assert_eq!(
            resolver.get_source_columns(&ast, "x", false).unwrap(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_resolver_ambiguous_column() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT b FROM x JOIN y ON x.a = y.c").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(resolver.get_table(&ast, "b").unwrap(), None);
        assert_eq!(resolver.get_table(&ast, "c").unwrap(), Some("y".to_string()));
        assert!(is_column_ambiguous(&ast, &tree, root, &schema, "b").unwrap());
        assert!(!is_column_ambiguous(&ast, &tree, root, &schema, "a").unwrap());
    }

    #[test]
    fn test_resolver_with_alias() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT a FROM x AS t").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(resolver.get_table(&ast, "a").unwrap(), Some("t".to_string()));
    }

    #[test]
    fn test_infer_single_source_without_schema() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT z FROM x JOIN unknown_table ON TRUE").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();

        let mut resolver = Resolver::new(&tree, root, &schema, true);
        assert_eq!(
            resolver.get_table(&ast, "z").unwrap(),
            Some("unknown_table".to_string())
        );

        let mut strict = Resolver::new(&tree, root, &schema, false);
        assert_eq!(strict.get_table(&ast, "z").unwrap(), None);
    }

    #[test]
    fn test_derived_table_columns() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT * FROM (SELECT a, b AS bb FROM x) AS s").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(
            resolver.get_source_columns(&ast, "s", false).unwrap(),
            vec!["a", "bb"]
        );
    }

    #[test]
    fn test_alias_column_list_overrides_names() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT * FROM (SELECT a, b FROM x) AS s(p)").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(
            resolver.get_source_columns(&ast, "s", false).unwrap(),
            vec!["p", "b"]
        );
    }

    #[test]
    fn test_values_columns() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT * FROM (VALUES (1, 2)) AS v(p, q)").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(
            resolver.get_source_columns(&ast, "v", false).unwrap(),
            vec!["p", "q"]
        );
    }

    #[test]
    fn test_all_columns() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT 1 FROM x, y").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        let all = resolver.all_columns(&ast).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains("c"));
    }

    #[test]
    fn test_unknown_source() {
        let schema = create_test_schema();
        let ast = parse_one("SELECT 1 FROM x").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        let err = resolver.get_source_columns(&ast, "nope", false).unwrap_err();
        assert_eq!(err.to_string(), "Optimize error: Unknown table: nope");
    }

    #[test]
    fn test_cte_projected_alias_column() {
        let schema = create_test_schema();
        let ast = parse_one("WITH c(k) AS (SELECT a FROM x) SELECT k FROM c").unwrap();
        let (tree, root) = build_scope(&ast).unwrap();
        let mut resolver = Resolver::new(&tree, root, &schema, true);

        assert_eq!(resolver.get_table(&ast, "k").unwrap(), Some("c".to_string()));
    }
}
