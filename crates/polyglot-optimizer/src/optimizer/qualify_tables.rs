//! Table Qualification Module
//!
//! Gives every source of every scope an alias and fills in the default
//! database and catalog of base tables.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::helper::name_sequence;
use crate::scope::{traverse_scope, Source};
use tracing::trace;

/// Options for table qualification
#[derive(Debug, Clone, Default)]
pub struct QualifyTablesOptions {
    /// Database added to tables that have none
    pub db: Option<String>,
    /// Catalog added to tables that have a database but no catalog
    pub catalog: Option<String>,
}

impl QualifyTablesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }
}

/// Rewrite the tree to have fully qualified, aliased tables.
///
/// Derived tables, CTE bodies and `VALUES` without an alias get a generated
/// `_q_{n}` alias. Base tables and CTE references default their alias to
/// the name they are bound under in their scope.
///
/// ```
/// use polyglot_optimizer::optimizer::qualify_tables::{qualify_tables, QualifyTablesOptions};
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = parse_one("SELECT 1 FROM z").unwrap();
/// let options = QualifyTablesOptions::new().with_db("db").with_catalog("c");
/// let ast = qualify_tables(ast, &options).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT 1 FROM c.db.z AS z");
/// ```
pub fn qualify_tables(mut ast: Ast, options: &QualifyTablesOptions) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;
    let mut next_name = name_sequence("_q_");

    for &scope_id in tree.order() {
        let collected = tree.collect(&ast, scope_id);

        let derived_tables: Vec<ExprId> = collected
            .ctes
            .iter()
            .chain(&collected.derived_tables)
            .chain(collected.udtfs.iter().filter(|u| ast.is(**u, Kind::Values)))
            .copied()
            .collect();
        for derived in derived_tables {
            if !ast.alias(derived).is_empty() {
                continue;
            }
            let name = next_name();
            trace!(alias = %name, "aliasing derived table");
            set_alias_name(&mut ast, derived, &name);
        }

        let scope = tree.scope(scope_id);
        for table in collected.tables {
            let name = ast.name(table).to_string();
            let bound = scope
                .sources
                .iter()
                .find(|(_, source)| **source == Source::Table(table))
                .map(|(key, _)| key.clone());
            let is_base_table = bound.is_some();

            if is_base_table {
                qualify_path(&mut ast, table, options);
            }
            if ast.alias(table).is_empty() {
                let alias = bound.unwrap_or(name);
                let alias = builder::table_alias(&mut ast, &alias);
                ast.set(table, ArgKey::Alias, Some(alias));
            }
        }
    }

    Ok(ast)
}

fn qualify_path(ast: &mut Ast, table: ExprId, options: &QualifyTablesOptions) {
    if ast.get(table, ArgKey::Db).is_none() {
        if let Some(db) = &options.db {
            let db = builder::identifier(ast, db);
            ast.set(table, ArgKey::Db, Some(db));
        }
    }
    if ast.get(table, ArgKey::Catalog).is_none() && ast.get(table, ArgKey::Db).is_some() {
        if let Some(catalog) = &options.catalog {
            let catalog = builder::identifier(ast, catalog);
            ast.set(table, ArgKey::Catalog, Some(catalog));
        }
    }
}

/// Set the name of a source alias, creating the alias when missing
fn set_alias_name(ast: &mut Ast, source: ExprId, name: &str) {
    let name = builder::identifier(ast, name);
    match ast.get(source, ArgKey::Alias) {
        Some(alias) if ast.is(alias, Kind::TableAlias) => ast.set(alias, ArgKey::This, Some(name)),
        _ => {
            let alias = ast.add(Kind::TableAlias);
            ast.set(alias, ArgKey::This, Some(name));
            ast.set(source, ArgKey::Alias, Some(alias));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn qualify(sql: &str, options: &QualifyTablesOptions) -> String {
        qualify_tables(parse_one(sql).unwrap(), options).unwrap().to_sql()
    }

    #[test]
    fn test_qualify_with_db() {
        let options = QualifyTablesOptions::new().with_db("db");
        assert_eq!(qualify("SELECT 1 FROM z", &options), "SELECT 1 FROM db.z AS z");
    }

    #[test]
    fn test_catalog_needs_db() {
        let options = QualifyTablesOptions::new().with_catalog("c");
        assert_eq!(qualify("SELECT 1 FROM z", &options), "SELECT 1 FROM z AS z");
        assert_eq!(qualify("SELECT 1 FROM y.z", &options), "SELECT 1 FROM c.y.z AS z");
    }

    #[test]
    fn test_preserve_existing_qualifiers() {
        let options = QualifyTablesOptions::new().with_db("db").with_catalog("c");
        assert_eq!(
            qualify("SELECT 1 FROM x.y.z AS w", &options),
            "SELECT 1 FROM x.y.z AS w"
        );
    }

    #[test]
    fn test_derived_tables_get_generated_aliases() {
        let options = QualifyTablesOptions::new();
        assert_eq!(
            qualify("SELECT 1 FROM (SELECT 1 FROM (SELECT 1 FROM x))", &options),
            "SELECT 1 FROM (SELECT 1 FROM (SELECT 1 FROM x AS x) AS _q_0) AS _q_1"
        );
    }

    #[test]
    fn test_cte_reference_is_not_qualified() {
        let options = QualifyTablesOptions::new().with_db("db");
        assert_eq!(
            qualify("WITH a AS (SELECT 1 FROM z) SELECT 1 FROM a", &options),
            "WITH a AS (SELECT 1 FROM db.z AS z) SELECT 1 FROM a AS a"
        );
    }

    #[test]
    fn test_join_sources() {
        let options = QualifyTablesOptions::new().with_db("db");
        assert_eq!(
            qualify("SELECT 1 FROM x JOIN y ON x.a = y.a", &options),
            "SELECT 1 FROM db.x AS x JOIN db.y AS y ON x.a = y.a"
        );
    }

    #[test]
    fn test_repeated_table_gets_distinct_alias() {
        let options = QualifyTablesOptions::new();
        assert_eq!(
            qualify("SELECT 1 FROM x, x", &options),
            "SELECT 1 FROM x AS x, x AS x_2"
        );
    }

    #[test]
    fn test_values_alias() {
        let options = QualifyTablesOptions::new();
        assert_eq!(
            qualify("SELECT * FROM (VALUES (1, 2))", &options),
            "SELECT * FROM (VALUES (1, 2)) AS _q_0"
        );
    }
}
