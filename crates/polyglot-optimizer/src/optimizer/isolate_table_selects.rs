//! Isolate Table Selects Optimization Pass
//!
//! Wraps base tables in `(SELECT * FROM t AS t) AS t` when a scope selects
//! from more than one source, so every source of such a scope is a nested
//! query that later passes can merge or push into uniformly.

use crate::builder;
use crate::error::{Error, Result};
use crate::expressions::{ArgKey, Ast, ExprId};
use crate::schema::{table_path, Schema};
use crate::scope::{traverse_scope, Source};
use tracing::trace;

/// Wrap schema-known tables in subqueries in every multi-source scope.
///
/// Tables must be aliased already, see
/// [`qualify_tables`](super::qualify_tables::qualify_tables).
pub fn isolate_table_selects(mut ast: Ast, schema: &dyn Schema) -> Result<Ast> {
    let tree = traverse_scope(&ast)?;

    for &scope in tree.order() {
        let selected = tree.selected_sources(&ast, scope)?;
        if selected.len() <= 1 {
            continue;
        }

        let tables: Vec<ExprId> = selected
            .values()
            .filter_map(|(node, source)| match source {
                Source::Table(_) => Some(*node),
                Source::Scope(_) => None,
            })
            .collect();

        for table in tables {
            let known = schema
                .column_names(&table_path(&ast, table), false)
                .is_ok_and(|columns| !columns.is_empty());
            if !known {
                continue;
            }

            let alias = ast.alias(table).to_string();
            if alias.is_empty() {
                return Err(Error::optimize(
                    "Tables require an alias. Run qualify_tables optimization.",
                ));
            }
            let name = match ast.name(table) {
                "" => alias.clone(),
                name => name.to_string(),
            };

            trace!(table = %name, alias = %alias, "isolating table");
            let inner = ast.copy(table);
            let inner_alias = builder::table_alias(&mut ast, &name);
            ast.set(inner, ArgKey::Alias, Some(inner_alias));
            let star = builder::star(&mut ast);
            let select = builder::select_from(&mut ast, vec![star], inner);
            let subquery = builder::subquery(&mut ast, select, Some(&alias));
            ast.replace(table, subquery);
        }
    }

    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::qualify_tables::{qualify_tables, QualifyTablesOptions};
    use crate::parser::parse_one;
    use crate::schema::MappingSchema;

    fn isolate(sql: &str) -> Result<String> {
        let schema = MappingSchema::new()
            .with_table("x", &[("a", "INT")])
            .unwrap()
            .with_table("y", &[("b", "INT")])
            .unwrap();
        let ast = qualify_tables(parse_one(sql)?, &QualifyTablesOptions::default())?;
        Ok(isolate_table_selects(ast, &schema)?.to_sql())
    }

    #[test]
    fn test_single_source_untouched() {
        assert_eq!(isolate("SELECT * FROM x").unwrap(), "SELECT * FROM x AS x");
    }

    #[test]
    fn test_join_sources_isolated() {
        assert_eq!(
            isolate("SELECT * FROM x JOIN y ON x.a = y.b").unwrap(),
            "SELECT * FROM (SELECT * FROM x AS x) AS x JOIN (SELECT * FROM y AS y) AS y ON x.a = y.b"
        );
    }

    #[test]
    fn test_aliased_table_keeps_outer_alias() {
        assert_eq!(
            isolate("SELECT * FROM x AS t, y").unwrap(),
            "SELECT * FROM (SELECT * FROM x AS x) AS t, (SELECT * FROM y AS y) AS y"
        );
    }

    #[test]
    fn test_unknown_tables_untouched() {
        assert_eq!(
            isolate("SELECT * FROM x, z").unwrap(),
            "SELECT * FROM (SELECT * FROM x AS x) AS x, z AS z"
        );
    }

    #[test]
    fn test_requires_alias() {
        let schema = MappingSchema::new()
            .with_table("x", &[("a", "INT")])
            .unwrap()
            .with_table("y", &[("b", "INT")])
            .unwrap();
        let ast = parse_one("SELECT * FROM x, y").unwrap();
        let err = isolate_table_selects(ast, &schema).unwrap_err();
        assert!(err.to_string().contains("Tables require an alias"));
    }
}
