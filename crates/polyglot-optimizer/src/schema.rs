//! Schema management for SQL queries
//!
//! This module provides:
//! - The [`Schema`] trait the optimizer queries for table columns and types
//! - [`MappingSchema`], an in-memory implementation keyed by `[catalog.][db.]table`
//!
//! Table paths are dotted strings. Unquoted parts are lower-cased unless
//! normalization is disabled; double-quoted parts keep their case. A lookup
//! with fewer parts than the schema depth matches by suffix and fails when more
//! than one table matches.

use crate::expressions::{ArgKey, Ast, DataType, ExprId};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during schema operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Ambiguous table: {table} matches multiple tables: {matches}")]
    AmbiguousTable { table: String, matches: String },

    #[error("Column not found: {column} in table {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("Invalid type for column {column}: {data_type}")]
    InvalidType { column: String, data_type: String },

    #[error("Schema nesting depth mismatch: expected {expected}, got {actual}")]
    DepthMismatch { expected: usize, actual: usize },
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// A column with its type and visibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    /// Invisible columns are left out of `*` expansion
    pub visible: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            visible: true,
        }
    }
}

/// Read-only view of table definitions
pub trait Schema {
    /// Columns of a table in declaration order
    fn columns(&self, table: &str) -> SchemaResult<Vec<ColumnInfo>>;

    /// Check if the schema holds no tables
    fn is_empty(&self) -> bool;

    /// Number of name parts a table path has (`table` = 1, `db.table` = 2, ...)
    fn depth(&self) -> usize;

    fn has_table(&self, table: &str) -> bool {
        self.columns(table).is_ok()
    }

    /// Column names of a table, optionally restricted to visible ones
    fn column_names(&self, table: &str, only_visible: bool) -> SchemaResult<Vec<String>> {
        Ok(self
            .columns(table)?
            .into_iter()
            .filter(|c| !only_visible || c.visible)
            .map(|c| c.name)
            .collect())
    }

    /// Get the type of a column in a table
    fn get_column_type(&self, table: &str, column: &str) -> SchemaResult<DataType> {
        let normalized = column.to_lowercase();
        self.columns(table)?
            .into_iter()
            .find(|c| c.name == column || c.name == normalized)
            .map(|c| c.data_type)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    fn has_column(&self, table: &str, column: &str) -> bool {
        self.get_column_type(table, column).is_ok()
    }
}

/// Dotted path of a table node, `catalog.db.name`, quoting parts that
/// need it so the schema sees them unchanged
pub fn table_path(ast: &Ast, table: ExprId) -> String {
    [ArgKey::Catalog, ArgKey::Db, ArgKey::This]
        .iter()
        .filter_map(|key| ast.get(table, *key))
        .map(|part| {
            let name = ast.name(part);
            if ast.flag(part, ArgKey::Quoted) || name.contains('.') {
                format!("\"{name}\"")
            } else {
                name.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// A mapping-based schema implementation
///
/// Supports nested schemas with different levels:
/// - Level 1: `table`
/// - Level 2: `db.table`
/// - Level 3: `catalog.db.table`
///
/// ```
/// use polyglot_optimizer::schema::{MappingSchema, Schema};
///
/// let schema = MappingSchema::new()
///     .with_table("x", &[("a", "INT"), ("b", "INT")])
///     .unwrap();
/// assert_eq!(schema.column_names("X", false).unwrap(), vec!["a", "b"]);
/// ```
#[derive(Debug, Clone)]
pub struct MappingSchema {
    tables: IndexMap<Vec<String>, IndexMap<String, DataType>>,
    visible: HashMap<Vec<String>, HashSet<String>>,
    normalize: bool,
    depth: usize,
}

impl Default for MappingSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingSchema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self {
            tables: IndexMap::new(),
            visible: HashMap::new(),
            normalize: true,
            depth: 0,
        }
    }

    /// Create a schema with normalization disabled
    pub fn without_normalization(mut self) -> Self {
        self.normalize = false;
        self
    }

    /// Add or update a table; column types are read from SQL type names
    pub fn add_table(&mut self, table: &str, columns: &[(&str, &str)]) -> SchemaResult<()> {
        let typed = columns
            .iter()
            .map(|(name, data_type)| {
                data_type
                    .parse::<DataType>()
                    .map(|dt| (name.to_string(), dt))
                    .map_err(|_| SchemaError::InvalidType {
                        column: name.to_string(),
                        data_type: data_type.to_string(),
                    })
            })
            .collect::<SchemaResult<Vec<_>>>()?;
        self.add_table_types(table, typed)
    }

    /// Add or update a table with already-built column types
    pub fn add_table_types(
        &mut self,
        table: &str,
        columns: Vec<(String, DataType)>,
    ) -> SchemaResult<()> {
        let parts = self.split_path(table);
        if self.depth != 0 && parts.len() != self.depth {
            return Err(SchemaError::DepthMismatch {
                expected: self.depth,
                actual: parts.len(),
            });
        }
        self.depth = parts.len();

        let cols: IndexMap<String, DataType> = columns
            .into_iter()
            .map(|(name, data_type)| (self.normalize_part(&name), data_type))
            .collect();
        self.tables.insert(parts, cols);
        Ok(())
    }

    /// Builder form of [`MappingSchema::add_table`]
    pub fn with_table(mut self, table: &str, columns: &[(&str, &str)]) -> SchemaResult<Self> {
        self.add_table(table, columns)?;
        Ok(self)
    }

    /// Restrict `*` expansion of a table to the given columns
    pub fn set_visible_columns(&mut self, table: &str, columns: &[&str]) {
        let key = self.split_path(table);
        let cols: HashSet<String> = columns.iter().map(|c| self.normalize_part(c)).collect();
        self.visible.insert(key, cols);
    }

    /// Normalize an identifier name; quoted names keep their case
    fn normalize_part(&self, name: &str) -> String {
        let trimmed = name.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
        if self.normalize {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }

    /// Split a dotted path, keeping dots inside double quotes
    fn split_path(&self, table: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for c in table.chars() {
            match c {
                '"' => {
                    quoted = !quoted;
                    current.push(c);
                }
                '.' if !quoted => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        parts.push(current);
        parts.iter().map(|p| self.normalize_part(p)).collect()
    }

    /// Resolve a table path to its stored key
    fn find_table(&self, table: &str) -> SchemaResult<&Vec<String>> {
        let mut parts = self.split_path(table);
        if parts.len() > self.depth {
            parts.drain(..parts.len() - self.depth);
        }

        let matches: Vec<&Vec<String>> = self
            .tables
            .keys()
            .filter(|key| key.ends_with(&parts))
            .collect();

        match matches.as_slice() {
            [] => Err(SchemaError::TableNotFound(table.to_string())),
            [key] => Ok(key),
            _ => Err(SchemaError::AmbiguousTable {
                table: table.to_string(),
                matches: matches.iter().map(|key| key.join(".")).join(", "),
            }),
        }
    }
}

impl Schema for MappingSchema {
    fn columns(&self, table: &str) -> SchemaResult<Vec<ColumnInfo>> {
        let key = self.find_table(table)?;
        let visible = self.visible.get(key);
        Ok(self.tables[key]
            .iter()
            .map(|(name, data_type)| ColumnInfo {
                name: name.clone(),
                data_type: data_type.clone(),
                visible: visible.map_or(true, |v| v.contains(name)),
            })
            .collect())
    }

    fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::TypeKind;

    #[test]
    fn test_empty_schema() {
        let schema = MappingSchema::new();
        assert!(schema.is_empty());
        assert_eq!(schema.depth(), 0);
    }

    #[test]
    fn test_add_table() {
        let mut schema = MappingSchema::new();
        schema
            .add_table("users", &[("id", "INT"), ("name", "VARCHAR(255)")])
            .unwrap();

        assert!(!schema.is_empty());
        assert_eq!(schema.depth(), 1);
        assert!(schema.has_column("users", "id"));
        assert!(schema.has_column("users", "name"));
        assert!(!schema.has_column("users", "email"));
    }

    #[test]
    fn test_qualified_table_names() {
        let schema = MappingSchema::new()
            .with_table("mydb.users", &[("id", "INT")])
            .unwrap();

        assert!(schema.has_column("mydb.users", "id"));
        assert!(schema.has_column("users", "id"));
        assert!(schema.has_column("cat.mydb.users", "id"));
        assert_eq!(schema.depth(), 2);
    }

    #[test]
    fn test_ambiguous_suffix() {
        let schema = MappingSchema::new()
            .with_table("db1.t", &[("id", "INT")])
            .unwrap()
            .with_table("db2.t", &[("id", "INT")])
            .unwrap();

        assert!(matches!(
            schema.columns("t"),
            Err(SchemaError::AmbiguousTable { .. })
        ));
        assert!(schema.has_table("db2.t"));
    }

    #[test]
    fn test_depth_mismatch() {
        let mut schema = MappingSchema::new();
        schema.add_table("a.b", &[("id", "INT")]).unwrap();
        let err = schema.add_table("c", &[("id", "INT")]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DepthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_get_column_type() {
        let schema = MappingSchema::new()
            .with_table("users", &[("id", "INT"), ("name", "VARCHAR(255)")])
            .unwrap();

        let id_type = schema.get_column_type("users", "ID").unwrap();
        assert_eq!(id_type.kind, TypeKind::Int);

        let name_type = schema.get_column_type("users", "name").unwrap();
        assert_eq!(name_type.to_string(), "VARCHAR(255)");
    }

    #[test]
    fn test_invalid_type() {
        let err = MappingSchema::new()
            .with_table("t", &[("a", "NOT_A_TYPE")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidType { .. }));
    }

    #[test]
    fn test_column_order_is_declaration_order() {
        let schema = MappingSchema::new()
            .with_table("t", &[("z", "INT"), ("a", "INT"), ("m", "INT")])
            .unwrap();
        assert_eq!(schema.column_names("t", false).unwrap(), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_quoted_names_keep_case() {
        let schema = MappingSchema::new()
            .with_table("a", &[("b c", "TEXT"), ("\"D e\"", "TEXT")])
            .unwrap();
        assert_eq!(schema.column_names("a", false).unwrap(), vec!["b c", "D e"]);
    }

    #[test]
    fn test_table_not_found() {
        let schema = MappingSchema::new();
        let result = schema.column_names("nonexistent", false);
        assert!(matches!(result, Err(SchemaError::TableNotFound(_))));
    }

    #[test]
    fn test_column_not_found() {
        let schema = MappingSchema::new()
            .with_table("users", &[("id", "INT")])
            .unwrap();
        let result = schema.get_column_type("users", "nonexistent");
        assert!(matches!(result, Err(SchemaError::ColumnNotFound { .. })));
    }

    #[test]
    fn test_normalize_disabled() {
        let schema = MappingSchema::new()
            .without_normalization()
            .with_table("MyTable", &[("Id", "INT")])
            .unwrap();
        assert!(schema.has_table("MyTable"));
        assert!(!schema.has_table("mytable"));
    }

    #[test]
    fn test_visible_columns() {
        let mut schema = MappingSchema::new();
        schema
            .add_table(
                "users",
                &[("id", "INT"), ("name", "VARCHAR"), ("password", "VARCHAR")],
            )
            .unwrap();
        schema.set_visible_columns("users", &["id", "name"]);

        assert_eq!(schema.column_names("users", true).unwrap(), vec!["id", "name"]);
        assert_eq!(schema.column_names("users", false).unwrap().len(), 3);
        assert!(schema.has_column("users", "password"));
    }
}
