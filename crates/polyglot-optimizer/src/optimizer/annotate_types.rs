//! Type Annotation for SQL Expressions
//!
//! This module infers a data type for every node of the tree and stores it
//! on the node. Types come from:
//! - Literal values (strings, numbers, booleans, NULL)
//! - Column references (from the schema, or from the projection a derived
//!   table, CTE or table function exposes)
//! - Function return types
//! - Operator result types (with coercion rules)
//!
//! Anything that cannot be typed becomes UNKNOWN, which propagates through
//! every expression consuming it.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::Result;
use crate::expressions::{ArgKey, Ast, DataType, ExprId, Kind, TypeKind};
use crate::schema::{table_path, Schema};
use crate::scope::{traverse_scope, ScopeId, ScopeTree, Source};

/// Type coercion class for determining result types in binary operations.
///
/// Each class is a chain ordered from narrowest to widest. Coercing two
/// types of the same class yields the wider one; types of different classes
/// do not coerce and the left operand wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeCoercionClass {
    /// CHAR < NCHAR < VARCHAR < NVARCHAR < TEXT
    Text = 0,
    /// TINYINT < SMALLINT < INT < BIGINT < DECIMAL < FLOAT < DOUBLE
    Numeric = 1,
    /// DATE < DATETIME < TIMESTAMP < TIMESTAMPTZ < TIMESTAMPLTZ
    Timelike = 2,
}

const TEXT_CHAIN: &[TypeKind] = &[
    TypeKind::Char,
    TypeKind::NChar,
    TypeKind::VarChar,
    TypeKind::NVarChar,
    TypeKind::Text,
];

const NUMERIC_CHAIN: &[TypeKind] = &[
    TypeKind::TinyInt,
    TypeKind::SmallInt,
    TypeKind::Int,
    TypeKind::BigInt,
    TypeKind::Decimal,
    TypeKind::Float,
    TypeKind::Double,
];

const TIMELIKE_CHAIN: &[TypeKind] = &[
    TypeKind::Date,
    TypeKind::DateTime,
    TypeKind::Timestamp,
    TypeKind::TimestampTz,
    TypeKind::TimestampLtz,
];

impl TypeCoercionClass {
    /// Get the coercion class for a type kind
    pub fn from_kind(kind: TypeKind) -> Option<Self> {
        if TEXT_CHAIN.contains(&kind) {
            Some(TypeCoercionClass::Text)
        } else if NUMERIC_CHAIN.contains(&kind) {
            Some(TypeCoercionClass::Numeric)
        } else if TIMELIKE_CHAIN.contains(&kind) {
            Some(TypeCoercionClass::Timelike)
        } else {
            None
        }
    }

    fn chain(self) -> &'static [TypeKind] {
        match self {
            TypeCoercionClass::Text => TEXT_CHAIN,
            TypeCoercionClass::Numeric => NUMERIC_CHAIN,
            TypeCoercionClass::Timelike => TIMELIKE_CHAIN,
        }
    }

    /// Position of a kind in this class's chain, narrowest first
    fn rank(self, kind: TypeKind) -> Option<usize> {
        self.chain().iter().position(|k| *k == kind)
    }
}

/// How a function's return type is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReturnType {
    Fixed(TypeKind),
    /// Integers widen to BIGINT, floats to DOUBLE
    Sum,
    /// Type of the first argument
    FirstArg,
    /// Coerced type of all arguments
    Coerced,
    /// Coerced type of all arguments but the first (`IF(cond, a, b)`)
    Branches,
    /// Shared textual type of the arguments
    Textual,
    /// ARRAY of the coerced argument types
    ArrayOfArgs,
    /// ARRAY of the first argument's type
    ArrayOfFirstArg,
    /// Element type of the first argument
    Element,
}

static FUNCTION_RETURN_TYPES: Lazy<HashMap<&'static str, ReturnType>> = Lazy::new(|| {
    use ReturnType::*;

    let mut types = HashMap::new();
    let fixed: &[(&[&str], TypeKind)] = &[
        (
            &["COUNT", "APPROX_DISTINCT", "LENGTH", "CHAR_LENGTH"],
            TypeKind::BigInt,
        ),
        (
            &[
                "AVG", "STDDEV", "STDDEV_POP", "STDDEV_SAMP", "VARIANCE", "VARIANCE_POP",
                "VAR_POP", "VAR_SAMP", "LN", "LOG", "EXP", "POW", "POWER", "SQRT", "ROUND",
            ],
            TypeKind::Double,
        ),
        (
            &[
                "LOWER", "UPPER", "TRIM", "LTRIM", "RTRIM", "SUBSTRING", "SUBSTR", "CONCAT_WS",
                "GROUP_CONCAT",
            ],
            TypeKind::VarChar,
        ),
        (&["CURRENT_DATE"], TypeKind::Date),
        (&["CURRENT_TIMESTAMP", "NOW"], TypeKind::Timestamp),
        (&["YEAR", "MONTH", "WEEK", "DAY"], TypeKind::TinyInt),
    ];
    for (names, kind) in fixed {
        for name in *names {
            types.insert(*name, Fixed(*kind));
        }
    }

    types.insert("SUM", Sum);
    for name in ["MIN", "MAX", "ANY_VALUE", "FIRST", "LAST", "ABS"] {
        types.insert(name, FirstArg);
    }
    for name in ["COALESCE", "GREATEST", "LEAST", "IFNULL", "NVL", "NULLIF"] {
        types.insert(name, Coerced);
    }
    types.insert("IF", Branches);
    types.insert("IIF", Branches);
    types.insert("CONCAT", Textual);
    types.insert("ARRAY", ArrayOfArgs);
    types.insert("ARRAY_AGG", ArrayOfFirstArg);
    types.insert("COLLECT_LIST", ArrayOfFirstArg);
    types.insert("EXPLODE", Element);
    types.insert("UNNEST", Element);
    types
});

fn strip_nullable(data_type: &DataType) -> &DataType {
    match data_type.kind {
        TypeKind::Nullable => data_type.nested.first().unwrap_or(data_type),
        _ => data_type,
    }
}

/// Coerce two types along the coercion lattice.
///
/// UNKNOWN wins over everything, a NULL operand takes the other operand's
/// type, and unrelated types resolve to the left one.
///
/// ```
/// use polyglot_optimizer::expressions::{DataType, TypeKind};
/// use polyglot_optimizer::optimizer::annotate_types::coerce;
///
/// let int = DataType::new(TypeKind::Int);
/// let double = DataType::new(TypeKind::Double);
/// assert_eq!(coerce(&int, &double), double);
/// ```
pub fn coerce(left: &DataType, right: &DataType) -> DataType {
    let (left, right) = (strip_nullable(left), strip_nullable(right));
    if left.is(TypeKind::Unknown) || right.is(TypeKind::Unknown) {
        return DataType::unknown();
    }
    if left.is(TypeKind::Null) {
        return right.clone();
    }
    if right.is(TypeKind::Null) {
        return left.clone();
    }
    match TypeCoercionClass::from_kind(left.kind) {
        Some(class) if TypeCoercionClass::from_kind(right.kind) == Some(class) => {
            if class.rank(right.kind) > class.rank(left.kind) {
                right.clone()
            } else {
                left.clone()
            }
        }
        _ => left.clone(),
    }
}

/// Textual result of a concatenation: the wider textual operand, VARCHAR
/// when neither operand is textual
fn textual(left: &DataType, right: &DataType) -> DataType {
    if left.is(TypeKind::Unknown) || right.is(TypeKind::Unknown) {
        return DataType::unknown();
    }
    if left.is(TypeKind::Null) || right.is(TypeKind::Null) {
        return DataType::null();
    }
    match (left.kind.is_text(), right.kind.is_text()) {
        (true, true) => coerce(left, right),
        (true, false) => left.clone(),
        (false, true) => right.clone(),
        (false, false) => TypeKind::VarChar.into(),
    }
}

fn binary_type(kind: Kind, left: &DataType, right: &DataType) -> DataType {
    if kind.is_connector() {
        return match (left.is(TypeKind::Null), right.is(TypeKind::Null)) {
            (true, true) => DataType::null(),
            (true, false) | (false, true) => DataType::nullable(TypeKind::Boolean.into()),
            (false, false) => TypeKind::Boolean.into(),
        };
    }
    if kind.is_predicate() {
        return TypeKind::Boolean.into();
    }
    if kind == Kind::DPipe {
        return textual(left, right);
    }

    let (left, right) = (strip_nullable(left), strip_nullable(right));
    if left.is(TypeKind::Unknown) || right.is(TypeKind::Unknown) {
        return DataType::unknown();
    }
    if left.is(TypeKind::Null) || right.is(TypeKind::Null) {
        return DataType::null();
    }
    if matches!(kind, Kind::Add | Kind::Sub) {
        if left.kind.is_temporal() && right.is(TypeKind::Interval) {
            return left.clone();
        }
        if kind == Kind::Add && left.is(TypeKind::Interval) && right.kind.is_temporal() {
            return right.clone();
        }
    }
    if kind == Kind::Div && left.kind.is_integer() && right.kind.is_integer() {
        return TypeKind::Double.into();
    }
    coerce(left, right)
}

/// Type of a literal from its surface form
fn literal_type(ast: &Ast, id: ExprId) -> DataType {
    if ast.is_string_literal(id) {
        return TypeKind::VarChar.into();
    }
    let text = ast.literal_value(id).unwrap_or_default();
    if text.contains(['.', 'e', 'E']) {
        return TypeKind::Double.into();
    }
    match text.parse::<i64>() {
        Ok(value) if i32::try_from(value).is_ok() => TypeKind::Int.into(),
        Ok(_) => TypeKind::BigInt.into(),
        Err(_) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
            TypeKind::Decimal.into()
        }
        Err(_) => DataType::unknown(),
    }
}

fn sum_type(arg: &DataType) -> DataType {
    let arg = strip_nullable(arg);
    if arg.kind.is_integer() {
        TypeKind::BigInt.into()
    } else if arg.kind.is_float() {
        TypeKind::Double.into()
    } else if matches!(arg.kind, TypeKind::Decimal | TypeKind::Null) {
        arg.clone()
    } else {
        DataType::unknown()
    }
}

fn coerce_all(types: &[DataType]) -> DataType {
    let mut iter = types.iter();
    let Some(first) = iter.next() else {
        return DataType::unknown();
    };
    iter.fold(first.clone(), |acc, t| coerce(&acc, t))
}

fn element_type(data_type: &DataType) -> DataType {
    match data_type.kind {
        TypeKind::Array => data_type.nested.first().cloned().unwrap_or_else(DataType::unknown),
        _ => DataType::unknown(),
    }
}

/// Type annotation state for one tree
pub struct TypeAnnotator<'a> {
    /// Schema for looking up column types
    schema: Option<&'a dyn Schema>,
    /// Scopes of the annotated query, if the root is a query
    tree: Option<ScopeTree>,
    /// Scope each column reference belongs to
    column_scopes: HashMap<ExprId, ScopeId>,
}

impl<'a> TypeAnnotator<'a> {
    pub fn new(schema: Option<&'a dyn Schema>) -> Self {
        Self {
            schema,
            tree: None,
            column_scopes: HashMap::new(),
        }
    }

    /// Annotate every node of the tree
    pub fn annotate(&mut self, ast: &mut Ast) -> Result<()> {
        let root = ast.root();
        let query = ast.unwrap_subquery(root);
        if ast.kind(query).is_query() {
            let tree = traverse_scope(ast)?;
            for &scope in tree.order() {
                for column in tree.collect(ast, scope).raw_columns {
                    self.column_scopes.insert(column, scope);
                }
            }
            self.tree = Some(tree);
        }

        // Reverse pre-order: every child is typed before its parent
        for id in ast.walk(root).into_iter().rev() {
            self.annotate_node(ast, id);
        }
        Ok(())
    }

    /// Type of a node, inferred and stored on first request
    pub fn annotate_node(&mut self, ast: &mut Ast, id: ExprId) -> DataType {
        if let Some(data_type) = ast.data_type(id) {
            return data_type.clone();
        }
        // Guards against a column resolving back into its own projection
        ast.set_data_type(id, DataType::unknown());
        let data_type = self.infer(ast, id);
        ast.set_data_type(id, data_type.clone());
        data_type
    }

    fn child_type(&mut self, ast: &mut Ast, id: ExprId, key: ArgKey) -> DataType {
        match ast.get(id, key) {
            Some(child) => self.annotate_node(ast, child),
            None => DataType::unknown(),
        }
    }

    fn infer(&mut self, ast: &mut Ast, id: ExprId) -> DataType {
        let kind = ast.kind(id);
        match kind {
            Kind::Literal => literal_type(ast, id),
            Kind::Boolean => TypeKind::Boolean.into(),
            Kind::Null => DataType::null(),
            Kind::Column if !ast.is_star(id) => self.column_type(ast, id),
            Kind::Alias | Kind::Paren | Kind::Neg | Kind::Window | Kind::Ordered => {
                self.child_type(ast, id, ArgKey::This)
            }
            Kind::Not | Kind::In | Kind::Between | Kind::Exists => TypeKind::Boolean.into(),
            k if k.is_binary() => {
                let left = self.child_type(ast, id, ArgKey::This);
                let right = self.child_type(ast, id, ArgKey::Expression);
                binary_type(k, &left, &right)
            }
            Kind::Cast => ast
                .type_arg(id, ArgKey::To)
                .cloned()
                .unwrap_or_else(DataType::unknown),
            Kind::Interval => TypeKind::Interval.into(),
            Kind::Case => self.case_type(ast, id),
            Kind::If => self.child_type(ast, id, ArgKey::True),
            Kind::Func => self.function_type(ast, id),
            Kind::Array => {
                let elements = self.list_types(ast, id, ArgKey::Expressions);
                DataType::array(coerce_all(&elements))
            }
            Kind::Subquery => {
                let query = ast.unwrap_subquery(id);
                self.output_type(ast, query, None, 0)
            }
            _ => DataType::unknown(),
        }
    }

    fn list_types(&mut self, ast: &mut Ast, id: ExprId, key: ArgKey) -> Vec<DataType> {
        ast.list(id, key)
            .to_vec()
            .into_iter()
            .map(|child| self.annotate_node(ast, child))
            .collect()
    }

    fn case_type(&mut self, ast: &mut Ast, id: ExprId) -> DataType {
        let mut branches: Vec<DataType> = ast
            .list(id, ArgKey::Ifs)
            .to_vec()
            .into_iter()
            .map(|branch| self.annotate_node(ast, branch))
            .collect();
        if ast.get(id, ArgKey::Default).is_some() {
            branches.push(self.child_type(ast, id, ArgKey::Default));
        }
        coerce_all(&branches)
    }

    fn function_type(&mut self, ast: &mut Ast, id: ExprId) -> DataType {
        let name = ast.text(id, ArgKey::This).unwrap_or_default().to_ascii_uppercase();
        let Some(rule) = FUNCTION_RETURN_TYPES.get(name.as_str()).copied() else {
            trace!(function = %name, "no return type known");
            return DataType::unknown();
        };
        let args = self.list_types(ast, id, ArgKey::Expressions);
        let first = args.first().cloned().unwrap_or_else(DataType::unknown);
        match rule {
            ReturnType::Fixed(kind) => kind.into(),
            ReturnType::Sum => sum_type(&first),
            ReturnType::FirstArg => first,
            ReturnType::Coerced => coerce_all(&args),
            ReturnType::Branches => coerce_all(args.get(1..).unwrap_or_default()),
            ReturnType::Textual => match args.split_first() {
                Some((head, rest)) => rest.iter().fold(textual(head, head), |acc, t| textual(&acc, t)),
                None => TypeKind::VarChar.into(),
            },
            ReturnType::ArrayOfArgs => DataType::array(coerce_all(&args)),
            ReturnType::ArrayOfFirstArg => DataType::array(first),
            ReturnType::Element => element_type(&first),
        }
    }

    fn column_type(&mut self, ast: &mut Ast, column: ExprId) -> DataType {
        let Some(mut scope) = self.column_scopes.get(&column).copied() else {
            return DataType::unknown();
        };
        let Some(tree) = self.tree.as_ref() else {
            return DataType::unknown();
        };
        let table = ast.column_table(column).to_string();
        let name = ast.name(column).to_string();

        if table.is_empty() {
            // An ORDER BY or HAVING reference to an output of the same select
            let expression = tree.expression(scope);
            let in_clause = ast
                .find_ancestor(column, |k| matches!(k, Kind::Order | Kind::Having))
                .is_some();
            if in_clause && ast.is(expression, Kind::Select) {
                if let Some(projection) = ast
                    .selects(expression)
                    .iter()
                    .copied()
                    .find(|p| ast.alias(*p) == name)
                {
                    return self.annotate_node(ast, projection);
                }
            }
            let sources = &tree.scope(scope).sources;
            let only_source = match sources.len() {
                1 => sources.values().next().copied(),
                _ => None,
            };
            return match only_source {
                Some(source) => self.source_column_type(ast, source, &name),
                None => DataType::unknown(),
            };
        }

        // Correlated references resolve in an enclosing scope
        loop {
            let current = tree.scope(scope);
            if let Some(source) = current.sources.get(&table).copied() {
                return self.source_column_type(ast, source, &name);
            }
            match current.parent {
                Some(parent) => scope = parent,
                None => return DataType::unknown(),
            }
        }
    }

    fn source_column_type(&mut self, ast: &mut Ast, source: Source, name: &str) -> DataType {
        match source {
            Source::Table(table) => {
                let Some(schema) = self.schema else {
                    return DataType::unknown();
                };
                schema
                    .get_column_type(&table_path(ast, table), name)
                    .unwrap_or_else(|_| DataType::unknown())
            }
            Source::Scope(scope) => {
                let Some(tree) = self.tree.as_ref() else {
                    return DataType::unknown();
                };
                let expression = tree.expression(scope);
                let column_list = tree.scope(scope).outer_column_list.clone();
                let index = column_list.iter().position(|c| c == name);
                match ast.kind(expression) {
                    Kind::Values => match index {
                        Some(index) => self.values_cell_type(ast, expression, index),
                        None => DataType::unknown(),
                    },
                    Kind::Lateral => self.lateral_type(ast, expression, index),
                    _ => match index {
                        Some(index) => self.output_type(ast, expression, None, index),
                        None => self.output_type(ast, expression, Some(name), 0),
                    },
                }
            }
        }
    }

    /// Type of a query output, picked by name or else by position. Set
    /// operations coerce the matching outputs of both branches.
    fn output_type(&mut self, ast: &mut Ast, query: ExprId, name: Option<&str>, index: usize) -> DataType {
        let query = ast.unwrap_subquery(query);
        if ast.kind(query).is_set_operation() {
            let left = ast.get(query, ArgKey::This);
            let right = ast.get(query, ArgKey::Expression);
            let (Some(left), Some(right)) = (left, right) else {
                return DataType::unknown();
            };
            // Branches match by position; names come from the left branch
            let index = match name {
                Some(name) => {
                    let left_query = ast.unwrap_subquery(left);
                    match ast.named_selects(left_query).iter().position(|n| n == name) {
                        Some(index) => index,
                        None => return DataType::unknown(),
                    }
                }
                None => index,
            };
            let left = self.output_type(ast, left, None, index);
            let right = self.output_type(ast, right, None, index);
            return coerce(&left, &right);
        }
        if !ast.is(query, Kind::Select) {
            return DataType::unknown();
        }
        let projection = match name {
            Some(name) => ast
                .selects(query)
                .iter()
                .copied()
                .find(|p| ast.output_name(*p) == name),
            None => ast.selects(query).get(index).copied(),
        };
        match projection {
            Some(projection) => self.annotate_node(ast, projection),
            None => DataType::unknown(),
        }
    }

    fn values_cell_type(&mut self, ast: &mut Ast, values: ExprId, index: usize) -> DataType {
        let Some(row) = ast.list(values, ArgKey::Expressions).first().copied() else {
            return DataType::unknown();
        };
        let cell = if ast.is(row, Kind::Tuple) {
            ast.list(row, ArgKey::Expressions).get(index).copied()
        } else if index == 0 {
            Some(row)
        } else {
            None
        };
        match cell {
            Some(cell) => self.annotate_node(ast, cell),
            None => DataType::unknown(),
        }
    }

    /// Output column of a table function: the exploded element, with the
    /// position column of POSEXPLODE first
    fn lateral_type(&mut self, ast: &mut Ast, lateral: ExprId, index: Option<usize>) -> DataType {
        let Some(function) = ast.get(lateral, ArgKey::This) else {
            return DataType::unknown();
        };
        let name = ast.text(function, ArgKey::This).unwrap_or_default().to_ascii_uppercase();
        let Some(arg) = ast.list(function, ArgKey::Expressions).first().copied() else {
            return DataType::unknown();
        };
        let element = element_type(&self.annotate_node(ast, arg));
        match (name.as_str(), index) {
            ("POSEXPLODE", Some(0)) => TypeKind::Int.into(),
            ("POSEXPLODE", Some(1)) | ("EXPLODE" | "UNNEST", Some(0)) => element,
            _ => DataType::unknown(),
        }
    }
}

/// Infer the types of every node in the tree.
///
/// ```
/// use polyglot_optimizer::expressions::TypeKind;
/// use polyglot_optimizer::optimizer::annotate_types::annotate_types;
/// use polyglot_optimizer::parser::parse_one;
/// use polyglot_optimizer::schema::MappingSchema;
///
/// let schema = MappingSchema::new()
///     .with_table("x", &[("a", "SMALLINT")])
///     .unwrap();
/// let ast = parse_one("SELECT SUM(x.a) AS s FROM x AS x").unwrap();
/// let ast = annotate_types(ast, Some(&schema)).unwrap();
/// let projection = ast.selects(ast.root())[0];
/// assert!(ast.data_type(projection).unwrap().is(TypeKind::BigInt));
/// ```
pub fn annotate_types(mut ast: Ast, schema: Option<&dyn Schema>) -> Result<Ast> {
    TypeAnnotator::new(schema).annotate(&mut ast)?;
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_one, Parser};
    use crate::schema::MappingSchema;

    fn schema() -> MappingSchema {
        MappingSchema::new()
            .with_table(
                "x",
                &[("a", "SMALLINT"), ("b", "VARCHAR"), ("c", "DOUBLE"), ("d", "DATE")],
            )
            .unwrap()
            .with_table("y", &[("a", "BIGINT"), ("e", "TEXT")])
            .unwrap()
    }

    /// Types of the root select's projections
    fn projection_types(sql: &str) -> Vec<String> {
        let schema = schema();
        let ast = annotate_types(parse_one(sql).unwrap(), Some(&schema)).unwrap();
        let query = ast.root();
        let select = if ast.kind(query).is_set_operation() {
            ast.get(query, ArgKey::This).unwrap()
        } else {
            query
        };
        ast.selects(select)
            .iter()
            .map(|p| ast.data_type(*p).unwrap().to_string())
            .collect()
    }

    fn expression_type(sql: &str) -> String {
        let ast = Parser::parse_expression_sql(sql).unwrap();
        let ast = annotate_types(ast, None).unwrap();
        ast.data_type(ast.root()).unwrap().to_string()
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(expression_type("1"), "INT");
        assert_eq!(expression_type("3000000000"), "BIGINT");
        assert_eq!(expression_type("99999999999999999999"), "DECIMAL");
        assert_eq!(expression_type("1.5"), "DOUBLE");
        assert_eq!(expression_type("1e10"), "DOUBLE");
        assert_eq!(expression_type("'a'"), "VARCHAR");
        assert_eq!(expression_type("TRUE"), "BOOLEAN");
        assert_eq!(expression_type("NULL"), "NULL");
    }

    #[test]
    fn test_null_propagation() {
        let ast = Parser::parse_expression_sql("NULL + 2").unwrap();
        let ast = annotate_types(ast, None).unwrap();
        let root = ast.root();
        let left = ast.get(root, ArgKey::This).unwrap();
        let right = ast.get(root, ArgKey::Expression).unwrap();
        assert!(ast.data_type(left).unwrap().is(TypeKind::Null));
        assert!(ast.data_type(right).unwrap().is(TypeKind::Int));
        assert!(ast.data_type(root).unwrap().is(TypeKind::Null));
    }

    #[test]
    fn test_logical_operations() {
        assert_eq!(expression_type("NULL AND NULL"), "NULL");
        assert_eq!(expression_type("NULL OR TRUE"), "NULLABLE(BOOLEAN)");
        assert_eq!(expression_type("1 = 1 AND TRUE"), "BOOLEAN");
        assert_eq!(expression_type("NOT 1 IN (1, 2)"), "BOOLEAN");
        assert_eq!(expression_type("1 BETWEEN 0 AND 2"), "BOOLEAN");
    }

    #[test]
    fn test_arithmetic_types() {
        assert_eq!(expression_type("1 + 1.5"), "DOUBLE");
        assert_eq!(expression_type("1 * 3000000000"), "BIGINT");
        assert_eq!(expression_type("4 / 2"), "DOUBLE");
        assert_eq!(expression_type("'a' + 1"), "VARCHAR");
    }

    #[test]
    fn test_string_concat_type() {
        assert_eq!(expression_type("'a' || 'b'"), "VARCHAR");
        assert_eq!(expression_type("1 || 2"), "VARCHAR");
        assert_eq!(expression_type("CONCAT('a', 1)"), "VARCHAR");
        assert_eq!(expression_type("'a' || NULL"), "NULL");
    }

    #[test]
    fn test_cast_and_case_types() {
        assert_eq!(expression_type("CAST(1 AS TEXT)"), "TEXT");
        assert_eq!(
            expression_type("CASE WHEN TRUE THEN 1 WHEN FALSE THEN 2.5 ELSE NULL END"),
            "DOUBLE"
        );
        assert_eq!(expression_type("IF(TRUE, 1, 3000000000)"), "BIGINT");
    }

    #[test]
    fn test_function_types() {
        assert_eq!(expression_type("LOWER('A')"), "VARCHAR");
        assert_eq!(expression_type("CURRENT_DATE()"), "DATE");
        assert_eq!(expression_type("COALESCE(NULL, 1, 2.5)"), "DOUBLE");
        assert_eq!(expression_type("ARRAY(1, 2)"), "ARRAY<INT>");
        assert_eq!(expression_type("UNKNOWN_FN(1)"), "UNKNOWN");
        assert_eq!(expression_type("UNKNOWN_FN(1) + 1"), "UNKNOWN");
    }

    #[test]
    fn test_aggregate_return_types() {
        assert_eq!(
            projection_types(
                "SELECT AVG(x.a) AS p, SUM(x.a) AS q, SUM(x.c) AS r, MIN(x.a) AS s, COUNT(*) AS t, ARRAY_AGG(x.b) AS u FROM x AS x"
            ),
            vec!["DOUBLE", "BIGINT", "DOUBLE", "SMALLINT", "BIGINT", "ARRAY<VARCHAR>"]
        );
    }

    #[test]
    fn test_schema_column_types() {
        assert_eq!(
            projection_types("SELECT x.a AS a, x.a + y.a AS b, x.b || y.e AS c FROM x AS x JOIN y AS y ON x.a = y.a"),
            vec!["SMALLINT", "BIGINT", "TEXT"]
        );
    }

    #[test]
    fn test_date_interval_type() {
        assert_eq!(
            projection_types("SELECT x.d + INTERVAL '1' DAY AS d FROM x AS x"),
            vec!["DATE"]
        );
    }

    #[test]
    fn test_derived_table_and_cte_types() {
        assert_eq!(
            projection_types("SELECT y.s AS s FROM (SELECT SUM(x.a) AS s FROM x AS x) AS y"),
            vec!["BIGINT"]
        );
        assert_eq!(
            projection_types("WITH z AS (SELECT x.c AS c FROM x AS x) SELECT z.c + 1 AS c FROM z AS z"),
            vec!["DOUBLE"]
        );
    }

    #[test]
    fn test_set_operation_types() {
        assert_eq!(
            projection_types(
                "SELECT u.a AS a FROM (SELECT x.a AS a FROM x AS x UNION ALL SELECT y.a AS a FROM y AS y) AS u"
            ),
            vec!["BIGINT"]
        );
    }

    #[test]
    fn test_values_types() {
        assert_eq!(
            projection_types("SELECT t.a AS a, t.b AS b FROM (VALUES (1, 'x'), (2, 'y')) AS t(a, b)"),
            vec!["INT", "VARCHAR"]
        );
    }

    #[test]
    fn test_scalar_subquery_and_correlation() {
        assert_eq!(
            projection_types(
                "SELECT (SELECT MAX(y.a) AS m FROM y AS y WHERE y.a = x.a) AS m, x.c AS c FROM x AS x"
            ),
            vec!["BIGINT", "DOUBLE"]
        );
    }

    #[test]
    fn test_unknown_without_schema() {
        let ast = parse_one("SELECT x.a + 1 AS a FROM x AS x").unwrap();
        let ast = annotate_types(ast, None).unwrap();
        let projection = ast.selects(ast.root())[0];
        assert!(ast.data_type(projection).unwrap().is(TypeKind::Unknown));
    }

    #[test]
    fn test_every_node_annotated() {
        let schema = schema();
        let ast = parse_one("SELECT x.a AS a FROM x AS x WHERE x.b = 'z' ORDER BY a").unwrap();
        let ast = annotate_types(ast, Some(&schema)).unwrap();
        let root = ast.root();
        assert!(ast.walk(root).iter().all(|id| ast.data_type(*id).is_some()));
    }

    #[test]
    fn test_type_coercion_class() {
        assert_eq!(
            TypeCoercionClass::from_kind(TypeKind::NVarChar),
            Some(TypeCoercionClass::Text)
        );
        assert_eq!(
            TypeCoercionClass::from_kind(TypeKind::Decimal),
            Some(TypeCoercionClass::Numeric)
        );
        assert_eq!(
            TypeCoercionClass::from_kind(TypeKind::TimestampTz),
            Some(TypeCoercionClass::Timelike)
        );
        assert_eq!(TypeCoercionClass::from_kind(TypeKind::Json), None);
    }

    #[test]
    fn test_coerce() {
        let t = |kind: TypeKind| DataType::new(kind);
        assert_eq!(coerce(&t(TypeKind::Char), &t(TypeKind::Text)), t(TypeKind::Text));
        assert_eq!(coerce(&t(TypeKind::BigInt), &t(TypeKind::Int)), t(TypeKind::BigInt));
        assert_eq!(coerce(&t(TypeKind::Date), &t(TypeKind::Timestamp)), t(TypeKind::Timestamp));
        assert_eq!(coerce(&t(TypeKind::Date), &t(TypeKind::Int)), t(TypeKind::Date));
        assert_eq!(coerce(&t(TypeKind::Int), &t(TypeKind::Unknown)), DataType::unknown());
        assert_eq!(coerce(&t(TypeKind::Null), &t(TypeKind::Int)), t(TypeKind::Int));
    }
}
