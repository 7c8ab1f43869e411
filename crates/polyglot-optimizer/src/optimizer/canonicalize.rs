//! Canonicalization Module
//!
//! This module provides functionality for converting SQL expressions into a
//! standard canonical form. This includes:
//! - Converting string addition to CONCAT
//! - Casting the other side of a DATE comparison to DATE
//! - Removing redundant type casts
//! - Ensuring boolean predicates
//!
//! Every rewrite reads the types stored by `annotate_types`, so that pass
//! must run first.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, DataType, ExprId, Kind, TypeKind};
use tracing::trace;

/// Converts a SQL expression into a standard canonical form.
///
/// ```
/// use polyglot_optimizer::optimizer::annotate_types::annotate_types;
/// use polyglot_optimizer::optimizer::canonicalize::canonicalize;
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = annotate_types(parse_one("SELECT 'a' + 'b' AS c").unwrap(), None).unwrap();
/// let ast = canonicalize(ast).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT CONCAT('a', 'b') AS c");
/// ```
pub fn canonicalize(mut ast: Ast) -> Result<Ast> {
    let root = ast.root();
    // Children first, so parents see canonical operands
    for id in ast.walk(root).into_iter().rev() {
        let id = add_text_to_concat(&mut ast, id);
        coerce_type(&mut ast, id);
        let id = remove_redundant_casts(&mut ast, id);
        ensure_bools(&mut ast, id);
    }
    Ok(ast)
}

fn type_kind(ast: &Ast, id: ExprId) -> Option<TypeKind> {
    ast.data_type(id).map(|t| t.kind)
}

/// `a + b` over text becomes `CONCAT(a, b)`
fn add_text_to_concat(ast: &mut Ast, id: ExprId) -> ExprId {
    if !ast.is(id, Kind::Add) || !type_kind(ast, id).is_some_and(TypeKind::is_text) {
        return id;
    }
    let (Some(left), Some(right)) = (ast.get(id, ArgKey::This), ast.get(id, ArgKey::Expression))
    else {
        return id;
    };
    let data_type = ast.data_type(id).cloned();
    ast.detach(left);
    ast.detach(right);
    let concat = builder::func(ast, "CONCAT", vec![left, right]);
    if let Some(data_type) = data_type {
        ast.set_data_type(concat, data_type);
    }
    trace!("rewrote text addition as CONCAT");
    ast.replace(id, concat)
}

fn coerce_type(ast: &mut Ast, id: ExprId) {
    let kind = ast.kind(id);
    let operands = if kind.is_comparison() {
        (ast.get(id, ArgKey::This), ast.get(id, ArgKey::Expression))
    } else if kind == Kind::Between {
        (ast.get(id, ArgKey::This), ast.get(id, ArgKey::Low))
    } else {
        return;
    };
    if let (Some(left), Some(right)) = operands {
        coerce_date(ast, left, right);
        if kind == Kind::Between {
            if let Some(high) = ast.get(id, ArgKey::High) {
                coerce_date(ast, left, high);
            }
        }
    }
}

/// Cast whichever side is compared against a DATE to DATE
fn coerce_date(ast: &mut Ast, a: ExprId, b: ExprId) {
    for (date, other) in [(a, b), (b, a)] {
        if type_kind(ast, date) != Some(TypeKind::Date) {
            continue;
        }
        let keeps_type = matches!(
            type_kind(ast, other),
            Some(TypeKind::Date | TypeKind::Interval | TypeKind::Null)
        );
        if !keeps_type {
            replace_cast(ast, other, TypeKind::Date);
        }
        return;
    }
}

fn replace_cast(ast: &mut Ast, id: ExprId, to: TypeKind) {
    let cast = builder::wrap(ast, id, Kind::Cast);
    ast.set_type_arg(cast, ArgKey::To, DataType::new(to));
    ast.set_data_type(cast, DataType::new(to));
}

/// `CAST(x AS T)` where `x` already is a `T`
fn remove_redundant_casts(ast: &mut Ast, id: ExprId) -> ExprId {
    if !ast.is(id, Kind::Cast) {
        return id;
    }
    let Some(this) = ast.get(id, ArgKey::This) else {
        return id;
    };
    let to = ast.type_arg(id, ArgKey::To).map(|t| t.kind);
    if to.is_none() || type_kind(ast, this) != to {
        return id;
    }
    trace!("removed redundant cast");
    ast.replace(id, this)
}

/// Integer operands used as conditions become `x <> 0`
fn ensure_bools(ast: &mut Ast, id: ExprId) {
    let kind = ast.kind(id);
    let conditions: Vec<ExprId> = if kind.is_connector() {
        [ArgKey::This, ArgKey::Expression]
            .iter()
            .filter_map(|key| ast.get(id, *key))
            .collect()
    } else if matches!(kind, Kind::Not | Kind::Where | Kind::Having) {
        ast.get(id, ArgKey::This).into_iter().collect()
    } else if kind == Kind::If {
        // A simple CASE compares its operand against each WHEN value
        let simple_case = ast
            .parent(id)
            .is_some_and(|case| ast.get(case, ArgKey::This).is_some());
        if simple_case {
            Vec::new()
        } else {
            ast.get(id, ArgKey::This).into_iter().collect()
        }
    } else {
        Vec::new()
    };

    for condition in conditions {
        if type_kind(ast, condition).is_some_and(TypeKind::is_integer) {
            let neq = builder::wrap(ast, condition, Kind::Neq);
            let zero = builder::number(ast, "0");
            ast.set_data_type(zero, TypeKind::Int.into());
            ast.set(neq, ArgKey::Expression, Some(zero));
            ast.set_data_type(neq, TypeKind::Boolean.into());
        }
    }
}
