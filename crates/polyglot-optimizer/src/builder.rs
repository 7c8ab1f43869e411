//! Node constructors
//!
//! Small helpers for allocating common node shapes inside an [`Ast`] arena.
//! Passes use them instead of assembling argument lists by hand. Every helper
//! returns a detached node; attach it with [`Ast::set`], [`Ast::push`] or
//! [`Ast::replace`].
//!
//! ```
//! use polyglot_optimizer::builder;
//! use polyglot_optimizer::expressions::{Ast, Kind};
//!
//! let mut ast = Ast::new();
//! let a = builder::column(&mut ast, "a", Some("x"));
//! let one = builder::number(&mut ast, "1");
//! let eq = builder::binary(&mut ast, Kind::Eq, a, one);
//! ast.set_root(eq);
//! assert_eq!(ast.to_sql(), "x.a = 1");
//! ```

use crate::expressions::{ArgKey, Ast, DataType, ExprId, Kind};

/// Whether a name can be written without quotes
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Identifier, quoted when the name is not a plain word
pub fn identifier(ast: &mut Ast, name: &str) -> ExprId {
    let quoted = !is_safe_identifier(name);
    quoted_identifier(ast, name, quoted)
}

pub fn quoted_identifier(ast: &mut Ast, name: &str, quoted: bool) -> ExprId {
    let id = ast.add(Kind::Identifier);
    ast.set_text(id, ArgKey::This, name);
    ast.set_flag(id, ArgKey::Quoted, quoted);
    id
}

/// Column reference `[table.]name`
pub fn column(ast: &mut Ast, name: &str, table: Option<&str>) -> ExprId {
    let id = ast.add(Kind::Column);
    let this = identifier(ast, name);
    ast.set(id, ArgKey::This, Some(this));
    if let Some(table) = table {
        let table = identifier(ast, table);
        ast.set(id, ArgKey::Table, Some(table));
    }
    id
}

pub fn star(ast: &mut Ast) -> ExprId {
    ast.add(Kind::Star)
}

/// `table.*`
pub fn table_star(ast: &mut Ast, table: &str) -> ExprId {
    let id = ast.add(Kind::Column);
    let this = star(ast);
    ast.set(id, ArgKey::This, Some(this));
    let table = identifier(ast, table);
    ast.set(id, ArgKey::Table, Some(table));
    id
}

/// Table reference with an optional alias
pub fn table(ast: &mut Ast, name: &str, alias: Option<&str>) -> ExprId {
    let id = ast.add(Kind::Table);
    let this = identifier(ast, name);
    ast.set(id, ArgKey::This, Some(this));
    if let Some(alias) = alias {
        let alias = table_alias(ast, alias);
        ast.set(id, ArgKey::Alias, Some(alias));
    }
    id
}

/// `AS name` for a source
pub fn table_alias(ast: &mut Ast, name: &str) -> ExprId {
    let id = ast.add(Kind::TableAlias);
    let this = identifier(ast, name);
    ast.set(id, ArgKey::This, Some(this));
    id
}

/// `expression AS name`
pub fn alias(ast: &mut Ast, expression: ExprId, name: &str) -> ExprId {
    let id = ast.add(Kind::Alias);
    ast.set(id, ArgKey::This, Some(expression));
    let alias = identifier(ast, name);
    ast.set(id, ArgKey::Alias, Some(alias));
    id
}

pub fn number(ast: &mut Ast, value: &str) -> ExprId {
    let id = ast.add(Kind::Literal);
    ast.set_text(id, ArgKey::This, value);
    id
}

pub fn string(ast: &mut Ast, value: &str) -> ExprId {
    let id = ast.add(Kind::Literal);
    ast.set_text(id, ArgKey::This, value);
    ast.set_flag(id, ArgKey::IsString, true);
    id
}

pub fn boolean(ast: &mut Ast, value: bool) -> ExprId {
    let id = ast.add(Kind::Boolean);
    ast.set_flag(id, ArgKey::This, value);
    id
}

pub fn null(ast: &mut Ast) -> ExprId {
    ast.add(Kind::Null)
}

/// Node with `this` and `expression` operands
pub fn binary(ast: &mut Ast, kind: Kind, left: ExprId, right: ExprId) -> ExprId {
    let id = ast.add(kind);
    ast.set(id, ArgKey::This, Some(left));
    ast.set(id, ArgKey::Expression, Some(right));
    id
}

/// Node with a single `this` operand
pub fn unary(ast: &mut Ast, kind: Kind, this: ExprId) -> ExprId {
    let id = ast.add(kind);
    ast.set(id, ArgKey::This, Some(this));
    id
}

pub fn paren(ast: &mut Ast, this: ExprId) -> ExprId {
    unary(ast, Kind::Paren, this)
}

pub fn not(ast: &mut Ast, this: ExprId) -> ExprId {
    unary(ast, Kind::Not, this)
}

/// Wrap an attached node in a new `kind` node, keeping its slot
pub fn wrap(ast: &mut Ast, id: ExprId, kind: Kind) -> ExprId {
    let wrapper = ast.add(kind);
    ast.replace(id, wrapper);
    ast.set(wrapper, ArgKey::This, Some(id));
    wrapper
}

fn connect(ast: &mut Ast, kind: Kind, operands: Vec<ExprId>) -> Option<ExprId> {
    let wrap_kind = if kind == Kind::And { Kind::Or } else { Kind::And };
    let mut operands = operands.into_iter().map(|operand| {
        if ast.is(operand, wrap_kind) {
            paren(ast, operand)
        } else {
            operand
        }
    });
    let first = operands.next()?;
    let rest: Vec<ExprId> = operands.collect();
    Some(
        rest.into_iter()
            .fold(first, |acc, operand| binary(ast, kind, acc, operand)),
    )
}

/// Left-deep AND chain. OR operands are parenthesized.
pub fn and(ast: &mut Ast, operands: Vec<ExprId>) -> Option<ExprId> {
    connect(ast, Kind::And, operands)
}

/// Left-deep OR chain. AND operands are parenthesized.
pub fn or(ast: &mut Ast, operands: Vec<ExprId>) -> Option<ExprId> {
    connect(ast, Kind::Or, operands)
}

/// Function call; the name is stored upper-cased
pub fn func(ast: &mut Ast, name: &str, args: Vec<ExprId>) -> ExprId {
    let id = ast.add(Kind::Func);
    ast.set_text(id, ArgKey::This, name.to_ascii_uppercase());
    ast.set_list(id, ArgKey::Expressions, args);
    id
}

pub fn cast(ast: &mut Ast, this: ExprId, to: DataType) -> ExprId {
    let id = unary(ast, Kind::Cast, this);
    ast.set_type_arg(id, ArgKey::To, to);
    id
}

/// `(query) [AS alias]`
pub fn subquery(ast: &mut Ast, query: ExprId, alias: Option<&str>) -> ExprId {
    let id = unary(ast, Kind::Subquery, query);
    if let Some(alias) = alias {
        let alias = table_alias(ast, alias);
        ast.set(id, ArgKey::Alias, Some(alias));
    }
    id
}

/// `SELECT projections FROM source`
pub fn select_from(ast: &mut Ast, projections: Vec<ExprId>, source: ExprId) -> ExprId {
    let select = ast.add(Kind::Select);
    ast.set_list(select, ArgKey::Expressions, projections);
    let from = ast.add(Kind::From);
    ast.set_list(from, ArgKey::Expressions, vec![source]);
    ast.set(select, ArgKey::From, Some(from));
    select
}

/// Join node; `side` is LEFT/RIGHT/FULL and `kind` INNER/OUTER/CROSS
pub fn join(
    ast: &mut Ast,
    source: ExprId,
    on: Option<ExprId>,
    side: Option<&str>,
    kind: Option<&str>,
) -> ExprId {
    let id = unary(ast, Kind::Join, source);
    ast.set(id, ArgKey::On, on);
    if let Some(side) = side {
        ast.set_text(id, ArgKey::Side, side);
    }
    if let Some(kind) = kind {
        ast.set_text(id, ArgKey::JoinKind, kind);
    }
    id
}

/// AND `condition` into the clause stored under `key` (WHERE or HAVING)
pub fn add_condition(ast: &mut Ast, select: ExprId, key: ArgKey, condition: ExprId) {
    let clause_kind = if key == ArgKey::Having {
        Kind::Having
    } else {
        Kind::Where
    };
    match ast.get(select, key) {
        Some(clause) => {
            let combined = match ast.get(clause, ArgKey::This) {
                Some(existing) => {
                    ast.detach(existing);
                    and(ast, vec![existing, condition])
                }
                None => Some(condition),
            };
            ast.set(clause, ArgKey::This, combined);
        }
        None => {
            let clause = unary(ast, clause_kind, condition);
            ast.set(select, key, Some(clause));
        }
    }
}

/// AND `condition` into the WHERE of a select
pub fn add_where(ast: &mut Ast, select: ExprId, condition: ExprId) {
    add_condition(ast, select, ArgKey::Where, condition);
}

/// AND `condition` into a join's ON clause. A CROSS join becomes a plain join.
pub fn add_join_condition(ast: &mut Ast, join: ExprId, condition: ExprId) {
    let combined = match ast.get(join, ArgKey::On) {
        Some(existing) => {
            ast.detach(existing);
            and(ast, vec![existing, condition])
        }
        None => Some(condition),
    };
    ast.set(join, ArgKey::On, combined);
    if ast.text(join, ArgKey::JoinKind) == Some("CROSS") {
        ast.remove_arg(join, ArgKey::JoinKind);
    }
}

/// Append a join to a select
pub fn add_join(ast: &mut Ast, select: ExprId, join: ExprId) {
    ast.push(select, ArgKey::Joins, join);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting() {
        let mut ast = Ast::new();
        let plain = identifier(&mut ast, "abc_1");
        let spaced = identifier(&mut ast, "b c");
        assert!(!ast.flag(plain, ArgKey::Quoted));
        assert!(ast.flag(spaced, ArgKey::Quoted));
    }

    #[test]
    fn test_and_wraps_or_operands() {
        let mut ast = Ast::new();
        let a = column(&mut ast, "a", None);
        let b = column(&mut ast, "b", None);
        let c = column(&mut ast, "c", None);
        let or_ = or(&mut ast, vec![a, b]).unwrap();
        let and_ = and(&mut ast, vec![or_, c]).unwrap();
        ast.set_root(and_);
        assert_eq!(ast.to_sql(), "(a OR b) AND c");
    }

    #[test]
    fn test_add_where_combines() {
        let mut ast = Ast::new();
        let x = table(&mut ast, "x", None);
        let a = column(&mut ast, "a", None);
        let select = select_from(&mut ast, vec![a], x);
        ast.set_root(select);

        let c1 = column(&mut ast, "b", None);
        add_where(&mut ast, select, c1);
        let c2 = column(&mut ast, "c", None);
        add_where(&mut ast, select, c2);
        assert_eq!(ast.to_sql(), "SELECT a FROM x WHERE b AND c");
    }

    #[test]
    fn test_wrap_keeps_slot() {
        let mut ast = Ast::new();
        let a = column(&mut ast, "a", None);
        let b = column(&mut ast, "b", None);
        let add = binary(&mut ast, Kind::Add, a, b);
        ast.set_root(add);
        let wrapped = wrap(&mut ast, b, Kind::Neg);
        assert_eq!(ast.parent(wrapped), Some(add));
        assert_eq!(ast.to_sql(), "a + -b");
    }
}
