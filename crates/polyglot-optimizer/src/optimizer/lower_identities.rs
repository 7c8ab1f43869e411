//! Identifier Lowering Module
//!
//! Lower-cases unquoted identifiers so that name matching in later passes is
//! case-insensitive. Output aliases of the outermost query, and ORDER BY or
//! HAVING references to them, keep their spelling.

use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::traversal::is_aggregate;
use std::collections::HashSet;

/// Convert all unquoted identifiers to lower case.
///
/// ```
/// use polyglot_optimizer::optimizer::lower_identities::lower_identities;
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = parse_one("SELECT Bar.A AS A FROM \"Foo\".Bar").unwrap();
/// let ast = lower_identities(ast).unwrap();
/// assert_eq!(ast.to_sql(), "SELECT bar.a AS A FROM \"Foo\".bar");
/// ```
pub fn lower_identities(mut ast: Ast) -> Result<Ast> {
    let root = ast.root();
    lower_query(&mut ast, root);
    Ok(ast)
}

fn lower_query(ast: &mut Ast, id: ExprId) {
    let mut handled: HashSet<ArgKey> = HashSet::new();

    if ast.is(id, Kind::Select) {
        lower_selects(ast, id);
        handled.insert(ArgKey::Expressions);
    }
    lower_order(ast, id);
    lower_having(ast, id);
    handled.extend([ArgKey::Order, ArgKey::Having]);

    if ast.is(id, Kind::Subquery) {
        if let Some(inner) = ast.get(id, ArgKey::This) {
            lower_query(ast, inner);
        }
        handled.insert(ArgKey::This);
    }
    if ast.kind(id).is_set_operation() {
        for key in [ArgKey::This, ArgKey::Expression] {
            if let Some(branch) = ast.get(id, key) {
                lower_query(ast, branch);
            }
        }
        handled.extend([ArgKey::This, ArgKey::Expression]);
    }

    for child in ast.children(id) {
        let handled_child = ast
            .arg_key_of(child)
            .is_some_and(|key| handled.contains(&key));
        if !handled_child {
            lower_all(ast, child);
        }
    }
}

/// Projections are lowered but their output aliases are left as written
fn lower_selects(ast: &mut Ast, select: ExprId) {
    for projection in ast.list(select, ArgKey::Expressions).to_vec() {
        let target = ast.unalias(projection);
        lower_all(ast, target);
    }
}

fn lower_order(ast: &mut Ast, query: ExprId) {
    let Some(order) = ast.get(query, ArgKey::Order) else {
        return;
    };
    let output_names: HashSet<String> = ast
        .selects(query)
        .iter()
        .filter(|s| ast.is(**s, Kind::Alias))
        .map(|s| ast.alias(*s).to_string())
        .collect();

    for ordered in ast.list(order, ArgKey::Expressions).to_vec() {
        let is_output_reference = ast.get(ordered, ArgKey::This).is_some_and(|this| {
            ast.is(this, Kind::Column)
                && ast.column_table(this).is_empty()
                && output_names.contains(ast.name(this))
        });
        if !is_output_reference {
            lower_all(ast, ordered);
        }
    }
}

/// Only aggregate arguments in HAVING are certain to be source columns
fn lower_having(ast: &mut Ast, query: ExprId) {
    let Some(having) = ast.get(query, ArgKey::Having) else {
        return;
    };
    let aggregates: Vec<ExprId> = ast
        .walk(having)
        .into_iter()
        .filter(|n| is_aggregate(ast, *n))
        .collect();
    for aggregate in aggregates {
        lower_all(ast, aggregate);
    }
}

fn lower_all(ast: &mut Ast, id: ExprId) {
    for node in ast.walk(id) {
        if ast.is(node, Kind::Identifier) && !ast.flag(node, ArgKey::Quoted) {
            let lowered = ast.name(node).to_lowercase();
            ast.set_text(node, ArgKey::This, lowered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn lower(sql: &str) -> String {
        lower_identities(parse_one(sql).unwrap()).unwrap().to_sql()
    }

    #[test]
    fn test_lowers_unquoted() {
        assert_eq!(lower("SELECT A FROM X"), "SELECT a FROM x");
    }

    #[test]
    fn test_keeps_quoted() {
        assert_eq!(lower("SELECT \"A\" FROM \"X\""), "SELECT \"A\" FROM \"X\"");
    }

    #[test]
    fn test_keeps_output_alias() {
        assert_eq!(lower("SELECT A AS B FROM X"), "SELECT a AS B FROM x");
    }

    #[test]
    fn test_order_by_output_reference() {
        assert_eq!(
            lower("SELECT A AS B FROM X ORDER BY B, C"),
            "SELECT a AS B FROM x ORDER BY B, c"
        );
    }

    #[test]
    fn test_having_lowers_aggregates_only() {
        assert_eq!(
            lower("SELECT A AS C FROM X GROUP BY A HAVING SUM(B) > 1 AND C > 1"),
            "SELECT a AS C FROM x GROUP BY a HAVING SUM(b) > 1 AND C > 1"
        );
    }

    #[test]
    fn test_union_branches() {
        assert_eq!(
            lower("SELECT A AS A FROM X UNION SELECT B AS B FROM Y"),
            "SELECT a AS A FROM x UNION SELECT b AS B FROM y"
        );
    }

    #[test]
    fn test_nested_query_lowered_fully() {
        assert_eq!(
            lower("SELECT A FROM (SELECT B AS A FROM X) AS T"),
            "SELECT a FROM (SELECT b AS a FROM x) AS t"
        );
    }
}
