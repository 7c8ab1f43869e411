//! Rewrites comma-separated FROM lists into explicit CROSS JOINs.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, Kind};

/// `SELECT * FROM x, y` becomes `SELECT * FROM x CROSS JOIN y`.
///
/// The new joins go before any explicit joins so that join conditions keep
/// seeing every comma-listed source.
pub fn expand_multi_table_selects(mut ast: Ast) -> Result<Ast> {
    let root = ast.root();
    for from in ast.find_all(root, Kind::From) {
        let sources = ast.list(from, ArgKey::Expressions).to_vec();
        let (Some(&first), Some(select)) = (sources.first(), ast.parent(from)) else {
            continue;
        };
        if sources.len() == 1 {
            continue;
        }

        ast.set_list(from, ArgKey::Expressions, vec![first]);
        let mut joins: Vec<_> = sources[1..]
            .iter()
            .map(|source| builder::join(&mut ast, *source, None, None, Some("CROSS")))
            .collect();
        joins.extend(ast.list(select, ArgKey::Joins).iter().copied());
        ast.set_list(select, ArgKey::Joins, joins);
    }
    Ok(ast)
}
