//! Tree traversal utilities for the expression arena.
//!
//! Two iterator types are provided:
//! - [`DfsIter`] -- depth-first (pre-order) traversal using a stack. Visits a node
//!   before its children.
//! - [`BfsIter`] -- breadth-first (level-order) traversal using a queue.
//!
//! Both accept an optional prune predicate: when it returns `true` for a node,
//! the node itself is still yielded but its children are skipped. Scope-aware
//! walks build on this to stop at nested queries.
//!
//! The second half of the module holds node classification helpers shared by
//! the optimizer passes (aggregates, window functions, subqueries).

use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use std::collections::VecDeque;

type Prune<'a> = Box<dyn Fn(&Ast, ExprId) -> bool + 'a>;

/// Depth-first, pre-order iterator over a subtree
pub struct DfsIter<'a> {
    ast: &'a Ast,
    stack: Vec<ExprId>,
    prune: Option<Prune<'a>>,
}

impl<'a> DfsIter<'a> {
    pub fn new(ast: &'a Ast, root: ExprId) -> Self {
        Self {
            ast,
            stack: vec![root],
            prune: None,
        }
    }

    /// Skip the children of nodes matching `prune`
    pub fn with_prune(mut self, prune: impl Fn(&Ast, ExprId) -> bool + 'a) -> Self {
        self.prune = Some(Box::new(prune));
        self
    }
}

impl Iterator for DfsIter<'_> {
    type Item = ExprId;

    fn next(&mut self) -> Option<ExprId> {
        let node = self.stack.pop()?;
        let pruned = self
            .prune
            .as_ref()
            .is_some_and(|prune| prune(self.ast, node));
        if !pruned {
            let mut children = self.ast.children(node);
            children.reverse();
            self.stack.extend(children);
        }
        Some(node)
    }
}

/// Breadth-first iterator over a subtree
pub struct BfsIter<'a> {
    ast: &'a Ast,
    queue: VecDeque<ExprId>,
    prune: Option<Prune<'a>>,
}

impl<'a> BfsIter<'a> {
    pub fn new(ast: &'a Ast, root: ExprId) -> Self {
        Self {
            ast,
            queue: VecDeque::from([root]),
            prune: None,
        }
    }

    /// Skip the children of nodes matching `prune`
    pub fn with_prune(mut self, prune: impl Fn(&Ast, ExprId) -> bool + 'a) -> Self {
        self.prune = Some(Box::new(prune));
        self
    }
}

impl Iterator for BfsIter<'_> {
    type Item = ExprId;

    fn next(&mut self) -> Option<ExprId> {
        let node = self.queue.pop_front()?;
        let pruned = self
            .prune
            .as_ref()
            .is_some_and(|prune| prune(self.ast, node));
        if !pruned {
            self.queue.extend(self.ast.children(node));
        }
        Some(node)
    }
}

/// Aggregate function names
pub const AGGREGATE_FUNCTIONS: &[&str] = &[
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "STDDEV",
    "STDDEV_POP",
    "STDDEV_SAMP",
    "VARIANCE",
    "VAR_POP",
    "VAR_SAMP",
    "ARRAY_AGG",
    "GROUP_CONCAT",
    "STRING_AGG",
    "APPROX_DISTINCT",
    "ANY_VALUE",
    "QUANTILE",
    "APPROX_QUANTILE",
];

pub fn is_function_named(ast: &Ast, id: ExprId, name: &str) -> bool {
    ast.is(id, Kind::Func) && ast.name(id).eq_ignore_ascii_case(name)
}

/// Aggregate call that is not the function of a window
pub fn is_aggregate(ast: &Ast, id: ExprId) -> bool {
    ast.is(id, Kind::Func)
        && AGGREGATE_FUNCTIONS.contains(&ast.name(id))
        && !ast.parent(id).is_some_and(|p| ast.is(p, Kind::Window))
}

pub fn contains_aggregate(ast: &Ast, id: ExprId) -> bool {
    DfsIter::new(ast, id)
        .with_prune(|ast, n| ast.kind(n).is_query() || ast.is(n, Kind::Subquery))
        .any(|n| is_aggregate(ast, n))
}

pub fn contains_window(ast: &Ast, id: ExprId) -> bool {
    ast.find(id, Kind::Window).is_some()
}

/// Whether the subtree holds a nested query
pub fn contains_subquery(ast: &Ast, id: ExprId) -> bool {
    DfsIter::new(ast, id)
        .skip(1)
        .any(|n| ast.kind(n).is_query())
}

/// Nodes whose value can be read as a scalar SQL condition operand
pub fn is_condition_operator(kind: Kind) -> bool {
    kind.is_binary()
        || kind.is_predicate()
        || matches!(
            kind,
            Kind::Not | Kind::Neg | Kind::Func | Kind::Case | Kind::Cast | Kind::Window
        )
}

/// Columns under a node, not descending into nested queries
pub fn columns_in(ast: &Ast, id: ExprId) -> Vec<ExprId> {
    DfsIter::new(ast, id)
        .with_prune(move |ast, n| n != id && ast.kind(n).is_query())
        .filter(|n| ast.is(*n, Kind::Column) && !ast.is_star(*n))
        .collect()
}

/// The operand of a binary node on the side not containing `id`
pub fn other_operand(ast: &Ast, binary: ExprId, id: ExprId) -> Option<ExprId> {
    let left = ast.get(binary, ArgKey::This)?;
    let right = ast.get(binary, ArgKey::Expression)?;
    if DfsIter::new(ast, left).any(|n| n == id) {
        Some(right)
    } else {
        Some(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    #[test]
    fn test_dfs_preorder() {
        let ast = parse_one("SELECT a + b FROM x").unwrap();
        let kinds: Vec<Kind> = DfsIter::new(&ast, ast.root())
            .map(|n| ast.kind(n))
            .filter(|k| matches!(k, Kind::Select | Kind::Add | Kind::Column | Kind::Table))
            .collect();
        assert_eq!(
            kinds,
            vec![Kind::Select, Kind::Add, Kind::Column, Kind::Column, Kind::Table]
        );
    }

    #[test]
    fn test_bfs_level_order() {
        let ast = parse_one("SELECT (a + b) * c FROM x").unwrap();
        let columns: Vec<String> = BfsIter::new(&ast, ast.root())
            .filter(|n| ast.is(*n, Kind::Column))
            .map(|n| ast.name(n).to_string())
            .collect();
        assert_eq!(columns, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_prune_skips_children() {
        let ast = parse_one("SELECT a FROM x WHERE a IN (SELECT b FROM y)").unwrap();
        let root = ast.root();
        let columns: Vec<String> = DfsIter::new(&ast, root)
            .with_prune(move |ast, n| n != root && ast.kind(n).is_query())
            .filter(|n| ast.is(*n, Kind::Column))
            .map(|n| ast.name(n).to_string())
            .collect();
        assert_eq!(columns, vec!["a", "a"]);
    }

    #[test]
    fn test_aggregate_detection() {
        let ast = parse_one("SELECT SUM(a), ROW_NUMBER() OVER (ORDER BY a) FROM x").unwrap();
        let selects = ast.selects(ast.root()).to_vec();
        assert!(contains_aggregate(&ast, selects[0]));
        assert!(!contains_aggregate(&ast, selects[1]));
        assert!(contains_window(&ast, selects[1]));
    }
}
