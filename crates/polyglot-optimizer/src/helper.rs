//! Helper utilities shared by the optimizer passes
//!
//! - Safe sequence access
//! - Fixed-point rewriting
//! - Topological sorting
//! - Fresh name generation

use crate::expressions::{Ast, ExprId};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::hash::Hash;
use thiserror::Error;

/// Returns the value in `seq` at position `index`, or `None` if `index` is out of bounds.
///
/// Negative indexes count from the end.
///
/// ```
/// use polyglot_optimizer::helper::seq_get;
///
/// let v = vec![1, 2, 3];
/// assert_eq!(seq_get(&v, 0), Some(&1));
/// assert_eq!(seq_get(&v, -1), Some(&3));
/// assert_eq!(seq_get(&v, 10), None);
/// ```
pub fn seq_get<T>(seq: &[T], index: isize) -> Option<&T> {
    let len = seq.len() as isize;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        return None;
    }
    seq.get(index as usize)
}

/// Applies `func` to a subtree until its rendered SQL stops changing.
///
/// `func` may return a different node to stand in for the subtree; the
/// last returned node is handed back.
pub fn while_changing<F>(ast: &mut Ast, mut id: ExprId, mut func: F) -> ExprId
where
    F: FnMut(&mut Ast, ExprId) -> ExprId,
{
    loop {
        let before = ast.sql(id);
        id = func(ast, id);
        if ast.sql(id) == before {
            return id;
        }
    }
}

/// Error type for topological sort
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TsortError {
    #[error("Cycle detected in DAG")]
    CycleDetected,
}

/// Sorts a directed acyclic graph in topological order.
///
/// `dag` maps each node to the nodes it depends on. Dependencies come first;
/// otherwise nodes keep their insertion order.
///
/// ```
/// use indexmap::{IndexMap, IndexSet};
/// use polyglot_optimizer::helper::tsort;
///
/// let mut dag = IndexMap::new();
/// dag.insert("a", IndexSet::from(["c"]));
/// dag.insert("b", IndexSet::new());
/// dag.insert("c", IndexSet::new());
///
/// assert_eq!(tsort(&dag).unwrap(), vec!["c", "a", "b"]);
/// ```
pub fn tsort<T>(dag: &IndexMap<T, IndexSet<T>>) -> Result<Vec<T>, TsortError>
where
    T: Clone + Eq + Hash,
{
    fn visit<T: Clone + Eq + Hash>(
        node: &T,
        dag: &IndexMap<T, IndexSet<T>>,
        visiting: &mut HashSet<T>,
        result: &mut IndexSet<T>,
    ) -> Result<(), TsortError> {
        if result.contains(node) {
            return Ok(());
        }
        if !visiting.insert(node.clone()) {
            return Err(TsortError::CycleDetected);
        }
        if let Some(deps) = dag.get(node) {
            for dep in deps {
                visit(dep, dag, visiting, result)?;
            }
        }
        visiting.remove(node);
        result.insert(node.clone());
        Ok(())
    }

    let mut result = IndexSet::new();
    let mut visiting = HashSet::new();
    for node in dag.keys() {
        visit(node, dag, &mut visiting, &mut result)?;
    }
    Ok(result.into_iter().collect())
}

/// Searches for a new name that doesn't conflict with taken names.
///
/// Returns `base` if available, otherwise `base_2`, `base_3`, etc.
///
/// ```
/// use polyglot_optimizer::helper::find_new_name;
/// use std::collections::HashSet;
///
/// let taken = HashSet::from(["col".to_string(), "col_2".to_string()]);
/// assert_eq!(find_new_name(&taken, "col"), "col_3");
/// assert_eq!(find_new_name(&taken, "other"), "other");
/// ```
pub fn find_new_name(taken: &HashSet<String>, base: &str) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }

    let mut i = 2;
    loop {
        let new_name = format!("{}_{}", base, i);
        if !taken.contains(&new_name) {
            return new_name;
        }
        i += 1;
    }
}

/// Creates a name generator that produces sequential names.
///
/// ```
/// use polyglot_optimizer::helper::name_sequence;
///
/// let mut next = name_sequence("_q_");
/// assert_eq!(next(), "_q_0");
/// assert_eq!(next(), "_q_1");
/// ```
pub fn name_sequence(prefix: &str) -> impl FnMut() -> String {
    let prefix = prefix.to_string();
    let mut counter = 0usize;
    move || {
        let name = format!("{}{}", prefix, counter);
        counter += 1;
        name
    }
}

/// Check if a string can be parsed as an integer
pub fn is_int(text: &str) -> bool {
    text.parse::<i64>().is_ok()
}

/// Check if a string can be parsed as a float
pub fn is_float(text: &str) -> bool {
    text.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::expressions::Kind;

    #[test]
    fn test_seq_get() {
        let v = vec!["a", "b"];
        assert_eq!(seq_get(&v, 1), Some(&"b"));
        assert_eq!(seq_get(&v, -2), Some(&"a"));
        assert_eq!(seq_get(&v, -3), None);
    }

    #[test]
    fn test_tsort_keeps_order() {
        let mut dag: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
        dag.insert("x", IndexSet::new());
        dag.insert("z", IndexSet::from(["y"]));
        dag.insert("y", IndexSet::from(["x"]));
        assert_eq!(tsort(&dag).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_tsort_cycle() {
        let mut dag: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
        dag.insert("a", IndexSet::from(["b"]));
        dag.insert("b", IndexSet::from(["a"]));
        assert_eq!(tsort(&dag), Err(TsortError::CycleDetected));
    }

    #[test]
    fn test_while_changing_reaches_fixed_point() {
        let mut ast = Ast::new();
        let a = builder::column(&mut ast, "a", None);
        let inner = builder::paren(&mut ast, a);
        let outer = builder::paren(&mut ast, inner);
        ast.set_root(outer);

        let result = while_changing(&mut ast, outer, |ast, id| {
            if ast.is(id, Kind::Paren) {
                match ast.get(id, crate::expressions::ArgKey::This) {
                    Some(inner) => ast.replace(id, inner),
                    None => id,
                }
            } else {
                id
            }
        });
        assert_eq!(ast.sql(result), "a");
    }

    #[test]
    fn test_name_sequence() {
        let mut next = name_sequence("_u_");
        assert_eq!(next(), "_u_0");
        assert_eq!(next(), "_u_1");
    }

    #[test]
    fn test_is_int_and_float() {
        assert!(is_int("-12"));
        assert!(!is_int("1.5"));
        assert!(is_float("1e3"));
        assert!(!is_float("x"));
    }
}
