//! Boolean Normalization Module
//!
//! Converts boolean expressions to Conjunctive Normal Form (CNF) or
//! Disjunctive Normal Form (DNF).
//!
//! CNF: (a OR b) AND (c OR d) - useful for predicate pushdown
//! DNF: (a AND b) OR (c AND d) - useful for partition pruning

use super::simplify::{simplify_expression, uniq_sort};
use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use crate::scope::find_all_in_scope;
use crate::traversal::DfsIter;
use thiserror::Error;
use tracing::trace;

/// Maximum default distance for normalization
pub const DEFAULT_MAX_DISTANCE: usize = 128;

/// Raised internally when distribution would grow past the limit
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Normalization distance {distance} exceeds max {max}")]
    DistanceExceeded { distance: i64, max: usize },
}

/// Rewrite every boolean expression of the tree into CNF (default) or DNF.
///
/// CNF: (x AND y) OR z => (x OR z) AND (y OR z)
/// DNF: (x OR y) AND z => (x AND z) OR (y AND z)
///
/// Expressions whose [`normalization_distance`] is above `max_distance` are
/// simplified but not distributed.
pub fn normalize(mut ast: Ast, dnf: bool, max_distance: usize) -> Result<Ast> {
    let root = ast.root();
    let connectors: Vec<ExprId> = DfsIter::new(&ast, root)
        .with_prune(|ast, n| ast.kind(n).is_connector())
        .filter(|n| ast.kind(*n).is_connector())
        .collect();

    for node in connectors {
        if normalized(&ast, node, dnf) {
            continue;
        }
        let original = ast.copy(node);
        let node = simplify_expression(&mut ast, node);
        if !ast.kind(node).is_connector() || normalized(&ast, node, dnf) {
            continue;
        }

        let distance = normalization_distance(&ast, node, dnf, max_distance);
        if distance > max_distance as i64 {
            trace!(distance, max_distance, "skipping normalization");
            continue;
        }

        if let Err((current, err)) = distribute_until_stable(&mut ast, node, dnf, max_distance) {
            trace!(%err, "reverting normalization");
            ast.replace(current, original);
        }
    }

    Ok(ast)
}

/// Apply the distributive law until the rendered expression stops changing.
/// On failure, returns the node currently holding the expression's slot.
fn distribute_until_stable(
    ast: &mut Ast,
    mut id: ExprId,
    dnf: bool,
    max_distance: usize,
) -> std::result::Result<ExprId, (ExprId, NormalizeError)> {
    loop {
        let before = ast.sql(id);
        id = distributive_law(ast, id, dnf, max_distance).map_err(|err| (id, err))?;
        if ast.sql(id) == before {
            return Ok(id);
        }
    }
}

/// Whether an expression is already in CNF (or DNF when `dnf` is set).
///
/// ```
/// use polyglot_optimizer::optimizer::normalize::normalized;
/// use polyglot_optimizer::parser::Parser;
///
/// let ast = Parser::parse_expression_sql("(a OR b) AND (c OR d)").unwrap();
/// assert!(normalized(&ast, ast.root(), false));
/// assert!(!normalized(&ast, ast.root(), true));
/// ```
pub fn normalized(ast: &Ast, id: ExprId, dnf: bool) -> bool {
    let (ancestor, root) = if dnf {
        (Kind::And, Kind::Or)
    } else {
        (Kind::Or, Kind::And)
    };
    !find_all_in_scope(ast, id, |ast, n| ast.is(n, root), false)
        .into_iter()
        .any(|connector| has_ancestor_within(ast, connector, id, ancestor))
}

fn has_ancestor_within(ast: &Ast, node: ExprId, top: ExprId, kind: Kind) -> bool {
    if node == top {
        return false;
    }
    for ancestor in ast.ancestors(node) {
        if ast.is(ancestor, kind) {
            return true;
        }
        if ancestor == top {
            break;
        }
    }
    false
}

/// Estimated cost of normalizing an expression: the number of operands
/// the distributed form would hold, minus the connectors it has today.
///
/// Counting stops as soon as the estimate passes `max_distance`.
pub fn normalization_distance(ast: &Ast, id: ExprId, dnf: bool, max_distance: usize) -> i64 {
    let max = max_distance as i64;
    let connectors = ast
        .walk(id)
        .into_iter()
        .filter(|n| ast.kind(*n).is_connector())
        .count() as i64;
    let mut total = -(connectors + 1);
    predicate_lengths(ast, id, dnf, max, 0, &mut |length| {
        total += length;
        total <= max
    });
    total
}

/// Feeds the length of every conjunct (or disjunct) of the distributed form
/// to `visit` until it returns false
fn predicate_lengths(
    ast: &Ast,
    id: ExprId,
    dnf: bool,
    max: i64,
    depth: i64,
    visit: &mut dyn FnMut(i64) -> bool,
) -> bool {
    if depth > max {
        return visit(depth);
    }
    let id = ast.unnest(id);
    let kind = ast.kind(id);
    let (Some(left), Some(right)) = (ast.get(id, ArgKey::This), ast.get(id, ArgKey::Expression))
    else {
        return visit(1);
    };
    if !kind.is_connector() {
        return visit(1);
    }

    let depth = depth + 1;
    let product = if dnf { Kind::And } else { Kind::Or };
    if kind == product {
        predicate_lengths(ast, left, dnf, max, depth, &mut |a| {
            predicate_lengths(ast, right, dnf, max, depth, &mut |b| visit(a + b))
        })
    } else {
        predicate_lengths(ast, left, dnf, max, depth, visit)
            && predicate_lengths(ast, right, dnf, max, depth, visit)
    }
}

/// x OR (y AND z) -> (x OR y) AND (x OR z)
/// (x AND y) OR (y AND z) -> (x OR y) AND (x OR z) AND (y OR y) AND (y OR z)
fn distributive_law(
    ast: &mut Ast,
    id: ExprId,
    dnf: bool,
    max_distance: usize,
) -> std::result::Result<ExprId, NormalizeError> {
    if normalized(ast, id, dnf) {
        return Ok(id);
    }
    let distance = normalization_distance(ast, id, dnf, max_distance);
    if distance > max_distance as i64 {
        return Err(NormalizeError::DistanceExceeded {
            distance,
            max: max_distance,
        });
    }

    for child in ast.children(id) {
        distributive_law(ast, child, dnf, max_distance)?;
    }

    let (to, from) = if dnf {
        (Kind::Or, Kind::And)
    } else {
        (Kind::And, Kind::Or)
    };
    if !ast.is(id, from) {
        return Ok(id);
    }
    let (Some(a), Some(b)) = (ast.get(id, ArgKey::This), ast.get(id, ArgKey::Expression)) else {
        return Ok(id);
    };
    let (a, b) = (ast.unnest(a), ast.unnest(b));

    let distributed = match (ast.is(a, to), ast.is(b, to)) {
        (true, true) => {
            if connector_count(ast, a) > connector_count(ast, b) {
                distribute(ast, a, b, from, to)
            } else {
                distribute(ast, b, a, from, to)
            }
        }
        (true, false) => distribute(ast, b, a, from, to),
        (false, true) => distribute(ast, a, b, from, to),
        (false, false) => return Ok(id),
    };
    Ok(ast.replace(id, distributed))
}

fn connector_count(ast: &Ast, id: ExprId) -> usize {
    ast.walk(id)
        .into_iter()
        .filter(|n| ast.kind(*n).is_connector())
        .count()
}

/// Distribute `a` over the operands of the connector `b`
fn distribute(ast: &mut Ast, a: ExprId, b: ExprId, from: Kind, to: Kind) -> ExprId {
    let (Some(left), Some(right)) = (ast.get(b, ArgKey::This), ast.get(b, ArgKey::Expression))
    else {
        return a;
    };

    if ast.kind(a).is_connector() {
        for child in ast.children(a) {
            // The pair is built from a copy so `child` keeps its slot in `a`
            let operand = ast.copy(child);
            let pair = distribute_pair(ast, operand, left, right, from, to);
            ast.replace(child, pair);
        }
        a
    } else {
        distribute_pair(ast, a, left, right, from, to)
    }
}

fn distribute_pair(
    ast: &mut Ast,
    operand: ExprId,
    left: ExprId,
    right: ExprId,
    from: Kind,
    to: Kind,
) -> ExprId {
    let operand_copy = ast.copy(operand);
    let (left, right) = (ast.copy(left), ast.copy(right));
    let first = builder::binary(ast, from, operand, left);
    let first = uniq_sort(ast, first, true);
    let second = builder::binary(ast, from, operand_copy, right);
    let second = uniq_sort(ast, second, true);
    builder::binary(ast, to, first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_one, Parser};

    fn normalized_sql(sql: &str, dnf: bool, max_distance: usize) -> String {
        let ast = Parser::parse_expression_sql(sql).unwrap();
        normalize(ast, dnf, max_distance).unwrap().to_sql()
    }

    fn distance(sql: &str, dnf: bool) -> i64 {
        let ast = Parser::parse_expression_sql(sql).unwrap();
        normalization_distance(&ast, ast.root(), dnf, DEFAULT_MAX_DISTANCE)
    }

    #[test]
    fn test_normalized_cnf() {
        let ast = Parser::parse_expression_sql("(a OR b) AND (c OR d)").unwrap();
        assert!(normalized(&ast, ast.root(), false));
    }

    #[test]
    fn test_normalized_dnf() {
        let ast = Parser::parse_expression_sql("(a AND b) OR (c AND d)").unwrap();
        assert!(normalized(&ast, ast.root(), true));
        assert!(!normalized(&ast, ast.root(), false));
    }

    #[test]
    fn test_simple_predicate_is_normalized() {
        let ast = Parser::parse_expression_sql("a = 1").unwrap();
        assert!(normalized(&ast, ast.root(), false));
        assert!(normalized(&ast, ast.root(), true));
    }

    #[test]
    fn test_normalization_distance() {
        assert_eq!(distance("a = 1", false), 0);
        assert_eq!(distance("(a AND b) OR (c AND d)", false), 4);
        assert_eq!(distance("(a OR b) AND (c OR d)", true), 4);
        assert!(distance("(a OR b) AND (c OR d)", false) <= 0);
    }

    #[test]
    fn test_normalize_to_cnf() {
        assert_eq!(
            normalized_sql("(x AND y) OR z", false, DEFAULT_MAX_DISTANCE),
            "(x OR z) AND (y OR z)"
        );
    }

    #[test]
    fn test_normalize_to_dnf() {
        assert_eq!(
            normalized_sql("(x OR y) AND z", true, DEFAULT_MAX_DISTANCE),
            "x AND z OR y AND z"
        );
    }

    #[test]
    fn test_distance_exceeded_leaves_expression() {
        assert_eq!(
            normalized_sql("(a AND b) OR (c AND d)", false, 1),
            "a AND b OR c AND d"
        );
    }

    #[test]
    fn test_normalize_where_clause() {
        let ast = parse_one("SELECT * FROM x WHERE (a AND b) OR c").unwrap();
        let ast = normalize(ast, false, DEFAULT_MAX_DISTANCE).unwrap();
        assert_eq!(ast.to_sql(), "SELECT * FROM x WHERE (a OR c) AND (b OR c)");
    }

    #[test]
    fn test_normalized_output_is_stable() {
        let once = normalized_sql("(a AND b) OR (c AND d)", false, DEFAULT_MAX_DISTANCE);
        assert_eq!(normalized_sql(&once, false, DEFAULT_MAX_DISTANCE), once);
    }

    fn assert_distributed(sql: &str, dnf: bool) {
        let ast = normalize(Parser::parse_expression_sql(sql).unwrap(), dnf, DEFAULT_MAX_DISTANCE).unwrap();
        let output = ast.to_sql();
        assert!(normalized(&ast, ast.root(), dnf), "{} is not normalized", output);
        for operand in ["a", "b", "c", "d"] {
            assert!(
                output.split(|c: char| !c.is_alphanumeric()).any(|w| w == operand),
                "{} lost operand {}",
                output,
                operand
            );
        }
        let reparsed = Parser::parse_expression_sql(&output).unwrap();
        assert!(normalized(&reparsed, reparsed.root(), dnf), "{} does not reparse normalized", output);
    }

    #[test]
    fn test_cnf_of_two_conjunctions() {
        assert_distributed("(a AND b) OR (c AND d)", false);
        assert_distributed("(a AND b AND c) OR (c AND d)", false);
    }

    #[test]
    fn test_dnf_of_two_disjunctions() {
        assert_distributed("(a OR b) AND (c OR d)", true);
        assert_distributed("(a OR b) AND (b OR c OR d)", true);
    }

    #[test]
    fn test_where_clause_with_two_conjunctions() {
        let ast = parse_one("SELECT * FROM x WHERE (x.a = 1 AND x.b = 2) OR (x.a = 3 AND x.b = 4)").unwrap();
        let ast = normalize(ast, false, DEFAULT_MAX_DISTANCE).unwrap();
        let condition = ast.unnest(ast.get(ast.root(), ArgKey::Where).and_then(|w| ast.get(w, ArgKey::This)).unwrap());
        assert!(normalized(&ast, condition, false));
        let output = ast.to_sql();
        for predicate in ["x.a = 1", "x.b = 2", "x.a = 3", "x.b = 4"] {
            assert!(output.contains(predicate), "{} lost {}", output, predicate);
        }
    }
}
