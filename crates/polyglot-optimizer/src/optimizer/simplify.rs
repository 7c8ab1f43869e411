//! Expression Simplification
//!
//! Rewrites expressions into simpler equivalents until nothing changes:
//! - Connector identities (TRUE AND x -> x, x OR TRUE -> TRUE)
//! - De Morgan's laws and double negation (NOT NOT x -> x)
//! - Absorption and elimination (A AND (A OR B) -> A)
//! - Complement removal (A AND NOT A -> FALSE)
//! - Range algebra on comparisons (x > 1 AND x > 2 -> x > 2)
//! - Constant folding (1 + 2 -> 3, 'a' = 'a' -> TRUE)
//! - NULL propagation through strict operators
//!
//! Connector operands are de-duplicated and sorted by their SQL text so the
//! output is deterministic and simplifying twice changes nothing.

use crate::builder;
use crate::error::Result;
use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

/// Simplify every expression of the tree.
///
/// ```
/// use polyglot_optimizer::optimizer::simplify::simplify;
/// use polyglot_optimizer::parser::parse_one;
///
/// let ast = parse_one("SELECT a FROM x WHERE TRUE AND (b = 1 OR FALSE)").unwrap();
/// assert_eq!(simplify(ast).unwrap().to_sql(), "SELECT a FROM x WHERE b = 1");
/// ```
pub fn simplify(mut ast: Ast) -> Result<Ast> {
    let root = ast.root();
    Simplifier::new().simplify(&mut ast, root);
    remove_where_true(&mut ast);
    Ok(ast)
}

/// Simplify one subtree in place and return the node now in its slot
pub fn simplify_expression(ast: &mut Ast, id: ExprId) -> ExprId {
    Simplifier::new().simplify(ast, id)
}

/// Expression simplifier
pub struct Simplifier {
    max_iterations: usize,
}

impl Default for Simplifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Simplifier {
    pub fn new() -> Self {
        Self { max_iterations: 100 }
    }

    /// Apply rounds of simplification until the SQL text is stable
    pub fn simplify(&mut self, ast: &mut Ast, id: ExprId) -> ExprId {
        let mut current = id;
        for _ in 0..self.max_iterations {
            let before = ast.sql(current);
            current = self.simplify_once(ast, current, true);
            if ast.sql(current) == before {
                break;
            }
        }
        current
    }

    fn simplify_once(&mut self, ast: &mut Ast, id: ExprId, root: bool) -> ExprId {
        let mut node = rewrite_between(ast, id);
        node = uniq_sort(ast, node, root);
        node = absorb_and_eliminate(ast, node, root);

        for child in ast.children(node) {
            self.simplify_once(ast, child, false);
        }

        node = simplify_not(ast, node);
        node = simplify_connectors(ast, node, root);
        node = remove_complements(ast, node, root);
        node = simplify_literals(ast, node, root);
        node = simplify_case(ast, node);
        simplify_parens(ast, node)
    }
}

/// TRUE, or a non-zero number
pub fn always_true(ast: &Ast, id: ExprId) -> bool {
    ast.boolean_value(id) == Some(true) || (ast.is_number(id) && !is_zero(ast, id))
}

/// FALSE, NULL or zero
pub fn always_false(ast: &Ast, id: ExprId) -> bool {
    is_false(ast, id) || is_null(ast, id) || is_zero(ast, id)
}

pub fn is_false(ast: &Ast, id: ExprId) -> bool {
    ast.boolean_value(id) == Some(false)
}

pub fn is_null(ast: &Ast, id: ExprId) -> bool {
    ast.is(id, Kind::Null)
}

pub fn is_zero(ast: &Ast, id: ExprId) -> bool {
    ast.is_number(id)
        && ast
            .literal_value(id)
            .and_then(|v| v.parse::<f64>().ok())
            .is_some_and(|v| v == 0.0)
}

/// Whether `b` is `NOT a`
pub fn is_complement(ast: &Ast, a: ExprId, b: ExprId) -> bool {
    ast.is(b, Kind::Not)
        && ast
            .get(b, ArgKey::This)
            .is_some_and(|inner| same(ast, ast.unnest(inner), ast.unnest(a)))
}

fn same(ast: &Ast, a: ExprId, b: ExprId) -> bool {
    a == b || ast.sql(a) == ast.sql(b)
}

/// Parent is the same kind of node, so the parent handles the whole chain
fn same_parent(ast: &Ast, id: ExprId) -> bool {
    ast.parent(id)
        .is_some_and(|parent| ast.kind(parent) == ast.kind(id))
}

fn operands(ast: &Ast, id: ExprId) -> Option<(ExprId, ExprId)> {
    Some((ast.get(id, ArgKey::This)?, ast.get(id, ArgKey::Expression)?))
}

fn rebuild(ast: &mut Ast, id: ExprId, kind: Kind, operands: Vec<ExprId>) -> ExprId {
    let mut iter = operands.into_iter();
    let Some(first) = iter.next() else {
        return id;
    };
    let new = iter.fold(first, |acc, operand| builder::binary(ast, kind, acc, operand));
    ast.replace(id, new)
}

fn replace_with_boolean(ast: &mut Ast, id: ExprId, value: bool) -> ExprId {
    let new = builder::boolean(ast, value);
    ast.replace(id, new)
}

/// `x BETWEEN a AND b` becomes `x >= a AND x <= b`
pub(crate) fn rewrite_between(ast: &mut Ast, id: ExprId) -> ExprId {
    if !ast.is(id, Kind::Between) {
        return id;
    }
    let (Some(this), Some(low), Some(high)) = (
        ast.get(id, ArgKey::This),
        ast.get(id, ArgKey::Low),
        ast.get(id, ArgKey::High),
    ) else {
        return id;
    };
    let copy = ast.copy(this);
    let gte = builder::binary(ast, Kind::Gte, this, low);
    let lte = builder::binary(ast, Kind::Lte, copy, high);
    let and = builder::binary(ast, Kind::And, gte, lte);
    ast.replace(id, and)
}

/// Remove duplicate connector operands and sort the rest by SQL text
pub(crate) fn uniq_sort(ast: &mut Ast, id: ExprId, root: bool) -> ExprId {
    let kind = ast.kind(id);
    if !kind.is_connector() || (!root && same_parent(ast, id)) {
        return id;
    }
    let flattened = ast.flatten(id);
    let mut deduped: IndexMap<String, ExprId> = IndexMap::new();
    for operand in &flattened {
        deduped.entry(ast.sql(*operand)).or_insert(*operand);
    }

    let sorted = deduped
        .keys()
        .zip(deduped.keys().skip(1))
        .all(|(a, b)| a <= b);
    if !sorted {
        deduped.sort_keys();
    } else if deduped.len() == flattened.len() {
        return id;
    }
    let operands: Vec<ExprId> = deduped.into_values().collect();
    rebuild(ast, id, kind, operands)
}

/// Absorption: `A AND (A OR B) -> A`, `A AND (NOT A OR B) -> A AND B`.
/// Elimination: `(A OR B) AND (A OR NOT B) -> A`.
fn absorb_and_eliminate(ast: &mut Ast, id: ExprId, root: bool) -> ExprId {
    let kind = ast.kind(id);
    if !kind.is_connector() || (!root && same_parent(ast, id)) {
        return id;
    }
    let inner_kind = if kind == Kind::And { Kind::Or } else { Kind::And };
    let flattened = ast.flatten(id);

    for (i, &a) in flattened.iter().enumerate() {
        if !ast.is(a, inner_kind) {
            continue;
        }
        let Some((aa, ab)) = operands(ast, a) else {
            continue;
        };
        let (aa, ab) = (ast.unnest(aa), ast.unnest(ab));
        let a_set: HashSet<String> = ast.flatten(a).iter().map(|n| ast.sql(*n)).collect();

        for (j, &b) in flattened.iter().enumerate() {
            if i == j {
                continue;
            }
            if is_complement(ast, b, aa) {
                replace_with_boolean(ast, aa, inner_kind == Kind::And);
                return id;
            }
            if is_complement(ast, b, ab) {
                replace_with_boolean(ast, ab, inner_kind == Kind::And);
                return id;
            }

            let b_set: HashSet<String> = if ast.is(b, inner_kind) {
                ast.flatten(b).iter().map(|n| ast.sql(*n)).collect()
            } else {
                HashSet::from([ast.sql(b)])
            };
            if b_set.len() < a_set.len() && b_set.is_subset(&a_set) {
                replace_with_boolean(ast, a, inner_kind == Kind::Or);
                return id;
            }

            if ast.is(b, inner_kind) {
                let Some((ba, bb)) = operands(ast, b) else {
                    continue;
                };
                let (ba, bb) = (ast.unnest(ba), ast.unnest(bb));
                let rhs_has = |x: ExprId| same(ast, x, ba) || same(ast, x, bb);
                let kept = if rhs_has(aa)
                    && (is_complement(ast, ab, ba) || is_complement(ast, ab, bb))
                {
                    Some(aa)
                } else if rhs_has(ab)
                    && (is_complement(ast, aa, ba) || is_complement(ast, aa, bb))
                {
                    Some(ab)
                } else {
                    None
                };
                if let Some(kept) = kept {
                    let copy = ast.copy(kept);
                    ast.replace(a, kept);
                    ast.replace(b, copy);
                    return id;
                }
            }
        }
    }
    id
}

fn complement_comparison(kind: Kind) -> Option<Kind> {
    Some(match kind {
        Kind::Eq => Kind::Neq,
        Kind::Neq => Kind::Eq,
        Kind::Lt => Kind::Gte,
        Kind::Gte => Kind::Lt,
        Kind::Gt => Kind::Lte,
        Kind::Lte => Kind::Gt,
        _ => return None,
    })
}

/// De Morgan, double negation, negated comparisons and constants
fn simplify_not(ast: &mut Ast, id: ExprId) -> ExprId {
    if !ast.is(id, Kind::Not) {
        return id;
    }
    let Some(this) = ast.get(id, ArgKey::This) else {
        return id;
    };
    let inner = ast.unnest(this);
    let inner_kind = ast.kind(inner);

    if is_null(ast, inner) {
        let null = builder::null(ast);
        return ast.replace(id, null);
    }
    if let Some(complement) = complement_comparison(inner_kind) {
        if let Some((left, right)) = operands(ast, inner) {
            let new = builder::binary(ast, complement, left, right);
            return ast.replace(id, new);
        }
    }
    if inner_kind.is_connector() {
        if let Some((left, right)) = operands(ast, inner) {
            let left = builder::not(ast, left);
            let right = builder::not(ast, right);
            let flipped = if inner_kind == Kind::And { Kind::Or } else { Kind::And };
            let new = builder::binary(ast, flipped, left, right);
            return ast.replace(id, new);
        }
    }
    if always_true(ast, inner) {
        return replace_with_boolean(ast, id, false);
    }
    if is_false(ast, inner) {
        return replace_with_boolean(ast, id, true);
    }
    if inner_kind == Kind::Not {
        if let Some(double) = ast.get(inner, ArgKey::This) {
            return ast.replace(id, double);
        }
    }
    id
}

/// Pairwise rewrite of a flattened chain; a pair that simplifies is
/// replaced by its result and retried against the remaining operands
fn flat_simplify<F>(ast: &mut Ast, id: ExprId, root: bool, flatten: bool, mut simplifier: F) -> ExprId
where
    F: FnMut(&mut Ast, Kind, ExprId, ExprId) -> Option<ExprId>,
{
    if flatten && !root && same_parent(ast, id) {
        return id;
    }
    let kind = ast.kind(id);
    let mut queue: VecDeque<ExprId> = if flatten {
        ast.flatten(id).into()
    } else {
        match operands(ast, id) {
            Some((left, right)) => VecDeque::from([left, right]),
            None => return id,
        }
    };
    let size = queue.len();
    let mut kept = Vec::with_capacity(size);

    while let Some(a) = queue.pop_front() {
        let mut merged = None;
        for (index, &b) in queue.iter().enumerate() {
            if let Some(result) = simplifier(ast, kind, a, b) {
                merged = Some((index, result));
                break;
            }
        }
        match merged {
            Some((index, result)) => {
                queue.remove(index);
                queue.push_front(result);
            }
            None => kept.push(a),
        }
    }

    if kept.len() < size {
        rebuild(ast, id, kind, kept)
    } else {
        id
    }
}

fn simplify_connectors(ast: &mut Ast, id: ExprId, root: bool) -> ExprId {
    if !ast.kind(id).is_connector() {
        return id;
    }
    flat_simplify(ast, id, root, true, simplify_connector_pair)
}

fn simplify_connector_pair(ast: &mut Ast, kind: Kind, left: ExprId, right: ExprId) -> Option<ExprId> {
    if same(ast, left, right) {
        return Some(left);
    }
    if kind == Kind::And {
        if is_false(ast, left) || is_false(ast, right) {
            return Some(builder::boolean(ast, false));
        }
        if always_true(ast, left) && always_true(ast, right) {
            return Some(builder::boolean(ast, true));
        }
        if always_true(ast, left) {
            return Some(right);
        }
        if always_true(ast, right) {
            return Some(left);
        }
        simplify_comparison(ast, left, right, false)
    } else {
        if always_true(ast, left) || always_true(ast, right) {
            return Some(builder::boolean(ast, true));
        }
        if is_false(ast, left) && is_false(ast, right) {
            return Some(builder::boolean(ast, false));
        }
        if (is_null(ast, left) && is_false(ast, right)) || (is_false(ast, left) && is_null(ast, right)) {
            return Some(builder::null(ast));
        }
        if is_false(ast, left) {
            return Some(right);
        }
        if is_false(ast, right) {
            return Some(left);
        }
        simplify_comparison(ast, left, right, true)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Constant {
    Number(f64),
    Text(String),
}

impl PartialOrd for Constant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.partial_cmp(b),
            (Constant::Text(a), Constant::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

fn constant(ast: &Ast, id: ExprId) -> Option<Constant> {
    let value = ast.literal_value(id)?;
    if ast.is_string_literal(id) {
        Some(Constant::Text(value.to_string()))
    } else {
        value.parse().ok().map(Constant::Number)
    }
}

/// Mirror of a comparison with its operands swapped
fn inverse_comparison(kind: Kind) -> Kind {
    match kind {
        Kind::Lt => Kind::Gt,
        Kind::Gt => Kind::Lt,
        Kind::Lte => Kind::Gte,
        Kind::Gte => Kind::Lte,
        other => other,
    }
}

/// Comparison of a column against a constant, as `(column, kind, value)`
/// with the column on the left
fn column_bound(ast: &Ast, id: ExprId) -> Option<(ExprId, Kind, Constant)> {
    let kind = ast.kind(id);
    if !matches!(kind, Kind::Eq | Kind::Neq | Kind::Lt | Kind::Lte | Kind::Gt | Kind::Gte) {
        return None;
    }
    let (left, right) = operands(ast, id)?;
    if ast.is(left, Kind::Column) {
        Some((left, kind, constant(ast, right)?))
    } else if ast.is(right, Kind::Column) {
        Some((right, inverse_comparison(kind), constant(ast, left)?))
    } else {
        None
    }
}

/// Range algebra between two comparisons on the same column
fn simplify_comparison(ast: &mut Ast, left: ExprId, right: ExprId, or: bool) -> Option<ExprId> {
    let (lcol, lk, lv) = column_bound(ast, left)?;
    let (rcol, rk, rv) = column_bound(ast, right)?;
    if !same(ast, lcol, rcol) {
        return None;
    }
    let order = lv.partial_cmp(&rv)?;

    let upper = |k: Kind| matches!(k, Kind::Lt | Kind::Lte);
    let lower = |k: Kind| matches!(k, Kind::Gt | Kind::Gte);
    let strict = |k: Kind| matches!(k, Kind::Lt | Kind::Gt);

    if (upper(lk) && upper(rk)) || (lower(lk) && lower(rk)) {
        // For AND keep the tighter bound, for OR the looser one
        let tighter_is_left = match order {
            Ordering::Less => upper(lk),
            Ordering::Greater => lower(lk),
            Ordering::Equal => strict(lk) || !strict(rk),
        };
        let keep_left = if order == Ordering::Equal && or {
            !strict(lk) || strict(rk)
        } else {
            tighter_is_left != or
        };
        return Some(if keep_left { left } else { right });
    }
    if or {
        return None;
    }

    for ((a, ak, av), (bk, bv)) in [((left, lk, &lv), (rk, &rv)), ((right, rk, &rv), (lk, &lv))] {
        let cmp = av.partial_cmp(bv)?;
        if upper(ak) && lower(bk) {
            let empty = cmp == Ordering::Less
                || (cmp == Ordering::Equal && (strict(ak) || strict(bk)));
            if empty {
                return Some(builder::boolean(ast, false));
            }
        }
        if ak == Kind::Eq {
            let satisfied = match bk {
                Kind::Lt => cmp == Ordering::Less,
                Kind::Lte => cmp != Ordering::Greater,
                Kind::Gt => cmp == Ordering::Greater,
                Kind::Gte => cmp != Ordering::Less,
                Kind::Neq => cmp != Ordering::Equal,
                Kind::Eq => cmp == Ordering::Equal,
                _ => return None,
            };
            return Some(if satisfied { a } else { builder::boolean(ast, false) });
        }
    }
    None
}

/// `A AND NOT A -> FALSE`, `A OR NOT A -> TRUE`
fn remove_complements(ast: &mut Ast, id: ExprId, root: bool) -> ExprId {
    let kind = ast.kind(id);
    if !kind.is_connector() || (!root && same_parent(ast, id)) {
        return id;
    }
    let flattened = ast.flatten(id);
    for &a in &flattened {
        for &b in &flattened {
            if a != b && is_complement(ast, a, b) {
                return replace_with_boolean(ast, id, kind == Kind::Or);
            }
        }
    }
    id
}

fn simplify_literals(ast: &mut Ast, id: ExprId, root: bool) -> ExprId {
    let kind = ast.kind(id);
    if kind.is_binary() && !kind.is_connector() {
        let flatten = matches!(kind, Kind::Add | Kind::Mul);
        return flat_simplify(ast, id, root, flatten, simplify_binary);
    }
    if kind == Kind::Neg {
        let Some(this) = ast.get(id, ArgKey::This) else {
            return id;
        };
        if let Some(value) = ast.literal_value(this).filter(|_| ast.is_number(this)) {
            let negated = match value.strip_prefix('-') {
                Some(positive) => positive.to_string(),
                None => format!("-{value}"),
            };
            let literal = builder::number(ast, &negated);
            return ast.replace(id, literal);
        }
    }
    id
}

fn simplify_binary(ast: &mut Ast, kind: Kind, a: ExprId, b: ExprId) -> Option<ExprId> {
    match kind {
        Kind::Is => {
            if is_null(ast, b) {
                if ast.is(a, Kind::Literal) {
                    return Some(builder::boolean(ast, false));
                }
                if is_null(ast, a) {
                    return Some(builder::boolean(ast, true));
                }
            }
            return None;
        }
        Kind::NullSafeEq => return None,
        _ if is_null(ast, a) || is_null(ast, b) => return Some(builder::null(ast)),
        _ => {}
    }

    if ast.is_number(a) && ast.is_number(b) {
        let (x, y) = (
            Decimal::parse(ast.literal_value(a)?)?,
            Decimal::parse(ast.literal_value(b)?)?,
        );
        let folded = match kind {
            Kind::Add => x.add(&y),
            Kind::Sub => x.sub(&y),
            Kind::Mul => x.mul(&y),
            // Integer division differs between engines
            Kind::Div if x.scale == 0 && y.scale == 0 => None,
            Kind::Div => x.div(&y),
            _ => None,
        };
        if let Some(value) = folded {
            return Some(builder::number(ast, &value));
        }
        let ordering = x.compare(&y)?;
        return eval_comparison(kind, ordering).map(|v| builder::boolean(ast, v));
    }

    if ast.is_string_literal(a) && ast.is_string_literal(b) {
        let (x, y) = (ast.literal_value(a)?.to_string(), ast.literal_value(b)?.to_string());
        if kind == Kind::DPipe {
            return Some(builder::string(ast, &format!("{x}{y}")));
        }
        return eval_comparison(kind, x.cmp(&y)).map(|v| builder::boolean(ast, v));
    }
    None
}

fn eval_comparison(kind: Kind, ordering: Ordering) -> Option<bool> {
    Some(match kind {
        Kind::Eq => ordering == Ordering::Equal,
        Kind::Neq => ordering != Ordering::Equal,
        Kind::Lt => ordering == Ordering::Less,
        Kind::Lte => ordering != Ordering::Greater,
        Kind::Gt => ordering == Ordering::Greater,
        Kind::Gte => ordering != Ordering::Less,
        _ => return None,
    })
}

/// Exact fixed-point number used for folding `+ - *`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    fn parse(text: &str) -> Option<Self> {
        if text.contains(['e', 'E']) {
            return None;
        }
        let (int, frac) = text.split_once('.').unwrap_or((text, ""));
        let digits = format!("{int}{frac}");
        let mantissa = digits.parse::<i128>().ok()?;
        Some(Self {
            mantissa,
            scale: frac.len() as u32,
        })
    }

    fn rescale(&self, scale: u32) -> Option<i128> {
        self.mantissa.checked_mul(10i128.checked_pow(scale - self.scale)?)
    }

    /// Exact ordering at a common scale, `None` when rescaling overflows
    fn compare(&self, other: &Self) -> Option<Ordering> {
        let scale = self.scale.max(other.scale);
        Some(self.rescale(scale)?.cmp(&other.rescale(scale)?))
    }

    fn add(&self, other: &Self) -> Option<String> {
        let scale = self.scale.max(other.scale);
        let sum = self.rescale(scale)?.checked_add(other.rescale(scale)?)?;
        Some(Self { mantissa: sum, scale }.to_string())
    }

    fn sub(&self, other: &Self) -> Option<String> {
        let negated = Self {
            mantissa: other.mantissa.checked_neg()?,
            scale: other.scale,
        };
        self.add(&negated)
    }

    fn mul(&self, other: &Self) -> Option<String> {
        let product = self.mantissa.checked_mul(other.mantissa)?;
        Some(
            Self {
                mantissa: product,
                scale: self.scale + other.scale,
            }
            .to_string(),
        )
    }

    fn div(&self, other: &Self) -> Option<String> {
        let divisor = other.to_f64();
        if divisor == 0.0 {
            return None;
        }
        let quotient = self.to_f64() / divisor;
        quotient.is_finite().then(|| quotient.to_string())
    }

    fn to_f64(self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let digits = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = digits.split_at(digits.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

/// Drop CASE branches that can never match; a branch that always matches
/// becomes the result
fn simplify_case(ast: &mut Ast, id: ExprId) -> ExprId {
    if !ast.is(id, Kind::Case) || ast.get(id, ArgKey::This).is_some() {
        return id;
    }
    let branches = ast.list(id, ArgKey::Ifs).to_vec();
    let mut kept = Vec::with_capacity(branches.len());
    let mut new_default = None;

    for branch in &branches {
        let Some(condition) = ast.get(*branch, ArgKey::This) else {
            kept.push(*branch);
            continue;
        };
        if always_false(ast, condition) {
            continue;
        }
        if always_true(ast, condition) {
            new_default = ast.get(*branch, ArgKey::True);
            break;
        }
        kept.push(*branch);
    }

    if kept.len() == branches.len() && new_default.is_none() {
        return id;
    }
    let default = new_default.or_else(|| ast.get(id, ArgKey::Default));
    if kept.is_empty() {
        let result = match default {
            Some(default) => default,
            None => builder::null(ast),
        };
        return ast.replace(id, result);
    }
    ast.set_list(id, ArgKey::Ifs, kept);
    ast.set(id, ArgKey::Default, default);
    id
}

/// Drop parentheses the renderer would add back where needed
fn simplify_parens(ast: &mut Ast, id: ExprId) -> ExprId {
    if !ast.is(id, Kind::Paren) {
        return id;
    }
    let Some(this) = ast.get(id, ArgKey::This) else {
        return id;
    };
    if ast.kind(this).is_query() {
        return id;
    }
    let chained_predicate = ast.kind(this).is_predicate()
        && ast.parent(id).is_some_and(|p| ast.kind(p).is_predicate());
    if chained_predicate {
        return id;
    }
    ast.replace(id, this)
}

/// `WHERE TRUE` is removed and inner joins `ON TRUE` become CROSS JOINs
fn remove_where_true(ast: &mut Ast) {
    let root = ast.root();
    for clause in ast.find_all(root, Kind::Where) {
        if ast.get(clause, ArgKey::This).is_some_and(|c| always_true(ast, c)) {
            ast.detach(clause);
        }
    }
    for join in ast.find_all(root, Kind::Join) {
        let on_true = ast.get(join, ArgKey::On).is_some_and(|c| always_true(ast, c));
        if on_true && ast.text(join, ArgKey::Side).is_none() {
            ast.remove_arg(join, ArgKey::On);
            ast.set_text(join, ArgKey::JoinKind, "CROSS");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_one, Parser};

    fn simplified(sql: &str) -> String {
        let mut ast = Parser::parse_expression_sql(sql).unwrap();
        let root = ast.root();
        simplify_expression(&mut ast, root);
        ast.to_sql()
    }

    #[test]
    fn test_always_true_false() {
        let ast = Parser::parse_expression_sql("TRUE").unwrap();
        assert!(always_true(&ast, ast.root()));
        let ast = Parser::parse_expression_sql("0").unwrap();
        assert!(!always_true(&ast, ast.root()));
        assert!(always_false(&ast, ast.root()));
        let ast = Parser::parse_expression_sql("NULL").unwrap();
        assert!(always_false(&ast, ast.root()));
    }

    #[test]
    fn test_connector_identities() {
        assert_eq!(simplified("TRUE AND TRUE"), "TRUE");
        assert_eq!(simplified("TRUE AND FALSE"), "FALSE");
        assert_eq!(simplified("TRUE AND x"), "x");
        assert_eq!(simplified("x OR FALSE"), "x");
        assert_eq!(simplified("x OR TRUE"), "TRUE");
        assert_eq!(simplified("x AND x"), "x");
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(simplified("NULL AND TRUE"), "NULL");
        assert_eq!(simplified("NULL AND FALSE"), "FALSE");
        assert_eq!(simplified("NULL OR FALSE"), "NULL");
        assert_eq!(simplified("NULL OR TRUE"), "TRUE");
        assert_eq!(simplified("NULL + 1"), "NULL");
        assert_eq!(simplified("NULL = NULL"), "NULL");
        assert_eq!(simplified("NULL IS NULL"), "TRUE");
        assert_eq!(simplified("1 IS NULL"), "FALSE");
    }

    #[test]
    fn test_negation() {
        assert_eq!(simplified("NOT TRUE"), "FALSE");
        assert_eq!(simplified("NOT NOT x"), "x");
        assert_eq!(simplified("NOT a = 1"), "a <> 1");
        assert_eq!(simplified("NOT (a > 1 AND b < 2)"), "a <= 1 OR b >= 2");
        assert_eq!(simplified("NOT NULL"), "NULL");
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(simplified("1 + 2"), "3");
        assert_eq!(simplified("x + 1 + 1"), "x + 2");
        assert_eq!(simplified("2 * 3 * x"), "6 * x");
        assert_eq!(simplified("1.5 + 1"), "2.5");
        assert_eq!(simplified("5 - 3 - 1"), "1");
        assert_eq!(simplified("1.0 / 4"), "0.25");
        assert_eq!(simplified("1 / 2"), "1 / 2");
        assert_eq!(simplified("-(-1)"), "1");
        assert_eq!(simplified("'a' || 'b'"), "'ab'");
    }

    #[test]
    fn test_constant_comparisons() {
        assert_eq!(simplified("1 = 1"), "TRUE");
        assert_eq!(simplified("1 < 0"), "FALSE");
        assert_eq!(simplified("'a' = 'a'"), "TRUE");
        assert_eq!(simplified("'a' <> 'a'"), "FALSE");
    }

    #[test]
    fn test_absorption() {
        assert_eq!(simplified("a AND (a OR b)"), "a");
        assert_eq!(simplified("a OR (a AND b)"), "a");
        assert_eq!(simplified("a AND (NOT a OR b)"), "a AND b");
        assert_eq!(simplified("(a OR b) AND (a OR NOT b)"), "a");
    }

    #[test]
    fn test_complements() {
        assert_eq!(simplified("a AND NOT a"), "FALSE");
        assert_eq!(simplified("a OR NOT a"), "TRUE");
    }

    #[test]
    fn test_sorting_and_dedup() {
        assert_eq!(simplified("c AND a AND b AND a"), "a AND b AND c");
        assert_eq!(simplified("b OR a"), "a OR b");
    }

    #[test]
    fn test_range_algebra() {
        assert_eq!(simplified("x > 1 AND x > 2"), "x > 2");
        assert_eq!(simplified("x > 1 OR x > 2"), "x > 1");
        assert_eq!(simplified("x < 1 AND x <= 1"), "x < 1");
        assert_eq!(simplified("x < 1 AND x > 3"), "FALSE");
        assert_eq!(simplified("x = 1 AND x = 2"), "FALSE");
        assert_eq!(simplified("x = 1 AND x < 5"), "x = 1");
        assert_eq!(simplified("1 < x AND x > 3"), "x > 3");
    }

    #[test]
    fn test_between() {
        assert_eq!(simplified("x BETWEEN 1 AND 2"), "x <= 2 AND x >= 1");
    }

    #[test]
    fn test_case() {
        assert_eq!(simplified("CASE WHEN FALSE THEN 1 ELSE 2 END"), "2");
        assert_eq!(simplified("CASE WHEN TRUE THEN 1 ELSE 2 END"), "1");
        assert_eq!(
            simplified("CASE WHEN x = 1 THEN 1 WHEN TRUE THEN 2 WHEN y = 1 THEN 3 END"),
            "CASE WHEN x = 1 THEN 1 ELSE 2 END"
        );
    }

    #[test]
    fn test_parens() {
        assert_eq!(simplified("((a))"), "a");
        assert_eq!(simplified("(a + b) * c"), "(a + b) * c");
        assert_eq!(simplified("a - (b - c)"), "a - (b - c)");
    }

    #[test]
    fn test_idempotent() {
        for sql in [
            "a AND (b OR c) AND NOT d",
            "x > 1 AND y < 2 OR z = 3",
            "NOT (a = 1 OR b = 2) AND c",
        ] {
            let once = simplified(sql);
            assert_eq!(simplified(&once), once);
        }
    }

    #[test]
    fn test_where_true_removed() {
        let ast = parse_one("SELECT a FROM x WHERE 1 = 1").unwrap();
        assert_eq!(simplify(ast).unwrap().to_sql(), "SELECT a FROM x");
    }

    #[test]
    fn test_join_on_true_becomes_cross() {
        let ast = parse_one("SELECT a FROM x JOIN y ON TRUE LEFT JOIN z ON TRUE").unwrap();
        assert_eq!(
            simplify(ast).unwrap().to_sql(),
            "SELECT a FROM x CROSS JOIN y LEFT JOIN z ON TRUE"
        );
    }

    #[test]
    fn test_large_integer_comparisons_are_exact() {
        assert_eq!(simplified("9007199254740993 = 9007199254740992"), "FALSE");
        assert_eq!(simplified("9007199254740993 > 9007199254740992"), "TRUE");
        assert_eq!(simplified("9007199254740993 <> 9007199254740992"), "TRUE");
        assert_eq!(simplified("1.10 = 1.1"), "TRUE");
        assert_eq!(simplified("0.30000000000000001 > 0.3"), "TRUE");
    }

    #[test]
    fn test_large_integer_predicate_kept() {
        let ast = parse_one("SELECT a FROM x WHERE 9007199254740993 = 9007199254740992").unwrap();
        assert_eq!(simplify(ast).unwrap().to_sql(), "SELECT a FROM x WHERE FALSE");
    }
}
