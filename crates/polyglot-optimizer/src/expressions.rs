//! SQL Expression AST
//!
//! The tree is stored in an [`Ast`] arena. Nodes refer to their children through
//! [`ExprId`] handles and keep a non-owning handle to their parent, which is
//! rewritten every time a node is attached somewhere else. A node that is
//! detached from the root stays in the arena but is no longer reachable; it is
//! dropped together with the arena.
//!
//! Arguments are keyed by [`ArgKey`] and kept in a stable per-kind order so
//! that walks visit children the same way regardless of the order in which a
//! pass attached them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Handle to a node inside an [`Ast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(u32);

impl ExprId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    // Queries
    Select,
    Union,
    Intersect,
    Except,
    Subquery,
    Values,
    Lateral,
    // Clauses
    With,
    Cte,
    From,
    Join,
    Where,
    Group,
    Having,
    Order,
    Ordered,
    Limit,
    Offset,
    // References
    Table,
    TableAlias,
    Column,
    Identifier,
    Star,
    Alias,
    // Literals
    Literal,
    Boolean,
    Null,
    // Connectors and unary operators
    And,
    Or,
    Not,
    Neg,
    Paren,
    // Predicates
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    NullSafeEq,
    Is,
    Like,
    ILike,
    In,
    Between,
    Exists,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    DPipe,
    // Everything else
    Case,
    If,
    Cast,
    Func,
    Window,
    Interval,
    Tuple,
    Array,
}

impl Kind {
    /// SELECT and the set operations
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Kind::Select | Kind::Union | Kind::Intersect | Kind::Except
        )
    }

    pub fn is_set_operation(self) -> bool {
        matches!(self, Kind::Union | Kind::Intersect | Kind::Except)
    }

    /// Table-valued sources that produce rows from expressions
    pub fn is_udtf(self) -> bool {
        matches!(self, Kind::Values | Kind::Lateral)
    }

    pub fn is_connector(self) -> bool {
        matches!(self, Kind::And | Kind::Or)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Kind::Eq | Kind::Neq | Kind::Lt | Kind::Lte | Kind::Gt | Kind::Gte | Kind::NullSafeEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Kind::Add | Kind::Sub | Kind::Mul | Kind::Div | Kind::Mod
        )
    }

    /// Nodes with `this` and `expression` operands
    pub fn is_binary(self) -> bool {
        self.is_connector()
            || self.is_comparison()
            || self.is_arithmetic()
            || matches!(self, Kind::Is | Kind::Like | Kind::ILike | Kind::DPipe)
    }

    /// Boolean-valued tests
    pub fn is_predicate(self) -> bool {
        self.is_comparison()
            || matches!(
                self,
                Kind::Is | Kind::Like | Kind::ILike | Kind::In | Kind::Between | Kind::Exists
            )
    }

    /// Operators whose operands can be swapped without changing the result
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Kind::And | Kind::Or | Kind::Eq | Kind::Neq | Kind::NullSafeEq | Kind::Add | Kind::Mul
        )
    }

    /// Argument order used when walking children
    pub fn arg_order(self) -> &'static [ArgKey] {
        use ArgKey::*;
        match self {
            Kind::Select => &[
                With, Expressions, From, Joins, Laterals, Where, Group, Having, Order, Limit,
                Offset,
            ],
            Kind::Union | Kind::Intersect | Kind::Except => {
                &[With, This, Expression, Order, Limit, Offset]
            }
            Kind::Subquery | Kind::Cte => &[This, Alias],
            Kind::Values => &[Expressions, Alias],
            Kind::Lateral => &[This, Alias],
            Kind::Join => &[This, On, Using],
            Kind::Table => &[This, Db, Catalog, Alias],
            Kind::TableAlias => &[This, Columns],
            Kind::Column => &[This, Table],
            Kind::Star => &[Except, Replace],
            Kind::Alias => &[This, Alias],
            Kind::In => &[This, Expressions, Query],
            Kind::Between => &[This, Low, High],
            Kind::Case => &[This, Ifs, Default],
            Kind::If => &[This, True],
            Kind::Window => &[This, PartitionBy, Order],
            _ => &[This, Expression, Expressions],
        }
    }
}

/// Argument names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKey {
    This,
    Expression,
    Expressions,
    Alias,
    Columns,
    Table,
    Db,
    Catalog,
    With,
    From,
    Laterals,
    Joins,
    Where,
    Group,
    Having,
    Order,
    Limit,
    Offset,
    Distinct,
    Recursive,
    On,
    Using,
    Side,
    JoinKind,
    Quoted,
    IsString,
    To,
    Ifs,
    True,
    Default,
    Low,
    High,
    Query,
    Desc,
    PartitionBy,
    Unit,
    Outer,
    Except,
    Replace,
}

impl ArgKey {
    fn rank(self, kind: Kind) -> usize {
        let order = kind.arg_order();
        order
            .iter()
            .position(|k| *k == self)
            .unwrap_or(order.len())
    }
}

/// A single argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Node(ExprId),
    List(Vec<ExprId>),
    Text(String),
    Flag(bool),
    Type(DataType),
}

/// A node in the arena
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: Kind,
    args: Vec<(ArgKey, Arg)>,
    parent: Option<ExprId>,
    /// Type assigned by annotate_types
    pub data_type: Option<DataType>,
}

impl Node {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            args: Vec::new(),
            parent: None,
            data_type: None,
        }
    }

    pub fn arg(&self, key: ArgKey) -> Option<&Arg> {
        self.args.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn args(&self) -> impl Iterator<Item = (ArgKey, &Arg)> {
        self.args.iter().map(|(k, v)| (*k, v))
    }
}

/// Arena owning a SQL expression tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<Node>,
    root: ExprId,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    /// Create an arena whose root is a lone NULL
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(Kind::Null)],
            root: ExprId(0),
        }
    }

    pub fn root(&self) -> ExprId {
        self.root
    }

    /// Make `id` the root, detaching it from any parent first
    pub fn set_root(&mut self, id: ExprId) {
        self.detach(id);
        self.root = id;
    }

    /// Number of nodes ever allocated, reachable or not
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ExprId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> Kind {
        self.nodes[id.index()].kind
    }

    pub fn is(&self, id: ExprId, kind: Kind) -> bool {
        self.kind(id) == kind
    }

    /// Allocate a detached node
    pub fn add(&mut self, kind: Kind) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.nodes[id.index()].parent
    }

    /// Whether the node is the root or hangs off it
    pub fn is_attached(&self, id: ExprId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    // ------------------------------------------------------------------
    // Argument access
    // ------------------------------------------------------------------

    pub fn get(&self, id: ExprId, key: ArgKey) -> Option<ExprId> {
        match self.node(id).arg(key) {
            Some(Arg::Node(child)) => Some(*child),
            _ => None,
        }
    }

    pub fn list(&self, id: ExprId, key: ArgKey) -> &[ExprId] {
        match self.node(id).arg(key) {
            Some(Arg::List(children)) => children,
            _ => &[],
        }
    }

    pub fn text(&self, id: ExprId, key: ArgKey) -> Option<&str> {
        match self.node(id).arg(key) {
            Some(Arg::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn flag(&self, id: ExprId, key: ArgKey) -> bool {
        matches!(self.node(id).arg(key), Some(Arg::Flag(true)))
    }

    pub fn type_arg(&self, id: ExprId, key: ArgKey) -> Option<&DataType> {
        match self.node(id).arg(key) {
            Some(Arg::Type(data_type)) => Some(data_type),
            _ => None,
        }
    }

    /// Direct children in argument order
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        let mut children = Vec::new();
        for (_, arg) in &self.node(id).args {
            match arg {
                Arg::Node(child) => children.push(*child),
                Arg::List(list) => children.extend(list.iter().copied()),
                _ => {}
            }
        }
        children
    }

    /// The argument slot `id` occupies in its parent
    pub fn arg_key_of(&self, id: ExprId) -> Option<ArgKey> {
        let parent = self.parent(id)?;
        self.node(parent).args.iter().find_map(|(key, arg)| match arg {
            Arg::Node(child) if *child == id => Some(*key),
            Arg::List(list) if list.contains(&id) => Some(*key),
            _ => None,
        })
    }

    fn put_arg(&mut self, id: ExprId, key: ArgKey, value: Arg) {
        let kind = self.kind(id);
        let node = &mut self.nodes[id.index()];
        if let Some(slot) = node.args.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }
        let rank = key.rank(kind);
        let position = node
            .args
            .iter()
            .position(|(k, _)| k.rank(kind) > rank)
            .unwrap_or(node.args.len());
        node.args.insert(position, (key, value));
    }

    fn clear_parent_of_arg(&mut self, id: ExprId, key: ArgKey) {
        let previous = match self.node(id).arg(key) {
            Some(Arg::Node(child)) => vec![*child],
            Some(Arg::List(list)) => list.clone(),
            _ => Vec::new(),
        };
        for child in previous {
            if self.nodes[child.index()].parent == Some(id) {
                self.nodes[child.index()].parent = None;
            }
        }
    }

    /// Set a node argument; `None` removes it
    pub fn set(&mut self, id: ExprId, key: ArgKey, child: Option<ExprId>) {
        self.clear_parent_of_arg(id, key);
        match child {
            Some(child) => {
                self.detach(child);
                self.put_arg(id, key, Arg::Node(child));
                self.nodes[child.index()].parent = Some(id);
            }
            None => self.remove_arg(id, key),
        }
    }

    /// Replace a list argument; an empty list removes it
    pub fn set_list(&mut self, id: ExprId, key: ArgKey, children: Vec<ExprId>) {
        self.clear_parent_of_arg(id, key);
        if children.is_empty() {
            self.remove_arg(id, key);
            return;
        }
        for child in &children {
            if self.parent(*child) != Some(id) || self.arg_key_of(*child) != Some(key) {
                self.detach(*child);
            }
        }
        for child in &children {
            self.nodes[child.index()].parent = Some(id);
        }
        self.put_arg(id, key, Arg::List(children));
    }

    /// Append to a list argument
    pub fn push(&mut self, id: ExprId, key: ArgKey, child: ExprId) {
        let mut children = self.list(id, key).to_vec();
        children.push(child);
        self.set_list(id, key, children);
    }

    /// Insert into a list argument at `index` (clamped to the list length)
    pub fn insert(&mut self, id: ExprId, key: ArgKey, index: usize, child: ExprId) {
        let mut children = self.list(id, key).to_vec();
        children.insert(index.min(children.len()), child);
        self.set_list(id, key, children);
    }

    pub fn set_text(&mut self, id: ExprId, key: ArgKey, value: impl Into<String>) {
        self.put_arg(id, key, Arg::Text(value.into()));
    }

    pub fn set_flag(&mut self, id: ExprId, key: ArgKey, value: bool) {
        if value {
            self.put_arg(id, key, Arg::Flag(true));
        } else {
            self.remove_arg(id, key);
        }
    }

    pub fn set_type_arg(&mut self, id: ExprId, key: ArgKey, data_type: DataType) {
        self.put_arg(id, key, Arg::Type(data_type));
    }

    pub fn remove_arg(&mut self, id: ExprId, key: ArgKey) {
        self.clear_parent_of_arg(id, key);
        self.nodes[id.index()].args.retain(|(k, _)| *k != key);
    }

    pub fn data_type(&self, id: ExprId) -> Option<&DataType> {
        self.node(id).data_type.as_ref()
    }

    pub fn set_data_type(&mut self, id: ExprId, data_type: DataType) {
        self.nodes[id.index()].data_type = Some(data_type);
    }

    // ------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------

    /// Remove a node from its parent slot. Removing the last element of a
    /// list removes the list argument.
    pub fn detach(&mut self, id: ExprId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let Some(key) = self.arg_key_of(id) else {
            self.nodes[id.index()].parent = None;
            return;
        };
        match self.node(parent).arg(key) {
            Some(Arg::List(list)) => {
                let remaining: Vec<ExprId> = list.iter().copied().filter(|c| *c != id).collect();
                if remaining.is_empty() {
                    self.nodes[parent.index()].args.retain(|(k, _)| *k != key);
                } else {
                    self.put_arg(parent, key, Arg::List(remaining));
                }
            }
            _ => {
                self.nodes[parent.index()].args.retain(|(k, _)| *k != key);
            }
        }
        self.nodes[id.index()].parent = None;
    }

    /// Alias of [`Ast::detach`] matching the usual tree vocabulary
    pub fn pop(&mut self, id: ExprId) {
        self.detach(id);
    }

    /// Put `new` into the slot held by `old` and return `new`. `new` may be a
    /// descendant of `old`.
    pub fn replace(&mut self, old: ExprId, new: ExprId) -> ExprId {
        if old == new {
            return new;
        }
        self.detach(new);
        let Some(parent) = self.parent(old) else {
            if self.root == old {
                self.root = new;
            }
            return new;
        };
        let Some(key) = self.arg_key_of(old) else {
            return new;
        };
        let value = match self.node(parent).arg(key) {
            Some(Arg::List(list)) => Arg::List(
                list.iter()
                    .map(|c| if *c == old { new } else { *c })
                    .collect(),
            ),
            _ => Arg::Node(new),
        };
        self.put_arg(parent, key, value);
        self.nodes[old.index()].parent = None;
        self.nodes[new.index()].parent = Some(parent);
        new
    }

    /// Deep copy of a subtree. The copy is detached and keeps annotated types.
    pub fn copy(&mut self, id: ExprId) -> ExprId {
        let source = self.node(id).clone();
        let new_id = self.add(source.kind);
        self.nodes[new_id.index()].data_type = source.data_type.clone();
        for (key, arg) in source.args {
            match arg {
                Arg::Node(child) => {
                    let copied = self.copy(child);
                    self.set(new_id, key, Some(copied));
                }
                Arg::List(children) => {
                    let copied: Vec<ExprId> = children.into_iter().map(|c| self.copy(c)).collect();
                    self.set_list(new_id, key, copied);
                }
                other => self.put_arg(new_id, key, other),
            }
        }
        new_id
    }

    /// Copy a subtree from another arena into this one
    pub fn import(&mut self, other: &Ast, id: ExprId) -> ExprId {
        let source = other.node(id);
        let new_id = self.add(source.kind);
        self.nodes[new_id.index()].data_type = source.data_type.clone();
        for (key, arg) in source.args() {
            match arg {
                Arg::Node(child) => {
                    let copied = self.import(other, *child);
                    self.set(new_id, key, Some(copied));
                }
                Arg::List(children) => {
                    let copied: Vec<ExprId> =
                        children.iter().map(|c| self.import(other, *c)).collect();
                    self.set_list(new_id, key, copied);
                }
                other_arg => self.put_arg(new_id, key, other_arg.clone()),
            }
        }
        new_id
    }

    /// Structural equality, ignoring parents and annotated types
    pub fn equals(&self, a: ExprId, b: ExprId) -> bool {
        if a == b {
            return true;
        }
        let (left, right) = (self.node(a), self.node(b));
        if left.kind != right.kind || left.args.len() != right.args.len() {
            return false;
        }
        left.args.iter().zip(right.args.iter()).all(|((ka, va), (kb, vb))| {
            ka == kb
                && match (va, vb) {
                    (Arg::Node(x), Arg::Node(y)) => self.equals(*x, *y),
                    (Arg::List(xs), Arg::List(ys)) => {
                        xs.len() == ys.len()
                            && xs.iter().zip(ys.iter()).all(|(x, y)| self.equals(*x, *y))
                    }
                    (x, y) => x == y,
                }
        })
    }

    /// Apply `fun` to every direct child and put the returned node in its place
    pub fn replace_children<F>(&mut self, id: ExprId, mut fun: F)
    where
        F: FnMut(&mut Ast, ExprId) -> ExprId,
    {
        for child in self.children(id) {
            let new = fun(self, child);
            if new != child {
                self.replace(child, new);
            }
        }
    }

    /// Pre-order rewrite. When `fun` returns a different node it takes the
    /// old node's slot and is not visited further.
    pub fn transform<F>(&mut self, id: ExprId, fun: &mut F) -> ExprId
    where
        F: FnMut(&mut Ast, ExprId) -> ExprId,
    {
        let new = fun(self, id);
        if new != id {
            self.replace(id, new);
            return new;
        }
        for child in self.children(id) {
            self.transform(child, fun);
        }
        id
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn ancestors(&self, id: ExprId) -> Ancestors<'_> {
        Ancestors {
            ast: self,
            current: self.parent(id),
        }
    }

    /// Nearest ancestor matching `pred`
    pub fn find_ancestor(&self, id: ExprId, pred: impl Fn(Kind) -> bool) -> Option<ExprId> {
        self.ancestors(id).find(|a| pred(self.kind(*a)))
    }

    /// Nearest enclosing SELECT
    pub fn parent_select(&self, id: ExprId) -> Option<ExprId> {
        self.find_ancestor(id, |k| k == Kind::Select)
    }

    /// Depth-first pre-order listing of a subtree, `id` included
    pub fn walk(&self, id: ExprId) -> Vec<ExprId> {
        crate::traversal::DfsIter::new(self, id).collect()
    }

    pub fn find(&self, id: ExprId, kind: Kind) -> Option<ExprId> {
        crate::traversal::DfsIter::new(self, id).find(|n| self.is(*n, kind))
    }

    pub fn find_all(&self, id: ExprId, kind: Kind) -> Vec<ExprId> {
        crate::traversal::DfsIter::new(self, id)
            .filter(|n| self.is(*n, kind))
            .collect()
    }

    pub fn contains(&self, id: ExprId, pred: impl Fn(&Ast, ExprId) -> bool) -> bool {
        crate::traversal::DfsIter::new(self, id).any(|n| pred(self, n))
    }

    /// Operands of a chain of the same connector kind, Paren-wrapped operands unwrapped
    pub fn flatten(&self, id: ExprId) -> Vec<ExprId> {
        let kind = self.kind(id);
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if self.kind(node) == kind {
                let mut operands: Vec<ExprId> = [ArgKey::This, ArgKey::Expression]
                    .iter()
                    .filter_map(|k| self.get(node, *k))
                    .collect();
                operands.reverse();
                stack.extend(operands);
            } else {
                out.push(self.unnest(node));
            }
        }
        out
    }

    /// Strip enclosing parentheses
    pub fn unnest(&self, mut id: ExprId) -> ExprId {
        while self.is(id, Kind::Paren) {
            match self.get(id, ArgKey::This) {
                Some(inner) => id = inner,
                None => break,
            }
        }
        id
    }

    /// The query a derived table wraps
    pub fn unwrap_subquery(&self, mut id: ExprId) -> ExprId {
        while matches!(self.kind(id), Kind::Subquery | Kind::Paren) {
            match self.get(id, ArgKey::This) {
                Some(inner) => id = inner,
                None => break,
            }
        }
        id
    }

    /// The aliased expression of an Alias, or the node itself
    pub fn unalias(&self, id: ExprId) -> ExprId {
        if self.is(id, Kind::Alias) {
            self.get(id, ArgKey::This).unwrap_or(id)
        } else {
            id
        }
    }

    /// Name of an identifier-bearing node
    pub fn name(&self, id: ExprId) -> &str {
        match self.kind(id) {
            Kind::Identifier | Kind::Literal | Kind::Func => {
                self.text(id, ArgKey::This).unwrap_or("")
            }
            Kind::Star => "*",
            Kind::Column | Kind::Table | Kind::TableAlias => match self.get(id, ArgKey::This) {
                Some(inner) => self.name(inner),
                None => "",
            },
            _ => "",
        }
    }

    /// Identifier-valued argument, as text
    pub fn arg_name(&self, id: ExprId, key: ArgKey) -> &str {
        self.get(id, key).map(|n| self.name(n)).unwrap_or("")
    }

    /// Table qualifier of a column reference
    pub fn column_table(&self, id: ExprId) -> &str {
        self.arg_name(id, ArgKey::Table)
    }

    /// Alias declared by an Alias, aliased source or CTE
    pub fn alias(&self, id: ExprId) -> &str {
        match self.get(id, ArgKey::Alias) {
            Some(alias) => self.name(alias),
            None => "",
        }
    }

    pub fn alias_or_name(&self, id: ExprId) -> String {
        let alias = self.alias(id);
        if alias.is_empty() {
            self.name(id).to_string()
        } else {
            alias.to_string()
        }
    }

    /// Column names declared in a source alias such as `AS t(a, b)`
    pub fn alias_column_names(&self, id: ExprId) -> Vec<String> {
        match self.get(id, ArgKey::Alias) {
            Some(alias) if self.is(alias, Kind::TableAlias) => self
                .list(alias, ArgKey::Columns)
                .iter()
                .map(|c| self.name(*c).to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Name a projection contributes to its query's output
    pub fn output_name(&self, id: ExprId) -> String {
        match self.kind(id) {
            Kind::Alias => self.alias(id).to_string(),
            Kind::Column => self.name(id).to_string(),
            Kind::Star => "*".to_string(),
            Kind::Subquery => self.alias(id).to_string(),
            _ => String::new(),
        }
    }

    /// Projections of a query; set operations report their leftmost branch
    pub fn selects(&self, id: ExprId) -> &[ExprId] {
        match self.kind(id) {
            Kind::Select => self.list(id, ArgKey::Expressions),
            Kind::Union | Kind::Intersect | Kind::Except => match self.get(id, ArgKey::This) {
                Some(left) => self.selects(self.unwrap_subquery(left)),
                None => &[],
            },
            Kind::Subquery => match self.get(id, ArgKey::This) {
                Some(inner) => self.selects(inner),
                None => &[],
            },
            _ => &[],
        }
    }

    /// Output names of a query's projections, unnamed ones skipped
    pub fn named_selects(&self, id: ExprId) -> Vec<String> {
        self.selects(id)
            .iter()
            .map(|s| self.output_name(*s))
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Distinct table qualifiers of the columns under `id`, in first-seen order
    pub fn column_table_names(&self, id: ExprId) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for column in self.find_all(id, Kind::Column) {
            let table = self.column_table(column);
            if !table.is_empty() && !names.iter().any(|n| n == table) {
                names.push(table.to_string());
            }
        }
        names
    }

    pub fn is_star(&self, id: ExprId) -> bool {
        self.is(id, Kind::Star)
            || (self.is(id, Kind::Column)
                && self
                    .get(id, ArgKey::This)
                    .is_some_and(|inner| self.is(inner, Kind::Star)))
    }

    pub fn is_string_literal(&self, id: ExprId) -> bool {
        self.is(id, Kind::Literal) && self.flag(id, ArgKey::IsString)
    }

    pub fn is_number(&self, id: ExprId) -> bool {
        self.is(id, Kind::Literal) && !self.flag(id, ArgKey::IsString)
    }

    /// Text of a literal
    pub fn literal_value(&self, id: ExprId) -> Option<&str> {
        if self.is(id, Kind::Literal) {
            self.text(id, ArgKey::This)
        } else {
            None
        }
    }

    /// Value of a boolean literal
    pub fn boolean_value(&self, id: ExprId) -> Option<bool> {
        if self.is(id, Kind::Boolean) {
            Some(self.flag(id, ArgKey::This))
        } else {
            None
        }
    }

    /// Render a subtree as canonical SQL
    pub fn sql(&self, id: ExprId) -> String {
        crate::generator::Generator::new().generate_node(self, id)
    }

    /// Render the whole tree as canonical SQL
    pub fn to_sql(&self) -> String {
        self.sql(self.root)
    }
}

/// Iterator over a node's ancestors, nearest first
pub struct Ancestors<'a> {
    ast: &'a Ast,
    current: Option<ExprId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ExprId;

    fn next(&mut self) -> Option<ExprId> {
        let current = self.current?;
        self.current = self.ast.parent(current);
        Some(current)
    }
}

// ----------------------------------------------------------------------
// Data types
// ----------------------------------------------------------------------

/// Data type kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Float,
    Double,
    Char,
    NChar,
    VarChar,
    NVarChar,
    Text,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    TimestampTz,
    TimestampLtz,
    Time,
    Interval,
    Json,
    Binary,
    Array,
    Map,
    Struct,
    Nullable,
    Null,
    Unknown,
}

impl TypeKind {
    /// Resolve a type name, including common synonyms
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_uppercase().as_str() {
            "TINYINT" | "INT1" | "BYTE" => TypeKind::TinyInt,
            "SMALLINT" | "INT2" | "SHORT" => TypeKind::SmallInt,
            "INT" | "INTEGER" | "INT4" => TypeKind::Int,
            "BIGINT" | "INT8" | "LONG" => TypeKind::BigInt,
            "DECIMAL" | "NUMERIC" | "NUMBER" => TypeKind::Decimal,
            "FLOAT" | "REAL" | "FLOAT4" => TypeKind::Float,
            "DOUBLE" | "FLOAT8" | "DOUBLE PRECISION" => TypeKind::Double,
            "CHAR" | "CHARACTER" => TypeKind::Char,
            "NCHAR" => TypeKind::NChar,
            "VARCHAR" | "CHARACTER VARYING" => TypeKind::VarChar,
            "NVARCHAR" => TypeKind::NVarChar,
            "TEXT" | "STRING" => TypeKind::Text,
            "BOOLEAN" | "BOOL" => TypeKind::Boolean,
            "DATE" => TypeKind::Date,
            "DATETIME" => TypeKind::DateTime,
            "TIMESTAMP" => TypeKind::Timestamp,
            "TIMESTAMPTZ" => TypeKind::TimestampTz,
            "TIMESTAMPLTZ" => TypeKind::TimestampLtz,
            "TIME" => TypeKind::Time,
            "INTERVAL" => TypeKind::Interval,
            "JSON" => TypeKind::Json,
            "BINARY" | "VARBINARY" | "BLOB" | "BYTEA" => TypeKind::Binary,
            "ARRAY" => TypeKind::Array,
            "MAP" => TypeKind::Map,
            "STRUCT" => TypeKind::Struct,
            "NULLABLE" => TypeKind::Nullable,
            "NULL" => TypeKind::Null,
            "UNKNOWN" => TypeKind::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            TypeKind::TinyInt => "TINYINT",
            TypeKind::SmallInt => "SMALLINT",
            TypeKind::Int => "INT",
            TypeKind::BigInt => "BIGINT",
            TypeKind::Decimal => "DECIMAL",
            TypeKind::Float => "FLOAT",
            TypeKind::Double => "DOUBLE",
            TypeKind::Char => "CHAR",
            TypeKind::NChar => "NCHAR",
            TypeKind::VarChar => "VARCHAR",
            TypeKind::NVarChar => "NVARCHAR",
            TypeKind::Text => "TEXT",
            TypeKind::Boolean => "BOOLEAN",
            TypeKind::Date => "DATE",
            TypeKind::DateTime => "DATETIME",
            TypeKind::Timestamp => "TIMESTAMP",
            TypeKind::TimestampTz => "TIMESTAMPTZ",
            TypeKind::TimestampLtz => "TIMESTAMPLTZ",
            TypeKind::Time => "TIME",
            TypeKind::Interval => "INTERVAL",
            TypeKind::Json => "JSON",
            TypeKind::Binary => "BINARY",
            TypeKind::Array => "ARRAY",
            TypeKind::Map => "MAP",
            TypeKind::Struct => "STRUCT",
            TypeKind::Nullable => "NULLABLE",
            TypeKind::Null => "NULL",
            TypeKind::Unknown => "UNKNOWN",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeKind::TinyInt | TypeKind::SmallInt | TypeKind::Int | TypeKind::BigInt
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float | TypeKind::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || self == TypeKind::Decimal
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            TypeKind::Char | TypeKind::NChar | TypeKind::VarChar | TypeKind::NVarChar | TypeKind::Text
        )
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            TypeKind::Date
                | TypeKind::DateTime
                | TypeKind::Timestamp
                | TypeKind::TimestampTz
                | TypeKind::TimestampLtz
                | TypeKind::Time
        )
    }
}

/// A concrete data type, possibly parameterized (`DECIMAL(10, 2)`) or nested
/// (`ARRAY<INT>`, `NULLABLE(BOOLEAN)`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<DataType>,
}

impl DataType {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            params: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(TypeKind::Unknown)
    }

    pub fn null() -> Self {
        Self::new(TypeKind::Null)
    }

    pub fn array(element: DataType) -> Self {
        Self {
            kind: TypeKind::Array,
            params: Vec::new(),
            nested: vec![element],
        }
    }

    pub fn nullable(inner: DataType) -> Self {
        Self {
            kind: TypeKind::Nullable,
            params: Vec::new(),
            nested: vec![inner],
        }
    }

    pub fn is(&self, kind: TypeKind) -> bool {
        self.kind == kind
    }
}

impl From<TypeKind> for DataType {
    fn from(kind: TypeKind) -> Self {
        DataType::new(kind)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.sql_name())?;
        match self.kind {
            TypeKind::Array | TypeKind::Map | TypeKind::Struct if !self.nested.is_empty() => {
                write!(f, "<")?;
                for (i, inner) in self.nested.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{inner}")?;
                }
                write!(f, ">")
            }
            TypeKind::Nullable if !self.nested.is_empty() => {
                write!(f, "(")?;
                for (i, inner) in self.nested.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{inner}")?;
                }
                write!(f, ")")
            }
            _ if !self.params.is_empty() => write!(f, "({})", self.params.join(", ")),
            _ => Ok(()),
        }
    }
}

/// Error returned when a type string cannot be read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown data type: {0}")]
pub struct DataTypeParseError(pub String);

impl FromStr for DataType {
    type Err = DataTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut reader = TypeReader {
            input: s,
            chars: s.char_indices().peekable(),
        };
        let data_type = reader.read()?;
        reader.skip_ws();
        if reader.chars.peek().is_some() {
            return Err(DataTypeParseError(s.to_string()));
        }
        Ok(data_type)
    }
}

struct TypeReader<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl TypeReader<'_> {
    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn word(&mut self) -> String {
        self.skip_ws();
        let mut word = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || *c == '_' {
                word.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.chars.peek().is_some_and(|(_, c)| *c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn error(&self) -> DataTypeParseError {
        DataTypeParseError(self.input.to_string())
    }

    fn read(&mut self) -> Result<DataType, DataTypeParseError> {
        let mut name = self.word();
        if name.eq_ignore_ascii_case("DOUBLE") {
            let snapshot = self.chars.clone();
            let next = self.word();
            if next.eq_ignore_ascii_case("PRECISION") {
                name = "DOUBLE PRECISION".to_string();
            } else {
                self.chars = snapshot;
            }
        }
        let kind = TypeKind::from_name(&name).ok_or_else(|| self.error())?;
        let mut data_type = DataType::new(kind);

        if self.eat('<') {
            loop {
                data_type.nested.push(self.read()?);
                if self.eat('>') {
                    break;
                }
                if !self.eat(',') {
                    return Err(self.error());
                }
            }
        } else if self.eat('(') {
            loop {
                if kind == TypeKind::Nullable || kind == TypeKind::Array {
                    data_type.nested.push(self.read()?);
                } else {
                    let param = self.word();
                    if param.is_empty() {
                        return Err(self.error());
                    }
                    data_type.params.push(param);
                }
                if self.eat(')') {
                    break;
                }
                if !self.eat(',') {
                    return Err(self.error());
                }
            }
        }
        Ok(data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;

    #[test]
    fn test_replace_updates_parent() {
        let mut ast = Ast::new();
        let a = builder::column(&mut ast, "a", None);
        let b = builder::column(&mut ast, "b", None);
        let and = builder::binary(&mut ast, Kind::And, a, b);
        ast.set_root(and);

        let c = builder::column(&mut ast, "c", Some("t"));
        ast.replace(b, c);

        assert_eq!(ast.parent(c), Some(and));
        assert_eq!(ast.parent(b), None);
        assert_eq!(ast.get(and, ArgKey::Expression), Some(c));
        assert_eq!(ast.to_sql(), "a AND t.c");
    }

    #[test]
    fn test_replace_with_descendant() {
        let mut ast = Ast::new();
        let a = builder::column(&mut ast, "a", None);
        let paren = builder::paren(&mut ast, a);
        ast.set_root(paren);

        ast.replace(paren, a);
        assert_eq!(ast.root(), a);
        assert_eq!(ast.parent(a), None);
    }

    #[test]
    fn test_detach_from_list() {
        let mut ast = Ast::new();
        let select = ast.add(Kind::Select);
        let a = builder::column(&mut ast, "a", None);
        let b = builder::column(&mut ast, "b", None);
        ast.set_list(select, ArgKey::Expressions, vec![a, b]);

        ast.pop(a);
        assert_eq!(ast.list(select, ArgKey::Expressions), &[b]);
        ast.pop(b);
        assert!(ast.node(select).arg(ArgKey::Expressions).is_none());
    }

    #[test]
    fn test_copy_is_structurally_equal() {
        let mut ast = Ast::new();
        let a = builder::column(&mut ast, "a", Some("x"));
        let one = builder::number(&mut ast, "1");
        let add = builder::binary(&mut ast, Kind::Add, a, one);
        let copied = ast.copy(add);

        assert_ne!(copied, add);
        assert!(ast.equals(copied, add));
        assert_eq!(ast.parent(copied), None);
    }

    #[test]
    fn test_flatten_connector_chain() {
        let mut ast = Ast::new();
        let a = builder::column(&mut ast, "a", None);
        let b = builder::column(&mut ast, "b", None);
        let c = builder::column(&mut ast, "c", None);
        let ab = builder::binary(&mut ast, Kind::And, a, b);
        let abc = builder::binary(&mut ast, Kind::And, ab, c);

        assert_eq!(ast.flatten(abc), vec![a, b, c]);
    }

    #[test]
    fn test_args_keep_kind_order() {
        let mut ast = Ast::new();
        let select = ast.add(Kind::Select);
        let where_ = ast.add(Kind::Where);
        let from = ast.add(Kind::From);
        ast.set(select, ArgKey::Where, Some(where_));
        ast.set(select, ArgKey::From, Some(from));

        assert_eq!(ast.children(select), vec![from, where_]);
    }

    #[test]
    fn test_parse_data_types() {
        assert_eq!("int".parse::<DataType>().unwrap(), DataType::new(TypeKind::Int));
        assert_eq!(
            "DECIMAL(10, 2)".parse::<DataType>().unwrap().to_string(),
            "DECIMAL(10, 2)"
        );
        assert_eq!(
            "ARRAY<VARCHAR>".parse::<DataType>().unwrap(),
            DataType::array(DataType::new(TypeKind::VarChar))
        );
        assert_eq!(
            "double precision".parse::<DataType>().unwrap().kind,
            TypeKind::Double
        );
        assert!("NOT A TYPE".parse::<DataType>().is_err());
    }
}
