//! SQL Generator
//!
//! Renders an [`Ast`] back to a single-line, dialect-neutral SQL string. The
//! output is the canonical form the optimizer uses for fixtures, for keys when
//! deduplicating expressions, and for debugging. Parentheses are inserted where
//! operator precedence requires them even when the tree has no `Paren` node.

use crate::expressions::{ArgKey, Ast, ExprId, Kind};
use itertools::Itertools;

/// Canonical SQL renderer
#[derive(Debug, Default, Clone)]
pub struct Generator {
    /// Quote every identifier, not only the ones flagged as quoted
    pub quote_identifiers: bool,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the whole tree
    pub fn generate(&self, ast: &Ast) -> String {
        self.generate_node(ast, ast.root())
    }

    /// Render one subtree
    pub fn generate_node(&self, ast: &Ast, id: ExprId) -> String {
        let mut out = String::new();
        self.write(ast, id, &mut out);
        out
    }

    fn sql(&self, ast: &Ast, id: ExprId) -> String {
        self.generate_node(ast, id)
    }

    fn csv(&self, ast: &Ast, ids: &[ExprId]) -> String {
        ids.iter().map(|id| self.sql(ast, *id)).join(", ")
    }

    fn arg_sql(&self, ast: &Ast, id: ExprId, key: ArgKey) -> String {
        ast.get(id, key)
            .map(|child| self.sql(ast, child))
            .unwrap_or_default()
    }

    fn write(&self, ast: &Ast, id: ExprId, out: &mut String) {
        let kind = ast.kind(id);
        match kind {
            Kind::Select => self.write_select(ast, id, out),
            Kind::Union | Kind::Intersect | Kind::Except => self.write_set_operation(ast, id, out),
            Kind::Subquery => {
                out.push('(');
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push(')');
                self.write_alias(ast, id, out);
            }
            Kind::Values => {
                let rows = self.csv(ast, ast.list(id, ArgKey::Expressions));
                if ast.get(id, ArgKey::Alias).is_some() {
                    out.push_str(&format!("(VALUES {rows})"));
                    self.write_alias(ast, id, out);
                } else {
                    out.push_str(&format!("VALUES {rows}"));
                }
            }
            Kind::Lateral => {
                out.push_str("LATERAL VIEW ");
                if ast.flag(id, ArgKey::Outer) {
                    out.push_str("OUTER ");
                }
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                if let Some(alias) = ast.get(id, ArgKey::Alias) {
                    if let Some(name) = ast.get(alias, ArgKey::This) {
                        out.push(' ');
                        out.push_str(&self.sql(ast, name));
                    }
                    let columns = ast.list(alias, ArgKey::Columns);
                    if !columns.is_empty() {
                        out.push_str(" AS ");
                        out.push_str(&self.csv(ast, columns));
                    }
                }
            }
            Kind::With => {
                out.push_str("WITH ");
                if ast.flag(id, ArgKey::Recursive) {
                    out.push_str("RECURSIVE ");
                }
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
            }
            Kind::Cte => {
                if let Some(alias) = ast.get(id, ArgKey::Alias) {
                    out.push_str(&self.arg_sql(ast, alias, ArgKey::This));
                    let columns = ast.list(alias, ArgKey::Columns);
                    if !columns.is_empty() {
                        out.push_str(&format!("({})", self.csv(ast, columns)));
                    }
                }
                out.push_str(" AS (");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push(')');
            }
            Kind::From => {
                out.push_str("FROM ");
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
            }
            Kind::Join => self.write_join(ast, id, out),
            Kind::Where => {
                out.push_str("WHERE ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
            }
            Kind::Having => {
                out.push_str("HAVING ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
            }
            Kind::Group => {
                out.push_str("GROUP BY ");
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
            }
            Kind::Order => {
                out.push_str("ORDER BY ");
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
            }
            Kind::Ordered => {
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                if ast.flag(id, ArgKey::Desc) {
                    out.push_str(" DESC");
                }
            }
            Kind::Limit => {
                out.push_str("LIMIT ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
            }
            Kind::Offset => {
                out.push_str("OFFSET ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
            }
            Kind::Table => {
                let parts: Vec<String> = [ArgKey::Catalog, ArgKey::Db, ArgKey::This]
                    .iter()
                    .filter_map(|k| ast.get(id, *k))
                    .map(|part| self.sql(ast, part))
                    .collect();
                out.push_str(&parts.join("."));
                self.write_alias(ast, id, out);
            }
            Kind::TableAlias => {
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                let columns = ast.list(id, ArgKey::Columns);
                if !columns.is_empty() {
                    out.push_str(&format!("({})", self.csv(ast, columns)));
                }
            }
            Kind::Column => {
                if let Some(table) = ast.get(id, ArgKey::Table) {
                    out.push_str(&self.sql(ast, table));
                    out.push('.');
                }
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
            }
            Kind::Identifier => {
                let name = ast.text(id, ArgKey::This).unwrap_or("");
                if self.quote_identifiers || ast.flag(id, ArgKey::Quoted) {
                    out.push('"');
                    out.push_str(&name.replace('"', "\"\""));
                    out.push('"');
                } else {
                    out.push_str(name);
                }
            }
            Kind::Star => {
                out.push('*');
                let except = ast.list(id, ArgKey::Except);
                if !except.is_empty() {
                    out.push_str(&format!(" EXCEPT ({})", self.csv(ast, except)));
                }
                let replace = ast.list(id, ArgKey::Replace);
                if !replace.is_empty() {
                    out.push_str(&format!(" REPLACE ({})", self.csv(ast, replace)));
                }
            }
            Kind::Alias => {
                let this = ast.get(id, ArgKey::This);
                if let Some(this) = this {
                    self.write(ast, this, out);
                }
                out.push_str(" AS ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::Alias));
            }
            Kind::Literal => {
                let value = ast.text(id, ArgKey::This).unwrap_or("");
                if ast.flag(id, ArgKey::IsString) {
                    out.push('\'');
                    out.push_str(&value.replace('\'', "''"));
                    out.push('\'');
                } else {
                    out.push_str(value);
                }
            }
            Kind::Boolean => out.push_str(if ast.flag(id, ArgKey::This) {
                "TRUE"
            } else {
                "FALSE"
            }),
            Kind::Null => out.push_str("NULL"),
            Kind::Paren => {
                out.push('(');
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push(')');
            }
            Kind::Not => {
                out.push_str("NOT ");
                self.write_operand(ast, id, ArgKey::This, false, out);
            }
            Kind::Neg => {
                out.push('-');
                self.write_operand(ast, id, ArgKey::This, false, out);
            }
            Kind::In => {
                self.write_operand(ast, id, ArgKey::This, false, out);
                out.push_str(" IN (");
                match ast.get(id, ArgKey::Query) {
                    Some(query) => out.push_str(&self.sql(ast, query)),
                    None => out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions))),
                }
                out.push(')');
            }
            Kind::Between => {
                self.write_operand(ast, id, ArgKey::This, false, out);
                out.push_str(" BETWEEN ");
                self.write_operand(ast, id, ArgKey::Low, true, out);
                out.push_str(" AND ");
                self.write_operand(ast, id, ArgKey::High, true, out);
            }
            Kind::Exists => {
                out.push_str("EXISTS(");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push(')');
            }
            Kind::Case => {
                out.push_str("CASE");
                if let Some(this) = ast.get(id, ArgKey::This) {
                    out.push(' ');
                    out.push_str(&self.sql(ast, this));
                }
                for branch in ast.list(id, ArgKey::Ifs) {
                    out.push_str(" WHEN ");
                    out.push_str(&self.arg_sql(ast, *branch, ArgKey::This));
                    out.push_str(" THEN ");
                    out.push_str(&self.arg_sql(ast, *branch, ArgKey::True));
                }
                if let Some(default) = ast.get(id, ArgKey::Default) {
                    out.push_str(" ELSE ");
                    out.push_str(&self.sql(ast, default));
                }
                out.push_str(" END");
            }
            Kind::If => {
                out.push_str("IF(");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push_str(", ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::True));
                out.push(')');
            }
            Kind::Cast => {
                out.push_str("CAST(");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push_str(" AS ");
                if let Some(to) = ast.type_arg(id, ArgKey::To) {
                    out.push_str(&to.to_string());
                }
                out.push(')');
            }
            Kind::Func => {
                out.push_str(ast.text(id, ArgKey::This).unwrap_or(""));
                out.push('(');
                if ast.flag(id, ArgKey::Distinct) {
                    out.push_str("DISTINCT ");
                }
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
                out.push(')');
            }
            Kind::Window => {
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                out.push_str(" OVER (");
                let mut parts = Vec::new();
                let partition = ast.list(id, ArgKey::PartitionBy);
                if !partition.is_empty() {
                    parts.push(format!("PARTITION BY {}", self.csv(ast, partition)));
                }
                if let Some(order) = ast.get(id, ArgKey::Order) {
                    parts.push(self.sql(ast, order));
                }
                out.push_str(&parts.join(" "));
                out.push(')');
            }
            Kind::Interval => {
                out.push_str("INTERVAL ");
                out.push_str(&self.arg_sql(ast, id, ArgKey::This));
                if let Some(unit) = ast.text(id, ArgKey::Unit) {
                    out.push(' ');
                    out.push_str(unit);
                }
            }
            Kind::Tuple => {
                out.push('(');
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
                out.push(')');
            }
            Kind::Array => {
                out.push_str("ARRAY(");
                out.push_str(&self.csv(ast, ast.list(id, ArgKey::Expressions)));
                out.push(')');
            }
            _ if kind.is_binary() => {
                self.write_operand(ast, id, ArgKey::This, false, out);
                out.push(' ');
                out.push_str(binary_operator(kind));
                out.push(' ');
                self.write_operand(ast, id, ArgKey::Expression, true, out);
            }
            _ => {}
        }
    }

    fn write_alias(&self, ast: &Ast, id: ExprId, out: &mut String) {
        if let Some(alias) = ast.get(id, ArgKey::Alias) {
            out.push_str(" AS ");
            out.push_str(&self.sql(ast, alias));
        }
    }

    /// Write an operand, parenthesizing it when it binds looser than `parent`
    fn write_operand(&self, ast: &Ast, parent: ExprId, key: ArgKey, right: bool, out: &mut String) {
        let Some(child) = ast.get(parent, key) else {
            return;
        };
        let parent_kind = ast.kind(parent);
        let child_kind = ast.kind(child);
        let (p, c) = (precedence(parent_kind), precedence(child_kind));
        let needs_parens = c < p
            || (c == p
                && right
                && child_kind.is_binary()
                && !(parent_kind == child_kind && parent_kind.is_commutative()));
        if needs_parens {
            out.push('(');
            self.write(ast, child, out);
            out.push(')');
        } else {
            self.write(ast, child, out);
        }
    }

    fn write_select(&self, ast: &Ast, id: ExprId, out: &mut String) {
        if let Some(with) = ast.get(id, ArgKey::With) {
            out.push_str(&self.sql(ast, with));
            out.push(' ');
        }
        out.push_str("SELECT");
        if ast.flag(id, ArgKey::Distinct) {
            out.push_str(" DISTINCT");
        }
        let projections = ast.list(id, ArgKey::Expressions);
        if !projections.is_empty() {
            out.push(' ');
            out.push_str(&self.csv(ast, projections));
        }
        if let Some(from) = ast.get(id, ArgKey::From) {
            out.push(' ');
            out.push_str(&self.sql(ast, from));
        }
        for key in [ArgKey::Joins, ArgKey::Laterals] {
            for child in ast.list(id, key) {
                out.push(' ');
                out.push_str(&self.sql(ast, *child));
            }
        }
        self.write_modifiers(
            ast,
            id,
            &[
                ArgKey::Where,
                ArgKey::Group,
                ArgKey::Having,
                ArgKey::Order,
                ArgKey::Limit,
                ArgKey::Offset,
            ],
            out,
        );
    }

    fn write_modifiers(&self, ast: &Ast, id: ExprId, keys: &[ArgKey], out: &mut String) {
        for key in keys {
            if let Some(child) = ast.get(id, *key) {
                out.push(' ');
                out.push_str(&self.sql(ast, child));
            }
        }
    }

    fn write_set_operation(&self, ast: &Ast, id: ExprId, out: &mut String) {
        if let Some(with) = ast.get(id, ArgKey::With) {
            out.push_str(&self.sql(ast, with));
            out.push(' ');
        }
        out.push_str(&self.arg_sql(ast, id, ArgKey::This));
        let keyword = match ast.kind(id) {
            Kind::Union => "UNION",
            Kind::Intersect => "INTERSECT",
            _ => "EXCEPT",
        };
        out.push(' ');
        out.push_str(keyword);
        if !ast.flag(id, ArgKey::Distinct) {
            out.push_str(" ALL");
        }
        out.push(' ');
        out.push_str(&self.arg_sql(ast, id, ArgKey::Expression));
        self.write_modifiers(ast, id, &[ArgKey::Order, ArgKey::Limit, ArgKey::Offset], out);
    }

    fn write_join(&self, ast: &Ast, id: ExprId, out: &mut String) {
        for key in [ArgKey::Side, ArgKey::JoinKind] {
            if let Some(word) = ast.text(id, key) {
                out.push_str(word);
                out.push(' ');
            }
        }
        out.push_str("JOIN ");
        out.push_str(&self.arg_sql(ast, id, ArgKey::This));
        if let Some(on) = ast.get(id, ArgKey::On) {
            out.push_str(" ON ");
            out.push_str(&self.sql(ast, on));
        }
        let using = ast.list(id, ArgKey::Using);
        if !using.is_empty() {
            out.push_str(&format!(" USING ({})", self.csv(ast, using)));
        }
    }
}

fn binary_operator(kind: Kind) -> &'static str {
    match kind {
        Kind::And => "AND",
        Kind::Or => "OR",
        Kind::Eq => "=",
        Kind::Neq => "<>",
        Kind::Lt => "<",
        Kind::Lte => "<=",
        Kind::Gt => ">",
        Kind::Gte => ">=",
        Kind::NullSafeEq => "<=>",
        Kind::Is => "IS",
        Kind::Like => "LIKE",
        Kind::ILike => "ILIKE",
        Kind::Add => "+",
        Kind::Sub => "-",
        Kind::Mul => "*",
        Kind::Div => "/",
        Kind::Mod => "%",
        Kind::DPipe => "||",
        _ => "",
    }
}

/// Binding strength; higher binds tighter
fn precedence(kind: Kind) -> u8 {
    match kind {
        Kind::Or => 1,
        Kind::And => 2,
        Kind::Not => 3,
        _ if kind.is_predicate() => 4,
        Kind::DPipe => 5,
        Kind::Add | Kind::Sub => 6,
        Kind::Mul | Kind::Div | Kind::Mod => 7,
        Kind::Neg => 8,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn roundtrip(sql: &str) -> String {
        parse_one(sql).unwrap().to_sql()
    }

    #[test]
    fn test_select_roundtrip() {
        for sql in [
            "SELECT a, b AS c FROM x AS x WHERE a = 1 GROUP BY a HAVING COUNT(*) > 1 ORDER BY a DESC LIMIT 10 OFFSET 5",
            "WITH y AS (SELECT a FROM x) SELECT y.a FROM y",
            "SELECT x.a FROM x LEFT JOIN y ON x.a = y.a CROSS JOIN z",
            "SELECT a FROM x UNION ALL SELECT a FROM y",
            "SELECT CASE WHEN a > 1 THEN 'x' ELSE NULL END FROM x",
            "SELECT CAST(a AS DECIMAL(10, 2)) FROM x",
            "SELECT * FROM (VALUES (1, 'test')) AS tab(cola, colb)",
            "SELECT NOT a IS NULL FROM x",
            "SELECT a FROM x WHERE EXISTS(SELECT 1 FROM y WHERE y.b = x.a)",
        ] {
            assert_eq!(roundtrip(sql), sql);
        }
    }

    #[test]
    fn test_precedence_parens() {
        let mut ast = Ast::new();
        let a = crate::builder::column(&mut ast, "a", None);
        let b = crate::builder::column(&mut ast, "b", None);
        let c = crate::builder::column(&mut ast, "c", None);
        let sum = crate::builder::binary(&mut ast, Kind::Add, a, b);
        let product = crate::builder::binary(&mut ast, Kind::Mul, sum, c);
        ast.set_root(product);
        assert_eq!(ast.to_sql(), "(a + b) * c");
    }

    #[test]
    fn test_right_operand_of_subtraction() {
        assert_eq!(roundtrip("SELECT a - (b - c)"), "SELECT a - (b - c)");
    }

    #[test]
    fn test_quoted_identifier() {
        assert_eq!(roundtrip("SELECT \"b c\" FROM x"), "SELECT \"b c\" FROM x");
    }
}
