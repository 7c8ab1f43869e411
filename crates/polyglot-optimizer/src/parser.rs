//! SQL Parser
//!
//! A recursive descent reader for the generic SQL surface the optimizer works
//! on. It exists so that trees can be built from SQL text in tests, benchmarks
//! and tools; it is not a dialect layer.

use crate::builder;
use crate::error::{Error, Result};
use crate::expressions::{ArgKey, Ast, DataType, ExprId, Kind};
use crate::tokens::{Token, TokenType, Tokenizer};

/// Words that terminate an expression and cannot be used as bare aliases
const RESERVED: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "DESC", "DISTINCT", "ELSE",
    "END", "EXCEPT", "EXISTS", "FALSE", "FROM", "FULL", "GROUP", "HAVING", "ILIKE", "IN",
    "INNER", "INTERSECT", "IS", "JOIN", "LATERAL", "LEFT", "LIKE", "LIMIT", "NATURAL", "NOT",
    "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "RIGHT", "SELECT",
    "THEN", "TRUE", "UNION", "USING", "VALUES", "WHEN", "WHERE", "WINDOW", "WITH",
];

/// Parse a single statement
pub fn parse_one(sql: &str) -> Result<Ast> {
    Parser::parse_sql(sql)
}

/// SQL parser state
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            ast: Ast::new(),
        }
    }

    /// Tokenize and parse one query
    pub fn parse_sql(sql: &str) -> Result<Ast> {
        let tokens = Tokenizer::new().tokenize(sql)?;
        let mut parser = Parser::new(tokens);
        let root = parser.parse_query()?;
        parser.match_token(TokenType::Semicolon);
        if !parser.check(TokenType::Eof) {
            return Err(parser.error("Unexpected trailing input"));
        }
        parser.ast.set_root(root);
        Ok(parser.ast)
    }

    /// Parse a standalone expression such as a condition
    pub fn parse_expression_sql(sql: &str) -> Result<Ast> {
        let tokens = Tokenizer::new().tokenize(sql)?;
        let mut parser = Parser::new(tokens);
        let root = parser.parse_expression()?;
        if !parser.check(TokenType::Eof) {
            return Err(parser.error("Unexpected trailing input"));
        }
        parser.ast.set_root(root);
        Ok(parser.ast)
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.peek().token_type == token_type
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token_type: TokenType) -> Result<Token> {
        if self.check(token_type) {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("Expected {token_type:?}")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.match_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {keyword}")))
        }
    }

    fn error(&self, message: &str) -> Error {
        let token = self.peek();
        Error::parse(format!(
            "{message} at line {}, column {}, found {token}",
            token.span.line, token.span.column
        ))
    }

    fn is_reserved(token: &Token) -> bool {
        token.token_type == TokenType::Word
            && RESERVED.iter().any(|r| token.text.eq_ignore_ascii_case(r))
    }

    fn check_alias_word(&self) -> bool {
        let token = self.peek();
        token.token_type == TokenType::QuotedIdentifier
            || (token.token_type == TokenType::Word && !Self::is_reserved(token))
    }

    fn starts_query(&self, offset: usize) -> bool {
        let token = self.peek_at(offset);
        token.is_keyword("SELECT") || token.is_keyword("WITH")
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn parse_query(&mut self) -> Result<ExprId> {
        let with = if self.check_keyword("WITH") {
            Some(self.parse_with()?)
        } else {
            None
        };
        let query = self.parse_set_operations()?;
        if let Some(with) = with {
            self.ast.set(query, ArgKey::With, Some(with));
        }
        Ok(query)
    }

    fn parse_with(&mut self) -> Result<ExprId> {
        self.expect_keyword("WITH")?;
        let with = self.ast.add(Kind::With);
        if self.match_keyword("RECURSIVE") {
            self.ast.set_flag(with, ArgKey::Recursive, true);
        }
        let mut ctes = Vec::new();
        loop {
            let name = self.parse_identifier()?;
            let alias = self.ast.add(Kind::TableAlias);
            self.ast.set(alias, ArgKey::This, Some(name));
            if self.check(TokenType::LParen) {
                let columns = self.parse_identifier_list()?;
                self.ast.set_list(alias, ArgKey::Columns, columns);
            }
            self.expect_keyword("AS")?;
            self.expect(TokenType::LParen)?;
            let query = self.parse_query()?;
            self.expect(TokenType::RParen)?;
            let cte = builder::unary(&mut self.ast, Kind::Cte, query);
            self.ast.set(cte, ArgKey::Alias, Some(alias));
            ctes.push(cte);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.ast.set_list(with, ArgKey::Expressions, ctes);
        Ok(with)
    }

    fn parse_set_operations(&mut self) -> Result<ExprId> {
        let mut left = self.parse_query_term()?;
        loop {
            let kind = if self.match_keyword("UNION") {
                Kind::Union
            } else if self.match_keyword("INTERSECT") {
                Kind::Intersect
            } else if self.match_keyword("EXCEPT") {
                Kind::Except
            } else {
                break;
            };
            let distinct = if self.match_keyword("ALL") {
                false
            } else {
                self.match_keyword("DISTINCT");
                true
            };
            let right = self.parse_query_term()?;
            let node = builder::binary(&mut self.ast, kind, left, right);
            self.ast.set_flag(node, ArgKey::Distinct, distinct);
            if self.ast.is(right, Kind::Select) {
                for key in [ArgKey::Order, ArgKey::Limit, ArgKey::Offset] {
                    if let Some(modifier) = self.ast.get(right, key) {
                        self.ast.set(node, key, Some(modifier));
                    }
                }
            }
            left = node;
        }
        Ok(left)
    }

    fn parse_query_term(&mut self) -> Result<ExprId> {
        if self.check(TokenType::LParen)
            && (self.starts_query(1) || self.peek_at(1).token_type == TokenType::LParen)
        {
            self.advance();
            let query = self.parse_query()?;
            self.expect(TokenType::RParen)?;
            return Ok(builder::subquery(&mut self.ast, query, None));
        }
        if self.check_keyword("SELECT") {
            return self.parse_select();
        }
        Err(self.error("Expected SELECT"))
    }

    fn parse_select(&mut self) -> Result<ExprId> {
        self.expect_keyword("SELECT")?;
        let select = self.ast.add(Kind::Select);
        if self.match_keyword("DISTINCT") {
            self.ast.set_flag(select, ArgKey::Distinct, true);
        } else {
            self.match_keyword("ALL");
        }

        let mut projections = Vec::new();
        loop {
            let expression = self.parse_expression()?;
            projections.push(self.parse_alias(expression)?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.ast.set_list(select, ArgKey::Expressions, projections);

        if self.match_keyword("FROM") {
            let mut sources = Vec::new();
            loop {
                sources.push(self.parse_table_source()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            let from = self.ast.add(Kind::From);
            self.ast.set_list(from, ArgKey::Expressions, sources);
            self.ast.set(select, ArgKey::From, Some(from));
        }

        loop {
            if let Some(join) = self.parse_join()? {
                self.ast.push(select, ArgKey::Joins, join);
            } else if self.check_keyword("LATERAL") {
                let lateral = self.parse_lateral()?;
                self.ast.push(select, ArgKey::Laterals, lateral);
            } else {
                break;
            }
        }

        if self.match_keyword("WHERE") {
            let condition = self.parse_expression()?;
            let clause = builder::unary(&mut self.ast, Kind::Where, condition);
            self.ast.set(select, ArgKey::Where, Some(clause));
        }
        if self.match_keyword("GROUP") {
            self.expect_keyword("BY")?;
            let expressions = self.parse_expression_list()?;
            let group = self.ast.add(Kind::Group);
            self.ast.set_list(group, ArgKey::Expressions, expressions);
            self.ast.set(select, ArgKey::Group, Some(group));
        }
        if self.match_keyword("HAVING") {
            let condition = self.parse_expression()?;
            let clause = builder::unary(&mut self.ast, Kind::Having, condition);
            self.ast.set(select, ArgKey::Having, Some(clause));
        }
        if self.check_keyword("ORDER") {
            let order = self.parse_order()?;
            self.ast.set(select, ArgKey::Order, Some(order));
        }
        if self.match_keyword("LIMIT") {
            let value = self.parse_expression()?;
            let limit = builder::unary(&mut self.ast, Kind::Limit, value);
            self.ast.set(select, ArgKey::Limit, Some(limit));
        }
        if self.match_keyword("OFFSET") {
            let value = self.parse_expression()?;
            let offset = builder::unary(&mut self.ast, Kind::Offset, value);
            self.ast.set(select, ArgKey::Offset, Some(offset));
        }
        Ok(select)
    }

    fn parse_order(&mut self) -> Result<ExprId> {
        self.expect_keyword("ORDER")?;
        self.expect_keyword("BY")?;
        let mut items = Vec::new();
        loop {
            let expression = self.parse_expression()?;
            let ordered = builder::unary(&mut self.ast, Kind::Ordered, expression);
            if self.match_keyword("DESC") {
                self.ast.set_flag(ordered, ArgKey::Desc, true);
            } else {
                self.match_keyword("ASC");
            }
            if self.check_keyword("NULLS") {
                return Err(self.error("NULLS ordering is not supported"));
            }
            items.push(ordered);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        let order = self.ast.add(Kind::Order);
        self.ast.set_list(order, ArgKey::Expressions, items);
        Ok(order)
    }

    fn parse_alias(&mut self, expression: ExprId) -> Result<ExprId> {
        let explicit = self.match_keyword("AS");
        if !explicit && !self.check_alias_word() {
            return Ok(expression);
        }
        let name = self.parse_identifier()?;
        let alias = self.ast.add(Kind::Alias);
        self.ast.set(alias, ArgKey::This, Some(expression));
        self.ast.set(alias, ArgKey::Alias, Some(name));
        Ok(alias)
    }

    fn parse_table_alias(&mut self) -> Result<Option<ExprId>> {
        let explicit = self.match_keyword("AS");
        if !explicit && !self.check_alias_word() {
            return Ok(None);
        }
        let name = self.parse_identifier()?;
        let alias = self.ast.add(Kind::TableAlias);
        self.ast.set(alias, ArgKey::This, Some(name));
        if self.check(TokenType::LParen) {
            let columns = self.parse_identifier_list()?;
            self.ast.set_list(alias, ArgKey::Columns, columns);
        }
        Ok(Some(alias))
    }

    fn parse_table_source(&mut self) -> Result<ExprId> {
        let source = if self.check(TokenType::LParen) && self.peek_at(1).is_keyword("VALUES") {
            self.advance();
            self.advance();
            let mut rows = Vec::new();
            loop {
                rows.push(self.parse_tuple()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            let values = self.ast.add(Kind::Values);
            self.ast.set_list(values, ArgKey::Expressions, rows);
            values
        } else if self.check(TokenType::LParen) {
            self.advance();
            let query = self.parse_query()?;
            self.expect(TokenType::RParen)?;
            builder::subquery(&mut self.ast, query, None)
        } else {
            let mut parts = vec![self.parse_identifier()?];
            while self.match_token(TokenType::Dot) {
                parts.push(self.parse_identifier()?);
            }
            if parts.len() > 3 {
                return Err(self.error("Too many parts in table name"));
            }
            let table = self.ast.add(Kind::Table);
            let mut keys = [ArgKey::This, ArgKey::Db, ArgKey::Catalog].into_iter();
            for part in parts.into_iter().rev() {
                if let Some(key) = keys.next() {
                    self.ast.set(table, key, Some(part));
                }
            }
            table
        };
        if let Some(alias) = self.parse_table_alias()? {
            self.ast.set(source, ArgKey::Alias, Some(alias));
        }
        Ok(source)
    }

    fn parse_join(&mut self) -> Result<Option<ExprId>> {
        let start = self.pos;
        let side = ["LEFT", "RIGHT", "FULL"]
            .into_iter()
            .find(|side| self.check_keyword(side));
        if side.is_some() {
            self.advance();
        }
        let kind = ["INNER", "OUTER", "CROSS"]
            .into_iter()
            .find(|kind| self.check_keyword(kind));
        if kind.is_some() {
            self.advance();
        }
        if !self.match_keyword("JOIN") {
            self.pos = start;
            return Ok(None);
        }
        let source = self.parse_table_source()?;
        let join = builder::join(&mut self.ast, source, None, side, kind);
        if self.match_keyword("ON") {
            let condition = self.parse_expression()?;
            self.ast.set(join, ArgKey::On, Some(condition));
        } else if self.match_keyword("USING") {
            let columns = self.parse_identifier_list()?;
            self.ast.set_list(join, ArgKey::Using, columns);
        }
        Ok(Some(join))
    }

    fn parse_lateral(&mut self) -> Result<ExprId> {
        self.expect_keyword("LATERAL")?;
        self.expect_keyword("VIEW")?;
        let outer = self.match_keyword("OUTER");
        let function = self.parse_primary()?;
        if !self.ast.is(function, Kind::Func) {
            return Err(self.error("Expected a function after LATERAL VIEW"));
        }
        let lateral = builder::unary(&mut self.ast, Kind::Lateral, function);
        self.ast.set_flag(lateral, ArgKey::Outer, outer);

        let alias = self.ast.add(Kind::TableAlias);
        if self.check_alias_word() {
            let name = self.parse_identifier()?;
            self.ast.set(alias, ArgKey::This, Some(name));
        }
        if self.match_keyword("AS") {
            let mut columns = Vec::new();
            loop {
                columns.push(self.parse_identifier()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.ast.set_list(alias, ArgKey::Columns, columns);
        }
        self.ast.set(lateral, ArgKey::Alias, Some(alias));
        Ok(lateral)
    }

    fn parse_identifier(&mut self) -> Result<ExprId> {
        let token = self.peek().clone();
        match token.token_type {
            TokenType::QuotedIdentifier => {
                self.advance();
                Ok(builder::quoted_identifier(&mut self.ast, &token.text, true))
            }
            TokenType::Word => {
                self.advance();
                Ok(builder::quoted_identifier(&mut self.ast, &token.text, false))
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<ExprId>> {
        self.expect(TokenType::LParen)?;
        let mut identifiers = Vec::new();
        loop {
            identifiers.push(self.parse_identifier()?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;
        Ok(identifiers)
    }

    fn parse_tuple(&mut self) -> Result<ExprId> {
        self.expect(TokenType::LParen)?;
        let expressions = self.parse_expression_list()?;
        self.expect(TokenType::RParen)?;
        let tuple = self.ast.add(Kind::Tuple);
        self.ast.set_list(tuple, ArgKey::Expressions, expressions);
        Ok(tuple)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression_list(&mut self) -> Result<Vec<ExprId>> {
        let mut expressions = Vec::new();
        loop {
            expressions.push(self.parse_expression()?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(expressions)
    }

    pub fn parse_expression(&mut self) -> Result<ExprId> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ExprId> {
        let mut left = self.parse_and()?;
        while self.match_keyword("OR") {
            let right = self.parse_and()?;
            left = builder::binary(&mut self.ast, Kind::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExprId> {
        let mut left = self.parse_not()?;
        while self.match_keyword("AND") {
            let right = self.parse_not()?;
            left = builder::binary(&mut self.ast, Kind::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ExprId> {
        if self.match_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(builder::not(&mut self.ast, inner));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<ExprId> {
        let mut left = self.parse_concat()?;
        loop {
            let kind = match self.peek().token_type {
                TokenType::Eq => Some(Kind::Eq),
                TokenType::Neq => Some(Kind::Neq),
                TokenType::Lt => Some(Kind::Lt),
                TokenType::Lte => Some(Kind::Lte),
                TokenType::Gt => Some(Kind::Gt),
                TokenType::Gte => Some(Kind::Gte),
                TokenType::NullSafeEq => Some(Kind::NullSafeEq),
                _ => None,
            };
            if let Some(kind) = kind {
                self.advance();
                let right = self.parse_concat()?;
                left = builder::binary(&mut self.ast, kind, left, right);
                continue;
            }

            if self.match_keyword("IS") {
                let negate = self.match_keyword("NOT");
                let right = if self.match_keyword("NULL") {
                    builder::null(&mut self.ast)
                } else if self.match_keyword("TRUE") {
                    builder::boolean(&mut self.ast, true)
                } else if self.match_keyword("FALSE") {
                    builder::boolean(&mut self.ast, false)
                } else {
                    return Err(self.error("Expected NULL, TRUE or FALSE after IS"));
                };
                left = builder::binary(&mut self.ast, Kind::Is, left, right);
                if negate {
                    left = builder::not(&mut self.ast, left);
                }
                continue;
            }

            let negate = self.check_keyword("NOT")
                && ["IN", "BETWEEN", "LIKE", "ILIKE"]
                    .iter()
                    .any(|k| self.peek_at(1).is_keyword(k));
            if negate {
                self.advance();
            }

            let node = if self.match_keyword("IN") {
                self.expect(TokenType::LParen)?;
                let node = self.ast.add(Kind::In);
                self.ast.set(node, ArgKey::This, Some(left));
                if self.starts_query(0) {
                    let query = self.parse_query()?;
                    self.ast.set(node, ArgKey::Query, Some(query));
                } else {
                    let values = self.parse_expression_list()?;
                    self.ast.set_list(node, ArgKey::Expressions, values);
                }
                self.expect(TokenType::RParen)?;
                node
            } else if self.match_keyword("BETWEEN") {
                let low = self.parse_concat()?;
                self.expect_keyword("AND")?;
                let high = self.parse_concat()?;
                let node = self.ast.add(Kind::Between);
                self.ast.set(node, ArgKey::This, Some(left));
                self.ast.set(node, ArgKey::Low, Some(low));
                self.ast.set(node, ArgKey::High, Some(high));
                node
            } else if self.match_keyword("LIKE") {
                let right = self.parse_concat()?;
                builder::binary(&mut self.ast, Kind::Like, left, right)
            } else if self.match_keyword("ILIKE") {
                let right = self.parse_concat()?;
                builder::binary(&mut self.ast, Kind::ILike, left, right)
            } else {
                break;
            };
            left = if negate {
                builder::not(&mut self.ast, node)
            } else {
                node
            };
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<ExprId> {
        let mut left = self.parse_additive()?;
        while self.match_token(TokenType::DPipe) {
            let right = self.parse_additive()?;
            left = builder::binary(&mut self.ast, Kind::DPipe, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<ExprId> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let kind = match self.peek().token_type {
                TokenType::Plus => Kind::Add,
                TokenType::Dash => Kind::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = builder::binary(&mut self.ast, kind, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<ExprId> {
        let mut left = self.parse_unary()?;
        loop {
            let kind = match self.peek().token_type {
                TokenType::Star => Kind::Mul,
                TokenType::Slash => Kind::Div,
                TokenType::Percent => Kind::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = builder::binary(&mut self.ast, kind, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ExprId> {
        if self.match_token(TokenType::Dash) {
            let inner = self.parse_unary()?;
            return Ok(builder::unary(&mut self.ast, Kind::Neg, inner));
        }
        if self.match_token(TokenType::Plus) {
            return self.parse_unary();
        }
        let mut expression = self.parse_primary()?;
        while self.match_token(TokenType::DColon) {
            let to = self.parse_data_type()?;
            expression = builder::cast(&mut self.ast, expression, to);
        }
        Ok(expression)
    }

    fn parse_primary(&mut self) -> Result<ExprId> {
        let token = self.peek().clone();
        match token.token_type {
            TokenType::Number => {
                self.advance();
                Ok(builder::number(&mut self.ast, &token.text))
            }
            TokenType::String => {
                self.advance();
                Ok(builder::string(&mut self.ast, &token.text))
            }
            TokenType::QuotedIdentifier => self.parse_column(),
            TokenType::Star => {
                self.advance();
                let star = builder::star(&mut self.ast);
                self.parse_star_modifiers(star)?;
                Ok(star)
            }
            TokenType::LParen => {
                self.advance();
                if self.starts_query(0) {
                    let query = self.parse_query()?;
                    self.expect(TokenType::RParen)?;
                    return Ok(builder::subquery(&mut self.ast, query, None));
                }
                let first = self.parse_expression()?;
                if self.match_token(TokenType::Comma) {
                    let mut expressions = vec![first];
                    expressions.extend(self.parse_expression_list()?);
                    self.expect(TokenType::RParen)?;
                    let tuple = self.ast.add(Kind::Tuple);
                    self.ast.set_list(tuple, ArgKey::Expressions, expressions);
                    return Ok(tuple);
                }
                self.expect(TokenType::RParen)?;
                Ok(builder::paren(&mut self.ast, first))
            }
            TokenType::Word => self.parse_word(),
            _ => Err(self.error("Expected expression")),
        }
    }

    fn parse_word(&mut self) -> Result<ExprId> {
        let token = self.peek().clone();
        let upper = token.text.to_ascii_uppercase();
        match upper.as_str() {
            "NULL" => {
                self.advance();
                Ok(builder::null(&mut self.ast))
            }
            "TRUE" | "FALSE" => {
                self.advance();
                Ok(builder::boolean(&mut self.ast, upper == "TRUE"))
            }
            "CASE" => self.parse_case(),
            "CAST" => {
                self.advance();
                self.expect(TokenType::LParen)?;
                let inner = self.parse_expression()?;
                self.expect_keyword("AS")?;
                let to = self.parse_data_type()?;
                self.expect(TokenType::RParen)?;
                Ok(builder::cast(&mut self.ast, inner, to))
            }
            "EXISTS" => {
                self.advance();
                self.expect(TokenType::LParen)?;
                let query = self.parse_query()?;
                self.expect(TokenType::RParen)?;
                Ok(builder::unary(&mut self.ast, Kind::Exists, query))
            }
            "INTERVAL" => {
                self.advance();
                let value = self.parse_primary()?;
                let interval = builder::unary(&mut self.ast, Kind::Interval, value);
                if self.check(TokenType::Word) && !Self::is_reserved(self.peek()) {
                    let unit = self.advance().text.to_ascii_uppercase();
                    self.ast.set_text(interval, ArgKey::Unit, unit);
                }
                Ok(interval)
            }
            "ARRAY" if matches!(
                self.peek_at(1).token_type,
                TokenType::LParen | TokenType::LBracket
            ) =>
            {
                self.advance();
                let close = if self.match_token(TokenType::LParen) {
                    TokenType::RParen
                } else {
                    self.advance();
                    TokenType::RBracket
                };
                let expressions = if self.check(close) {
                    Vec::new()
                } else {
                    self.parse_expression_list()?
                };
                self.expect(close)?;
                let array = self.ast.add(Kind::Array);
                self.ast.set_list(array, ArgKey::Expressions, expressions);
                Ok(array)
            }
            _ if self.peek_at(1).token_type == TokenType::LParen && !Self::is_reserved(&token) => {
                self.parse_function()
            }
            _ if Self::is_reserved(&token) => Err(self.error("Unexpected keyword")),
            _ => self.parse_column(),
        }
    }

    fn parse_function(&mut self) -> Result<ExprId> {
        let name = self.advance().text;
        self.expect(TokenType::LParen)?;
        let distinct = self.match_keyword("DISTINCT");
        let args = if self.check(TokenType::Star) {
            self.advance();
            vec![builder::star(&mut self.ast)]
        } else if self.check(TokenType::RParen) {
            Vec::new()
        } else {
            self.parse_expression_list()?
        };
        self.expect(TokenType::RParen)?;
        let function = builder::func(&mut self.ast, &name, args);
        self.ast.set_flag(function, ArgKey::Distinct, distinct);

        if !self.match_keyword("OVER") {
            return Ok(function);
        }
        self.expect(TokenType::LParen)?;
        let window = builder::unary(&mut self.ast, Kind::Window, function);
        if self.match_keyword("PARTITION") {
            self.expect_keyword("BY")?;
            let partition = self.parse_expression_list()?;
            self.ast.set_list(window, ArgKey::PartitionBy, partition);
        }
        if self.check_keyword("ORDER") {
            let order = self.parse_order()?;
            self.ast.set(window, ArgKey::Order, Some(order));
        }
        self.expect(TokenType::RParen)?;
        Ok(window)
    }

    fn parse_case(&mut self) -> Result<ExprId> {
        self.expect_keyword("CASE")?;
        let case = self.ast.add(Kind::Case);
        if !self.check_keyword("WHEN") {
            let operand = self.parse_expression()?;
            self.ast.set(case, ArgKey::This, Some(operand));
        }
        let mut branches = Vec::new();
        while self.match_keyword("WHEN") {
            let condition = self.parse_expression()?;
            self.expect_keyword("THEN")?;
            let value = self.parse_expression()?;
            let branch = builder::unary(&mut self.ast, Kind::If, condition);
            self.ast.set(branch, ArgKey::True, Some(value));
            branches.push(branch);
        }
        if branches.is_empty() {
            return Err(self.error("Expected WHEN"));
        }
        self.ast.set_list(case, ArgKey::Ifs, branches);
        if self.match_keyword("ELSE") {
            let default = self.parse_expression()?;
            self.ast.set(case, ArgKey::Default, Some(default));
        }
        self.expect_keyword("END")?;
        Ok(case)
    }

    fn parse_column(&mut self) -> Result<ExprId> {
        let first = self.parse_identifier()?;
        let column = self.ast.add(Kind::Column);
        if !self.match_token(TokenType::Dot) {
            self.ast.set(column, ArgKey::This, Some(first));
            return Ok(column);
        }
        self.ast.set(column, ArgKey::Table, Some(first));
        if self.match_token(TokenType::Star) {
            let star = builder::star(&mut self.ast);
            self.parse_star_modifiers(star)?;
            self.ast.set(column, ArgKey::This, Some(star));
            return Ok(column);
        }
        let name = self.parse_identifier()?;
        self.ast.set(column, ArgKey::This, Some(name));
        if self.check(TokenType::Dot) {
            return Err(self.error("Column references support at most one qualifier"));
        }
        Ok(column)
    }

    fn parse_star_modifiers(&mut self, star: ExprId) -> Result<()> {
        if self.check_keyword("EXCEPT") && self.peek_at(1).token_type == TokenType::LParen {
            self.advance();
            self.expect(TokenType::LParen)?;
            let mut columns = Vec::new();
            loop {
                columns.push(self.parse_column()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            self.ast.set_list(star, ArgKey::Except, columns);
        }
        if self.check_keyword("REPLACE") && self.peek_at(1).token_type == TokenType::LParen {
            self.advance();
            self.expect(TokenType::LParen)?;
            let mut replacements = Vec::new();
            loop {
                let expression = self.parse_expression()?;
                self.expect_keyword("AS")?;
                let name = self.parse_identifier()?;
                let alias = self.ast.add(Kind::Alias);
                self.ast.set(alias, ArgKey::This, Some(expression));
                self.ast.set(alias, ArgKey::Alias, Some(name));
                replacements.push(alias);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            self.ast.set_list(star, ArgKey::Replace, replacements);
        }
        Ok(())
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let name = self.expect(TokenType::Word)?.text;
        let mut text = name.clone();
        if name.eq_ignore_ascii_case("DOUBLE") && self.check_keyword("PRECISION") {
            self.advance();
            text.push_str(" PRECISION");
        }
        let (open, close) = if self.check(TokenType::Lt) {
            (TokenType::Lt, TokenType::Gt)
        } else if self.check(TokenType::LParen) {
            (TokenType::LParen, TokenType::RParen)
        } else {
            (TokenType::Eof, TokenType::Eof)
        };
        if open != TokenType::Eof {
            let mut depth = 0usize;
            loop {
                let token = self.advance();
                if token.token_type == TokenType::Eof {
                    return Err(self.error("Unterminated type parameters"));
                }
                if token.token_type == open {
                    depth += 1;
                } else if token.token_type == close {
                    depth = depth.saturating_sub(1);
                }
                text.push(' ');
                text.push_str(&token.text);
                if depth == 0 {
                    break;
                }
            }
        }
        text.parse::<DataType>()
            .map_err(|e| self.error(&e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_shape() {
        let ast = parse_one("SELECT a AS b, x.c FROM x WHERE a > 1").unwrap();
        let root = ast.root();
        assert!(ast.is(root, Kind::Select));
        assert_eq!(ast.named_selects(root), vec!["b", "c"]);
        assert!(ast.get(root, ArgKey::Where).is_some());
    }

    #[test]
    fn test_parse_qualified_table() {
        let ast = parse_one("SELECT 1 FROM c.db.x AS y").unwrap();
        let table = ast.find(ast.root(), Kind::Table).unwrap();
        assert_eq!(ast.name(table), "x");
        assert_eq!(ast.arg_name(table, ArgKey::Db), "db");
        assert_eq!(ast.arg_name(table, ArgKey::Catalog), "c");
        assert_eq!(ast.alias(table), "y");
    }

    #[test]
    fn test_parse_union_moves_modifiers() {
        let ast = parse_one("SELECT a FROM x UNION SELECT a FROM y ORDER BY a LIMIT 1").unwrap();
        let root = ast.root();
        assert!(ast.is(root, Kind::Union));
        assert!(ast.get(root, ArgKey::Order).is_some());
        assert_eq!(
            ast.to_sql(),
            "SELECT a FROM x UNION SELECT a FROM y ORDER BY a LIMIT 1"
        );
    }

    #[test]
    fn test_parse_not_forms() {
        let ast = parse_one("SELECT a NOT IN (1, 2), b IS NOT NULL, c NOT BETWEEN 1 AND 2").unwrap();
        assert_eq!(
            ast.to_sql(),
            "SELECT NOT a IN (1, 2), NOT b IS NULL, NOT c BETWEEN 1 AND 2"
        );
    }

    #[test]
    fn test_parse_lateral_view() {
        let ast = parse_one("SELECT c FROM x LATERAL VIEW EXPLODE(x.arr) t AS c").unwrap();
        assert_eq!(
            ast.to_sql(),
            "SELECT c FROM x LATERAL VIEW EXPLODE(x.arr) t AS c"
        );
    }

    #[test]
    fn test_parse_star_modifiers() {
        let ast = parse_one("SELECT * EXCEPT (a) REPLACE (b + 1 AS b) FROM x").unwrap();
        assert_eq!(
            ast.to_sql(),
            "SELECT * EXCEPT (a) REPLACE (b + 1 AS b) FROM x"
        );
    }

    #[test]
    fn test_parse_window() {
        let ast = parse_one("SELECT ROW_NUMBER() OVER (PARTITION BY a ORDER BY b DESC) FROM x").unwrap();
        assert!(ast.find(ast.root(), Kind::Window).is_some());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_one("SELECT FROM"), Err(Error::Parse(_))));
        assert!(matches!(parse_one("SELECT a FROM x y z"), Err(Error::Parse(_))));
        assert!(matches!(parse_one("SELECT 'a"), Err(Error::Tokenize { .. })));
    }
}
