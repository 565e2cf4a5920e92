//! Expression language for directive arguments and echoes
//!
//! Templates address variables as `$name`, so the grammar follows the
//! PHP-style syntax template authors already write:
//! literals, `$var`, `$a['k']`, `$a->k`, builtin calls, the usual
//! operators, and simple statements for `@php` blocks and `@for` headers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at column {column}")]
pub struct ExprError {
    pub message: String,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: Value },
    Var { name: String },
    Array { items: Vec<ArrayItem> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Prop { target: Box<Expr>, name: String },
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary {
        cond: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// The string value of a literal string expression, if it is one.
    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            Expr::Literal { value: Value::String(s) } => Some(s),
            _ => None,
        }
    }

    /// True if evaluating this expression reads any variable.
    pub fn references_variables(&self) -> bool {
        match self {
            Expr::Literal { .. } => false,
            Expr::Var { .. } => true,
            Expr::Array { items } => items.iter().any(|item| {
                item.key.as_ref().map_or(false, Expr::references_variables)
                    || item.value.references_variables()
            }),
            Expr::Index { target, index } => {
                target.references_variables() || index.references_variables()
            }
            Expr::Prop { target, .. } => target.references_variables(),
            Expr::Call { args, .. } => args.iter().any(Expr::references_variables),
            Expr::Unary { expr, .. } => expr.references_variables(),
            Expr::Binary { lhs, rhs, .. } => lhs.references_variables() || rhs.references_variables(),
            Expr::Ternary { cond, then, otherwise } => {
                cond.references_variables()
                    || then.as_ref().map_or(false, |t| t.references_variables())
                    || otherwise.references_variables()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Coalesce,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn from_punct(p: &str) -> Option<(Self, u8)> {
        let op = match p {
            "||" => (BinaryOp::Or, 1),
            "&&" => (BinaryOp::And, 2),
            "==" => (BinaryOp::Eq, 3),
            "!=" => (BinaryOp::NotEq, 3),
            "===" => (BinaryOp::Identical, 3),
            "!==" => (BinaryOp::NotIdentical, 3),
            "<" => (BinaryOp::Lt, 4),
            "<=" => (BinaryOp::Le, 4),
            ">" => (BinaryOp::Gt, 4),
            ">=" => (BinaryOp::Ge, 4),
            "+" => (BinaryOp::Add, 5),
            "-" => (BinaryOp::Sub, 5),
            "." => (BinaryOp::Concat, 5),
            "*" => (BinaryOp::Mul, 6),
            "/" => (BinaryOp::Div, 6),
            "%" => (BinaryOp::Mod, 6),
            _ => return None,
        };
        Some(op)
    }
}

/// Assignment target: a variable with an optional index path (`$a['x'][0]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub var: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Concat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    Assign { target: Place, op: AssignOp, value: Expr },
    Step { target: Place, delta: i64 },
    Echo { expr: Expr },
    Expr { expr: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachHeader {
    pub iterable: Expr,
    pub key: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForHeader {
    pub init: Vec<Stmt>,
    pub cond: Option<Expr>,
    pub step: Vec<Stmt>,
}

/// Parse a single expression; the whole input must be consumed.
pub fn parse_expression(src: &str) -> Result<Expr, ExprError> {
    let mut p = Parser::new(src)?;
    let expr = p.parse_expr()?;
    p.expect_end()?;
    Ok(expr)
}

/// Parse a comma separated argument list (without the surrounding parens).
pub fn parse_arguments(src: &str) -> Result<Vec<Expr>, ExprError> {
    let mut p = Parser::new(src)?;
    let mut args = Vec::new();
    if p.at_end() {
        return Ok(args);
    }
    loop {
        args.push(p.parse_expr()?);
        if !p.eat(",") {
            break;
        }
    }
    p.expect_end()?;
    Ok(args)
}

/// Parse a `;` separated statement list, as found in `@php` blocks.
pub fn parse_statements(src: &str) -> Result<Vec<Stmt>, ExprError> {
    let mut p = Parser::new(src)?;
    let mut stmts = Vec::new();
    while !p.at_end() {
        if p.eat(";") {
            continue;
        }
        stmts.push(p.parse_stmt()?);
        if !p.at_end() && !p.eat(";") {
            return Err(p.error("expected `;` between statements"));
        }
    }
    Ok(stmts)
}

/// Parse `$items as $item` or `$items as $key => $value`.
pub fn parse_foreach(src: &str) -> Result<ForeachHeader, ExprError> {
    let mut p = Parser::new(src)?;
    let iterable = p.parse_expr()?;
    match p.next() {
        Some((Tok::Ident(kw), _)) if kw.eq_ignore_ascii_case("as") => {}
        _ => return Err(p.error("expected `as` in foreach")),
    }
    let first = p.expect_var()?;
    let header = if p.eat("=>") {
        let value = p.expect_var()?;
        ForeachHeader { iterable, key: Some(first), value }
    } else {
        ForeachHeader { iterable, key: None, value: first }
    };
    p.expect_end()?;
    Ok(header)
}

/// Parse `init; cond; step`, each part optional.
pub fn parse_for(src: &str) -> Result<ForHeader, ExprError> {
    let mut p = Parser::new(src)?;
    let init = p.parse_stmt_list(";")?;
    p.expect(";")?;
    let cond = if p.peek_punct(";") { None } else { Some(p.parse_expr()?) };
    p.expect(";")?;
    let step = if p.at_end() { Vec::new() } else { p.parse_stmt_list("")? };
    p.expect_end()?;
    Ok(ForHeader { init, cond, step })
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Var(String),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "===", "!==", "??", "==", "!=", "<=", ">=", "&&", "||", "=>", "->", "++", "--", "+=", "-=",
    ".=", "(", ")", "[", "]", ",", ";", "?", ":", "!", "<", ">", "+", "-", "*", "/", "%", ".",
    "=",
];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(src: &str) -> Result<Vec<(Tok, usize)>, ExprError> {
    let mut toks = Vec::new();
    let bytes = src.as_bytes();
    let mut pos = 0;
    let err = |message: &str, at: usize| ExprError { message: message.to_string(), column: at + 1 };

    while pos < src.len() {
        let c = src[pos..].chars().next().unwrap_or(' ');
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        let start = pos;
        if c == '$' {
            pos += 1;
            let name_start = pos;
            while pos < src.len() && is_ident_char(bytes[pos] as char) {
                pos += 1;
            }
            if pos == name_start || !is_ident_start(bytes[name_start] as char) {
                return Err(err("expected variable name after `$`", start));
            }
            toks.push((Tok::Var(src[name_start..pos].to_string()), start));
        } else if is_ident_start(c) {
            while pos < src.len() && is_ident_char(bytes[pos] as char) {
                pos += 1;
            }
            toks.push((Tok::Ident(src[start..pos].to_string()), start));
        } else if c.is_ascii_digit() {
            while pos < src.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let is_float = pos + 1 < src.len() && bytes[pos] == b'.' && bytes[pos + 1].is_ascii_digit();
            if is_float {
                pos += 1;
                while pos < src.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                let f: f64 = src[start..pos].parse().map_err(|_| err("invalid number", start))?;
                toks.push((Tok::Float(f), start));
            } else {
                let n: i64 = src[start..pos].parse().map_err(|_| err("integer out of range", start))?;
                toks.push((Tok::Int(n), start));
            }
        } else if c == '\'' || c == '"' {
            let (s, end) = lex_string(src, pos).ok_or_else(|| err("unterminated string literal", start))?;
            pos = end;
            toks.push((Tok::Str(s), start));
        } else if let Some(p) = PUNCTS.iter().find(|p| src[pos..].starts_with(**p)) {
            pos += p.len();
            toks.push((Tok::Punct(*p), start));
        } else {
            return Err(err(&format!("unexpected character `{}`", c), start));
        }
    }
    Ok(toks)
}

/// Lex a quoted string starting at `start`; returns the unescaped value and
/// the byte offset just past the closing quote.
fn lex_string(src: &str, start: usize) -> Option<(String, usize)> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next()?;
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Some((out, start + i + c.len_utf8()));
        }
        if c == '\\' {
            let (_, esc) = chars.next()?;
            match (quote, esc) {
                ('"', 'n') => out.push('\n'),
                ('"', 't') => out.push('\t'),
                ('"', 'r') => out.push('\r'),
                (_, '\\') => out.push('\\'),
                (q, e) if e == q => out.push(e),
                ('"', '$') => out.push('$'),
                (_, e) => {
                    out.push('\\');
                    out.push(e);
                }
            }
        } else {
            out.push(c);
        }
    }
    None
}

// --- Parser ---

/// Deepest expression tree the parser builds. Parenthesis nesting, unary
/// chains and folded operator chains all count.
pub const MAX_EXPR_DEPTH: usize = 128;

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
    len: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ExprError> {
        Ok(Self { toks: tokenize(src)?, pos: 0, len: src.len(), depth: 0 })
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ExprError>) -> Result<T, ExprError> {
        self.enter()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Tok, usize)> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn column(&self) -> usize {
        self.toks.get(self.pos).map_or(self.len, |(_, at)| *at) + 1
    }

    fn error(&self, message: &str) -> ExprError {
        ExprError { message: message.to_string(), column: self.column() }
    }

    fn peek_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(q)) if *q == p)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &str) -> Result<(), ExprError> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", p)))
        }
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn expect_var(&mut self) -> Result<String, ExprError> {
        match self.peek() {
            Some(Tok::Var(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a variable")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::parse_ternary)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.parse_coalesce()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = if self.eat(":") {
            None
        } else {
            let then = self.parse_expr()?;
            self.expect(":")?;
            Some(Box::new(then))
        };
        let otherwise = self.parse_expr()?;
        Ok(Expr::Ternary { cond: Box::new(cond), then, otherwise: Box::new(otherwise) })
    }

    fn parse_coalesce(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_binary(1)?;
        if self.eat("??") {
            let rhs = self.nested(Self::parse_coalesce)?;
            return Ok(Expr::Binary { op: BinaryOp::Coalesce, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        let entered = self.depth;
        loop {
            let (op, prec) = match self.peek() {
                Some(Tok::Punct(p)) => match BinaryOp::from_punct(p) {
                    Some(found) => found,
                    None => break,
                },
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.depth = entered;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat("!") {
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr) });
        }
        if self.eat("-") {
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(expr) });
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, ExprError> {
        let entered = self.depth;
        loop {
            if self.peek_punct("[") || self.peek_punct("->") {
                self.enter()?;
            }
            if self.eat("[") {
                let index = self.parse_expr()?;
                self.expect("]")?;
                expr = Expr::Index { target: Box::new(expr), index: Box::new(index) };
            } else if self.eat("->") {
                match self.next() {
                    Some((Tok::Ident(name), _)) => {
                        expr = Expr::Prop { target: Box::new(expr), name };
                    }
                    _ => return Err(self.error("expected property name after `->`")),
                }
            } else {
                self.depth = entered;
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let column = self.column();
        let Some((tok, _)) = self.next() else {
            return Err(self.error("unexpected end of expression"));
        };
        match tok {
            Tok::Var(name) => Ok(Expr::Var { name }),
            Tok::Int(n) => Ok(Expr::Literal { value: Value::from(n) }),
            Tok::Float(f) => Ok(Expr::Literal { value: Value::from(f) }),
            Tok::Str(s) => Ok(Expr::Literal { value: Value::String(s) }),
            Tok::Ident(name) => match name.to_ascii_lowercase().as_str() {
                "true" => Ok(Expr::Literal { value: Value::Bool(true) }),
                "false" => Ok(Expr::Literal { value: Value::Bool(false) }),
                "null" => Ok(Expr::Literal { value: Value::Null }),
                _ => {
                    if !self.eat("(") {
                        return Err(ExprError {
                            message: format!("unknown constant `{}`", name),
                            column,
                        });
                    }
                    let mut args = Vec::new();
                    if !self.eat(")") {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    Ok(Expr::Call { name, args })
                }
            },
            Tok::Punct("(") => {
                let inner = self.parse_expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    let first = self.parse_expr()?;
                    let item = if self.eat("=>") {
                        ArrayItem { key: Some(first), value: self.parse_expr()? }
                    } else {
                        ArrayItem { key: None, value: first }
                    };
                    items.push(item);
                    if !self.eat(",") {
                        self.expect("]")?;
                        break;
                    }
                }
                Ok(Expr::Array { items })
            }
            Tok::Punct(p) => Err(ExprError { message: format!("unexpected `{}`", p), column }),
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ExprError> {
        if let Some(Tok::Ident(kw)) = self.peek() {
            if kw.eq_ignore_ascii_case("echo") {
                self.pos += 1;
                return Ok(Stmt::Echo { expr: self.parse_expr()? });
            }
        }
        let column = self.column();
        let expr = self.parse_expr()?;
        let assign = match self.peek() {
            Some(Tok::Punct("=")) => Some(AssignOp::Set),
            Some(Tok::Punct("+=")) => Some(AssignOp::Add),
            Some(Tok::Punct("-=")) => Some(AssignOp::Sub),
            Some(Tok::Punct(".=")) => Some(AssignOp::Concat),
            _ => None,
        };
        if let Some(op) = assign {
            self.pos += 1;
            let target = into_place(expr, column)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign { target, op, value });
        }
        if self.eat("++") {
            return Ok(Stmt::Step { target: into_place(expr, column)?, delta: 1 });
        }
        if self.eat("--") {
            return Ok(Stmt::Step { target: into_place(expr, column)?, delta: -1 });
        }
        Ok(Stmt::Expr { expr })
    }

    /// Comma separated statements, stopping before `terminator` or the end.
    fn parse_stmt_list(&mut self, terminator: &str) -> Result<Vec<Stmt>, ExprError> {
        let mut stmts = Vec::new();
        if self.at_end() || (!terminator.is_empty() && self.peek_punct(terminator)) {
            return Ok(stmts);
        }
        loop {
            stmts.push(self.parse_stmt()?);
            if !self.eat(",") {
                return Ok(stmts);
            }
        }
    }
}

fn into_place(expr: Expr, column: usize) -> Result<Place, ExprError> {
    let mut path = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Var { name } => {
                path.reverse();
                return Ok(Place { var: name, path });
            }
            Expr::Index { target, index } => {
                path.push(*index);
                current = *target;
            }
            Expr::Prop { target, name } => {
                path.push(Expr::Literal { value: Value::String(name) });
                current = *target;
            }
            _ => {
                return Err(ExprError { message: "invalid assignment target".to_string(), column });
            }
        }
    }
}
