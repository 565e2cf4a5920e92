//! Template compiler
//!
//! Turns the token stream from the lexer into the artifact node list. Blocks
//! are assembled on an explicit stack, so every structural mistake
//! (`@endif` without `@if`, an `@foreach` never closed) is reported with the
//! directive, the template name and the line.

use thiserror::Error;
use tracing::debug;

use crate::expr::{self, Expr, ExprError, ForHeader, ForeachHeader};
use crate::hashing::content_hash;
use crate::ir::{Artifact, Branch, Node};
use crate::lexer::{tokenize, DirectiveKind, Token};

/// Deepest block nesting a template may use.
pub const MAX_BLOCK_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Unbalanced parentheses in @{directive} in template `{template}` at line {line}")]
    UnbalancedParens { template: String, directive: String, line: usize },

    #[error("@{directive} requires an argument list in template `{template}` at line {line}")]
    MissingArguments { template: String, directive: String, line: usize },

    #[error("Unterminated `{opener}` in template `{template}` at line {line}")]
    Unterminated { template: String, opener: String, line: usize },

    #[error("Unexpected @{directive} in template `{template}` at line {line}")]
    UnexpectedDirective { template: String, directive: String, line: usize },

    #[error("@{directive} opened at line {line} is never closed in template `{template}`")]
    UnclosedBlock { template: String, directive: String, line: usize },

    #[error("@{directive} nests blocks deeper than {max} in template `{template}` at line {line}")]
    NestingTooDeep { template: String, directive: String, line: usize, max: usize },

    #[error("Invalid expression in {directive} in template `{template}` at line {line}: {source}")]
    Expression {
        template: String,
        directive: String,
        line: usize,
        source: ExprError,
    },
}

impl CompileError {
    pub fn line(&self) -> usize {
        match self {
            CompileError::UnbalancedParens { line, .. }
            | CompileError::MissingArguments { line, .. }
            | CompileError::Unterminated { line, .. }
            | CompileError::UnexpectedDirective { line, .. }
            | CompileError::UnclosedBlock { line, .. }
            | CompileError::NestingTooDeep { line, .. }
            | CompileError::Expression { line, .. } => *line,
        }
    }
}

enum BlockKind {
    If {
        branches: Vec<Branch>,
        /// Condition of the branch being filled; `None` once inside `@else`.
        cond: Option<Expr>,
    },
    For(ForHeader),
    Foreach(ForeachHeader),
    While(Expr),
}

struct OpenBlock {
    kind: BlockKind,
    opener: DirectiveKind,
    line: usize,
    body: Vec<Node>,
}

struct Parser<'a> {
    template: &'a str,
    stack: Vec<OpenBlock>,
    root: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(template: &'a str) -> Self {
        Self { template, stack: Vec::new(), root: Vec::new() }
    }

    fn body(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(block) => &mut block.body,
            None => &mut self.root,
        }
    }

    fn expr_error(&self, directive: &str, line: usize, source: ExprError) -> CompileError {
        CompileError::Expression {
            template: self.template.to_string(),
            directive: directive.to_string(),
            line,
            source,
        }
    }

    fn unexpected(&self, kind: DirectiveKind, line: usize) -> CompileError {
        CompileError::UnexpectedDirective {
            template: self.template.to_string(),
            directive: kind.keyword().to_string(),
            line,
        }
    }

    fn open(&mut self, kind: BlockKind, opener: DirectiveKind, line: usize) -> Result<(), CompileError> {
        if self.stack.len() >= MAX_BLOCK_DEPTH {
            return Err(CompileError::NestingTooDeep {
                template: self.template.to_string(),
                directive: opener.keyword().to_string(),
                line,
                max: MAX_BLOCK_DEPTH,
            });
        }
        self.stack.push(OpenBlock { kind, opener, line, body: Vec::new() });
        Ok(())
    }

    /// Pop the innermost block if it was opened by `opener`.
    fn close(&mut self, opener: DirectiveKind, closer: DirectiveKind, line: usize) -> Result<OpenBlock, CompileError> {
        if self.stack.last().map(|block| block.opener) == Some(opener) {
            if let Some(block) = self.stack.pop() {
                return Ok(block);
            }
        }
        Err(self.unexpected(closer, line))
    }

    fn feed(&mut self, token: Token) -> Result<(), CompileError> {
        match token {
            Token::Text { text } => self.body().push(Node::Text { text }),
            Token::Echo { expr, escaped, line } => {
                let directive = if escaped { "{{ }}" } else { "{!! !!}" };
                let expr = expr::parse_expression(&expr).map_err(|e| self.expr_error(directive, line, e))?;
                self.body().push(Node::Output { expr, escape: escaped });
            }
            Token::Raw { code, line } => {
                let stmts = expr::parse_statements(&code).map_err(|e| self.expr_error("@php", line, e))?;
                self.body().push(Node::Code { stmts });
            }
            Token::Directive { kind, args, line } => self.directive(kind, args.unwrap_or_default(), line)?,
        }
        Ok(())
    }

    fn directive(&mut self, kind: DirectiveKind, args: String, line: usize) -> Result<(), CompileError> {
        let at = format!("@{}", kind.keyword());
        match kind {
            DirectiveKind::If => {
                let cond = expr::parse_expression(&args).map_err(|e| self.expr_error(&at, line, e))?;
                self.open(BlockKind::If { branches: Vec::new(), cond: Some(cond) }, kind, line)?;
            }
            DirectiveKind::ElseIf | DirectiveKind::Else => {
                let next = match kind {
                    DirectiveKind::ElseIf => {
                        Some(expr::parse_expression(&args).map_err(|e| self.expr_error(&at, line, e))?)
                    }
                    _ => None,
                };
                let unexpected = self.unexpected(kind, line);
                if let Some(OpenBlock { kind: BlockKind::If { branches, cond }, body, .. }) = self.stack.last_mut() {
                    // a taken condition means we are already past @else
                    if let Some(current) = cond.take() {
                        branches.push(Branch { cond: current, body: std::mem::take(body) });
                        *cond = next;
                        return Ok(());
                    }
                }
                return Err(unexpected);
            }
            DirectiveKind::EndIf => {
                let block = self.close(DirectiveKind::If, kind, line)?;
                let node = match block.kind {
                    BlockKind::If { mut branches, cond: Some(cond) } => {
                        branches.push(Branch { cond, body: block.body });
                        Node::If { branches, otherwise: None }
                    }
                    BlockKind::If { branches, cond: None } => Node::If { branches, otherwise: Some(block.body) },
                    _ => return Err(self.unexpected(kind, line)),
                };
                self.body().push(node);
            }
            DirectiveKind::For => {
                let header = expr::parse_for(&args).map_err(|e| self.expr_error(&at, line, e))?;
                self.open(BlockKind::For(header), kind, line)?;
            }
            DirectiveKind::Foreach => {
                let header = expr::parse_foreach(&args).map_err(|e| self.expr_error(&at, line, e))?;
                self.open(BlockKind::Foreach(header), kind, line)?;
            }
            DirectiveKind::While => {
                let cond = expr::parse_expression(&args).map_err(|e| self.expr_error(&at, line, e))?;
                self.open(BlockKind::While(cond), kind, line)?;
            }
            DirectiveKind::EndFor | DirectiveKind::EndForeach | DirectiveKind::EndWhile => {
                let opener = match kind {
                    DirectiveKind::EndFor => DirectiveKind::For,
                    DirectiveKind::EndForeach => DirectiveKind::Foreach,
                    _ => DirectiveKind::While,
                };
                let block = self.close(opener, kind, line)?;
                let node = match block.kind {
                    BlockKind::For(header) => Node::For { header, body: block.body },
                    BlockKind::Foreach(header) => Node::Foreach { header, body: block.body },
                    BlockKind::While(cond) => Node::While { cond, body: block.body },
                    BlockKind::If { .. } => return Err(self.unexpected(kind, line)),
                };
                self.body().push(node);
            }
            DirectiveKind::Echo => {
                let expr = expr::parse_expression(&args).map_err(|e| self.expr_error(&at, line, e))?;
                self.body().push(Node::Output { expr, escape: false });
            }
            DirectiveKind::View => {
                let mut parsed = expr::parse_arguments(&args).map_err(|e| self.expr_error(&at, line, e))?;
                if parsed.is_empty() || parsed.len() > 2 {
                    let source = ExprError {
                        message: format!("expected a view name and optional parameters, got {} arguments", parsed.len()),
                        column: 1,
                    };
                    return Err(self.expr_error(&at, line, source));
                }
                let params = if parsed.len() == 2 { parsed.pop() } else { None };
                let target = parsed.remove(0);
                self.body().push(Node::Include { target, params });
            }
            DirectiveKind::Url | DirectiveKind::Lang | DirectiveKind::Load | DirectiveKind::Old | DirectiveKind::Message => {
                let args = expr::parse_arguments(&args).map_err(|e| self.expr_error(&at, line, e))?;
                let call = Expr::Call { name: kind.keyword().to_string(), args };
                // old input echoes user data back into the page
                let escape = kind == DirectiveKind::Old;
                self.body().push(Node::Output { expr: call, escape });
            }
            DirectiveKind::Php | DirectiveKind::End => return Err(self.unexpected(kind, line)),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Node>, CompileError> {
        if let Some(block) = self.stack.pop() {
            return Err(CompileError::UnclosedBlock {
                template: self.template.to_string(),
                directive: block.opener.keyword().to_string(),
                line: block.line,
            });
        }
        Ok(self.root)
    }
}

/// Compile template source into an artifact.
///
/// `template` is the logical view name; it only appears in error messages,
/// the artifact itself depends on nothing but `source`.
pub fn compile_source(template: &str, source: &str) -> Result<Artifact, CompileError> {
    let tokens = tokenize(template, source)?;
    let mut parser = Parser::new(template);
    for token in tokens {
        parser.feed(token)?;
    }
    let nodes = parser.finish()?;
    debug!(template, nodes = nodes.len(), "compiled template");
    Ok(Artifact { hash: content_hash(source), nodes })
}
