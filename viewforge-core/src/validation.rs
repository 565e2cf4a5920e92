//! Template Lint - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! The report is invalid as soon as one violation is an error.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::compiler::compile_source;
use crate::expr::{parse_arguments, parse_expression};
use crate::lexer::{scan, DirectiveKind, Token, UnknownDirective};
use crate::templates::normalize_name;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LintViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintReport {
    pub valid: bool,
    pub template: String,
    pub violations: Vec<LintViolation>,
}

impl LintReport {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }
}

/// What a rule gets to look at. Only built for templates that compile.
pub struct LintInput<'a> {
    pub template: &'a str,
    pub source: &'a str,
    pub tokens: &'a [Token],
    /// `@word(` sequences the lexer left in text.
    pub unknown: &'a [UnknownDirective],
    pub known_views: &'a BTreeSet<String>,
}

/// Lint rule trait - produces violations
pub trait LintRule {
    fn name(&self) -> &'static str;
    fn check(&self, input: &LintInput) -> Vec<LintViolation>;
}

fn violation(rule: &dyn LintRule, severity: ViolationSeverity, message: String, line: usize) -> LintViolation {
    LintViolation { rule: rule.name().to_string(), severity, message, line }
}

/// First argument of every `@view` directive, with its line.
fn view_targets<'a>(tokens: &'a [Token]) -> impl Iterator<Item = (Option<String>, usize)> + 'a {
    tokens.iter().filter_map(|token| match token {
        Token::Directive { kind: DirectiveKind::View, args: Some(args), line } => {
            let target = parse_arguments(args)
                .ok()
                .and_then(|args| args.first().and_then(|e| e.as_literal_str().map(str::to_string)));
            Some((target, *line))
        }
        _ => None,
    })
}

// --- Concrete Rules ---

pub struct DynamicIncludeRule;

impl LintRule for DynamicIncludeRule {
    fn name(&self) -> &'static str { "dynamic_include" }

    fn check(&self, input: &LintInput) -> Vec<LintViolation> {
        view_targets(input.tokens)
            .filter(|(target, _)| target.is_none())
            .map(|(_, line)| {
                violation(
                    self,
                    ViolationSeverity::Info,
                    "@view target is computed at runtime and will not be inlined".to_string(),
                    line,
                )
            })
            .collect()
    }
}

pub struct MissingIncludeRule;

impl LintRule for MissingIncludeRule {
    fn name(&self) -> &'static str { "missing_include" }

    fn check(&self, input: &LintInput) -> Vec<LintViolation> {
        view_targets(input.tokens)
            .filter_map(|(target, line)| {
                let target = target?;
                let known = normalize_name(&target).map_or(false, |n| input.known_views.contains(&n));
                (!known).then(|| {
                    violation(self, ViolationSeverity::Error, format!("Included view `{}` does not exist", target), line)
                })
            })
            .collect()
    }
}

pub struct RawOutputRule;

impl LintRule for RawOutputRule {
    fn name(&self) -> &'static str { "raw_output" }

    fn check(&self, input: &LintInput) -> Vec<LintViolation> {
        input
            .tokens
            .iter()
            .filter_map(|token| match token {
                Token::Echo { expr, escaped: false, line } => {
                    let parsed = parse_expression(expr).ok()?;
                    parsed.references_variables().then(|| {
                        violation(
                            self,
                            ViolationSeverity::Warning,
                            format!("Unescaped output of `{}`", expr),
                            *line,
                        )
                    })
                }
                _ => None,
            })
            .collect()
    }
}

pub struct UnknownDirectiveRule;

impl LintRule for UnknownDirectiveRule {
    fn name(&self) -> &'static str { "unknown_directive" }

    fn check(&self, input: &LintInput) -> Vec<LintViolation> {
        input
            .unknown
            .iter()
            .map(|u| {
                violation(
                    self,
                    ViolationSeverity::Warning,
                    format!("`@{}(` is not a directive and is output as text", u.word),
                    u.line,
                )
            })
            .collect()
    }
}

/// Linter orchestrates rules
pub struct Linter {
    rules: Vec<Box<dyn LintRule>>,
}

impl Linter {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(DynamicIncludeRule),
                Box::new(MissingIncludeRule),
                Box::new(RawOutputRule),
                Box::new(UnknownDirectiveRule),
            ],
        }
    }

    pub fn lint(&self, template: &str, source: &str, known_views: &BTreeSet<String>) -> LintReport {
        let scanned = match compile_source(template, source).and_then(|_| scan(template, source)) {
            Ok(scanned) => scanned,
            Err(e) => {
                return LintReport {
                    valid: false,
                    template: template.to_string(),
                    violations: vec![LintViolation {
                        rule: "syntax".to_string(),
                        severity: ViolationSeverity::Error,
                        message: e.to_string(),
                        line: e.line(),
                    }],
                };
            }
        };

        let input = LintInput {
            template,
            source,
            tokens: &scanned.tokens,
            unknown: &scanned.unknown,
            known_views,
        };
        let mut violations: Vec<_> = self.rules.iter().flat_map(|rule| rule.check(&input)).collect();
        violations.sort_by(|a, b| a.line.cmp(&b.line).then(a.severity.cmp(&b.severity)));

        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        LintReport { valid, template: template.to_string(), violations }
    }
}

impl Default for Linter {
    fn default() -> Self {
        Self::new()
    }
}
