//! Template tokenizer
//!
//! Splits template text into literal text, echoes (`{{ }}`, `{!! !!}`),
//! directives (`@if(...)`, `@endif`, ...) and raw `@php ... @end` blocks in a
//! single pass. Argument lists are cut out with [`extract_balanced`], so a
//! nested call such as `@if(fn(a, b))` never truncates the argument.

use crate::compiler::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    If,
    ElseIf,
    Else,
    EndIf,
    For,
    EndFor,
    Foreach,
    EndForeach,
    While,
    EndWhile,
    Echo,
    View,
    Url,
    Lang,
    Load,
    Old,
    Message,
    Php,
    End,
}

impl DirectiveKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "if" => DirectiveKind::If,
            "elseif" => DirectiveKind::ElseIf,
            "else" => DirectiveKind::Else,
            "endif" => DirectiveKind::EndIf,
            "for" => DirectiveKind::For,
            "endfor" => DirectiveKind::EndFor,
            "foreach" => DirectiveKind::Foreach,
            "endforeach" => DirectiveKind::EndForeach,
            "while" => DirectiveKind::While,
            "endwhile" => DirectiveKind::EndWhile,
            "echo" => DirectiveKind::Echo,
            "view" => DirectiveKind::View,
            "url" => DirectiveKind::Url,
            "lang" => DirectiveKind::Lang,
            "load" => DirectiveKind::Load,
            "old" => DirectiveKind::Old,
            "message" => DirectiveKind::Message,
            "php" => DirectiveKind::Php,
            "end" => DirectiveKind::End,
            _ => return None,
        };
        Some(kind)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            DirectiveKind::If => "if",
            DirectiveKind::ElseIf => "elseif",
            DirectiveKind::Else => "else",
            DirectiveKind::EndIf => "endif",
            DirectiveKind::For => "for",
            DirectiveKind::EndFor => "endfor",
            DirectiveKind::Foreach => "foreach",
            DirectiveKind::EndForeach => "endforeach",
            DirectiveKind::While => "while",
            DirectiveKind::EndWhile => "endwhile",
            DirectiveKind::Echo => "echo",
            DirectiveKind::View => "view",
            DirectiveKind::Url => "url",
            DirectiveKind::Lang => "lang",
            DirectiveKind::Load => "load",
            DirectiveKind::Old => "old",
            DirectiveKind::Message => "message",
            DirectiveKind::Php => "php",
            DirectiveKind::End => "end",
        }
    }

    pub fn takes_arguments(self) -> bool {
        matches!(
            self,
            DirectiveKind::If
                | DirectiveKind::ElseIf
                | DirectiveKind::For
                | DirectiveKind::Foreach
                | DirectiveKind::While
                | DirectiveKind::Echo
                | DirectiveKind::View
                | DirectiveKind::Url
                | DirectiveKind::Lang
                | DirectiveKind::Load
                | DirectiveKind::Old
                | DirectiveKind::Message
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text { text: String },
    Echo { expr: String, escaped: bool, line: usize },
    /// `args` is the argument list without its enclosing parentheses.
    Directive { kind: DirectiveKind, args: Option<String>, line: usize },
    Raw { code: String, line: usize },
}

/// An `@word(` in text that is not a directive and is output literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDirective {
    pub word: String,
    pub line: usize,
}

/// Tokens plus the unknown `@word(` sequences met in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub tokens: Vec<Token>,
    pub unknown: Vec<UnknownDirective>,
}

/// Given the byte offset of an opening parenthesis, return the substring from
/// it to the matching close (both inclusive).
///
/// Parentheses inside quoted strings are ignored. Returns `None` if `open` is
/// not a `(` or the input ends before the nesting depth returns to zero.
pub fn extract_balanced(input: &str, open: usize) -> Option<&str> {
    if input.as_bytes().get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in input[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[open..=open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find `close` at or after `from`, skipping over quoted strings.
fn find_unquoted(input: &str, from: usize, close: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in input[from..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
        } else if input[from + i..].starts_with(close) {
            return Some(from + i);
        }
    }
    None
}

pub(crate) fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Offset of the `@end` that closes a raw block opened before `from`.
fn find_block_end(input: &str, from: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut at = from;
    while let Some(found) = input[at..].find("@end") {
        let start = at + found;
        let after = start + "@end".len();
        if bytes.get(after).map_or(true, |b| !is_ident_char(*b)) {
            return Some(start);
        }
        at = after;
    }
    None
}

pub struct Lexer<'a> {
    template: &'a str,
    src: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    unknown: Vec<UnknownDirective>,
    text: String,
    line: usize,
    line_pos: usize,
}

impl<'a> Lexer<'a> {
    /// `template` is the logical view name, used in error messages.
    pub fn new(template: &'a str, src: &'a str) -> Self {
        Self {
            template,
            src,
            pos: 0,
            tokens: Vec::new(),
            unknown: Vec::new(),
            text: String::new(),
            line: 1,
            line_pos: 0,
        }
    }

    /// Line number of byte offset `at`; offsets must be queried in order.
    fn line_at(&mut self, at: usize) -> usize {
        if at > self.line_pos {
            self.line += self.src[self.line_pos..at].matches('\n').count();
            self.line_pos = at;
        }
        self.line
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.tokens.push(Token::Text { text });
        }
    }

    fn push(&mut self, token: Token) {
        self.flush_text();
        self.tokens.push(token);
    }

    pub fn tokenize(self) -> Result<Vec<Token>, CompileError> {
        self.scan().map(|scan| scan.tokens)
    }

    pub fn scan(mut self) -> Result<Scan, CompileError> {
        self.run()?;
        Ok(Scan { tokens: self.tokens, unknown: self.unknown })
    }

    fn run(&mut self) -> Result<(), CompileError> {
        let src = self.src;
        let bytes = src.as_bytes();
        let mut scan = self.pos;

        while let Some(found) = src[scan..].find(|c: char| c == '@' || c == '{') {
            let at = scan + found;

            if src[at..].starts_with("{!!") {
                self.lex_echo(at, "{!!", "!!}", false)?;
                scan = self.pos;
            } else if src[at..].starts_with("{{") {
                self.lex_echo(at, "{{", "}}", true)?;
                scan = self.pos;
            } else if bytes[at] == b'{' {
                scan = at + 1;
            } else if bytes.get(at + 1) == Some(&b'@') {
                // `@@` escapes a literal `@`
                self.text.push_str(&src[self.pos..=at]);
                self.pos = at + 2;
                scan = self.pos;
            } else if at > 0 && is_ident_char(bytes[at - 1]) {
                scan = at + 1;
            } else if self.lex_directive(at)? {
                scan = self.pos;
            } else {
                scan = at + 1;
            }
        }

        self.text.push_str(&src[self.pos..]);
        self.flush_text();
        Ok(())
    }

    fn lex_echo(&mut self, at: usize, open: &str, close: &str, escaped: bool) -> Result<(), CompileError> {
        let line = self.line_at(at);
        let end = find_unquoted(self.src, at + open.len(), close).ok_or_else(|| CompileError::Unterminated {
            template: self.template.to_string(),
            opener: open.to_string(),
            line,
        })?;
        self.text.push_str(&self.src[self.pos..at]);
        let expr = self.src[at + open.len()..end].trim().to_string();
        self.push(Token::Echo { expr, escaped, line });
        self.pos = end + close.len();
        Ok(())
    }

    /// Lex a directive starting at the `@` at `at`. Returns `false` when the
    /// word after `@` is not a directive, leaving it as literal text.
    fn lex_directive(&mut self, at: usize) -> Result<bool, CompileError> {
        let src = self.src;
        let bytes = src.as_bytes();
        let word_start = at + 1;
        let mut word_end = word_start;
        while word_end < src.len() && is_ident_char(bytes[word_end]) {
            word_end += 1;
        }
        let word = &src[word_start..word_end];
        let Some(mut kind) = DirectiveKind::from_keyword(word) else {
            if !word.is_empty() && bytes.get(word_end) == Some(&b'(') {
                let line = self.line_at(at);
                self.unknown.push(UnknownDirective { word: word.to_string(), line });
            }
            return Ok(false);
        };

        if kind == DirectiveKind::Else {
            // `@else if (...)` is a synonym of `@elseif(...)`
            let rest = &src[word_end..];
            let trimmed = rest.trim_start_matches([' ', '\t']);
            if trimmed.len() < rest.len() && trimmed.starts_with("if") {
                let if_end = word_end + (rest.len() - trimmed.len()) + 2;
                if bytes.get(if_end).map_or(true, |b| !is_ident_char(*b)) {
                    kind = DirectiveKind::ElseIf;
                    word_end = if_end;
                }
            }
        }

        let line = self.line_at(at);
        self.text.push_str(&src[self.pos..at]);

        if kind.takes_arguments() {
            let mut open = word_end;
            while open < src.len() && (bytes[open] == b' ' || bytes[open] == b'\t') {
                open += 1;
            }
            if bytes.get(open) != Some(&b'(') {
                return Err(CompileError::MissingArguments {
                    template: self.template.to_string(),
                    directive: kind.keyword().to_string(),
                    line,
                });
            }
            let block = extract_balanced(src, open).ok_or_else(|| CompileError::UnbalancedParens {
                template: self.template.to_string(),
                directive: kind.keyword().to_string(),
                line,
            })?;
            let args = block[1..block.len() - 1].trim().to_string();
            self.push(Token::Directive { kind, args: Some(args), line });
            self.pos = open + block.len();
        } else if kind == DirectiveKind::Php {
            let end = find_block_end(src, word_end).ok_or_else(|| CompileError::Unterminated {
                template: self.template.to_string(),
                opener: "@php".to_string(),
                line,
            })?;
            let code = src[word_end..end].trim().to_string();
            self.push(Token::Raw { code, line });
            self.pos = end + "@end".len();
        } else {
            self.push(Token::Directive { kind, args: None, line });
            self.pos = word_end;
        }
        Ok(true)
    }
}

/// Tokenize a template; `template` names it in errors.
pub fn tokenize(template: &str, src: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(template, src).tokenize()
}

pub fn scan(template: &str, src: &str) -> Result<Scan, CompileError> {
    Lexer::new(template, src).scan()
}
