//! Lexer and macro preprocessor
//!
//! Produces one token at a time on demand; the compiler never sees a token
//! list. Preprocessing happens inline:
//! - `#define NAME body` binds `NAME` to the rest of the line
//! - any other `#` line is skipped
//! - an identifier bound to a macro switches input to the macro body until
//!   the body is exhausted, then resumes the main text
//!
//! The end of a macro body always ends the current token. `#` lines are only
//! recognised in the main text, and identifiers inside a body are never
//! expanded again.

use std::fmt;

use super::errors::{CompileError, CompileResult, SourceLocation};
use super::symbols::{Binding, MacroBody, SymbolId, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Int,
    Char,
    Void,
    If,
    Else,
    While,
    For,
    Break,
    Return,
}

impl Keyword {
    fn from_word(word: &[u8]) -> Option<Keyword> {
        Some(match word {
            b"int" => Keyword::Int,
            b"char" => Keyword::Char,
            b"void" => Keyword::Void,
            b"if" => Keyword::If,
            b"else" => Keyword::Else,
            b"while" => Keyword::While,
            b"for" => Keyword::For,
            b"break" => Keyword::Break,
            b"return" => Keyword::Return,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Int => "int",
            Keyword::Char => "char",
            Keyword::Void => "void",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::Break => "break",
            Keyword::Return => "return",
        }
    }

    pub fn is_type(self) -> bool {
        matches!(self, Keyword::Int | Keyword::Char | Keyword::Void)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
    Not,
    Tilde,
    Inc,
    Dec,
}

/// Longest spellings first so that `<=` wins over `<`.
const OPERATOR_TABLE: &[(&[u8], Operator)] = &[
    (b"++", Operator::Inc),
    (b"--", Operator::Dec),
    (b"<<", Operator::Shl),
    (b">>", Operator::Shr),
    (b"<=", Operator::Le),
    (b">=", Operator::Ge),
    (b"==", Operator::Eq),
    (b"!=", Operator::Ne),
    (b"&&", Operator::LogAnd),
    (b"||", Operator::LogOr),
    (b"*", Operator::Mul),
    (b"/", Operator::Div),
    (b"%", Operator::Mod),
    (b"+", Operator::Add),
    (b"-", Operator::Sub),
    (b"<", Operator::Lt),
    (b">", Operator::Gt),
    (b"&", Operator::BitAnd),
    (b"^", Operator::BitXor),
    (b"|", Operator::BitOr),
    (b"~", Operator::Tilde),
    (b"!", Operator::Not),
];

impl Operator {
    /// Binary precedence level, 1 binding tightest. Prefix-only operators
    /// have none.
    pub fn level(self) -> Option<u8> {
        use Operator::*;
        Some(match self {
            Mul | Div | Mod => 1,
            Add | Sub => 2,
            Shl | Shr => 3,
            Lt | Le | Gt | Ge => 4,
            Eq | Ne => 5,
            BitAnd => 6,
            BitXor => 7,
            BitOr => 8,
            LogAnd => 9,
            LogOr => 10,
            Not | Tilde | Inc | Dec => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        OPERATOR_TABLE
            .iter()
            .find(|(_, op)| *op == self)
            .and_then(|(text, _)| std::str::from_utf8(text).ok())
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(SymbolId),
    Number(i64),
    Str(Vec<u8>),
    Keyword(Keyword),
    Op(Operator),
    /// Any other single character: punctuation and `=`.
    Char(u8),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.as_str())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.as_str())
    }
}

/// Cursor inside a macro body being expanded.
#[derive(Debug, Clone, Copy)]
struct Expansion {
    cursor: usize,
    end: usize,
    /// Where the macro was used; tokens from the body report this location.
    site: SourceLocation,
}

pub struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
    line: usize,
    column: usize,
    expansion: Option<Expansion>,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            expansion: None,
        }
    }

    fn location(&self) -> SourceLocation {
        match self.expansion {
            Some(exp) => exp.site,
            None => SourceLocation {
                offset: self.pos,
                line: self.line,
                column: self.column,
            },
        }
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        match self.expansion {
            Some(exp) => {
                let at = exp.cursor + ahead;
                (at < exp.end).then(|| self.src[at])
            }
            None => self.src.get(self.pos + ahead).copied(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.peek_at(0)
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        match &mut self.expansion {
            Some(exp) => exp.cursor += 1,
            None => {
                self.pos += 1;
                if c == b'\n' {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
            }
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> CompileResult {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.location();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some(b'*') if self.peek() == Some(b'/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(CompileError::lex("Unterminated comment", start)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(c) = self.peek().filter(|&c| pred(c)) {
            out.push(c);
            self.bump();
        }
        out
    }

    /// Read the next token, expanding macros and consuming directives.
    pub fn next_token(&mut self, symbols: &mut SymbolTable) -> CompileResult<Token> {
        loop {
            self.skip_trivia()?;
            let location = self.location();
            let Some(c) = self.peek() else {
                if self.expansion.take().is_some() {
                    continue;
                }
                return Ok(Token {
                    kind: TokenKind::Eof,
                    location,
                });
            };

            let kind = match c {
                b'#' if self.expansion.is_none() => {
                    self.directive(symbols)?;
                    continue;
                }
                b'0'..=b'9' => self.number(location)?,
                b'\'' => self.char_literal(location)?,
                b'"' => self.string_literal(location)?,
                c if is_ident_start(c) => {
                    let word = self.take_while(is_ident_char);
                    if let Some(keyword) = Keyword::from_word(&word) {
                        TokenKind::Keyword(keyword)
                    } else {
                        let name = String::from_utf8_lossy(&word);
                        let id = symbols
                            .intern(&name)
                            .map_err(|e| CompileError::from(e).or_location(location))?;
                        match symbols[id].binding {
                            Binding::Macro(body) if self.expansion.is_none() => {
                                tracing::trace!(name = %name, "expanding macro");
                                self.expansion = Some(Expansion {
                                    cursor: body.start,
                                    end: body.end,
                                    site: location,
                                });
                                continue;
                            }
                            _ => TokenKind::Ident(id),
                        }
                    }
                }
                _ => self.operator_or_char(),
            };
            return Ok(Token { kind, location });
        }
    }

    fn operator_or_char(&mut self) -> TokenKind {
        for (text, op) in OPERATOR_TABLE {
            if text.iter().enumerate().all(|(i, &b)| self.peek_at(i) == Some(b)) {
                for _ in 0..text.len() {
                    self.bump();
                }
                return TokenKind::Op(*op);
            }
        }
        TokenKind::Char(self.bump().unwrap_or_default())
    }

    fn number(&mut self, location: SourceLocation) -> CompileResult<TokenKind> {
        let run = self.take_while(is_ident_char);
        let text = String::from_utf8_lossy(&run);
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<u64>()
        };
        parsed
            .map(|value| TokenKind::Number(value as i64))
            .map_err(|_| CompileError::lex(format!("Invalid numeric literal '{text}'"), location))
    }

    /// One character of a literal; only `\n` is a real escape.
    fn literal_char(&mut self) -> Option<u8> {
        match self.bump()? {
            b'\\' => match self.bump()? {
                b'n' => Some(b'\n'),
                other => Some(other),
            },
            c => Some(c),
        }
    }

    fn char_literal(&mut self, location: SourceLocation) -> CompileResult<TokenKind> {
        self.bump();
        let value = self
            .literal_char()
            .ok_or_else(|| CompileError::lex("Unterminated character literal", location))?;
        if self.bump() != Some(b'\'') {
            return Err(CompileError::lex("Expected closing quote in character literal", location));
        }
        Ok(TokenKind::Number(i64::from(value as i8)))
    }

    fn string_literal(&mut self, location: SourceLocation) -> CompileResult<TokenKind> {
        self.bump();
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    return Ok(TokenKind::Str(bytes));
                }
                Some(_) => {
                    if let Some(c) = self.literal_char() {
                        bytes.push(c);
                    }
                }
                None => return Err(CompileError::lex("Unterminated string literal", location)),
            }
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.bump();
        }
    }

    fn skip_line(&mut self) {
        while self.peek().is_some_and(|c| c != b'\n') {
            self.bump();
        }
    }

    fn directive(&mut self, symbols: &mut SymbolTable) -> CompileResult {
        self.bump();
        self.skip_blanks();
        let word = self.take_while(is_ident_char);
        if word != b"define" {
            self.skip_line();
            return Ok(());
        }

        self.skip_blanks();
        let location = self.location();
        let name = self.take_while(is_ident_char);
        if name.is_empty() || !is_ident_start(name[0]) {
            return Err(CompileError::lex("Expected macro name after #define", location));
        }
        let name = String::from_utf8_lossy(&name);

        let line_start = self.pos;
        self.skip_line();
        let line = &self.src[line_start..self.pos];
        let leading = line.iter().take_while(|c| c.is_ascii_whitespace()).count();
        let trailing = line.iter().rev().take_while(|c| c.is_ascii_whitespace()).count();
        let body = MacroBody {
            start: line_start + leading,
            end: (self.pos - trailing).max(line_start + leading),
        };

        let id = symbols
            .intern(&name)
            .map_err(|e| CompileError::from(e).or_location(location))?;
        symbols[id].binding = Binding::Macro(body);
        tracing::trace!(name = %name, start = body.start, end = body.end, "defined macro");
        Ok(())
    }
}
