//! Compiler state and parsing helpers
//!
//! [`Compiler`] owns every arena of one compilation: the lexer cursor, the
//! symbol table, the data segment and the emitter. Parsing methods are split
//! across `expressions`, `statements` and `declarations` as further
//! `impl Compiler` blocks; this module holds the shared state, the one-token
//! lookahead and the `expect_*` helpers.

use super::errors::{CompileError, CompileResult, SourceLocation};
use super::lexer::{Keyword, Lexer, Operator, Token, TokenKind};
use super::symbols::{Binding, SymbolId, SymbolTable};
use crate::codegen::buffer::PatchChain;
use crate::codegen::data::DataSegment;
use crate::codegen::{Emitter, FrameLayout};

/// Deepest nesting of expressions and statements the compiler accepts.
const MAX_NESTING: usize = 100;

/// Source line that starts at a code offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub offset: usize,
    pub line: usize,
}

/// Everything a finished compilation produced.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    pub symbols: SymbolTable,
    pub lines: Vec<LineEntry>,
}

/// Single-pass compiler over one source text.
pub struct Compiler<'src, E: Emitter> {
    pub(crate) lexer: Lexer<'src>,
    pub(crate) symbols: SymbolTable,
    pub(crate) data: DataSegment,
    pub(crate) emitter: E,
    /// The lookahead token.
    pub(crate) token: Token,
    /// Layout of the function being compiled, if any.
    pub(crate) frame: Option<FrameLayout>,
    pub(crate) return_chain: PatchChain,
    pub(crate) lines: Vec<LineEntry>,
    /// Current expression and statement nesting.
    pub(crate) depth: usize,
}

impl<'src, E: Emitter> Compiler<'src, E> {
    pub fn new(source: &'src str, emitter: E, data_capacity: usize, max_symbols: usize) -> Self {
        Compiler {
            lexer: Lexer::new(source),
            symbols: SymbolTable::new(max_symbols),
            data: DataSegment::new(data_capacity),
            emitter,
            token: Token {
                kind: TokenKind::Eof,
                location: SourceLocation::start(),
            },
            frame: None,
            return_chain: PatchChain::new(),
            lines: Vec::new(),
            depth: 0,
        }
    }

    /// Compile the whole translation unit.
    pub fn compile(mut self) -> CompileResult<CompileOutput> {
        let result = self.advance().and_then(|_| self.parse_program());
        if let Err(err) = result {
            return Err(err.or_location(self.token.location));
        }
        Ok(CompileOutput {
            code: self.emitter.into_code(),
            data: self.data.into_bytes(),
            symbols: self.symbols,
            lines: self.lines,
        })
    }

    // ===== Helper methods =====

    /// Move to the next token, returning the one just consumed.
    pub(crate) fn advance(&mut self) -> CompileResult<Token> {
        let next = self.lexer.next_token(&mut self.symbols)?;
        Ok(std::mem::replace(&mut self.token, next))
    }

    pub(crate) fn location(&self) -> SourceLocation {
        self.token.location
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.token.kind == TokenKind::Eof
    }

    pub(crate) fn check_char(&self, c: u8) -> bool {
        self.token.kind == TokenKind::Char(c)
    }

    pub(crate) fn check_op(&self, op: Operator) -> bool {
        self.token.kind == TokenKind::Op(op)
    }

    pub(crate) fn check_keyword(&self, keyword: Keyword) -> bool {
        self.token.kind == TokenKind::Keyword(keyword)
    }

    pub(crate) fn is_type_keyword(&self) -> bool {
        matches!(self.token.kind, TokenKind::Keyword(k) if k.is_type())
    }

    pub(crate) fn match_char(&mut self, c: u8) -> CompileResult<bool> {
        if self.check_char(c) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn match_keyword(&mut self, keyword: Keyword) -> CompileResult<bool> {
        if self.check_keyword(keyword) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn expect_char(&mut self, c: u8, ctx: &str) -> CompileResult {
        if self.match_char(c)? {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}' {ctx}", c as char)))
        }
    }

    pub(crate) fn expect_identifier(&mut self, ctx: &str) -> CompileResult<SymbolId> {
        if let TokenKind::Ident(id) = self.token.kind {
            self.advance()?;
            Ok(id)
        } else {
            Err(self.error(format!("Expected identifier {ctx}")))
        }
    }

    /// Skip the `*`s of a pointer declarator.
    pub(crate) fn skip_stars(&mut self) -> CompileResult {
        while self.check_op(Operator::Mul) {
            self.advance()?;
        }
        Ok(())
    }

    /// Readable name of the lookahead token for diagnostics.
    pub(crate) fn describe_token(&self) -> String {
        match &self.token.kind {
            TokenKind::Ident(id) => format!("identifier '{}'", self.symbols[*id].name),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Keyword(k) => k.to_string(),
            TokenKind::Op(op) => op.to_string(),
            TokenKind::Char(c) if c.is_ascii_graphic() => format!("'{}'", *c as char),
            TokenKind::Char(c) => format!("character {c:#04x}"),
            TokenKind::Eof => "end of file".to_string(),
        }
    }

    /// Syntax error at the lookahead token.
    pub(crate) fn error(&self, message: impl AsRef<str>) -> CompileError {
        CompileError::syntax(
            format!("{}, found {}", message.as_ref(), self.describe_token()),
            self.location(),
        )
    }

    pub(crate) fn name(&self, id: SymbolId) -> &str {
        &self.symbols[id].name
    }

    pub(crate) fn binding(&self, id: SymbolId) -> Binding {
        self.symbols[id].binding
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    pub(crate) fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Record a statement starting at the current code offset. Statements
    /// sharing a line still get one entry each; statements that emit no code
    /// share an offset, and the innermost one wins.
    pub(crate) fn mark_line(&mut self) {
        let entry = LineEntry {
            offset: self.emitter.position(),
            line: self.token.location.line,
        };
        match self.lines.last_mut() {
            Some(last) if last.offset == entry.offset => *last = entry,
            _ => self.lines.push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::bytecode::BytecodeEmitter;
    use crate::compiler::errors::ErrorKind;

    fn no_host(_: &str) -> Option<u32> {
        None
    }

    fn compile(source: &str) -> CompileResult<CompileOutput> {
        Compiler::new(source, BytecodeEmitter::new(4096, no_host), 1024, 256).compile()
    }

    #[test]
    fn test_empty_source_compiles_to_nothing() {
        let out = compile("").unwrap();
        assert!(out.code.is_empty());
        assert!(out.data.is_empty());
    }

    #[test]
    fn test_error_reports_found_token() {
        let err = compile("int main() { return 1 }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "Expected ';' after return value, found '}'");
        assert_eq!(err.location.unwrap().column, 23);
    }

    #[test]
    fn test_capacity_error_is_located() {
        let err = Compiler::new("int a, b, c;", BytecodeEmitter::new(64, no_host), 8, 16)
            .compile()
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CapacityExceeded(_)));
        assert!(err.location.is_some());
    }

    #[test]
    fn test_line_table_follows_statements() {
        let out = compile("int main() {\n  int x;\n  x = 1;\n  return x;\n}").unwrap();
        let lines: Vec<usize> = out.lines.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert!(out.lines.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let depth = 10_000;
        let source = format!("int main() {{ return {}1{}; }}", "(".repeat(depth), ")".repeat(depth));
        let err = compile(&source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.starts_with("Nesting too deep"));
    }

    #[test]
    fn test_deep_blocks_are_rejected() {
        let depth = 10_000;
        let source = format!("int main() {{ {}{} }}", "{".repeat(depth), "}".repeat(depth));
        let err = compile(&source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_moderate_nesting_compiles() {
        let source = format!("int main() {{ return {}1{}; }}", "(".repeat(40), ")".repeat(40));
        assert!(compile(&source).is_ok());
    }

    #[test]
    fn test_statements_on_one_line_each_get_an_entry() {
        let out = compile("int main() { int i; i = 0; while (i < 3) i++; return i; }").unwrap();
        // `i = 0`, the loop, its body and the return
        assert_eq!(out.lines.len(), 4);
        assert!(out.lines.iter().all(|e| e.line == 1));
        assert!(out.lines.windows(2).all(|w| w[0].offset < w[1].offset));
    }
}
