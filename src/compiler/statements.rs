//! Statement compilation
//!
//! ```text
//! statement ::= if_stmt | while_stmt | for_stmt | block
//!             | 'break' ';' | 'return' [expr] ';' | [expr] ';'
//! block     ::= '{' local_decl* statement* '}'
//! ```
//!
//! Control flow is laid out with backpatch chains. The innermost loop's exit
//! chain is passed down as `breaks` so that `break` can link into it; every
//! `return` links into the function's return chain, resolved right before
//! the epilogue.

use super::errors::CompileResult;
use super::lexer::{Keyword, TokenKind};
use super::parse::Compiler;
use super::symbols::Binding;
use crate::codegen::buffer::PatchChain;
use crate::codegen::Emitter;

impl<'src, E: Emitter> Compiler<'src, E> {
    pub(crate) fn parse_statement(&mut self, breaks: Option<&mut PatchChain>) -> CompileResult {
        self.nested(|c| c.parse_statement_body(breaks))
    }

    fn parse_statement_body(&mut self, mut breaks: Option<&mut PatchChain>) -> CompileResult {
        self.mark_line();
        match self.token.kind {
            TokenKind::Keyword(Keyword::If) => self.parse_if(breaks),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Char(b'{') => {
                self.advance()?;
                self.parse_block(breaks.as_deref_mut())
            }
            TokenKind::Keyword(Keyword::Break) => {
                let Some(exit) = breaks else {
                    return Err(self.error("'break' outside of a loop"));
                };
                self.advance()?;
                self.emitter.jump(exit)?;
                self.expect_char(b';', "after 'break'")
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance()?;
                if !self.check_char(b';') {
                    self.parse_expression()?;
                }
                self.expect_char(b';', "after return value")?;
                self.emitter.jump(&mut self.return_chain)?;
                Ok(())
            }
            TokenKind::Char(b';') => {
                self.advance()?;
                Ok(())
            }
            _ => {
                self.parse_expression()?;
                self.expect_char(b';', "after expression")
            }
        }
    }

    fn parse_if(&mut self, mut breaks: Option<&mut PatchChain>) -> CompileResult {
        self.advance()?;
        self.expect_char(b'(', "after 'if'")?;
        self.parse_expression()?;
        self.expect_char(b')', "after if condition")?;

        let mut skip = PatchChain::new();
        self.emitter.branch(false, &mut skip)?;
        self.parse_statement(breaks.as_deref_mut())?;

        if self.match_keyword(Keyword::Else)? {
            let mut end = PatchChain::new();
            self.emitter.jump(&mut end)?;
            self.emitter.resolve(&mut skip);
            self.parse_statement(breaks)?;
            self.emitter.resolve(&mut end);
        } else {
            self.emitter.resolve(&mut skip);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> CompileResult {
        self.advance()?;
        let top = self.emitter.position();
        self.expect_char(b'(', "after 'while'")?;
        self.parse_expression()?;
        self.expect_char(b')', "after while condition")?;

        let mut exit = PatchChain::new();
        self.emitter.branch(false, &mut exit)?;
        self.parse_statement(Some(&mut exit))?;
        self.emitter.jump_back(top)?;
        self.emitter.resolve(&mut exit);
        Ok(())
    }

    /// The increment is compiled before the body, so it is jumped over on
    /// entry and the body loops back to it.
    fn parse_for(&mut self) -> CompileResult {
        self.advance()?;
        self.expect_char(b'(', "after 'for'")?;
        if !self.check_char(b';') {
            self.parse_expression()?;
        }
        self.expect_char(b';', "after for initializer")?;

        let mut top = self.emitter.position();
        let mut exit = PatchChain::new();
        if !self.check_char(b';') {
            self.parse_expression()?;
            self.emitter.branch(false, &mut exit)?;
        }
        self.expect_char(b';', "after for condition")?;

        if !self.check_char(b')') {
            let mut body = PatchChain::new();
            self.emitter.jump(&mut body)?;
            let increment = self.emitter.position();
            self.parse_expression()?;
            self.emitter.jump_back(top)?;
            self.emitter.resolve(&mut body);
            top = increment;
        }
        self.expect_char(b')', "after for clauses")?;

        self.parse_statement(Some(&mut exit))?;
        self.emitter.jump_back(top)?;
        self.emitter.resolve(&mut exit);
        Ok(())
    }

    /// Block contents after `{`: local declarations first, then statements.
    pub(crate) fn parse_block(&mut self, mut breaks: Option<&mut PatchChain>) -> CompileResult {
        while self.is_type_keyword() {
            self.parse_local_declaration()?;
        }
        while !self.check_char(b'}') {
            if self.is_at_end() {
                return Err(self.error("Expected '}' to close block"));
            }
            if self.is_type_keyword() {
                return Err(self.error("Declarations must come before statements in a block"));
            }
            self.parse_statement(breaks.as_deref_mut())?;
        }
        self.advance()?;
        Ok(())
    }

    /// `int a, *b;` binding fresh frame cells.
    fn parse_local_declaration(&mut self) -> CompileResult {
        self.advance()?;
        loop {
            self.skip_stars()?;
            let id = self.expect_identifier("in local declaration")?;
            let Some(frame) = self.frame.as_mut() else {
                return Err(self.error("Local declaration outside of a function"));
            };
            self.symbols[id].binding = Binding::Frame(frame.allocate_local());
            if !self.match_char(b',')? {
                break;
            }
        }
        self.expect_char(b';', "after local declaration")
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::bytecode::BytecodeEmitter;
    use crate::codegen::disasm::disassemble;
    use crate::compiler::errors::{CompileError, ErrorKind};
    use crate::compiler::parse::{CompileOutput, Compiler};

    fn no_host(_: &str) -> Option<u32> {
        None
    }

    fn compile(source: &str) -> Result<CompileOutput, CompileError> {
        Compiler::new(source, BytecodeEmitter::new(4096, no_host), 1024, 256).compile()
    }

    fn count(source: &str, mnemonic: &str) -> usize {
        let out = compile(source).unwrap();
        disassemble(&out.code)
            .iter()
            .filter(|i| i.mnemonic == mnemonic)
            .count()
    }

    #[test]
    fn test_break_outside_loop() {
        let err = compile("int main() { break; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.starts_with("'break' outside of a loop"));
    }

    #[test]
    fn test_break_inside_if_inside_loop() {
        compile("int main() { while (1) { if (1) break; } return 0; }").unwrap();
    }

    #[test]
    fn test_returns_share_one_epilogue() {
        let source = "int f(int x) { if (x) return 1; return 2; }";
        assert_eq!(count(source, "leave"), 1);
        // if-skip is a jz, each return a jmp to the epilogue
        assert_eq!(count(source, "jmp"), 2);
    }

    #[test]
    fn test_for_without_increment_has_no_extra_jump() {
        assert_eq!(count("int main() { int i; for (i = 0; i < 3;) i = i + 1; }", "jmp"), 1);
        assert_eq!(count("int main() { int i; for (i = 0; i < 3; i = i + 1) ; }", "jmp"), 3);
    }

    #[test]
    fn test_declaration_after_statement() {
        let err = compile("int main() { int a; a = 1; int b; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_unclosed_block() {
        let err = compile("int main() { return 0;").unwrap_err();
        assert_eq!(err.message, "Expected '}' to close block, found end of file");
    }
}
