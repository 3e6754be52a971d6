//! Top-level declarations
//!
//! ```text
//! program   ::= (global | function | ';')*
//! global    ::= type declarator (',' declarator)* ';'
//! function  ::= [type '*'*] name '(' params ')' (block | ';')
//! params    ::= '' | 'void' | param (',' param)*
//! param     ::= [type] '*'* name
//! ```

use super::errors::{CompileError, CompileResult};
use super::lexer::{Keyword, TokenKind};
use super::parse::Compiler;
use super::symbols::{Binding, SymbolId};
use crate::codegen::buffer::PatchChain;
use crate::codegen::Emitter;

impl<'src, E: Emitter> Compiler<'src, E> {
    pub(crate) fn parse_program(&mut self) -> CompileResult {
        while !self.is_at_end() {
            self.parse_top_level_declaration()?;
        }
        self.check_pending_calls()
    }

    fn parse_top_level_declaration(&mut self) -> CompileResult {
        if self.match_char(b';')? {
            return Ok(());
        }

        if self.is_type_keyword() {
            self.advance()?;
            loop {
                self.skip_stars()?;
                let id = self.expect_identifier("in declaration")?;
                if self.check_char(b'(') {
                    return self.parse_function(id);
                }
                let offset = self.data.reserve_word()?;
                self.symbols[id].binding = Binding::Global(offset);
                if !self.match_char(b',')? {
                    break;
                }
            }
            return self.expect_char(b';', "after global declaration");
        }

        if let TokenKind::Ident(id) = self.token.kind {
            // K&R style definition without a return type
            self.advance()?;
            if !self.check_char(b'(') {
                return Err(self.error("Expected '(' after function name"));
            }
            return self.parse_function(id);
        }

        Err(self.error("Expected declaration"))
    }

    fn parse_function(&mut self, id: SymbolId) -> CompileResult {
        self.expect_char(b'(', "after function name")?;
        let params = self.parse_parameters()?;
        if self.match_char(b';')? {
            // prototype
            return Ok(());
        }
        self.expect_char(b'{', "to start function body")?;

        let entry = self.emitter.position();
        let mut callers = self.symbols[id].pending_calls.take();
        self.emitter.resolve(&mut callers);
        let symbol = &mut self.symbols[id];
        symbol.first_call = None;
        symbol.binding = Binding::Function(entry as u32);
        tracing::debug!(name = %symbol.name, entry, params = params.len(), "compiling function");

        let frame = self.emitter.enter(params.len())?;
        for (i, param) in params.iter().enumerate() {
            self.symbols[*param].binding = Binding::Frame(frame.parameter(i));
        }
        self.frame = Some(frame);
        self.return_chain = PatchChain::new();

        self.parse_block(None)?;

        let mut returns = self.return_chain.take();
        self.emitter.resolve(&mut returns);
        if let Some(frame) = self.frame.take() {
            self.emitter.leave(&frame)?;
        }
        Ok(())
    }

    /// Parameter names after `(`, through the closing `)`.
    fn parse_parameters(&mut self) -> CompileResult<Vec<SymbolId>> {
        let mut params = Vec::new();
        if self.match_char(b')')? {
            return Ok(params);
        }
        // `(void)`, or the type of a leading `void *p`
        let mut typed = self.match_keyword(Keyword::Void)?;
        if typed && self.match_char(b')')? {
            return Ok(params);
        }

        loop {
            if !typed && self.is_type_keyword() {
                self.advance()?;
            }
            typed = false;
            self.skip_stars()?;
            params.push(self.expect_identifier("in parameter list")?);
            if !self.match_char(b',')? {
                break;
            }
        }
        self.expect_char(b')', "after parameters")?;
        Ok(params)
    }

    /// Any forward call still waiting for a definition is an error, reported
    /// at the earliest such call.
    fn check_pending_calls(&self) -> CompileResult {
        let missing = self
            .symbols
            .iter()
            .filter(|s| !s.pending_calls.is_empty())
            .min_by_key(|s| s.first_call);
        match missing {
            Some(symbol) => Err(CompileError::unresolved(
                format!("Undefined function '{}'", symbol.name),
                symbol.first_call,
            )),
            None => Ok(()),
        }
    }
}
