//! Expression compilation
//!
//! Precedence climbing fused with code generation: nothing is built in
//! memory, every operator emits its code as soon as both operands have been
//! compiled.
//!
//! # Levels
//!
//! ```text
//!  0  unary, literals, calls, assignment
//!  1  * / %        6  &
//!  2  + -          7  ^
//!  3  << >>        8  |
//!  4  < <= > >=    9  &&
//!  5  == !=       10  ||
//! ```
//!
//! Binary operators leave their left operand on the stack while the right
//! one is compiled into the accumulator. `&&` and `||` branch out through a
//! shared chain as soon as one operand decides the result.

use super::errors::{CompileError, CompileResult, SourceLocation};
use super::lexer::{Keyword, Operator, TokenKind};
use super::parse::Compiler;
use super::symbols::{Binding, SymbolId};
use crate::codegen::buffer::PatchChain;
use crate::codegen::{BinaryOp, Condition, Emitter, Place, UnaryOp, Width};

const TOP_LEVEL: u8 = 10;
const LOGICAL_AND: u8 = 9;
const LOGICAL_OR: u8 = 10;

enum Lowered {
    Binary(BinaryOp),
    Compare(Condition),
}

fn lower(op: Operator) -> Option<Lowered> {
    use Operator::*;
    Some(match op {
        Mul => Lowered::Binary(BinaryOp::Mul),
        Div => Lowered::Binary(BinaryOp::Div),
        Mod => Lowered::Binary(BinaryOp::Mod),
        Add => Lowered::Binary(BinaryOp::Add),
        Sub => Lowered::Binary(BinaryOp::Sub),
        Shl => Lowered::Binary(BinaryOp::Shl),
        Shr => Lowered::Binary(BinaryOp::Shr),
        BitAnd => Lowered::Binary(BinaryOp::BitAnd),
        BitXor => Lowered::Binary(BinaryOp::BitXor),
        BitOr => Lowered::Binary(BinaryOp::BitOr),
        Eq => Lowered::Compare(Condition::Eq),
        Ne => Lowered::Compare(Condition::Ne),
        Lt => Lowered::Compare(Condition::Lt),
        Le => Lowered::Compare(Condition::Le),
        Gt => Lowered::Compare(Condition::Gt),
        Ge => Lowered::Compare(Condition::Ge),
        LogAnd | LogOr | Not | Tilde | Inc | Dec => return None,
    })
}

impl<'src, E: Emitter> Compiler<'src, E> {
    pub(crate) fn parse_expression(&mut self) -> CompileResult {
        self.parse_at_level(TOP_LEVEL)
    }

    /// The lookahead as a binary operator of exactly `level`.
    fn operator_at(&self, level: u8) -> Option<Operator> {
        match self.token.kind {
            TokenKind::Op(op) if op.level() == Some(level) => Some(op),
            _ => None,
        }
    }

    fn parse_at_level(&mut self, level: u8) -> CompileResult {
        if level == 0 {
            return self.parse_unary(true);
        }
        if level == LOGICAL_AND || level == LOGICAL_OR {
            return self.parse_short_circuit(level);
        }

        self.parse_at_level(level - 1)?;
        while let Some(op) = self.operator_at(level) {
            self.advance()?;
            self.emitter.push()?;
            self.parse_at_level(level - 1)?;
            self.emitter.pop()?;
            match lower(op) {
                Some(Lowered::Binary(op)) => self.emitter.binary(op)?,
                Some(Lowered::Compare(cond)) => self.emitter.compare(cond)?,
                None => return Err(self.error(format!("Unexpected operator {op}"))),
            }
        }
        Ok(())
    }

    /// `&&` (branch out on zero) and `||` (branch out on nonzero), with the
    /// result normalised to 0 or 1.
    fn parse_short_circuit(&mut self, level: u8) -> CompileResult {
        let on_nonzero = level == LOGICAL_OR;
        self.parse_at_level(level - 1)?;
        if self.operator_at(level).is_none() {
            return Ok(());
        }

        let mut shortcut = PatchChain::new();
        while self.operator_at(level).is_some() {
            self.advance()?;
            self.emitter.branch(on_nonzero, &mut shortcut)?;
            self.parse_at_level(level - 1)?;
        }
        self.emitter.branch(on_nonzero, &mut shortcut)?;
        self.emitter.load_immediate(i64::from(!on_nonzero))?;
        let mut end = PatchChain::new();
        self.emitter.jump(&mut end)?;
        self.emitter.resolve(&mut shortcut);
        self.emitter.load_immediate(i64::from(on_nonzero))?;
        self.emitter.resolve(&mut end);
        Ok(())
    }

    /// Unary expressions; `allow_assign` permits `name = expr`.
    pub(crate) fn parse_unary(&mut self, allow_assign: bool) -> CompileResult {
        self.nested(|c| c.parse_unary_operand(allow_assign))
    }

    fn parse_unary_operand(&mut self, allow_assign: bool) -> CompileResult {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Str(bytes) => {
                let offset = self.data.push_string(&bytes)?;
                self.emitter.load_data_address(offset)?;
            }
            TokenKind::Number(value) => self.emitter.load_immediate(value)?,
            TokenKind::Op(Operator::Sub) => {
                self.parse_unary(false)?;
                self.emitter.unary(UnaryOp::Neg)?;
            }
            TokenKind::Op(Operator::Add) => self.parse_unary(false)?,
            TokenKind::Op(Operator::Not) => {
                self.parse_unary(false)?;
                self.emitter.unary(UnaryOp::LogicalNot)?;
            }
            TokenKind::Op(Operator::Tilde) => {
                self.parse_unary(false)?;
                self.emitter.unary(UnaryOp::BitNot)?;
            }
            TokenKind::Char(b'(') => {
                self.parse_expression()?;
                self.expect_char(b')', "after parenthesized expression")?;
            }
            TokenKind::Op(Operator::Mul) => self.parse_dereference()?,
            TokenKind::Op(Operator::BitAnd) => self.parse_address_of()?,
            TokenKind::Ident(id) => self.parse_identifier(id, allow_assign, token.location)?,
            _ => {
                return Err(CompileError::syntax(
                    "Expected expression".to_string(),
                    token.location,
                ))
            }
        }

        // calling a computed value
        while self.match_char(b'(')? {
            self.emitter.push()?;
            let argc = self.parse_arguments()?;
            self.emitter.call_indirect(argc)?;
        }
        Ok(())
    }

    /// `*(int*)e`, `*(char*)e` and the function pointer form `*(int(*)())e`,
    /// optionally followed by `= value`.
    fn parse_dereference(&mut self) -> CompileResult {
        self.expect_char(b'(', "after '*' (pointer access needs a cast)")?;
        let width = match self.token.kind {
            TokenKind::Keyword(Keyword::Char) => Width::Byte,
            TokenKind::Keyword(k) if k.is_type() => Width::Word,
            _ => return Err(self.error("Expected type in pointer cast")),
        };
        self.advance()?;

        let function_pointer = self.match_char(b'(')?;
        if function_pointer {
            if !self.check_op(Operator::Mul) {
                return Err(self.error("Expected '*' in function pointer cast"));
            }
            self.advance()?;
            self.expect_char(b')', "in function pointer cast")?;
            self.expect_char(b'(', "in function pointer cast")?;
            self.expect_char(b')', "in function pointer cast")?;
        }
        self.skip_stars()?;
        self.expect_char(b')', "after pointer cast")?;

        self.parse_unary(false)?;
        if self.match_char(b'=')? {
            self.emitter.push()?;
            self.parse_expression()?;
            self.emitter.store_indirect(width)?;
        } else if !function_pointer {
            self.emitter.load_indirect(width)?;
        }
        Ok(())
    }

    fn parse_address_of(&mut self) -> CompileResult {
        let location = self.location();
        let id = self.expect_identifier("after '&'")?;
        match self.binding(id) {
            Binding::Global(offset) => self.emitter.address_of(Place::Global(offset))?,
            Binding::Frame(offset) => self.emitter.address_of(Place::Frame(offset))?,
            Binding::Function(entry) => self.emitter.load_code_address(entry)?,
            Binding::Macro(_) => return Err(nested_macro(location)),
            Binding::Unbound => {
                let place = self.host_data(id, location)?;
                self.emitter.address_of(place)?;
            }
        }
        Ok(())
    }

    fn parse_identifier(
        &mut self,
        id: SymbolId,
        allow_assign: bool,
        location: SourceLocation,
    ) -> CompileResult {
        match self.binding(id) {
            Binding::Macro(_) => Err(nested_macro(location)),
            Binding::Function(entry) => {
                if self.match_char(b'(')? {
                    let argc = self.parse_arguments()?;
                    self.emitter.call(entry, argc)?;
                } else {
                    self.emitter.load_code_address(entry)?;
                }
                Ok(())
            }
            Binding::Unbound => {
                if self.match_char(b'(')? {
                    return self.parse_unbound_call(id, location);
                }
                let place = self.host_data(id, location)?;
                self.parse_variable(place, allow_assign)
            }
            Binding::Global(offset) => self.parse_variable(Place::Global(offset), allow_assign),
            Binding::Frame(offset) => self.parse_variable(Place::Frame(offset), allow_assign),
        }
    }

    /// An unbound name used as a variable, looked up among the host's data
    /// objects.
    fn host_data(&self, id: SymbolId, location: SourceLocation) -> CompileResult<Place> {
        let name = self.name(id);
        match self.emitter.resolve_host_data(name) {
            Some(address) => {
                tracing::trace!(%name, address, "host data");
                Ok(Place::Host(address))
            }
            None => Err(undefined(name, location)),
        }
    }

    /// Assignment, post-increment or plain load of a variable.
    fn parse_variable(&mut self, place: Place, allow_assign: bool) -> CompileResult {
        if allow_assign && self.match_char(b'=')? {
            self.parse_expression()?;
            self.emitter.store(place)?;
        } else if self.check_op(Operator::Inc) || self.check_op(Operator::Dec) {
            let delta = if self.check_op(Operator::Inc) { 1 } else { -1 };
            self.advance()?;
            self.emitter.post_increment(place, delta)?;
        } else {
            self.emitter.load(place)?;
        }
        Ok(())
    }

    /// Call to a name with no definition yet: a host function if the backend
    /// knows one, otherwise a forward call resolved by a later definition.
    fn parse_unbound_call(&mut self, id: SymbolId, location: SourceLocation) -> CompileResult {
        let host = if self.symbols[id].pending_calls.is_empty() {
            self.emitter.resolve_host(self.name(id))
        } else {
            None
        };
        let argc = self.parse_arguments()?;
        match host {
            Some(host) => {
                tracing::trace!(name = %self.name(id), "host call");
                self.emitter.call_host(host, argc)?;
            }
            None => {
                let symbol = &mut self.symbols[id];
                symbol.first_call.get_or_insert(location);
                self.emitter.call_forward(&mut symbol.pending_calls, argc)?;
            }
        }
        Ok(())
    }

    /// Argument list after the opening parenthesis; each value is pushed.
    fn parse_arguments(&mut self) -> CompileResult<usize> {
        let mut argc = 0;
        if !self.check_char(b')') {
            loop {
                self.parse_expression()?;
                self.emitter.push()?;
                argc += 1;
                if !self.match_char(b',')? {
                    break;
                }
            }
        }
        self.expect_char(b')', "after call arguments")?;
        if argc > usize::from(u8::MAX) {
            return Err(self.error("Too many call arguments"));
        }
        Ok(argc)
    }
}

fn nested_macro(location: SourceLocation) -> CompileError {
    CompileError::syntax("nested macro expansion is not supported", location)
}

fn undefined(name: &str, location: SourceLocation) -> CompileError {
    CompileError::unresolved(format!("Undefined identifier '{name}'"), Some(location))
}

#[cfg(test)]
mod tests {
    use crate::codegen::bytecode::{BytecodeEmitter, Opcode};
    use crate::codegen::disasm::disassemble;
    use crate::compiler::errors::ErrorKind;
    use crate::compiler::parse::{CompileOutput, Compiler};

    fn no_host(_: &str) -> Option<u32> {
        None
    }

    fn compile(source: &str) -> Result<CompileOutput, crate::compiler::errors::CompileError> {
        Compiler::new(source, BytecodeEmitter::new(4096, no_host), 1024, 256).compile()
    }

    fn mnemonics(source: &str) -> Vec<&'static str> {
        let out = compile(source).unwrap();
        disassemble(&out.code).into_iter().map(|i| i.mnemonic).collect()
    }

    #[test]
    fn test_precedence_emits_multiply_first() {
        let ops = mnemonics("int main() { return 1 + 2 * 3; }");
        let mul = ops.iter().position(|m| *m == "mul").unwrap();
        let add = ops.iter().position(|m| *m == "add").unwrap();
        assert!(mul < add);
    }

    #[test]
    fn test_same_level_is_left_associative() {
        // (8 - 3) - 2: first sub happens before the third literal is loaded
        let ops = mnemonics("int main() { return 8 - 3 - 2; }");
        let first_sub = ops.iter().position(|m| *m == "sub").unwrap();
        let imms: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, m)| **m == "imm")
            .map(|(i, _)| i)
            .collect();
        assert!(first_sub < imms[2]);
    }

    #[test]
    fn test_short_circuit_branches() {
        let ops = mnemonics("int main() { return 1 && 0; }");
        assert_eq!(ops.iter().filter(|m| **m == "jz").count(), 2);
        let ops = mnemonics("int main() { return 1 || 0; }");
        assert_eq!(ops.iter().filter(|m| **m == "jnz").count(), 2);
    }

    #[test]
    fn test_string_literal_goes_to_data() {
        let out = compile(r#"int main() { return "abc"; }"#).unwrap();
        assert_eq!(out.data, b"abc\0".to_vec());
        assert!(out.code.contains(&(Opcode::LeaGlobal as u8)));
    }

    #[test]
    fn test_undefined_variable() {
        let err = compile("int main() { return y; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol);
        assert_eq!(err.message, "Undefined identifier 'y'");
    }

    #[test]
    fn test_nested_macro_is_rejected() {
        let err = compile("#define A 1\n#define B A\nint main() { return B; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "nested macro expansion is not supported");
    }

    #[test]
    fn test_dereference_requires_cast() {
        let err = compile("int main() { int p; return *p; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_cast_store_uses_width() {
        let ops = mnemonics("int main() { int p; *(char*)p = 65; return *(int*)p; }");
        assert!(ops.contains(&"stb"));
        assert!(ops.contains(&"ldw"));
    }
}
