//! Portable bytecode backend
//!
//! A one-byte opcode followed by little-endian operands. Control transfers
//! carry a 4-byte displacement relative to the end of the field, exactly like
//! the native backend, so the same backpatch chains serve both.
//!
//! Calling convention:
//! - the caller pushes arguments left to right, then `Call` pushes the return
//!   address and `Adjust` drops the arguments once the callee returns
//! - `Enter` saves the frame base and zero-fills the locals
//! - argument `i` of `n` lives at `bp + 16 + 8 * (n - 1 - i)`

use super::buffer::{CodeBuffer, EmitResult, PatchChain};
use super::data::WORD;
use super::{BinaryOp, Condition, Emitter, FrameLayout, HostSymbol, Place, UnaryOp, Width};

/// VM address of the first data segment byte.
pub const MEMORY_BASE: u64 = 0x1_0000_0000;

/// Function pointers are code offsets shifted by this amount, keeping them
/// nonzero and disjoint from data addresses.
pub const CODE_BASE: u64 = 0x1000;

macro_rules! opcodes {
    ($($name:ident = $value:literal => $mnemonic:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl Opcode {
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    Imm = 0x01 => "imm",
    LoadLocal = 0x02 => "ldl",
    StoreLocal = 0x03 => "stl",
    LeaLocal = 0x04 => "leal",
    IncLocal = 0x05 => "incl",
    LoadGlobal = 0x06 => "ldg",
    StoreGlobal = 0x07 => "stg",
    LeaGlobal = 0x08 => "leag",
    IncGlobal = 0x09 => "incg",
    LeaCode = 0x0a => "leac",
    Push = 0x10 => "push",
    Pop = 0x11 => "pop",
    Mul = 0x20 => "mul",
    Div = 0x21 => "div",
    Mod = 0x22 => "mod",
    Add = 0x23 => "add",
    Sub = 0x24 => "sub",
    Shl = 0x25 => "shl",
    Shr = 0x26 => "shr",
    And = 0x27 => "and",
    Xor = 0x28 => "xor",
    Or = 0x29 => "or",
    Eq = 0x30 => "eq",
    Ne = 0x31 => "ne",
    Lt = 0x32 => "lt",
    Le = 0x33 => "le",
    Gt = 0x34 => "gt",
    Ge = 0x35 => "ge",
    Neg = 0x38 => "neg",
    Not = 0x39 => "not",
    LNot = 0x3a => "lnot",
    LoadWord = 0x40 => "ldw",
    LoadByte = 0x41 => "ldb",
    StoreWord = 0x42 => "stw",
    StoreByte = 0x43 => "stb",
    Jz = 0x50 => "jz",
    Jnz = 0x51 => "jnz",
    Jmp = 0x52 => "jmp",
    Call = 0x58 => "call",
    CallIndirect = 0x59 => "calli",
    CallHost = 0x5a => "callh",
    Adjust = 0x5b => "adj",
    Enter = 0x60 => "enter",
    Leave = 0x61 => "leave",
}

/// Operand layout following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    /// 8-byte immediate
    Imm64,
    /// 4-byte frame offset or data offset
    Offset,
    /// 4-byte offset and a 1-byte signed delta
    OffsetDelta,
    /// 4-byte code displacement
    Relative,
    /// 1-byte argument count
    Argc,
    /// 4-byte host index and a 1-byte argument count
    Host,
    /// 4-byte word count
    Count,
}

impl Operands {
    pub fn len(self) -> usize {
        match self {
            Operands::None => 0,
            Operands::Imm64 => 8,
            Operands::Offset | Operands::Relative | Operands::Count => 4,
            Operands::OffsetDelta | Operands::Host => 5,
            Operands::Argc => 1,
        }
    }
}

impl Opcode {
    pub fn operands(self) -> Operands {
        use Opcode::*;
        match self {
            Imm => Operands::Imm64,
            LoadLocal | StoreLocal | LeaLocal | LoadGlobal | StoreGlobal | LeaGlobal => {
                Operands::Offset
            }
            IncLocal | IncGlobal => Operands::OffsetDelta,
            LeaCode | Jz | Jnz | Jmp | Call => Operands::Relative,
            CallIndirect => Operands::Argc,
            CallHost => Operands::Host,
            Adjust | Enter => Operands::Count,
            _ => Operands::None,
        }
    }

    /// Full encoded length including the opcode byte.
    pub fn width(self) -> usize {
        1 + self.operands().len()
    }
}

/// Resolves host names against a fixed table of built-in functions.
pub type HostResolver = fn(&str) -> Option<u32>;

pub struct BytecodeEmitter {
    buf: CodeBuffer,
    host: HostResolver,
}

impl BytecodeEmitter {
    pub fn new(code_capacity: usize, host: HostResolver) -> Self {
        BytecodeEmitter {
            buf: CodeBuffer::new(code_capacity),
            host,
        }
    }

    fn op(&mut self, opcode: Opcode) -> EmitResult {
        self.buf.emit_bytes(&[opcode as u8])
    }

    fn op_i32(&mut self, opcode: Opcode, operand: i32) -> EmitResult {
        self.buf.emit_with_operand(&[opcode as u8], operand)?;
        Ok(())
    }

    fn place_op(&mut self, place: Place, local: Opcode, global: Opcode) -> EmitResult {
        match place {
            Place::Frame(offset) => self.op_i32(local, offset),
            Place::Global(offset) => self.op_i32(global, offset as i32),
            Place::Host(address) => {
                unreachable!("host address {address:#x} on the bytecode backend")
            }
        }
    }

    fn adjust(&mut self, words: usize) -> EmitResult {
        if words > 0 {
            self.op_i32(Opcode::Adjust, words as i32)?;
        }
        Ok(())
    }
}

impl Emitter for BytecodeEmitter {
    fn buffer(&self) -> &CodeBuffer {
        &self.buf
    }

    fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    fn resolve_host(&self, name: &str) -> Option<HostSymbol> {
        (self.host)(name).map(HostSymbol::Builtin)
    }

    /// The VM has no host data objects.
    fn resolve_host_data(&self, _name: &str) -> Option<u64> {
        None
    }

    fn load_immediate(&mut self, value: i64) -> EmitResult {
        self.op(Opcode::Imm)?;
        self.buf.emit_i64(value)
    }

    fn load_data_address(&mut self, offset: u32) -> EmitResult {
        self.op_i32(Opcode::LeaGlobal, offset as i32)
    }

    fn load_code_address(&mut self, entry: u32) -> EmitResult {
        self.buf.emit_relative(&[Opcode::LeaCode as u8], entry as usize)
    }

    fn load(&mut self, place: Place) -> EmitResult {
        self.place_op(place, Opcode::LoadLocal, Opcode::LoadGlobal)
    }

    fn store(&mut self, place: Place) -> EmitResult {
        self.place_op(place, Opcode::StoreLocal, Opcode::StoreGlobal)
    }

    fn address_of(&mut self, place: Place) -> EmitResult {
        self.place_op(place, Opcode::LeaLocal, Opcode::LeaGlobal)
    }

    fn post_increment(&mut self, place: Place, delta: i8) -> EmitResult {
        self.place_op(place, Opcode::IncLocal, Opcode::IncGlobal)?;
        self.buf.emit_bytes(&[delta as u8])
    }

    fn push(&mut self) -> EmitResult {
        self.op(Opcode::Push)
    }

    fn pop(&mut self) -> EmitResult {
        self.op(Opcode::Pop)
    }

    fn binary(&mut self, op: BinaryOp) -> EmitResult {
        self.op(match op {
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Shl => Opcode::Shl,
            BinaryOp::Shr => Opcode::Shr,
            BinaryOp::BitAnd => Opcode::And,
            BinaryOp::BitXor => Opcode::Xor,
            BinaryOp::BitOr => Opcode::Or,
        })
    }

    fn compare(&mut self, cond: Condition) -> EmitResult {
        self.op(match cond {
            Condition::Eq => Opcode::Eq,
            Condition::Ne => Opcode::Ne,
            Condition::Lt => Opcode::Lt,
            Condition::Le => Opcode::Le,
            Condition::Gt => Opcode::Gt,
            Condition::Ge => Opcode::Ge,
        })
    }

    fn unary(&mut self, op: UnaryOp) -> EmitResult {
        self.op(match op {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::BitNot => Opcode::Not,
            UnaryOp::LogicalNot => Opcode::LNot,
        })
    }

    fn load_indirect(&mut self, width: Width) -> EmitResult {
        self.op(match width {
            Width::Word => Opcode::LoadWord,
            Width::Byte => Opcode::LoadByte,
        })
    }

    fn store_indirect(&mut self, width: Width) -> EmitResult {
        self.op(match width {
            Width::Word => Opcode::StoreWord,
            Width::Byte => Opcode::StoreByte,
        })
    }

    fn branch(&mut self, when_nonzero: bool, chain: &mut PatchChain) -> EmitResult {
        let opcode = if when_nonzero { Opcode::Jnz } else { Opcode::Jz };
        self.buf.emit_linked(&[opcode as u8], chain)
    }

    fn jump(&mut self, chain: &mut PatchChain) -> EmitResult {
        self.buf.emit_linked(&[Opcode::Jmp as u8], chain)
    }

    fn jump_back(&mut self, target: usize) -> EmitResult {
        self.buf.emit_relative(&[Opcode::Jmp as u8], target)
    }

    fn call(&mut self, entry: u32, argc: usize) -> EmitResult {
        self.buf.emit_relative(&[Opcode::Call as u8], entry as usize)?;
        self.adjust(argc)
    }

    fn call_forward(&mut self, chain: &mut PatchChain, argc: usize) -> EmitResult {
        self.buf.emit_linked(&[Opcode::Call as u8], chain)?;
        self.adjust(argc)
    }

    fn call_indirect(&mut self, argc: usize) -> EmitResult {
        self.buf.emit_bytes(&[Opcode::CallIndirect as u8, argc as u8])?;
        self.adjust(argc + 1)
    }

    fn call_host(&mut self, host: HostSymbol, argc: usize) -> EmitResult {
        let index = match host {
            HostSymbol::Builtin(index) => index,
            HostSymbol::Address(address) => {
                unreachable!("host address {address:#x} on the bytecode backend")
            }
        };
        self.op_i32(Opcode::CallHost, index as i32)?;
        self.buf.emit_bytes(&[argc as u8])?;
        self.adjust(argc)
    }

    fn enter(&mut self, param_count: usize) -> EmitResult<FrameLayout> {
        let size_field = self.buf.emit_with_operand(&[Opcode::Enter as u8], 0)?;
        let params = (0..param_count)
            .map(|i| (2 * WORD + WORD * (param_count - 1 - i)) as i32)
            .collect();
        Ok(FrameLayout::new(size_field, 0, params))
    }

    fn leave(&mut self, frame: &FrameLayout) -> EmitResult {
        self.op(Opcode::Leave)?;
        self.buf.patch_i32(frame.size_field, frame.size() as i32);
        Ok(())
    }

    fn into_code(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_host(_: &str) -> Option<u32> {
        None
    }

    #[test]
    fn test_opcode_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_byte(0x00), None);
    }

    #[test]
    fn test_parameters_count_down_from_frame_base() {
        let mut e = BytecodeEmitter::new(64, no_host);
        let frame = e.enter(3).unwrap();
        assert_eq!(frame.parameter(0), 32);
        assert_eq!(frame.parameter(1), 24);
        assert_eq!(frame.parameter(2), 16);
    }

    #[test]
    fn test_enter_size_is_patched() {
        let mut e = BytecodeEmitter::new(64, no_host);
        let mut frame = e.enter(0).unwrap();
        assert_eq!(frame.allocate_local(), -8);
        assert_eq!(frame.allocate_local(), -16);
        e.leave(&frame).unwrap();

        let code = e.into_code();
        assert_eq!(code, vec![Opcode::Enter as u8, 16, 0, 0, 0, Opcode::Leave as u8]);
    }

    #[test]
    fn test_call_drops_arguments_afterwards() {
        let mut e = BytecodeEmitter::new(64, no_host);
        e.call(0, 2).unwrap();
        let code = e.into_code();
        assert_eq!(code[0], Opcode::Call as u8);
        assert_eq!(i32::from_le_bytes([code[1], code[2], code[3], code[4]]), -5);
        assert_eq!(&code[5..], &[Opcode::Adjust as u8, 2, 0, 0, 0]);
    }

    #[test]
    fn test_host_resolution_uses_table() {
        fn table(name: &str) -> Option<u32> {
            (name == "puts").then_some(7)
        }
        let e = BytecodeEmitter::new(64, table);
        assert_eq!(e.resolve_host("puts"), Some(HostSymbol::Builtin(7)));
        assert_eq!(e.resolve_host("nope"), None);
    }
}
