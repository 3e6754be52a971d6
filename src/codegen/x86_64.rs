//! Native x86-64 (System V) backend
//!
//! Register use:
//! - `%rax`: accumulator
//! - `%rcx`: secondary (popped left operand, store address)
//! - `%rbp`: frame base, `%r11`: indirect call target
//!
//! Globals and string literals are reached RIP-relative. The loader places the
//! data segment directly after the code buffer's full capacity, so the
//! displacement to any data offset is known while the code is being written
//! and the emitted bytes do not depend on where they are eventually mapped.
//!
//! Calls follow the System V convention: the first six arguments travel in
//! `%rdi, %rsi, %rdx, %rcx, %r8, %r9`, the rest on the stack, and `%al` is
//! zeroed for variadic callees. Arguments are first pushed by the generic
//! call protocol and then shuffled into place, with padding computed from the
//! statically known push depth so that `%rsp` is 16-byte aligned at every call.

use super::buffer::{displacement, CodeBuffer, EmitResult, PatchChain};
use super::data::WORD;
use super::{BinaryOp, Condition, Emitter, FrameLayout, HostSymbol, Place, UnaryOp, Width};

const REX_W: u8 = 0x48;

/// Argument registers as (REX prefix, register number).
const ARG_REGISTERS: [(u8, u8); 6] = [
    (0x48, 7), // rdi
    (0x48, 6), // rsi
    (0x48, 2), // rdx
    (0x48, 1), // rcx
    (0x4c, 0), // r8
    (0x4c, 1), // r9
];

const REGISTER_ARGS: usize = ARG_REGISTERS.len();

pub struct X86_64Emitter {
    buf: CodeBuffer,
    /// Bytes pushed below the aligned frame bottom at this point of the code.
    depth: usize,
}

impl X86_64Emitter {
    /// `code_capacity` also fixes where the data segment starts, so it must
    /// match the layout used by the loader.
    pub fn new(code_capacity: usize) -> Self {
        X86_64Emitter {
            buf: CodeBuffer::new(code_capacity),
            depth: 0,
        }
    }

    fn data_base(&self) -> usize {
        self.buf.capacity()
    }

    /// `REX.W op modrm disp32` addressing a place, followed by `trailing` bytes.
    fn emit_place(&mut self, opcode: u8, reg: u8, place: Place, trailing: &[u8]) -> EmitResult {
        match place {
            Place::Frame(offset) => {
                self.buf
                    .emit_bytes(&[REX_W, opcode, 0x85 | (reg << 3)])?;
                self.buf.emit_i32(offset)?;
            }
            Place::Global(offset) => {
                let target = self.data_base() + offset as usize;
                self.emit_rip_relative(opcode, reg, target, trailing.len())?;
            }
            Place::Host(address) => {
                // movabs $address, %rdx; then address through (%rdx)
                self.buf.emit_bytes(&[REX_W, 0xba])?;
                self.buf.emit_i64(address as i64)?;
                self.buf.emit_bytes(&[REX_W, opcode, 0x02 | (reg << 3)])?;
            }
        }
        self.buf.emit_bytes(trailing)
    }

    fn emit_rip_relative(&mut self, opcode: u8, reg: u8, target: usize, trailing: usize) -> EmitResult {
        self.buf.emit_bytes(&[REX_W, opcode, 0x05 | (reg << 3)])?;
        let field = self.buf.position();
        // RIP points past any immediate that follows the displacement
        self.buf
            .emit_i32(displacement(field, target) - trailing as i32)
    }

    /// `mov disp32(%rsp), reg`
    fn load_stack_slot(&mut self, (rex, reg): (u8, u8), offset: usize) -> EmitResult {
        self.buf.emit_bytes(&[rex, 0x8b, 0x84 | (reg << 3), 0x24])?;
        self.buf.emit_i32(offset as i32)
    }

    fn adjust_stack(&mut self, opcode: [u8; 3], bytes: usize) -> EmitResult {
        if bytes > 0 {
            self.buf.emit_with_operand(&opcode, bytes as i32)?;
        }
        Ok(())
    }

    /// Move pushed arguments into registers and outgoing stack slots, emit the
    /// call itself via `emit_call`, then release everything.
    fn call_sequence(
        &mut self,
        argc: usize,
        indirect: bool,
        emit_call: impl FnOnce(&mut CodeBuffer) -> EmitResult,
    ) -> EmitResult {
        let stack_args = argc.saturating_sub(REGISTER_ARGS);
        let mut extra = stack_args * WORD;
        if (self.depth + extra) % 16 != 0 {
            extra += WORD;
        }
        self.adjust_stack([REX_W, 0x81, 0xec], extra)?;

        // pushed argument i sits at extra + 8 * (argc - 1 - i) from %rsp
        let slot = |i: usize| extra + WORD * (argc - 1 - i);
        for j in REGISTER_ARGS..argc {
            self.load_stack_slot((REX_W, 0), slot(j))?;
            self.buf.emit_bytes(&[REX_W, 0x89, 0x84, 0x24])?;
            self.buf.emit_i32((WORD * (j - REGISTER_ARGS)) as i32)?;
        }
        for (i, register) in ARG_REGISTERS.iter().enumerate().take(argc) {
            self.load_stack_slot(*register, slot(i))?;
        }
        if indirect {
            self.load_stack_slot((0x4c, 3), extra + WORD * argc)?; // r11
        }
        self.buf.emit_bytes(&[0x31, 0xc0])?; // xor %eax, %eax
        emit_call(&mut self.buf)?;

        let pushed = WORD * (argc + usize::from(indirect));
        self.adjust_stack([REX_W, 0x81, 0xc4], extra + pushed)?;
        self.depth -= pushed;
        Ok(())
    }
}

impl Emitter for X86_64Emitter {
    fn buffer(&self) -> &CodeBuffer {
        &self.buf
    }

    fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    fn resolve_host(&self, name: &str) -> Option<HostSymbol> {
        crate::runtime::native::lookup_symbol(name).map(HostSymbol::Address)
    }

    fn resolve_host_data(&self, name: &str) -> Option<u64> {
        crate::runtime::native::lookup_symbol(name)
    }

    fn load_immediate(&mut self, value: i64) -> EmitResult {
        match i32::try_from(value) {
            Ok(small) => {
                self.buf.emit_bytes(&[REX_W, 0xc7, 0xc0])?;
                self.buf.emit_i32(small)
            }
            Err(_) => {
                self.buf.emit_bytes(&[REX_W, 0xb8])?;
                self.buf.emit_i64(value)
            }
        }
    }

    fn load_data_address(&mut self, offset: u32) -> EmitResult {
        let target = self.data_base() + offset as usize;
        self.emit_rip_relative(0x8d, 0, target, 0)
    }

    fn load_code_address(&mut self, entry: u32) -> EmitResult {
        self.emit_rip_relative(0x8d, 0, entry as usize, 0)
    }

    fn load(&mut self, place: Place) -> EmitResult {
        self.emit_place(0x8b, 0, place, &[])
    }

    fn store(&mut self, place: Place) -> EmitResult {
        self.emit_place(0x89, 0, place, &[])
    }

    fn address_of(&mut self, place: Place) -> EmitResult {
        self.emit_place(0x8d, 0, place, &[])
    }

    fn post_increment(&mut self, place: Place, delta: i8) -> EmitResult {
        self.load(place)?;
        // addq $imm8, place
        self.emit_place(0x83, 0, place, &[delta as u8])
    }

    fn push(&mut self) -> EmitResult {
        self.depth += WORD;
        self.buf.emit_bytes(&[0x50])
    }

    fn pop(&mut self) -> EmitResult {
        self.depth -= WORD;
        self.buf.emit_bytes(&[0x59])
    }

    fn binary(&mut self, op: BinaryOp) -> EmitResult {
        let code: &[u8] = match op {
            BinaryOp::Add => &[0x48, 0x01, 0xc8],
            BinaryOp::Sub => &[0x48, 0x29, 0xc1, 0x48, 0x89, 0xc8],
            BinaryOp::Mul => &[0x48, 0x0f, 0xaf, 0xc1],
            BinaryOp::Div => &[0x48, 0x91, 0x48, 0x99, 0x48, 0xf7, 0xf9],
            BinaryOp::Mod => &[0x48, 0x91, 0x48, 0x99, 0x48, 0xf7, 0xf9, 0x48, 0x89, 0xd0],
            BinaryOp::Shl => &[0x48, 0x91, 0x48, 0xd3, 0xe0],
            BinaryOp::Shr => &[0x48, 0x91, 0x48, 0xd3, 0xf8],
            BinaryOp::BitAnd => &[0x48, 0x21, 0xc8],
            BinaryOp::BitXor => &[0x48, 0x31, 0xc8],
            BinaryOp::BitOr => &[0x48, 0x09, 0xc8],
        };
        self.buf.emit_bytes(code)
    }

    fn compare(&mut self, cond: Condition) -> EmitResult {
        let setcc = match cond {
            Condition::Eq => 0x94,
            Condition::Ne => 0x95,
            Condition::Lt => 0x9c,
            Condition::Ge => 0x9d,
            Condition::Le => 0x9e,
            Condition::Gt => 0x9f,
        };
        // cmp %rax, %rcx; mov $0, %eax; setcc %al
        self.buf.emit_bytes(&[0x48, 0x39, 0xc1, 0xb8, 0, 0, 0, 0, 0x0f, setcc, 0xc0])
    }

    fn unary(&mut self, op: UnaryOp) -> EmitResult {
        let code: &[u8] = match op {
            UnaryOp::Neg => &[0x48, 0xf7, 0xd8],
            UnaryOp::BitNot => &[0x48, 0xf7, 0xd0],
            UnaryOp::LogicalNot => &[0x48, 0x85, 0xc0, 0xb8, 0, 0, 0, 0, 0x0f, 0x94, 0xc0],
        };
        self.buf.emit_bytes(code)
    }

    fn load_indirect(&mut self, width: Width) -> EmitResult {
        match width {
            Width::Word => self.buf.emit_bytes(&[0x48, 0x8b, 0x00]),
            Width::Byte => self.buf.emit_bytes(&[0x48, 0x0f, 0xbe, 0x00]),
        }
    }

    fn store_indirect(&mut self, width: Width) -> EmitResult {
        self.pop()?;
        match width {
            Width::Word => self.buf.emit_bytes(&[0x48, 0x89, 0x01]),
            Width::Byte => self.buf.emit_bytes(&[0x88, 0x01]),
        }
    }

    fn branch(&mut self, when_nonzero: bool, chain: &mut PatchChain) -> EmitResult {
        self.buf.emit_bytes(&[0x48, 0x85, 0xc0])?;
        let jcc = if when_nonzero { 0x85 } else { 0x84 };
        self.buf.emit_linked(&[0x0f, jcc], chain)
    }

    fn jump(&mut self, chain: &mut PatchChain) -> EmitResult {
        self.buf.emit_linked(&[0xe9], chain)
    }

    fn jump_back(&mut self, target: usize) -> EmitResult {
        self.buf.emit_relative(&[0xe9], target)
    }

    fn call(&mut self, entry: u32, argc: usize) -> EmitResult {
        self.call_sequence(argc, false, |buf| buf.emit_relative(&[0xe8], entry as usize))
    }

    fn call_forward(&mut self, chain: &mut PatchChain, argc: usize) -> EmitResult {
        self.call_sequence(argc, false, |buf| buf.emit_linked(&[0xe8], chain))
    }

    fn call_indirect(&mut self, argc: usize) -> EmitResult {
        self.call_sequence(argc, true, |buf| buf.emit_bytes(&[0x41, 0xff, 0xd3]))
    }

    fn call_host(&mut self, host: HostSymbol, argc: usize) -> EmitResult {
        let address = match host {
            HostSymbol::Address(address) => address,
            HostSymbol::Builtin(index) => unreachable!("builtin host #{index} on the native backend"),
        };
        self.call_sequence(argc, false, |buf| {
            buf.emit_bytes(&[0x49, 0xbb])?; // movabs $address, %r11
            buf.emit_i64(address as i64)?;
            buf.emit_bytes(&[0x41, 0xff, 0xd3]) // call *%r11
        })
    }

    fn enter(&mut self, param_count: usize) -> EmitResult<FrameLayout> {
        self.depth = 0;
        // push %rbp; mov %rsp, %rbp; sub $frame, %rsp
        self.buf.emit_bytes(&[0x55, 0x48, 0x89, 0xe5])?;
        let size_field = self.buf.emit_with_operand(&[REX_W, 0x81, 0xec], 0)?;

        // register parameters are spilled just below the frame base, stack
        // parameters stay above the return address
        let spilled = param_count.min(REGISTER_ARGS);
        let mut params = Vec::with_capacity(param_count);
        for i in 0..param_count {
            if i < REGISTER_ARGS {
                let offset = -((WORD * (i + 1)) as i32);
                let (rex, reg) = ARG_REGISTERS[i];
                self.buf.emit_bytes(&[rex, 0x89, 0x85 | (reg << 3)])?;
                self.buf.emit_i32(offset)?;
                params.push(offset);
            } else {
                params.push((2 * WORD + WORD * (i - REGISTER_ARGS)) as i32);
            }
        }
        Ok(FrameLayout::new(size_field, (spilled * WORD) as u32, params))
    }

    fn leave(&mut self, frame: &FrameLayout) -> EmitResult {
        self.buf.emit_bytes(&[0xc9, 0xc3])?; // leave; ret
        let size = frame.size().next_multiple_of(16);
        self.buf.patch_i32(frame.size_field, size as i32);
        Ok(())
    }

    fn into_code(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_function_bytes() {
        let mut e = X86_64Emitter::new(4096);
        let frame = e.enter(0).unwrap();
        e.load_immediate(0).unwrap();
        e.leave(&frame).unwrap();

        assert_eq!(
            e.into_code(),
            vec![
                0x55, 0x48, 0x89, 0xe5, // push %rbp; mov %rsp, %rbp
                0x48, 0x81, 0xec, 0, 0, 0, 0, // sub $0, %rsp
                0x48, 0xc7, 0xc0, 0, 0, 0, 0, // mov $0, %rax
                0xc9, 0xc3, // leave; ret
            ]
        );
    }

    #[test]
    fn test_frame_size_is_patched_and_aligned() {
        let mut e = X86_64Emitter::new(4096);
        let mut frame = e.enter(1).unwrap();
        assert_eq!(frame.parameter(0), -8);
        assert_eq!(frame.allocate_local(), -16);
        assert_eq!(frame.allocate_local(), -24);
        e.leave(&frame).unwrap();

        let code = e.into_code();
        assert_eq!(&code[7..11], &32i32.to_le_bytes());
    }

    #[test]
    fn test_stack_parameters_sit_above_return_address() {
        let mut e = X86_64Emitter::new(4096);
        let frame = e.enter(8).unwrap();
        assert_eq!(frame.parameter(5), -48);
        assert_eq!(frame.parameter(6), 16);
        assert_eq!(frame.parameter(7), 24);
    }

    #[test]
    fn test_globals_are_rip_relative_to_data_base() {
        let mut e = X86_64Emitter::new(0x1000);
        e.load(Place::Global(8)).unwrap();
        let code = e.into_code();
        assert_eq!(&code[..3], &[0x48, 0x8b, 0x05]);
        // field at 3, ends at 7, data cell at 0x1000 + 8
        assert_eq!(&code[3..7], &((0x1008 - 7) as i32).to_le_bytes());
    }

    #[test]
    fn test_post_increment_accounts_for_immediate() {
        let mut e = X86_64Emitter::new(0x1000);
        e.post_increment(Place::Global(0), 1).unwrap();
        let code = e.into_code();
        // second instruction: 48 83 05 disp32 01, ends at 15
        assert_eq!(&code[7..10], &[0x48, 0x83, 0x05]);
        assert_eq!(&code[10..14], &((0x1000 - 15) as i32).to_le_bytes());
        assert_eq!(code[14], 1);
    }

    #[test]
    fn test_host_place_goes_through_rdx() {
        let mut e = X86_64Emitter::new(0x1000);
        e.load(Place::Host(0x1122_3344_5566_7788)).unwrap();
        e.store(Place::Host(8)).unwrap();
        let code = e.into_code();
        // movabs $addr, %rdx; mov (%rdx), %rax
        assert_eq!(&code[..2], &[0x48, 0xba]);
        assert_eq!(&code[2..10], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&code[10..13], &[0x48, 0x8b, 0x02]);
        // mov %rax, (%rdx)
        assert_eq!(&code[23..26], &[0x48, 0x89, 0x02]);
    }

    #[test]
    fn test_call_pads_to_sixteen_bytes() {
        let mut e = X86_64Emitter::new(4096);
        e.enter(0).unwrap();
        e.push().unwrap(); // an outstanding left operand
        e.push().unwrap(); // the single argument
        let before = e.position();
        e.call(0, 1).unwrap();
        let code = e.into_code();
        // two words pushed: already aligned, so no padding `sub`
        assert_eq!(&code[before..before + 4], &[0x48, 0x8b, 0xbc, 0x24]);
    }
}
