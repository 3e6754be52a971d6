//! Code generation backends
//!
//! The parser never writes instruction bytes itself. It drives an
//! [`Emitter`], a mnemonic-level interface shaped around a one-register
//! accumulator machine:
//!
//! - the *accumulator* holds the value of the expression just compiled
//! - a *secondary* register receives the left operand popped off the stack
//! - binary operations combine `secondary OP accumulator` into the accumulator
//!
//! Two backends implement it:
//! - [`x86_64`]: native System V machine code, executed by [`crate::runtime::native`]
//! - [`bytecode`]: portable stack-machine code, executed by [`crate::runtime::vm`]
//!
//! Both share [`buffer::CodeBuffer`] and its backpatch chains, and both encode
//! branch and call targets as `target - field - 4` displacements.

pub mod buffer;
pub mod bytecode;
pub mod data;
pub mod disasm;
pub mod x86_64;

use buffer::{CodeBuffer, EmitResult, PatchChain};

/// A memory location named by a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    /// Offset into the data segment.
    Global(u32),
    /// Signed offset from the frame base.
    Frame(i32),
    /// Absolute address of a host data object, such as `stdout`.
    Host(u64),
}

/// Access width of a pointer dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Word,
    Byte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    LogicalNot,
}

/// A function living outside the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSymbol {
    /// Absolute address from the dynamic loader.
    Address(u64),
    /// Index into the VM's built-in host table.
    Builtin(u32),
}

/// Frame bookkeeping for the function being compiled.
///
/// The prologue is emitted before the body is known, so its allocation size
/// is a placeholder field patched by [`Emitter::leave`].
#[derive(Debug, Clone)]
pub struct FrameLayout {
    size_field: usize,
    reserved: u32,
    locals: u32,
    params: Vec<i32>,
}

impl FrameLayout {
    pub(crate) fn new(size_field: usize, reserved: u32, params: Vec<i32>) -> Self {
        FrameLayout {
            size_field,
            reserved,
            locals: 0,
            params,
        }
    }

    /// Frame offset of parameter `index`.
    pub fn parameter(&self, index: usize) -> i32 {
        self.params[index]
    }

    /// Bind a fresh local cell below everything allocated so far.
    pub fn allocate_local(&mut self) -> i32 {
        self.locals += 1;
        -((self.reserved + self.locals * data::WORD as u32) as i32)
    }

    /// Bytes the frame needs below its base.
    pub fn size(&self) -> u32 {
        self.reserved + self.locals * data::WORD as u32
    }

    pub fn local_count(&self) -> u32 {
        self.locals
    }
}

/// Mnemonic-level instruction sink.
///
/// Every call protocol is the same on both backends: the compiler evaluates
/// each argument left to right and [`push`](Emitter::push)es it; for
/// indirect calls the callee value is pushed before the arguments. The call
/// method then consumes `argc` pushed words (plus the callee) and leaves the
/// result in the accumulator.
pub trait Emitter {
    fn buffer(&self) -> &CodeBuffer;

    fn buffer_mut(&mut self) -> &mut CodeBuffer;

    fn position(&self) -> usize {
        self.buffer().position()
    }

    /// Point every link of `chain` at the current position.
    fn resolve(&mut self, chain: &mut PatchChain) {
        self.buffer_mut().resolve(chain);
    }

    /// Look up a function provided by the host, by name.
    fn resolve_host(&self, name: &str) -> Option<HostSymbol>;

    /// Look up a data object provided by the host, usable as a
    /// [`Place::Host`].
    fn resolve_host_data(&self, name: &str) -> Option<u64>;

    fn load_immediate(&mut self, value: i64) -> EmitResult;

    /// Accumulator = address of a data segment offset.
    fn load_data_address(&mut self, offset: u32) -> EmitResult;

    /// Accumulator = address of a compiled function.
    fn load_code_address(&mut self, entry: u32) -> EmitResult;

    fn load(&mut self, place: Place) -> EmitResult;

    fn store(&mut self, place: Place) -> EmitResult;

    fn address_of(&mut self, place: Place) -> EmitResult;

    /// Add `delta` to the variable in memory; the accumulator keeps the old value.
    fn post_increment(&mut self, place: Place, delta: i8) -> EmitResult;

    fn push(&mut self) -> EmitResult;

    /// Pop the top of the stack into the secondary register.
    fn pop(&mut self) -> EmitResult;

    fn binary(&mut self, op: BinaryOp) -> EmitResult;

    /// Accumulator = `secondary COND accumulator` as 0 or 1.
    fn compare(&mut self, cond: Condition) -> EmitResult;

    fn unary(&mut self, op: UnaryOp) -> EmitResult;

    fn load_indirect(&mut self, width: Width) -> EmitResult;

    /// Pop an address and store the accumulator through it.
    fn store_indirect(&mut self, width: Width) -> EmitResult;

    /// Branch when the accumulator is nonzero (`when_nonzero`) or zero; the
    /// target is linked into `chain`.
    fn branch(&mut self, when_nonzero: bool, chain: &mut PatchChain) -> EmitResult;

    /// Unconditional forward jump linked into `chain`.
    fn jump(&mut self, chain: &mut PatchChain) -> EmitResult;

    /// Unconditional jump to an already emitted position.
    fn jump_back(&mut self, target: usize) -> EmitResult;

    fn call(&mut self, entry: u32, argc: usize) -> EmitResult;

    /// Call a function whose entry is not known yet; the call site is linked
    /// into the callee's chain.
    fn call_forward(&mut self, chain: &mut PatchChain, argc: usize) -> EmitResult;

    fn call_indirect(&mut self, argc: usize) -> EmitResult;

    fn call_host(&mut self, host: HostSymbol, argc: usize) -> EmitResult;

    /// Emit a function prologue for `param_count` parameters.
    fn enter(&mut self, param_count: usize) -> EmitResult<FrameLayout>;

    /// Emit the epilogue and patch the prologue's allocation size.
    fn leave(&mut self, frame: &FrameLayout) -> EmitResult;

    fn into_code(self) -> Vec<u8>
    where
        Self: Sized;
}
