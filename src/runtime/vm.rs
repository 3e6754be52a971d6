//! Bytecode virtual machine
//!
//! A register machine with an accumulator (`a`), a secondary register (`b`),
//! a stack pointer, a frame base and a program counter, executing the output
//! of [`crate::codegen::bytecode::BytecodeEmitter`] over a [`Memory`].
//!
//! The VM is `Clone` so that the inspector can keep a history of states.
//! Code is shared between clones.

use std::rc::Rc;

use super::errors::RuntimeError;
use super::host::{self, Console, HostContext};
use super::memory::{AccessError, Memory};
use crate::codegen::bytecode::{Opcode, CODE_BASE, MEMORY_BASE};
use crate::codegen::data::WORD;

/// Return address that ends the run when `main` returns.
const EXIT_ADDRESS: i64 = -1;

const W: u64 = WORD as u64;

/// VM sizing and limits.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub stack_size: usize,
    pub step_limit: Option<u64>,
    /// Mirror program output to stdout as it is produced.
    pub echo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Halted(i64),
}

#[derive(Debug, Clone)]
pub struct Vm {
    code: Rc<[u8]>,
    memory: Memory,
    console: Console,
    a: i64,
    b: i64,
    sp: u64,
    bp: u64,
    pc: usize,
    /// Lowest address the stack may grow to.
    stack_limit: u64,
    steps: u64,
    step_limit: Option<u64>,
    status: Status,
}

impl Vm {
    /// Lay out memory and prepare a call to `main(argc, argv)` at `entry`.
    pub fn new(
        code: Rc<[u8]>,
        data: &[u8],
        entry: usize,
        args: &[String],
        options: VmOptions,
    ) -> Result<Self, RuntimeError> {
        // argv strings, then the NULL-terminated pointer array
        let strings_at = data.len().next_multiple_of(WORD);
        let strings_len: usize = args.iter().map(|a| a.len() + 1).sum();
        let argv_at = (strings_at + strings_len).next_multiple_of(WORD);
        let stack_limit = argv_at + (args.len() + 1) * WORD;
        let size = (stack_limit + options.stack_size).next_multiple_of(16);

        let mut memory = Memory::new(size);
        let map = |e: AccessError| RuntimeError::Fault {
            pc: entry,
            message: e.to_string(),
        };
        memory.write_bytes(MEMORY_BASE, data).map_err(map)?;
        let mut cursor = MEMORY_BASE + strings_at as u64;
        for (i, arg) in args.iter().enumerate() {
            memory.write_bytes(cursor, arg.as_bytes()).map_err(map)?;
            let slot = MEMORY_BASE + (argv_at + i * WORD) as u64;
            memory.write_word(slot, cursor as i64).map_err(map)?;
            cursor += arg.len() as u64 + 1;
        }

        let mut vm = Vm {
            code,
            sp: memory.end(),
            memory,
            console: Console::new(options.echo),
            a: 0,
            b: 0,
            bp: 0,
            pc: entry,
            stack_limit: MEMORY_BASE + stack_limit as u64,
            steps: 0,
            step_limit: options.step_limit,
            status: Status::Running,
        };
        if entry >= vm.code.len() {
            return Err(vm.fault("entry point outside of the code"));
        }
        vm.bp = vm.sp;
        vm.push(args.len() as i64)?;
        vm.push((MEMORY_BASE + argv_at as u64) as i64)?;
        vm.push(EXIT_ADDRESS)?;
        Ok(vm)
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn bp(&self) -> u64 {
        self.bp
    }

    pub fn accumulator(&self) -> i64 {
        self.a
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Approximate heap footprint of one clone.
    pub fn footprint(&self) -> usize {
        self.memory.size() + self.console.output().len() + std::mem::size_of::<Self>()
    }

    /// Live stack words from the top of the stack upward, as `(address, value)`.
    pub fn stack_words(&self, limit: usize) -> Vec<(u64, i64)> {
        (0..limit as u64)
            .map(|i| self.sp + i * W)
            .take_while(|&addr| addr < self.memory.end())
            .filter_map(|addr| self.memory.read_word(addr).ok().map(|v| (addr, v)))
            .collect()
    }

    fn fault(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::Fault {
            pc: self.pc,
            message: message.into(),
        }
    }

    fn access<T>(&self, result: Result<T, AccessError>) -> Result<T, RuntimeError> {
        result.map_err(|e| self.fault(e.to_string()))
    }

    fn push(&mut self, value: i64) -> Result<(), RuntimeError> {
        if self.sp < self.stack_limit + W {
            return Err(RuntimeError::StackOverflow { pc: self.pc });
        }
        self.sp -= W;
        let r = self.memory.write_word(self.sp, value);
        self.access(r)
    }

    fn pop(&mut self) -> Result<i64, RuntimeError> {
        let r = self.memory.read_word(self.sp);
        let value = self.access(r)?;
        self.sp += W;
        Ok(value)
    }

    fn fetch_u8(&mut self) -> Result<u8, RuntimeError> {
        let byte = *self
            .code
            .get(self.pc)
            .ok_or_else(|| self.fault("execution ran past the end of the code"))?;
        self.pc += 1;
        Ok(byte)
    }

    fn fetch_i32(&mut self) -> Result<i32, RuntimeError> {
        let raw = self
            .code
            .get(self.pc..self.pc + 4)
            .ok_or_else(|| self.fault("truncated instruction"))?;
        let value = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        self.pc += 4;
        Ok(value)
    }

    fn fetch_i64(&mut self) -> Result<i64, RuntimeError> {
        let lo = self.fetch_i32()? as u32 as u64;
        let hi = self.fetch_i32()? as u32 as u64;
        Ok((lo | (hi << 32)) as i64)
    }

    /// Code offset reached by a relative field just fetched.
    fn relative_target(&self, rel: i32) -> Result<usize, RuntimeError> {
        let target = self.pc as i64 + i64::from(rel);
        if target < 0 || target as usize >= self.code.len() {
            return Err(self.fault(format!("jump to {target:#x} outside of the code")));
        }
        Ok(target as usize)
    }

    fn frame_address(&self, offset: i32) -> u64 {
        self.bp.wrapping_add_signed(i64::from(offset))
    }

    fn global_address(offset: i32) -> u64 {
        MEMORY_BASE + offset as u32 as u64
    }

    fn call_to(&mut self, target: usize) -> Result<(), RuntimeError> {
        self.push(self.pc as i64)?;
        self.pc = target;
        Ok(())
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<Status, RuntimeError> {
        if let Status::Halted(_) = self.status {
            return Ok(self.status);
        }
        self.steps += 1;
        if let Some(limit) = self.step_limit {
            if self.steps > limit {
                return Err(RuntimeError::StepLimit(limit));
            }
        }

        let at = self.pc;
        let byte = self.fetch_u8()?;
        let Some(op) = Opcode::from_byte(byte) else {
            self.pc = at;
            return Err(self.fault(format!("invalid opcode {byte:#04x}")));
        };

        match op {
            Opcode::Imm => self.a = self.fetch_i64()?,
            Opcode::LoadLocal | Opcode::LoadGlobal => {
                let address = self.place_address(op)?;
                let r = self.memory.read_word(address);
                self.a = self.access(r)?;
            }
            Opcode::StoreLocal | Opcode::StoreGlobal => {
                let address = self.place_address(op)?;
                let r = self.memory.write_word(address, self.a);
                self.access(r)?;
            }
            Opcode::LeaLocal | Opcode::LeaGlobal => self.a = self.place_address(op)? as i64,
            Opcode::IncLocal | Opcode::IncGlobal => {
                let address = self.place_address(op)?;
                let delta = self.fetch_u8()? as i8;
                let r = self.memory.read_word(address);
                self.a = self.access(r)?;
                let r = self
                    .memory
                    .write_word(address, self.a.wrapping_add(i64::from(delta)));
                self.access(r)?;
            }
            Opcode::LeaCode => {
                let rel = self.fetch_i32()?;
                self.a = (CODE_BASE + self.relative_target(rel)? as u64) as i64;
            }
            Opcode::Push => self.push(self.a)?,
            Opcode::Pop => self.b = self.pop()?,
            Opcode::Mul => self.a = self.b.wrapping_mul(self.a),
            Opcode::Div | Opcode::Mod => {
                if self.a == 0 {
                    self.pc = at;
                    return Err(self.fault("division by zero"));
                }
                self.a = if op == Opcode::Div {
                    self.b.wrapping_div(self.a)
                } else {
                    self.b.wrapping_rem(self.a)
                };
            }
            Opcode::Add => self.a = self.b.wrapping_add(self.a),
            Opcode::Sub => self.a = self.b.wrapping_sub(self.a),
            Opcode::Shl => self.a = self.b.wrapping_shl(self.a as u32),
            Opcode::Shr => self.a = self.b.wrapping_shr(self.a as u32),
            Opcode::And => self.a &= self.b,
            Opcode::Xor => self.a ^= self.b,
            Opcode::Or => self.a |= self.b,
            Opcode::Eq => self.a = i64::from(self.b == self.a),
            Opcode::Ne => self.a = i64::from(self.b != self.a),
            Opcode::Lt => self.a = i64::from(self.b < self.a),
            Opcode::Le => self.a = i64::from(self.b <= self.a),
            Opcode::Gt => self.a = i64::from(self.b > self.a),
            Opcode::Ge => self.a = i64::from(self.b >= self.a),
            Opcode::Neg => self.a = self.a.wrapping_neg(),
            Opcode::Not => self.a = !self.a,
            Opcode::LNot => self.a = i64::from(self.a == 0),
            Opcode::LoadWord => {
                let r = self.memory.read_word(self.a as u64);
                self.a = self.access(r)?;
            }
            Opcode::LoadByte => {
                let r = self.memory.read_byte(self.a as u64);
                self.a = i64::from(self.access(r)? as i8);
            }
            Opcode::StoreWord => {
                self.b = self.pop()?;
                let r = self.memory.write_word(self.b as u64, self.a);
                self.access(r)?;
            }
            Opcode::StoreByte => {
                self.b = self.pop()?;
                let r = self.memory.write_byte(self.b as u64, self.a as u8);
                self.access(r)?;
            }
            Opcode::Jz | Opcode::Jnz | Opcode::Jmp => {
                let rel = self.fetch_i32()?;
                let taken = match op {
                    Opcode::Jz => self.a == 0,
                    Opcode::Jnz => self.a != 0,
                    _ => true,
                };
                if taken {
                    self.pc = self.relative_target(rel)?;
                }
            }
            Opcode::Call => {
                let rel = self.fetch_i32()?;
                let target = self.relative_target(rel)?;
                self.call_to(target)?;
            }
            Opcode::CallIndirect => {
                let argc = u64::from(self.fetch_u8()?);
                let r = self.memory.read_word(self.sp + argc * W);
                let callee = self.access(r)? as u64;
                let target = callee
                    .checked_sub(CODE_BASE)
                    .filter(|&t| (t as usize) < self.code.len())
                    .ok_or_else(|| self.fault(format!("call through non-code address {callee:#x}")))?;
                self.call_to(target as usize)?;
            }
            Opcode::CallHost => {
                let index = self.fetch_i32()? as u32;
                let argc = usize::from(self.fetch_u8()?);
                self.call_host(index, argc)?;
            }
            Opcode::Adjust => {
                let words = self.fetch_i32()? as u32 as u64;
                self.sp += words * W;
            }
            Opcode::Enter => {
                let size = self.fetch_i32()? as u32 as u64;
                self.push(self.bp as i64)?;
                self.bp = self.sp;
                if self.sp < self.stack_limit + size {
                    return Err(RuntimeError::StackOverflow { pc: at });
                }
                self.sp -= size;
                let r = self.memory.fill(self.sp, size as usize, 0);
                self.access(r)?;
            }
            Opcode::Leave => {
                self.sp = self.bp;
                self.bp = self.pop()? as u64;
                let ret = self.pop()?;
                if ret == EXIT_ADDRESS {
                    self.status = Status::Halted(self.a);
                } else {
                    self.pc = ret as usize;
                }
            }
        }
        Ok(self.status)
    }

    fn place_address(&mut self, op: Opcode) -> Result<u64, RuntimeError> {
        let offset = self.fetch_i32()?;
        Ok(match op {
            Opcode::LoadGlobal | Opcode::StoreGlobal | Opcode::LeaGlobal | Opcode::IncGlobal => {
                Self::global_address(offset)
            }
            _ => self.frame_address(offset),
        })
    }

    fn call_host(&mut self, index: u32, argc: usize) -> Result<(), RuntimeError> {
        let function = host::function(index)
            .ok_or_else(|| self.fault(format!("unknown host function #{index}")))?;
        let mut args = Vec::with_capacity(argc);
        for i in 0..argc {
            let r = self.memory.read_word(self.sp + ((argc - 1 - i) * WORD) as u64);
            args.push(self.access(r)?);
        }
        let mut ctx = HostContext {
            memory: &mut self.memory,
            console: &mut self.console,
        };
        self.a = (function.call)(&mut ctx, &args).map_err(|message| RuntimeError::Host {
            name: function.name,
            message,
        })?;
        Ok(())
    }

    /// Run until `main` returns.
    pub fn run(&mut self) -> Result<i64, RuntimeError> {
        loop {
            if let Status::Halted(value) = self.step()? {
                tracing::debug!(steps = self.steps, value, "program finished");
                return Ok(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::bytecode::BytecodeEmitter;
    use crate::codegen::{BinaryOp, Emitter, Place};

    fn options() -> VmOptions {
        VmOptions {
            stack_size: 4096,
            step_limit: Some(10_000),
            echo: false,
        }
    }

    fn vm_for(build: impl FnOnce(&mut BytecodeEmitter)) -> Vm {
        let mut e = BytecodeEmitter::new(1024, host::lookup);
        build(&mut e);
        Vm::new(e.into_code().into(), &[], 0, &[], options()).unwrap()
    }

    #[test]
    fn test_returns_accumulator() {
        let mut vm = vm_for(|e| {
            let frame = e.enter(2).unwrap();
            e.load_immediate(6).unwrap();
            e.push().unwrap();
            e.load_immediate(7).unwrap();
            e.pop().unwrap();
            e.binary(BinaryOp::Mul).unwrap();
            e.leave(&frame).unwrap();
        });
        assert_eq!(vm.run().unwrap(), 42);
    }

    #[test]
    fn test_main_sees_argc_and_argv() {
        let mut e = BytecodeEmitter::new(1024, host::lookup);
        let frame = e.enter(2).unwrap();
        e.load(Place::Frame(frame.parameter(1))).unwrap();
        e.load_indirect(crate::codegen::Width::Word).unwrap();
        e.load_indirect(crate::codegen::Width::Byte).unwrap();
        e.push().unwrap();
        e.load(Place::Frame(frame.parameter(0))).unwrap();
        e.pop().unwrap();
        e.binary(BinaryOp::Add).unwrap();
        e.leave(&frame).unwrap();

        let args = vec!["x".to_string(), "yz".to_string()];
        let mut vm = Vm::new(e.into_code().into(), &[], 0, &args, options()).unwrap();
        assert_eq!(vm.run().unwrap(), i64::from(b'x') + 2);
    }

    #[test]
    fn test_division_by_zero_faults() {
        let mut vm = vm_for(|e| {
            let frame = e.enter(0).unwrap();
            e.load_immediate(1).unwrap();
            e.push().unwrap();
            e.load_immediate(0).unwrap();
            e.pop().unwrap();
            e.binary(BinaryOp::Div).unwrap();
            e.leave(&frame).unwrap();
        });
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::Fault { ref message, .. } if message == "division by zero"));
    }

    #[test]
    fn test_null_load_faults() {
        let mut vm = vm_for(|e| {
            let frame = e.enter(0).unwrap();
            e.load_immediate(0).unwrap();
            e.load_indirect(crate::codegen::Width::Word).unwrap();
            e.leave(&frame).unwrap();
        });
        assert!(matches!(vm.run(), Err(RuntimeError::Fault { .. })));
    }

    #[test]
    fn test_step_limit() {
        let mut vm = vm_for(|e| {
            e.enter(0).unwrap();
            let top = e.position();
            e.jump_back(top).unwrap();
        });
        assert!(matches!(vm.run(), Err(RuntimeError::StepLimit(10_000))));
    }

    #[test]
    fn test_unbounded_recursion_overflows() {
        let mut vm = vm_for(|e| {
            e.enter(0).unwrap();
            e.call(0, 0).unwrap();
        });
        assert!(matches!(vm.run(), Err(RuntimeError::StackOverflow { .. })));
    }

    #[test]
    fn test_host_call_writes_console() {
        let mut vm = vm_for(|e| {
            let frame = e.enter(0).unwrap();
            e.load_immediate(i64::from(b'!')).unwrap();
            e.push().unwrap();
            let putchar = e.resolve_host("putchar").unwrap();
            e.call_host(putchar, 1).unwrap();
            e.leave(&frame).unwrap();
        });
        assert_eq!(vm.run().unwrap(), 33);
        assert_eq!(vm.console().output(), b"!");
    }

    #[test]
    fn test_clone_is_independent() {
        let mut vm = vm_for(|e| {
            let frame = e.enter(0).unwrap();
            e.load_immediate(5).unwrap();
            e.leave(&frame).unwrap();
        });
        let before = vm.clone();
        vm.run().unwrap();
        assert_eq!(before.status(), Status::Running);
        assert_eq!(vm.status(), Status::Halted(5));
    }
}
