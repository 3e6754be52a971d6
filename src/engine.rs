//! Compile, run and dump driver
//!
//! An [`Engine`] owns everything one compilation produces. Each call to
//! [`Engine::compile`] starts from fresh arenas and replaces the previous
//! program; nothing is shared between engines.

use std::io::Write;
use std::rc::Rc;

use crate::codegen::bytecode::BytecodeEmitter;
use crate::codegen::disasm;
use crate::codegen::x86_64::X86_64Emitter;
use crate::compiler::{Binding, CompileError, CompileOutput, Compiler, LineEntry, SymbolTable};
use crate::config::{Backend, EngineConfig};
use crate::runtime::{host, native, RuntimeError, Vm, VmOptions};

/// Where a named symbol lives in a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolAddress {
    /// Code offset of a function.
    Function(usize),
    /// Data segment offset of a global.
    Global(usize),
}

/// A compiled program.
#[derive(Debug, Clone)]
pub struct Program {
    backend: Backend,
    code_capacity: usize,
    code: Vec<u8>,
    data: Vec<u8>,
    symbols: SymbolTable,
    lines: Vec<LineEntry>,
}

impl Program {
    fn new(backend: Backend, code_capacity: usize, output: CompileOutput) -> Self {
        Program {
            backend,
            code_capacity,
            code: output.code,
            data: output.data,
            symbols: output.symbols,
            lines: output.lines,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Initial image of the data segment.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Compiled functions as `(name, entry)` in code order.
    pub fn functions(&self) -> Vec<(String, usize)> {
        self.symbols.functions()
    }

    pub fn symbol_address(&self, name: &str) -> Option<SymbolAddress> {
        match self.symbols.lookup(name)?.binding {
            Binding::Function(entry) => Some(SymbolAddress::Function(entry as usize)),
            Binding::Global(offset) => Some(SymbolAddress::Global(offset as usize)),
            _ => None,
        }
    }

    pub fn main_entry(&self) -> Result<usize, RuntimeError> {
        match self.symbol_address("main") {
            Some(SymbolAddress::Function(entry)) => Ok(entry),
            _ => Err(RuntimeError::MissingMain),
        }
    }

    /// Code offset → source line table, ordered by offset.
    pub fn lines(&self) -> &[LineEntry] {
        &self.lines
    }

    /// Source line of the statement containing code offset `offset`.
    pub fn line_at(&self, offset: usize) -> Option<usize> {
        let idx = self.lines.partition_point(|e| e.offset <= offset);
        idx.checked_sub(1).map(|i| self.lines[i].line)
    }
}

#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    program: Option<Program>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            program: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    fn compiled(&self) -> Result<&Program, RuntimeError> {
        self.program.as_ref().ok_or(RuntimeError::NotCompiled)
    }

    /// Compile `source`, discarding any previous program.
    pub fn compile(&mut self, source: &str) -> Result<&Program, CompileError> {
        self.program = None;
        let config = &self.config;
        tracing::debug!(backend = %config.backend, bytes = source.len(), "compiling");

        let output = match config.backend {
            Backend::Native => Compiler::new(
                source,
                X86_64Emitter::new(config.code_capacity),
                config.data_capacity,
                config.max_symbols,
            )
            .compile()?,
            Backend::Bytecode => Compiler::new(
                source,
                BytecodeEmitter::new(config.code_capacity, host::lookup),
                config.data_capacity,
                config.max_symbols,
            )
            .compile()?,
        };
        tracing::info!(
            code = output.code.len(),
            data = output.data.len(),
            symbols = output.symbols.len(),
            "compiled"
        );
        let program = Program::new(config.backend, config.code_capacity, output);
        Ok(self.program.insert(program))
    }

    /// Run `main(argc, argv)` with `args` as `argv`. The result is truncated
    /// to an `int`.
    pub fn run(&self, args: &[String]) -> Result<i32, RuntimeError> {
        let program = self.compiled()?;
        let entry = program.main_entry()?;
        tracing::info!(backend = %program.backend, entry, "running main");
        let value = match program.backend {
            Backend::Native => native::run(
                &program.code,
                &program.data,
                program.code_capacity,
                entry,
                args,
            )?,
            Backend::Bytecode => self.vm_with(args, true)?.run()?,
        };
        Ok(value as i32)
    }

    /// A VM positioned at the start of `main`, for stepping. Output is only
    /// captured, not echoed.
    pub fn vm(&self, args: &[String]) -> Result<Vm, RuntimeError> {
        self.vm_with(args, false)
    }

    fn vm_with(&self, args: &[String], echo: bool) -> Result<Vm, RuntimeError> {
        let program = self.compiled()?;
        if program.backend != Backend::Bytecode {
            return Err(RuntimeError::UnsupportedHost(
                "the VM only executes bytecode programs".to_string(),
            ));
        }
        let entry = program.main_entry()?;
        let options = VmOptions {
            stack_size: self.config.stack_size,
            step_limit: self.config.step_limit,
            echo,
        };
        Vm::new(Rc::from(program.code.as_slice()), &program.data, entry, args, options)
    }

    /// Write the code bytes verbatim.
    pub fn dump<W: Write>(&self, sink: &mut W) -> Result<(), RuntimeError> {
        let program = self.compiled()?;
        sink.write_all(&program.code)?;
        Ok(())
    }

    /// Write a readable listing of the code.
    pub fn listing<W: Write>(&self, sink: &mut W) -> Result<(), RuntimeError> {
        let program = self.compiled()?;
        let labels = program.functions();
        match program.backend {
            Backend::Native => disasm::write_hex_listing(&program.code, &labels, sink)?,
            Backend::Bytecode => disasm::write_bytecode_listing(&program.code, &labels, sink)?,
        }
        Ok(())
    }
}
