//! # Introduction
//!
//! tacc compiles a small subset of C straight into executable code in a
//! single pass and runs it in-process. There is no AST: the parser emits
//! code as it recognizes each construct, and forward jumps and calls are
//! resolved through backpatch chains threaded through the code itself.
//!
//! ## Pipeline
//!
//! ```text
//! Source → Lexer → Parser/Codegen → Code + Data → Native call | VM
//! ```
//!
//! 1. [`compiler`]: tokenizer with `#define` expansion, symbol table, and
//!    a recursive-descent parser that drives an [`codegen::Emitter`].
//! 2. [`codegen`]: growable code buffer, backpatch chains, data segment and
//!    two emitters: x86-64 machine code and a portable bytecode.
//! 3. [`runtime`]: native execution of x86-64 images, and a bytecode VM with
//!    a small set of built-in host functions.
//! 4. [`engine`]: compile/run/dump driver tying the above together, sized
//!    by an [`EngineConfig`].
//! 5. [`snapshot`] and [`ui`]: statement-by-statement VM history and the
//!    ratatui-based inspector; not part of the stable library API.
//!
//! ## Supported C subset
//!
//! Types: `int` (one machine word), `char`, `void` and pointers, all of
//! which are just words. Control flow: `if/else`, `while`, `for`, `break`,
//! `return`. Operators: the usual binary and unary set with C precedence,
//! `&&`/`||` with short-circuit, `*`/`&`, casts, pre/post `++`/`--` and
//! calls through function pointers. Undeclared functions are looked up in
//! the host (`printf`, `puts`, ...).
//!
//! ```no_run
//! use tacc::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! engine.compile("int main() { return 6 * 7; }")?;
//! assert_eq!(engine.run(&[])?, 42);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codegen;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod runtime;
pub mod snapshot;
pub mod ui;

pub use compiler::{CompileError, ErrorKind, SourceLocation};
pub use config::{Backend, EngineConfig};
pub use engine::{Engine, Program, SymbolAddress};
pub use runtime::RuntimeError;
