//! Single-pass compiler
//!
//! Source text goes straight to machine code; there is no token list and no
//! syntax tree:
//! - [`lexer`]: tokens on demand, `#define` expansion, directive skipping
//! - [`symbols`]: one slot per spelling, holding its binding and pending calls
//! - [`parse`]: compiler state and helper methods
//! - `expressions`, `statements`, `declarations`: the grammar, as further
//!   `impl Compiler` blocks that drive a [`crate::codegen::Emitter`] directly
//!
//! # Supported language
//!
//! - Types: `int` (the machine word), `char`, `void`, with `*`s ignored
//! - Globals and block-leading locals, no initializers
//! - `if`/`else`, `while`, `for`, `break`, `return`, blocks
//! - Operators: arithmetic, shifts, comparisons, bitwise, `&&`, `||`, unary
//!   `+ - ! ~`, postfix `++`/`--`, `&var`
//! - Memory access only through casts: `*(int*)p`, `*(char*)p`, and calls
//!   through `*(int(*)())f`
//! - `#define NAME text` without parameters

mod declarations;
pub mod errors;
mod expressions;
pub mod lexer;
pub mod parse;
mod statements;
pub mod symbols;

pub use errors::{CompileError, ErrorKind, SourceLocation};
pub use parse::{CompileOutput, Compiler, LineEntry};
pub use symbols::{Binding, Symbol, SymbolTable};
