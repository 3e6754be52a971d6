//! Program execution
//!
//! - [`native`]: maps x86-64 code into executable memory and calls it
//! - [`vm`]: interprets bytecode over a sandboxed [`memory::Memory`]
//! - [`host`]: built-in C library functions available to bytecode
//! - [`errors`]: [`RuntimeError`]

pub mod errors;
pub mod host;
pub mod memory;
pub mod native;
pub mod vm;

pub use errors::RuntimeError;
pub use vm::{Status, Vm, VmOptions};
