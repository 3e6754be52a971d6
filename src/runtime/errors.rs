//! Runtime error types
//!
//! [`RuntimeError`] covers everything that can go wrong after a successful
//! compile: a missing entry point, a host that cannot run native code, and
//! the faults the bytecode VM detects while executing.

/// Errors raised while loading or executing a compiled program.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("No 'main' function defined")]
    MissingMain,

    #[error("No program has been compiled")]
    NotCompiled,

    #[error("Native execution is not supported on this host: {0}")]
    UnsupportedHost(String),

    #[error("Could not prepare executable memory: {0}")]
    Mapping(std::io::Error),

    /// Bad memory access, division by zero or a jump outside the code.
    #[error("Fault at pc {pc:#06x}: {message}")]
    Fault { pc: usize, message: String },

    #[error("Stack overflow at pc {pc:#06x}")]
    StackOverflow { pc: usize },

    #[error("Step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("Host function '{name}' failed: {message}")]
    Host { name: &'static str, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        let err = RuntimeError::Fault {
            pc: 0x12,
            message: "division by zero".to_string(),
        };
        assert_eq!(err.to_string(), "Fault at pc 0x0012: division by zero");
    }
}
