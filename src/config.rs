//! Engine configuration

use std::fmt;
use std::str::FromStr;

/// Granularity of the code capacity; the data segment starts right after it
/// in a native image, on a page boundary.
pub const PAGE_SIZE: usize = 4096;

/// Which code generator and executor to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// x86-64 machine code run in-process.
    Native,
    /// Portable bytecode run by the VM.
    Bytecode,
}

impl Backend {
    /// Native where the host can execute it, bytecode everywhere else.
    pub fn host_default() -> Self {
        if crate::runtime::native::is_supported() {
            Backend::Native
        } else {
            Backend::Bytecode
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Native => write!(f, "native"),
            Backend::Bytecode => write!(f, "bytecode"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend '{0}' (expected 'native' or 'bytecode')")]
pub struct UnknownBackend(String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "x86_64" | "x86-64" => Ok(Backend::Native),
            "bytecode" | "vm" => Ok(Backend::Bytecode),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

/// Sizes and limits of one [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: Backend,
    /// Maximum size of the code buffer, a multiple of [`PAGE_SIZE`].
    pub code_capacity: usize,
    pub data_capacity: usize,
    pub max_symbols: usize,
    /// VM stack size in bytes.
    pub stack_size: usize,
    /// VM instruction budget; `None` runs without limit.
    pub step_limit: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            backend: Backend::host_default(),
            code_capacity: 256 * 1024,
            data_capacity: 64 * 1024,
            max_symbols: 4096,
            stack_size: 1024 * 1024,
            step_limit: None,
        }
    }
}

impl EngineConfig {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Rounded up to whole pages.
    pub fn with_code_capacity(mut self, bytes: usize) -> Self {
        self.code_capacity = bytes.max(1).next_multiple_of(PAGE_SIZE);
        self
    }

    pub fn with_data_capacity(mut self, bytes: usize) -> Self {
        self.data_capacity = bytes;
        self
    }

    pub fn with_max_symbols(mut self, count: usize) -> Self {
        self.max_symbols = count;
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn with_step_limit(mut self, steps: Option<u64>) -> Self {
        self.step_limit = steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("native".parse::<Backend>().unwrap(), Backend::Native);
        assert_eq!("Bytecode".parse::<Backend>().unwrap(), Backend::Bytecode);
        assert!("wasm".parse::<Backend>().is_err());
        assert_eq!(Backend::Bytecode.to_string(), "bytecode");
    }

    #[test]
    fn test_code_capacity_is_page_rounded() {
        let config = EngineConfig::default().with_code_capacity(5000);
        assert_eq!(config.code_capacity, 8192);
        let config = EngineConfig::default().with_code_capacity(0);
        assert_eq!(config.code_capacity, PAGE_SIZE);
    }

    #[test]
    fn test_default_capacity_is_page_multiple() {
        assert_eq!(EngineConfig::default().code_capacity % PAGE_SIZE, 0);
    }
}
