//! Compile-time diagnostics.

use std::fmt;

use crate::codegen::buffer::{Arena, CapacityError};

/// Position in the main source text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceLocation {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn start() -> Self {
        SourceLocation {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("Lexer error")]
    Lex,
    #[error("Syntax error")]
    Syntax,
    #[error("Unresolved symbol")]
    UnresolvedSymbol,
    #[error("Capacity exceeded ({0})")]
    CapacityExceeded(Arena),
}

/// The first error met while compiling; compilation stops there.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} at {}: {}", self.kind, loc, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl CompileError {
    pub fn lex(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError {
            kind: ErrorKind::Lex,
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError {
            kind: ErrorKind::Syntax,
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn unresolved(message: impl Into<String>, location: Option<SourceLocation>) -> Self {
        CompileError {
            kind: ErrorKind::UnresolvedSymbol,
            message: message.into(),
            location,
        }
    }

    /// Attach `location` unless the error already carries one.
    pub fn or_location(mut self, location: SourceLocation) -> Self {
        self.location.get_or_insert(location);
        self
    }
}

impl From<CapacityError> for CompileError {
    fn from(err: CapacityError) -> Self {
        CompileError {
            kind: ErrorKind::CapacityExceeded(err.arena),
            message: err.to_string(),
            location: None,
        }
    }
}

pub type CompileResult<T = ()> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let loc = SourceLocation {
            offset: 12,
            line: 2,
            column: 5,
        };
        let err = CompileError::syntax("Expected ';'", loc);
        assert_eq!(err.to_string(), "Syntax error at line 2, column 5: Expected ';'");
    }

    #[test]
    fn test_capacity_error_gets_location_later() {
        let err: CompileError = CapacityError {
            arena: Arena::Code,
            limit: 16,
        }
        .into();
        assert_eq!(err.kind, ErrorKind::CapacityExceeded(Arena::Code));
        assert!(err.location.is_none());

        let located = err.or_location(SourceLocation::start());
        assert_eq!(located.location, Some(SourceLocation::start()));
    }
}
