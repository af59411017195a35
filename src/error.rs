//! Error types for assembly and execution.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure surfaced by the library's file-level entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// An assembly failure, naming the 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[Line {line}] Error: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// What went wrong during execution, without location context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    #[error("variable '{0}' is not defined")]
    Undefined(String),

    #[error("cannot use unassigned variable '{0}'")]
    Unassigned(String),

    #[error("cannot assign variable '{0}' to itself")]
    SelfAssignment(String),

    #[error("cannot divide by zero")]
    DivideByZero,

    #[error("vector length mismatch ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },

    #[error("index {index} is outside a vector of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("subscript/swizzle requires a vector: '{0}'")]
    NotAVector(String),

    #[error("cannot assign {0} to a variable")]
    NonFinite(&'static str),

    #[error("{0}")]
    Shape(String),

    #[error("expected a {expected} operand, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot pop the global frame")]
    PopGlobalFrame,

    #[error("no procedure to return to")]
    ReturnOutsideCall,

    #[error("too many instruction executions (limit {0})")]
    CeilingExceeded(usize),

    #[error("io error: {0}")]
    Output(String),
}

/// A fatal execution failure with the instruction and call stack it happened in.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub ip: usize,
    pub line: Option<usize>,
    pub instruction: String,
    /// Innermost function first, ending with `<Root>`.
    pub stack_trace: Vec<String>,
}

impl RuntimeError {
    pub fn kind(&self) -> &RuntimeErrorKind {
        &self.kind
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "[Line {}] '{}': {}", line, self.instruction, self.kind)?,
            None => write!(f, "'{}': {}", self.instruction, self.kind)?,
        }
        for function in &self.stack_trace {
            write!(f, "\n    at {}", function)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let e = SyntaxError::new(3, "Unrecognized instruction 'foo'");
        assert_eq!(e.to_string(), "[Line 3] Error: Unrecognized instruction 'foo'");
    }

    #[test]
    fn test_runtime_error_display_includes_trace() {
        let e = RuntimeError {
            kind: RuntimeErrorKind::Undefined("unknown".to_string()),
            ip: 7,
            line: Some(12),
            instruction: "print $unknown".to_string(),
            stack_trace: vec!["func2".to_string(), "func1".to_string(), "<Root>".to_string()],
        };
        let s = e.to_string();
        assert!(s.starts_with("[Line 12] 'print $unknown': variable 'unknown' is not defined"));
        assert!(s.contains("at func2"));
        assert!(s.contains("at <Root>"));
    }
}
