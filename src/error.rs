//! Error taxonomy shared by every subsystem.

use std::io;
use thiserror::Error;

/// Errors that can occur anywhere in the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad command-line value, missing file, out-of-range parameter.
    #[error("{0}")]
    User(String),

    /// On-disk structure is inconsistent with its own header or invariants.
    #[error("{file}: {message}")]
    CorruptFile { file: String, message: String },

    /// An allocation or fixed buffer could not accommodate the workload.
    #[error("out of memory: {0}")]
    ResourceExhausted(String),

    /// An internal invariant was violated; indicates a bug, not bad input.
    #[error("internal invariant violated: {0}")]
    LogicViolation(String),

    /// A syscall failed or returned a short count.
    #[error("system error: {0}")]
    System(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Build a `CorruptFile` for `file` with the given message.
    pub fn corrupt(file: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::CorruptFile {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error: 1 for user/data errors, 2 for
    /// system-level failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::System(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::User("bad -k".into()).exit_code(), 1);
        assert_eq!(EngineError::corrupt("x.las", "short header").exit_code(), 1);
        let io = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(EngineError::from(io).exit_code(), 2);
    }

    #[test]
    fn test_corrupt_display() {
        let e = EngineError::corrupt("x.las", "trace sum mismatch");
        assert_eq!(e.to_string(), "x.las: trace sum mismatch");
    }
}
