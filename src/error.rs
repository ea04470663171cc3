// src/error.rs
//
// Error taxonomy for index building, loading, parsing and the prefetching reader.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Top-level error returned by every reader component.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Malformed index file or container framing.
    #[error("format error in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// Missing file, short read, permission problem.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The caller was released by `stop()` or the reader has nothing left to give.
    #[error("reader cancelled")]
    Cancelled,

    #[error("invalid reader state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl ReaderError {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ReaderError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReaderError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the expected shutdown signal, which callers should not log as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReaderError::Cancelled)
    }
}

/// Per-record decode failures produced by a record parser.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("record {record}: required field '{field}' is missing")]
    MissingRequiredField { record: usize, field: String },

    #[error("record {record}: field '{field}' declared as {expected} but encoded as {found}")]
    TypeMismatch {
        record: usize,
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("record {record}: field '{field}' has {len} values, limit is {max}")]
    LengthExceeded {
        record: usize,
        field: String,
        len: usize,
        max: usize,
    },

    #[error("record {record}: field '{field}' has {len} values, shape {shape:?} needs {expected}")]
    ShapeMismatch {
        record: usize,
        field: String,
        shape: Vec<usize>,
        len: usize,
        expected: usize,
    },

    #[error("record {record}: malformed payload: {reason}")]
    Malformed { record: usize, reason: String },
}
