//! Error taxonomy.
//!
//! Mirrors the shape of `apfs-core`'s `BlockReadError`: a `thiserror`-derived
//! enum of named failure kinds, each carrying just enough context to explain
//! itself, wrapped by an outer error that records *where* in the structure
//! tree the failure happened.

use thiserror::Error;

/// The taxonomy of failure kinds, independent of the field path / offset
/// that caused them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("ran out of input")]
    StreamExhausted,

    #[error("cannot write value: {0}")]
    WriteError(String),

    #[error("integer value out of representable range")]
    Overflow,

    #[error("check failed: {0}")]
    CheckError(String),

    #[error("length cannot be determined without more context")]
    ImpossibleToCalculateLength,

    #[error("{0}")]
    ParseError(String),
}

/// A taxonomy failure annotated with the logical field path
/// (`outer.inner[3].name`) and the stream offset active when it occurred.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind} (field `{path}`{})", offset.map(|o| format!(", offset {o}")).unwrap_or_default())]
pub struct FieldError {
    pub path: String,
    pub offset: Option<u64>,
    pub kind: ErrorKind,
}

impl FieldError {
    pub fn new(path: impl Into<String>, offset: Option<u64>, kind: ErrorKind) -> Self {
        Self {
            path: path.into(),
            offset,
            kind,
        }
    }
}

/// Top-level error type returned by parse/emit and context lookups.
#[derive(Debug, Error)]
pub enum BinFieldError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("field `{0}` not found in context")]
    FieldNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BinFieldError {
    /// Construct a `StreamExhausted` at the given path/offset.
    pub fn stream_exhausted(path: impl Into<String>, offset: Option<u64>) -> Self {
        FieldError::new(path, offset, ErrorKind::StreamExhausted).into()
    }

    pub fn write_error(path: impl Into<String>, offset: Option<u64>, reason: impl Into<String>) -> Self {
        FieldError::new(path, offset, ErrorKind::WriteError(reason.into())).into()
    }

    pub fn overflow(path: impl Into<String>, offset: Option<u64>) -> Self {
        FieldError::new(path, offset, ErrorKind::Overflow).into()
    }

    pub fn check_error(path: impl Into<String>, offset: Option<u64>, reason: impl Into<String>) -> Self {
        FieldError::new(path, offset, ErrorKind::CheckError(reason.into())).into()
    }

    pub fn impossible_length(path: impl Into<String>) -> Self {
        FieldError::new(path, None, ErrorKind::ImpossibleToCalculateLength).into()
    }

    pub fn parse_error(path: impl Into<String>, offset: Option<u64>, reason: impl Into<String>) -> Self {
        FieldError::new(path, offset, ErrorKind::ParseError(reason.into())).into()
    }

    /// True if this is a `StreamExhausted` at end-of-stream, the one case
    /// the engine is permitted to swallow (unbounded `ArrayField`).
    pub fn is_stream_exhausted(&self) -> bool {
        matches!(
            self,
            BinFieldError::Field(FieldError {
                kind: ErrorKind::StreamExhausted,
                ..
            })
        )
    }
}

pub type Result<T, E = BinFieldError> = std::result::Result<T, E>;

/// Joins a parent path and a child field name, producing the dotted
/// `outer.inner` form used in error messages.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

/// Joins a parent path and an array index, producing the `outer[3]` form.
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}
