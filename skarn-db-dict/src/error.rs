//! Error types for dictionary operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for dictionary operations
pub type Result<T> = std::result::Result<T, DictError>;

/// Errors that can occur while opening or mutating a string dictionary
#[derive(Error, Debug)]
pub enum DictError {
    /// A dictionary file (payload or offsets) could not be opened
    #[error("dictionary path {} is unavailable: {source}", .path.display())]
    PayloadUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dictionary is full: the column reached its maximum encoded count
    #[error("maximum number ({0}) of dictionary-encoded strings reached for this column")]
    TooManyStrings(usize),

    /// Input string exceeds the maximum encodable length
    #[error("string of {len} bytes exceeds the maximum dictionary string length {max}")]
    StringTooLong { len: usize, max: usize },

    /// Open-time options are invalid (capacity must be a non-zero power of two)
    #[error("initial dictionary capacity must be a power of two, got {0}")]
    InvalidCapacity(usize),

    /// `get_compare` was called with an operator it does not understand
    #[error("unsupported string comparison operator: {0}")]
    UnknownCompareOperator(String),

    /// A scan pattern failed to compile
    #[error("invalid scan pattern: {0}")]
    InvalidPattern(String),

    /// A caller-supplied id is negative but not the null sentinel
    #[error("unexpected negative source string id {0}")]
    InvalidStringId(i32),

    /// A remote dictionary call failed
    #[error("remote dictionary error: {0}")]
    Remote(String),

    /// The operation is not available on a remote dictionary
    #[error("{0} is not supported on a remote dictionary")]
    RemoteUnsupported(&'static str),

    /// Storage/IO error on an already-open dictionary
    #[error("dictionary storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl DictError {
    /// Create a remote error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create an invalid-pattern error
    pub fn invalid_pattern(msg: impl Into<String>) -> Self {
        Self::InvalidPattern(msg.into())
    }
}
