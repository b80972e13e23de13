//! Error types for copse.

use thiserror::Error;

/// Errors surfaced by index persistence.
///
/// Programmer misuse (adding items to a built index, querying an out-of-range
/// item id, vector-length mismatches) is not represented here; those are
/// defensive assertions and panic. Only I/O and file-format problems are
/// recoverable and flow through this type.
#[derive(Debug, Error)]
pub enum CopseError {
    /// I/O error (file operations, mapping)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (file size not a whole number of nodes, corruption)
    #[error("format error: {0}")]
    Format(String),

    /// Operation not allowed in the index's current state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type for fallible index operations.
pub type Result<T> = std::result::Result<T, CopseError>;
