//! Error types for Kiln.

use thiserror::Error;

/// Result type alias using KilnError.
pub type Result<T> = std::result::Result<T, KilnError>;

/// Errors that can occur in Kiln operations.
#[derive(Debug, Error)]
pub enum KilnError {
    // Page layout errors
    #[error(
        "Page format mismatch: expected type {expected_type} v{expected_version}, \
         got type {actual_type} v{actual_version}"
    )]
    FormatMismatch {
        expected_type: u16,
        expected_version: u16,
        actual_type: u16,
        actual_version: u16,
    },

    #[error("Capacity invariant violated: count {requested} exceeds max {max}")]
    CapacityInvariant { requested: usize, max: usize },

    #[error("Item index out of bounds: {index} (count {count})")]
    IndexOutOfBounds { index: usize, count: usize },

    #[error("Item copy onto itself at index {index}")]
    AliasingViolation { index: usize },

    // Page store errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Page {page_id} is still pinned ({pins} pins)")]
    PagePinned { page_id: u64, pins: u32 },

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    // B+ tree errors
    #[error("Key not found")]
    KeyNotFound,

    #[error("Invalid key size: {size} bytes (expected {expected})")]
    InvalidKeySize { size: usize, expected: usize },

    #[error("Invalid value size: {size} bytes (expected {expected})")]
    InvalidValueSize { size: usize, expected: usize },

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KilnError {
    /// Returns true if this error means a page no longer satisfies its layout
    /// invariants. These are internal-consistency failures pointing at possible
    /// on-disk corruption or a bug in a structural operation, and are never
    /// retried.
    pub fn is_layout_violation(&self) -> bool {
        matches!(
            self,
            KilnError::FormatMismatch { .. }
                | KilnError::CapacityInvariant { .. }
                | KilnError::IndexOutOfBounds { .. }
                | KilnError::AliasingViolation { .. }
                | KilnError::TreeCorrupted(_)
        )
    }
}
