//! Error types for the tree engine.

use crate::types::PageNo;
use thiserror::Error;

/// Result type alias for tree operations
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors that can occur in the tree engine
#[derive(Error, Debug)]
pub enum TreeError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Order outside the allowed bounds at file-creation time
    #[error("invalid {kind} order {got}: must be between {min} and {max}")]
    InvalidOrder {
        kind: &'static str,
        got: i32,
        min: i32,
        max: i32,
    },

    /// Page number outside the file's reserved range
    #[error("page {0} out of bounds")]
    PageOutOfBounds(PageNo),

    /// Record payload exceeds the fixed value slot
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// On-disk structure is inconsistent
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl TreeError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }
}
