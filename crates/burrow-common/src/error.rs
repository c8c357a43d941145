//! Error types for BurrowDB.

use thiserror::Error;

/// Result type alias using BurrowError.
pub type Result<T> = std::result::Result<T, BurrowError>;

/// Errors that can occur in BurrowDB operations.
#[derive(Debug, Error)]
pub enum BurrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Page not found: {file_id}:{page_num}")]
    PageNotFound { file_id: u32, page_num: u32 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("File not open: {0}")]
    FileNotOpen(u32),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Relation not found: {0}")]
    RelationNotFound(String),

    #[error("Tuple too large: {size} bytes (max {max})")]
    TupleTooLarge { size: usize, max: usize },

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    // Index errors
    #[error("Bad index info: {0}")]
    BadIndexInfo(String),

    #[error("Bad scan opcodes")]
    BadOpcodes,

    #[error("Bad scan range: low {low} > high {high}")]
    BadScanrange { low: i32, high: i32 },

    #[error("No key in the given scan range")]
    NoSuchKeyFound,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
