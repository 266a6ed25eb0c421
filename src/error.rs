//! Crate-wide error types.
//!
//! The engine surfaces a small closed set of error kinds; callers
//! pattern-match on them to decide whether an item ends up `failed`,
//! is rolled back for retry, or the caller simply mis-called.
//!
//! | Kind | Meaning | Retryable |
//! |------|---------|-----------|
//! | `InvalidInput` | caller violated a precondition | no |
//! | `NotFound` | named entity does not exist | no |
//! | `EmptySpace` | query against a space with no ready items | no |
//! | `Extraction` | intrinsic file failure (unsupported/corrupt/empty/too-large) | no |
//! | `BackendUnavailable` | embedder or LLM upstream failed after retries | yes |
//! | `DeadlineExceeded` | per-operation deadline hit at a suspension point | yes |
//! | `Conflict` | concurrent mutation would violate an invariant | no |
//! | `Internal` | invariant violation; logged, never shown to users | no |

use thiserror::Error;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of engine error kinds.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("space has no ready items to answer from")]
    EmptySpace,

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transient failures roll the whole ingestion back so the caller can
    /// retry; intrinsic ones mark the item `failed` instead.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::DeadlineExceeded)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Internal(format!("database error: {}", other)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("io error: {}", e))
    }
}

/// Typed outcome of a failed text extraction.
///
/// Carried inside [`Error::Extraction`] and recorded verbatim as the item's
/// `failure_reason`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("empty: no text content")]
    Empty,

    #[error("too-large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

impl ExtractError {
    /// Short machine-readable kind label, stored as the failure reason prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Unsupported(_) => "unsupported",
            ExtractError::Corrupt(_) => "corrupt",
            ExtractError::Empty => "empty",
            ExtractError::TooLarge { .. } => "too-large",
        }
    }
}
