//! Error types for the paper concept analyzer.
//!
//! Library crates use [`PaperConceptsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all analyzer operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperConceptsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The database was locked by another writer. Retryable once.
    #[error("storage busy: {0}")]
    StorageBusy(String),

    /// Data validation error (bad input, invalid state transition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No text could be obtained from a source document, OCR included.
    #[error("text extraction unavailable for {path:?}: {reason}")]
    ExtractionUnavailable { path: PathBuf, reason: String },

    /// Transient provider failure (timeout, 5xx, provider-side rate limit).
    #[error("provider unavailable after {attempts} attempt(s): {cause}")]
    ProviderUnavailable { attempts: u32, cause: String },

    /// Permanent provider failure (bad credentials, malformed request).
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    /// The model's output did not have the documented structured shape.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperConceptsError>;

impl PaperConceptsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Text extraction failed for the document at `path`.
    pub fn extraction_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ExtractionUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// A single transient provider failure (one attempt).
    pub fn provider_unavailable(cause: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            attempts: 1,
            cause: cause.into(),
        }
    }

    /// Whether the error is a transient provider failure worth retrying.
    pub fn is_transient_provider(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }

    /// Whether the error is transient lock contention in the store.
    pub fn is_storage_busy(&self) -> bool {
        matches!(self, Self::StorageBusy(_))
    }

    /// Whether the error is systemic and must abort a whole run rather than
    /// a single paper.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::ProviderRejected(_))
    }
}
