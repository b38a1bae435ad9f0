//! Error taxonomy for the analytics engine.
//!
//! Library seams return [`MetricsError`]; the CLI boundary wraps everything in
//! `anyhow` with context, so callers always see which input or store file was
//! involved. Row normalization never raises: it degrades to default field
//! values instead (see `normalize`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// Malformed input: unsupported file extension, oversized file,
    /// invalid period or mapping value.
    #[error("{0}")]
    Validation(String),

    /// A dataset/user combination that does not exist.
    #[error("{0}")]
    NotFound(String),

    /// File content could not be parsed as CSV or Excel.
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// Unexpected failure while reducing records into a metrics tuple.
    /// Aggregation is an idempotent full-replace upsert, so retrying the
    /// same request is always safe.
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    /// Store I/O or serialization failure.
    #[error("store failure on {path}: {message}")]
    Store { path: String, message: String },
}

impl MetricsError {
    pub fn validation(message: impl Into<String>) -> Self {
        MetricsError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        MetricsError::NotFound(message.into())
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        MetricsError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn aggregation(message: impl Into<String>) -> Self {
        MetricsError::Aggregation(message.into())
    }

    pub fn store(path: impl Into<String>, message: impl Into<String>) -> Self {
        MetricsError::Store {
            path: path.into(),
            message: message.into(),
        }
    }
}
