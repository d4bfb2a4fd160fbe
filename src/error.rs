//! Error types for chanwarden.

use thiserror::Error;

use crate::ip_range::IpRangeError;

/// Broad classification of an error, used by the request handler to decide
/// what the poster or staff member gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or configuration; shown to staff as a rejected change.
    Validation,
    /// A referenced ban, appeal or filter does not exist.
    NotFound,
    /// The store could not answer. Admission must fail closed.
    Persistence,
    /// Anything else. Served as a generic error page.
    Internal,
}

/// Common error type for chanwarden.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// A store query did not finish within its deadline.
    #[error("query timed out after {0} ms")]
    Timeout(u64),

    /// The request was cancelled while a query was in flight.
    #[error("query cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for staff or poster input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed IP address or CIDR range.
    #[error(transparent)]
    IpRange(#[from] IpRangeError),

    /// Invalid regular expression in a ban or filter.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A filter condition references a field that does not exist.
    #[error("unrecognized filter condition field: {0:?}")]
    InvalidConditionField(String),

    /// A filter condition uses an unknown string match mode.
    #[error("unrecognized string match mode: {0:?}")]
    InvalidStringMatchMode(String),

    /// A filter has an unknown match action.
    #[error("unrecognized filter match action: {0:?}")]
    InvalidMatchAction(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Image decoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Task(String),
}

impl WardenError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WardenError::Validation(_)
            | WardenError::IpRange(_)
            | WardenError::Pattern(_)
            | WardenError::InvalidConditionField(_)
            | WardenError::InvalidStringMatchMode(_)
            | WardenError::InvalidMatchAction(_) => ErrorKind::Validation,
            WardenError::NotFound(_) => ErrorKind::NotFound,
            WardenError::Database(_) | WardenError::Timeout(_) | WardenError::Cancelled => {
                ErrorKind::Persistence
            }
            WardenError::Io(_)
            | WardenError::Image(_)
            | WardenError::Config(_)
            | WardenError::Task(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for WardenError {
    fn from(e: sqlx::Error) -> Self {
        WardenError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Database(format!("post data encoding: {e}"))
    }
}

/// Result type alias for chanwarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
