//! Error types shared by every alarmd crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AlarmError>;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected request parameters. Surfaced synchronously to the CRUD caller.
    #[error("{0}")]
    Validation(String),

    /// The schedule cannot be armed (expired, past its stop date, malformed).
    #[error("{0}")]
    Schedule(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict on a document write.
    #[error("Document update conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    /// Upstream HTTP failure. `status` is `None` for transport errors.
    #[error("HTTP error{}: {}", .status.map(|s| format!(" {s}")).unwrap_or_default(), .message)]
    Http { status: Option<u16>, message: String },

    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlarmError {
    /// HTTP status code reported to CRUD callers for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AlarmError::Validation(_) | AlarmError::Schedule(_) => 400,
            AlarmError::NotFound(_) => 404,
            AlarmError::Conflict(_) => 409,
            AlarmError::Http {
                status: Some(s), ..
            } => *s,
            _ => 500,
        }
    }

    /// Upstream status code, when this error came from an HTTP response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AlarmError::Http { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AlarmError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AlarmError::NotFound(_))
    }
}
