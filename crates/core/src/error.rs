//! Error taxonomy and the backend error classifier.
//!
//! Backend failures arrive as free text; `RegistryError::classify` maps them
//! to a closed category set exactly once, as close to the backend call as
//! possible. Wrapping adds operation context without reclassifying.

use serde::{Deserialize, Serialize};

/// Field-level validation failure kinds surfaced inside `BadRequest`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    Duplicate,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn required(path: impl Into<String>) -> Self {
        Self { path: path.into(), kind: FieldErrorKind::Required, message: "required value".into() }
    }

    pub fn duplicate(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), kind: FieldErrorKind::Duplicate, message: message.into() }
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), kind: FieldErrorKind::Invalid, message: message.into() }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Classified registry error. Categories are stable; messages are not.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("bad request: {message}")]
    BadRequest { message: String, fields: Vec<FieldError> },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("method not supported: {0}")]
    MethodNotSupported(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Substrings that mark an otherwise non-retryable failure as transient.
const TRANSIENT_MARKERS: &[&str] =
    &["connection refused", "deadline exceeded", "connection reset", "broken pipe"];

impl RegistryError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into(), fields: Vec::new() }
    }

    /// Aggregate every failing field into a single BadRequest, not just the first.
    pub fn from_field_errors(kind: &str, verb: &str, fields: Vec<FieldError>) -> Self {
        let paths: Vec<&str> = fields.iter().map(|e| e.path.as_str()).collect();
        Self::BadRequest {
            message: format!("{} validation failed on {}: [{}]", kind, verb, paths.join(", ")),
            fields,
        }
    }

    /// Map a free-text backend failure to a category. Matching is on the full
    /// error chain, lowercased; unknown text falls back to `Internal`.
    pub fn classify(err: &anyhow::Error) -> Self {
        let text = format!("{err:#}");
        let lower = text.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["not found", "no such"]) {
            Self::NotFound(text)
        } else if has(&["already exists", "duplicate"]) {
            Self::AlreadyExists(text)
        } else if has(&["resource version", "conflict"]) {
            Self::Conflict(text)
        } else if has(&["unauthorized", "authentication failed"]) {
            Self::Unauthorized(text)
        } else if has(&["forbidden", "permission denied"]) {
            Self::Forbidden(text)
        } else if has(&["too many requests", "rate limit"]) {
            Self::TooManyRequests(text)
        } else if has(&["timed out", "timeout", "deadline exceeded"]) {
            Self::Timeout(text)
        } else if has(&["unavailable", "connection refused"]) {
            Self::Unavailable(text)
        } else if has(&["not supported", "not implemented"]) {
            Self::MethodNotSupported(text)
        } else {
            Self::Internal(text)
        }
    }

    /// Classify and add operation context in one step.
    pub fn from_backend(err: anyhow::Error, operation: &str, resource: &str) -> Self {
        Self::classify(&err).wrap(operation, resource)
    }

    /// Prepend `operation resource:` context while keeping the category.
    /// Idempotent: wrapping with the same context twice adds it once.
    pub fn wrap(self, operation: &str, resource: &str) -> Self {
        let prefix = format!("{operation} {resource}: ");
        let rewrap = |msg: String| {
            if msg.starts_with(&prefix) {
                msg
            } else {
                format!("{prefix}{msg}")
            }
        };
        match self {
            Self::NotFound(m) => Self::NotFound(rewrap(m)),
            Self::AlreadyExists(m) => Self::AlreadyExists(rewrap(m)),
            Self::BadRequest { message, fields } => {
                Self::BadRequest { message: rewrap(message), fields }
            }
            Self::Forbidden(m) => Self::Forbidden(rewrap(m)),
            Self::Unauthorized(m) => Self::Unauthorized(rewrap(m)),
            Self::Conflict(m) => Self::Conflict(rewrap(m)),
            Self::Timeout(m) => Self::Timeout(rewrap(m)),
            Self::Unavailable(m) => Self::Unavailable(rewrap(m)),
            Self::TooManyRequests(m) => Self::TooManyRequests(rewrap(m)),
            Self::MethodNotSupported(m) => Self::MethodNotSupported(rewrap(m)),
            Self::Internal(m) => Self::Internal(rewrap(m)),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) | Self::Conflict(_) => 409,
            Self::BadRequest { .. } => 400,
            Self::Forbidden(_) => 403,
            Self::Unauthorized(_) => 401,
            Self::Timeout(_) => 504,
            Self::Unavailable(_) => 503,
            Self::TooManyRequests(_) => 429,
            Self::MethodNotSupported(_) => 405,
            Self::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry with backoff. Non-retryable categories
    /// still report retryable when the message carries a transient marker.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) | Self::TooManyRequests(_) | Self::Internal(_) => {
                true
            }
            other => {
                let lower = other.to_string().to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
            }
        }
    }
}
