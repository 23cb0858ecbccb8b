//! Error types for the entity layer.

use apimodel_transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Result type for entity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed validator on one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in entity operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Required wiring is missing (no client bound, relation target not registered).
    #[error("improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// Caching an entity without identity, or replacing an absent entry.
    #[error("cache error: {0}")]
    Cache(String),

    /// A relation was read before it was resolved.
    #[error("attribute error: {0}")]
    Attribute(String),

    /// One or more validators rejected the entity.
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    /// A relation produced an entity of the wrong type.
    #[error("relation {relation} expects {expected}, got {actual}")]
    RelationTypeMismatch {
        relation: String,
        expected: String,
        actual: String,
    },

    /// The operation needs a persisted entity.
    #[error("entity is not persisted: {0}")]
    NotPersisted(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The shared fetch this caller was waiting on failed.
    #[error("in-flight fetch for {key} failed: {message}")]
    InFlightFailed {
        key: String,
        status: Option<u16>,
        message: String,
    },

    /// The shared fetch this caller was waiting on was dropped before settling.
    #[error("in-flight fetch for {key} was abandoned")]
    InFlightAbandoned { key: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl Error {
    /// Returns true for [`Error::Attribute`].
    pub fn is_attribute(&self) -> bool {
        matches!(self, Error::Attribute(_))
    }

    /// Returns the HTTP status behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport(e) => e.status(),
            Error::InFlightFailed { status, .. } => *status,
            _ => None,
        }
    }
}
