use std::borrow::Cow;

use thiserror::Error;

/// Top-level error type returned by the mapper.
#[derive(Debug, Error)]
pub enum MapperError {
    /// An association name was requested that the class never declared.
    #[error("no association found for name `{name}` on {class}; has it been defined yet?")]
    UnknownAssociation { class: String, name: String },

    /// A class name could not be resolved against the mapper's catalog.
    #[error("unknown document class `{name}`")]
    UnknownClass { name: String },

    /// A declaration carried an option the declaration does not understand.
    #[error("invalid option `{option}`: {message}")]
    InvalidOption { option: String, message: String },

    /// Nested attributes (or a mass assignment) were given in an unusable shape.
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    /// The association does not support the requested operation.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// A strict save could not persist the document.
    #[error("{class} `{id}` could not be persisted")]
    NotPersisted { class: String, id: String },

    /// A stored document disappeared (reload of a removed document).
    #[error("{class} `{id}` not found")]
    DocumentNotFound { class: String, id: String },

    /// One or more members failed while cascading a destroy.
    #[error("cascade failed for {} member(s): {failures:?}", failures.len())]
    CascadeFailed { failures: Vec<CascadeFailure> },

    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be read or understood.
    #[error("config error: {message}")]
    Config { message: Cow<'static, str> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MapperError {
    pub(crate) fn unknown_association(class: &str, name: &str) -> Self {
        Self::UnknownAssociation {
            class: class.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// A single member that failed during a `dependent: destroy` cascade.
#[derive(Debug, Clone)]
pub struct CascadeFailure {
    pub class: String,
    pub id: String,
    pub message: String,
}

impl CascadeFailure {
    pub fn new(class: impl Into<String>, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
