//! Error types for IUDX Auth.
//!
//! Every failure maps onto one class of the error taxonomy and carries a
//! stable status code. Internal failures keep their detail for the server
//! log; callers only ever see an opaque message for them.

use serde_json::Value;

/// Auth error types covering all operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed input: wrong shape, type, length or charset.
    #[error("{message}")]
    InvalidInput {
        message: String,
        invalid_input: Option<Value>,
    },

    #[error("Invalid certificate : {0}")]
    Certificate(String),

    #[error("Certificate has been revoked")]
    CertificateRevoked,

    #[error("{0}")]
    InsufficientClass(String),

    #[error("{0}")]
    NotAllowed(String),

    /// Authorization failure. Deliberately indistinguishable from an
    /// unknown resource.
    #[error("{message}")]
    Unauthorized {
        message: String,
        invalid_input: Option<Value>,
    },

    #[error("Too many requests")]
    RateLimited,

    #[error("{0}")]
    Conflict(String),

    /// A revocation batch stopped part-way; `num_tokens_revoked` items
    /// before the offending one were applied.
    #[error("{message}")]
    PartialRevocation {
        message: String,
        invalid_input: Value,
        num_tokens_revoked: usize,
    },

    #[error("{0}")]
    NotFound(String),

    /// A grant-management batch item failed validation.
    #[error("item {index}: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<AuthError>,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            invalid_input: None,
        }
    }

    pub fn invalid_with(message: impl Into<String>, input: Value) -> Self {
        Self::InvalidInput {
            message: message.into(),
            invalid_input: Some(input),
        }
    }

    pub fn unauthorized(message: impl Into<String>, input: Option<Value>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            invalid_input: input,
        }
    }

    /// Wrap an error with the index of the batch item that produced it.
    pub fn at_index(self, index: usize) -> Self {
        Self::BatchItem {
            index,
            source: Box::new(self),
        }
    }

    /// HTTP-style status code for this error class.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } | Self::PartialRevocation { .. } => 400,
            Self::NotAllowed(_) => 401,
            Self::Certificate(_)
            | Self::CertificateRevoked
            | Self::InsufficientClass(_)
            | Self::Unauthorized { .. }
            | Self::Conflict(_) => 403,
            Self::NotFound(_) => 404,
            Self::RateLimited => 429,
            Self::BatchItem { source, .. } => source.status(),
            Self::StorageError(_)
            | Self::SerializationError(_)
            | Self::Policy(_)
            | Self::Config(_)
            | Self::Io(_) => 500,
        }
    }

    /// True for failures whose detail must never reach the caller.
    pub fn is_internal(&self) -> bool {
        self.status() >= 500
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::SerializationError(e.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, AuthError>;
