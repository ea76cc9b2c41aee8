//! Errors surfaced by compilation, decoding, subscriptions and contract calls
//!
//! All errors are `Clone`: a single failure is often both returned to the
//! caller and delivered to a subscription callback.

use world_types::CoerceError;

// ─────────────────────────────────────────────────────────────────────────────
// Backend Error
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by the indexer or the account collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("{0}")]
    Other(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Decode Error
// ─────────────────────────────────────────────────────────────────────────────

/// A raw backend row did not match the schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot decode {model}.{field} from `{raw}`: {reason}")]
    Field {
        model: String,
        field: String,
        raw: String,
        reason: CoerceError,
    },

    #[error("missing field {model}.{field}")]
    MissingField { model: String, field: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// SDK Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors returned by the query engine and the contract proxy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SdkError {
    #[error("invalid query shape: {0}")]
    InvalidQueryShape(String),

    #[error("type mismatch on field `{field}`: {reason}")]
    TypeMismatch { field: String, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("argument mismatch for `{function}`: missing {missing:?}, unexpected {unexpected:?}")]
    ArgumentMismatch {
        function: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("unknown system `{tag}.{function}`")]
    UnknownSystem { tag: String, function: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SdkError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        SdkError::InvalidQueryShape(msg.into())
    }

    pub(crate) fn mismatch(field: impl Into<String>, reason: impl ToString) -> Self {
        SdkError::TypeMismatch {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;
