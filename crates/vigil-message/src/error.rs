//! Error types for message decoding and field access.

use crate::message::ValueKind;

/// A raw record could not be turned into a [`Message`](crate::Message).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not well-formed JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON, but not an object at the top level.
    #[error("message is not a JSON object")]
    NotAnObject,
}

/// Reading a field out of a message failed.
///
/// Accessors never fall back to a default value: an absent field is
/// [`Missing`](Self::Missing), a present one of the wrong kind is
/// [`WrongType`](Self::WrongType).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The path is absent or holds JSON `null`.
    #[error("missing field `{path}`")]
    Missing {
        /// Dotted path that was looked up.
        path: String,
    },

    /// The path is present but does not hold a value of the expected kind.
    #[error("field `{path}` is not a valid {expected}")]
    WrongType {
        /// Dotted path that was looked up.
        path: String,
        /// The kind the caller asked for.
        expected: ValueKind,
    },

    /// The path was not declared by the rules that accepted the packet.
    #[error("field `{path}` was not declared by the river's rules")]
    Undeclared {
        /// Dotted path that was looked up.
        path: String,
    },
}

impl FieldError {
    pub(crate) fn missing(path: &str) -> Self {
        Self::Missing {
            path: path.to_owned(),
        }
    }

    pub(crate) fn wrong_type(path: &str, expected: ValueKind) -> Self {
        Self::WrongType {
            path: path.to_owned(),
            expected,
        }
    }
}
