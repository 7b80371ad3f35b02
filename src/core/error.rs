//! Core capability errors (parsing, validation).

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Identifier validation failures. Inputs are echoed back for diagnostics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidId {
    #[error("server id {raw:?}: {reason}")]
    Server { raw: String, reason: String },
    #[error("document id {raw:?}: {reason}")]
    Document { raw: String, reason: String },
    #[error("node tag {raw:?}: {reason}")]
    NodeTag { raw: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error("invalid id: {0}")]
    InvalidId(#[from] InvalidId),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        match self {
            CoreError::InvalidId(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            CoreError::InvalidId(_) => Effect::None,
        }
    }
}
