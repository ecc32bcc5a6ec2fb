//! Error types for the stackgrid state store.

use stackgrid_core::{Classify, ErrorKind};
use thiserror::Error;

use crate::types::InstanceState;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("instance {id}: invalid state transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: InstanceState,
        to: InstanceState,
    },
}

impl StateError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl Classify for StateError {
    fn kind(&self) -> ErrorKind {
        match self {
            StateError::NotFound { .. } => ErrorKind::NotFound,
            StateError::InvalidTransition { to, .. } if *to == InstanceState::None => {
                ErrorKind::BadRequest
            }
            StateError::InvalidTransition { .. } => ErrorKind::PreconditionFailed,
            _ => ErrorKind::Runtime,
        }
    }
}
