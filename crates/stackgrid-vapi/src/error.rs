use stackgrid_core::{Classify, ErrorKind};
use stackgrid_state::{ReleaseId, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<ReleaseId> },

    #[error("release {id} has invalid version '{version}': {reason}")]
    InvalidVersion {
        id: ReleaseId,
        version: String,
        reason: String,
    },

    #[error("visiting release {id} failed: {message}")]
    Visit { id: ReleaseId, message: String },
}

impl Classify for ResolveError {
    fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::State(e) => e.kind(),
            _ => ErrorKind::Runtime,
        }
    }
}
