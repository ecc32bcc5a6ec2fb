//! Error types for cluster access.

use stackgrid_core::{Classify, ErrorKind, Expiry};
use thiserror::Error;

use crate::object::ObjectRef;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("manifest parse error: {0}")]
    Parse(String),

    #[error("{0} not found")]
    NotFound(ObjectRef),

    #[error("no {kind} in namespace {namespace} matches selector '{selector}'")]
    NoMatches {
        kind: String,
        namespace: String,
        selector: String,
    },

    #[error("{0} already exists")]
    AlreadyExists(ObjectRef),

    #[error("conflicting update to {target}: {message}")]
    Conflict { target: ObjectRef, message: String },

    #[error("{target} is in namespace '{found}', expected '{expected}'")]
    NamespaceMismatch {
        target: ObjectRef,
        expected: String,
        found: String,
    },

    #[error("unsupported zone: {0}")]
    UnsupportedZone(String),

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("cluster connection error: {0}")]
    Connect(String),

    #[error("watch stream closed before the condition was met")]
    WatchClosed,

    #[error("watch error: {0}")]
    Watch(String),

    #[error("{0}")]
    Expired(Expiry),
}

impl From<Expiry> for ClusterError {
    fn from(expiry: Expiry) -> Self {
        ClusterError::Expired(expiry)
    }
}

impl Classify for ClusterError {
    fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::NotFound(_)
            | ClusterError::NoMatches { .. }
            | ClusterError::ZoneNotFound(_) => ErrorKind::NotFound,
            ClusterError::InvalidObject(_)
            | ClusterError::Parse(_)
            | ClusterError::UnsupportedZone(_) => ErrorKind::BadRequest,
            ClusterError::Forbidden(_) => ErrorKind::Forbidden,
            ClusterError::Unauthorized(_) => ErrorKind::Unauthorized,
            ClusterError::WatchClosed | ClusterError::Expired(Expiry::TimedOut) => {
                ErrorKind::Timeout
            }
            _ => ErrorKind::Runtime,
        }
    }
}
