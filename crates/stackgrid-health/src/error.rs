use stackgrid_core::{Classify, ErrorKind, Expiry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("probe of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe of {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("probe interrupted: {0}")]
    Interrupted(Expiry),
}

impl Classify for ProbeError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::InvalidUrl { .. } => ErrorKind::BadRequest,
            ProbeError::Interrupted(Expiry::TimedOut) => ErrorKind::Timeout,
            _ => ErrorKind::Runtime,
        }
    }
}
