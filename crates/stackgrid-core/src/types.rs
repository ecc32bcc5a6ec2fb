//! Shared types used across stackgrid crates.

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Sentinel zone that resolves to the configured default zone.
pub const DEFAULT_ZONE: &str = "default";

/// Sentinel zone for multi-region stacks. Not deployable.
pub const MULTI_ZONE: &str = "multi";

/// Domain classification of an error, independent of the crate it came from.
///
/// Every crate error exposes `kind()` so the request surface can map failures
/// to transport status codes without knowing the concrete error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Forbidden,
    Unauthorized,
    PreconditionRequired,
    PreconditionFailed,
    Timeout,
    Runtime,
}

impl ErrorKind {
    /// Transport status code for this kind. `Runtime` maps to 500.
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::PreconditionRequired => StatusCode::PRECONDITION_REQUIRED,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Runtime => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::PreconditionRequired => "precondition_required",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Implemented by every crate error so callers can classify without matching.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
