use stackgrid_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("object {bucket}/{path}: {source}")]
    Storage {
        bucket: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid object path '{0}'")]
    InvalidPath(String),

    #[error("invalid migration bundle: {0}")]
    Bundle(String),

    #[error("invalid migration file name '{0}' (expected <version>_<name>.sql)")]
    InvalidFileName(String),

    #[error("tenant database: {0}")]
    Database(String),

    #[error("recording migration {version} in {table}: {message}")]
    Record {
        table: String,
        version: i64,
        message: String,
    },

    #[error("migration {version} has no ledger table (tried {tables})")]
    NoLedgerTable { version: i64, tables: String },

    #[error("migration {version}_{name} failed: {message}")]
    Body {
        version: i64,
        name: String,
        message: String,
    },
}

impl Classify for MigrateError {
    fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Storage { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                ErrorKind::NotFound
            }
            MigrateError::InvalidPath(_) | MigrateError::InvalidFileName(_) => {
                ErrorKind::BadRequest
            }
            _ => ErrorKind::Runtime,
        }
    }
}
