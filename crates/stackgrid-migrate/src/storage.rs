//! Object storage downloads.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::MigrateError;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, MigrateError>;
}

/// Buckets are subdirectories of `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf, MigrateError> {
        let mut full = self.root.clone();
        for part in [bucket, path] {
            let part_path = Path::new(part);
            let normal = part_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
            if part.is_empty() || !normal {
                return Err(MigrateError::InvalidPath(format!("{bucket}/{path}")));
            }
            full.push(part_path);
        }
        Ok(full)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, MigrateError> {
        let file = self.resolve(bucket, path)?;
        let bytes = tokio::fs::read(&file)
            .await
            .map_err(|source| MigrateError::Storage {
                bucket: bucket.to_string(),
                path: path.to_string(),
                source,
            })?;
        debug!(bucket, path, bytes = bytes.len(), "downloaded object");
        Ok(bytes)
    }
}
