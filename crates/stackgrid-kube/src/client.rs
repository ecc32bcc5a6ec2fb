//! The cluster verbs every backend implements.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ClusterResult;
use crate::object::{ClusterObject, Gvk, ObjectRef};

/// Options for a single delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete immediately (grace period zero) instead of foreground propagation.
    pub force: bool,
}

impl DeleteOptions {
    pub fn foreground() -> Self {
        Self { force: false }
    }

    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Result of a list call.
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<ClusterObject>,
    /// Collection version to resume a watch from, when the backend reports one.
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(ClusterObject),
    Modified(ClusterObject),
    Deleted(ClusterObject),
    Bookmark,
    /// Error reported by the server inside the stream.
    Error(String),
}

pub type WatchStream = BoxStream<'static, ClusterResult<WatchEvent>>;

/// Create/get/update/delete/list/watch over the generic object model.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a new object. Fails with `AlreadyExists` if it is present.
    async fn create(&self, object: &ClusterObject) -> ClusterResult<ClusterObject>;

    async fn get(&self, target: &ObjectRef) -> ClusterResult<ClusterObject>;

    /// Replace an existing object. The object must carry the current
    /// `resourceVersion`.
    async fn update(&self, object: &ClusterObject) -> ClusterResult<ClusterObject>;

    async fn delete(&self, target: &ObjectRef, options: DeleteOptions) -> ClusterResult<()>;

    /// List objects of `gvk` in `namespace` matching an equality label selector.
    async fn list(&self, gvk: &Gvk, namespace: &str, selector: &str) -> ClusterResult<ObjectList>;

    /// Watch objects of `gvk` in `namespace` matching `selector`.
    ///
    /// With `resource_version == None` the stream starts with a synthetic
    /// `Added` event per existing object, then follows live changes.
    async fn watch(
        &self,
        gvk: &Gvk,
        namespace: &str,
        selector: &str,
        resource_version: Option<&str>,
    ) -> ClusterResult<WatchStream>;
}
