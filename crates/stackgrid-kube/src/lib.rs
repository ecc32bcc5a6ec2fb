//! stackgrid-kube — cluster access for the stackgrid control plane.
//!
//! Everything here works on one generic object model so the reconciliation
//! engine never needs typed Kubernetes structs.
//!
//! # Components
//!
//! - **`object`**: schema-free `ClusterObject` documents and manifest parsing
//! - **`diff`**: classify two object sets into added / changed / deleted
//! - **`client`**: the `ClusterClient` verbs (create/get/update/delete/list/watch)
//! - **`apply`**: create-or-update, bulk delete, delete-and-wait helpers
//! - **`kube_client`**: `ClusterClient` over a real API server (kube-rs)
//! - **`pool`**: one client per zone, resolved by zone identifier
//! - **`wait`**: block until a labeled resource set reports a condition
//! - **`memory`**: in-memory cluster for tests (feature `test-utils`)

pub mod apply;
pub mod client;
pub mod diff;
pub mod error;
pub mod kube_client;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod object;
pub mod pool;
pub mod wait;

pub use apply::{apply_object, apply_objects, delete_objects, wait_deleted};
pub use client::{ClusterClient, DeleteOptions, ObjectList, WatchEvent, WatchStream};
pub use diff::{diff, ObjectDiff};
pub use error::{ClusterError, ClusterResult};
pub use kube_client::KubeCluster;
pub use object::{parse_manifest, render_manifest, ClusterObject, Condition, Gvk, LabelSelector, ObjectKey, ObjectRef};
pub use pool::RegionClientPool;
pub use wait::{wait_for_condition, WaitOutcome};
