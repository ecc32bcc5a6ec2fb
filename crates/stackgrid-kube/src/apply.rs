//! Apply and delete helpers built on the `ClusterClient` verbs.

use std::time::Duration;

use stackgrid_core::Deadline;
use tracing::{debug, info};

use crate::client::{ClusterClient, DeleteOptions};
use crate::error::{ClusterError, ClusterResult};
use crate::object::ClusterObject;

/// Poll interval while waiting for deleted objects to disappear.
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Create `object`, or update it in place if it already exists.
///
/// On `AlreadyExists` the live `resourceVersion` is fetched and stamped onto
/// the desired object before the update.
pub async fn apply_object(
    client: &dyn ClusterClient,
    object: &ClusterObject,
) -> ClusterResult<ClusterObject> {
    match client.create(object).await {
        Ok(created) => {
            debug!(object = %object.object_ref(), "created");
            Ok(created)
        }
        Err(ClusterError::AlreadyExists(_)) => {
            let current = client.get(&object.object_ref()).await?;
            let mut desired = object.clone();
            if let Some(version) = current.resource_version() {
                desired.set_resource_version(version);
            }
            let updated = client.update(&desired).await?;
            debug!(object = %object.object_ref(), "updated");
            Ok(updated)
        }
        Err(e) => Err(e),
    }
}

/// Apply every object in order, stopping at the first failure.
pub async fn apply_objects(
    client: &dyn ClusterClient,
    objects: &[ClusterObject],
) -> ClusterResult<()> {
    for object in objects {
        apply_object(client, object).await?;
    }
    if !objects.is_empty() {
        info!(count = objects.len(), "applied objects");
    }
    Ok(())
}

/// Delete every object in order. Objects already gone count as deleted.
pub async fn delete_objects(
    client: &dyn ClusterClient,
    objects: &[ClusterObject],
    options: DeleteOptions,
) -> ClusterResult<()> {
    for object in objects {
        match client.delete(&object.object_ref(), options).await {
            Ok(()) => debug!(object = %object.object_ref(), force = options.force, "deleted"),
            Err(ClusterError::NotFound(_)) => {
                debug!(object = %object.object_ref(), "already gone")
            }
            Err(e) => return Err(e),
        }
    }
    if !objects.is_empty() {
        info!(count = objects.len(), "deleted objects");
    }
    Ok(())
}

/// Poll until every object in `objects` is gone or the deadline fires.
pub async fn wait_deleted(
    client: &dyn ClusterClient,
    objects: &[ClusterObject],
    deadline: &Deadline,
) -> ClusterResult<()> {
    for object in objects {
        let target = object.object_ref();
        loop {
            match client.get(&target).await {
                Err(ClusterError::NotFound(_)) => break,
                Err(e) => return Err(e),
                Ok(_) => deadline.sleep(DELETE_POLL_INTERVAL).await?,
            }
        }
    }
    Ok(())
}
