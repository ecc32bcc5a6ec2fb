//! Block until a labeled resource set reports a status condition.

use std::collections::HashMap;

use futures::StreamExt;
use stackgrid_core::{Deadline, Expiry};
use tracing::{debug, info};

use crate::client::{ClusterClient, WatchEvent};
use crate::error::{ClusterError, ClusterResult};
use crate::object::Gvk;

/// How a wait ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every listed object reported the condition.
    Satisfied,
    /// The deadline fired first. Callers decide whether that is a failure.
    Interrupted(Expiry),
}

impl WaitOutcome {
    pub fn is_satisfied(self) -> bool {
        self == WaitOutcome::Satisfied
    }
}

/// Wait until every object of `gvk` in `namespace` matching `selector`
/// reports `condition` as true.
///
/// The set of objects is fixed by an initial list; an empty list is
/// `NoMatches`. Objects in phase `Pending` are ignored until they move on.
/// Cancellation and timeout are logged and returned as
/// [`WaitOutcome::Interrupted`]; a watch stream that ends early is
/// [`ClusterError::WatchClosed`].
pub async fn wait_for_condition(
    client: &dyn ClusterClient,
    gvk: &Gvk,
    namespace: &str,
    selector: &str,
    condition: &str,
    deadline: &Deadline,
) -> ClusterResult<WaitOutcome> {
    let listed = match deadline.run(client.list(gvk, namespace, selector)).await {
        Ok(listed) => listed?,
        Err(expiry) => return Ok(interrupted(gvk, namespace, selector, expiry)),
    };
    if listed.items.is_empty() {
        return Err(ClusterError::NoMatches {
            kind: gvk.kind.clone(),
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        });
    }
    let mut met: HashMap<String, bool> = listed
        .items
        .iter()
        .map(|o| (o.name().to_string(), false))
        .collect();

    let mut events = match deadline
        .run(client.watch(gvk, namespace, selector, None))
        .await
    {
        Ok(stream) => stream?,
        Err(expiry) => return Ok(interrupted(gvk, namespace, selector, expiry)),
    };

    loop {
        let next = tokio::select! {
            next = events.next() => next,
            expiry = deadline.expired() => {
                return Ok(interrupted(gvk, namespace, selector, expiry));
            }
        };
        let object = match next {
            None => return Err(ClusterError::WatchClosed),
            Some(Err(e)) => return Err(e),
            Some(Ok(WatchEvent::Added(o) | WatchEvent::Modified(o))) => o,
            Some(Ok(WatchEvent::Error(message))) => return Err(ClusterError::Watch(message)),
            Some(Ok(WatchEvent::Deleted(_) | WatchEvent::Bookmark)) => continue,
        };

        if object.phase() == Some("Pending") {
            continue;
        }
        if object.has_condition(condition) {
            if let Some(flag) = met.get_mut(object.name()) {
                if !*flag {
                    debug!(object = %object.object_ref(), %condition, "condition met");
                }
                *flag = true;
            }
        }
        if met.values().all(|m| *m) {
            info!(kind = %gvk.kind, %namespace, %selector, %condition, count = met.len(), "condition met by all objects");
            return Ok(WaitOutcome::Satisfied);
        }
    }
}

fn interrupted(gvk: &Gvk, namespace: &str, selector: &str, expiry: Expiry) -> WaitOutcome {
    info!(kind = %gvk.kind, %namespace, %selector, reason = %expiry, "stopped waiting for condition");
    WaitOutcome::Interrupted(expiry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCluster, Verb};
    use crate::object::ClusterObject;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn pods() -> Gvk {
        Gvk::new("", "v1", "Pod")
    }

    fn pod(name: &str) -> ClusterObject {
        ClusterObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": "ns", "labels": { "stack": "s1" } },
            "status": { "phase": "Running", "conditions": [{ "type": "Ready", "status": "False" }] },
        }))
        .unwrap()
    }

    fn ready() -> Value {
        json!({ "phase": "Running", "conditions": [{ "type": "Ready", "status": "True" }] })
    }

    #[tokio::test]
    async fn empty_selection_is_not_found() {
        let cluster = MemoryCluster::new();
        let err = wait_for_condition(&cluster, &pods(), "ns", "stack=s1", "Ready", &Deadline::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NoMatches { .. }));
    }

    #[tokio::test]
    async fn already_ready_objects_satisfy_immediately() {
        let cluster = MemoryCluster::new();
        let mut p = pod("a");
        p.set_status(ready());
        cluster.insert(p);
        let outcome = wait_for_condition(&cluster, &pods(), "ns", "stack=s1", "ready", &Deadline::never())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_every_seeded_object() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert(pod("a"));
        cluster.insert(pod("b"));

        let driver = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver.set_status(&pod("a").object_ref(), ready()).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver.set_status(&pod("b").object_ref(), ready()).unwrap();
        });

        let outcome = wait_for_condition(
            cluster.as_ref(),
            &pods(),
            "ns",
            "stack=s1",
            "Ready",
            &Deadline::after(Duration::from_secs(5)),
        )
        .await
        .unwrap();
        assert!(outcome.is_satisfied());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_phase_is_ignored() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert(pod("a"));

        let driver = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver
                .set_status(
                    &pod("a").object_ref(),
                    json!({ "phase": "Pending", "conditions": [{ "type": "Ready", "status": "True" }] }),
                )
                .unwrap();
        });

        let outcome = wait_for_condition(
            cluster.as_ref(),
            &pods(),
            "ns",
            "stack=s1",
            "Ready",
            &Deadline::after(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted(Expiry::TimedOut));
    }

    #[tokio::test]
    async fn cancellation_returns_interrupted() {
        let cluster = MemoryCluster::new();
        cluster.insert(pod("a"));
        let deadline = Deadline::never();
        deadline.cancel();
        let outcome = wait_for_condition(&cluster, &pods(), "ns", "stack=s1", "Ready", &deadline)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted(Expiry::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_is_timeout() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert(pod("a"));

        let driver = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver.close_watches();
        });

        let err = wait_for_condition(cluster.as_ref(), &pods(), "ns", "stack=s1", "Ready", &Deadline::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::WatchClosed));
        assert_eq!(
            stackgrid_core::Classify::kind(&err),
            stackgrid_core::ErrorKind::Timeout
        );
    }

    #[tokio::test]
    async fn list_failure_propagates() {
        let cluster = MemoryCluster::new();
        cluster.fail_on(Verb::List, "");
        let err = wait_for_condition(&cluster, &pods(), "ns", "", "Ready", &Deadline::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Api { .. }));
    }
}
