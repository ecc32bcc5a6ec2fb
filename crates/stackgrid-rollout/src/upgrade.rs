//! Staged, revertible manifest upgrades.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use stackgrid_core::{Classify, Deadline, ErrorKind, Expiry};
use stackgrid_kube::{
    apply_objects, delete_objects, diff, ClusterClient, ClusterError, ClusterObject,
    DeleteOptions,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::rollback::Rollback;

/// Stage an upgrade is in, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    Diff,
    Create,
    Update,
    HealthGate,
    Delete,
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpgradePhase::Diff => "diff",
            UpgradePhase::Create => "create",
            UpgradePhase::Update => "update",
            UpgradePhase::HealthGate => "health gate",
            UpgradePhase::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Why a health gate refused the new state.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GateFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl GateFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Checked between the update and delete stages.
#[async_trait]
pub trait HealthGate: Send + Sync {
    async fn wait_healthy(&self, deadline: &Deadline) -> Result<(), GateFailure>;
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("upgrade failed during {phase}: {source}")]
    Cluster {
        phase: UpgradePhase,
        #[source]
        source: ClusterError,
    },

    #[error("health gate failed: {0}")]
    Unhealthy(#[source] GateFailure),

    #[error("upgrade interrupted during {phase}: {expiry}")]
    Interrupted { phase: UpgradePhase, expiry: Expiry },
}

impl UpgradeError {
    pub fn phase(&self) -> UpgradePhase {
        match self {
            UpgradeError::Cluster { phase, .. } | UpgradeError::Interrupted { phase, .. } => *phase,
            UpgradeError::Unhealthy(_) => UpgradePhase::HealthGate,
        }
    }
}

impl Classify for UpgradeError {
    fn kind(&self) -> ErrorKind {
        match self {
            UpgradeError::Cluster { source, .. } => source.kind(),
            UpgradeError::Unhealthy(failure) => failure.kind,
            UpgradeError::Interrupted {
                expiry: Expiry::TimedOut,
                ..
            } => ErrorKind::Timeout,
            UpgradeError::Interrupted { .. } => ErrorKind::Runtime,
        }
    }
}

/// Object counts of a finished upgrade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpgradeSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl UpgradeSummary {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Move the cluster from `old` to `new`.
///
/// Objects only in `new` are created, objects in both are re-applied from
/// `new`, then the optional health gate is awaited, then objects only in
/// `old` are deleted with foreground propagation. Each stage registers its
/// undo before acting. On failure the stages already done are reverted before
/// the error returns; on success the compensations move to `parent`.
pub async fn upgrade(
    client: &Arc<dyn ClusterClient>,
    old: &[ClusterObject],
    new: &[ClusterObject],
    gate: Option<&dyn HealthGate>,
    deadline: &Deadline,
    parent: &mut Rollback,
) -> Result<UpgradeSummary, UpgradeError> {
    let plan = diff(old, new).map_err(|source| UpgradeError::Cluster {
        phase: UpgradePhase::Diff,
        source,
    })?;
    if plan.is_empty() {
        return Ok(UpgradeSummary::default());
    }

    let mut scope = parent.child("upgrade");
    match run_stages(client, &plan, gate, deadline, &mut scope).await {
        Ok(summary) => {
            info!(
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                "upgrade applied"
            );
            scope.commit_into(parent);
            Ok(summary)
        }
        Err(e) => {
            warn!(phase = %e.phase(), error = %e, "upgrade failed, reverting");
            let report = scope.abort().await;
            if !report.is_clean() {
                warn!(failed = report.failed.len(), "upgrade revert was incomplete");
            }
            Err(e)
        }
    }
}

/// [`upgrade`] in its own top-level scope: compensations are dropped on success.
pub async fn upgrade_standalone(
    client: &Arc<dyn ClusterClient>,
    old: &[ClusterObject],
    new: &[ClusterObject],
    gate: Option<&dyn HealthGate>,
    deadline: &Deadline,
) -> Result<UpgradeSummary, UpgradeError> {
    let mut scope = Rollback::new("upgrade");
    let result = upgrade(client, old, new, gate, deadline, &mut scope).await;
    scope.commit();
    result
}

async fn run_stages(
    client: &Arc<dyn ClusterClient>,
    plan: &stackgrid_kube::ObjectDiff,
    gate: Option<&dyn HealthGate>,
    deadline: &Deadline,
    scope: &mut Rollback,
) -> Result<UpgradeSummary, UpgradeError> {
    // ── Create ────────────────────────────────────────────────────
    if !plan.create.is_empty() {
        let undo_client = client.clone();
        let created = plan.create.clone();
        scope.register(format!("delete {} created objects", created.len()), move || async move {
            delete_objects(undo_client.as_ref(), &created, DeleteOptions::foreground()).await?;
            Ok(())
        });
        stage(
            UpgradePhase::Create,
            deadline,
            apply_objects(client.as_ref(), &plan.create),
        )
        .await?;
    }

    // ── Update ────────────────────────────────────────────────────
    if !plan.update_new.is_empty() {
        let undo_client = client.clone();
        let previous = plan.update_old.clone();
        scope.register(format!("re-apply {} previous objects", previous.len()), move || async move {
            apply_objects(undo_client.as_ref(), &previous).await?;
            Ok(())
        });
        stage(
            UpgradePhase::Update,
            deadline,
            apply_objects(client.as_ref(), &plan.update_new),
        )
        .await?;
    }

    // ── Health gate ───────────────────────────────────────────────
    if let Some(gate) = gate {
        match deadline.run(gate.wait_healthy(deadline)).await {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => return Err(UpgradeError::Unhealthy(failure)),
            Err(expiry) => {
                return Err(UpgradeError::Interrupted {
                    phase: UpgradePhase::HealthGate,
                    expiry,
                });
            }
        }
    }

    // ── Delete ────────────────────────────────────────────────────
    if !plan.delete.is_empty() {
        let undo_client = client.clone();
        let removed = plan.delete.clone();
        scope.register(format!("re-apply {} deleted objects", removed.len()), move || async move {
            apply_objects(undo_client.as_ref(), &removed).await?;
            Ok(())
        });
        stage(
            UpgradePhase::Delete,
            deadline,
            delete_objects(client.as_ref(), &plan.delete, DeleteOptions::foreground()),
        )
        .await?;
    }

    Ok(UpgradeSummary {
        created: plan.create.len(),
        updated: plan.update_new.len(),
        deleted: plan.delete.len(),
    })
}

async fn stage(
    phase: UpgradePhase,
    deadline: &Deadline,
    work: impl std::future::Future<Output = Result<(), ClusterError>>,
) -> Result<(), UpgradeError> {
    match deadline.run(work).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(UpgradeError::Cluster { phase, source }),
        Err(expiry) => Err(UpgradeError::Interrupted { phase, expiry }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackgrid_kube::memory::{MemoryCluster, Verb};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cm(name: &str, value: &str) -> ClusterObject {
        ClusterObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "stack-acme" },
            "data": { "value": value },
        }))
        .unwrap()
    }

    fn value_of(cluster: &MemoryCluster, name: &str) -> Option<String> {
        cluster
            .object(&cm(name, "").object_ref())
            .and_then(|o| o.field(&["data", "value"]).and_then(|v| v.as_str()).map(String::from))
    }

    struct FixedGate {
        healthy: bool,
        calls: AtomicUsize,
    }

    impl FixedGate {
        fn new(healthy: bool) -> Self {
            Self {
                healthy,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthGate for FixedGate {
        async fn wait_healthy(&self, _deadline: &Deadline) -> Result<(), GateFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(())
            } else {
                Err(GateFailure::new(ErrorKind::Timeout, "pods never became ready"))
            }
        }
    }

    struct StallingGate;

    #[async_trait]
    impl HealthGate for StallingGate {
        async fn wait_healthy(&self, _deadline: &Deadline) -> Result<(), GateFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    /// Cluster holding `kept=v1` and `gone=v1`, as applied from `old()`.
    fn seeded() -> (Arc<MemoryCluster>, Arc<dyn ClusterClient>) {
        let memory = Arc::new(MemoryCluster::new());
        memory.insert(cm("kept", "v1"));
        memory.insert(cm("gone", "v1"));
        let client: Arc<dyn ClusterClient> = memory.clone();
        (memory, client)
    }

    fn old() -> Vec<ClusterObject> {
        vec![cm("kept", "v1"), cm("gone", "v1")]
    }

    fn new() -> Vec<ClusterObject> {
        vec![cm("kept", "v2"), cm("added", "v2")]
    }

    #[tokio::test]
    async fn applies_all_three_buckets() {
        let (memory, client) = seeded();
        let gate = FixedGate::new(true);

        let summary = upgrade_standalone(&client, &old(), &new(), Some(&gate), &Deadline::never())
            .await
            .unwrap();

        assert_eq!(summary, UpgradeSummary { created: 1, updated: 1, deleted: 1 });
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(value_of(&memory, "kept").as_deref(), Some("v2"));
        assert_eq!(value_of(&memory, "added").as_deref(), Some("v2"));
        assert_eq!(value_of(&memory, "gone"), None);
    }

    #[tokio::test]
    async fn empty_diff_performs_no_writes() {
        let memory = Arc::new(MemoryCluster::new());
        let client: Arc<dyn ClusterClient> = memory.clone();
        let gate = FixedGate::new(true);

        let summary = upgrade_standalone(&client, &[], &[], Some(&gate), &Deadline::never())
            .await
            .unwrap();
        assert!(summary.is_noop());
        assert_eq!(memory.write_count(), 0);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unhealthy_gate_restores_previous_state() {
        let (memory, client) = seeded();
        let before: Vec<_> = memory.objects().iter().map(|o| o.key()).collect();
        let gate = FixedGate::new(false);

        let err = upgrade_standalone(&client, &old(), &new(), Some(&gate), &Deadline::never())
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Unhealthy(_)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let after: Vec<_> = memory.objects().iter().map(|o| o.key()).collect();
        assert_eq!(before, after);
        assert_eq!(value_of(&memory, "kept").as_deref(), Some("v1"));
        assert_eq!(value_of(&memory, "gone").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn update_failure_deletes_created_objects() {
        let (memory, client) = seeded();
        memory.fail_on(Verb::Update, "kept");

        let err = upgrade_standalone(&client, &old(), &new(), None, &Deadline::never())
            .await
            .unwrap_err();

        assert_eq!(err.phase(), UpgradePhase::Update);
        assert!(!memory.contains(&cm("added", "").object_ref()));
        assert_eq!(value_of(&memory, "kept").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn delete_failure_reapplies_removed_objects() {
        let memory = Arc::new(MemoryCluster::new());
        for name in ["a", "b", "c"] {
            memory.insert(cm(name, "v1"));
        }
        memory.fail_on(Verb::Delete, "c");
        let client: Arc<dyn ClusterClient> = memory.clone();

        let old = vec![cm("a", "v1"), cm("b", "v1"), cm("c", "v1")];
        let new = vec![cm("a", "v2")];
        let err = upgrade_standalone(&client, &old, &new, None, &Deadline::never())
            .await
            .unwrap_err();

        assert_eq!(err.phase(), UpgradePhase::Delete);
        memory.clear_failures();
        assert_eq!(value_of(&memory, "a").as_deref(), Some("v1"));
        assert_eq!(value_of(&memory, "b").as_deref(), Some("v1"));
        assert_eq!(value_of(&memory, "c").as_deref(), Some("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_gate_still_reverts() {
        let (memory, client) = seeded();
        let deadline = Deadline::after(Duration::from_secs(1));

        let err = upgrade_standalone(&client, &old(), &new(), Some(&StallingGate), &deadline)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpgradeError::Interrupted { phase: UpgradePhase::HealthGate, expiry: Expiry::TimedOut }
        ));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!memory.contains(&cm("added", "").object_ref()));
        assert_eq!(value_of(&memory, "kept").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn success_hands_compensations_to_parent() {
        let (memory, client) = seeded();
        let mut parent = Rollback::new("deploy");

        upgrade(&client, &old(), &new(), None, &Deadline::never(), &mut parent)
            .await
            .unwrap();
        assert_eq!(parent.len(), 3);

        // A later failure in the enclosing operation undoes the upgrade.
        parent.abort().await;
        assert_eq!(value_of(&memory, "kept").as_deref(), Some("v1"));
        assert_eq!(value_of(&memory, "gone").as_deref(), Some("v1"));
        assert!(!memory.contains(&cm("added", "").object_ref()));
    }

    #[tokio::test]
    async fn namespace_mismatch_is_rejected_before_writes() {
        let memory = Arc::new(MemoryCluster::new());
        let client: Arc<dyn ClusterClient> = memory.clone();
        let mut other = cm("x", "v1");
        other.set_namespace("stack-other");

        let err = upgrade_standalone(&client, &[cm("a", "v1")], &[other], None, &Deadline::never())
            .await
            .unwrap_err();
        assert_eq!(err.phase(), UpgradePhase::Diff);
        assert_eq!(memory.write_count(), 0);
    }
}
