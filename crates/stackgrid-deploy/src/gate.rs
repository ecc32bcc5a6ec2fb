//! The health gate between the update and delete stages of a deploy.

use std::sync::Arc;

use async_trait::async_trait;
use stackgrid_core::{Classify, Deadline, ErrorKind, Expiry};
use stackgrid_health::{HealthProber, ProbeTarget, HEALTH_POLL_INTERVAL};
use stackgrid_kube::{wait_for_condition, ClusterClient, ClusterError, Gvk, WaitOutcome};
use stackgrid_rollout::{GateFailure, HealthGate};
use tracing::{debug, info};

pub const POD_READY: &str = "Ready";

fn pods() -> Gvk {
    Gvk::new("", "v1", "Pod")
}

fn expiry_kind(expiry: Expiry) -> ErrorKind {
    match expiry {
        Expiry::TimedOut => ErrorKind::Timeout,
        Expiry::Cancelled => ErrorKind::Runtime,
    }
}

/// Pods of the stack are `Ready`, then (optionally) every HTTP check passes.
pub struct StackHealthGate {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    selector: String,
    checks: Option<(HealthProber, Vec<ProbeTarget>)>,
}

impl StackHealthGate {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: String, selector: String) -> Self {
        Self {
            client,
            namespace,
            selector,
            checks: None,
        }
    }

    /// Also require every target to answer 2xx once pods are ready.
    pub fn with_checks(mut self, prober: HealthProber, targets: Vec<ProbeTarget>) -> Self {
        self.checks = Some((prober, targets));
        self
    }

    /// Pods may not exist yet right after the apply, so an empty match
    /// is retried until the deadline.
    async fn wait_pods_ready(&self, deadline: &Deadline) -> Result<(), GateFailure> {
        loop {
            let outcome = wait_for_condition(
                self.client.as_ref(),
                &pods(),
                &self.namespace,
                &self.selector,
                POD_READY,
                deadline,
            )
            .await;
            match outcome {
                Ok(WaitOutcome::Satisfied) => return Ok(()),
                Ok(WaitOutcome::Interrupted(expiry)) => {
                    return Err(GateFailure::new(
                        expiry_kind(expiry),
                        format!("pods in {} not ready: {expiry}", self.namespace),
                    ));
                }
                Err(ClusterError::NoMatches { .. }) => {
                    debug!(namespace = %self.namespace, selector = %self.selector, "no pods yet");
                    deadline.sleep(HEALTH_POLL_INTERVAL).await.map_err(|expiry| {
                        GateFailure::new(
                            expiry_kind(expiry),
                            format!("no pods appeared in {}: {expiry}", self.namespace),
                        )
                    })?;
                }
                Err(e) => {
                    return Err(GateFailure::new(
                        e.kind(),
                        format!("waiting for pods in {}: {e}", self.namespace),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl HealthGate for StackHealthGate {
    async fn wait_healthy(&self, deadline: &Deadline) -> Result<(), GateFailure> {
        self.wait_pods_ready(deadline).await?;
        info!(namespace = %self.namespace, "stack pods ready");

        if let Some((prober, targets)) = &self.checks {
            prober
                .wait_until_available(targets, HEALTH_POLL_INTERVAL, deadline)
                .await
                .map_err(|e| GateFailure::new(e.kind(), format!("health checks: {e}")))?;
        }
        Ok(())
    }
}
