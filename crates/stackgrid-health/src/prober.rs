//! Concurrent probing of a target set.

use std::collections::BTreeMap;
use std::time::Duration;

use stackgrid_core::Deadline;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::checks::ProbeTarget;
use crate::error::ProbeError;
use crate::probe::ProbeClient;

/// Interval between availability rounds while waiting for a stack.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Interval between readiness probes after a schema reload.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct HealthProber {
    client: ProbeClient,
    per_check_timeout: Duration,
}

impl HealthProber {
    pub fn new(client: ProbeClient, per_check_timeout: Duration) -> Self {
        Self {
            client,
            per_check_timeout,
        }
    }

    pub fn per_check_timeout(&self) -> Duration {
        self.per_check_timeout
    }

    /// The same client with a different per-check timeout.
    pub fn with_timeout(&self, per_check_timeout: Duration) -> Self {
        Self {
            client: self.client.clone(),
            per_check_timeout,
        }
    }

    /// Probe every target concurrently and collect `name → available`.
    ///
    /// The first hard error aborts the remaining probes.
    pub async fn probe_all(
        &self,
        targets: &[ProbeTarget],
        deadline: &Deadline,
    ) -> Result<BTreeMap<String, bool>, ProbeError> {
        let mut results = BTreeMap::new();
        if targets.is_empty() {
            return Ok(results);
        }

        let (tx, mut rx) = mpsc::channel(targets.len());
        // Dropping the set aborts any probe still running.
        let mut tasks = JoinSet::new();
        for target in targets {
            let tx = tx.clone();
            let client = self.client.clone();
            let timeout = self.per_check_timeout;
            let target = target.clone();
            tasks.spawn(async move {
                let result = client.probe(&target.url, timeout).await;
                let _ = tx.send((target.name, result)).await;
            });
        }
        drop(tx);

        while results.len() < targets.len() {
            let received = tokio::select! {
                received = rx.recv() => received,
                expiry = deadline.expired() => return Err(ProbeError::Interrupted(expiry)),
            };
            let Some((name, result)) = received else {
                break;
            };
            let available = result?;
            debug!(check = %name, available, "probe result");
            results.insert(name, available);
        }
        Ok(results)
    }

    /// Re-probe every `interval` until all targets are available.
    pub async fn wait_until_available(
        &self,
        targets: &[ProbeTarget],
        interval: Duration,
        deadline: &Deadline,
    ) -> Result<(), ProbeError> {
        loop {
            let results = self.probe_all(targets, deadline).await?;
            let pending: Vec<&str> = results
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(name, _)| name.as_str())
                .collect();
            if pending.is_empty() {
                info!(checks = results.len(), "all health checks passing");
                return Ok(());
            }
            debug!(?pending, "waiting for health checks");
            deadline
                .sleep(interval)
                .await
                .map_err(ProbeError::Interrupted)?;
        }
    }
}
