//! Compensation scopes.
//!
//! A `Rollback` is an ordered list of undo actions for one logical operation.
//! It ends in exactly one of three ways, each consuming the scope:
//!
//! - [`Rollback::commit`] drops the actions (top level success)
//! - [`Rollback::commit_into`] appends them to an enclosing scope
//! - [`Rollback::abort`] runs them newest first
//!
//! Because every ending consumes `self`, a scope cannot fire twice.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct Step {
    description: String,
    action: Compensation,
}

pub struct Rollback {
    label: String,
    steps: Vec<Step>,
    settled: bool,
}

/// Outcome of running a scope's compensations.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Compensations that ran successfully.
    pub succeeded: usize,
    /// Compensations that failed, with their descriptions.
    pub failed: Vec<(String, anyhow::Error)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Rollback {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            settled: false,
        }
    }

    /// A nested scope. Commit it with [`Rollback::commit_into`] on this scope.
    pub fn child(&self, label: &str) -> Self {
        Self::new(format!("{}/{}", self.label, label))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Register an undo action. Register before performing the side effect.
    pub fn register<F, Fut>(&mut self, description: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let description = description.into();
        debug!(scope = %self.label, step = %description, "registered compensation");
        self.steps.push(Step {
            description,
            action: Box::new(move || Box::pin(action())),
        });
    }

    /// Success at the top level: forget every compensation.
    pub fn commit(mut self) {
        self.settled = true;
        if !self.steps.is_empty() {
            debug!(scope = %self.label, discarded = self.steps.len(), "committed");
        }
        self.steps.clear();
    }

    /// Success of a nested operation: the enclosing scope takes over the
    /// compensations, which run after its own newer ones if it aborts.
    pub fn commit_into(mut self, parent: &mut Rollback) {
        self.settled = true;
        if !self.steps.is_empty() {
            debug!(scope = %self.label, parent = %parent.label, count = self.steps.len(), "handed compensations to parent");
        }
        parent.steps.append(&mut self.steps);
    }

    /// Failure: run every compensation in reverse registration order.
    ///
    /// A failing compensation is logged and the rest still run.
    pub async fn abort(mut self) -> RollbackReport {
        self.settled = true;
        let steps = std::mem::take(&mut self.steps);
        let mut report = RollbackReport::default();
        if steps.is_empty() {
            return report;
        }
        info!(scope = %self.label, count = steps.len(), "rolling back");
        for step in steps.into_iter().rev() {
            match (step.action)().await {
                Ok(()) => {
                    debug!(scope = %self.label, step = %step.description, "compensation done");
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(scope = %self.label, step = %step.description, error = %e, "compensation failed");
                    report.failed.push((step.description, e));
                }
            }
        }
        report
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.settled && !self.steps.is_empty() {
            warn!(
                scope = %self.label,
                pending = self.steps.len(),
                "rollback scope dropped without commit or abort; compensations discarded"
            );
        }
    }
}

impl std::fmt::Debug for Rollback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field("label", &self.label)
            .field("steps", &self.steps.iter().map(|s| &s.description).collect::<Vec<_>>())
            .finish()
    }
}
