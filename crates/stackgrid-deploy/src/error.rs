//! Orchestrator error types.

use stackgrid_core::{Classify, ErrorKind, Expiry};
use stackgrid_health::ProbeError;
use stackgrid_kube::ClusterError;
use stackgrid_migrate::MigrateError;
use stackgrid_rollout::UpgradeError;
use stackgrid_state::{InstanceState, StateError};
use stackgrid_vapi::ResolveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("state store: {0}")]
    State(#[from] StateError),

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    #[error("vapi dependencies: {0}")]
    Resolve(#[from] ResolveError),

    #[error("health probe: {0}")]
    Probe(#[from] ProbeError),

    #[error("migrations: {0}")]
    Migrate(#[from] MigrateError),

    #[error("template {template}: {message}")]
    Render { template: String, message: String },

    /// Launch and stop only act on instances in one specific state.
    #[error("cannot {action} instance {id}: it is {actual}, expected {expected}")]
    WrongState {
        id: String,
        action: &'static str,
        actual: InstanceState,
        expected: InstanceState,
    },

    #[error("tenant migrations directory is not configured")]
    MigrationsNotConfigured,

    #[error("deploy interrupted: {0}")]
    Interrupted(Expiry),
}

impl From<Expiry> for DeployError {
    fn from(expiry: Expiry) -> Self {
        DeployError::Interrupted(expiry)
    }
}

impl Classify for DeployError {
    fn kind(&self) -> ErrorKind {
        match self {
            DeployError::State(e) => e.kind(),
            DeployError::Cluster(e) => e.kind(),
            DeployError::Upgrade(e) => e.kind(),
            DeployError::Resolve(e) => e.kind(),
            DeployError::Probe(e) => e.kind(),
            DeployError::Migrate(e) => e.kind(),
            DeployError::Render { .. } => ErrorKind::Runtime,
            DeployError::WrongState { .. } => ErrorKind::Forbidden,
            DeployError::MigrationsNotConfigured => ErrorKind::PreconditionFailed,
            DeployError::Interrupted(Expiry::TimedOut) => ErrorKind::Timeout,
            DeployError::Interrupted(Expiry::Cancelled) => ErrorKind::Runtime,
        }
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
