//! Domain types for the stackgrid state store.
//!
//! These types are the tenant records the orchestrator reads and mutates.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

pub type InstanceId = String;
pub type StackId = String;
pub type ProjectId = String;
pub type PackageId = String;
pub type ReleaseId = String;

// ── Instance ──────────────────────────────────────────────────────

/// The deployable unit realizing a stack's desired state in one zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub stack_id: StackId,
    /// Zone identifier; may be the `default` sentinel.
    pub zone: String,
    pub name: String,
    pub num_replicas: u32,
    pub max_replicas: u32,
    pub state: InstanceState,
    /// Last manifest actually applied to the cluster. The "old" side of every diff.
    #[serde(default)]
    pub applied_k8s_yaml: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Set on soft delete. Deleted instances are invisible to lookups.
    #[serde(default)]
    pub deleted_at: Option<u64>,
}

/// Lifecycle state of an instance.
///
/// ```text
/// None → Initialize → Running ⇄ Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Never deployed.
    #[default]
    None,
    /// First deploy started.
    Initialize,
    /// Manifest applied and migrations done.
    Running,
    /// Explicitly stopped.
    Ready,
}

impl InstanceState {
    /// Whether `self → target` is a legal transition. `None` is never a target.
    pub fn can_transition_to(self, target: InstanceState) -> bool {
        use InstanceState::*;
        match target {
            None => false,
            Initialize => self == None,
            // Re-deploying a running instance lands in Running again.
            Running => matches!(self, Initialize | Running | Ready),
            Ready => self == Running,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InstanceState::None => "none",
            InstanceState::Initialize => "initialize",
            InstanceState::Running => "running",
            InstanceState::Ready => "ready",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Stack ─────────────────────────────────────────────────────────

/// A tenant's logical application (auth + storage + REST + VAPIs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stack {
    pub id: StackId,
    pub project_id: ProjectId,
    /// DNS-safe short name; the stack's namespace and hostname derive from it.
    pub slug: String,
    pub default_zone: String,
    pub features: StackFeatures,
    /// VAPI releases explicitly installed on this stack.
    #[serde(default)]
    pub vapi_release_ids: Vec<ReleaseId>,
    /// Connection string of the tenant database.
    pub database_url: String,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Feature flags a tenant can toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StackFeatures {
    pub auth: bool,
    pub storage: bool,
    pub postgrest: bool,
}

impl Stack {
    /// Kubernetes namespace holding every object of this stack.
    pub fn namespace(&self) -> String {
        format!("stack-{}", self.slug)
    }
}

// ── VAPI ──────────────────────────────────────────────────────────

/// An installable API module. Releases belong to exactly one package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VapiPackage {
    pub id: PackageId,
    pub name: String,
}

/// A published version of a VAPI package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VapiRelease {
    pub id: ReleaseId,
    pub package_id: PackageId,
    /// Semantic version string, e.g. "1.4.2".
    pub version: String,
    /// Direct dependencies (release ids).
    #[serde(default)]
    pub dependencies: Vec<ReleaseId>,
    pub published: bool,
    /// Object storage path of the release archive (manifests + migrations).
    pub tar_file_path: String,
}
