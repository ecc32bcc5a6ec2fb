//! stackgrid-deploy — the deployment orchestrator.
//!
//! Composes the cluster, rollout, health, VAPI and migration crates into the
//! operations the request surface calls: deploy, launch, stop, restart,
//! availability and tenant database migration.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::deploy_stack(instance)
//!   ├── StateStore            instance + stack, None → Initialize
//!   ├── all_dependencies_of   installed VAPIs and their dependencies
//!   ├── ManifestRenderer      base + feature + per-VAPI templates
//!   ├── apply namespace       idempotent upsert
//!   ├── upgrade(old, new)     gated by StackHealthGate (pods Ready, probes)
//!   ├── StateStore            persist applied manifest
//!   ├── run_migrations        per VAPI package, from its release archive
//!   ├── NOTIFY + postgrest-ready
//!   └── StateStore            → Running
//! ```
//!
//! All cluster changes of one call share a `Rollback`; a failure anywhere
//! reverts them.

pub mod error;
pub mod gate;
pub mod manifest;
pub mod orchestrator;
pub mod render;

pub use error::{DeployError, DeployResult};
pub use gate::StackHealthGate;
pub use manifest::{namespace_object, render_stack_manifest, stack_selector, PROJECT_LABEL, STACK_LABEL};
pub use orchestrator::{DeploySettings, Orchestrator, RESTART_PAUSE};
pub use render::{ManifestRenderer, TemplateSet};
