//! stackgrid reconciliation — revertible manifest upgrades.
//!
//! An upgrade moves a cluster from the previously applied object set to a
//! newly rendered one. Every side effect is preceded by a compensating action
//! on a rollback scope, so a failure at any stage leaves the cluster as it was.
//!
//! ```text
//!   old manifest ─┐
//!                 ├─ diff ─► create ─► update ─► health gate ─► delete
//!   new manifest ─┘            │          │                       │
//!                              ▼          ▼                       ▼
//!                        delete created  re-apply old      re-apply deleted
//!                        ◄────────── compensations run in reverse ──────────
//! ```
//!
//! # Components
//!
//! - **`rollback`**: ordered compensation scopes (commit, hand-over, abort)
//! - **`upgrade`**: the staged diff/apply engine and its health gate hook

pub mod rollback;
pub mod upgrade;

pub use rollback::{Rollback, RollbackReport};
pub use upgrade::{
    upgrade, upgrade_standalone, GateFailure, HealthGate, UpgradeError, UpgradePhase,
    UpgradeSummary,
};
