//! stackgrid-vapi — VAPI release dependency resolution.
//!
//! Releases declare direct dependencies by release id. Resolution walks the
//! graph depth-first (dependencies before dependents), rejects cycles, and
//! keeps one release per (package, major version): the highest one.

pub mod error;
pub mod lookup;
pub mod resolver;

pub use error::ResolveError;
pub use lookup::ReleaseLookup;
pub use resolver::{all_dependencies_of, dfs, ResolvedRelease, Traversal};
