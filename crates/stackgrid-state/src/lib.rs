//! stackgrid-state — embedded state store for stackgrid.
//!
//! Backed by [redb](https://docs.rs/redb), persists the tenant records the
//! control plane reads and mutates: instances, stacks, VAPI packages, and VAPI
//! releases.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns and
//! keyed by their id. Mutations go through [`StateStore::transaction`], which
//! hands a [`StateTxn`] to a closure and commits only if the closure succeeds.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, StateTxn};
pub use types::*;
