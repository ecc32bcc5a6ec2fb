//! stackgrid-migrate — ordered, idempotent SQL migrations in tenant databases.
//!
//! Each migration is recorded in a ledger table before its body runs, inside
//! a savepoint. A unique violation on the ledger insert means the migration
//! already ran, so its body is skipped. Ledger tables have a primary name and
//! a legacy fallback used when the primary does not exist.
//!
//! # Components
//!
//! - **`migration`**: `Migration`, sorted `MigrationSet`, file name parsing
//! - **`bundle`**: migration sets from tar archives and directories
//! - **`storage`**: `ObjectStorage` downloads (local filesystem backend)
//! - **`session`**: the `TenantSession` ledger/SQL verbs and connectors
//! - **`postgres`**: `TenantSession` over tokio-postgres
//! - **`runner`**: the per-migration record/skip/execute loop
//! - **`memory`**: in-memory tenant database for tests (feature `test-utils`)

pub mod bundle;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod runner;
pub mod session;
pub mod storage;

pub use bundle::{migrations_from_dir, migrations_from_tar};
pub use error::MigrateError;
pub use migration::{
    Migration, MigrationScope, MigrationSet, MigrationTables, TENANT_TABLES, VAPI_TABLES,
};
pub use postgres::PostgresConnector;
pub use runner::{run_migrations, MigrationReport};
pub use session::{RecordOutcome, TenantConnector, TenantSession};
pub use storage::{LocalObjectStorage, ObjectStorage};
