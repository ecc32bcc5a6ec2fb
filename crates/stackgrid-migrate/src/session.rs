//! Verbs the migration runner needs from a tenant database.

use async_trait::async_trait;

use crate::error::MigrateError;
use crate::migration::MigrationScope;

/// Result of inserting a version into a ledger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Unique violation: the migration ran before.
    AlreadyApplied,
    /// The ledger table does not exist.
    MissingTable,
}

/// One connection to a tenant database.
///
/// The runner drives an outer transaction (`begin`/`commit`/`abort`) and one
/// savepoint per migration attempt.
#[async_trait]
pub trait TenantSession: Send {
    async fn begin(&mut self) -> Result<(), MigrateError>;
    async fn commit(&mut self) -> Result<(), MigrateError>;
    async fn abort(&mut self) -> Result<(), MigrateError>;

    async fn savepoint(&mut self) -> Result<(), MigrateError>;
    async fn release_savepoint(&mut self) -> Result<(), MigrateError>;
    async fn rollback_to_savepoint(&mut self) -> Result<(), MigrateError>;

    /// Insert `version` (and the package id for VAPI scopes) into `table`.
    async fn record(
        &mut self,
        table: &str,
        scope: &MigrationScope,
        version: i64,
    ) -> Result<RecordOutcome, MigrateError>;

    /// Run a migration body (may contain several statements).
    async fn execute(&mut self, sql: &str) -> Result<(), MigrateError>;

    /// Ask the REST layer to reload its schema cache.
    async fn notify_schema_reload(&mut self) -> Result<(), MigrateError>;
}

/// Opens sessions by connection string.
#[async_trait]
pub trait TenantConnector: Send + Sync {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn TenantSession>, MigrateError>;
}
