//! In-memory tenant databases for tests.
//!
//! Ledger tables are sets of `(version, package_id)` rows. Transactions and
//! savepoints are snapshots, so a rollback really discards recorded versions
//! and executed statements.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::MigrateError;
use crate::migration::{MigrationScope, TENANT_TABLES, VAPI_TABLES};
use crate::session::{RecordOutcome, TenantConnector, TenantSession};

type Row = (i64, Option<String>);

#[derive(Debug, Clone, Default)]
struct DbState {
    tables: BTreeMap<String, Vec<Row>>,
    executed: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: DbState,
    failing: Vec<String>,
    notifications: usize,
    transactions: usize,
}

#[derive(Clone, Default)]
pub struct MemoryTenantDb {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTenantDb {
    /// A database with both primary ledger tables.
    pub fn new() -> Self {
        Self::with_tables(&[TENANT_TABLES.primary, VAPI_TABLES.primary])
    }

    pub fn with_tables(tables: &[&str]) -> Self {
        let db = Self::default();
        db.lock().committed.tables = tables.iter().map(|t| (t.to_string(), Vec::new())).collect();
        db
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> MemorySession {
        MemorySession {
            db: self.clone(),
            txn: None,
            savepoint: None,
        }
    }

    /// Statements containing `needle` fail when executed.
    pub fn fail_statements_containing(&self, needle: &str) {
        self.lock().failing.push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Committed rows of a ledger table.
    pub fn recorded(&self, table: &str) -> Vec<Row> {
        self.lock()
            .committed
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed statements, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().committed.executed.clone()
    }

    pub fn notifications(&self) -> usize {
        self.lock().notifications
    }

    /// Number of committed transactions.
    pub fn transactions(&self) -> usize {
        self.lock().transactions
    }
}

pub struct MemorySession {
    db: MemoryTenantDb,
    txn: Option<DbState>,
    savepoint: Option<DbState>,
}

impl MemorySession {
    fn txn(&mut self) -> Result<&mut DbState, MigrateError> {
        self.txn
            .as_mut()
            .ok_or_else(|| MigrateError::Database("no transaction in progress".to_string()))
    }
}

#[async_trait]
impl TenantSession for MemorySession {
    async fn begin(&mut self) -> Result<(), MigrateError> {
        self.txn = Some(self.db.lock().committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), MigrateError> {
        let state = self
            .txn
            .take()
            .ok_or_else(|| MigrateError::Database("commit without transaction".to_string()))?;
        let mut shared = self.db.lock();
        shared.committed = state;
        shared.transactions += 1;
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), MigrateError> {
        self.txn = None;
        self.savepoint = None;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), MigrateError> {
        let snapshot = self.txn()?.clone();
        self.savepoint = Some(snapshot);
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), MigrateError> {
        self.savepoint = None;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), MigrateError> {
        let snapshot = self
            .savepoint
            .take()
            .ok_or_else(|| MigrateError::Database("no savepoint".to_string()))?;
        self.txn = Some(snapshot);
        Ok(())
    }

    async fn record(
        &mut self,
        table: &str,
        scope: &MigrationScope,
        version: i64,
    ) -> Result<RecordOutcome, MigrateError> {
        let row: Row = (version, scope.package_id().map(str::to_string));
        let txn = self.txn()?;
        let Some(rows) = txn.tables.get_mut(table) else {
            return Ok(RecordOutcome::MissingTable);
        };
        if rows.contains(&row) {
            return Ok(RecordOutcome::AlreadyApplied);
        }
        rows.push(row);
        Ok(RecordOutcome::Recorded)
    }

    async fn execute(&mut self, sql: &str) -> Result<(), MigrateError> {
        let failing = self.db.lock().failing.iter().any(|f| sql.contains(f.as_str()));
        if failing {
            return Err(MigrateError::Database(format!("statement failed: {sql}")));
        }
        self.txn()?.executed.push(sql.to_string());
        Ok(())
    }

    async fn notify_schema_reload(&mut self) -> Result<(), MigrateError> {
        self.db.lock().notifications += 1;
        Ok(())
    }
}

/// Hands out one `MemoryTenantDb` per connection string.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    databases: Arc<Mutex<HashMap<String, MemoryTenantDb>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database behind `database_url`, created on first use.
    pub fn database(&self, database_url: &str) -> MemoryTenantDb {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(database_url.to_string())
            .or_insert_with(MemoryTenantDb::new)
            .clone()
    }
}

#[async_trait]
impl TenantConnector for MemoryConnector {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn TenantSession>, MigrateError> {
        Ok(Box::new(self.database(database_url).session()))
    }
}
