//! StateStore — redb-backed persistence for stackgrid tenant records.
//!
//! Provides typed reads over instances, stacks, and VAPI records, and a
//! closure-based write transaction ([`StateStore::transaction`]) for
//! mutations. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(STACKS).map_err(map_err!(Table))?;
        txn.open_table(VAPI_PACKAGES).map_err(map_err!(Table))?;
        txn.open_table(VAPI_RELEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`; every write made through the
    /// [`StateTxn`] is discarded when it returns `Err`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&StateTxn<'_>) -> StateResult<T>,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let out = f(&StateTxn { txn: &txn });
        match out {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Find a live (not soft-deleted) instance by id.
    pub fn instance(&self, id: &str) -> StateResult<Instance> {
        self.read::<Instance>(INSTANCES, id)?
            .filter(|i| i.deleted_at.is_none())
            .ok_or_else(|| StateError::not_found("instance", id))
    }

    /// List live instances belonging to a stack.
    pub fn list_instances_for_stack(&self, stack_id: &str) -> StateResult<Vec<Instance>> {
        Ok(self
            .scan::<Instance>(INSTANCES)?
            .into_iter()
            .filter(|i| i.stack_id == stack_id && i.deleted_at.is_none())
            .collect())
    }

    /// Validate and persist a state transition in its own transaction.
    pub fn transition_instance(&self, id: &str, target: InstanceState) -> StateResult<Instance> {
        self.transaction(|tx| tx.transition_instance(id, target))
    }

    // ── Stacks ─────────────────────────────────────────────────────

    pub fn stack(&self, id: &str) -> StateResult<Stack> {
        self.read(STACKS, id)?
            .ok_or_else(|| StateError::not_found("stack", id))
    }

    pub fn list_stacks(&self) -> StateResult<Vec<Stack>> {
        self.scan(STACKS)
    }

    // ── VAPI ───────────────────────────────────────────────────────

    pub fn vapi_package(&self, id: &str) -> StateResult<VapiPackage> {
        self.read(VAPI_PACKAGES, id)?
            .ok_or_else(|| StateError::not_found("vapi package", id))
    }

    pub fn vapi_release(&self, id: &str) -> StateResult<VapiRelease> {
        self.read(VAPI_RELEASES, id)?
            .ok_or_else(|| StateError::not_found("vapi release", id))
    }

    pub fn list_vapi_releases(&self) -> StateResult<Vec<VapiRelease>> {
        self.scan(VAPI_RELEASES)
    }
}

/// Handle to an open write transaction. Reads observe the transaction's own writes.
pub struct StateTxn<'a> {
    txn: &'a WriteTransaction,
}

impl StateTxn<'_> {
    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let value = match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
            }
            None => None,
        };
        Ok(value)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, instance: &Instance) -> StateResult<()> {
        self.put(INSTANCES, &instance.id, instance)?;
        debug!(instance = %instance.id, state = %instance.state, "instance stored");
        Ok(())
    }

    pub fn instance(&self, id: &str) -> StateResult<Instance> {
        self.get::<Instance>(INSTANCES, id)?
            .filter(|i| i.deleted_at.is_none())
            .ok_or_else(|| StateError::not_found("instance", id))
    }

    /// Move an instance to `target`, validating the current state first.
    ///
    /// `None` is rejected as a target. Nothing is written on rejection.
    pub fn transition_instance(&self, id: &str, target: InstanceState) -> StateResult<Instance> {
        let mut instance = self.instance(id)?;
        if !instance.state.can_transition_to(target) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from: instance.state,
                to: target,
            });
        }
        debug!(instance = %id, from = %instance.state, to = %target, "instance transition");
        instance.state = target;
        instance.updated_at = epoch_secs();
        self.put_instance(&instance)?;
        Ok(instance)
    }

    /// Record the manifest that is now live on the cluster.
    pub fn set_applied_manifest(&self, id: &str, manifest: &str) -> StateResult<Instance> {
        let mut instance = self.instance(id)?;
        instance.applied_k8s_yaml = manifest.to_string();
        instance.updated_at = epoch_secs();
        self.put_instance(&instance)?;
        Ok(instance)
    }

    /// Mark an instance deleted. It disappears from lookups but stays on disk.
    pub fn soft_delete_instance(&self, id: &str) -> StateResult<()> {
        let mut instance = self.instance(id)?;
        let now = epoch_secs();
        instance.deleted_at = Some(now);
        instance.updated_at = now;
        self.put_instance(&instance)
    }

    // ── Stacks ─────────────────────────────────────────────────────

    pub fn put_stack(&self, stack: &Stack) -> StateResult<()> {
        self.put(STACKS, &stack.id, stack)
    }

    pub fn stack(&self, id: &str) -> StateResult<Stack> {
        self.get(STACKS, id)?
            .ok_or_else(|| StateError::not_found("stack", id))
    }

    // ── VAPI ───────────────────────────────────────────────────────

    pub fn put_vapi_package(&self, package: &VapiPackage) -> StateResult<()> {
        self.put(VAPI_PACKAGES, &package.id, package)
    }

    pub fn put_vapi_release(&self, release: &VapiRelease) -> StateResult<()> {
        self.put(VAPI_RELEASES, &release.id, release)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
