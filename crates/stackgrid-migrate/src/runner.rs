//! The migration loop.

use tracing::{debug, info, warn};

use crate::error::MigrateError;
use crate::migration::{Migration, MigrationScope, MigrationSet};
use crate::session::{RecordOutcome, TenantSession};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<i64>,
    pub skipped: Vec<i64>,
}

/// Apply `set` in version order inside one transaction.
///
/// Per migration, inside a savepoint: record the version in the first ledger
/// table that exists, then run the body. Already-recorded versions are
/// skipped. Any other failure rolls the whole transaction back.
pub async fn run_migrations(
    session: &mut dyn TenantSession,
    scope: &MigrationScope,
    set: &MigrationSet,
) -> Result<MigrationReport, MigrateError> {
    if set.is_empty() {
        return Ok(MigrationReport::default());
    }

    session.begin().await?;
    let mut report = MigrationReport::default();
    for migration in set.iter() {
        match apply_one(session, scope, migration).await {
            Ok(true) => report.applied.push(migration.version),
            Ok(false) => report.skipped.push(migration.version),
            Err(e) => {
                warn!(%scope, version = migration.version, error = %e, "migration failed, rolling back");
                if let Err(abort_err) = session.abort().await {
                    warn!(%scope, error = %abort_err, "rollback of migration transaction failed");
                }
                return Err(e);
            }
        }
    }
    session.commit().await?;

    info!(
        %scope,
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "migrations complete"
    );
    Ok(report)
}

/// `Ok(true)` if the body ran, `Ok(false)` if it was already applied.
async fn apply_one(
    session: &mut dyn TenantSession,
    scope: &MigrationScope,
    migration: &Migration,
) -> Result<bool, MigrateError> {
    let tables = scope.tables();
    for table in tables.in_order() {
        session.savepoint().await?;
        let outcome = match session.record(table, scope, migration.version).await {
            Ok(outcome) => outcome,
            Err(e) => {
                session.rollback_to_savepoint().await?;
                return Err(e);
            }
        };
        match outcome {
            RecordOutcome::Recorded => {
                if let Err(e) = session.execute(&migration.query).await {
                    session.rollback_to_savepoint().await?;
                    return Err(MigrateError::Body {
                        version: migration.version,
                        name: migration.name.clone(),
                        message: e.to_string(),
                    });
                }
                session.release_savepoint().await?;
                debug!(%scope, version = migration.version, name = %migration.name, %table, "applied migration");
                return Ok(true);
            }
            RecordOutcome::AlreadyApplied => {
                session.rollback_to_savepoint().await?;
                debug!(%scope, version = migration.version, %table, "migration already applied");
                return Ok(false);
            }
            RecordOutcome::MissingTable => {
                session.rollback_to_savepoint().await?;
                debug!(%scope, %table, "ledger table missing, trying fallback");
            }
        }
    }
    Err(MigrateError::NoLedgerTable {
        version: migration.version,
        tables: tables.in_order().join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTenantDb;
    use crate::migration::{TENANT_TABLES, VAPI_TABLES};

    fn set(items: &[(i64, &str)]) -> MigrationSet {
        MigrationSet::new(
            items
                .iter()
                .map(|(v, q)| Migration {
                    version: *v,
                    name: format!("m{v}"),
                    query: q.to_string(),
                })
                .collect(),
        )
    }

    fn vapi(pkg: &str) -> MigrationScope {
        MigrationScope::Vapi {
            package_id: pkg.into(),
        }
    }

    #[tokio::test]
    async fn second_run_skips_every_body() {
        let db = MemoryTenantDb::new();
        let migrations = set(&[(2, "create table b"), (1, "create table a")]);

        let first = run_migrations(&mut db.session(), &vapi("p"), &migrations).await.unwrap();
        assert_eq!(first.applied, vec![1, 2]);

        let second = run_migrations(&mut db.session(), &vapi("p"), &migrations).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec![1, 2]);
        assert_eq!(db.executed(), vec!["create table a", "create table b"]);
    }

    #[tokio::test]
    async fn vapi_versions_are_scoped_per_package() {
        let db = MemoryTenantDb::new();
        let migrations = set(&[(1, "install")]);
        run_migrations(&mut db.session(), &vapi("p"), &migrations).await.unwrap();
        let other = run_migrations(&mut db.session(), &vapi("q"), &migrations).await.unwrap();
        assert_eq!(other.applied, vec![1]);
        assert_eq!(db.executed().len(), 2);
    }

    #[tokio::test]
    async fn tenant_versions_are_global() {
        let db = MemoryTenantDb::new();
        let migrations = set(&[(1, "one")]);
        run_migrations(&mut db.session(), &MigrationScope::Tenant, &migrations).await.unwrap();
        let again = run_migrations(&mut db.session(), &MigrationScope::Tenant, &migrations).await.unwrap();
        assert_eq!(again.skipped, vec![1]);
        assert!(db.recorded(TENANT_TABLES.primary).contains(&(1, None)));
    }

    #[tokio::test]
    async fn falls_back_to_legacy_table() {
        let db = MemoryTenantDb::with_tables(&[VAPI_TABLES.legacy]);
        run_migrations(&mut db.session(), &vapi("p"), &set(&[(5, "x")])).await.unwrap();
        assert_eq!(db.recorded(VAPI_TABLES.legacy), vec![(5, Some("p".to_string()))]);
    }

    #[tokio::test]
    async fn missing_ledger_is_an_error() {
        let db = MemoryTenantDb::with_tables(&[]);
        let err = run_migrations(&mut db.session(), &vapi("p"), &set(&[(5, "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::NoLedgerTable { version: 5, .. }));
    }

    #[tokio::test]
    async fn failing_body_rolls_back_everything() {
        let db = MemoryTenantDb::new();
        db.fail_statements_containing("boom");
        let err = run_migrations(
            &mut db.session(),
            &vapi("p"),
            &set(&[(1, "fine"), (2, "boom"), (3, "never")]),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MigrateError::Body { version: 2, .. }));
        // Nothing committed: the ledger is empty and a retry applies 1 again.
        assert!(db.recorded(VAPI_TABLES.primary).is_empty());
        db.clear_failures();
        let retry = run_migrations(&mut db.session(), &vapi("p"), &set(&[(1, "fine")]))
            .await
            .unwrap();
        assert_eq!(retry.applied, vec![1]);
    }

    #[tokio::test]
    async fn empty_set_opens_no_transaction() {
        let db = MemoryTenantDb::new();
        let report = run_migrations(&mut db.session(), &MigrationScope::Tenant, &MigrationSet::default())
            .await
            .unwrap();
        assert_eq!(report, MigrationReport::default());
        assert_eq!(db.transactions(), 0);
    }
}
