//! `TenantSession` over tokio-postgres.

use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::error::MigrateError;
use crate::migration::MigrationScope;
use crate::session::{RecordOutcome, TenantConnector, TenantSession};

const SAVEPOINT: &str = "stackgrid_migration";
const SCHEMA_RELOAD: &str = "NOTIFY pgrst, 'reload schema'";

fn db_error(e: tokio_postgres::Error) -> MigrateError {
    MigrateError::Database(e.to_string())
}

/// Connects to tenant databases with plain TCP.
#[derive(Debug, Clone, Default)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TenantConnector for PostgresConnector {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn TenantSession>, MigrateError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(db_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "tenant database connection closed with error");
            }
        });
        debug!("connected to tenant database");
        Ok(Box::new(PostgresSession { client }))
    }
}

pub struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn simple(&self, sql: &str) -> Result<(), MigrateError> {
        self.client.batch_execute(sql).await.map_err(db_error)
    }
}

#[async_trait]
impl TenantSession for PostgresSession {
    async fn begin(&mut self) -> Result<(), MigrateError> {
        self.simple("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), MigrateError> {
        self.simple("COMMIT").await
    }

    async fn abort(&mut self) -> Result<(), MigrateError> {
        self.simple("ROLLBACK").await
    }

    async fn savepoint(&mut self) -> Result<(), MigrateError> {
        self.simple(&format!("SAVEPOINT {SAVEPOINT}")).await
    }

    async fn release_savepoint(&mut self) -> Result<(), MigrateError> {
        self.simple(&format!("RELEASE SAVEPOINT {SAVEPOINT}")).await
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), MigrateError> {
        self.simple(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")).await
    }

    async fn record(
        &mut self,
        table: &str,
        scope: &MigrationScope,
        version: i64,
    ) -> Result<RecordOutcome, MigrateError> {
        // Table names come from the fixed ledger constants.
        let result = match scope.package_id() {
            None => {
                let sql = format!("INSERT INTO {table} (version) VALUES ($1)");
                self.client.execute(sql.as_str(), &[&version]).await
            }
            Some(package_id) => {
                let sql = format!("INSERT INTO {table} (version, vapi_package_id) VALUES ($1, $2)");
                self.client
                    .execute(sql.as_str(), &[&version, &package_id])
                    .await
            }
        };

        match result {
            Ok(_) => Ok(RecordOutcome::Recorded),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Ok(RecordOutcome::AlreadyApplied),
            Err(e) if e.code() == Some(&SqlState::UNDEFINED_TABLE) => Ok(RecordOutcome::MissingTable),
            Err(e) => Err(MigrateError::Record {
                table: table.to_string(),
                version,
                message: e.to_string(),
            }),
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<(), MigrateError> {
        self.simple(sql).await
    }

    async fn notify_schema_reload(&mut self) -> Result<(), MigrateError> {
        self.simple(SCHEMA_RELOAD).await
    }
}
