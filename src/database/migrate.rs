use async_trait::async_trait;
use sqlx::migrate::Migrator;

use crate::database::connection::{ConnectionHandle, PgDatabase};
use crate::database::manager::DatabaseError;

/// Master catalog schema: tenants, users, tokens.
pub static MASTER_MIGRATIONS: Migrator = sqlx::migrate!("./migrations/master");

/// Schema applied to every tenant database. Reversible.
pub static TENANT_MIGRATIONS: Migrator = sqlx::migrate!("./migrations/tenant");

/// Runs a migration set against one connection.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    /// Applies every pending migration. Already-applied ones are skipped.
    async fn migrate(&self, connection: &ConnectionHandle) -> Result<(), DatabaseError>;

    /// Reverts every applied migration.
    async fn undo(&self, connection: &ConnectionHandle) -> Result<(), DatabaseError>;
}

/// [`SchemaMigrator`] over an embedded `sqlx` migration set.
pub struct SqlxMigrator {
    migrations: &'static Migrator,
}

impl SqlxMigrator {
    pub fn new(migrations: &'static Migrator) -> Self {
        Self { migrations }
    }

    pub fn tenant() -> Self {
        Self::new(&TENANT_MIGRATIONS)
    }

    pub fn master() -> Self {
        Self::new(&MASTER_MIGRATIONS)
    }
}

#[async_trait]
impl SchemaMigrator for SqlxMigrator {
    async fn migrate(&self, connection: &ConnectionHandle) -> Result<(), DatabaseError> {
        let pool = PgDatabase::pool_of(connection)?;
        self.migrations
            .run(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("{}: {}", connection.database(), e)))
    }

    async fn undo(&self, connection: &ConnectionHandle) -> Result<(), DatabaseError> {
        let pool = PgDatabase::pool_of(connection)?;
        self.migrations
            .undo(pool, 0)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("{}: {}", connection.database(), e)))
    }
}
