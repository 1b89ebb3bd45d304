use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::database::models::{NewTenant, TenantRecord};
use crate::database::{ConnectionRegistry, DatabaseError, SchemaMigrator, TenantCatalog};
use crate::services::provisioner::{ProvisionError, Provisioner};

const MAX_TENANT_NAME_LEN: usize = 100;

/// Stages of tenant creation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TenantState {
    Requested,
    Provisioning,
    CatalogInsert,
    SchemaMigration,
    Ready,
    Failed,
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant name is required")]
    NameRequired,

    #[error("Invalid tenant name: {0}")]
    InvalidName(String),

    #[error("Tenant already exists: {0}")]
    AlreadyExists(String),

    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provisioning(ProvisionError),

    /// The catalog row exists but the tenant never reached `Ready`.
    #[error("Tenant '{tenant}' is registered but stopped at {stage}: {source}")]
    Incomplete {
        tenant: String,
        stage: TenantState,
        #[source]
        source: DatabaseError,
    },

    #[error("Bulk tenant migrations are disabled in production")]
    ProductionLocked,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<ProvisionError> for TenantError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::InvalidName(name) => TenantError::InvalidName(name),
            other => TenantError::Provisioning(other),
        }
    }
}

/// Outcome of a migration run over many tenants.
#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates tenants and runs their schema migrations.
pub struct TenantService {
    registry: ConnectionRegistry,
    catalog: Arc<dyn TenantCatalog>,
    provisioner: Provisioner,
    migrator: Arc<dyn SchemaMigrator>,
    production: bool,
    in_flight: Mutex<HashSet<String>>,
}

impl TenantService {
    pub fn new(
        registry: ConnectionRegistry,
        provisioner: Provisioner,
        migrator: Arc<dyn SchemaMigrator>,
        production: bool,
    ) -> Self {
        Self {
            catalog: registry.catalog(),
            registry,
            provisioner,
            migrator,
            production,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Requested -> Provisioning -> CatalogInsert -> SchemaMigration -> Ready.
    ///
    /// Duplicates are rejected before any side effect. Nothing is rolled back
    /// on failure: a provisioning error reports the DDL that already ran, and
    /// a failure after the catalog insert returns [`TenantError::Incomplete`]
    /// so an operator can finish with `migrate_one`.
    pub async fn create_tenant(&self, name: &str) -> Result<TenantRecord, TenantError> {
        let name = validate_tenant_name(name)?;
        let database_name = self.provisioner.database_name_for(name)?;
        // Names that differ only in case or punctuation share a database.
        let _claim = self.claim(name, &database_name)?;

        debug!(tenant = %name, state = %TenantState::Requested, "Creating tenant");
        if self.catalog.find_by_name(name).await?.is_some() {
            return Err(TenantError::AlreadyExists(name.to_string()));
        }
        if self.catalog.database_name_taken(&database_name).await? {
            warn!("Tenant '{}' maps to database {} which is already taken", name, database_name);
            return Err(TenantError::AlreadyExists(format!(
                "{} (database {} already in use)",
                name, database_name
            )));
        }

        debug!(tenant = %name, state = %TenantState::Provisioning, "Creating tenant");
        let provisioned = self.provisioner.provision(name).await?;

        debug!(tenant = %name, state = %TenantState::CatalogInsert, "Creating tenant");
        let record = self
            .catalog
            .insert(NewTenant {
                name: name.to_string(),
                database_name: provisioned.database_name,
                database_user: provisioned.database_user,
                database_password: provisioned.database_password,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => TenantError::AlreadyExists(name.to_string()),
                other => {
                    error!(
                        "Tenant '{}' was provisioned but the catalog insert failed; database and user need manual cleanup: {}",
                        name, other
                    );
                    TenantError::Database(other)
                }
            })?;

        debug!(tenant = %name, state = %TenantState::SchemaMigration, "Creating tenant");
        self.migrate_record(&record).await?;

        info!(
            tenant = %record.name,
            database = %record.database_name,
            state = %TenantState::Ready,
            "Tenant created"
        );
        Ok(record)
    }

    pub async fn find(&self, name: &str) -> Result<TenantRecord, TenantError> {
        self.catalog
            .find_by_name(name)
            .await?
            .ok_or_else(|| TenantError::NotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<TenantRecord>, TenantError> {
        Ok(self.catalog.list().await?)
    }

    /// Brings one tenant's schema up to date.
    pub async fn migrate_one(&self, name: &str) -> Result<(), TenantError> {
        let record = self.find(name).await?;
        self.migrate_record(&record).await
    }

    /// Migrates every tenant, continuing past individual failures.
    pub async fn migrate_all(&self) -> Result<MigrationReport, TenantError> {
        if self.production {
            return Err(TenantError::ProductionLocked);
        }
        let tenants = self.catalog.list().await?;
        info!("Found {} tenants to migrate", tenants.len());

        let mut report = MigrationReport::default();
        for tenant in tenants {
            match self.migrate_record(&tenant).await {
                Ok(()) => report.succeeded.push(tenant.name),
                Err(e) => {
                    error!("Error migrating tenant {}: {}", tenant.name, e);
                    report.failed.push((tenant.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Reverts every tenant migration for every tenant.
    pub async fn undo_all(&self) -> Result<MigrationReport, TenantError> {
        if self.production {
            return Err(TenantError::ProductionLocked);
        }
        let tenants = self.catalog.list().await?;

        let mut report = MigrationReport::default();
        for tenant in tenants {
            let reverted = match self.registry.get_or_create(&tenant.name).await {
                Ok(connection) => self.migrator.undo(&connection).await,
                Err(e) => Err(e),
            };
            match reverted {
                Ok(()) => {
                    info!("Reverted migrations for tenant {}", tenant.name);
                    report.succeeded.push(tenant.name);
                }
                Err(e) => {
                    error!("Error reverting migrations for tenant {}: {}", tenant.name, e);
                    report.failed.push((tenant.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn migrate_record(&self, record: &TenantRecord) -> Result<(), TenantError> {
        // Opening through the registry authenticates with the catalog
        // credentials before any migration runs.
        let connection = self
            .registry
            .get_or_create(&record.name)
            .await
            .map_err(|source| incomplete(record, source))?;
        self.migrator
            .migrate(&connection)
            .await
            .map_err(|source| incomplete(record, source))?;
        info!("Migrated tenant database {}", record.database_name);
        Ok(())
    }

    fn claim(&self, name: &str, database_name: &str) -> Result<CreationClaim<'_>, TenantError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(database_name.to_string()) {
            return Err(TenantError::AlreadyExists(format!(
                "{} (creation of database {} in progress)",
                name, database_name
            )));
        }
        Ok(CreationClaim {
            in_flight: &self.in_flight,
            database_name: database_name.to_string(),
        })
    }
}

fn incomplete(record: &TenantRecord, source: DatabaseError) -> TenantError {
    error!(
        tenant = %record.name,
        database = %record.database_name,
        "Tenant is registered but not ready; run the tenant migration again once the cause is fixed: {}",
        source
    );
    TenantError::Incomplete {
        tenant: record.name.clone(),
        stage: TenantState::SchemaMigration,
        source,
    }
}

/// Keeps concurrent creations of the same database from both provisioning.
struct CreationClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    database_name: String,
}

impl Drop for CreationClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.database_name);
    }
}

fn validate_tenant_name(name: &str) -> Result<&str, TenantError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TenantError::NameRequired);
    }
    if name.chars().count() > MAX_TENANT_NAME_LEN {
        return Err(TenantError::InvalidName(format!(
            "Tenant name must be at most {} characters",
            MAX_TENANT_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TenantError::InvalidName("Tenant name cannot contain control characters".to_string()));
    }
    Ok(name)
}
