use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, Dialect};
use crate::database::catalog::TenantCatalog;
use crate::database::connection::{ConnectionHandle, ConnectionParams, Connector};

/// Errors from the connection layer and the stores built on it.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid tenant database name: {0}")]
    InvalidTenantName(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant database for '{tenant}' is unreachable: {reason}")]
    Unreachable { tenant: String, reason: String },

    #[error("Master database is unreachable: {0}")]
    MasterUnreachable(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Dialect {0} has no live driver")]
    UnsupportedDialect(Dialect),

    #[error("Connection to '{0}' is not backed by a supported driver")]
    UnsupportedConnection(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Whether the same call may succeed if the caller tries again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            DatabaseError::Unreachable { .. } | DatabaseError::MasterUnreachable(_) => true,
            DatabaseError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Maps a unique-constraint violation to [`DatabaseError::Conflict`].
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => DatabaseError::Conflict(what.into()),
            _ => DatabaseError::Sqlx(err),
        }
    }
}

/// Host-level settings shared by every tenant connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    database: DatabaseConfig,
}

impl ConnectionSettings {
    pub fn new(database: DatabaseConfig) -> Self {
        Self { database }
    }

    pub fn master_params(&self) -> ConnectionParams {
        ConnectionParams::master(&self.database)
    }
}

type Slot = Arc<OnceCell<ConnectionHandle>>;

/// Owns the master connection and one lazily created connection per tenant.
///
/// Creation is single-flight per tenant: concurrent first calls for the same
/// tenant share one in-flight open and observe the same handle. Different
/// tenants never wait on each other. Failed opens leave nothing behind, so a
/// later call retries from scratch.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    settings: ConnectionSettings,
    master: ConnectionHandle,
    catalog: Arc<dyn TenantCatalog>,
    connector: Arc<dyn Connector>,
    slots: RwLock<HashMap<String, Slot>>,
}

impl ConnectionRegistry {
    /// Opens and probes the master connection. Failure here means the process
    /// cannot serve anything.
    pub async fn open_master(
        connector: &dyn Connector,
        settings: &ConnectionSettings,
    ) -> Result<ConnectionHandle, DatabaseError> {
        let params = settings.master_params();
        let master = connector
            .connect(&params)
            .await
            .map_err(|e| DatabaseError::MasterUnreachable(e.to_string()))?;
        if let Err(e) = master.ping().await {
            master.close().await;
            return Err(DatabaseError::MasterUnreachable(e.to_string()));
        }
        info!("Master database connected: {}", params.database);
        Ok(master)
    }

    pub fn new(
        settings: ConnectionSettings,
        master: ConnectionHandle,
        catalog: Arc<dyn TenantCatalog>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                settings,
                master,
                catalog,
                connector,
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide master connection.
    pub fn master(&self) -> ConnectionHandle {
        Arc::clone(&self.inner.master)
    }

    pub fn catalog(&self) -> Arc<dyn TenantCatalog> {
        Arc::clone(&self.inner.catalog)
    }

    /// Cached connection for `tenant`, opening it on first use.
    pub async fn get_or_create(&self, tenant: &str) -> Result<ConnectionHandle, DatabaseError> {
        let slot = self.slot(tenant).await;
        if let Some(handle) = slot.get() {
            debug!("Connection cache hit for tenant: {}", tenant);
            return Ok(Arc::clone(handle));
        }

        // The open runs on its own task so a caller that goes away mid-flight
        // cannot abandon a half-initialized slot: the task either fills the
        // slot or leaves it empty.
        let inner = Arc::clone(&self.inner);
        let key = tenant.to_string();
        let task_slot = Arc::clone(&slot);
        let opened = tokio::spawn(async move {
            task_slot
                .get_or_try_init(|| inner.open_tenant(&key))
                .await
                .map(Arc::clone)
        })
        .await
        .map_err(|e| DatabaseError::Internal(format!("connection task failed: {}", e)))?;

        if opened.is_err() {
            self.discard_empty_slot(tenant, slot).await;
        }
        opened
    }

    /// Names of tenants with a live cached connection.
    pub async fn cached_tenants(&self) -> Vec<String> {
        let slots = self.inner.slots.read().await;
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Pings the master connection.
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        self.inner.master.ping().await
    }

    /// Closes every tenant connection, then the master. Shutdown only: not
    /// safe to run alongside in-flight `get_or_create` calls.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Slot)> = {
            let mut slots = self.inner.slots.write().await;
            slots.drain().collect()
        };
        for (_, slot) in drained {
            if let Some(handle) = slot.get() {
                handle.close().await;
            }
        }
        self.inner.master.close().await;
        info!("All database connections closed");
    }

    async fn slot(&self, tenant: &str) -> Slot {
        {
            let slots = self.inner.slots.read().await;
            if let Some(slot) = slots.get(tenant) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.inner.slots.write().await;
        Arc::clone(slots.entry(tenant.to_string()).or_default())
    }

    /// Drops a slot whose open failed so unknown identifiers do not pile up.
    /// Slots are only cloned under the map lock, so with the write lock held a
    /// count of two (map + ours) means nobody else is waiting on it.
    async fn discard_empty_slot(&self, tenant: &str, slot: Slot) {
        let mut slots = self.inner.slots.write().await;
        let removable = match slots.get(tenant) {
            Some(current) => {
                Arc::ptr_eq(current, &slot) && !slot.initialized() && Arc::strong_count(&slot) == 2
            }
            None => false,
        };
        if removable {
            slots.remove(tenant);
        }
    }
}

impl RegistryInner {
    async fn open_tenant(&self, tenant: &str) -> Result<ConnectionHandle, DatabaseError> {
        let record = self
            .catalog
            .find_by_name(tenant)
            .await?
            .ok_or_else(|| DatabaseError::TenantNotFound(tenant.to_string()))?;

        if !is_valid_db_name(&record.database_name) {
            return Err(DatabaseError::InvalidTenantName(record.database_name));
        }

        let params = ConnectionParams::tenant(&self.settings.database, &record);
        let handle = self.connector.connect(&params).await.map_err(|e| {
            warn!("Failed to connect to tenant database '{}': {}", record.database_name, e);
            DatabaseError::Unreachable {
                tenant: tenant.to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Err(e) = handle.ping().await {
            warn!("Liveness probe failed for tenant database '{}': {}", record.database_name, e);
            handle.close().await;
            return Err(DatabaseError::Unreachable {
                tenant: tenant.to_string(),
                reason: e.to_string(),
            });
        }

        info!("Tenant database {} connected for tenant '{}'", record.database_name, tenant);
        Ok(handle)
    }
}

/// Tenant database names are generated as `tenant_<fragment>_db`; anything
/// else coming out of the catalog is refused before it reaches a driver.
pub fn is_valid_db_name(name: &str) -> bool {
    name.starts_with("tenant_")
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
