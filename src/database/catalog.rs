use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::connection::{ConnectionHandle, PgDatabase};
use crate::database::manager::DatabaseError;
use crate::database::models::{NewTenant, TenantRecord};

/// Tenant records in the master catalog.
#[async_trait]
pub trait TenantCatalog: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<TenantRecord>, DatabaseError>;

    async fn database_name_taken(&self, database_name: &str) -> Result<bool, DatabaseError>;

    /// Inserts a record; a duplicate name or database name is a
    /// [`DatabaseError::Conflict`].
    async fn insert(&self, tenant: NewTenant) -> Result<TenantRecord, DatabaseError>;

    async fn list(&self) -> Result<Vec<TenantRecord>, DatabaseError>;
}

const TENANT_COLUMNS: &str =
    "id, name, database_name, database_user, database_password, created_at, updated_at";

pub struct PgTenantCatalog {
    pool: PgPool,
}

impl PgTenantCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_handle(master: &ConnectionHandle) -> Result<Self, DatabaseError> {
        Ok(Self::new(PgDatabase::pool_of(master)?.clone()))
    }
}

#[async_trait]
impl TenantCatalog for PgTenantCatalog {
    async fn find_by_name(&self, name: &str) -> Result<Option<TenantRecord>, DatabaseError> {
        let query = format!("SELECT {} FROM tenants WHERE name = $1", TENANT_COLUMNS);
        let record = sqlx::query_as::<_, TenantRecord>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn database_name_taken(&self, database_name: &str) -> Result<bool, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tenants WHERE database_name = $1")
            .bind(database_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    async fn insert(&self, tenant: NewTenant) -> Result<TenantRecord, DatabaseError> {
        let query = format!(
            r#"
            INSERT INTO tenants (name, database_name, database_user, database_password)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            TENANT_COLUMNS
        );
        sqlx::query_as::<_, TenantRecord>(&query)
            .bind(&tenant.name)
            .bind(&tenant.database_name)
            .bind(&tenant.database_user)
            .bind(&tenant.database_password)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_insert(e, format!("tenant '{}'", tenant.name)))
    }

    async fn list(&self) -> Result<Vec<TenantRecord>, DatabaseError> {
        let query = format!("SELECT {} FROM tenants ORDER BY created_at ASC, id ASC", TENANT_COLUMNS);
        let records = sqlx::query_as::<_, TenantRecord>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}
