use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Row of the master `tenants` table. Created once, never renamed.
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct TenantRecord {
    pub id: i64,
    pub name: String,
    pub database_name: String,
    pub database_user: String,
    #[serde(skip_serializing)]
    pub database_password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for TenantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("database_name", &self.database_name)
            .field("database_user", &self.database_user)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Catalog insert payload: the tenant name plus freshly provisioned credentials.
#[derive(Clone)]
pub struct NewTenant {
    pub name: String,
    pub database_name: String,
    pub database_user: String,
    pub database_password: String,
}
