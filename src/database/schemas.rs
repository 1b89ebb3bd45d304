use sqlx::PgPool;
use std::fmt;

use crate::database::connection::{ConnectionHandle, PgDatabase};
use crate::database::manager::DatabaseError;
use crate::database::registry::SchemaSet;

/// Default binding: a table name tied to the connection that owns it.
#[derive(Clone)]
pub struct TableBinding {
    table: String,
    connection: ConnectionHandle,
}

impl TableBinding {
    pub fn new(table: impl Into<String>, connection: ConnectionHandle) -> Self {
        Self {
            table: table.into(),
            connection,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn pool(&self) -> Result<&PgPool, DatabaseError> {
        PgDatabase::pool_of(&self.connection)
    }
}

impl fmt::Debug for TableBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBinding")
            .field("table", &self.table)
            .field("database", &self.connection.database())
            .finish()
    }
}

pub const TENANT_SCHEMA: &str = "Tenant";
pub const USER_SCHEMA: &str = "User";
pub const TOKEN_SCHEMA: &str = "Token";
pub const CAMPAIGN_SCHEMA: &str = "Campaign";

/// Schemas living in the master catalog.
pub fn master_schemas() -> SchemaSet {
    SchemaSet::new()
        .with(TENANT_SCHEMA, |c| TableBinding::new("tenants", c.clone()))
        .with(USER_SCHEMA, |c| TableBinding::new("users", c.clone()))
        .with(TOKEN_SCHEMA, |c| TableBinding::new("tokens", c.clone()))
}

/// Schemas created in every tenant database by the tenant migrations.
pub fn tenant_schemas() -> SchemaSet {
    SchemaSet::new().with(CAMPAIGN_SCHEMA, |c| TableBinding::new("campaigns", c.clone()))
}
