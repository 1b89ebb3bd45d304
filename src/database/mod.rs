pub mod catalog;
pub mod connection;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod registry;
pub mod schemas;

pub use catalog::{PgTenantCatalog, TenantCatalog};
pub use connection::{Connection, ConnectionHandle, ConnectionParams, Connector, PgConnector, PgDatabase};
pub use manager::{ConnectionRegistry, ConnectionSettings, DatabaseError};
pub use migrate::{SchemaMigrator, SqlxMigrator};
pub use registry::{Binding, ModelError, ModelRegistry, SchemaAccessor, SchemaSet};
pub use schemas::TableBinding;
