use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{DatabaseConfig, Dialect};
use crate::database::manager::DatabaseError;
use crate::database::models::TenantRecord;

/// A live connection to the master catalog or to exactly one tenant database.
///
/// Handles are owned by the [`ConnectionRegistry`](super::ConnectionRegistry);
/// callers borrow a clone for the length of one request.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Name of the database this handle is connected to.
    fn database(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Runs one statement without bind parameters and returns the affected
    /// row count. Used for DDL.
    async fn execute(&self, statement: &str) -> Result<u64, DatabaseError>;

    async fn close(&self);

    fn as_any(&self) -> &dyn Any;
}

pub type ConnectionHandle = Arc<dyn Connection>;

/// Everything needed to open one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl ConnectionParams {
    /// Parameters for the master catalog, straight from configuration.
    pub fn master(config: &DatabaseConfig) -> Self {
        Self {
            dialect: config.dialect,
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            max_connections: config.max_connections,
            connect_timeout: Duration::from_secs(config.connection_timeout),
        }
    }

    /// Parameters for a tenant database: host, port and dialect are inherited
    /// from the global configuration, credentials come from the catalog row.
    pub fn tenant(config: &DatabaseConfig, record: &TenantRecord) -> Self {
        Self {
            username: record.database_user.clone(),
            password: record.database_password.clone(),
            database: record.database_name.clone(),
            ..Self::master(config)
        }
    }

    /// Connection URL with credentials percent-encoded.
    pub fn url(&self) -> Result<url::Url, DatabaseError> {
        let mut url = url::Url::parse(&format!("{}://localhost", self.dialect.url_scheme()))
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_host(Some(&self.host))
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_port(Some(self.port))
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_username(&self.username)
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_password(Some(&self.password))
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_path(&format!("/{}", self.database));
        Ok(url)
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// Opens connections. The registry never talks to a driver directly.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<ConnectionHandle, DatabaseError>;
}

/// PostgreSQL pool wrapped as a [`Connection`].
pub struct PgDatabase {
    database: String,
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(database: impl Into<String>, pool: PgPool) -> Self {
        Self {
            database: database.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Borrow the pool behind a handle, if the handle is PostgreSQL backed.
    pub fn pool_of(handle: &ConnectionHandle) -> Result<&PgPool, DatabaseError> {
        handle
            .as_any()
            .downcast_ref::<PgDatabase>()
            .map(PgDatabase::pool)
            .ok_or_else(|| DatabaseError::UnsupportedConnection(handle.database().to_string()))
    }
}

#[async_trait]
impl Connection for PgDatabase {
    fn database(&self) -> &str {
        &self.database
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<u64, DatabaseError> {
        // A bare &str goes through the simple query protocol, which is what
        // CREATE DATABASE and friends need.
        let result = (&self.pool).execute(statement).await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool: {}", self.database);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Opens PostgreSQL pools with `sqlx`.
#[derive(Debug, Default, Clone)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<ConnectionHandle, DatabaseError> {
        if params.dialect != Dialect::Postgres {
            return Err(DatabaseError::UnsupportedDialect(params.dialect));
        }

        let options = PgConnectOptions::from_str(params.url()?.as_str())?;
        let pool = PgPoolOptions::new()
            .max_connections(params.max_connections)
            .acquire_timeout(params.connect_timeout)
            .connect_with(options)
            .await?;

        info!("Created database pool for: {}", params.database);
        Ok(Arc::new(PgDatabase::new(params.database.clone(), pool)))
    }
}
