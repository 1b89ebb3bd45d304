use std::sync::Arc;
use tracing::info;

use crate::config::{AppConfig, ConfigError};
use crate::database::schemas::{master_schemas, tenant_schemas};
use crate::database::{
    ConnectionRegistry, ConnectionSettings, Connector, ModelRegistry, PgConnector, PgTenantCatalog, SchemaMigrator,
    SqlxMigrator,
};
use crate::services::{
    AuthService, PgTokenStore, PgUserDirectory, Provisioner, TenantResolver, TenantService, TokenService, TokenStore,
    UserDirectory,
};

/// The process-wide service graph. Built once at startup and shared by
/// every request; `shutdown` is the only teardown.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: ConnectionRegistry,
    pub models: Arc<ModelRegistry>,
    pub tenants: Arc<TenantService>,
    pub resolver: Arc<TenantResolver>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<dyn UserDirectory>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Connects to the master database, applies master migrations and wires
    /// the PostgreSQL-backed services.
    pub async fn bootstrap(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let connector: Arc<dyn Connector> = Arc::new(PgConnector);
        let settings = ConnectionSettings::new(config.database.clone());
        let master = ConnectionRegistry::open_master(connector.as_ref(), &settings).await?;

        SqlxMigrator::master().migrate(&master).await?;
        info!("Master migrations applied to {}", master.database());

        let catalog = Arc::new(PgTenantCatalog::from_handle(&master)?);
        let token_store: Arc<dyn TokenStore> = Arc::new(PgTokenStore::from_handle(&master)?);
        let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::from_handle(&master)?);
        let registry = ConnectionRegistry::new(settings, master, catalog, connector);

        Ok(Self::assemble(
            config,
            registry,
            Arc::new(SqlxMigrator::tenant()),
            token_store,
            users,
        )?)
    }

    /// Wires the services around an already opened registry.
    pub fn assemble(
        config: AppConfig,
        registry: ConnectionRegistry,
        tenant_migrator: Arc<dyn SchemaMigrator>,
        token_store: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, ConfigError> {
        let master = registry.master();

        let models = Arc::new(ModelRegistry::new());
        models.bind_master_set(&master_schemas(), &master);

        let provisioner = Provisioner::new(config.database.dialect, master, config.tenancy.credentials.clone());
        let tenants = Arc::new(TenantService::new(
            registry.clone(),
            provisioner,
            tenant_migrator,
            config.is_production(),
        ));
        let resolver = Arc::new(TenantResolver::new(registry.clone(), models.clone(), tenant_schemas()));
        let tokens = Arc::new(TokenService::new(&config.tokens, token_store, users.clone())?);
        let auth = Arc::new(AuthService::with_cost(
            users.clone(),
            tokens.clone(),
            config.tokens.password_hash_cost,
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            models,
            tenants,
            resolver,
            tokens,
            users,
            auth,
        })
    }

    /// Closes every tenant connection, then the master.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }
}
