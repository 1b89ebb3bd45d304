use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::{ConnectionHandle, ConnectionRegistry, DatabaseError, ModelRegistry, SchemaAccessor, SchemaSet};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Tenant identifier is required")]
    TenantIdRequired,

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant '{tenant}' is unavailable: {reason}")]
    TenantUnreachable { tenant: String, reason: String },

    #[error(transparent)]
    Internal(DatabaseError),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::TenantUnreachable { .. } => true,
            ResolveError::Internal(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<DatabaseError> for ResolveError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::TenantNotFound(tenant) => ResolveError::TenantNotFound(tenant),
            DatabaseError::Unreachable { tenant, reason } => ResolveError::TenantUnreachable { tenant, reason },
            other => ResolveError::Internal(other),
        }
    }
}

/// A tenant bound for the rest of one request.
#[derive(Clone)]
pub struct ResolvedTenant {
    pub tenant: String,
    pub connection: ConnectionHandle,
    pub schemas: SchemaAccessor,
}

impl fmt::Debug for ResolvedTenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTenant")
            .field("tenant", &self.tenant)
            .field("database", &self.connection.database())
            .finish()
    }
}

/// Request extension set by the tenant middleware.
#[derive(Debug, Clone, Default)]
pub enum TenantContext {
    #[default]
    Unresolved,
    Resolved(ResolvedTenant),
}

impl TenantContext {
    pub fn resolved(&self) -> Option<&ResolvedTenant> {
        match self {
            TenantContext::Resolved(tenant) => Some(tenant),
            TenantContext::Unresolved => None,
        }
    }
}

/// Turns a tenant identifier into a live connection plus bound schemas.
pub struct TenantResolver {
    registry: ConnectionRegistry,
    models: Arc<ModelRegistry>,
    schemas: SchemaSet,
}

impl TenantResolver {
    pub fn new(registry: ConnectionRegistry, models: Arc<ModelRegistry>, schemas: SchemaSet) -> Self {
        Self {
            registry,
            models,
            schemas,
        }
    }

    pub async fn resolve(&self, tenant: Option<&str>) -> Result<ResolvedTenant, ResolveError> {
        let tenant = tenant
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ResolveError::TenantIdRequired)?;

        let connection = self.registry.get_or_create(tenant).await.map_err(|e| {
            let err = ResolveError::from(e);
            warn!("Tenant resolution failed for '{}': {}", tenant, err);
            err
        })?;

        let bound = self.models.ensure_tenant_set(&self.schemas, tenant, &connection);
        if bound > 0 {
            debug!("Bound {} schemas for tenant '{}'", bound, tenant);
        }

        Ok(ResolvedTenant {
            tenant: tenant.to_string(),
            connection,
            schemas: SchemaAccessor::new(tenant, Arc::clone(&self.models)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schemas::{tenant_schemas, TableBinding, CAMPAIGN_SCHEMA};
    use crate::testing::{seed_tenant, Fixture};

    fn resolver(fx: &Fixture) -> TenantResolver {
        TenantResolver::new(fx.registry.clone(), fx.models.clone(), tenant_schemas())
    }

    #[tokio::test]
    async fn missing_identifier_is_required_error() {
        let fx = Fixture::new();
        let resolver = resolver(&fx);
        assert!(matches!(resolver.resolve(None).await, Err(ResolveError::TenantIdRequired)));
        assert!(matches!(resolver.resolve(Some("  ")).await, Err(ResolveError::TenantIdRequired)));
    }

    #[tokio::test]
    async fn resolves_connection_and_schemas() {
        let fx = Fixture::new();
        let record = seed_tenant(&fx.catalog, "acme").await;
        let resolver = resolver(&fx);

        let resolved = resolver.resolve(Some("acme")).await.unwrap();

        assert_eq!(resolved.tenant, "acme");
        assert_eq!(resolved.connection.database(), record.database_name);
        let campaigns = resolved.schemas.get::<TableBinding>(CAMPAIGN_SCHEMA).unwrap();
        assert_eq!(campaigns.table(), "campaigns");
        assert!(Arc::ptr_eq(campaigns.connection(), &resolved.connection));
    }

    #[tokio::test]
    async fn not_found_and_unreachable_are_distinct() {
        let fx = Fixture::new();
        let record = seed_tenant(&fx.catalog, "acme").await;
        fx.connector.take_offline(&record.database_name);
        let resolver = resolver(&fx);

        let missing = resolver.resolve(Some("ghost")).await.err().unwrap();
        assert!(matches!(missing, ResolveError::TenantNotFound(_)));
        assert!(!missing.is_retryable());

        let offline = resolver.resolve(Some("acme")).await.err().unwrap();
        assert!(matches!(offline, ResolveError::TenantUnreachable { .. }));
        assert!(offline.is_retryable());
    }

    #[test]
    fn context_defaults_to_unresolved() {
        assert!(TenantContext::default().resolved().is_none());
    }
}
