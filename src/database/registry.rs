use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::database::connection::ConnectionHandle;

/// A schema object bound to one connection. Concrete types are recovered
/// with [`ModelRegistry::resolve`].
pub type Binding = Arc<dyn Any + Send + Sync>;

/// Builds a binding for a connection.
pub type SchemaFactory = Arc<dyn Fn(&ConnectionHandle) -> Binding + Send + Sync>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Schema '{schema}' is not bound for tenant '{tenant}' or the master scope")]
    NotBound { schema: String, tenant: String },

    #[error("Schema '{0}' is not bound in the master scope")]
    MasterNotBound(String),

    #[error("Schema '{0}' is bound to a different type than requested")]
    TypeMismatch(String),
}

/// Schema bindings indexed by (schema name, tenant), with a master scope
/// that tenant lookups fall back to.
#[derive(Default)]
pub struct ModelRegistry {
    // schema name -> tenant -> binding
    tenants: RwLock<HashMap<String, HashMap<String, Binding>>>,
    master: RwLock<HashMap<String, Binding>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `schema` for `tenant`, replacing any earlier binding.
    pub fn bind_tenant<T, F>(
        &self,
        schema: &str,
        tenant: &str,
        connection: &ConnectionHandle,
        factory: F,
    ) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&ConnectionHandle) -> T,
    {
        let bound = Arc::new(factory(connection));
        self.insert_tenant(schema, tenant, bound.clone());
        bound
    }

    /// Binds `schema` in the master scope, replacing any earlier binding.
    pub fn bind_master<T, F>(&self, schema: &str, connection: &ConnectionHandle, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&ConnectionHandle) -> T,
    {
        let bound = Arc::new(factory(connection));
        self.insert_master(schema, bound.clone());
        bound
    }

    pub fn insert_tenant(&self, schema: &str, tenant: &str, binding: Binding) {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        tenants
            .entry(schema.to_string())
            .or_default()
            .insert(tenant.to_string(), binding);
    }

    pub fn insert_master(&self, schema: &str, binding: Binding) {
        let mut master = self.master.write().unwrap_or_else(PoisonError::into_inner);
        master.insert(schema.to_string(), binding);
    }

    /// Binds every schema of `set` for `tenant` that is not bound yet.
    /// Returns how many were bound.
    pub fn ensure_tenant_set(&self, set: &SchemaSet, tenant: &str, connection: &ConnectionHandle) -> usize {
        let mut bound = 0;
        for (schema, factory) in set.iter() {
            if !self.has_tenant(schema, tenant) {
                self.insert_tenant(schema, tenant, factory(connection));
                bound += 1;
            }
        }
        bound
    }

    /// Binds every schema of `set` in the master scope.
    pub fn bind_master_set(&self, set: &SchemaSet, connection: &ConnectionHandle) {
        for (schema, factory) in set.iter() {
            self.insert_master(schema, factory(connection));
        }
    }

    /// Tenant binding if present, otherwise the master binding.
    pub fn resolve_binding(&self, schema: &str, tenant: &str) -> Option<Binding> {
        self.tenant_binding(schema, tenant)
            .or_else(|| self.master_binding(schema))
    }

    /// Typed combined lookup.
    pub fn resolve<T: Send + Sync + 'static>(&self, schema: &str, tenant: &str) -> Result<Arc<T>, ModelError> {
        let binding = self
            .resolve_binding(schema, tenant)
            .ok_or_else(|| ModelError::NotBound {
                schema: schema.to_string(),
                tenant: tenant.to_string(),
            })?;
        downcast(schema, binding)
    }

    /// Typed master-only lookup, for code that does not care about tenancy.
    pub fn resolve_master<T: Send + Sync + 'static>(&self, schema: &str) -> Result<Arc<T>, ModelError> {
        let binding = self
            .master_binding(schema)
            .ok_or_else(|| ModelError::MasterNotBound(schema.to_string()))?;
        downcast(schema, binding)
    }

    pub fn tenant_binding(&self, schema: &str, tenant: &str) -> Option<Binding> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        tenants.get(schema).and_then(|by_tenant| by_tenant.get(tenant)).cloned()
    }

    pub fn master_binding(&self, schema: &str) -> Option<Binding> {
        let master = self.master.read().unwrap_or_else(PoisonError::into_inner);
        master.get(schema).cloned()
    }

    pub fn has_tenant(&self, schema: &str, tenant: &str) -> bool {
        self.tenant_binding(schema, tenant).is_some()
    }

    pub fn has_master(&self, schema: &str) -> bool {
        self.master_binding(schema).is_some()
    }

    /// Tenants that have `schema` bound, sorted.
    pub fn tenant_ids(&self, schema: &str) -> Vec<String> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = tenants
            .get(schema)
            .map(|by_tenant| by_tenant.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn remove_tenant(&self, schema: &str, tenant: &str) -> bool {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        match tenants.get_mut(schema) {
            Some(by_tenant) => by_tenant.remove(tenant).is_some(),
            None => false,
        }
    }

    pub fn remove_master(&self, schema: &str) -> bool {
        let mut master = self.master.write().unwrap_or_else(PoisonError::into_inner);
        master.remove(schema).is_some()
    }
}

fn downcast<T: Send + Sync + 'static>(schema: &str, binding: Binding) -> Result<Arc<T>, ModelError> {
    binding
        .downcast::<T>()
        .map_err(|_| ModelError::TypeMismatch(schema.to_string()))
}

/// Named schema factories for one scope.
#[derive(Clone, Default)]
pub struct SchemaSet {
    entries: Vec<(String, SchemaFactory)>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T, F>(mut self, schema: &str, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ConnectionHandle) -> T + Send + Sync + 'static,
    {
        let erased: SchemaFactory =
            Arc::new(move |connection: &ConnectionHandle| Arc::new(factory(connection)) as Binding);
        self.entries.push((schema.to_string(), erased));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaFactory)> {
        self.entries.iter().map(|(name, factory)| (name.as_str(), factory))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl fmt::Debug for SchemaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Request-scoped view of the registry for one tenant.
#[derive(Clone)]
pub struct SchemaAccessor {
    tenant: String,
    registry: Arc<ModelRegistry>,
}

impl SchemaAccessor {
    pub fn new(tenant: impl Into<String>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            tenant: tenant.into(),
            registry,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn get<T: Send + Sync + 'static>(&self, schema: &str) -> Result<Arc<T>, ModelError> {
        self.registry.resolve(schema, &self.tenant)
    }

    pub fn is_bound(&self, schema: &str) -> bool {
        self.registry.resolve_binding(schema, &self.tenant).is_some()
    }
}

impl fmt::Debug for SchemaAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaAccessor").field("tenant", &self.tenant).finish()
    }
}
