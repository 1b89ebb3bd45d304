use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use super::auth::tenant_header;
use crate::error::ApiError;
use crate::services::{ResolveError, ResolvedTenant, TenantContext};
use crate::state::AppState;

/// Resolves the tenant named by the tenant header for routes that run
/// before authentication (tenant login). A missing header is a 400.
pub async fn resolve_tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let requested = tenant_header(request.headers(), &state.config.tenancy.header_name).map(str::to_string);
    let resolved = state.resolver.resolve(requested.as_deref()).await?;

    tracing::debug!("Tenant resolved: {} ({})", resolved.tenant, resolved.connection.database());
    request.extensions_mut().insert(TenantContext::Resolved(resolved));

    Ok(next.run(request).await)
}

/// The tenant bound to this request, by header or token claim.
#[derive(Clone, Debug)]
pub struct Tenant(pub ResolvedTenant);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<TenantContext>() {
            Some(TenantContext::Resolved(resolved)) => Ok(Tenant(resolved.clone())),
            _ => Err(ResolveError::TenantIdRequired.into()),
        }
    }
}
