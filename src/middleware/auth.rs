use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::database::models::UserIdentity;
use crate::error::ApiError;
use crate::services::{TenantContext, TokenClaims, TokenError};
use crate::state::AppState;

/// Authenticated user context extracted from the access token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user: UserIdentity,
    pub claims: TokenClaims,
}

/// Validates the bearer token, confirms the user still exists and, when the
/// token carries a tenant claim, resolves that tenant for the request.
///
/// The claim is authoritative: a tenant header naming a different tenant is
/// rejected rather than silently ignored.
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Owned copies: the request must not be borrowed across an await.
    let authorization = request
        .headers()
        .get(state.config.tokens.token_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let requested_tenant = tenant_header(request.headers(), &state.config.tenancy.header_name).map(str::to_string);

    let token = state.tokens.bearer_token(authorization.as_deref())?;
    let claims = state.tokens.verify(token)?;

    let user = state
        .users
        .find_by_id(claims.user_id)
        .await?
        .ok_or(TokenError::UserNotFound(claims.user_id))?;

    let context = match claims.tenant.as_deref() {
        Some(tenant) => {
            if let Some(requested) = requested_tenant.as_deref() {
                if requested != tenant {
                    tracing::warn!(
                        kind = "tenant_mismatch",
                        "User {} presented tenant header '{}' but token is bound to '{}'",
                        user.id,
                        requested,
                        tenant
                    );
                    return Err(ApiError::unauthorized("Tenant header does not match token"));
                }
            }
            TenantContext::Resolved(state.resolver.resolve(Some(tenant)).await?)
        }
        None => TenantContext::Unresolved,
    };

    tracing::debug!("Authenticated user {} (tenant: {:?})", user.id, claims.tenant);
    request.extensions_mut().insert(context);
    request.extensions_mut().insert(AuthUser { user, claims });

    Ok(next.run(request).await)
}

pub(crate) fn tenant_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}
