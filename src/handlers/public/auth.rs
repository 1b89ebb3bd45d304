// handlers/public/auth.rs - account registration, login and token refresh

use axum::extract::{rejection::JsonRejection, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::UserIdentity;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult, Tenant};
use crate::services::IssuedTokens;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserIdentity,
    pub tenant: Option<String>,
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl SessionResponse {
    fn new(state: &AppState, user: UserIdentity, tenant: Option<String>, issued: IssuedTokens) -> Self {
        Self {
            user,
            tenant,
            token: issued.access_token,
            token_type: state.config.tokens.token_prefix.clone(),
            expires_at: issued.access_expires_at,
            refresh_token: issued.refresh_token,
            refresh_token_expires_at: issued.refresh_expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<UserIdentity> {
    let body = json_body(payload)?;
    let user = state.auth.register(&body.email, &body.password).await?;
    Ok(ApiResponse::created(user).with_message("User registered successfully"))
}

/// POST /tenants/auth/register - registration gated on a resolvable tenant
/// header. Accounts are global; the header only has to name a live tenant.
pub async fn tenant_register(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<UserIdentity> {
    let body = json_body(payload)?;
    let user = state.auth.register(&body.email, &body.password).await?;
    tracing::info!("Registered user {} through tenant '{}'", user.id, tenant.tenant);
    Ok(ApiResponse::created(user).with_message("User registered successfully"))
}

/// POST /auth/login - session without a tenant claim
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<SessionResponse> {
    let body = json_body(payload)?;
    let (user, issued) = state.auth.login(&body.email, &body.password, None).await?;
    Ok(ApiResponse::success(SessionResponse::new(&state, user, None, issued))
        .with_message("User logged in successfully"))
}

/// POST /tenants/auth/login - session bound to the tenant in the tenant header
pub async fn tenant_login(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<SessionResponse> {
    let body = json_body(payload)?;
    let (user, issued) = state
        .auth
        .login(&body.email, &body.password, Some(&tenant.tenant))
        .await?;
    Ok(ApiResponse::success(SessionResponse::new(&state, user, Some(tenant.tenant), issued))
        .with_message("User logged in successfully"))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<AccessResponse> {
    let body = json_body(payload)?;
    let refreshed = state.tokens.refresh(&body.refresh_token).await?;
    Ok(ApiResponse::success(AccessResponse {
        token: refreshed.access_token,
        token_type: state.config.tokens.token_prefix.clone(),
        expires_at: refreshed.expires_at,
    }))
}
