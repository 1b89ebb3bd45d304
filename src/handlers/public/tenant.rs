// handlers/public/tenant.rs - POST /tenant/create

use axum::extract::{rejection::JsonRejection, State};
use axum::Json;
use serde::Deserialize;

use crate::database::models::TenantRecord;
use crate::error::ApiError;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
}

/// Provisions a database, registers the tenant and migrates its schema.
///
/// Creation runs on its own task: a client that disconnects mid-request
/// does not cut provisioning or migration short.
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateTenantRequest>, JsonRejection>,
) -> ApiResult<TenantRecord> {
    let body = json_body(payload)?;
    let tenants = state.tenants.clone();

    let tenant = tokio::spawn(async move { tenants.create_tenant(&body.name).await })
        .await
        .map_err(|e| {
            tracing::error!("Tenant creation task failed: {}", e);
            ApiError::internal_server_error("Tenant creation was interrupted")
        })??;

    Ok(ApiResponse::created(tenant).with_message("Tenant created successfully"))
}
