// handlers/protected/profile.rs - GET /tenants/profile

use serde::Serialize;

use crate::database::models::UserIdentity;
use crate::database::schemas::{TableBinding, CAMPAIGN_SCHEMA};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, Tenant};

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserIdentity,
    pub tenant: String,
    pub database: String,
    pub campaigns_table: String,
}

/// The caller and the tenant their token is bound to.
pub async fn profile(auth: AuthUser, Tenant(tenant): Tenant) -> ApiResult<ProfileResponse> {
    let campaigns = tenant.schemas.get::<TableBinding>(CAMPAIGN_SCHEMA)?;

    Ok(ApiResponse::success(ProfileResponse {
        user: auth.user,
        database: tenant.connection.database().to_string(),
        tenant: tenant.tenant,
        campaigns_table: campaigns.table().to_string(),
    })
    .with_message("Profile retrieved successfully"))
}
