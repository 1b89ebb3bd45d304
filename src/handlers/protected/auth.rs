// handlers/protected/auth.rs - POST /auth/logout

use axum::extract::State;
use serde_json::{json, Value};

use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

/// Revokes every refresh token of the caller. Access tokens stay valid
/// until they expire.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Value> {
    let revoked = state.tokens.revoke_all(auth.user.id).await?;
    Ok(ApiResponse::success(json!({ "revoked": revoked })).with_message("User logged out successfully"))
}
