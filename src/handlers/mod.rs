// handlers/mod.rs - 2-tier handler layout
//
// Public (no token; tenant routes resolve the tenant header) → Protected
// (bearer token; the tenant comes from the token claim)
pub mod protected;
pub mod public;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::ApiError;

/// Unwraps a JSON body, turning axum's rejection into our error envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::invalid_json(e.body_text()))
}
