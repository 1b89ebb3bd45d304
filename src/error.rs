// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::config::ConfigError;
use crate::database::{DatabaseError, ModelError};
use crate::services::{AuthError, ProvisionError, ResolveError, TenantError, TokenError};

/// HTTP API error with a status code and a client-safe message
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (provisioning DDL failed on the database server)
    BadGateway(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "PROVISIONING_FAILED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::TenantNotFound(tenant) => ApiError::not_found(format!("Tenant not found: {}", tenant)),
            DatabaseError::Conflict(what) => ApiError::conflict(format!("Already exists: {}", what)),
            DatabaseError::Unreachable { tenant, .. } => {
                ApiError::service_unavailable(format!("Tenant '{}' is temporarily unavailable", tenant))
            }
            DatabaseError::MasterUnreachable(_) => ApiError::service_unavailable("Database temporarily unavailable"),
            DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
            other => {
                tracing::error!("Database error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        tracing::error!("Schema binding error: {}", err);
        ApiError::internal_server_error("An error occurred while processing your request")
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::InvalidName(name) => ApiError::bad_request(format!("Invalid tenant name: {}", name)),
            // Full context is logged by the provisioner.
            ProvisionError::Step { step, .. } => {
                ApiError::BadGateway(format!("Tenant provisioning failed at step: {}", step))
            }
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NameRequired => ApiError::bad_request("Tenant name is required"),
            TenantError::InvalidName(msg) => ApiError::bad_request(msg),
            TenantError::AlreadyExists(name) => ApiError::conflict(format!("Tenant already exists: {}", name)),
            TenantError::NotFound(name) => ApiError::not_found(format!("Tenant not found: {}", name)),
            TenantError::Provisioning(e) => e.into(),
            TenantError::Incomplete { tenant, stage, .. } => ApiError::service_unavailable(format!(
                "Tenant '{}' was registered but stopped at {}; an operator must complete it",
                tenant, stage
            )),
            TenantError::ProductionLocked => ApiError::bad_request("Operation is disabled in production"),
            TenantError::Database(e) => e.into(),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::TenantIdRequired => ApiError::bad_request("Tenant ID is required"),
            ResolveError::TenantNotFound(tenant) => ApiError::not_found(format!("Tenant not found: {}", tenant)),
            ResolveError::TenantUnreachable { tenant, .. } => {
                ApiError::service_unavailable(format!("Tenant '{}' is temporarily unavailable", tenant))
            }
            ResolveError::Internal(e) => e.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        if err.is_unauthorized() {
            tracing::warn!(kind = err.kind(), "Token rejected: {}", err);
        }
        match err {
            TokenError::Missing => ApiError::unauthorized("Authentication token required"),
            TokenError::Expired => ApiError::unauthorized("Token has expired"),
            TokenError::Invalid(_) | TokenError::Revoked | TokenError::UserNotFound(_) => {
                ApiError::unauthorized("Invalid or revoked token")
            }
            TokenError::Signing(msg) => {
                tracing::error!("Token signing failed: {}", msg);
                ApiError::internal_server_error("Failed to issue token")
            }
            TokenError::Store(e) => e.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::unauthorized("Invalid email or password"),
            AuthError::EmailTaken(_) => ApiError::conflict("Email already exists"),
            AuthError::Validation(msg) => ApiError::bad_request(msg),
            AuthError::Hashing(msg) => {
                tracing::error!("Password hashing failed: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            AuthError::Token(e) => e.into(),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!("Configuration error: {}", err);
        ApiError::internal_server_error("Server is misconfigured")
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}
