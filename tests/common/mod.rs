//! Live-database harness. Every test here is skipped unless
//! `TENANT_PLANE_IT_DATABASE` names a PostgreSQL master database the
//! configured role may create databases and roles from.

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tenant_plane::config::AppConfig;
use tenant_plane::router::app;
use tenant_plane::state::AppState;

pub const IT_DATABASE: &str = "TENANT_PLANE_IT_DATABASE";

pub struct LiveServer {
    pub state: AppState,
    pub app: Router,
}

/// Boots the full service graph against the live master database, or
/// returns `None` when the integration database is not configured.
pub async fn live_server() -> Result<Option<LiveServer>> {
    let _ = dotenvy::dotenv();
    let Ok(database) = std::env::var(IT_DATABASE) else {
        eprintln!("{} not set, skipping", IT_DATABASE);
        return Ok(None);
    };

    let mut config = AppConfig::from_env();
    config.database.database = database;
    if config.tokens.access_secret.is_empty() {
        config.tokens.access_secret = "it-access-secret".to_string();
    }
    if config.tokens.refresh_secret.is_empty() {
        config.tokens.refresh_secret = "it-refresh-secret".to_string();
    }
    config.tokens.password_hash_cost = 4;

    let state = AppState::bootstrap(config).await?;
    Ok(Some(LiveServer {
        app: app(state.clone()),
        state,
    }))
}

/// A name no earlier run has used.
pub fn unique(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..10])
}

pub async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}
