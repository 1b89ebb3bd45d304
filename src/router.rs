use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{protected, public};
use crate::middleware::{jwt_auth_middleware, resolve_tenant_middleware};
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(public::health::health))
        .merge(public_routes())
        .merge(tenant_public_routes(state.clone()))
        .merge(protected_routes(state.clone()))
        // Global middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors(&state.config.server.cors_origins)),
        )
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    use public::{auth, tenant};

    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/tenant/create", post(tenant::create))
}

/// Unauthenticated routes that need the tenant header resolved first.
fn tenant_public_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/tenants/auth/register", post(public::auth::tenant_register))
        .route("/tenants/auth/login", post(public::auth::tenant_login))
        .route_layer(from_fn_with_state(state, resolve_tenant_middleware))
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(protected::auth::logout))
        .route("/tenants/profile", get(protected::profile::profile))
        .route_layer(from_fn_with_state(state, jwt_auth_middleware))
}

fn cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_tenant, test_state, Harness};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn tenant_login(h: &Harness, tenant: &str) -> Value {
        let request = Request::post("/tenants/auth/login")
            .header("content-type", "application/json")
            .header("x-tenant-id", tenant)
            .body(Body::from(
                json!({"email": "alice@example.com", "password": "correct horse"}).to_string(),
            ))
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = test_state();
        let (status, body) = send(&h.app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["database"], "ok");
    }

    #[tokio::test]
    async fn create_tenant_then_conflict() {
        let h = test_state();
        let (status, body) = send(&h.app, post_json("/tenant/create", json!({"name": "Acme Corp"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["database_name"], "tenant_acme_corp_db");
        assert!(body["data"].get("database_password").is_none());

        let (status, body) = send(&h.app, post_json("/tenant/create", json!({"name": "Acme Corp"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn malformed_body_uses_error_envelope() {
        let h = test_state();
        let request = Request::post("/tenant/create")
            .header("content-type", "application/json")
            .body(Body::from("{"))
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn tenant_login_requires_a_resolvable_tenant() {
        let h = test_state();
        let record = seed_tenant(&h.fx.catalog, "acme").await;
        h.fx.connector.take_offline(&record.database_name);

        let creds = json!({"email": "alice@example.com", "password": "correct horse"});
        let (status, _) = send(&h.app, post_json("/tenants/auth/login", creds.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = |tenant: &str| {
            Request::post("/tenants/auth/login")
                .header("content-type", "application/json")
                .header("x-tenant-id", tenant)
                .body(Body::from(creds.to_string()))
                .unwrap()
        };
        let (status, _) = send(&h.app, request("ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&h.app, request("acme")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn tenant_session_reaches_profile() {
        let h = test_state();
        seed_tenant(&h.fx.catalog, "acme").await;
        let body = tenant_login(&h, "acme").await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let request = Request::get("/tenants/profile")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["tenant"], "acme");
        assert_eq!(body["data"]["database"], "tenant_acme_db");
        assert_eq!(body["data"]["campaigns_table"], "campaigns");
    }

    #[tokio::test]
    async fn header_naming_another_tenant_is_unauthorized() {
        let h = test_state();
        seed_tenant(&h.fx.catalog, "acme").await;
        seed_tenant(&h.fx.catalog, "globex").await;
        let body = tenant_login(&h, "acme").await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let request = Request::get("/tenants/profile")
            .header("authorization", format!("Bearer {}", token))
            .header("x-tenant-id", "globex")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_without_tenant_claim_is_bad_request() {
        let h = test_state();
        let (status, body) = send(
            &h.app,
            post_json("/auth/login", json!({"email": "alice@example.com", "password": "correct horse"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let request = Request::get("/tenants/profile")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_and_bad_tokens() {
        let h = test_state();
        let (status, body) = send(&h.app, Request::post("/auth/logout").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Authentication token required");

        let request = Request::post("/auth/logout")
            .header("authorization", "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn relogin_revokes_earlier_refresh_token() {
        let h = test_state();
        let creds = json!({"email": "alice@example.com", "password": "correct horse"});
        let (_, first) = send(&h.app, post_json("/auth/login", creds.clone())).await;
        let (_, _second) = send(&h.app, post_json("/auth/login", creds)).await;

        let stale = first["data"]["refresh_token"].clone();
        let (status, _) = send(&h.app, post_json("/auth/refresh", json!({ "refresh_token": stale }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_revokes_refresh_tokens() {
        let h = test_state();
        let creds = json!({"email": "alice@example.com", "password": "correct horse"});
        let (_, session) = send(&h.app, post_json("/auth/login", creds)).await;
        let token = session["data"]["token"].as_str().unwrap().to_string();
        let refresh = session["data"]["refresh_token"].clone();

        let (status, _) = send(&h.app, post_json("/auth/refresh", json!({ "refresh_token": refresh.clone() }))).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::post("/auth/logout")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["revoked"], 1);

        let (status, _) = send(&h.app, post_json("/auth/refresh", json!({ "refresh_token": refresh }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tenant_register_needs_a_known_tenant() {
        let h = test_state();
        seed_tenant(&h.fx.catalog, "acme").await;
        let creds = json!({"email": "bob@example.com", "password": "long enough"});

        let (status, _) = send(&h.app, post_json("/tenants/auth/register", creds.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = |tenant: &str| {
            Request::post("/tenants/auth/register")
                .header("content-type", "application/json")
                .header("x-tenant-id", tenant)
                .body(Body::from(creds.to_string()))
                .unwrap()
        };
        let (status, _) = send(&h.app, request("ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&h.app, request("acme")).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["data"]["email"], "bob@example.com");

        let (status, _) = send(&h.app, request("acme")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let h = test_state();
        let (status, _) = send(
            &h.app,
            post_json("/auth/register", json!({"email": "alice@example.com", "password": "whatever-long"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
