//! Operator HTTP API.
//!
//! Thin routing and auth over the host manager; no control-plane logic
//! lives here. Every response shares the `{code, msg, data}` envelope
//! with `code` aligned to the HTTP status.

pub mod guests;
pub mod hosts;
pub mod system;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ManagerError;
use crate::manager::HostManager;
use crate::types::ActionResult;

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<HostManager>,
}

/// The `{code, msg, data}` envelope.
pub fn reply(code: StatusCode, msg: impl Into<String>, data: serde_json::Value) -> Response {
    let body = serde_json::json!({
        "code": code.as_u16(),
        "msg": msg.into(),
        "data": data,
    });
    (code, axum::Json(body)).into_response()
}

pub fn ok(data: serde_json::Value) -> Response {
    reply(StatusCode::OK, "OK", data)
}

/// Manager bookkeeping failures carry their own HTTP status.
pub fn manager_error(err: ManagerError) -> Response {
    let code = StatusCode::from_u16(err.kind().http_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    reply(code, err.to_string(), serde_json::Value::Null)
}

/// Adapter outcomes pass through unchanged; a failed operation is a 500
/// whose data still carries the full `ActionResult`.
pub fn action_reply(result: ActionResult) -> Response {
    let code = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let msg = result.message.clone();
    reply(
        code,
        msg,
        serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
    )
}

/// Bearer check for everything under `/api`.
async fn require_bearer(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or("");
    if state.manager.verify_bearer(token) {
        next.run(request).await
    } else {
        reply(StatusCode::UNAUTHORIZED, "unauthorized", serde_json::Value::Null)
    }
}

pub fn build_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api/hosts", get(hosts::list).post(hosts::add))
        .route(
            "/api/hosts/:name",
            get(hosts::detail).put(hosts::update).delete(hosts::remove),
        )
        .route("/api/hosts/:name/power", post(hosts::power))
        .route("/api/hosts/:name/status", get(hosts::status))
        .route(
            "/api/hosts/:name/vms",
            get(guests::list).post(guests::create),
        )
        .route("/api/hosts/:name/vms/scan", post(guests::scan))
        .route(
            "/api/hosts/:name/vms/:uuid",
            get(guests::detail)
                .put(guests::update)
                .delete(guests::remove),
        )
        .route("/api/hosts/:name/vms/:uuid/power", post(guests::power))
        .route("/api/hosts/:name/vms/:uuid/vconsole", get(guests::vconsole))
        .route("/api/logs", get(system::logs))
        .route("/api/token/reset", post(system::token_reset))
        .route("/api/token/set", post(system::token_set))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/login", post(system::login))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use crate::types::HostConfig;
    use crate::vnc::VncGateway;

    async fn spawn_api() -> (String, Arc<HostManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CatalogStore::open_memory().await.unwrap());
        let gateway = Arc::new(VncGateway::new(
            dir.path(),
            6090,
            dir.path().join("web"),
            "127.0.0.1",
        ));
        let manager = Arc::new(HostManager::new(store, gateway));
        manager.load_all().await;
        let app = build_router(ApiState {
            manager: manager.clone(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), manager, dir)
    }

    #[tokio::test]
    async fn test_login_accepts_only_the_bearer() {
        let (base, manager, _dir) = spawn_api().await;
        let bearer = manager.bearer();
        let http = reqwest::Client::new();

        let response = http
            .post(format!("{base}/login"))
            .json(&serde_json::json!({"bearer": bearer}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = http
            .post(format!("{base}/login"))
            .json(&serde_json::json!({"bearer": "wrong"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], serde_json::json!(401));
        assert_eq!(body["data"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_api_requires_authorization_header() {
        let (base, manager, _dir) = spawn_api().await;
        let http = reqwest::Client::new();

        let response = http
            .get(format!("{base}/api/hosts"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let response = http
            .get(format!("{base}/api/hosts"))
            .bearer_auth(manager.bearer())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], serde_json::json!(200));
        assert!(body["data"].is_array());
    }

    #[tokio::test]
    async fn test_missing_host_is_404_with_stable_message() {
        let (base, manager, _dir) = spawn_api().await;
        let http = reqwest::Client::new();

        let response = http
            .get(format!("{base}/api/hosts/nope"))
            .bearer_auth(manager.bearer())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["msg"], serde_json::json!("主机不存在"));
    }

    #[tokio::test]
    async fn test_host_add_and_guest_404_round_trip() {
        let (base, manager, _dir) = spawn_api().await;
        let http = reqwest::Client::new();
        let bearer = manager.bearer();

        let body = serde_json::json!({
            "hs_name": "h1",
            "hs_type": "VMWareSetup",
            "hs_conf": HostConfig {
                server_addr: "127.0.0.1:1".to_string(),
                ..HostConfig::default()
            },
        });
        let response = http
            .post(format!("{base}/api/hosts"))
            .bearer_auth(&bearer)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        // Duplicate -> 409.
        let response = http
            .post(format!("{base}/api/hosts"))
            .bearer_auth(&bearer)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 409);

        // Disabled type -> 400.
        let disabled = serde_json::json!({
            "hs_name": "h2",
            "hs_type": "DockerSetup",
            "hs_conf": HostConfig::default(),
        });
        let response = http
            .post(format!("{base}/api/hosts"))
            .bearer_auth(&bearer)
            .json(&disabled)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Unknown guest -> 404 with the stable message.
        let response = http
            .post(format!("{base}/api/hosts/h1/vms/g1/power"))
            .bearer_auth(&bearer)
            .json(&serde_json::json!({"power": "S_START"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["msg"], serde_json::json!("虚拟机不存在"));
    }

    #[tokio::test]
    async fn test_token_reset_rotates_the_bearer() {
        let (base, manager, _dir) = spawn_api().await;
        let http = reqwest::Client::new();
        let old_bearer = manager.bearer();

        let response = http
            .post(format!("{base}/api/token/reset"))
            .bearer_auth(&old_bearer)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        let new_bearer = body["data"]["bearer"].as_str().unwrap().to_string();
        assert_ne!(new_bearer, old_bearer);

        // The old token no longer authenticates.
        let response = http
            .get(format!("{base}/api/hosts"))
            .bearer_auth(&old_bearer)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let response = http
            .get(format!("{base}/api/hosts"))
            .bearer_auth(&new_bearer)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
}
