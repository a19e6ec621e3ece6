//! Login, token and log endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{manager_error, ok, reply, ApiState};

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub bearer: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    #[serde(default)]
    pub bearer: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub hs_name: Option<String>,
    pub limit: Option<i64>,
}

pub async fn login(State(state): State<ApiState>, Json(body): Json<LoginBody>) -> Response {
    if state.manager.verify_bearer(&body.bearer) {
        ok(serde_json::json!({"login": true}))
    } else {
        reply(
            StatusCode::UNAUTHORIZED,
            "invalid bearer token",
            serde_json::Value::Null,
        )
    }
}

pub async fn logs(State(state): State<ApiState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    match state.manager.logs(query.hs_name.as_deref(), limit).await {
        Ok(page) => ok(serde_json::Value::Array(page)),
        Err(err) => manager_error(err),
    }
}

pub async fn token_reset(State(state): State<ApiState>) -> Response {
    match state.manager.set_bearer("").await {
        Ok(bearer) => ok(serde_json::json!({"bearer": bearer})),
        Err(err) => manager_error(err),
    }
}

pub async fn token_set(State(state): State<ApiState>, Json(body): Json<TokenBody>) -> Response {
    if body.bearer.is_empty() {
        return reply(
            StatusCode::BAD_REQUEST,
            "bearer must not be empty",
            serde_json::Value::Null,
        );
    }
    match state.manager.set_bearer(&body.bearer).await {
        Ok(bearer) => ok(serde_json::json!({"bearer": bearer})),
        Err(err) => manager_error(err),
    }
}
