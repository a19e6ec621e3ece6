//! Host endpoints.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{action_reply, manager_error, ok, ApiState};
use crate::types::HostConfig;

#[derive(Debug, Deserialize)]
pub struct AddHostBody {
    pub hs_name: String,
    pub hs_type: String,
    pub hs_conf: HostConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailQuery {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct PowerBody {
    pub enable: bool,
}

pub async fn list(State(state): State<ApiState>) -> Response {
    ok(serde_json::Value::Array(state.manager.host_overview().await))
}

pub async fn add(State(state): State<ApiState>, Json(body): Json<AddHostBody>) -> Response {
    match state
        .manager
        .add_host(&body.hs_name, &body.hs_type, body.hs_conf)
        .await
    {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn detail(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Response {
    match state
        .manager
        .host_detail(&name, query.status, query.refresh)
        .await
    {
        Ok(detail) => ok(detail),
        Err(err) => manager_error(err),
    }
}

pub async fn update(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(config): Json<HostConfig>,
) -> Response {
    match state.manager.update_host(&name, config).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn remove(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.manager.delete_host(&name).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn power(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(body): Json<PowerBody>,
) -> Response {
    match state.manager.power_host(&name, body.enable).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Response {
    match state.manager.host_status(&name, query.refresh).await {
        Ok(status) => ok(serde_json::to_value(status).unwrap_or(serde_json::Value::Null)),
        Err(err) => manager_error(err),
    }
}
