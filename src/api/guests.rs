//! Guest endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{action_reply, manager_error, ok, reply, ApiState};
use crate::types::{GuestConfig, PowerState};

#[derive(Debug, Deserialize)]
pub struct PowerBody {
    pub power: PowerState,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanBody {
    #[serde(default)]
    pub prefix: String,
}

pub async fn list(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.manager.list_guests(&name).await {
        Ok(guests) => ok(serde_json::to_value(guests).unwrap_or(serde_json::Value::Null)),
        Err(err) => manager_error(err),
    }
}

pub async fn create(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(config): Json<GuestConfig>,
) -> Response {
    if config.vm_uuid.is_empty() {
        return reply(
            StatusCode::BAD_REQUEST,
            "vm_uuid is required",
            serde_json::Value::Null,
        );
    }
    match state.manager.guest_create(&name, config).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn detail(
    State(state): State<ApiState>,
    Path((name, uuid)): Path<(String, String)>,
) -> Response {
    match state.manager.guest_detail(&name, &uuid).await {
        Ok(detail) => ok(detail),
        Err(err) => manager_error(err),
    }
}

pub async fn update(
    State(state): State<ApiState>,
    Path((name, uuid)): Path<(String, String)>,
    Json(mut config): Json<GuestConfig>,
) -> Response {
    if config.vm_uuid.is_empty() {
        config.vm_uuid = uuid.clone();
    } else if config.vm_uuid != uuid {
        return reply(
            StatusCode::BAD_REQUEST,
            "vm_uuid does not match the path",
            serde_json::Value::Null,
        );
    }
    match state.manager.guest_update(&name, config).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn remove(
    State(state): State<ApiState>,
    Path((name, uuid)): Path<(String, String)>,
) -> Response {
    match state.manager.guest_delete(&name, &uuid).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn power(
    State(state): State<ApiState>,
    Path((name, uuid)): Path<(String, String)>,
    Json(body): Json<PowerBody>,
) -> Response {
    match state.manager.guest_power(&name, &uuid, body.power).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn scan(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Option<Json<ScanBody>>,
) -> Response {
    let prefix = body.map(|Json(body)| body.prefix).unwrap_or_default();
    match state.manager.scan_host(&name, &prefix).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}

pub async fn vconsole(
    State(state): State<ApiState>,
    Path((name, uuid)): Path<(String, String)>,
) -> Response {
    match state.manager.guest_console(&name, &uuid).await {
        Ok(result) => action_reply(result),
        Err(err) => manager_error(err),
    }
}
