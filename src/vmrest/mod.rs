//! VMware Workstation REST daemon client.
//!
//! Typed facade over the `vmrest` HTTP API. Every call uses basic auth
//! and the vendor content type; the power endpoint is the single one
//! whose request body is a raw token string rather than JSON.
//!
//! The daemon addresses guests by opaque id, the controller by name, so
//! the name-based operations list the inventory and resolve first.

pub mod vmx;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

const CONTENT_TYPE: &str = "application/vnd.vmware.vmw.rest-v1+json";

/// Virtual hardware version emitted into new `.vmx` files.
pub const DEFAULT_VER_AGENT: u32 = 21;

#[derive(Debug, Error)]
pub enum VmRestError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned {code}: {body}")]
    Status { code: StatusCode, body: String },

    #[error("未找到虚拟机: {0}")]
    NotFound(String),
}

/// One inventory entry as reported by `GET /vms`.
#[derive(Debug, Clone, Deserialize)]
pub struct VmEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: String,
}

impl VmEntry {
    /// File stem of the `.vmx` path; the guest's name.
    pub fn name(&self) -> &str {
        let base = self
            .path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str());
        base.strip_suffix(".vmx").unwrap_or(base)
    }
}

#[derive(Debug, Clone)]
pub struct VmRestClient {
    http: reqwest::Client,
    host_addr: String,
    host_user: String,
    host_pass: String,
    pub ver_agent: u32,
}

impl VmRestClient {
    pub fn new(
        host_addr: impl Into<String>,
        host_user: impl Into<String>,
        host_pass: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            host_addr: host_addr.into(),
            host_user: host_user.into(),
            host_pass: host_pass.into(),
            ver_agent: DEFAULT_VER_AGENT,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/api{}", self.host_addr, path)
    }

    /// One JSON round trip. Non-2xx responses surface as
    /// [`VmRestError::Status`] with the body preserved for the log.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, VmRestError> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .basic_auth(&self.host_user, Some(&self.host_pass))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let code = response.status();
        let text = response.text().await?;
        if !code.is_success() {
            return Err(VmRestError::Status { code, body: text });
        }
        if text.is_empty() {
            return Ok(serde_json::json!({}));
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }

    /// The power endpoint: PUT with the state token as the raw body.
    async fn call_power(&self, path: &str, token: &str) -> Result<serde_json::Value, VmRestError> {
        let response = self
            .http
            .put(self.url(path))
            .basic_auth(&self.host_user, Some(&self.host_pass))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(token.to_string())
            .send()
            .await?;
        let code = response.status();
        let text = response.text().await?;
        if !code.is_success() {
            return Err(VmRestError::Status { code, body: text });
        }
        if text.is_empty() {
            return Ok(serde_json::json!({}));
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }

    // ==================== inventory ====================

    pub async fn list_guests(&self) -> Result<Vec<VmEntry>, VmRestError> {
        let value = self.call(Method::GET, "/vms", None).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Resolve a guest name to the backend id: substring match on the
    /// inventory path, or exact file-stem equality. Empty result means
    /// the guest is unknown to the backend.
    pub async fn resolve_id(&self, vm_name: &str) -> Result<String, VmRestError> {
        let guests = self.list_guests().await?;
        for guest in &guests {
            if guest.path.contains(vm_name) || guest.name() == vm_name {
                return Ok(guest.id.clone());
            }
        }
        Ok(String::new())
    }

    async fn require_id(&self, vm_name: &str) -> Result<String, VmRestError> {
        let id = self.resolve_id(vm_name).await?;
        if id.is_empty() {
            return Err(VmRestError::NotFound(vm_name.to_string()));
        }
        Ok(id)
    }

    // ==================== registration ====================

    pub async fn register(
        &self,
        vm_name: &str,
        vmx_path: &str,
    ) -> Result<serde_json::Value, VmRestError> {
        self.call(
            Method::POST,
            "/vms/registration",
            Some(&serde_json::json!({ "name": vm_name, "path": vmx_path })),
        )
        .await
    }

    pub async fn unregister(&self, vm_name: &str) -> Result<(), VmRestError> {
        let id = self.require_id(vm_name).await?;
        self.call(Method::DELETE, &format!("/vms/{id}"), None)
            .await?;
        Ok(())
    }

    // ==================== power ====================

    pub async fn get_power(&self, vm_name: &str) -> Result<serde_json::Value, VmRestError> {
        let id = self.require_id(vm_name).await?;
        self.call(Method::GET, &format!("/vms/{id}/power"), None)
            .await
    }

    /// Drive the power state. `wire_token` is the backend token
    /// (`on|off|shutdown|reset|pause|unpause`); an optional guest
    /// encryption password is appended as a query parameter.
    pub async fn set_power(
        &self,
        vm_name: &str,
        wire_token: &str,
        vm_password: Option<&str>,
    ) -> Result<serde_json::Value, VmRestError> {
        let id = self.require_id(vm_name).await?;
        let mut path = format!("/vms/{id}/power");
        if let Some(password) = vm_password {
            path.push_str(&format!("?vmPassword={}", urlencoding::encode(password)));
        }
        self.call_power(&path, wire_token).await
    }

    // ==================== configuration ====================

    pub async fn get_config(&self, vm_name: &str) -> Result<serde_json::Value, VmRestError> {
        let id = self.require_id(vm_name).await?;
        self.call(Method::GET, &format!("/vms/{id}"), None).await
    }

    pub async fn set_config(
        &self,
        vm_name: &str,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value, VmRestError> {
        let id = self.require_id(vm_name).await?;
        self.call(Method::PUT, &format!("/vms/{id}"), Some(patch))
            .await
    }

    // ==================== networks ====================

    pub async fn list_nets(&self) -> Result<serde_json::Value, VmRestError> {
        self.call(Method::GET, "/vmnet", None).await
    }
}
