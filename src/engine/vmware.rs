//! VMware Workstation adapter.
//!
//! Drives one Workstation instance through its REST daemon. The adapter
//! owns the daemon child process (spawned from `launch_path`, terminated
//! on unload), materializes guest definitions to `.vmx` files plus a
//! template `.vmdk` copy, and mirrors the backend inventory into the
//! host state.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tokio::process::{Child, Command};
use tracing::warn;

use super::{EngineContext, HostEngine, HostState};
use crate::probe;
use crate::router::{IkuaiClient, StaticDhcpRow};
use crate::types::{ActionResult, GuestConfig, HostConfig, HwStatus, PowerState};
use crate::vmrest::{vmx, VmRestClient, VmRestError};
use crate::vnc::VncGateway;

#[cfg(windows)]
const DAEMON_BINARY: &str = "vmrest.exe";
#[cfg(not(windows))]
const DAEMON_BINARY: &str = "vmrest";

/// Requested power state -> backend wire token. Observed states are not
/// requestable.
fn wire_token(power: PowerState) -> Option<&'static str> {
    match power {
        PowerState::SStart => Some("on"),
        PowerState::SClose => Some("shutdown"),
        PowerState::SReset | PowerState::HReset => Some("reset"),
        PowerState::HClose => Some("off"),
        PowerState::APause => Some("pause"),
        PowerState::AWaked => Some("unpause"),
        _ => None,
    }
}

/// Backend `power_state` string -> observed state.
fn observed_state(power_state: &str) -> PowerState {
    match power_state {
        "poweredOn" => PowerState::Started,
        "poweredOff" => PowerState::Stopped,
        "suspended" | "paused" => PowerState::Suspend,
        _ => PowerState::Unknown,
    }
}

fn already_registered(err: &VmRestError) -> bool {
    match err {
        VmRestError::Status { code, body } => {
            code.as_u16() == 409 || body.to_ascii_lowercase().contains("already")
        }
        _ => false,
    }
}

pub struct VmwareEngine {
    state: HostState,
    client: VmRestClient,
    gateway: Arc<VncGateway>,
    daemon: Option<Child>,
}

/// Registry factory.
pub fn new_engine(
    hs_name: String,
    config: HostConfig,
    context: EngineContext,
) -> Box<dyn HostEngine + Send> {
    let client = VmRestClient::new(
        config.server_addr.clone(),
        config.server_user.clone(),
        config.server_pass.clone(),
    );
    Box::new(VmwareEngine {
        state: HostState::new(hs_name, config, context.store),
        client,
        gateway: context.gateway,
        daemon: None,
    })
}

impl VmwareEngine {
    fn log(&mut self, result: &ActionResult) {
        self.state.add_log(result.clone());
    }

    /// Best-effort full persist; a failed save is logged and retried by
    /// the next tick, in-memory state is not rolled back.
    async fn persist(&mut self) {
        if let Err(err) = self.state.save_to_store().await {
            warn!(hs_name = %self.state.hs_name, error = %err, "catalog save failed");
        }
    }

    /// Guest encryption password forwarded to the power endpoint, when
    /// the operator configured one.
    fn vm_password(&self) -> Option<String> {
        self.state
            .hs_config
            .extend_data
            .get("vm_password")
            .and_then(|value| value.as_str())
            .map(str::to_string)
    }

    /// Fresh router session when this host has router integration
    /// configured. Lazy: nothing is kept between operations.
    async fn router_client(&self) -> Option<IkuaiClient> {
        let config = &self.state.hs_config;
        if config.i_kuai_addr.is_empty() {
            return None;
        }
        let mut client = IkuaiClient::new(
            config.i_kuai_addr.clone(),
            config.i_kuai_user.clone(),
            config.i_kuai_pass.clone(),
        );
        if client.login().await {
            Some(client)
        } else {
            warn!(hs_name = %self.state.hs_name, "router login failed");
            None
        }
    }

    /// Reserve the guest's addresses on the router. Best effort: a
    /// failed reservation is a log line, never a failed create.
    async fn program_router_for(&mut self, config: &GuestConfig) {
        let Some(client) = self.router_client().await else {
            return;
        };
        for nic in config.nic_all.values() {
            if nic.ip4_addr.is_empty() || nic.mac_addr.is_empty() {
                continue;
            }
            let row = StaticDhcpRow::new(nic.ip4_addr.as_str(), nic.mac_addr.as_str())
                .with_comment(config.vm_uuid.as_str());
            if !client.add_static_dhcp(&row).await {
                self.state.add_log(ActionResult::fail(
                    "vm_create",
                    format!("router reservation failed for {}", nic.ip4_addr),
                ));
            }
        }
    }

    /// Drop the guest's router reservations, keyed by its NIC addresses.
    async fn clear_router_for(&mut self, ips: Vec<String>) {
        if ips.is_empty() {
            return;
        }
        let Some(client) = self.router_client().await else {
            return;
        };
        for ip in ips {
            if !client.delete_static_dhcp(None, Some(&ip), None).await {
                self.state.add_log(ActionResult::fail(
                    "vm_delete",
                    format!("router reservation removal failed for {ip}"),
                ));
            }
        }
    }

    /// The address guests' VNC servers listen on: the backend host.
    fn vnc_host(&self) -> String {
        let host = self
            .state
            .hs_config
            .server_addr
            .split(':')
            .next()
            .unwrap_or("");
        if host.is_empty() {
            "127.0.0.1".to_string()
        } else {
            host.to_string()
        }
    }
}

#[async_trait]
impl HostEngine for VmwareEngine {
    fn state(&self) -> &HostState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut HostState {
        &mut self.state
    }

    async fn host_create(&mut self) -> ActionResult {
        let result = ActionResult::ok("hs_create");
        self.log(&result);
        result
    }

    async fn host_delete(&mut self) -> ActionResult {
        let result = ActionResult::ok("hs_delete");
        self.log(&result);
        result
    }

    async fn host_load(&mut self) -> ActionResult {
        let launch_path = self.state.hs_config.launch_path.clone();
        let binary = Path::new(&launch_path).join(DAEMON_BINARY);
        if !binary.is_file() {
            let result = ActionResult::fail(
                "hs_loader",
                format!("{DAEMON_BINARY} not found in {launch_path}"),
            );
            self.log(&result);
            return result;
        }
        let spawned = Command::new(&binary)
            .current_dir(&launch_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let result = match spawned {
            Ok(child) => {
                self.daemon = Some(child);
                ActionResult::ok("hs_loader")
            }
            Err(err) => ActionResult::fail_with("hs_loader", "failed to start vmrest", &err),
        };
        self.log(&result);
        result
    }

    async fn host_unload(&mut self) -> ActionResult {
        let Some(mut child) = self.daemon.take() else {
            return ActionResult::fail("hs_unload", "vmrest is not running");
        };
        let _ = child.start_kill();
        let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        let result = ActionResult::ok_with("hs_unload", "vmrest stopped");
        self.log(&result);
        result
    }

    async fn host_action(&mut self, action: &str) -> ActionResult {
        let result = ActionResult::ok_with("hs_action", action);
        self.log(&result);
        result
    }

    async fn host_config(&mut self, config: HostConfig) -> ActionResult {
        // The REST client is derived from the config; rebuild it so the
        // new credentials take effect immediately.
        self.client = VmRestClient::new(
            config.server_addr.clone(),
            config.server_user.clone(),
            config.server_pass.clone(),
        );
        self.state.hs_config = config;
        let result = ActionResult::ok("hs_config");
        self.log(&result);
        result
    }

    async fn crontab(&mut self) -> bool {
        if let Ok(status) = tokio::task::spawn_blocking(probe::sample).await {
            self.state.push_hs_status(status);
        }
        let entries = match self.client.list_guests().await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(hs_name = %self.state.hs_name, error = %err, "backend inventory poll failed");
                return false;
            }
        };
        let filter = self.state.hs_config.filter_name.clone();
        for entry in entries {
            let vm_name = entry.name().to_string();
            if !filter.is_empty() && !vm_name.starts_with(filter.as_str()) {
                continue;
            }
            let ac_status = match self.client.get_power(&vm_name).await {
                Ok(value) => observed_state(
                    value
                        .get("power_state")
                        .and_then(|state| state.as_str())
                        .unwrap_or(""),
                ),
                Err(_) => PowerState::Unknown,
            };
            self.state
                .push_vm_status(&vm_name, HwStatus::observed(ac_status));
        }
        true
    }

    async fn guest_create(&mut self, mut config: GuestConfig) -> ActionResult {
        config.normalize();
        let vm_uuid = config.vm_uuid.clone();
        if vm_uuid.is_empty() {
            let result = ActionResult::fail("vm_create", "vm_uuid is required");
            self.log(&result);
            return result;
        }

        // Record the desired config first; the guest exists from here on
        // even if materialization fails partway (no rollback).
        self.state.vm_saving.insert(vm_uuid.clone(), config.clone());
        self.state.vm_status.entry(vm_uuid.clone()).or_default();

        let guest_dir = Path::new(&self.state.hs_config.system_path).join(&vm_uuid);
        if let Err(err) = tokio::fs::create_dir_all(&guest_dir).await {
            let result =
                ActionResult::fail_with("vm_create", "failed to create guest folder", &err);
            self.log(&result);
            return result;
        }

        let vnc_port = self
            .state
            .vnc_port_for(&vm_uuid)
            .unwrap_or(self.state.hs_config.remote_port);
        let vmx_text =
            vmx::build_vmx(&config, &self.state.hs_config, vnc_port, self.client.ver_agent)
                .to_text();
        let vmx_path = guest_dir.join(format!("{vm_uuid}.vmx"));
        if let Err(err) = tokio::fs::write(&vmx_path, vmx_text).await {
            let result = ActionResult::fail_with("vm_create", "failed to write .vmx", &err);
            self.log(&result);
            return result;
        }

        let image = Path::new(&self.state.hs_config.images_path)
            .join(format!("{}.vmdk", config.os_name));
        let system_disk = guest_dir.join(format!("{vm_uuid}.vmdk"));
        if let Err(err) = tokio::fs::copy(&image, &system_disk).await {
            let result = ActionResult::fail_with(
                "vm_create",
                format!("failed to copy template image {}", image.display()),
                &err,
            );
            self.log(&result);
            return result;
        }

        match self
            .client
            .register(&vm_uuid, &vmx_path.to_string_lossy())
            .await
        {
            Ok(_) => {}
            Err(err) if already_registered(&err) => {}
            Err(err) => {
                let result =
                    ActionResult::fail_with("vm_create", "backend registration failed", &err);
                self.log(&result);
                return result;
            }
        }

        self.program_router_for(&config).await;

        let mut message = String::from("OK");
        if !config.hdd_all.is_empty() {
            let labels: Vec<&str> = config.hdd_all.keys().map(String::as_str).collect();
            message = format!("OK (unprovisioned data disks: {})", labels.join(", "));
            warn!(hs_name = %self.state.hs_name, vm_uuid = %vm_uuid,
                  "data disks referenced in .vmx but not provisioned");
        }

        self.persist().await;
        let result = ActionResult::ok_with("vm_create", message);
        self.log(&result);
        result
    }

    async fn guest_update(&mut self, mut config: GuestConfig) -> ActionResult {
        let vm_uuid = config.vm_uuid.clone();
        if !self.state.vm_saving.contains_key(&vm_uuid) {
            return ActionResult::fail("vm_update", "虚拟机不存在");
        }
        let password = self.vm_password();
        // Power-cycle around the overwrite; a guest that is already off
        // makes the shutdown call fail, which is fine.
        let _ = self
            .client
            .set_power(&vm_uuid, "shutdown", password.as_deref())
            .await;
        config.normalize();
        self.state.vm_saving.insert(vm_uuid.clone(), config);
        let _ = self
            .client
            .set_power(&vm_uuid, "on", password.as_deref())
            .await;

        self.persist().await;
        let result = ActionResult::ok_with(
            "vm_update",
            "configuration updated (catalog is authoritative, .vmx not regenerated)",
        );
        self.log(&result);
        result
    }

    async fn guest_delete(&mut self, vm_uuid: &str) -> ActionResult {
        let reserved_ips: Vec<String> = self
            .state
            .vm_saving
            .get(vm_uuid)
            .map(|config| {
                config
                    .nic_all
                    .values()
                    .filter(|nic| !nic.ip4_addr.is_empty())
                    .map(|nic| nic.ip4_addr.clone())
                    .collect()
            })
            .unwrap_or_default();
        let result = match self.client.unregister(vm_uuid).await {
            Ok(()) => {
                let guest_dir = Path::new(&self.state.hs_config.system_path).join(vm_uuid);
                if let Err(err) = tokio::fs::remove_dir_all(&guest_dir).await {
                    // Folder removal failure does not mask backend
                    // success; it lands in the log as its own line.
                    self.state.add_log(ActionResult::fail_with(
                        "vm_delete",
                        format!("guest folder {} left behind", guest_dir.display()),
                        &err,
                    ));
                }
                self.state.vm_saving.remove(vm_uuid);
                self.state.vm_status.remove(vm_uuid);
                self.clear_router_for(reserved_ips).await;
                self.persist().await;
                ActionResult::ok("vm_delete")
            }
            Err(err) => ActionResult::fail_with("vm_delete", err.to_string(), &err),
        };
        self.log(&result);
        result
    }

    async fn guest_power(&mut self, vm_uuid: &str, power: PowerState) -> ActionResult {
        let Some(token) = wire_token(power) else {
            let result = ActionResult::fail(
                "vm_powers",
                format!("{power:?} is not a requestable power state"),
            );
            self.log(&result);
            return result;
        };
        let password = self.vm_password();
        let result = match self
            .client
            .set_power(vm_uuid, token, password.as_deref())
            .await
        {
            Ok(value) => ActionResult::ok("vm_powers").with_results(value),
            Err(err) => ActionResult::fail_with("vm_powers", err.to_string(), &err),
        };
        if result.success {
            self.persist().await;
        }
        self.log(&result);
        result
    }

    async fn guest_console(&mut self, vm_uuid: &str) -> ActionResult {
        let Some(port) = self.state.vnc_port_for(vm_uuid) else {
            let result = ActionResult::fail("vm_console", "虚拟机不存在");
            self.log(&result);
            return result;
        };
        let host = self.vnc_host();
        let mut token_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let result = match self
            .gateway
            .add_mapping(&host, port, &hex::encode(token_bytes))
        {
            Ok(token) => {
                let url = self.gateway.console_url(&token);
                ActionResult::ok("vm_console").with_results(serde_json::json!({
                    "url": url,
                    "token": token,
                    "target": format!("{host}:{port}"),
                }))
            }
            Err(err) => ActionResult::fail_with("vm_console", "gateway mapping failed", &err),
        };
        self.log(&result);
        result
    }

    async fn guest_install(&mut self, config: GuestConfig) -> ActionResult {
        let result = ActionResult::fail(
            "vm_install",
            format!(
                "install pipeline is not available for this backend (vm_uuid={})",
                config.vm_uuid
            ),
        );
        self.log(&result);
        result
    }

    async fn scan_guests(&mut self, prefix: &str) -> ActionResult {
        let filter = if prefix.is_empty() {
            self.state.hs_config.filter_name.clone()
        } else {
            prefix.to_string()
        };
        let entries = match self.client.list_guests().await {
            Ok(entries) => entries,
            Err(err) => {
                let result =
                    ActionResult::fail_with("scan_vm", "failed to list backend guests", &err);
                self.log(&result);
                return result;
            }
        };

        let mut scanned = 0usize;
        let mut added = 0usize;
        for entry in entries {
            let vm_name = entry.name().to_string();
            if vm_name.is_empty() {
                continue;
            }
            if !filter.is_empty() && !vm_name.starts_with(filter.as_str()) {
                continue;
            }
            scanned += 1;
            if self.state.vm_saving.contains_key(&vm_name) {
                continue;
            }
            self.state
                .vm_saving
                .insert(vm_name.clone(), GuestConfig::discovered(&vm_name));
            self.state.vm_status.entry(vm_name.clone()).or_default();
            added += 1;
            self.state.add_log(
                ActionResult::ok_with("scan_vm", format!("discovered guest {vm_name}"))
                    .with_results(serde_json::json!({
                        "vm_name": vm_name,
                        "vm_id": entry.id,
                        "vm_path": entry.path,
                    })),
            );
        }

        if added > 0 {
            self.persist().await;
        }
        let result = ActionResult::ok_with(
            "scan_vm",
            format!("scanned {scanned} guests, adopted {added}"),
        )
        .with_results(serde_json::json!({
            "scanned": scanned,
            "added": added,
            "prefix_filter": filter,
        }));
        self.log(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use axum::extract::{Path as AxumPath, State};
    use axum::routing::{delete, get, post, put};
    use axum::Router;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use crate::types::NicConfig;

    #[derive(Default)]
    struct MockBackend {
        vms: Vec<(String, String)>,
        registered: Vec<(String, String)>,
        power_bodies: Vec<(String, String)>,
        deleted: Vec<String>,
    }

    type Shared = Arc<Mutex<MockBackend>>;

    async fn spawn_backend(shared: Shared) -> String {
        let app = Router::new()
            .route(
                "/api/vms",
                get(|State(shared): State<Shared>| async move {
                    let shared = shared.lock();
                    let entries: Vec<serde_json::Value> = shared
                        .vms
                        .iter()
                        .map(|(id, path)| serde_json::json!({"id": id, "path": path}))
                        .collect();
                    axum::Json(serde_json::Value::Array(entries))
                }),
            )
            .route(
                "/api/vms/registration",
                post(
                    |State(shared): State<Shared>,
                     axum::Json(body): axum::Json<serde_json::Value>| async move {
                        let name = body["name"].as_str().unwrap_or("").to_string();
                        let path = body["path"].as_str().unwrap_or("").to_string();
                        let mut shared = shared.lock();
                        let id = format!("VM{}", shared.vms.len() + 1);
                        shared.vms.push((id.clone(), path.clone()));
                        shared.registered.push((name, path));
                        axum::Json(serde_json::json!({"id": id}))
                    },
                ),
            )
            .route(
                "/api/vms/:id/power",
                put(
                    |AxumPath(id): AxumPath<String>,
                     State(shared): State<Shared>,
                     body: String| async move {
                        shared.lock().power_bodies.push((id, body));
                        axum::Json(serde_json::json!({"power_state": "poweredOn"}))
                    },
                )
                .get(|| async { axum::Json(serde_json::json!({"power_state": "poweredOn"})) }),
            )
            .route(
                "/api/vms/:id",
                delete(
                    |AxumPath(id): AxumPath<String>, State(shared): State<Shared>| async move {
                        let mut shared = shared.lock();
                        shared.vms.retain(|(vm_id, _)| vm_id != &id);
                        shared.deleted.push(id);
                        axum::http::StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(shared);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    async fn engine_for(
        backend_addr: &str,
        system_path: &std::path::Path,
        images_path: &std::path::Path,
    ) -> (Box<dyn HostEngine + Send>, tempfile::TempDir) {
        let saving = tempfile::tempdir().unwrap();
        let store = Arc::new(CatalogStore::open_memory().await.unwrap());
        let gateway = Arc::new(VncGateway::new(
            saving.path(),
            6090,
            saving.path().join("web"),
            "127.0.0.1",
        ));
        let mut config = HostConfig {
            server_type: "VMWareSetup".to_string(),
            server_addr: backend_addr.to_string(),
            server_user: "root".to_string(),
            server_pass: "secret".to_string(),
            system_path: system_path.to_string_lossy().to_string(),
            images_path: images_path.to_string_lossy().to_string(),
            remote_port: 5901,
            ..HostConfig::default()
        };
        config
            .system_maps
            .insert("windows10x64".to_string(), "windows9-64".to_string());
        let engine = new_engine(
            "h1".to_string(),
            config,
            EngineContext { store, gateway },
        );
        (engine, saving)
    }

    fn guest_g1() -> GuestConfig {
        let mut guest = GuestConfig {
            vm_uuid: "g1".to_string(),
            os_name: "windows10x64".to_string(),
            cpu_num: 4,
            mem_num: 2048,
            ..GuestConfig::default()
        };
        guest.nic_all.insert(
            "eth0".to_string(),
            NicConfig {
                ip4_addr: "192.168.1.10".to_string(),
                nic_type: "nat".to_string(),
                ..NicConfig::default()
            },
        );
        guest
    }

    #[test]
    fn test_every_request_maps_to_one_wire_token() {
        for power in PowerState::REQUESTS {
            assert!(wire_token(*power).is_some(), "{power:?} must map");
        }
        assert_eq!(wire_token(PowerState::SStart), Some("on"));
        assert_eq!(wire_token(PowerState::SClose), Some("shutdown"));
        assert_eq!(wire_token(PowerState::HClose), Some("off"));
        assert_eq!(wire_token(PowerState::SReset), Some("reset"));
        assert_eq!(wire_token(PowerState::HReset), Some("reset"));
        assert_eq!(wire_token(PowerState::APause), Some("pause"));
        assert_eq!(wire_token(PowerState::AWaked), Some("unpause"));
        assert_eq!(wire_token(PowerState::Started), None);
    }

    #[test]
    fn test_observed_state_mapping() {
        assert_eq!(observed_state("poweredOn"), PowerState::Started);
        assert_eq!(observed_state("poweredOff"), PowerState::Stopped);
        assert_eq!(observed_state("suspended"), PowerState::Suspend);
        assert_eq!(observed_state("paused"), PowerState::Suspend);
        assert_eq!(observed_state("whatever"), PowerState::Unknown);
    }

    #[tokio::test]
    async fn test_create_power_cycle_delete() {
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        let addr = spawn_backend(shared.clone()).await;
        let pool = tempfile::tempdir().unwrap();
        let system_path = pool.path().join("system");
        let images_path = pool.path().join("images");
        std::fs::create_dir_all(&system_path).unwrap();
        std::fs::create_dir_all(&images_path).unwrap();
        std::fs::write(images_path.join("windows10x64.vmdk"), b"template-bytes").unwrap();

        let (mut engine, _saving) = engine_for(&addr, &system_path, &images_path).await;

        // Create
        let result = engine.guest_create(guest_g1()).await;
        assert!(result.success, "{result:?}");
        let vmx_text =
            std::fs::read_to_string(system_path.join("g1").join("g1.vmx")).unwrap();
        assert!(vmx_text.contains("displayName = \"g1\""));
        assert!(vmx_text.contains("guestOS = \"windows9-64\""));
        assert!(vmx_text.contains("ethernet0.address = \"00:1C:c0:a8:01:0a\""));
        assert!(vmx_text.contains("ethernet0.connectionType = \"nat\""));
        let copied = std::fs::read(system_path.join("g1").join("g1.vmdk")).unwrap();
        assert_eq!(copied, b"template-bytes");
        {
            let shared = shared.lock();
            assert_eq!(shared.registered.len(), 1);
            assert_eq!(shared.registered[0].0, "g1");
        }

        // Power cycle
        let result = engine.guest_power("g1", PowerState::SStart).await;
        assert!(result.success);
        let result = engine.guest_power("g1", PowerState::SClose).await;
        assert!(result.success);
        {
            let shared = shared.lock();
            let bodies: Vec<&str> = shared
                .power_bodies
                .iter()
                .map(|(_, body)| body.as_str())
                .collect();
            assert_eq!(bodies, vec!["on", "shutdown"]);
        }

        // Delete
        let result = engine.guest_delete("g1").await;
        assert!(result.success, "{result:?}");
        assert!(!system_path.join("g1").exists());
        assert!(!engine.state().vm_saving.contains_key("g1"));
        assert_eq!(shared.lock().deleted.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_adopts_only_matching_guests() {
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        {
            let mut backend = shared.lock();
            backend.vms = vec![
                ("VM1".to_string(), "/pool/ecs_a/ecs_a.vmx".to_string()),
                ("VM2".to_string(), "/pool/ecs_b/ecs_b.vmx".to_string()),
                ("VM3".to_string(), "/pool/other/other.vmx".to_string()),
            ];
        }
        let addr = spawn_backend(shared).await;
        let pool = tempfile::tempdir().unwrap();
        let (mut engine, _saving) = engine_for(&addr, pool.path(), pool.path()).await;
        engine.state_mut().hs_config.filter_name = "ecs_".to_string();

        let result = engine.scan_guests("").await;
        assert!(result.success);
        assert_eq!(result.results["scanned"], serde_json::json!(2));
        assert_eq!(result.results["added"], serde_json::json!(2));

        let guests = &engine.state().vm_saving;
        assert_eq!(
            guests.keys().collect::<Vec<_>>(),
            vec!["ecs_a", "ecs_b"]
        );
        assert_eq!(guests["ecs_a"].cpu_num, 0);
        assert_eq!(guests["ecs_a"].vm_uuid, "ecs_a");
        assert!(guests["ecs_a"].nic_all.is_empty());

        // Adopt-only: a second scan changes nothing.
        let result = engine.scan_guests("").await;
        assert_eq!(result.results["added"], serde_json::json!(0));
        assert_eq!(engine.state().vm_saving.len(), 2);
    }

    #[tokio::test]
    async fn test_crontab_appends_filtered_status() {
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        {
            let mut backend = shared.lock();
            backend.vms = vec![
                ("VM1".to_string(), "/pool/ecs_a/ecs_a.vmx".to_string()),
                ("VM2".to_string(), "/pool/other/other.vmx".to_string()),
            ];
        }
        let addr = spawn_backend(shared).await;
        let pool = tempfile::tempdir().unwrap();
        let (mut engine, _saving) = engine_for(&addr, pool.path(), pool.path()).await;
        engine.state_mut().hs_config.filter_name = "ecs_".to_string();

        assert!(engine.crontab().await);
        assert!(engine.crontab().await);

        let state = engine.state();
        assert_eq!(state.hs_status.len(), 2);
        // The filtered-out guest never shows up.
        assert!(!state.vm_status.contains_key("other"));
        let ring = &state.vm_status["ecs_a"];
        assert_eq!(ring.len(), 2);
        // Successive idle ticks differ only in their timestamps.
        let mut first = ring[0].clone();
        let mut second = ring[1].clone();
        first.created_at = 0;
        second.created_at = 0;
        assert_eq!(first, second);
        assert_eq!(ring[0].ac_status, PowerState::Started);
    }

    #[tokio::test]
    async fn test_console_allocates_stable_ports() {
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        let addr = spawn_backend(shared).await;
        let pool = tempfile::tempdir().unwrap();
        let (mut engine, _saving) = engine_for(&addr, pool.path(), pool.path()).await;
        engine
            .state_mut()
            .vm_saving
            .insert("ecs_a".to_string(), GuestConfig::discovered("ecs_a"));
        engine
            .state_mut()
            .vm_saving
            .insert("ecs_b".to_string(), GuestConfig::discovered("ecs_b"));

        let result = engine.guest_console("ecs_b").await;
        assert!(result.success, "{result:?}");
        let url = result.results["url"].as_str().unwrap();
        assert!(url.contains("/vnc.html?"));
        assert!(url.contains("path=websockify%3Ftoken%3D"));
        // ecs_b is the second guest: remote_port + 1.
        assert_eq!(result.results["target"], serde_json::json!("127.0.0.1:5902"));

        let missing = engine.guest_console("missing").await;
        assert!(!missing.success);
        assert_eq!(missing.message, "虚拟机不存在");
    }

    #[tokio::test]
    async fn test_host_config_and_store_round_trip() {
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        let addr = spawn_backend(shared).await;
        let pool = tempfile::tempdir().unwrap();
        let (mut engine, _saving) = engine_for(&addr, pool.path(), pool.path()).await;

        let mut rotated = engine.state().hs_config.clone();
        rotated.server_pass = "rotated".to_string();
        let result = engine.host_config(rotated).await;
        assert!(result.success);
        assert_eq!(engine.state().hs_config.server_pass, "rotated");

        engine
            .state_mut()
            .vm_saving
            .insert("ecs_a".to_string(), GuestConfig::discovered("ecs_a"));
        assert!(engine.save_to_store().await);
        engine.state_mut().vm_saving.clear();
        assert!(engine.reload_from_store().await);
        assert!(engine.state().vm_saving.contains_key("ecs_a"));
    }

    #[tokio::test]
    async fn test_update_requires_existing_guest() {
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        let addr = spawn_backend(shared.clone()).await;
        let pool = tempfile::tempdir().unwrap();
        let (mut engine, _saving) = engine_for(&addr, pool.path(), pool.path()).await;

        let result = engine.guest_update(guest_g1()).await;
        assert!(!result.success);
        assert_eq!(result.message, "虚拟机不存在");

        engine
            .state_mut()
            .vm_saving
            .insert("g1".to_string(), GuestConfig::discovered("g1"));
        shared
            .lock()
            .vms
            .push(("VM1".to_string(), "/pool/g1/g1.vmx".to_string()));
        let mut updated = guest_g1();
        updated.cpu_num = 8;
        let result = engine.guest_update(updated).await;
        assert!(result.success);
        assert_eq!(engine.state().vm_saving["g1"].cpu_num, 8);
        // Power-cycled: shutdown then on.
        let bodies: Vec<String> = shared
            .lock()
            .power_bodies
            .iter()
            .map(|(_, body)| body.clone())
            .collect();
        assert_eq!(bodies, vec!["shutdown", "on"]);
    }

    #[tokio::test]
    async fn test_guest_maps_stay_consistent(){
        // HostRuntime invariant: vm_saving[u].vm_uuid == u after adoption
        // and creation paths.
        let shared: Shared = Arc::new(Mutex::new(MockBackend::default()));
        {
            shared.lock().vms = vec![("VM1".to_string(), "/pool/ecs_a/ecs_a.vmx".to_string())];
        }
        let addr = spawn_backend(shared).await;
        let pool = tempfile::tempdir().unwrap();
        let (mut engine, _saving) = engine_for(&addr, pool.path(), pool.path()).await;
        engine.scan_guests("ecs_").await;
        let state = engine.state();
        let mismatched: BTreeMap<_, _> = state
            .vm_saving
            .iter()
            .filter(|(uuid, config)| config.vm_uuid != **uuid)
            .collect();
        assert!(mismatched.is_empty());
    }
}
