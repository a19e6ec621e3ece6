//! Host manager.
//!
//! Process-wide registry of named adapter instances. Owns the operator
//! bearer token, rebuilds adapters from the catalog at startup, fans the
//! periodic tick out to every adapter and persists the world afterwards.
//!
//! Locking model: the name map is a synchronous `RwLock` held only to
//! look up or swap entries; each adapter sits behind its own async
//! mutex, serializing all operations against one backend instance while
//! different hosts proceed in parallel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex as SyncMutex, RwLock};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::catalog::CatalogStore;
use crate::engine::{registry, EngineContext, HostEngine};
use crate::error::ManagerError;
use crate::types::{ActionResult, GuestConfig, HostConfig, HwStatus, PowerState};
use crate::vnc::VncGateway;

/// Seconds between ticks.
pub const TICK_PERIOD: Duration = Duration::from_secs(60);

type SharedEngine = Arc<Mutex<Box<dyn HostEngine + Send>>>;

pub struct HostManager {
    engines: RwLock<BTreeMap<String, SharedEngine>>,
    logger: SyncMutex<Vec<ActionResult>>,
    bearer: SyncMutex<String>,
    saving_root: SyncMutex<String>,
    store: Arc<CatalogStore>,
    gateway: Arc<VncGateway>,
}

impl HostManager {
    pub fn new(store: Arc<CatalogStore>, gateway: Arc<VncGateway>) -> Self {
        Self {
            engines: RwLock::new(BTreeMap::new()),
            logger: SyncMutex::new(Vec::new()),
            bearer: SyncMutex::new(String::new()),
            saving_root: SyncMutex::new("./DataSaving".to_string()),
            store,
            gateway,
        }
    }

    fn engine_context(&self) -> EngineContext {
        EngineContext {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
        }
    }

    fn engine(&self, hs_name: &str) -> Option<SharedEngine> {
        self.engines.read().get(hs_name).cloned()
    }

    pub fn host_names(&self) -> Vec<String> {
        self.engines.read().keys().cloned().collect()
    }

    pub fn saving_root(&self) -> String {
        self.saving_root.lock().clone()
    }

    fn push_log(&self, log: ActionResult) {
        self.logger.lock().push(log);
    }

    // ==================== bearer ====================

    fn generate_token() -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Set the operator token, generating a random 16-hex-char one when
    /// `bearer` is empty. The token is persisted before it is returned.
    pub async fn set_bearer(&self, bearer: &str) -> Result<String, ManagerError> {
        let token = if bearer.is_empty() {
            Self::generate_token()
        } else {
            bearer.to_string()
        };
        self.store.set_bearer(&token).await?;
        *self.bearer.lock() = token.clone();
        Ok(token)
    }

    /// Constant-time token check; the empty token never verifies.
    pub fn verify_bearer(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let current = self.bearer.lock().clone();
        if current.is_empty() {
            return false;
        }
        let supplied = Sha256::digest(token.as_bytes());
        let expected = Sha256::digest(current.as_bytes());
        supplied
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    #[cfg(test)]
    pub fn bearer(&self) -> String {
        self.bearer.lock().clone()
    }

    // ==================== host lifecycle ====================

    pub async fn add_host(
        &self,
        hs_name: &str,
        hs_type: &str,
        mut config: HostConfig,
    ) -> Result<ActionResult, ManagerError> {
        if self.engines.read().contains_key(hs_name) {
            return Err(ManagerError::HostExists(hs_name.to_string()));
        }
        let Some(factory) = registry::usable_factory(hs_type) else {
            return Err(ManagerError::Unsupported(hs_type.to_string()));
        };
        config.server_type = hs_type.to_string();
        let mut engine = factory(hs_name.to_string(), config.clone(), self.engine_context());
        engine.host_create().await;
        engine.host_load().await;
        self.store.save_host_config(hs_name, &config).await?;

        let shared: SharedEngine = Arc::new(Mutex::new(engine));
        {
            let mut engines = self.engines.write();
            if engines.contains_key(hs_name) {
                return Err(ManagerError::HostExists(hs_name.to_string()));
            }
            engines.insert(hs_name.to_string(), shared);
        }
        let result = ActionResult::ok_with("add_host", format!("Host {hs_name} added"));
        self.push_log(result.clone());
        Ok(result)
    }

    pub async fn delete_host(&self, hs_name: &str) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engines.write().remove(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        // Dependent rows keyed on hs_name dangle until a rebuild ignores
        // them; only the config row goes now.
        shared.lock().await.host_unload().await;
        self.store.delete_host_config(hs_name).await?;
        let result = ActionResult::ok_with("del_host", format!("Host {hs_name} removed"));
        self.push_log(result.clone());
        Ok(result)
    }

    /// Replace a host's adapter with one built from the new config,
    /// carrying over the guest inventory, status, tasks and log. Readers
    /// observe a single swap.
    pub async fn update_host(
        &self,
        hs_name: &str,
        config: HostConfig,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let Some(factory) = registry::usable_factory(&config.server_type) else {
            return Err(ManagerError::Unsupported(config.server_type.clone()));
        };

        // Hold the old adapter's mutex across the swap so no operation
        // interleaves with the replacement.
        let mut old = shared.lock().await;
        let mut engine = factory(hs_name.to_string(), config.clone(), self.engine_context());
        {
            let preserved = old.state();
            let state = engine.state_mut();
            state.vm_saving = preserved.vm_saving.clone();
            state.vm_status = preserved.vm_status.clone();
            state.vm_tasker = preserved.vm_tasker.clone();
            state.hs_logger = preserved.hs_logger.clone();
        }
        old.host_unload().await;
        engine.host_load().await;
        self.store.save_host_config(hs_name, &config).await?;
        self.engines
            .write()
            .insert(hs_name.to_string(), Arc::new(Mutex::new(engine)));
        drop(old);

        let result = ActionResult::ok_with("set_host", format!("Host {hs_name} updated"));
        self.push_log(result.clone());
        Ok(result)
    }

    pub async fn power_host(
        &self,
        hs_name: &str,
        enable: bool,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let mut engine = shared.lock().await;
        let result = if enable {
            engine.host_load().await
        } else {
            engine.host_unload().await
        };
        Ok(result)
    }

    // ==================== persistence ====================

    /// Rebuild the world from the catalog. Individual hosts that fail to
    /// rebuild are logged and skipped; this always returns.
    pub async fn load_all(&self) {
        match self.store.global_config().await {
            Ok(global) => {
                if !global.saving.is_empty() {
                    *self.saving_root.lock() = global.saving;
                }
                *self.bearer.lock() = global.bearer;
            }
            Err(err) => warn!(error = %err, "failed to read global config"),
        }
        if self.bearer.lock().is_empty() {
            match self.set_bearer("").await {
                // The only time the token reaches the operator channel.
                Ok(token) => info!(bearer = %token, "generated operator bearer token"),
                Err(err) => error!(error = %err, "failed to persist generated bearer"),
            }
        }

        match self.store.logger(None).await {
            Ok(logs) => *self.logger.lock() = logs,
            Err(err) => warn!(error = %err, "failed to load global log"),
        }

        let configs = match self.store.all_host_configs().await {
            Ok(configs) => configs,
            Err(err) => {
                error!(error = %err, "failed to enumerate hosts");
                return;
            }
        };
        for (hs_name, config) in configs {
            let Some(factory) = registry::usable_factory(&config.server_type) else {
                warn!(hs_name = %hs_name, server_type = %config.server_type,
                      "host skipped: unknown or disabled server type");
                self.push_log(ActionResult::fail(
                    "all_load",
                    format!("host {hs_name} skipped: unsupported {}", config.server_type),
                ));
                continue;
            };
            let full = match self.store.host_full_data(&hs_name).await {
                Ok(full) => full,
                Err(err) => {
                    warn!(hs_name = %hs_name, error = %err, "host skipped: unreadable state");
                    self.push_log(ActionResult::fail(
                        "all_load",
                        format!("host {hs_name} skipped: {err}"),
                    ));
                    continue;
                }
            };
            let mut engine = factory(hs_name.clone(), config, self.engine_context());
            {
                let state = engine.state_mut();
                state.hs_status = full.hs_status;
                state.vm_saving = full.vm_saving;
                state.vm_status = full.vm_status;
                state.vm_tasker = full.vm_tasker;
                state.hs_logger = full.logs;
            }
            engine.host_load().await;
            self.engines
                .write()
                .insert(hs_name, Arc::new(Mutex::new(engine)));
        }
    }

    /// Persist the global log and every host's full state. Failures are
    /// logged and reported in the return value; in-memory state is never
    /// rolled back, the next tick retries.
    pub async fn save_all(&self) -> bool {
        let mut ok = true;
        let global_logs = self.logger.lock().clone();
        if let Err(err) = self.store.save_logger(None, &global_logs).await {
            warn!(error = %err, "failed to save global log");
            ok = false;
        }
        let engines = self.engines.read().clone();
        for (hs_name, shared) in engines {
            let engine = shared.lock().await;
            if let Err(err) = engine.state().save_to_store().await {
                warn!(hs_name = %hs_name, error = %err, "failed to save host state");
                ok = false;
            }
        }
        ok
    }

    // ==================== periodic tick ====================

    /// One tick: every adapter's poll step (independent adapters in
    /// parallel), then a full save.
    pub async fn tick(&self) -> bool {
        let engines: Vec<(String, SharedEngine)> =
            self.engines.read().clone().into_iter().collect();
        let polls = engines.into_iter().map(|(hs_name, shared)| async move {
            let ok = shared.lock().await.crontab().await;
            if !ok {
                warn!(hs_name = %hs_name, "poll step failed");
            }
            ok
        });
        let all_polled = join_all(polls).await.into_iter().all(|ok| ok);
        let saved = self.save_all().await;
        all_polled && saved
    }

    /// Tick loop: fires every 60 s, skipping (not queueing) overruns.
    /// The first tick runs immediately and asynchronously to bootstrap.
    pub async fn run_tick_loop(self: Arc<Self>) {
        let mut timer = tokio::time::interval(TICK_PERIOD);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            if !self.tick().await {
                warn!("tick completed with failures");
            }
        }
    }

    /// Shutdown sequence: unload every adapter, stop the gateway, flush
    /// a final save.
    pub async fn shutdown(&self) {
        let engines = self.engines.read().clone();
        for (_, shared) in engines {
            shared.lock().await.host_unload().await;
        }
        if let Err(err) = self.gateway.stop().await {
            warn!(error = %err, "gateway stop at shutdown");
        }
        self.save_all().await;
    }

    // ==================== delegation ====================

    pub async fn scan_host(
        &self,
        hs_name: &str,
        prefix: &str,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let prefix = prefix.to_string();
        self.detached(async move {
            let mut engine = shared.lock().await;
            Ok(engine.scan_guests(&prefix).await)
        })
        .await
    }

    pub async fn host_overview(&self) -> Vec<serde_json::Value> {
        let mut overview = Vec::new();
        let engines = self.engines.read().clone();
        for (hs_name, shared) in engines {
            let engine = shared.lock().await;
            let state = engine.state();
            overview.push(serde_json::json!({
                "hs_name": hs_name,
                "server_type": state.hs_config.server_type,
                "server_addr": state.hs_config.server_addr,
                "filter_name": state.hs_config.filter_name,
                "vm_count": state.vm_saving.len(),
                "hs_status": state.hs_status.last(),
            }));
        }
        overview
    }

    pub async fn host_detail(
        &self,
        hs_name: &str,
        with_status: bool,
        refresh: bool,
    ) -> Result<serde_json::Value, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let mut engine = shared.lock().await;
        let status = if with_status {
            Some(engine.host_status(refresh).await)
        } else {
            None
        };
        let state = engine.state();
        Ok(serde_json::json!({
            "hs_name": hs_name,
            "hs_config": state.hs_config,
            "vm_count": state.vm_saving.len(),
            "hs_status": status,
        }))
    }

    pub async fn host_status(
        &self,
        hs_name: &str,
        refresh: bool,
    ) -> Result<HwStatus, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let result = shared.lock().await.host_status(refresh).await;
        Ok(result)
    }

    pub async fn list_guests(
        &self,
        hs_name: &str,
    ) -> Result<BTreeMap<String, GuestConfig>, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let engine = shared.lock().await;
        Ok(engine.state().vm_saving.clone())
    }

    pub async fn guest_detail(
        &self,
        hs_name: &str,
        vm_uuid: &str,
    ) -> Result<serde_json::Value, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let engine = shared.lock().await;
        let Some(config) = engine.state().vm_saving.get(vm_uuid) else {
            return Err(ManagerError::GuestNotFound);
        };
        Ok(serde_json::json!({
            "vm_config": config,
            "vm_status": engine.guest_status(vm_uuid),
        }))
    }

    /// Run a mutating adapter operation detached from the caller:
    /// a client disconnect aborts the response, never the operation.
    async fn detached<F>(&self, operation: F) -> Result<ActionResult, ManagerError>
    where
        F: std::future::Future<Output = Result<ActionResult, ManagerError>> + Send + 'static,
    {
        tokio::spawn(operation)
            .await
            .map_err(|err| ManagerError::Internal(err.to_string()))?
    }

    pub async fn guest_create(
        &self,
        hs_name: &str,
        config: GuestConfig,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        self.detached(async move {
            let mut engine = shared.lock().await;
            Ok(engine.guest_create(config).await)
        })
        .await
    }

    pub async fn guest_update(
        &self,
        hs_name: &str,
        config: GuestConfig,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        self.detached(async move {
            let mut engine = shared.lock().await;
            if !engine.state().vm_saving.contains_key(&config.vm_uuid) {
                return Err(ManagerError::GuestNotFound);
            }
            Ok(engine.guest_update(config).await)
        })
        .await
    }

    pub async fn guest_delete(
        &self,
        hs_name: &str,
        vm_uuid: &str,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let vm_uuid = vm_uuid.to_string();
        self.detached(async move {
            let mut engine = shared.lock().await;
            if !engine.state().vm_saving.contains_key(&vm_uuid) {
                return Err(ManagerError::GuestNotFound);
            }
            Ok(engine.guest_delete(&vm_uuid).await)
        })
        .await
    }

    pub async fn guest_power(
        &self,
        hs_name: &str,
        vm_uuid: &str,
        power: PowerState,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let vm_uuid = vm_uuid.to_string();
        self.detached(async move {
            let mut engine = shared.lock().await;
            if !engine.state().vm_saving.contains_key(&vm_uuid) {
                return Err(ManagerError::GuestNotFound);
            }
            Ok(engine.guest_power(&vm_uuid, power).await)
        })
        .await
    }

    pub async fn guest_console(
        &self,
        hs_name: &str,
        vm_uuid: &str,
    ) -> Result<ActionResult, ManagerError> {
        let Some(shared) = self.engine(hs_name) else {
            return Err(ManagerError::HostNotFound);
        };
        let vm_uuid = vm_uuid.to_string();
        self.detached(async move {
            let mut engine = shared.lock().await;
            if !engine.state().vm_saving.contains_key(&vm_uuid) {
                return Err(ManagerError::GuestNotFound);
            }
            Ok(engine.guest_console(&vm_uuid).await)
        })
        .await
    }

    pub async fn logs(
        &self,
        hs_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>, ManagerError> {
        Ok(self.store.logs_page(hs_name, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HwStatus, TaskRecord};

    async fn manager() -> (Arc<HostManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CatalogStore::open_memory().await.unwrap());
        let gateway = Arc::new(VncGateway::new(
            dir.path(),
            6090,
            dir.path().join("web"),
            "127.0.0.1",
        ));
        (Arc::new(HostManager::new(store, gateway)), dir)
    }

    fn vmware_config() -> HostConfig {
        HostConfig {
            server_type: "VMWareSetup".to_string(),
            server_addr: "127.0.0.1:1".to_string(),
            server_user: "root".to_string(),
            server_pass: "secret".to_string(),
            ..HostConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bearer_bootstrap_from_empty_catalog() {
        let (manager, _dir) = manager().await;
        manager.load_all().await;

        let bearer = manager.bearer();
        assert_eq!(bearer.len(), 16);
        assert!(bearer.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(manager.verify_bearer(&bearer));
        assert!(!manager.verify_bearer(""));
        assert!(!manager.verify_bearer("wrong-token"));

        // Persisted alongside.
        let global = manager.store.global_config().await.unwrap();
        assert_eq!(global.bearer, bearer);
    }

    #[tokio::test]
    async fn test_set_bearer_keeps_explicit_tokens() {
        let (manager, _dir) = manager().await;
        let token = manager.set_bearer("my-operator-token").await.unwrap();
        assert_eq!(token, "my-operator-token");
        assert!(manager.verify_bearer("my-operator-token"));

        let generated = manager.set_bearer("").await.unwrap();
        assert_eq!(generated.len(), 16);
        assert!(!manager.verify_bearer("my-operator-token"));
        assert!(manager.verify_bearer(&generated));
    }

    #[tokio::test]
    async fn test_add_host_rejects_duplicates_and_disabled_types() {
        let (manager, _dir) = manager().await;
        manager
            .add_host("h1", "VMWareSetup", vmware_config())
            .await
            .unwrap();

        let err = manager
            .add_host("h1", "VMWareSetup", vmware_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::HostExists(_)));

        let err = manager
            .add_host("h2", "DockerSetup", vmware_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Unsupported(_)));
        let err = manager
            .add_host("h2", "NoSuchEngine", vmware_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Unsupported(_)));

        assert_eq!(manager.host_names(), vec!["h1"]);
    }

    #[tokio::test]
    async fn test_delete_host_removes_engine_and_row() {
        let (manager, _dir) = manager().await;
        manager
            .add_host("h1", "VMWareSetup", vmware_config())
            .await
            .unwrap();
        assert!(manager.store.host_config("h1").await.unwrap().is_some());

        manager.delete_host("h1").await.unwrap();
        assert!(manager.host_names().is_empty());
        assert!(manager.store.host_config("h1").await.unwrap().is_none());

        let err = manager.delete_host("h1").await.unwrap_err();
        assert!(matches!(err, ManagerError::HostNotFound));
    }

    #[tokio::test]
    async fn test_update_host_preserves_inventory() {
        let (manager, _dir) = manager().await;
        manager
            .add_host("h1", "VMWareSetup", vmware_config())
            .await
            .unwrap();

        // Seed three guests, status, a task and five log entries.
        let shared = manager.engine("h1").unwrap();
        let (guests_before, status_before, tasks_before, logs_before) = {
            let mut engine = shared.lock().await;
            let state = engine.state_mut();
            for uuid in ["ecs_a", "ecs_b", "ecs_c"] {
                state
                    .vm_saving
                    .insert(uuid.to_string(), GuestConfig::discovered(uuid));
                state.push_vm_status(uuid, HwStatus::observed(PowerState::Stopped));
            }
            state.vm_tasker.push(TaskRecord::default());
            state.hs_logger.clear();
            for index in 0..5 {
                state.add_log(ActionResult::ok_with("seed", format!("entry {index}")));
            }
            (
                state.vm_saving.clone(),
                state.vm_status.clone(),
                state.vm_tasker.clone(),
                state.hs_logger.clone(),
            )
        };

        let mut updated = vmware_config();
        updated.server_addr = "10.0.0.9:8697".to_string();
        manager.update_host("h1", updated).await.unwrap();

        let shared = manager.engine("h1").unwrap();
        let engine = shared.lock().await;
        let state = engine.state();
        assert_eq!(state.hs_config.server_addr, "10.0.0.9:8697");
        assert_eq!(state.vm_saving, guests_before);
        assert_eq!(state.vm_status, status_before);
        assert_eq!(state.vm_tasker, tasks_before);
        // The preserved log entries head the new adapter's log.
        assert!(state.hs_logger.len() >= logs_before.len());
        assert_eq!(&state.hs_logger[..logs_before.len()], &logs_before[..]);
    }

    #[tokio::test]
    async fn test_update_host_rejects_unknown_target() {
        let (manager, _dir) = manager().await;
        let err = manager
            .update_host("missing", vmware_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::HostNotFound));
    }

    #[tokio::test]
    async fn test_load_all_rebuilds_hosts_and_skips_bad_rows() {
        let (manager, dir) = manager().await;
        manager
            .add_host("h1", "VMWareSetup", vmware_config())
            .await
            .unwrap();
        {
            let shared = manager.engine("h1").unwrap();
            let mut engine = shared.lock().await;
            engine
                .state_mut()
                .vm_saving
                .insert("ecs_a".to_string(), GuestConfig::discovered("ecs_a"));
        }
        assert!(manager.save_all().await);

        // A row with a server type nobody implements.
        let mut orphan = vmware_config();
        orphan.server_type = "HyperVSetup".to_string();
        manager
            .store
            .save_host_config("h2", &orphan)
            .await
            .unwrap();

        // Fresh manager over the same store.
        let gateway = Arc::new(VncGateway::new(
            dir.path(),
            6090,
            dir.path().join("web"),
            "127.0.0.1",
        ));
        let rebuilt = HostManager::new(manager.store.clone(), gateway);
        rebuilt.load_all().await;
        assert_eq!(rebuilt.host_names(), vec!["h1"]);

        let shared = rebuilt.engine("h1").unwrap();
        let engine = shared.lock().await;
        assert!(engine.state().vm_saving.contains_key("ecs_a"));
    }

    #[tokio::test]
    async fn test_guest_ops_map_missing_targets() {
        let (manager, _dir) = manager().await;
        let err = manager
            .guest_power("nohost", "g1", PowerState::SStart)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::HostNotFound));

        manager
            .add_host("h1", "VMWareSetup", vmware_config())
            .await
            .unwrap();
        let err = manager
            .guest_power("h1", "g1", PowerState::SStart)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::GuestNotFound));
        let err = manager.guest_delete("h1", "g1").await.unwrap_err();
        assert!(matches!(err, ManagerError::GuestNotFound));
    }
}
