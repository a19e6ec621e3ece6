//! Backend adapter abstraction.
//!
//! A host adapter ("engine") drives one kind of virtualization backend
//! through a uniform operation surface. Each adapter owns the runtime
//! state of its host: effective configuration, status history, the
//! mirror of managed guests, tasks and the operation log. The manager
//! only ever talks to `dyn HostEngine`; backend selection happens in the
//! registry.

pub mod registry;
pub mod vmware;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{CatalogStore, StoreError};
use crate::probe;
use crate::types::{ActionResult, GuestConfig, HostConfig, HwStatus, PowerState, TaskRecord};
use crate::vnc::VncGateway;

/// Bound of the status history rings: 24 hours at one-minute ticks.
pub const STATUS_RING_CAP: usize = 1440;

/// Shared construction context handed to every adapter factory.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<CatalogStore>,
    pub gateway: Arc<VncGateway>,
}

/// Runtime state every adapter owns, mirroring one catalog host.
pub struct HostState {
    pub hs_name: String,
    pub hs_config: HostConfig,
    /// Host status ring, newest last.
    pub hs_status: Vec<HwStatus>,
    /// Managed guests, keyed (and ordered) by `vm_uuid`.
    pub vm_saving: BTreeMap<String, GuestConfig>,
    /// Per-guest status rings, newest last.
    pub vm_status: BTreeMap<String, Vec<HwStatus>>,
    pub vm_tasker: Vec<TaskRecord>,
    pub hs_logger: Vec<ActionResult>,
    pub store: Arc<CatalogStore>,
}

impl HostState {
    pub fn new(hs_name: impl Into<String>, hs_config: HostConfig, store: Arc<CatalogStore>) -> Self {
        Self {
            hs_name: hs_name.into(),
            hs_config,
            hs_status: Vec::new(),
            vm_saving: BTreeMap::new(),
            vm_status: BTreeMap::new(),
            vm_tasker: Vec::new(),
            hs_logger: Vec::new(),
            store,
        }
    }

    /// Append to the host status ring, evicting the oldest entry past
    /// the ring bound.
    pub fn push_hs_status(&mut self, status: HwStatus) {
        self.hs_status.push(status);
        if self.hs_status.len() > STATUS_RING_CAP {
            let excess = self.hs_status.len() - STATUS_RING_CAP;
            self.hs_status.drain(..excess);
        }
    }

    /// Append to one guest's status ring, bounded like the host ring.
    pub fn push_vm_status(&mut self, vm_uuid: &str, status: HwStatus) {
        let ring = self.vm_status.entry(vm_uuid.to_string()).or_default();
        ring.push(status);
        if ring.len() > STATUS_RING_CAP {
            let excess = ring.len() - STATUS_RING_CAP;
            ring.drain(..excess);
        }
    }

    /// Append an operation outcome to the adapter log.
    pub fn add_log(&mut self, log: ActionResult) {
        self.hs_logger.push(log);
    }

    /// VNC display port for one guest: `remote_port + i` where `i` is
    /// the guest's position in the ordered guest map. Stable across
    /// restarts as long as the guest set keeps its order.
    pub fn vnc_port_for(&self, vm_uuid: &str) -> Option<u16> {
        self.vm_saving
            .keys()
            .position(|uuid| uuid == vm_uuid)
            .map(|index| self.hs_config.remote_port.wrapping_add(index as u16))
    }

    /// Persist the full host state: configuration plus every list table
    /// scoped to this host. Each list is its own statement; the save is
    /// not atomic across tables.
    pub async fn save_to_store(&self) -> Result<(), StoreError> {
        self.store
            .save_host_config(&self.hs_name, &self.hs_config)
            .await?;
        self.store
            .save_hs_status(&self.hs_name, &self.hs_status)
            .await?;
        self.store
            .save_vm_saving(&self.hs_name, &self.vm_saving)
            .await?;
        self.store
            .save_vm_status(&self.hs_name, &self.vm_status)
            .await?;
        self.store
            .save_vm_tasker(&self.hs_name, &self.vm_tasker)
            .await?;
        self.store
            .save_logger(Some(&self.hs_name), &self.hs_logger)
            .await?;
        Ok(())
    }

    /// Re-read guest configuration and status from the catalog,
    /// replacing the in-memory mirrors.
    pub async fn reload_from_store(&mut self) -> Result<(), StoreError> {
        self.vm_saving = self.store.vm_saving(&self.hs_name).await?;
        self.vm_status = self.store.vm_status(&self.hs_name).await?;
        Ok(())
    }
}

/// The uniform operation surface every backend adapter implements.
///
/// Operations never fail across this boundary: outcomes are folded into
/// [`ActionResult`] and appended to the adapter log before returning.
#[async_trait]
pub trait HostEngine: Send + Sync {
    fn state(&self) -> &HostState;
    fn state_mut(&mut self) -> &mut HostState;

    // Host lifecycle
    async fn host_create(&mut self) -> ActionResult;
    async fn host_delete(&mut self) -> ActionResult;
    async fn host_load(&mut self) -> ActionResult;
    async fn host_unload(&mut self) -> ActionResult;
    async fn host_action(&mut self, action: &str) -> ActionResult;

    /// Replace the effective host configuration in place. The manager's
    /// update path rebuilds the whole adapter instead; this is for
    /// config-only adjustments on a live adapter.
    async fn host_config(&mut self, config: HostConfig) -> ActionResult {
        self.state_mut().hs_config = config;
        let result = ActionResult::ok("hs_config");
        self.state_mut().add_log(result.clone());
        result
    }

    /// Persist this host's full state to the catalog.
    async fn save_to_store(&self) -> bool {
        self.state().save_to_store().await.is_ok()
    }

    /// Re-read guest configuration and status from the catalog.
    async fn reload_from_store(&mut self) -> bool {
        self.state_mut().reload_from_store().await.is_ok()
    }

    /// Latest host hardware sample. Serves the cached ring unless
    /// `refresh` forces a synchronous probe.
    async fn host_status(&mut self, refresh: bool) -> HwStatus {
        if refresh || self.state().hs_status.is_empty() {
            if let Ok(status) = tokio::task::spawn_blocking(probe::sample).await {
                self.state_mut().push_hs_status(status);
            }
        }
        self.state().hs_status.last().cloned().unwrap_or_default()
    }

    /// The poll step: refresh the host sample and every visible guest's
    /// observed power state. Returns false when the backend was
    /// unreachable.
    async fn crontab(&mut self) -> bool;

    // Guest lifecycle
    async fn guest_create(&mut self, config: GuestConfig) -> ActionResult;
    async fn guest_update(&mut self, config: GuestConfig) -> ActionResult;
    async fn guest_delete(&mut self, vm_uuid: &str) -> ActionResult;
    async fn guest_power(&mut self, vm_uuid: &str, power: PowerState) -> ActionResult;
    async fn guest_console(&mut self, vm_uuid: &str) -> ActionResult;
    async fn guest_install(&mut self, config: GuestConfig) -> ActionResult;

    /// Status rings: one guest when `select` is non-empty (an unknown
    /// guest reports a single empty snapshot), otherwise all guests.
    fn guest_status(&self, select: &str) -> BTreeMap<String, Vec<HwStatus>> {
        if !select.is_empty() {
            let ring = self
                .state()
                .vm_status
                .get(select)
                .cloned()
                .unwrap_or_else(|| vec![HwStatus::default()]);
            return BTreeMap::from([(select.to_string(), ring)]);
        }
        self.state().vm_status.clone()
    }

    /// Adopt backend guests matching the prefix (the host's
    /// `filter_name` when `prefix` is empty) that are not yet
    /// catalogued. Adoption only; never removes.
    async fn scan_guests(&mut self, prefix: &str) -> ActionResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PowerState;

    async fn state() -> HostState {
        let store = Arc::new(CatalogStore::open_memory().await.unwrap());
        HostState::new("host1", HostConfig::default(), store)
    }

    #[tokio::test]
    async fn test_status_rings_are_bounded() {
        let mut state = state().await;
        for _ in 0..(STATUS_RING_CAP + 5) {
            state.push_hs_status(HwStatus::observed(PowerState::Started));
            state.push_vm_status("g1", HwStatus::observed(PowerState::Stopped));
        }
        assert_eq!(state.hs_status.len(), STATUS_RING_CAP);
        assert_eq!(state.vm_status["g1"].len(), STATUS_RING_CAP);
    }

    #[tokio::test]
    async fn test_vnc_ports_follow_guest_order() {
        let mut state = state().await;
        state.hs_config.remote_port = 5901;
        for uuid in ["ecs_a", "ecs_c", "ecs_b"] {
            state
                .vm_saving
                .insert(uuid.to_string(), GuestConfig::discovered(uuid));
        }
        // BTreeMap order: ecs_a, ecs_b, ecs_c
        assert_eq!(state.vnc_port_for("ecs_a"), Some(5901));
        assert_eq!(state.vnc_port_for("ecs_b"), Some(5902));
        assert_eq!(state.vnc_port_for("ecs_c"), Some(5903));
        assert_eq!(state.vnc_port_for("missing"), None);
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let mut state = state().await;
        state
            .vm_saving
            .insert("ecs_a".to_string(), GuestConfig::discovered("ecs_a"));
        state.push_vm_status("ecs_a", HwStatus::observed(PowerState::Started));
        state.add_log(ActionResult::ok("vm_create"));
        state.save_to_store().await.unwrap();

        state.vm_saving.clear();
        state.vm_status.clear();
        state.reload_from_store().await.unwrap();
        assert!(state.vm_saving.contains_key("ecs_a"));
        assert_eq!(state.vm_status["ecs_a"].len(), 1);
    }
}
