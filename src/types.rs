//! Core value types shared by every backend adapter.
//!
//! These are plain data with structural equality. Serialization goes
//! through a stable dictionary shape; the field names are part of the
//! on-disk catalog format and must not change.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Static configuration of one backend host instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Tag into the engine registry (e.g. `"VMWareSetup"`).
    pub server_type: String,
    /// Backend daemon address, `host:port`.
    pub server_addr: String,
    pub server_user: String,
    pub server_pass: String,
    /// Guests whose name does not start with this prefix are invisible
    /// to the controller. Empty matches everything.
    pub filter_name: String,
    /// Template image pool.
    pub images_path: String,
    /// Guest folder pool.
    pub system_path: String,
    pub backup_path: String,
    pub extern_path: String,
    /// Directory holding the backend daemon binary.
    pub launch_path: String,
    pub network_nat: String,
    pub network_pub: String,
    pub i_kuai_addr: String,
    pub i_kuai_user: String,
    pub i_kuai_pass: String,
    pub ports_start: u16,
    pub ports_close: u16,
    /// Base port for per-guest VNC endpoints.
    pub remote_port: u16,
    /// Logical OS name -> backend guest-OS tag.
    pub system_maps: BTreeMap<String, String>,
    pub public_addr: Vec<String>,
    /// Open-ended backend options.
    pub extend_data: serde_json::Value,
}

impl HostConfig {
    /// Field names recognized on catalog reload; anything else in a
    /// stored row is logged and skipped (forward compatibility).
    pub const FIELDS: &'static [&'static str] = &[
        "server_type",
        "server_addr",
        "server_user",
        "server_pass",
        "filter_name",
        "images_path",
        "system_path",
        "backup_path",
        "extern_path",
        "launch_path",
        "network_nat",
        "network_pub",
        "i_kuai_addr",
        "i_kuai_user",
        "i_kuai_pass",
        "ports_start",
        "ports_close",
        "remote_port",
        "system_maps",
        "public_addr",
        "extend_data",
    ];
}

/// Desired state of one guest.
///
/// `vm_uuid` is the identity: unique within a host, also used as the
/// display name and as the guest folder name on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuestConfig {
    pub vm_uuid: String,
    /// Key into [`HostConfig::system_maps`].
    pub os_name: String,
    // Compute
    pub cpu_num: u32,
    pub cpu_per: u32,
    pub gpu_num: u32,
    /// Video memory, MiB.
    pub gpu_mem: u64,
    /// Memory, MiB.
    pub mem_num: u64,
    /// System disk, MiB.
    pub hdd_num: u64,
    // Network
    /// Uplink bandwidth, Mbit/s.
    pub speed_u: u64,
    /// Downlink bandwidth, Mbit/s.
    pub speed_d: u64,
    /// Traffic quota, Mbit. Zero means not allocated.
    pub flu_num: u64,
    /// Forwarded-port quota.
    pub nat_num: u32,
    /// Proxy quota.
    pub web_num: u32,
    // Collections (ordered: the map order drives device numbering)
    pub nic_all: BTreeMap<String, NicConfig>,
    pub hdd_all: BTreeMap<String, DiskConfig>,
}

impl GuestConfig {
    pub const FIELDS: &'static [&'static str] = &[
        "vm_uuid", "os_name", "cpu_num", "cpu_per", "gpu_num", "gpu_mem", "mem_num", "hdd_num",
        "speed_u", "speed_d", "flu_num", "nat_num", "web_num", "nic_all", "hdd_all",
    ];

    /// Placeholder config for a guest discovered on the backend but not
    /// yet catalogued: identity set, all resources zeroed.
    pub fn discovered(vm_uuid: impl Into<String>) -> Self {
        Self {
            vm_uuid: vm_uuid.into(),
            ..Self::default()
        }
    }

    /// Apply construction-time invariants: every NIC without a MAC gets
    /// one derived from its IPv4 address.
    pub fn normalize(&mut self) {
        for nic in self.nic_all.values_mut() {
            nic.ensure_mac();
        }
    }
}

/// One virtual NIC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NicConfig {
    pub mac_addr: String,
    /// `"nat"`, `"bridged"`, ...
    pub nic_type: String,
    pub ip4_addr: String,
    pub ip6_addr: String,
}

impl NicConfig {
    /// Derive the MAC from `ip4_addr` if `mac_addr` is empty.
    ///
    /// The four IPv4 octets become the last four MAC octets; the first
    /// two are fixed per address family so the guest agent can recover
    /// its IP from the interface MAC. Deterministic: same IPv4, same MAC.
    pub fn ensure_mac(&mut self) {
        if self.mac_addr.is_empty() && !self.ip4_addr.is_empty() {
            if let Some(mac) = derive_mac(&self.ip4_addr) {
                self.mac_addr = mac;
            }
        }
    }
}

/// MAC vendor prefix keyed on the IPv4 prefix.
fn mac_prefix(ip4: &str) -> &'static str {
    if ip4.starts_with("192.") {
        "00:1C"
    } else if ip4.starts_with("172.") {
        "CC:D9"
    } else if ip4.starts_with("100.") {
        "00:1E"
    } else if ip4.starts_with("10.") {
        "10:F6"
    } else {
        "00:00"
    }
}

/// `a.b.c.d` -> `PP:PP:aa:bb:cc:dd`. Returns `None` when the address is
/// not a dotted quad.
pub fn derive_mac(ip4: &str) -> Option<String> {
    let octets: Vec<u8> = ip4
        .split('.')
        .map(|part| part.parse::<u8>().ok())
        .collect::<Option<Vec<_>>>()?;
    if octets.len() != 4 {
        return None;
    }
    Some(format!(
        "{}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac_prefix(ip4),
        octets[0],
        octets[1],
        octets[2],
        octets[3]
    ))
}

/// One extra data disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConfig {
    pub hdd_name: String,
    /// MiB.
    pub hdd_size: u64,
}

/// Power state: requested actions (`S_*`, `H_*`, `A_*`) and observed
/// states (`STARTED`..`UNKNOWN`). The mapping to backend wire tokens is
/// adapter-local.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    // Requested
    SStart,
    SClose,
    SReset,
    HClose,
    HReset,
    APause,
    AWaked,
    // Observed
    Started,
    Stopped,
    Suspend,
    #[default]
    Unknown,
}

impl PowerState {
    /// All requestable actions, in a stable order.
    pub const REQUESTS: &'static [PowerState] = &[
        PowerState::SStart,
        PowerState::SClose,
        PowerState::SReset,
        PowerState::HClose,
        PowerState::HReset,
        PowerState::APause,
        PowerState::AWaked,
    ];

    /// Whether this is a requestable action (as opposed to an observed
    /// state).
    pub fn is_request(self) -> bool {
        Self::REQUESTS.contains(&self)
    }
}

/// Snapshot of one machine's hardware state.
///
/// Sizes are MiB, rates are percent, network counters are cumulative
/// MiB since boot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwStatus {
    pub ac_status: PowerState,
    pub cpu_model: String,
    pub cpu_total: u32,
    pub cpu_usage: u32,
    pub cpu_temp: u32,
    pub cpu_power: u32,
    pub mem_total: u64,
    pub mem_usage: u64,
    pub hdd_total: u64,
    pub hdd_usage: u64,
    /// Extra mounts: mount point -> [total, used] MiB.
    pub ext_usage: BTreeMap<String, [u64; 2]>,
    pub gpu_total: u32,
    /// GPU id -> load percent.
    pub gpu_usage: BTreeMap<String, u32>,
    pub network_u: u64,
    pub network_d: u64,
    /// Unix seconds at sampling time.
    pub created_at: i64,
}

impl HwStatus {
    /// An empty snapshot carrying only an observed power state, stamped
    /// now. Used for guests whose resources are not probed directly.
    pub fn observed(ac_status: PowerState) -> Self {
        Self {
            ac_status,
            created_at: chrono::Utc::now().timestamp(),
            ..Self::default()
        }
    }
}

/// Uniform outcome of every adapter operation.
///
/// Adapters never fail across their boundary: errors are folded into
/// `success == false` with the originating wire error in `execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionResult {
    pub success: bool,
    pub actions: String,
    pub message: String,
    pub results: serde_json::Value,
    pub execute: Option<String>,
}

impl ActionResult {
    pub fn ok(actions: impl Into<String>) -> Self {
        Self {
            success: true,
            actions: actions.into(),
            message: "OK".to_string(),
            ..Self::default()
        }
    }

    pub fn ok_with(actions: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            actions: actions.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn fail(actions: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            actions: actions.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn fail_with(
        actions: impl Into<String>,
        message: impl Into<String>,
        execute: &dyn fmt::Display,
    ) -> Self {
        Self {
            success: false,
            actions: actions.into(),
            message: message.into(),
            execute: Some(execute.to_string()),
            ..Self::default()
        }
    }

    pub fn with_results(mut self, results: serde_json::Value) -> Self {
        self.results = results;
        self
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "ActionResult(actions={})", self.actions),
        }
    }
}

/// Long-running operation descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRecord {
    /// Opaque task payload.
    pub process: serde_json::Value,
    pub success: bool,
    pub results: i64,
    pub message: Option<ActionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_derivation_is_deterministic() {
        for ip in ["192.168.1.10", "172.16.0.3", "10.1.9.101", "100.64.0.7"] {
            let a = derive_mac(ip).unwrap();
            let b = derive_mac(ip).unwrap();
            assert_eq!(a, b, "same IPv4 must give the same MAC");
        }
    }

    #[test]
    fn test_mac_prefix_table() {
        assert_eq!(derive_mac("192.168.1.10").unwrap(), "00:1C:c0:a8:01:0a");
        assert_eq!(derive_mac("172.16.0.3").unwrap(), "CC:D9:ac:10:00:03");
        assert_eq!(derive_mac("10.1.9.101").unwrap(), "10:F6:0a:01:09:65");
        assert_eq!(derive_mac("100.64.0.7").unwrap(), "00:1E:64:40:00:07");
        assert_eq!(derive_mac("8.8.8.8").unwrap(), "00:00:08:08:08:08");
    }

    #[test]
    fn test_mac_derivation_rejects_garbage() {
        assert_eq!(derive_mac(""), None);
        assert_eq!(derive_mac("not-an-ip"), None);
        assert_eq!(derive_mac("10.0.0"), None);
        assert_eq!(derive_mac("10.0.0.300"), None);
    }

    #[test]
    fn test_nic_keeps_explicit_mac() {
        let mut nic = NicConfig {
            mac_addr: "00:22:33:44:55:66".to_string(),
            ip4_addr: "192.168.1.10".to_string(),
            ..NicConfig::default()
        };
        nic.ensure_mac();
        assert_eq!(nic.mac_addr, "00:22:33:44:55:66");
    }

    #[test]
    fn test_power_state_serializes_as_wire_names() {
        let json = serde_json::to_string(&PowerState::SStart).unwrap();
        assert_eq!(json, "\"S_START\"");
        let json = serde_json::to_string(&PowerState::AWaked).unwrap();
        assert_eq!(json, "\"A_WAKED\"");
        let back: PowerState = serde_json::from_str("\"SUSPEND\"").unwrap();
        assert_eq!(back, PowerState::Suspend);
    }

    #[test]
    fn test_guest_config_round_trip() {
        let mut guest = GuestConfig {
            vm_uuid: "ecs_testvm".to_string(),
            os_name: "windows10x64".to_string(),
            cpu_num: 4,
            mem_num: 4096,
            hdd_num: 10240,
            gpu_mem: 8192,
            speed_u: 100,
            speed_d: 100,
            flu_num: 100,
            nat_num: 100,
            web_num: 100,
            ..GuestConfig::default()
        };
        guest.nic_all.insert(
            "ethernet0".to_string(),
            NicConfig {
                ip4_addr: "192.168.4.101".to_string(),
                nic_type: "nat".to_string(),
                ..NicConfig::default()
            },
        );
        guest.hdd_all.insert(
            "data0".to_string(),
            DiskConfig {
                hdd_name: "data0".to_string(),
                hdd_size: 20480,
            },
        );
        guest.normalize();

        let json = serde_json::to_string(&guest).unwrap();
        let back: GuestConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, guest);
        assert_eq!(back.nic_all["ethernet0"].mac_addr, "00:1C:c0:a8:04:65");
    }

    #[test]
    fn test_host_config_round_trip() {
        let mut host = HostConfig {
            server_type: "VMWareSetup".to_string(),
            server_addr: "localhost:8697".to_string(),
            server_user: "root".to_string(),
            server_pass: "secret".to_string(),
            filter_name: "ecs_".to_string(),
            images_path: "/srv/images".to_string(),
            system_path: "/srv/system".to_string(),
            remote_port: 5901,
            ports_start: 20000,
            ports_close: 30000,
            public_addr: vec!["42.42.42.42".to_string()],
            ..HostConfig::default()
        };
        host.system_maps
            .insert("windows10x64".to_string(), "windows9-64".to_string());

        let json = serde_json::to_string(&host).unwrap();
        let back: HostConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn test_unknown_fields_rejected_on_ingestion() {
        let body = r#"{"vm_uuid":"g1","no_such_field":1}"#;
        assert!(serde_json::from_str::<GuestConfig>(body).is_err());
    }

    #[test]
    fn test_action_result_execute_serializes_textual() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let result = ActionResult::fail_with("vm_create", "copy failed", &err);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["execute"], serde_json::json!("boom"));
        assert_eq!(value["success"], serde_json::json!(false));

        let ok = ActionResult::ok("vm_create");
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["execute"], serde_json::Value::Null);
    }
}
