//! `.vmx` configuration emitter.
//!
//! A `.vmx` file is a flat `key = value` list, but the configuration is
//! naturally a tree (`pciBridge4.virtualDev`, `ethernet0.address`, ...).
//! The builder assembles a nested map and the emitter flattens it by
//! prefix concatenation; there are no loops in the emitter by
//! construction. String values are quoted, numbers are emitted bare.

use crate::types::{GuestConfig, HostConfig};

/// One value in the configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum VmxValue {
    Str(String),
    Num(i64),
    Map(VmxMap),
}

impl From<&str> for VmxValue {
    fn from(value: &str) -> Self {
        VmxValue::Str(value.to_string())
    }
}

impl From<String> for VmxValue {
    fn from(value: String) -> Self {
        VmxValue::Str(value)
    }
}

impl From<i64> for VmxValue {
    fn from(value: i64) -> Self {
        VmxValue::Num(value)
    }
}

impl From<VmxMap> for VmxValue {
    fn from(value: VmxMap) -> Self {
        VmxValue::Map(value)
    }
}

/// Insertion-ordered key/value tree; emission order is build order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmxMap(Vec<(String, VmxValue)>);

impl VmxMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<VmxValue>) -> &mut Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// Flatten to `.vmx` text: one `prefix.key = value` line per leaf,
    /// UTF-8, LF line endings.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.flatten_into(&mut out, "");
        out
    }

    fn flatten_into(&self, out: &mut String, prefix: &str) {
        for (key, value) in &self.0 {
            match value {
                VmxValue::Map(inner) => {
                    inner.flatten_into(out, &format!("{prefix}{key}."));
                }
                VmxValue::Str(text) => {
                    out.push_str(&format!("{prefix}{key} = \"{text}\"\n"));
                }
                VmxValue::Num(number) => {
                    out.push_str(&format!("{prefix}{key} = {number}\n"));
                }
            }
        }
    }

    /// Leaf key paths, in emission order.
    pub fn leaf_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys, "");
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<String>, prefix: &str) {
        for (key, value) in &self.0 {
            match value {
                VmxValue::Map(inner) => inner.collect_keys(keys, &format!("{prefix}{key}.")),
                _ => keys.push(format!("{prefix}{key}")),
            }
        }
    }
}

/// Build the configuration tree for one guest.
///
/// `vnc_port` is the per-guest remote display port allocated by the
/// adapter; `ver_agent` is the virtual hardware version the backend
/// understands.
pub fn build_vmx(
    guest: &GuestConfig,
    host: &HostConfig,
    vnc_port: u16,
    ver_agent: u32,
) -> VmxMap {
    let guest_os = host
        .system_maps
        .get(&guest.os_name)
        .cloned()
        .unwrap_or_else(|| guest.os_name.clone());

    let mut vmx = VmxMap::new();
    // Encoding / version headers
    vmx.set(".encoding", "GBK");
    vmx.set("config.version", "8");
    vmx.set("virtualHW.version", ver_agent.to_string());
    // Identity
    vmx.set("displayName", guest.vm_uuid.as_str());
    vmx.set("firmware", "efi");
    vmx.set("guestOS", guest_os);
    // Compute
    vmx.set("numvcpus", guest.cpu_num.to_string());
    vmx.set("cpuid.coresPerSocket", guest.cpu_num.to_string());
    vmx.set("memsize", guest.mem_num.to_string());
    vmx.set("mem.hotadd", "TRUE");
    vmx.set("mks.enable3d", "TRUE");
    vmx.set("svga.graphicsMemoryKB", (guest.gpu_mem * 1024).to_string());
    // Devices
    vmx.set("vmci0.present", "TRUE");
    vmx.set("hpet0.present", "TRUE");
    vmx.set("usb.present", "TRUE");
    vmx.set("ehci.present", "TRUE");
    vmx.set("usb_xhci.present", "TRUE");
    vmx.set("tools.syncTime", "TRUE");
    vmx.set("nvram", format!("{}.nvram", guest.vm_uuid));
    vmx.set("virtualHW.productCompatibility", "hosted");
    vmx.set("extendedConfigFile", format!("{}.vmxf", guest.vm_uuid));
    // PCI bridges: one plain, one PCIe root port with 8 functions
    let mut bridge0 = VmxMap::new();
    bridge0.set("present", "TRUE");
    vmx.set("pciBridge0", bridge0);
    let mut bridge4 = VmxMap::new();
    bridge4.set("present", "TRUE");
    bridge4.set("virtualDev", "pcieRootPort");
    bridge4.set("functions", "8");
    vmx.set("pciBridge4", bridge4);
    // System disk on NVMe
    vmx.set("nvme0.present", "TRUE");
    let mut system_disk = VmxMap::new();
    system_disk.set("fileName", format!("{}.vmdk", guest.vm_uuid));
    system_disk.set("present", "TRUE");
    vmx.set("nvme0:0", system_disk);
    // Remote display
    let mut vnc = VmxMap::new();
    vnc.set("enabled", "TRUE");
    vnc.set("port", vnc_port.to_string());
    let mut remote_display = VmxMap::new();
    remote_display.set("vnc", vnc);
    vmx.set("RemoteDisplay", remote_display);

    // NICs, numbered in map order
    for (index, nic) in guest.nic_all.values().enumerate() {
        let use_auto = nic.mac_addr.is_empty();
        let mut ethernet = VmxMap::new();
        ethernet.set("connectionType", nic.nic_type.as_str());
        ethernet.set(
            "addressType",
            if use_auto { "generated" } else { "static" },
        );
        if !use_auto {
            ethernet.set("address", nic.mac_addr.as_str());
        }
        ethernet.set("virtualDev", "e1000e");
        ethernet.set("present", "TRUE");
        ethernet.set("txbw.limit", (guest.speed_u * 1024).to_string());
        ethernet.set("rxbw.limit", (guest.speed_d * 1024).to_string());
        vmx.set(format!("ethernet{index}"), ethernet);
    }

    // Extra data disks continue the NVMe chain at 1. The referenced
    // .vmdk images are not provisioned here; the adapter reports them.
    for (offset, _disk) in guest.hdd_all.values().enumerate() {
        let index = offset + 1;
        let mut extra = VmxMap::new();
        extra.set("fileName", format!("{}-{}.vmdk", guest.vm_uuid, index));
        extra.set("present", "TRUE");
        vmx.set(format!("nvme0:{index}"), extra);
    }

    vmx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiskConfig, NicConfig};

    #[test]
    fn test_flatten_prefixes_and_quoting() {
        let mut inner = VmxMap::new();
        let mut b = VmxMap::new();
        b.set("c", "x");
        inner.set("b", b);
        inner.set("d", 1i64);
        let mut root = VmxMap::new();
        root.set("a", inner);

        assert_eq!(root.to_text(), "a.b.c = \"x\"\na.d = 1\n");
        assert_eq!(root.leaf_keys(), vec!["a.b.c", "a.d"]);
    }

    #[test]
    fn test_flatten_recovers_leaf_paths() {
        let mut vnc = VmxMap::new();
        vnc.set("enabled", "TRUE");
        vnc.set("port", "5901");
        let mut remote = VmxMap::new();
        remote.set("vnc", vnc);
        let mut root = VmxMap::new();
        root.set("RemoteDisplay", remote);

        let text = root.to_text();
        let parsed_keys: Vec<&str> = text
            .lines()
            .filter_map(|line| line.split(" = ").next())
            .collect();
        assert_eq!(parsed_keys, root.leaf_keys());
    }

    fn sample_guest() -> GuestConfig {
        let mut guest = GuestConfig {
            vm_uuid: "g1".to_string(),
            os_name: "windows10x64".to_string(),
            cpu_num: 4,
            mem_num: 2048,
            gpu_mem: 8192,
            speed_u: 100,
            speed_d: 100,
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
        guest.normalize();
        guest
    }

    fn sample_host() -> HostConfig {
        let mut host = HostConfig {
            remote_port: 5901,
            ..HostConfig::default()
        };
        host.system_maps
            .insert("windows10x64".to_string(), "windows9-64".to_string());
        host
    }

    #[test]
    fn test_build_vmx_core_lines() {
        let text = build_vmx(&sample_guest(), &sample_host(), 5901, 21).to_text();
        assert!(text.contains("displayName = \"g1\"\n"));
        assert!(text.contains("guestOS = \"windows9-64\"\n"));
        assert!(text.contains("firmware = \"efi\"\n"));
        assert!(text.contains("numvcpus = \"4\"\n"));
        assert!(text.contains("memsize = \"2048\"\n"));
        assert!(text.contains("nvme0:0.fileName = \"g1.vmdk\"\n"));
        assert!(text.contains("nvram = \"g1.nvram\"\n"));
        assert!(text.contains("pciBridge4.virtualDev = \"pcieRootPort\"\n"));
        assert!(text.contains("pciBridge4.functions = \"8\"\n"));
        assert!(text.contains("RemoteDisplay.vnc.port = \"5901\"\n"));
    }

    #[test]
    fn test_build_vmx_nic_block() {
        let text = build_vmx(&sample_guest(), &sample_host(), 5901, 21).to_text();
        assert!(text.contains("ethernet0.connectionType = \"nat\"\n"));
        assert!(text.contains("ethernet0.addressType = \"static\"\n"));
        assert!(text.contains("ethernet0.address = \"00:1C:c0:a8:01:0a\"\n"));
        assert!(text.contains("ethernet0.virtualDev = \"e1000e\"\n"));
        assert!(text.contains("ethernet0.txbw.limit = \"102400\"\n"));
        assert!(text.contains("ethernet0.rxbw.limit = \"102400\"\n"));
    }

    #[test]
    fn test_build_vmx_generated_mac_when_no_address() {
        let mut guest = sample_guest();
        guest.nic_all.get_mut("eth0").unwrap().mac_addr = String::new();
        guest.nic_all.get_mut("eth0").unwrap().ip4_addr = String::new();
        let text = build_vmx(&guest, &sample_host(), 5901, 21).to_text();
        assert!(text.contains("ethernet0.addressType = \"generated\"\n"));
        assert!(!text.contains("ethernet0.address = "));
    }

    #[test]
    fn test_build_vmx_extra_disks_start_at_one() {
        let mut guest = sample_guest();
        guest.hdd_all.insert(
            "data0".to_string(),
            DiskConfig {
                hdd_name: "data0".to_string(),
                hdd_size: 20480,
            },
        );
        guest.hdd_all.insert(
            "data1".to_string(),
            DiskConfig {
                hdd_name: "data1".to_string(),
                hdd_size: 20480,
            },
        );
        let text = build_vmx(&guest, &sample_host(), 5901, 21).to_text();
        assert!(text.contains("nvme0:1.fileName = \"g1-1.vmdk\"\n"));
        assert!(text.contains("nvme0:2.fileName = \"g1-2.vmdk\"\n"));
        assert!(!text.contains("nvme0:3."));
    }

    #[test]
    fn test_unknown_os_name_passes_through() {
        let mut guest = sample_guest();
        guest.os_name = "debian12x64".to_string();
        let text = build_vmx(&guest, &sample_host(), 5901, 21).to_text();
        assert!(text.contains("guestOS = \"debian12x64\"\n"));
    }
}
