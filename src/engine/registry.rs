//! Engine registry.
//!
//! The static table mapping `server_type` tags to adapter factories and
//! capability metadata. The manager knows nothing about any specific
//! backend: adding one means adding a row here. Entries without a
//! factory (or with `is_enable == false`) are advertised but rejected by
//! `AddHost`.

use super::{EngineContext, HostEngine};
use crate::types::HostConfig;

/// Builds one adapter instance for a named host.
pub type EngineFactory =
    fn(hs_name: String, config: HostConfig, context: EngineContext) -> Box<dyn HostEngine + Send>;

/// One backend kind.
pub struct EngineInfo {
    pub server_type: &'static str,
    pub descript: &'static str,
    pub is_enable: bool,
    pub is_remote: bool,
    pub platform: &'static [&'static str],
    pub cpu_arch: &'static [&'static str],
    /// Backend-specific knobs: name -> description.
    pub optional: &'static [(&'static str, &'static str)],
    /// Logical OS name -> backend guest-OS tag defaults.
    pub system_os: &'static [(&'static str, &'static str)],
    pub messages: &'static str,
    pub factory: Option<EngineFactory>,
}

impl EngineInfo {
    pub fn usable(&self) -> bool {
        self.is_enable && self.factory.is_some()
    }
}

/// The registry itself. Immutable after startup by construction.
pub static ENGINES: &[EngineInfo] = &[
    EngineInfo {
        server_type: "VMWareSetup",
        descript: "VMWare Workstation",
        is_enable: true,
        is_remote: false,
        platform: &["Windows"],
        cpu_arch: &["x86_64"],
        optional: &[(
            "vm_password",
            "Encryption password forwarded to the power endpoint",
        )],
        system_os: &[("Windows 10 x64", "windows9-64")],
        messages: "",
        factory: Some(super::vmware::new_engine),
    },
    EngineInfo {
        server_type: "HyperVSetup",
        descript: "Win HyperV Platform",
        is_enable: false,
        is_remote: false,
        platform: &["Windows"],
        cpu_arch: &["x86_64"],
        optional: &[],
        system_os: &[],
        messages: "Uplink and downlink limits share one value on this backend",
        factory: None,
    },
    EngineInfo {
        server_type: "PromoxSetup",
        descript: "PVE Runtime Platform",
        is_enable: false,
        is_remote: true,
        platform: &["Linux", "Windows"],
        cpu_arch: &["x86_64", "aarch64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "VirtualBoxs",
        descript: "VirtualBox Runtime",
        is_enable: false,
        is_remote: false,
        platform: &["Linux", "Windows"],
        cpu_arch: &["x86_64", "aarch64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "vSphereESXi",
        descript: "vSphere ESXi Runtime",
        is_enable: false,
        is_remote: true,
        platform: &["Linux", "Windows"],
        cpu_arch: &["x86_64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "MemuAndroid",
        descript: "XYAndroid Simulator",
        is_enable: false,
        is_remote: false,
        platform: &["Windows"],
        cpu_arch: &["x86_64"],
        optional: &[
            ("graphics_render_mode", "Render mode (1: DirectX, 0: OpenGL)"),
            ("enable_su", "Start with superuser rights"),
            ("enable_audio", "Enable audio"),
            ("fps", "Frame rate"),
        ],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "LxContainer",
        descript: "Linux Container App",
        is_enable: false,
        is_remote: false,
        platform: &["Linux"],
        cpu_arch: &["x86_64", "aarch64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "DockerSetup",
        descript: "Docker Runtime Host",
        is_enable: false,
        is_remote: true,
        platform: &["Linux", "Windows", "MacOS"],
        cpu_arch: &["x86_64", "aarch64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "PodmanSetup",
        descript: "Podman Runtime Host",
        is_enable: false,
        is_remote: true,
        platform: &["Linux", "Windows", "MacOS"],
        cpu_arch: &["x86_64", "aarch64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
    EngineInfo {
        server_type: "MacOSFusion",
        descript: "VMware Fusion Pro Mac",
        is_enable: false,
        is_remote: false,
        platform: &["MacOS"],
        cpu_arch: &["x86_64", "aarch64"],
        optional: &[],
        system_os: &[],
        messages: "",
        factory: None,
    },
];

/// Look up one backend kind by tag.
pub fn lookup(server_type: &str) -> Option<&'static EngineInfo> {
    ENGINES.iter().find(|info| info.server_type == server_type)
}

/// The factory for a tag, but only when the backend is enabled.
pub fn usable_factory(server_type: &str) -> Option<EngineFactory> {
    lookup(server_type)
        .filter(|info| info.is_enable)
        .and_then(|info| info.factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vmware_is_the_only_usable_backend() {
        let usable: Vec<&str> = ENGINES
            .iter()
            .filter(|info| info.usable())
            .map(|info| info.server_type)
            .collect();
        assert_eq!(usable, vec!["VMWareSetup"]);
    }

    #[test]
    fn test_lookup_finds_known_tags() {
        assert!(lookup("VMWareSetup").is_some());
        assert!(lookup("DockerSetup").is_some());
        assert!(!lookup("DockerSetup").unwrap().usable());
        assert!(lookup("NoSuchEngine").is_none());
    }

    #[test]
    fn test_tags_are_unique() {
        let mut tags: Vec<&str> = ENGINES.iter().map(|info| info.server_type).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), ENGINES.len());
    }
}
