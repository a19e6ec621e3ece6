//! Local hardware probe.
//!
//! Samples the controller host's CPU, memory, disk, GPU and network
//! counters into a [`HwStatus`]. Sampling is synchronous and takes about
//! one second (the CPU utilization window); async callers go through
//! `tokio::task::spawn_blocking`.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;

use sysinfo::{Components, Disks, Networks, System};

use crate::types::{HwStatus, PowerState};

const MIB: u64 = 1024 * 1024;

/// Take one hardware snapshot of the local machine.
///
/// Fields without a readable sensor (temperature, power, GPUs) come back
/// zero instead of failing: the controller keeps polling hosts whose
/// sensors are absent.
pub fn sample() -> HwStatus {
    let mut sys = System::new();
    sys.refresh_cpu_all();
    std::thread::sleep(Duration::from_secs(1));
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let mut status = HwStatus::observed(PowerState::Started);

    // CPU
    status.cpu_model = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .unwrap_or_default();
    status.cpu_total = sys.cpus().len() as u32;
    status.cpu_usage = sys.global_cpu_usage().round() as u32;
    status.cpu_temp = cpu_temperature().unwrap_or(0);
    // No portable power sensor; left zero where unavailable.
    status.cpu_power = 0;

    // Memory
    status.mem_total = sys.total_memory() / MIB;
    status.mem_usage = if status.mem_total > 0 {
        sys.used_memory() * 100 / sys.total_memory()
    } else {
        0
    };

    // Disks: the root filesystem is the system disk, everything else is
    // reported in the extra-mount map.
    let disks = Disks::new_with_refreshed_list();
    let mut ext_usage = BTreeMap::new();
    for disk in disks.list() {
        let mount = disk.mount_point().to_string_lossy().to_string();
        let total = disk.total_space() / MIB;
        let used = (disk.total_space() - disk.available_space()) / MIB;
        if mount == "/" {
            status.hdd_total = total;
            status.hdd_usage = used;
        } else {
            ext_usage.insert(mount, [total, used]);
        }
    }
    status.ext_usage = ext_usage;

    // GPUs
    let gpu_loads = gpu_loads();
    status.gpu_total = gpu_loads.len() as u32;
    status.gpu_usage = gpu_loads;

    // Cumulative network counters, MiB.
    let networks = Networks::new_with_refreshed_list();
    let (mut sent, mut received) = (0u64, 0u64);
    for (_name, data) in networks.iter() {
        sent += data.total_transmitted();
        received += data.total_received();
    }
    status.network_u = sent / MIB;
    status.network_d = received / MIB;

    status
}

/// First CPU package temperature, rounded to whole degrees.
fn cpu_temperature() -> Option<u32> {
    let components = Components::new_with_refreshed_list();
    components
        .list()
        .iter()
        .find(|component| {
            let label = component.label().to_ascii_lowercase();
            label.contains("coretemp") || label.contains("cpu")
        })
        .and_then(|component| component.temperature())
        .map(|temp| temp.round().max(0.0) as u32)
}

/// Per-GPU load via `nvidia-smi`, keyed by index. Hosts without the
/// tool (or without NVIDIA GPUs) report an empty map.
fn gpu_loads() -> BTreeMap<String, u32> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
        .output();
    let output = match output {
        Ok(output) if output.status.success() => output,
        _ => return BTreeMap::new(),
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            line.trim()
                .parse::<u32>()
                .ok()
                .map(|load| (index.to_string(), load.min(100)))
        })
        .collect()
}
