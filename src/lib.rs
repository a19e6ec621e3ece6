//! OpenIDCS - Multi-Host Virtualization Control Plane
//!
//! Manages a fleet of hypervisor hosts (VMware Workstation through its
//! REST daemon today; further backends plug into the engine registry)
//! and the guest machines on them. Operators drive it over an HTTP API;
//! an embedded router client programs DHCP reservations and port
//! forwards so provisioned guests are reachable, and a websocket
//! gateway fronts every guest's VNC console behind one port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Operator HTTP API                         │
//! │      login / hosts / guests / power / scan / console / logs     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Host Manager                            │
//! │   named adapter registry · bearer token · 60 s tick · save/load │
//! ├───────────────┬───────────────────┬─────────────────────────────┤
//! │  Host Adapter │   Host Adapter    │        VNC Gateway          │
//! │  (VMWareSetup)│   (plugged in)    │  token map · ws<->tcp proxy │
//! │  vmrest REST  │                   │  static noVNC assets        │
//! │  .vmx emitter │                   ├─────────────────────────────┤
//! │  host probe   │                   │        Router Client        │
//! │  daemon child │                   │   iKuai DHCP / DNAT rules   │
//! ├───────────────┴───────────────────┴─────────────────────────────┤
//! │                        Catalog Store                            │
//! │     SQLite: hosts · guests · status history · tasks · logs      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The catalog is the single source of truth at rest: every adapter
//! mirrors one host row plus its dependent tables, and the periodic
//! tick refreshes status and persists the world.

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod probe;
pub mod router;
pub mod types;
pub mod vmrest;
pub mod vnc;

/// Crate version, surfaced in logs and the API.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
