//! OpenIDCS server binary.
//!
//! Opens the catalog, rebuilds every host adapter, brings the VNC
//! gateway up, spawns the periodic tick and serves the operator API
//! until ctrl-c; then runs the shutdown sequence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use openidcs::api::{self, ApiState};
use openidcs::catalog::CatalogStore;
use openidcs::config;
use openidcs::manager::HostManager;
use openidcs::vnc::VncGateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load(config_path.as_deref())?;
    info!(version = openidcs::VERSION, "starting openidcsd");

    let store = Arc::new(
        CatalogStore::open(Path::new(&config.saving_root).join("hostmanage.db")).await?,
    );
    let gateway = Arc::new(VncGateway::new(
        &config.saving_root,
        config.vnc_web_port,
        PathBuf::from(&config.vnc_web_root),
        config.advertise_addr.clone(),
    ));
    gateway.clone().start().await?;

    let manager = Arc::new(HostManager::new(store, gateway));
    manager.load_all().await;
    // The bootstrap tick runs inside the loop task; the API must not
    // wait for it.
    tokio::spawn(manager.clone().run_tick_loop());

    let app = api::build_router(ApiState {
        manager: manager.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "operator api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    manager.shutdown().await;
    Ok(())
}
