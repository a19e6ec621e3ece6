//! VNC console gateway.
//!
//! Fronts per-guest VNC endpoints behind a single token-addressed
//! websocket endpoint plus a static asset tree for the browser client.
//! The token map is persisted to `{saving_root}/websockify.cfg`, one
//! `token: ip:port` line per target, and rewritten from scratch on every
//! mutation so external tooling can keep reading the same file.
//!
//! The gateway runs as a supervised task owned by the controller;
//! `stop` is awaited on every controller exit path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Websocket close code sent for tokens the gateway does not know.
const CLOSE_UNKNOWN_TOKEN: u16 = 1008;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway is already running")]
    AlreadyRunning,

    #[error("gateway is not running")]
    NotRunning,
}

struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct VncGateway {
    web_port: u16,
    web_root: PathBuf,
    cfg_path: PathBuf,
    /// Address operators reach the gateway (and the controller) on.
    advertise_addr: String,
    /// token -> "ip:port"
    storage: RwLock<BTreeMap<String, String>>,
    server: Mutex<Option<ServerHandle>>,
}

impl VncGateway {
    /// Build the gateway and load any previously persisted token map.
    pub fn new(
        saving_root: impl AsRef<Path>,
        web_port: u16,
        web_root: impl Into<PathBuf>,
        advertise_addr: impl Into<String>,
    ) -> Self {
        let cfg_path = saving_root.as_ref().join("websockify.cfg");
        let gateway = Self {
            web_port,
            web_root: web_root.into(),
            cfg_path,
            advertise_addr: advertise_addr.into(),
            storage: RwLock::new(BTreeMap::new()),
            server: Mutex::new(None),
        };
        gateway.cfg_load();
        gateway
    }

    fn cfg_load(&self) {
        let Ok(text) = std::fs::read_to_string(&self.cfg_path) else {
            return;
        };
        let mut storage = self.storage.write();
        for line in text.lines() {
            if let Some((token, target)) = line.trim().split_once(": ") {
                storage.insert(token.to_string(), target.to_string());
            }
        }
    }

    fn cfg_save(&self) -> Result<(), GatewayError> {
        if let Some(parent) = self.cfg_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let storage = self.storage.read();
        let mut text = String::new();
        for (token, target) in storage.iter() {
            text.push_str(&format!("{token}: {target}\n"));
        }
        std::fs::write(&self.cfg_path, text)?;
        Ok(())
    }

    /// Map a VNC target. If the same `ip:port` is already mapped the
    /// pre-existing token is returned and the store keeps a single row
    /// for that target; otherwise the proposed token is inserted.
    pub fn add_mapping(&self, ip: &str, port: u16, token: &str) -> Result<String, GatewayError> {
        let target = format!("{ip}:{port}");
        {
            let mut storage = self.storage.write();
            if let Some((existing, _)) = storage
                .iter()
                .find(|(_, mapped)| mapped.as_str() == target)
            {
                return Ok(existing.clone());
            }
            storage.insert(token.to_string(), target);
        }
        self.cfg_save()?;
        Ok(token.to_string())
    }

    pub fn delete_mapping(&self, token: &str) -> Result<(), GatewayError> {
        let removed = self.storage.write().remove(token);
        if removed.is_some() {
            self.cfg_save()?;
        }
        Ok(())
    }

    pub fn resolve(&self, token: &str) -> Option<String> {
        self.storage.read().get(token).cloned()
    }

    /// The URL the operator opens for a mapped console.
    pub fn console_url(&self, token: &str) -> String {
        let raw_path = format!("websockify?token={token}");
        let path = urlencoding::encode(&raw_path);
        format!(
            "http://{host}:{port}/vnc.html?host={host}&port={port}&path={path}",
            host = self.advertise_addr,
            port = self.web_port,
        )
    }

    /// Bring the websocket gateway up on `web_port`.
    pub async fn start(self: Arc<Self>) -> Result<(), GatewayError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }
        let app = Router::new()
            .route("/websockify", get(websockify_handler))
            .fallback_service(ServeDir::new(&self.web_root))
            .with_state(self.clone());
        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", self.web_port)).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serving = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serving.await {
                warn!(error = %err, "vnc gateway exited with error");
            }
        });
        info!(port = self.web_port, "vnc gateway started");
        *server = Some(ServerHandle {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Take the gateway down and wait for the task to finish.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        let Some(handle) = self.server.lock().await.take() else {
            return Err(GatewayError::NotRunning);
        };
        let _ = handle.shutdown.send(());
        let _ = handle.task.await;
        info!("vnc gateway stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.server.lock().await.is_some()
    }
}

/// `GET /websockify?token=…` -> bidirectional websocket/TCP bridge.
async fn websockify_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<BTreeMap<String, String>>,
    State(gateway): State<Arc<VncGateway>>,
) -> impl IntoResponse {
    let target = params
        .get("token")
        .and_then(|token| gateway.resolve(token));
    ws.on_upgrade(move |socket| async move {
        match target {
            Some(target) => proxy_session(socket, target).await,
            None => close_unknown(socket).await,
        }
    })
}

async fn close_unknown(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNKNOWN_TOKEN,
            reason: "unknown token".into(),
        })))
        .await;
}

/// Forward frames between the operator websocket and the raw VNC TCP
/// endpoint until either side hangs up.
async fn proxy_session(socket: WebSocket, target: String) {
    let stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(vnc_target = %target, error = %err, "vnc target unreachable");
            let mut socket = socket;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNKNOWN_TOKEN,
                    reason: "target unreachable".into(),
                })))
                .await;
            return;
        }
    };
    let (mut tcp_read, mut tcp_write) = stream.into_split();
    let (mut ws_write, mut ws_read) = socket.split();

    let client_to_target = async {
        while let Some(frame) = ws_read.next().await {
            let Ok(frame) = frame else { break };
            match frame {
                Message::Binary(data) => {
                    if tcp_write.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => {
                    if tcp_write.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };
    let target_to_client = async {
        let mut buffer = vec![0u8; 16 * 1024];
        loop {
            match tcp_read.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(count) => {
                    if ws_write
                        .send(Message::Binary(buffer[..count].to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = client_to_target => {}
        _ = target_to_client => {}
    }
}
