//! WebSocket proxy layer.
//!
//! Bridges extension-originated WebSocket traffic to the automation
//! driver. Two endpoints are served:
//!
//! | Path | Plane |
//! |------|-------|
//! | `/control/websocket/<imei>_<imsi>` | control |
//! | `/browser/websocket/<imei>_<imsi>` | media |
//!
//! Text frames are forwarded to
//! [`DriverSession::receive_message_from_web_socket`]; binary frames to
//! [`DriverSession::handle`] with the per-connection context. A malformed
//! identity segment closes the socket right after the upgrade. One live
//! session exists per user id; a new registration closes the previous
//! socket, mirroring the registry replacement rule. Reconnection is
//! client-initiated only.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, info, warn};

use crate::browser::InstanceManager;
use crate::driver::{DriverContext, DriverSession};
use crate::error::Result;
use crate::identifiers::{ConnId, DeviceIdentity, Plane, UserId};

// ============================================================================
// Constants
// ============================================================================

/// Accept poll interval; bounds how long `stop()` waits on a quiet socket.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Endpoint
// ============================================================================

/// A parsed WebSocket upgrade path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    plane: Plane,
    identity: DeviceIdentity,
}

impl Endpoint {
    /// Parses `/control/websocket/<seg>` or `/browser/websocket/<seg>`.
    fn parse(path: &str) -> Result<Self> {
        let mut parts = path.trim_start_matches('/').split('/');

        let plane = match (parts.next(), parts.next()) {
            (Some("control"), Some("websocket")) => Plane::Control,
            (Some("browser"), Some("websocket")) => Plane::Media,
            _ => return Err(crate::Error::invalid_identity(path)),
        };

        match (parts.next(), parts.next()) {
            (Some(segment), None) => Ok(Self {
                plane,
                identity: DeviceIdentity::parse_path_segment(segment)?,
            }),
            _ => Err(crate::Error::invalid_identity(path)),
        }
    }
}

// ============================================================================
// WsProxy
// ============================================================================

/// One registered WebSocket session.
struct WsEntry {
    id: ConnId,
    closer: mpsc::UnboundedSender<()>,
}

/// WebSocket endpoint bootstrap and session table.
pub struct WsProxy {
    addr: SocketAddr,
    manager: Arc<InstanceManager>,
    sessions: Arc<DashMap<UserId, WsEntry>>,
    shutdown: Arc<AtomicBool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WsProxy {
    /// Creates a proxy; call [`WsProxy::start`] to begin accepting.
    #[must_use]
    pub fn new(addr: SocketAddr, manager: Arc<InstanceManager>) -> Self {
        Self {
            addr,
            manager,
            sessions: Arc::new(DashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_task: Mutex::new(None),
        }
    }

    /// Returns `true` while the accept loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.accept_task.lock().is_some()
    }

    /// Returns the number of live WebSocket sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if a session exists for this user.
    #[must_use]
    pub fn has_session(&self, user: UserId) -> bool {
        self.sessions.contains_key(&user)
    }

    /// Binds the address and starts accepting upgrades.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            warn!("WebSocket proxy already running");
            return Ok(());
        }

        let socket = TcpListener::bind(self.addr).await?;
        let local_addr = socket.local_addr()?;
        self.shutdown.store(false, Ordering::SeqCst);

        let accept = AcceptLoop {
            manager: Arc::clone(&self.manager),
            sessions: Arc::clone(&self.sessions),
            shutdown: Arc::clone(&self.shutdown),
        };
        let handle = tokio::spawn(accept.run(socket));
        *self.accept_task.lock() = Some(handle);

        info!(addr = %local_addr, "WebSocket proxy started");
        Ok(())
    }

    /// Stops accepting and closes every live session.
    pub async fn stop(&self) {
        let handle = self.accept_task.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.shutdown.store(true, Ordering::SeqCst);
        let _ = handle.await;

        for entry in self.sessions.iter() {
            let _ = entry.closer.send(());
        }
        self.sessions.clear();
        info!("WebSocket proxy stopped");
    }
}

// ============================================================================
// AcceptLoop
// ============================================================================

/// State captured by the accept task.
struct AcceptLoop {
    manager: Arc<InstanceManager>,
    sessions: Arc<DashMap<UserId, WsEntry>>,
    shutdown: Arc<AtomicBool>,
}

impl AcceptLoop {
    async fn run(self, socket: TcpListener) {
        debug!("WebSocket accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match timeout(ACCEPT_POLL, socket.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    let session_task = WsTask {
                        manager: Arc::clone(&self.manager),
                        sessions: Arc::clone(&self.sessions),
                    };
                    tokio::spawn(session_task.run(stream, peer_addr));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "WebSocket accept failed");
                }
                Err(_) => {
                    // Poll timeout; re-check the shutdown flag.
                }
            }
        }

        debug!("WebSocket accept loop terminated");
    }
}

// ============================================================================
// WsTask
// ============================================================================

/// State captured by one per-socket task.
struct WsTask {
    manager: Arc<InstanceManager>,
    sessions: Arc<DashMap<UserId, WsEntry>>,
}

impl WsTask {
    async fn run(self, stream: TcpStream, peer_addr: SocketAddr) {
        // The upgrade path is only visible to the handshake callback.
        let captured_path = Arc::new(Mutex::new(None::<String>));
        let path_slot = Arc::clone(&captured_path);

        let ws_stream = match tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| {
                *path_slot.lock() = Some(request.uri().path().to_owned());
                Ok(response)
            },
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let path = captured_path.lock().take().unwrap_or_default();
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let endpoint = match Endpoint::parse(&path) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(peer = %peer_addr, path = %path, error = %e, "Rejecting WebSocket path");
                let _ = ws_write.send(WsMessage::Close(None)).await;
                return;
            }
        };

        let user = endpoint.identity.user_id();
        let driver_session = match self.open_driver_session(user).await {
            Ok(session) => session,
            Err(e) => {
                warn!(%user, error = %e, "No driver session for WebSocket");
                let _ = ws_write.send(WsMessage::Close(None)).await;
                return;
            }
        };

        let id = ConnId::generate();
        let (close_tx, mut close_rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.sessions.insert(user, WsEntry { id, closer: close_tx }) {
            debug!(%user, "Replacing previous WebSocket session");
            let _ = previous.closer.send(());
        }

        let ctx = DriverContext {
            user,
            plane: endpoint.plane,
        };
        info!(%user, plane = %endpoint.plane, peer = %peer_addr, "WebSocket session opened");

        loop {
            tokio::select! {
                incoming = ws_read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Err(e) = driver_session
                                .receive_message_from_web_socket(text.as_str())
                                .await
                            {
                                warn!(%user, error = %e, "Driver rejected WebSocket text");
                            }
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            if let Err(e) = driver_session.handle(&ctx, &bytes).await {
                                warn!(%user, error = %e, "Driver rejected WebSocket bytes");
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if ws_write.send(WsMessage::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(%user, error = %e, "WebSocket read failed");
                            break;
                        }
                    }
                }
                _ = close_rx.recv() => {
                    let _ = ws_write.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        // Only drop the mapping if it still points at this socket; a
        // replacement already overwrote it.
        self.sessions.remove_if(&user, |_, entry| entry.id == id);
        info!(%user, "WebSocket session closed");
    }

    /// Resolves the driver session for a user, creating the browser
    /// instance when none exists yet.
    async fn open_driver_session(&self, user: UserId) -> Result<Arc<dyn DriverSession>> {
        let instance = match self.manager.get(user) {
            Some(instance) => instance,
            None => self.manager.create(user).await?,
        };
        instance
            .driver_session()
            .ok_or_else(|| crate::Error::driver("instance has no driver session"))
    }
}

// ============================================================================
// Tests
// ============================================================================
