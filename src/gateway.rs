//! Gateway assembly.
//!
//! The [`Gateway`] owns every service object: the certificate store, one
//! listener plus two registries plus a session table plus a traffic
//! tracker per plane, the WebSocket proxy, the token store, the browser
//! lifecycle, and the instance manager. `start()` binds the listeners and
//! spawns the periodic tasks (heartbeat sweep, traffic flush, idle
//! instance cleanup); `stop()` tears everything down with a final traffic
//! flush.
//!
//! A pushed certificate update installs the new bundle and bounces both
//! TCP listeners; active connections on them are interrupted.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::{InstanceManager, Lifecycle, LinkState};
use crate::config::GatewayConfig;
use crate::driver::{AutomationDriver, DriverContext};
use crate::error::{Error, Result};
use crate::identifiers::{AppType, DeviceIdentity, NetworkType, Plane, SessionKey, UserId};
use crate::protocol::{AckStatus, FrameCodec, Message, MessageType};
use crate::session::{DeviceSession, SessionTable, TokenStore};
use crate::telemetry::{GatewayEvent, ReportSink, TrafficKey, TrafficTracker};
use crate::transport::listener::FrameHandler;
use crate::transport::{CertBundle, CertificateStore, Conn, ConnectionRegistry, Listener, WsProxy};

// ============================================================================
// PlaneServices
// ============================================================================

/// Everything the gateway keeps per transport plane.
struct PlaneServices {
    plane: Plane,
    sessions: Arc<SessionTable>,
    by_key: Arc<ConnectionRegistry<SessionKey>>,
    by_user: Arc<ConnectionRegistry<UserId>>,
    traffic: Arc<TrafficTracker>,
}

impl PlaneServices {
    fn new(plane: Plane, sink: Arc<dyn ReportSink>) -> Arc<Self> {
        Arc::new(Self {
            plane,
            sessions: Arc::new(SessionTable::new()),
            by_key: Arc::new(ConnectionRegistry::new()),
            by_user: Arc::new(ConnectionRegistry::new()),
            traffic: Arc::new(TrafficTracker::new(plane, sink)),
        })
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// The device-facing gateway.
pub struct Gateway {
    config: GatewayConfig,
    cert_store: Arc<CertificateStore>,
    tokens: Arc<TokenStore>,
    lifecycle: Arc<Lifecycle>,
    instances: Arc<InstanceManager>,
    sink: Arc<dyn ReportSink>,
    control: Arc<PlaneServices>,
    media: Arc<PlaneServices>,
    control_listener: Listener,
    media_listener: Listener,
    ws_proxy: WsProxy,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Wires up every service from the configuration and collaborators.
    ///
    /// Nothing is bound or spawned until [`Gateway::start`].
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        driver: Arc<dyn AutomationDriver>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let cert_store = Arc::new(CertificateStore::new());
        let tokens = Arc::new(TokenStore::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let instances = Arc::new(InstanceManager::new(
            Arc::clone(&lifecycle),
            Arc::clone(&driver),
        ));

        let control = PlaneServices::new(Plane::Control, Arc::clone(&sink));
        let media = PlaneServices::new(Plane::Media, Arc::clone(&sink));
        let codec = FrameCodec::new(config.byte_order, config.max_frame_length);

        let control_handler = Arc::new(GatewayHandler {
            services: Arc::clone(&control),
            tokens: Arc::clone(&tokens),
            instances: Arc::clone(&instances),
            driver: Arc::clone(&driver),
        });
        let media_handler = Arc::new(GatewayHandler {
            services: Arc::clone(&media),
            tokens: Arc::clone(&tokens),
            instances: Arc::clone(&instances),
            driver: Arc::clone(&driver),
        });

        let control_listener = Listener::new(
            Plane::Control,
            config.control_addr,
            codec,
            Arc::clone(&cert_store),
            control_handler,
            config.shutdown_drain,
        );
        let media_listener = Listener::new(
            Plane::Media,
            config.media_addr,
            codec,
            Arc::clone(&cert_store),
            media_handler,
            config.shutdown_drain,
        );
        let ws_proxy = WsProxy::new(config.ws_addr, Arc::clone(&instances));

        Self {
            config,
            cert_store,
            tokens,
            lifecycle,
            instances,
            sink,
            control,
            media,
            control_listener,
            media_listener,
            ws_proxy,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the configuration this gateway was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the token store for login-binding provisioning.
    #[inline]
    #[must_use]
    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Returns the certificate store.
    #[inline]
    #[must_use]
    pub fn cert_store(&self) -> &Arc<CertificateStore> {
        &self.cert_store
    }

    /// Returns the lifecycle service (for state-change subscriptions).
    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Returns the browser instance manager.
    #[inline]
    #[must_use]
    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    /// Returns the number of authenticated sessions on one plane.
    #[must_use]
    pub fn session_count(&self, plane: Plane) -> usize {
        self.plane_services(plane).sessions.len()
    }

    /// Returns the number of registered connections on one plane.
    #[must_use]
    pub fn registered_connections(&self, plane: Plane) -> usize {
        self.plane_services(plane).by_key.len()
    }

    /// Returns `true` while both listeners are accepting.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control_listener.is_running() && self.media_listener.is_running()
    }

    fn plane_services(&self, plane: Plane) -> &Arc<PlaneServices> {
        match plane {
            Plane::Control => &self.control,
            Plane::Media => &self.media,
        }
    }
}

// ============================================================================
// Gateway - Start / Stop
// ============================================================================

impl Gateway {
    /// Binds both listeners and the WebSocket proxy, then spawns the
    /// periodic tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if any bind fails; listeners already started
    /// are left running.
    pub async fn start(&self) -> Result<()> {
        self.control_listener.start(self.config.control_tls).await?;
        self.media_listener.start(self.config.media_tls).await?;
        self.ws_proxy.start().await?;

        let mut tasks = self.tasks.lock();
        for services in [&self.control, &self.media] {
            tasks.push(self.spawn_sweeper(services));
            tasks.push(services.traffic.spawn_flusher(self.config.flush_interval));
        }
        tasks.push(
            self.instances
                .spawn_cleanup(self.config.sweep_interval, self.config.instance_idle_ttl),
        );

        info!(
            control = %self.config.control_addr,
            media = %self.config.media_addr,
            ws = %self.config.ws_addr,
            "Gateway started"
        );
        Ok(())
    }

    /// Stops everything: listeners, proxy, periodic tasks, then a final
    /// traffic flush and full state teardown.
    pub async fn stop(&self) {
        self.control_listener.stop().await;
        self.media_listener.stop().await;
        self.ws_proxy.stop().await;

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        for services in [&self.control, &self.media] {
            services.traffic.flush_now().await;
            services.by_key.clear();
            services.by_user.clear();
            services.sessions.clear();
        }
        self.instances.clear().await;

        info!("Gateway stopped");
    }

    /// One sweeper per plane: evicted session keys also drop their
    /// session records. User-keyed registry entries share the same
    /// connection and are removed by the disconnect path.
    fn spawn_sweeper(&self, services: &Arc<PlaneServices>) -> JoinHandle<()> {
        let sessions = Arc::clone(&services.sessions);
        services.by_key.spawn_sweeper(
            self.config.sweep_interval,
            self.config.heartbeat_ttl,
            move |keys| {
                for key in keys {
                    sessions.remove(&key);
                }
            },
        )
    }
}

// ============================================================================
// Gateway - Certificate Update
// ============================================================================

impl Gateway {
    /// Installs pushed certificate material and bounces both TCP
    /// listeners so the new context takes effect.
    ///
    /// Active connections on the listeners are interrupted. A failed
    /// restart is reported and leaves that listener stopped; the previous
    /// TLS context is never kept alive alongside the new material.
    pub async fn update_certificates(
        &self,
        ca_pem: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
        key_password: impl Into<String>,
    ) {
        self.cert_store.install(CertBundle {
            ca_pem: ca_pem.into(),
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            key_password: key_password.into(),
        });

        for (listener, use_tls) in [
            (&self.control_listener, self.config.control_tls),
            (&self.media_listener, self.config.media_tls),
        ] {
            if !listener.is_running() {
                continue;
            }
            let plane = listener.plane();
            info!(%plane, "Restarting listener with new certificate material");
            listener.stop().await;
            if let Err(e) = listener.start(use_tls).await {
                error!(%plane, error = %e, "Listener restart failed after certificate update");
                self.report(GatewayEvent::ListenerRestartFailed { plane }).await;
            }
        }

        self.report(GatewayEvent::CertificateUpdated).await;
    }

    async fn report(&self, event: GatewayEvent) {
        if let Err(e) = self.sink.report_event(event).await {
            warn!(error = %e, "Event report failed");
        }
    }
}

// ============================================================================
// GatewayHandler
// ============================================================================

/// Per-plane frame handler: login, liveness, driver forwarding.
struct GatewayHandler {
    services: Arc<PlaneServices>,
    tokens: Arc<TokenStore>,
    instances: Arc<InstanceManager>,
    driver: Arc<dyn AutomationDriver>,
}

#[async_trait]
impl FrameHandler for GatewayHandler {
    async fn on_frame(
        &self,
        conn: &Conn,
        message: Message,
        frame_len: usize,
    ) -> Result<Option<Message>> {
        if let Message::Login {
            ref imei,
            ref imsi,
            ref token,
            app_type,
            ref payload,
        } = message
        {
            let ack = self
                .handle_login(conn, imei, imsi, token, app_type, payload, frame_len)
                .await?;
            return Ok(Some(ack));
        }

        let message_type = message.message_type();

        // Everything past login requires an authenticated session.
        let Some(session) = self.services.sessions.get_by_conn(conn.id()) else {
            debug!(plane = %self.services.plane, conn = %conn.id(), %message_type, "Frame before login");
            return Ok(Some(Message::ack(message_type, AckStatus::Error)));
        };

        self.touch(&session, frame_len);

        match message {
            Message::Heartbeat { timestamp } => {
                debug!(plane = %self.services.plane, session = %session.session_key(), timestamp, "Heartbeat");
                Ok(Some(Message::ack(message_type, AckStatus::Ok)))
            }
            Message::NetworkTypeUpdate { network_type } => {
                session.set_network_type(NetworkType(network_type));
                Ok(Some(Message::ack(message_type, AckStatus::Ok)))
            }
            Message::Control { payload }
            | Message::Audio { payload }
            | Message::Video { payload }
            | Message::ReturnMedia { payload }
            | Message::ReturnControl { payload } => {
                self.forward(session.user(), &payload).await?;
                Ok(Some(Message::ack(message_type, AckStatus::Ok)))
            }
            Message::Text { text } => {
                self.forward(session.user(), text.as_bytes()).await?;
                Ok(Some(Message::ack(message_type, AckStatus::Ok)))
            }
            Message::UploadFile { name, data } => {
                debug!(plane = %self.services.plane, session = %session.session_key(), name = %name, bytes = data.len(), "Upload chunk");
                self.forward(session.user(), &data).await?;
                Ok(Some(Message::ack(message_type, AckStatus::Ok)))
            }
            // Device-side acknowledgement of a pushed frame; no response.
            Message::Ack { .. } => Ok(None),
            Message::Login { .. } => unreachable!("login handled above"),
        }
    }

    async fn on_disconnect(&self, conn: &Conn) {
        let Some(session) = self.services.sessions.remove_by_conn(conn.id()) else {
            return;
        };

        self.services.by_key.remove_conn(conn);
        self.services.by_user.remove_conn(conn);

        let user = session.user();
        if let Some(instance) = self.instances.get(user) {
            instance.set_link(self.services.plane, LinkState::Disconnected);
        }
        match self.services.plane {
            Plane::Control => self.driver.on_control_disconnected(user).await,
            Plane::Media => self.driver.on_media_disconnected(user).await,
        }
        info!(plane = %self.services.plane, session = %session.session_key(), "Session ended");
    }
}

impl GatewayHandler {
    /// Authenticates a login frame and installs the session.
    ///
    /// Order matters: nothing is registered until the token check, the
    /// driver login, and the instance open have all passed, so a rejected
    /// device leaves no trace.
    #[allow(clippy::too_many_arguments)]
    async fn handle_login(
        &self,
        conn: &Conn,
        imei: &str,
        imsi: &str,
        token: &str,
        app_type: i32,
        payload: &[u8],
        frame_len: usize,
    ) -> Result<Message> {
        let identity = DeviceIdentity::new(imei, imsi)?;
        self.tokens.verify(&identity, token)?;

        let device_config = self.driver.login(payload).await?;
        let user = identity.user_id();
        let instance = self.instances.create(user).await?;

        let session = Arc::new(DeviceSession::new(
            conn.clone(),
            identity,
            AppType(app_type),
        ));
        let key = session.session_key().clone();
        self.services.sessions.insert(Arc::clone(&session));
        self.services.by_key.set(key.clone(), conn.clone());
        self.services.by_user.set(user, conn.clone());
        self.touch(&session, frame_len);

        instance.set_link(self.services.plane, LinkState::Connected);
        match self.services.plane {
            Plane::Control => self.driver.on_control_connected(user).await,
            Plane::Media => self.driver.on_media_connected(user).await,
        }

        info!(plane = %self.services.plane, session = %key, %user, "Device logged in");
        Ok(Message::ack_with_body(
            MessageType::Login,
            AckStatus::Ok,
            serde_json::to_vec(&device_config)?,
        ))
    }

    /// Heartbeat bookkeeping plus traffic accounting, on every
    /// successfully decoded post-login frame.
    fn touch(&self, session: &DeviceSession, frame_len: usize) {
        session.heartbeat();
        self.services.by_key.heartbeat(session.session_key());
        self.services.by_user.heartbeat(&session.user());
        self.instances.heartbeat(session.user());

        self.services.traffic.add_data_size(
            TrafficKey {
                identity: session.identity().clone(),
                app_type: session.app_type(),
                client_ip: session.client_ip(),
            },
            frame_len as i64,
        );
    }

    /// Hands opaque payload bytes to the user's driver session.
    async fn forward(&self, user: UserId, payload: &[u8]) -> Result<()> {
        let instance = self
            .instances
            .get(user)
            .ok_or_else(|| Error::instance_not_found(user))?;
        let driver_session = instance
            .driver_session()
            .ok_or_else(|| Error::instance_not_found(user))?;

        let ctx = DriverContext {
            user,
            plane: self.services.plane,
        };
        driver_session.handle(&ctx, payload).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverSession;
    use crate::protocol::{ByteOrder, FRAME_HEADER_LENGTH, Frame};

    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    struct RecordingSession {
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl DriverSession for RecordingSession {
        async fn handle(&self, _ctx: &DriverContext, bytes: &[u8]) -> Result<()> {
            self.payloads.lock().push(bytes.to_vec());
            Ok(())
        }

        async fn receive_message_from_web_socket(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    struct StubDriver {
        session: Arc<RecordingSession>,
    }

    impl StubDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                session: Arc::new(RecordingSession {
                    payloads: Mutex::new(Vec::new()),
                }),
            })
        }
    }

    #[async_trait]
    impl AutomationDriver for StubDriver {
        async fn login(&self, _payload: &[u8]) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"resolution": "720p"}))
        }

        async fn open_session(&self, _user: UserId) -> Result<Arc<dyn DriverSession>> {
            Ok(Arc::clone(&self.session) as Arc<dyn DriverSession>)
        }

        async fn on_control_connected(&self, _user: UserId) {}
        async fn on_control_disconnected(&self, _user: UserId) {}
        async fn on_media_connected(&self, _user: UserId) {}
        async fn on_media_disconnected(&self, _user: UserId) {}
    }

    struct NullSink;

    #[async_trait]
    impl ReportSink for NullSink {
        async fn send_traffic(&self, _plane: Plane, _batch: serde_json::Value) -> Result<()> {
            Ok(())
        }

        async fn report_event(&self, _event: GatewayEvent) -> Result<()> {
            Ok(())
        }
    }

    fn trace_init() {
        // RUST_LOG=browser_gateway=debug makes these tests narrate.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn free_addr() -> SocketAddr {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        addr
    }

    async fn started_gateway(driver: Arc<StubDriver>) -> (Arc<Gateway>, SocketAddr) {
        trace_init();
        let control_addr = free_addr().await;
        let config = GatewayConfig::default()
            .with_control_addr(control_addr)
            .with_media_addr(free_addr().await)
            .with_ws_addr(free_addr().await);

        let gateway = Arc::new(Gateway::new(config, driver, Arc::new(NullSink)));
        gateway
            .token_store()
            .bind(DeviceIdentity::new("860123", "460001").unwrap(), "secret");
        gateway.start().await.unwrap();
        (gateway, control_addr)
    }

    fn login(token: &str) -> Message {
        Message::Login {
            imei: "860123".into(),
            imsi: "460001".into(),
            token: token.into(),
            app_type: 2,
            payload: b"opaque".to_vec(),
        }
    }

    async fn send(stream: &mut TcpStream, message: &Message) {
        let bytes = FrameCodec::default().encode(message);
        stream.write_all(&bytes).await.unwrap();
    }

    async fn read_ack(stream: &mut TcpStream) -> Message {
        let codec = FrameCodec::default();
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        stream.read_exact(&mut header).await.unwrap();
        let (message_type, length) = codec.decode_header(&header).unwrap();
        let mut value = vec![0u8; length as usize];
        stream.read_exact(&mut value).await.unwrap();
        Message::from_frame(&Frame::new(message_type, value), ByteOrder::Big).unwrap()
    }

    #[tokio::test]
    async fn test_login_ack_carries_driver_config() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(Arc::clone(&driver)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &login("secret")).await;

        let ack = read_ack(&mut stream).await;
        let Message::Ack {
            acked_type,
            status,
            body,
        } = ack
        else {
            panic!("expected ACK");
        };
        assert_eq!(acked_type, MessageType::Login);
        assert_eq!(status, AckStatus::Ok);
        let config: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["resolution"], "720p");

        assert_eq!(gateway.session_count(Plane::Control), 1);
        assert_eq!(gateway.registered_connections(Plane::Control), 1);
        assert_eq!(gateway.instances().len(), 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_login_bad_token_closes_without_ack_or_registration() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(Arc::clone(&driver)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &login("wrong")).await;

        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server closed the connection")
            .unwrap();
        assert_eq!(n, 0);

        assert_eq!(gateway.session_count(Plane::Control), 0);
        assert_eq!(gateway.registered_connections(Plane::Control), 0);
        assert!(gateway.instances().is_empty());

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_control_frames_reach_driver_session() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(Arc::clone(&driver)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &login("secret")).await;
        let _ = read_ack(&mut stream).await;

        send(
            &mut stream,
            &Message::Control {
                payload: vec![9, 9, 9],
            },
        )
        .await;
        let ack = read_ack(&mut stream).await;
        assert_eq!(ack, Message::ack(MessageType::Control, AckStatus::Ok));
        assert_eq!(driver.session.payloads.lock().as_slice(), &[vec![9, 9, 9]]);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_frame_before_login_gets_error_ack() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(driver).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &Message::Heartbeat { timestamp: 1 }).await;

        let ack = read_ack(&mut stream).await;
        assert_eq!(
            ack,
            Message::ack(MessageType::Heartbeats, AckStatus::Error)
        );
        assert_eq!(gateway.session_count(Plane::Control), 0);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_removes_session_and_registration() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(driver).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &login("secret")).await;
        let _ = read_ack(&mut stream).await;
        assert_eq!(gateway.session_count(Plane::Control), 1);

        drop(stream);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while gateway.session_count(Plane::Control) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.session_count(Plane::Control), 0);
        assert_eq!(gateway.registered_connections(Plane::Control), 0);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_relogin_replaces_previous_connection() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(driver).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        send(&mut first, &login("secret")).await;
        let _ = read_ack(&mut first).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        send(&mut second, &login("secret")).await;
        let _ = read_ack(&mut second).await;

        // Replacement closes the first connection; the key stays unique.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), first.read(&mut buf))
            .await
            .expect("first connection closed")
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(gateway.registered_connections(Plane::Control), 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_stop_tears_everything_down() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(driver).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &login("secret")).await;
        let _ = read_ack(&mut stream).await;

        gateway.stop().await;

        assert!(!gateway.is_running());
        assert_eq!(gateway.session_count(Plane::Control), 0);
        assert!(gateway.instances().is_empty());
    }

    #[tokio::test]
    async fn test_certificate_update_bounces_listeners() {
        let driver = StubDriver::new();
        let (gateway, addr) = started_gateway(driver).await;
        assert!(gateway.is_running());

        gateway
            .update_certificates("ca-pem", "cert-pem", "key-pem", "")
            .await;

        // Listeners came back up on the same addresses (plaintext; the
        // bundle is not valid TLS material and TLS is off anyway).
        assert!(gateway.is_running());
        assert!(gateway.cert_store().is_ready());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &login("secret")).await;
        let ack = read_ack(&mut stream).await;
        assert!(matches!(
            ack,
            Message::Ack {
                acked_type: MessageType::Login,
                status: AckStatus::Ok,
                ..
            }
        ));

        gateway.stop().await;
    }
}
