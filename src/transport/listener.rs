//! Generic TCP listener shell.
//!
//! One [`Listener`] serves one transport plane. It binds the address,
//! optionally wraps accepted sockets in TLS from the certificate store,
//! and runs the frame pipeline per connection:
//!
//! ```text
//! accept -> [TLS] -> header read -> bounds check -> value read
//!        -> Message decode -> FrameHandler -> ACK encode -> write queue
//! ```
//!
//! Each connection is served by its own task, so frames on one connection
//! are processed strictly in arrival order. `stop()` closes the accept
//! socket, then waits a bounded interval for in-flight connections to
//! drain; connections still alive after the bound are left to finish on
//! their own.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::identifiers::Plane;
use crate::protocol::{FRAME_HEADER_LENGTH, Frame, FrameCodec, Message};
use crate::transport::conn::{Conn, ConnCommand};
use crate::transport::tls::CertificateStore;

// ============================================================================
// Constants
// ============================================================================

/// Accept poll interval; bounds how long `stop()` waits on a quiet socket.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Poll interval while waiting for in-flight connections to drain.
const DRAIN_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// FrameHandler
// ============================================================================

/// Business handler invoked for every decoded frame.
///
/// Implemented by the gateway; one handler instance per plane.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handles one decoded frame.
    ///
    /// `frame_len` is the full encoded size (header plus value), used for
    /// traffic accounting. Returns the ACK to write back, or `None` when
    /// the frame elicits no response.
    ///
    /// # Errors
    ///
    /// A connection-terminal error (auth failure) closes the connection
    /// without an ACK; any other error elicits an error-status ACK.
    async fn on_frame(
        &self,
        conn: &Conn,
        message: Message,
        frame_len: usize,
    ) -> Result<Option<Message>>;

    /// Called once when the connection goes away for any reason.
    async fn on_disconnect(&self, conn: &Conn);
}

// ============================================================================
// Listener
// ============================================================================

/// TCP listener bootstrap for one plane.
pub struct Listener {
    plane: Plane,
    addr: SocketAddr,
    codec: FrameCodec,
    cert_store: Arc<CertificateStore>,
    handler: Arc<dyn FrameHandler>,
    drain_bound: Duration,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Creates a listener; call [`Listener::start`] to begin accepting.
    #[must_use]
    pub fn new(
        plane: Plane,
        addr: SocketAddr,
        codec: FrameCodec,
        cert_store: Arc<CertificateStore>,
        handler: Arc<dyn FrameHandler>,
        drain_bound: Duration,
    ) -> Self {
        Self {
            plane,
            addr,
            codec,
            cert_store,
            handler,
            drain_bound,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            accept_task: Mutex::new(None),
        }
    }

    /// Returns the plane this listener serves.
    #[inline]
    #[must_use]
    pub fn plane(&self) -> Plane {
        self.plane
    }

    /// Returns `true` while the accept loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.accept_task.lock().is_some()
    }

    /// Returns the number of in-flight connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Listener - Start / Stop
// ============================================================================

impl Listener {
    /// Binds the address and starts accepting connections.
    ///
    /// TLS is attempted only when `use_tls` is set **and** the certificate
    /// store reports itself ready. A failed TLS context build is logged
    /// and the listener falls back to plaintext framing rather than
    /// refusing to start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn start(&self, use_tls: bool) -> Result<()> {
        if self.is_running() {
            warn!(plane = %self.plane, "Listener already running");
            return Ok(());
        }

        let socket = TcpListener::bind(self.addr).await?;
        let local_addr = socket.local_addr()?;

        let tls = self.build_tls(use_tls);
        self.shutdown.store(false, Ordering::SeqCst);

        let accept = AcceptLoop {
            plane: self.plane,
            codec: self.codec,
            handler: Arc::clone(&self.handler),
            shutdown: Arc::clone(&self.shutdown),
            active: Arc::clone(&self.active),
            tls,
        };
        let handle = tokio::spawn(accept.run(socket));
        *self.accept_task.lock() = Some(handle);

        info!(plane = %self.plane, addr = %local_addr, "Listener started");
        Ok(())
    }

    /// Stops accepting and waits a bounded interval for in-flight
    /// connections to drain.
    ///
    /// Best-effort graceful: connections still alive after the bound are
    /// left running; there is no forced kill.
    pub async fn stop(&self) {
        let handle = self.accept_task.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.shutdown.store(true, Ordering::SeqCst);
        let _ = handle.await;

        let deadline = tokio::time::Instant::now() + self.drain_bound;
        while self.active.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        let remaining = self.active.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(plane = %self.plane, remaining, "Drain bound reached with connections still open");
        }
        info!(plane = %self.plane, "Listener stopped");
    }

    fn build_tls(&self, use_tls: bool) -> Option<TlsAcceptor> {
        if !use_tls {
            return None;
        }
        if !self.cert_store.is_ready() {
            warn!(plane = %self.plane, "TLS requested but certificate store not ready; using plaintext");
            return None;
        }
        match self.cert_store.build_acceptor() {
            Ok(acceptor) => {
                info!(plane = %self.plane, "TLS enabled");
                Some(acceptor)
            }
            Err(e) => {
                error!(plane = %self.plane, error = %e, "TLS context build failed; falling back to plaintext");
                None
            }
        }
    }
}

// ============================================================================
// AcceptLoop
// ============================================================================

/// State captured by the accept task.
struct AcceptLoop {
    plane: Plane,
    codec: FrameCodec,
    handler: Arc<dyn FrameHandler>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    tls: Option<TlsAcceptor>,
}

impl AcceptLoop {
    async fn run(self, socket: TcpListener) {
        debug!(plane = %self.plane, "Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match timeout(ACCEPT_POLL, socket.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    let conn_task = ConnTask {
                        plane: self.plane,
                        codec: self.codec,
                        handler: Arc::clone(&self.handler),
                        active: Arc::clone(&self.active),
                        tls: self.tls.clone(),
                    };
                    tokio::spawn(conn_task.run(stream, peer_addr));
                }
                Ok(Err(e)) => {
                    error!(plane = %self.plane, error = %e, "Accept failed");
                }
                Err(_) => {
                    // Poll timeout; re-check the shutdown flag.
                }
            }
        }

        debug!(plane = %self.plane, "Accept loop terminated");
    }
}

// ============================================================================
// ConnTask
// ============================================================================

/// State captured by one per-connection task.
struct ConnTask {
    plane: Plane,
    codec: FrameCodec,
    handler: Arc<dyn FrameHandler>,
    active: Arc<AtomicUsize>,
    tls: Option<TlsAcceptor>,
}

impl ConnTask {
    async fn run(self, stream: TcpStream, peer_addr: SocketAddr) {
        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(plane = %self.plane, peer = %peer_addr, "Connection accepted");

        match self.tls.clone() {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => self.serve(tls_stream, peer_addr).await,
                Err(e) => {
                    warn!(plane = %self.plane, peer = %peer_addr, error = %e, "TLS handshake failed");
                }
            },
            None => self.serve(stream, peer_addr).await,
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Runs the frame pipeline over one established stream.
    async fn serve<S>(&self, stream: S, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let (conn, outbound_rx) = Conn::new(peer_addr);

        let writer_task = tokio::spawn(write_loop(writer, outbound_rx, self.codec));

        loop {
            let (message, frame_len) = match self.read_message(&mut reader).await {
                Ok(Some(read)) => read,
                Ok(None) => break, // clean EOF
                Err(e) => {
                    // Decode errors poison the stream: reset, no ACK.
                    warn!(plane = %self.plane, conn = %conn.id(), error = %e, "Frame decode failed; resetting connection");
                    break;
                }
            };

            if conn.is_closed() {
                break;
            }

            let acked_type = message.message_type();

            match self.handler.on_frame(&conn, message, frame_len).await {
                Ok(Some(ack)) => {
                    if conn.send_frame(ack.to_frame(self.codec.byte_order())).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_connection_terminal() => {
                    warn!(plane = %self.plane, conn = %conn.id(), error = %e, "Connection rejected");
                    break;
                }
                Err(e) => {
                    debug!(plane = %self.plane, conn = %conn.id(), error = %e, "Frame handling failed");
                    let ack = Message::ack(acked_type, crate::protocol::AckStatus::Error);
                    if conn.send_frame(ack.to_frame(self.codec.byte_order())).is_err() {
                        break;
                    }
                }
            }
        }

        conn.close();
        let _ = writer_task.await;
        self.handler.on_disconnect(&conn).await;
        debug!(plane = %self.plane, conn = %conn.id(), "Connection finished");
    }

    /// Reads one frame from the stream: header, bounds check, value.
    ///
    /// Returns the message and its full encoded length, or `Ok(None)` on
    /// clean EOF at a frame boundary.
    async fn read_message<S>(&self, reader: &mut S) -> Result<Option<(Message, usize)>>
    where
        S: AsyncRead + Unpin,
    {
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let (message_type, length) = self.codec.decode_header(&header)?;

        let mut value = vec![0u8; length as usize];
        reader.read_exact(&mut value).await?;

        let frame = Frame::new(message_type, value);
        let message = Message::from_frame(&frame, self.codec.byte_order())?;
        Ok(Some((message, FRAME_HEADER_LENGTH + length as usize)))
    }
}

// ============================================================================
// Writer Loop
// ============================================================================

/// Drains a connection's outbound queue onto the socket.
async fn write_loop<W>(
    mut writer: W,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ConnCommand>,
    codec: FrameCodec,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            ConnCommand::Frame(frame) => {
                let bytes = codec.encode_frame(&frame);
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            ConnCommand::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{AckStatus, ByteOrder, MAX_FRAME_LENGTH, MessageType};

    use std::sync::atomic::AtomicUsize;

    /// Test handler: ACKs everything except logins with token "bad".
    struct EchoHandler {
        frames_seen: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl EchoHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames_seen: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FrameHandler for EchoHandler {
        async fn on_frame(
            &self,
            _conn: &Conn,
            message: Message,
            _frame_len: usize,
        ) -> Result<Option<Message>> {
            self.frames_seen.fetch_add(1, Ordering::SeqCst);

            if let Message::Login { ref token, ref imei, ref imsi, .. } = message {
                if token == "bad" {
                    return Err(Error::auth_failure(format!("{imei}_{imsi}")));
                }
            }
            Ok(Some(Message::ack(message.message_type(), AckStatus::Ok)))
        }

        async fn on_disconnect(&self, _conn: &Conn) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_listener(handler: Arc<dyn FrameHandler>) -> Listener {
        Listener::new(
            Plane::Control,
            "127.0.0.1:0".parse().unwrap(),
            FrameCodec::default(),
            Arc::new(CertificateStore::new()),
            handler,
            Duration::from_millis(500),
        )
    }

    /// Binds a throwaway port for the listener, since `Listener` keeps the
    /// configured address private.
    async fn start_on_free_port(handler: Arc<dyn FrameHandler>) -> (Arc<Listener>, SocketAddr) {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let listener = Arc::new(Listener::new(
            Plane::Control,
            addr,
            FrameCodec::default(),
            Arc::new(CertificateStore::new()),
            handler,
            Duration::from_millis(500),
        ));
        listener.start(false).await.unwrap();
        (listener, addr)
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
    async fn test_heartbeat_elicits_ack() {
        let handler = EchoHandler::new();
        let (listener, addr) = start_on_free_port(handler.clone()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let bytes = FrameCodec::default().encode(&Message::Heartbeat { timestamp: 7 });
        stream.write_all(&bytes).await.unwrap();

        let ack = read_ack(&mut stream).await;
        assert_eq!(
            ack,
            Message::ack(MessageType::Heartbeats, AckStatus::Ok)
        );
        assert_eq!(handler.frames_seen.load(Ordering::SeqCst), 1);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_auth_failure_closes_without_ack() {
        let handler = EchoHandler::new();
        let (listener, addr) = start_on_free_port(handler.clone()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let login = Message::Login {
            imei: "860123".into(),
            imsi: "460001".into(),
            token: "bad".into(),
            app_type: 1,
            payload: Vec::new(),
        };
        let bytes = FrameCodec::default().encode(&login);
        stream.write_all(&bytes).await.unwrap();

        // Connection must close with no ACK bytes.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server closed the connection")
            .unwrap();
        assert_eq!(n, 0);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_without_ack() {
        let handler = EchoHandler::new();
        let (listener, addr) = start_on_free_port(handler.clone()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let order = ByteOrder::Big;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&order.write_u16(MessageType::Video.code()));
        bytes.extend_from_slice(&order.write_u32(4_000_000));
        assert!(4_000_000 > MAX_FRAME_LENGTH);
        stream.write_all(&bytes).await.unwrap();

        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server closed the connection")
            .unwrap();
        assert_eq!(n, 0);
        // The oversized frame never reached the handler.
        assert_eq!(handler.frames_seen.load(Ordering::SeqCst), 0);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_frames_processed_in_order() {
        let handler = EchoHandler::new();
        let (listener, addr) = start_on_free_port(handler.clone()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let codec = FrameCodec::default();
        for i in 0..5i64 {
            let bytes = codec.encode(&Message::Heartbeat { timestamp: i });
            stream.write_all(&bytes).await.unwrap();
        }
        for _ in 0..5 {
            let ack = read_ack(&mut stream).await;
            assert!(matches!(ack, Message::Ack { acked_type: MessageType::Heartbeats, .. }));
        }

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let listener = test_listener(EchoHandler::new());
        listener.stop().await;
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let handler = EchoHandler::new();
        let (listener, addr) = start_on_free_port(handler.clone()).await;
        assert!(listener.is_running());

        listener.stop().await;
        assert!(!listener.is_running());

        // The port is free again; a restart rebinds it.
        listener.start(false).await.unwrap();
        assert!(listener.is_running());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let bytes = FrameCodec::default().encode(&Message::Heartbeat { timestamp: 1 });
        stream.write_all(&bytes).await.unwrap();
        let _ = read_ack(&mut stream).await;

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_reaches_handler() {
        let handler = EchoHandler::new();
        let (listener, addr) = start_on_free_port(handler.clone()).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while handler.disconnects.load(Ordering::SeqCst) == 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);

        listener.stop().await;
    }
}
