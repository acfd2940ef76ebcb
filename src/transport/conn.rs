//! Connection handle and outbound writer queue.
//!
//! A [`Conn`] is the cheap, cloneable handle the rest of the gateway holds
//! for one accepted socket. Outbound frames go through an unbounded queue
//! drained by the connection's writer task; [`Conn::close`] tells the
//! writer to shut the socket down.
//!
//! # Thread Safety
//!
//! `Conn` is `Send + Sync` and can be stored in registries and session
//! tables concurrently. All operations are non-blocking.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ConnId;
use crate::protocol::Frame;

// ============================================================================
// ConnCommand
// ============================================================================

/// Commands consumed by the connection's writer task.
#[derive(Debug)]
pub enum ConnCommand {
    /// Encode and write a frame to the socket.
    Frame(Frame),
    /// Close the socket and stop the writer.
    Close,
}

// ============================================================================
// Conn
// ============================================================================

/// Handle to one live connection.
///
/// Cloning shares the same underlying queue and close flag; closing any
/// clone closes them all.
#[derive(Clone)]
pub struct Conn {
    id: ConnId,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<ConnCommand>,
    closed: Arc<AtomicBool>,
}

impl Conn {
    /// Creates a connection handle and the receiver its writer task drains.
    #[must_use]
    pub fn new(peer_addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<ConnCommand>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: ConnId::generate(),
            peer_addr,
            outbound,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (conn, rx)
    }

    /// Returns this connection's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Returns the peer address.
    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queues a frame for the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is closed or
    /// its writer has gone away.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.outbound
            .send(ConnCommand::Frame(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the connection.
    ///
    /// Idempotent: the first call wins, later calls are no-ops. The writer
    /// task shuts the socket down when it sees the command.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(ConnCommand::Close);
        debug!(conn = %self.id, peer = %self.peer_addr, "Connection closed");
    }

    /// Returns `true` once [`Conn::close`] has been called, or the writer
    /// side has gone away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.outbound.is_closed()
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn test_conn() -> (Conn, mpsc::UnboundedReceiver<ConnCommand>) {
        Conn::new("127.0.0.1:9999".parse().unwrap())
    }

    #[tokio::test]
    async fn test_send_frame_reaches_writer() {
        let (conn, mut rx) = test_conn();
        conn.send_frame(Frame::new(MessageType::Heartbeats, Vec::new()))
            .expect("send");

        match rx.recv().await {
            Some(ConnCommand::Frame(frame)) => {
                assert_eq!(frame.message_type, MessageType::Heartbeats);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, mut rx) = test_conn();
        conn.close();
        conn.close();
        assert!(conn.is_closed());

        // Exactly one Close command regardless of how often close() ran.
        assert!(matches!(rx.recv().await, Some(ConnCommand::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, _rx) = test_conn();
        conn.close();

        let err = conn
            .send_frame(Frame::new(MessageType::Control, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_clone_shares_close_flag() {
        let (conn, _rx) = test_conn();
        let clone = conn.clone();
        clone.close();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_closed_when_writer_gone() {
        let (conn, rx) = test_conn();
        drop(rx);
        assert!(conn.is_closed());
    }
}
