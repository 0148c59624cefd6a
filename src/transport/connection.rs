//! Handle to one worker WebSocket.
//!
//! The socket itself is owned by its event loop (see `handler`). Everything
//! else talks to it through a [`WorkerConnection`], which forwards writes
//! over an unbounded channel.
//!
//! # Writes and Close
//!
//! - `Send` commands write a text frame and acknowledge the write result
//! - [`WorkerConnection::close`] cancels a per-socket token. The event loop
//!   races every write against it, so a close is never stuck behind a
//!   write the peer is not reading

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::OutboundFrame;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Commands consumed by a connection's event loop.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Write a text frame, then report the write result.
    Send {
        /// Serialized frame.
        text: String,
        /// Receives `Ok(())` once written, or the write error.
        ack: oneshot::Sender<Result<()>>,
    },
}

/// Receiving half of a connection's command channel.
pub type CommandReceiver = mpsc::UnboundedReceiver<ConnectionCommand>;

// ============================================================================
// WorkerConnection
// ============================================================================

/// Cloneable handle to a worker socket.
///
/// # Thread Safety
///
/// `WorkerConnection` is `Send + Sync`; cloning shares the same socket.
#[derive(Debug, Clone)]
pub struct WorkerConnection {
    id: ConnectionId,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    closed: CancellationToken,
}

impl WorkerConnection {
    /// Creates a handle and the command receiver its event loop drains.
    #[must_use]
    pub fn new() -> (Self, CommandReceiver) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::next(),
            command_tx,
            closed: CancellationToken::new(),
        };
        (connection, command_rx)
    }

    /// Returns the id of the underlying socket.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` if the event loop is still running and no close was
    /// requested.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.command_tx.is_closed() && !self.closed.is_cancelled()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled by [`close`](Self::close).
    pub(crate) fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Writes a frame and waits until the socket write completes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed or its
    ///   event loop has ended
    /// - [`Error::Json`] if the frame cannot be serialized
    /// - Whatever write error the event loop reports
    pub async fn send(&self, frame: &OutboundFrame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let text = frame.to_text()?;
        let (ack, ack_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send { text, ack })
            .map_err(|_| Error::ConnectionClosed)?;

        let result = ack_rx.await.map_err(|_| Error::ConnectionClosed)?;
        trace!(connection = %self.id, ok = result.is_ok(), "Frame write acknowledged");
        result
    }

    /// Closes the socket, abandoning any write in progress.
    ///
    /// Closing an already closed connection is a no-op.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_is_acknowledged() {
        let (connection, mut command_rx) = WorkerConnection::new();

        let loop_task = tokio::spawn(async move {
            match command_rx.recv().await {
                Some(ConnectionCommand::Send { text, ack }) => {
                    let _ = ack.send(Ok(()));
                    text
                }
                None => panic!("command channel closed"),
            }
        });

        connection
            .send(&OutboundFrame::HeartbeatRequest)
            .await
            .expect("send should succeed");

        let text = loop_task.await.expect("join");
        assert_eq!(text, r#"{"type":"heartbeat_request"}"#);
    }

    #[tokio::test]
    async fn test_send_after_loop_ended_fails() {
        let (connection, command_rx) = WorkerConnection::new();
        drop(command_rx);

        assert!(!connection.is_open());
        let err = connection
            .send(&OutboundFrame::HeartbeatRequest)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_send_reports_write_error() {
        let (connection, mut command_rx) = WorkerConnection::new();

        tokio::spawn(async move {
            if let Some(ConnectionCommand::Send { ack, .. }) = command_rx.recv().await {
                let _ = ack.send(Err(Error::ConnectionClosed));
            }
        });

        let result = connection.send(&OutboundFrame::HeartbeatRequest).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_is_shared_by_clones() {
        let (connection, mut command_rx) = WorkerConnection::new();
        let clone = connection.clone();
        let signal = connection.close_signal();

        clone.close();
        clone.close();

        assert!(connection.is_closed());
        assert!(!connection.is_open());
        signal.cancelled().await;

        let err = connection
            .send(&OutboundFrame::HeartbeatRequest)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(command_rx.try_recv().is_err());
    }
}
