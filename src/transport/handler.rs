//! Per-connection relay protocol handler.
//!
//! One handler runs for every accepted worker socket. It owns the socket,
//! parses inbound frames, and drives the connection state machine:
//!
//! ```text
//!   Unregistered ──register──► Registered ──close──► Closed
//!        │                      │    ▲
//!        │                      └────┘ register (rebind)
//!        └──────────close──────────────────────────► Closed
//! ```
//!
//! # Event Loop
//!
//! The loop selects over:
//!
//! - Incoming frames from the worker
//! - Writes queued by [`WorkerConnection`] handles
//! - The connection's close signal
//! - Relay shutdown
//!
//! Writes race the close signal and shutdown, so a worker that stops reading
//! cannot hold the loop. Unparsable frames are logged and dropped; they
//! never close the socket.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, MSG_RECONNECT_LIMIT};
use crate::identifiers::WorkerId;
use crate::protocol::{CallOutcome, InboundFrame, OutboundFrame};

use super::connection::{CommandReceiver, ConnectionCommand, WorkerConnection};
use super::correlation::CorrelationTable;
use super::registry::Registry;

// ============================================================================
// Types
// ============================================================================

/// Registration state of one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, no identity bound yet.
    Unregistered,
    /// Socket bound to a worker identity.
    Registered(WorkerId),
    /// Socket closed; every further frame is ignored.
    Closed,
}

/// What the event loop should do after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameAction {
    /// Keep reading.
    Continue,
    /// Send the frame, then close the socket.
    Terminate(OutboundFrame),
}

/// How long a close handshake may take before the socket is just dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// ConnectionHandler
// ============================================================================

/// State machine for one worker socket.
pub struct ConnectionHandler {
    connection: WorkerConnection,
    registry: Arc<Registry>,
    correlation: Arc<CorrelationTable>,
    max_reconnect_attempts: u32,
    state: ConnectionState,
    reconnect_attempts: u32,
}

impl ConnectionHandler {
    /// Creates a handler for a freshly accepted socket.
    #[must_use]
    pub fn new(
        connection: WorkerConnection,
        registry: Arc<Registry>,
        correlation: Arc<CorrelationTable>,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            connection,
            registry,
            correlation,
            max_reconnect_attempts,
            state: ConnectionState::Unregistered,
            reconnect_attempts: 0,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Identity bound to this socket, if any.
    #[must_use]
    pub fn worker_id(&self) -> Option<&WorkerId> {
        match &self.state {
            ConnectionState::Registered(id) => Some(id),
            _ => None,
        }
    }

    /// `reconnect` frames counted since the last registration.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }
}

// ============================================================================
// ConnectionHandler - Frame Handling
// ============================================================================

impl ConnectionHandler {
    /// Handles one inbound text frame.
    pub fn handle_text(&mut self, text: &str) -> FrameAction {
        if self.state == ConnectionState::Closed {
            return FrameAction::Continue;
        }

        match InboundFrame::parse(text) {
            Ok(frame) => {
                trace!(connection = %self.connection.id(), kind = frame.kind(), "Frame received");
                self.handle_frame(frame)
            }
            Err(e) => {
                warn!(
                    connection = %self.connection.id(),
                    error = %e,
                    "Invalid message discarded"
                );
                FrameAction::Continue
            }
        }
    }

    /// Applies a parsed frame to the state machine.
    pub fn handle_frame(&mut self, frame: InboundFrame) -> FrameAction {
        match frame {
            InboundFrame::Register { id } => {
                self.on_register(id);
                FrameAction::Continue
            }
            InboundFrame::Heartbeat => {
                if let ConnectionState::Registered(id) = &self.state
                    && !self.registry.heartbeat(id, self.connection.id())
                {
                    debug!(worker_id = %id, "Heartbeat from superseded connection ignored");
                }
                FrameAction::Continue
            }
            InboundFrame::Response {
                request_id,
                result,
                error,
            } => {
                self.correlation
                    .resolve(&request_id, CallOutcome { result, error });
                FrameAction::Continue
            }
            InboundFrame::Reconnect => self.on_reconnect(),
        }
    }

    fn on_register(&mut self, id: WorkerId) {
        if let ConnectionState::Registered(previous) = &self.state {
            info!(
                worker_id = %id,
                previous = %previous,
                "Connection already registered, updating registration"
            );
            if *previous != id {
                self.registry.remove_if(previous, self.connection.id());
            }
        }

        self.registry.register(id.clone(), self.connection.clone());
        self.state = ConnectionState::Registered(id);
        self.reconnect_attempts = 0;
    }

    fn on_reconnect(&mut self) -> FrameAction {
        self.reconnect_attempts += 1;

        if self.reconnect_attempts > self.max_reconnect_attempts {
            let err =
                Error::reconnect_limit_exceeded(self.reconnect_attempts, self.max_reconnect_attempts);
            warn!(
                connection = %self.connection.id(),
                worker_id = ?self.worker_id(),
                error = %err,
                "Closing connection"
            );
            return FrameAction::Terminate(OutboundFrame::Error {
                error: MSG_RECONNECT_LIMIT.to_string(),
            });
        }

        debug!(
            connection = %self.connection.id(),
            worker_id = ?self.worker_id(),
            attempt = self.reconnect_attempts,
            "Reconnection attempt"
        );
        FrameAction::Continue
    }

    /// Releases the identity binding. Pending calls are left to their timeouts.
    pub fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

        if let ConnectionState::Registered(id) = state
            && self.registry.remove_if(&id, self.connection.id())
        {
            info!(
                worker_id = %id,
                total = self.registry.len(),
                "Worker disconnected"
            );
        }
    }
}

// ============================================================================
// ConnectionHandler - Event Loop
// ============================================================================

impl ConnectionHandler {
    /// Runs the event loop until the socket closes or `shutdown` fires.
    ///
    /// Every write races the connection's close signal and `shutdown`. A
    /// write the peer never drains is abandoned and the socket dropped.
    pub async fn run(
        mut self,
        socket: WebSocket,
        mut command_rx: CommandReceiver,
        shutdown: CancellationToken,
    ) {
        let connection_id = self.connection.id();
        let closed = self.connection.close_signal();
        let (mut ws_write, mut ws_read) = socket.split();
        let mut writer = FrameWriter {
            sink: &mut ws_write,
            closed: &closed,
            shutdown: &shutdown,
        };

        debug!(connection = %connection_id, "Worker socket connected");
        match writer.write(&OutboundFrame::HeartbeatRequest).await {
            Write::Done(Ok(())) => {}
            Write::Done(Err(e)) => {
                warn!(connection = %connection_id, error = %e, "Failed to send heartbeat request");
            }
            Write::Abandoned => {
                self.close();
                return;
            }
        }

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    let action = match message {
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),

                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.handle_text(text),
                            Err(_) => {
                                warn!(connection = %connection_id, "Non UTF-8 binary frame discarded");
                                FrameAction::Continue
                            }
                        },

                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %connection_id, "WebSocket closed by worker");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(
                                connection = %connection_id,
                                worker_id = ?self.worker_id(),
                                error = %e,
                                "WebSocket error"
                            );
                            break;
                        }

                        None => {
                            debug!(connection = %connection_id, "WebSocket stream ended");
                            break;
                        }

                        // Ping/Pong are answered by the protocol layer
                        Some(Ok(_)) => FrameAction::Continue,
                    };

                    if let FrameAction::Terminate(frame) = action {
                        if let Write::Done(Ok(())) = writer.write(&frame).await {
                            writer.close().await;
                        } else {
                            warn!(connection = %connection_id, "Failed to send terminal frame");
                        }
                        break;
                    }
                }

                command = command_rx.recv() => {
                    let Some(ConnectionCommand::Send { text, ack }) = command else {
                        break;
                    };
                    match writer.write_text(text).await {
                        Write::Done(result) => {
                            if let Err(e) = &result {
                                warn!(connection = %connection_id, error = %e, "Frame write failed");
                            }
                            let _ = ack.send(result);
                        }
                        Write::Abandoned => {
                            let _ = ack.send(Err(Error::ConnectionClosed));
                            debug!(connection = %connection_id, "Pending write abandoned, dropping socket");
                            break;
                        }
                    }
                }

                () = closed.cancelled() => {
                    debug!(connection = %connection_id, "Close requested");
                    writer.close().await;
                    break;
                }

                () = shutdown.cancelled() => {
                    writer.close().await;
                    break;
                }
            }
        }

        self.close();
        debug!(connection = %connection_id, "Event loop terminated");
    }
}

// ============================================================================
// FrameWriter
// ============================================================================

/// Result of a write raced against close and shutdown.
enum Write {
    /// The write finished, successfully or not.
    Done(crate::Result<()>),
    /// Close or shutdown fired first; the write was dropped midway.
    Abandoned,
}

/// Socket sink whose writes give way to close and shutdown.
struct FrameWriter<'a, S> {
    sink: &'a mut S,
    closed: &'a CancellationToken,
    shutdown: &'a CancellationToken,
}

impl<S> FrameWriter<'_, S>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    async fn write(&mut self, frame: &OutboundFrame) -> Write {
        match frame.to_text() {
            Ok(text) => self.write_text(text).await,
            Err(e) => Write::Done(Err(e)),
        }
    }

    async fn write_text(&mut self, text: String) -> Write {
        tokio::select! {
            result = self.sink.send(Message::Text(text.into())) => {
                Write::Done(result.map_err(Error::from))
            }
            () = self.closed.cancelled() => Write::Abandoned,
            () = self.shutdown.cancelled() => Write::Abandoned,
        }
    }

    /// Sends a close frame, giving up after [`CLOSE_GRACE`].
    async fn close(&mut self) {
        let _ = tokio::time::timeout(CLOSE_GRACE, self.sink.close()).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::pin::Pin;
    use std::task::{Context, Poll};

    use serde_json::json;

    use crate::transport::liveness::LivenessTracker;

    struct Fixture {
        registry: Arc<Registry>,
        correlation: Arc<CorrelationTable>,
    }

    impl Fixture {
        fn new() -> Self {
            let liveness = Arc::new(LivenessTracker::new(Duration::from_secs(60)));
            Self {
                registry: Arc::new(Registry::new(liveness)),
                correlation: Arc::new(CorrelationTable::new()),
            }
        }

        fn handler(&self) -> (ConnectionHandler, CommandReceiver) {
            let (connection, rx) = WorkerConnection::new();
            let handler = ConnectionHandler::new(
                connection,
                Arc::clone(&self.registry),
                Arc::clone(&self.correlation),
                5,
            );
            (handler, rx)
        }
    }

    #[test]
    fn test_register_binds_identity() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();
        assert_eq!(handler.state(), &ConnectionState::Unregistered);

        let action = handler.handle_text(r#"{"type":"register","id":"w1"}"#);

        assert_eq!(action, FrameAction::Continue);
        assert_eq!(
            handler.state(),
            &ConnectionState::Registered(WorkerId::new("w1"))
        );
        assert!(fx.registry.lookup(&WorkerId::new("w1")).is_some());
    }

    #[test]
    fn test_rebind_to_new_identity_drops_old_binding() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();

        handler.handle_text(r#"{"type":"register","id":"a"}"#);
        handler.handle_text(r#"{"type":"register","id":"b"}"#);

        assert!(fx.registry.lookup(&WorkerId::new("a")).is_none());
        assert!(fx.registry.lookup(&WorkerId::new("b")).is_some());
        assert_eq!(handler.worker_id(), Some(&WorkerId::new("b")));
    }

    #[test]
    fn test_heartbeat_without_identity_is_ignored() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();

        assert_eq!(
            handler.handle_text(r#"{"type":"heartbeat"}"#),
            FrameAction::Continue
        );
        assert!(fx.registry.liveness().is_empty());
    }

    #[test]
    fn test_heartbeat_touches_liveness() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();
        let id = WorkerId::new("w1");

        handler.handle_text(r#"{"type":"register","id":"w1"}"#);
        let first = fx.registry.liveness().last_seen(&id).expect("tracked");
        handler.handle_text(r#"{"type":"heartbeat"}"#);
        let second = fx.registry.liveness().last_seen(&id).expect("tracked");

        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_response_resolves_without_identity() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();
        let (token, outcome_rx) = fx.correlation.create(WorkerId::new("w1"));

        let text = json!({"type": "response", "requestId": token, "result": "pong"}).to_string();
        handler.handle_text(&text);

        let outcome = outcome_rx.await.expect("sent").expect("ok");
        assert_eq!(outcome.result, Some(json!("pong")));
        assert!(fx.correlation.is_empty());
    }

    #[test]
    fn test_malformed_frame_keeps_connection() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();

        assert_eq!(handler.handle_text("{oops"), FrameAction::Continue);
        assert_eq!(
            handler.handle_text(r#"{"type":"launch"}"#),
            FrameAction::Continue
        );
        assert_eq!(handler.state(), &ConnectionState::Unregistered);
    }

    #[test]
    fn test_sixth_reconnect_terminates() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();

        for attempt in 1..=5 {
            assert_eq!(
                handler.handle_text(r#"{"type":"reconnect"}"#),
                FrameAction::Continue
            );
            assert_eq!(handler.reconnect_attempts(), attempt);
        }

        let action = handler.handle_text(r#"{"type":"reconnect"}"#);
        assert_eq!(
            action,
            FrameAction::Terminate(OutboundFrame::Error {
                error: "Maximum reconnection attempts reached".into()
            })
        );
    }

    #[test]
    fn test_register_resets_reconnect_counter() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();

        for _ in 0..5 {
            handler.handle_text(r#"{"type":"reconnect"}"#);
        }
        handler.handle_text(r#"{"type":"register","id":"w1"}"#);
        assert_eq!(handler.reconnect_attempts(), 0);

        assert_eq!(
            handler.handle_text(r#"{"type":"reconnect"}"#),
            FrameAction::Continue
        );
    }

    #[test]
    fn test_close_unbinds_only_own_registration() {
        let fx = Fixture::new();
        let (mut first, _rx1) = fx.handler();
        let (mut second, _rx2) = fx.handler();
        let id = WorkerId::new("w1");

        first.handle_text(r#"{"type":"register","id":"w1"}"#);
        second.handle_text(r#"{"type":"register","id":"w1"}"#);

        first.close();
        assert!(fx.registry.lookup(&id).is_some());
        assert_eq!(first.state(), &ConnectionState::Closed);

        second.close();
        assert!(fx.registry.lookup(&id).is_none());
    }

    #[test]
    fn test_close_leaves_pending_calls() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();
        handler.handle_text(r#"{"type":"register","id":"w1"}"#);
        let (token, _outcome_rx) = fx.correlation.create(WorkerId::new("w1"));

        handler.close();

        assert!(fx.correlation.contains(&token));
    }

    #[test]
    fn test_frames_after_close_are_ignored() {
        let fx = Fixture::new();
        let (mut handler, _rx) = fx.handler();
        handler.close();

        handler.handle_text(r#"{"type":"register","id":"w1"}"#);
        assert_eq!(handler.state(), &ConnectionState::Closed);
        assert!(fx.registry.is_empty());
    }

    // ------------------------------------------------------------------------
    // FrameWriter
    // ------------------------------------------------------------------------

    /// Sink that never accepts a frame, like a peer that stopped reading.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_gives_way_to_close() {
        let mut sink = StalledSink;
        let closed = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let mut writer = FrameWriter {
            sink: &mut sink,
            closed: &closed,
            shutdown: &shutdown,
        };

        let trigger = closed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let write = writer.write_text("x".repeat(1 << 20)).await;
        assert!(matches!(write, Write::Abandoned));
        assert!(closed.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_gives_way_to_shutdown() {
        let mut sink = StalledSink;
        let closed = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let mut writer = FrameWriter {
            sink: &mut sink,
            closed: &closed,
            shutdown: &shutdown,
        };

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let write = writer.write(&OutboundFrame::HeartbeatRequest).await;
        assert!(matches!(write, Write::Abandoned));
        assert!(!closed.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_handshake_is_bounded() {
        let mut sink = StalledSink;
        let closed = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let mut writer = FrameWriter {
            sink: &mut sink,
            closed: &closed,
            shutdown: &shutdown,
        };

        let started = tokio::time::Instant::now();
        writer.close().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= CLOSE_GRACE && elapsed < CLOSE_GRACE * 2);
    }
}
