//! A single established session with a peer.
//!
//! Both sides of the protocol use the same [`Connection`]: it owns the
//! request tracker for calls it originates and, when given a handler,
//! serves calls the peer originates. Each connection runs two tasks. The
//! writer drains a bounded outbound queue into the transport sink, batching
//! whatever is queued into one flush. The reader decodes inbound frames and
//! either resolves a pending request or hands the request to the handler on
//! its own task.

use crate::config::{ClientConfig, ServerConfig};
use crate::error::{ConnectionError, Error, HandlerError, ResourceError, Result};
use crate::handler::{InteractionModel, RequestHandler};
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::tracker::{Outcome, RequestTracker, ResponseHandle};
use futures::{SinkExt, StreamExt};
use rsocket_protocol::{Frame, FrameCodec, FrameType, Payload, ProtocolError, RequestId};
use rsocket_transport::{
    Address, Duplex, FrameSink, FrameStream, Transport, TransportError, TransportKind,
};
use rsocket_transport_tcp::{TcpConfig, TcpTransport};
use rsocket_transport_ws::{WebSocketConfig, WebSocketTransport};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection.
///
/// `Connected` is the only state in which frames are sent or received.
/// States only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Nothing has happened yet.
    Uninitialized,
    /// The transport handshake is in progress.
    Connecting,
    /// Frames flow in both directions.
    Connected,
    /// Shutting down; new sends are refused.
    Closing,
    /// Gone. Every pending request has been resolved.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Per-connection limits derived from client or server config.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub outbound_queue_size: usize,
    pub max_pending_requests: usize,
    pub max_frame_size: usize,
    pub close_timeout: Duration,
    pub handler_timeout: Option<Duration>,
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            outbound_queue_size: config.outbound_queue_size,
            max_pending_requests: config.max_pending_requests,
            max_frame_size: config.max_frame_size,
            close_timeout: config.close_timeout(),
            handler_timeout: None,
        }
    }
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbound_queue_size: config.outbound_queue_size,
            max_pending_requests: config.max_pending_requests,
            max_frame_size: config.max_frame_size,
            close_timeout: config.close_timeout(),
            handler_timeout: config.handler_timeout(),
        }
    }
}

/// The transport implementation for an address kind.
pub(crate) fn transport_for(kind: TransportKind, max_frame_size: usize) -> Box<dyn Transport> {
    match kind {
        TransportKind::Tcp => Box::new(TcpTransport::new(TcpConfig {
            max_frame_size,
            ..TcpConfig::default()
        })),
        TransportKind::WebSocket => Box::new(WebSocketTransport::new(WebSocketConfig {
            max_frame_size,
            ..WebSocketConfig::default()
        })),
    }
}

/// Handle to an established connection. Clones share the same session.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    id: u64,
    peer: SocketAddr,
    kind: TransportKind,
    state: watch::Sender<ConnectionState>,
    tracker: Arc<RequestTracker>,
    metrics: ConnectionMetrics,
    outbound: mpsc::Sender<Frame>,
    queue_capacity: usize,
    codec: FrameCodec,
    handler: Option<Arc<dyn RequestHandler>>,
    handler_timeout: Option<Duration>,
    close_timeout: Duration,
    /// Asks the writer to flush what is queued and close the sink.
    flush: CancellationToken,
    /// Stops both tasks at once.
    cancel: CancellationToken,
    /// Cancelled by the writer on exit.
    writer_done: CancellationToken,
}

impl Connection {
    /// Dial `addr` and run the handshake, bounded by `connect_timeout`.
    #[instrument(skip(settings), fields(transport = %addr.kind()))]
    pub(crate) async fn connect(
        addr: &Address,
        settings: &ConnectionSettings,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        state.send_replace(ConnectionState::Connecting);
        debug!("Connecting to {}", addr);

        let transport = transport_for(addr.kind(), settings.max_frame_size);
        let result = match timeout(connect_timeout, transport.connect(addr)).await {
            Ok(Ok(duplex)) => Ok(duplex),
            Ok(Err(source)) => Err(ConnectionError::ConnectFailed {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(ConnectionError::Timeout {
                addr: addr.to_string(),
                timeout: connect_timeout,
            }),
        };

        match result {
            Ok(duplex) => Ok(Self::establish(duplex, state, settings, None)),
            Err(err) => {
                state.send_replace(ConnectionState::Closed);
                warn!("{}", err);
                Err(err.into())
            }
        }
    }

    /// Wrap an accepted transport session that serves `handler`.
    pub(crate) fn accept(
        duplex: Duplex,
        settings: &ConnectionSettings,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self::establish(duplex, state, settings, Some(handler))
    }

    fn establish(
        duplex: Duplex,
        state: watch::Sender<ConnectionState>,
        settings: &ConnectionSettings,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Self {
        let Duplex {
            sink,
            stream,
            peer,
            kind,
        } = duplex;
        let queue_capacity = settings.outbound_queue_size.max(1);
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity);

        state.send_replace(ConnectionState::Connected);
        let shared = Arc::new(Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            kind,
            state,
            tracker: Arc::new(RequestTracker::new(settings.max_pending_requests)),
            metrics: ConnectionMetrics::new(),
            outbound,
            queue_capacity,
            codec: FrameCodec::new().with_max_frame_size(settings.max_frame_size),
            handler,
            handler_timeout: settings.handler_timeout,
            close_timeout: settings.close_timeout,
            flush: CancellationToken::new(),
            cancel: CancellationToken::new(),
            writer_done: CancellationToken::new(),
        });
        info!(
            "Connection {} established with {} over {}",
            shared.id, peer, kind
        );

        tokio::spawn(write_loop(Arc::clone(&shared), sink, outbound_rx));
        tokio::spawn(read_loop(Arc::clone(&shared), stream));

        Self { shared }
    }

    /// Process-unique id of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Remote socket address.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    /// Transport this connection runs over.
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.shared.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether frames can currently be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Request-response calls awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.tracker.len()
    }

    /// Traffic counters since the connection was established.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut states = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this only ends once closed
        let _ = states
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Send a request-response frame and return a handle to its reply.
    ///
    /// Returns as soon as the frame is queued. The handle resolves when the
    /// matching RESPONSE or ERROR frame arrives, or when the connection
    /// closes.
    ///
    /// # Errors
    ///
    /// Fails without touching the network if the connection is not
    /// connected, the payload does not fit in a frame, too many requests are
    /// pending, or the outbound queue is full.
    pub fn request_response(&self, payload: Payload) -> Result<ResponseHandle> {
        let shared = &self.shared;
        shared.ensure_connected()?;

        let mut frame = Frame::request_response(RequestId::UNTRACKED, payload);
        shared.check_size(&frame)?;

        let (id, rx) = shared.tracker.register()?;
        frame.request_id = id;
        let size = frame.encoded_len();
        if let Err(err) = shared.try_enqueue(frame) {
            shared.tracker.discard(id);
            return Err(err);
        }
        shared.metrics.record_request(size);

        debug!("Sent request {} on connection {}", id, shared.id);
        Ok(ResponseHandle::new(id, rx, Arc::clone(&shared.tracker)))
    }

    /// Send a fire-and-forget frame. Nothing is tracked and no reply comes.
    ///
    /// # Errors
    ///
    /// Fails if the connection is not connected, the payload does not fit in
    /// a frame, or the outbound queue is full.
    pub fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_connected()?;

        let frame = Frame::fire_and_forget(payload);
        shared.check_size(&frame)?;
        let size = frame.encoded_len();
        shared.try_enqueue(frame)?;
        shared.metrics.record_request(size);

        debug!("Sent fire-and-forget on connection {}", shared.id);
        Ok(())
    }

    /// Flush queued frames, shut the transport down and fail every pending
    /// request with a closed-connection error.
    ///
    /// Idempotent; concurrent callers all return once the connection is
    /// closed.
    pub async fn close(&self) {
        self.shared.close().await;
    }

    /// Close immediately without flushing queued frames.
    pub fn abort(&self) {
        self.shared.fail(ConnectionError::Closed.into());
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

impl Shared {
    fn ensure_connected(&self) -> Result<()> {
        match *self.state.borrow() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {
                Err(ConnectionError::Closed.into())
            }
            other => Err(ConnectionError::NotConnected(other).into()),
        }
    }

    fn is_closing(&self) -> bool {
        matches!(
            *self.state.borrow(),
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    fn check_size(&self, frame: &Frame) -> Result<()> {
        self.codec.check_size(frame).map_err(|err| match err {
            ProtocolError::FrameTooLarge { size, max } => {
                ResourceError::PayloadTooLarge { size, max }.into()
            }
            other => other.into(),
        })
    }

    fn try_enqueue(&self, frame: Frame) -> Result<()> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => ResourceError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into(),
            TrySendError::Closed(_) => ConnectionError::Closed.into(),
        })
    }

    /// Queue a reply, waiting for room in the queue.
    async fn reply(&self, frame: Frame) {
        let id = frame.request_id;
        let frame = match self.check_size(&frame) {
            Ok(()) => frame,
            Err(err) => {
                warn!("Reply to request {} on connection {}: {}", id, self.id, err);
                Frame::error(id, &err.to_string())
            }
        };

        let size = frame.encoded_len();
        if self.ensure_connected().is_err() || self.outbound.send(frame).await.is_err() {
            debug!(
                "Dropping reply to request {} on closed connection {}",
                id, self.id
            );
        } else {
            self.metrics.record_sent(size);
        }
    }

    /// Move to `Closing`. Returns `false` if termination already started.
    fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            ConnectionState::Closing | ConnectionState::Closed => false,
            _ => {
                *state = ConnectionState::Closing;
                true
            }
        })
    }

    fn finish(&self, reason: &Error) {
        self.cancel.cancel();
        if !reason.is_closed() {
            self.metrics.record_error();
        }
        let drained = self.tracker.drain_all(reason);
        self.state.send_replace(ConnectionState::Closed);
        info!(
            "Connection {} closed, {} pending requests failed: {}",
            self.id, drained, reason
        );
    }

    /// Terminate because of `reason`, once.
    fn fail(&self, reason: Error) {
        if self.begin_closing() {
            self.finish(&reason);
        }
    }

    async fn close(&self) {
        if !self.begin_closing() {
            let mut states = self.state.subscribe();
            let _ = states
                .wait_for(|state| *state == ConnectionState::Closed)
                .await;
            return;
        }

        debug!("Closing connection {}", self.id);
        self.flush.cancel();
        if timeout(self.close_timeout, self.writer_done.cancelled())
            .await
            .is_err()
        {
            warn!(
                "Connection {} did not flush within {:?}",
                self.id, self.close_timeout
            );
        }
        self.finish(&ConnectionError::Closed.into());
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        self.metrics.record_received(frame.encoded_len());
        match frame.frame_type {
            FrameType::Response => self.settle(frame.request_id, Ok(frame.payload)),
            FrameType::Error => {
                let message = frame.error_message();
                self.settle(frame.request_id, Err(HandlerError::Remote(message).into()));
            }
            FrameType::RequestResponse => {
                self.serve(frame.request_id, frame.payload, InteractionModel::RequestResponse);
            }
            FrameType::FireAndForget => {
                self.serve(frame.request_id, frame.payload, InteractionModel::FireAndForget);
            }
        }
    }

    fn settle(&self, id: RequestId, outcome: Outcome) {
        let answered = outcome.is_ok();
        if self.tracker.resolve(id, outcome) {
            if answered {
                self.metrics.record_response();
            } else {
                self.metrics.record_error();
            }
            debug!("Resolved request {} on connection {}", id, self.id);
        } else {
            warn!(
                "Ignoring reply on connection {}: {}",
                self.id,
                ProtocolError::UnknownRequestId(id.get())
            );
        }
    }

    fn serve(self: &Arc<Self>, id: RequestId, payload: Payload, model: InteractionModel) {
        debug!("Received {} request {} on connection {}", model, id, self.id);

        let Some(handler) = self.handler.clone() else {
            match model {
                InteractionModel::RequestResponse => {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        shared
                            .reply(Frame::error(id, &HandlerError::NoHandler.to_string()))
                            .await;
                    });
                }
                InteractionModel::FireAndForget => {
                    warn!(
                        "Dropping fire-and-forget on connection {}: no handler registered",
                        self.id
                    );
                }
            }
            return;
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = invoke(handler, payload, model, shared.handler_timeout).await;
            match model {
                InteractionModel::RequestResponse => {
                    let frame = match outcome {
                        Ok(reply) => Frame::response(id, reply),
                        Err(err) => {
                            warn!("Request {} on connection {} failed: {}", id, shared.id, err);
                            Frame::error(id, &err.to_string())
                        }
                    };
                    shared.reply(frame).await;
                }
                InteractionModel::FireAndForget => {
                    if let Err(err) = outcome {
                        warn!(
                            "Fire-and-forget handler failed on connection {}: {}",
                            shared.id, err
                        );
                    }
                }
            }
        });
    }
}

/// Run the handler on its own task so a panic or overrun stays contained.
async fn invoke(
    handler: Arc<dyn RequestHandler>,
    payload: Payload,
    model: InteractionModel,
    limit: Option<Duration>,
) -> std::result::Result<Payload, HandlerError> {
    let mut task = tokio::spawn(async move { handler.handle(payload, model).await });

    let joined = match limit {
        Some(limit) => match timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(HandlerError::TimedOut(limit));
            }
        },
        None => task.await,
    };

    joined.unwrap_or_else(|err| Err(join_failure(err)))
}

fn join_failure(err: JoinError) -> HandlerError {
    if !err.is_panic() {
        return HandlerError::failed("handler task was cancelled");
    }

    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    HandlerError::Panicked(message)
}

async fn read_loop(shared: Arc<Shared>, mut stream: FrameStream) {
    loop {
        let item = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(frame)) => shared.dispatch(frame),
            Some(Err(err)) => {
                if err.is_disconnect() || shared.is_closing() {
                    debug!("Connection {} read ended: {}", shared.id, err);
                } else {
                    error!("Connection {} read failed: {}", shared.id, err);
                }
                shared.fail(err.into());
                break;
            }
            None => {
                debug!("Connection {} closed by peer", shared.id);
                shared.fail(ConnectionError::Closed.into());
                break;
            }
        }
    }
}

async fn write_loop(shared: Arc<Shared>, mut sink: FrameSink, mut rx: mpsc::Receiver<Frame>) {
    let result = loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break Ok(()),
            () = shared.flush.cancelled() => {
                rx.close();
                break tokio::select! {
                    biased;
                    () = shared.cancel.cancelled() => Ok(()),
                    flushed = flush_and_close(&mut sink, &mut rx) => flushed,
                };
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break Ok(()) };
                let written = tokio::select! {
                    biased;
                    () = shared.cancel.cancelled() => break Ok(()),
                    written = write_batch(&mut sink, frame, &mut rx) => written,
                };
                if let Err(err) = written {
                    break Err(err);
                }
            }
        }
    };

    if let Err(err) = result {
        if err.is_disconnect() || shared.is_closing() {
            debug!("Connection {} write ended: {}", shared.id, err);
        } else {
            error!("Connection {} write failed: {}", shared.id, err);
        }
        shared.fail(err.into());
    }
    shared.writer_done.cancel();
}

/// Write `first` and everything already queued behind it, then flush once.
async fn write_batch(
    sink: &mut FrameSink,
    first: Frame,
    rx: &mut mpsc::Receiver<Frame>,
) -> std::result::Result<(), TransportError> {
    sink.feed(first).await?;
    while let Ok(frame) = rx.try_recv() {
        sink.feed(frame).await?;
    }
    sink.flush().await
}

async fn flush_and_close(
    sink: &mut FrameSink,
    rx: &mut mpsc::Receiver<Frame>,
) -> std::result::Result<(), TransportError> {
    while let Some(frame) = rx.recv().await {
        sink.feed(frame).await?;
    }
    sink.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use futures::channel::mpsc as futures_mpsc;

    /// A connection whose transport is a pair of in-memory channels.
    fn in_memory(
        handler: Option<Arc<dyn RequestHandler>>,
        queue: usize,
    ) -> (
        Connection,
        futures_mpsc::UnboundedSender<std::result::Result<Frame, TransportError>>,
        futures_mpsc::UnboundedReceiver<Frame>,
    ) {
        let (inbound_tx, inbound_rx) = futures_mpsc::unbounded();
        let (outbound_tx, outbound_rx) = futures_mpsc::unbounded();

        let duplex = Duplex {
            sink: Box::pin(outbound_tx.sink_map_err(|_| TransportError::Closed)),
            stream: Box::pin(inbound_rx),
            peer: "127.0.0.1:9".parse().unwrap(),
            kind: TransportKind::Tcp,
        };
        let settings = ConnectionSettings {
            outbound_queue_size: queue,
            max_pending_requests: 100,
            max_frame_size: 1024,
            close_timeout: Duration::from_secs(1),
            handler_timeout: Some(Duration::from_millis(200)),
        };
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let connection = Connection::establish(duplex, state, &settings, handler);
        (connection, inbound_tx, outbound_rx)
    }

    #[tokio::test]
    async fn test_request_resolved_by_response_frame() {
        let (connection, inbound, mut outbound) = in_memory(None, 16);
        assert!(connection.is_connected());

        let handle = connection
            .request_response(Payload::from("ping"))
            .unwrap();
        let sent = outbound.next().await.unwrap();
        assert_eq!(sent.frame_type, FrameType::RequestResponse);
        assert_eq!(sent.request_id, handle.request_id());
        assert_eq!(connection.pending_requests(), 1);

        inbound
            .unbounded_send(Ok(Frame::response(sent.request_id, Payload::from("pong"))))
            .unwrap();
        let reply = handle.await.unwrap();
        assert_eq!(reply.data_utf8().unwrap(), "pong");
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_fire_and_forget_is_not_tracked() {
        let (connection, _inbound, mut outbound) = in_memory(None, 16);

        connection
            .fire_and_forget(Payload::from("log-entry"))
            .unwrap();
        let sent = outbound.next().await.unwrap();
        assert_eq!(sent.frame_type, FrameType::FireAndForget);
        assert_eq!(sent.request_id, RequestId::UNTRACKED);
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_payload_too_large_is_refused_before_queueing() {
        let (connection, _inbound, _outbound) = in_memory(None, 16);

        let err = connection
            .request_response(Payload::new(vec![0u8; 2048], None))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resource(ResourceError::PayloadTooLarge { max: 1024, .. })
        ));
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_server_side_dispatch_to_handler() {
        let (connection, inbound, mut outbound) = in_memory(Some(Arc::new(EchoHandler)), 16);

        inbound
            .unbounded_send(Ok(Frame::request_response(
                RequestId::new(7),
                Payload::from("echo me"),
            )))
            .unwrap();
        let reply = outbound.next().await.unwrap();
        assert_eq!(reply.frame_type, FrameType::Response);
        assert_eq!(reply.request_id, RequestId::new(7));
        assert_eq!(reply.payload.data_utf8().unwrap(), "echo me");

        drop(connection);
    }

    #[tokio::test]
    async fn test_no_handler_answers_with_error() {
        let (_connection, inbound, mut outbound) = in_memory(None, 16);

        inbound
            .unbounded_send(Ok(Frame::request_response(
                RequestId::new(3),
                Payload::from("anyone?"),
            )))
            .unwrap();
        let reply = outbound.next().await.unwrap();
        assert_eq!(reply.frame_type, FrameType::Error);
        assert_eq!(reply.request_id, RequestId::new(3));
        assert_eq!(reply.error_message(), "No handler registered");
    }

    #[tokio::test]
    async fn test_handler_panic_and_timeout_become_errors() {
        let handler = |payload: Payload, _model: InteractionModel| async move {
            let data = payload.data().clone();
            match &data[..] {
                b"panic" => panic!("handler blew up"),
                b"slow" => tokio::time::sleep(Duration::from_secs(10)).await,
                _ => {}
            }
            Ok::<_, HandlerError>(payload)
        };
        let (_connection, inbound, mut outbound) = in_memory(Some(Arc::new(handler)), 16);

        inbound
            .unbounded_send(Ok(Frame::request_response(
                RequestId::new(1),
                Payload::from("panic"),
            )))
            .unwrap();
        let reply = outbound.next().await.unwrap();
        assert_eq!(reply.frame_type, FrameType::Error);
        assert!(reply.error_message().contains("handler blew up"));

        inbound
            .unbounded_send(Ok(Frame::request_response(
                RequestId::new(2),
                Payload::from("slow"),
            )))
            .unwrap();
        let reply = outbound.next().await.unwrap();
        assert_eq!(reply.frame_type, FrameType::Error);
        assert!(reply.error_message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_peer_eof_drains_pending() {
        let (connection, inbound, _outbound) = in_memory(None, 16);
        let handle = connection.request_response(Payload::from("a")).unwrap();

        drop(inbound);
        let err = handle.await.unwrap_err();
        assert!(err.is_closed());

        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection
            .fire_and_forget(Payload::from("late"))
            .unwrap_err()
            .is_closed());
    }

    #[tokio::test]
    async fn test_protocol_error_closes_with_protocol_kind() {
        let (connection, inbound, _outbound) = in_memory(None, 16);
        let handle = connection.request_response(Payload::from("a")).unwrap();

        inbound
            .unbounded_send(Err(TransportError::Protocol(
                ProtocolError::InvalidMetadataFlag(9),
            )))
            .unwrap();
        let err = handle.await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidMetadataFlag(9))));
        connection.closed().await;
    }

    #[tokio::test]
    async fn test_error_replies_and_failures_are_counted() {
        let (connection, inbound, mut outbound) = in_memory(None, 16);

        let handle = connection.request_response(Payload::from("a")).unwrap();
        let sent = outbound.next().await.unwrap();
        inbound
            .unbounded_send(Ok(Frame::error(sent.request_id, "nope")))
            .unwrap();
        assert!(handle.await.is_err());

        let metrics = connection.metrics();
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.responses, 0);
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.bytes_sent, sent.encoded_len() as u64);
        assert_eq!(
            metrics.bytes_received,
            Frame::error(sent.request_id, "nope").encoded_len() as u64
        );

        inbound
            .unbounded_send(Err(TransportError::Protocol(
                ProtocolError::InvalidMetadataFlag(9),
            )))
            .unwrap();
        connection.closed().await;
        assert_eq!(connection.metrics().errors, 2);
    }

    #[tokio::test]
    async fn test_server_replies_count_as_bytes_sent() {
        let (connection, inbound, mut outbound) = in_memory(Some(Arc::new(EchoHandler)), 16);

        let request = Frame::request_response(RequestId::new(5), Payload::from("echo"));
        let request_len = request.encoded_len() as u64;
        inbound.unbounded_send(Ok(request)).unwrap();
        let reply = outbound.next().await.unwrap();

        let metrics = connection.metrics();
        assert_eq!(metrics.requests, 0);
        assert_eq!(metrics.bytes_received, request_len);
        assert_eq!(metrics.bytes_sent, reply.encoded_len() as u64);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connection, _inbound, _outbound) = in_memory(None, 16);
        let handle = connection.request_response(Payload::from("a")).unwrap();

        connection.close().await;
        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(handle.await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames() {
        let (connection, _inbound, outbound) = in_memory(None, 16);
        for n in 0..5 {
            connection
                .fire_and_forget(Payload::from(n.to_string().as_str()))
                .unwrap();
        }

        connection.close().await;
        let flushed: Vec<Frame> = outbound.collect().await;
        assert_eq!(flushed.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_response_is_ignored() {
        let (connection, inbound, mut outbound) = in_memory(None, 16);
        let handle = connection.request_response(Payload::from("a")).unwrap();
        let sent = outbound.next().await.unwrap();

        let stray = RequestId::new(sent.request_id.get() + 1000);
        inbound
            .unbounded_send(Ok(Frame::response(stray, Payload::from("wrong"))))
            .unwrap();
        inbound
            .unbounded_send(Ok(Frame::error(stray, "also wrong")))
            .unwrap();
        inbound
            .unbounded_send(Ok(Frame::response(sent.request_id, Payload::from("right"))))
            .unwrap();

        assert_eq!(handle.await.unwrap().data_utf8().unwrap(), "right");
        assert!(connection.is_connected());
    }

    #[tokio::test]
    async fn test_out_of_order_replies_match_requests() {
        let (connection, inbound, mut outbound) = in_memory(None, 64);
        let handles: Vec<_> = (0..10)
            .map(|n| {
                connection
                    .request_response(Payload::from(format!("{n}").as_str()))
                    .unwrap()
            })
            .collect();

        // Answer in reverse order
        let sent: Vec<Frame> = (&mut outbound).take(10).collect().await;
        for frame in sent.into_iter().rev() {
            inbound
                .unbounded_send(Ok(Frame::response(frame.request_id, frame.payload)))
                .unwrap();
        }

        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().data_utf8().unwrap(), n.to_string());
        }
    }
}
