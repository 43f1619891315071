//! Server side of the protocol.
//!
//! A server owns one listener per configured address. After
//! [`Server::start`] each listener gets its own accept loop; every accepted
//! connection runs its handshake on a separate task and is then served by a
//! [`Connection`] carrying the registered handler.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionSettings, transport_for};
use crate::error::{Result, ServerError};
use crate::handler::RequestHandler;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use rsocket_transport::{Accepted, Address, Listener};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

type StartCallback = Box<dyn FnOnce(&[Address]) + Send + 'static>;

/// Builder for creating servers.
#[derive(Default)]
pub struct ServerBuilder {
    addrs: Vec<String>,
    config: ServerConfig,
    on_start: Option<StartCallback>,
}

impl ServerBuilder {
    /// Create a new server builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listen address. The scheme picks the transport, so one server
    /// can accept TCP and WebSocket connections at once.
    #[must_use]
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of live connections.
    #[must_use]
    pub const fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set how long one handler call may run. `None` disables the limit.
    #[must_use]
    pub fn handler_timeout(mut self, limit: Option<Duration>) -> Self {
        self.config.handler_timeout_ms =
            limit.map_or(0, |limit| u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set how long a transport handshake may take.
    #[must_use]
    pub fn handshake_timeout(mut self, limit: Duration) -> Self {
        self.config.handshake_timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Run `callback` with the bound addresses once the server starts.
    #[must_use]
    pub fn on_start(mut self, callback: impl FnOnce(&[Address]) + Send + 'static) -> Self {
        self.on_start = Some(Box::new(callback));
        self
    }

    /// Bind every listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NoListeners`] if no address was added and
    /// [`ServerError::Bind`] if any address is invalid or cannot be bound.
    #[instrument(skip(self), fields(addrs = ?self.addrs))]
    pub async fn bind(self) -> Result<Server> {
        if self.addrs.is_empty() {
            return Err(ServerError::NoListeners.into());
        }

        let mut listeners = Vec::with_capacity(self.addrs.len());
        for addr in &self.addrs {
            let bind_failed = |source| ServerError::Bind {
                addr: addr.clone(),
                source,
            };
            let address: Address = addr.parse().map_err(bind_failed)?;
            let transport = transport_for(address.kind(), self.config.max_frame_size);
            let listener = transport.bind(&address).await.map_err(bind_failed)?;

            info!("Listening on {}", listener.local_addr());
            listeners.push(listener);
        }

        let permits = self.config.max_connections.min(Semaphore::MAX_PERMITS);
        if permits < self.config.max_connections {
            warn!(
                "max_connections {} clamped to {}",
                self.config.max_connections, permits
            );
        }

        let local_addrs = listeners.iter().map(|l| l.local_addr()).collect();
        Ok(Server {
            inner: Arc::new(ServerInner {
                settings: ConnectionSettings::from(&self.config),
                semaphore: Arc::new(Semaphore::new(permits)),
                config: self.config,
                listeners: Mutex::new(listeners),
                local_addrs,
                connections: DashMap::new(),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                on_start: Mutex::new(self.on_start),
            }),
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("addrs", &self.addrs)
            .field("config", &self.config)
            .field("on_start", &self.on_start.is_some())
            .finish()
    }
}

struct ServerInner {
    config: ServerConfig,
    settings: ConnectionSettings,
    listeners: Mutex<Vec<Box<dyn Listener>>>,
    local_addrs: Vec<Address>,
    connections: DashMap<u64, Connection>,
    started: AtomicBool,
    shutdown: CancellationToken,
    semaphore: Arc<Semaphore>,
    on_start: Mutex<Option<StartCallback>>,
}

/// A bound server.
///
/// Dropping the server stops accepting and aborts every live connection.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a new server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Addresses actually bound, with port 0 resolved.
    #[must_use]
    pub fn local_addrs(&self) -> &[Address] {
        &self.inner.local_addrs
    }

    /// Live connections across all listeners.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Whether [`Server::start`] has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Start accepting connections, serving each with `handler`.
    ///
    /// Returns once the accept loops are running.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyStarted`] on a second call and
    /// [`ServerError::Closed`] once [`Server::close`] has run.
    pub fn start<H: RequestHandler>(&self, handler: H) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ServerError::Closed.into());
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted.into());
        }

        let handler: Arc<dyn RequestHandler> = Arc::new(handler);
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for listener in listeners {
            tokio::spawn(accept_loop(
                Arc::clone(&self.inner),
                listener,
                Arc::clone(&handler),
            ));
        }

        info!("Server started on {} listeners", self.inner.local_addrs.len());
        let on_start = self.inner.on_start.lock().take();
        if let Some(callback) = on_start {
            callback(&self.inner.local_addrs);
        }
        Ok(())
    }

    /// Start and wait until [`Server::close`] is called.
    ///
    /// # Errors
    ///
    /// See [`Server::start`].
    pub async fn serve<H: RequestHandler>(&self, handler: H) -> Result<()> {
        self.start(handler)?;
        self.inner.shutdown.cancelled().await;
        Ok(())
    }

    /// Stop accepting and close every live connection.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.listeners.lock().clear();

        let connections: Vec<Connection> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        debug!("Closing {} live connections", connections.len());
        join_all(connections.iter().map(Connection::close)).await;

        info!("Server closed");
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addrs", &self.inner.local_addrs)
            .field("config", &self.inner.config)
            .field("connections", &self.connection_count())
            .field("started", &self.is_started())
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        for entry in &self.inner.connections {
            entry.value().abort();
        }
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: Box<dyn Listener>,
    handler: Arc<dyn RequestHandler>,
) {
    let local = listener.local_addr();
    loop {
        let accepted = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(accepted) => {
                let Ok(permit) = Arc::clone(&inner.semaphore).try_acquire_owned() else {
                    warn!(
                        "Max connections reached, rejecting connection from {}",
                        accepted.peer
                    );
                    continue;
                };
                tokio::spawn(handle_connection(
                    Arc::clone(&inner),
                    accepted,
                    Arc::clone(&handler),
                    permit,
                ));
            }
            Err(e) => {
                error!("Failed to accept connection on {}: {}", local, e);
            }
        }
    }
    info!("Stopped listening on {}", local);
}

async fn handle_connection(
    inner: Arc<ServerInner>,
    accepted: Accepted,
    handler: Arc<dyn RequestHandler>,
    permit: OwnedSemaphorePermit,
) {
    let Accepted { peer, handshake } = accepted;
    let limit = inner.config.handshake_timeout();

    let handshake = tokio::select! {
        biased;
        () = inner.shutdown.cancelled() => return,
        handshake = timeout(limit, handshake) => handshake,
    };
    let duplex = match handshake {
        Ok(Ok(duplex)) => duplex,
        Ok(Err(e)) => {
            warn!("Handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("Handshake with {} timed out after {:?}", peer, limit);
            return;
        }
    };

    handler.on_connect(peer).await;
    let connection = Connection::accept(duplex, &inner.settings, Arc::clone(&handler));
    let id = connection.id();
    inner.connections.insert(id, connection.clone());

    // Shutdown may have swept the table before this insert
    if inner.shutdown.is_cancelled() {
        connection.close().await;
    }
    connection.closed().await;

    drop(permit);
    inner.connections.remove(&id);
    handler.on_disconnect(peer).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::handler::EchoHandler;

    #[tokio::test]
    async fn test_bind_without_listeners() {
        let err = ServerBuilder::new().bind().await.unwrap_err();
        assert!(matches!(err, Error::Server(ServerError::NoListeners)));
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let err = ServerBuilder::new()
            .listen("udp://127.0.0.1:0")
            .bind()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let server = Server::builder()
            .listen("127.0.0.1:0")
            .bind()
            .await
            .unwrap();
        assert!(!server.is_started());

        server.start(EchoHandler).unwrap();
        assert!(server.is_started());
        let err = server.start(EchoHandler).unwrap_err();
        assert!(matches!(err, Error::Server(ServerError::AlreadyStarted)));

        server.close().await;
    }

    #[tokio::test]
    async fn test_start_after_close() {
        let server = Server::builder()
            .listen("127.0.0.1:0")
            .bind()
            .await
            .unwrap();
        server.close().await;

        let err = server.start(EchoHandler).unwrap_err();
        assert!(matches!(err, Error::Server(ServerError::Closed)));
        assert!(!server.is_started());

        let err = server.serve(EchoHandler).await.unwrap_err();
        assert!(matches!(err, Error::Server(ServerError::Closed)));
    }

    #[tokio::test]
    async fn test_unbounded_max_connections_is_clamped() {
        let config = ServerConfig {
            max_connections: usize::MAX,
            ..ServerConfig::default()
        };
        let server = Server::builder()
            .listen("127.0.0.1:0")
            .config(config)
            .bind()
            .await
            .unwrap();
        assert_eq!(
            server.inner.semaphore.available_permits(),
            Semaphore::MAX_PERMITS
        );
        server.close().await;
    }

    #[tokio::test]
    async fn test_port_zero_is_resolved() {
        let server = Server::builder()
            .listen("tcp://127.0.0.1:0")
            .listen("ws://127.0.0.1:0/rsocket")
            .bind()
            .await
            .unwrap();

        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 2);
        for addr in addrs {
            assert!(!addr.authority().ends_with(":0"), "{addr}");
        }
    }

    #[test]
    fn test_builder_overrides() {
        let builder = ServerBuilder::new()
            .max_connections(2)
            .handler_timeout(None)
            .handshake_timeout(Duration::from_millis(100));
        assert_eq!(builder.config.max_connections, 2);
        assert_eq!(builder.config.handler_timeout(), None);
        assert_eq!(builder.config.handshake_timeout_ms, 100);
    }
}
