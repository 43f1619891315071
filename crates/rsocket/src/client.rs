//! Client side of the protocol.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionSettings, ConnectionState};
use crate::error::{ConnectionError, Error, Result};
use crate::metrics::MetricsSnapshot;
use crate::tracker::ResponseHandle;
use rsocket_protocol::Payload;
use rsocket_transport::{Address, TransportError, TransportKind, expect_kind};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, instrument};

/// Builder for creating clients.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how long connecting may take.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set how many request-response calls may await a reply at once.
    #[must_use]
    pub const fn max_pending_requests(mut self, max: usize) -> Self {
        self.config.max_pending_requests = max;
        self
    }

    /// Set how many frames may wait in the outbound queue.
    #[must_use]
    pub const fn outbound_queue_size(mut self, size: usize) -> Self {
        self.config.outbound_queue_size = size;
        self
    }

    /// Set the largest frame sent or accepted.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Connect to `addr`, choosing the transport from its scheme.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the address is invalid, the handshake
    /// fails or it does not finish within the connect timeout.
    #[instrument(skip(self))]
    pub async fn connect(self, addr: &str) -> Result<Client> {
        let address = parse(addr)?;
        self.connect_to(address).await
    }

    /// Connect over TCP. Accepts `host:port` or `tcp://host:port`.
    ///
    /// # Errors
    ///
    /// As [`ClientBuilder::connect`]; a WebSocket address is rejected.
    #[instrument(skip(self))]
    pub async fn connect_tcp(self, addr: &str) -> Result<Client> {
        let address = parse_kind(addr, TransportKind::Tcp)?;
        self.connect_to(address).await
    }

    /// Connect over WebSocket. Accepts `ws://host:port/path`.
    ///
    /// # Errors
    ///
    /// As [`ClientBuilder::connect`]; a TCP address is rejected.
    #[instrument(skip(self))]
    pub async fn connect_websocket(self, url: &str) -> Result<Client> {
        let address = parse_kind(url, TransportKind::WebSocket)?;
        self.connect_to(address).await
    }

    /// Connect to an already parsed address.
    ///
    /// # Errors
    ///
    /// As [`ClientBuilder::connect`].
    pub async fn connect_to(self, addr: Address) -> Result<Client> {
        let settings = ConnectionSettings::from(&self.config);
        let connection =
            Connection::connect(&addr, &settings, self.config.connect_timeout()).await?;
        info!("Connected to {} as connection {}", addr, connection.id());

        Ok(Client {
            connection,
            addr,
        })
    }
}

fn parse(addr: &str) -> Result<Address> {
    addr.parse().map_err(|source| connect_failed(addr, source))
}

fn parse_kind(addr: &str, kind: TransportKind) -> Result<Address> {
    let address = parse(addr)?;
    expect_kind(&address, kind).map_err(|source| connect_failed(addr, source))?;
    Ok(address)
}

fn connect_failed(addr: &str, source: TransportError) -> Error {
    ConnectionError::ConnectFailed {
        addr: addr.to_string(),
        source,
    }
    .into()
}

/// A connection to a server that issues requests.
///
/// Dropping the client closes the connection without flushing; call
/// [`Client::close`] to let queued frames go out first.
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    addr: Address,
}

impl Client {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect over TCP with default configuration.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::connect_tcp`].
    pub async fn connect_tcp(addr: &str) -> Result<Self> {
        ClientBuilder::new().connect_tcp(addr).await
    }

    /// Connect over WebSocket with default configuration.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::connect_websocket`].
    pub async fn connect_websocket(url: &str) -> Result<Self> {
        ClientBuilder::new().connect_websocket(url).await
    }

    /// Send a request and get a handle to its single reply.
    ///
    /// The payload is moved into the request. The call returns once the
    /// frame is queued; await the handle for the reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::request_response`].
    pub fn request_response(&self, payload: Payload) -> Result<ResponseHandle> {
        self.connection.request_response(payload)
    }

    /// Send a request that gets no reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::fire_and_forget`].
    pub fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        self.connection.fire_and_forget(payload)
    }

    /// Flush queued frames and close the connection. Pending requests fail
    /// with a closed-connection error.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether requests can currently be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.connection.pending_requests()
    }

    /// Request and byte counters for this client's connection.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.connection.metrics()
    }

    /// Server socket address.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.connection.peer()
    }

    /// Address this client connected to.
    #[must_use]
    pub const fn addr(&self) -> &Address {
        &self.addr
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_wrong_scheme_is_rejected_before_dialing() {
        let err = Client::connect_tcp("ws://127.0.0.1:1/socket")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::ConnectFailed {
                source: TransportError::InvalidAddress(_),
                ..
            })
        ));

        let err = Client::connect_websocket("127.0.0.1:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_garbage_address_is_a_connection_error() {
        let err = ClientBuilder::new()
            .connect("quic://127.0.0.1:1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = ClientBuilder::new()
            .connect_timeout(Duration::from_millis(250))
            .max_pending_requests(4)
            .outbound_queue_size(8)
            .max_frame_size(1024);
        assert_eq!(builder.config.connect_timeout_ms, 250);
        assert_eq!(builder.config.max_pending_requests, 4);
        assert_eq!(builder.config.outbound_queue_size, 8);
        assert_eq!(builder.config.max_frame_size, 1024);
    }
}
