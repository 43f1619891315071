//! TCP transport implementation
//!
//! Frames are written back to back on the byte stream and read with
//! [`FrameCodec`] through a [`Framed`] adapter.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, TryStreamExt};
use rsocket_protocol::{FrameCodec, MAX_FRAME_SIZE};
use rsocket_transport::{
    Accepted, Address, Duplex, Listener, Transport, TransportError, TransportKind, expect_kind,
};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// TCP-specific configuration
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    /// Largest frame accepted or sent, in bytes
    pub max_frame_size: usize,
    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

/// TCP transport implementation
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport
    #[must_use]
    pub const fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    fn codec(&self) -> FrameCodec {
        FrameCodec::new().with_max_frame_size(self.config.max_frame_size)
    }
}

/// Wrap a connected socket as a frame sink and stream
fn into_duplex(
    stream: TcpStream,
    codec: FrameCodec,
    nodelay: bool,
) -> Result<Duplex, TransportError> {
    stream.set_nodelay(nodelay)?;
    let peer = stream.peer_addr()?;
    let (sink, stream) = Framed::new(stream, codec).split();

    Ok(Duplex {
        sink: Box::pin(sink.sink_map_err(TransportError::from)),
        stream: Box::pin(stream.map_err(TransportError::from)),
        peer,
        kind: TransportKind::Tcp,
    })
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn connect(&self, addr: &Address) -> Result<Duplex, TransportError> {
        expect_kind(addr, TransportKind::Tcp)?;

        let stream = TcpStream::connect(addr.authority()).await?;
        debug!("TCP connection established to {}", addr);

        into_duplex(stream, self.codec(), self.config.nodelay)
    }

    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>, TransportError> {
        expect_kind(addr, TransportKind::Tcp)?;

        let listener = TcpListener::bind(addr.authority()).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP transport listening on {}", local_addr);

        Ok(Box::new(TcpFrameListener {
            listener,
            local_addr,
            config: self.config,
        }))
    }
}

/// Listener handing out framed TCP connections
#[derive(Debug)]
struct TcpFrameListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: TcpConfig,
}

#[async_trait]
impl Listener for TcpFrameListener {
    fn local_addr(&self) -> Address {
        Address::tcp(self.local_addr)
    }

    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("Accepted TCP connection from {}", peer);

        let codec = FrameCodec::new().with_max_frame_size(self.config.max_frame_size);
        let nodelay = self.config.nodelay;

        Ok(Accepted {
            peer,
            handshake: Box::pin(async move { into_duplex(stream, codec, nodelay) }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.max_frame_size, 10 * 1024 * 1024);
        assert!(config.nodelay);
    }

    #[tokio::test]
    async fn test_rejects_websocket_address() {
        let transport = TcpTransport::default();
        let addr: Address = "ws://127.0.0.1:1/".parse().unwrap();

        let err = transport.connect(&addr).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));

        let err = transport.bind(&addr).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_bind_port_zero_reports_real_port() {
        let transport = TcpTransport::default();
        let listener = transport
            .bind(&"127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        match listener.local_addr() {
            Address::Tcp { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_ne!(port, 0);
            }
            other => panic!("unexpected address {other}"),
        }
    }
}
