//! WebSocket transport implementation
//!
//! Each binary WebSocket message carries exactly one frame. Ping and pong
//! are answered by the WebSocket layer; text messages are rejected.
//!
//! Only plain `ws://` is supported; `wss://` addresses are refused at
//! connect and bind time.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use rsocket_protocol::{Frame, FrameCodec, MAX_FRAME_SIZE, ProtocolError};
use rsocket_transport::{
    Accepted, Address, Duplex, Listener, Transport, TransportError, TransportKind, expect_kind,
};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};
use url::Url;

/// WebSocket-specific configuration
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    /// Largest frame accepted or sent, in bytes
    pub max_frame_size: usize,
    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

/// WebSocket transport implementation
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport
    #[must_use]
    pub const fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    fn codec(&self) -> FrameCodec {
        FrameCodec::new().with_max_frame_size(self.config.max_frame_size)
    }
}

fn ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        WsError::Io(err) => TransportError::from(err),
        other => TransportError::WebSocket(other.to_string()),
    }
}

fn reject_secure(addr: &Address) -> Result<(), TransportError> {
    if addr.is_secure() {
        return Err(TransportError::invalid_address(format!(
            "{addr}: wss:// is not supported"
        )));
    }
    Ok(())
}

/// Translate one WebSocket message into at most one frame
fn message_to_frame(
    codec: &FrameCodec,
    message: Result<Message, WsError>,
) -> Option<Result<Frame, TransportError>> {
    match message {
        Ok(Message::Binary(bytes)) => Some(codec.decode_frame(bytes).map_err(TransportError::from)),
        Ok(Message::Text(text)) => Some(Err(ProtocolError::UnexpectedMessage(format!(
            "text message of {} bytes",
            text.as_str().len()
        ))
        .into())),
        // Control traffic is handled by tungstenite; Close ends the stream
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
        Err(err) => Some(Err(ws_error(err))),
    }
}

/// Wrap an upgraded WebSocket as a frame sink and stream
fn into_duplex<S>(ws: WebSocketStream<S>, codec: FrameCodec, peer: SocketAddr) -> Duplex
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink.sink_map_err(ws_error).with(move |frame: Frame| {
        future::ready(
            codec
                .encode_frame(&frame)
                .map(Message::Binary)
                .map_err(TransportError::from),
        )
    });
    let stream = stream.filter_map(move |message| future::ready(message_to_frame(&codec, message)));

    Duplex {
        sink: Box::pin(sink),
        stream: Box::pin(stream),
        peer,
        kind: TransportKind::WebSocket,
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn connect(&self, addr: &Address) -> Result<Duplex, TransportError> {
        expect_kind(addr, TransportKind::WebSocket)?;
        reject_secure(addr)?;
        let Address::WebSocket(url) = addr else {
            return Err(TransportError::invalid_address(addr.to_string()));
        };

        let stream = TcpStream::connect(addr.authority()).await?;
        stream.set_nodelay(self.config.nodelay)?;
        let peer = stream.peer_addr()?;

        debug!("Connecting to WebSocket at {}", url);
        let (ws, _response) = tokio_tungstenite::client_async(url.as_str(), stream)
            .await
            .map_err(ws_error)?;
        debug!("WebSocket connection established to {}", url);

        Ok(into_duplex(ws, self.codec(), peer))
    }

    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>, TransportError> {
        expect_kind(addr, TransportKind::WebSocket)?;
        reject_secure(addr)?;
        let Address::WebSocket(url) = addr else {
            return Err(TransportError::invalid_address(addr.to_string()));
        };

        let listener = TcpListener::bind(addr.authority()).await?;
        let local_addr = listener.local_addr()?;
        let path = url.path().to_string();
        info!("WebSocket transport listening on {}{}", local_addr, path);

        Ok(Box::new(WebSocketListener {
            listener,
            local_addr,
            path,
            config: self.config,
        }))
    }
}

/// Listener upgrading accepted sockets to WebSocket
///
/// The upgrade is accepted for any request path.
#[derive(Debug)]
struct WebSocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    path: String,
    config: WebSocketConfig,
}

#[async_trait]
impl Listener for WebSocketListener {
    fn local_addr(&self) -> Address {
        let url = format!("ws://{}{}", self.local_addr, self.path);
        match Url::parse(&url) {
            Ok(url) => Address::WebSocket(url),
            Err(_) => Address::tcp(self.local_addr),
        }
    }

    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("Accepted TCP connection from {} for WebSocket upgrade", peer);

        let codec = FrameCodec::new().with_max_frame_size(self.config.max_frame_size);
        let nodelay = self.config.nodelay;

        Ok(Accepted {
            peer,
            handshake: Box::pin(async move {
                stream.set_nodelay(nodelay)?;
                let ws = tokio_tungstenite::accept_async(stream)
                    .await
                    .map_err(ws_error)?;
                debug!("WebSocket handshake completed with {}", peer);
                Ok::<_, TransportError>(into_duplex(ws, codec, peer))
            }),
        })
    }
}
