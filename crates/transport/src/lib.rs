//! Generic transport abstraction for frame-oriented connections
//!
//! This crate provides a transport-agnostic interface for moving protocol
//! frames between two peers. Specific transport implementations (TCP,
//! WebSocket) are provided in separate crates.
//!
//! Transports handle:
//! - Establishing and accepting connections for an [`Address`]
//! - Splitting a connection into a frame sink and a frame stream
//! - Mapping wire and socket failures onto [`TransportError`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod error;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Sink, Stream};
use rsocket_protocol::Frame;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;

pub use address::Address;
pub use error::TransportError;
pub use error::TransportError as Error;

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a connection. Ends when the peer closes cleanly.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Which transport a connection runs over
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Raw TCP byte stream
    Tcp,
    /// WebSocket binary messages
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::WebSocket => f.write_str("websocket"),
        }
    }
}

/// An established connection split into its two directions
pub struct Duplex {
    /// Frames written here are sent to the peer in order
    pub sink: FrameSink,
    /// Frames received from the peer
    pub stream: FrameStream,
    /// Remote socket address
    pub peer: SocketAddr,
    /// Transport in use
    pub kind: TransportKind,
}

impl fmt::Debug for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex")
            .field("peer", &self.peer)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A connection that has been accepted but not yet set up
///
/// The handshake runs separately from the accept loop so a slow peer cannot
/// hold up other connections.
pub struct Accepted {
    /// Remote socket address
    pub peer: SocketAddr,
    /// Completes the transport-level handshake
    pub handshake: BoxFuture<'static, Result<Duplex, TransportError>>,
}

impl fmt::Debug for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Transport trait for establishing connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Connect to a peer
    async fn connect(&self, addr: &Address) -> Result<Duplex, TransportError>;

    /// Start listening for connections
    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>, TransportError>;
}

/// Listener trait for accepting connections
///
/// Dropping the listener stops listening.
#[async_trait]
pub trait Listener: Send + Sync + fmt::Debug {
    /// The address actually bound, with any port 0 resolved
    fn local_addr(&self) -> Address;

    /// Wait for the next connection
    async fn accept(&self) -> Result<Accepted, TransportError>;
}

/// Reject an address that belongs to a different transport
///
/// # Errors
///
/// Returns [`TransportError::InvalidAddress`] if the address selects another
/// transport.
pub fn expect_kind(addr: &Address, kind: TransportKind) -> Result<(), TransportError> {
    if addr.kind() == kind {
        Ok(())
    } else {
        Err(TransportError::invalid_address(format!(
            "{addr} is not a {kind} address"
        )))
    }
}
