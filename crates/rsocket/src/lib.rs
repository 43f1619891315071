//! Request-response and fire-and-forget messaging over TCP and WebSocket.
//!
//! A [`Client`] connects to a [`Server`] and issues requests carrying a
//! [`Payload`]. Request-response calls return a [`ResponseHandle`] that
//! resolves to exactly one reply; fire-and-forget calls return once the
//! frame is queued and never get one. Replies are matched to requests by id,
//! so any number of calls can be in flight on one connection and may
//! complete in any order.
//!
//! ```no_run
//! use rsocket::{Client, EchoHandler, Payload, Server};
//!
//! # async fn run() -> rsocket::Result<()> {
//! let server = Server::builder().listen("127.0.0.1:7878").bind().await?;
//! server.start(EchoHandler)?;
//!
//! let client = Client::connect_tcp("127.0.0.1:7878").await?;
//! let reply = client.request_response(Payload::from("ping"))?.await?;
//! assert_eq!(reply.data_utf8().ok(), Some("ping"));
//!
//! client.fire_and_forget(Payload::from("log-entry"))?;
//! client.close().await;
//! server.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod tracker;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ServerConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{
    ConnectionError, Error, ErrorKind, HandlerError, ResourceError, Result, ServerError,
};
pub use handler::{EchoHandler, InteractionModel, RequestHandler};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use server::{Server, ServerBuilder};
pub use tracker::{RequestTracker, ResponseHandle};

// Re-export types that are part of our public API
pub use rsocket_protocol::{Bytes, Payload, PayloadBuilder, ProtocolError, RequestId};
pub use rsocket_transport::{Address, TransportError, TransportKind};
