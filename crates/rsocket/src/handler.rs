//! Server-side request handling.

use crate::error::HandlerError;
use async_trait::async_trait;
use rsocket_protocol::Payload;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// How the peer expects a request to be answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InteractionModel {
    /// Exactly one reply is sent back.
    RequestResponse,
    /// Nothing is sent back; the handler's result is only logged.
    FireAndForget,
}

impl fmt::Display for InteractionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestResponse => f.write_str("request-response"),
            Self::FireAndForget => f.write_str("fire-and-forget"),
        }
    }
}

/// Trait for handling inbound requests.
///
/// Calls for different requests may run concurrently; implementations that
/// need serialization must provide it themselves.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request.
    ///
    /// For [`InteractionModel::FireAndForget`] the returned payload is
    /// discarded.
    async fn handle(
        &self,
        payload: Payload,
        model: InteractionModel,
    ) -> Result<Payload, HandlerError>;

    /// Called when a new connection is established.
    async fn on_connect(&self, _peer: SocketAddr) {
        // Default: do nothing
    }

    /// Called when a connection is closed.
    async fn on_disconnect(&self, _peer: SocketAddr) {
        // Default: do nothing
    }
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Payload, InteractionModel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        payload: Payload,
        model: InteractionModel,
    ) -> Result<Payload, HandlerError> {
        self(payload, model).await
    }
}

/// Handler that answers every request with the payload it was sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(
        &self,
        payload: Payload,
        _model: InteractionModel,
    ) -> Result<Payload, HandlerError> {
        Ok(payload)
    }
}
