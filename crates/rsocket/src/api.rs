//! Flat surface for language bindings.
//!
//! Bindings call [`init`] once, report [`version`], and map every [`Error`]
//! to a [`StatusCode`] for their own error convention.

use crate::error::{ConnectionError, Error, ResourceError, ServerError};
use tracing_subscriber::EnvFilter;

/// Numeric outcome reported across the binding boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// The operation succeeded.
    Success = 0,
    /// Connecting or binding failed.
    ConnectionFailure = 1,
    /// A request could not be sent.
    SendFailure = 2,
    /// The peer broke the wire protocol.
    ProtocolViolation = 3,
    /// A handler failed.
    HandlerFailure = 4,
    /// A local limit was hit.
    ResourceFailure = 5,
}

impl StatusCode {
    /// The raw code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Whether this is [`StatusCode::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Connection(ConnectionError::ConnectFailed { .. } | ConnectionError::Timeout { .. })
            | Error::Server(ServerError::Bind { .. }) => Self::ConnectionFailure,
            Error::Connection(_) | Error::Resource(ResourceError::QueueFull { .. }) => {
                Self::SendFailure
            }
            Error::Protocol(_) => Self::ProtocolViolation,
            Error::Handler(_) => Self::HandlerFailure,
            Error::Resource(_) | Error::Server(_) => Self::ResourceFailure,
        }
    }
}

impl<T> From<&crate::error::Result<T>> for StatusCode {
    fn from(result: &crate::error::Result<T>) -> Self {
        result.as_ref().map_or_else(Self::from, |_| Self::Success)
    }
}

/// Install the default `tracing` subscriber, filtered by `RUST_LOG`
/// (`info` when unset).
///
/// Safe to call repeatedly; an already installed subscriber is kept.
pub fn init() -> StatusCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    StatusCode::Success
}

/// Version of this library.
#[must_use]
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
