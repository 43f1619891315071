//! Transport addresses

use crate::TransportKind;
use crate::error::TransportError;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use url::{Host, Url};

/// Where to connect or listen, with the transport selected by scheme.
///
/// - `tcp://host:port` or a bare `host:port` selects TCP
/// - `ws://host:port/path` or `wss://host:port/path` selects WebSocket
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// Raw TCP byte stream.
    Tcp {
        /// Host name or IP literal, without brackets.
        host: String,
        /// Port.
        port: u16,
    },
    /// WebSocket, one frame per binary message.
    WebSocket(Url),
}

impl Address {
    /// TCP address for a socket address.
    #[must_use]
    pub fn tcp(addr: SocketAddr) -> Self {
        Self::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// WebSocket address for a socket address and request path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not form a valid URL.
    pub fn websocket(addr: SocketAddr, path: &str) -> Result<Self, TransportError> {
        let path = path.trim_start_matches('/');
        format!("ws://{addr}/{path}").parse()
    }

    /// The transport this address selects.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp { .. } => TransportKind::Tcp,
            Self::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    /// `host:port`, suitable for connecting or binding a TCP socket.
    #[must_use]
    pub fn authority(&self) -> String {
        match self {
            Self::Tcp { host, port } => join_host_port(host, *port),
            Self::WebSocket(url) => {
                let host = match url.host() {
                    Some(Host::Ipv6(ip)) => ip.to_string(),
                    Some(host) => host.to_string(),
                    None => String::new(),
                };
                join_host_port(&host, url.port_or_known_default().unwrap_or(80))
            }
        }
    }

    /// Whether this is a `wss://` address.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::WebSocket(url) if url.scheme() == "wss")
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, _) = s.split_once("://").unwrap_or(("tcp", s));

        match scheme {
            "tcp" => {
                let with_scheme = if s.contains("://") {
                    s.to_string()
                } else {
                    format!("tcp://{s}")
                };
                let url = Url::parse(&with_scheme)
                    .map_err(|e| TransportError::invalid_address(format!("{s}: {e}")))?;

                if !(url.path().is_empty() || url.path() == "/") || url.query().is_some() {
                    return Err(TransportError::invalid_address(format!(
                        "{s}: TCP addresses take no path or query"
                    )));
                }
                let host = match url.host() {
                    Some(Host::Domain(domain)) => domain.to_string(),
                    Some(Host::Ipv4(ip)) => ip.to_string(),
                    Some(Host::Ipv6(ip)) => ip.to_string(),
                    None => {
                        return Err(TransportError::invalid_address(format!("{s}: missing host")));
                    }
                };
                if host.is_empty() {
                    return Err(TransportError::invalid_address(format!("{s}: missing host")));
                }
                let port = url
                    .port()
                    .ok_or_else(|| TransportError::invalid_address(format!("{s}: missing port")))?;

                Ok(Self::Tcp { host, port })
            }
            "ws" | "wss" => {
                let url = Url::parse(s)
                    .map_err(|e| TransportError::invalid_address(format!("{s}: {e}")))?;
                if url.host_str().is_none_or(str::is_empty) {
                    return Err(TransportError::invalid_address(format!("{s}: missing host")));
                }
                Ok(Self::WebSocket(url))
            }
            other => Err(TransportError::invalid_address(format!(
                "{s}: unsupported scheme '{other}'"
            ))),
        }
    }
}

impl TryFrom<&str> for Address {
    type Error = TransportError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}", join_host_port(host, *port)),
            Self::WebSocket(url) => write!(f, "{url}"),
        }
    }
}
