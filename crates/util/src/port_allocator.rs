//! Hands out free localhost ports to tests running in parallel.

use std::{
    collections::hash_map::RandomState,
    hash::BuildHasher,
    net::{Ipv4Addr, SocketAddr, TcpListener},
    sync::{LazyLock, Mutex, PoisonError},
};

const FIRST_PORT: u16 = 20000;
const PORT_SPAN: u16 = 20000;

/// Next candidate port. Starts at a random offset so concurrent test
/// binaries rarely probe the same ports.
static NEXT_PORT: LazyLock<Mutex<u16>> = LazyLock::new(|| {
    let offset = RandomState::new().hash_one(std::process::id()) % u64::from(PORT_SPAN);
    // offset < PORT_SPAN, so it fits in u16
    Mutex::new(FIRST_PORT + u16::try_from(offset).unwrap_or(0))
});

/// Allocate a port that nothing on 127.0.0.1 is currently bound to.
///
/// # Panics
///
/// Panics if every port in the range is taken.
#[must_use]
pub fn allocate_port() -> u16 {
    let mut next = NEXT_PORT.lock().unwrap_or_else(PoisonError::into_inner);

    for _ in 0..PORT_SPAN {
        let port = *next;
        *next = if port + 1 >= FIRST_PORT + PORT_SPAN {
            FIRST_PORT
        } else {
            port + 1
        };

        if is_port_available(port) {
            return port;
        }
    }

    panic!("no free port in {FIRST_PORT}..{}", FIRST_PORT + PORT_SPAN)
}

/// Whether a port can currently be bound on 127.0.0.1.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).is_ok()
}

/// Allocate a free 127.0.0.1 socket address.
#[must_use]
pub fn allocate_socket_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, allocate_port()))
}
