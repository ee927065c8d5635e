//! Listener construction and accept-error handling.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Pause before accepting again after a listener-level failure.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Create a TCP listener with SO_REUSEADDR enabled.
///
/// SO_REUSEPORT stays off: a port held by a live listener must surface as
/// `AddrInUse` so the caller can retry.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // TIME_WAIT leftovers from a closed instance must not block a rebind
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// How long to wait before the next `accept` after `err`.
///
/// A peer that hung up before its connection was accepted only costs that
/// connection. Anything else (EMFILE, ENFILE, ENOBUFS) persists until some
/// descriptor or buffer is released, so retrying at once would spin.
pub fn accept_retry_delay(err: &io::Error) -> Duration {
    match err.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_ERROR_BACKOFF,
    }
}
