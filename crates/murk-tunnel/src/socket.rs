//! Remote socket construction with OS-level option tuning.
//!
//! The relay dials its remote peer through sockets built here so every
//! connection carries the same option set: keep-alive and linger
//! defaults, type-of-service, suppressed SIGPIPE, cleared don't-fragment,
//! plus TCP_NODELAY and TCP fast-open per configuration. Options the OS
//! refuses are logged and skipped; only socket creation itself is fatal.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpSocket;
use tracing::debug;

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use murk_core::defaults::MIN_PORT;

/// IP type-of-service applied to remote sockets (low delay).
const IPTOS_LOWDELAY: u32 = 0x10;

/// Build a tokio `TcpSocket` for dialing `peer`, tuned per `config`.
///
/// Rejects unspecified and multicast addresses and out-of-range ports
/// before touching the OS.
pub fn remote_socket(config: &TunnelConfig, peer: SocketAddr) -> Result<TcpSocket, TunnelError> {
    let ip = peer.ip();
    if ip.is_unspecified() {
        return Err(TunnelError::InvalidArgument("unspecified remote address"));
    }
    if ip.is_multicast() {
        return Err(TunnelError::InvalidArgument("multicast remote address"));
    }
    if peer.port() <= MIN_PORT {
        return Err(TunnelError::InvalidArgument("remote port out of range"));
    }

    let domain = if peer.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    // Platform-uniform defaults. Refusals here are tolerable; the
    // connection still works without them.
    if let Err(e) = socket.set_keepalive(true) {
        debug!(error = %e, "SO_KEEPALIVE not applied");
    }
    if let Err(e) = socket.set_linger(None) {
        debug!(error = %e, "SO_LINGER not applied");
    }
    if let Err(e) = socket.set_tos(IPTOS_LOWDELAY) {
        debug!(error = %e, "IP_TOS not applied");
    }
    set_no_sigpipe(&socket);
    clear_dont_fragment(&socket, peer.is_ipv4());

    if let Err(e) = socket.set_nodelay(config.turbo) {
        debug!(error = %e, "TCP_NODELAY not applied");
    }
    if config.fast_open {
        set_fast_open(&socket);
    }

    Ok(TcpSocket::from_std_stream(std::net::TcpStream::from(socket)))
}

/// Factory overload that derives the endpoint from the configured
/// peer-facing `inbound` address instead of a resolved one.
pub fn remote_socket_from_config(config: &TunnelConfig) -> Result<TcpSocket, TunnelError> {
    let ip = config.inbound.ip.parse::<std::net::IpAddr>()?;
    remote_socket(config, SocketAddr::new(ip, config.inbound.port))
}

#[cfg(unix)]
fn setsockopt_int(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Keep writes on a dead peer returning EPIPE instead of raising SIGPIPE.
/// Linux handles this per-send with MSG_NOSIGNAL inside the runtime; only
/// Apple platforms need the socket option.
#[cfg(target_vendor = "apple")]
fn set_no_sigpipe(socket: &Socket) {
    if let Err(e) = setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1) {
        debug!(error = %e, "SO_NOSIGPIPE not applied");
    }
}

#[cfg(not(target_vendor = "apple"))]
fn set_no_sigpipe(_socket: &Socket) {}

/// Clear the don't-fragment bit so mid-path MTU drops fragment instead of
/// blackholing. Only expressible on Linux (per-packet DF via PMTU mode).
#[cfg(target_os = "linux")]
fn clear_dont_fragment(socket: &Socket, is_ipv4: bool) {
    if !is_ipv4 {
        return;
    }
    if let Err(e) = setsockopt_int(
        socket,
        libc::IPPROTO_IP,
        libc::IP_MTU_DISCOVER,
        libc::IP_PMTUDISC_DONT,
    ) {
        debug!(error = %e, "IP_MTU_DISCOVER not applied");
    }
}

#[cfg(not(target_os = "linux"))]
fn clear_dont_fragment(_socket: &Socket, _is_ipv4: bool) {}

/// Request TCP fast-open on the connect side.
#[cfg(target_os = "linux")]
fn set_fast_open(socket: &Socket) {
    if let Err(e) = setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN_CONNECT, 1) {
        debug!(error = %e, "TCP_FASTOPEN_CONNECT not applied");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_fast_open(_socket: &Socket) {
    debug!("tcp fast-open not supported on this platform");
}
