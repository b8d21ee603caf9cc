//! Socket utilities and tuning

use anyhow::Result;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Socket buffer sizes for QUIC endpoints
pub const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024; // 4MB
pub const SEND_BUFFER_SIZE: usize = 4 * 1024 * 1024; // 4MB

/// Create a UDP socket for a worker's QUIC endpoint.
///
/// With `reuse_port` every worker binds the same address and the kernel
/// spreads incoming flows across them.
pub fn create_udp_socket(addr: SocketAddr, reuse_port: bool) -> Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    #[cfg(all(unix, not(target_os = "macos")))]
    if reuse_port {
        set_reuse_port(&socket)?;
    }
    #[cfg(not(all(unix, not(target_os = "macos"))))]
    let _ = reuse_port;

    socket.set_recv_buffer_size(RECV_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

#[cfg(all(unix, not(target_os = "macos")))]
fn set_reuse_port(socket: &Socket) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let optval: libc::c_int = 1;
    // SAFETY: the fd is owned by `socket` and optval outlives the call
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
