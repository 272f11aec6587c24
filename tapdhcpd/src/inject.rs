//! Raw L2 injection: an `AF_PACKET`/`SOCK_RAW` socket bound to one interface,
//! used to write a fully-formed Ethernet frame onto the wire.

use std::io;
use std::os::fd::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("failed to open raw socket: {0}")]
    Open(#[source] io::Error),
    #[error("failed to bind raw socket to ifindex {ifindex}: {source}")]
    Bind {
        ifindex: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to send frame: {0}")]
    Send(#[source] io::Error),
}

/// One `AF_PACKET` socket bound to a single interface by ifindex.
///
/// Injection is best-effort and non-blocking; callers log a [`InjectError`]
/// and move on rather than retrying or propagating it as a fatal condition.
pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    /// Open and bind a raw socket to `ifindex`, ready to send full Ethernet
    /// frames on that interface only.
    pub fn bind(ifindex: u32) -> Result<Self, InjectError> {
        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from(libc::ETH_P_ALL)),
        )
        .map_err(InjectError::Open)?;

        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = ifindex as i32;

        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(InjectError::Bind {
                ifindex,
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self { socket })
    }

    /// Write `frame` (a complete Ethernet frame) onto the bound interface.
    pub fn send(&self, frame: &[u8]) -> Result<(), InjectError> {
        let ret = unsafe {
            libc::send(
                self.socket.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if ret < 0 {
            return Err(InjectError::Send(io::Error::last_os_error()));
        }
        Ok(())
    }
}
