//! Raw link-layer transport
//!
//! Uses an `AF_PACKET` datagram socket bound to the drone EtherType, so the
//! kernel builds the Ethernet header and only frames of our protocol are
//! delivered back to us.
//!
//! Requirements:
//! - CAP_NET_RAW (or root)

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{LinkConfig, LinkError, LinkResult, MacAddr, Transport};
use crate::protocol::MARKER;

/// Smallest Ethernet payload; shorter frames are padded
const MIN_PAYLOAD: usize = 46;

/// Receive buffer size, one standard MTU
const RECV_BUFFER: usize = 1500;

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use super::MacAddr;

    /// Non-blocking `AF_PACKET` socket, closed on drop
    pub struct PacketSocket {
        fd: OwnedFd,
        ifindex: i32,
        protocol: u16,
    }

    impl AsRawFd for PacketSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

    pub fn interface_index(name: &str) -> io::Result<Option<i32>> {
        let c_name = std::ffi::CString::new(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        Ok((index != 0).then_some(index as i32))
    }

    fn link_addr(ifindex: i32, protocol: u16, addr: Option<MacAddr>) -> libc::sockaddr_ll {
        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = protocol.to_be();
        sll.sll_ifindex = ifindex;
        if let Some(MacAddr(octets)) = addr {
            sll.sll_halen = 6;
            sll.sll_addr[..6].copy_from_slice(&octets);
        }
        sll
    }

    impl PacketSocket {
        pub fn open(ifindex: i32, ether_type: u16) -> io::Result<Self> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    ether_type.to_be() as libc::c_int,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let socket = Self {
                fd: unsafe { OwnedFd::from_raw_fd(fd) },
                ifindex,
                protocol: ether_type,
            };

            let sll = link_addr(ifindex, ether_type, None);
            let ret = unsafe {
                libc::bind(
                    socket.as_raw_fd(),
                    &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(socket)
        }

        pub fn send_to(&self, payload: &[u8], destination: MacAddr) -> io::Result<usize> {
            let sll = link_addr(self.ifindex, self.protocol, Some(destination));
            let sent = unsafe {
                libc::sendto(
                    self.as_raw_fd(),
                    payload.as_ptr() as *const libc::c_void,
                    payload.len(),
                    0,
                    &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if sent < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(sent as usize)
        }

        /// Receive one frame; returns its length and whether we sent it
        pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
            let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let received = unsafe {
                libc::recvfrom(
                    self.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut sll as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut len,
                )
            };
            if received < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok((received as usize, sll.sll_pkttype == libc::PACKET_OUTGOING))
        }
    }
}

/// Transport over a raw link-layer socket
pub struct RawLink {
    config: LinkConfig,
    #[cfg(target_os = "linux")]
    socket: tokio::io::unix::AsyncFd<sys::PacketSocket>,
    in_flight: AtomicBool,
}

/// Marks a request as pending; released on drop, even if the exchange is cancelled
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> LinkResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LinkError::InFlight)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RawLink {
    /// Open a socket on the configured interface
    #[cfg(target_os = "linux")]
    pub fn open(config: LinkConfig) -> LinkResult<Self> {
        let ifindex = sys::interface_index(&config.interface)?
            .ok_or_else(|| LinkError::InterfaceNotFound(config.interface.clone()))?;
        let socket = sys::PacketSocket::open(ifindex, config.ether_type)?;

        tracing::info!(
            "Opened link on {} (index {}), ethertype {:#06x}, destination {}",
            config.interface,
            ifindex,
            config.ether_type,
            config.destination
        );

        Ok(Self {
            config,
            socket: tokio::io::unix::AsyncFd::new(socket)?,
            in_flight: AtomicBool::new(false),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_config: LinkConfig) -> LinkResult<Self> {
        Err(LinkError::Unsupported(std::env::consts::OS))
    }

    #[cfg(target_os = "linux")]
    async fn send_and_receive(
        &self,
        frame: &[u8],
        timeout: Duration,
    ) -> LinkResult<Option<Vec<u8>>> {
        let socket = self.socket.get_ref();
        let stale = drain_pending(|buf| socket.recv(buf))?;
        if stale > 0 {
            tracing::debug!("Discarded {} stale frame(s) before sending", stale);
        }

        let payload = pad_payload(frame);
        socket.send_to(&payload, self.config.destination)?;
        tracing::debug!("Sent {} bytes to {}", payload.len(), self.config.destination);

        match tokio::time::timeout(timeout, self.receive_reply()).await {
            Ok(reply) => reply.map(Some),
            Err(_) => Ok(None),
        }
    }

    #[cfg(not(target_os = "linux"))]
    async fn send_and_receive(
        &self,
        _frame: &[u8],
        _timeout: Duration,
    ) -> LinkResult<Option<Vec<u8>>> {
        Err(LinkError::Unsupported(std::env::consts::OS))
    }

    /// Wait for the first inbound frame that carries our marker
    #[cfg(target_os = "linux")]
    async fn receive_reply(&self) -> LinkResult<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let mut guard = self.socket.readable().await?;
            let (len, outgoing) = match guard.try_io(|inner| inner.get_ref().recv(&mut buf)) {
                Ok(result) => result?,
                Err(_would_block) => continue,
            };

            if outgoing {
                continue;
            }
            if !buf[..len].starts_with(&MARKER) {
                tracing::debug!("Ignoring {} byte frame without drone marker", len);
                continue;
            }

            tracing::debug!("Received {} byte reply", len);
            return Ok(buf[..len].to_vec());
        }
    }
}

#[async_trait]
impl Transport for RawLink {
    async fn exchange(&mut self, frame: &[u8], timeout: Duration) -> LinkResult<Option<Vec<u8>>> {
        let _pending = InFlightGuard::acquire(&self.in_flight)?;
        self.send_and_receive(frame, timeout).await
    }
}

/// Read and discard everything already queued on a non-blocking socket
///
/// Replies that arrive after their request timed out would otherwise be
/// taken as the reply to the next request. Returns how many frames were
/// dropped.
pub fn drain_pending<F>(mut recv: F) -> io::Result<usize>
where
    F: FnMut(&mut [u8]) -> io::Result<(usize, bool)>,
{
    let mut buf = [0u8; RECV_BUFFER];
    let mut dropped = 0;
    loop {
        match recv(&mut buf) {
            Ok(_) => dropped += 1,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(dropped),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Pad a frame up to the Ethernet minimum payload
pub fn pad_payload(frame: &[u8]) -> Vec<u8> {
    let mut payload = frame.to_vec();
    if payload.len() < MIN_PAYLOAD {
        payload.resize(MIN_PAYLOAD, b' ');
    }
    payload
}
