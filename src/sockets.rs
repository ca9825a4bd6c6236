//! Pluggable socket and randomness capabilities.
//!
//! The channel performs all I/O through the [`SocketOps`] trait so that
//! embedders can route DNS traffic over non-POSIX transports, and all
//! query-id entropy through [`RngSource`] so tests can be deterministic.

use crate::errors::Error;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

/// Opaque handle for a socket owned by the channel. Never a raw pointer;
/// evicting a socket invalidates the id rather than dangling.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Transport used by a connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

/// Per-socket knobs applied right after `open`.
#[derive(Clone, Debug, Default)]
pub struct SocketConfig {
    /// Local address to bind before connecting.
    pub bind_addr: Option<IpAddr>,

    /// Kernel send-buffer size hint.
    pub send_buffer_size: Option<usize>,

    /// Kernel receive-buffer size hint.
    pub recv_buffer_size: Option<usize>,

    /// Set TCP_NODELAY. Meaningless for UDP.
    pub tcp_nodelay: bool,

    /// Bind the socket to a named device, where the platform supports it.
    pub bind_device: Option<String>,
}

/// Socket operations the channel needs. Mirrors the classic
/// `{open, connect, send, recvfrom, close}` capability set.
///
/// All sockets must behave non-blockingly: operations that cannot complete
/// immediately return [`io::ErrorKind::WouldBlock`].
pub trait SocketOps: Send {
    /// Creates a socket for the given transport, bound per `cfg`.
    fn open(&mut self, transport: Transport, cfg: &SocketConfig) -> io::Result<SocketId>;

    /// Connects a socket to a peer. For TCP this may block briefly in the
    /// default implementation; see [`SysSockets`].
    fn connect(&mut self, id: SocketId, peer: SocketAddr) -> io::Result<()>;

    /// Sends bytes, returning how many were accepted.
    fn send(&mut self, id: SocketId, buf: &[u8]) -> io::Result<usize>;

    /// Receives bytes. For UDP the source address is returned so the
    /// caller can reject off-path datagrams; for TCP it is `None`.
    fn recv_from(&mut self, id: SocketId, buf: &mut [u8])
        -> io::Result<(usize, Option<SocketAddr>)>;

    /// Closes and forgets a socket. Unknown ids are ignored.
    fn close(&mut self, id: SocketId);

    /// The OS-level descriptor behind an id, for readiness polling.
    /// `None` when the transport has no pollable descriptor.
    fn raw_fd(&self, id: SocketId) -> Option<i32>;
}

enum SysSocket {
    /// TCP sockets exist from `open` but only gain a stream at `connect`.
    PendingTcp,
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// Default [`SocketOps`] over `std::net`.
///
/// UDP sockets are fully non-blocking. TCP connects use
/// `TcpStream::connect_timeout` and therefore block for up to
/// `connect_timeout`; embedders that cannot tolerate that supply their own
/// [`SocketOps`].
pub struct SysSockets {
    sockets: HashMap<SocketId, (SysSocket, SocketConfig)>,
    next_id: u64,
    connect_timeout: Duration,
}

impl SysSockets {
    pub fn new(connect_timeout: Duration) -> SysSockets {
        SysSockets {
            sockets: HashMap::new(),
            next_id: 1,
            connect_timeout,
        }
    }

    fn alloc(&mut self) -> SocketId {
        let id = SocketId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl SocketOps for SysSockets {
    fn open(&mut self, transport: Transport, cfg: &SocketConfig) -> io::Result<SocketId> {
        let id = self.alloc();

        let socket = match transport {
            Transport::Udp => {
                let local = match cfg.bind_addr {
                    Some(addr) => SocketAddr::new(addr, 0),
                    None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                };
                let socket = UdpSocket::bind(local)?;
                socket.set_nonblocking(true)?;
                SysSocket::Udp(socket)
            }
            // std::net cannot create an unconnected TCP socket; defer to
            // connect().
            Transport::Tcp => SysSocket::PendingTcp,
        };

        if cfg.send_buffer_size.is_some() || cfg.recv_buffer_size.is_some() {
            debug!("socket buffer size hints are not supported by the std backend");
        }
        if cfg.bind_device.is_some() {
            debug!("bind-to-device is not supported by the std backend");
        }

        self.sockets.insert(id, (socket, cfg.clone()));
        Ok(id)
    }

    fn connect(&mut self, id: SocketId, peer: SocketAddr) -> io::Result<()> {
        let (socket, cfg) = self
            .sockets
            .get_mut(&id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        match socket {
            SysSocket::Udp(s) => s.connect(peer),
            SysSocket::PendingTcp => {
                let stream = TcpStream::connect_timeout(&peer, self.connect_timeout)?;
                // We send discrete messages, so send as soon as possible.
                stream.set_nodelay(cfg.tcp_nodelay)?;
                stream.set_nonblocking(true)?;
                *socket = SysSocket::Tcp(stream);
                Ok(())
            }
            SysSocket::Tcp(_) => Err(io::ErrorKind::AlreadyExists.into()),
        }
    }

    fn send(&mut self, id: SocketId, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;

        let (socket, _) = self
            .sockets
            .get_mut(&id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        match socket {
            SysSocket::Udp(s) => s.send(buf),
            SysSocket::Tcp(s) => s.write(buf),
            SysSocket::PendingTcp => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn recv_from(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
    ) -> io::Result<(usize, Option<SocketAddr>)> {
        use std::io::Read;

        let (socket, _) = self
            .sockets
            .get_mut(&id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        match socket {
            SysSocket::Udp(s) => {
                let (n, from) = s.recv_from(buf)?;
                Ok((n, Some(from)))
            }
            SysSocket::Tcp(s) => {
                let n = s.read(buf)?;
                Ok((n, None))
            }
            SysSocket::PendingTcp => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self, id: SocketId) {
        self.sockets.remove(&id);
    }

    #[cfg(unix)]
    fn raw_fd(&self, id: SocketId) -> Option<i32> {
        use std::os::unix::io::AsRawFd;

        match self.sockets.get(&id) {
            Some((SysSocket::Udp(s), _)) => Some(s.as_raw_fd()),
            Some((SysSocket::Tcp(s), _)) => Some(s.as_raw_fd()),
            _ => None,
        }
    }

    #[cfg(not(unix))]
    fn raw_fd(&self, _id: SocketId) -> Option<i32> {
        None
    }
}

/// Source of query-id entropy and failover-probe rolls.
pub trait RngSource: Send {
    /// A fresh 16-bit query id candidate.
    fn rand_u16(&mut self) -> u16;

    /// True with probability `1/n`.
    fn one_in(&mut self, n: u32) -> bool;
}

/// Default [`RngSource`] seeded from the operating system.
pub struct StdRngSource(StdRng);

impl StdRngSource {
    pub fn new() -> StdRngSource {
        StdRngSource(StdRng::from_entropy())
    }
}

impl Default for StdRngSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RngSource for StdRngSource {
    fn rand_u16(&mut self) -> u16 {
        self.0.gen()
    }

    fn one_in(&mut self, n: u32) -> bool {
        n <= 1 || self.0.gen_ratio(1, n)
    }
}

/// Maps transport-level failures onto query statuses.
pub(crate) fn io_error_status(e: &io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => Error::ConnRefused,
        io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::ConnRefused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_open_is_nonblocking() {
        let mut ops = SysSockets::new(Duration::from_secs(1));
        let id = ops
            .open(Transport::Udp, &SocketConfig::default())
            .expect("bind");

        let mut buf = [0u8; 16];
        let err = ops.recv_from(id, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        ops.close(id);
        assert!(ops.recv_from(id, &mut buf).is_err());
    }

    #[test]
    fn std_rng_chances() {
        let mut rng = StdRngSource::new();
        assert!(rng.one_in(1));

        // With n=10 the hit rate over many rolls should be roughly 10%.
        let hits = (0..10_000).filter(|_| rng.one_in(10)).count();
        assert!((500..2000).contains(&hits), "hits = {}", hits);
    }
}
