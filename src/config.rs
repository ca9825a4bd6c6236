//! Channel configuration.
//!
//! The crate does not read resolv.conf or platform registries itself: the
//! embedding application populates a [`Config`] from whatever sources it
//! trusts and hands it to [`Channel::new`](crate::Channel::new), which
//! consumes it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// One configured name server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSpec {
    pub addr: IpAddr,

    /// UDP port; `None` uses the channel-wide default.
    pub udp_port: Option<u16>,

    /// TCP port; `None` uses the channel-wide default.
    pub tcp_port: Option<u16>,
}

impl ServerSpec {
    pub fn new(addr: IpAddr) -> ServerSpec {
        ServerSpec {
            addr,
            udp_port: None,
            tcp_port: None,
        }
    }

    pub(crate) fn udp_addr(&self, default_port: u16) -> SocketAddr {
        SocketAddr::new(self.addr, self.udp_port.unwrap_or(default_port))
    }

    pub(crate) fn tcp_addr(&self, default_port: u16) -> SocketAddr {
        SocketAddr::new(self.addr, self.tcp_port.unwrap_or(default_port))
    }
}

impl From<IpAddr> for ServerSpec {
    fn from(addr: IpAddr) -> ServerSpec {
        ServerSpec::new(addr)
    }
}

/// Behaviour flags, a direct rendering of the classic resolver flag bits.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Flags {
    /// Always use TCP ("use virtual circuit").
    pub usevc: bool,

    /// Only query the first (primary) server.
    pub primary: bool,

    /// Ignore the TC bit: accept truncated UDP replies rather than
    /// retrying over TCP.
    pub igntc: bool,

    /// Do not set the Recursion Desired bit on queries.
    pub norecurse: bool,

    /// Keep TCP connections open between queries.
    pub stayopen: bool,

    /// Skip HOSTALIASES-style single-label alias handling.
    pub noaliases: bool,

    /// Never re-read the hosts file once loaded.
    pub noreload: bool,

    /// Attach an EDNS(0) OPT record advertising `edns_udp_size`.
    pub edns: bool,
}

/// Channel configuration. Consumed, not referenced, at channel creation.
#[derive(Clone, Debug)]
pub struct Config {
    /// Ordered list of recursive servers to query. Defaults to
    /// `127.0.0.1`.
    pub servers: Vec<ServerSpec>,

    /// Ordered list of search-domain suffixes.
    pub search: Vec<String>,

    /// Threshold label count at or above which the bare name is tried
    /// before the search domains.
    pub ndots: usize,

    /// Attempts per query across all servers.
    pub tries: usize,

    /// Initial per-attempt timeout. Later attempts use the per-server
    /// adaptive timeout.
    pub timeout: Duration,

    /// Optional upper bound for the adaptive timeout.
    pub max_timeout: Option<Duration>,

    pub flags: Flags,

    /// UDP payload size advertised when `flags.edns` is set. The default
    /// of 1232 follows DNS Flag Day 2020.
    pub edns_udp_size: u16,

    /// Default server UDP port.
    pub udp_port: u16,

    /// Default server TCP port.
    pub tcp_port: u16,

    /// Round-robin server selection instead of failure-ordered.
    pub rotate: bool,

    /// Queries per UDP socket before it is discarded. 0 means unlimited.
    pub udp_max_queries: u32,

    /// Local address to bind outbound IPv4 sockets to.
    pub local_ipv4: Option<Ipv4Addr>,

    /// Local address to bind outbound IPv6 sockets to.
    pub local_ipv6: Option<std::net::Ipv6Addr>,

    /// Kernel send-buffer size hint for outbound sockets.
    pub sock_send_buffer_size: Option<usize>,

    /// Kernel receive-buffer size hint for outbound sockets.
    pub sock_recv_buffer_size: Option<usize>,

    /// Device to bind outbound sockets to, on platforms whose socket
    /// backend supports it.
    pub local_device: Option<String>,

    /// Override for the hosts file location.
    pub hosts_path: PathBuf,

    /// Override for the resolv.conf location. The core never reads it;
    /// the field is carried for embedders that re-populate the config.
    pub resolvconf_path: PathBuf,

    /// Upper bound on query-cache entry lifetime. Zero disables the
    /// cache entirely.
    pub qcache_max_ttl: u32,

    /// One-in-N chance of probing a previously failed server instead of
    /// the best one.
    pub server_retry_chance: u32,

    /// Minimum delay between failover probes of the same server.
    pub server_retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            servers: vec![ServerSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST))],
            search: Vec::new(),
            ndots: 1,
            tries: 3,
            timeout: Duration::from_millis(2000),
            max_timeout: None,
            flags: Flags {
                edns: true,
                ..Flags::default()
            },
            edns_udp_size: 1232,
            udp_port: 53,
            tcp_port: 53,
            rotate: false,
            udp_max_queries: 0,
            local_ipv4: None,
            local_ipv6: None,
            sock_send_buffer_size: None,
            sock_recv_buffer_size: None,
            local_device: None,
            hosts_path: PathBuf::from("/etc/hosts"),
            resolvconf_path: PathBuf::from("/etc/resolv.conf"),
            qcache_max_ttl: 3600,
            server_retry_chance: 10,
            server_retry_delay: Duration::from_millis(5000),
        }
    }
}

impl Config {
    /// A config pointed at the given servers, otherwise default.
    pub fn with_servers<I>(servers: I) -> Config
    where
        I: IntoIterator,
        I::Item: Into<ServerSpec>,
    {
        Config {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.servers.len(), 1);
        assert_eq!(c.servers[0].addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(c.ndots, 1);
        assert_eq!(c.tries, 3);
        assert_eq!(c.timeout, Duration::from_millis(2000));
        assert_eq!(c.edns_udp_size, 1232);
        assert!(c.flags.edns);
        assert_eq!(c.server_retry_chance, 10);
    }

    #[test]
    fn server_ports() {
        let mut s = ServerSpec::new("192.0.2.1".parse().unwrap());
        assert_eq!(s.udp_addr(53).port(), 53);
        s.udp_port = Some(5353);
        assert_eq!(s.udp_addr(53).port(), 5353);
        assert_eq!(s.tcp_addr(53).port(), 53);
    }
}
