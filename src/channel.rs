//! The resolver channel: public surface, server scheduling, socket
//! management, retries and timeouts.
//!
//! A channel performs no I/O on its own initiative. The host either tells
//! it which sockets are ready ([`Channel::process`]) and when time has
//! passed ([`Channel::tick`]), or wraps the channel in a
//! [`Resolver`](crate::Resolver), which does the same from an owned
//! thread.

use crate::addrinfo::{
    lookup_service, AddrInfo, AddrInfoCallback, AddrInfoHints, AddrInfoState, AddrNode,
    HostByAddrState, HostCallback, HostResults,
};
use crate::config::{Config, ServerSpec};
use crate::conn::Connection;
use crate::errors::Error;
use crate::hosts::Hosts;
use crate::name;
use crate::qcache::QueryCache;
use crate::queries::{Completion, Query, QueryHandle, QueryTable};
use crate::search::{SearchDone, SearchState};
use crate::servers::ServerPool;
use crate::sockets::{
    io_error_status, RngSource, SocketConfig, SocketId, SocketOps, StdRngSource, SysSockets,
    Transport,
};
use crate::types::{Class, Extension, Family, Message, Stats, Type};
use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant, SystemTime};

/// Classic maximum UDP payload when no EDNS extension advertises more.
const UDP_BASE_PAYLOAD: usize = 512;

type SocketStateHook = Box<dyn FnMut(SocketId, bool, bool) + Send>;
type SocketHook = Box<dyn FnMut(SocketId, Transport) + Send>;

/// An asynchronous DNS stub-resolver channel.
///
/// The channel owns its sockets, servers and in-flight queries. Every
/// query completes with exactly one callback invocation; cancelling a
/// query or destroying the channel still invokes the callback, with
/// [`Error::Cancelled`] or [`Error::Destruction`].
pub struct Channel {
    config: Config,
    ops: Box<dyn SocketOps>,
    rng: Box<dyn RngSource>,

    pool: ServerPool,
    table: QueryTable,
    conns: HashMap<SocketId, Connection>,
    qcache: QueryCache,

    hosts: Option<Hosts>,
    hosts_mtime: Option<SystemTime>,

    /// Baseline for the metric-bucket clock.
    epoch: Instant,

    destroyed: bool,

    on_socket_state: Option<SocketStateHook>,
    on_socket_create: Option<SocketHook>,
    on_socket_configure: Option<SocketHook>,
}

impl Channel {
    /// Creates a channel over the platform's sockets and RNG.
    pub fn new(config: Config) -> Channel {
        let connect_timeout = config.timeout;
        Channel::with_capabilities(
            config,
            Box::new(SysSockets::new(connect_timeout)),
            Box::new(StdRngSource::new()),
        )
    }

    /// Creates a channel with caller-supplied socket operations and
    /// query-id entropy. This is how tests and non-POSIX transports get
    /// in.
    pub fn with_capabilities(
        mut config: Config,
        ops: Box<dyn SocketOps>,
        rng: Box<dyn RngSource>,
    ) -> Channel {
        if config.servers.is_empty() {
            config.servers = Config::default().servers;
        }
        if config.flags.primary {
            config.servers.truncate(1);
        }

        let pool = ServerPool::new(&config);
        let qcache = QueryCache::new(config.qcache_max_ttl);

        Channel {
            config,
            ops,
            rng,
            pool,
            table: QueryTable::default(),
            conns: HashMap::new(),
            qcache,
            hosts: None,
            hosts_mtime: None,
            epoch: Instant::now(),
            destroyed: false,
            on_socket_state: None,
            on_socket_create: None,
            on_socket_configure: None,
        }
    }

    /// Registers the hook told about every socket-interest change. This
    /// is the sole mechanism by which a host event loop learns which
    /// descriptors to poll.
    pub fn set_socket_state_callback(
        &mut self,
        hook: impl FnMut(SocketId, bool, bool) + Send + 'static,
    ) {
        self.on_socket_state = Some(Box::new(hook));
    }

    /// Registers a hook invoked right after a socket is created.
    pub fn set_socket_create_callback(
        &mut self,
        hook: impl FnMut(SocketId, Transport) + Send + 'static,
    ) {
        self.on_socket_create = Some(Box::new(hook));
    }

    /// Registers a hook invoked after a socket is connected and
    /// configured, before any query is written to it.
    pub fn set_socket_configure_callback(
        &mut self,
        hook: impl FnMut(SocketId, Transport) + Send + 'static,
    ) {
        self.on_socket_configure = Some(Box::new(hook));
    }

    /// Number of queries currently in flight.
    pub fn active_queries(&self) -> usize {
        self.table.len()
    }

    /// Current sockets and their (read, write) interest, for hosts that
    /// prefer polling a snapshot over tracking the state hook.
    pub fn fds(&self) -> Vec<(SocketId, bool, bool)> {
        self.conns
            .values()
            .map(|c| (c.id, c.want_read, c.want_write))
            .collect()
    }

    /// The OS descriptor behind a socket id, where one exists.
    pub fn raw_fd(&self, id: SocketId) -> Option<i32> {
        self.ops.raw_fd(id)
    }

    /// How long the host may sleep before calling [`Channel::tick`]:
    /// the time to the nearest query deadline, bounded by `max`.
    pub fn timeout(&self, now: Instant, max: Option<Duration>) -> Option<Duration> {
        let next = match self.table.next_deadline() {
            Some(at) => at.saturating_duration_since(now),
            None => return max,
        };

        Some(match max {
            Some(max) => next.min(max),
            None => next,
        })
    }

    /// Performs a search-expanded query for `search_name`, delivering the
    /// decoded reply to `callback`.
    ///
    /// Returns a handle usable with [`Channel::cancel`], or `None` when
    /// the lookup completed synchronously.
    pub fn search(
        &mut self,
        search_name: &str,
        qtype: Type,
        qclass: Class,
        callback: impl FnOnce(Result<Message, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let callback = Box::new(callback);
        let now = Instant::now();

        if self.destroyed {
            callback(Err(Error::Destruction), 0);
            return None;
        }

        // RFC 7686: never forward .onion to the DNS.
        if name::is_onion(search_name) {
            callback(Err(Error::NotFound), 0);
            return None;
        }

        let state = SearchState::new(
            search_name,
            qtype,
            qclass,
            &self.config,
            SearchDone::Raw(callback),
        );
        self.search_advance(state, None, now)
    }

    /// Sends pre-encoded wire bytes as-is, except that the id is replaced
    /// with one unique among in-flight queries.
    pub fn send_raw(
        &mut self,
        wire: &[u8],
        callback: impl FnOnce(Result<Message, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let callback = Box::new(callback);
        let now = Instant::now();

        if self.destroyed {
            callback(Err(Error::Destruction), 0);
            return None;
        }

        let message = match Message::from_slice(wire) {
            Ok(m) => m,
            Err(_) => {
                callback(Err(Error::BadQuery), 0);
                return None;
            }
        };

        if message.questions.len() != 1 {
            callback(Err(Error::BadQuery), 0);
            return None;
        }

        self.submit(now, message, Completion::Raw(callback), None)
    }

    /// Resolves a hostname (or literal address) to addresses, ports and
    /// canonical name, per the full lookup pipeline: literal shortcut,
    /// hosts file, search-expanded DNS with AAAA→A fallback and CNAME
    /// chasing.
    pub fn get_addr_info(
        &mut self,
        node: &str,
        service: Option<&str>,
        hints: AddrInfoHints,
        callback: impl FnOnce(Result<AddrInfo, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let callback: AddrInfoCallback = Box::new(callback);
        let now = Instant::now();

        if self.destroyed {
            callback(Err(Error::Destruction), 0);
            return None;
        }

        let port = match lookup_service(service.unwrap_or("")) {
            Ok(port) => port,
            Err(e) => {
                callback(Err(e), 0);
                return None;
            }
        };

        if node.is_empty() {
            callback(Err(Error::NoName), 0);
            return None;
        }

        // Literal addresses never touch a socket.
        if let Ok(addr) = node.parse::<IpAddr>() {
            let matches_family = match hints.family {
                Family::Unspec => true,
                Family::V4 => addr.is_ipv4(),
                Family::V6 => addr.is_ipv6(),
            };
            let result = if matches_family {
                Ok(AddrInfo {
                    canonical: node.to_string(),
                    aliases: Vec::new(),
                    nodes: vec![AddrNode { addr, port, ttl: 0 }],
                })
            } else {
                Err(Error::NotFound)
            };
            callback(result, 0);
            return None;
        }

        // Unicode hostnames hit the wire in IDNA ascii form.
        let ascii = if node.is_ascii() {
            node.to_string()
        } else {
            match idna::domain_to_ascii(node) {
                Ok(ascii) => ascii,
                Err(_) => {
                    callback(Err(Error::BadName), 0);
                    return None;
                }
            }
        };

        if name::is_onion(&ascii) {
            callback(Err(Error::NotFound), 0);
            return None;
        }

        if let Some(found) = self.hosts_lookup(&ascii, hints.family) {
            let nodes = found
                .addrs
                .iter()
                .map(|&addr| AddrNode { addr, port, ttl: 0 })
                .collect();
            callback(
                Ok(AddrInfo {
                    canonical: found.canonical,
                    aliases: found.aliases,
                    nodes,
                }),
                0,
            );
            return None;
        }

        let state = AddrInfoState::new(ascii, port, hints.family, callback);
        self.addrinfo_phase(state, None, now)
    }

    /// Resolves a hostname to a [`HostResults`]; a thin adapter over
    /// [`Channel::get_addr_info`].
    pub fn get_host_by_name(
        &mut self,
        node: &str,
        family: Family,
        callback: impl FnOnce(Result<HostResults, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        self.get_addr_info(
            node,
            None,
            AddrInfoHints { family },
            move |result, timeouts| callback(result.map(HostResults::from), timeouts),
        )
    }

    /// Reverse lookup: address to hostnames, via the hosts file or a PTR
    /// query against the synthesized reverse name.
    pub fn get_host_by_addr(
        &mut self,
        addr: IpAddr,
        callback: impl FnOnce(Result<HostResults, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let callback: HostCallback = Box::new(callback);
        let now = Instant::now();

        if self.destroyed {
            callback(Err(Error::Destruction), 0);
            return None;
        }

        self.load_hosts();
        if let Some(entry) = self.hosts.as_ref().and_then(|h| h.lookup_addr(addr)) {
            let mut hostnames = entry.hostnames.clone();
            let canonical = hostnames.remove(0);
            callback(
                Ok(HostResults {
                    name: canonical,
                    aliases: hostnames,
                    addrs: vec![addr],
                }),
                0,
            );
            return None;
        }

        let message = self.build_query(&name::ptr_name(addr), Type::PTR, Class::Internet);
        self.submit(
            now,
            message,
            Completion::HostByAddr(HostByAddrState { addr, callback }),
            None,
        )
    }

    /// Replaces the server set. Open connections are closed, the query
    /// cache is invalidated, and in-flight queries are re-dispatched
    /// against the new servers without losing their attempt budgets.
    pub fn set_servers(&mut self, servers: Vec<ServerSpec>) {
        if self.destroyed {
            return;
        }
        let now = Instant::now();

        self.config.servers = if servers.is_empty() {
            Config::default().servers
        } else {
            servers
        };
        if self.config.flags.primary {
            self.config.servers.truncate(1);
        }

        let stashed = self.table.drain();

        let ids: Vec<SocketId> = self.conns.keys().copied().collect();
        for id in ids {
            self.close_conn(id);
        }

        self.pool = ServerPool::new(&self.config);
        self.qcache.flush();

        for mut query in stashed {
            query.using_tcp = false;
            let server_idx = self.pool.pick(now, &mut *self.rng);
            self.dispatch(query, server_idx, now);
        }
    }

    /// Cancels an in-flight query. Its callback runs synchronously with
    /// [`Error::Cancelled`]; cancelling a completed query is a no-op.
    pub fn cancel(&mut self, handle: QueryHandle) {
        let now = Instant::now();
        if let Some(query) = self.table.remove(handle) {
            self.finish_query(query, Err(Error::Cancelled), now);
        }
    }

    /// Cancels everything in flight and closes every socket. Further
    /// calls complete immediately with [`Error::Destruction`].
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let now = Instant::now();

        for query in self.table.drain() {
            let timeouts = query.timeouts;
            self.finish(query.completion, Err(Error::Destruction), timeouts, now);
        }

        let ids: Vec<SocketId> = self.conns.keys().copied().collect();
        for id in ids {
            self.conns.remove(&id);
            self.ops.close(id);
            self.emit_socket_state(id, false, false);
        }

        self.qcache.flush();
    }

    /// Handles readiness for the given sockets, then expires timeouts.
    pub fn process(&mut self, readable: &[SocketId], writable: &[SocketId]) {
        self.process_at(Instant::now(), readable, writable);
    }

    /// [`Channel::process`] against an explicit clock.
    pub fn process_at(&mut self, now: Instant, readable: &[SocketId], writable: &[SocketId]) {
        for &id in writable {
            self.process_write(id, now);
        }
        for &id in readable {
            self.process_read(id, now);
        }
        self.tick(now);
    }

    /// Handles readiness for one socket.
    pub fn process_fd(&mut self, id: SocketId, readable: bool, writable: bool) {
        let now = Instant::now();
        if writable {
            self.process_write(id, now);
        }
        if readable {
            self.process_read(id, now);
        }
        self.tick(now);
    }

    /// Expires queries whose deadline has passed, retrying or completing
    /// them.
    pub fn tick(&mut self, now: Instant) {
        while let Some(mut query) = self.table.pop_expired(now) {
            query.timeouts += 1;
            query.attempts += 1;
            self.pool.note_failure(query.server_idx);

            if query.attempts >= self.config.tries {
                debug!(
                    "query {} timed out after {} attempts",
                    query.dns_id, query.attempts
                );
                self.finish_query(query, Err(Error::Timeout), now);
            } else {
                // Retries rotate deterministically away from the server
                // that just went quiet; probing only applies to fresh
                // queries.
                let next = self.pool.next_after(query.server_idx);
                debug!(
                    "query {} timed out, retrying on server {}",
                    query.dns_id, next
                );
                query.using_tcp = false;
                self.dispatch(query, next, now);
            }
        }
    }

    // ---- internal: query construction and submission ----

    fn build_query(&self, qname: &str, qtype: Type, qclass: Class) -> Message {
        let mut message = Message::query(qname, qtype, qclass);
        message.rd = !self.config.flags.norecurse;
        if self.config.flags.edns {
            message.add_extension(Extension {
                payload_size: self.config.edns_udp_size,
                ..Extension::default()
            });
        }
        message
    }

    /// Assigns an id, encodes, and dispatches a query. Synchronous
    /// failures (and cache hits) complete the query without a handle.
    ///
    /// Pipeline continuations pass `reuse` so the handle handed to the
    /// caller stays valid across search candidates and family phases.
    fn submit(
        &mut self,
        now: Instant,
        mut message: Message,
        completion: Completion,
        reuse: Option<QueryHandle>,
    ) -> Option<QueryHandle> {
        if self.destroyed {
            self.finish(completion, Err(Error::Destruction), 0, now);
            return None;
        }

        if let Some(reply) = self.qcache.lookup(&message, now) {
            let result = match Error::from_reply(reply.rcode, reply.answers.len()) {
                Ok(()) => Ok(reply),
                Err(e) => Err(e),
            };
            self.finish(completion, result, 0, now);
            return None;
        }

        // Probe the id space for one not in flight.
        let dns_id = loop {
            let candidate = self.rng.rand_u16();
            if !self.table.contains_dns_id(candidate) {
                break candidate;
            }
        };
        message.id = dns_id;

        let wire = match message.to_vec() {
            Ok(wire) => wire,
            Err(e) => {
                self.finish(completion, Err(e), 0, now);
                return None;
            }
        };

        let handle = reuse.unwrap_or_else(|| self.table.alloc_handle());
        let query = Query {
            handle,
            dns_id,
            message,
            wire,
            deadline: now,
            attempts: 0,
            failovers: 0,
            server_idx: 0,
            conn_generation: 0,
            using_tcp: false,
            timeouts: 0,
            started_wall: SystemTime::now(),
            started: now,
            completion,
        };

        let server_idx = self.pool.pick(now, &mut *self.rng);
        self.dispatch(query, server_idx, now);

        // The dispatch may have completed the query synchronously; a
        // stale handle is harmless, cancel() on it is a no-op.
        Some(handle)
    }

    /// Sends one attempt of a query to the given server.
    fn dispatch(&mut self, mut query: Query, server_idx: usize, now: Instant) {
        query.server_idx = server_idx;

        let udp_limit = if self.config.flags.edns {
            self.config.edns_udp_size as usize
        } else {
            UDP_BASE_PAYLOAD
        };
        if self.config.flags.usevc || query.wire.len() > udp_limit {
            query.using_tcp = true;
        }

        let transport = if query.using_tcp {
            Transport::Tcp
        } else {
            Transport::Udp
        };

        let conn_id = match self.acquire_conn(server_idx, transport) {
            Ok(id) => id,
            Err(e) => {
                debug!("server {} unreachable over {}: {}", server_idx, transport, e);
                self.handle_attempt_failure(query, io_error_status(&e), now);
                return;
            }
        };

        let conn = self.conns.get_mut(&conn_id).expect("connection just acquired");
        conn.push_write(&query.wire);
        conn.queries_sent += 1;
        query.conn_generation = conn.generation;

        match conn.flush(&mut *self.ops) {
            Ok(_) => {
                let timeout = self.attempt_timeout(server_idx, now);
                query.deadline = now + timeout;
                self.table.insert(query);
                self.sync_interest(conn_id);
            }
            Err(e) => {
                warn!("send to server {} failed: {}", server_idx, e);
                self.teardown_conn(conn_id, now);
                self.handle_attempt_failure(query, io_error_status(&e), now);
            }
        }
    }

    fn attempt_timeout(&self, server_idx: usize, now: Instant) -> Duration {
        let now_secs = now.duration_since(self.epoch).as_secs();
        self.pool.servers[server_idx].adaptive_timeout(
            now_secs,
            self.config.timeout,
            self.config.max_timeout,
        )
    }

    /// A hard per-server failure: penalize, then fail the attempt over to
    /// another server, bounded by `tries * nservers`.
    fn handle_attempt_failure(&mut self, mut query: Query, status: Error, now: Instant) {
        self.pool.note_failure(query.server_idx);
        query.failovers += 1;

        if query.failovers >= self.config.tries * self.pool.len() {
            self.finish_query(query, Err(status), now);
            return;
        }

        let next = self.pool.next_after(query.server_idx);
        query.using_tcp = false;
        self.dispatch(query, next, now);
    }

    // ---- internal: connections ----

    fn acquire_conn(&mut self, server_idx: usize, transport: Transport) -> io::Result<SocketId> {
        if let Some(id) = self.existing_conn(server_idx, transport) {
            return Ok(id);
        }

        let (peer, generation) = {
            let server = &self.pool.servers[server_idx];
            match transport {
                Transport::Udp => (server.spec.udp_addr(self.config.udp_port), 0),
                Transport::Tcp => (
                    server.spec.tcp_addr(self.config.tcp_port),
                    server.tcp_generation,
                ),
            }
        };

        let bind_addr = match peer {
            SocketAddr::V4(_) => Some(
                self.config
                    .local_ipv4
                    .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), IpAddr::V4),
            ),
            SocketAddr::V6(_) => Some(
                self.config
                    .local_ipv6
                    .map_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED), IpAddr::V6),
            ),
        };

        let socket_config = SocketConfig {
            bind_addr,
            send_buffer_size: self.config.sock_send_buffer_size,
            recv_buffer_size: self.config.sock_recv_buffer_size,
            tcp_nodelay: transport == Transport::Tcp,
            bind_device: self.config.local_device.clone(),
        };

        let id = self.ops.open(transport, &socket_config)?;
        if let Some(hook) = &mut self.on_socket_create {
            hook(id, transport);
        }

        if let Err(e) = self.ops.connect(id, peer) {
            self.ops.close(id);
            return Err(e);
        }
        if let Some(hook) = &mut self.on_socket_configure {
            hook(id, transport);
        }

        self.conns.insert(
            id,
            Connection::new(id, transport, server_idx, peer, generation),
        );
        let server = &mut self.pool.servers[server_idx];
        match transport {
            Transport::Udp => server.udp = Some(id),
            Transport::Tcp => server.tcp = Some(id),
        }

        debug!("opened {} connection {} to {}", transport, id, peer);
        self.emit_socket_state(id, true, false);
        Ok(id)
    }

    /// Reuses the server's existing connection for this transport, unless
    /// a UDP socket has reached its query budget and is idle, in which
    /// case it is recycled.
    fn existing_conn(&mut self, server_idx: usize, transport: Transport) -> Option<SocketId> {
        let id = match transport {
            Transport::Udp => self.pool.servers[server_idx].udp,
            Transport::Tcp => self.pool.servers[server_idx].tcp,
        }?;

        if transport == Transport::Udp && self.config.udp_max_queries > 0 {
            let exhausted = self
                .conns
                .get(&id)
                .map_or(false, |c| c.queries_sent >= self.config.udp_max_queries);
            let idle = self.table.on_connection(server_idx, false, 0).is_empty();
            if exhausted && idle {
                debug!("recycling udp connection {} after query budget", id);
                self.close_conn(id);
                return None;
            }
        }

        Some(id)
    }

    /// Closes a connection with no queries outstanding on it.
    fn close_conn(&mut self, id: SocketId) {
        if let Some(conn) = self.conns.remove(&id) {
            self.ops.close(id);
            let server = &mut self.pool.servers[conn.server_idx];
            match conn.transport {
                Transport::Udp => server.udp = None,
                Transport::Tcp => {
                    server.tcp = None;
                    server.tcp_generation += 1;
                }
            }
            self.emit_socket_state(id, false, false);
        }
    }

    /// Closes a connection and fails over every query that was waiting on
    /// it.
    fn teardown_conn(&mut self, id: SocketId, now: Instant) {
        let (server_idx, transport, generation) = match self.conns.get(&id) {
            Some(c) => (c.server_idx, c.transport, c.generation),
            None => return,
        };

        self.close_conn(id);

        let orphans = self
            .table
            .on_connection(server_idx, transport == Transport::Tcp, generation);
        for handle in orphans {
            if let Some(query) = self.table.remove(handle) {
                self.handle_attempt_failure(query, Error::ConnRefused, now);
            }
        }
    }

    // ---- internal: readiness ----

    fn process_write(&mut self, id: SocketId, now: Instant) {
        let conn = match self.conns.get_mut(&id) {
            Some(conn) => conn,
            None => return,
        };

        match conn.flush(&mut *self.ops) {
            Ok(_) => self.sync_interest(id),
            Err(e) => {
                warn!("write on {} failed: {}", id, e);
                self.teardown_conn(id, now);
            }
        }
    }

    fn process_read(&mut self, id: SocketId, now: Instant) {
        let (transport, server_idx, generation, peer) = match self.conns.get(&id) {
            Some(c) => (c.transport, c.server_idx, c.generation, c.peer),
            None => return,
        };

        loop {
            let mut buf = [0u8; 65535];
            match self.ops.recv_from(id, &mut buf) {
                Ok((n, from)) => match transport {
                    Transport::Udp => {
                        if let Some(from) = from {
                            // Transport-level spoofing guard.
                            if from != peer {
                                warn!("discarding datagram from off-path source {}", from);
                                continue;
                            }
                        }
                        self.handle_reply(&buf[..n], server_idx, false, generation, peer, now);
                    }
                    Transport::Tcp => {
                        if n == 0 {
                            debug!("server {} closed tcp connection", server_idx);
                            self.teardown_conn(id, now);
                            return;
                        }
                        let frames = match self.conns.get_mut(&id) {
                            Some(conn) => conn.feed(&buf[..n]),
                            None => return,
                        };
                        for frame in frames {
                            self.handle_reply(&frame, server_idx, true, generation, peer, now);
                        }
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("read on {} failed: {}", id, e);
                    self.teardown_conn(id, now);
                    return;
                }
            }

            // Reply handling may have recycled or torn down the socket.
            if !self.conns.contains_key(&id) {
                return;
            }
        }
    }

    fn handle_reply(
        &mut self,
        bytes: &[u8],
        server_idx: usize,
        via_tcp: bool,
        generation: u64,
        peer: SocketAddr,
        now: Instant,
    ) {
        // A reply we cannot parse is dropped; the query keeps waiting and
        // retries on its own deadline.
        let reply = match Message::from_slice(bytes) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("dropping malformed reply from server {}: {}", server_idx, e);
                return;
            }
        };

        let handle = match self.table.handle_for_dns_id(reply.id) {
            Some(handle) => handle,
            None => {
                debug!("reply id {:#06x} matches no in-flight query", reply.id);
                return;
            }
        };

        {
            let query = self.table.get(handle).expect("handle from live index");

            // The reply must arrive on the connection the query went out
            // on, and must answer the question we asked.
            if query.server_idx != server_idx
                || query.using_tcp != via_tcp
                || (via_tcp && query.conn_generation != generation)
            {
                return;
            }
            if !reply.is_reply_to(&query.message) {
                debug!("reply id {:#06x} does not match its question", reply.id);
                return;
            }
        }

        // Truncated UDP reply: reissue the same query over TCP on the
        // same server. Not an attempt, not a failure.
        if reply.tc && !via_tcp && !self.config.flags.igntc {
            debug!("reply truncated, retrying query over tcp");
            let mut query = self.table.remove(handle).expect("handle from live index");
            query.using_tcp = true;
            self.dispatch(query, server_idx, now);
            return;
        }

        let query = self.table.remove(handle).expect("handle from live index");

        let status = Error::from_reply(reply.rcode, reply.answers.len());
        let authoritative = match status {
            Ok(()) => true,
            Err(e) => e.is_terminal(),
        };

        if !authoritative {
            // FORMERR, SERVFAIL, REFUSED and friends count against the
            // server and fail the attempt over.
            let status = status.unwrap_err();
            debug!("server {} answered with {}", server_idx, status);
            self.handle_attempt_failure(query, status, now);
            return;
        }

        // Authoritative terminal: the server did its job, whatever the
        // answer was.
        self.pool.note_success(server_idx);
        let now_secs = now.duration_since(self.epoch).as_secs();
        self.pool.servers[server_idx].record_latency(now_secs, now.duration_since(query.started));
        self.qcache.insert(&reply, now);

        let result = match status {
            Ok(()) => {
                let mut reply = reply;
                reply.stats = Some(Stats {
                    start: query.started_wall,
                    duration: now.duration_since(query.started),
                    server: peer,
                    request_size: query.wire.len(),
                    response_size: bytes.len(),
                });
                Ok(reply)
            }
            Err(e) => Err(e),
        };
        self.finish_query(query, result, now);

        // Without stayopen, a TCP connection is only kept while queries
        // are outstanding on it.
        if via_tcp && !self.config.flags.stayopen {
            if let Some(id) = self.pool.servers[server_idx].tcp {
                if self.table.on_connection(server_idx, true, generation).is_empty() {
                    self.close_conn(id);
                }
            }
        }
    }

    // ---- internal: completion plumbing ----

    fn finish_query(&mut self, query: Query, result: Result<Message, Error>, now: Instant) {
        let timeouts = query.timeouts;
        let handle = query.handle;
        self.finish_with(query.completion, result, timeouts, Some(handle), now);
    }

    fn finish(
        &mut self,
        completion: Completion,
        result: Result<Message, Error>,
        timeouts: usize,
        now: Instant,
    ) {
        self.finish_with(completion, result, timeouts, None, now);
    }

    fn finish_with(
        &mut self,
        completion: Completion,
        result: Result<Message, Error>,
        timeouts: usize,
        reuse: Option<QueryHandle>,
        now: Instant,
    ) {
        match completion {
            Completion::Raw(callback) => callback(result, timeouts),
            Completion::Search(state) => self.search_continue(state, result, timeouts, reuse, now),
            Completion::HostByAddr(state) => match result {
                Ok(reply) => {
                    let queried = reply
                        .questions
                        .first()
                        .map(|q| q.name.clone())
                        .unwrap_or_default();
                    let hosts = state.absorb(&reply, &queried);
                    (state.callback)(hosts, timeouts);
                }
                Err(e) => (state.callback)(Err(e), timeouts),
            },
        }
    }

    /// Issues the next candidate of a search walk.
    fn search_advance(
        &mut self,
        mut state: SearchState,
        reuse: Option<QueryHandle>,
        now: Instant,
    ) -> Option<QueryHandle> {
        match state.next_name() {
            Some((qname, _)) => {
                let message = self.build_query(&qname, state.qtype, state.qclass);
                self.submit(now, message, Completion::Search(state), reuse)
            }
            None => {
                // Candidate lists are never empty; an exhausted list is
                // handled by search_continue.
                self.search_finish(state, Err(Error::NoName), reuse, now);
                None
            }
        }
    }

    fn search_continue(
        &mut self,
        mut state: SearchState,
        result: Result<Message, Error>,
        timeouts: usize,
        reuse: Option<QueryHandle>,
        now: Instant,
    ) {
        state.timeouts += timeouts;

        let status = match result {
            Ok(reply) => {
                self.search_finish(state, Ok(reply), reuse, now);
                return;
            }
            Err(status) => status,
        };

        let keep_walking = state.note_candidate_status(state.current_as_is(), status);
        if !keep_walking {
            self.search_finish(state, Err(status), reuse, now);
            return;
        }

        match state.next_name() {
            Some((qname, _)) => {
                let message = self.build_query(&qname, state.qtype, state.qclass);
                self.submit(now, message, Completion::Search(state), reuse);
            }
            None => {
                let final_status = state.final_status(status);
                self.search_finish(state, Err(final_status), reuse, now);
            }
        }
    }

    fn search_finish(
        &mut self,
        state: SearchState,
        result: Result<Message, Error>,
        reuse: Option<QueryHandle>,
        now: Instant,
    ) {
        let timeouts = state.timeouts;
        match state.done {
            SearchDone::Raw(callback) => callback(result, timeouts),
            SearchDone::AddrInfo(ai) => self.addrinfo_continue(ai, result, timeouts, reuse, now),
        }
    }

    /// Starts the search walk for the current address family phase.
    fn addrinfo_phase(
        &mut self,
        state: AddrInfoState,
        reuse: Option<QueryHandle>,
        now: Instant,
    ) -> Option<QueryHandle> {
        let qtype = match state.phase {
            Family::V4 => Type::A,
            _ => Type::AAAA,
        };
        let node = state.name.clone();
        let search = SearchState::new(
            &node,
            qtype,
            Class::Internet,
            &self.config,
            SearchDone::AddrInfo(state),
        );
        self.search_advance(search, reuse, now)
    }

    fn addrinfo_continue(
        &mut self,
        mut state: AddrInfoState,
        result: Result<Message, Error>,
        timeouts: usize,
        reuse: Option<QueryHandle>,
        now: Instant,
    ) {
        state.timeouts += timeouts;

        match result {
            Ok(reply) => {
                state.absorb(&reply);

                if state.family == Family::Unspec && state.phase == Family::V6 {
                    state.phase = Family::V4;
                    self.addrinfo_phase(state, reuse, now);
                    return;
                }

                self.addrinfo_finish(state);
            }
            Err(status) => {
                if state.wants_fallback(status) {
                    state.first_status = Some(status);
                    state.phase = Family::V4;
                    self.addrinfo_phase(state, reuse, now);
                    return;
                }

                if !state.result.nodes.is_empty() {
                    // The AAAA phase produced data; an A-phase failure
                    // does not erase it.
                    self.addrinfo_finish(state);
                    return;
                }

                // An empty answer in the AAAA phase outranks NXDOMAIN in
                // the A phase: the name exists, it just has no addresses
                // of either family.
                let status = match (state.first_status, status) {
                    (Some(Error::NoData), Error::NotFound) => Error::NoData,
                    (_, status) => status,
                };

                let timeouts = state.timeouts;
                (state.callback)(Err(status), timeouts);
            }
        }
    }

    fn addrinfo_finish(&mut self, state: AddrInfoState) {
        let timeouts = state.timeouts;
        if state.result.nodes.is_empty() {
            (state.callback)(Err(Error::NoData), timeouts);
        } else {
            (state.callback)(Ok(state.result), timeouts);
        }
    }

    // ---- internal: hooks and hosts ----

    fn emit_socket_state(&mut self, id: SocketId, read: bool, write: bool) {
        if let Some(hook) = &mut self.on_socket_state {
            hook(id, read, write);
        }
    }

    /// Recomputes a connection's desired interest and notifies the host
    /// when it changed.
    fn sync_interest(&mut self, id: SocketId) {
        let (changed, read, write) = match self.conns.get_mut(&id) {
            Some(conn) => {
                let write = conn.has_pending_writes();
                let changed = conn.want_write != write;
                conn.want_write = write;
                (changed, conn.want_read, write)
            }
            None => return,
        };

        if changed {
            self.emit_socket_state(id, read, write);
        }
    }

    fn load_hosts(&mut self) {
        let path = self.config.hosts_path.clone();

        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let stale = match (&self.hosts, mtime) {
            (None, _) => true,
            (Some(_), _) if self.config.flags.noreload => false,
            (Some(_), Some(mtime)) => self.hosts_mtime != Some(mtime),
            (Some(_), None) => false,
        };

        if stale {
            self.hosts = Some(Hosts::load(&path).unwrap_or_default());
            self.hosts_mtime = mtime;
        }
    }

    fn hosts_lookup(&mut self, node: &str, family: Family) -> Option<crate::hosts::HostsMatch> {
        self.load_hosts();
        self.hosts.as_ref()?.lookup_name(node, family)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.destroy();
    }
}
