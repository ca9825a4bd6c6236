//! End-to-end scenarios for the resolver channel, driven through a
//! scripted in-memory socket implementation. No real network traffic.

use pretty_assertions::assert_eq;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stubdns::resource::Resource;
use stubdns::sockets::{RngSource, SocketConfig, SocketId, SocketOps, Transport};
use stubdns::types::*;
use stubdns::{Channel, Config, Error, HostResults};

// ---- scripted sockets ----

#[derive(Default)]
struct MockState {
    next_id: u64,
    sockets: HashMap<u64, MockSocket>,
    opened: usize,
}

struct MockSocket {
    transport: Transport,
    peer: Option<SocketAddr>,
    sent: Vec<Vec<u8>>,
    inbox: VecDeque<(Vec<u8>, Option<SocketAddr>)>,
}

#[derive(Clone)]
struct MockSockets(Arc<Mutex<MockState>>);

impl SocketOps for MockSockets {
    fn open(&mut self, transport: Transport, _cfg: &SocketConfig) -> io::Result<SocketId> {
        let mut state = self.0.lock().unwrap();
        state.next_id += 1;
        state.opened += 1;
        let id = state.next_id;
        state.sockets.insert(
            id,
            MockSocket {
                transport,
                peer: None,
                sent: Vec::new(),
                inbox: VecDeque::new(),
            },
        );
        Ok(SocketId(id))
    }

    fn connect(&mut self, id: SocketId, peer: SocketAddr) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();
        let socket = state.sockets.get_mut(&id.0).expect("unknown socket");
        socket.peer = Some(peer);
        Ok(())
    }

    fn send(&mut self, id: SocketId, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.lock().unwrap();
        let socket = state.sockets.get_mut(&id.0).expect("unknown socket");
        socket.sent.push(buf.to_vec());
        Ok(buf.len())
    }

    fn recv_from(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
    ) -> io::Result<(usize, Option<SocketAddr>)> {
        let mut state = self.0.lock().unwrap();
        let socket = state.sockets.get_mut(&id.0).expect("unknown socket");
        match socket.inbox.pop_front() {
            Some((bytes, from)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok((bytes.len(), from))
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn close(&mut self, id: SocketId) {
        self.0.lock().unwrap().sockets.remove(&id.0);
    }

    fn raw_fd(&self, _id: SocketId) -> Option<i32> {
        None
    }
}

/// A small deterministic generator so scenarios are reproducible.
struct TestRng(u64);

impl RngSource for TestRng {
    fn rand_u16(&mut self) -> u16 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u16
    }

    fn one_in(&mut self, n: u32) -> bool {
        n <= 1 || u32::from(self.rand_u16()) % n == 0
    }
}

// ---- harness ----

struct Harness {
    channel: Channel,
    state: Arc<Mutex<MockState>>,
}

impl Harness {
    fn new(config: Config) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();

        let state = Arc::new(Mutex::new(MockState::default()));
        let channel = Channel::with_capabilities(
            config,
            Box::new(MockSockets(Arc::clone(&state))),
            Box::new(TestRng(0x5eed)),
        );
        Harness { channel, state }
    }

    fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    /// Drains every message written so far, parsed back into queries.
    fn take_sent(&self) -> Vec<(SocketId, Transport, SocketAddr, Message)> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for (&id, socket) in state.sockets.iter_mut() {
            let peer = match socket.peer {
                Some(peer) => peer,
                None => continue,
            };
            for bytes in socket.sent.drain(..) {
                let wire = match socket.transport {
                    Transport::Udp => &bytes[..],
                    Transport::Tcp => &bytes[2..], // strip the length prefix
                };
                let message = Message::from_slice(wire).expect("channel sent invalid query");
                out.push((SocketId(id), socket.transport, peer, message));
            }
        }
        out
    }

    /// Queues an inbound reply and lets the channel read it.
    fn deliver(&mut self, id: SocketId, transport: Transport, reply: &Message, from: SocketAddr) {
        let mut wire = reply.to_vec().expect("test reply must encode");
        if transport == Transport::Tcp {
            let mut framed = (wire.len() as u16).to_be_bytes().to_vec();
            framed.extend_from_slice(&wire);
            wire = framed;
        }

        {
            let mut state = self.state.lock().unwrap();
            let socket = state.sockets.get_mut(&id.0).expect("unknown socket");
            let from = match transport {
                Transport::Udp => Some(from),
                Transport::Tcp => None,
            };
            socket.inbox.push_back((wire, from));
        }

        self.channel.process(&[id], &[]);
    }
}

fn a_reply(query: &Message, addr: &str) -> Message {
    let mut reply = query.clone();
    reply.qr = QR::Response;
    reply.ra = true;
    reply.extension = None;
    let name = query.questions[0].name.clone();
    reply.answers.push(Record {
        name,
        class: Class::Internet,
        ttl: 60,
        resource: match addr.parse::<IpAddr>().unwrap() {
            IpAddr::V4(v4) => Resource::A(v4),
            IpAddr::V6(v6) => Resource::AAAA(v6),
        },
    });
    reply
}

fn status_reply(query: &Message, rcode: Rcode) -> Message {
    let mut reply = query.clone();
    reply.qr = QR::Response;
    reply.ra = true;
    reply.extension = None;
    reply.rcode = rcode;
    reply
}

type Slot<T> = Arc<Mutex<Vec<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(Vec::new()))
}

fn config_with_server(server: &str) -> Config {
    let mut config = Config::with_servers(vec![server.parse::<IpAddr>().unwrap()]);
    // Keep the tests hermetic: never consult the real /etc/hosts.
    config.hosts_path = "/nonexistent/stubdns-hosts".into();
    config
}

// ---- scenarios ----

/// S1: a literal address resolves immediately, with no sockets opened.
#[test]
fn literal_ip_shortcut() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<HostResults, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.get_host_by_name("127.0.0.1", Family::V4, move |r, _| {
        out.lock().unwrap().push(r);
    });

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let host = results[0].as_ref().unwrap();
    assert_eq!(host.addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    assert_eq!(h.opened(), 0);
}

/// S1 family mismatch: a v4 literal cannot satisfy a v6 request.
#[test]
fn literal_ip_family_mismatch() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<HostResults, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.get_host_by_name("127.0.0.1", Family::V6, move |r, _| {
        out.lock().unwrap().push(r);
    });

    assert_eq!(results.lock().unwrap()[0], Err(Error::NotFound));
    assert_eq!(h.opened(), 0);
}

/// S3: a message whose first name is a forward pointer is rejected.
#[test]
fn forward_pointer_rejected() {
    let mut wire = vec![
        0x12, 0x34, // id
        0x00, 0x00, // flags
        0x00, 0x01, // qdcount
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    wire.extend_from_slice(&[0xC0, 40]); // pointer to offset 40, ahead of us
    wire.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);

    assert_eq!(Message::from_slice(&wire), Err(Error::BadName));
}

/// S4: ndots=2 search expansion tries the domains in order and the bare
/// name last, and the first success wins.
#[test]
fn search_expansion_order() {
    let mut config = config_with_server("192.0.2.53");
    config.search = vec!["corp.lan".to_string(), "example.com".to_string()];
    config.ndots = 2;

    let mut h = Harness::new(config);
    let results: Slot<Result<Message, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.search("host", Type::A, Class::Internet, move |r, _| {
        out.lock().unwrap().push(r);
    });

    let mut tried = Vec::new();
    for expect_more in [true, true, false] {
        let sent = h.take_sent();
        assert_eq!(sent.len(), 1);
        let (id, transport, peer, query) = sent.into_iter().next().unwrap();
        tried.push(query.questions[0].name.clone());

        if expect_more {
            h.deliver(id, transport, &status_reply(&query, Rcode::NXDomain), peer);
        } else {
            h.deliver(id, transport, &a_reply(&query, "198.51.100.7"), peer);
        }
    }

    assert_eq!(tried, vec!["host.corp.lan", "host.example.com", "host"]);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let reply = results[0].as_ref().unwrap();
    assert_eq!(reply.answers.len(), 1);

    // Invariant: never more than len(search) + 1 names.
    assert!(h.take_sent().is_empty());
}

/// S5: family-unspecified lookups try AAAA, and fall back to A when the
/// AAAA query yields no data.
#[test]
fn aaaa_to_a_fallback() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<HostResults, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.get_host_by_name("dual", Family::Unspec, move |r, _| {
        out.lock().unwrap().push(r);
    });

    // First query is AAAA; answer "no data".
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    let (id, transport, peer, query) = sent.into_iter().next().unwrap();
    assert_eq!(query.questions[0].qtype, Type::AAAA);
    h.deliver(id, transport, &status_reply(&query, Rcode::NoError), peer);

    // Fallback query is A for the same name.
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    let (id, transport, peer, query) = sent.into_iter().next().unwrap();
    assert_eq!(query.questions[0].qtype, Type::A);
    assert_eq!(query.questions[0].name, "dual");
    h.deliver(id, transport, &a_reply(&query, "1.2.3.4"), peer);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].as_ref().unwrap().addrs,
        vec!["1.2.3.4".parse::<IpAddr>().unwrap()]
    );
}

/// S6: a truncated UDP reply reissues the same query over TCP on the
/// same server, with a single callback at the end.
#[test]
fn truncation_falls_back_to_tcp() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<Message, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h
        .channel
        .search("big.example.com", Type::TXT, Class::Internet, move |r, _| {
            out.lock().unwrap().push(r);
        });

    let sent = h.take_sent();
    let (id, transport, peer, query) = sent.into_iter().next().unwrap();
    assert_eq!(transport, Transport::Udp);

    let mut truncated = status_reply(&query, Rcode::NoError);
    truncated.tc = true;
    h.deliver(id, transport, &truncated, peer);

    // The retry goes over TCP, to the same server.
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    let (tcp_id, tcp_transport, tcp_peer, tcp_query) = sent.into_iter().next().unwrap();
    assert_eq!(tcp_transport, Transport::Tcp);
    assert_eq!(tcp_peer.ip(), peer.ip());
    assert_eq!(tcp_query.questions, query.questions);

    let mut reply = tcp_query.clone();
    reply.qr = QR::Response;
    reply.extension = None;
    reply.answers.push(Record {
        name: "big.example.com".to_string(),
        class: Class::Internet,
        ttl: 30,
        resource: Resource::TXT(stubdns::resource::TXT(vec![b"intact".to_vec()])),
    });
    h.deliver(tcp_id, tcp_transport, &reply, tcp_peer);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let got = results[0].as_ref().unwrap();
    assert!(!got.tc);
    assert_eq!(got.answers.len(), 1);
}

/// S7: with a dead first server, every query still succeeds through the
/// second, and the dead server keeps being probed at roughly the
/// configured 1-in-10 chance.
#[test]
fn server_failover_with_probing() {
    let mut config = Config::with_servers(vec![
        "192.0.2.1".parse::<IpAddr>().unwrap(),
        "192.0.2.2".parse::<IpAddr>().unwrap(),
    ]);
    config.timeout = Duration::from_millis(1);
    config.server_retry_delay = Duration::ZERO;
    config.qcache_max_ttl = 0;
    config.hosts_path = "/nonexistent/stubdns-hosts".into();

    let mut h = Harness::new(config);
    let dead: IpAddr = "192.0.2.1".parse().unwrap();

    let mut successes = 0;
    let mut dead_sends = 0;

    for i in 0..100 {
        let results: Slot<Result<Message, Error>> = slot();
        let out = Arc::clone(&results);
        let name = format!("host{}.example.com", i);
        let _ = h
            .channel
            .search(&name, Type::A, Class::Internet, move |r, _| {
                out.lock().unwrap().push(r);
            });

        let mut rounds = 0;
        while results.lock().unwrap().is_empty() {
            rounds += 1;
            assert!(rounds < 10, "query {} never completed", i);

            let mut delivered = false;
            for (id, transport, peer, query) in h.take_sent() {
                if peer.ip() == dead {
                    dead_sends += 1;
                } else {
                    h.deliver(id, transport, &a_reply(&query, "203.0.113.5"), peer);
                    delivered = true;
                }
            }

            if !delivered {
                // Let the attempt on the dead server expire.
                std::thread::sleep(Duration::from_millis(3));
                h.channel.process(&[], &[]);
            }
        }

        if results.lock().unwrap()[0].is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 100);

    // The first query legitimately goes to server 1; afterwards only the
    // roughly-one-in-ten probe should pick it.
    assert!(dead_sends >= 2, "dead server never probed: {}", dead_sends);
    assert!(
        dead_sends <= 35,
        "dead server picked far too often: {}",
        dead_sends
    );
}

/// S8: `.onion` names are refused without touching the network.
#[test]
fn onion_refused() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<HostResults, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.get_host_by_name("xyz.onion", Family::V4, move |r, _| {
        out.lock().unwrap().push(r);
    });

    assert_eq!(results.lock().unwrap()[0], Err(Error::NotFound));
    assert_eq!(h.opened(), 0);
}

// ---- callback discipline ----

#[test]
fn cancel_invokes_callback_once() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<Message, Error>> = slot();

    let out = Arc::clone(&results);
    let handle = h
        .channel
        .search("cancel.example.com", Type::A, Class::Internet, move |r, _| {
            out.lock().unwrap().push(r);
        })
        .expect("query should be in flight");

    h.channel.cancel(handle);
    h.channel.cancel(handle); // second cancel is a no-op

    let results = results.lock().unwrap();
    assert_eq!(*results, vec![Err(Error::Cancelled)]);
}

#[test]
fn destroy_completes_everything_exactly_once() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<Message, Error>> = slot();

    for i in 0..5 {
        let out = Arc::clone(&results);
        let _ = h.channel.search(
            &format!("q{}.example.com", i),
            Type::A,
            Class::Internet,
            move |r, _| {
                out.lock().unwrap().push(r);
            },
        );
    }
    assert_eq!(h.channel.active_queries(), 5);

    h.channel.destroy();

    {
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| *r == Err(Error::Destruction)));
    }

    // A destroyed channel rejects new work, synchronously.
    let out = Arc::clone(&results);
    let _ = h.channel.search("late.example.com", Type::A, Class::Internet, move |r, _| {
        out.lock().unwrap().push(r);
    });
    assert_eq!(results.lock().unwrap().last(), Some(&Err(Error::Destruction)));
}

#[test]
fn off_path_datagrams_are_ignored() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<Message, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h
        .channel
        .search("spoof.example.com", Type::A, Class::Internet, move |r, _| {
            out.lock().unwrap().push(r);
        });

    let sent = h.take_sent();
    let (id, transport, peer, query) = sent.into_iter().next().unwrap();

    // Same payload, wrong source address: must be dropped.
    let spoofed_from: SocketAddr = "198.51.100.99:53".parse().unwrap();
    h.deliver(id, transport, &a_reply(&query, "6.6.6.6"), spoofed_from);
    assert!(results.lock().unwrap().is_empty());

    // The genuine reply still lands.
    h.deliver(id, transport, &a_reply(&query, "192.0.2.77"), peer);
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
}

#[test]
fn send_raw_round_trip() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<Message, Error>> = slot();

    let query = Message::query("raw.example.com", Type::TXT, Class::Internet);
    let wire = query.to_vec().unwrap();

    let out = Arc::clone(&results);
    let _ = h.channel.send_raw(&wire, move |r, _| {
        out.lock().unwrap().push(r);
    });

    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    let (id, transport, peer, sent_query) = sent.into_iter().next().unwrap();
    assert_eq!(sent_query.questions, query.questions);

    let mut reply = sent_query.clone();
    reply.qr = QR::Response;
    reply.answers.push(Record {
        name: "raw.example.com".to_string(),
        class: Class::Internet,
        ttl: 60,
        resource: Resource::TXT(stubdns::resource::TXT(vec![b"ok".to_vec()])),
    });
    h.deliver(id, transport, &reply, peer);

    let results = results.lock().unwrap();
    assert!(results[0].is_ok());
}

#[test]
fn malformed_raw_query_rejected() {
    let mut h = Harness::new(config_with_server("192.0.2.53"));
    let results: Slot<Result<Message, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.send_raw(&[1, 2, 3], move |r, _| {
        out.lock().unwrap().push(r);
    });

    assert_eq!(results.lock().unwrap()[0], Err(Error::BadQuery));
    assert_eq!(h.opened(), 0);
}

/// Hosts-file entries satisfy lookups before any query is sent.
#[test]
fn hosts_file_short_circuits_dns() {
    let dir = std::env::temp_dir().join(format!("stubdns-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let hosts_path = dir.join("hosts");
    std::fs::write(&hosts_path, "192.0.2.99 printer.corp.lan printer\n").unwrap();

    let mut config = config_with_server("192.0.2.53");
    config.hosts_path = hosts_path;

    let mut h = Harness::new(config);
    let results: Slot<Result<HostResults, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h.channel.get_host_by_name("printer", Family::V4, move |r, _| {
        out.lock().unwrap().push(r);
    });

    let results = results.lock().unwrap();
    let host = results[0].as_ref().unwrap();
    assert_eq!(host.name, "printer.corp.lan");
    assert_eq!(host.addrs, vec!["192.0.2.99".parse::<IpAddr>().unwrap()]);
    assert_eq!(h.opened(), 0);
}

/// Reverse lookup synthesizes the in-addr.arpa name and parses PTR
/// answers.
#[test]
fn host_by_addr_ptr_lookup() {
    let mut config = config_with_server("192.0.2.53");
    config.hosts_path = "/nonexistent/hosts".into();

    let mut h = Harness::new(config);
    let results: Slot<Result<HostResults, Error>> = slot();

    let out = Arc::clone(&results);
    let _ = h
        .channel
        .get_host_by_addr("8.8.4.4".parse().unwrap(), move |r, _| {
            out.lock().unwrap().push(r);
        });

    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    let (id, transport, peer, query) = sent.into_iter().next().unwrap();
    assert_eq!(query.questions[0].qtype, Type::PTR);
    assert_eq!(query.questions[0].name, "4.4.8.8.in-addr.arpa");

    let mut reply = query.clone();
    reply.qr = QR::Response;
    reply.extension = None;
    reply.answers.push(Record {
        name: "4.4.8.8.in-addr.arpa".to_string(),
        class: Class::Internet,
        ttl: 300,
        resource: Resource::PTR("dns.google".to_string()),
    });
    h.deliver(id, transport, &reply, peer);

    let results = results.lock().unwrap();
    let host = results[0].as_ref().unwrap();
    assert_eq!(host.name, "dns.google");
    assert_eq!(host.addrs, vec!["8.8.4.4".parse::<IpAddr>().unwrap()]);
}

/// `usevc` forces TCP from the first attempt.
#[test]
fn usevc_forces_tcp() {
    let mut config = config_with_server("192.0.2.53");
    config.flags.usevc = true;

    let mut h = Harness::new(config);
    let _ = h
        .channel
        .search("tcp-only.example.com", Type::A, Class::Internet, |_, _| {});

    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, Transport::Tcp);
}
