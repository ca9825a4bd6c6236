//! Host and address-info lookup results, and the state the channel
//! threads through multi-query lookups (AAAA then A, CNAME chains, PTR).

use crate::errors::Error;
use crate::resource::Resource;
use crate::types::{Family, Message};
use std::net::IpAddr;

/// Hints narrowing a [`Channel::get_addr_info`](crate::Channel::get_addr_info)
/// lookup.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddrInfoHints {
    pub family: Family,
}

/// One resolved address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddrNode {
    pub addr: IpAddr,

    /// Service port, zero when no service was requested.
    pub port: u16,

    /// Cache lifetime, capped by the minimum TTL of any CNAME link that
    /// led here.
    pub ttl: u32,
}

/// Result of an address-info lookup.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddrInfo {
    /// The end of the CNAME chain, or the queried name itself.
    pub canonical: String,

    /// Chain of names that led to `canonical`, query name first.
    pub aliases: Vec<String>,

    pub nodes: Vec<AddrNode>,
}

/// Result of a host-by-name or host-by-address lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostResults {
    /// Canonical hostname.
    pub name: String,

    pub aliases: Vec<String>,

    pub addrs: Vec<IpAddr>,
}

/// Callback for [`Channel::get_addr_info`](crate::Channel::get_addr_info).
pub type AddrInfoCallback = Box<dyn FnOnce(Result<AddrInfo, Error>, usize) + Send + 'static>;

/// Callback for the host-by-name and host-by-address lookups.
pub type HostCallback = Box<dyn FnOnce(Result<HostResults, Error>, usize) + Send + 'static>;

impl From<AddrInfo> for HostResults {
    fn from(ai: AddrInfo) -> HostResults {
        HostResults {
            name: ai.canonical,
            aliases: ai.aliases,
            addrs: ai.nodes.into_iter().map(|n| n.addr).collect(),
        }
    }
}

/// State carried across the queries of one `get_addr_info` lookup.
pub(crate) struct AddrInfoState {
    /// Normalised (ascii, idna-mapped) name being resolved.
    pub name: String,

    pub port: u16,
    pub family: Family,

    /// Address family of the query currently in flight. For
    /// `Family::Unspec` this starts at V6 and falls back to V4.
    pub phase: Family,

    pub result: AddrInfo,

    /// Status of the AAAA phase, kept in case the A phase also fails.
    pub first_status: Option<Error>,

    /// Timeouts accumulated across both phases.
    pub timeouts: usize,

    pub callback: AddrInfoCallback,
}

impl AddrInfoState {
    pub fn new(
        name: String,
        port: u16,
        family: Family,
        callback: AddrInfoCallback,
    ) -> AddrInfoState {
        let phase = match family {
            Family::V4 => Family::V4,
            Family::V6 | Family::Unspec => Family::V6,
        };

        AddrInfoState {
            name,
            port,
            family,
            phase,
            result: AddrInfo::default(),
            first_status: None,
            timeouts: 0,
            callback,
        }
    }

    /// Folds one reply into the accumulated result. The reply's own
    /// question supplies the starting point of the CNAME walk.
    pub fn absorb(&mut self, reply: &Message) {
        let queried = match reply.questions.first() {
            Some(q) => q.name.clone(),
            None => self.name.clone(),
        };
        let parsed = parse_addresses(reply, &queried, self.port);

        if self.result.nodes.is_empty() && self.result.aliases.is_empty() {
            self.result.canonical = parsed.canonical;
            self.result.aliases = parsed.aliases;
        }
        self.result.nodes.extend(parsed.nodes);
    }

    /// Whether a failed phase should fall back to an A query.
    pub fn wants_fallback(&self, status: Error) -> bool {
        self.family == Family::Unspec
            && self.phase == Family::V6
            && matches!(status, Error::NoData | Error::BadResp | Error::Timeout)
    }
}

/// Walks a reply's CNAME chain from `queried` and collects the chain
/// tail's A/AAAA records. The chain's minimum TTL caps every address TTL.
pub(crate) fn parse_addresses(reply: &Message, queried: &str, port: u16) -> AddrInfo {
    let mut canonical = queried.trim_end_matches('.').to_string();
    let mut aliases = Vec::new();
    let mut ttl_ceiling = u32::MAX;

    // Bounded by the record count, so a CNAME loop cannot spin forever.
    for _ in 0..reply.answers.len() {
        let hop = reply.answers.iter().find(|r| {
            matches!(r.resource, Resource::CNAME(_)) && name_eq(&r.name, &canonical)
        });

        match hop {
            Some(r) => {
                if let Resource::CNAME(target) = &r.resource {
                    ttl_ceiling = ttl_ceiling.min(r.ttl);
                    aliases.push(canonical);
                    canonical = target.trim_end_matches('.').to_string();
                }
            }
            None => break,
        }
    }

    let mut nodes = Vec::new();
    for r in &reply.answers {
        if !name_eq(&r.name, &canonical) {
            continue;
        }
        let addr = match r.resource {
            Resource::A(v4) => IpAddr::V4(v4),
            Resource::AAAA(v6) => IpAddr::V6(v6),
            _ => continue,
        };
        nodes.push(AddrNode {
            addr,
            port,
            ttl: r.ttl.min(ttl_ceiling),
        });
    }

    AddrInfo {
        canonical,
        aliases,
        nodes,
    }
}

fn name_eq(a: &str, b: &str) -> bool {
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

/// State carried through a reverse (PTR) lookup.
pub(crate) struct HostByAddrState {
    pub addr: IpAddr,
    pub callback: HostCallback,
}

impl HostByAddrState {
    /// Extracts hostnames from a PTR reply. CNAME-redirected PTR names
    /// are followed the same way addresses are.
    pub fn absorb(&self, reply: &Message, queried: &str) -> Result<HostResults, Error> {
        let mut owner = queried.trim_end_matches('.').to_string();

        for _ in 0..reply.answers.len() {
            let hop = reply.answers.iter().find(|r| {
                matches!(r.resource, Resource::CNAME(_)) && name_eq(&r.name, &owner)
            });
            match hop {
                Some(r) => {
                    if let Resource::CNAME(target) = &r.resource {
                        owner = target.trim_end_matches('.').to_string();
                    }
                }
                None => break,
            }
        }

        let mut names: Vec<String> = reply
            .answers
            .iter()
            .filter(|r| name_eq(&r.name, &owner))
            .filter_map(|r| match &r.resource {
                Resource::PTR(name) => Some(name.trim_end_matches('.').to_string()),
                _ => None,
            })
            // A PTR target is a hostname; drop anything that is not.
            .filter(|name| crate::name::is_hostname(name))
            .collect();

        if names.is_empty() {
            return Err(Error::NoData);
        }

        let name = names.remove(0);
        Ok(HostResults {
            name,
            aliases: names,
            addrs: vec![self.addr],
        })
    }
}

/// Resolves a service name or numeric string to a port.
///
/// A small built-in table of well-known services stands in for
/// `getservbyname`; anything else must be numeric.
pub(crate) fn lookup_service(service: &str) -> Result<u16, Error> {
    if service.is_empty() {
        return Ok(0);
    }

    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }

    const SERVICES: &[(&str, u16)] = &[
        ("ftp", 21),
        ("ssh", 22),
        ("telnet", 23),
        ("smtp", 25),
        ("domain", 53),
        ("http", 80),
        ("pop3", 110),
        ("ntp", 123),
        ("imap", 143),
        ("ldap", 389),
        ("https", 443),
        ("submission", 587),
        ("imaps", 993),
        ("pop3s", 995),
    ];

    SERVICES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(service))
        .map(|&(_, port)| port)
        .ok_or(Error::Service)
}
