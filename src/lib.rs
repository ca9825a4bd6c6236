//! stubdns is a non-blocking DNS stub-resolver library: it issues
//! queries, multiplexes them over UDP and TCP toward a configured set of
//! recursive name servers, retries and fails over under loss, parses wire
//! responses into structured records, and delivers results through
//! callbacks.
//!
//! # Features
//! * Parsing and generating the common record types: A, AAAA, CNAME, MX,
//!   NS, PTR, SOA, SRV, TXT, NAPTR, CAA, TLSA and HINFO, with unknown
//!   types preserved losslessly.
//! * Extension Mechanisms for DNS ([EDNS(0)]), defaulting to the
//!   DNS Flag Day 2020 payload size.
//! * Hardened wire decoding: compression pointers may only point
//!   backward, pointer chains are depth-bounded, and labels are
//!   validated and escaped.
//! * UDP first with TCP fallback on truncation, per-server adaptive
//!   timeouts, failure-ordered server selection with failover probing.
//! * The full hostname pipeline: literal addresses, the hosts file,
//!   search-domain expansion with the ndots heuristic, AAAA→A fallback
//!   and CNAME chasing.
//!
//! # Usage (host-driven)
//!
//! The channel performs no I/O of its own accord; the application owns
//! the event loop, watches the descriptors the channel announces, and
//! reports readiness back:
//!
//! ```no_run
//! use stubdns::{Channel, Config, Family};
//! use std::time::Instant;
//!
//! let mut channel = Channel::new(Config::default());
//! let _handle = channel.get_host_by_name("example.com", Family::Unspec, |result, _timeouts| {
//!     match result {
//!         Ok(host) => println!("{} -> {:?}", host.name, host.addrs),
//!         Err(e) => eprintln!("lookup failed: {}", e),
//!     }
//! });
//!
//! // Poll the channel's sockets with your favourite event loop, then:
//! while channel.active_queries() > 0 {
//!     let fds = channel.fds();
//!     // ... wait for readiness, at most channel.timeout(Instant::now(), None) ...
//!     let readable: Vec<_> = fds.iter().map(|&(id, _, _)| id).collect();
//!     let writable: Vec<_> = fds.iter().filter(|f| f.2).map(|f| f.0).collect();
//!     channel.process(&readable, &writable);
//! }
//! ```
//!
//! # Usage (owned event thread)
//!
//! Alternatively [`Resolver`] spawns one thread that does the polling,
//! in the manner of a classic asynchronous resolver binding:
//!
//! ```no_run
//! use stubdns::{Config, Family, Resolver};
//!
//! let resolver = Resolver::new(Config::default()).unwrap();
//! let _handle = resolver.get_host_by_name("example.com", Family::Unspec, |result, _| {
//!     println!("{:?}", result);
//! });
//! resolver.wait_empty();
//! ```
//!
//! ## Reference
//!
//! * [rfc1034]: DOMAIN NAMES - CONCEPTS AND FACILITIES
//! * [rfc1035]: DOMAIN NAMES - IMPLEMENTATION AND SPECIFICATION
//! * [rfc2782]: A DNS RR for specifying the location of services
//! * [rfc6891]: Extension Mechanisms for DNS (EDNS(0))
//! * [rfc7686]: The ".onion" Special-Use Domain Name
//! * [IANA Domain Name System (DNS) Parameters](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml)
//!
//! [EDNS(0)]: https://en.wikipedia.org/wiki/Extension_Mechanisms_for_DNS
//! [rfc1034]: https://datatracker.ietf.org/doc/html/rfc1034
//! [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
//! [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
//! [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
//! [rfc7686]: https://datatracker.ietf.org/doc/html/rfc7686

pub mod addrinfo;
mod channel;
pub mod config;
mod conn;
mod display;
mod dns;
mod errors;
mod eventloop;
mod from_str;
pub mod hosts;
mod io;
pub mod name;
mod qcache;
mod queries;
pub mod resource;
mod search;
mod servers;
pub mod sockets;
pub mod types;

#[macro_use]
extern crate num_derive;

#[macro_use]
extern crate lazy_static;

// Pull up the types that should be on the front page of the docs.
#[doc(inline)]
pub use crate::types::*;

#[doc(inline)]
pub use crate::addrinfo::{AddrInfo, AddrInfoHints, AddrNode, HostResults};

#[doc(inline)]
pub use crate::channel::Channel;

#[doc(inline)]
pub use crate::config::{Config, Flags, ServerSpec};

#[cfg(unix)]
#[doc(inline)]
pub use crate::eventloop::Resolver;

pub use crate::errors::Error;
pub use crate::from_str::FromStrError;
pub use crate::queries::QueryHandle;
