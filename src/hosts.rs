//! Hosts-file parsing and lookup.
//!
//! Format: one entry per line, `<ip> <canonical-host> [alias ...]`, with
//! `#` starting a comment. Entries with the same address merge their host
//! lists. Hostname matching is case-insensitive; the first matching entry
//! supplies the canonical name.

use crate::errors::Error;
use crate::types::Family;
use log::warn;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostEntry {
    pub addr: IpAddr,

    /// Canonical name first, then aliases.
    pub hostnames: Vec<String>,
}

/// An in-memory hosts file.
#[derive(Clone, Debug, Default)]
pub struct Hosts {
    entries: Vec<HostEntry>,
}

/// A successful hosts-file lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostsMatch {
    pub canonical: String,
    pub aliases: Vec<String>,
    pub addrs: Vec<IpAddr>,
}

impl Hosts {
    /// Reads and parses a hosts file.
    pub fn load(path: &Path) -> Result<Hosts, Error> {
        let text = fs::read_to_string(path).map_err(|_| Error::FileIo)?;
        Ok(Hosts::parse(&text))
    }

    /// Parses hosts-file text. Unparsable lines are skipped, matching
    /// what every other resolver on the platform does with this file.
    pub fn parse(text: &str) -> Hosts {
        let mut hosts = Hosts::default();

        for line in text.lines() {
            let line = match line.split_once('#') {
                Some((before, _comment)) => before,
                None => line,
            };

            let mut fields = line.split_whitespace();
            let addr = match fields.next() {
                Some(field) => match field.parse::<IpAddr>() {
                    Ok(addr) => addr,
                    Err(_) => {
                        warn!("skipping hosts line with bad address: {:?}", field);
                        continue;
                    }
                },
                None => continue, // blank or comment-only line
            };

            let names: Vec<String> = fields.map(str::to_string).collect();
            if names.is_empty() {
                continue;
            }

            // Same address: merge host lists rather than shadowing.
            match hosts.entries.iter_mut().find(|e| e.addr == addr) {
                Some(entry) => {
                    for name in names {
                        if !entry.hostnames.iter().any(|h| h.eq_ignore_ascii_case(&name)) {
                            entry.hostnames.push(name);
                        }
                    }
                }
                None => hosts.entries.push(HostEntry {
                    addr,
                    hostnames: names,
                }),
            }
        }

        hosts
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a hostname. Addresses are collected from every entry
    /// listing the name (so dual-family hosts yield both families); the
    /// first matching entry supplies the canonical name and aliases.
    pub fn lookup_name(&self, name: &str, family: Family) -> Option<HostsMatch> {
        let name = name.strip_suffix('.').unwrap_or(name);
        let mut found: Option<HostsMatch> = None;

        for entry in &self.entries {
            let wanted = match family {
                Family::Unspec => true,
                Family::V4 => entry.addr.is_ipv4(),
                Family::V6 => entry.addr.is_ipv6(),
            };
            if !wanted {
                continue;
            }

            if !entry.hostnames.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                continue;
            }

            match &mut found {
                Some(m) => m.addrs.push(entry.addr),
                None => {
                    found = Some(HostsMatch {
                        canonical: entry.hostnames[0].clone(),
                        aliases: entry.hostnames[1..].to_vec(),
                        addrs: vec![entry.addr],
                    })
                }
            }
        }

        found
    }

    /// Looks up an address. Addresses compare by parsed value, so any
    /// textual spelling of the same address matches.
    pub fn lookup_addr(&self, addr: IpAddr) -> Option<&HostEntry> {
        self.entries.iter().find(|e| e.addr == addr)
    }
}
