//! Implements the Display trait for the various types, so they output
//! in `dig` style.

use crate::resource::Resource;
use crate::types::{Message, Question, Record, Stats};
use chrono::prelude::*;
use std::fmt;

/// Displays this message in a format resembling `dig` output.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_header(f)?;

        // ;; OPT PSEUDOSECTION:
        // ; EDNS: version: 0, flags:; udp: 1232
        if let Some(e) = &self.extension {
            writeln!(f, ";; OPT PSEUDOSECTION:")?;
            writeln!(
                f,
                "; EDNS: version: {version}, flags:{dnssec}; udp: {payload_size}",
                version = e.version,
                dnssec = if e.dnssec_ok { " do" } else { "" },
                payload_size = e.payload_size,
            )?;
        }

        // Always display the question section, but optionally
        // display the other sections.
        writeln!(f, ";; QUESTION SECTION:")?;
        for question in &self.questions {
            question.fmt(f)?;
        }
        writeln!(f)?;

        if !self.answers.is_empty() {
            writeln!(f, "; ANSWER SECTION:")?;
            for answer in &self.answers {
                answer.fmt(f)?;
            }
            writeln!(f)?;
        }

        if !self.authorities.is_empty() {
            writeln!(f, "; AUTHORITY SECTION:")?;
            for authority in &self.authorities {
                authority.fmt(f)?;
            }
            writeln!(f)?;
        }

        if !self.additionals.is_empty() {
            writeln!(f, "; ADDITIONAL SECTION:")?;
            for additional in &self.additionals {
                additional.fmt(f)?;
            }
            writeln!(f)?;
        }

        if let Some(stats) = &self.stats {
            stats.fmt(f)?;
        }

        Ok(())
    }
}

impl Message {
    // ;; ->>HEADER<<- opcode: Query, status: NoError, id: 44857
    // ;; flags: qr rd ra; QUERY: 1, ANSWER: 2, AUTHORITY: 0, ADDITIONAL: 1
    fn fmt_header(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut flags = String::new();

        if self.qr.to_bool() {
            flags.push_str(" qr");
        }
        if self.aa {
            flags.push_str(" aa");
        }
        if self.tc {
            flags.push_str(" tc");
        }
        if self.rd {
            flags.push_str(" rd");
        }
        if self.ra {
            flags.push_str(" ra");
        }
        if self.ad {
            flags.push_str(" ad");
        }
        if self.cd {
            flags.push_str(" cd");
        }

        writeln!(
            f,
            ";; ->>HEADER<<- opcode: {opcode}, status: {rcode}, id: {id}",
            opcode = self.opcode,
            rcode = self.rcode,
            id = self.id,
        )?;

        writeln!(
            f,
            ";; flags:{flags}; QUERY: {queries}, ANSWER: {answers}, AUTHORITY: {authorities}, ADDITIONAL: {additionals}",
            flags = flags,
            queries = self.questions.len(),
            answers = self.answers.len(),
            authorities = self.authorities.len(),
            additionals = self.additionals.len() + usize::from(self.extension.is_some()),
        )
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // ; ns1.example.net.              IN   A
        writeln!(
            f,
            "; {name:<22} {class:4} {qtype:6}",
            name = format!("{}.", self.name.trim_end_matches('.')),
            class = self.qclass,
            qtype = self.qtype,
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // ns1.example.net.            299 IN   A      104.21.62.200
        writeln!(
            f,
            "{name:<20} {ttl:>4} {class:4} {rtype:6} {resource}",
            name = format!("{}.", self.name.trim_end_matches('.')),
            ttl = self.ttl,
            class = self.class,
            rtype = self.rtype(),
            resource = self.resource,
        )
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::A(ip) => ip.fmt(f),
            Resource::AAAA(ip) => ip.fmt(f),

            Resource::NS(name) => name.fmt(f),
            Resource::CNAME(name) => name.fmt(f),
            Resource::PTR(name) => name.fmt(f),

            Resource::HINFO(hinfo) => write!(
                f,
                "\"{}\" \"{}\"",
                String::from_utf8_lossy(&hinfo.cpu),
                String::from_utf8_lossy(&hinfo.os),
            ),

            // "10 aspmx.l.google.com."
            Resource::MX(mx) => write!(f, "{} {}", mx.preference, mx.exchange),

            Resource::TXT(txt) => {
                let strings: Vec<String> = txt
                    .0
                    .iter()
                    .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
                    .collect();
                write!(f, "{}", strings.join(" "))
            }

            // "ns1.google.com. dns-admin.google.com. 376337657 900 900 1800 60"
            Resource::SOA(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum,
            ),

            // "5 0 389 ldap.google.com."
            Resource::SRV(srv) => write!(
                f,
                "{} {} {} {}",
                srv.priority, srv.weight, srv.port, srv.target,
            ),

            // "100 50 "s" "SIP+D2U" "" _sip._udp.example.com."
            Resource::NAPTR(naptr) => write!(
                f,
                "{} {} \"{}\" \"{}\" \"{}\" {}",
                naptr.order,
                naptr.preference,
                String::from_utf8_lossy(&naptr.flags),
                String::from_utf8_lossy(&naptr.services),
                String::from_utf8_lossy(&naptr.regexp),
                naptr.replacement,
            ),

            // "0 issue "letsencrypt.org""
            Resource::CAA(caa) => write!(
                f,
                "{} {} \"{}\"",
                u8::from(caa.critical) << 7,
                caa.tag,
                String::from_utf8_lossy(&caa.value),
            ),

            // "3 1 1 ab9beb160e6493a8"
            Resource::TLSA(tlsa) => {
                write!(
                    f,
                    "{} {} {} ",
                    tlsa.usage, tlsa.selector, tlsa.matching_type
                )?;
                for b in &tlsa.data {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }

            Resource::Raw { rtype, octets } => {
                write!(f, "\\# {} TYPE{}", octets.len(), rtype)
            }
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // ;; Query time: 46 msec
        // ;; SERVER: 8.8.8.8#53(8.8.8.8)
        // ;; WHEN: Sat Jun 12 12:14:21 BST 2021
        // ;; MSG SIZE  sent: 27 rcvd: 222
        let when: DateTime<Local> = self.start.into();

        writeln!(f, ";; Query time: {} msec", self.duration.as_millis())?;
        writeln!(
            f,
            ";; SERVER: {ip}#{port}({ip})",
            ip = self.server.ip(),
            port = self.server.port(),
        )?;
        writeln!(f, ";; WHEN: {}", when.format("%a %b %e %T %Z %Y"))?;
        writeln!(f, ";; MSG SIZE  sent: {} rcvd: {}", self.request_size, self.response_size)
    }
}
