//! Implements the FromStr trait for the various record types, to be able
//! to build records from their `dig`-style text representation. Mostly
//! useful to embedders constructing fixtures and static answers.

use crate::resource::{Resource, CAA, MX, NAPTR, SOA, SRV, TXT};
use crate::types::Type;
use core::num::ParseIntError;
use core::str::FromStr;
use regex::Regex;
use std::net::AddrParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FromStrError {
    #[error("that resource type doesn't have a text representation")]
    UnsupportedType,

    #[error("string doesn't match expected format")]
    InvalidFormat,

    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),

    #[error(transparent)]
    AddrParseError(#[from] AddrParseError),
}

impl Resource {
    /// Similar to FromStr, but needs the record [`Type`] since the text
    /// forms are ambiguous.
    pub fn from_str(rtype: Type, s: &str) -> Result<Self, FromStrError> {
        Ok(match rtype {
            // IP addresses
            Type::A => Resource::A(s.parse()?),
            Type::AAAA => Resource::AAAA(s.parse()?),

            // Simple strings (domains)
            Type::NS => Resource::NS(s.to_string()),
            Type::CNAME => Resource::CNAME(s.to_string()),
            Type::PTR => Resource::PTR(s.to_string()),

            // Complex types
            Type::MX => Resource::MX(s.parse()?),
            Type::SRV => Resource::SRV(s.parse()?),
            Type::SOA => Resource::SOA(s.parse()?),
            Type::TXT => Resource::TXT(s.parse()?),
            Type::CAA => Resource::CAA(s.parse()?),
            Type::NAPTR => Resource::NAPTR(s.parse()?),

            // These never appear in answer records with a text form.
            Type::Reserved | Type::HINFO | Type::OPT | Type::TLSA | Type::ANY => {
                return Err(FromStrError::UnsupportedType)
            }
        })
    }
}

impl FromStr for SOA {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            // "ns1.google.com. dns-admin.google.com. 376337657 900 900 1800 60"
            // "{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"
            static ref RE: Regex = Regex::new(r"^(\S+) (\S+) (\d+) (\d+) (\d+) (\d+) (\d+)$").unwrap();
        }

        if let Some(caps) = RE.captures(s) {
            Ok(SOA {
                mname: caps[1].trim_end_matches('.').to_string(),
                rname: caps[2].trim_end_matches('.').to_string(),
                serial: caps[3].parse()?,
                refresh: caps[4].parse()?,
                retry: caps[5].parse()?,
                expire: caps[6].parse()?,
                minimum: caps[7].parse()?,
            })
        } else {
            Err(FromStrError::InvalidFormat)
        }
    }
}

impl FromStr for MX {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            // "10 aspmx.l.google.com."
            // "{preference} {exchange}"
            static ref RE: Regex = Regex::new(r"^(\d+) (.+?)\.?$").unwrap();
        }

        if let Some(caps) = RE.captures(s) {
            Ok(MX {
                preference: caps[1].parse()?,
                exchange: caps[2].to_string(),
            })
        } else {
            Err(FromStrError::InvalidFormat)
        }
    }
}

impl FromStr for SRV {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            // "5 0 389 ldap.google.com."
            // "{priority} {weight} {port} {target}"
            static ref RE: Regex = Regex::new(r"^(\d+) (\d+) (\d+) (.+?)\.?$").unwrap();
        }

        if let Some(caps) = RE.captures(s) {
            Ok(SRV {
                priority: caps[1].parse()?,
                weight: caps[2].parse()?,
                port: caps[3].parse()?,
                target: caps[4].to_string(),
            })
        } else {
            Err(FromStrError::InvalidFormat)
        }
    }
}

impl FromStr for TXT {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r#""(.*?)""#).unwrap();
        }

        let mut strings = Vec::new();
        for caps in RE.captures_iter(s) {
            strings.push(caps[1].as_bytes().to_vec());
        }

        if strings.is_empty() {
            return Err(FromStrError::InvalidFormat);
        }

        Ok(TXT(strings))
    }
}

impl FromStr for CAA {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            // "0 issue "letsencrypt.org""
            // "{flags} {tag} "{value}""
            static ref RE: Regex = Regex::new(r#"^(\d+) (\S+) "(.*)"$"#).unwrap();
        }

        if let Some(caps) = RE.captures(s) {
            let flags: u8 = caps[1].parse()?;
            Ok(CAA {
                critical: flags & 0x80 != 0,
                tag: caps[2].to_string(),
                value: caps[3].as_bytes().to_vec(),
            })
        } else {
            Err(FromStrError::InvalidFormat)
        }
    }
}

impl FromStr for NAPTR {
    type Err = FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            // "100 50 "s" "SIP+D2U" "" _sip._udp.example.com."
            // "{order} {preference} "{flags}" "{services}" "{regexp}" {replacement}"
            static ref RE: Regex =
                Regex::new(r#"^(\d+) (\d+) "(.*?)" "(.*?)" "(.*?)" (\S+?)\.?$"#).unwrap();
        }

        if let Some(caps) = RE.captures(s) {
            Ok(NAPTR {
                order: caps[1].parse()?,
                preference: caps[2].parse()?,
                flags: caps[3].as_bytes().to_vec(),
                services: caps[4].as_bytes().to_vec(),
                regexp: caps[5].as_bytes().to_vec(),
                replacement: caps[6].to_string(),
            })
        } else {
            Err(FromStrError::InvalidFormat)
        }
    }
}
