//! Resource record data definitions and their RDATA codecs.
//!
//! Each parser receives the cursor positioned at the start of the RDATA
//! and the RDLENGTH, and must consume exactly that many bytes. Unknown
//! record types are preserved as [`Resource::Raw`] so pass-through is
//! lossless.

use crate::dns::MessageWriter;
use crate::errors::Error;
use crate::io::DnsReadExt;
use crate::types::Type;
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Resource record data, tagged by type.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resource {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),

    NS(String),
    CNAME(String),
    PTR(String),

    HINFO(HINFO),
    MX(MX),
    TXT(TXT),
    SOA(SOA),
    SRV(SRV),
    NAPTR(NAPTR),
    CAA(CAA),
    TLSA(TLSA),

    /// A record type this library has no parser for, kept as raw RDATA.
    Raw { rtype: u16, octets: Vec<u8> },
}

impl Resource {
    pub fn rtype(&self) -> Type {
        match self {
            Resource::A(_) => Type::A,
            Resource::AAAA(_) => Type::AAAA,
            Resource::NS(_) => Type::NS,
            Resource::CNAME(_) => Type::CNAME,
            Resource::PTR(_) => Type::PTR,
            Resource::HINFO(_) => Type::HINFO,
            Resource::MX(_) => Type::MX,
            Resource::TXT(_) => Type::TXT,
            Resource::SOA(_) => Type::SOA,
            Resource::SRV(_) => Type::SRV,
            Resource::NAPTR(_) => Type::NAPTR,
            Resource::CAA(_) => Type::CAA,
            Resource::TLSA(_) => Type::TLSA,
            Resource::Raw { .. } => Type::Reserved,
        }
    }

    /// The wire value of this record's type, including unknown types.
    pub fn rtype_value(&self) -> u16 {
        match self {
            Resource::Raw { rtype, .. } => *rtype,
            _ => self.rtype() as u16,
        }
    }

    /// Parses RDATA of the given type. `rtype` is `Err(raw)` for types we
    /// have no parser for.
    pub(crate) fn parse(
        cur: &mut Cursor<&[u8]>,
        rtype: Result<Type, u16>,
        rdlen: usize,
    ) -> Result<Resource, Error> {
        let start = cur.position() as usize;

        let resource = match rtype {
            Ok(Type::A) => {
                if rdlen != 4 {
                    return Err(Error::BadResp);
                }
                let octets = cur.take(4)?;
                Resource::A(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
            }

            Ok(Type::AAAA) => {
                if rdlen != 16 {
                    return Err(Error::BadResp);
                }
                let octets: [u8; 16] = cur.take(16)?.try_into().unwrap();
                Resource::AAAA(Ipv6Addr::from(octets))
            }

            Ok(Type::NS) => Resource::NS(cur.read_name(false)?),
            Ok(Type::CNAME) => Resource::CNAME(cur.read_name(false)?),
            Ok(Type::PTR) => Resource::PTR(cur.read_name(false)?),

            Ok(Type::HINFO) => Resource::HINFO(HINFO {
                cpu: read_string(cur)?,
                os: read_string(cur)?,
            }),

            Ok(Type::MX) => Resource::MX(MX {
                preference: cur.read_u16_or(Error::BadResp)?,
                exchange: cur.read_name(false)?,
            }),

            Ok(Type::TXT) => {
                let mut strings = Vec::new();
                let mut used = 0;
                while used < rdlen {
                    let s = read_string(cur)?;
                    used += s.len() + 1;
                    strings.push(s);
                }
                Resource::TXT(TXT(strings))
            }

            Ok(Type::SOA) => Resource::SOA(SOA {
                mname: cur.read_name(false)?,
                rname: cur.read_name(false)?,
                serial: cur.read_u32_or(Error::BadResp)?,
                refresh: cur.read_u32_or(Error::BadResp)?,
                retry: cur.read_u32_or(Error::BadResp)?,
                expire: cur.read_u32_or(Error::BadResp)?,
                minimum: cur.read_u32_or(Error::BadResp)?,
            }),

            Ok(Type::SRV) => Resource::SRV(SRV {
                priority: cur.read_u16_or(Error::BadResp)?,
                weight: cur.read_u16_or(Error::BadResp)?,
                port: cur.read_u16_or(Error::BadResp)?,
                target: cur.read_name(false)?,
            }),

            Ok(Type::NAPTR) => Resource::NAPTR(NAPTR {
                order: cur.read_u16_or(Error::BadResp)?,
                preference: cur.read_u16_or(Error::BadResp)?,
                flags: read_string(cur)?,
                services: read_string(cur)?,
                regexp: read_string(cur)?,
                replacement: cur.read_name(false)?,
            }),

            Ok(Type::CAA) => {
                if rdlen < 2 {
                    return Err(Error::BadResp);
                }
                let flags = cur.read_u8_or(Error::BadResp)?;
                let tag = read_string(cur)?;
                if tag.is_empty() || !tag.iter().all(u8::is_ascii_alphanumeric) {
                    return Err(Error::BadResp);
                }
                let consumed = cur.position() as usize - start;
                let value = cur.take(rdlen.checked_sub(consumed).ok_or(Error::BadResp)?)?;
                Resource::CAA(CAA {
                    critical: flags & 0x80 != 0,
                    // Safe: the tag bytes were checked to be alphanumeric.
                    tag: String::from_utf8(tag).unwrap(),
                    value,
                })
            }

            Ok(Type::TLSA) => {
                if rdlen < 3 {
                    return Err(Error::BadResp);
                }
                Resource::TLSA(TLSA {
                    usage: cur.read_u8_or(Error::BadResp)?,
                    selector: cur.read_u8_or(Error::BadResp)?,
                    matching_type: cur.read_u8_or(Error::BadResp)?,
                    data: cur.take(rdlen - 3)?,
                })
            }

            // OPT is handled by the message parser, ANY and Reserved never
            // appear in answers; keep whatever the server sent.
            Ok(other) => Resource::Raw {
                rtype: other as u16,
                octets: cur.take(rdlen)?,
            },

            Err(raw) => Resource::Raw {
                rtype: raw,
                octets: cur.take(rdlen)?,
            },
        };

        // Every parser must land exactly on the RDATA boundary.
        if cur.position() as usize != start + rdlen {
            return Err(Error::BadResp);
        }

        Ok(resource)
    }

    /// Writes this record's RDATA. RDLENGTH fix-up is the caller's job.
    pub(crate) fn write(&self, w: &mut MessageWriter) -> Result<(), Error> {
        match self {
            Resource::A(ip) => w.write_octets(&ip.octets()),
            Resource::AAAA(ip) => w.write_octets(&ip.octets()),

            Resource::NS(name) => w.write_name(name, true)?,
            Resource::CNAME(name) => w.write_name(name, true)?,
            Resource::PTR(name) => w.write_name(name, true)?,

            Resource::HINFO(hinfo) => {
                write_string(w, &hinfo.cpu)?;
                write_string(w, &hinfo.os)?;
            }

            Resource::MX(mx) => {
                w.write_u16(mx.preference);
                w.write_name(&mx.exchange, true)?;
            }

            Resource::TXT(txt) => {
                for s in &txt.0 {
                    write_string(w, s)?;
                }
            }

            Resource::SOA(soa) => {
                w.write_name(&soa.mname, true)?;
                w.write_name(&soa.rname, true)?;
                w.write_u32(soa.serial);
                w.write_u32(soa.refresh);
                w.write_u32(soa.retry);
                w.write_u32(soa.expire);
                w.write_u32(soa.minimum);
            }

            Resource::SRV(srv) => {
                w.write_u16(srv.priority);
                w.write_u16(srv.weight);
                w.write_u16(srv.port);
                w.write_name(&srv.target, true)?;
            }

            // RFC 3403: the replacement field is never compressed.
            Resource::NAPTR(naptr) => {
                w.write_u16(naptr.order);
                w.write_u16(naptr.preference);
                write_string(w, &naptr.flags)?;
                write_string(w, &naptr.services)?;
                write_string(w, &naptr.regexp)?;
                w.write_name(&naptr.replacement, false)?;
            }

            Resource::CAA(caa) => {
                w.write_u8(if caa.critical { 0x80 } else { 0 });
                write_string(w, caa.tag.as_bytes())?;
                w.write_octets(&caa.value);
            }

            Resource::TLSA(tlsa) => {
                w.write_u8(tlsa.usage);
                w.write_u8(tlsa.selector);
                w.write_u8(tlsa.matching_type);
                w.write_octets(&tlsa.data);
            }

            Resource::Raw { octets, .. } => w.write_octets(octets),
        }

        Ok(())
    }
}

/// Reads one character-string: a length octet followed by that many bytes.
fn read_string(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let len = cur.read_u8_or(Error::BadResp)?;
    cur.take(len as usize)
}

fn write_string(w: &mut MessageWriter, s: &[u8]) -> Result<(), Error> {
    if s.len() > 255 {
        return Err(Error::BadQuery);
    }
    w.write_u8(s.len() as u8);
    w.write_octets(s);
    Ok(())
}

/// Host information. Rarely seen in the wild, kept for completeness.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HINFO {
    pub cpu: Vec<u8>,
    pub os: Vec<u8>,
}

/// Mail exchange.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MX {
    /// Preference given to this RR among others at the same owner. Lower
    /// values are preferred.
    pub preference: u16,

    /// A host willing to act as a mail exchange for the owner name.
    pub exchange: String,
}

/// Text strings. A single TXT record carries one or more
/// character-strings; their encoding is the owner's business, so they are
/// kept as bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TXT(pub Vec<Vec<u8>>);

/// Start of authority.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SOA {
    /// Name server that was the original or primary source of data for
    /// this zone.
    pub mname: String,

    /// Mailbox of the person responsible for this zone.
    pub rname: String,

    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Server selection, [rfc2782].
///
/// [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Naming authority pointer, [rfc3403].
///
/// [rfc3403]: https://datatracker.ietf.org/doc/html/rfc3403
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NAPTR {
    pub order: u16,
    pub preference: u16,
    pub flags: Vec<u8>,
    pub services: Vec<u8>,
    pub regexp: Vec<u8>,
    pub replacement: String,
}

/// Certification authority authorization, [rfc8659].
///
/// [rfc8659]: https://datatracker.ietf.org/doc/html/rfc8659
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CAA {
    /// Issuer-critical bit.
    pub critical: bool,
    pub tag: String,
    pub value: Vec<u8>,
}

/// TLSA certificate association, [rfc6698].
///
/// [rfc6698]: https://datatracker.ietf.org/doc/html/rfc6698
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TLSA {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub data: Vec<u8>,
}
