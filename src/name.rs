//! Tools for working with domain names in presentation form.
//!
//! Names are kept as dot-separated strings. Bytes that are not printable
//! ASCII are escaped as `\DDD` (three decimal digits), and characters with
//! a meaning in presentation form (`.` `;` `\` `(` `)` `@` `$` `"`) are
//! escaped as `\` followed by the character itself.

use crate::errors::Error;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Longest allowed label, in octets. [rfc1034]
///
/// [rfc1034]: https://datatracker.ietf.org/doc/html/rfc1034
pub const MAX_LABEL_LEN: usize = 63;

/// Longest allowed encoded name, in octets, including length bytes and the
/// root terminator.
pub const MAX_NAME_LEN: usize = 255;

/// Characters that must be escaped in presentation form.
const RESERVED: &[u8] = b".;\\()@$\"";

fn is_reserved(b: u8) -> bool {
    RESERVED.contains(&b)
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/// Appends one raw label to a presentation-form string, escaping as needed.
pub(crate) fn push_escaped(out: &mut String, label: &[u8]) {
    for &b in label {
        if !is_printable(b) {
            out.push('\\');
            out.push_str(&format!("{:03}", b));
        } else if is_reserved(b) {
            out.push('\\');
            out.push(b as char);
        } else {
            out.push(b as char);
        }
    }
}

/// Splits a presentation-form name into raw labels, reversing the escape
/// encoding.
///
/// The root name (`""` or `"."`) yields zero labels. A trailing dot is
/// accepted and ignored. Empty interior labels, oversize labels and
/// malformed escapes are rejected with [`Error::BadName`].
pub fn to_labels(name: &str) -> Result<Vec<Vec<u8>>, Error> {
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut bytes = name.bytes();

    if name == "." || name.is_empty() {
        return Ok(labels);
    }

    while let Some(b) = bytes.next() {
        match b {
            b'\\' => {
                let c = bytes.next().ok_or(Error::BadName)?;
                if c.is_ascii_digit() {
                    // \DDD - exactly three decimal digits.
                    let d2 = bytes.next().ok_or(Error::BadName)?;
                    let d3 = bytes.next().ok_or(Error::BadName)?;
                    if !d2.is_ascii_digit() || !d3.is_ascii_digit() {
                        return Err(Error::BadName);
                    }
                    let v = (c - b'0') as u32 * 100 + (d2 - b'0') as u32 * 10 + (d3 - b'0') as u32;
                    if v > 255 {
                        return Err(Error::BadName);
                    }
                    label.push(v as u8);
                } else {
                    label.push(c);
                }
            }
            b'.' => {
                if label.is_empty() {
                    return Err(Error::BadName);
                }
                labels.push(std::mem::take(&mut label));
            }
            _ => label.push(b),
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(Error::BadName);
        }
    }

    if !label.is_empty() {
        labels.push(label);
    }

    // Count the length bytes plus the root terminator.
    let encoded: usize = labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
    if encoded > MAX_NAME_LEN {
        return Err(Error::BadName);
    }

    Ok(labels)
}

/// Number of labels in a presentation-form name, counting dots that are not
/// preceded by a backslash.
pub fn label_count(name: &str) -> usize {
    if name.is_empty() || name == "." {
        return 0;
    }

    let bytes = name.as_bytes();
    let mut dots = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1, // skip the escaped byte
            b'.' => dots += 1,
            _ => {}
        }
        i += 1;
    }

    if name.ends_with('.') && !name.ends_with("\\.") {
        dots
    } else {
        dots + 1
    }
}

/// Concatenates `name` and a search `domain` with a separating dot.
///
/// Appending the root domain yields `name.` rather than the ill-formed
/// `name..`.
pub fn cat_domain(name: &str, domain: &str) -> String {
    if domain == "." {
        format!("{}.", name)
    } else {
        format!("{}.{}", name, domain)
    }
}

/// True when a name's terminal label is `onion` (RFC 7686). Such names must
/// never be sent to the DNS.
pub fn is_onion(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    match name.rsplit('.').next() {
        Some(label) => label.eq_ignore_ascii_case("onion"),
        None => false,
    }
}

/// True when every byte of the name is in the hostname alphabet
/// `[A-Za-z0-9._/*-]`.
pub fn is_hostname(name: &str) -> bool {
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'/' | b'*' | b'-'))
}

/// Synthesizes the reverse-lookup name for an address:
/// `d.c.b.a.in-addr.arpa` for IPv4, the nibble-reversed `ip6.arpa` form
/// for IPv6.
pub fn ptr_name(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => ptr_name_v4(v4),
        IpAddr::V6(v6) => ptr_name_v6(v6),
    }
}

fn ptr_name_v4(addr: Ipv4Addr) -> String {
    let o = addr.octets();
    format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
}

fn ptr_name_v6(addr: Ipv6Addr) -> String {
    let mut name = String::with_capacity(72);
    for b in addr.octets().iter().rev() {
        name.push_str(&format!("{:x}.{:x}.", b & 0xf, b >> 4));
    }
    name.push_str("ip6.arpa");
    name
}
