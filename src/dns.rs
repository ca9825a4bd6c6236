//! Encoding and decoding of whole DNS messages, as defined by [rfc1035].
//!
//! [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035

use crate::errors::Error;
use crate::io::{DnsReadExt, SeekExt};
use crate::name;
use crate::resource::Resource;
use crate::types::*;
use bytes::{BufMut, BytesMut};
use num_traits::FromPrimitive;
use std::collections::HashMap;
use std::io::Cursor;

/// Offsets above this cannot be expressed in a 14-bit compression pointer.
const MAX_POINTER: usize = 0x3FFF;

#[derive(Copy, Clone, PartialEq)]
enum RecordSection {
    Answers,
    Authorities,
    Additionals,
}

/// A helper to hold state while the parsing is happening.
pub(crate) struct MessageParser<'a> {
    cur: Cursor<&'a [u8]>,

    m: Message,
}

impl<'a> MessageParser<'a> {
    fn new(buf: &[u8]) -> MessageParser {
        MessageParser {
            cur: Cursor::new(buf),
            m: Message::default(),
        }
    }

    /// Consumes the [`MessageParser`] and returns the resulting Message.
    fn parse(mut self) -> Result<Message, Error> {
        if self.cur.get_ref().len() < 12 {
            return Err(Error::BadResp);
        }

        self.m.id = self.cur.read_u16_or(Error::BadResp)?;

        let b = self.cur.read_u8_or(Error::BadResp)?;
        self.m.qr = QR::from_bool(0b1000_0000 & b != 0);
        let opcode = (0b0111_1000 & b) >> 3;
        self.m.aa = (0b0000_0100 & b) != 0;
        self.m.tc = (0b0000_0010 & b) != 0;
        self.m.rd = (0b0000_0001 & b) != 0;

        self.m.opcode = FromPrimitive::from_u8(opcode).ok_or(Error::BadResp)?;

        let b = self.cur.read_u8_or(Error::BadResp)?;
        self.m.ra = (0b1000_0000 & b) != 0;
        self.m.z = (0b0100_0000 & b) != 0; // Unused
        self.m.ad = (0b0010_0000 & b) != 0;
        self.m.cd = (0b0001_0000 & b) != 0;
        let rcode = 0b0000_1111 & b;

        self.m.rcode = FromPrimitive::from_u16(rcode as u16).ok_or(Error::BadResp)?;

        let qd_count = self.cur.read_u16_or(Error::BadResp)?;
        let an_count = self.cur.read_u16_or(Error::BadResp)?;
        let ns_count = self.cur.read_u16_or(Error::BadResp)?;
        let ar_count = self.cur.read_u16_or(Error::BadResp)?;

        self.read_questions(qd_count)?;
        self.read_records(an_count, RecordSection::Answers)?;
        self.read_records(ns_count, RecordSection::Authorities)?;
        self.read_records(ar_count, RecordSection::Additionals)?;

        if self.cur.remaining() > 0 {
            return Err(Error::BadResp);
        }

        Ok(self.m)
    }

    fn read_questions(&mut self, count: u16) -> Result<(), Error> {
        for _ in 0..count {
            let name = self.cur.read_name(false)?;
            let qtype = match self.cur.read_type()? {
                Ok(t) => t,
                Err(_) => return Err(Error::BadResp),
            };
            let qclass = self.cur.read_class()?;

            self.m.questions.push(Question {
                name,
                qtype,
                qclass,
            });
        }

        Ok(())
    }

    fn read_records(&mut self, count: u16, section: RecordSection) -> Result<(), Error> {
        for _ in 0..count {
            let name = self.cur.read_name(false)?;
            let rtype = self.cur.read_type()?;

            if section == RecordSection::Additionals && rtype == Ok(Type::OPT) {
                // Only one OPT pseudo-record is allowed per message.
                if self.m.extension.is_some() {
                    return Err(Error::BadResp);
                }
                if name != "." {
                    return Err(Error::BadResp);
                }
                self.m.extension = Some(self.read_extension()?);
                continue;
            }

            let class = self.cur.read_class()?;
            let ttl = self.cur.read_u32_or(Error::BadResp)?;
            let rdlen = self.cur.read_u16_or(Error::BadResp)? as usize;
            let resource = Resource::parse(&mut self.cur, rtype, rdlen)?;

            let record = Record {
                name,
                class,
                ttl,
                resource,
            };

            match section {
                RecordSection::Answers => self.m.answers.push(record),
                RecordSection::Authorities => self.m.authorities.push(record),
                RecordSection::Additionals => self.m.additionals.push(record),
            }
        }

        Ok(())
    }

    /// Reads the body of an OPT pseudo-record. The CLASS field carries the
    /// requestor's UDP payload size, and the TTL field packs
    /// `ext_rcode << 24 | version << 16 | flags`.
    fn read_extension(&mut self) -> Result<Extension, Error> {
        let payload_size = self.cur.read_u16_or(Error::BadResp)?;
        let ttl = self.cur.read_u32_or(Error::BadResp)?;

        let extended_rcode = (ttl >> 24) as u8;
        let version = (ttl >> 16) as u8;
        let flags = ttl as u16;

        let rdlen = self.cur.read_u16_or(Error::BadResp)? as usize;
        let end = self.cur.position() as usize + rdlen;

        let mut options = Vec::new();
        while (self.cur.position() as usize) < end {
            let code = self.cur.read_u16_or(Error::BadResp)?;
            let len = self.cur.read_u16_or(Error::BadResp)? as usize;
            options.push((code, self.cur.take(len)?));
        }
        if self.cur.position() as usize != end {
            return Err(Error::BadResp);
        }

        Ok(Extension {
            payload_size,
            extended_rcode,
            version,
            dnssec_ok: flags & 0x8000 != 0,
            flags: flags & !0x8000,
            options,
        })
    }
}

impl Message {
    /// Decodes the supplied buffer and returns a [`Message`].
    pub fn from_slice(buf: &[u8]) -> Result<Message, Error> {
        MessageParser::new(buf).parse()
    }

    /// Encodes this DNS [`Message`] as a [`Vec<u8>`] ready to be sent.
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut w = MessageWriter::new();

        w.write_u16(self.id);

        let mut b = 0_u8;
        b |= if self.qr.to_bool() { 0b1000_0000 } else { 0 };
        b |= ((self.opcode as u8) << 3) & 0b0111_1000;
        b |= if self.aa { 0b0000_0100 } else { 0 };
        b |= if self.tc { 0b0000_0010 } else { 0 };
        b |= if self.rd { 0b0000_0001 } else { 0 };
        w.write_u8(b);

        let mut b = 0_u8;
        b |= if self.ra { 0b1000_0000 } else { 0 };
        b |= if self.z { 0b0100_0000 } else { 0 };
        b |= if self.ad { 0b0010_0000 } else { 0 };
        b |= if self.cd { 0b0001_0000 } else { 0 };
        b |= (self.rcode as u8) & 0b0000_1111;
        w.write_u8(b);

        let ar_count = self.additionals.len() + usize::from(self.extension.is_some());

        w.write_u16(u16::try_from(self.questions.len()).map_err(|_| Error::BadQuery)?);
        w.write_u16(u16::try_from(self.answers.len()).map_err(|_| Error::BadQuery)?);
        w.write_u16(u16::try_from(self.authorities.len()).map_err(|_| Error::BadQuery)?);
        w.write_u16(u16::try_from(ar_count).map_err(|_| Error::BadQuery)?);

        for question in &self.questions {
            w.write_name(&question.name, true)?;
            w.write_u16(question.qtype as u16);
            w.write_u16(question.qclass as u16);
        }

        for record in &self.answers {
            record.write(&mut w)?;
        }
        for record in &self.authorities {
            record.write(&mut w)?;
        }
        for record in &self.additionals {
            record.write(&mut w)?;
        }

        if let Some(e) = &self.extension {
            e.write(&mut w)?;
        }

        Ok(w.into_vec())
    }

    /// Checks an inbound reply against the query it should answer: same id,
    /// same question (name compared case-insensitively), and actually a
    /// response.
    pub(crate) fn is_reply_to(&self, query: &Message) -> bool {
        if self.qr != QR::Response || self.id != query.id {
            return false;
        }

        // Some servers echo zero questions on failure rcodes; accept that.
        if self.questions.is_empty() {
            return self.rcode != Rcode::NoError;
        }

        match (self.questions.first(), query.questions.first()) {
            (Some(a), Some(q)) => {
                a.qtype == q.qtype
                    && a.qclass == q.qclass
                    && a.name.eq_ignore_ascii_case(&q.name)
            }
            _ => false,
        }
    }
}

impl Record {
    fn write(&self, w: &mut MessageWriter) -> Result<(), Error> {
        w.write_name(&self.name, true)?;
        w.write_u16(self.resource.rtype_value());
        w.write_u16(self.class as u16);
        w.write_u32(self.ttl);

        // RDLENGTH is patched once the RDATA has been written.
        let rdlength_at = w.index();
        w.write_u16(0);
        self.resource.write(w)?;
        let rdlength = w.index() - rdlength_at - 2;
        w.patch_u16(rdlength_at, u16::try_from(rdlength).map_err(|_| Error::BadQuery)?);

        Ok(())
    }
}

impl Extension {
    fn write(&self, w: &mut MessageWriter) -> Result<(), Error> {
        w.write_u8(0); // root owner name
        w.write_u16(Type::OPT as u16);
        w.write_u16(self.payload_size);

        w.write_u8(self.extended_rcode);
        w.write_u8(self.version);
        w.write_u16(self.flags | if self.dnssec_ok { 0x8000 } else { 0 });

        let rdlength_at = w.index();
        w.write_u16(0);
        for (code, data) in &self.options {
            w.write_u16(*code);
            w.write_u16(u16::try_from(data.len()).map_err(|_| Error::BadQuery)?);
            w.write_octets(data);
        }
        let rdlength = w.index() - rdlength_at - 2;
        w.patch_u16(rdlength_at, rdlength as u16);

        Ok(())
    }
}

/// Accumulates an encoded message and the name-compression state.
///
/// Every name written is memoised by suffix; later names reuse a suffix
/// through a two-byte backward pointer when the writing context permits
/// compression. Offsets beyond the 14-bit pointer range are never memoised,
/// so an emitted pointer always targets an earlier offset.
pub(crate) struct MessageWriter {
    buf: BytesMut,

    // Lowercased wire-form suffix -> offset of its first occurrence.
    offsets: HashMap<Vec<u8>, usize>,
}

impl MessageWriter {
    pub fn new() -> MessageWriter {
        MessageWriter {
            buf: BytesMut::with_capacity(512),
            offsets: HashMap::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.buf.len()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.buf.put_slice(octets);
    }

    pub fn patch_u16(&mut self, at: usize, v: u16) {
        let [hi, lo] = v.to_be_bytes();
        self.buf[at] = hi;
        self.buf[at + 1] = lo;
    }

    /// Writes a presentation-form name as length-prefixed labels,
    /// compressing against previously written suffixes when `compress` is
    /// set.
    pub fn write_name(&mut self, name: &str, compress: bool) -> Result<(), Error> {
        let labels = name::to_labels(name)?;

        for i in 0..labels.len() {
            let key = suffix_key(&labels[i..]);

            if compress {
                if let Some(&off) = self.offsets.get(&key) {
                    self.write_u16(0xC000 | (off as u16 & 0x3FFF));
                    return Ok(());
                }
            }

            let off = self.buf.len();
            if off <= MAX_POINTER {
                self.offsets.entry(key).or_insert(off);
            }

            self.write_u8(labels[i].len() as u8);
            self.write_octets(&labels[i]);
        }

        self.write_u8(0);
        Ok(())
    }
}

/// Canonical (lowercased) wire form of a label suffix, used as the
/// compression-map key. Compression matching is case-insensitive.
fn suffix_key(labels: &[Vec<u8>]) -> Vec<u8> {
    let mut key = Vec::new();
    for label in labels {
        key.push(label.len() as u8);
        key.extend(label.iter().map(u8::to_ascii_lowercase));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_query() -> Message {
        let mut m = Message::query("www.example.com", Type::A, Class::Internet);
        m.id = 0x1234;
        m
    }

    #[test]
    fn encode_decode_query() {
        let q = sample_query();
        let wire = q.to_vec().unwrap();

        // 12 byte header + 17 byte name + type + class.
        assert_eq!(wire.len(), 12 + 17 + 4);

        let decoded = Message::from_slice(&wire).unwrap();
        assert_eq!(decoded.id, 0x1234);
        assert_eq!(decoded.questions, q.questions);
        assert!(decoded.rd);
    }

    #[test]
    fn answers_compress_against_question() {
        let mut m = sample_query();
        m.qr = QR::Response;
        m.answers.push(Record {
            name: "www.example.com".to_string(),
            class: Class::Internet,
            ttl: 300,
            resource: Resource::A("93.184.216.34".parse().unwrap()),
        });

        let wire = m.to_vec().unwrap();

        // The answer's owner name is a single pointer to offset 12.
        assert_eq!(&wire[33..35], &[0xC0, 0x0C]);

        let decoded = Message::from_slice(&wire).unwrap();
        assert_eq!(decoded.answers, m.answers);
    }

    #[test]
    fn compression_is_case_insensitive() {
        let mut m = Message::query("WWW.Example.COM", Type::A, Class::Internet);
        m.qr = QR::Response;
        m.answers.push(Record {
            name: "www.example.com".to_string(),
            class: Class::Internet,
            ttl: 1,
            resource: Resource::A("127.0.0.1".parse().unwrap()),
        });

        let wire = m.to_vec().unwrap();
        assert_eq!(&wire[33..35], &[0xC0, 0x0C]);
    }

    #[test]
    fn extension_round_trip() {
        let mut m = sample_query();
        m.add_extension(Extension {
            payload_size: 1232,
            dnssec_ok: true,
            options: vec![(10, vec![1, 2, 3, 4])],
            ..Extension::default()
        });

        let wire = m.to_vec().unwrap();
        let decoded = Message::from_slice(&wire).unwrap();
        assert_eq!(decoded.extension, m.extension);
    }

    #[test]
    fn record_types_round_trip() {
        use crate::resource::*;

        let resources = vec![
            Resource::A("1.2.3.4".parse().unwrap()),
            Resource::AAAA("2001:db8::1".parse().unwrap()),
            Resource::NS("ns1.example.com".to_string()),
            Resource::CNAME("alias.example.com".to_string()),
            Resource::PTR("host.example.com".to_string()),
            Resource::HINFO(HINFO {
                cpu: b"VAX".to_vec(),
                os: b"UNIX".to_vec(),
            }),
            Resource::MX(MX {
                preference: 10,
                exchange: "mail.example.com".to_string(),
            }),
            Resource::TXT(TXT(vec![b"v=spf1 -all".to_vec()])),
            Resource::SOA(SOA {
                mname: "ns1.example.com".to_string(),
                rname: "hostmaster.example.com".to_string(),
                serial: 2024010101,
                refresh: 7200,
                retry: 900,
                expire: 1209600,
                minimum: 300,
            }),
            Resource::SRV(SRV {
                priority: 5,
                weight: 10,
                port: 389,
                target: "ldap.example.com".to_string(),
            }),
            Resource::NAPTR(NAPTR {
                order: 100,
                preference: 50,
                flags: b"s".to_vec(),
                services: b"SIP+D2U".to_vec(),
                regexp: Vec::new(),
                replacement: "_sip._udp.example.com".to_string(),
            }),
            Resource::CAA(CAA {
                critical: false,
                tag: "issue".to_string(),
                value: b"ca.example.net".to_vec(),
            }),
            Resource::TLSA(TLSA {
                usage: 3,
                selector: 1,
                matching_type: 1,
                data: vec![0xde, 0xad, 0xbe, 0xef],
            }),
            Resource::Raw {
                rtype: 99,
                octets: vec![1, 2, 3],
            },
        ];

        let mut m = Message::query("example.com", Type::ANY, Class::Internet);
        m.qr = QR::Response;
        for resource in resources {
            m.answers.push(Record {
                name: "example.com".to_string(),
                class: Class::Internet,
                ttl: 60,
                resource,
            });
        }

        let wire = m.to_vec().unwrap();
        let decoded = Message::from_slice(&wire).unwrap();
        assert_eq!(decoded.answers, m.answers);
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut wire = sample_query().to_vec().unwrap();
        wire.push(0);
        assert_eq!(Message::from_slice(&wire), Err(Error::BadResp));
    }

    #[test]
    fn short_header_rejected() {
        assert_eq!(Message::from_slice(&[0; 11]), Err(Error::BadResp));
    }

    #[test]
    fn reply_matching() {
        let q = sample_query();

        let mut r = sample_query();
        r.qr = QR::Response;
        assert!(r.is_reply_to(&q));

        r.id = 0x4321;
        assert!(!r.is_reply_to(&q));
        r.id = q.id;

        r.questions[0].name = "WWW.EXAMPLE.COM".to_string();
        assert!(r.is_reply_to(&q));

        r.questions[0].qtype = Type::AAAA;
        assert!(!r.is_reply_to(&q));
    }
}
