use crate::resource::Resource;
use std::net::SocketAddr;
use std::time::Duration;
use std::time::SystemTime;
use strum_macros::{Display, EnumString};

/// DNS Message that serves as the root of all queries and responses.
///
/// Outbound queries built by the channel always carry exactly one
/// [`Question`]; inbound messages may carry anything the server sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    /// 16-bit identifier assigned by the program that generates any kind of
    /// query. This identifier is copied into the corresponding reply and is
    /// used to match replies to outstanding queries.
    pub id: u16,

    /// Specifies whether this message is a query or a response.
    pub qr: QR,

    /// Specifies kind of query in this message.
    /// See <https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5>
    pub opcode: Opcode,

    /// Authoritative Answer - the responding name server is an authority
    /// for the domain name in the question section.
    pub aa: bool,

    /// Truncation - this message was truncated and should be retried over
    /// TCP.
    pub tc: bool,

    /// Recursion Desired - directs the name server to pursue the query
    /// recursively.
    pub rd: bool,

    /// Recursion Available - set in a response when the server supports
    /// recursive query.
    pub ra: bool,

    /// Z Reserved for future use. Must be zero.
    pub z: bool,

    /// Authentic Data. See [rfc4035] and [rfc6840].
    ///
    /// [rfc4035]: https://datatracker.ietf.org/doc/html/rfc4035
    /// [rfc6840]: https://datatracker.ietf.org/doc/html/rfc6840
    pub ad: bool,

    /// Checking Disabled. See [rfc4035] and [rfc6840].
    ///
    /// [rfc4035]: https://datatracker.ietf.org/doc/html/rfc4035
    /// [rfc6840]: https://datatracker.ietf.org/doc/html/rfc6840
    pub cd: bool,

    /// Response code.
    pub rcode: Rcode,

    /// The questions.
    pub questions: Vec<Question>,

    /// The answer records.
    pub answers: Vec<Record>,

    /// The authority records.
    pub authorities: Vec<Record>,

    /// The additional records, excluding any EDNS(0) OPT pseudo-record,
    /// which is hoisted into `extension`.
    pub additionals: Vec<Record>,

    /// Optional EDNS(0) extension.
    pub extension: Option<Extension>,

    /// Optional stats about this exchange, populated by the channel.
    pub stats: Option<Stats>,
}

impl Message {
    /// Constructs a query message for `name` with sensible defaults:
    /// recursion desired, no flags otherwise.
    pub fn query(name: &str, qtype: Type, qclass: Class) -> Message {
        Message {
            rd: true,
            questions: vec![Question {
                name: name.to_string(),
                qtype,
                qclass,
            }],
            ..Message::default()
        }
    }

    /// Adds a question to the message.
    pub fn add_question(&mut self, name: &str, qtype: Type, qclass: Class) {
        self.questions.push(Question {
            name: name.to_string(),
            qtype,
            qclass,
        });
    }

    /// Adds an EDNS(0) extension record, as defined by [rfc6891].
    ///
    /// [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
    pub fn add_extension(&mut self, ext: Extension) {
        self.extension = Some(ext);
    }
}

/// Question containing a domain name, question [`Type`] and [`Class`].
#[derive(Clone, Debug, PartialEq)]
pub struct Question {
    /// The domain name in question, in presentation form.
    pub name: String,

    /// The question's type. All types are valid, including pseudo types
    /// such as [`Type::ANY`].
    pub qtype: Type,

    /// The question's class.
    pub qclass: Class,
}

/// Resource Record (RR) containing one answer to a question.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// The owner name, in presentation form.
    pub name: String,

    /// The record's class.
    pub class: Class,

    /// The number of seconds the record may be cached. Zero means the RR
    /// may only be used for the transaction in progress.
    pub ttl: u32,

    /// The actual resource data.
    pub resource: Resource,
}

impl Record {
    pub fn rtype(&self) -> Type {
        self.resource.rtype()
    }
}

/// EDNS(0) extension record as defined in [rfc2671] and [rfc6891].
///
/// On the wire this is an OPT pseudo-RR whose CLASS field carries the
/// requestor's UDP payload size and whose TTL field packs
/// `ext_rcode << 24 | version << 16 | flags`.
///
/// [rfc2671]: https://datatracker.ietf.org/doc/html/rfc2671
/// [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
#[derive(Clone, Debug, PartialEq)]
pub struct Extension {
    /// Requestor's UDP payload size.
    pub payload_size: u16,

    /// Extended RCode (upper eight bits of the 12-bit extended rcode).
    pub extended_rcode: u8,

    /// Version of the extension. Only version 0 is specified.
    pub version: u8,

    /// DNSSEC OK bit as defined by [rfc3225].
    ///
    /// [rfc3225]: https://datatracker.ietf.org/doc/html/rfc3225
    pub dnssec_ok: bool,

    /// Remaining extension flag bits.
    pub flags: u16,

    /// EDNS options, as (option-code, option-data) pairs, passed through
    /// without interpretation.
    pub options: Vec<(u16, Vec<u8>)>,
}

impl Default for Extension {
    fn default() -> Self {
        Extension {
            // Per DNS Flag Day 2020.
            payload_size: 1232,
            extended_rcode: 0,
            version: 0,
            dnssec_ok: false,
            flags: 0,
            options: Vec::new(),
        }
    }
}

/// Stats related to a specific exchange, filled in by the channel. Does not
/// change query behaviour.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    /// The time the query was first sent to a server.
    pub start: SystemTime,

    /// Duration from first send to the accepted reply.
    pub duration: Duration,

    /// The server that answered.
    pub server: SocketAddr,

    /// The size of the request sent to the server.
    pub request_size: usize,

    /// The size of the response from the server.
    pub response_size: usize,
}

/// Query or Response bit.
#[derive(Copy, Clone, Debug, Default, EnumString, Display, Eq, PartialEq)]
pub enum QR {
    #[default]
    Query = 0,
    Response = 1,
}

impl QR {
    pub fn from_bool(b: bool) -> QR {
        match b {
            false => QR::Query,
            true => QR::Response,
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            QR::Query => false,
            QR::Response => true,
        }
    }
}

/// Specifies kind of query in this message. See [rfc1035], [rfc6895] and
/// [DNS Parameters].
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [rfc6895]: https://datatracker.ietf.org/doc/html/rfc6895
/// [DNS Parameters]: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5
#[derive(Copy, Clone, Debug, Default, Display, EnumString, FromPrimitive, Eq, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)] // Really only 4 bits
pub enum Opcode {
    /// Standard query.
    #[default]
    Query = 0,

    /// Inverse Query (OBSOLETE). See [rfc3425].
    ///
    /// [rfc3425]: https://datatracker.ietf.org/doc/html/rfc3425
    IQuery = 1,
    Status = 2,

    /// See [rfc1996]
    ///
    /// [rfc1996]: https://datatracker.ietf.org/doc/html/rfc1996
    Notify = 4,

    /// See [rfc2136]
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    Update = 5,
}

/// Response codes. See [rfc1035] and [DNS Parameters].
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [DNS Parameters]: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6
#[derive(Copy, Clone, Debug, Default, Display, EnumString, FromPrimitive, Eq, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)] // In headers it is 4 bits, extended by OPT to 12.
pub enum Rcode {
    /// No Error
    #[default]
    NoError = 0,

    /// Format Error
    FormErr = 1,

    /// Server Failure
    ServFail = 2,

    /// Non-Existent Domain
    NXDomain = 3,

    /// Not Implemented
    NotImp = 4,

    /// Query Refused
    Refused = 5,

    /// Name exists when it should not. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    YXDomain = 6,

    /// RR set exists when it should not. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    YXRRSet = 7,

    /// RR set that should exist does not. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    NXRRSet = 8,

    /// Not authoritative / not authorized. See [rfc2136] and [rfc2845].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    /// [rfc2845]: https://datatracker.ietf.org/doc/html/rfc2845
    NotAuth = 9,

    /// Name not contained in zone. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    NotZone = 10,
}

/// Resource Record Type, for example A, CNAME or SOA.
#[derive(Copy, Clone, Debug, Default, Display, EnumString, FromPrimitive, Eq, Hash, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)]
pub enum Type {
    Reserved = 0,

    /// (Default) IPv4 address.
    #[default]
    A = 1,
    NS = 2,
    CNAME = 5,
    SOA = 6,

    /// Domain name pointer. See [`crate::name::ptr_name`] to create a
    /// valid reverse name from an IP address.
    PTR = 12,

    /// Host information.
    HINFO = 13,

    /// Mail exchange.
    MX = 15,

    /// Text strings.
    TXT = 16,

    /// IPv6 address.
    AAAA = 28,

    /// Server selection. See [rfc2782].
    ///
    /// [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
    SRV = 33,

    /// Naming authority pointer. See [rfc3403].
    ///
    /// [rfc3403]: https://datatracker.ietf.org/doc/html/rfc3403
    NAPTR = 35,

    /// EDNS(0) OPT pseudo type. See [rfc6891].
    ///
    /// [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
    OPT = 41,

    /// TLSA certificate association. See [rfc6698].
    ///
    /// [rfc6698]: https://datatracker.ietf.org/doc/html/rfc6698
    TLSA = 52,

    /// Any record type. Only valid as a question type.
    ANY = 255,

    /// Certification authority authorization. See [rfc8659].
    ///
    /// [rfc8659]: https://datatracker.ietf.org/doc/html/rfc8659
    CAA = 257,
}

/// Resource Record Class, for example Internet.
#[derive(Copy, Clone, Debug, Default, Display, EnumString, FromPrimitive, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum Class {
    /// Reserved per [rfc6895].
    ///
    /// [rfc6895]: https://datatracker.ietf.org/doc/html/rfc6895
    Reserved = 0,

    /// (Default) The Internet (IN), see [rfc1035].
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    #[default]
    #[strum(serialize = "IN")]
    Internet = 1,

    /// CSNET (CS), obsolete.
    #[strum(serialize = "CS")]
    CsNet = 2,

    /// Chaosnet (CH), obsolete LAN protocol created at MIT in the
    /// mid-1970s.
    #[strum(serialize = "CH")]
    Chaos = 3,

    /// Hesiod (HS), an information service developed by MIT's Project
    /// Athena.
    #[strum(serialize = "HS")]
    Hesiod = 4,

    /// No class specified, see [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    None = 254,

    /// * (ANY) See [rfc1035].
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    #[strum(serialize = "*")]
    Any = 255,
}

/// Address family requested by a lookup.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Family {
    /// Query AAAA first, fall back to A when no AAAA data exists.
    #[default]
    Unspec,
    V4,
    V6,
}
