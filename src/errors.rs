use crate::types::Rcode;
use thiserror::Error;

/// Status of a completed query or lookup.
///
/// Every query either completes with exactly one callback invocation
/// carrying one of these, or succeeds. No partial results are reported.
#[derive(Error, Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The query succeeded but the reply held no records of the requested
    /// type.
    #[error("no records of the requested type")]
    NoData,

    /// The server reported our query as malformed (FORMERR).
    #[error("server reported a malformed query")]
    FormErr,

    /// The server returned SERVFAIL.
    #[error("server failure")]
    ServFail,

    /// NXDOMAIN: the queried name does not exist.
    #[error("name not found")]
    NotFound,

    /// The query type is not implemented, by this library or by the server.
    #[error("query type not implemented")]
    NotImp,

    /// The server refused the query.
    #[error("query refused")]
    Refused,

    /// The caller-supplied query is malformed.
    #[error("malformed query")]
    BadQuery,

    /// A name failed validation: compression, length or charset.
    #[error("invalid name")]
    BadName,

    /// The address family is not supported.
    #[error("unsupported address family")]
    BadFamily,

    /// The server reply is malformed.
    #[error("malformed reply")]
    BadResp,

    /// No configured server could be reached.
    #[error("could not contact any DNS server")]
    ConnRefused,

    /// The query exceeded its attempt budget without a reply.
    #[error("query timed out")]
    Timeout,

    /// End of file while reading the hosts file or similar.
    #[error("end of file")]
    Eof,

    /// Error reading a configuration file.
    #[error("error reading configuration file")]
    FileIo,

    /// Allocation failure. Kept for parity with the status taxonomy of the
    /// wire protocol's C heritage; never produced by this crate.
    #[error("out of memory")]
    NoMem,

    /// The channel was destroyed while the query was in flight.
    #[error("channel destroyed")]
    Destruction,

    /// A malformed string input.
    #[error("malformed string")]
    BadStr,

    /// Unknown service name.
    #[error("unknown service")]
    Service,

    /// The query carries no name.
    #[error("no name in query")]
    NoName,

    /// The query was cancelled by the caller.
    #[error("query cancelled")]
    Cancelled,
}

impl Error {
    /// Maps a reply's rcode and answer count onto a status.
    ///
    /// `NoError` with zero answers is `NoData`, the one status that is not
    /// an error from the server's point of view but is from the caller's.
    pub(crate) fn from_reply(rcode: Rcode, answers: usize) -> Result<(), Error> {
        match rcode {
            Rcode::NoError => {
                if answers == 0 {
                    Err(Error::NoData)
                } else {
                    Ok(())
                }
            }
            Rcode::FormErr => Err(Error::FormErr),
            Rcode::ServFail => Err(Error::ServFail),
            Rcode::NXDomain => Err(Error::NotFound),
            Rcode::NotImp => Err(Error::NotImp),
            Rcode::Refused => Err(Error::Refused),
            _ => Err(Error::BadResp),
        }
    }

    /// True for statuses that end a query authoritatively: retrying another
    /// server cannot change the outcome.
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, Error::NoData | Error::NotFound)
    }
}
