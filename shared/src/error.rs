use std::io;
use std::net;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //STUN errors
    #[error("packet is not a STUN message")]
    ErrNotStunMessage,
    #[error("STUN message too short")]
    ErrMessageTooShort,
    #[error("STUN attribute length exceeds message")]
    ErrAttributeSizeInvalid,
    #[error("STUN attribute not found")]
    ErrAttributeNotFound,
    #[error("bad magic cookie")]
    ErrBadMagicCookie,
    #[error("unsupported address family")]
    ErrUnsupportedAddressFamily,
    #[error("FINGERPRINT mismatch")]
    ErrFingerprintMismatch,
    #[error("MESSAGE-INTEGRITY mismatch")]
    ErrIntegrityMismatch,
    #[error("malformed ERROR-CODE attribute")]
    ErrMalformedErrorCode,
    #[error("attribute text too long")]
    ErrTextTooLong,
    #[error("transaction already exists")]
    ErrTransactionExists,
    #[error("binding transaction already started")]
    ErrBindingStarted,

    //TURN errors
    #[error("no allocation on this client")]
    ErrNoAllocation,
    #[error("allocation already exists")]
    ErrAllocationExists,
    #[error("channel number out of range")]
    ErrChannelNumberOutOfRange,
    #[error("channel numbers exhausted")]
    ErrChannelNumbersExhausted,
    #[error("invalid ChannelData length")]
    ErrInvalidChannelDataLength,

    //ICE errors
    #[error("invalid component id")]
    ErrInvalidComponentId,
    #[error("transport is not started")]
    ErrTransportNotStarted,
    #[error("no such candidate")]
    ErrCandidateNotFound,
    #[error("no host candidate for base address")]
    ErrNoHostCandidateForBase,
    #[error("invalid datagram path")]
    ErrInvalidPath,
    #[error("relay path is not active")]
    ErrRelayNotActive,

    //Wrapped errors
    #[error("parse ip: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Io(#[source] IoError),

    //Other errors
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
