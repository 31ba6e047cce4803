use std::fmt;

use crate::message::{Alert, AlertDescription};

/// Errors produced by the DTLS engine and endpoints.
#[derive(Debug)]
pub enum Error {
    /// A blocking operation did not complete before its deadline.
    Timeout(&'static str),

    /// Incoming bytes ended before the declared length.
    ParseIncomplete,

    /// Incoming bytes did not parse as a record or handshake message.
    ParseError(nom::error::ErrorKind),

    /// A message arrived that the state machine cannot accept in its
    /// current state.
    UnexpectedMessage(String),

    /// Record decryption or MAC verification failed.
    BadRecordMac,

    /// Fragment reassembly overflow or an impossible length field.
    DecodeError(String),

    /// No mutually acceptable cipher suite, curve or signature algorithm,
    /// or a required credential is missing.
    HandshakeFailure(String),

    /// The peer requested a protocol version outside DTLS 1.0..=1.2.
    UnsupportedVersion(u16),

    /// Finished verify-data mismatch or a failed handshake signature.
    DecryptError,

    /// The peer ended the session with an alert.
    PeerAlert(Alert),

    /// A fault that should not occur with a correct peer and library.
    InternalError(String),
}

impl Error {
    /// The alert description sent to the peer for this error.
    pub(crate) fn alert_description(&self) -> AlertDescription {
        match self {
            Error::Timeout(_) => AlertDescription::CloseNotify,
            Error::ParseIncomplete | Error::ParseError(_) => AlertDescription::DecodeError,
            Error::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Error::BadRecordMac => AlertDescription::BadRecordMac,
            Error::DecodeError(_) => AlertDescription::DecodeError,
            Error::HandshakeFailure(_) => AlertDescription::HandshakeFailure,
            Error::UnsupportedVersion(_) => AlertDescription::ProtocolVersion,
            Error::DecryptError => AlertDescription::DecryptError,
            Error::PeerAlert(_) => AlertDescription::CloseNotify,
            Error::InternalError(_) => AlertDescription::InternalError,
        }
    }

    /// Parse faults are drop-the-datagram; everything else tears the
    /// session down.
    pub(crate) fn is_fatal(&self) -> bool {
        !matches!(self, Error::ParseIncomplete | Error::ParseError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout(what) => write!(f, "timeout: {}", what),
            Error::ParseIncomplete => write!(f, "truncated record or message"),
            Error::ParseError(kind) => write!(f, "parse error: {:?}", kind),
            Error::UnexpectedMessage(m) => write!(f, "unexpected message: {}", m),
            Error::BadRecordMac => write!(f, "bad record MAC"),
            Error::DecodeError(m) => write!(f, "decode error: {}", m),
            Error::HandshakeFailure(m) => write!(f, "handshake failure: {}", m),
            Error::UnsupportedVersion(v) => write!(f, "unsupported protocol version 0x{:04x}", v),
            Error::DecryptError => write!(f, "verify data mismatch"),
            Error::PeerAlert(alert) => write!(f, "peer alert: {:?}", alert),
            Error::InternalError(m) => write!(f, "internal error: {}", m),
        }
    }
}

impl std::error::Error for Error {}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(x) => Error::ParseError(x.code),
            nom::Err::Failure(x) => Error::ParseError(x.code),
        }
    }
}
