//! Wire codecs for DTLS records, handshake messages and extensions.
//!
//! Every type follows the same shape: `parse` built on nom combinators and
//! `serialize` appending network-byte-order fields to a `Vec<u8>`.

mod alert;
mod certificate;
mod certificate_request;
mod certificate_verify;
mod cipher_suite;
mod client_hello;
mod client_key_exchange;
mod digitally_signed;
mod extension;
mod finished;
mod handshake;
mod hello_verify_request;
mod id;
mod named_curve;
mod new_session_ticket;
mod random;
mod record;
mod server_hello;
mod server_key_exchange;
mod sig_alg;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use certificate::Certificate;
pub use certificate_request::{CertificateRequest, ClientCertificateType};
pub use certificate_verify::CertificateVerify;
pub use cipher_suite::{CipherSuite, KeyExchangeAlgorithm};
pub use client_hello::ClientHello;
pub use client_key_exchange::ClientKeyExchange;
pub use digitally_signed::DigitallySigned;
pub use extension::{
    encode_point_formats, encode_signature_algorithms, encode_supported_groups,
    parse_point_formats, parse_signature_algorithms, parse_supported_groups, Extension,
    ExtensionType, POINT_FORMAT_UNCOMPRESSED,
};
pub use finished::{Finished, VERIFY_DATA_LEN};
pub use handshake::{Handshake, HandshakeHeader, MessageType};
pub use hello_verify_request::HelloVerifyRequest;
pub use id::{Cookie, SessionId};
pub use named_curve::NamedCurve;
pub use new_session_ticket::NewSessionTicket;
pub use random::Random;
pub use record::{ContentType, DtlsRecord, RecordSlice, Sequence};
pub use server_hello::ServerHello;
pub use server_key_exchange::{EcdheParams, ServerKeyExchange};
pub use sig_alg::{HashAlgorithm, SignatureAlgorithm, SignatureAndHashAlgorithm};

use nom::number::complete::be_u16;
use nom::IResult;

/// DTLS protocol version as carried on the wire.
///
/// DTLS inverts TLS version numbering: 1.0 is `{254, 255}` and 1.2 is
/// `{254, 253}`, so a *smaller* wire value is a *newer* version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::DTLS1_2
    }
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, value) = be_u16(input)?;
        Ok((input, Self::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    /// Position on the version ladder; `None` for versions we do not speak.
    fn rank(&self) -> Option<u8> {
        match self {
            ProtocolVersion::DTLS1_0 => Some(0),
            ProtocolVersion::DTLS1_2 => Some(1),
            ProtocolVersion::Unknown(_) => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.rank().is_some()
    }

    /// The older of two supported versions (`min(a, b)` in protocol terms).
    pub fn older_of(a: ProtocolVersion, b: ProtocolVersion) -> ProtocolVersion {
        match (a.rank(), b.rank()) {
            (Some(ra), Some(rb)) if ra <= rb => a,
            (Some(_), Some(_)) => b,
            _ => a,
        }
    }
}

/// TLS compression method. Only `Null` is ever negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Null,
    Unknown(u8),
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => CompressionMethod::Null,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CompressionMethod::Null => 0x00,
            CompressionMethod::Unknown(value) => *value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_roundtrip() {
        for v in [0xFEFFu16, 0xFEFD, 0xFEFC] {
            assert_eq!(ProtocolVersion::from_u16(v).as_u16(), v);
        }
    }

    #[test]
    fn version_ordering() {
        use ProtocolVersion::*;
        assert_eq!(older_of_pair(DTLS1_0, DTLS1_2), DTLS1_0);
        assert_eq!(older_of_pair(DTLS1_2, DTLS1_2), DTLS1_2);
        assert_eq!(older_of_pair(DTLS1_2, DTLS1_0), DTLS1_0);
    }

    fn older_of_pair(a: ProtocolVersion, b: ProtocolVersion) -> ProtocolVersion {
        ProtocolVersion::older_of(a, b)
    }
}
