use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};
use smallvec::SmallVec;

use super::{
    CipherSuite, CompressionMethod, Cookie, Extension, ExtensionType, ProtocolVersion, Random,
    SessionId,
};

#[derive(Debug, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    pub cipher_suites: SmallVec<[CipherSuite; 8]>,
    pub compression_methods: SmallVec<[CompressionMethod; 2]>,
    pub extensions: SmallVec<[Extension<'a>; 8]>,
}

impl<'a> ClientHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientHello<'a>> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        let (input, cipher_suites_len) = be_u16(input)?;
        let (input, mut suites_bytes) = take(cipher_suites_len)(input)?;
        if suites_bytes.is_empty() || suites_bytes.len() % 2 != 0 {
            return Err(Err::Failure(NomError::new(suites_bytes, ErrorKind::LengthValue)));
        }
        let mut cipher_suites = SmallVec::new();
        while !suites_bytes.is_empty() {
            let (rest, suite) = CipherSuite::parse(suites_bytes)?;
            cipher_suites.push(suite);
            suites_bytes = rest;
        }

        let (input, compression_len) = be_u8(input)?;
        let (input, compression_bytes) = take(compression_len)(input)?;
        if compression_bytes.is_empty() {
            return Err(Err::Failure(NomError::new(
                compression_bytes,
                ErrorKind::LengthValue,
            )));
        }
        let compression_methods = compression_bytes
            .iter()
            .map(|b| CompressionMethod::from_u8(*b))
            .collect();

        let (input, extensions) = Extension::parse_all(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cookie.serialize(output);

        output.extend_from_slice(&(self.cipher_suites.len() as u16 * 2).to_be_bytes());
        for suite in &self.cipher_suites {
            output.extend_from_slice(&suite.as_u16().to_be_bytes());
        }

        output.push(self.compression_methods.len() as u8);
        for method in &self.compression_methods {
            output.push(method.as_u8());
        }

        Extension::serialize_all(&self.extensions, output);
    }

    pub fn find_extension(&self, extension_type: ExtensionType) -> Option<&Extension<'a>> {
        self.extensions
            .iter()
            .find(|e| e.extension_type == extension_type)
    }

    pub fn offers_null_compression(&self) -> bool {
        self.compression_methods
            .iter()
            .any(|m| *m == CompressionMethod::Null)
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    const MESSAGE: &[u8] = &[
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        // Random
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E,
        0x1F, 0x20, //
        0x00, // SessionId length
        0x02, // Cookie length
        0xBB, 0xCC, // Cookie
        0x00, 0x04, // CipherSuites length
        0xC0, 0xA8, // PSK_AES128_CCM_8
        0x00, 0xAE, // PSK_AES128_CBC_SHA256
        0x01, // CompressionMethods length
        0x00, // CompressionMethod::Null
        0x00, 0x08, // extensions length
        0x00, 0x17, 0x00, 0x00, // extended_master_secret (empty)
        0x00, 0x23, 0x00, 0x00, // session_ticket (empty)
    ];

    fn sample<'a>() -> ClientHello<'a> {
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: Random::from_bytes(core::array::from_fn(|i| (i + 1) as u8)),
            session_id: SessionId::empty(),
            cookie: Cookie::try_new(&[0xBB, 0xCC]).unwrap(),
            cipher_suites: smallvec![
                CipherSuite::PSK_AES128_CCM_8,
                CipherSuite::PSK_AES128_CBC_SHA256,
            ],
            compression_methods: smallvec![CompressionMethod::Null],
            extensions: smallvec![
                Extension::new(ExtensionType::ExtendedMasterSecret, &[]),
                Extension::new(ExtensionType::SessionTicket, &[]),
            ],
        }
    }

    #[test]
    fn roundtrip() {
        let mut serialized = Vec::new();

        let client_hello = sample();

        client_hello.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE);

        let (rest, parsed) = ClientHello::parse(&serialized).unwrap();
        assert_eq!(parsed, client_hello);
        assert!(rest.is_empty());
    }

    #[test]
    fn finds_extension() {
        let hello = sample();
        assert!(hello
            .find_extension(ExtensionType::ExtendedMasterSecret)
            .is_some());
        assert!(hello.find_extension(ExtensionType::ServerName).is_none());
        assert!(hello.offers_null_compression());
    }

    #[test]
    fn empty_cipher_suites_rejected() {
        let mut message = MESSAGE.to_vec();
        // Zero the cipher suite list length and drop its body.
        message[38] = 0x00;
        message[39] = 0x00;
        message.drain(40..44);

        assert!(ClientHello::parse(&message).is_err());
    }

    #[test]
    fn cookie_too_long_rejected() {
        let mut message = MESSAGE.to_vec();
        message[35] = 0xFF; // cookie length beyond capacity

        assert!(ClientHello::parse(&message).is_err());
    }
}
