use nom::number::complete::be_u8;
use nom::IResult;
use smallvec::SmallVec;

use super::{
    CipherSuite, CompressionMethod, Extension, ExtensionType, ProtocolVersion, Random, SessionId,
};

#[derive(Debug, PartialEq, Eq)]
pub struct ServerHello<'a> {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: CompressionMethod,
    pub extensions: SmallVec<[Extension<'a>; 8]>,
}

impl<'a> ServerHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ServerHello<'a>> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression) = be_u8(input)?;
        let (input, extensions) = Extension::parse_all(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method: CompressionMethod::from_u8(compression),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        output.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        output.push(self.compression_method.as_u8());
        Extension::serialize_all(&self.extensions, output);
    }

    pub fn has_extension(&self, extension_type: ExtensionType) -> bool {
        self.extensions
            .iter()
            .any(|e| e.extension_type == extension_type)
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    const MESSAGE: &[u8] = &[
        0xFE, 0xFF, // ProtocolVersion::DTLS1_0
        // Random
        0x20, 0x1F, 0x1E, 0x1D, 0x1C, 0x1B, 0x1A, 0x19, 0x18, 0x17, 0x16, 0x15, 0x14, 0x13, 0x12,
        0x11, 0x10, 0x0F, 0x0E, 0x0D, 0x0C, 0x0B, 0x0A, 0x09, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03,
        0x02, 0x01, //
        0x00, // SessionId length
        0x00, 0x35, // RSA_AES256_CBC_SHA
        0x00, // CompressionMethod::Null
        0x00, 0x04, // extensions length
        0x00, 0x17, 0x00, 0x00, // extended_master_secret (empty)
    ];

    #[test]
    fn roundtrip() {
        let mut serialized = Vec::new();

        let server_hello = ServerHello {
            server_version: ProtocolVersion::DTLS1_0,
            random: Random::from_bytes(core::array::from_fn(|i| (32 - i) as u8)),
            session_id: SessionId::empty(),
            cipher_suite: CipherSuite::RSA_AES256_CBC_SHA,
            compression_method: CompressionMethod::Null,
            extensions: smallvec![Extension::new(ExtensionType::ExtendedMasterSecret, &[])],
        };

        server_hello.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE);

        let (rest, parsed) = ServerHello::parse(&serialized).unwrap();
        assert_eq!(parsed, server_hello);
        assert!(rest.is_empty());

        assert!(parsed.has_extension(ExtensionType::ExtendedMasterSecret));
        assert!(!parsed.has_extension(ExtensionType::SessionTicket));
    }

    #[test]
    fn no_extensions_block() {
        let bare = &MESSAGE[..MESSAGE.len() - 6];
        let (rest, parsed) = ServerHello::parse(bare).unwrap();
        assert!(rest.is_empty());
        assert!(parsed.extensions.is_empty());
    }
}
