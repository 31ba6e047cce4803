use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};
use smallvec::SmallVec;

use super::{NamedCurve, SignatureAndHashAlgorithm};

/// Uncompressed EC point format value.
pub const POINT_FORMAT_UNCOMPRESSED: u8 = 0;

/// A hello extension: type plus opaque payload.
#[derive(Debug, PartialEq, Eq)]
pub struct Extension<'a> {
    pub extension_type: ExtensionType,
    pub extension_data: &'a [u8],
}

impl<'a> Extension<'a> {
    pub fn new(extension_type: ExtensionType, extension_data: &'a [u8]) -> Self {
        Extension {
            extension_type,
            extension_data,
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Extension<'a>> {
        let (input, extension_type) = ExtensionType::parse(input)?;
        let (input, extension_length) = be_u16(input)?;
        let (input, extension_data) = take(extension_length)(input)?;

        Ok((
            input,
            Extension {
                extension_type,
                extension_data,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.extension_type.as_u16().to_be_bytes());
        output.extend_from_slice(&(self.extension_data.len() as u16).to_be_bytes());
        output.extend_from_slice(self.extension_data);
    }

    /// Parse the `u16`-prefixed extension block at the tail of a hello.
    /// An absent block is valid and yields no extensions.
    pub fn parse_all(
        input: &'a [u8],
    ) -> IResult<&'a [u8], SmallVec<[Extension<'a>; 8]>> {
        let mut extensions = SmallVec::new();

        if input.is_empty() {
            return Ok((input, extensions));
        }

        let (input, block_len) = be_u16(input)?;
        let (rest, mut block) = take(block_len)(input)?;

        while !block.is_empty() {
            let (remaining, extension) = Extension::parse(block)?;
            extensions.push(extension);
            block = remaining;
        }

        Ok((rest, extensions))
    }

    /// Serialize a `u16`-prefixed extension block. Nothing is written for an
    /// empty list.
    pub fn serialize_all(extensions: &[Extension<'_>], output: &mut Vec<u8>) {
        if extensions.is_empty() {
            return;
        }

        let block_len: usize = extensions
            .iter()
            .map(|e| 4 + e.extension_data.len())
            .sum();
        output.extend_from_slice(&(block_len as u16).to_be_bytes());

        for extension in extensions {
            extension.serialize(output);
        }
    }
}

/// The extension types the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    ClientCertificateType,
    ServerCertificateType,
    EncryptThenMac,
    ExtendedMasterSecret,
    SessionTicket,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => ExtensionType::ServerName,
            0x000A => ExtensionType::SupportedGroups,
            0x000B => ExtensionType::EcPointFormats,
            0x000D => ExtensionType::SignatureAlgorithms,
            0x0013 => ExtensionType::ClientCertificateType,
            0x0014 => ExtensionType::ServerCertificateType,
            0x0016 => ExtensionType::EncryptThenMac,
            0x0017 => ExtensionType::ExtendedMasterSecret,
            0x0023 => ExtensionType::SessionTicket,
            0xFF01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0x0000,
            ExtensionType::SupportedGroups => 0x000A,
            ExtensionType::EcPointFormats => 0x000B,
            ExtensionType::SignatureAlgorithms => 0x000D,
            ExtensionType::ClientCertificateType => 0x0013,
            ExtensionType::ServerCertificateType => 0x0014,
            ExtensionType::EncryptThenMac => 0x0016,
            ExtensionType::ExtendedMasterSecret => 0x0017,
            ExtensionType::SessionTicket => 0x0023,
            ExtensionType::RenegotiationInfo => 0xFF01,
            ExtensionType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ExtensionType> {
        let (input, value) = be_u16(input)?;
        Ok((input, ExtensionType::from_u16(value)))
    }
}

/// elliptic_curves payload: u16 list length plus u16 curve ids.
pub fn encode_supported_groups(curves: &[NamedCurve], output: &mut Vec<u8>) {
    output.extend_from_slice(&(curves.len() as u16 * 2).to_be_bytes());
    for curve in curves {
        curve.serialize(output);
    }
}

pub fn parse_supported_groups(data: &[u8]) -> IResult<&[u8], SmallVec<[NamedCurve; 8]>> {
    let (data, list_len) = be_u16(data)?;
    let (rest, mut list) = take(list_len)(data)?;

    if list.len() % 2 != 0 {
        return Err(Err::Failure(NomError::new(list, ErrorKind::LengthValue)));
    }

    let mut curves = SmallVec::new();
    while !list.is_empty() {
        let (remaining, curve) = NamedCurve::parse(list)?;
        curves.push(curve);
        list = remaining;
    }

    Ok((rest, curves))
}

/// ec_point_formats payload: u8 list length plus format bytes.
pub fn encode_point_formats(formats: &[u8], output: &mut Vec<u8>) {
    output.push(formats.len() as u8);
    output.extend_from_slice(formats);
}

pub fn parse_point_formats(data: &[u8]) -> IResult<&[u8], SmallVec<[u8; 4]>> {
    let (data, list_len) = be_u8(data)?;
    let (rest, list) = take(list_len)(data)?;
    Ok((rest, SmallVec::from_slice(list)))
}

/// signature_algorithms payload: u16 list length plus (hash, sig) pairs.
pub fn encode_signature_algorithms(
    algorithms: &[SignatureAndHashAlgorithm],
    output: &mut Vec<u8>,
) {
    output.extend_from_slice(&(algorithms.len() as u16 * 2).to_be_bytes());
    for algorithm in algorithms {
        algorithm.serialize(output);
    }
}

pub fn parse_signature_algorithms(
    data: &[u8],
) -> IResult<&[u8], SmallVec<[SignatureAndHashAlgorithm; 8]>> {
    let (data, list_len) = be_u16(data)?;
    let (rest, mut list) = take(list_len)(data)?;

    if list.len() % 2 != 0 {
        return Err(Err::Failure(NomError::new(list, ErrorKind::LengthValue)));
    }

    let mut algorithms = SmallVec::new();
    while !list.is_empty() {
        let (remaining, algorithm) = SignatureAndHashAlgorithm::parse(list)?;
        algorithms.push(algorithm);
        list = remaining;
    }

    Ok((rest, algorithms))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x0A, // ExtensionType::SupportedGroups
        0x00, 0x08, // extension length
        0x00, 0x06, 0x00, 0x17, 0x00, 0x18, 0x00, 0x1D, // extension data
    ];

    #[test]
    fn roundtrip() {
        let extension = Extension::new(ExtensionType::SupportedGroups, &MESSAGE[4..]);

        let mut serialized = Vec::new();
        extension.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE);

        let (rest, parsed) = Extension::parse(&serialized).unwrap();
        assert_eq!(parsed, extension);
        assert!(rest.is_empty());
    }

    #[test]
    fn supported_groups_payload() {
        let (rest, curves) = parse_supported_groups(&MESSAGE[4..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            &curves[..],
            &[
                NamedCurve::Secp256r1,
                NamedCurve::Secp384r1,
                NamedCurve::X25519
            ]
        );

        let mut encoded = Vec::new();
        encode_supported_groups(&curves, &mut encoded);
        assert_eq!(encoded, &MESSAGE[4..]);
    }

    #[test]
    fn point_formats_payload() {
        let mut encoded = Vec::new();
        encode_point_formats(&[POINT_FORMAT_UNCOMPRESSED], &mut encoded);
        assert_eq!(encoded, &[0x01, 0x00]);

        let (rest, formats) = parse_point_formats(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&formats[..], &[POINT_FORMAT_UNCOMPRESSED]);
    }

    #[test]
    fn signature_algorithms_payload() {
        let mut encoded = Vec::new();
        encode_signature_algorithms(SignatureAndHashAlgorithm::advertised(), &mut encoded);
        assert_eq!(encoded, &[0x00, 0x06, 0x04, 0x03, 0x04, 0x01, 0x02, 0x01]);

        let (rest, algorithms) = parse_signature_algorithms(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&algorithms[..], SignatureAndHashAlgorithm::advertised());
    }

    #[test]
    fn extension_block_roundtrip() {
        let a = Extension::new(ExtensionType::ExtendedMasterSecret, &[]);
        let b = Extension::new(ExtensionType::SessionTicket, &[]);

        let mut serialized = Vec::new();
        Extension::serialize_all(&[a, b], &mut serialized);

        let (rest, parsed) = Extension::parse_all(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].extension_type, ExtensionType::ExtendedMasterSecret);
        assert_eq!(parsed[1].extension_type, ExtensionType::SessionTicket);
    }

    #[test]
    fn empty_extension_block_absent() {
        let mut serialized = Vec::new();
        Extension::serialize_all(&[], &mut serialized);
        assert!(serialized.is_empty());

        let (_, parsed) = Extension::parse_all(&serialized).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn truncated_extension_rejected() {
        // Declares 8 bytes of data but provides 4.
        let wire = [0x00, 0x0A, 0x00, 0x08, 0x00, 0x06, 0x00, 0x17];
        assert!(Extension::parse(&wire).is_err());
    }
}
