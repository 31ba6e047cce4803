use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use super::{ProtocolVersion, SignatureAndHashAlgorithm};

/// A handshake signature. DTLS 1.2 prefixes the signature with the
/// SignatureAndHashAlgorithm pair; DTLS 1.0 carries the bare signature.
#[derive(Debug, PartialEq, Eq)]
pub struct DigitallySigned<'a> {
    pub algorithm: Option<SignatureAndHashAlgorithm>,
    pub signature: &'a [u8],
}

impl<'a> DigitallySigned<'a> {
    pub fn new(algorithm: Option<SignatureAndHashAlgorithm>, signature: &'a [u8]) -> Self {
        DigitallySigned {
            algorithm,
            signature,
        }
    }

    pub fn parse(
        input: &'a [u8],
        version: ProtocolVersion,
    ) -> IResult<&'a [u8], DigitallySigned<'a>> {
        let (input, algorithm) = if version == ProtocolVersion::DTLS1_2 {
            let (input, algorithm) = SignatureAndHashAlgorithm::parse(input)?;
            (input, Some(algorithm))
        } else {
            (input, None)
        };

        let (input, signature_len) = be_u16(input)?;
        let (input, signature) = take(signature_len)(input)?;

        Ok((
            input,
            DigitallySigned {
                algorithm,
                signature,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        if let Some(algorithm) = &self.algorithm {
            algorithm.serialize(output);
        }
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(self.signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE_12: &[u8] = &[
        0x04, 0x03, // SHA256 + ECDSA
        0x00, 0x04, // signature length
        0x01, 0x02, 0x03, 0x04, // signature
    ];

    #[test]
    fn roundtrip_dtls12() {
        let signed = DigitallySigned::new(
            Some(SignatureAndHashAlgorithm::SHA256_ECDSA),
            &[0x01, 0x02, 0x03, 0x04],
        );

        let mut serialized = Vec::new();
        signed.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE_12);

        let (rest, parsed) =
            DigitallySigned::parse(&serialized, ProtocolVersion::DTLS1_2).unwrap();
        assert_eq!(parsed, signed);
        assert!(rest.is_empty());
    }

    #[test]
    fn roundtrip_dtls10_has_no_algorithm() {
        let signed = DigitallySigned::new(None, &[0x05, 0x06]);

        let mut serialized = Vec::new();
        signed.serialize(&mut serialized);
        assert_eq!(serialized, &[0x00, 0x02, 0x05, 0x06]);

        let (rest, parsed) =
            DigitallySigned::parse(&serialized, ProtocolVersion::DTLS1_0).unwrap();
        assert_eq!(parsed, signed);
        assert!(rest.is_empty());
    }
}
