use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::{DigitallySigned, KeyExchangeAlgorithm, NamedCurve, ProtocolVersion};

/// ECParameters curve_type for a named curve.
const CURVE_TYPE_NAMED: u8 = 3;

/// Ephemeral ECDH parameters: named curve plus uncompressed public point.
#[derive(Debug, PartialEq, Eq)]
pub struct EcdheParams<'a> {
    pub curve: NamedCurve,
    pub public_point: &'a [u8],
}

impl<'a> EcdheParams<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], EcdheParams<'a>> {
        let (input, curve_type) = be_u8(input)?;
        if curve_type != CURVE_TYPE_NAMED {
            return Err(Err::Failure(NomError::new(input, ErrorKind::Tag)));
        }
        let (input, curve) = NamedCurve::parse(input)?;
        let (input, point_len) = be_u8(input)?;
        if point_len == 0 {
            return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
        }
        let (input, public_point) = take(point_len)(input)?;

        Ok((
            input,
            EcdheParams {
                curve,
                public_point,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(CURVE_TYPE_NAMED);
        self.curve.serialize(output);
        output.push(self.public_point.len() as u8);
        output.extend_from_slice(self.public_point);
    }
}

/// ServerKeyExchange bodies for the implemented key exchange families.
///
/// Pure-PSK and ECDHE-PSK carry an identity hint; ECDHE-ECDSA signs its
/// parameters. RSA key transport sends no ServerKeyExchange at all.
#[derive(Debug, PartialEq, Eq)]
pub enum ServerKeyExchange<'a> {
    Psk {
        identity_hint: &'a [u8],
    },
    EcdhePsk {
        identity_hint: &'a [u8],
        params: EcdheParams<'a>,
    },
    EcdheEcdsa {
        params: EcdheParams<'a>,
        signed: DigitallySigned<'a>,
    },
}

impl<'a> ServerKeyExchange<'a> {
    pub fn parse(
        input: &'a [u8],
        kx: KeyExchangeAlgorithm,
        version: ProtocolVersion,
    ) -> IResult<&'a [u8], ServerKeyExchange<'a>> {
        match kx {
            KeyExchangeAlgorithm::Psk => {
                let (input, identity_hint) = parse_opaque16(input)?;
                Ok((input, ServerKeyExchange::Psk { identity_hint }))
            }
            KeyExchangeAlgorithm::EcdhePsk => {
                let (input, identity_hint) = parse_opaque16(input)?;
                let (input, params) = EcdheParams::parse(input)?;
                Ok((
                    input,
                    ServerKeyExchange::EcdhePsk {
                        identity_hint,
                        params,
                    },
                ))
            }
            KeyExchangeAlgorithm::EcdheEcdsa => {
                let (input, params) = EcdheParams::parse(input)?;
                let (input, signed) = DigitallySigned::parse(input, version)?;
                Ok((input, ServerKeyExchange::EcdheEcdsa { params, signed }))
            }
            KeyExchangeAlgorithm::Rsa => {
                // RSA key transport has no ServerKeyExchange.
                Err(Err::Failure(NomError::new(input, ErrorKind::Tag)))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            ServerKeyExchange::Psk { identity_hint } => {
                put_opaque16(identity_hint, output);
            }
            ServerKeyExchange::EcdhePsk {
                identity_hint,
                params,
            } => {
                put_opaque16(identity_hint, output);
                params.serialize(output);
            }
            ServerKeyExchange::EcdheEcdsa { params, signed } => {
                params.serialize(output);
                signed.serialize(output);
            }
        }
    }
}

fn parse_opaque16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len)(input)
}

fn put_opaque16(bytes: &[u8], output: &mut Vec<u8>) {
    output.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    output.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::super::SignatureAndHashAlgorithm;
    use super::*;

    const PSK_MESSAGE: &[u8] = &[
        0x00, 0x04, // identity hint length
        0x68, 0x69, 0x6E, 0x74, // "hint"
    ];

    const ECDHE_PSK_MESSAGE: &[u8] = &[
        0x00, 0x00, // empty identity hint
        0x03, // curve_type named_curve
        0x00, 0x17, // secp256r1
        0x03, // point length
        0x04, 0x01, 0x02, // point
    ];

    const ECDHE_ECDSA_MESSAGE: &[u8] = &[
        0x03, // curve_type named_curve
        0x00, 0x17, // secp256r1
        0x03, // point length
        0x04, 0x01, 0x02, // point
        0x04, 0x03, // SHA256 + ECDSA
        0x00, 0x02, // signature length
        0xAB, 0xCD, // signature
    ];

    #[test]
    fn psk_roundtrip() {
        let ske = ServerKeyExchange::Psk {
            identity_hint: b"hint",
        };

        let mut serialized = Vec::new();
        ske.serialize(&mut serialized);
        assert_eq!(serialized, PSK_MESSAGE);

        let (rest, parsed) = ServerKeyExchange::parse(
            &serialized,
            KeyExchangeAlgorithm::Psk,
            ProtocolVersion::DTLS1_2,
        )
        .unwrap();
        assert_eq!(parsed, ske);
        assert!(rest.is_empty());
    }

    #[test]
    fn ecdhe_psk_roundtrip() {
        let ske = ServerKeyExchange::EcdhePsk {
            identity_hint: &[],
            params: EcdheParams {
                curve: NamedCurve::Secp256r1,
                public_point: &[0x04, 0x01, 0x02],
            },
        };

        let mut serialized = Vec::new();
        ske.serialize(&mut serialized);
        assert_eq!(serialized, ECDHE_PSK_MESSAGE);

        let (rest, parsed) = ServerKeyExchange::parse(
            &serialized,
            KeyExchangeAlgorithm::EcdhePsk,
            ProtocolVersion::DTLS1_2,
        )
        .unwrap();
        assert_eq!(parsed, ske);
        assert!(rest.is_empty());
    }

    #[test]
    fn ecdhe_ecdsa_roundtrip() {
        let ske = ServerKeyExchange::EcdheEcdsa {
            params: EcdheParams {
                curve: NamedCurve::Secp256r1,
                public_point: &[0x04, 0x01, 0x02],
            },
            signed: DigitallySigned::new(
                Some(SignatureAndHashAlgorithm::SHA256_ECDSA),
                &[0xAB, 0xCD],
            ),
        };

        let mut serialized = Vec::new();
        ske.serialize(&mut serialized);
        assert_eq!(serialized, ECDHE_ECDSA_MESSAGE);

        let (rest, parsed) = ServerKeyExchange::parse(
            &serialized,
            KeyExchangeAlgorithm::EcdheEcdsa,
            ProtocolVersion::DTLS1_2,
        )
        .unwrap();
        assert_eq!(parsed, ske);
        assert!(rest.is_empty());
    }

    #[test]
    fn unknown_curve_type_rejected() {
        let mut message = ECDHE_ECDSA_MESSAGE.to_vec();
        message[0] = 0x01; // explicit_prime

        assert!(ServerKeyExchange::parse(
            &message,
            KeyExchangeAlgorithm::EcdheEcdsa,
            ProtocolVersion::DTLS1_2,
        )
        .is_err());
    }

    #[test]
    fn rsa_never_parses() {
        assert!(ServerKeyExchange::parse(
            PSK_MESSAGE,
            KeyExchangeAlgorithm::Rsa,
            ProtocolVersion::DTLS1_2,
        )
        .is_err());
    }
}
