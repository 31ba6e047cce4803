use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::KeyExchangeAlgorithm;

/// ClientKeyExchange bodies for the implemented key exchange families.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientKeyExchange<'a> {
    Psk {
        identity: &'a [u8],
    },
    Ecdhe {
        public_point: &'a [u8],
    },
    EcdhePsk {
        identity: &'a [u8],
        public_point: &'a [u8],
    },
    Rsa {
        encrypted_pre_master: &'a [u8],
    },
}

impl<'a> ClientKeyExchange<'a> {
    pub fn parse(
        input: &'a [u8],
        kx: KeyExchangeAlgorithm,
    ) -> IResult<&'a [u8], ClientKeyExchange<'a>> {
        match kx {
            KeyExchangeAlgorithm::Psk => {
                let (input, identity) = parse_opaque16(input)?;
                Ok((input, ClientKeyExchange::Psk { identity }))
            }
            KeyExchangeAlgorithm::EcdhePsk => {
                let (input, identity) = parse_opaque16(input)?;
                let (input, public_point) = parse_point(input)?;
                Ok((
                    input,
                    ClientKeyExchange::EcdhePsk {
                        identity,
                        public_point,
                    },
                ))
            }
            KeyExchangeAlgorithm::EcdheEcdsa => {
                let (input, public_point) = parse_point(input)?;
                Ok((input, ClientKeyExchange::Ecdhe { public_point }))
            }
            KeyExchangeAlgorithm::Rsa => {
                let (input, encrypted_pre_master) = parse_opaque16(input)?;
                Ok((
                    input,
                    ClientKeyExchange::Rsa {
                        encrypted_pre_master,
                    },
                ))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            ClientKeyExchange::Psk { identity } => {
                put_opaque16(identity, output);
            }
            ClientKeyExchange::Ecdhe { public_point } => {
                put_point(public_point, output);
            }
            ClientKeyExchange::EcdhePsk {
                identity,
                public_point,
            } => {
                put_opaque16(identity, output);
                put_point(public_point, output);
            }
            ClientKeyExchange::Rsa {
                encrypted_pre_master,
            } => {
                put_opaque16(encrypted_pre_master, output);
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

fn parse_point(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u8(input)?;
    if len == 0 {
        return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
    }
    take(len)(input)
}

fn put_point(point: &[u8], output: &mut Vec<u8>) {
    output.push(point.len() as u8);
    output.extend_from_slice(point);
}
