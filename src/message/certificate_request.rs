use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use smallvec::SmallVec;

use super::{ProtocolVersion, SignatureAndHashAlgorithm};

/// ClientCertificateType registry values used in CertificateRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCertificateType {
    RsaSign,
    EcdsaSign,
    Unknown(u8),
}

impl ClientCertificateType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ClientCertificateType::RsaSign,
            64 => ClientCertificateType::EcdsaSign,
            _ => ClientCertificateType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ClientCertificateType::RsaSign => 1,
            ClientCertificateType::EcdsaSign => 64,
            ClientCertificateType::Unknown(value) => *value,
        }
    }
}

/// Server request for a client certificate. The distinguished-name list is
/// carried opaque; this crate sends it empty and ignores it on receipt.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateRequest<'a> {
    pub certificate_types: SmallVec<[ClientCertificateType; 4]>,
    pub signature_algorithms: SmallVec<[SignatureAndHashAlgorithm; 8]>,
    pub certificate_authorities: &'a [u8],
}

impl<'a> CertificateRequest<'a> {
    pub fn parse(
        input: &'a [u8],
        version: ProtocolVersion,
    ) -> IResult<&'a [u8], CertificateRequest<'a>> {
        let (input, types_len) = be_u8(input)?;
        let (input, types_bytes) = take(types_len)(input)?;
        let certificate_types = types_bytes
            .iter()
            .map(|b| ClientCertificateType::from_u8(*b))
            .collect();

        let (input, signature_algorithms) = if version == ProtocolVersion::DTLS1_2 {
            let (input, algs_len) = be_u16(input)?;
            let (input, mut algs_bytes) = take(algs_len)(input)?;
            let mut algorithms = SmallVec::new();
            while algs_bytes.len() >= 2 {
                let (rest, algorithm) = SignatureAndHashAlgorithm::parse(algs_bytes)?;
                algorithms.push(algorithm);
                algs_bytes = rest;
            }
            (input, algorithms)
        } else {
            (input, SmallVec::new())
        };

        let (input, authorities_len) = be_u16(input)?;
        let (input, certificate_authorities) = take(authorities_len)(input)?;

        Ok((
            input,
            CertificateRequest {
                certificate_types,
                signature_algorithms,
                certificate_authorities,
            },
        ))
    }

    pub fn serialize(&self, version: ProtocolVersion, output: &mut Vec<u8>) {
        output.push(self.certificate_types.len() as u8);
        for certificate_type in &self.certificate_types {
            output.push(certificate_type.as_u8());
        }

        if version == ProtocolVersion::DTLS1_2 {
            output.extend_from_slice(&(self.signature_algorithms.len() as u16 * 2).to_be_bytes());
            for algorithm in &self.signature_algorithms {
                algorithm.serialize(output);
            }
        }

        output.extend_from_slice(&(self.certificate_authorities.len() as u16).to_be_bytes());
        output.extend_from_slice(self.certificate_authorities);
    }
}
