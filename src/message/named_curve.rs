use nom::number::complete::be_u16;
use nom::IResult;

/// NamedCurve registry (RFC 4492). The codec understands the registry
/// entries below secp521r1; key exchange is implemented for secp256r1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedCurve {
    Secp192r1,
    Secp224r1,
    Secp256r1,
    Secp384r1,
    X25519,
    Unknown(u16),
}

impl NamedCurve {
    pub fn from_u16(value: u16) -> Self {
        match value {
            19 => NamedCurve::Secp192r1,
            21 => NamedCurve::Secp224r1,
            23 => NamedCurve::Secp256r1,
            24 => NamedCurve::Secp384r1,
            29 => NamedCurve::X25519,
            _ => NamedCurve::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            NamedCurve::Secp192r1 => 19,
            NamedCurve::Secp224r1 => 21,
            NamedCurve::Secp256r1 => 23,
            NamedCurve::Secp384r1 => 24,
            NamedCurve::X25519 => 29,
            NamedCurve::Unknown(value) => *value,
        }
    }

    /// Curves this crate can run ECDHE over.
    pub fn supported() -> &'static [NamedCurve] {
        &[NamedCurve::Secp256r1]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedCurve> {
        let (input, value) = be_u16(input)?;
        Ok((input, Self::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}
