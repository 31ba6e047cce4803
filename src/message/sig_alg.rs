use nom::number::complete::be_u8;
use nom::IResult;

/// TLS HashAlgorithm registry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Unknown(u8),
}

impl HashAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => HashAlgorithm::Md5,
            2 => HashAlgorithm::Sha1,
            4 => HashAlgorithm::Sha256,
            _ => HashAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::Md5 => 1,
            HashAlgorithm::Sha1 => 2,
            HashAlgorithm::Sha256 => 4,
            HashAlgorithm::Unknown(value) => *value,
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Unknown(_) => 0,
        }
    }
}

/// TLS SignatureAlgorithm registry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Anonymous,
    Rsa,
    Ecdsa,
    Unknown(u8),
}

impl SignatureAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SignatureAlgorithm::Anonymous,
            1 => SignatureAlgorithm::Rsa,
            3 => SignatureAlgorithm::Ecdsa,
            _ => SignatureAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureAlgorithm::Anonymous => 0,
            SignatureAlgorithm::Rsa => 1,
            SignatureAlgorithm::Ecdsa => 3,
            SignatureAlgorithm::Unknown(value) => *value,
        }
    }
}

/// The (hash, signature) pair used in TLS 1.2 signatures and the
/// signature_algorithms extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAndHashAlgorithm {
    pub hash: HashAlgorithm,
    pub signature: SignatureAlgorithm,
}

impl SignatureAndHashAlgorithm {
    pub const SHA256_ECDSA: SignatureAndHashAlgorithm = SignatureAndHashAlgorithm {
        hash: HashAlgorithm::Sha256,
        signature: SignatureAlgorithm::Ecdsa,
    };

    pub const SHA256_RSA: SignatureAndHashAlgorithm = SignatureAndHashAlgorithm {
        hash: HashAlgorithm::Sha256,
        signature: SignatureAlgorithm::Rsa,
    };

    pub const SHA1_RSA: SignatureAndHashAlgorithm = SignatureAndHashAlgorithm {
        hash: HashAlgorithm::Sha1,
        signature: SignatureAlgorithm::Rsa,
    };

    /// What the initiator advertises, in preference order.
    pub fn advertised() -> &'static [SignatureAndHashAlgorithm] {
        &[
            SignatureAndHashAlgorithm::SHA256_ECDSA,
            SignatureAndHashAlgorithm::SHA256_RSA,
            SignatureAndHashAlgorithm::SHA1_RSA,
        ]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAndHashAlgorithm> {
        let (input, hash) = be_u8(input)?;
        let (input, signature) = be_u8(input)?;
        Ok((
            input,
            SignatureAndHashAlgorithm {
                hash: HashAlgorithm::from_u8(hash),
                signature: SignatureAlgorithm::from_u8(signature),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.hash.as_u8());
        output.push(self.signature.as_u8());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let alg = SignatureAndHashAlgorithm::SHA256_ECDSA;

        let mut serialized = Vec::new();
        alg.serialize(&mut serialized);
        assert_eq!(serialized, &[0x04, 0x03]);

        let (rest, parsed) = SignatureAndHashAlgorithm::parse(&serialized).unwrap();
        assert_eq!(parsed, alg);
        assert!(rest.is_empty());
    }

    #[test]
    fn unknown_values_carried() {
        let (_, parsed) = SignatureAndHashAlgorithm::parse(&[0x05, 0x02]).unwrap();
        assert_eq!(parsed.hash, HashAlgorithm::Unknown(5));
        assert_eq!(parsed.signature, SignatureAlgorithm::Unknown(2));
    }
}
