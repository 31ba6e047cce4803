use nom::number::complete::be_u16;
use nom::IResult;

use super::HashAlgorithm;

/// The cipher suites this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    /// TLS_PSK_WITH_AES_128_CBC_SHA256
    PSK_AES128_CBC_SHA256,
    /// TLS_PSK_WITH_AES_128_CCM_8
    PSK_AES128_CCM_8,
    /// TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256
    ECDHE_PSK_AES128_CBC_SHA256,
    /// TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256
    ECDHE_ECDSA_AES128_CBC_SHA256,
    /// TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8
    ECDHE_ECDSA_AES128_CCM_8,
    /// TLS_RSA_WITH_AES_256_CBC_SHA
    RSA_AES256_CBC_SHA,
    Unknown(u16),
}

/// Key exchange family selected by the cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    Psk,
    EcdhePsk,
    EcdheEcdsa,
    Rsa,
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x00AE => CipherSuite::PSK_AES128_CBC_SHA256,
            0xC0A8 => CipherSuite::PSK_AES128_CCM_8,
            0xC037 => CipherSuite::ECDHE_PSK_AES128_CBC_SHA256,
            0xC023 => CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256,
            0xC0AE => CipherSuite::ECDHE_ECDSA_AES128_CCM_8,
            0x0035 => CipherSuite::RSA_AES256_CBC_SHA,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::PSK_AES128_CBC_SHA256 => 0x00AE,
            CipherSuite::PSK_AES128_CCM_8 => 0xC0A8,
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256 => 0xC037,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256 => 0xC023,
            CipherSuite::ECDHE_ECDSA_AES128_CCM_8 => 0xC0AE,
            CipherSuite::RSA_AES256_CBC_SHA => 0x0035,
            CipherSuite::Unknown(value) => *value,
        }
    }

    /// All implemented suites, in preference order.
    pub fn all() -> &'static [CipherSuite] {
        &[
            CipherSuite::ECDHE_ECDSA_AES128_CCM_8,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256,
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256,
            CipherSuite::PSK_AES128_CCM_8,
            CipherSuite::PSK_AES128_CBC_SHA256,
            CipherSuite::RSA_AES256_CBC_SHA,
        ]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, Self::from_u16(value)))
    }

    pub fn key_exchange(&self) -> Option<KeyExchangeAlgorithm> {
        match self {
            CipherSuite::PSK_AES128_CBC_SHA256 | CipherSuite::PSK_AES128_CCM_8 => {
                Some(KeyExchangeAlgorithm::Psk)
            }
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256 => Some(KeyExchangeAlgorithm::EcdhePsk),
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256 | CipherSuite::ECDHE_ECDSA_AES128_CCM_8 => {
                Some(KeyExchangeAlgorithm::EcdheEcdsa)
            }
            CipherSuite::RSA_AES256_CBC_SHA => Some(KeyExchangeAlgorithm::Rsa),
            CipherSuite::Unknown(_) => None,
        }
    }

    /// Whether the suite uses AEAD record protection (else CBC+HMAC).
    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            CipherSuite::PSK_AES128_CCM_8 | CipherSuite::ECDHE_ECDSA_AES128_CCM_8
        )
    }

    /// Bulk encryption key length in bytes.
    pub fn enc_key_len(&self) -> usize {
        match self {
            CipherSuite::RSA_AES256_CBC_SHA => 32,
            _ => 16,
        }
    }

    /// MAC key length in bytes; zero for AEAD suites.
    pub fn mac_key_len(&self) -> usize {
        match self {
            CipherSuite::PSK_AES128_CBC_SHA256
            | CipherSuite::ECDHE_PSK_AES128_CBC_SHA256
            | CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256 => 32,
            CipherSuite::RSA_AES256_CBC_SHA => 20,
            _ => 0,
        }
    }

    /// Implicit nonce (salt) length from the key block; AEAD suites only.
    pub fn fixed_iv_len(&self) -> usize {
        if self.is_aead() {
            4
        } else {
            0
        }
    }

    /// Hash used for the record MAC in CBC suites.
    pub fn mac_algorithm(&self) -> Option<HashAlgorithm> {
        match self {
            CipherSuite::PSK_AES128_CBC_SHA256
            | CipherSuite::ECDHE_PSK_AES128_CBC_SHA256
            | CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256 => Some(HashAlgorithm::Sha256),
            CipherSuite::RSA_AES256_CBC_SHA => Some(HashAlgorithm::Sha1),
            _ => None,
        }
    }

    /// Suites that carry a server Certificate message.
    pub fn requires_certificate(&self) -> bool {
        matches!(
            self.key_exchange(),
            Some(KeyExchangeAlgorithm::EcdheEcdsa) | Some(KeyExchangeAlgorithm::Rsa)
        )
    }

    /// Suites performing an ephemeral ECDH exchange.
    pub fn has_ecdhe(&self) -> bool {
        matches!(
            self.key_exchange(),
            Some(KeyExchangeAlgorithm::EcdheEcdsa) | Some(KeyExchangeAlgorithm::EcdhePsk)
        )
    }

    /// Suites requiring a PSK entry on both ends.
    pub fn uses_psk(&self) -> bool {
        matches!(
            self.key_exchange(),
            Some(KeyExchangeAlgorithm::Psk) | Some(KeyExchangeAlgorithm::EcdhePsk)
        )
    }
}
