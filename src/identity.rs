//! Local credential: certificate chain plus private key handle.
//!
//! PEM decoding and chain building are the application's job; the library
//! consumes an ordered DER chain and an already-parsed private key.

use std::fmt;
use std::sync::Arc;

use p256::pkcs8::DecodePrivateKey as _;
use rsa::pkcs8::DecodePrivateKey as _;

use crate::message::SignatureAlgorithm;
use crate::Error;

/// A parsed private key usable for handshake signatures and RSA key
/// transport.
pub enum PrivateKey {
    Ecdsa(p256::ecdsa::SigningKey),
    Rsa(Box<rsa::RsaPrivateKey>),
}

impl PrivateKey {
    /// Parse a PKCS#8 DER private key, trying ECDSA P-256 first, then RSA.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, Error> {
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Ecdsa(key));
        }
        if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        Err(Error::HandshakeFailure(
            "private key is neither ECDSA P-256 nor RSA PKCS#8".to_string(),
        ))
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PrivateKey::Ecdsa(_) => SignatureAlgorithm::Ecdsa,
            PrivateKey::Rsa(_) => SignatureAlgorithm::Rsa,
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Ecdsa(_) => write!(f, "PrivateKey::Ecdsa"),
            PrivateKey::Rsa(_) => write!(f, "PrivateKey::Rsa"),
        }
    }
}

/// An ordered DER certificate chain (leaf first) with its private key.
#[derive(Clone)]
pub struct Identity {
    pub certificate_chain: Vec<Vec<u8>>,
    pub private_key: Arc<PrivateKey>,
}

impl Identity {
    pub fn new(certificate_chain: Vec<Vec<u8>>, private_key: PrivateKey) -> Self {
        Identity {
            certificate_chain,
            private_key: Arc::new(private_key),
        }
    }

    /// Build an identity from a single DER certificate and a PKCS#8 DER key.
    pub fn from_single(certificate: Vec<u8>, pkcs8_der: &[u8]) -> Result<Self, Error> {
        Ok(Identity::new(
            vec![certificate],
            PrivateKey::from_pkcs8_der(pkcs8_der)?,
        ))
    }

    pub fn leaf(&self) -> Option<&[u8]> {
        self.certificate_chain.first().map(|c| c.as_slice())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificates", &self.certificate_chain.len())
            .field("key", &self.private_key.algorithm())
            .finish()
    }
}
