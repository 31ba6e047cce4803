//! Key exchange material: ephemeral ECDH, pre-master assembly for the
//! PSK/RSA families, and handshake signatures.

use md5::Md5;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::identity::PrivateKey;
use crate::message::{
    HashAlgorithm, ProtocolVersion, SignatureAlgorithm, SignatureAndHashAlgorithm,
};
use crate::Error;

/// RSA pre-master length: 2 version bytes plus 46 random bytes.
pub const RSA_PRE_MASTER_LEN: usize = 48;

/// An ephemeral P-256 keypair for one handshake.
pub struct EcdheKeyPair {
    secret: p256::ecdh::EphemeralSecret,
    public: Vec<u8>,
}

impl EcdheKeyPair {
    pub fn generate() -> Self {
        let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        EcdheKeyPair { secret, public }
    }

    /// The uncompressed SEC1 point sent in the key exchange message.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Run the ECDH computation against the peer's uncompressed point,
    /// consuming the ephemeral secret.
    pub fn shared_secret(self, peer_point: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let peer = PublicKey::from_sec1_bytes(peer_point)
            .map_err(|_| Error::HandshakeFailure("invalid peer ECDH point".to_string()))?;

        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

impl std::fmt::Debug for EcdheKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EcdheKeyPair({} byte point)", self.public.len())
    }
}

/// PSK pre-master (RFC 4279 §2):
/// `len(other) || other_secret || len(psk) || psk`, where `other_secret` is
/// the ECDH shared secret for ECDHE-PSK and a zero block of the PSK's length
/// for pure PSK.
pub fn psk_pre_master(other_secret: Option<&[u8]>, psk: &[u8]) -> Zeroizing<Vec<u8>> {
    let zeros;
    let other = match other_secret {
        Some(other) => other,
        None => {
            zeros = vec![0u8; psk.len()];
            &zeros
        }
    };

    let mut pre_master = Zeroizing::new(Vec::with_capacity(4 + other.len() + psk.len()));
    pre_master.extend_from_slice(&(other.len() as u16).to_be_bytes());
    pre_master.extend_from_slice(other);
    pre_master.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    pre_master.extend_from_slice(psk);
    pre_master
}

/// Fresh RSA pre-master: advertised client version plus 46 CSPRNG bytes.
pub fn rsa_pre_master(client_version: ProtocolVersion) -> Zeroizing<Vec<u8>> {
    let mut pre_master = Zeroizing::new(vec![0u8; RSA_PRE_MASTER_LEN]);
    pre_master[..2].copy_from_slice(&client_version.as_u16().to_be_bytes());
    OsRng.fill_bytes(&mut pre_master[2..]);
    pre_master
}

/// Encrypt the RSA pre-master under the server's public key (PKCS#1 v1.5).
pub fn rsa_encrypt_pre_master(
    server_key: &RsaPublicKey,
    pre_master: &[u8],
) -> Result<Vec<u8>, Error> {
    server_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, pre_master)
        .map_err(|_| Error::InternalError("RSA encrypt".to_string()))
}

/// Decrypt an RSA pre-master.
///
/// On any fault (padding, length, version) a random pre-master with the
/// expected version prefix is substituted so the handshake fails later at
/// Finished, without leaking which check failed (Bleichenbacher).
pub fn rsa_decrypt_pre_master(
    key: &rsa::RsaPrivateKey,
    ciphertext: &[u8],
    client_version: ProtocolVersion,
) -> Zeroizing<Vec<u8>> {
    let fallback = rsa_pre_master(client_version);

    let Ok(decrypted) = key.decrypt(Pkcs1v15Encrypt, ciphertext) else {
        return fallback;
    };
    let decrypted = Zeroizing::new(decrypted);

    if decrypted.len() != RSA_PRE_MASTER_LEN
        || decrypted[..2] != client_version.as_u16().to_be_bytes()
    {
        return fallback;
    }

    decrypted
}

/// A peer's public key, extracted from the leaf certificate's
/// SubjectPublicKeyInfo. No chain or policy validation happens here.
pub enum PeerPublicKey {
    Ecdsa(VerifyingKey),
    Rsa(Box<RsaPublicKey>),
}

const OID_EC_PUBLIC_KEY: der::asn1::ObjectIdentifier =
    der::asn1::ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_RSA_ENCRYPTION: der::asn1::ObjectIdentifier =
    der::asn1::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

impl PeerPublicKey {
    pub fn from_certificate(cert_der: &[u8]) -> Result<PeerPublicKey, Error> {
        use der::Decode;

        let cert = x509_cert::Certificate::from_der(cert_der)
            .map_err(|_| Error::DecodeError("peer certificate DER".to_string()))?;
        let spki = &cert.tbs_certificate.subject_public_key_info;
        let key_bytes = spki.subject_public_key.raw_bytes();

        if spki.algorithm.oid == OID_EC_PUBLIC_KEY {
            let key = VerifyingKey::from_sec1_bytes(key_bytes)
                .map_err(|_| Error::DecodeError("peer EC public key".to_string()))?;
            Ok(PeerPublicKey::Ecdsa(key))
        } else if spki.algorithm.oid == OID_RSA_ENCRYPTION {
            let key = RsaPublicKey::from_pkcs1_der(key_bytes)
                .map_err(|_| Error::DecodeError("peer RSA public key".to_string()))?;
            Ok(PeerPublicKey::Rsa(Box::new(key)))
        } else {
            Err(Error::HandshakeFailure(format!(
                "unsupported peer key algorithm {}",
                spki.algorithm.oid
            )))
        }
    }

    pub fn rsa(&self) -> Option<&RsaPublicKey> {
        match self {
            PeerPublicKey::Rsa(key) => Some(key),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerPublicKey::Ecdsa(_) => write!(f, "PeerPublicKey::Ecdsa"),
            PeerPublicKey::Rsa(_) => write!(f, "PeerPublicKey::Rsa"),
        }
    }
}

/// Sign handshake data with the version-appropriate scheme.
///
/// DTLS 1.2 signatures carry the algorithm pair and hash with SHA-256.
/// DTLS 1.0 uses the legacy forms: MD5 || SHA-1 PKCS#1 (no DigestInfo) for
/// RSA, and a SHA-1 ECDSA signature for ECDSA.
pub fn sign(
    key: &PrivateKey,
    version: ProtocolVersion,
    data: &[u8],
) -> Result<(Option<SignatureAndHashAlgorithm>, Vec<u8>), Error> {
    match (key, version) {
        (PrivateKey::Ecdsa(signing_key), ProtocolVersion::DTLS1_2) => {
            let digest = Sha256::digest(data);
            let signature: EcdsaSignature = signing_key
                .sign_prehash(&digest)
                .map_err(|_| Error::InternalError("ECDSA sign".to_string()))?;
            Ok((
                Some(SignatureAndHashAlgorithm::SHA256_ECDSA),
                signature.to_der().as_bytes().to_vec(),
            ))
        }
        (PrivateKey::Ecdsa(signing_key), _) => {
            let digest = Sha1::digest(data);
            let signature: EcdsaSignature = signing_key
                .sign_prehash(&digest)
                .map_err(|_| Error::InternalError("ECDSA sign".to_string()))?;
            Ok((None, signature.to_der().as_bytes().to_vec()))
        }
        (PrivateKey::Rsa(private_key), ProtocolVersion::DTLS1_2) => {
            let digest = Sha256::digest(data);
            let signature = private_key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                .map_err(|_| Error::InternalError("RSA sign".to_string()))?;
            Ok((Some(SignatureAndHashAlgorithm::SHA256_RSA), signature))
        }
        (PrivateKey::Rsa(private_key), _) => {
            let digest = legacy_rsa_digest(data);
            let signature = private_key
                .sign(Pkcs1v15Sign::new_unprefixed(), &digest)
                .map_err(|_| Error::InternalError("RSA sign".to_string()))?;
            Ok((None, signature))
        }
    }
}

/// Verify a handshake signature against the peer's public key.
pub fn verify(
    peer: &PeerPublicKey,
    version: ProtocolVersion,
    algorithm: Option<SignatureAndHashAlgorithm>,
    data: &[u8],
    signature: &[u8],
) -> Result<(), Error> {
    match peer {
        PeerPublicKey::Ecdsa(verifying_key) => {
            let parsed =
                EcdsaSignature::from_der(signature).map_err(|_| Error::DecryptError)?;
            let digest = match effective_hash(algorithm, version, SignatureAlgorithm::Ecdsa)? {
                HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
                HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
                _ => return Err(Error::DecryptError),
            };
            verifying_key
                .verify_prehash(&digest, &parsed)
                .map_err(|_| Error::DecryptError)
        }
        PeerPublicKey::Rsa(public_key) => {
            match effective_hash(algorithm, version, SignatureAlgorithm::Rsa)? {
                HashAlgorithm::Sha256 => {
                    let digest = Sha256::digest(data);
                    public_key
                        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                        .map_err(|_| Error::DecryptError)
                }
                HashAlgorithm::Sha1 => {
                    let digest = Sha1::digest(data);
                    public_key
                        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
                        .map_err(|_| Error::DecryptError)
                }
                HashAlgorithm::Md5 => {
                    // Legacy DTLS 1.0 form: MD5 || SHA1, no DigestInfo.
                    let digest = legacy_rsa_digest(data);
                    public_key
                        .verify(Pkcs1v15Sign::new_unprefixed(), &digest, signature)
                        .map_err(|_| Error::DecryptError)
                }
                _ => Err(Error::DecryptError),
            }
        }
    }
}

/// Resolve the hash to verify with. An explicit algorithm pair must match
/// the key type; without one, the version's legacy default applies (the
/// MD5||SHA1 combination is flagged as `Md5` for RSA keys).
fn effective_hash(
    algorithm: Option<SignatureAndHashAlgorithm>,
    version: ProtocolVersion,
    expected: SignatureAlgorithm,
) -> Result<HashAlgorithm, Error> {
    match algorithm {
        Some(pair) => {
            if pair.signature != expected {
                return Err(Error::DecryptError);
            }
            Ok(pair.hash)
        }
        None => {
            if version == ProtocolVersion::DTLS1_2 {
                // 1.2 signatures always carry the pair.
                return Err(Error::DecryptError);
            }
            match expected {
                SignatureAlgorithm::Ecdsa => Ok(HashAlgorithm::Sha1),
                SignatureAlgorithm::Rsa => Ok(HashAlgorithm::Md5),
                _ => Err(Error::DecryptError),
            }
        }
    }
}

fn legacy_rsa_digest(data: &[u8]) -> Vec<u8> {
    let mut digest = Vec::with_capacity(36);
    digest.extend_from_slice(&Md5::digest(data));
    digest.extend_from_slice(&Sha1::digest(data));
    digest
}
