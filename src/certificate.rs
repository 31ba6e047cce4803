//! Self-signed certificate generation for tests, demos and deployments
//! that authenticate by fingerprint rather than PKI.

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256, PKCS_RSA_SHA256,
};
use sha2::{Digest, Sha256};

use crate::identity::Identity;
use crate::Error;

/// A freshly generated certificate with its key and fingerprint.
pub struct GeneratedCertificate {
    /// Certificate in DER format.
    pub certificate: Vec<u8>,
    /// Private key in PKCS#8 DER format.
    pub private_key: Vec<u8>,
    /// SHA-256 fingerprint of the certificate.
    pub fingerprint: Vec<u8>,
}

impl GeneratedCertificate {
    /// Turn the generated material into an [`Identity`].
    pub fn into_identity(self) -> Result<Identity, Error> {
        Identity::from_single(self.certificate, &self.private_key)
    }
}

/// Generate a self-signed ECDSA P-256 certificate.
pub fn generate_self_signed_certificate() -> Result<GeneratedCertificate, Error> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::InternalError(format!("key generation: {}", e)))?;

    build_certificate(key_pair, &PKCS_ECDSA_P256_SHA256)
}

/// Generate a self-signed certificate around an existing RSA key
/// (PKCS#8 DER, 2048 bits or larger).
pub fn self_signed_certificate_for_rsa_key(
    pkcs8_der: &[u8],
) -> Result<GeneratedCertificate, Error> {
    let key_pair = KeyPair::from_der(pkcs8_der)
        .map_err(|e| Error::InternalError(format!("RSA key import: {}", e)))?;

    build_certificate(key_pair, &PKCS_RSA_SHA256)
}

/// Generate a fresh 2048-bit RSA key and a self-signed certificate for it.
/// Noticeably slower than the ECDSA variant.
pub fn generate_self_signed_rsa_certificate() -> Result<GeneratedCertificate, Error> {
    use rsa::pkcs8::EncodePrivateKey;

    let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
        .map_err(|e| Error::InternalError(format!("RSA key generation: {}", e)))?;
    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| Error::InternalError(format!("RSA key encode: {}", e)))?;

    self_signed_certificate_for_rsa_key(pkcs8.as_bytes())
}

fn build_certificate(
    key_pair: KeyPair,
    alg: &'static rcgen::SignatureAlgorithm,
) -> Result<GeneratedCertificate, Error> {
    let mut params = CertificateParams::new(vec!["minidtls".to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "minidtls".to_string());
    distinguished_name.push(DnType::CommonName, "minidtls endpoint".to_string());
    params.distinguished_name = distinguished_name;

    params.is_ca = IsCa::NoCa;
    params.alg = alg;
    params.key_pair = Some(key_pair);

    let cert = RcgenCertificate::from_params(params)
        .map_err(|e| Error::InternalError(format!("certificate build: {}", e)))?;

    let certificate = cert
        .serialize_der()
        .map_err(|e| Error::InternalError(format!("certificate encode: {}", e)))?;
    let private_key = cert.serialize_private_key_der();
    let fingerprint = calculate_fingerprint(&certificate);

    Ok(GeneratedCertificate {
        certificate,
        private_key,
        fingerprint,
    })
}

/// SHA-256 fingerprint of a DER certificate.
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}
