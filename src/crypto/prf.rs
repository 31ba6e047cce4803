//! The TLS pseudo-random function and the key derivations built on it.
//!
//! DTLS 1.2 uses `P_SHA256` (RFC 5246 §5). DTLS 1.0 uses the legacy split
//! construction (RFC 2246 §5): the secret is halved, the first half drives
//! `P_MD5`, the second `P_SHA1`, and the two streams are XORed. An odd-length
//! secret shares its middle byte between the halves.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::message::ProtocolVersion;
use crate::Error;

/// Master secret length (RFC 5246 §8.1).
pub const MASTER_SECRET_LEN: usize = 48;

macro_rules! p_hash_impl {
    ($name:ident, $digest:ty) => {
        /// `P_hash` expansion (RFC 5246 §5): A(i) chaining over HMAC.
        fn $name(secret: &[u8], seed: &[u8], output_len: usize) -> Result<Vec<u8>, Error> {
            type M = Hmac<$digest>;

            let hmac = |key: &[u8]| {
                <M as Mac>::new_from_slice(key)
                    .map_err(|_| Error::InternalError("HMAC key setup".to_string()))
            };

            let mut result = Vec::with_capacity(output_len);

            // A(1) = HMAC(secret, seed)
            let mut m = hmac(secret)?;
            m.update(seed);
            let mut a = m.finalize().into_bytes();

            while result.len() < output_len {
                // HMAC(secret, A(i) || seed)
                let mut m = hmac(secret)?;
                m.update(&a);
                m.update(seed);
                let block = m.finalize().into_bytes();

                let needed = output_len - result.len();
                result.extend_from_slice(&block[..needed.min(block.len())]);

                if result.len() < output_len {
                    // A(i+1) = HMAC(secret, A(i))
                    let mut m = hmac(secret)?;
                    m.update(&a);
                    a = m.finalize().into_bytes();
                }
            }

            Ok(result)
        }
    };
}

p_hash_impl!(p_md5, Md5);
p_hash_impl!(p_sha1, Sha1);
p_hash_impl!(p_sha256, Sha256);

/// `PRF(secret, label, seed)` producing exactly `output_len` bytes, using
/// the construction belonging to `version`.
pub fn prf(
    version: ProtocolVersion,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, Error> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);

    match version {
        ProtocolVersion::DTLS1_2 => p_sha256(secret, &label_seed, output_len),
        ProtocolVersion::DTLS1_0 => {
            // Split with a shared middle byte for odd lengths.
            let half = secret.len().div_ceil(2);
            let s1 = &secret[..half];
            let s2 = &secret[secret.len() - half..];

            let md5_stream = p_md5(s1, &label_seed, output_len)?;
            let mut sha1_stream = p_sha1(s2, &label_seed, output_len)?;

            for (out, md5_byte) in sha1_stream.iter_mut().zip(md5_stream.iter()) {
                *out ^= md5_byte;
            }

            Ok(sha1_stream)
        }
        ProtocolVersion::Unknown(v) => Err(Error::UnsupportedVersion(v)),
    }
}

/// `master_secret = PRF(pre_master, "master secret", client_random || server_random, 48)`
pub fn master_secret(
    version: ProtocolVersion,
    pre_master: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut seed = Vec::with_capacity(client_random.len() + server_random.len());
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);

    prf(version, pre_master, "master secret", &seed, MASTER_SECRET_LEN).map(Zeroizing::new)
}

/// RFC 7627 variant: the seed is the session hash instead of the randoms.
pub fn extended_master_secret(
    version: ProtocolVersion,
    pre_master: &[u8],
    session_hash: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    prf(
        version,
        pre_master,
        "extended master secret",
        session_hash,
        MASTER_SECRET_LEN,
    )
    .map(Zeroizing::new)
}

/// `key_block = PRF(master, "key expansion", server_random || client_random, size)`
///
/// Note the seed ordering is reversed from the master secret derivation.
pub fn key_block(
    version: ProtocolVersion,
    master: &[u8],
    server_random: &[u8],
    client_random: &[u8],
    size: usize,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut seed = Vec::with_capacity(server_random.len() + client_random.len());
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    prf(version, master, "key expansion", &seed, size).map(Zeroizing::new)
}

/// Hash of the transcript as used in Finished and the session hash:
/// SHA-256 for DTLS 1.2, MD5 || SHA-1 for DTLS 1.0.
pub fn transcript_hash(version: ProtocolVersion, transcript: &[u8]) -> Vec<u8> {
    match version {
        ProtocolVersion::DTLS1_0 => {
            let mut out = Vec::with_capacity(36);
            out.extend_from_slice(&Md5::digest(transcript));
            out.extend_from_slice(&Sha1::digest(transcript));
            out
        }
        _ => Sha256::digest(transcript).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_is_deterministic_and_sized() {
        for version in [ProtocolVersion::DTLS1_0, ProtocolVersion::DTLS1_2] {
            for len in [1usize, 12, 31, 32, 48, 100] {
                let a = prf(version, b"secret", "test label", b"seed", len).unwrap();
                let b = prf(version, b"secret", "test label", b"seed", len).unwrap();
                assert_eq!(a, b);
                assert_eq!(a.len(), len);
            }
        }
    }

    #[test]
    fn prf_prefix_consistency() {
        let short = prf(ProtocolVersion::DTLS1_2, b"s", "l", b"x", 32).unwrap();
        let long = prf(ProtocolVersion::DTLS1_2, b"s", "l", b"x", 96).unwrap();
        assert_eq!(&long[..32], &short[..]);
    }

    #[test]
    fn prf_versions_differ() {
        let v10 = prf(ProtocolVersion::DTLS1_0, b"secret", "label", b"seed", 48).unwrap();
        let v12 = prf(ProtocolVersion::DTLS1_2, b"secret", "label", b"seed", 48).unwrap();
        assert_ne!(v10, v12);
    }

    #[test]
    fn prf_sha256_matches_manual_p_hash() {
        // One output block of P_SHA256 computed by hand:
        // A(1) = HMAC(secret, label||seed); out = HMAC(secret, A(1)||label||seed)
        let secret = b"9bbe436ba940f017";
        let label = "test label";
        let seed = b"a0a1a2a3a4a5a6a7a8a9";

        let mut label_seed = Vec::new();
        label_seed.extend_from_slice(label.as_bytes());
        label_seed.extend_from_slice(seed);

        type M = Hmac<Sha256>;
        let mut m = <M as Mac>::new_from_slice(secret).unwrap();
        m.update(&label_seed);
        let a1 = m.finalize().into_bytes();

        let mut m = <M as Mac>::new_from_slice(secret).unwrap();
        m.update(&a1);
        m.update(&label_seed);
        let expected = m.finalize().into_bytes();

        let out = prf(ProtocolVersion::DTLS1_2, secret, label, seed, 32).unwrap();
        assert_eq!(out, expected.to_vec());
    }

    #[test]
    fn legacy_split_prf_xors_both_streams() {
        // With an even-length secret the halves are disjoint; using a secret
        // whose halves are equal must NOT collapse the construction to a
        // single stream (MD5 and SHA1 still differ).
        let secret = b"samesame";
        let out = prf(ProtocolVersion::DTLS1_0, secret, "label", b"seed", 16).unwrap();

        let mut label_seed = b"label".to_vec();
        label_seed.extend_from_slice(b"seed");
        let md5_only = p_md5(b"same", &label_seed, 16).unwrap();
        let sha1_only = p_sha1(b"same", &label_seed, 16).unwrap();

        let xored: Vec<u8> = md5_only
            .iter()
            .zip(sha1_only.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(out, xored);
    }

    #[test]
    fn master_secret_is_48_bytes() {
        let ms = master_secret(ProtocolVersion::DTLS1_2, &[0x03, 0x03], &[0u8; 32], &[1u8; 32])
            .unwrap();
        assert_eq!(ms.len(), MASTER_SECRET_LEN);
    }

    #[test]
    fn key_block_seed_order_is_server_then_client() {
        let master = [0xAB; 48];
        let client = [0x01; 32];
        let server = [0x02; 32];

        let block = key_block(ProtocolVersion::DTLS1_2, &master, &server, &client, 64).unwrap();

        let mut seed = Vec::new();
        seed.extend_from_slice(&server);
        seed.extend_from_slice(&client);
        let direct = prf(ProtocolVersion::DTLS1_2, &master, "key expansion", &seed, 64).unwrap();
        assert_eq!(&block[..], &direct[..]);
    }

    #[test]
    fn transcript_hash_lengths() {
        assert_eq!(
            transcript_hash(ProtocolVersion::DTLS1_2, b"messages").len(),
            32
        );
        assert_eq!(
            transcript_hash(ProtocolVersion::DTLS1_0, b"messages").len(),
            36
        );
    }
}
