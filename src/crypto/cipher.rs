//! Record protection: CBC with HMAC (MAC-then-encrypt) and AES-128-CCM-8.
//!
//! Both modes take the 64-bit `(epoch << 48) | sequence` composite as their
//! per-record input. CBC binds it into the MAC; CCM uses it as the explicit
//! nonce and binds it into the AAD. The receiver passes the value recovered
//! from the record header, which forces the explicit nonce on the wire to
//! match the header (anything else fails as a MAC error).

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U12, U8};
use ccm::Ccm;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::message::{CipherSuite, ContentType, HashAlgorithm, ProtocolVersion};
use crate::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128Ccm8 = Ccm<Aes128, U8, U12>;

const AES_BLOCK: usize = 16;
const CCM_EXPLICIT_NONCE: usize = 8;
const CCM_TAG: usize = 8;

/// One direction's key material, sliced out of the key block.
pub struct CipherKeys<'a> {
    pub enc_key: &'a [u8],
    pub mac_key: &'a [u8],
    pub fixed_iv: &'a [u8],
}

/// An installed record cipher for one direction.
pub enum Cipher {
    CbcHmac(CbcHmac),
    Ccm8(Ccm8),
}

impl Cipher {
    pub fn new(suite: CipherSuite, keys: CipherKeys<'_>) -> Result<Cipher, Error> {
        if suite.is_aead() {
            if keys.enc_key.len() != 16 || keys.fixed_iv.len() != 4 {
                return Err(Error::InternalError("CCM key material size".to_string()));
            }
            let mut salt = [0u8; 4];
            salt.copy_from_slice(keys.fixed_iv);
            Ok(Cipher::Ccm8(Ccm8 {
                key: Zeroizing::new(keys.enc_key.to_vec()),
                salt,
            }))
        } else {
            let mac = suite
                .mac_algorithm()
                .ok_or_else(|| Error::InternalError("CBC suite without MAC".to_string()))?;
            if keys.mac_key.len() != suite.mac_key_len() {
                return Err(Error::InternalError("CBC MAC key size".to_string()));
            }
            Ok(Cipher::CbcHmac(CbcHmac {
                enc_key: Zeroizing::new(keys.enc_key.to_vec()),
                mac_key: Zeroizing::new(keys.mac_key.to_vec()),
                mac,
            }))
        }
    }

    /// Protect a plaintext fragment. Returns the wire fragment.
    pub fn encode(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        match self {
            Cipher::CbcHmac(c) => c.encode(seq_nonce, content_type, version, plaintext),
            Cipher::Ccm8(c) => c.encode(seq_nonce, content_type, version, plaintext),
        }
    }

    /// Recover a plaintext fragment. All failure modes surface as
    /// [`Error::BadRecordMac`].
    pub fn decode(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, Error> {
        match self {
            Cipher::CbcHmac(c) => c.decode(seq_nonce, content_type, version, fragment),
            Cipher::Ccm8(c) => c.decode(seq_nonce, content_type, version, fragment),
        }
    }

    /// Worst-case expansion from plaintext to wire fragment.
    pub fn max_overhead(&self) -> usize {
        match self {
            Cipher::CbcHmac(c) => AES_BLOCK + c.mac.output_len() + AES_BLOCK,
            Cipher::Ccm8(_) => CCM_EXPLICIT_NONCE + CCM_TAG,
        }
    }
}

/// MAC input / AAD: seq_nonce(8) || type(1) || version(2) || length(2).
fn pseudo_header(
    seq_nonce: u64,
    content_type: ContentType,
    version: ProtocolVersion,
    length: usize,
) -> [u8; 13] {
    let mut header = [0u8; 13];
    header[..8].copy_from_slice(&seq_nonce.to_be_bytes());
    header[8] = content_type.as_u8();
    header[9..11].copy_from_slice(&version.as_u16().to_be_bytes());
    header[11..13].copy_from_slice(&(length as u16).to_be_bytes());
    header
}

/// AES-CBC with HMAC, MAC-then-encrypt (RFC 5246 §6.2.3.2).
///
/// Wire fragment: explicit_iv(16) || encrypt(plaintext || mac || padding).
pub struct CbcHmac {
    enc_key: Zeroizing<Vec<u8>>,
    mac_key: Zeroizing<Vec<u8>>,
    mac: HashAlgorithm,
}

impl CbcHmac {
    fn compute_mac(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let header = pseudo_header(seq_nonce, content_type, version, plaintext.len());

        match self.mac {
            HashAlgorithm::Sha1 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&self.mac_key)
                    .map_err(|_| Error::InternalError("HMAC key setup".to_string()))?;
                mac.update(&header);
                mac.update(plaintext);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            HashAlgorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.mac_key)
                    .map_err(|_| Error::InternalError("HMAC key setup".to_string()))?;
                mac.update(&header);
                mac.update(plaintext);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            _ => Err(Error::InternalError("unsupported MAC hash".to_string())),
        }
    }

    fn cbc_encrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), Error> {
        let len = data.len();
        match self.enc_key.len() {
            16 => {
                let enc = Aes128CbcEnc::new_from_slices(&self.enc_key, iv)
                    .map_err(|_| Error::InternalError("CBC key/iv size".to_string()))?;
                enc.encrypt_padded_mut::<NoPadding>(data, len)
                    .map_err(|_| Error::InternalError("CBC block alignment".to_string()))?;
            }
            32 => {
                let enc = Aes256CbcEnc::new_from_slices(&self.enc_key, iv)
                    .map_err(|_| Error::InternalError("CBC key/iv size".to_string()))?;
                enc.encrypt_padded_mut::<NoPadding>(data, len)
                    .map_err(|_| Error::InternalError("CBC block alignment".to_string()))?;
            }
            _ => return Err(Error::InternalError("CBC key size".to_string())),
        }
        Ok(())
    }

    fn cbc_decrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), Error> {
        match self.enc_key.len() {
            16 => {
                let dec = Aes128CbcDec::new_from_slices(&self.enc_key, iv)
                    .map_err(|_| Error::BadRecordMac)?;
                dec.decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| Error::BadRecordMac)?;
            }
            32 => {
                let dec = Aes256CbcDec::new_from_slices(&self.enc_key, iv)
                    .map_err(|_| Error::BadRecordMac)?;
                dec.decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| Error::BadRecordMac)?;
            }
            _ => return Err(Error::InternalError("CBC key size".to_string())),
        }
        Ok(())
    }

    fn encode(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mac = self.compute_mac(seq_nonce, content_type, version, plaintext)?;

        // plaintext || mac || padding; all padding bytes carry pad_len.
        let data_len = plaintext.len() + mac.len();
        let pad_len = (AES_BLOCK - ((data_len + 1) % AES_BLOCK)) % AES_BLOCK;

        let mut data = Vec::with_capacity(data_len + pad_len + 1);
        data.extend_from_slice(plaintext);
        data.extend_from_slice(&mac);
        data.resize(data_len + pad_len + 1, pad_len as u8);

        let mut iv = [0u8; AES_BLOCK];
        OsRng.fill_bytes(&mut iv);

        self.cbc_encrypt(&iv, &mut data)?;

        let mut fragment = Vec::with_capacity(AES_BLOCK + data.len());
        fragment.extend_from_slice(&iv);
        fragment.extend_from_slice(&data);
        Ok(fragment)
    }

    fn decode(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mac_len = self.mac.output_len();

        let min_blocks = (mac_len + 1).div_ceil(AES_BLOCK) * AES_BLOCK;
        if fragment.len() < AES_BLOCK + min_blocks
            || (fragment.len() - AES_BLOCK) % AES_BLOCK != 0
        {
            return Err(Error::BadRecordMac);
        }

        let (iv, encrypted) = fragment.split_at(AES_BLOCK);
        let mut data = Zeroizing::new(encrypted.to_vec());
        self.cbc_decrypt(iv, &mut data)?;

        // Padding and MAC are validated in constant time: a padding fault
        // and a MAC fault are indistinguishable to the sender.
        let pad_len = data[data.len() - 1] as usize;
        let overhead = pad_len + 1 + mac_len;
        let length_ok: u8 = u8::from(overhead <= data.len());

        let mut pad_ok = length_ok;
        let pad_start = data.len().saturating_sub(pad_len + 1);
        for byte in &data[pad_start..] {
            pad_ok &= byte.ct_eq(&(pad_len as u8)).unwrap_u8();
        }

        let content_len = if length_ok == 1 {
            data.len() - overhead
        } else {
            0
        };

        let expected = self.compute_mac(seq_nonce, content_type, version, &data[..content_len])?;
        let received = if length_ok == 1 {
            &data[content_len..content_len + mac_len]
        } else {
            &data[..mac_len]
        };
        let mac_ok = received.ct_eq(expected.as_slice()).unwrap_u8();

        if pad_ok & mac_ok != 1 {
            return Err(Error::BadRecordMac);
        }

        Ok(data[..content_len].to_vec())
    }
}

/// AES-128-CCM with an 8-byte tag (RFC 6655).
///
/// Wire fragment: explicit_nonce(8) || ciphertext || tag(8). The nonce is
/// salt(4) || explicit(8) where the explicit part is the epoch/sequence
/// composite.
pub struct Ccm8 {
    key: Zeroizing<Vec<u8>>,
    salt: [u8; 4],
}

impl Ccm8 {
    fn nonce(&self, explicit: &[u8]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.salt);
        nonce[4..].copy_from_slice(explicit);
        nonce
    }

    fn encode(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = Aes128Ccm8::new_from_slice(&self.key)
            .map_err(|_| Error::InternalError("CCM key size".to_string()))?;

        let explicit = seq_nonce.to_be_bytes();
        let nonce = self.nonce(&explicit);
        let aad = pseudo_header(seq_nonce, content_type, version, plaintext.len());

        let mut buffer = plaintext.to_vec();
        cipher
            .encrypt_in_place(GenericArray::from_slice(&nonce), &aad, &mut buffer)
            .map_err(|_| Error::InternalError("CCM encrypt".to_string()))?;

        let mut fragment = Vec::with_capacity(CCM_EXPLICIT_NONCE + buffer.len());
        fragment.extend_from_slice(&explicit);
        fragment.extend_from_slice(&buffer);
        Ok(fragment)
    }

    fn decode(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if fragment.len() < CCM_EXPLICIT_NONCE + CCM_TAG {
            return Err(Error::BadRecordMac);
        }

        let (explicit, ciphertext) = fragment.split_at(CCM_EXPLICIT_NONCE);

        // The explicit nonce must restate the record header's epoch/sequence.
        if explicit.ct_eq(&seq_nonce.to_be_bytes()).unwrap_u8() != 1 {
            return Err(Error::BadRecordMac);
        }

        let cipher = Aes128Ccm8::new_from_slice(&self.key)
            .map_err(|_| Error::InternalError("CCM key size".to_string()))?;

        let nonce = self.nonce(explicit);
        let plaintext_len = ciphertext.len() - CCM_TAG;
        let aad = pseudo_header(seq_nonce, content_type, version, plaintext_len);

        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place(GenericArray::from_slice(&nonce), &aad, &mut buffer)
            .map_err(|_| Error::BadRecordMac)?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbc_sha256() -> Cipher {
        Cipher::new(
            CipherSuite::PSK_AES128_CBC_SHA256,
            CipherKeys {
                enc_key: &[0x42; 16],
                mac_key: &[0xAB; 32],
                fixed_iv: &[],
            },
        )
        .unwrap()
    }

    fn cbc_sha1_aes256() -> Cipher {
        Cipher::new(
            CipherSuite::RSA_AES256_CBC_SHA,
            CipherKeys {
                enc_key: &[0x24; 32],
                mac_key: &[0xCD; 20],
                fixed_iv: &[],
            },
        )
        .unwrap()
    }

    fn ccm8() -> Cipher {
        Cipher::new(
            CipherSuite::PSK_AES128_CCM_8,
            CipherKeys {
                enc_key: &[0x42; 16],
                mac_key: &[],
                fixed_iv: &[0x01, 0x02, 0x03, 0x04],
            },
        )
        .unwrap()
    }

    fn seq(epoch: u16, number: u64) -> u64 {
        ((epoch as u64) << 48) | number
    }

    #[test]
    fn cbc_roundtrip() {
        for cipher in [cbc_sha256(), cbc_sha1_aes256()] {
            let nonce = seq(1, 7);
            let fragment = cipher
                .encode(
                    nonce,
                    ContentType::ApplicationData,
                    ProtocolVersion::DTLS1_2,
                    b"ping",
                )
                .unwrap();

            let plaintext = cipher
                .decode(
                    nonce,
                    ContentType::ApplicationData,
                    ProtocolVersion::DTLS1_2,
                    &fragment,
                )
                .unwrap();
            assert_eq!(plaintext, b"ping");
        }
    }

    #[test]
    fn ccm_roundtrip() {
        let cipher = ccm8();
        let nonce = seq(1, 0);
        let fragment = cipher
            .encode(
                nonce,
                ContentType::ApplicationData,
                ProtocolVersion::DTLS1_2,
                b"pong",
            )
            .unwrap();

        // explicit nonce leads the fragment
        assert_eq!(&fragment[..8], &nonce.to_be_bytes());
        assert_eq!(fragment.len(), 8 + 4 + 8);

        let plaintext = cipher
            .decode(
                nonce,
                ContentType::ApplicationData,
                ProtocolVersion::DTLS1_2,
                &fragment,
            )
            .unwrap();
        assert_eq!(plaintext, b"pong");
    }

    #[test]
    fn every_bit_flip_is_bad_record_mac() {
        for cipher in [cbc_sha256(), ccm8()] {
            let nonce = seq(1, 3);
            let fragment = cipher
                .encode(
                    nonce,
                    ContentType::ApplicationData,
                    ProtocolVersion::DTLS1_2,
                    b"sensitive",
                )
                .unwrap();

            for byte in 0..fragment.len() {
                let mut tampered = fragment.clone();
                tampered[byte] ^= 0x01;
                let result = cipher.decode(
                    nonce,
                    ContentType::ApplicationData,
                    ProtocolVersion::DTLS1_2,
                    &tampered,
                );
                assert!(
                    matches!(result, Err(Error::BadRecordMac)),
                    "flip at byte {} not rejected",
                    byte
                );
            }
        }
    }

    #[test]
    fn wrong_sequence_rejected() {
        for cipher in [cbc_sha256(), ccm8()] {
            let fragment = cipher
                .encode(
                    seq(1, 3),
                    ContentType::ApplicationData,
                    ProtocolVersion::DTLS1_2,
                    b"data",
                )
                .unwrap();

            let result = cipher.decode(
                seq(1, 4),
                ContentType::ApplicationData,
                ProtocolVersion::DTLS1_2,
                &fragment,
            );
            assert!(matches!(result, Err(Error::BadRecordMac)));
        }
    }

    #[test]
    fn wrong_content_type_rejected() {
        let cipher = ccm8();
        let fragment = cipher
            .encode(
                seq(1, 3),
                ContentType::ApplicationData,
                ProtocolVersion::DTLS1_2,
                b"data",
            )
            .unwrap();

        let result = cipher.decode(
            seq(1, 3),
            ContentType::Handshake,
            ProtocolVersion::DTLS1_2,
            &fragment,
        );
        assert!(matches!(result, Err(Error::BadRecordMac)));
    }

    #[test]
    fn cbc_empty_plaintext() {
        let cipher = cbc_sha256();
        let nonce = seq(1, 9);
        let fragment = cipher
            .encode(nonce, ContentType::Alert, ProtocolVersion::DTLS1_0, &[])
            .unwrap();
        let plaintext = cipher
            .decode(nonce, ContentType::Alert, ProtocolVersion::DTLS1_0, &fragment)
            .unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn overhead_covers_actual_expansion() {
        for cipher in [cbc_sha256(), cbc_sha1_aes256(), ccm8()] {
            for len in [0usize, 1, 15, 16, 17, 100] {
                let fragment = cipher
                    .encode(
                        seq(1, 1),
                        ContentType::ApplicationData,
                        ProtocolVersion::DTLS1_2,
                        &vec![0u8; len],
                    )
                    .unwrap();
                assert!(fragment.len() <= len + cipher.max_overhead());
            }
        }
    }

    #[test]
    fn truncated_fragment_rejected() {
        let cipher = ccm8();
        assert!(matches!(
            cipher.decode(
                seq(1, 0),
                ContentType::ApplicationData,
                ProtocolVersion::DTLS1_2,
                &[0u8; 10],
            ),
            Err(Error::BadRecordMac)
        ));
    }
}
