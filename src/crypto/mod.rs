//! Cryptographic context for one session: PRF-based derivations plus the
//! pending/active cipher pair for each direction.
//!
//! Ciphers are staged as *pending* when the pre-master is turned into key
//! material, and become *active* exactly at the ChangeCipherSpec boundary
//! for their direction.

mod cipher;
mod kx;
pub mod prf;

pub use cipher::{Cipher, CipherKeys};
pub use kx::{
    psk_pre_master, rsa_decrypt_pre_master, rsa_encrypt_pre_master, rsa_pre_master, sign, verify,
    EcdheKeyPair, PeerPublicKey, RSA_PRE_MASTER_LEN,
};

use zeroize::Zeroizing;

use crate::message::{CipherSuite, ContentType, ProtocolVersion, VERIFY_DATA_LEN};
use crate::Error;

/// Per-session crypto state.
pub struct CryptoContext {
    version: ProtocolVersion,
    suite: Option<CipherSuite>,
    extended_master_secret: bool,
    session_hash: Option<Vec<u8>>,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    pending_write: Option<Cipher>,
    pending_read: Option<Cipher>,
    write: Option<Cipher>,
    read: Option<Cipher>,
}

impl CryptoContext {
    pub fn new() -> Self {
        CryptoContext {
            version: ProtocolVersion::DTLS1_2,
            suite: None,
            extended_master_secret: false,
            session_hash: None,
            master_secret: None,
            pending_write: None,
            pending_read: None,
            write: None,
            read: None,
        }
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_suite(&mut self, suite: CipherSuite) {
        self.suite = Some(suite);
    }

    pub fn suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    pub fn set_extended_master_secret(&mut self, enabled: bool) {
        self.extended_master_secret = enabled;
    }

    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    /// Capture the transcript hash at the ClientKeyExchange boundary; this
    /// is the RFC 7627 session hash.
    pub fn capture_session_hash(&mut self, hash: Vec<u8>) {
        self.session_hash = Some(hash);
    }

    pub fn is_derived(&self) -> bool {
        self.master_secret.is_some()
    }

    /// Turn the pre-master into the master secret and both directions'
    /// pending ciphers.
    pub fn derive(
        &mut self,
        pre_master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        is_client: bool,
    ) -> Result<(), Error> {
        let suite = self
            .suite
            .ok_or_else(|| Error::InternalError("derive without cipher suite".to_string()))?;

        let master = if self.extended_master_secret {
            let session_hash = self.session_hash.as_ref().ok_or_else(|| {
                Error::InternalError("extended master secret without session hash".to_string())
            })?;
            prf::extended_master_secret(self.version, pre_master, session_hash)?
        } else {
            prf::master_secret(self.version, pre_master, client_random, server_random)?
        };

        let mac_len = suite.mac_key_len();
        let key_len = suite.enc_key_len();
        let iv_len = suite.fixed_iv_len();
        let block_len = 2 * (mac_len + key_len + iv_len);

        let block = prf::key_block(self.version, &master, server_random, client_random, block_len)?;

        // client_mac || server_mac || client_key || server_key || client_iv || server_iv
        let (client_mac, rest) = block.split_at(mac_len);
        let (server_mac, rest) = rest.split_at(mac_len);
        let (client_key, rest) = rest.split_at(key_len);
        let (server_key, rest) = rest.split_at(key_len);
        let (client_iv, server_iv) = rest.split_at(iv_len);

        let client_cipher = Cipher::new(
            suite,
            CipherKeys {
                enc_key: client_key,
                mac_key: client_mac,
                fixed_iv: client_iv,
            },
        )?;
        let server_cipher = Cipher::new(
            suite,
            CipherKeys {
                enc_key: server_key,
                mac_key: server_mac,
                fixed_iv: server_iv,
            },
        )?;

        if is_client {
            self.pending_write = Some(client_cipher);
            self.pending_read = Some(server_cipher);
        } else {
            self.pending_write = Some(server_cipher);
            self.pending_read = Some(client_cipher);
        }

        self.master_secret = Some(master);
        Ok(())
    }

    /// Install the pending write cipher; called when sending CCS.
    pub fn activate_write(&mut self) -> Result<(), Error> {
        self.write = Some(self.pending_write.take().ok_or_else(|| {
            Error::InternalError("no pending write cipher at CCS".to_string())
        })?);
        Ok(())
    }

    /// Install the pending read cipher; called when CCS is received.
    pub fn activate_read(&mut self) -> Result<(), Error> {
        self.read = Some(self.pending_read.take().ok_or_else(|| {
            Error::InternalError("no pending read cipher at CCS".to_string())
        })?);
        Ok(())
    }

    pub fn has_write_cipher(&self) -> bool {
        self.write.is_some()
    }

    pub fn has_read_cipher(&self) -> bool {
        self.read.is_some()
    }

    pub fn has_pending_read(&self) -> bool {
        self.pending_read.is_some()
    }

    /// Encrypt an outbound fragment under the active write cipher.
    pub fn encrypt(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = self
            .write
            .as_ref()
            .ok_or_else(|| Error::InternalError("encrypt without active cipher".to_string()))?;
        cipher.encode(seq_nonce, content_type, version, plaintext)
    }

    /// Decrypt an inbound fragment under the active read cipher.
    pub fn decrypt(
        &self,
        seq_nonce: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = self.read.as_ref().ok_or(Error::BadRecordMac)?;
        cipher.decode(seq_nonce, content_type, version, fragment)
    }

    /// Worst-case record expansion once encryption is active.
    pub fn write_overhead(&self) -> usize {
        self.write.as_ref().map(|c| c.max_overhead()).unwrap_or(0)
    }

    pub fn pending_write_overhead(&self) -> usize {
        self.pending_write
            .as_ref()
            .map(|c| c.max_overhead())
            .unwrap_or(0)
    }

    /// `PRF(master, side label, transcript hash, 12)`.
    pub fn verify_data(
        &self,
        transcript: &[u8],
        for_client: bool,
    ) -> Result<[u8; VERIFY_DATA_LEN], Error> {
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("verify data without master".to_string()))?;

        let label = if for_client {
            "client finished"
        } else {
            "server finished"
        };
        let seed = prf::transcript_hash(self.version, transcript);
        let out = prf::prf(self.version, master, label, &seed, VERIFY_DATA_LEN)?;

        let mut verify_data = [0u8; VERIFY_DATA_LEN];
        verify_data.copy_from_slice(&out);
        Ok(verify_data)
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("version", &self.version)
            .field("suite", &self.suite)
            .field("ems", &self.extended_master_secret)
            .field("derived", &self.is_derived())
            .field("write_active", &self.has_write_cipher())
            .field("read_active", &self.has_read_cipher())
            .finish()
    }
}
