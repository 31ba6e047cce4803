use std::sync::Arc;
use std::time::Duration;

use crate::identity::Identity;
use crate::message::{CipherSuite, ProtocolVersion};
use crate::psk::PskStore;

/// Server-side PSK validator: maps a client identity to its key, or rejects.
pub type PskValidator = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Default MTU for IPv6 peers (minimum IPv6 MTU minus headers).
pub const DEFAULT_MTU_V6: usize = 1212;

/// Default MTU for IPv4 peers (conservative, never fragmented).
pub const DEFAULT_MTU_V4: usize = 508;

/// Immutable endpoint configuration, shared via `Arc`.
#[derive(Clone)]
pub struct Config {
    mtu: Option<usize>,
    maximum_version: ProtocolVersion,
    cipher_suites: Vec<CipherSuite>,
    psk: Option<Arc<PskStore>>,
    psk_validator: Option<PskValidator>,
    psk_identity_hint: Option<Vec<u8>>,
    identity: Option<Identity>,
    server_name: Option<String>,
    require_client_certificate: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_queue_tx: usize,
    workers: usize,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config {
                mtu: None,
                maximum_version: ProtocolVersion::DTLS1_2,
                cipher_suites: CipherSuite::all().to_vec(),
                psk: None,
                psk_validator: None,
                psk_identity_hint: None,
                identity: None,
                server_name: None,
                require_client_certificate: false,
                flight_start_rto: Duration::from_secs(1),
                flight_retries: 4,
                handshake_timeout: Duration::from_secs(40),
                max_queue_tx: 16,
                workers: 4,
            },
        }
    }

    /// MTU override, if any; endpoints fall back to the per-address-family
    /// default.
    #[inline(always)]
    pub fn mtu(&self) -> Option<usize> {
        self.mtu
    }

    /// Effective MTU for an address family.
    #[inline(always)]
    pub fn mtu_for(&self, is_ipv4: bool) -> usize {
        self.mtu
            .unwrap_or(if is_ipv4 { DEFAULT_MTU_V4 } else { DEFAULT_MTU_V6 })
    }

    /// Highest protocol version to offer (client) or select (server).
    #[inline(always)]
    pub fn maximum_version(&self) -> ProtocolVersion {
        self.maximum_version
    }

    /// Cipher suites offered (client) or accepted (server), in preference
    /// order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// PSK table for the PSK-family suites.
    #[inline(always)]
    pub fn psk(&self) -> Option<&Arc<PskStore>> {
        self.psk.as_ref()
    }

    /// Server-side PSK validator callback; consulted before the store.
    #[inline(always)]
    pub fn psk_validator(&self) -> Option<&PskValidator> {
        self.psk_validator.as_ref()
    }

    /// Identity hint a server sends in its PSK ServerKeyExchange.
    #[inline(always)]
    pub fn psk_identity_hint(&self) -> Option<&[u8]> {
        self.psk_identity_hint.as_deref()
    }

    /// Local certificate chain and private key.
    #[inline(always)]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Host name sent in the server_name extension.
    #[inline(always)]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// For a server, request (and require) a client certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// First retransmission timeout of every flight.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max retransmissions per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Deadline for the whole handshake, independent of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Max buffered outgoing datagrams.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Worker threads in the server dispatch pool.
    #[inline(always)]
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mtu", &self.mtu)
            .field("cipher_suites", &self.cipher_suites)
            .field("psk", &self.psk.is_some())
            .field("identity", &self.identity.is_some())
            .field("require_client_certificate", &self.require_client_certificate)
            .finish()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Override the MTU for all peers. Defaults to 508 (IPv4) / 1212 (IPv6).
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = Some(mtu);
        self
    }

    /// Cap the protocol version (e.g. `DTLS1_0` for legacy peers).
    /// Defaults to DTLS 1.2.
    pub fn maximum_version(mut self, version: ProtocolVersion) -> Self {
        self.config.maximum_version = version;
        self
    }

    /// Restrict or reorder the cipher suites. Defaults to all implemented
    /// suites.
    pub fn cipher_suites(mut self, suites: impl Into<Vec<CipherSuite>>) -> Self {
        self.config.cipher_suites = suites.into();
        self
    }

    /// Install the PSK table.
    pub fn psk(mut self, store: PskStore) -> Self {
        self.config.psk = Some(Arc::new(store));
        self
    }

    /// Install a server-side PSK validator callback.
    pub fn psk_validator(mut self, validator: PskValidator) -> Self {
        self.config.psk_validator = Some(validator);
        self
    }

    /// Identity hint for the server's PSK ServerKeyExchange.
    pub fn psk_identity_hint(mut self, hint: impl Into<Vec<u8>>) -> Self {
        self.config.psk_identity_hint = Some(hint.into());
        self
    }

    /// Local certificate chain and private key.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.config.identity = Some(identity);
        self
    }

    /// Host name for the server_name extension.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    /// Request a client certificate (server role). Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.config.require_client_certificate = require;
        self
    }

    /// First flight retransmission timeout. Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.config.flight_start_rto = rto;
        self
    }

    /// Max retransmissions per flight. Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.config.flight_retries = retries;
        self
    }

    /// Whole-handshake deadline. Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Max buffered outgoing datagrams. Defaults to 16.
    pub fn max_queue_tx(mut self, max: usize) -> Self {
        self.config.max_queue_tx = max;
        self
    }

    /// Server worker pool size. Defaults to 4.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
