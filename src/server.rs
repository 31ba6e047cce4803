//! The responder state machine and the stateless cookie exchange.
//!
//! The responder commits no per-peer state until the client proves address
//! ownership: the HelloVerifyRequest cookie is
//! `HMAC-SHA256(secret, peer_address || client_random)`, so it can be
//! verified without remembering the first ClientHello. When driven through
//! the UDP endpoint the cookie check happens before a session is even
//! allocated; driven directly (sans-IO), the same exchange runs inside this
//! state machine.

use std::sync::Arc;
use std::time::Instant;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use smallvec::SmallVec;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::{self, EcdheKeyPair, PeerPublicKey};
use crate::engine::{Engine, InboundMessage};
use crate::message::{
    encode_point_formats, parse_supported_groups, Alert, Certificate, CertificateRequest,
    CertificateVerify, CipherSuite, ClientCertificateType, ClientHello, ClientKeyExchange,
    ContentType, Cookie, DigitallySigned, DtlsRecord, EcdheParams, Extension, ExtensionType,
    Finished, Handshake, HandshakeHeader, HelloVerifyRequest, KeyExchangeAlgorithm, MessageType,
    NamedCurve, ProtocolVersion, Random, RecordSlice, ServerHello, ServerKeyExchange, SessionId,
    SignatureAlgorithm, SignatureAndHashAlgorithm, POINT_FORMAT_UNCOMPRESSED,
};
use crate::{Config, Error, Output};

type HmacSha256 = Hmac<Sha256>;

/// Cookie length issued in HelloVerifyRequest (full HMAC-SHA256 output).
pub(crate) const COOKIE_LEN: usize = 32;

/// DTLS server endpoint state machine for one peer (sans-IO).
pub struct Server {
    engine: Engine,
    state: ServerState,

    random: Random,
    session_id: SessionId,

    cookie_secret: [u8; 32],
    peer_id: Vec<u8>,

    client_random: Option<Random>,
    /// Version the client offered in its ClientHello (RSA pre-master check).
    client_version: ProtocolVersion,
    suite: Option<CipherSuite>,

    ecdhe: Option<EcdheKeyPair>,
    certificate_requested: bool,
    client_certificates: Vec<Vec<u8>>,
    client_key: Option<PeerPublicKey>,

    key_exchange_done: bool,
    certificate_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    /// Await a ClientHello (cookieless or cookied).
    AwaitClientHello,

    /// Server flight is out; collect the client flight up to Finished.
    AwaitClientFlight,

    /// Application data flows.
    Established,

    /// Torn down; all input is ignored.
    Closed,
}

impl Server {
    /// A standalone server for one peer; generates its own cookie secret.
    pub fn new(config: Arc<Config>, peer: impl Into<String>) -> Server {
        let mut cookie_secret = [0u8; 32];
        OsRng.fill_bytes(&mut cookie_secret);
        Self::with_cookie_secret(config, peer, cookie_secret, false)
    }

    /// A server whose cookie exchange already happened statelessly in the
    /// endpoint layer: record and message sequence 0 are spent on both
    /// sides, and the next ClientHello must carry a valid cookie.
    pub fn with_cookie_secret(
        config: Arc<Config>,
        peer: impl Into<String>,
        cookie_secret: [u8; 32],
        hello_verified: bool,
    ) -> Server {
        let mut engine = Engine::new(config, false);
        if hello_verified {
            engine.skip_hello_verify();
        }

        Server {
            engine,
            state: ServerState::AwaitClientHello,
            random: Random::generate(),
            session_id: SessionId::empty(),
            cookie_secret,
            peer_id: peer.into().into_bytes(),
            client_random: None,
            client_version: ProtocolVersion::DTLS1_2,
            suite: None,
            ecdhe: None,
            certificate_requested: false,
            client_certificates: Vec::new(),
            client_key: None,
            key_exchange_done: false,
            certificate_verified: false,
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.engine.set_mtu(mtu);
    }

    pub fn is_established(&self) -> bool {
        self.state == ServerState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.state == ServerState::Closed
    }

    /// Process one received datagram, record by record, with the state
    /// machine running between records (a whole client flight can share
    /// one datagram).
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == ServerState::Closed {
            return Ok(());
        }

        let mut input = packet;
        loop {
            let slice = match RecordSlice::try_read(input) {
                Ok(Some(slice)) => slice,
                Ok(None) => break,
                Err(e) => {
                    debug!("dropping truncated datagram tail: {}", e);
                    break;
                }
            };
            input = slice.rest;

            match self.engine.process_record(slice.slice) {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    debug!("dropping record: {}", e);
                    continue;
                }
                Err(e) => return Err(self.fail(e)),
            }

            if let Some(alert) = self.engine.take_alert() {
                return self.handle_peer_alert(alert);
            }

            if let Err(e) = self.process_input() {
                return Err(self.fail(e));
            }
            if let Err(e) = self.engine.flush_stashed() {
                return Err(self.fail(e));
            }
        }

        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.state == ServerState::Closed {
            return Ok(());
        }
        match self.engine.handle_timeout(now) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ServerState::Closed;
                Err(e)
            }
        }
    }

    pub fn poll_output(&mut self, now: Instant) -> Output {
        self.engine.poll_output(now)
    }

    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state != ServerState::Established {
            return Err(Error::UnexpectedMessage(
                "session not established".to_string(),
            ));
        }
        self.engine.send_application_data(data)
    }

    pub fn close(&mut self) {
        if self.state == ServerState::Closed {
            return;
        }
        let _ = self.engine.send_alert(Alert::close_notify());
        self.state = ServerState::Closed;
    }

    // ------------------------------------------------------------------

    fn fail(&mut self, error: Error) -> Error {
        if self.state != ServerState::Closed {
            debug!("server failing handshake: {}", error);
            if !matches!(error, Error::Timeout(_) | Error::PeerAlert(_)) {
                let _ = self
                    .engine
                    .send_alert(Alert::fatal(error.alert_description()));
            }
            self.state = ServerState::Closed;
        }
        error
    }

    fn handle_peer_alert(&mut self, alert: Alert) -> Result<(), Error> {
        // The responder ends the session on any alert, warnings included.
        // Stricter than RFC 6347 requires; kept for behavioral parity with
        // the original deployment.
        if alert.is_close_notify() {
            let _ = self.engine.send_alert(Alert::close_notify());
        }
        self.state = ServerState::Closed;
        Err(Error::PeerAlert(alert))
    }

    fn process_input(&mut self) -> Result<(), Error> {
        loop {
            let before = self.state;
            match self.state {
                ServerState::AwaitClientHello => self.process_client_hello()?,
                ServerState::AwaitClientFlight => self.process_client_flight()?,
                ServerState::Established | ServerState::Closed => {}
            }
            if self.state == before {
                return Ok(());
            }
        }
    }

    fn process_client_hello(&mut self) -> Result<(), Error> {
        while let Some(message) = self.engine.take_message() {
            if message.msg_type != MessageType::ClientHello {
                return Err(Error::UnexpectedMessage(format!(
                    "{:?} while waiting for ClientHello",
                    message.msg_type
                )));
            }

            let (_, hello) = ClientHello::parse(&message.body)?;

            let maximum = self.engine.config().maximum_version();
            let version = negotiate_version(hello.client_version, maximum)?;

            if !hello.offers_null_compression() {
                return Err(Error::HandshakeFailure(
                    "client does not offer null compression".to_string(),
                ));
            }

            if !verify_cookie(&self.cookie_secret, &self.peer_id, &hello.random, &hello.cookie)
            {
                debug!("cookie missing or invalid, sending HelloVerifyRequest");
                // The cookieless ClientHello is not part of the transcript.
                self.engine.transcript_reset();
                self.send_hello_verify(version, &hello.random)?;
                continue;
            }

            self.client_version = hello.client_version;
            self.client_random = Some(hello.random);
            self.engine.set_wire_version(version);

            let ems_offered = hello
                .find_extension(ExtensionType::ExtendedMasterSecret)
                .is_some();

            // If the client constrains curves, ECDHE needs secp256r1 in
            // the list.
            let client_supports_p256 = match hello
                .find_extension(ExtensionType::SupportedGroups)
            {
                Some(ext) => parse_supported_groups(ext.extension_data)
                    .map(|(_, curves)| curves.contains(&NamedCurve::Secp256r1))
                    .unwrap_or(false),
                None => true,
            };

            let suite = self.select_suite(&hello.cipher_suites, client_supports_p256)?;
            debug!("selected {:?} at {:?}", suite, version);

            self.suite = Some(suite);
            self.engine.crypto_mut().set_suite(suite);
            self.engine
                .crypto_mut()
                .set_extended_master_secret(ems_offered);

            self.send_server_flight(suite, ems_offered)?;
            self.state = ServerState::AwaitClientFlight;
            return Ok(());
        }
        Ok(())
    }

    fn send_hello_verify(
        &mut self,
        version: ProtocolVersion,
        client_random: &Random,
    ) -> Result<(), Error> {
        self.engine.set_wire_version(version);
        self.engine.begin_flight();

        let cookie = compute_cookie(&self.cookie_secret, &self.peer_id, client_random);
        let hvr = HelloVerifyRequest::new(version, cookie);

        let mut body = Vec::new();
        hvr.serialize(&mut body);
        self.engine
            .send_handshake(MessageType::HelloVerifyRequest, &body)
    }

    fn select_suite(
        &self,
        offered: &[CipherSuite],
        client_supports_p256: bool,
    ) -> Result<CipherSuite, Error> {
        let config = self.engine.config();

        // Client preference order, filtered by configuration and by what
        // our credentials can actually serve.
        for suite in offered {
            if !config.cipher_suites().contains(suite) {
                continue;
            }
            if !self.suite_usable(*suite, client_supports_p256) {
                continue;
            }
            return Ok(*suite);
        }

        Err(Error::HandshakeFailure(
            "no mutually acceptable cipher suite".to_string(),
        ))
    }

    fn suite_usable(&self, suite: CipherSuite, client_supports_p256: bool) -> bool {
        let config = self.engine.config();

        if suite.has_ecdhe() && !client_supports_p256 {
            return false;
        }

        if suite.uses_psk() && config.psk().is_none() && config.psk_validator().is_none() {
            return false;
        }

        match suite.key_exchange() {
            Some(KeyExchangeAlgorithm::EcdheEcdsa) => config
                .identity()
                .map(|i| i.private_key.algorithm() == SignatureAlgorithm::Ecdsa)
                .unwrap_or(false),
            Some(KeyExchangeAlgorithm::Rsa) => config
                .identity()
                .map(|i| i.private_key.algorithm() == SignatureAlgorithm::Rsa)
                .unwrap_or(false),
            Some(_) => true,
            None => false,
        }
    }

    fn send_server_flight(
        &mut self,
        suite: CipherSuite,
        ems_offered: bool,
    ) -> Result<(), Error> {
        let version = self.engine.wire_version();
        self.engine.begin_flight();

        // ServerHello with the extensions we accept.
        let mut ext_data = Vec::new();
        let mut ranges: SmallVec<[(ExtensionType, usize, usize); 4]> = SmallVec::new();

        if ems_offered {
            let end = ext_data.len();
            ranges.push((ExtensionType::ExtendedMasterSecret, end, end));
        }
        if suite.has_ecdhe() {
            let start = ext_data.len();
            encode_point_formats(&[POINT_FORMAT_UNCOMPRESSED], &mut ext_data);
            ranges.push((ExtensionType::EcPointFormats, start, ext_data.len()));
        }

        let extensions = ranges
            .iter()
            .map(|(ext_type, start, end)| Extension::new(*ext_type, &ext_data[*start..*end]))
            .collect();

        let hello = ServerHello {
            server_version: version,
            random: self.random,
            session_id: self.session_id,
            cipher_suite: suite,
            compression_method: crate::message::CompressionMethod::Null,
            extensions,
        };
        let mut body = Vec::new();
        hello.serialize(&mut body);
        self.engine.send_handshake(MessageType::ServerHello, &body)?;

        // Certificate for the certificate-bearing suites.
        if suite.requires_certificate() {
            let chain: Vec<Vec<u8>> = self
                .engine
                .config()
                .identity()
                .map(|identity| identity.certificate_chain.clone())
                .ok_or_else(|| {
                    Error::HandshakeFailure("suite requires a server certificate".to_string())
                })?;

            let certificate = Certificate {
                certificate_list: chain.iter().map(|c| c.as_slice()).collect(),
            };
            let mut body = Vec::new();
            certificate.serialize(&mut body);
            self.engine.send_handshake(MessageType::Certificate, &body)?;
        }

        // ServerKeyExchange per key exchange family.
        match suite.key_exchange() {
            Some(KeyExchangeAlgorithm::Psk) => {
                // Only sent when an identity hint is configured.
                let hint = self
                    .engine
                    .config()
                    .psk_identity_hint()
                    .map(|h| h.to_vec());
                if let Some(hint) = hint {
                    let ske = ServerKeyExchange::Psk {
                        identity_hint: &hint,
                    };
                    let mut body = Vec::new();
                    ske.serialize(&mut body);
                    self.engine
                        .send_handshake(MessageType::ServerKeyExchange, &body)?;
                }
            }
            Some(KeyExchangeAlgorithm::EcdhePsk) => {
                let keypair = EcdheKeyPair::generate();
                let point = keypair.public_bytes().to_vec();
                self.ecdhe = Some(keypair);

                let hint = self
                    .engine
                    .config()
                    .psk_identity_hint()
                    .map(|h| h.to_vec())
                    .unwrap_or_default();

                let ske = ServerKeyExchange::EcdhePsk {
                    identity_hint: &hint,
                    params: EcdheParams {
                        curve: NamedCurve::Secp256r1,
                        public_point: &point,
                    },
                };
                let mut body = Vec::new();
                ske.serialize(&mut body);
                self.engine
                    .send_handshake(MessageType::ServerKeyExchange, &body)?;
            }
            Some(KeyExchangeAlgorithm::EcdheEcdsa) => {
                let keypair = EcdheKeyPair::generate();
                let point = keypair.public_bytes().to_vec();
                self.ecdhe = Some(keypair);

                let params = EcdheParams {
                    curve: NamedCurve::Secp256r1,
                    public_point: &point,
                };

                let client_random = self.client_random.as_ref().ok_or_else(|| {
                    Error::InternalError("flight without client random".to_string())
                })?;
                let mut signed_data = Vec::new();
                signed_data.extend_from_slice(client_random.as_bytes());
                signed_data.extend_from_slice(self.random.as_bytes());
                params.serialize(&mut signed_data);

                let identity = self.engine.config().identity().cloned().ok_or_else(|| {
                    Error::HandshakeFailure("ECDHE-ECDSA without identity".to_string())
                })?;
                let (algorithm, signature) =
                    crypto::sign(&identity.private_key, version, &signed_data)?;

                let ske = ServerKeyExchange::EcdheEcdsa {
                    params,
                    signed: DigitallySigned::new(algorithm, &signature),
                };
                let mut body = Vec::new();
                ske.serialize(&mut body);
                self.engine
                    .send_handshake(MessageType::ServerKeyExchange, &body)?;
            }
            Some(KeyExchangeAlgorithm::Rsa) | None => {}
        }

        // CertificateRequest for certificate-bearing suites on demand.
        if self.engine.config().require_client_certificate() && suite.requires_certificate() {
            self.certificate_requested = true;

            let request = CertificateRequest {
                certificate_types: SmallVec::from_slice(&[
                    ClientCertificateType::RsaSign,
                    ClientCertificateType::EcdsaSign,
                ]),
                signature_algorithms: SignatureAndHashAlgorithm::advertised()
                    .iter()
                    .copied()
                    .collect(),
                certificate_authorities: &[],
            };
            let mut body = Vec::new();
            request.serialize(version, &mut body);
            self.engine
                .send_handshake(MessageType::CertificateRequest, &body)?;
        }

        // ServerHelloDone closes the flight.
        self.engine
            .send_handshake(MessageType::ServerHelloDone, &[])?;

        Ok(())
    }

    fn process_client_flight(&mut self) -> Result<(), Error> {
        let _ = self.engine.take_ccs();

        while let Some(message) = self.engine.take_message() {
            match message.msg_type {
                MessageType::Certificate => self.on_client_certificate(&message)?,
                MessageType::ClientKeyExchange => self.on_client_key_exchange(&message)?,
                MessageType::CertificateVerify => self.on_certificate_verify(&message)?,
                MessageType::Finished => {
                    self.on_client_finished(&message)?;
                    return Ok(());
                }
                other => {
                    return Err(Error::UnexpectedMessage(format!(
                        "{:?} in client flight",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn on_client_certificate(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if !self.certificate_requested || self.key_exchange_done {
            return Err(Error::UnexpectedMessage(
                "unsolicited client Certificate".to_string(),
            ));
        }

        let (_, certificate) = Certificate::parse(&message.body)?;
        self.client_certificates = certificate
            .certificate_list
            .iter()
            .map(|c| c.to_vec())
            .collect();

        match self.client_certificates.first() {
            Some(leaf) => {
                self.client_key = Some(PeerPublicKey::from_certificate(leaf)?);
                self.engine.push_peer_cert(leaf.clone());
            }
            None => {
                // Requested but refused.
                return Err(Error::HandshakeFailure(
                    "client sent no certificate".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn on_client_key_exchange(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if self.key_exchange_done {
            return Err(Error::UnexpectedMessage(
                "second ClientKeyExchange".to_string(),
            ));
        }
        if self.certificate_requested && self.client_certificates.is_empty() {
            return Err(Error::UnexpectedMessage(
                "ClientKeyExchange before requested Certificate".to_string(),
            ));
        }

        let suite = self
            .suite
            .ok_or_else(|| Error::InternalError("flight without suite".to_string()))?;
        let kx = suite
            .key_exchange()
            .ok_or_else(|| Error::InternalError("suite without key exchange".to_string()))?;

        let (_, cke) = ClientKeyExchange::parse(&message.body, kx)?;

        let pre_master: Zeroizing<Vec<u8>> = match cke {
            ClientKeyExchange::Psk { identity } => {
                let key = self.resolve_psk(identity)?;
                crypto::psk_pre_master(None, &key)
            }
            ClientKeyExchange::EcdhePsk {
                identity,
                public_point,
            } => {
                let key = self.resolve_psk(identity)?;
                let keypair = self.ecdhe.take().ok_or_else(|| {
                    Error::InternalError("ECDHE state missing".to_string())
                })?;
                let shared = keypair.shared_secret(public_point)?;
                crypto::psk_pre_master(Some(&shared), &key)
            }
            ClientKeyExchange::Ecdhe { public_point } => {
                let keypair = self.ecdhe.take().ok_or_else(|| {
                    Error::InternalError("ECDHE state missing".to_string())
                })?;
                let shared = keypair.shared_secret(public_point)?;
                Zeroizing::new(shared.to_vec())
            }
            ClientKeyExchange::Rsa {
                encrypted_pre_master,
            } => {
                let identity = self.engine.config().identity().ok_or_else(|| {
                    Error::InternalError("RSA suite without identity".to_string())
                })?;
                let crate::identity::PrivateKey::Rsa(ref key) = *identity.private_key else {
                    return Err(Error::InternalError(
                        "RSA suite with non-RSA key".to_string(),
                    ));
                };
                crypto::rsa_decrypt_pre_master(key, encrypted_pre_master, self.client_version)
            }
        };

        // Session hash covers the transcript through ClientKeyExchange.
        let session_hash = self.engine.transcript_hash();
        self.engine.crypto_mut().capture_session_hash(session_hash);

        let client_random = *self
            .client_random
            .as_ref()
            .ok_or_else(|| Error::InternalError("flight without client random".to_string()))?;
        self.engine.crypto_mut().derive(
            &pre_master,
            client_random.as_bytes(),
            self.random.as_bytes(),
            false,
        )?;

        self.key_exchange_done = true;
        Ok(())
    }

    fn on_certificate_verify(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if !self.key_exchange_done || self.client_certificates.is_empty() {
            return Err(Error::UnexpectedMessage(
                "CertificateVerify without certificate and key exchange".to_string(),
            ));
        }

        let version = self.engine.wire_version();
        let (_, verify) = CertificateVerify::parse(&message.body, version)?;

        let client_key = self
            .client_key
            .as_ref()
            .ok_or_else(|| Error::InternalError("certificate without key".to_string()))?;

        // The signature covers the transcript preceding CertificateVerify.
        crypto::verify(
            client_key,
            version,
            verify.signed.algorithm,
            self.engine.transcript(),
            verify.signed.signature,
        )?;

        self.engine.transcript_add_deferred(
            MessageType::CertificateVerify,
            message.message_seq,
            &message.body,
        );
        self.certificate_verified = true;
        Ok(())
    }

    fn on_client_finished(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if !self.key_exchange_done {
            return Err(Error::UnexpectedMessage(
                "Finished before ClientKeyExchange".to_string(),
            ));
        }
        if !self.client_certificates.is_empty() && !self.certificate_verified {
            return Err(Error::UnexpectedMessage(
                "Finished without CertificateVerify".to_string(),
            ));
        }

        // TODO: keep the final flight around and retransmit it when a
        // duplicate client Finished arrives (lost server Finished case).
        let (_, finished) = Finished::parse(&message.body)?;

        let expected = self
            .engine
            .crypto()
            .verify_data(self.engine.transcript(), true)?;
        if expected[..].ct_eq(&finished.verify_data[..]).unwrap_u8() != 1 {
            return Err(Error::DecryptError);
        }

        self.engine.transcript_add_deferred(
            MessageType::Finished,
            message.message_seq,
            &message.body,
        );

        // Final flight: our CCS and Finished over the full transcript.
        self.engine.begin_flight();
        self.engine.send_ccs()?;

        let verify_data = self
            .engine
            .crypto()
            .verify_data(self.engine.transcript(), false)?;
        let mut body = Vec::new();
        Finished::new(&verify_data).serialize(&mut body);
        self.engine.send_handshake(MessageType::Finished, &body)?;

        self.engine.stop_flight_timers();
        self.engine.push_connected();
        debug!("server handshake established");
        self.state = ServerState::Established;
        Ok(())
    }

    fn resolve_psk(&self, identity: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let config = self.engine.config();

        if let Some(validator) = config.psk_validator() {
            if let Some(key) = validator(identity) {
                return Ok(Zeroizing::new(key));
            }
        }

        if let Some(store) = config.psk() {
            if let Some(key) = store.lookup(identity) {
                return Ok(Zeroizing::new(key));
            }
        }

        Err(Error::HandshakeFailure(format!(
            "unknown PSK identity ({} bytes)",
            identity.len()
        )))
    }
}

/// Choose the session version for a client offer: the older of the offer
/// and our maximum, rejecting anything older than DTLS 1.0. An offer newer
/// than our maximum (numerically lower on the DTLS wire) negotiates down.
pub(crate) fn negotiate_version(
    client: ProtocolVersion,
    maximum: ProtocolVersion,
) -> Result<ProtocolVersion, Error> {
    if client.is_supported() {
        Ok(ProtocolVersion::older_of(client, maximum))
    } else if client.as_u16() < maximum.as_u16() {
        Ok(maximum)
    } else {
        Err(Error::UnsupportedVersion(client.as_u16()))
    }
}

/// `HMAC-SHA256(secret, peer_address || client_random)`, truncated to the
/// cookie length.
pub(crate) fn compute_cookie(
    secret: &[u8; 32],
    peer_id: &[u8],
    client_random: &Random,
) -> Cookie {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(peer_id);
    mac.update(client_random.as_bytes());
    let digest = mac.finalize().into_bytes();

    Cookie::try_new(&digest[..COOKIE_LEN]).expect("cookie fits capacity")
}

/// Constant-time check of an echoed cookie.
pub(crate) fn verify_cookie(
    secret: &[u8; 32],
    peer_id: &[u8],
    client_random: &Random,
    cookie: &Cookie,
) -> bool {
    if cookie.is_empty() {
        return false;
    }
    let expected = compute_cookie(secret, peer_id, client_random);
    expected[..].ct_eq(&cookie[..]).unwrap_u8() == 1
}

/// Outcome of the endpoint's stateless look at a datagram from an unknown
/// peer.
pub(crate) enum StatelessVerdict {
    /// Send this datagram back (a HelloVerifyRequest) and forget the peer.
    Reply(Vec<u8>),
    /// The cookie checks out: allocate a session and feed it the datagram.
    Accept,
    /// Not a usable first datagram; ignore it.
    Drop,
}

/// Inspect the first record of a datagram from an unknown peer without
/// committing any state. Only a complete, unfragmented ClientHello in a
/// cleartext record is considered.
pub(crate) fn stateless_cookie_check(
    datagram: &[u8],
    secret: &[u8; 32],
    peer_id: &[u8],
    maximum: ProtocolVersion,
) -> StatelessVerdict {
    let Ok(Some(slice)) = RecordSlice::try_read(datagram) else {
        return StatelessVerdict::Drop;
    };
    let Ok((_, record)) = DtlsRecord::parse(slice.slice) else {
        return StatelessVerdict::Drop;
    };

    if record.content_type != ContentType::Handshake || record.sequence.epoch != 0 {
        return StatelessVerdict::Drop;
    }

    let Ok((_, handshake)) = Handshake::parse(record.fragment) else {
        return StatelessVerdict::Drop;
    };

    if handshake.header.msg_type != MessageType::ClientHello
        || handshake.header.fragment_offset != 0
        || handshake.header.fragment_length != handshake.header.length
    {
        return StatelessVerdict::Drop;
    }

    let Ok((_, hello)) = ClientHello::parse(handshake.body) else {
        return StatelessVerdict::Drop;
    };

    if verify_cookie(secret, peer_id, &hello.random, &hello.cookie) {
        return StatelessVerdict::Accept;
    }

    let Ok(version) = negotiate_version(hello.client_version, maximum) else {
        return StatelessVerdict::Drop;
    };

    // Build the HelloVerifyRequest reply, mirroring the client's record
    // and message sequence numbers (RFC 6347 §4.2.1).
    let cookie = compute_cookie(secret, peer_id, &hello.random);
    let hvr = HelloVerifyRequest::new(version, cookie);

    let mut hvr_body = Vec::new();
    hvr.serialize(&mut hvr_body);

    let header = HandshakeHeader::whole(
        MessageType::HelloVerifyRequest,
        handshake.header.message_seq,
        hvr_body.len() as u32,
    );
    let mut fragment = Vec::with_capacity(HandshakeHeader::LEN + hvr_body.len());
    header.serialize(&mut fragment);
    fragment.extend_from_slice(&hvr_body);

    let reply_record = DtlsRecord {
        content_type: ContentType::Handshake,
        version,
        sequence: record.sequence,
        length: fragment.len() as u16,
        fragment: &fragment,
    };
    let mut reply = Vec::new();
    reply_record.serialize(&mut reply);

    StatelessVerdict::Reply(reply)
}
