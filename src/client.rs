//! The initiator state machine.
//!
//! Flight plan (RFC 6347):
//!
//! ```text
//! 1.  ClientHello (empty cookie)          -------->
//! 2.                                      <-------- HelloVerifyRequest
//! 3.  ClientHello (with cookie)           -------->
//! 4.                                      <-------- ServerHello,
//!                                                   Certificate*,
//!                                                   ServerKeyExchange*,
//!                                                   CertificateRequest*,
//!                                                   ServerHelloDone
//! 5.  Certificate*, ClientKeyExchange,
//!     CertificateVerify*,
//!     [ChangeCipherSpec], Finished        -------->
//! 6.                                      <-------- [ChangeCipherSpec],
//!                                                   Finished
//! ```
//!
//! The cookieless ClientHello and the HelloVerifyRequest stay out of the
//! handshake transcript.

use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::{self, EcdheKeyPair, PeerPublicKey};
use crate::engine::{Engine, InboundMessage};
use crate::message::{
    encode_point_formats, encode_signature_algorithms, encode_supported_groups, Alert, Certificate,
    CertificateVerify, CipherSuite, ClientHello, ClientKeyExchange, CompressionMethod, Cookie,
    DigitallySigned, Extension, ExtensionType, Finished, HelloVerifyRequest, KeyExchangeAlgorithm,
    MessageType, NamedCurve, ProtocolVersion, Random, ServerHello, ServerKeyExchange, SessionId,
    SignatureAndHashAlgorithm, POINT_FORMAT_UNCOMPRESSED,
};
use crate::{Config, Error, Output};

/// DTLS client endpoint state machine (sans-IO).
pub struct Client {
    engine: Engine,
    state: ClientState,

    /// Client random, fixed for the whole handshake (also across the
    /// cookie exchange).
    random: Random,

    /// Version offered in the most recent ClientHello; adopted from the
    /// HelloVerifyRequest when one arrives.
    offered_version: ProtocolVersion,

    session_id: SessionId,
    cookie: Cookie,
    hello_verified: bool,

    server_random: Option<Random>,
    suite: Option<CipherSuite>,

    server_certificates: Vec<Vec<u8>>,
    peer_key: Option<PeerPublicKey>,
    certificate_requested: bool,

    ecdhe_public: Option<Vec<u8>>,
    ecdhe_shared: Option<Zeroizing<Vec<u8>>>,
    psk_hint: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Send a ClientHello (first or cookied).
    SendClientHello,

    /// Collect ServerHello..ServerHelloDone (or a HelloVerifyRequest).
    AwaitServerFlight,

    /// Client flight is out; wait for the server CCS and Finished.
    AwaitServerFinished,

    /// Application data flows.
    Established,

    /// Torn down; all input is ignored.
    Closed,
}

impl Client {
    pub fn new(config: Arc<Config>) -> Client {
        let offered_version = config.maximum_version();
        let mut engine = Engine::new(config, true);
        engine.set_wire_version(offered_version);

        Client {
            engine,
            state: ClientState::SendClientHello,
            random: Random::generate(),
            offered_version,
            session_id: SessionId::empty(),
            cookie: Cookie::empty(),
            hello_verified: false,
            server_random: None,
            suite: None,
            server_certificates: Vec::new(),
            peer_key: None,
            certificate_requested: false,
            ecdhe_public: None,
            ecdhe_shared: None,
            psk_hint: None,
        }
    }

    /// Override the engine MTU (endpoints set this per address family).
    pub fn set_mtu(&mut self, mtu: usize) {
        self.engine.set_mtu(mtu);
    }

    pub fn is_established(&self) -> bool {
        self.state == ClientState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.state == ClientState::Closed
    }

    /// Process one received datagram.
    ///
    /// Records are handled one at a time with the state machine running in
    /// between, so a flight packed into a single datagram (key exchange,
    /// CCS, Finished) is consumed in order.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == ClientState::Closed {
            return Ok(());
        }

        let mut input = packet;
        loop {
            let slice = match crate::message::RecordSlice::try_read(input) {
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

    /// Drive time-based behavior (flight retransmission, deadlines).
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.state == ClientState::Closed {
            return Ok(());
        }

        // First call also kicks off the initial ClientHello.
        if let Err(e) = self.process_input() {
            return Err(self.fail(e));
        }

        match self.engine.handle_timeout(now) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ClientState::Closed;
                Err(e)
            }
        }
    }

    pub fn poll_output(&mut self, now: Instant) -> Output {
        self.engine.poll_output(now)
    }

    /// Send application data over the established session.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state != ClientState::Established {
            return Err(Error::UnexpectedMessage(
                "session not established".to_string(),
            ));
        }
        self.engine.send_application_data(data)
    }

    /// Best-effort close_notify and teardown.
    pub fn close(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        let _ = self.engine.send_alert(Alert::close_notify());
        self.state = ClientState::Closed;
    }

    // ------------------------------------------------------------------

    fn fail(&mut self, error: Error) -> Error {
        if self.state != ClientState::Closed {
            debug!("client failing handshake: {}", error);
            if !matches!(error, Error::Timeout(_) | Error::PeerAlert(_)) {
                let _ = self
                    .engine
                    .send_alert(Alert::fatal(error.alert_description()));
            }
            self.state = ClientState::Closed;
        }
        error
    }

    fn handle_peer_alert(&mut self, alert: Alert) -> Result<(), Error> {
        if alert.is_close_notify() {
            let _ = self.engine.send_alert(Alert::close_notify());
            self.state = ClientState::Closed;
            return Err(Error::PeerAlert(alert));
        }
        if alert.is_fatal() {
            self.state = ClientState::Closed;
            return Err(Error::PeerAlert(alert));
        }
        // Other warnings are advisory for the initiator.
        debug!("ignoring warning alert {:?}", alert);
        Ok(())
    }

    fn process_input(&mut self) -> Result<(), Error> {
        loop {
            let before = self.state;
            match self.state {
                ClientState::SendClientHello => {
                    self.send_client_hello()?;
                    self.state = ClientState::AwaitServerFlight;
                }
                ClientState::AwaitServerFlight => self.process_server_flight()?,
                ClientState::AwaitServerFinished => self.process_server_finished()?,
                ClientState::Established | ClientState::Closed => {}
            }
            if self.state == before {
                return Ok(());
            }
        }
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        self.engine.begin_flight();

        let mut ext_data = Vec::new();
        let mut ranges: SmallVec<[(ExtensionType, usize, usize); 8]> = SmallVec::new();

        let offers_ecc = self
            .engine
            .config()
            .cipher_suites()
            .iter()
            .any(|s| s.has_ecdhe());

        if offers_ecc {
            let start = ext_data.len();
            encode_supported_groups(NamedCurve::supported(), &mut ext_data);
            ranges.push((ExtensionType::SupportedGroups, start, ext_data.len()));

            let start = ext_data.len();
            encode_point_formats(&[POINT_FORMAT_UNCOMPRESSED], &mut ext_data);
            ranges.push((ExtensionType::EcPointFormats, start, ext_data.len()));
        }

        let start = ext_data.len();
        encode_signature_algorithms(SignatureAndHashAlgorithm::advertised(), &mut ext_data);
        ranges.push((ExtensionType::SignatureAlgorithms, start, ext_data.len()));

        if let Some(name) = self.engine.config().server_name() {
            // ServerNameList with one host_name entry.
            let start = ext_data.len();
            ext_data.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
            ext_data.push(0); // name_type host_name
            ext_data.extend_from_slice(&(name.len() as u16).to_be_bytes());
            ext_data.extend_from_slice(name.as_bytes());
            ranges.push((ExtensionType::ServerName, start, ext_data.len()));
        }

        // Empty-bodied extensions.
        let end = ext_data.len();
        ranges.push((ExtensionType::ExtendedMasterSecret, end, end));
        ranges.push((ExtensionType::SessionTicket, end, end));

        let extensions = ranges
            .iter()
            .map(|(ext_type, start, end)| Extension::new(*ext_type, &ext_data[*start..*end]))
            .collect();

        let hello = ClientHello {
            client_version: self.offered_version,
            random: self.random,
            session_id: self.session_id,
            cookie: self.cookie,
            cipher_suites: self.engine.config().cipher_suites().iter().copied().collect(),
            compression_methods: SmallVec::from_slice(&[CompressionMethod::Null]),
            extensions,
        };

        let mut body = Vec::new();
        hello.serialize(&mut body);
        self.engine.send_handshake(MessageType::ClientHello, &body)
    }

    fn process_server_flight(&mut self) -> Result<(), Error> {
        while let Some(message) = self.engine.take_message() {
            match message.msg_type {
                MessageType::HelloVerifyRequest => {
                    self.on_hello_verify(&message)?;
                    // Back to SendClientHello; the process loop re-enters.
                    return Ok(());
                }
                MessageType::ServerHello => self.on_server_hello(&message)?,
                MessageType::Certificate => self.on_certificate(&message)?,
                MessageType::ServerKeyExchange => self.on_server_key_exchange(&message)?,
                MessageType::CertificateRequest => {
                    if self.server_random.is_none() {
                        return Err(Error::UnexpectedMessage(
                            "CertificateRequest before ServerHello".to_string(),
                        ));
                    }
                    self.certificate_requested = true;
                }
                MessageType::ServerHelloDone => {
                    if self.server_random.is_none() {
                        return Err(Error::UnexpectedMessage(
                            "ServerHelloDone before ServerHello".to_string(),
                        ));
                    }
                    self.send_client_flight()?;
                    self.state = ClientState::AwaitServerFinished;
                    return Ok(());
                }
                other => {
                    return Err(Error::UnexpectedMessage(format!(
                        "{:?} while waiting for server flight",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn on_hello_verify(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if self.hello_verified {
            return Err(Error::UnexpectedMessage(
                "second HelloVerifyRequest".to_string(),
            ));
        }

        let (_, hvr) = HelloVerifyRequest::parse(&message.body)?;
        if !hvr.server_version.is_supported() {
            return Err(Error::UnsupportedVersion(hvr.server_version.as_u16()));
        }

        debug!(
            "cookie exchange: {} byte cookie, version {:?}",
            hvr.cookie.len(),
            hvr.server_version
        );

        // Adopt the advertised version and echo the cookie. The transcript
        // restarts: neither the first ClientHello nor the
        // HelloVerifyRequest participates.
        self.cookie = hvr.cookie;
        self.offered_version = hvr.server_version;
        self.engine.set_wire_version(hvr.server_version);
        self.hello_verified = true;
        self.engine.transcript_reset();
        self.state = ClientState::SendClientHello;
        Ok(())
    }

    fn on_server_hello(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if self.server_random.is_some() {
            return Err(Error::UnexpectedMessage("second ServerHello".to_string()));
        }

        let (_, hello) = ServerHello::parse(&message.body)?;

        if !hello.server_version.is_supported() {
            return Err(Error::UnsupportedVersion(hello.server_version.as_u16()));
        }
        let version = ProtocolVersion::older_of(hello.server_version, self.offered_version);
        self.engine.set_wire_version(version);

        if hello.compression_method != CompressionMethod::Null {
            return Err(Error::HandshakeFailure(
                "server selected non-null compression".to_string(),
            ));
        }

        if !self
            .engine
            .config()
            .cipher_suites()
            .contains(&hello.cipher_suite)
        {
            return Err(Error::HandshakeFailure(format!(
                "server selected unoffered suite {:?}",
                hello.cipher_suite
            )));
        }

        debug!(
            "negotiated {:?} at {:?}",
            hello.cipher_suite, version
        );

        self.suite = Some(hello.cipher_suite);
        self.server_random = Some(hello.random);
        self.session_id = hello.session_id;
        self.engine.crypto_mut().set_suite(hello.cipher_suite);

        if hello.has_extension(ExtensionType::ExtendedMasterSecret) {
            self.engine.crypto_mut().set_extended_master_secret(true);
        }

        Ok(())
    }

    fn on_certificate(&mut self, message: &InboundMessage) -> Result<(), Error> {
        let suite = self.require_suite()?;
        if !suite.requires_certificate() {
            return Err(Error::UnexpectedMessage(
                "Certificate in certificate-less suite".to_string(),
            ));
        }

        let (_, certificate) = Certificate::parse(&message.body)?;
        self.server_certificates = certificate
            .certificate_list
            .iter()
            .map(|c| c.to_vec())
            .collect();

        let leaf = self
            .server_certificates
            .first()
            .ok_or_else(|| Error::HandshakeFailure("empty server certificate".to_string()))?;

        self.peer_key = Some(PeerPublicKey::from_certificate(leaf)?);
        // Chain validation is the application's policy; surface the leaf.
        self.engine.push_peer_cert(leaf.clone());
        Ok(())
    }

    fn on_server_key_exchange(&mut self, message: &InboundMessage) -> Result<(), Error> {
        let suite = self.require_suite()?;
        let kx = suite
            .key_exchange()
            .ok_or_else(|| Error::InternalError("suite without key exchange".to_string()))?;
        let version = self.engine.wire_version();

        let (_, ske) = ServerKeyExchange::parse(&message.body, kx, version)?;

        match ske {
            ServerKeyExchange::Psk { identity_hint } => {
                self.psk_hint = Some(identity_hint.to_vec());
            }
            ServerKeyExchange::EcdhePsk {
                identity_hint,
                params,
            } => {
                if !identity_hint.is_empty() {
                    self.psk_hint = Some(identity_hint.to_vec());
                }
                self.run_ecdh(params.curve, params.public_point)?;
            }
            ServerKeyExchange::EcdheEcdsa { params, signed } => {
                let peer_key = self.peer_key.as_ref().ok_or_else(|| {
                    Error::UnexpectedMessage(
                        "ServerKeyExchange before Certificate".to_string(),
                    )
                })?;

                // The signature covers both randoms plus the ECDH params.
                let server_random = self.server_random.as_ref().ok_or_else(|| {
                    Error::UnexpectedMessage("ServerKeyExchange before ServerHello".to_string())
                })?;
                let mut signed_data = Vec::new();
                signed_data.extend_from_slice(self.random.as_bytes());
                signed_data.extend_from_slice(server_random.as_bytes());
                params.serialize(&mut signed_data);

                crypto::verify(
                    peer_key,
                    version,
                    signed.algorithm,
                    &signed_data,
                    signed.signature,
                )?;

                self.run_ecdh(params.curve, params.public_point)?;
            }
        }

        Ok(())
    }

    fn run_ecdh(&mut self, curve: NamedCurve, server_point: &[u8]) -> Result<(), Error> {
        if curve != NamedCurve::Secp256r1 {
            return Err(Error::HandshakeFailure(format!(
                "no common curve (server sent {:?})",
                curve
            )));
        }

        let keypair = EcdheKeyPair::generate();
        self.ecdhe_public = Some(keypair.public_bytes().to_vec());
        self.ecdhe_shared = Some(keypair.shared_secret(server_point)?);
        Ok(())
    }

    fn send_client_flight(&mut self) -> Result<(), Error> {
        let suite = self.require_suite()?;
        let kx = suite
            .key_exchange()
            .ok_or_else(|| Error::InternalError("suite without key exchange".to_string()))?;
        let version = self.engine.wire_version();

        self.engine.begin_flight();

        // Certificate, when requested. An empty chain is legal when we
        // have no identity.
        let own_chain: Vec<Vec<u8>> = self
            .engine
            .config()
            .identity()
            .map(|identity| identity.certificate_chain.clone())
            .unwrap_or_default();

        if self.certificate_requested {
            let certificate = Certificate {
                certificate_list: own_chain.iter().map(|c| c.as_slice()).collect(),
            };
            let mut body = Vec::new();
            certificate.serialize(&mut body);
            self.engine.send_handshake(MessageType::Certificate, &body)?;
        }

        // ClientKeyExchange plus the suite's pre-master secret.
        let (pre_master, cke_body) = self.build_key_exchange(kx)?;
        self.engine
            .send_handshake(MessageType::ClientKeyExchange, &cke_body)?;

        // The session hash for the extended master secret covers the
        // transcript up to and including ClientKeyExchange.
        let session_hash = self.engine.transcript_hash();
        self.engine.crypto_mut().capture_session_hash(session_hash);

        let server_random = *self
            .server_random
            .as_ref()
            .ok_or_else(|| Error::InternalError("flight without server random".to_string()))?;
        self.engine.crypto_mut().derive(
            &pre_master,
            self.random.as_bytes(),
            server_random.as_bytes(),
            true,
        )?;
        drop(pre_master);

        // CertificateVerify proves possession of the certificate's key.
        if self.certificate_requested && !own_chain.is_empty() {
            let identity = self
                .engine
                .config()
                .identity()
                .cloned()
                .ok_or_else(|| Error::InternalError("chain without identity".to_string()))?;

            let (algorithm, signature) =
                crypto::sign(&identity.private_key, version, self.engine.transcript())?;
            let verify = CertificateVerify::new(DigitallySigned::new(algorithm, &signature));
            let mut body = Vec::new();
            verify.serialize(&mut body);
            self.engine
                .send_handshake(MessageType::CertificateVerify, &body)?;
        }

        // Cipher rollover, then Finished under the new epoch.
        self.engine.send_ccs()?;

        let verify_data = self
            .engine
            .crypto()
            .verify_data(self.engine.transcript(), true)?;
        let mut body = Vec::new();
        Finished::new(&verify_data).serialize(&mut body);
        self.engine.send_handshake(MessageType::Finished, &body)?;

        Ok(())
    }

    fn build_key_exchange(
        &mut self,
        kx: KeyExchangeAlgorithm,
    ) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), Error> {
        let mut body = Vec::new();

        let pre_master = match kx {
            KeyExchangeAlgorithm::Psk => {
                let (identity, key) = self.resolve_psk()?;
                ClientKeyExchange::Psk {
                    identity: identity.as_slice(),
                }
                .serialize(&mut body);
                crypto::psk_pre_master(None, &key)
            }
            KeyExchangeAlgorithm::EcdhePsk => {
                let (identity, key) = self.resolve_psk()?;
                let shared = self.ecdhe_shared.take().ok_or_else(|| {
                    Error::UnexpectedMessage("no ServerKeyExchange for ECDHE-PSK".to_string())
                })?;
                let point = self.ecdhe_public.clone().ok_or_else(|| {
                    Error::InternalError("missing ECDHE public point".to_string())
                })?;
                ClientKeyExchange::EcdhePsk {
                    identity: identity.as_slice(),
                    public_point: point.as_slice(),
                }
                .serialize(&mut body);
                crypto::psk_pre_master(Some(&shared), &key)
            }
            KeyExchangeAlgorithm::EcdheEcdsa => {
                let shared = self.ecdhe_shared.take().ok_or_else(|| {
                    Error::UnexpectedMessage("no ServerKeyExchange for ECDHE".to_string())
                })?;
                let point = self.ecdhe_public.clone().ok_or_else(|| {
                    Error::InternalError("missing ECDHE public point".to_string())
                })?;
                ClientKeyExchange::Ecdhe {
                    public_point: point.as_slice(),
                }
                .serialize(&mut body);
                Zeroizing::new(shared.to_vec())
            }
            KeyExchangeAlgorithm::Rsa => {
                let peer_key = self
                    .peer_key
                    .as_ref()
                    .and_then(|k| k.rsa())
                    .ok_or_else(|| {
                        Error::HandshakeFailure("RSA suite without RSA server key".to_string())
                    })?;

                let pre_master = crypto::rsa_pre_master(self.offered_version);
                let encrypted = crypto::rsa_encrypt_pre_master(peer_key, &pre_master)?;
                ClientKeyExchange::Rsa {
                    encrypted_pre_master: encrypted.as_slice(),
                }
                .serialize(&mut body);
                pre_master
            }
        };

        Ok((pre_master, body))
    }

    fn resolve_psk(&self) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), Error> {
        let store = self
            .engine
            .config()
            .psk()
            .ok_or_else(|| Error::HandshakeFailure("no PSK store configured".to_string()))?;

        if let Some(hint) = &self.psk_hint {
            if let Some(key) = store.lookup(hint) {
                return Ok((hint.clone(), Zeroizing::new(key)));
            }
        }

        let (identity, key) = store
            .pick_any()
            .ok_or_else(|| Error::HandshakeFailure("PSK store is empty".to_string()))?;
        Ok((identity, Zeroizing::new(key)))
    }

    fn process_server_finished(&mut self) -> Result<(), Error> {
        let _ = self.engine.take_ccs();

        while let Some(message) = self.engine.take_message() {
            match message.msg_type {
                MessageType::NewSessionTicket => {
                    // Parsed and ignored: no resumption.
                    debug!("ignoring NewSessionTicket");
                }
                MessageType::Finished => {
                    let (_, finished) = Finished::parse(&message.body)?;

                    let expected = self
                        .engine
                        .crypto()
                        .verify_data(self.engine.transcript(), false)?;

                    if expected[..].ct_eq(&finished.verify_data[..]).unwrap_u8() != 1 {
                        return Err(Error::DecryptError);
                    }

                    self.engine.transcript_add_deferred(
                        MessageType::Finished,
                        message.message_seq,
                        &message.body,
                    );
                    self.engine.stop_flight_timers();
                    self.engine.push_connected();
                    debug!("client handshake established");
                    self.state = ClientState::Established;
                    return Ok(());
                }
                other => {
                    return Err(Error::UnexpectedMessage(format!(
                        "{:?} while waiting for server Finished",
                        other
                    )));
                }
            }
        }

        Ok(())
    }

    fn require_suite(&self) -> Result<CipherSuite, Error> {
        self.suite.ok_or_else(|| {
            Error::UnexpectedMessage("message before ServerHello".to_string())
        })
    }
}
