//! Shared helpers for driving the Sans-IO client and server against each
//! other, datagram by datagram.

#![allow(unused)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use minidtls::message::CipherSuite;
use minidtls::{Client, Config, Error, Identity, Output, PskStore, Server};

/// PSK fixture shared by client and server in the PSK scenarios.
pub const PSK_IDENTITY: &[u8] = b"Client_identity";
pub const PSK_KEY: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    0x10,
];

/// Arbitrary peer address used for cookie binding in Sans-IO tests.
pub const PEER: &str = "198.51.100.7:5684";

/// Uniform driver interface over the two state machines.
pub trait Endpoint {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error>;
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error>;
    fn poll_output(&mut self, now: Instant) -> Output;
}

impl Endpoint for Client {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Client::handle_packet(self, packet)
    }
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Client::handle_timeout(self, now)
    }
    fn poll_output(&mut self, now: Instant) -> Output {
        Client::poll_output(self, now)
    }
}

impl Endpoint for Server {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Server::handle_packet(self, packet)
    }
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Server::handle_timeout(self, now)
    }
    fn poll_output(&mut self, now: Instant) -> Output {
        Server::poll_output(self, now)
    }
}

/// Everything an endpoint produced in one drain pass.
#[derive(Default, Debug)]
pub struct Drained {
    pub packets: Vec<Vec<u8>>,
    pub connected: bool,
    pub peer_cert: Option<Vec<u8>>,
    pub app_data: Vec<Vec<u8>>,
}

/// Poll until `Timeout`, collecting everything. Primes the engine timers
/// first (`poll_output` reports `Timeout(now)` until `handle_timeout` has
/// armed the current flight's timer).
pub fn drain<E: Endpoint>(endpoint: &mut E, now: Instant) -> Drained {
    let _ = endpoint.handle_timeout(now);
    let mut out = Drained::default();
    loop {
        match endpoint.poll_output(now) {
            Output::Packet(p) => out.packets.push(p),
            Output::Connected => out.connected = true,
            Output::PeerCert(cert) => out.peer_cert = Some(cert),
            Output::ApplicationData(data) => out.app_data.push(data),
            Output::Timeout(_) => break,
        }
    }
    out
}

/// A client/server pair shuttling datagrams in memory.
pub struct Session {
    pub client: Client,
    pub server: Server,
    pub now: Instant,
    pub client_app: Vec<Vec<u8>>,
    pub server_app: Vec<Vec<u8>>,
    pub client_saw_cert: Option<Vec<u8>>,
    pub server_saw_cert: Option<Vec<u8>>,
    /// Every datagram sent client -> server, in order.
    pub to_server: Vec<Vec<u8>>,
    /// Every datagram sent server -> client, in order.
    pub to_client: Vec<Vec<u8>>,
}

impl Session {
    pub fn new(client_config: Arc<Config>, server_config: Arc<Config>) -> Session {
        Session {
            client: Client::new(client_config),
            server: Server::new(server_config, PEER),
            now: Instant::now(),
            client_app: Vec::new(),
            server_app: Vec::new(),
            client_saw_cert: None,
            server_saw_cert: None,
            to_server: Vec::new(),
            to_client: Vec::new(),
        }
    }

    /// One exchange round: client output to server, server output to client.
    pub fn step(&mut self) -> Result<(), Error> {
        self.client.handle_timeout(self.now)?;
        let out = drain(&mut self.client, self.now);
        self.client_app.extend(out.app_data);
        if out.peer_cert.is_some() {
            self.client_saw_cert = out.peer_cert;
        }
        for packet in out.packets {
            self.server.handle_packet(&packet)?;
            self.to_server.push(packet);
        }

        self.server.handle_timeout(self.now)?;
        let out = drain(&mut self.server, self.now);
        self.server_app.extend(out.app_data);
        if out.peer_cert.is_some() {
            self.server_saw_cert = out.peer_cert;
        }
        for packet in out.packets {
            self.client.handle_packet(&packet)?;
            self.to_client.push(packet);
        }

        Ok(())
    }

    /// Run rounds until both sides are established.
    pub fn establish(&mut self) -> Result<(), Error> {
        for _ in 0..20 {
            self.step()?;
            if self.client.is_established() && self.server.is_established() {
                return Ok(());
            }
        }
        Err(Error::Timeout("test handshake did not converge"))
    }

    /// Client -> server application datagram; returns what the server
    /// surfaced for it.
    pub fn send_client_to_server(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        self.client.send_application_data(data)?;
        let out = drain(&mut self.client, self.now);
        let mut received = Vec::new();
        for packet in out.packets {
            self.server.handle_packet(&packet)?;
            self.to_server.push(packet);
        }
        let out = drain(&mut self.server, self.now);
        received.extend(out.app_data);
        Ok(received)
    }

    pub fn send_server_to_client(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        self.server.send_application_data(data)?;
        let out = drain(&mut self.server, self.now);
        let mut received = Vec::new();
        for packet in out.packets {
            self.client.handle_packet(&packet)?;
            self.to_client.push(packet);
        }
        let out = drain(&mut self.client, self.now);
        received.extend(out.app_data);
        Ok(received)
    }
}

/// Run a full handshake, panicking on failure.
pub fn establish(client_config: Arc<Config>, server_config: Arc<Config>) -> Session {
    let mut session = Session::new(client_config, server_config);
    session.establish().expect("handshake");
    session
}

/// PSK config with the fixture identity, restricted to one suite.
pub fn psk_config(suite: CipherSuite) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .cipher_suites(vec![suite])
            .psk(PskStore::single(PSK_IDENTITY, &PSK_KEY[..]))
            .build(),
    )
}

/// A fresh ECDSA identity from the built-in generator.
pub fn ecdsa_identity() -> Identity {
    minidtls::certificate::generate_self_signed_certificate()
        .expect("generate certificate")
        .into_identity()
        .expect("identity")
}

/// Parsed DTLS record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
    pub len: usize,
}

pub const CONTENT_CCS: u8 = 20;
pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;
pub const CONTENT_APPDATA: u8 = 23;

pub const HS_CLIENT_HELLO: u8 = 1;
pub const HS_SERVER_HELLO: u8 = 2;
pub const HS_HELLO_VERIFY_REQUEST: u8 = 3;
pub const HS_CERTIFICATE: u8 = 11;
pub const HS_SERVER_HELLO_DONE: u8 = 14;

/// Parse record headers from one datagram.
pub fn parse_records(datagram: &[u8]) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let seq = u64::from_be_bytes([
            0,
            0,
            datagram[i + 5],
            datagram[i + 6],
            datagram[i + 7],
            datagram[i + 8],
            datagram[i + 9],
            datagram[i + 10],
        ]);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        out.push(RecHdr {
            ctype,
            epoch,
            seq,
            len,
        });
        i += 13 + len;
    }
    out
}

/// Record headers across a slice of datagrams.
pub fn collect_headers(datagrams: &[Vec<u8>]) -> Vec<RecHdr> {
    datagrams.iter().flat_map(|d| parse_records(d)).collect()
}

/// Handshake message types from cleartext handshake records.
pub fn parse_handshake_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        if ctype == CONTENT_HANDSHAKE && i + 13 < datagram.len() {
            out.push(datagram[i + 13]);
        }
        i += 13 + len;
    }
    out
}

/// Assert that each direction's sequence numbers count 0, 1, 2, ... per
/// epoch with no gaps or reuse, and that the first record of epoch 1
/// starts at 0.
pub fn assert_sequence_discipline(datagrams: &[Vec<u8>]) {
    let headers = collect_headers(datagrams);

    let mut next = [0u64, 0u64];
    for header in &headers {
        let epoch = header.epoch as usize;
        assert!(epoch < 2, "unexpected epoch {}", header.epoch);
        assert_eq!(
            header.seq, next[epoch],
            "sequence gap or reuse at epoch {}: {:?}",
            header.epoch, headers
        );
        next[epoch] += 1;
    }

    // Epoch 1, when present, must start at sequence 0.
    if headers.iter().any(|h| h.epoch == 1) {
        let first = headers.iter().find(|h| h.epoch == 1).unwrap();
        assert_eq!(first.seq, 0);
    }
}
