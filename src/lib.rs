//! minidtls — a DTLS 1.0/1.2 endpoint library for IoT-style deployments.
//!
//! minidtls implements both sides of a mutually-authenticated DTLS handshake
//! over UDP and protects application datagrams afterwards. It targets
//! constrained deployments: pre-shared keys, ECDHE with ECDSA, ECDHE with
//! PSK and RSA key transport, with AES-128-CBC, AES-128-CCM-8 and
//! AES-256-CBC record protection.
//!
//! # Goals
//! - **DTLS 1.0 and 1.2** with cookie-based DoS protection, handshake
//!   fragmentation over lossy UDP and per-epoch anti-replay.
//! - **Safety**: `forbid(unsafe_code)` throughout the crate.
//! - **Rust-only crypto**: small, well-maintained RustCrypto crates.
//! - **Two integration styles**: a Sans-IO core you drive yourself, or
//!   blocking UDP endpoints with a worker pool.
//!
//! ## Non-goals
//! - **DTLS 1.3**
//! - **Session resumption** (NewSessionTicket is parsed and ignored)
//! - **Renegotiation**
//! - **SRTP profiles**
//! - **PMTU discovery** (a static per-address-family MTU hint is used)
//!
//! # Sans-IO core
//!
//! [`Client`] and [`Server`] are state machines with no sockets inside.
//! Drive them with three calls:
//! - `handle_packet` — feed one received UDP datagram.
//! - `poll_output` — drain pending output: datagrams, timers, events.
//! - `handle_timeout` — trigger retransmissions and deadlines.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use minidtls::{Client, Config, Output, PskStore};
//!
//! fn send_udp(_bytes: &[u8]) {}
//!
//! let config = Arc::new(
//!     Config::builder()
//!         .psk(PskStore::single(&b"Client_identity"[..], &[0x01u8; 16][..]))
//!         .build(),
//! );
//! let mut dtls = Client::new(config);
//!
//! loop {
//!     match dtls.poll_output(Instant::now()) {
//!         Output::Packet(p) => send_udp(&p),
//!         Output::Timeout(_t) => break, // schedule a timer, then handle_timeout
//!         Output::Connected => {}
//!         Output::PeerCert(_der) => {}  // validate according to your policy
//!         Output::ApplicationData(_d) => {}
//!     }
//! }
//! ```
//!
//! # Blocking endpoints
//!
//! [`ClientEndpoint`] and [`ServerEndpoint`] bind the core to real UDP
//! sockets: `connect`/`send`/`receive`/`close` with explicit deadlines on
//! the client, and a session registry with a worker pool on the server.
//!
//! ## Certificate model
//!
//! The library consumes an already-parsed certificate chain and private key
//! ([`Identity`]) and surfaces the peer's leaf certificate via
//! [`Output::PeerCert`]. PKI validation is the application's policy.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::upper_case_acronyms)]

// DTLS 1.2 handshake flow implemented here:
//
// Client                                               Server
//
// 1     ClientHello                  -------->
//
// 2                                  <--------   HelloVerifyRequest
//                                                 (contains cookie)
//
// 3     ClientHello                  -------->
//       (with cookie)
// 4                                                     ServerHello
//                                                      Certificate*
//                                                ServerKeyExchange*
//                                               CertificateRequest*
//                                    <--------      ServerHelloDone
// 5     Certificate*
//       ClientKeyExchange
//       CertificateVerify*
//       [ChangeCipherSpec]
//       Finished                     -------->
// 6                                              [ChangeCipherSpec]
//                                    <--------             Finished
//       Application Data             <------->     Application Data

#[macro_use]
extern crate log;

mod client;
pub use client::Client;

mod server;
pub use server::Server;

pub mod message;

mod engine;
mod reassembly;
mod timer;
mod util;
mod window;

mod error;
pub use error::Error;

mod config;
pub use config::{Config, ConfigBuilder, PskValidator, DEFAULT_MTU_V4, DEFAULT_MTU_V6};

mod psk;
pub use psk::PskStore;

mod identity;
pub use identity::{Identity, PrivateKey};

pub mod certificate;
pub mod crypto;

mod endpoint;
pub use endpoint::{ClientEndpoint, ServerEndpoint};

use std::fmt;
use std::time::Instant;

/// Output events produced by the Sans-IO engines when polled.
pub enum Output {
    /// A datagram to transmit on the wire.
    Packet(Vec<u8>),
    /// A timer deadline: call `handle_timeout` at or after this instant.
    Timeout(Instant),
    /// The handshake completed.
    Connected,
    /// The peer's leaf certificate (DER). Validate it in the application.
    PeerCert(Vec<u8>),
    /// Received application data plaintext.
    ApplicationData(Vec<u8>),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packet(v) => write!(f, "Packet({})", v.len()),
            Self::Timeout(v) => write!(f, "Timeout({:?})", v),
            Self::Connected => write!(f, "Connected"),
            Self::PeerCert(v) => write!(f, "PeerCert({})", v.len()),
            Self::ApplicationData(v) => write!(f, "ApplicationData({})", v.len()),
        }
    }
}
