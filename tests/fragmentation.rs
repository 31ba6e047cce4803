//! Handshake-layer fragmentation over a small MTU, with reordering and
//! duplication of the fragments.

mod common;

use std::sync::Arc;
use std::time::Instant;

use common::*;
use minidtls::message::CipherSuite;
use minidtls::{Client, Config, Server};

fn fragmented_configs() -> (Arc<Config>, Arc<Config>) {
    // An MTU small enough that the server Certificate spans several
    // records.
    let identity = ecdsa_identity();
    let client_config = Arc::new(
        Config::builder()
            .mtu(160)
            .cipher_suites(vec![CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256])
            .build(),
    );
    let server_config = Arc::new(
        Config::builder()
            .mtu(160)
            .cipher_suites(vec![CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256])
            .identity(identity)
            .build(),
    );
    (client_config, server_config)
}

/// Drive the cookie exchange and capture the server flight datagrams.
fn server_flight() -> (Client, Server, Vec<Vec<u8>>) {
    let (client_config, server_config) = fragmented_configs();
    let mut client = Client::new(client_config);
    let mut server = Server::new(server_config, PEER);
    let now = Instant::now();

    client.handle_timeout(now).unwrap();
    let first = drain(&mut client, now);
    for p in &first.packets {
        server.handle_packet(p).unwrap();
    }
    server.handle_timeout(now).unwrap();
    let verify = drain(&mut server, now);
    for p in &verify.packets {
        client.handle_packet(p).unwrap();
    }
    let second = drain(&mut client, now);
    for p in &second.packets {
        server.handle_packet(p).unwrap();
    }

    let flight = drain(&mut server, now);
    (client, server, flight.packets)
}

#[test]
fn certificate_fragments_across_records() {
    let (_client, _server, flight) = server_flight();

    // The flight spans several datagrams; the Certificate body (a DER
    // cert of a few hundred bytes) cannot fit one 160-byte record.
    assert!(flight.len() >= 3, "expected >= 3 datagrams, got {}", flight.len());
    for datagram in &flight {
        assert!(datagram.len() <= 160, "datagram exceeds MTU");
    }

    let certificate_fragments = flight
        .iter()
        .flat_map(|p| parse_handshake_types(p))
        .filter(|t| *t == HS_CERTIFICATE)
        .count();
    assert!(
        certificate_fragments >= 3,
        "expected >= 3 Certificate fragments, got {}",
        certificate_fragments
    );
}

#[test]
fn reordered_and_duplicated_fragments_reassemble() {
    let (mut client, mut server, flight) = server_flight();
    let now = Instant::now();

    // Deliver the flight out of order with a duplicate in the middle:
    // last datagram first, then the rest, then datagram 0 again.
    let mut order: Vec<usize> = Vec::new();
    order.push(flight.len() - 1);
    order.push(0);
    order.push(0); // duplicate
    order.extend(1..flight.len() - 1);

    for &i in &order {
        client.handle_packet(&flight[i]).unwrap();
    }

    // The client reassembled the flight and produced its own.
    let client_flight = drain(&mut client, now);
    assert!(!client_flight.packets.is_empty(), "client flight missing");

    for p in &client_flight.packets {
        server.handle_packet(p).unwrap();
    }
    let server_fin = drain(&mut server, now);
    assert!(server.is_established());

    for p in &server_fin.packets {
        client.handle_packet(p).unwrap();
    }
    let done = drain(&mut client, now);
    assert!(done.connected || client.is_established());
    assert!(client.is_established());

    // Application data flows over the reassembled handshake.
    client.send_application_data(b"after fragments").unwrap();
    let out = drain(&mut client, now);
    for p in &out.packets {
        server.handle_packet(p).unwrap();
    }
    let received = drain(&mut server, now);
    assert_eq!(received.app_data, vec![b"after fragments".to_vec()]);
}

#[test]
fn whole_session_with_small_mtu() {
    let (client_config, server_config) = fragmented_configs();
    let mut session = Session::new(client_config, server_config);
    session.establish().unwrap();

    for datagram in session.to_server.iter().chain(session.to_client.iter()) {
        assert!(datagram.len() <= 160);
    }

    assert_sequence_discipline(&session.to_server);
    assert_sequence_discipline(&session.to_client);
}
