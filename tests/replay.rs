//! Anti-replay and record tampering after the handshake.

mod common;

use common::*;
use minidtls::message::CipherSuite;
use minidtls::Error;

#[test]
fn replayed_application_record_is_dropped_silently() {
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CCM_8),
        psk_config(CipherSuite::PSK_AES128_CCM_8),
    );

    // A legitimate application datagram, captured off the wire.
    session.client.send_application_data(b"once only").unwrap();
    let out = drain(&mut session.client, session.now);
    assert_eq!(out.packets.len(), 1);
    let captured = out.packets[0].clone();

    session.server.handle_packet(&captured).unwrap();
    let first = drain(&mut session.server, session.now);
    assert_eq!(first.app_data, vec![b"once only".to_vec()]);

    // The identical record replayed: dropped without error and without a
    // second delivery.
    session.server.handle_packet(&captured).unwrap();
    let second = drain(&mut session.server, session.now);
    assert!(second.app_data.is_empty(), "replay reached the application");
    assert!(second.packets.is_empty(), "replay provoked a response");
    assert!(session.server.is_established());
}

#[test]
fn old_epoch_record_is_dropped() {
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CBC_SHA256),
        psk_config(CipherSuite::PSK_AES128_CBC_SHA256),
    );

    // Replay the client's very first datagram (epoch 0 ClientHello).
    let stale = session.to_server[0].clone();
    session.server.handle_packet(&stale).unwrap();
    let out = drain(&mut session.server, session.now);
    assert!(out.packets.is_empty());
    assert!(out.app_data.is_empty());
    assert!(session.server.is_established());
}

#[test]
fn tampered_ciphertext_is_fatal() {
    // Single bit flip in ApplicationData ciphertext -> bad_record_mac ->
    // fatal alert -> session destroyed, nothing delivered.
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CCM_8),
        psk_config(CipherSuite::PSK_AES128_CCM_8),
    );

    session.client.send_application_data(b"secret").unwrap();
    let out = drain(&mut session.client, session.now);
    let mut tampered = out.packets[0].clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;

    let result = session.server.handle_packet(&tampered);
    assert!(matches!(result, Err(Error::BadRecordMac)), "{:?}", result);

    let after = drain(&mut session.server, session.now);
    assert!(after.app_data.is_empty(), "tampered data reached the application");

    // A fatal bad_record_mac alert went out and the session is gone.
    let alerts: Vec<RecHdr> = after
        .packets
        .iter()
        .flat_map(|p| parse_records(p))
        .filter(|h| h.ctype == CONTENT_ALERT)
        .collect();
    assert_eq!(alerts.len(), 1);
    assert!(session.server.is_closed());

    // Further input is ignored.
    session.client.send_application_data(b"again").unwrap();
    let out = drain(&mut session.client, session.now);
    session.server.handle_packet(&out.packets[0]).unwrap();
    let ignored = drain(&mut session.server, session.now);
    assert!(ignored.app_data.is_empty());
}

#[test]
fn tampered_cbc_record_is_fatal() {
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CBC_SHA256),
        psk_config(CipherSuite::PSK_AES128_CBC_SHA256),
    );

    session.client.send_application_data(b"mac then encrypt").unwrap();
    let out = drain(&mut session.client, session.now);
    let mut tampered = out.packets[0].clone();
    // Flip inside the ciphertext body (past the 13-byte record header and
    // the explicit IV).
    tampered[13 + 16] ^= 0x80;

    let result = session.server.handle_packet(&tampered);
    assert!(matches!(result, Err(Error::BadRecordMac)));
    assert!(session.server.is_closed());
}

#[test]
fn close_notify_tears_down_both_ends() {
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CCM_8),
        psk_config(CipherSuite::PSK_AES128_CCM_8),
    );

    session.client.close();
    let out = drain(&mut session.client, session.now);
    assert!(!out.packets.is_empty());

    // The server reciprocates close_notify and ends the session.
    let mut response = Vec::new();
    for p in &out.packets {
        let result = session.server.handle_packet(p);
        assert!(matches!(result, Err(Error::PeerAlert(_))));
        let drained = drain(&mut session.server, session.now);
        response.extend(drained.packets);
    }

    assert!(session.server.is_closed());
    let alerts: Vec<RecHdr> = response
        .iter()
        .flat_map(|p| parse_records(p))
        .filter(|h| h.ctype == CONTENT_ALERT)
        .collect();
    assert_eq!(alerts.len(), 1);
}
