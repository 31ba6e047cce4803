//! End-to-end handshakes for every cipher suite and version combination.

mod common;

use std::sync::Arc;

use common::*;
use minidtls::message::{CipherSuite, ProtocolVersion};
use minidtls::{Config, PskStore};

#[test]
fn psk_ccm8_happy_path() {
    // Identity "Client_identity", key 0x0102..10, over CCM-8.
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CCM_8),
        psk_config(CipherSuite::PSK_AES128_CCM_8),
    );

    let at_server = session.send_client_to_server(b"ping").unwrap();
    assert_eq!(at_server, vec![b"ping".to_vec()]);

    let at_client = session.send_server_to_client(b"pong").unwrap();
    assert_eq!(at_client, vec![b"pong".to_vec()]);

    // Per-direction sequences count from zero per epoch and the first
    // post-CCS record is (epoch+1, 0).
    assert_sequence_discipline(&session.to_server);
    assert_sequence_discipline(&session.to_client);
}

#[test]
fn psk_cbc_sha256() {
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CBC_SHA256),
        psk_config(CipherSuite::PSK_AES128_CBC_SHA256),
    );

    let at_server = session.send_client_to_server(b"cbc ping").unwrap();
    assert_eq!(at_server, vec![b"cbc ping".to_vec()]);
}

#[test]
fn ecdhe_psk_cbc_sha256() {
    let mut session = establish(
        psk_config(CipherSuite::ECDHE_PSK_AES128_CBC_SHA256),
        psk_config(CipherSuite::ECDHE_PSK_AES128_CBC_SHA256),
    );

    let at_server = session.send_client_to_server(b"forward secret").unwrap();
    assert_eq!(at_server, vec![b"forward secret".to_vec()]);
}

#[test]
fn ecdhe_ecdsa_cbc_and_ccm() {
    for suite in [
        CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256,
        CipherSuite::ECDHE_ECDSA_AES128_CCM_8,
    ] {
        let identity = ecdsa_identity();
        let leaf = identity.certificate_chain[0].clone();

        let client_config = Arc::new(Config::builder().cipher_suites(vec![suite]).build());
        let server_config = Arc::new(
            Config::builder()
                .cipher_suites(vec![suite])
                .identity(identity)
                .build(),
        );

        let mut session = establish(client_config, server_config);

        // The server leaf certificate is surfaced for app-level policy.
        assert_eq!(session.client_saw_cert.as_deref(), Some(leaf.as_slice()));

        let at_server = session.send_client_to_server(b"signed").unwrap();
        assert_eq!(at_server, vec![b"signed".to_vec()]);
    }
}

#[test]
fn rsa_aes256_cbc_sha() {
    let identity = minidtls::certificate::generate_self_signed_rsa_certificate()
        .expect("generate RSA certificate")
        .into_identity()
        .expect("identity");

    let client_config = Arc::new(
        Config::builder()
            .cipher_suites(vec![CipherSuite::RSA_AES256_CBC_SHA])
            .build(),
    );
    let server_config = Arc::new(
        Config::builder()
            .cipher_suites(vec![CipherSuite::RSA_AES256_CBC_SHA])
            .identity(identity)
            .build(),
    );

    let mut session = establish(client_config, server_config);

    let at_server = session.send_client_to_server(b"rsa transported").unwrap();
    assert_eq!(at_server, vec![b"rsa transported".to_vec()]);
}

#[test]
fn version_downgrade_to_dtls10() {
    // A 1.0-capped server answers a 1.2 client; the client adopts 1.0 and
    // the legacy PRF, and the handshake still completes.
    let client_config = psk_config(CipherSuite::PSK_AES128_CBC_SHA256);
    let server_config = Arc::new(
        Config::builder()
            .maximum_version(ProtocolVersion::DTLS1_0)
            .cipher_suites(vec![CipherSuite::PSK_AES128_CBC_SHA256])
            .psk(PskStore::single(PSK_IDENTITY, &PSK_KEY[..]))
            .build(),
    );

    let mut session = establish(client_config, server_config);

    // Every record the server emitted carries the 1.0 version.
    for datagram in &session.to_client {
        let version = u16::from_be_bytes([datagram[1], datagram[2]]);
        assert_eq!(version, 0xFEFF, "server record not DTLS 1.0");
    }

    let at_server = session.send_client_to_server(b"legacy prf").unwrap();
    assert_eq!(at_server, vec![b"legacy prf".to_vec()]);
}

#[test]
fn dtls10_both_ends() {
    let mut config = Config::builder()
        .maximum_version(ProtocolVersion::DTLS1_0)
        .cipher_suites(vec![CipherSuite::RSA_AES256_CBC_SHA]);
    let identity = minidtls::certificate::generate_self_signed_rsa_certificate()
        .expect("generate RSA certificate")
        .into_identity()
        .expect("identity");
    config = config.identity(identity);
    let server_config = Arc::new(config.build());

    let client_config = Arc::new(
        Config::builder()
            .maximum_version(ProtocolVersion::DTLS1_0)
            .cipher_suites(vec![CipherSuite::RSA_AES256_CBC_SHA])
            .build(),
    );

    let mut session = establish(client_config, server_config);
    let at_server = session.send_client_to_server(b"pure 1.0").unwrap();
    assert_eq!(at_server, vec![b"pure 1.0".to_vec()]);
}

#[test]
fn client_certificate_authentication() {
    let server_identity = ecdsa_identity();
    let client_identity = ecdsa_identity();
    let client_leaf = client_identity.certificate_chain[0].clone();

    let client_config = Arc::new(
        Config::builder()
            .cipher_suites(vec![CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256])
            .identity(client_identity)
            .build(),
    );
    let server_config = Arc::new(
        Config::builder()
            .cipher_suites(vec![CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256])
            .identity(server_identity)
            .require_client_certificate(true)
            .build(),
    );

    let mut session = establish(client_config, server_config);

    // The server observed (and signature-verified) the client certificate.
    assert_eq!(session.server_saw_cert.as_deref(), Some(client_leaf.as_slice()));

    let at_server = session.send_client_to_server(b"mutual").unwrap();
    assert_eq!(at_server, vec![b"mutual".to_vec()]);
}

#[test]
fn no_common_suite_fails() {
    let client_config = psk_config(CipherSuite::PSK_AES128_CCM_8);
    let server_config = psk_config(CipherSuite::PSK_AES128_CBC_SHA256);

    let mut session = Session::new(client_config, server_config);
    let result = session.establish();
    assert!(result.is_err());
    assert!(!session.server.is_established());
    assert!(!session.client.is_established());
}

#[test]
fn extended_master_secret_is_negotiated() {
    // Both ends offer EMS by default; the handshake must complete with the
    // session-hash derivation on both sides (they would diverge otherwise).
    let mut session = establish(
        psk_config(CipherSuite::PSK_AES128_CCM_8),
        psk_config(CipherSuite::PSK_AES128_CCM_8),
    );
    let at_server = session.send_client_to_server(b"ems").unwrap();
    assert_eq!(at_server, vec![b"ems".to_vec()]);
}
