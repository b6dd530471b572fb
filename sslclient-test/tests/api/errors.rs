//! Failures: timeouts, alerts, lost transports, protocol errors, and
//! configuration that is refused.

use std::io::Read;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sslclient::cipher_suite::{
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, TLS_RSA_WITH_AES_128_CBC_SHA,
};
use sslclient::{
    find_suite, set_debug_level, BufferMode, CipherSuite, ClientConfig, ConnectionState,
    DebugLevel, EngineError, Error, KeyExchange, MaxFragmentLength, ProtocolVersion,
};
use sslclient_test::{init_logging, record};

use super::{Fixture, HOST};

#[test]
fn silent_server_times_the_handshake_out() {
    let mut f = Fixture::with(|b| b.silent = true);
    assert_eq!(f.conn.connect(HOST, 443), Err(Error::HandshakeTimeout));
    assert!(f.clock.elapsed() > ClientConfig::DEFAULT_HANDSHAKE_TIMEOUT);
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::HandshakeTimeout)
    );
    assert_eq!(f.provider.live(), 0);
    assert_eq!(f.peer().stops, 1);
}

#[test]
fn handshake_timeout_is_configurable() {
    let mut f = Fixture::with(|b| b.silent = true);
    f.conn
        .set_handshake_timeout(Duration::from_secs(5));
    assert_eq!(f.conn.connect(HOST, 443), Err(Error::HandshakeTimeout));
    assert!(f.clock.elapsed() < Duration::from_secs(6));
}

#[test]
fn fatal_alert_fails_the_handshake() {
    let mut f = Fixture::with(|b| b.fatal_alert = Some(40));
    let code = EngineError::received_alert(40);
    assert_eq!(
        f.conn.connect(HOST, 443),
        Err(Error::HandshakeFailed(code))
    );

    let err = f.conn.last_ssl_error().unwrap();
    assert_eq!(err.code, code);
    assert_eq!(err.description, "SSL received fatal alert");
    assert!(!f.conn.connected());
    assert_eq!(f.provider.live(), 0);
}

#[test]
fn out_of_memory_leaves_a_clean_idle_connection() {
    let mut f = Fixture::new();
    f.provider
        .out_of_memory
        .store(true, Ordering::SeqCst);

    assert_eq!(f.conn.connect(HOST, 443), Err(Error::OutOfMemory));
    assert_eq!(f.conn.state(), &ConnectionState::Idle);
    assert_eq!(
        f.conn.last_ssl_error().unwrap().code,
        EngineError::OUT_OF_MEMORY
    );
    assert!(!f.peer().open);

    f.provider
        .out_of_memory
        .store(false, Ordering::SeqCst);
    f.connect();
    assert_eq!(f.conn.last_ssl_error(), None);
}

#[test]
fn transport_lost_during_the_handshake() {
    let mut f = Fixture::with(|b| b.hang_up = true);
    assert_eq!(
        f.conn.connect(HOST, 443),
        Err(Error::HandshakeFailed(EngineError::IO))
    );
    assert_eq!(f.conn.last_ssl_error().unwrap().code, EngineError::IO);
}

#[test]
fn renegotiation_is_refused() {
    let mut f = Fixture::with(|b| b.renegotiate = true);
    f.connect();
    f.conn.write(b"x").unwrap();
    f.conn.flush().unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(f.conn.read(&mut buf), Err(Error::RenegotiationUnsupported));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::RenegotiationUnsupported)
    );
    assert_eq!(
        f.conn.last_ssl_error().unwrap().code,
        EngineError::BAD_STATE
    );
    assert_eq!(f.provider.live(), 0);
}

#[test]
fn renegotiation_within_a_single_read_is_refused() {
    let mut f = Fixture::new();
    f.connect();
    // hello_request, with application data right behind it
    let mut bytes = record(0x16, &[0x00]);
    bytes.extend_from_slice(&record(0x17, b"ok"));
    f.peer().push(&bytes);

    let mut buf = [0u8; 4];
    assert_eq!(f.conn.read(&mut buf), Err(Error::RenegotiationUnsupported));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::RenegotiationUnsupported)
    );
    assert_eq!(
        f.conn.last_ssl_error().unwrap().code,
        EngineError::BAD_STATE
    );
    assert_eq!(f.peer().full_handshakes, 1);
    assert_eq!(f.peer().server_names.len(), 1);
    assert_eq!(f.provider.live(), 0);
}

fn assert_protocol_error(bytes: &[u8], code: EngineError) {
    let mut f = Fixture::new();
    f.connect();
    f.peer().push(bytes);

    let mut buf = [0u8; 4];
    assert_eq!(f.conn.read(&mut buf), Err(Error::ProtocolError(code)));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::ProtocolError(code))
    );
    assert_eq!(f.conn.last_ssl_error().unwrap().code, code);
    assert_eq!(f.provider.live(), 0);
    assert!(!f.peer().open);
}

#[test]
fn unknown_record_type_is_a_protocol_error() {
    assert_protocol_error(&record(0x30, b"?"), EngineError::UNKNOWN_TYPE);
}

#[test]
fn fatal_alert_on_an_open_connection() {
    assert_protocol_error(&record(0x15, &[2, 20]), EngineError::received_alert(20));
}

#[test]
fn oversized_record_is_a_protocol_error() {
    assert_protocol_error(&[0x17, 0x03, 0x03, 0x4e, 0x20], EngineError::TOO_LARGE);
}

#[test]
fn failed_connection_reads_as_end_of_stream() {
    let mut f = Fixture::new();
    f.connect();
    f.peer().push(&record(0x30, b"?"));
    let mut buf = [0u8; 4];
    assert!(f.conn.read(&mut buf).is_err());

    let mut rest = Vec::new();
    assert_eq!(f.conn.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn small_receive_buffer_requests_a_fragment_length() {
    let mut f = Fixture::with(|b| b.accept_fragment_length = true);
    f.conn.set_buffer_sizes(1024, 512);
    f.connect();

    let summary = f.provider.last_config().unwrap();
    assert_eq!(
        summary.input_len,
        1024 + f.conn.config().record_overhead().input
    );
    assert_eq!(
        summary.output_len,
        512 + f.conn.config().record_overhead().output
    );
    assert_eq!(
        summary.max_fragment_length,
        Some(MaxFragmentLength::Len1024)
    );
    assert_eq!(f.peer().requested_fragment_lengths, vec![2]);
    assert_eq!(
        f.conn.max_fragment_length_negotiated(),
        Some(MaxFragmentLength::Len1024)
    );
}

#[test]
fn fragment_length_is_optional_for_the_server() {
    let mut f = Fixture::new();
    f.conn.set_buffer_sizes(1024, 512);
    f.connect();
    assert_eq!(f.peer().requested_fragment_lengths, vec![2]);
    assert_eq!(f.conn.max_fragment_length_negotiated(), None);

    // full-size buffers ask for nothing
    let mut f = Fixture::with(|b| b.accept_fragment_length = true);
    f.connect();
    assert_eq!(f.peer().requested_fragment_lengths, vec![0]);
    assert_eq!(f.provider.last_config().unwrap().max_fragment_length, None);
}

#[test]
fn half_duplex_shares_one_buffer() {
    let mut f = Fixture::new();
    f.conn.set_buffer_mode(BufferMode::HalfDuplex);
    f.connect();
    assert!(f.provider.last_config().unwrap().half_duplex);

    f.conn.write(b"ping").unwrap();
    f.conn.flush().unwrap();
    let mut buf = [0u8; 4];
    f.conn.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
}

#[test]
fn cipher_suite_selection() {
    let mut f = Fixture::new();
    assert_eq!(f.conn.set_ciphers(&[]), Err(Error::UnsupportedCipherSuite));
    assert_eq!(
        f.conn.set_ciphers(&[CipherSuite::Unknown(0x1301)]),
        Err(Error::UnsupportedCipherSuite)
    );

    f.conn
        .set_ciphers(&[
            TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256.suite,
            TLS_RSA_WITH_AES_128_CBC_SHA.suite,
        ])
        .unwrap();
    f.connect();
    assert_eq!(
        f.provider.last_config().unwrap().cipher_suites,
        vec![
            TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256.suite,
            TLS_RSA_WITH_AES_128_CBC_SHA.suite,
        ]
    );
}

#[test]
fn less_secure_ciphers_are_static_rsa() {
    let mut f = Fixture::new();
    f.conn.set_ciphers_less_secure();
    f.connect();
    let offered = f.provider.last_config().unwrap().cipher_suites;
    assert!(!offered.is_empty());
    assert!(offered
        .iter()
        .all(|s| find_suite(*s).unwrap().kx == KeyExchange::Rsa));
}

#[test]
fn version_bounds() {
    let mut f = Fixture::new();
    assert_eq!(
        f.conn
            .set_ssl_version(ProtocolVersion::TLSv1_2, ProtocolVersion::TLSv1_0),
        Err(Error::InvalidVersionRange)
    );
    assert_eq!(
        f.conn
            .set_ssl_version(ProtocolVersion::SSLv3, ProtocolVersion::TLSv1_2),
        Err(Error::InvalidVersionRange)
    );

    f.conn
        .set_ssl_version(ProtocolVersion::TLSv1_0, ProtocolVersion::TLSv1_1)
        .unwrap();
    f.connect();
    let summary = f.provider.last_config().unwrap();
    assert_eq!(
        summary.versions,
        (ProtocolVersion::TLSv1_0, ProtocolVersion::TLSv1_1)
    );
    assert!(!summary.cipher_suites.is_empty());
    assert!(summary
        .cipher_suites
        .iter()
        .all(|s| find_suite(*s).unwrap().min_version != ProtocolVersion::TLSv1_2));
}

#[test]
fn only_tls12_suites_cannot_be_offered_below_tls12() {
    let mut f = Fixture::new();
    f.conn
        .set_ciphers(&[TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256.suite])
        .unwrap();
    f.conn
        .set_ssl_version(ProtocolVersion::TLSv1_0, ProtocolVersion::TLSv1_1)
        .unwrap();
    assert_eq!(
        f.conn.connect(HOST, 443),
        Err(Error::UnsupportedCipherSuite)
    );
    assert_eq!(f.provider.created(), 0);
}

#[test]
fn debug_level_sets_the_log_filter() {
    init_logging();
    set_debug_level(DebugLevel::Dump);
    assert_eq!(log::max_level(), log::LevelFilter::Trace);
    set_debug_level(DebugLevel::Warn);
    assert_eq!(log::max_level(), log::LevelFilter::Warn);
}
