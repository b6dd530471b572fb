//! The max_fragment_length probe, over its own throwaway transport.

use std::time::Duration;

use sslclient::{probe_max_fragment_length, ConnectionState, Error, Host};
use sslclient_test::{ProbeAnswer, ProbeTransport};

use super::{Fixture, HOST};

fn probe(answer: ProbeAnswer, len: u16) -> (Result<bool, Error>, ProbeTransport) {
    let mut transport = ProbeTransport::new(answer);
    let host = Host::try_from(HOST).unwrap();
    let result = probe_max_fragment_length(&mut transport, &host, 443, len);
    (result, transport)
}

#[test]
fn echoed_length_is_supported() {
    let (result, transport) = probe(ProbeAnswer::Echo, 1024);
    assert_eq!(result, Ok(true));

    let log = transport.log();
    let log = log.lock().unwrap();
    assert_eq!(log.connects, 1);
    assert_eq!(log.requested, Some(2));
    assert_eq!(log.server_name.as_deref(), Some(HOST));
    // user_canceled, then close_notify
    assert_eq!(
        log.after_hello,
        vec![(0x15, vec![1, 90]), (0x15, vec![1, 0])]
    );
    assert_eq!(log.stops, 1);
    assert!(!log.open);
}

#[test]
fn every_valid_length_is_requested_by_code() {
    for (len, code) in [(512, 1), (1024, 2), (2048, 3), (4096, 4)] {
        let (result, transport) = probe(ProbeAnswer::Echo, len);
        assert_eq!(result, Ok(true));
        assert_eq!(transport.log().lock().unwrap().requested, Some(code));
    }
}

#[test]
fn ignored_or_different_length_is_unsupported() {
    let (result, transport) = probe(ProbeAnswer::Ignore, 512);
    assert_eq!(result, Ok(false));
    assert_eq!(transport.log().lock().unwrap().stops, 1);

    let (result, _) = probe(ProbeAnswer::Other(1), 2048);
    assert_eq!(result, Ok(false));
}

#[test]
fn alert_means_unsupported() {
    let (result, transport) = probe(ProbeAnswer::Alert, 4096);
    assert_eq!(result, Ok(false));
    let log = transport.log();
    let log = log.lock().unwrap();
    assert_eq!(log.stops, 1);
    assert_eq!(log.after_hello.len(), 2);
}

#[test]
fn invalid_lengths_never_connect() {
    let (result, transport) = probe(ProbeAnswer::Echo, 1000);
    assert_eq!(result, Err(Error::InvalidFragmentLength(1000)));
    assert_eq!(transport.log().lock().unwrap().connects, 0);
}

#[test]
fn connection_probe_uses_its_clock_and_leaves_the_connection_alone() {
    let mut f = Fixture::new();
    f.connect();
    f.conn.set_timeout(Duration::from_secs(3));

    let transport = ProbeTransport::new(ProbeAnswer::Silence);
    let log = transport.log();
    let before = f.clock.elapsed();
    assert_eq!(
        f.conn
            .probe_max_fragment_length(transport, HOST, 443, 512),
        Err(Error::IoTimeout)
    );
    assert!(f.clock.elapsed() - before > Duration::from_secs(3));
    assert_eq!(log.lock().unwrap().stops, 1);

    assert_eq!(f.conn.state(), &ConnectionState::Established);
    assert_eq!(f.peer().connects.len(), 1);

    assert_eq!(
        f.conn
            .probe_max_fragment_length(ProbeTransport::new(ProbeAnswer::Echo), HOST, 443, 2048),
        Ok(true)
    );
    assert_eq!(
        f.conn
            .probe_max_fragment_length(ProbeTransport::new(ProbeAnswer::Echo), "", 443, 2048),
        Err(Error::InvalidHostName)
    );
}
