//! Connecting, the secure-port heuristic, stopping and equality.

use std::net::{IpAddr, Ipv4Addr};

use sslclient::{Connection, ConnectionState, Error, Host};
use sslclient_test::{ManualClock, MockProvider, ScriptedTransport, ServerBehaviour};

use super::{Fixture, HOST, NOW};

#[test]
fn secure_port_runs_tls() {
    let mut f = Fixture::new();
    f.connect();

    assert!(f.conn.is_secure());
    assert!(f.conn.connected());
    assert_eq!(f.provider.created(), 1);
    assert_eq!(f.provider.live(), 1);
    assert_eq!(f.peer().server_names, vec![HOST.to_string()]);
    assert_eq!(
        f.conn.target(),
        Some((&Host::try_from(HOST).unwrap(), 443))
    );
}

#[test]
fn other_ports_are_plain() {
    let mut f = Fixture::new();
    f.conn.connect(HOST, 80).unwrap();

    assert_eq!(f.conn.state(), &ConnectionState::Established);
    assert!(!f.conn.is_secure());
    assert_eq!(f.provider.created(), 0);

    f.conn.write(b"GET /").unwrap();
    assert_eq!(f.peer().written, b"GET /");
}

#[test]
fn enable_ssl_overrides_the_port() {
    let mut f = Fixture::new();
    f.conn.enable_ssl(false);
    f.conn.connect(HOST, 443).unwrap();
    assert!(!f.conn.is_secure());
    assert_eq!(f.provider.created(), 0);

    f.conn.enable_ssl(true);
    f.conn.connect(HOST, 8080).unwrap();
    assert!(f.conn.is_secure());
    assert_eq!(f.provider.created(), 1);
    assert_eq!(f.peer().connects.last().unwrap().1, 8080);
}

#[test]
fn plain_connection_upgrades_in_place() {
    let mut f = Fixture::new();
    f.conn.connect(HOST, 25).unwrap();
    assert!(!f.conn.is_secure());

    // the arguments are ignored; the stored target is used
    f.conn
        .connect_ssl_to("elsewhere.example", 1)
        .unwrap();
    assert!(f.conn.is_secure());
    assert_eq!(f.conn.state(), &ConnectionState::Established);
    assert_eq!(f.peer().connects.len(), 1);
    assert_eq!(f.peer().server_names, vec![HOST.to_string()]);

    // already secure
    f.conn.connect_ssl().unwrap();
    assert_eq!(f.provider.created(), 1);
}

#[test]
fn upgrade_needs_an_open_connection() {
    let mut f = Fixture::new();
    assert_eq!(f.conn.connect_ssl(), Err(Error::NotConnected));
    assert_eq!(f.conn.state(), &ConnectionState::Idle);
}

#[test]
fn ip_targets_send_no_server_name() {
    let mut f = Fixture::new();
    f.conn.set_insecure();
    f.conn
        .connect_ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 443)
        .unwrap();

    assert_eq!(f.peer().server_names, vec![String::new()]);
    assert_eq!(
        f.peer().connects[0].0,
        Host::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)))
    );
}

#[test]
fn invalid_host_names_are_rejected_before_connecting() {
    let mut f = Fixture::new();
    assert_eq!(f.conn.connect("", 443), Err(Error::InvalidHostName));
    assert_eq!(
        f.conn
            .connect(&"a".repeat(300), 443),
        Err(Error::InvalidHostName)
    );
    assert!(f.peer().connects.is_empty());
}

#[test]
fn refused_connection_fails() {
    let mut f = Fixture::new();
    f.peer().refuse_connect = true;

    assert_eq!(f.conn.connect(HOST, 443), Err(Error::ConnectFailed));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::ConnectFailed)
    );
    assert!(!f.conn.connected());
    assert_eq!(f.peer().stops, 1);
    assert_eq!(f.provider.created(), 0);
}

#[test]
fn reconnecting_closes_the_previous_connection() {
    let mut f = Fixture::new();
    f.connect();
    f.connect();

    assert_eq!(f.provider.created(), 2);
    assert_eq!(f.provider.live(), 1);
    assert_eq!(f.peer().alerts, vec![(1, 0)]);
    assert_eq!(f.peer().connects.len(), 2);
}

#[test]
fn stop_sends_close_notify_and_releases_everything() {
    let mut f = Fixture::new();
    f.connect();
    f.conn.stop();

    assert_eq!(f.conn.state(), &ConnectionState::Idle);
    assert!(!f.conn.connected());
    assert_eq!(f.provider.live(), 0);
    assert_eq!(f.peer().alerts, vec![(1, 0)]);
    assert_eq!(f.peer().stops, 1);
    assert!(!f.peer().open);
}

#[test]
fn stop_is_idempotent() {
    let mut f = Fixture::new();
    f.conn.stop();
    assert_eq!(f.peer().stops, 0);

    f.connect();
    f.conn.stop();
    f.conn.stop();
    f.conn.stop();
    assert_eq!(f.peer().stops, 1);
    assert_eq!(f.peer().alerts.len(), 1);

    let peer = f.peer.clone();
    drop(f);
    assert_eq!(peer.lock().unwrap().stops, 1);
}

#[test]
fn dropping_an_open_connection_stops_it() {
    let mut f = Fixture::new();
    f.connect();
    let peer = f.peer.clone();
    let provider = f.provider.clone();
    drop(f);

    assert_eq!(peer.lock().unwrap().alerts, vec![(1, 0)]);
    assert_eq!(peer.lock().unwrap().stops, 1);
    assert_eq!(provider.live(), 0);
}

#[test]
fn stop_clears_a_failure() {
    let mut f = Fixture::new();
    f.peer().refuse_connect = true;
    assert!(f.conn.connect(HOST, 443).is_err());

    f.conn.stop();
    assert_eq!(f.conn.state(), &ConnectionState::Idle);

    f.peer().refuse_connect = false;
    f.connect();
}

#[test]
fn set_client_swaps_the_transport() {
    let mut f = Fixture::new();
    f.connect();

    let replacement = ScriptedTransport::new(9, ServerBehaviour::default());
    let replacement_peer = replacement.peer();
    f.conn.set_client(replacement);

    assert_eq!(f.conn.state(), &ConnectionState::Idle);
    assert_eq!(f.peer().stops, 1);
    f.conn.set_insecure();
    f.conn.enable_ssl(false);
    f.conn.connect(HOST, 7).unwrap();
    assert_eq!(replacement_peer.lock().unwrap().connects.len(), 1);
}

fn plain_connection(id: u32, host: &str, port: u16) -> Connection<ScriptedTransport> {
    let mut conn = Connection::new(
        ScriptedTransport::new(id, ServerBehaviour::default()),
        MockProvider::new(),
    )
    .with_clock(ManualClock::new(NOW));
    conn.connect(host, port).unwrap();
    conn
}

#[test]
fn equality_is_by_transport_and_target() {
    let a = plain_connection(1, HOST, 80);
    assert_eq!(a, plain_connection(1, HOST, 80));
    assert_ne!(a, plain_connection(2, HOST, 80));
    assert_ne!(a, plain_connection(1, HOST, 81));
    assert_ne!(a, plain_connection(1, "other.example", 80));
}

#[test]
fn into_transport_stops_first() {
    let mut f = Fixture::new();
    f.connect();
    let peer = f.peer.clone();
    let transport = f.conn.into_transport().unwrap();

    assert_eq!(transport.peer().lock().unwrap().stops, 1);
    assert_eq!(peer.lock().unwrap().alerts, vec![(1, 0)]);
}
