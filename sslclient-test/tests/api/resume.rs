//! Session resumption through a caller-owned slot, and `validate()`.

use std::sync::atomic::Ordering;
use std::time::Duration;

use sslclient::{ConnectionState, Host, SessionSlot};

use super::{Fixture, HOST};

fn reconnect(f: &mut Fixture) {
    f.conn.stop();
    f.connect();
}

#[test]
fn second_connection_resumes() {
    let mut f = Fixture::new();
    let slot = SessionSlot::new();
    f.conn.set_session(slot.clone());

    f.connect();
    let saved = slot.get().unwrap();
    assert_eq!(saved.host, Host::try_from(HOST).unwrap());
    assert_eq!(saved.port, 443);
    assert_eq!(saved.saved_at.as_secs(), super::NOW);

    reconnect(&mut f);
    assert_eq!(f.peer().full_handshakes, 1);
    assert_eq!(f.peer().resumed_handshakes, 1);
    assert_eq!(f.peer().offered_sessions.len(), 1);
}

#[test]
fn no_slot_means_no_resumption() {
    let mut f = Fixture::new();
    f.connect();
    reconnect(&mut f);

    assert_eq!(f.peer().full_handshakes, 2);
    assert!(f.peer().offered_sessions.is_empty());
    assert_eq!(
        f.provider
            .counters
            .resumptions_offered
            .load(Ordering::SeqCst),
        0
    );
}

#[test]
fn detached_slot_is_left_alone() {
    let mut f = Fixture::new();
    let slot = SessionSlot::new();
    f.conn.set_session(slot.clone());
    f.connect();
    let first = slot.get().unwrap();

    f.conn.clear_session();
    reconnect(&mut f);
    assert_eq!(f.peer().full_handshakes, 2);
    assert_eq!(slot.get().unwrap().params, first.params);
}

#[test]
fn server_declining_resumption_gets_a_fresh_session_saved() {
    let mut f = Fixture::with(|b| b.resumption = false);
    let slot = SessionSlot::new();
    f.conn.set_session(slot.clone());
    f.connect();
    let first = slot.get().unwrap();

    reconnect(&mut f);
    assert_eq!(f.peer().offered_sessions.len(), 1);
    assert_eq!(f.peer().full_handshakes, 2);
    assert_ne!(slot.get().unwrap().params, first.params);
}

#[test]
fn sessions_are_keyed_by_host_and_port() {
    let mut f = Fixture::new();
    let slot = SessionSlot::new();
    f.conn.set_session(slot.clone());
    f.connect();

    f.conn.stop();
    f.conn.connect(HOST, 993).unwrap();
    assert!(f.peer().offered_sessions.is_empty());
    assert_eq!(slot.get().unwrap().port, 993);

    f.conn.stop();
    f.conn.set_insecure();
    f.conn.connect("other.example", 993).unwrap();
    assert!(f.peer().offered_sessions.is_empty());
}

#[test]
fn resumed_sessions_are_saved_again() {
    let mut f = Fixture::new();
    f.conn.set_session(SessionSlot::new());
    f.conn.set_session_timeout(300);
    f.connect();

    f.clock.advance(Duration::from_secs(299));
    reconnect(&mut f);
    assert_eq!(f.peer().resumed_handshakes, 1);

    // every handshake saves the session again
    f.clock.advance(Duration::from_secs(2));
    reconnect(&mut f);
    assert_eq!(f.peer().resumed_handshakes, 2);
    assert_eq!(f.peer().full_handshakes, 1);
}

#[test]
fn expired_sessions_are_not_offered() {
    let mut f = Fixture::new();
    f.conn.set_session(SessionSlot::new());
    f.conn.set_session_timeout(60);
    f.connect();

    f.clock.advance(Duration::from_secs(60));
    reconnect(&mut f);
    assert_eq!(f.peer().resumed_handshakes, 0);
    assert_eq!(f.peer().full_handshakes, 2);
}

#[test]
fn short_timeouts_are_raised_to_a_minute() {
    let mut f = Fixture::new();
    f.conn.set_session(SessionSlot::new());
    f.conn.set_session_timeout(5);
    f.connect();

    f.clock.advance(Duration::from_secs(30));
    reconnect(&mut f);
    assert_eq!(f.peer().resumed_handshakes, 1);
}

#[test]
fn zero_timeout_never_expires() {
    let mut f = Fixture::new();
    f.conn.set_session(SessionSlot::new());
    f.conn.set_session_timeout(0);
    f.connect();

    f.clock.advance(Duration::from_secs(30 * 24 * 3600));
    reconnect(&mut f);
    assert_eq!(f.peer().resumed_handshakes, 1);
}

#[test]
fn validate_keeps_a_fresh_connection_to_the_same_target() {
    let mut f = Fixture::new();
    f.conn.set_session_timeout(120);
    f.connect();

    assert!(f.conn.validate(HOST, 443));
    assert_eq!(f.conn.state(), &ConnectionState::Established);

    f.clock.advance(Duration::from_secs(119));
    assert!(f.conn.validate(HOST, 443));
}

#[test]
fn validate_drops_stale_or_mismatched_connections() {
    let mut f = Fixture::new();
    f.conn.set_session_timeout(120);
    f.connect();
    assert!(!f.conn.validate(HOST, 444));
    assert_eq!(f.conn.state(), &ConnectionState::Idle);
    assert_eq!(f.peer().alerts, vec![(1, 0)]);

    f.connect();
    assert!(!f.conn.validate("other.example", 443));
    assert_eq!(f.conn.state(), &ConnectionState::Idle);

    f.connect();
    f.clock.advance(Duration::from_secs(120));
    assert!(!f.conn.validate(HOST, 443));
    assert_eq!(f.conn.state(), &ConnectionState::Idle);

    // nothing to drop
    assert!(!f.conn.validate(HOST, 443));
}
