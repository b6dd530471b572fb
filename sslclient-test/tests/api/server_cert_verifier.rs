//! Trust policies: how the server's certificate is judged.

use std::sync::Arc;
use std::time::Duration;

use pki_types::{CertificateDer, SubjectPublicKeyInfoDer, UnixTime};
use sslclient::{
    certificate_fingerprint, CertificateError, ConnectionState, EngineError, Error, KeyUsages,
    MemoryCertificateStore, RootCertStore, TrustPolicy,
};
use sslclient_test::TestPki;

use super::{Fixture, HOST, NOW};

fn rejected(why: CertificateError) -> Result<(), Error> {
    Err(Error::CertificateRejected(why))
}

fn assert_rejected(f: &mut Fixture, why: CertificateError) {
    let code = why.engine_code();
    assert_eq!(f.conn.connect(HOST, 443), rejected(why.clone()));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::CertificateRejected(why))
    );
    assert_eq!(f.conn.last_ssl_error().unwrap().code, code);
    assert_eq!(f.provider.live(), 0);
}

#[test]
fn chain_to_installed_ca_is_accepted() {
    let mut f = Fixture::new();
    f.connect();
    assert!(matches!(
        f.conn.trust().policy(),
        Some(TrustPolicy::TrustAnchorSet(_))
    ));
    assert_eq!(f.conn.last_ssl_error(), None);
}

#[test]
fn certificate_must_name_the_host() {
    let mut f = Fixture::new();
    assert_eq!(
        f.conn.connect("elsewhere.example", 443),
        rejected(CertificateError::NotValidForName)
    );
    assert_eq!(
        f.conn.last_ssl_error().unwrap().code,
        EngineError::X509_BAD_SERVER_NAME
    );
}

#[test]
fn unknown_ca_is_rejected() {
    let mut f = Fixture::new();
    let stranger = TestPki::new(HOST);
    f.conn
        .set_ca_cert(stranger.ca_pem.as_bytes())
        .unwrap();
    assert_rejected(&mut f, CertificateError::UnknownIssuer);
}

#[test]
fn trust_anchors_from_a_root_store() {
    let mut f = Fixture::new();
    let mut roots = RootCertStore::empty();
    roots
        .add(f.pki.ca_cert.clone())
        .unwrap();
    f.conn.set_trust_anchors(roots);
    f.connect();
}

#[test]
fn trust_anchors_from_a_reader() {
    let mut f = Fixture::new();
    let pem = f.pki.ca_pem.clone();
    f.conn.set_insecure();
    f.conn
        .load_ca_cert(pem.as_bytes(), pem.len())
        .unwrap();
    assert!(!f.conn.trust().is_insecure());
    f.connect();

    assert_eq!(
        f.conn
            .load_ca_cert(pem.as_bytes(), pem.len() + 1),
        Err(Error::InvalidCredential)
    );
}

#[test]
fn unparsable_ca_keeps_the_previous_policy() {
    let mut f = Fixture::new();
    assert_eq!(
        f.conn.set_ca_cert(b"not a certificate"),
        Err(Error::InvalidCredential)
    );
    f.connect();
}

#[test]
fn certificate_store_is_consulted_on_demand() {
    let mut f = Fixture::new();
    let mut store = MemoryCertificateStore::new();
    store
        .add(TestPki::new("unrelated.example").ca_cert)
        .unwrap();
    store
        .add(f.pki.ca_cert.clone())
        .unwrap();
    f.conn
        .set_certificate_store(Arc::new(store));
    f.connect();
}

#[test]
fn certificate_store_without_the_issuer_rejects() {
    let mut f = Fixture::new();
    f.conn
        .set_certificate_store(Arc::new(MemoryCertificateStore::new()));
    assert_rejected(&mut f, CertificateError::UnknownIssuer);
}

#[test]
fn fingerprint_pins_the_leaf() {
    let mut f = Fixture::new();
    f.conn
        .set_fingerprint(certificate_fingerprint(&f.pki.end_entity));
    f.connect();

    let hex = certificate_fingerprint(&f.pki.end_entity)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":");
    f.conn.set_fingerprint_hex(&hex).unwrap();
    f.connect();
}

#[test]
fn fingerprint_replaces_the_ca() {
    let mut f = Fixture::new();
    f.conn
        .set_fingerprint(certificate_fingerprint(&f.pki.ca_cert));
    assert_rejected(&mut f, CertificateError::FingerprintMismatch);
}

#[test]
fn malformed_fingerprints_are_refused() {
    let mut f = Fixture::new();
    assert_eq!(
        f.conn.set_fingerprint_hex("00112233"),
        Err(Error::InvalidFingerprint)
    );
    assert_eq!(
        f.conn
            .set_fingerprint_hex(&"zz".repeat(20)),
        Err(Error::InvalidFingerprint)
    );
    assert!(matches!(
        f.conn.trust().policy(),
        Some(TrustPolicy::TrustAnchorSet(_))
    ));
}

#[test]
fn known_key_skips_the_chain() {
    let mut f = Fixture::with(|b| b.chain = vec![CertificateDer::from(vec![0x30, 0x00])]);
    f.conn
        .set_known_key(f.pki.end_entity_spki.clone(), KeyUsages::ALL);
    f.connect();
}

#[test]
fn known_key_must_match_the_server_key() {
    let mut f = Fixture::new();
    f.conn.set_known_key(
        SubjectPublicKeyInfoDer::from(vec![0x30, 0x03, 0x01, 0x02, 0x03]),
        KeyUsages::SIGN,
    );
    assert_eq!(
        f.conn.connect(HOST, 443),
        Err(Error::HandshakeFailed(EngineError::BAD_SIGNATURE))
    );
    assert_eq!(
        f.conn.last_ssl_error().unwrap().code,
        EngineError::BAD_SIGNATURE
    );
}

#[test]
fn self_signed_leaf_is_accepted_when_allowed() {
    let mut f = Fixture::new();
    let leaf = f.pki.self_signed.clone();
    f.peer().behaviour.chain = vec![leaf];
    f.conn.allow_self_signed_certs();
    f.connect();
}

#[test]
fn ca_issued_leaf_is_not_self_signed() {
    let mut f = Fixture::new();
    f.conn.allow_self_signed_certs();
    assert_rejected(&mut f, CertificateError::NotSelfSigned);
}

#[test]
fn self_signed_leaf_fails_chain_validation() {
    let mut f = Fixture::new();
    let leaf = f.pki.self_signed.clone();
    f.peer().behaviour.chain = vec![leaf];
    assert_rejected(&mut f, CertificateError::UnknownIssuer);
}

#[test]
fn insecure_accepts_anything() {
    let mut f = Fixture::with(|b| b.chain = vec![CertificateDer::from(vec![1, 2, 3])]);
    f.conn.set_insecure();
    assert!(f.conn.trust().is_insecure());
    f.connect();
}

#[test]
fn empty_chain_is_rejected() {
    let mut f = Fixture::with(|b| b.chain = Vec::new());
    assert_eq!(
        f.conn.connect(HOST, 443),
        Err(Error::HandshakeFailed(EngineError::X509_EMPTY_CHAIN))
    );
}

#[test]
fn a_trust_policy_is_required() {
    let mut f = Fixture::new();
    f.conn
        .trust_mut()
        .clear_authentication_settings();
    assert_eq!(f.conn.connect(HOST, 443), Err(Error::NoTrustPolicy));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::NoTrustPolicy)
    );
    assert_eq!(f.provider.created(), 0);

    // plain connections need none
    f.conn.connect(HOST, 80).unwrap();
}

#[test]
fn verification_time_defaults_to_the_clock() {
    let mut f = Fixture::new();
    f.clock.advance(Duration::from_secs(5));
    f.connect();
    assert_eq!(
        f.provider
            .last_config()
            .unwrap()
            .verification_time
            .as_secs(),
        NOW + 5
    );
}

#[test]
fn explicit_verification_time_is_used() {
    let mut f = Fixture::new();
    let early = UnixTime::since_unix_epoch(Duration::from_secs(86_400));
    f.conn.set_x509_time(early);
    assert_rejected(&mut f, CertificateError::NotValidYet);
    assert_eq!(
        f.provider
            .last_config()
            .unwrap()
            .verification_time,
        early
    );
}

#[test]
fn client_certificate_is_sent_on_request() {
    let mut f = Fixture::with(|b| b.request_client_auth = true);
    let pki = f.pki.clone();
    f.conn
        .set_secure(
            None,
            Some(pki.client_cert_pem.as_bytes()),
            Some(pki.client_key_pem.as_bytes()),
        )
        .unwrap();
    f.connect();

    assert!(f.provider.last_config().unwrap().client_auth);
    let received = f.peer().client_certificates.clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 1);
}

#[test]
fn client_certificate_from_readers() {
    let mut f = Fixture::with(|b| b.request_client_auth = true);
    let pki = f.pki.clone();
    f.conn
        .load_certificate(pki.client_cert_pem.as_bytes(), pki.client_cert_pem.len())
        .unwrap();
    f.conn
        .load_private_key(pki.client_key_pem.as_bytes(), pki.client_key_pem.len())
        .unwrap();
    f.connect();
    assert_eq!(f.peer().client_certificates.len(), 1);
}

#[test]
fn missing_client_certificate_fails_the_handshake() {
    let mut f = Fixture::with(|b| b.request_client_auth = true);
    assert_eq!(
        f.conn.connect(HOST, 443),
        Err(Error::HandshakeFailed(EngineError::NO_CLIENT_AUTH))
    );
    assert!(!f.provider.last_config().unwrap().client_auth);

    // a certificate without its key is not offered
    let pki = f.pki.clone();
    f.conn
        .set_certificate(pki.client_cert_pem.as_bytes())
        .unwrap();
    assert!(f.conn.connect(HOST, 443).is_err());
    assert!(!f.provider.last_config().unwrap().client_auth);
}

#[test]
fn bad_credentials_are_refused() {
    let mut f = Fixture::new();
    assert_eq!(
        f.conn.set_certificate(b"garbage"),
        Err(Error::InvalidCredential)
    );
    assert_eq!(
        f.conn.set_private_key(b"garbage"),
        Err(Error::InvalidCredential)
    );
}
