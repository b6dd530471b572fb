use core::fmt;
use std::sync::{Arc, Mutex};

use pki_types::{CertificateDer, ServerName, SignatureVerificationAlgorithm, SubjectPublicKeyInfoDer, UnixTime};

use crate::anchors::{CertificateStore, RootCertStore};
use crate::error::{CertificateError, Error};
#[allow(unused_imports)]
use crate::log::{debug, trace, warn};
use crate::x509::CertificateParts;

/// Which operations a known server key may be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyUsages(u8);

impl KeyUsages {
    /// The key may be used for key exchange (static RSA, ECDH).
    pub const KEY_EXCHANGE: Self = Self(0x10);
    /// The key may be used to sign (ECDHE suites).
    pub const SIGN: Self = Self(0x20);
    /// Both of the above.
    pub const ALL: Self = Self(0x30);

    /// Whether every usage in `other` is allowed here.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw usage bits.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr for KeyUsages {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The key the engine should use for the server after verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerKey {
    /// Use the public key in the server's end-entity certificate.
    FromCertificate,
    /// Ignore the certificate and use this key.
    Known {
        /// The key, as `SubjectPublicKeyInfo` DER.
        key: SubjectPublicKeyInfoDer<'static>,
        /// What the key may be used for.
        usages: KeyUsages,
    },
}

/// Zero-sized marker type representing verification of a server cert chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCertVerified {
    peer_key: PeerKey,
}

impl ServerCertVerified {
    /// Make a `ServerCertVerified`
    pub fn assertion() -> Self {
        Self {
            peer_key: PeerKey::FromCertificate,
        }
    }

    /// A verification outcome that pins the server key to `key`.
    pub fn with_known_key(key: SubjectPublicKeyInfoDer<'static>, usages: KeyUsages) -> Self {
        Self {
            peer_key: PeerKey::Known { key, usages },
        }
    }

    /// The key the engine should use for the server.
    pub fn peer_key(&self) -> &PeerKey {
        &self.peer_key
    }
}

/// Something that can verify a server certificate chain.
///
/// The engine calls this from its certificate-received step, with the
/// chain exactly as the server sent it.
pub trait ServerCertVerifier: fmt::Debug + Send + Sync {
    /// Verify the end-entity certificate `end_entity` is valid for the
    /// hostname `server_name` and chains to at least one trust anchor.
    ///
    /// `server_name` is `None` when the target is not a valid DNS name or
    /// IP address.
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: Option<&ServerName<'_>>,
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error>;
}

/// Accepts any certificate, checking nothing.
#[derive(Debug, Default)]
pub struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: Option<&ServerName<'_>>,
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        warn!("accepting server certificate without verification");
        Ok(ServerCertVerified::assertion())
    }
}

/// The length of a SHA-1 certificate fingerprint.
pub const FINGERPRINT_LEN: usize = 20;

/// Accepts exactly the certificate whose SHA-1 digest is pinned.
///
/// The chain is not validated: a match is sufficient.
#[derive(Debug)]
pub struct FingerprintVerifier {
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl FingerprintVerifier {
    /// Pins `fingerprint`.
    pub fn new(fingerprint: [u8; FINGERPRINT_LEN]) -> Self {
        Self { fingerprint }
    }
}

/// The SHA-1 digest of `der`.
pub fn certificate_fingerprint(der: &[u8]) -> [u8; FINGERPRINT_LEN] {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, der);
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(digest.as_ref());
    out
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: Option<&ServerName<'_>>,
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if end_entity.is_empty() {
            return Err(CertificateError::NoCertificatesPresented.into());
        }
        match certificate_fingerprint(end_entity) == self.fingerprint {
            true => Ok(ServerCertVerified::assertion()),
            false => Err(CertificateError::FingerprintMismatch.into()),
        }
    }
}

/// Ignores the chain and uses a preconfigured server key.
#[derive(Debug)]
pub struct KnownKeyVerifier {
    key: SubjectPublicKeyInfoDer<'static>,
    usages: KeyUsages,
}

impl KnownKeyVerifier {
    /// Uses `key` for `usages`.
    pub fn new(key: SubjectPublicKeyInfoDer<'static>, usages: KeyUsages) -> Self {
        Self { key, usages }
    }
}

impl ServerCertVerifier for KnownKeyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: Option<&ServerName<'_>>,
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::with_known_key(
            self.key.clone(),
            self.usages,
        ))
    }
}

/// Accepts a leaf whose issuer is its own subject.  Nothing else about
/// the certificate is checked.
#[derive(Debug, Default)]
pub struct SelfSignedVerifier;

impl ServerCertVerifier for SelfSignedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: Option<&ServerName<'_>>,
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let parts = CertificateParts::parse(end_entity)
            .map_err(|_| CertificateError::BadEncoding)?;
        match parts.is_self_issued() {
            true => Ok(ServerCertVerified::assertion()),
            false => Err(CertificateError::NotSelfSigned.into()),
        }
    }
}

/// Default `ServerCertVerifier`, checking the chain against a fixed set of
/// trust anchors and the certificate against the server name.
#[derive(Debug, Clone)]
pub struct WebPkiVerifier {
    roots: Arc<RootCertStore>,
}

impl WebPkiVerifier {
    /// Constructs a new `WebPkiVerifier`.
    pub fn new(roots: impl Into<Arc<RootCertStore>>) -> Self {
        Self {
            roots: roots.into(),
        }
    }
}

impl ServerCertVerifier for WebPkiVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: Option<&ServerName<'_>>,
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        verify_chain(&self.roots, end_entity, intermediates, server_name, now)
    }
}

/// Verifies against anchors fetched from a [`CertificateStore`] for the
/// issuers the presented chain names.
#[derive(Debug, Clone)]
pub struct StoreVerifier {
    store: Arc<dyn CertificateStore>,
}

impl StoreVerifier {
    /// Consults `store` on each verification.
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self { store }
    }
}

impl ServerCertVerifier for StoreVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: Option<&ServerName<'_>>,
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let mut roots = RootCertStore::empty();
        for cert in core::iter::once(end_entity).chain(intermediates) {
            let parts =
                CertificateParts::parse(cert).map_err(|_| CertificateError::BadEncoding)?;
            let found = self.store.find_by_subject(parts.issuer)?;
            trace!("certificate store offered {} anchors", found.len());
            roots.add_store_results(found);
        }
        if roots.is_empty() {
            return Err(CertificateError::UnknownIssuer.into());
        }
        verify_chain(&roots, end_entity, intermediates, server_name, now)
    }
}

static SUPPORTED_SIG_ALGS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P256_SHA384,
    webpki::ring::ECDSA_P384_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
    webpki::ring::ED25519,
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
    webpki::ring::RSA_PKCS1_3072_8192_SHA384,
    webpki::ring::RSA_PSS_2048_8192_SHA256_LEGACY_KEY,
    webpki::ring::RSA_PSS_2048_8192_SHA384_LEGACY_KEY,
    webpki::ring::RSA_PSS_2048_8192_SHA512_LEGACY_KEY,
];

fn verify_chain(
    roots: &RootCertStore,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    server_name: Option<&ServerName<'_>>,
    now: UnixTime,
) -> Result<ServerCertVerified, Error> {
    let cert = webpki::EndEntityCert::try_from(end_entity).map_err(pki_error)?;
    cert.verify_for_usage(
        SUPPORTED_SIG_ALGS,
        &roots.roots,
        intermediates,
        now,
        webpki::KeyUsage::server_auth(),
        None,
        None,
    )
    .map_err(pki_error)?;

    let server_name = server_name.ok_or(CertificateError::NotValidForName)?;
    cert.verify_is_valid_for_subject_name(server_name)
        .map_err(pki_error)?;
    Ok(ServerCertVerified::assertion())
}

pub(crate) fn pki_error(error: webpki::Error) -> Error {
    use webpki::Error::*;
    let reason = match error {
        BadDer { .. } | BadDerTime { .. } | TrailingData { .. } => CertificateError::BadEncoding,
        CertNotValidYet { .. } => CertificateError::NotValidYet,
        CertExpired { .. } | InvalidCertValidity { .. } => CertificateError::Expired,
        UnknownIssuer { .. } => CertificateError::UnknownIssuer,
        CertNotValidForName { .. } => CertificateError::NotValidForName,
        InvalidSignatureForPublicKey { .. } => CertificateError::BadSignature,
        CaUsedAsEndEntity { .. } => CertificateError::InvalidPurpose,
        _ => CertificateError::Other(format!("{:?}", error)),
    };
    Error::CertificateRejected(reason)
}

/// Wraps the materialised verifier and remembers why it last said no.
#[derive(Debug)]
pub(crate) struct RecordingVerifier {
    inner: Arc<dyn ServerCertVerifier>,
    last_rejection: Mutex<Option<CertificateError>>,
}

impl RecordingVerifier {
    pub(crate) fn new(inner: Arc<dyn ServerCertVerifier>) -> Self {
        Self {
            inner,
            last_rejection: Mutex::new(None),
        }
    }

    /// The reason for the most recent rejection, if any.
    pub(crate) fn last_rejection(&self) -> Option<CertificateError> {
        self.last_rejection
            .lock()
            .ok()
            .and_then(|r| r.clone())
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: Option<&ServerName<'_>>,
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let result = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, now);
        let rejection = match &result {
            Ok(_) => None,
            Err(Error::CertificateRejected(why)) => Some(why.clone()),
            Err(other) => Some(CertificateError::Other(other.to_string())),
        };
        if let Some(_why) = &rejection {
            debug!("server certificate rejected: {:?}", _why);
        }
        if let Ok(mut slot) = self.last_rejection.lock() {
            *slot = rejection;
        }
        result
    }
}
