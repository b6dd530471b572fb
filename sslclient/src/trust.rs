use core::fmt;
use std::io::Read;
use std::sync::Arc;

use pki_types::pem::PemObject;
use pki_types::{CertificateDer, PrivateKeyDer, SubjectPublicKeyInfoDer, UnixTime};

use crate::anchors::{CertificateStore, RootCertStore};
use crate::engine::{ClientCredential, IssuerKeyType};
use crate::error::Error;
#[allow(unused_imports)]
use crate::log::{debug, trace, warn};
use crate::verify::{
    FingerprintVerifier, InsecureVerifier, KeyUsages, KnownKeyVerifier, RecordingVerifier,
    SelfSignedVerifier, ServerCertVerifier, StoreVerifier, WebPkiVerifier, FINGERPRINT_LEN,
};

/// How the server's certificate is judged.  Exactly one is active.
#[derive(Clone)]
pub enum TrustPolicy {
    /// Accept any certificate.  Only for testing against known hosts.
    InsecureAny,
    /// Accept only the leaf with this SHA-1 digest; no chain validation.
    Fingerprint([u8; FINGERPRINT_LEN]),
    /// Ignore the chain and use this server key.
    KnownPublicKey {
        /// The server key, as `SubjectPublicKeyInfo` DER.
        key: SubjectPublicKeyInfoDer<'static>,
        /// What the key may be used for.
        usages: KeyUsages,
    },
    /// Validate the chain against these anchors and check the name.
    TrustAnchorSet(Arc<RootCertStore>),
    /// Validate against anchors looked up in a store when the chain arrives.
    DynamicCertificateStore(Arc<dyn CertificateStore>),
    /// Accept a leaf whose issuer is its own subject.
    SelfSigned,
}

impl TrustPolicy {
    fn name(&self) -> &'static str {
        match self {
            Self::InsecureAny => "InsecureAny",
            Self::Fingerprint(_) => "Fingerprint",
            Self::KnownPublicKey { .. } => "KnownPublicKey",
            Self::TrustAnchorSet(_) => "TrustAnchorSet",
            Self::DynamicCertificateStore(_) => "DynamicCertificateStore",
            Self::SelfSigned => "SelfSigned",
        }
    }

    fn verifier(&self) -> Arc<dyn ServerCertVerifier> {
        match self {
            Self::InsecureAny => Arc::new(InsecureVerifier),
            Self::Fingerprint(fp) => Arc::new(FingerprintVerifier::new(*fp)),
            Self::KnownPublicKey { key, usages } => {
                Arc::new(KnownKeyVerifier::new(key.clone(), *usages))
            }
            Self::TrustAnchorSet(roots) => Arc::new(WebPkiVerifier::new(roots.clone())),
            Self::DynamicCertificateStore(store) => Arc::new(StoreVerifier::new(store.clone())),
            Self::SelfSigned => Arc::new(SelfSignedVerifier),
        }
    }
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trust policy, client credential and reference time for a connection.
#[derive(Clone, Debug, Default)]
pub struct TrustConfig {
    policy: Option<TrustPolicy>,
    client_chain: Vec<CertificateDer<'static>>,
    client_key: Option<Arc<PrivateKeyDer<'static>>>,
    client_usages: Option<(KeyUsages, IssuerKeyType)>,
    x509_time: Option<UnixTime>,
}

impl TrustConfig {
    /// The active policy, if any.
    pub fn policy(&self) -> Option<&TrustPolicy> {
        self.policy.as_ref()
    }

    /// Whether certificate validation is disabled.
    pub fn is_insecure(&self) -> bool {
        matches!(self.policy, Some(TrustPolicy::InsecureAny))
    }

    fn install(&mut self, policy: TrustPolicy) {
        if let Some(_old) = &self.policy {
            trace!("trust policy {:?} replaced by {:?}", _old, policy);
        }
        self.policy = Some(policy);
    }

    /// Disables certificate validation.
    pub fn set_insecure(&mut self) {
        warn!("certificate validation disabled");
        self.install(TrustPolicy::InsecureAny);
    }

    /// Pins the leaf certificate's SHA-1 digest.
    pub fn set_fingerprint(&mut self, fingerprint: [u8; FINGERPRINT_LEN]) {
        self.install(TrustPolicy::Fingerprint(fingerprint));
    }

    /// Pins a digest given as 40 hex digits, optionally separated by
    /// spaces or colons.
    pub fn set_fingerprint_hex(&mut self, fingerprint: &str) -> Result<(), Error> {
        let fp = parse_fingerprint(fingerprint)?;
        self.set_fingerprint(fp);
        Ok(())
    }

    /// Uses `key` as the server key without looking at its certificate.
    pub fn set_known_key(&mut self, key: SubjectPublicKeyInfoDer<'static>, usages: KeyUsages) {
        self.install(TrustPolicy::KnownPublicKey { key, usages });
    }

    /// Validates against `roots`.
    pub fn set_trust_anchors(&mut self, roots: impl Into<Arc<RootCertStore>>) {
        self.install(TrustPolicy::TrustAnchorSet(roots.into()));
    }

    /// Validates against every certificate in a PEM bundle.
    pub fn set_ca_cert_pem(&mut self, pem: &[u8]) -> Result<(), Error> {
        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_slice_iter(pem) {
            let cert = cert.map_err(|_| Error::InvalidCredential)?;
            roots
                .add(cert)
                .map_err(|_| Error::InvalidCredential)?;
        }
        if roots.is_empty() {
            return Err(Error::InvalidCredential);
        }
        debug!("installed {} trust anchors from PEM", roots.len());
        self.set_trust_anchors(roots);
        Ok(())
    }

    /// Reads `size` bytes of PEM from `reader` and installs them as anchors.
    pub fn load_ca_cert(&mut self, reader: impl Read, size: usize) -> Result<(), Error> {
        let pem = read_sized(reader, size)?;
        self.set_ca_cert_pem(&pem)
    }

    /// Validates against anchors looked up in `store` during the handshake.
    pub fn set_certificate_store(&mut self, store: Arc<dyn CertificateStore>) {
        self.install(TrustPolicy::DynamicCertificateStore(store));
    }

    /// Accepts self-signed server certificates.
    pub fn allow_self_signed(&mut self) {
        self.install(TrustPolicy::SelfSigned);
    }

    /// Offers an RSA client certificate when asked.
    pub fn set_client_rsa_cert(
        &mut self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) {
        self.client_chain = chain;
        self.client_key = Some(Arc::new(key));
        self.client_usages = Some((KeyUsages::SIGN, IssuerKeyType::Rsa));
    }

    /// Offers an EC client certificate when asked.
    pub fn set_client_ec_cert(
        &mut self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        usages: KeyUsages,
        issuer_key_type: IssuerKeyType,
    ) {
        self.client_chain = chain;
        self.client_key = Some(Arc::new(key));
        self.client_usages = Some((usages, issuer_key_type));
    }

    /// Sets the client certificate chain from PEM.  Takes effect once a
    /// private key is also set.
    pub fn set_certificate_pem(&mut self, pem: &[u8]) -> Result<(), Error> {
        let chain = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidCredential)?;
        if chain.is_empty() {
            return Err(Error::InvalidCredential);
        }
        self.client_chain = chain;
        Ok(())
    }

    /// Sets the client private key from PEM.
    pub fn set_private_key_pem(&mut self, pem: &[u8]) -> Result<(), Error> {
        let key = PrivateKeyDer::from_pem_slice(pem).map_err(|_| Error::InvalidCredential)?;
        let usages = match key {
            PrivateKeyDer::Sec1(_) => (KeyUsages::ALL, IssuerKeyType::Ec),
            _ => (KeyUsages::SIGN, IssuerKeyType::Rsa),
        };
        self.client_key = Some(Arc::new(key));
        self.client_usages = Some(usages);
        Ok(())
    }

    /// Reads `size` bytes of PEM certificate chain from `reader`.
    pub fn load_certificate(&mut self, reader: impl Read, size: usize) -> Result<(), Error> {
        let pem = read_sized(reader, size)?;
        self.set_certificate_pem(&pem)
    }

    /// Reads `size` bytes of PEM private key from `reader`.
    pub fn load_private_key(&mut self, reader: impl Read, size: usize) -> Result<(), Error> {
        let pem = read_sized(reader, size)?;
        self.set_private_key_pem(&pem)
    }

    /// The client credential, once both a chain and a key are set.
    pub fn client_credential(&self) -> Option<ClientCredential> {
        let key = self.client_key.as_ref()?;
        if self.client_chain.is_empty() {
            return None;
        }
        let (usages, issuer_key_type) = self.client_usages?;
        Some(ClientCredential {
            chain: self.client_chain.clone(),
            key: key.clone_key(),
            usages,
            issuer_key_type,
        })
    }

    /// Validates certificates as of `time` instead of the clock's time.
    pub fn set_x509_time(&mut self, time: UnixTime) {
        self.x509_time = Some(time);
    }

    /// The reference time for certificate validity, if one was set.
    pub fn x509_time(&self) -> Option<UnixTime> {
        self.x509_time
    }

    /// Forgets the trust policy and the client credential.
    pub fn clear_authentication_settings(&mut self) {
        self.policy = None;
        self.client_chain.clear();
        self.client_key = None;
        self.client_usages = None;
    }

    /// Builds the validator for the active policy.
    pub(crate) fn materialize(&self) -> Result<Arc<RecordingVerifier>, Error> {
        let policy = self
            .policy
            .as_ref()
            .ok_or(Error::NoTrustPolicy)?;
        trace!("materializing {:?} verifier", policy);
        Ok(Arc::new(RecordingVerifier::new(policy.verifier())))
    }
}

fn read_sized(reader: impl Read, size: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| Error::OutOfMemory)?;
    reader
        .take(size as u64)
        .read_to_end(&mut buf)
        .map_err(|e| Error::General(format!("reading credential: {}", e)))?;
    if buf.len() != size {
        return Err(Error::InvalidCredential);
    }
    Ok(buf)
}

fn parse_fingerprint(text: &str) -> Result<[u8; FINGERPRINT_LEN], Error> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !matches!(b, b' ' | b':'))
        .collect();
    if digits.len() != FINGERPRINT_LEN * 2 {
        return Err(Error::InvalidFingerprint);
    }

    let mut out = [0u8; FINGERPRINT_LEN];
    for (byte, pair) in out.iter_mut().zip(digits.chunks_exact(2)) {
        let hi = hex_value(pair[0]).ok_or(Error::InvalidFingerprint)?;
        let lo = hex_value(pair[1]).ok_or(Error::InvalidFingerprint)?;
        *byte = hi << 4 | lo;
    }
    Ok(out)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
