use core::fmt;

use pki_types::{CertificateDer, TrustAnchor};
use webpki::anchor_from_trusted_cert;

use crate::error::{CertificateError, Error};
#[allow(unused_imports)]
use crate::log::{debug, trace};
use crate::verify::pki_error;

/// A set of trust anchors a server chain must lead to.
#[derive(Clone, Default)]
pub struct RootCertStore {
    /// Parsed anchors, in insertion order.
    pub roots: Vec<TrustAnchor<'static>>,
}

impl RootCertStore {
    /// A store with no anchors; nothing validates against it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds the anchor in `der`, a trusted certificate.
    ///
    /// Fails with the reason webpki gives when `der` does not parse.
    pub fn add(&mut self, der: CertificateDer<'_>) -> Result<(), Error> {
        let anchor = anchor_from_trusted_cert(&der).map_err(pki_error)?;
        self.roots.push(anchor.to_owned());
        Ok(())
    }

    /// Adds whichever of `certs` parse and skips the rest.
    ///
    /// Returns how many were added.  Used for anchors fetched from a
    /// [`CertificateStore`], where one bad entry must not hide the others.
    pub fn add_store_results<'a>(
        &mut self,
        certs: impl IntoIterator<Item = CertificateDer<'a>>,
    ) -> usize {
        let before = self.roots.len();
        for cert in certs {
            if let Err(_e) = self.add(cert) {
                trace!("skipping unusable anchor: {}", _e);
            }
        }
        self.roots.len() - before
    }

    /// Whether the store holds no anchors.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.roots.len()
    }
}

impl fmt::Debug for RootCertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootCertStore({} anchors)", self.roots.len())
    }
}

/// A source of trust anchors consulted only when a server chain arrives.
///
/// Useful when the full anchor set is too large to keep parsed in memory:
/// the verifier asks only for the subjects the presented chain names as
/// issuers.
pub trait CertificateStore: fmt::Debug + Send + Sync {
    /// Trust anchor certificates whose subject is `subject`, a DER
    /// `Name` including its SEQUENCE header.
    fn find_by_subject(
        &self,
        subject: &[u8],
    ) -> Result<Vec<CertificateDer<'static>>, CertificateError>;
}

/// A [`CertificateStore`] over certificates held in memory, indexed by
/// subject when added.
#[derive(Debug, Default, Clone)]
pub struct MemoryCertificateStore {
    entries: Vec<(Vec<u8>, CertificateDer<'static>)>,
}

impl MemoryCertificateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a certificate, failing if its subject cannot be read.
    pub fn add(&mut self, der: CertificateDer<'static>) -> Result<(), Error> {
        let subject = crate::x509::CertificateParts::parse(der.as_ref())
            .map_err(|_| Error::InvalidCredential)?
            .subject
            .to_vec();
        trace!("certificate store: added subject of {} bytes", subject.len());
        self.entries.push((subject, der));
        Ok(())
    }

    /// Number of stored certificates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn find_by_subject(
        &self,
        subject: &[u8],
    ) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
        Ok(self
            .entries
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, der)| der.clone())
            .collect())
    }
}
