use std::time::Duration;

use crate::buffer::{BufferMode, BufferSizes};
use crate::error::Error;
#[allow(unused_imports)]
use crate::log::{debug, trace};
use crate::msgs::enums::{CipherSuite, ProtocolVersion};
use crate::session::SessionTimeout;
use crate::suites::{self, RecordOverhead, SupportedCipherSuite};
use crate::transport::is_secure_port;

/// Common configuration for a [`Connection`](crate::Connection).
///
/// Everything here is read when a handshake starts; changing it on an
/// established connection affects the next one.
///
/// # Defaults
///
/// * [`ClientConfig::io_timeout`]: 15 seconds.
/// * [`ClientConfig::handshake_timeout`]: 60 seconds.
/// * [`ClientConfig::session_timeout`]: expiry disabled.
/// * [`ClientConfig::buffer_sizes`]: 16384 bytes each way.
/// * [`ClientConfig::buffer_mode`]: full duplex.
/// * protocol versions: TLS1.0 to TLS1.2.
/// * cipher suites: [`DEFAULT_CIPHER_SUITES`](crate::DEFAULT_CIPHER_SUITES).
/// * [`ClientConfig::ssl_mode`]: `None`, so the port decides.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Bound on each application read, write or flush.
    pub io_timeout: Duration,

    /// Bound on the whole handshake.
    pub handshake_timeout: Duration,

    /// How long a saved session may be offered again.
    pub session_timeout: SessionTimeout,

    /// Plaintext capacity of the record buffers.
    pub buffer_sizes: BufferSizes,

    /// Whether the record buffers are shared between directions.
    pub buffer_mode: BufferMode,

    /// Whether to run TLS at all.  `None` enables it only for the
    /// well-known secure ports (see [`is_secure_port`]).
    pub ssl_mode: Option<bool>,

    min_version: ProtocolVersion,
    max_version: ProtocolVersion,
    cipher_suites: Vec<&'static SupportedCipherSuite>,
}

impl ClientConfig {
    /// Default timeout for application I/O.
    pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(15);

    /// Default timeout for the handshake.
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a configuration with the defaults listed above.
    pub fn new() -> Self {
        Self {
            io_timeout: Self::DEFAULT_IO_TIMEOUT,
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            session_timeout: SessionTimeout::default(),
            buffer_sizes: BufferSizes::default(),
            buffer_mode: BufferMode::default(),
            ssl_mode: None,
            min_version: ProtocolVersion::TLSv1_0,
            max_version: ProtocolVersion::TLSv1_2,
            cipher_suites: suites::DEFAULT_CIPHER_SUITES.to_vec(),
        }
    }

    /// Restricts the negotiated version to `min..=max`.
    ///
    /// Both must lie in TLS1.0..=TLS1.2 and `min` must not exceed `max`;
    /// otherwise the previous bounds are kept.
    pub fn set_versions(&mut self, min: ProtocolVersion, max: ProtocolVersion) -> Result<(), Error> {
        let lo = u16::from(ProtocolVersion::TLSv1_0);
        let hi = u16::from(ProtocolVersion::TLSv1_2);
        let (min_v, max_v) = (u16::from(min), u16::from(max));
        if !(lo..=hi).contains(&min_v) || !(lo..=hi).contains(&max_v) || min_v > max_v {
            return Err(Error::InvalidVersionRange);
        }
        trace!("protocol versions {:?}..={:?}", min, max);
        self.min_version = min;
        self.max_version = max;
        Ok(())
    }

    /// The lowest version that will be negotiated.
    pub fn min_version(&self) -> ProtocolVersion {
        self.min_version
    }

    /// The highest version that will be negotiated.
    pub fn max_version(&self) -> ProtocolVersion {
        self.max_version
    }

    /// Offers exactly `suites`, in this order.
    pub fn set_cipher_suites(&mut self, suites: &[CipherSuite]) -> Result<(), Error> {
        self.cipher_suites = suites::resolve(suites)?;
        Ok(())
    }

    /// Offers only the static-RSA suites, for servers too old for ECDHE.
    pub fn set_cipher_suites_less_secure(&mut self) {
        self.cipher_suites = suites::LESS_SECURE_CIPHER_SUITES.to_vec();
    }

    /// The configured suites, most preferred first.
    pub fn cipher_suites(&self) -> &[&'static SupportedCipherSuite] {
        &self.cipher_suites
    }

    /// The configured suites that can be used at the highest allowed version.
    pub(crate) fn offered_suites(&self) -> Result<Vec<&'static SupportedCipherSuite>, Error> {
        let offered: Vec<_> = self
            .cipher_suites
            .iter()
            .copied()
            .filter(|s| s.usable_with(self.max_version))
            .collect();
        if offered.is_empty() {
            debug!(
                "no configured suite is usable up to {:?}",
                self.max_version
            );
            return Err(Error::UnsupportedCipherSuite);
        }
        Ok(offered)
    }

    /// Space the record buffers reserve on top of the plaintext sizes.
    pub fn record_overhead(&self) -> RecordOverhead {
        RecordOverhead::for_suites(&self.cipher_suites)
    }

    /// Whether a connection to `port` runs TLS.
    pub fn ssl_enabled_for(&self, port: u16) -> bool {
        self.ssl_mode
            .unwrap_or_else(|| is_secure_port(port))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
