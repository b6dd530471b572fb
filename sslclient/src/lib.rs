//! # sslclient - a TLS client adapter for polled byte streams
//!
//! sslclient turns a socket-like [`Transport`] and an external TLS record
//! [`Engine`](engine::Engine) into one object, [`Connection`], that reads
//! and writes like a plain stream.  It is aimed at small devices, where the
//! transport is polled rather than blocking and memory for record buffers
//! is scarce.
//!
//! The crate does not implement TLS cryptography.  It owns everything
//! around the engine:
//!
//! - sizing and allocating the record buffers ([`BufferSizes`]),
//! - choosing how the server certificate is judged ([`TrustPolicy`]),
//! - resuming saved sessions ([`SessionSlot`]),
//! - pumping bytes between transport and engine within bounded timeouts,
//! - probing whether a server honours a smaller maximum fragment length
//!   ([`probe_max_fragment_length`]).
//!
//! ## Getting started
//!
//! ```rust,ignore
//! use std::io::{Read, Write};
//! use std::sync::Arc;
//!
//! let mut conn = sslclient::Connection::new(
//!     sslclient::TcpTransport::new(),
//!     Arc::new(MyEngineProvider::default()),
//! );
//! conn.set_ca_cert(include_bytes!("ca.pem"))?;
//! conn.connect("example.com", 443)?;
//! conn.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")?;
//! conn.flush()?;
//!
//! let mut response = Vec::new();
//! conn.read_to_end(&mut response)?;
//! ```
//!
//! Port 443, like the other well-known secure ports in [`SECURE_PORTS`],
//! runs TLS unless [`Connection::enable_ssl`] says otherwise; other ports
//! are plain until [`Connection::connect_ssl`] upgrades them.
//!
//! ## Crate features
//!
//! - `log` (enabled by default): makes the `log` crate a dependency and
//!   emits log output, controlled with [`set_debug_level`].

#![forbid(unsafe_code, unused_must_use)]
#![deny(
    clippy::use_self,
    trivial_casts,
    trivial_numeric_casts,
    missing_docs,
    unused_import_braces,
    unused_extern_crates
)]
// Relax these clippy lints:
// - too_many_arguments: the probe entry point takes its whole context
// - single_component_path_imports: our top-level `use log` import causes
//   a false positive, https://github.com/rust-lang/rust-clippy/issues/5210
// - len_without_is_empty: `MaxFragmentLength::len` is a code-to-size map
#![allow(
    clippy::too_many_arguments,
    clippy::single_component_path_imports,
    clippy::len_without_is_empty
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// log for logging (optional).
#[cfg(feature = "log")]
use log;

#[cfg(not(feature = "log"))]
#[macro_use]
mod log {
    macro_rules! _trace ( ($($tt:tt)*) => {{}} );
    macro_rules! _debug ( ($($tt:tt)*) => {{}} );
    macro_rules! _warn  ( ($($tt:tt)*) => {{}} );
    macro_rules! _error ( ($($tt:tt)*) => {{}} );
    pub(crate) use {_debug as debug, _error as error, _trace as trace, _warn as warn};
}

#[macro_use]
mod msgs;
mod anchors;
mod buffer;
mod config;
mod connection;
mod error;
mod probe;
mod pump;
mod session;
mod suites;
mod time_provider;
mod transport;
mod trust;
mod verify;
mod x509;

pub mod engine;

pub use crate::anchors::{CertificateStore, MemoryCertificateStore, RootCertStore};
pub use crate::buffer::{BufferMode, BufferSizes, RecordBuffers};
pub use crate::config::ClientConfig;
pub use crate::connection::{Connection, ConnectionState};
pub use crate::error::{CertificateError, EngineError, Error, SslError};
pub use crate::msgs::enums::{
    AlertDescription, CipherSuite, ContentType, MaxFragmentLength, ProtocolVersion,
};
pub use crate::probe::{probe_max_fragment_length, probe_max_fragment_length_with};
pub use crate::session::{SessionParameters, SessionRecord, SessionSlot, SessionTimeout};
pub use crate::suites::{
    cipher_suite, find_suite, BulkAlgorithm, KeyExchange, RecordOverhead, SupportedCipherSuite,
    ALL_CIPHER_SUITES, DEFAULT_CIPHER_SUITES, LESS_SECURE_CIPHER_SUITES,
};
pub use crate::time_provider::{Clock, StdClock};
pub use crate::transport::{is_secure_port, Host, HostName, TcpTransport, Transport, SECURE_PORTS};
pub use crate::trust::{TrustConfig, TrustPolicy};
pub use crate::verify::{
    certificate_fingerprint, FingerprintVerifier, InsecureVerifier, KeyUsages, KnownKeyVerifier,
    PeerKey, SelfSignedVerifier, ServerCertVerified, ServerCertVerifier, StoreVerifier,
    WebPkiVerifier, FINGERPRINT_LEN,
};

/// How much the crate logs.  Process-wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugLevel {
    /// Nothing.
    None,
    /// Failed connections and handshakes.
    Error,
    /// Rejected or abandoned operations as well.
    Warn,
    /// Handshake milestones as well.
    Info,
    /// Everything, including each pump step.
    Dump,
}

/// Sets how much the crate logs, by adjusting the `log` crate's maximum
/// level.  Meant to be called once, during setup.
///
/// Does nothing without the `log` feature.
pub fn set_debug_level(level: DebugLevel) {
    #[cfg(feature = "log")]
    log::set_max_level(match level {
        DebugLevel::None => log::LevelFilter::Off,
        DebugLevel::Error => log::LevelFilter::Error,
        DebugLevel::Warn => log::LevelFilter::Warn,
        DebugLevel::Info => log::LevelFilter::Debug,
        DebugLevel::Dump => log::LevelFilter::Trace,
    });
    #[cfg(not(feature = "log"))]
    let _ = level;
}
