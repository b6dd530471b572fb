//! The contract between a [`Connection`](crate::Connection) and the TLS
//! record engine it drives.
//!
//! The engine is a byte-in, byte-out automaton: it never touches the
//! transport.  Each step the pump reads [`Signals`], moves bytes in the
//! direction they ask for, and acknowledges what it moved.

use core::fmt;
use core::ops::BitOr;
use std::sync::Arc;

use pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use crate::buffer::RecordBuffers;
use crate::error::{EngineError, Error};
use crate::msgs::enums::{MaxFragmentLength, ProtocolVersion};
use crate::session::SessionParameters;
use crate::suites::SupportedCipherSuite;
use crate::verify::{KeyUsages, ServerCertVerifier};

/// What the engine currently wants, read fresh on every pump iteration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signals(u8);

impl Signals {
    /// Nothing to do.
    pub const NONE: Self = Self(0);
    /// The engine is closed.  Paired with `ERROR` if it failed.
    pub const CLOSED: Self = Self(0x01);
    /// Record bytes are waiting in [`Engine::pending_output`].
    pub const WANTS_SEND: Self = Self(0x02);
    /// The engine needs record bytes in [`Engine::input_space`].
    pub const WANTS_RECEIVE: Self = Self(0x04);
    /// Application data may be written to [`Engine::app_space`].
    pub const APP_WRITABLE: Self = Self(0x08);
    /// Decrypted application data is in [`Engine::app_data`].
    pub const APP_DATA_READY: Self = Self(0x10);
    /// The engine failed; see [`Engine::last_error`].
    pub const ERROR: Self = Self(0x20);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Signals {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Signals, &str); 6] = [
            (Signals::CLOSED, "CLOSED"),
            (Signals::WANTS_SEND, "WANTS_SEND"),
            (Signals::WANTS_RECEIVE, "WANTS_RECEIVE"),
            (Signals::APP_WRITABLE, "APP_WRITABLE"),
            (Signals::APP_DATA_READY, "APP_DATA_READY"),
            (Signals::ERROR, "ERROR"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// The key type of the CA that issued a client certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssuerKeyType {
    /// RSA issuer.
    Rsa,
    /// EC issuer.
    Ec,
}

/// A client certificate chain and its private key, offered when the
/// server asks for client authentication.
pub struct ClientCredential {
    /// The chain, end-entity first.
    pub chain: Vec<CertificateDer<'static>>,
    /// The private key for the end-entity certificate.
    pub key: PrivateKeyDer<'static>,
    /// What the key may be used for.
    pub usages: KeyUsages,
    /// Key type of the issuing CA, for static ECDH suites.
    pub issuer_key_type: IssuerKeyType,
}

impl Clone for ClientCredential {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
            usages: self.usages,
            issuer_key_type: self.issuer_key_type,
        }
    }
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredential")
            .field("chain_len", &self.chain.len())
            .field("usages", &self.usages)
            .field("issuer_key_type", &self.issuer_key_type)
            .finish_non_exhaustive()
    }
}

/// Everything an engine is built with for one connection.
#[derive(Debug)]
pub struct EngineConfig {
    /// Record buffers, owned by the engine until it is dropped.
    pub buffers: RecordBuffers,
    /// Called with the server's chain during the handshake.
    pub verifier: Arc<dyn ServerCertVerifier>,
    /// Reference time for certificate validity.
    pub verification_time: UnixTime,
    /// Offered on a certificate request.
    pub client_auth: Option<ClientCredential>,
    /// Lowest version to negotiate.
    pub min_version: ProtocolVersion,
    /// Highest version to negotiate.
    pub max_version: ProtocolVersion,
    /// Suites to offer, most preferred first.
    pub cipher_suites: Vec<&'static SupportedCipherSuite>,
    /// Fragment length to request, when the receive buffer is short.
    pub max_fragment_length: Option<MaxFragmentLength>,
}

/// A TLS client record engine.
///
/// Spans returned by the `*_space`/`pending_output`/`app_data` methods are
/// valid until the next call that takes `&mut self`.
pub trait Engine: Send {
    /// Starts a handshake, offering `resume` if given.
    fn reset(
        &mut self,
        server_name: Option<&ServerName<'_>>,
        resume: Option<&SessionParameters>,
    ) -> Result<(), Error>;

    /// The current signal set.
    fn signals(&self) -> Signals;

    /// The code of the error that closed the engine, or `EngineError::OK`.
    fn last_error(&self) -> EngineError;

    /// Record bytes ready to be written to the transport.
    fn pending_output(&self) -> &[u8];

    /// Marks `n` bytes of `pending_output` as written.
    fn output_sent(&mut self, n: usize);

    /// Space for record bytes read from the transport.
    fn input_space(&mut self) -> &mut [u8];

    /// Marks `n` bytes of `input_space` as filled.
    fn input_received(&mut self, n: usize);

    /// Decrypted application data ready to be read.
    fn app_data(&self) -> &[u8];

    /// Marks `n` bytes of `app_data` as consumed.
    fn app_data_consumed(&mut self, n: usize);

    /// Space for application data to be encrypted.
    fn app_space(&mut self) -> &mut [u8];

    /// Marks `n` bytes of `app_space` as written.
    fn app_written(&mut self, n: usize);

    /// Closes the current record; with `force`, even if it is empty.
    fn flush(&mut self, force: bool);

    /// Starts an orderly close (close_notify).
    fn close(&mut self);

    /// Fails the engine with `err`, making it send a fatal alert.
    fn fail(&mut self, err: EngineError);

    /// Whether a handshake is in progress.
    fn is_handshaking(&self) -> bool;

    /// Parameters of the current session, once a handshake has completed.
    fn session_parameters(&self) -> Option<SessionParameters>;

    /// The fragment length the server accepted, if any.
    fn negotiated_fragment_length(&self) -> Option<MaxFragmentLength>;
}

/// Builds a fresh [`Engine`] for each connection.
pub trait EngineProvider: fmt::Debug + Send + Sync {
    /// Creates an engine with `config`.
    fn new_engine(&self, config: EngineConfig) -> Result<Box<dyn Engine>, Error>;
}
