use core::fmt;
use std::error::Error as StdError;
use std::io;

use crate::msgs::codec::InvalidMessage;

/// sslclient reports connection and configuration failures using this type.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// No transport was available to connect with, or it was released.
    TransportUnavailable,

    /// The transport refused to connect to the target.
    ConnectFailed,

    /// The handshake did not complete within the handshake timeout.
    /// The connection is torn down.
    HandshakeTimeout,

    /// The engine failed the handshake with the given code.
    HandshakeFailed(EngineError),

    /// The installed trust policy rejected the server's certificate.
    CertificateRejected(CertificateError),

    /// An application read or write did not make progress within the
    /// I/O timeout.
    IoTimeout,

    /// Writing to the transport failed or made no progress.
    WriteFailed,

    /// Reading from the transport failed.
    ReadFailed,

    /// Buffer allocation failed.  The connection is left disconnected
    /// and may be retried.
    OutOfMemory,

    /// The engine reported an error on an established connection.
    ProtocolError(EngineError),

    /// The operation needs an established connection.
    NotConnected,

    /// A secure connection was requested with no trust policy installed.
    NoTrustPolicy,

    /// The host name is empty, too long, or contains forbidden bytes.
    InvalidHostName,

    /// A fingerprint was not exactly 20 bytes.
    InvalidFingerprint,

    /// The requested maximum fragment length is not 512, 1024, 2048 or 4096.
    InvalidFragmentLength(u16),

    /// A cipher suite list was empty or named a suite we cannot offer.
    UnsupportedCipherSuite,

    /// The protocol version bounds are reversed or outside TLS1.0..=TLS1.2.
    InvalidVersionRange,

    /// A certificate or private key could not be parsed.
    InvalidCredential,

    /// The engine asked to handshake again on an established connection.
    RenegotiationUnsupported,

    /// A catch-all error for unlikely errors.
    General(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::TransportUnavailable => write!(f, "no transport available"),
            Self::ConnectFailed => write!(f, "transport failed to connect"),
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::HandshakeFailed(ref code) => write!(f, "handshake failed: {}", code),
            Self::CertificateRejected(ref why) => {
                write!(f, "server certificate rejected: {:?}", why)
            }
            Self::IoTimeout => write!(f, "i/o timed out"),
            Self::WriteFailed => write!(f, "write to transport failed"),
            Self::ReadFailed => write!(f, "read from transport failed"),
            Self::OutOfMemory => write!(f, "out of memory allocating record buffers"),
            Self::ProtocolError(ref code) => write!(f, "protocol error: {}", code),
            Self::NotConnected => write!(f, "not connected"),
            Self::NoTrustPolicy => write!(f, "no trust policy configured"),
            Self::InvalidHostName => write!(f, "invalid host name"),
            Self::InvalidFingerprint => write!(f, "fingerprint must be 20 bytes"),
            Self::InvalidFragmentLength(len) => {
                write!(f, "unsupported maximum fragment length {}", len)
            }
            Self::UnsupportedCipherSuite => write!(f, "unsupported cipher suite list"),
            Self::InvalidVersionRange => write!(f, "invalid protocol version range"),
            Self::InvalidCredential => write!(f, "could not parse certificate or key"),
            Self::RenegotiationUnsupported => write!(f, "renegotiation is not supported"),
            Self::General(ref err) => write!(f, "unexpected error: {}", err),
        }
    }
}

impl StdError for Error {}

impl Error {
    /// Whether this error tore down the connection it happened on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::IoTimeout
                | Self::NotConnected
                | Self::InvalidHostName
                | Self::InvalidFingerprint
                | Self::InvalidFragmentLength(_)
                | Self::UnsupportedCipherSuite
                | Self::InvalidVersionRange
                | Self::InvalidCredential
        )
    }
}

impl From<InvalidMessage> for Error {
    #[inline]
    fn from(_: InvalidMessage) -> Self {
        Self::ProtocolError(EngineError::BAD_HANDSHAKE)
    }
}

impl From<CertificateError> for Error {
    #[inline]
    fn from(e: CertificateError) -> Self {
        Self::CertificateRejected(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::IoTimeout | Error::HandshakeTimeout => io::ErrorKind::TimedOut,
            Error::NotConnected | Error::TransportUnavailable => io::ErrorKind::NotConnected,
            Error::ConnectFailed => io::ErrorKind::ConnectionRefused,
            Error::WriteFailed => io::ErrorKind::WriteZero,
            Error::ReadFailed => io::ErrorKind::ConnectionAborted,
            Error::OutOfMemory => io::ErrorKind::OutOfMemory,
            Error::InvalidHostName
            | Error::InvalidFingerprint
            | Error::InvalidFragmentLength(_)
            | Error::UnsupportedCipherSuite
            | Error::InvalidVersionRange
            | Error::InvalidCredential => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::InvalidData,
        };
        Self::new(kind, e)
    }
}

/// The ways a trust policy can reject a server certificate.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// The certificate is not correctly encoded.
    BadEncoding,

    /// The reference time is after the certificate's `notAfter`.
    Expired,

    /// The reference time is before the certificate's `notBefore`.
    NotValidYet,

    /// The chain does not lead to an installed trust anchor.
    UnknownIssuer,

    /// A certificate is not correctly signed by its alleged issuer.
    BadSignature,

    /// The end-entity certificate does not name the host we connected to.
    NotValidForName,

    /// The certificate may not be used for TLS server authentication.
    InvalidPurpose,

    /// The leaf certificate's SHA-1 digest differs from the pinned one.
    FingerprintMismatch,

    /// A self-signed certificate was required and the issuer differs
    /// from the subject.
    NotSelfSigned,

    /// The server sent an empty certificate chain.
    NoCertificatesPresented,

    /// The dynamic certificate store could not be queried.
    StoreUnavailable,

    /// Any other reason, described by the verifier.
    Other(String),
}

impl CertificateError {
    /// The engine-level code a certificate callback reports for this reason.
    pub fn engine_code(&self) -> EngineError {
        match self {
            Self::BadEncoding => EngineError::X509_INVALID_VALUE,
            Self::Expired | Self::NotValidYet => EngineError::X509_EXPIRED,
            Self::UnknownIssuer | Self::FingerprintMismatch | Self::NotSelfSigned => {
                EngineError::X509_NOT_TRUSTED
            }
            Self::BadSignature => EngineError::X509_BAD_SIGNATURE,
            Self::NotValidForName => EngineError::X509_BAD_SERVER_NAME,
            Self::InvalidPurpose => EngineError::X509_FORBIDDEN_KEY_USAGE,
            Self::NoCertificatesPresented => EngineError::X509_EMPTY_CHAIN,
            Self::StoreUnavailable | Self::Other(_) => EngineError::X509_NOT_TRUSTED,
        }
    }
}

/// A numeric error code reported by the record engine.
///
/// Codes follow the BearSSL numbering: protocol errors below 32, X.509
/// errors from 32, received alerts at `256 + alert` and sent alerts at
/// `512 + alert`.  Negative codes belong to this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineError(pub i32);

macro_rules! engine_codes {
    ( $( $(#[$attr:meta])* $name:ident = $val:literal, $text:literal; )* ) => {
        #[allow(missing_docs)]
        impl EngineError {
            $( $(#[$attr])* pub const $name: Self = Self($val); )*

            fn known(self) -> Option<(&'static str, &'static str)> {
                match self.0 {
                    $( $val => Some((stringify!($name), $text)), )*
                    _ => None,
                }
            }
        }
    };
}

engine_codes! {
    OK = 0, "No error";
    BAD_PARAM = 1, "Caller-provided parameter is incorrect";
    BAD_STATE = 2, "Operation requested by the caller cannot be applied with the current context state";
    UNSUPPORTED_VERSION = 3, "Incoming protocol or record version is unsupported";
    BAD_VERSION = 4, "Incoming record version does not match the expected version";
    BAD_LENGTH = 5, "Incoming record length is invalid";
    TOO_LARGE = 6, "Incoming record is too large to be processed, or buffer is too small for the handshake message to send";
    BAD_MAC = 7, "Decryption found an invalid padding, or the record MAC is not correct";
    NO_RANDOM = 8, "No initial entropy was provided, and none can be obtained from the OS";
    UNKNOWN_TYPE = 9, "Incoming record type is unknown";
    UNEXPECTED = 10, "Incoming record or message has wrong type with regards to the current engine state";
    BAD_CCS = 12, "ChangeCipherSpec message from the peer has invalid contents";
    BAD_ALERT = 13, "Alert message from the peer has invalid contents (odd length)";
    BAD_HANDSHAKE = 14, "Incoming handshake message decoding failed";
    OVERSIZED_ID = 15, "ServerHello contains a session ID which is larger than 32 bytes";
    BAD_CIPHER_SUITE = 16, "Server wants to use a cipher suite that we did not claim to support";
    BAD_COMPRESSION = 17, "Server wants to use a compression that we did not claim to support";
    BAD_FRAGLEN = 18, "Server's max fragment length does not match client's";
    BAD_SECRENEG = 19, "Secure renegotiation failed";
    EXTRA_EXTENSION = 20, "Server sent an extension type that we did not announce";
    BAD_SNI = 21, "Invalid Server Name Indication contents";
    BAD_HELLO_DONE = 22, "Invalid ServerHelloDone from the server (length is not 0)";
    LIMIT_EXCEEDED = 23, "Internal limit exceeded (e.g. server's public key is too large)";
    BAD_FINISHED = 24, "Finished message from peer does not match the expected value";
    RESUME_MISMATCH = 25, "Session resumption attempt with distinct version or cipher suite";
    INVALID_ALGORITHM = 26, "Unsupported or invalid algorithm (ECDHE curve, signature algorithm, hash function)";
    BAD_SIGNATURE = 27, "Invalid signature in ServerKeyExchange or CertificateVerify message";
    WRONG_KEY_USAGE = 28, "Peer's public key does not have the proper type or is not allowed for the requested operation";
    NO_CLIENT_AUTH = 29, "Client did not send a certificate upon request, or the client certificate could not be validated";
    IO = 31, "I/O error or premature close on transport stream";
    X509_INVALID_VALUE = 33, "Invalid value in an ASN.1 structure";
    X509_TRUNCATED = 34, "Truncated certificate or other ASN.1 object";
    X509_EMPTY_CHAIN = 35, "Empty certificate chain (no certificate at all)";
    X509_BAD_TAG_VALUE = 38, "Decoding error: unsupported tag value";
    X509_BAD_DN = 47, "Invalid distinguished name";
    X509_BAD_TIME = 48, "Invalid date/time representation";
    X509_UNSUPPORTED = 49, "Certificate contains unsupported features that cannot be ignored";
    X509_LIMIT_EXCEEDED = 50, "Key or signature size exceeds internal limits";
    X509_WRONG_KEY_TYPE = 51, "Key type does not match that which was expected";
    X509_BAD_SIGNATURE = 52, "Signature is invalid";
    X509_TIME_UNKNOWN = 53, "Validation time is unknown";
    X509_EXPIRED = 54, "Certificate is expired or not yet valid";
    X509_DN_MISMATCH = 55, "Issuer/Subject DN mismatch in the chain";
    X509_BAD_SERVER_NAME = 56, "Expected server name was not found in the chain";
    X509_CRITICAL_EXTENSION = 57, "Unknown critical extension in certificate";
    X509_NOT_CA = 58, "Not a CA, or path length constraint violation";
    X509_FORBIDDEN_KEY_USAGE = 59, "Key Usage extension prohibits intended usage";
    X509_WEAK_PUBLIC_KEY = 60, "Public key found in certificate is too small";
    X509_NOT_TRUSTED = 62, "Chain could not be linked to a trust anchor";
    /// Record buffers could not be allocated.
    OUT_OF_MEMORY = -1000, "Unable to allocate memory for SSL structures and buffers";
}

impl EngineError {
    const RECV_FATAL_ALERT: i32 = 256;
    const SEND_FATAL_ALERT: i32 = 512;

    /// The code for a fatal alert received from the peer.
    pub fn received_alert(alert: u8) -> Self {
        Self(Self::RECV_FATAL_ALERT + i32::from(alert))
    }

    /// The code for a fatal alert this side sent.
    pub fn sent_alert(alert: u8) -> Self {
        Self(Self::SEND_FATAL_ALERT + i32::from(alert))
    }

    /// A human-readable description of this code.
    pub fn description(self) -> &'static str {
        if let Some((_, text)) = self.known() {
            return text;
        }
        match self.0 {
            256..=511 => "SSL received fatal alert",
            512..=767 => "SSL sent fatal alert",
            _ => "Unknown error code",
        }
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "EngineError({})", self.0),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}

/// The last engine error seen on a connection, with its description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslError {
    /// The raw engine code.
    pub code: EngineError,
    /// Human-readable text for `code`.
    pub description: &'static str,
}

impl From<EngineError> for SslError {
    fn from(code: EngineError) -> Self {
        Self {
            code,
            description: code.description(),
        }
    }
}

impl fmt::Display for SslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}
