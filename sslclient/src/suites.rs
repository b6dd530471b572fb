use core::fmt;

use crate::error::Error;
use crate::msgs::enums::{CipherSuite, ProtocolVersion};

/// How a suite agrees on keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyExchange {
    /// Static RSA key transport.
    Rsa,
    /// Ephemeral ECDH, server authenticated with RSA.
    EcdheRsa,
    /// Ephemeral ECDH, server authenticated with ECDSA.
    EcdheEcdsa,
}

/// How a suite protects records, as far as record sizing cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkAlgorithm {
    /// Block cipher with explicit IV, HMAC, and padding.
    Cbc {
        /// Cipher block size.
        block_len: usize,
        /// HMAC output size.
        mac_len: usize,
    },
    /// AEAD with an explicit per-record nonce and a trailing tag.
    Aead {
        /// Explicit nonce carried in every record.
        explicit_nonce_len: usize,
        /// Authentication tag size.
        tag_len: usize,
    },
}

/// A TLS1.2-or-earlier cipher suite this crate can offer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SupportedCipherSuite {
    /// The TLS enumeration naming this cipher suite.
    pub suite: CipherSuite,
    /// Key exchange family.
    pub kx: KeyExchange,
    /// Record protection.
    pub bulk: BulkAlgorithm,
    /// Lowest protocol version the suite may be negotiated at.
    pub min_version: ProtocolVersion,
}

impl fmt::Debug for SupportedCipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.suite.fmt(f)
    }
}

/// Worst-case padding a peer may put in one CBC record.
const MAX_CBC_PADDING: usize = 256;
const RECORD_HEADER_LEN: usize = 5;

impl SupportedCipherSuite {
    /// Bytes an incoming record may carry beyond its plaintext.
    pub fn input_overhead(&self) -> usize {
        RECORD_HEADER_LEN
            + match self.bulk {
                BulkAlgorithm::Cbc { block_len, mac_len } => {
                    block_len + mac_len + MAX_CBC_PADDING
                }
                BulkAlgorithm::Aead {
                    explicit_nonce_len,
                    tag_len,
                } => explicit_nonce_len + tag_len,
            }
    }

    /// Bytes an outgoing record carries beyond its plaintext.  We pad by
    /// at most one block.
    pub fn output_overhead(&self) -> usize {
        RECORD_HEADER_LEN
            + match self.bulk {
                BulkAlgorithm::Cbc { block_len, mac_len } => block_len + mac_len + block_len,
                BulkAlgorithm::Aead {
                    explicit_nonce_len,
                    tag_len,
                } => explicit_nonce_len + tag_len,
            }
    }

    /// Whether `version` can carry this suite.
    pub fn usable_with(&self, version: ProtocolVersion) -> bool {
        u16::from(version) >= u16::from(self.min_version)
    }
}

macro_rules! suite {
    ($name:ident, $kx:ident, $bulk:expr, $min:ident) => {
        #[allow(missing_docs)]
        pub static $name: SupportedCipherSuite = SupportedCipherSuite {
            suite: CipherSuite::$name,
            kx: KeyExchange::$kx,
            bulk: $bulk,
            min_version: ProtocolVersion::$min,
        };
    };
}

const CBC_SHA1: BulkAlgorithm = BulkAlgorithm::Cbc {
    block_len: 16,
    mac_len: 20,
};
const CBC_SHA256: BulkAlgorithm = BulkAlgorithm::Cbc {
    block_len: 16,
    mac_len: 32,
};
const CBC_SHA384: BulkAlgorithm = BulkAlgorithm::Cbc {
    block_len: 16,
    mac_len: 48,
};
const DES3_SHA1: BulkAlgorithm = BulkAlgorithm::Cbc {
    block_len: 8,
    mac_len: 20,
};
const GCM: BulkAlgorithm = BulkAlgorithm::Aead {
    explicit_nonce_len: 8,
    tag_len: 16,
};
const CCM: BulkAlgorithm = BulkAlgorithm::Aead {
    explicit_nonce_len: 8,
    tag_len: 16,
};
const CCM_8: BulkAlgorithm = BulkAlgorithm::Aead {
    explicit_nonce_len: 8,
    tag_len: 8,
};
const CHACHA20_POLY1305: BulkAlgorithm = BulkAlgorithm::Aead {
    explicit_nonce_len: 0,
    tag_len: 16,
};

/// Suites in this module are named after their IANA registrations.
#[allow(non_upper_case_globals)]
pub mod cipher_suite {
    use super::*;

    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, EcdheEcdsa, GCM, TLSv1_2);
    suite!(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, EcdheRsa, GCM, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, EcdheEcdsa, GCM, TLSv1_2);
    suite!(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, EcdheRsa, GCM, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256, EcdheEcdsa, CHACHA20_POLY1305, TLSv1_2);
    suite!(TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256, EcdheRsa, CHACHA20_POLY1305, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_CCM, EcdheEcdsa, CCM, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_CCM, EcdheEcdsa, CCM, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8, EcdheEcdsa, CCM_8, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_CCM_8, EcdheEcdsa, CCM_8, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256, EcdheEcdsa, CBC_SHA256, TLSv1_2);
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256, EcdheRsa, CBC_SHA256, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384, EcdheEcdsa, CBC_SHA384, TLSv1_2);
    suite!(TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384, EcdheRsa, CBC_SHA384, TLSv1_2);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA, EcdheEcdsa, CBC_SHA1, TLSv1_0);
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA, EcdheRsa, CBC_SHA1, TLSv1_0);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA, EcdheEcdsa, CBC_SHA1, TLSv1_0);
    suite!(TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA, EcdheRsa, CBC_SHA1, TLSv1_0);
    suite!(TLS_RSA_WITH_AES_128_GCM_SHA256, Rsa, GCM, TLSv1_2);
    suite!(TLS_RSA_WITH_AES_256_GCM_SHA384, Rsa, GCM, TLSv1_2);
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA256, Rsa, CBC_SHA256, TLSv1_2);
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA256, Rsa, CBC_SHA256, TLSv1_2);
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA, Rsa, CBC_SHA1, TLSv1_0);
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA, Rsa, CBC_SHA1, TLSv1_0);
    suite!(TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA, EcdheEcdsa, DES3_SHA1, TLSv1_0);
    suite!(TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA, EcdheRsa, DES3_SHA1, TLSv1_0);
    suite!(TLS_RSA_WITH_3DES_EDE_CBC_SHA, Rsa, DES3_SHA1, TLSv1_0);
}

use cipher_suite::*;

/// Every suite we can offer, most preferred first.
pub static ALL_CIPHER_SUITES: &[&SupportedCipherSuite] = &[
    &TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_128_CCM,
    &TLS_ECDHE_ECDSA_WITH_AES_256_CCM,
    &TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8,
    &TLS_ECDHE_ECDSA_WITH_AES_256_CCM_8,
    &TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384,
    &TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384,
    &TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
    &TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
    &TLS_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_RSA_WITH_AES_128_CBC_SHA256,
    &TLS_RSA_WITH_AES_256_CBC_SHA256,
    &TLS_RSA_WITH_AES_128_CBC_SHA,
    &TLS_RSA_WITH_AES_256_CBC_SHA,
    &TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA,
    &TLS_RSA_WITH_3DES_EDE_CBC_SHA,
];

/// The suites offered when no explicit list is configured.
pub static DEFAULT_CIPHER_SUITES: &[&SupportedCipherSuite] = ALL_CIPHER_SUITES;

/// Static-RSA suites for peers that cannot do ECDHE.  These give up
/// forward secrecy and are cheaper on constrained clients.
pub static LESS_SECURE_CIPHER_SUITES: &[&SupportedCipherSuite] = &[
    &TLS_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_RSA_WITH_AES_128_CBC_SHA256,
    &TLS_RSA_WITH_AES_256_CBC_SHA256,
    &TLS_RSA_WITH_AES_128_CBC_SHA,
    &TLS_RSA_WITH_AES_256_CBC_SHA,
    &TLS_RSA_WITH_3DES_EDE_CBC_SHA,
];

/// Looks up the suite named `suite`.
pub fn find_suite(suite: CipherSuite) -> Option<&'static SupportedCipherSuite> {
    ALL_CIPHER_SUITES
        .iter()
        .copied()
        .find(|s| s.suite == suite)
}

/// Resolves a caller-supplied list, rejecting empty lists and unknown suites.
pub(crate) fn resolve(
    suites: &[CipherSuite],
) -> Result<Vec<&'static SupportedCipherSuite>, Error> {
    if suites.is_empty() {
        return Err(Error::UnsupportedCipherSuite);
    }
    suites
        .iter()
        .map(|s| find_suite(*s).ok_or(Error::UnsupportedCipherSuite))
        .collect()
}

/// Space to reserve around plaintext in each record buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordOverhead {
    /// Reserved in the receive buffer.
    pub input: usize,
    /// Reserved in the transmit buffer.
    pub output: usize,
}

impl RecordOverhead {
    /// The largest overhead of any suite in `suites`.
    pub fn for_suites(suites: &[&SupportedCipherSuite]) -> Self {
        suites.iter().fold(
            Self {
                input: RECORD_HEADER_LEN,
                output: RECORD_HEADER_LEN,
            },
            |acc, s| Self {
                input: acc.input.max(s.input_overhead()),
                output: acc.output.max(s.output_overhead()),
            },
        )
    }
}
