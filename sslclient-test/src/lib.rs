//! Test support for sslclient: a scripted record engine, a scripted peer
//! behind an in-memory transport, a manual clock, and certificate fixtures.
//!
//! The engine and the peer speak a toy record protocol that keeps the TLS
//! record framing (`type`, `03 03`, 16-bit length) but nothing else:
//!
//! - client hello: handshake `01 sid_len sid.. mfl name_len name..`
//! - server hello: handshake `02 resumed sid_len sid.. mfl client_auth
//!   spki_len(2) spki.. count {len(2) der..}..`
//! - client certificate: handshake `0b count {len(2) der..}..`
//! - hello request: handshake `00`
//! - application data and alerts as in TLS.
//!
//! That is enough to drive every path through the connection facade:
//! verification, resumption, fragment lengths, client authentication,
//! renegotiation attempts, alerts and orderly close.

#![warn(
    clippy::use_self,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_extern_crates
)]

use core::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pki_types::{CertificateDer, ServerName, SubjectPublicKeyInfoDer, UnixTime};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, PublicKeyData,
};
use sslclient::engine::{Engine, EngineConfig, EngineProvider, Signals};
use sslclient::{
    CipherSuite, Clock, EngineError, Error, Host, MaxFragmentLength, PeerKey, ProtocolVersion,
    SessionParameters, Transport,
};

const HANDSHAKE: u8 = 0x16;
const APPLICATION_DATA: u8 = 0x17;
const ALERT: u8 = 0x15;
const HEADER_LEN: usize = 5;

const HELLO_REQUEST: u8 = 0x00;
const CLIENT_HELLO: u8 = 0x01;
const SERVER_HELLO: u8 = 0x02;
const CERTIFICATE: u8 = 0x0b;

const CLOSE_NOTIFY: u8 = 0;

/// Initialises `env_logger` once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

/// Frames `payload` as one record of type `typ`.
pub fn record(typ: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![typ, 0x03, 0x03];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Splits complete records off the front of `buf`.
pub fn take_records(buf: &mut Vec<u8>) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    loop {
        if buf.len() < HEADER_LEN {
            return out;
        }
        let len = usize::from(u16::from_be_bytes([buf[3], buf[4]]));
        if buf.len() < HEADER_LEN + len {
            return out;
        }
        let typ = buf[0];
        let payload = buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        buf.drain(..HEADER_LEN + len);
        out.push((typ, payload));
    }
}

fn encode_certs(out: &mut Vec<u8>, certs: &[CertificateDer<'static>]) {
    out.push(certs.len() as u8);
    for cert in certs {
        out.extend_from_slice(&(cert.len() as u16).to_be_bytes());
        out.extend_from_slice(cert);
    }
}

/// Pulls `n` bytes off the front of `data`.
fn split<'a>(data: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if data.len() < n {
        return None;
    }
    let (head, tail) = data.split_at(n);
    *data = tail;
    Some(head)
}

fn split_u8(data: &mut &[u8]) -> Option<u8> {
    split(data, 1).map(|b| b[0])
}

fn split_u16(data: &mut &[u8]) -> Option<usize> {
    split(data, 2).map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
}

// ---------------------------------------------------------------------------
// Clock

/// A clock that only moves when slept on or advanced.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    unix_base: Duration,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// A clock whose wall time starts at `unix_secs`.
    pub fn new(unix_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            unix_base: Duration::from_secs(unix_secs),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    /// Total time advanced so far.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn unix_time(&self) -> UnixTime {
        UnixTime::since_unix_epoch(self.unix_base + self.elapsed())
    }
}

// ---------------------------------------------------------------------------
// Certificates

/// Certificates for one test server, generated fresh.
pub struct TestPki {
    /// The CA that issued `end_entity`.
    pub ca_cert: CertificateDer<'static>,
    /// `ca_cert` as PEM.
    pub ca_pem: String,
    /// Server certificate for the name passed to [`TestPki::new`].
    pub end_entity: CertificateDer<'static>,
    /// The server key, as SubjectPublicKeyInfo DER.
    pub end_entity_spki: SubjectPublicKeyInfoDer<'static>,
    /// A self-signed certificate for the same name.
    pub self_signed: CertificateDer<'static>,
    /// A client certificate issued by the CA, as PEM.
    pub client_cert_pem: String,
    /// The client key, PKCS#8 PEM.
    pub client_key_pem: String,
}

impl TestPki {
    /// Generates a CA, a server certificate for `server_name`, a
    /// self-signed server certificate and a client certificate.
    ///
    /// Every CA gets its own name, so chains from two instances never
    /// link up.
    pub fn new(server_name: &str) -> Self {
        static NEXT_CA: AtomicUsize = AtomicUsize::new(0);
        let ca_name = format!(
            "sslclient test ca {}",
            NEXT_CA.fetch_add(1, Ordering::Relaxed)
        );

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, ca_name);
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        let ca = Issuer::new(ca_params, ca_key);

        let ee_key = KeyPair::generate().unwrap();
        let mut ee_params = CertificateParams::new(vec![server_name.to_string()]).unwrap();
        ee_params
            .distinguished_name
            .push(DnType::CommonName, server_name);
        ee_params.is_ca = IsCa::ExplicitNoCa;
        ee_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let ee = ee_params.signed_by(&ee_key, &ca).unwrap();

        let self_key = KeyPair::generate().unwrap();
        let mut self_params = CertificateParams::new(vec![server_name.to_string()]).unwrap();
        self_params
            .distinguished_name
            .push(DnType::CommonName, server_name);
        let self_signed = self_params.self_signed(&self_key).unwrap();

        let client_key = KeyPair::generate().unwrap();
        let mut client_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        client_params
            .distinguished_name
            .push(DnType::CommonName, "sslclient test client");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client = client_params
            .signed_by(&client_key, &ca)
            .unwrap();

        Self {
            ca_cert: ca_cert.der().clone(),
            ca_pem: ca_cert.pem(),
            end_entity: ee.der().clone(),
            end_entity_spki: SubjectPublicKeyInfoDer::from(ee_key.subject_public_key_info()),
            self_signed: self_signed.der().clone(),
            client_cert_pem: client.pem(),
            client_key_pem: client_key.serialize_pem(),
        }
    }

    /// The server chain: end entity, then CA.
    pub fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.end_entity.clone(), self.ca_cert.clone()]
    }
}

// ---------------------------------------------------------------------------
// Engine

/// What a [`MockProvider`] was asked to build, for assertions.
#[derive(Clone, Debug)]
pub struct EngineSummary {
    /// Allocated receive buffer length.
    pub input_len: usize,
    /// Allocated transmit buffer length.
    pub output_len: usize,
    /// Whether one buffer serves both directions.
    pub half_duplex: bool,
    /// Fragment length the engine will request.
    pub max_fragment_length: Option<MaxFragmentLength>,
    /// Offered suites.
    pub cipher_suites: Vec<CipherSuite>,
    /// Version bounds.
    pub versions: (ProtocolVersion, ProtocolVersion),
    /// Whether a client credential was supplied.
    pub client_auth: bool,
    /// Reference time for certificate checks.
    pub verification_time: UnixTime,
}

/// Counters shared between a provider and the engines it built.
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Engines built.
    pub created: AtomicUsize,
    /// Engines dropped.
    pub dropped: AtomicUsize,
    /// Handshakes started with a session offered.
    pub resumptions_offered: AtomicUsize,
}

/// Builds [`MockEngine`]s.
#[derive(Debug, Default)]
pub struct MockProvider {
    /// Fail `new_engine` with `OutOfMemory` while set.
    pub out_of_memory: AtomicBool,
    /// Shared with every engine built.
    pub counters: Arc<EngineCounters>,
    last: Mutex<Option<EngineSummary>>,
}

impl MockProvider {
    /// A provider behind an `Arc`, ready to hand to a connection.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The configuration of the most recently built engine.
    pub fn last_config(&self) -> Option<EngineSummary> {
        self.last.lock().unwrap().clone()
    }

    /// Engines built so far.
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Engines built and not yet dropped.
    pub fn live(&self) -> usize {
        self.created() - self.counters.dropped.load(Ordering::SeqCst)
    }
}

impl EngineProvider for MockProvider {
    fn new_engine(&self, config: EngineConfig) -> Result<Box<dyn Engine>, Error> {
        if self.out_of_memory.load(Ordering::SeqCst) {
            return Err(Error::OutOfMemory);
        }
        *self.last.lock().unwrap() = Some(EngineSummary {
            input_len: config.buffers.input_len(),
            output_len: config.buffers.output_len(),
            half_duplex: config.buffers.is_half_duplex(),
            max_fragment_length: config.max_fragment_length,
            cipher_suites: config
                .cipher_suites
                .iter()
                .map(|s| s.suite)
                .collect(),
            versions: (config.min_version, config.max_version),
            client_auth: config.client_auth.is_some(),
            verification_time: config.verification_time,
        });
        self.counters
            .created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine::new(config, self.counters.clone())))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    AwaitServerHello,
    Established,
    Closing,
    Closed,
}

/// A record engine for the toy protocol described at the crate root.
///
/// Input arrives in the receive half of the [`RecordBuffers`](sslclient::RecordBuffers)
/// it was built with.  Application data is batched until a full record's
/// worth is written or the engine is flushed.
pub struct MockEngine {
    config: EngineConfig,
    counters: Arc<EngineCounters>,
    stage: Stage,
    error: EngineError,
    handshaking: bool,

    in_len: usize,
    out: Vec<u8>,
    app_in: Vec<u8>,
    app_out: Vec<u8>,
    app_out_len: usize,

    server_name: Option<String>,
    offered: Option<SessionParameters>,
    session: Option<SessionParameters>,
    fragment_length: Option<MaxFragmentLength>,
}

impl MockEngine {
    fn new(config: EngineConfig, counters: Arc<EngineCounters>) -> Self {
        let plaintext = config
            .max_fragment_length
            .and_then(|m| m.len())
            .unwrap_or(config.buffers.sizes().xmit())
            .min(config.buffers.sizes().xmit());
        Self {
            config,
            counters,
            stage: Stage::Idle,
            error: EngineError::OK,
            handshaking: false,
            in_len: 0,
            out: Vec::new(),
            app_in: Vec::new(),
            app_out: vec![0; plaintext],
            app_out_len: 0,
            server_name: None,
            offered: None,
            session: None,
            fragment_length: None,
        }
    }

    fn client_hello(&self) -> Vec<u8> {
        let mut hello = vec![CLIENT_HELLO];
        match &self.offered {
            Some(params) => {
                let sid_len = usize::from(params.as_bytes()[0]);
                hello.push(sid_len as u8);
                hello.extend_from_slice(&params.as_bytes()[1..1 + sid_len]);
            }
            None => hello.push(0),
        }
        hello.push(
            self.config
                .max_fragment_length
                .map_or(0, u8::from),
        );
        let name = self.server_name.as_deref().unwrap_or("");
        hello.push(name.len() as u8);
        hello.extend_from_slice(name.as_bytes());
        record(HANDSHAKE, &hello)
    }

    fn seal_app_record(&mut self) {
        let data = self.app_out[..self.app_out_len].to_vec();
        self.out
            .extend_from_slice(&record(APPLICATION_DATA, &data));
        self.app_out_len = 0;
    }

    fn process_input(&mut self) {
        let capacity = self.config.buffers.input_len();
        loop {
            if self.error != EngineError::OK || self.stage == Stage::Closed {
                return;
            }
            let in_len = self.in_len;
            let input = &mut self.config.buffers.input_mut()[..in_len];
            if input.len() < HEADER_LEN {
                return;
            }
            let len = usize::from(u16::from_be_bytes([input[3], input[4]]));
            if HEADER_LEN + len > capacity {
                self.fail(EngineError::TOO_LARGE);
                return;
            }
            if input.len() < HEADER_LEN + len {
                return;
            }
            let typ = input[0];
            let payload = input[HEADER_LEN..HEADER_LEN + len].to_vec();
            let used = HEADER_LEN + len;
            input.copy_within(used.., 0);
            self.in_len -= used;
            self.handle_record(typ, &payload);
        }
    }

    fn handle_record(&mut self, typ: u8, payload: &[u8]) {
        match (typ, self.stage) {
            (HANDSHAKE, Stage::AwaitServerHello) if payload.first() == Some(&SERVER_HELLO) => {
                if let Err(code) = self.server_hello(&payload[1..]) {
                    self.fail(code);
                }
            }
            (HANDSHAKE, Stage::Established) if payload == [HELLO_REQUEST] => {
                // the server wants to renegotiate
                self.stage = Stage::AwaitServerHello;
                self.handshaking = true;
                self.offered = None;
                let hello = self.client_hello();
                self.out.extend_from_slice(&hello);
            }
            (APPLICATION_DATA, Stage::Established) => {
                self.app_in.extend_from_slice(payload);
            }
            (ALERT, _) => match payload {
                [_, CLOSE_NOTIFY] => {
                    self.stage = Stage::Closed;
                }
                [_, desc] => self.fail(EngineError::received_alert(*desc)),
                _ => self.fail(EngineError::BAD_ALERT),
            },
            (HANDSHAKE | APPLICATION_DATA, _) => self.fail(EngineError::UNEXPECTED),
            _ => self.fail(EngineError::UNKNOWN_TYPE),
        }
    }

    fn server_hello(&mut self, mut data: &[u8]) -> Result<(), EngineError> {
        let bad = EngineError::BAD_HANDSHAKE;
        let resumed = split_u8(&mut data).ok_or(bad)? == 1;
        let sid_len = usize::from(split_u8(&mut data).ok_or(bad)?);
        if sid_len > 32 {
            return Err(EngineError::OVERSIZED_ID);
        }
        let sid = split(&mut data, sid_len).ok_or(bad)?.to_vec();
        let mfl = split_u8(&mut data).ok_or(bad)?;
        let client_auth = split_u8(&mut data).ok_or(bad)? == 1;
        let spki_len = split_u16(&mut data).ok_or(bad)?;
        let spki = split(&mut data, spki_len).ok_or(bad)?.to_vec();
        let count = usize::from(split_u8(&mut data).ok_or(bad)?);
        let mut certs = Vec::with_capacity(count);
        for _ in 0..count {
            let len = split_u16(&mut data).ok_or(bad)?;
            certs.push(CertificateDer::from(split(&mut data, len).ok_or(bad)?.to_vec()));
        }

        self.fragment_length = match (mfl, self.config.max_fragment_length) {
            (0, _) => None,
            (code, Some(asked)) if code == u8::from(asked) => Some(asked),
            (_, Some(_)) => return Err(EngineError::BAD_FRAGLEN),
            (_, None) => return Err(EngineError::EXTRA_EXTENSION),
        };

        if resumed {
            let offered = self
                .offered
                .clone()
                .ok_or(EngineError::UNEXPECTED)?;
            let offered_sid = &offered.as_bytes()[1..1 + usize::from(offered.as_bytes()[0])];
            if offered_sid != sid.as_slice() {
                return Err(EngineError::RESUME_MISMATCH);
            }
            self.session = Some(offered);
        } else {
            let (end_entity, intermediates) = certs
                .split_first()
                .ok_or(EngineError::X509_EMPTY_CHAIN)?;
            let server_name = self
                .server_name
                .as_deref()
                .and_then(|n| ServerName::try_from(n).ok());
            let verified = self
                .config
                .verifier
                .verify_server_cert(
                    end_entity,
                    intermediates,
                    server_name.as_ref(),
                    self.config.verification_time,
                )
                .map_err(|e| match e {
                    Error::CertificateRejected(why) => why.engine_code(),
                    _ => EngineError::X509_NOT_TRUSTED,
                })?;
            if let PeerKey::Known { key, .. } = verified.peer_key() {
                if key.as_ref() != spki.as_slice() {
                    return Err(EngineError::BAD_SIGNATURE);
                }
            }
            self.session = Some(session_from_id(&sid));
        }

        if client_auth {
            let Some(credential) = &self.config.client_auth else {
                return Err(EngineError::NO_CLIENT_AUTH);
            };
            let mut msg = vec![CERTIFICATE];
            encode_certs(&mut msg, &credential.chain);
            self.out
                .extend_from_slice(&record(HANDSHAKE, &msg));
        }

        self.stage = Stage::Established;
        self.handshaking = false;
        Ok(())
    }
}

/// Session parameters whose id is `sid`; the remaining bytes are filler.
pub fn session_from_id(sid: &[u8]) -> SessionParameters {
    let mut bytes = [0x5au8; SessionParameters::LEN];
    bytes[0] = sid.len() as u8;
    bytes[1..1 + sid.len()].copy_from_slice(sid);
    SessionParameters::new(bytes)
}

impl Engine for MockEngine {
    fn reset(
        &mut self,
        server_name: Option<&ServerName<'_>>,
        resume: Option<&SessionParameters>,
    ) -> Result<(), Error> {
        self.server_name = match server_name {
            Some(ServerName::DnsName(name)) => Some(name.as_ref().to_string()),
            _ => None,
        };
        self.offered = resume.cloned();
        if self.offered.is_some() {
            self.counters
                .resumptions_offered
                .fetch_add(1, Ordering::SeqCst);
        }
        self.stage = Stage::AwaitServerHello;
        self.handshaking = true;
        self.error = EngineError::OK;
        self.in_len = 0;
        self.out = self.client_hello();
        Ok(())
    }

    fn signals(&self) -> Signals {
        if self.error != EngineError::OK {
            return Signals::CLOSED | Signals::ERROR;
        }
        let mut signals = Signals::NONE;
        if !self.out.is_empty() {
            signals = signals | Signals::WANTS_SEND;
        }
        match self.stage {
            Stage::Idle => return Signals::CLOSED,
            // data decrypted before the peer's close_notify is still delivered
            Stage::Closed if !self.app_in.is_empty() => return Signals::APP_DATA_READY,
            Stage::Closed => return Signals::CLOSED,
            Stage::Closing if self.out.is_empty() => return Signals::CLOSED,
            Stage::Closing => return signals,
            Stage::AwaitServerHello | Stage::Established => {}
        }
        if self.stage == Stage::Established && self.out.is_empty() {
            signals = signals | Signals::APP_WRITABLE;
        }
        if self.app_in.is_empty() {
            signals = signals | Signals::WANTS_RECEIVE;
        } else {
            signals = signals | Signals::APP_DATA_READY;
        }
        signals
    }

    fn last_error(&self) -> EngineError {
        self.error
    }

    fn pending_output(&self) -> &[u8] {
        &self.out
    }

    fn output_sent(&mut self, n: usize) {
        self.out.drain(..n);
    }

    fn input_space(&mut self) -> &mut [u8] {
        let in_len = self.in_len;
        &mut self.config.buffers.input_mut()[in_len..]
    }

    fn input_received(&mut self, n: usize) {
        self.in_len += n;
        self.process_input();
    }

    fn app_data(&self) -> &[u8] {
        &self.app_in
    }

    fn app_data_consumed(&mut self, n: usize) {
        self.app_in.drain(..n);
    }

    fn app_space(&mut self) -> &mut [u8] {
        if self.stage != Stage::Established {
            return &mut [];
        }
        let used = self.app_out_len;
        &mut self.app_out[used..]
    }

    fn app_written(&mut self, n: usize) {
        self.app_out_len += n;
        if self.app_out_len == self.app_out.len() {
            self.seal_app_record();
        }
    }

    fn flush(&mut self, force: bool) {
        if self.app_out_len > 0 || force {
            self.seal_app_record();
        }
    }

    fn close(&mut self) {
        if matches!(self.stage, Stage::AwaitServerHello | Stage::Established) {
            if self.app_out_len > 0 {
                self.seal_app_record();
            }
            self.out
                .extend_from_slice(&record(ALERT, &[1, CLOSE_NOTIFY]));
            self.stage = Stage::Closing;
        }
    }

    fn fail(&mut self, err: EngineError) {
        self.error = err;
        self.out.clear();
        self.stage = Stage::Closed;
    }

    fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    fn session_parameters(&self) -> Option<SessionParameters> {
        self.session.clone()
    }

    fn negotiated_fragment_length(&self) -> Option<MaxFragmentLength> {
        self.fragment_length
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.counters
            .dropped
            .fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockEngine")
            .field("stage", &self.stage)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Peer and transport

/// How the scripted server behaves.
#[derive(Clone, Debug, Default)]
pub struct ServerBehaviour {
    /// Chain sent in a full handshake.
    pub chain: Vec<CertificateDer<'static>>,
    /// Key sent alongside the chain.
    pub spki: Vec<u8>,
    /// Agree to resume a session it issued.
    pub resumption: bool,
    /// Echo a requested fragment length.
    pub accept_fragment_length: bool,
    /// Ask for a client certificate.
    pub request_client_auth: bool,
    /// Never answer anything.
    pub silent: bool,
    /// Drop the connection on receiving a client hello.
    pub hang_up: bool,
    /// Answer the client hello with this fatal alert.
    pub fatal_alert: Option<u8>,
    /// Sent as application data right after the server hello.
    pub greeting: Vec<u8>,
    /// Echo application data back.
    pub echo: bool,
    /// Send a hello request after echoing the first application record.
    pub renegotiate: bool,
    /// Send close_notify after answering the first application record,
    /// then disconnect.
    pub close_after_reply: bool,
}

/// The scripted server's state, shared with the test through
/// [`ScriptedTransport::peer`].
#[derive(Debug, Default)]
pub struct Peer {
    /// How to behave.
    pub behaviour: ServerBehaviour,
    /// Refuse connections.
    pub refuse_connect: bool,
    /// Accept nothing on write.
    pub stall_writes: bool,
    /// Most bytes moved per read or write call; 0 means unlimited.
    pub chunk: usize,

    /// Whether a connection is open.
    pub open: bool,
    /// Targets connected to, in order.
    pub connects: Vec<(Host, u16)>,
    /// Stop calls seen.
    pub stops: usize,
    /// Everything the client wrote, raw.
    pub written: Vec<u8>,
    /// Server names seen in client hellos.
    pub server_names: Vec<String>,
    /// Fragment length codes seen in client hellos (0 = none).
    pub requested_fragment_lengths: Vec<u8>,
    /// Session ids offered in client hellos.
    pub offered_sessions: Vec<Vec<u8>>,
    /// Full handshakes completed.
    pub full_handshakes: usize,
    /// Abbreviated handshakes completed.
    pub resumed_handshakes: usize,
    /// Client certificate chains received.
    pub client_certificates: Vec<Vec<CertificateDer<'static>>>,
    /// Application data received.
    pub received: Vec<u8>,
    /// Alerts received, as (level, description).
    pub alerts: Vec<(u8, u8)>,

    rx: Vec<u8>,
    tx: Vec<u8>,
    issued: Vec<Vec<u8>>,
    next_sid: u8,
    renegotiated: bool,
    closing: bool,
}

impl Peer {
    fn on_client_bytes(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
        self.rx.extend_from_slice(bytes);
        let records = take_records(&mut self.rx);
        for (typ, payload) in records {
            self.on_record(typ, &payload);
        }
    }

    fn on_record(&mut self, typ: u8, payload: &[u8]) {
        match typ {
            HANDSHAKE if payload.first() == Some(&CLIENT_HELLO) => self.on_client_hello(&payload[1..]),
            HANDSHAKE if payload.first() == Some(&CERTIFICATE) => {
                let mut data = &payload[1..];
                let count = split_u8(&mut data).unwrap_or(0);
                let mut chain = Vec::new();
                for _ in 0..count {
                    let Some(len) = split_u16(&mut data) else { break };
                    let Some(der) = split(&mut data, len) else { break };
                    chain.push(CertificateDer::from(der.to_vec()));
                }
                self.client_certificates.push(chain);
            }
            APPLICATION_DATA => {
                self.received.extend_from_slice(payload);
                if self.behaviour.silent {
                    return;
                }
                if self.behaviour.echo {
                    self.tx
                        .extend_from_slice(&record(APPLICATION_DATA, payload));
                }
                if self.behaviour.close_after_reply && !self.closing {
                    self.tx
                        .extend_from_slice(&record(ALERT, &[1, CLOSE_NOTIFY]));
                    self.closing = true;
                }
                if self.behaviour.renegotiate && !self.renegotiated {
                    self.renegotiated = true;
                    self.tx
                        .extend_from_slice(&record(HANDSHAKE, &[HELLO_REQUEST]));
                }
            }
            ALERT if payload.len() == 2 => self.alerts.push((payload[0], payload[1])),
            _ => {}
        }
    }

    fn on_client_hello(&mut self, mut data: &[u8]) {
        let sid_len = usize::from(split_u8(&mut data).unwrap_or(0));
        let sid = split(&mut data, sid_len)
            .unwrap_or_default()
            .to_vec();
        let mfl = split_u8(&mut data).unwrap_or(0);
        let name_len = usize::from(split_u8(&mut data).unwrap_or(0));
        let name = split(&mut data, name_len).unwrap_or_default();
        self.server_names
            .push(String::from_utf8_lossy(name).into_owned());
        self.requested_fragment_lengths.push(mfl);
        if !sid.is_empty() {
            self.offered_sessions.push(sid.clone());
        }

        if self.behaviour.hang_up {
            self.open = false;
            return;
        }
        if self.behaviour.silent {
            return;
        }
        if let Some(desc) = self.behaviour.fatal_alert {
            self.tx
                .extend_from_slice(&record(ALERT, &[2, desc]));
            return;
        }

        let resumed = self.behaviour.resumption && !sid.is_empty() && self.issued.contains(&sid);
        let sid = if resumed {
            self.resumed_handshakes += 1;
            sid
        } else {
            self.full_handshakes += 1;
            self.next_sid += 1;
            let fresh = vec![self.next_sid; 32];
            self.issued.push(fresh.clone());
            fresh
        };

        let mut hello = vec![SERVER_HELLO, resumed as u8, sid.len() as u8];
        hello.extend_from_slice(&sid);
        hello.push(match self.behaviour.accept_fragment_length {
            true => mfl,
            false => 0,
        });
        hello.push(self.behaviour.request_client_auth as u8);
        hello.extend_from_slice(&(self.behaviour.spki.len() as u16).to_be_bytes());
        hello.extend_from_slice(&self.behaviour.spki);
        match resumed {
            true => hello.push(0),
            false => encode_certs(&mut hello, &self.behaviour.chain),
        }
        self.tx
            .extend_from_slice(&record(HANDSHAKE, &hello));

        if !self.behaviour.greeting.is_empty() {
            let greeting = self.behaviour.greeting.clone();
            self.tx
                .extend_from_slice(&record(APPLICATION_DATA, &greeting));
        }
    }

    /// Queues raw bytes for the client to read.
    pub fn push(&mut self, bytes: &[u8]) {
        self.tx.extend_from_slice(bytes);
    }

    fn limit(&self, n: usize) -> usize {
        match self.chunk {
            0 => n,
            chunk => n.min(chunk),
        }
    }
}

/// An in-memory [`Transport`] whose far end is a scripted [`Peer`].
#[derive(Debug)]
pub struct ScriptedTransport {
    id: u32,
    peer: Arc<Mutex<Peer>>,
}

impl ScriptedTransport {
    /// A transport with identity `id`, talking to a server that behaves
    /// as `behaviour` says.
    pub fn new(id: u32, behaviour: ServerBehaviour) -> Self {
        Self {
            id,
            peer: Arc::new(Mutex::new(Peer {
                behaviour,
                ..Peer::default()
            })),
        }
    }

    /// A handle on the far end, kept valid after the transport moves
    /// into a connection.
    pub fn peer(&self) -> Arc<Mutex<Peer>> {
        self.peer.clone()
    }
}

impl PartialEq for ScriptedTransport {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, host: &Host, port: u16) -> io::Result<()> {
        let mut peer = self.peer.lock().unwrap();
        peer.connects.push((host.clone(), port));
        if peer.refuse_connect {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        peer.open = true;
        peer.rx.clear();
        peer.tx.clear();
        peer.closing = false;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.peer.lock().unwrap().open
    }

    fn available(&mut self) -> io::Result<usize> {
        let mut peer = self.peer.lock().unwrap();
        let n = peer.tx.len();
        if n == 0 && peer.closing {
            peer.open = false;
        }
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut peer = self.peer.lock().unwrap();
        let n = peer.limit(buf.len().min(peer.tx.len()));
        buf[..n].copy_from_slice(&peer.tx[..n]);
        peer.tx.drain(..n);
        if peer.tx.is_empty() && peer.closing {
            peer.open = false;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut peer = self.peer.lock().unwrap();
        if !peer.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if peer.stall_writes {
            return Ok(0);
        }
        let n = peer.limit(buf.len());
        peer.on_client_bytes(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {
        let mut peer = self.peer.lock().unwrap();
        peer.stops += 1;
        peer.open = false;
    }

    fn set_timeout(&mut self, _timeout: Duration) {}
}

// ---------------------------------------------------------------------------
// Fragment-length probe peer

/// How a [`ProbeTransport`]'s server answers a real TLS ClientHello.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeAnswer {
    /// A ServerHello echoing the requested fragment length.
    Echo,
    /// A ServerHello without the extension.
    Ignore,
    /// A ServerHello carrying a different fragment length code.
    Other(u8),
    /// A fatal `illegal_parameter` alert.
    Alert,
    /// Nothing at all.
    Silence,
}

/// What a [`ProbeTransport`] saw.
#[derive(Debug, Default)]
pub struct ProbeLog {
    /// Whether a connection is open.
    pub open: bool,
    /// Connect calls seen.
    pub connects: usize,
    /// Stop calls seen.
    pub stops: usize,
    /// The fragment length code in the ClientHello, if any.
    pub requested: Option<u8>,
    /// The server_name in the ClientHello, if any.
    pub server_name: Option<String>,
    /// Records written after the ClientHello, as (type, payload).
    pub after_hello: Vec<(u8, Vec<u8>)>,
    rx: Vec<u8>,
    tx: Vec<u8>,
    hello_seen: bool,
}

/// A throwaway transport for the fragment-length probe, backed by a
/// server that understands just enough real TLS to answer one ClientHello.
#[derive(Debug)]
pub struct ProbeTransport {
    answer: ProbeAnswer,
    log: Arc<Mutex<ProbeLog>>,
}

impl ProbeTransport {
    /// A probe transport whose server answers with `answer`.
    pub fn new(answer: ProbeAnswer) -> Self {
        Self {
            answer,
            log: Arc::new(Mutex::new(ProbeLog::default())),
        }
    }

    /// A handle on what the server saw.
    pub fn log(&self) -> Arc<Mutex<ProbeLog>> {
        self.log.clone()
    }
}

/// Reads the `(max_fragment_length, server_name)` extensions out of a
/// ClientHello handshake message.
fn client_hello_extensions(mut msg: &[u8]) -> Option<(Option<u8>, Option<String>)> {
    let typ = split_u8(&mut msg)?;
    if typ != CLIENT_HELLO {
        return None;
    }
    split(&mut msg, 3)?;
    split(&mut msg, 2 + 32)?;
    let sid_len = usize::from(split_u8(&mut msg)?);
    split(&mut msg, sid_len)?;
    let suites_len = split_u16(&mut msg)?;
    split(&mut msg, suites_len)?;
    let comp_len = usize::from(split_u8(&mut msg)?);
    split(&mut msg, comp_len)?;
    let ext_len = split_u16(&mut msg)?;
    let mut exts = split(&mut msg, ext_len)?;

    let (mut mfl, mut name) = (None, None);
    while !exts.is_empty() {
        let typ = split_u16(&mut exts)?;
        let len = split_u16(&mut exts)?;
        let mut body = split(&mut exts, len)?;
        match typ {
            0x0001 => mfl = Some(split_u8(&mut body)?),
            0x0000 => {
                split(&mut body, 2 + 1)?;
                let name_len = split_u16(&mut body)?;
                let host = split(&mut body, name_len)?;
                name = Some(String::from_utf8_lossy(host).into_owned());
            }
            _ => {}
        }
    }
    Some((mfl, name))
}

fn tls_server_hello(mfl: Option<u8>) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x42; 32]);
    body.push(0);
    body.extend_from_slice(&[0xc0, 0x2f]);
    body.push(0);
    if let Some(code) = mfl {
        body.extend_from_slice(&[0x00, 0x05, 0x00, 0x01, 0x00, 0x01, code]);
    }
    let mut msg = vec![SERVER_HELLO];
    msg.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    msg.extend_from_slice(&body);
    record(HANDSHAKE, &msg)
}

impl Transport for ProbeTransport {
    fn connect(&mut self, _host: &Host, _port: u16) -> io::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.connects += 1;
        log.open = true;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.log.lock().unwrap().open
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(self.log.lock().unwrap().tx.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut log = self.log.lock().unwrap();
        let n = buf.len().min(log.tx.len());
        buf[..n].copy_from_slice(&log.tx[..n]);
        log.tx.drain(..n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut log = self.log.lock().unwrap();
        log.rx.extend_from_slice(buf);
        let mut rx = core::mem::take(&mut log.rx);
        for (typ, payload) in take_records(&mut rx) {
            if log.hello_seen {
                log.after_hello.push((typ, payload));
                continue;
            }
            log.hello_seen = true;
            let (mfl, name) = client_hello_extensions(&payload).unwrap_or((None, None));
            log.requested = mfl;
            log.server_name = name;
            let reply = match self.answer {
                ProbeAnswer::Echo => tls_server_hello(mfl),
                ProbeAnswer::Ignore => tls_server_hello(None),
                ProbeAnswer::Other(code) => tls_server_hello(Some(code)),
                ProbeAnswer::Alert => record(ALERT, &[2, 47]),
                ProbeAnswer::Silence => Vec::new(),
            };
            log.tx.extend_from_slice(&reply);
        }
        log.rx = rx;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.open = false;
    }

    fn set_timeout(&mut self, _timeout: Duration) {}
}
