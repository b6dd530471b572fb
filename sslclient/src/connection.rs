use core::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use pki_types::{CertificateDer, PrivateKeyDer, SubjectPublicKeyInfoDer, UnixTime};

use crate::anchors::{CertificateStore, RootCertStore};
use crate::buffer::{BufferMode, BufferSizes, RecordBuffers};
use crate::config::ClientConfig;
use crate::engine::{Engine, EngineConfig, EngineProvider, IssuerKeyType, Signals};
use crate::error::{EngineError, Error, SslError};
#[allow(unused_imports)]
use crate::log::{debug, error, trace, warn};
use crate::msgs::enums::{CipherSuite, MaxFragmentLength, ProtocolVersion};
use crate::probe;
use crate::pump::{self, Phase, Target};
use crate::session::{SessionBridge, SessionSlot, SessionTimeout};
use crate::time_provider::{Clock, StdClock};
use crate::transport::{Host, Transport};
use crate::trust::TrustConfig;
use crate::verify::{KeyUsages, FINGERPRINT_LEN};

/// Where a [`Connection`] is in its life.
///
/// States only move forward, from `Idle` to `Established`; `stop()`
/// passes through `Closing` back to `Idle`.  Any failure on the way lands
/// in `Failed`, which `stop()` or the next `connect()` clears.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    /// Not connected.
    Idle,
    /// The transport is opening.
    TransportConnecting,
    /// The TLS handshake is running.
    HandshakeInProgress,
    /// Application data may flow.
    Established,
    /// `stop()` is tearing the connection down.
    Closing,
    /// The last connection attempt or I/O failed with this error.
    Failed(Error),
}

/// A client connection over a caller-supplied [`Transport`].
///
/// Runs TLS through an [`Engine`] built per connection by an
/// [`EngineProvider`], or passes bytes straight through when TLS is off
/// for the target port.
///
/// Reads and writes only happen when the caller makes them: nothing runs
/// in the background, and every wait is bounded by a configured timeout.
pub struct Connection<T: Transport> {
    transport: Option<T>,
    config: ClientConfig,
    trust: TrustConfig,
    sessions: SessionBridge,
    provider: Arc<dyn EngineProvider>,
    clock: Arc<dyn Clock>,

    engine: Option<Box<dyn Engine>>,
    plain: Vec<u8>,

    state: ConnectionState,
    target: Option<(Host, u16)>,
    secure: bool,
    established_at: Option<UnixTime>,
    last_error: EngineError,
}

impl<T: Transport> Connection<T> {
    /// A connection over `transport` with the default configuration.
    pub fn new(transport: T, provider: Arc<dyn EngineProvider>) -> Self {
        Self::with_config(transport, provider, ClientConfig::default())
    }

    /// A connection over `transport` using `config`.
    pub fn with_config(transport: T, provider: Arc<dyn EngineProvider>, config: ClientConfig) -> Self {
        let mut sessions = SessionBridge::default();
        sessions.set_timeout(config.session_timeout);
        Self {
            transport: Some(transport),
            config,
            trust: TrustConfig::default(),
            sessions,
            provider,
            clock: Arc::new(StdClock),
            engine: None,
            plain: Vec::new(),
            state: ConnectionState::Idle,
            target: None,
            secure: false,
            established_at: None,
            last_error: EngineError::OK,
        }
    }

    /// Replaces the clock used for timeouts and session ages.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Swaps in a new transport, stopping any current connection first.
    pub fn set_client(&mut self, transport: T) {
        self.stop();
        self.transport = Some(transport);
    }

    /// The transport, if one is installed.
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Stops the connection and hands the transport back.
    pub fn into_transport(mut self) -> Option<T> {
        self.stop();
        self.transport.take()
    }

    // Configuration

    /// The configuration used by the next handshake.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The trust policy and client credential.
    pub fn trust(&self) -> &TrustConfig {
        &self.trust
    }

    /// Mutable access to the trust policy and client credential.
    pub fn trust_mut(&mut self) -> &mut TrustConfig {
        &mut self.trust
    }

    /// Forces TLS on or off, overriding the secure-port heuristic.
    pub fn enable_ssl(&mut self, enable: bool) {
        self.config.ssl_mode = Some(enable);
    }

    /// Bounds each read, write and flush.  Also applied to the transport.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.io_timeout = timeout;
        if let Some(transport) = &mut self.transport {
            transport.set_timeout(timeout);
        }
    }

    /// Bounds the whole handshake.
    pub fn set_handshake_timeout(&mut self, timeout: Duration) {
        self.config.handshake_timeout = timeout;
    }

    /// Sets how long a saved session may be resumed: `0` disables
    /// expiry, anything below 60 seconds is raised to 60.
    pub fn set_session_timeout(&mut self, secs: u64) {
        let timeout = SessionTimeout::from_secs(secs);
        self.config.session_timeout = timeout;
        self.sessions.set_timeout(timeout);
    }

    /// Requests record buffers for `recv` and `xmit` plaintext bytes,
    /// each clamped to 512..=16384.
    pub fn set_buffer_sizes(&mut self, recv: usize, xmit: usize) {
        self.config.buffer_sizes = BufferSizes::new(recv, xmit);
    }

    /// Shares one record buffer between both directions, or not.
    pub fn set_buffer_mode(&mut self, mode: BufferMode) {
        self.config.buffer_mode = mode;
    }

    /// Offers exactly `suites`.
    pub fn set_ciphers(&mut self, suites: &[CipherSuite]) -> Result<(), Error> {
        self.config.set_cipher_suites(suites)
    }

    /// Offers only static-RSA suites.
    pub fn set_ciphers_less_secure(&mut self) {
        self.config.set_cipher_suites_less_secure();
    }

    /// Restricts the negotiated version to `min..=max`.
    pub fn set_ssl_version(&mut self, min: ProtocolVersion, max: ProtocolVersion) -> Result<(), Error> {
        self.config.set_versions(min, max)
    }

    /// Attaches caller-owned storage for session resumption.
    pub fn set_session(&mut self, slot: SessionSlot) {
        self.sessions.attach(slot);
    }

    /// Detaches the session slot.
    pub fn clear_session(&mut self) {
        self.sessions.detach();
    }

    // Trust and credentials; see `TrustConfig` for details.

    /// Accepts any server certificate.
    pub fn set_insecure(&mut self) {
        self.trust.set_insecure();
    }

    /// Pins the server leaf's SHA-1 fingerprint.
    pub fn set_fingerprint(&mut self, fingerprint: [u8; FINGERPRINT_LEN]) {
        self.trust.set_fingerprint(fingerprint);
    }

    /// Pins the server leaf's SHA-1 fingerprint, given as 40 hex digits.
    pub fn set_fingerprint_hex(&mut self, fingerprint: &str) -> Result<(), Error> {
        self.trust.set_fingerprint_hex(fingerprint)
    }

    /// Uses a known server key instead of the certificate's.
    pub fn set_known_key(&mut self, key: SubjectPublicKeyInfoDer<'static>, usages: KeyUsages) {
        self.trust.set_known_key(key, usages);
    }

    /// Validates the chain against `roots`.
    pub fn set_trust_anchors(&mut self, roots: impl Into<Arc<RootCertStore>>) {
        self.trust.set_trust_anchors(roots);
    }

    /// Validates the chain against anchors found in `store`.
    pub fn set_certificate_store(&mut self, store: Arc<dyn CertificateStore>) {
        self.trust.set_certificate_store(store);
    }

    /// Accepts a self-signed server leaf.
    pub fn allow_self_signed_certs(&mut self) {
        self.trust.allow_self_signed();
    }

    /// Validates the chain against the PEM certificates in `pem`.
    pub fn set_ca_cert(&mut self, pem: &[u8]) -> Result<(), Error> {
        self.trust.set_ca_cert_pem(pem)
    }

    /// Reads `size` bytes of PEM trust anchors from `reader`.
    pub fn load_ca_cert(&mut self, reader: impl io::Read, size: usize) -> Result<(), Error> {
        self.trust.load_ca_cert(reader, size)
    }

    /// Sets the client chain from PEM.
    pub fn set_certificate(&mut self, pem: &[u8]) -> Result<(), Error> {
        self.trust.set_certificate_pem(pem)
    }

    /// Reads `size` bytes of PEM client chain from `reader`.
    pub fn load_certificate(&mut self, reader: impl io::Read, size: usize) -> Result<(), Error> {
        self.trust.load_certificate(reader, size)
    }

    /// Sets the client private key from PEM.
    pub fn set_private_key(&mut self, pem: &[u8]) -> Result<(), Error> {
        self.trust.set_private_key_pem(pem)
    }

    /// Reads `size` bytes of PEM client key from `reader`.
    pub fn load_private_key(&mut self, reader: impl io::Read, size: usize) -> Result<(), Error> {
        self.trust.load_private_key(reader, size)
    }

    /// Sets an RSA client chain and key.
    pub fn set_client_rsa_cert(&mut self, chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) {
        self.trust.set_client_rsa_cert(chain, key);
    }

    /// Sets an EC client chain and key.
    pub fn set_client_ec_cert(
        &mut self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        usages: KeyUsages,
        issuer_key_type: IssuerKeyType,
    ) {
        self.trust
            .set_client_ec_cert(chain, key, usages, issuer_key_type);
    }

    /// Installs trust anchors and a client credential from PEM in one go.
    ///
    /// Any of the three may be `None` to leave that part unchanged.
    pub fn set_secure(&mut self, ca: Option<&[u8]>, cert: Option<&[u8]>, key: Option<&[u8]>) -> Result<(), Error> {
        if let Some(ca) = ca {
            self.trust.set_ca_cert_pem(ca)?;
        }
        if let Some(cert) = cert {
            self.trust.set_certificate_pem(cert)?;
        }
        if let Some(key) = key {
            self.trust.set_private_key_pem(key)?;
        }
        Ok(())
    }

    /// Validates certificates as of `time`.
    pub fn set_x509_time(&mut self, time: UnixTime) {
        self.trust.set_x509_time(time);
    }

    // Connecting

    /// Connects to `host`, a DNS name or an IP address literal.
    ///
    /// TLS runs if [`ClientConfig::ssl_enabled_for`] says so for `port`.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        let host = Host::try_from(host)?;
        self.connect_host(host, port)
    }

    /// Connects to `ip`.
    pub fn connect_ip(&mut self, ip: IpAddr, port: u16) -> Result<(), Error> {
        self.connect_host(Host::Ip(ip), port)
    }

    /// Connects to `host`.
    pub fn connect_host(&mut self, host: Host, port: u16) -> Result<(), Error> {
        if self.state != ConnectionState::Idle {
            self.stop();
        }

        let secure = self.config.ssl_enabled_for(port);
        debug!(
            "connecting to {}:{} ({})",
            host,
            port,
            if secure { "tls" } else { "plain" }
        );

        let io_timeout = self.config.io_timeout;
        let Some(transport) = self.transport.as_mut() else {
            self.state = ConnectionState::Failed(Error::TransportUnavailable);
            return Err(Error::TransportUnavailable);
        };

        self.state = ConnectionState::TransportConnecting;
        transport.set_timeout(io_timeout);
        if let Err(_e) = transport.connect(&host, port) {
            debug!("transport connect failed: {}", _e);
            transport.stop();
            self.state = ConnectionState::Failed(Error::ConnectFailed);
            return Err(Error::ConnectFailed);
        }

        self.target = Some((host, port));
        self.secure = secure;
        if !secure {
            self.established_at = Some(self.clock.unix_time());
            self.state = ConnectionState::Established;
            return Ok(());
        }
        self.handshake()
    }

    /// Upgrades an established plain connection to TLS, with the target
    /// it was opened to.
    pub fn connect_ssl(&mut self) -> Result<(), Error> {
        if self.state != ConnectionState::Established {
            return Err(Error::NotConnected);
        }
        if self.secure {
            return Ok(());
        }
        self.secure = true;
        self.handshake()
    }

    /// Same as [`Connection::connect_ssl`].
    ///
    /// `host` and `port` are ignored: the handshake always runs against
    /// the target the plain connection was opened to.
    pub fn connect_ssl_to(&mut self, _host: &str, _port: u16) -> Result<(), Error> {
        debug!("connect_ssl_to ignores its arguments; using the stored target");
        self.connect_ssl()
    }

    fn handshake(&mut self) -> Result<(), Error> {
        let result = self.try_handshake();
        if let Err(err) = &result {
            warn!("handshake failed: {}", err);
            if *err == Error::OutOfMemory {
                // recoverable: leave a clean, disconnected object
                self.last_error = EngineError::OUT_OF_MEMORY;
                self.release();
            } else {
                self.fail(err.clone());
            }
        }
        result
    }

    fn try_handshake(&mut self) -> Result<(), Error> {
        let (host, port) = self
            .target
            .clone()
            .ok_or(Error::NotConnected)?;

        let verifier = self.trust.materialize()?;
        let cipher_suites = self.config.offered_suites()?;
        let buffers = RecordBuffers::allocate(
            self.config.buffer_sizes,
            self.config.record_overhead(),
            self.config.buffer_mode,
        )?;
        let max_fragment_length = self
            .config
            .buffer_sizes
            .advertised_fragment_length();

        let engine_config = EngineConfig {
            buffers,
            verifier: verifier.clone(),
            verification_time: self
                .trust
                .x509_time()
                .unwrap_or_else(|| self.clock.unix_time()),
            client_auth: self.trust.client_credential(),
            min_version: self.config.min_version(),
            max_version: self.config.max_version(),
            cipher_suites,
            max_fragment_length,
        };
        let mut engine = self.provider.new_engine(engine_config)?;

        let resume = self
            .sessions
            .load(&host, port, self.clock.unix_time());
        engine.reset(host.server_name().as_ref(), resume.as_ref())?;
        self.state = ConnectionState::HandshakeInProgress;

        let transport = self
            .transport
            .as_mut()
            .ok_or(Error::TransportUnavailable)?;
        let pumped = pump::run_until(
            transport,
            engine.as_mut(),
            self.clock.as_ref(),
            Target::HandshakeComplete,
            self.config.handshake_timeout,
            Phase::Handshake,
        );
        if let Err(err) = pumped {
            self.last_error = engine.last_error();
            // a verifier rejection is the more useful report
            return Err(match verifier.last_rejection() {
                Some(why) => Error::CertificateRejected(why),
                None => err,
            });
        }

        let now = self.clock.unix_time();
        if let Some(params) = engine.session_parameters() {
            self.sessions.store(&host, port, params, now)?;
        }
        debug!(
            "handshake with {}:{} complete{}",
            host,
            port,
            if resume.is_some() { " (resumption offered)" } else { "" }
        );

        self.engine = Some(engine);
        self.established_at = Some(now);
        self.last_error = EngineError::OK;
        self.state = ConnectionState::Established;
        Ok(())
    }

    /// Drops the connection if it is not open to `host:port`, or if the
    /// session timeout has passed since it was established.
    ///
    /// Returns whether the connection is still usable.
    pub fn validate(&mut self, host: &str, port: u16) -> bool {
        let same_target = match (&self.target, Host::try_from(host)) {
            (Some((h, p)), Ok(host)) => *h == host && *p == port,
            _ => false,
        };
        let fresh = match self.established_at {
            Some(at) => self
                .config
                .session_timeout
                .is_fresh(at, self.clock.unix_time()),
            None => false,
        };

        if same_target && fresh && self.connected() {
            return true;
        }
        if self.state != ConnectionState::Idle {
            debug!("validate: dropping connection");
            self.stop();
        }
        false
    }

    // State

    /// Where the connection is in its life.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Whether TLS is running, or will run, on this connection.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The host and port of the current or last connection.
    pub fn target(&self) -> Option<(&Host, u16)> {
        self.target
            .as_ref()
            .map(|(h, p)| (h, *p))
    }

    /// Whether the connection is established and can still be read.
    ///
    /// Stays true after the transport closes while decrypted data is
    /// left to read.
    pub fn connected(&self) -> bool {
        if self.state != ConnectionState::Established {
            return false;
        }
        let open = self
            .transport
            .as_ref()
            .is_some_and(|t| t.connected());
        open || !self.peek_buffer().is_empty()
    }

    /// The fragment length the server agreed to, if one was negotiated.
    pub fn max_fragment_length_negotiated(&self) -> Option<MaxFragmentLength> {
        self.engine
            .as_ref()
            .and_then(|e| e.negotiated_fragment_length())
    }

    /// The error code of the last failure, with its description.
    pub fn last_ssl_error(&self) -> Option<SslError> {
        match self.last_error {
            EngineError::OK => None,
            code => Some(SslError::from(code)),
        }
    }

    // Reading

    /// Bytes that can be read without waiting.
    ///
    /// Moves any record bytes the transport already holds into the engine
    /// first.  Returns 0 when not connected.
    pub fn available(&mut self) -> usize {
        match self.poll() {
            Ok(()) => self.peek_buffer().len(),
            Err(_) => 0,
        }
    }

    /// Same as [`Connection::available`]; the size of [`Connection::peek_buffer`]
    /// after polling.
    pub fn peek_available(&mut self) -> usize {
        self.available()
    }

    /// Decrypted bytes ready to read, without copying or consuming them.
    ///
    /// The view is only valid until the next call that takes `&mut self`.
    pub fn peek_buffer(&self) -> &[u8] {
        if !self.secure {
            return &self.plain;
        }
        match &self.engine {
            Some(engine) => engine.app_data(),
            None => &[],
        }
    }

    /// Marks up to `n` bytes of [`Connection::peek_buffer`] as read,
    /// returning how many were.  Never consumes more than is available.
    pub fn peek_consume(&mut self, n: usize) -> usize {
        let n = n.min(self.peek_buffer().len());
        if n == 0 {
            return 0;
        }
        if !self.secure {
            self.plain.drain(..n);
        } else if let Some(engine) = &mut self.engine {
            engine.app_data_consumed(n);
        }
        n
    }

    /// The next byte, without consuming it or waiting for one.
    pub fn peek(&mut self) -> Option<u8> {
        self.available();
        self.peek_buffer().first().copied()
    }

    /// Copies up to `buf.len()` ready bytes into `buf` without consuming
    /// them, waiting up to the I/O timeout for the first one.
    pub fn peek_bytes(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let ready = match self.wait_readable() {
            Ok(()) => self.peek_buffer(),
            Err(Error::NotConnected) => return Ok(0),
            Err(err) => return Err(err),
        };
        let n = ready.len().min(buf.len());
        buf[..n].copy_from_slice(&ready[..n]);
        Ok(n)
    }

    /// Reads into `buf`, waiting up to the I/O timeout for data.
    ///
    /// Returns `Ok(0)` once the peer has closed the connection and every
    /// byte it sent has been read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.wait_readable() {
            Ok(()) => {}
            Err(Error::NotConnected) => return Ok(0),
            Err(err) => return Err(err),
        }
        let ready = self.peek_buffer();
        let n = ready.len().min(buf.len());
        buf[..n].copy_from_slice(&ready[..n]);
        self.peek_consume(n);
        Ok(n)
    }

    /// Waits until the peek buffer is non-empty.
    ///
    /// `NotConnected` means the peer closed, or we never connected.
    fn wait_readable(&mut self) -> Result<(), Error> {
        if !self.peek_buffer().is_empty() {
            return Ok(());
        }
        self.ensure_established()?;
        let timeout = self.config.io_timeout;

        let result = if self.secure {
            self.run_io(Target::AppDataReady)
        } else {
            self.fill_plain(timeout)
        };
        match result {
            Ok(()) => Ok(()),
            Err(Error::NotConnected) => {
                if self.state != ConnectionState::Idle {
                    self.release();
                }
                Err(Error::NotConnected)
            }
            Err(err) => Err(err),
        }
    }

    fn fill_plain(&mut self, timeout: Duration) -> Result<(), Error> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(Error::TransportUnavailable)?;
        let ready = pump::wait_readable(transport, self.clock.as_ref(), timeout)?;
        read_plain(transport, &mut self.plain, ready)
    }

    // Writing

    /// Writes `data`, waiting up to the I/O timeout for room.
    ///
    /// Under TLS, data is batched into the current record and only sent
    /// once the record is full or [`Connection::flush`] is called.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.ensure_established()?;
        if data.is_empty() {
            return Ok(0);
        }

        if !self.secure {
            let transport = self
                .transport
                .as_mut()
                .ok_or(Error::TransportUnavailable)?;
            let result = pump::write_all(transport, data, self.clock.as_ref(), self.config.io_timeout);
            if let Err(err) = &result {
                self.fail(err.clone());
            }
            return result.map(|()| data.len());
        }

        let mut written = 0;
        while written < data.len() {
            self.run_io(Target::AppWritable)?;
            let Some(engine) = self.engine.as_mut() else {
                return Err(Error::NotConnected);
            };
            let space = engine.app_space();
            let n = space.len().min(data.len() - written);
            space[..n].copy_from_slice(&data[written..written + n]);
            engine.app_written(n);
            written += n;
            trace!("queued {} plaintext bytes", n);
        }
        Ok(written)
    }

    /// Sends any batched application data.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.ensure_established()?;
        if self.secure {
            if let Some(engine) = self.engine.as_mut() {
                engine.flush(false);
            }
            self.run_io(Target::Flushed)?;
        }
        if let Some(transport) = self.transport.as_mut() {
            transport
                .flush()
                .map_err(|_| Error::WriteFailed)?;
        }
        Ok(())
    }

    /// Plaintext bytes that can be written without waiting.
    pub fn available_for_write(&mut self) -> usize {
        if self.poll().is_err() {
            return 0;
        }
        if !self.secure {
            return self.config.buffer_sizes.xmit();
        }
        match self.engine.as_mut() {
            Some(engine) if engine.signals().contains(Signals::APP_WRITABLE) => {
                engine.app_space().len()
            }
            _ => 0,
        }
    }

    // Closing

    /// Closes the connection: sends close_notify if possible, releases
    /// the engine and its buffers, and stops the transport.
    ///
    /// Calling this again, or on a connection that never opened, does
    /// nothing.
    pub fn stop(&mut self) {
        if self.state == ConnectionState::Idle && self.engine.is_none() {
            return;
        }
        self.state = ConnectionState::Closing;

        if let (Some(engine), Some(transport)) = (self.engine.as_mut(), self.transport.as_mut()) {
            engine.close();
            // best effort; a peer that is gone cannot be told
            let _ = pump::poll(transport, engine.as_mut());
        }
        self.release();
    }

    /// Probes whether the server at `host:port` accepts `len`-byte
    /// fragments, over `transport` and never over this connection.
    ///
    /// Uses this connection's cipher suites, clock and I/O timeout.
    pub fn probe_max_fragment_length<P: Transport>(
        &self,
        transport: P,
        host: &str,
        port: u16,
        len: u16,
    ) -> Result<bool, Error> {
        let host = Host::try_from(host)?;
        probe::probe_max_fragment_length_with(
            transport,
            &host,
            port,
            len,
            self.config.cipher_suites(),
            self.clock.as_ref(),
            self.config.io_timeout,
        )
    }

    fn ensure_established(&self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Established => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Moves ready bytes without waiting.
    fn poll(&mut self) -> Result<(), Error> {
        self.ensure_established()?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(Error::TransportUnavailable)?;

        if !self.secure {
            let ready = transport
                .available()
                .map_err(|_| Error::ReadFailed)?;
            return read_plain(transport, &mut self.plain, ready);
        }

        let Some(engine) = self.engine.as_mut() else {
            return Err(Error::NotConnected);
        };
        let result = pump::poll(transport, engine.as_mut());
        self.after_io(result)
    }

    fn run_io(&mut self, target: Target) -> Result<(), Error> {
        let (Some(transport), Some(engine)) = (self.transport.as_mut(), self.engine.as_mut()) else {
            return Err(Error::NotConnected);
        };
        let result = pump::run_until(
            transport,
            engine.as_mut(),
            self.clock.as_ref(),
            target,
            self.config.io_timeout,
            Phase::Io,
        );
        self.after_io(result)
    }

    /// Applies the outcome of pumping an established connection.
    ///
    /// An orderly close by the peer releases everything and leaves `Idle`;
    /// an I/O timeout leaves the connection as it was.
    fn after_io(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match &result {
            Ok(()) | Err(Error::IoTimeout) => {}
            Err(Error::NotConnected) => {
                trace!("peer closed the connection");
                self.release();
            }
            Err(err) => {
                if let Some(engine) = &self.engine {
                    self.last_error = engine.last_error();
                }
                self.fail(err.clone());
            }
        }
        result
    }

    /// Tears the connection down into `Failed(err)`.
    fn fail(&mut self, err: Error) {
        error!("connection failed: {}", err);
        if let Error::HandshakeFailed(code) | Error::ProtocolError(code) = &err {
            self.last_error = *code;
        } else if let Error::CertificateRejected(why) = &err {
            self.last_error = why.engine_code();
        }
        self.release();
        self.state = ConnectionState::Failed(err);
    }

    /// Drops the engine and stops the transport, leaving `Idle`.
    fn release(&mut self) {
        if self.engine.take().is_some() {
            trace!("engine and record buffers released");
        }
        self.plain.clear();
        if let Some(transport) = &mut self.transport {
            transport.stop();
        }
        self.established_at = None;
        self.state = ConnectionState::Idle;
    }
}

fn read_plain<T: Transport + ?Sized>(transport: &mut T, plain: &mut Vec<u8>, ready: usize) -> Result<(), Error> {
    if ready == 0 {
        return Ok(());
    }
    let start = plain.len();
    plain
        .try_reserve(ready)
        .map_err(|_| Error::OutOfMemory)?;
    plain.resize(start + ready, 0);
    match transport.read(&mut plain[start..]) {
        Ok(n) => {
            plain.truncate(start + n);
            Ok(())
        }
        Err(_) => {
            plain.truncate(start);
            Err(Error::ReadFailed)
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Transport + PartialEq> PartialEq for Connection<T> {
    /// Two connections are equal when they run over the same transport to
    /// the same host and port.
    fn eq(&self, other: &Self) -> bool {
        self.transport.is_some() && self.transport == other.transport && self.target == other.target
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("target", &self.target)
            .field("secure", &self.secure)
            .field("trust", &self.trust.policy())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> io::Read for Connection<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Self::read(self, buf)?)
    }
}

impl<T: Transport> io::BufRead for Connection<T> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self.wait_readable() {
            Ok(()) | Err(Error::NotConnected) => Ok(self.peek_buffer()),
            Err(err) => Err(err.into()),
        }
    }

    fn consume(&mut self, amt: usize) {
        self.peek_consume(amt);
    }
}

impl<T: Transport> io::Write for Connection<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Self::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(Self::flush(self)?)
    }
}
