//! Asks a server, over a throwaway connection, whether it honours the
//! TLS `max_fragment_length` extension (RFC 6066 section 4).

use std::time::Duration;

use ring::rand::{SecureRandom, SystemRandom};

use crate::config::ClientConfig;
use crate::error::{EngineError, Error};
#[allow(unused_imports)]
use crate::log::{debug, trace, warn};
use crate::msgs::alert::abort_records;
use crate::msgs::enums::{CipherSuite, ContentType, MaxFragmentLength};
use crate::msgs::hello::{read_record_header, ProbeClientHello, ServerHelloSummary, RECORD_HEADER_LEN};
use crate::pump;
use crate::suites::SupportedCipherSuite;
use crate::time_provider::{Clock, StdClock};
use crate::transport::{Host, Transport};

/// Largest record payload we accept while looking for the ServerHello.
const MAX_RECORD_PAYLOAD: usize = 16384 + 2048;

/// Whether the server at `host:port` accepts a maximum fragment length of
/// `len` bytes, using the default cipher suites and I/O timeout.
///
/// See [`probe_max_fragment_length_with`].
pub fn probe_max_fragment_length<T: Transport>(
    transport: T,
    host: &Host,
    port: u16,
    len: u16,
) -> Result<bool, Error> {
    let config = ClientConfig::default();
    probe_max_fragment_length_with(
        transport,
        host,
        port,
        len,
        config.cipher_suites(),
        &StdClock,
        config.io_timeout,
    )
}

/// Whether the server at `host:port` accepts a maximum fragment length of
/// `len` bytes.
///
/// `transport` is used for this probe only: it is connected, sent a
/// ClientHello offering `suites` and the extension, and closed again after
/// the handshake is abandoned with `user_canceled` and `close_notify`
/// alerts.  It is always stopped on return.
///
/// `len` must be 512, 1024, 2048 or 4096; anything else fails with
/// [`Error::InvalidFragmentLength`] before any connection is made.  A
/// server that answers with an alert is taken to refuse the extension.
pub fn probe_max_fragment_length_with<T: Transport>(
    mut transport: T,
    host: &Host,
    port: u16,
    len: u16,
    suites: &[&SupportedCipherSuite],
    clock: &dyn Clock,
    timeout: Duration,
) -> Result<bool, Error> {
    let code = MaxFragmentLength::from_len(usize::from(len)).ok_or(Error::InvalidFragmentLength(len))?;

    let mut random = [0u8; 32];
    SystemRandom::new()
        .fill(&mut random)
        .map_err(|_| Error::General("no randomness for probe".into()))?;
    let suite_ids: Vec<CipherSuite> = suites.iter().map(|s| s.suite).collect();
    let hello = ProbeClientHello {
        random,
        cipher_suites: &suite_ids,
        server_name: host.dns_name(),
        max_fragment_length: code,
    }
    .to_record();

    transport.set_timeout(timeout);
    if let Err(_e) = transport.connect(host, port) {
        debug!("probe connect to {}:{} failed: {}", host, port, _e);
        transport.stop();
        return Err(Error::ConnectFailed);
    }

    let result = exchange(&mut transport, &hello, code, clock, timeout);

    if transport.connected() {
        for alert in abort_records() {
            if pump::write_all(&mut transport, &alert, clock, timeout).is_err() {
                break;
            }
        }
        let _ = transport.flush();
    }
    transport.stop();

    debug!(
        "max fragment length {} at {}:{}: {:?}",
        len, host, port, result
    );
    result
}

fn exchange<T: Transport>(
    transport: &mut T,
    hello: &[u8],
    code: MaxFragmentLength,
    clock: &dyn Clock,
    timeout: Duration,
) -> Result<bool, Error> {
    let start = clock.now();
    pump::write_all(transport, hello, clock, timeout)?;
    transport
        .flush()
        .map_err(|_| Error::WriteFailed)?;

    let mut header = [0u8; RECORD_HEADER_LEN];
    let left = timeout.saturating_sub(clock.elapsed_since(start));
    pump::read_exact(transport, &mut header, clock, left)?;
    let (typ, payload_len) = read_record_header(&header)?;

    match typ {
        ContentType::Handshake => {}
        ContentType::Alert => {
            trace!("server answered the probe with an alert");
            return Ok(false);
        }
        _ => return Err(Error::ProtocolError(EngineError::UNEXPECTED)),
    }
    if payload_len > MAX_RECORD_PAYLOAD {
        return Err(Error::ProtocolError(EngineError::BAD_LENGTH));
    }

    let mut payload = vec![0u8; payload_len];
    let left = timeout.saturating_sub(clock.elapsed_since(start));
    pump::read_exact(transport, &mut payload, clock, left)?;

    let hello = ServerHelloSummary::read_payload(&payload)?;
    trace!(
        "probe ServerHello: {:?} {:?} mfl={:?}",
        hello.version,
        hello.cipher_suite,
        hello.max_fragment_length
    );
    Ok(hello.max_fragment_length == Some(code))
}
