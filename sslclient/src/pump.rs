//! Moves bytes between a [`Transport`] and an [`Engine`].
//!
//! Every wait here is a bounded poll against the [`Clock`]: nothing blocks
//! on the transport, and nothing runs past the timeout it was given.

use std::time::Duration;

use crate::engine::{Engine, Signals};
use crate::error::{EngineError, Error};
#[allow(unused_imports)]
use crate::log::{debug, trace, warn};
use crate::time_provider::Clock;
use crate::transport::Transport;

/// How long one polling wait sleeps before re-checking.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The condition a [`run_until`] call waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    /// The handshake has finished and application data may flow.
    HandshakeComplete,
    /// Decrypted application data is ready.
    AppDataReady,
    /// The engine accepts application data.
    AppWritable,
    /// No record bytes are waiting to be sent.
    Flushed,
}

impl Target {
    fn reached(self, signals: Signals, engine: &dyn Engine) -> bool {
        match self {
            Self::HandshakeComplete => {
                !engine.is_handshaking()
                    && signals.intersects(Signals::APP_WRITABLE | Signals::APP_DATA_READY)
            }
            Self::AppDataReady => signals.contains(Signals::APP_DATA_READY),
            Self::AppWritable => signals.contains(Signals::APP_WRITABLE),
            Self::Flushed => !signals.contains(Signals::WANTS_SEND),
        }
    }
}

/// Which timeout and which errors apply to a pump run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Handshake,
    Io,
}

impl Phase {
    fn timed_out(self) -> Error {
        match self {
            Self::Handshake => Error::HandshakeTimeout,
            Self::Io => Error::IoTimeout,
        }
    }

    fn engine_failed(self, code: EngineError) -> Error {
        match self {
            Self::Handshake => Error::HandshakeFailed(code),
            Self::Io => Error::ProtocolError(code),
        }
    }

    fn transport_lost(self) -> Error {
        match self {
            Self::Handshake => Error::HandshakeFailed(EngineError::IO),
            Self::Io => Error::ReadFailed,
        }
    }
}

/// The error for an engine that reports `CLOSED`.
///
/// A close with no error code is an orderly shutdown by the peer and maps
/// to `NotConnected`.
fn closed(engine: &dyn Engine, phase: Phase) -> Error {
    match engine.last_error() {
        EngineError::OK if phase == Phase::Io => Error::NotConnected,
        EngineError::OK => phase.transport_lost(),
        code => phase.engine_failed(code),
    }
}

/// Fails an established engine that has started a new handshake.
///
/// Nothing of the new handshake reaches the transport.
fn refuse_renegotiation(engine: &mut dyn Engine) -> Error {
    warn!("server tried to renegotiate");
    engine.fail(EngineError::BAD_STATE);
    Error::RenegotiationUnsupported
}

/// Drives `engine` over `transport` until `target` is reached.
///
/// Fails as soon as the engine closes or errors, when the transport is
/// lost while the engine is waiting for input, or once `timeout` has
/// elapsed.  In the I/O phase an engine that starts handshaking again is
/// failed with `RenegotiationUnsupported`.  Application data that arrives while waiting for something
/// else is discarded, as the engine cannot make progress while holding it.
pub(crate) fn run_until<T: Transport + ?Sized>(
    transport: &mut T,
    engine: &mut dyn Engine,
    clock: &dyn Clock,
    target: Target,
    timeout: Duration,
    phase: Phase,
) -> Result<(), Error> {
    let start = clock.now();
    let mut last = Signals::NONE;

    loop {
        if clock.elapsed_since(start) > timeout {
            debug!("{:?} wait for {:?} timed out after {:?}", phase, target, timeout);
            return Err(phase.timed_out());
        }

        let signals = engine.signals();
        if signals != last {
            trace!("engine signals {:?}", signals);
            last = signals;
        }

        if signals.intersects(Signals::CLOSED | Signals::ERROR) {
            return Err(closed(engine, phase));
        }

        if phase == Phase::Io && engine.is_handshaking() {
            return Err(refuse_renegotiation(engine));
        }

        if signals.contains(Signals::WANTS_SEND) {
            let pending = engine.pending_output();
            match transport.write(pending) {
                Ok(0) => {
                    clock.sleep(POLL_INTERVAL);
                    if clock.elapsed_since(start) > timeout {
                        warn!("transport accepted nothing within {:?}", timeout);
                        engine.fail(EngineError::IO);
                        return Err(Error::WriteFailed);
                    }
                }
                Ok(n) => {
                    trace!("sent {} of {} record bytes", n, pending.len());
                    engine.output_sent(n);
                }
                Err(_e) => {
                    debug!("transport write failed: {}", _e);
                    engine.fail(EngineError::IO);
                    return Err(Error::WriteFailed);
                }
            }
            continue;
        }

        if target.reached(signals, engine) {
            return Ok(());
        }

        if signals.contains(Signals::APP_DATA_READY) {
            let unread = engine.app_data().len();
            warn!("discarded {} unread bytes to favor a write", unread);
            engine.app_data_consumed(unread);
            continue;
        }

        if signals.contains(Signals::WANTS_RECEIVE) {
            if receive(transport, engine)? {
                continue;
            }
            if !transport.connected() {
                debug!("transport closed while the engine waits for input");
                engine.fail(EngineError::IO);
                return Err(phase.transport_lost());
            }
            clock.sleep(POLL_INTERVAL);
            continue;
        }

        // nothing wanted and nothing to wait for: the engine is stuck
        warn!("engine idle with {:?} before reaching {:?}", signals, target);
        return Err(phase.engine_failed(EngineError::BAD_STATE));
    }
}

/// Feeds whatever the transport has ready into the engine.
///
/// Returns whether any bytes were moved.
fn receive<T: Transport + ?Sized>(transport: &mut T, engine: &mut dyn Engine) -> Result<bool, Error> {
    let ready = match transport.available() {
        Ok(n) => n,
        Err(_e) => {
            debug!("transport available() failed: {}", _e);
            engine.fail(EngineError::IO);
            return Err(Error::ReadFailed);
        }
    };
    if ready == 0 {
        return Ok(false);
    }

    let space = engine.input_space();
    let want = ready.min(space.len());
    if want == 0 {
        return Ok(false);
    }
    match transport.read(&mut space[..want]) {
        Ok(0) => Ok(false),
        Ok(n) => {
            trace!("received {} record bytes", n);
            engine.input_received(n);
            Ok(true)
        }
        Err(_e) => {
            debug!("transport read failed: {}", _e);
            engine.fail(EngineError::IO);
            Err(Error::ReadFailed)
        }
    }
}

/// Moves whatever can be moved right now, without waiting.
///
/// Used by `available()` and friends: pending records are written as far
/// as the transport takes them, and ready input is fed in.
pub(crate) fn poll<T: Transport + ?Sized>(transport: &mut T, engine: &mut dyn Engine) -> Result<(), Error> {
    loop {
        let signals = engine.signals();
        if signals.intersects(Signals::CLOSED | Signals::ERROR) {
            return Err(closed(engine, Phase::Io));
        }

        if engine.is_handshaking() {
            return Err(refuse_renegotiation(engine));
        }

        if signals.contains(Signals::WANTS_SEND) {
            match transport.write(engine.pending_output()) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    engine.output_sent(n);
                    continue;
                }
                Err(_) => {
                    engine.fail(EngineError::IO);
                    return Err(Error::WriteFailed);
                }
            }
        }

        if signals.contains(Signals::APP_DATA_READY) || !signals.contains(Signals::WANTS_RECEIVE) {
            return Ok(());
        }

        if !receive(transport, engine)? {
            return Ok(());
        }
    }
}

/// Writes all of `data` to `transport`, tolerating partial and zero-byte
/// writes until `timeout` elapses without completion.
pub(crate) fn write_all<T: Transport + ?Sized>(
    transport: &mut T,
    data: &[u8],
    clock: &dyn Clock,
    timeout: Duration,
) -> Result<(), Error> {
    let start = clock.now();
    let mut sent = 0;
    while sent < data.len() {
        match transport.write(&data[sent..]) {
            Ok(0) => {
                clock.sleep(POLL_INTERVAL);
                if clock.elapsed_since(start) > timeout {
                    return Err(Error::WriteFailed);
                }
            }
            Ok(n) => sent += n,
            Err(_) => return Err(Error::WriteFailed),
        }
    }
    Ok(())
}

/// Waits until `transport` has bytes to read, returning how many.
pub(crate) fn wait_readable<T: Transport + ?Sized>(
    transport: &mut T,
    clock: &dyn Clock,
    timeout: Duration,
) -> Result<usize, Error> {
    let start = clock.now();
    loop {
        let ready = transport
            .available()
            .map_err(|_| Error::ReadFailed)?;
        if ready > 0 {
            return Ok(ready);
        }
        if !transport.connected() {
            return Err(Error::NotConnected);
        }
        if clock.elapsed_since(start) > timeout {
            return Err(Error::IoTimeout);
        }
        clock.sleep(POLL_INTERVAL);
    }
}

/// Fills `buf` from `transport`, bounded by `timeout` overall.
pub(crate) fn read_exact<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    clock: &dyn Clock,
    timeout: Duration,
) -> Result<(), Error> {
    let start = clock.now();
    let mut got = 0;
    while got < buf.len() {
        let left = timeout.saturating_sub(clock.elapsed_since(start));
        let ready = wait_readable(transport, clock, left)?;
        let want = ready.min(buf.len() - got);
        match transport.read(&mut buf[got..got + want]) {
            Ok(n) => got += n,
            Err(_) => return Err(Error::ReadFailed),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::time::Instant;

    use pki_types::{ServerName, UnixTime};

    use super::*;
    use crate::msgs::enums::MaxFragmentLength;
    use crate::session::SessionParameters;
    use crate::transport::Host;

    #[derive(Debug)]
    struct TestClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl TestClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            *self.offset.lock().unwrap() += duration;
        }

        fn unix_time(&self) -> UnixTime {
            UnixTime::since_unix_epoch(Duration::from_secs(1_700_000_000))
        }
    }

    /// A transport that accepts `accept` bytes per write and has `incoming`
    /// ready to read.
    #[derive(Default)]
    struct Pipe {
        accept: usize,
        written: Vec<u8>,
        incoming: Vec<u8>,
        closed: bool,
    }

    impl Transport for Pipe {
        fn connect(&mut self, _: &Host, _: u16) -> io::Result<()> {
            Ok(())
        }

        fn connected(&self) -> bool {
            !self.closed
        }

        fn available(&mut self) -> io::Result<usize> {
            Ok(self.incoming.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.incoming.len());
            buf[..n].copy_from_slice(&self.incoming[..n]);
            self.incoming.drain(..n);
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.accept);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn stop(&mut self) {
            self.closed = true;
        }

        fn set_timeout(&mut self, _: Duration) {}
    }

    /// Sends `hello`, then needs `need` input bytes to finish handshaking.
    struct Handshaker {
        out: Vec<u8>,
        input: Vec<u8>,
        got: usize,
        need: usize,
        error: EngineError,
    }

    impl Handshaker {
        fn new(hello: &[u8], need: usize) -> Self {
            Self {
                out: hello.to_vec(),
                input: vec![0; 64],
                got: 0,
                need,
                error: EngineError::OK,
            }
        }
    }

    impl Engine for Handshaker {
        fn reset(&mut self, _: Option<&ServerName<'_>>, _: Option<&SessionParameters>) -> Result<(), Error> {
            Ok(())
        }

        fn signals(&self) -> Signals {
            if self.error != EngineError::OK {
                Signals::CLOSED | Signals::ERROR
            } else if !self.out.is_empty() {
                Signals::WANTS_SEND
            } else if self.got < self.need {
                Signals::WANTS_RECEIVE
            } else {
                Signals::APP_WRITABLE | Signals::WANTS_RECEIVE
            }
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
            &mut self.input
        }

        fn input_received(&mut self, n: usize) {
            self.got += n;
        }

        fn app_data(&self) -> &[u8] {
            &[]
        }

        fn app_data_consumed(&mut self, _: usize) {}

        fn app_space(&mut self) -> &mut [u8] {
            &mut []
        }

        fn app_written(&mut self, _: usize) {}

        fn flush(&mut self, _: bool) {}

        fn close(&mut self) {}

        fn fail(&mut self, err: EngineError) {
            self.error = err;
        }

        fn is_handshaking(&self) -> bool {
            self.got < self.need
        }

        fn session_parameters(&self) -> Option<SessionParameters> {
            None
        }

        fn negotiated_fragment_length(&self) -> Option<MaxFragmentLength> {
            None
        }
    }

    #[test]
    fn partial_writes_are_completed() {
        let clock = TestClock::new();
        let mut pipe = Pipe {
            accept: 3,
            incoming: vec![0xff; 4],
            ..Pipe::default()
        };
        let mut engine = Handshaker::new(b"client hello", 4);
        run_until(
            &mut pipe,
            &mut engine,
            &clock,
            Target::HandshakeComplete,
            Duration::from_secs(1),
            Phase::Handshake,
        )
        .unwrap();
        assert_eq!(pipe.written, b"client hello");
        assert!(!engine.is_handshaking());
    }

    #[test]
    fn silent_peer_times_out() {
        let clock = TestClock::new();
        let mut pipe = Pipe {
            accept: 100,
            ..Pipe::default()
        };
        let mut engine = Handshaker::new(b"hi", 4);
        let start = clock.now();
        let err = run_until(
            &mut pipe,
            &mut engine,
            &clock,
            Target::HandshakeComplete,
            Duration::from_millis(250),
            Phase::Handshake,
        )
        .unwrap_err();
        assert_eq!(err, Error::HandshakeTimeout);
        assert!(clock.elapsed_since(start) > Duration::from_millis(250));
        assert!(engine.is_handshaking());
    }

    #[test]
    fn stalled_write_fails_after_timeout() {
        let clock = TestClock::new();
        let mut pipe = Pipe::default();
        let mut engine = Handshaker::new(b"hi", 0);
        let err = run_until(
            &mut pipe,
            &mut engine,
            &clock,
            Target::HandshakeComplete,
            Duration::from_millis(20),
            Phase::Handshake,
        )
        .unwrap_err();
        assert_eq!(err, Error::WriteFailed);
        assert_eq!(engine.last_error(), EngineError::IO);
    }

    #[test]
    fn lost_transport_fails_handshake() {
        let clock = TestClock::new();
        let mut pipe = Pipe {
            accept: 100,
            closed: true,
            ..Pipe::default()
        };
        let mut engine = Handshaker::new(b"", 1);
        assert_eq!(
            run_until(
                &mut pipe,
                &mut engine,
                &clock,
                Target::HandshakeComplete,
                Duration::from_secs(1),
                Phase::Handshake,
            ),
            Err(Error::HandshakeFailed(EngineError::IO))
        );
    }

    #[test]
    fn engine_error_is_reported_with_its_code() {
        let clock = TestClock::new();
        let mut pipe = Pipe::default();
        let mut engine = Handshaker::new(b"", 1);
        engine.fail(EngineError::BAD_MAC);
        assert_eq!(
            run_until(
                &mut pipe,
                &mut engine,
                &clock,
                Target::AppDataReady,
                Duration::from_secs(1),
                Phase::Io,
            ),
            Err(Error::ProtocolError(EngineError::BAD_MAC))
        );
    }

    #[test]
    fn io_phase_refuses_a_new_handshake() {
        let clock = TestClock::new();
        let mut pipe = Pipe {
            accept: 100,
            ..Pipe::default()
        };
        let mut engine = Handshaker::new(b"client hello", 4);
        assert_eq!(
            run_until(
                &mut pipe,
                &mut engine,
                &clock,
                Target::AppDataReady,
                Duration::from_secs(1),
                Phase::Io,
            ),
            Err(Error::RenegotiationUnsupported)
        );
        assert!(pipe.written.is_empty());
        assert_eq!(engine.last_error(), EngineError::BAD_STATE);

        let mut engine = Handshaker::new(b"client hello", 4);
        assert_eq!(
            poll(&mut pipe, &mut engine),
            Err(Error::RenegotiationUnsupported)
        );
        assert!(pipe.written.is_empty());
    }

    #[test]
    fn helpers_respect_timeouts() {
        let clock = TestClock::new();
        let mut pipe = Pipe::default();
        assert_eq!(
            write_all(&mut pipe, b"abc", &clock, Duration::from_millis(5)),
            Err(Error::WriteFailed)
        );

        let mut buf = [0u8; 4];
        pipe.incoming = vec![1, 2];
        assert_eq!(
            read_exact(&mut pipe, &mut buf, &clock, Duration::from_millis(5)),
            Err(Error::IoTimeout)
        );

        pipe.incoming = vec![3, 4];
        pipe.accept = 1;
        write_all(&mut pipe, b"abc", &clock, Duration::from_millis(5)).unwrap();
        assert_eq!(pipe.written, b"abc");
    }
}
