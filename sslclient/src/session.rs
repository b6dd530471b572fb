use core::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pki_types::UnixTime;
use zeroize::Zeroize;

use crate::error::Error;
#[allow(unused_imports)]
use crate::log::{debug, trace};
use crate::transport::Host;

/// The engine's serialized session parameters, treated as an opaque blob.
///
/// Contains the master secret, so it is wiped on drop.
#[derive(Clone)]
pub struct SessionParameters {
    bytes: [u8; Self::LEN],
}

impl SessionParameters {
    /// Size of the serialized parameters: session id (32) and its length,
    /// version, cipher suite, and master secret (48).
    pub const LEN: usize = 85;

    /// Wraps serialized parameters.
    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self { bytes }
    }

    /// The serialized parameters.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.bytes
    }
}

impl PartialEq for SessionParameters {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SessionParameters {}

impl Drop for SessionParameters {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SessionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionParameters(..)")
    }
}

/// How long a saved session may be offered for resumption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionTimeout {
    /// Sessions never expire.
    #[default]
    Disabled,
    /// Sessions older than this are not offered.
    After(Duration),
}

impl SessionTimeout {
    /// The shortest lifetime we allow when expiry is enabled.
    pub const MIN: Duration = Duration::from_secs(60);

    /// Interprets a lifetime in seconds: `0` disables expiry, anything
    /// below 60 is raised to 60.
    pub fn from_secs(secs: u64) -> Self {
        match secs {
            0 => Self::Disabled,
            secs => Self::After(Duration::from_secs(secs).max(Self::MIN)),
        }
    }

    /// The effective lifetime, `None` if expiry is disabled.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::After(d) => Some(*d),
        }
    }

    /// Whether something saved at `saved_at` is still fresh at `now`.
    pub fn is_fresh(&self, saved_at: UnixTime, now: UnixTime) -> bool {
        match self {
            Self::Disabled => true,
            Self::After(limit) => {
                let age = now.as_secs().saturating_sub(saved_at.as_secs());
                Duration::from_secs(age) < *limit
            }
        }
    }
}

/// A session saved after a completed handshake.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    /// Target the session was negotiated with.
    pub host: Host,
    /// Port the session was negotiated on.
    pub port: u16,
    /// The engine's serialized parameters.
    pub params: SessionParameters,
    /// When the session was saved.
    pub saved_at: UnixTime,
}

/// Caller-owned storage for one resumable session.
///
/// Clones share the same storage, so one slot may be attached to a
/// connection while the caller keeps a handle to inspect or persist it.
#[derive(Clone, Debug, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<Option<SessionRecord>>>,
}

impl SessionSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the saved record, if any.
    pub fn get(&self) -> Option<SessionRecord> {
        self.inner
            .lock()
            .ok()
            .and_then(|r| r.clone())
    }

    /// Replaces the saved record.
    pub fn set(&self, record: SessionRecord) -> Result<(), Error> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| Error::General("session slot poisoned".into()))?;
        *slot = Some(record);
        Ok(())
    }

    /// Forgets the saved record.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
    }
}

/// Moves sessions between an attached [`SessionSlot`] and the engine.
#[derive(Debug, Default)]
pub(crate) struct SessionBridge {
    slot: Option<SessionSlot>,
    timeout: SessionTimeout,
}

impl SessionBridge {
    pub(crate) fn attach(&mut self, slot: SessionSlot) {
        self.slot = Some(slot);
    }

    pub(crate) fn detach(&mut self) {
        self.slot = None;
    }

    pub(crate) fn set_timeout(&mut self, timeout: SessionTimeout) {
        self.timeout = timeout;
    }

    /// Parameters to offer for resumption with `host:port`, if the slot
    /// holds a fresh session for exactly that target.
    pub(crate) fn load(&self, host: &Host, port: u16, now: UnixTime) -> Option<SessionParameters> {
        let record = self.slot.as_ref()?.get()?;
        if &record.host != host || record.port != port {
            debug!(
                "saved session is for {}:{}, not {}:{}; not resuming",
                record.host, record.port, host, port
            );
            return None;
        }
        if !self.timeout.is_fresh(record.saved_at, now) {
            debug!("saved session for {}:{} has expired", host, port);
            return None;
        }
        trace!("offering saved session for {}:{}", host, port);
        Some(record.params)
    }

    /// Saves the engine's current parameters after a completed handshake.
    pub(crate) fn store(
        &self,
        host: &Host,
        port: u16,
        params: SessionParameters,
        now: UnixTime,
    ) -> Result<(), Error> {
        let Some(slot) = &self.slot else {
            return Ok(());
        };
        slot.set(SessionRecord {
            host: host.clone(),
            port,
            params,
            saved_at: now,
        })
    }
}
