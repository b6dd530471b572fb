//! The library's source of time.

use core::fmt::Debug;
use std::time::{Duration, Instant};

use pki_types::UnixTime;

/// An object that provides the current time and a way to wait.
///
/// Every timeout in the crate is measured against `now()`, and every
/// polling wait goes through `sleep()`, so a test clock that advances on
/// `sleep` makes timeout behaviour deterministic.
pub trait Clock: Debug + Send + Sync {
    /// Returns a monotonic instant.
    fn now(&self) -> Instant;

    /// Waits for roughly `duration`.
    fn sleep(&self, duration: Duration);

    /// Returns the current wall time, used for session ages and, absent an
    /// explicit reference time, for certificate validity.
    fn unix_time(&self) -> UnixTime;

    /// Time elapsed since `start`, never negative.
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Default `Clock` implementation that uses `std`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdClock;

impl Clock for StdClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn unix_time(&self) -> UnixTime {
        UnixTime::now()
    }
}
