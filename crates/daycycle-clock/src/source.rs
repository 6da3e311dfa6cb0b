//! Wall-clock sources.

use chrono::{DateTime, FixedOffset, Local, Offset, TimeDelta, Utc};
use parking_lot::RwLock;

/// Reads the current wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Offset of the host's local zone at the current instant.
    fn local_offset(&self) -> FixedOffset;
}

/// The host's real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self) -> FixedOffset {
        *Local::now().offset()
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: RwLock<DateTime<Utc>>,
    local: FixedOffset,
}

impl ManualTimeSource {
    /// Create a source frozen at `now` whose local zone is `local`.
    pub fn new(now: DateTime<Utc>, local: FixedOffset) -> Self {
        Self {
            now: RwLock::new(now),
            local,
        }
    }

    /// Create a source frozen at `now` whose local zone is UTC.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.now.write() += delta;
    }
}

impl TimeSource for ManualTimeSource {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    fn local_offset(&self) -> FixedOffset {
        self.local
    }
}
