//! The broadcast clock.

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};

use daycycle_ipc::TimezoneMode;

use crate::offset::{day_offset, DayOffset};
use crate::source::{SystemTimeSource, TimeSource};

/// Maps the wall clock onto the broadcast cycle.
#[derive(Clone)]
pub struct BroadcastClock {
    source: Arc<dyn TimeSource>,
}

impl BroadcastClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self { source }
    }

    /// A clock reading the host's real time.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemTimeSource))
    }

    /// Current wall-clock time in the zone selected by `mode`.
    pub fn now(&self, mode: TimezoneMode) -> NaiveDateTime {
        let utc = self.source.now_utc();
        match mode {
            TimezoneMode::Local => utc.with_timezone(&self.source.local_offset()).naive_local(),
            TimezoneMode::FixedReference { offset_seconds } => {
                utc.naive_utc() + TimeDelta::seconds(i64::from(offset_seconds))
            }
        }
    }

    /// Where the cycle should be right now.
    pub fn day_offset_now(&self, mode: TimezoneMode) -> DayOffset {
        day_offset(self.now(mode))
    }
}

impl std::fmt::Debug for BroadcastClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastClock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone, Utc};

    use super::*;
    use crate::source::ManualTimeSource;

    #[test]
    fn test_fixed_reference_shifts_utc() {
        // 16:00 UTC is 01:00 the next day at UTC+9.
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 16, 0, 0).unwrap();
        let clock = BroadcastClock::new(Arc::new(ManualTimeSource::utc(now)));

        assert_eq!(clock.day_offset_now(TimezoneMode::reference()).as_secs(), 0);
        assert_eq!(clock.day_offset_now(TimezoneMode::Local).as_secs(), 15 * 3600);
    }

    #[test]
    fn test_local_mode_uses_source_offset() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 23, 30, 0).unwrap();
        let paris = FixedOffset::east_opt(2 * 3600).unwrap();
        let clock = BroadcastClock::new(Arc::new(ManualTimeSource::new(now, paris)));

        // 01:30 local, half an hour into the cycle.
        assert_eq!(clock.day_offset_now(TimezoneMode::Local).as_secs(), 1800);
    }

    #[test]
    fn test_manual_source_advances() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 1, 0, 0).unwrap();
        let source = Arc::new(ManualTimeSource::utc(now));
        let clock = BroadcastClock::new(source.clone());

        source.advance(TimeDelta::seconds(90));
        assert_eq!(clock.day_offset_now(TimezoneMode::Local).as_secs(), 90);
    }
}
