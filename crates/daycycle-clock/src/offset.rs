//! Day offsets and part plans.

use std::fmt;
use std::num::NonZeroU32;

use chrono::{NaiveDateTime, NaiveTime, Timelike};

use daycycle_ipc::{DeliveryMode, DAY_SECONDS};

use crate::error::ClockError;
use crate::{ClockResult, ANCHOR_SECS};

/// Position within the 24-hour cycle, in whole seconds, always in
/// `[0, 86400)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayOffset(u32);

impl DayOffset {
    /// Start of the cycle (01:00).
    pub const ZERO: Self = Self(0);

    /// Wrap any number of seconds onto the cycle.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.rem_euclid(i64::from(DAY_SECONDS)) as u32)
    }

    /// Offset for a fractional playback position, truncated to whole seconds.
    pub fn from_position(position: f64) -> Self {
        if position.is_finite() {
            Self::from_secs(position.floor() as i64)
        } else {
            Self::ZERO
        }
    }

    pub fn as_secs(self) -> u32 {
        self.0
    }

    /// Shortest distance between two offsets on the cycle.
    ///
    /// 23:59:50 and 00:00:10 past the anchor are 20 seconds apart, not
    /// 86380.
    pub fn distance(self, other: Self) -> u32 {
        let d = self.0.abs_diff(other.0);
        d.min(DAY_SECONDS - d)
    }
}

impl fmt::Display for DayOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.0 / 3600;
        let m = (self.0 % 3600) / 60;
        let s = self.0 % 60;
        write!(f, "+{h:02}:{m:02}:{s:02}")
    }
}

/// Seconds since the most recent 01:00 at or before `timestamp`.
///
/// Before 01:00 the previous day's anchor applies, so the offset keeps
/// advancing across midnight.
pub fn day_offset(timestamp: NaiveDateTime) -> DayOffset {
    let since_midnight = i64::from(timestamp.num_seconds_from_midnight());
    DayOffset::from_secs(since_midnight - i64::from(ANCHOR_SECS))
}

/// Wall time of day that an offset corresponds to.
pub fn cycle_time(offset: DayOffset) -> NaiveTime {
    let secs = (offset.as_secs() + ANCHOR_SECS) % DAY_SECONDS;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).unwrap_or_default()
}

const fn nonzero(secs: u32) -> NonZeroU32 {
    match NonZeroU32::new(secs) {
        Some(n) => n,
        None => panic!("part length must be positive"),
    }
}

/// Length of one segmented part, strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartLength(NonZeroU32);

impl PartLength {
    pub const FOUR_HOURS: Self = Self(nonzero(4 * 3600));
    pub const EIGHT_HOURS: Self = Self(nonzero(8 * 3600));

    pub fn new(secs: u32) -> ClockResult<Self> {
        NonZeroU32::new(secs)
            .map(Self)
            .ok_or(ClockError::InvalidPartLength(secs))
    }

    /// Part length of a segmented delivery mode.
    pub fn for_mode(mode: DeliveryMode) -> ClockResult<Self> {
        match mode.part_length_secs() {
            Some(secs) => Self::new(secs),
            None => Err(ClockError::NotSegmented(mode)),
        }
    }

    pub fn as_secs(self) -> u32 {
        self.0.get()
    }
}

/// Which part to play and where inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartPlan {
    pub part_index: usize,
    pub offset_in_part: u32,
}

impl PartPlan {
    /// The day offset this plan points at.
    pub fn day_offset(&self, part_length: PartLength) -> DayOffset {
        let start = self.part_index as i64 * i64::from(part_length.as_secs());
        DayOffset::from_secs(start + i64::from(self.offset_in_part))
    }
}

/// Split a day offset into part index and offset within the part.
pub fn part_plan(offset: DayOffset, part_length: PartLength) -> PartPlan {
    let len = part_length.as_secs();
    PartPlan {
        part_index: (offset.as_secs() / len) as usize,
        offset_in_part: offset.as_secs() % len,
    }
}
