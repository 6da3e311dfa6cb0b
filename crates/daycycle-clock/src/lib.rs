//! Wall-clock to broadcast day-offset arithmetic.
//!
//! The broadcast cycle is 24 hours long and starts at 01:00 of the
//! reference day. Everything here is pure except the `TimeSource`
//! implementations, which read (or fake) the wall clock.

mod clock;
mod error;
mod offset;
mod source;

pub use clock::BroadcastClock;
pub use error::ClockError;
pub use offset::{cycle_time, day_offset, part_plan, DayOffset, PartLength, PartPlan};
pub use source::{ManualTimeSource, SystemTimeSource, TimeSource};

/// Result type for clock operations.
pub type ClockResult<T> = Result<T, ClockError>;

/// Seconds after midnight at which the cycle starts (01:00).
pub const ANCHOR_SECS: u32 = 3600;
