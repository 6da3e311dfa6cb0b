//! Common types used across engine messages and configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of the broadcast cycle in seconds.
pub const DAY_SECONDS: u32 = 86_400;

/// Offset used by `TimezoneMode::reference()` (UTC+9).
pub const DEFAULT_REFERENCE_OFFSET_SECS: i32 = 9 * 3600;

/// A segmented file set keyed `p1..pN`, values are resource references.
pub type SegmentSet = BTreeMap<String, String>;

/// Which delivery options exist for the broadcast.
///
/// Supplied once at startup and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptors {
    /// Manifest reference for the continuous adaptive stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous: Option<String>,

    /// Six 4-hour parts, `p1..p6`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmented_six: Option<SegmentSet>,

    /// Three 8-hour parts, `p1..p3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmented_three: Option<SegmentSet>,
}

impl SourceDescriptors {
    /// The file set backing a segmented mode.
    pub fn segments_for(&self, mode: DeliveryMode) -> Option<&SegmentSet> {
        match mode {
            DeliveryMode::Continuous => None,
            DeliveryMode::SegmentedSix => self.segmented_six.as_ref(),
            DeliveryMode::SegmentedThree => self.segmented_three.as_ref(),
        }
    }
}

/// How the broadcast is delivered to the playback surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// One adaptive stream covering the whole cycle.
    Continuous,

    /// Six files of four hours each.
    SegmentedSix,

    /// Three files of eight hours each.
    SegmentedThree,
}

impl DeliveryMode {
    /// Part length in seconds for segmented modes.
    pub fn part_length_secs(self) -> Option<u32> {
        match self {
            Self::Continuous => None,
            Self::SegmentedSix => Some(4 * 3600),
            Self::SegmentedThree => Some(8 * 3600),
        }
    }

    /// Number of parts for segmented modes.
    pub fn part_count(self) -> Option<usize> {
        match self {
            Self::Continuous => None,
            Self::SegmentedSix => Some(6),
            Self::SegmentedThree => Some(3),
        }
    }

    pub fn is_segmented(self) -> bool {
        !matches!(self, Self::Continuous)
    }

    /// Returns the display name for this mode.
    pub fn name(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::SegmentedSix => "segmented-six",
            Self::SegmentedThree => "segmented-three",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which wall clock the broadcast follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimezoneMode {
    /// The host's local time.
    #[default]
    Local,

    /// UTC shifted by a fixed offset. No daylight-saving rules apply.
    FixedReference { offset_seconds: i32 },
}

impl TimezoneMode {
    /// The fixed reference zone used by default (UTC+9).
    pub fn reference() -> Self {
        Self::FixedReference {
            offset_seconds: DEFAULT_REFERENCE_OFFSET_SECS,
        }
    }
}

/// Runtime configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Available delivery options.
    pub sources: SourceDescriptors,

    /// Initial clock mode.
    pub timezone: TimezoneMode,

    /// Period of the resync tick (default: 5).
    pub resync_interval_secs: u64,

    /// Drift tolerated before a reseek (default: 30).
    pub drift_threshold_secs: u32,

    /// Time a transient continuous error has to recover (default: 5).
    pub recovery_window_secs: u64,

    /// Delay before re-applying a seek that did not take (default: 1000).
    pub seek_retry_delay_ms: u64,

    /// How many times a silently failed seek is re-applied (default: 1).
    pub seek_retry_attempts: u32,

    /// Start with the continuous path already excluded, for callers that
    /// persisted an earlier `ContinuousLatched` event.
    pub continuous_failed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: SourceDescriptors::default(),
            timezone: TimezoneMode::Local,
            resync_interval_secs: 5,
            drift_threshold_secs: 30,
            recovery_window_secs: 5,
            seek_retry_delay_ms: 1000,
            seek_retry_attempts: 1,
            continuous_failed: false,
        }
    }
}

/// Sync statistics since engine start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Resync evaluations performed.
    pub ticks: u64,

    /// Ticks skipped because a load or seek was in flight.
    pub skipped_ticks: u64,

    /// Seeks issued because drift exceeded the threshold.
    pub drift_corrections: u64,

    /// Loads issued because the desired part changed.
    pub part_switches: u64,

    /// Play requests issued for a paused surface.
    pub play_requests: u64,

    /// Play requests the surface rejected.
    pub play_rejections: u64,

    /// Ready signals received after a stall or in-place recovery.
    pub recoveries: u64,

    /// Fallbacks executed.
    pub fallbacks: u64,

    /// Drift measured on the last evaluation, in seconds.
    pub last_drift_secs: Option<u32>,

    /// Engine uptime in seconds.
    pub uptime_seconds: u64,
}
