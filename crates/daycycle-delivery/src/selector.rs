//! Delivery mode selection.

use tracing::debug;

use daycycle_ipc::{DeliveryMode, SegmentSet, SourceDescriptors};

use crate::error::ConfigurationError;

/// Picks a delivery mode from the declared sources.
///
/// Precedence is `Continuous` > `SegmentedSix` > `SegmentedThree`. Once the
/// continuous path has failed it is excluded for the rest of the session;
/// there is no way to clear the latch.
#[derive(Debug, Default)]
pub struct DeliveryPlanSelector {
    continuous_failed: bool,
}

impl DeliveryPlanSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the latch already set, e.g. restored by the caller.
    pub fn latched(continuous_failed: bool) -> Self {
        Self { continuous_failed }
    }

    pub fn select(&self, sources: &SourceDescriptors) -> Result<DeliveryMode, ConfigurationError> {
        let has_manifest = sources
            .continuous
            .as_deref()
            .is_some_and(|m| !m.trim().is_empty());

        let mode = if has_manifest && !self.continuous_failed {
            DeliveryMode::Continuous
        } else if has_parts(sources.segmented_six.as_ref(), 6) {
            DeliveryMode::SegmentedSix
        } else if has_parts(sources.segmented_three.as_ref(), 3) {
            DeliveryMode::SegmentedThree
        } else {
            return Err(ConfigurationError::NoPlayableSource);
        };

        debug!(%mode, continuous_failed = self.continuous_failed, "Selected delivery mode");
        Ok(mode)
    }

    /// Exclude the continuous path for good. Returns true the first time.
    pub fn mark_continuous_failed(&mut self) -> bool {
        let newly = !self.continuous_failed;
        self.continuous_failed = true;
        newly
    }

    pub fn continuous_failed(&self) -> bool {
        self.continuous_failed
    }
}

/// Descriptor key for a part index. Indices past the set wrap around.
pub fn part_key(index: usize, count: usize) -> String {
    format!("p{}", index % count.max(1) + 1)
}

fn has_parts(set: Option<&SegmentSet>, count: usize) -> bool {
    set.is_some_and(|set| (0..count).all(|i| set.contains_key(&part_key(i, count))))
}
