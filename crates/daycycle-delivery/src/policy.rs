//! Retry and recovery timing.

use std::time::{Duration, Instant};

use daycycle_ipc::EngineConfig;

use crate::{MAX_SEEK_RETRIES, RECOVERY_WINDOW, SEEK_RETRY_DELAY};

/// How a seek that silently did not take is re-applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRetryPolicy {
    /// Maximum number of re-applications.
    pub max_attempts: u32,

    /// Delay before each re-application.
    pub delay: Duration,
}

impl Default for SeekRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SEEK_RETRIES,
            delay: SEEK_RETRY_DELAY,
        }
    }
}

impl SeekRetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.seek_retry_attempts,
            delay: Duration::from_millis(config.seek_retry_delay_ms),
        }
    }

    /// Check if another attempt is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// When the next attempt is due.
    pub fn retry_at(&self, now: Instant) -> Instant {
        now + self.delay
    }
}

/// How long a transient continuous-stream error may take to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub window: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            window: RECOVERY_WINDOW,
        }
    }
}

impl RecoveryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            window: Duration::from_secs(config.recovery_window_secs),
        }
    }

    /// Deadline for a recovery started at `now`.
    pub fn deadline(&self, now: Instant) -> Instant {
        now + self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_retry_is_bounded() {
        let policy = SeekRetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(!policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_policies_from_config() {
        let config = EngineConfig {
            seek_retry_attempts: 3,
            seek_retry_delay_ms: 250,
            recovery_window_secs: 8,
            ..Default::default()
        };
        let now = Instant::now();

        let retry = SeekRetryPolicy::from_config(&config);
        assert!(retry.should_retry(2));
        assert_eq!(retry.retry_at(now), now + Duration::from_millis(250));

        let recovery = RecoveryPolicy::from_config(&config);
        assert_eq!(recovery.deadline(now), now + Duration::from_secs(8));
        assert_eq!(RecoveryPolicy::default().window, Duration::from_secs(5));
    }
}
