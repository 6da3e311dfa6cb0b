//! Error types for the clock module.

use thiserror::Error;

/// Errors that can occur when building clock values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// Part lengths must be strictly positive.
    #[error("Invalid part length: {0}s")]
    InvalidPartLength(u32),

    /// A continuous mode has no parts.
    #[error("Mode {0} is not segmented")]
    NotSegmented(daycycle_ipc::DeliveryMode),
}
