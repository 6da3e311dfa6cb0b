//! Engine state machine types.

use serde::{Deserialize, Serialize};

use crate::types::DeliveryMode;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// Constructed, no adapter yet.
    #[default]
    Uninitialized,

    /// An adapter for `mode` is being brought up.
    Initializing { mode: DeliveryMode },

    /// Playback is aligned with the wall clock.
    Ready { mode: DeliveryMode },

    /// A corrective load or seek is in flight.
    Resyncing { mode: DeliveryMode },

    /// The continuous adapter failed; the next mode is being chosen.
    FallbackPending,

    /// No playable source is left. Terminal.
    Degraded,
}

impl EngineState {
    /// Returns true if the engine has not started.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    /// Returns true while an adapter is initializing.
    pub fn is_initializing(&self) -> bool {
        matches!(self, Self::Initializing { .. })
    }

    /// Returns true if playback is aligned and idle.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Returns true while a corrective load or seek is in flight.
    pub fn is_resyncing(&self) -> bool {
        matches!(self, Self::Resyncing { .. })
    }

    /// Returns true in the terminal state.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// The delivery mode this state refers to, if any.
    pub fn mode(&self) -> Option<DeliveryMode> {
        match self {
            Self::Initializing { mode } | Self::Ready { mode } | Self::Resyncing { mode } => {
                Some(*mode)
            }
            Self::Uninitialized | Self::FallbackPending | Self::Degraded => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing { .. } => "Initializing",
            Self::Ready { .. } => "Ready",
            Self::Resyncing { .. } => "Resyncing",
            Self::FallbackPending => "FallbackPending",
            Self::Degraded => "Degraded",
        }
    }
}
