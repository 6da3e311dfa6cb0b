//! Events sent from the engine to the caller.

use serde::{Deserialize, Serialize};

use crate::state::EngineState;
use crate::types::{DeliveryMode, SyncMetrics};

/// Events that the engine can send to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Engine state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<EngineState>,

        /// Current state.
        current: Box<EngineState>,
    },

    /// A delivery mode became active.
    ModeChanged(DeliveryMode),

    /// A resync evaluation finished.
    Resync {
        /// Day offset the wall clock asked for, in seconds.
        desired_offset: u32,

        /// Whether a load or seek was issued.
        applied_correction: bool,
    },

    /// The continuous stream failed and will not be tried again this
    /// session. Callers that persist the decision should store it now.
    ContinuousLatched,

    /// No playable source remains. Terminal.
    Degraded,

    /// Sync statistics snapshot.
    Stats(SyncMetrics),

    /// Engine is ready to receive commands.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
