//! Sync engine for the day-cycle broadcast.
//!
//! This crate owns the session state machine: it picks a delivery mode,
//! drives the active adapter on a periodic tick, corrects drift against
//! the wall clock and falls back from continuous to segmented delivery.

mod error;
mod metrics;
mod orchestrator;
mod state;

use std::time::Duration;

pub use error::EngineError;
pub use metrics::SyncStats;
pub use orchestrator::{Playback, SyncEngine};
pub use state::AdapterSlot;

use crossbeam_channel::{Receiver, Sender};
use daycycle_ipc::{EngineCommand, EngineConfig, EngineEvent};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Default period of the resync tick.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Default drift tolerated before a reseek, in seconds.
pub const DRIFT_THRESHOLD_SECS: u32 = 30;

/// How long `run` waits for a command before polling timers.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Create an engine instance with IPC channels.
pub fn create_engine(
    config: EngineConfig,
    playback: Playback,
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) -> EngineResult<SyncEngine> {
    SyncEngine::new(config, playback, command_rx, event_tx)
}
