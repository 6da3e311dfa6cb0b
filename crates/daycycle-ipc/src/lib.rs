//! Typed caller<->engine messages for the day-cycle sync engine.
//!
//! This crate defines the message, state and configuration types shared by
//! the engine, the delivery adapters and whatever hosts the engine.

mod commands;
mod events;
mod state;
mod types;

pub use commands::{EngineCommand, FaultKind, ListenerId, SurfaceEvent};
pub use events::EngineEvent;
pub use state::EngineState;
pub use types::{
    DeliveryMode, EngineConfig, SegmentSet, SourceDescriptors, SyncMetrics, TimezoneMode,
    DAY_SECONDS, DEFAULT_REFERENCE_OFFSET_SECS,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (caller and surface → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → caller).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
