//! Commands and surface signals sent to the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TimezoneMode;

/// Identifies one subscription to the playback surface's events.
///
/// Every adapter subscribes under a fresh id. Events tagged with an id that
/// is no longer live are dropped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Coarse kind of a playback failure as reported by the surface or the
/// adaptive-stream backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Manifest or segment fetch failed.
    Network,

    /// Media could not be decoded but the pipeline may recover.
    Media,

    /// The runtime cannot decode the codec at all.
    UnsupportedCodec,

    /// Anything else.
    Other,
}

/// Signals raised by the playback surface or the stream backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceEvent {
    /// The loaded resource's metadata (duration) is available.
    MetadataReady,

    /// The surface has enough data to accept a seek.
    CanAcceptSeek,

    /// The adaptive backend parsed the manifest.
    ManifestParsed,

    /// Unrecoverable failure reported by the backend.
    FatalError { kind: FaultKind, detail: String },

    /// Failure the backend considers transient.
    TransientError { kind: FaultKind, detail: String },
}

/// Commands that the caller (or the surface's event pump) sends to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Forward a surface signal delivered to `listener`.
    Surface {
        listener: ListenerId,
        event: SurfaceEvent,
    },

    /// Switch the clock between local time and a fixed reference zone.
    SetTimezoneMode(TimezoneMode),

    /// Resynchronize now instead of waiting for the next tick.
    Resync,

    /// Request current engine state.
    GetState,

    /// Request a snapshot of sync statistics.
    GetStats,

    /// Tear the engine down.
    Shutdown,
}
