//! Contracts for the external playback surface and adaptive-stream backend,
//! and the narrow contract every delivery adapter exposes to the engine.

use std::time::Instant;

use daycycle_clock::DayOffset;
use daycycle_ipc::{DeliveryMode, ListenerId, SurfaceEvent};

use crate::error::DeliveryError;
use crate::SurfaceResult;

/// The audio/video sink the engine drives.
///
/// Signals (`SurfaceEvent`) are not returned from these calls. The host
/// forwards them to the engine tagged with the `ListenerId` they were
/// delivered to.
pub trait PlaybackSurface: Send {
    /// Start loading a resource. Position resets to zero.
    fn load(&mut self, resource: &str);

    /// Set the playback position in seconds.
    fn seek(&mut self, seconds: f64) -> SurfaceResult<()>;

    /// Start or resume playback.
    fn play(&mut self) -> SurfaceResult<()>;

    /// Duration of the loaded resource, once metadata is known.
    fn duration(&self) -> Option<f64>;

    /// Current position in seconds.
    fn position(&self) -> f64;

    fn is_paused(&self) -> bool;

    /// Whether a seek would take effect right now.
    fn can_accept_seek(&self) -> bool;

    /// The resource currently loaded, if any.
    fn current_resource(&self) -> Option<String>;

    /// Whether the surface plays adaptive manifests without a backend.
    fn supports_native_manifest(&self) -> bool;

    /// Register a new listener for surface signals.
    fn subscribe(&mut self) -> ListenerId;

    /// Stop delivering signals to `listener`.
    fn unsubscribe(&mut self, listener: ListenerId);
}

/// An adaptive-stream backend (e.g. an HLS player library).
pub trait StreamBackend: Send {
    /// Attach the manifest. The backend reports `ManifestParsed` and
    /// errors to `listener`.
    fn attach(&mut self, manifest: &str, listener: ListenerId);

    /// Reload the stream in place after a network failure.
    fn start_load(&mut self);

    /// Attempt in-place recovery after a media failure.
    fn recover_media_error(&mut self);

    /// Release the manifest and stop reporting.
    fn detach(&mut self);
}

/// What an adapter needs from the engine after an event or a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterSignal {
    /// Nothing to do.
    Idle,

    /// The adapter became able to accept seeks.
    Ready,

    /// The adapter cannot continue. The engine must fall back.
    Fatal(DeliveryError),
}

/// Result of asking an adapter to move playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The surface is at the requested position.
    Applied,

    /// The seek waits on metadata or a retry timer.
    Pending,
}

/// The contract shared by the segmented and continuous adapters.
pub trait DeliveryAdapter: Send {
    fn mode(&self) -> DeliveryMode;

    /// The surface subscription this adapter owns.
    fn listener(&self) -> ListenerId;

    /// Whether seeks can be issued.
    fn is_ready(&self) -> bool;

    /// Whether a load or seek is still in flight.
    fn has_pending(&self) -> bool;

    /// Begin initialization against the surface.
    fn open(&mut self, surface: &mut dyn PlaybackSurface, now: Instant) -> AdapterSignal;

    /// Whether reaching `target` needs a resource switch, regardless of drift.
    fn needs_switch(&self, target: DayOffset) -> bool;

    /// Load whatever `target` requires and seek to it.
    fn sync_to(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        target: DayOffset,
        now: Instant,
    ) -> SeekOutcome;

    /// The day offset the surface is currently playing.
    fn current_offset(&self, surface: &dyn PlaybackSurface) -> Option<DayOffset>;

    /// Seconds between what the surface plays and where `sync_to(target)`
    /// would put it. `None` when nothing measurable is loaded.
    fn drift(&self, surface: &dyn PlaybackSurface, target: DayOffset) -> Option<u32>;

    /// React to a signal delivered to this adapter's listener.
    fn handle_event(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        event: &SurfaceEvent,
        now: Instant,
    ) -> AdapterSignal;

    /// Fire any timer that is due.
    fn poll(&mut self, surface: &mut dyn PlaybackSurface, now: Instant) -> AdapterSignal;

    /// Earliest instant `poll` has work to do.
    fn next_deadline(&self) -> Option<Instant>;

    /// Unsubscribe from the surface and release the backend.
    fn teardown(&mut self, surface: &mut dyn PlaybackSurface);
}

/// Fold a seek target onto the reported duration when the media is shorter
/// than expected, so the surface is never asked to seek past its end.
pub(crate) fn wrap_to_duration(target: f64, duration: Option<f64>, expected: f64) -> f64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 && d < expected => target % d,
        _ => target,
    }
}

/// Distance between `position` and `target` on media shorter than
/// `expected`, measured on the folded timeline that seeks land on.
///
/// Returns `None` when the media is not truncated.
pub(crate) fn truncated_drift(
    position: f64,
    target: f64,
    duration: Option<f64>,
    expected: f64,
) -> Option<u32> {
    let d = duration.filter(|d| d.is_finite() && *d > 0.0 && *d < expected)?;
    let played = position.max(0.0).floor() % d;
    let diff = (played - target % d).abs();
    Some(diff.min(d - diff).floor() as u32)
}
