//! Continuous adaptive-stream delivery.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use daycycle_clock::DayOffset;
use daycycle_ipc::{DeliveryMode, ListenerId, SurfaceEvent, DAY_SECONDS};

use crate::error::DeliveryError;
use crate::policy::RecoveryPolicy;
use crate::surface::{
    truncated_drift, wrap_to_duration, AdapterSignal, DeliveryAdapter, PlaybackSurface,
    SeekOutcome, StreamBackend,
};

/// Lifecycle of the continuous stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Nothing attached.
    Detached,

    /// Manifest attached, waiting for the ready signal.
    Attaching,

    /// Seeks are accepted.
    Ready,

    /// Reloading in place after a transient error.
    Recovering { deadline: Instant },

    /// Given up. Only the engine's fallback follows.
    Failed,
}

impl StreamStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if waiting on the backend (attaching or recovering).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Attaching | Self::Recovering { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Get status message for logs.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Detached => "Detached",
            Self::Attaching => "Attaching manifest",
            Self::Ready => "Ready",
            Self::Recovering { .. } => "Recovering",
            Self::Failed => "Failed",
        }
    }
}

/// Plays the whole cycle from one adaptive manifest.
///
/// Uses the backend when there is one, otherwise the surface's native
/// manifest support. Both paths share the same error classification.
pub struct ContinuousAdapter {
    manifest: String,
    listener: ListenerId,
    backend: Option<Box<dyn StreamBackend>>,
    recovery: RecoveryPolicy,
    status: StreamStatus,
    pending: Option<DayOffset>,
}

impl ContinuousAdapter {
    pub fn new(
        manifest: impl Into<String>,
        listener: ListenerId,
        backend: Option<Box<dyn StreamBackend>>,
        recovery: RecoveryPolicy,
    ) -> Self {
        Self {
            manifest: manifest.into(),
            listener,
            backend,
            recovery,
            status: StreamStatus::Detached,
            pending: None,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn uses_native_playback(&self) -> bool {
        self.backend.is_none()
    }

    /// Attach the manifest if nothing is attached yet.
    pub fn ensure_loaded(&mut self, surface: &mut dyn PlaybackSurface) -> AdapterSignal {
        if self.status != StreamStatus::Detached {
            return AdapterSignal::Idle;
        }

        if let Some(ref mut backend) = self.backend {
            info!(manifest = %self.manifest, "Attaching manifest to stream backend");
            backend.attach(&self.manifest, self.listener);
        } else if surface.supports_native_manifest() {
            info!(manifest = %self.manifest, "Loading manifest natively");
            surface.load(&self.manifest);
        } else {
            return self.fail(DeliveryError::UnsupportedFormat(
                "no stream backend and no native manifest support".into(),
            ));
        }

        self.status = StreamStatus::Attaching;
        AdapterSignal::Idle
    }

    /// Seek to a day-wide offset, or hold it until the stream is ready.
    pub fn seek_to(&mut self, surface: &mut dyn PlaybackSurface, target: DayOffset) -> SeekOutcome {
        if !self.status.is_ready() {
            self.pending = Some(target);
            return SeekOutcome::Pending;
        }

        let position = wrap_to_duration(
            f64::from(target.as_secs()),
            surface.duration(),
            f64::from(DAY_SECONDS),
        );
        if let Err(e) = surface.seek(position) {
            warn!("Stream seek failed: {}", e);
        }
        self.pending = None;
        SeekOutcome::Applied
    }

    pub fn current_offset(&self, surface: &dyn PlaybackSurface) -> Option<DayOffset> {
        self.status
            .is_ready()
            .then(|| DayOffset::from_position(surface.position()))
    }

    /// Drift against `target`. A stream shorter than the day is compared
    /// on the timeline seeks are folded onto.
    pub fn drift(&self, surface: &dyn PlaybackSurface, target: DayOffset) -> Option<u32> {
        let current = self.current_offset(surface)?;
        let folded = truncated_drift(
            surface.position(),
            f64::from(target.as_secs()),
            surface.duration(),
            f64::from(DAY_SECONDS),
        );
        Some(folded.unwrap_or_else(|| current.distance(target)))
    }

    fn reload_in_place(&mut self, surface: &mut dyn PlaybackSurface) {
        match self.backend {
            Some(ref mut backend) => backend.start_load(),
            None => surface.load(&self.manifest),
        }
    }

    fn recover_in_place(&mut self, surface: &mut dyn PlaybackSurface) {
        match self.backend {
            Some(ref mut backend) => backend.recover_media_error(),
            None => surface.load(&self.manifest),
        }
    }

    fn fail(&mut self, err: DeliveryError) -> AdapterSignal {
        error!("Continuous stream failed: {}", err);
        self.status = StreamStatus::Failed;
        self.pending = None;
        AdapterSignal::Fatal(err)
    }

    fn on_ready(&mut self, surface: &mut dyn PlaybackSurface) -> AdapterSignal {
        if self.status.is_ready() || self.status == StreamStatus::Detached {
            return AdapterSignal::Idle;
        }
        debug!(previous = self.status.message(), "Stream ready");
        self.status = StreamStatus::Ready;
        if let Some(target) = self.pending.take() {
            self.seek_to(surface, target);
        }
        AdapterSignal::Ready
    }

    fn on_error(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        err: DeliveryError,
        now: Instant,
    ) -> AdapterSignal {
        match err {
            DeliveryError::TransientDelivery(ref detail) => {
                if let StreamStatus::Recovering { deadline } = self.status {
                    // The window is not extended by repeated reports.
                    debug!(detail = %detail, ?deadline, "Transient error while recovering");
                    return AdapterSignal::Idle;
                }
                warn!(detail = %detail, "Transient stream error, reloading in place");
                self.reload_in_place(surface);
                self.status = StreamStatus::Recovering {
                    deadline: self.recovery.deadline(now),
                };
                AdapterSignal::Idle
            }
            DeliveryError::RecoverableMedia(ref detail) => {
                // Every report triggers a recovery; repeats are not deduplicated.
                warn!(detail = %detail, "Media error, attempting in-place recovery");
                self.recover_in_place(surface);
                AdapterSignal::Idle
            }
            fatal => self.fail(fatal),
        }
    }
}

impl std::fmt::Debug for ContinuousAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuousAdapter")
            .field("manifest", &self.manifest)
            .field("listener", &self.listener)
            .field("native", &self.backend.is_none())
            .field("status", &self.status)
            .finish()
    }
}

impl DeliveryAdapter for ContinuousAdapter {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Continuous
    }

    fn listener(&self) -> ListenerId {
        self.listener
    }

    fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn open(&mut self, surface: &mut dyn PlaybackSurface, _now: Instant) -> AdapterSignal {
        self.ensure_loaded(surface)
    }

    fn needs_switch(&self, _target: DayOffset) -> bool {
        false
    }

    fn sync_to(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        target: DayOffset,
        _now: Instant,
    ) -> SeekOutcome {
        self.ensure_loaded(surface);
        self.seek_to(surface, target)
    }

    fn current_offset(&self, surface: &dyn PlaybackSurface) -> Option<DayOffset> {
        ContinuousAdapter::current_offset(self, surface)
    }

    fn drift(&self, surface: &dyn PlaybackSurface, target: DayOffset) -> Option<u32> {
        ContinuousAdapter::drift(self, surface, target)
    }

    fn handle_event(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        event: &SurfaceEvent,
        now: Instant,
    ) -> AdapterSignal {
        if self.status.is_failed() {
            return AdapterSignal::Idle;
        }

        match event {
            SurfaceEvent::ManifestParsed
            | SurfaceEvent::MetadataReady
            | SurfaceEvent::CanAcceptSeek => self.on_ready(surface),
            SurfaceEvent::FatalError { kind, detail } => {
                match DeliveryError::classify(*kind, detail, true) {
                    Some(err) => self.on_error(surface, err, now),
                    None => AdapterSignal::Idle,
                }
            }
            SurfaceEvent::TransientError { kind, detail } => {
                match DeliveryError::classify(*kind, detail, false) {
                    Some(err) => self.on_error(surface, err, now),
                    None => {
                        debug!(?kind, detail = %detail, "Ignoring non-fatal stream error");
                        AdapterSignal::Idle
                    }
                }
            }
        }
    }

    fn poll(&mut self, _surface: &mut dyn PlaybackSurface, now: Instant) -> AdapterSignal {
        match self.status {
            StreamStatus::Recovering { deadline } if now >= deadline => {
                self.fail(DeliveryError::RecoveryWindowExpired(self.recovery.window))
            }
            _ => AdapterSignal::Idle,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.status {
            StreamStatus::Recovering { deadline } => Some(deadline),
            _ => None,
        }
    }

    fn teardown(&mut self, surface: &mut dyn PlaybackSurface) {
        if let Some(ref mut backend) = self.backend {
            backend.detach();
        }
        surface.unsubscribe(self.listener);
        self.pending = None;
        if !self.status.is_failed() {
            self.status = StreamStatus::Detached;
        }
    }
}
