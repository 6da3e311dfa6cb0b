//! Multi-file delivery.

use std::time::Instant;

use tracing::{debug, info, warn};

use daycycle_clock::{part_plan, DayOffset, PartLength, PartPlan};
use daycycle_ipc::{DeliveryMode, ListenerId, SourceDescriptors, SurfaceEvent};

use crate::error::ConfigurationError;
use crate::policy::SeekRetryPolicy;
use crate::selector::part_key;
use crate::surface::{
    truncated_drift, wrap_to_duration, AdapterSignal, DeliveryAdapter, PlaybackSurface,
    SeekOutcome,
};
use crate::SEEK_TOLERANCE_SECS;

#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingSeek {
    /// A fresh load; the seek is applied once metadata arrives, or at
    /// `due` if the surface is seekable by then.
    AwaitingMetadata { target: f64, attempt: u32, due: Instant },

    /// The last seek did not take; re-apply at `due`.
    Retry { target: f64, attempt: u32, due: Instant },
}

/// Plays the cycle as fixed-length parts, one file per part.
#[derive(Debug)]
pub struct SegmentedAdapter {
    mode: DeliveryMode,
    parts: Vec<String>,
    part_length: PartLength,
    listener: ListenerId,
    retry: SeekRetryPolicy,
    loaded_part: Option<usize>,
    stale: bool,
    pending: Option<PendingSeek>,
}

impl SegmentedAdapter {
    /// Build an adapter for a segmented `mode` from the declared sources.
    pub fn new(
        mode: DeliveryMode,
        sources: &SourceDescriptors,
        listener: ListenerId,
        retry: SeekRetryPolicy,
    ) -> Result<Self, ConfigurationError> {
        let part_length =
            PartLength::for_mode(mode).map_err(|_| ConfigurationError::NotSegmented(mode))?;
        let count = mode
            .part_count()
            .ok_or(ConfigurationError::NotSegmented(mode))?;
        let set = sources
            .segments_for(mode)
            .ok_or(ConfigurationError::MissingSegments(mode))?;

        let parts = (0..count)
            .map(|i| {
                let key = part_key(i, count);
                set.get(&key)
                    .cloned()
                    .ok_or(ConfigurationError::MissingPart { mode, key })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            mode,
            parts,
            part_length,
            listener,
            retry,
            loaded_part: None,
            stale: false,
            pending: None,
        })
    }

    /// Descriptor key for a part index, wrapping past the last part.
    pub fn part_index_to_key(&self, index: usize) -> String {
        part_key(index, self.parts.len())
    }

    pub fn loaded_part(&self) -> Option<usize> {
        self.loaded_part
    }

    pub fn part_length(&self) -> PartLength {
        self.part_length
    }

    /// Load the file for `part_index` unless the surface already has it.
    ///
    /// Returns true if a load was issued.
    pub fn ensure_loaded(&mut self, surface: &mut dyn PlaybackSurface, part_index: usize) -> bool {
        let index = part_index % self.parts.len();
        let resource = &self.parts[index];
        let already = surface.current_resource().as_deref() == Some(resource.as_str());

        self.loaded_part = Some(index);
        if already && !self.stale {
            return false;
        }

        info!(
            key = %self.part_index_to_key(index),
            resource = %resource,
            "Loading part"
        );
        surface.load(resource);
        self.stale = false;
        self.pending = None;
        true
    }

    /// Move the surface to `offset_in_part` within the loaded part.
    ///
    /// If the surface cannot take a seek yet the seek is kept until metadata
    /// arrives or the retry delay runs out.
    pub fn seek_to(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        offset_in_part: u32,
        now: Instant,
    ) -> SeekOutcome {
        let target = f64::from(offset_in_part);
        if !surface.can_accept_seek() {
            debug!(target, "Seek deferred until metadata");
            self.pending = Some(PendingSeek::AwaitingMetadata {
                target,
                attempt: 0,
                due: self.retry.retry_at(now),
            });
            return SeekOutcome::Pending;
        }
        self.apply_seek(surface, target, 0, now)
    }

    fn apply_seek(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        target: f64,
        attempt: u32,
        now: Instant,
    ) -> SeekOutcome {
        let expected = f64::from(self.part_length.as_secs());
        let position = wrap_to_duration(target, surface.duration(), expected);
        if position != target {
            warn!(
                target,
                position,
                duration = ?surface.duration(),
                "Part shorter than expected, wrapping seek"
            );
        }

        if let Err(e) = surface.seek(position) {
            warn!("Seek failed: {}", e);
        }

        if (surface.position() - position).abs() <= SEEK_TOLERANCE_SECS {
            self.pending = None;
            return SeekOutcome::Applied;
        }

        if self.retry.should_retry(attempt) {
            debug!(position, attempt, "Seek did not take, retrying later");
            self.pending = Some(PendingSeek::Retry {
                target,
                attempt: attempt + 1,
                due: self.retry.retry_at(now),
            });
            SeekOutcome::Pending
        } else {
            warn!(position, attempts = attempt, "Seek did not take, giving up");
            self.pending = None;
            SeekOutcome::Applied
        }
    }

    /// The day offset implied by the loaded part and the surface position.
    pub fn current_offset(&self, surface: &dyn PlaybackSurface) -> Option<DayOffset> {
        let index = self.loaded_part?;
        if self.stale || surface.current_resource().as_deref() != Some(self.parts[index].as_str())
        {
            return None;
        }

        let plan = PartPlan {
            part_index: index,
            offset_in_part: surface.position().max(0.0).floor() as u32,
        };
        Some(plan.day_offset(self.part_length))
    }

    /// Drift against `target`, folded onto a truncated part the same way
    /// seeks are.
    pub fn drift(&self, surface: &dyn PlaybackSurface, target: DayOffset) -> Option<u32> {
        let current = self.current_offset(surface)?;
        let plan = part_plan(target, self.part_length);
        if self.loaded_part == Some(plan.part_index % self.parts.len()) {
            if let Some(drift) = truncated_drift(
                surface.position(),
                f64::from(plan.offset_in_part),
                surface.duration(),
                f64::from(self.part_length.as_secs()),
            ) {
                return Some(drift);
            }
        }
        Some(current.distance(target))
    }

    /// The metadata signal never came. Seek if the surface allows it,
    /// otherwise wait once more or leave it to the next tick.
    fn metadata_overdue(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        target: f64,
        attempt: u32,
        now: Instant,
    ) {
        if surface.can_accept_seek() {
            debug!(target, "No metadata signal, surface is seekable");
            self.apply_seek(surface, target, 0, now);
        } else if self.retry.should_retry(attempt) {
            self.pending = Some(PendingSeek::AwaitingMetadata {
                target,
                attempt: attempt + 1,
                due: self.retry.retry_at(now),
            });
        } else {
            warn!(target, attempts = attempt, "Metadata still missing, seek dropped");
            self.pending = None;
        }
    }
}

impl DeliveryAdapter for SegmentedAdapter {
    fn mode(&self) -> DeliveryMode {
        self.mode
    }

    fn listener(&self) -> ListenerId {
        self.listener
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn open(&mut self, _surface: &mut dyn PlaybackSurface, _now: Instant) -> AdapterSignal {
        debug!(mode = %self.mode, parts = self.parts.len(), "Segmented adapter opened");
        AdapterSignal::Ready
    }

    fn needs_switch(&self, target: DayOffset) -> bool {
        let plan = part_plan(target, self.part_length);
        self.stale || self.loaded_part != Some(plan.part_index % self.parts.len())
    }

    fn sync_to(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        target: DayOffset,
        now: Instant,
    ) -> SeekOutcome {
        let plan = part_plan(target, self.part_length);
        self.ensure_loaded(surface, plan.part_index);
        self.seek_to(surface, plan.offset_in_part, now)
    }

    fn current_offset(&self, surface: &dyn PlaybackSurface) -> Option<DayOffset> {
        SegmentedAdapter::current_offset(self, surface)
    }

    fn drift(&self, surface: &dyn PlaybackSurface, target: DayOffset) -> Option<u32> {
        SegmentedAdapter::drift(self, surface, target)
    }

    fn handle_event(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        event: &SurfaceEvent,
        now: Instant,
    ) -> AdapterSignal {
        match event {
            SurfaceEvent::MetadataReady | SurfaceEvent::CanAcceptSeek => {
                if let Some(PendingSeek::AwaitingMetadata { target, .. }) = self.pending {
                    self.apply_seek(surface, target, 0, now);
                }
            }
            SurfaceEvent::ManifestParsed => {}
            SurfaceEvent::FatalError { kind, detail }
            | SurfaceEvent::TransientError { kind, detail } => {
                // No further fallback exists; reload the part on the next tick.
                warn!(?kind, detail = %detail, "Segment playback error");
                self.stale = true;
                self.pending = None;
            }
        }
        AdapterSignal::Idle
    }

    fn poll(&mut self, surface: &mut dyn PlaybackSurface, now: Instant) -> AdapterSignal {
        match self.pending {
            Some(PendingSeek::Retry {
                target,
                attempt,
                due,
            }) if now >= due => {
                self.apply_seek(surface, target, attempt, now);
            }
            Some(PendingSeek::AwaitingMetadata {
                target,
                attempt,
                due,
            }) if now >= due => {
                self.metadata_overdue(surface, target, attempt, now);
            }
            _ => {}
        }
        AdapterSignal::Idle
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.pending {
            Some(PendingSeek::Retry { due, .. } | PendingSeek::AwaitingMetadata { due, .. }) => {
                Some(due)
            }
            None => None,
        }
    }

    fn teardown(&mut self, surface: &mut dyn PlaybackSurface) {
        surface.unsubscribe(self.listener);
        self.pending = None;
        self.loaded_part = None;
    }
}
