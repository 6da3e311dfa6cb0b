//! Main sync engine orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use daycycle_clock::{BroadcastClock, TimeSource};
use daycycle_delivery::{
    AdapterSignal, ConfigurationError, ContinuousAdapter, DeliveryAdapter, DeliveryError,
    DeliveryPlanSelector, PlaybackSurface, RecoveryPolicy, SeekRetryPolicy, SegmentedAdapter,
    StreamBackend,
};
use daycycle_ipc::{
    DeliveryMode, EngineCommand, EngineConfig, EngineEvent, EngineState, ListenerId, SurfaceEvent,
    SyncMetrics, TimezoneMode,
};

use crate::metrics::SyncStats;
use crate::state::AdapterSlot;
use crate::{EngineError, EngineResult, POLL_INTERVAL};

/// The external collaborators the engine drives.
pub struct Playback {
    /// The audio/video sink.
    pub surface: Box<dyn PlaybackSurface>,

    /// Adaptive-stream backend for the continuous path. Without one the
    /// surface's native manifest support is used, if it has any.
    pub backend: Option<Box<dyn StreamBackend>>,

    /// Wall clock.
    pub time_source: Arc<dyn TimeSource>,
}

/// Keeps the playback surface aligned with the broadcast day.
///
/// All operations take the current `Instant` so timers can be driven
/// deterministically; `run` supplies the real one.
pub struct SyncEngine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    config: EngineConfig,
    timezone: TimezoneMode,
    clock: BroadcastClock,
    selector: DeliveryPlanSelector,
    surface: Box<dyn PlaybackSurface>,
    backend: Option<Box<dyn StreamBackend>>,
    slot: AdapterSlot,
    state: Arc<RwLock<EngineState>>,
    stats: SyncStats,
    resync_interval: Duration,
    next_tick: Option<Instant>,
    disposed: bool,
}

impl SyncEngine {
    /// Create a new engine.
    ///
    /// Fails when the declared sources offer nothing playable.
    pub fn new(
        config: EngineConfig,
        playback: Playback,
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
    ) -> EngineResult<Self> {
        if config.resync_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "resync_interval_secs must be positive".into(),
            ));
        }

        let selector = DeliveryPlanSelector::latched(config.continuous_failed);
        let mode = selector.select(&config.sources)?;
        debug!(%mode, "Source descriptors accepted");

        Ok(Self {
            command_rx,
            event_tx,
            timezone: config.timezone,
            resync_interval: Duration::from_secs(config.resync_interval_secs),
            config,
            clock: BroadcastClock::new(playback.time_source),
            selector,
            surface: playback.surface,
            backend: playback.backend,
            slot: AdapterSlot::new(),
            state: Arc::new(RwLock::new(EngineState::Uninitialized)),
            stats: SyncStats::new(),
            next_tick: None,
            disposed: false,
        })
    }

    /// Run the engine (blocking) until shutdown or until every command
    /// sender is gone.
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);
        self.start(Instant::now());

        loop {
            match self.command_rx.recv_timeout(POLL_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command, Instant::now()) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    break;
                }
            }
            self.poll(Instant::now());
        }

        self.dispose();
        info!("Engine stopped");
    }

    /// Handle every command already queued. Returns false if the engine
    /// was shut down.
    pub fn process_pending(&mut self, now: Instant) -> bool {
        while let Ok(command) = self.command_rx.try_recv() {
            if !self.handle_command(command, now) {
                return false;
            }
        }
        true
    }

    /// Select the delivery mode and bring up its adapter.
    #[instrument(name = "engine_start", skip(self, now))]
    pub fn start(&mut self, now: Instant) {
        if !self.state().is_uninitialized() {
            debug!("Already started, ignoring start");
            return;
        }

        self.stats.start(now);
        self.next_tick = Some(now + self.resync_interval);

        match self.selector.select(&self.config.sources) {
            Ok(mode) => {
                info!(%mode, timezone = ?self.timezone, "Starting sync");
                self.activate(mode, now);
            }
            Err(e) => {
                error!("Source selection failed: {}", e);
                self.degrade();
            }
        }
    }

    /// Handle a command. Returns false if the engine should stop.
    pub fn handle_command(&mut self, command: EngineCommand, now: Instant) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Surface { listener, event } => {
                self.handle_surface_event(listener, event, now)
            }
            EngineCommand::SetTimezoneMode(mode) => self.set_timezone_mode(mode, now),
            EngineCommand::Resync => self.resync(now),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::GetStats => self.send_event(EngineEvent::Stats(self.metrics(now))),
            EngineCommand::Shutdown => {
                self.dispose();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    /// Route a surface signal to the live adapter. Signals for any other
    /// listener are dropped.
    pub fn handle_surface_event(&mut self, listener: ListenerId, event: SurfaceEvent, now: Instant) {
        if !self.slot.is_live(listener) {
            debug!(%listener, ?event, "Dropping event for stale listener");
            return;
        }

        let signal = match self.slot.get_mut() {
            Some(adapter) => adapter.handle_event(self.surface.as_mut(), &event, now),
            None => return,
        };
        self.on_signal(signal, now);
        self.settle();
    }

    /// Fire due adapter timers and the resync tick.
    pub fn poll(&mut self, now: Instant) {
        if self.disposed {
            return;
        }

        let signal = match self.slot.get_mut() {
            Some(adapter) => adapter.poll(self.surface.as_mut(), now),
            None => AdapterSignal::Idle,
        };
        self.on_signal(signal, now);
        self.settle();

        if self.next_tick.is_some_and(|due| now >= due) {
            self.next_tick = Some(now + self.resync_interval);
            self.resync(now);
        }
    }

    /// Compare playback with the wall clock and correct it if needed.
    ///
    /// Skipped while the adapter is not ready or a load or seek is in
    /// flight.
    #[instrument(name = "resync", skip(self, now))]
    pub fn resync(&mut self, now: Instant) {
        self.evaluate(now, false);
    }

    /// Switch between local and reference time.
    ///
    /// From `Ready` this resyncs at once through the active adapter. In
    /// any other state the mode is used from the next evaluation.
    pub fn set_timezone_mode(&mut self, mode: TimezoneMode, now: Instant) {
        if self.timezone == mode {
            debug!(?mode, "Timezone mode unchanged");
            return;
        }

        info!(previous = ?self.timezone, current = ?mode, "Timezone mode changed");
        self.timezone = mode;

        let state = self.state();
        if state.is_ready() {
            self.evaluate(now, false);
        } else {
            debug!(state = state.name(), "Timezone mode applies from the next tick");
        }
    }

    /// Tear down the adapter and stop ticking. Idempotent.
    #[instrument(name = "dispose", skip(self))]
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        info!("Disposing sync engine");
        self.slot.teardown(self.surface.as_mut());
        self.next_tick = None;
        self.stats.stop();
        self.disposed = true;
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Shared handle to the state, readable from other threads.
    pub fn state_handle(&self) -> Arc<RwLock<EngineState>> {
        Arc::clone(&self.state)
    }

    /// Mode of the live adapter.
    pub fn mode(&self) -> Option<DeliveryMode> {
        self.slot.mode()
    }

    /// Listener of the live adapter.
    pub fn active_listener(&self) -> Option<ListenerId> {
        self.slot.listener()
    }

    pub fn timezone(&self) -> TimezoneMode {
        self.timezone
    }

    pub fn continuous_failed(&self) -> bool {
        self.selector.continuous_failed()
    }

    pub fn metrics(&self, now: Instant) -> SyncMetrics {
        self.stats.snapshot(now)
    }

    /// Earliest instant `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let adapter = self.slot.get().and_then(|adapter| adapter.next_deadline());
        match (self.next_tick, adapter) {
            (Some(tick), Some(timer)) => Some(tick.min(timer)),
            (tick, timer) => tick.or(timer),
        }
    }

    fn evaluate(&mut self, now: Instant, initial: bool) {
        let state = self.state();
        let Some(mode) = state.mode() else {
            debug!(state = state.name(), "No active mode, resync skipped");
            return;
        };

        let desired = self.clock.day_offset_now(self.timezone);
        let Some(adapter) = self.slot.get_mut() else {
            return;
        };
        if !adapter.is_ready() || adapter.has_pending() {
            debug!(state = state.name(), "Load or seek in flight, tick skipped");
            self.stats.record_skip();
            return;
        }

        let surface = self.surface.as_mut();
        let current = adapter.current_offset(surface);
        let drift = adapter.drift(surface, desired);
        let part_switch = adapter.needs_switch(desired);
        let drifted = drift.map_or(true, |d| d > self.config.drift_threshold_secs);
        self.stats.record_tick(drift);

        let correct = initial || part_switch || drifted;
        if correct {
            if !initial {
                self.stats.record_correction(part_switch);
            }
            info!(
                %desired,
                current = ?current,
                drift = ?drift,
                part_switch,
                "Correcting playback"
            );
            adapter.sync_to(surface, desired, now);
        }

        self.send_event(EngineEvent::Resync {
            desired_offset: desired.as_secs(),
            applied_correction: correct,
        });

        if correct && state.is_ready() {
            self.transition_to(EngineState::Resyncing { mode });
        }
        self.ensure_playing();
        self.settle();
    }

    fn on_signal(&mut self, signal: AdapterSignal, now: Instant) {
        match signal {
            AdapterSignal::Idle => {}
            AdapterSignal::Ready => {
                if self.state().is_initializing() {
                    self.evaluate(now, true);
                } else {
                    info!("Stream recovered, re-evaluating drift");
                    self.stats.record_recovery();
                    self.evaluate(now, false);
                }
            }
            AdapterSignal::Fatal(err) => self.fail_over(err, now),
        }
    }

    /// Move to `Ready` once the adapter has nothing in flight.
    fn settle(&mut self) {
        let settled = match self.slot.get() {
            Some(adapter) => adapter.is_ready() && !adapter.has_pending(),
            None => return,
        };
        if !settled {
            return;
        }

        match self.state() {
            EngineState::Initializing { mode } | EngineState::Resyncing { mode } => {
                self.transition_to(EngineState::Ready { mode });
                self.ensure_playing();
            }
            _ => {}
        }
    }

    /// Ask a paused surface to play. Rejections are only logged.
    fn ensure_playing(&mut self) {
        if !self.surface.is_paused() {
            return;
        }

        match self.surface.play() {
            Ok(()) => {
                debug!("Playback started");
                self.stats.record_play(false);
            }
            Err(e) => {
                info!("Playback start rejected: {}", e);
                self.stats.record_play(true);
            }
        }
    }

    #[instrument(name = "fail_over", skip_all)]
    fn fail_over(&mut self, err: DeliveryError, now: Instant) {
        let failed = self.slot.mode();
        error!(mode = ?failed, "Delivery failed: {}", err);

        self.transition_to(EngineState::FallbackPending);
        self.slot.teardown(self.surface.as_mut());
        self.stats.record_fallback();

        if failed != Some(DeliveryMode::Continuous) {
            error!("No fallback exists from segmented delivery");
            self.degrade();
            return;
        }

        if self.selector.mark_continuous_failed() {
            info!("Continuous delivery disabled for this session");
            self.send_event(EngineEvent::ContinuousLatched);
        }

        match self.selector.select(&self.config.sources) {
            Ok(mode) => self.activate(mode, now),
            Err(e) => {
                error!("No fallback available: {}", e);
                self.degrade();
            }
        }
    }

    /// Tear down whatever is live and initialize an adapter for `mode`.
    #[instrument(name = "activate", skip(self, now))]
    fn activate(&mut self, mode: DeliveryMode, now: Instant) {
        self.slot.teardown(self.surface.as_mut());
        self.transition_to(EngineState::Initializing { mode });

        let listener = self.surface.subscribe();
        let adapter = match self.build_adapter(mode, listener) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(%mode, "Cannot build adapter: {}", e);
                self.surface.unsubscribe(listener);
                self.degrade();
                return;
            }
        };
        self.send_event(EngineEvent::ModeChanged(mode));

        let adapter = self.slot.install(self.surface.as_mut(), adapter);
        let signal = adapter.open(self.surface.as_mut(), now);
        self.on_signal(signal, now);
        self.settle();
    }

    fn build_adapter(
        &mut self,
        mode: DeliveryMode,
        listener: ListenerId,
    ) -> Result<Box<dyn DeliveryAdapter>, ConfigurationError> {
        match mode {
            DeliveryMode::Continuous => {
                let manifest = self
                    .config
                    .sources
                    .continuous
                    .clone()
                    .ok_or(ConfigurationError::NoPlayableSource)?;
                Ok(Box::new(ContinuousAdapter::new(
                    manifest,
                    listener,
                    self.backend.take(),
                    RecoveryPolicy::from_config(&self.config),
                )))
            }
            DeliveryMode::SegmentedSix | DeliveryMode::SegmentedThree => {
                Ok(Box::new(SegmentedAdapter::new(
                    mode,
                    &self.config.sources,
                    listener,
                    SeekRetryPolicy::from_config(&self.config),
                )?))
            }
        }
    }

    /// Enter the terminal state. Emits `Degraded` exactly once.
    fn degrade(&mut self) {
        if self.state().is_degraded() {
            return;
        }

        self.slot.teardown(self.surface.as_mut());
        self.next_tick = None;
        self.transition_to(EngineState::Degraded);
        error!("No playable source available");
        self.send_event(EngineEvent::Degraded);
    }

    fn send_state(&self) {
        let state = self.state();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state),
            current: Box::new(state),
        });
    }

    fn transition_to(&self, new_state: EngineState) {
        let previous = {
            let mut state = self.state.write();
            let prev = *state;
            *state = new_state;
            prev
        };
        if previous == new_state {
            return;
        }

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            mode = ?new_state.mode(),
            "State transition"
        );

        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use rstest::rstest;

    use daycycle_clock::ManualTimeSource;
    use daycycle_delivery::mock::{BackendAction, ScriptedBackend, ScriptedSurface, SurfaceAction};
    use daycycle_ipc::{command_channel, event_channel, FaultKind, SegmentSet, SourceDescriptors};

    use super::*;

    const MANIFEST: &str = "https://cdn.example/day/index.m3u8";

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn parts(count: usize, prefix: &str) -> SegmentSet {
        (1..=count)
            .map(|i| (format!("p{i}"), format!("{prefix}{i}.mp3")))
            .collect()
    }

    fn config(continuous: bool, six: bool, three: bool) -> EngineConfig {
        EngineConfig {
            sources: SourceDescriptors {
                continuous: continuous.then(|| MANIFEST.to_string()),
                segmented_six: six.then(|| parts(6, "part")),
                segmented_three: three.then(|| parts(3, "third")),
            },
            ..Default::default()
        }
    }

    fn states(events: &[EngineEvent]) -> Vec<EngineState> {
        events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::StateChanged { previous, current } if previous != current => {
                    Some(**current)
                }
                _ => None,
            })
            .collect()
    }

    struct Harness {
        engine: SyncEngine,
        surface: ScriptedSurface,
        backend: ScriptedBackend,
        time: Arc<ManualTimeSource>,
        sink: Sender<EngineCommand>,
        events: Receiver<EngineEvent>,
        now: Instant,
    }

    impl Harness {
        /// Engine over a scripted surface whose local zone is UTC. With
        /// `auto_ready` every load is immediately seekable.
        fn new(config: EngineConfig, start: DateTime<Utc>, auto_ready: bool) -> Self {
            let (sink, command_rx) = command_channel();
            let (event_tx, events) = event_channel();
            let surface = if auto_ready {
                ScriptedSurface::new().auto_ready(Some(sink.clone()))
            } else {
                ScriptedSurface::new()
            };
            let backend = ScriptedBackend::new()
                .bound_to(surface.clone())
                .auto_ready(sink.clone());
            let time = Arc::new(ManualTimeSource::utc(start));
            let playback = Playback {
                surface: Box::new(surface.clone()),
                backend: Some(Box::new(backend.clone())),
                time_source: time.clone(),
            };
            let engine = SyncEngine::new(config, playback, command_rx, event_tx).unwrap();

            Self {
                engine,
                surface,
                backend,
                time,
                sink,
                events,
                now: Instant::now(),
            }
        }

        fn start(&mut self) {
            self.engine.start(self.now);
            self.pump();
        }

        fn pump(&mut self) {
            assert!(self.engine.process_pending(self.now));
        }

        /// Move wall clock, playback and engine time forward together.
        fn step(&mut self, secs: u32) {
            self.time.advance(TimeDelta::seconds(i64::from(secs)));
            self.surface.advance(f64::from(secs));
            self.now += Duration::from_secs(u64::from(secs));
            self.engine.poll(self.now);
            self.pump();
        }

        fn send(&mut self, listener: ListenerId, event: SurfaceEvent) {
            self.sink
                .send(EngineCommand::Surface { listener, event })
                .unwrap();
            self.pump();
        }

        fn metadata_ready(&mut self) {
            self.surface.metadata_loaded();
            let listener = self.engine.active_listener().unwrap();
            self.send(listener, SurfaceEvent::MetadataReady);
        }

        fn drain(&self) -> Vec<EngineEvent> {
            self.events.try_iter().collect()
        }
    }

    fn fatal(kind: FaultKind) -> SurfaceEvent {
        SurfaceEvent::FatalError {
            kind,
            detail: "scripted".into(),
        }
    }

    #[test]
    fn test_defaults_match_config() {
        let config = EngineConfig::default();
        assert_eq!(
            Duration::from_secs(config.resync_interval_secs),
            crate::RESYNC_INTERVAL
        );
        assert_eq!(config.drift_threshold_secs, crate::DRIFT_THRESHOLD_SECS);
    }

    #[test]
    fn test_no_playable_source_fails_construction() {
        let (_sink, command_rx) = command_channel();
        let (event_tx, _events) = event_channel();
        let playback = Playback {
            surface: Box::new(ScriptedSurface::new()),
            backend: None,
            time_source: Arc::new(ManualTimeSource::utc(at(5, 0, 0))),
        };

        let result = SyncEngine::new(EngineConfig::default(), playback, command_rx, event_tx);
        assert_eq!(
            result.err(),
            Some(EngineError::Configuration(
                ConfigurationError::NoPlayableSource
            ))
        );
    }

    #[test]
    fn test_zero_tick_period_is_rejected() {
        let (_sink, command_rx) = command_channel();
        let (event_tx, _events) = event_channel();
        let playback = Playback {
            surface: Box::new(ScriptedSurface::new()),
            backend: None,
            time_source: Arc::new(ManualTimeSource::utc(at(5, 0, 0))),
        };
        let config = EngineConfig {
            resync_interval_secs: 0,
            ..config(false, true, false)
        };

        let result = SyncEngine::new(config, playback, command_rx, event_tx);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[rstest]
    #[case::continuous_first(config(true, true, false), false, DeliveryMode::Continuous)]
    #[case::latched_skips_continuous(config(true, true, false), true, DeliveryMode::SegmentedSix)]
    #[case::three_only(config(false, false, true), false, DeliveryMode::SegmentedThree)]
    #[case::latched_to_three(config(true, false, true), true, DeliveryMode::SegmentedThree)]
    fn test_start_selects_mode(
        #[case] base: EngineConfig,
        #[case] latched: bool,
        #[case] expected: DeliveryMode,
    ) {
        let config = EngineConfig {
            continuous_failed: latched,
            ..base
        };
        let mut h = Harness::new(config, at(5, 10, 0), true);
        h.start();

        assert_eq!(h.engine.mode(), Some(expected));
        if expected != DeliveryMode::Continuous {
            assert!(h.backend.actions().is_empty());
        }
    }

    #[test]
    fn test_segmented_start_waits_for_metadata() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), false);
        h.start();

        // 05:10 is 4h10m into the cycle: part 2, 600s in.
        assert_eq!(
            h.engine.state(),
            EngineState::Initializing {
                mode: DeliveryMode::SegmentedSix
            }
        );
        assert_eq!(h.surface.loads(), vec!["part2.mp3".to_string()]);
        assert!(h.surface.seeks().is_empty());

        h.metadata_ready();

        assert_eq!(h.surface.seeks(), vec![600.0]);
        assert!(h.surface.actions().contains(&SurfaceAction::Play));
        assert_eq!(
            states(&h.drain()),
            vec![
                EngineState::Initializing {
                    mode: DeliveryMode::SegmentedSix
                },
                EngineState::Ready {
                    mode: DeliveryMode::SegmentedSix
                },
            ]
        );
    }

    #[test]
    fn test_drift_threshold() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), true);
        h.start();
        assert_eq!(h.surface.seeks(), vec![600.0]);
        h.drain();

        // Playback keeps pace with the clock.
        h.step(5);
        assert_eq!(h.surface.seeks().len(), 1);

        // Exactly at the threshold: left alone.
        h.surface.set_position(h.surface.snapshot_position() + 30.0);
        h.step(5);
        assert_eq!(h.surface.seeks().len(), 1);

        // One second past it: exactly one reseek to the desired offset.
        h.surface.set_position(h.surface.snapshot_position() + 1.0);
        h.step(5);
        assert_eq!(h.surface.seeks(), vec![600.0, 615.0]);

        let events = h.drain();
        let corrections: Vec<bool> = events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Resync {
                    applied_correction, ..
                } => Some(*applied_correction),
                _ => None,
            })
            .collect();
        assert_eq!(corrections, vec![false, false, true]);
        assert_eq!(
            states(&events),
            vec![
                EngineState::Resyncing {
                    mode: DeliveryMode::SegmentedSix
                },
                EngineState::Ready {
                    mode: DeliveryMode::SegmentedSix
                },
            ]
        );

        let metrics = h.engine.metrics(h.now);
        assert_eq!(metrics.drift_corrections, 1);
        assert_eq!(metrics.last_drift_secs, Some(31));
        assert_eq!(h.engine.state().mode(), Some(DeliveryMode::SegmentedSix));
    }

    #[test]
    fn test_truncated_part_is_not_reseeked_every_tick() {
        let mut h = Harness::new(config(false, true, false), at(6, 30, 0), true);
        h.surface.set_duration("part2.mp3", 3_600.0);
        h.start();

        // 5h30m into the cycle is 5400s into part 2, folded onto its hour.
        assert_eq!(h.surface.seeks(), vec![1_800.0]);

        for _ in 0..6 {
            h.step(5);
        }

        assert_eq!(h.surface.seeks(), vec![1_800.0]);
        let metrics = h.engine.metrics(h.now);
        assert_eq!(metrics.ticks, 7);
        assert_eq!(metrics.drift_corrections, 0);
        assert_eq!(metrics.last_drift_secs, Some(0));
        assert!(h.engine.state().is_ready());
    }

    #[test]
    fn test_lost_metadata_signal_does_not_stall_start() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), false);
        h.start();
        assert!(h.engine.state().is_initializing());
        assert!(h.engine.next_deadline().is_some());

        // The surface can seek but the signal never reaches the listener.
        h.surface.metadata_loaded();
        h.step(1);

        assert_eq!(h.surface.seeks(), vec![600.0]);
        assert_eq!(
            h.engine.state(),
            EngineState::Ready {
                mode: DeliveryMode::SegmentedSix
            }
        );

        for _ in 0..4 {
            h.step(5);
        }
        let metrics = h.engine.metrics(h.now);
        assert_eq!(metrics.skipped_ticks, 0);
        assert_eq!(metrics.drift_corrections, 0);
    }

    #[test]
    fn test_part_boundary_forces_switch() {
        // Two seconds before the 4h/8h boundary.
        let mut h = Harness::new(config(false, true, false), at(8, 59, 58), true);
        h.start();
        assert_eq!(h.surface.seeks(), vec![14_398.0]);

        h.step(5);

        assert_eq!(
            h.surface.loads(),
            vec!["part2.mp3".to_string(), "part3.mp3".to_string()]
        );
        assert_eq!(h.surface.seeks(), vec![14_398.0, 3.0]);
        let metrics = h.engine.metrics(h.now);
        assert_eq!(metrics.part_switches, 1);
        assert_eq!(metrics.drift_corrections, 0);
    }

    #[test]
    fn test_tick_skipped_while_resyncing() {
        let mut h = Harness::new(config(false, true, false), at(8, 59, 58), false);
        h.start();
        h.metadata_ready();
        h.drain();

        // Crossing the boundary loads part 3; its seek waits for metadata.
        h.step(5);
        assert_eq!(h.surface.loads().len(), 2);
        assert!(h.engine.state().is_resyncing());

        h.step(5);
        assert_eq!(h.surface.loads().len(), 2);
        assert_eq!(h.surface.seeks(), vec![14_398.0]);
        assert_eq!(h.engine.metrics(h.now).skipped_ticks, 1);

        h.metadata_ready();
        assert_eq!(h.surface.seeks(), vec![14_398.0, 3.0]);
        assert_eq!(
            h.engine.state(),
            EngineState::Ready {
                mode: DeliveryMode::SegmentedSix
            }
        );
    }

    #[test]
    fn test_timezone_toggle_resyncs_immediately() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), true);
        h.start();

        let now = h.now;
        assert!(h.engine.handle_command(
            EngineCommand::SetTimezoneMode(TimezoneMode::reference()),
            now
        ));
        h.pump();

        // 05:10 UTC is 14:10 at +9: 13h10m into the cycle, part 4.
        assert_eq!(h.surface.loads().last().map(String::as_str), Some("part4.mp3"));
        assert_eq!(h.surface.seeks().last(), Some(&4_200.0));
        assert_eq!(h.engine.timezone(), TimezoneMode::reference());
        assert!(h.engine.state().is_ready());
    }

    #[test]
    fn test_timezone_change_during_init_applies_on_ready() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.backend.stall();
        h.start();
        assert!(h.engine.state().is_initializing());

        let now = h.now;
        h.engine.set_timezone_mode(TimezoneMode::reference(), now);
        assert!(h.surface.seeks().is_empty());

        let listener = h.engine.active_listener().unwrap();
        h.send(listener, SurfaceEvent::ManifestParsed);
        assert_eq!(h.surface.seeks(), vec![47_400.0]);
    }

    #[test]
    fn test_continuous_seeks_after_manifest_parsed() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.start();

        let listener = h.engine.active_listener().unwrap();
        assert_eq!(
            h.backend.actions(),
            vec![BackendAction::Attach(MANIFEST.into(), listener)]
        );
        assert_eq!(h.surface.seeks(), vec![15_000.0]);
        assert_eq!(
            states(&h.drain()),
            vec![
                EngineState::Initializing {
                    mode: DeliveryMode::Continuous
                },
                EngineState::Ready {
                    mode: DeliveryMode::Continuous
                },
            ]
        );
    }

    #[test]
    fn test_unsupported_codec_falls_back_without_retry() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.start();
        let continuous_listener = h.engine.active_listener().unwrap();

        assert!(h.backend.emit(fatal(FaultKind::UnsupportedCodec)));
        h.pump();

        assert_eq!(
            h.engine.state(),
            EngineState::Initializing {
                mode: DeliveryMode::SegmentedSix
            }
        );
        h.metadata_ready();

        let events = h.drain();
        assert_eq!(
            states(&events),
            vec![
                EngineState::Initializing {
                    mode: DeliveryMode::Continuous
                },
                EngineState::Ready {
                    mode: DeliveryMode::Continuous
                },
                EngineState::FallbackPending,
                EngineState::Initializing {
                    mode: DeliveryMode::SegmentedSix
                },
                EngineState::Ready {
                    mode: DeliveryMode::SegmentedSix
                },
            ]
        );
        let latched = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::ContinuousLatched))
            .count();
        assert_eq!(latched, 1);
        assert!(h.engine.continuous_failed());

        assert_eq!(
            h.backend.actions(),
            vec![
                BackendAction::Attach(MANIFEST.into(), continuous_listener),
                BackendAction::Detach,
            ]
        );
        assert!(!h.surface.live_listeners().contains(&continuous_listener));
        assert_eq!(h.surface.loads().last().map(String::as_str), Some("part2.mp3"));
        assert_eq!(h.surface.seeks().last(), Some(&600.0));
    }

    #[test]
    fn test_fatal_before_manifest_parsed_falls_back() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.backend.stall();
        h.start();
        assert_eq!(
            h.engine.state(),
            EngineState::Initializing {
                mode: DeliveryMode::Continuous
            }
        );
        assert!(h.surface.seeks().is_empty());

        assert!(h.backend.emit(fatal(FaultKind::Other)));
        h.pump();
        h.metadata_ready();

        assert_eq!(
            states(&h.drain()),
            vec![
                EngineState::Initializing {
                    mode: DeliveryMode::Continuous
                },
                EngineState::FallbackPending,
                EngineState::Initializing {
                    mode: DeliveryMode::SegmentedSix
                },
                EngineState::Ready {
                    mode: DeliveryMode::SegmentedSix
                },
            ]
        );
        assert!(h.engine.continuous_failed());
        assert_eq!(h.surface.seeks(), vec![600.0]);
        assert_eq!(
            h.backend
                .actions()
                .iter()
                .filter(|a| matches!(a, BackendAction::StartLoad))
                .count(),
            0
        );
    }

    #[test]
    fn test_stale_continuous_events_are_ignored() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.start();
        let stale = h.engine.active_listener().unwrap();
        h.backend.emit(fatal(FaultKind::Other));
        h.pump();
        h.metadata_ready();
        h.drain();
        let backend_actions = h.backend.actions().len();

        h.send(stale, fatal(FaultKind::Network));
        h.send(stale, SurfaceEvent::ManifestParsed);

        assert!(states(&h.drain()).is_empty());
        assert_eq!(h.backend.actions().len(), backend_actions);
        assert_eq!(
            h.engine.state(),
            EngineState::Ready {
                mode: DeliveryMode::SegmentedSix
            }
        );
    }

    #[test]
    fn test_no_segmented_fallback_degrades_once() {
        let mut h = Harness::new(config(true, false, false), at(5, 10, 0), false);
        h.start();
        let stale = h.engine.active_listener().unwrap();

        h.backend.emit(fatal(FaultKind::Other));
        h.pump();
        h.step(5);
        h.step(5);
        h.send(stale, fatal(FaultKind::Network));

        let events = h.drain();
        let degraded = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Degraded))
            .count();
        assert_eq!(degraded, 1);
        assert_eq!(states(&events).last(), Some(&EngineState::Degraded));
        assert!(h.engine.state().is_degraded());
        assert!(h.engine.mode().is_none());
        assert!(h.engine.next_deadline().is_none());

        let reloads = h
            .backend
            .actions()
            .iter()
            .filter(|a| matches!(a, BackendAction::StartLoad | BackendAction::Attach(..)))
            .count();
        assert_eq!(reloads, 1);
    }

    #[test]
    fn test_network_error_recovers_in_place() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.start();
        h.step(5);
        assert_eq!(h.surface.seeks(), vec![15_000.0]);

        // The reload restarts the stream; the recovered stream is re-aligned.
        h.backend.emit(fatal(FaultKind::Network));
        h.pump();

        assert_eq!(h.surface.seeks(), vec![15_000.0, 15_005.0]);
        assert_eq!(h.engine.mode(), Some(DeliveryMode::Continuous));
        assert!(!h.engine.continuous_failed());
        let metrics = h.engine.metrics(h.now);
        assert_eq!(metrics.recoveries, 1);
        assert_eq!(metrics.fallbacks, 0);
    }

    #[test]
    fn test_recovery_window_escalates_to_fallback() {
        let mut h = Harness::new(config(true, true, false), at(5, 10, 0), false);
        h.start();

        h.backend.stall();
        h.backend.emit(fatal(FaultKind::Network));
        h.pump();

        h.step(4);
        assert_eq!(h.engine.mode(), Some(DeliveryMode::Continuous));
        assert!(h.engine.next_deadline().is_some());

        h.step(1);
        assert_eq!(h.engine.mode(), Some(DeliveryMode::SegmentedSix));
        assert!(h.engine.continuous_failed());
        assert!(states(&h.drain()).contains(&EngineState::FallbackPending));

        let reloads = h
            .backend
            .actions()
            .iter()
            .filter(|a| **a == BackendAction::StartLoad)
            .count();
        assert_eq!(reloads, 1);
    }

    #[test]
    fn test_play_rejection_is_not_escalated() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), true);
        h.surface.reject_play(true);
        h.start();
        h.step(5);

        assert!(h.engine.state().is_ready());
        let metrics = h.engine.metrics(h.now);
        assert!(metrics.play_rejections >= 2);
        assert_eq!(metrics.play_rejections, metrics.play_requests);
        assert_eq!(metrics.fallbacks, 0);
    }

    #[test]
    fn test_stats_and_state_queries() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), true);
        h.start();
        h.step(5);
        h.drain();

        let now = h.now;
        assert!(h.engine.handle_command(EngineCommand::GetStats, now));
        assert!(h.engine.handle_command(EngineCommand::GetState, now));

        let events = h.drain();
        let stats = events.iter().find_map(|e| match e {
            EngineEvent::Stats(stats) => Some(stats.clone()),
            _ => None,
        });
        let stats = stats.unwrap();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.uptime_seconds, 5);
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::StateChanged { current, .. } if current.is_ready()
        )));
    }

    #[test]
    fn test_shutdown_tears_down() {
        let mut h = Harness::new(config(false, true, false), at(5, 10, 0), true);
        h.start();

        let now = h.now;
        assert!(!h.engine.handle_command(EngineCommand::Shutdown, now));
        assert!(h.surface.live_listeners().is_empty());
        assert!(h.engine.next_deadline().is_none());
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, EngineEvent::Shutdown)));

        // Polling after dispose does nothing.
        let seeks = h.surface.seeks().len();
        h.step(10);
        assert_eq!(h.surface.seeks().len(), seeks);
    }
}
