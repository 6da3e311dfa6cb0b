//! Subcommand implementations.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use clap::ValueEnum;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use daycycle_clock::{
    day_offset, part_plan, BroadcastClock, DayOffset, ManualTimeSource, PartLength,
    SystemTimeSource,
};
use daycycle_delivery::mock::{ScriptedBackend, ScriptedSurface};
use daycycle_delivery::{part_key, DeliveryPlanSelector};
use daycycle_engine::{create_engine, Playback};
use daycycle_ipc::{
    command_channel, event_channel, DeliveryMode, EngineCommand, EngineConfig, EngineEvent,
    EngineState, FaultKind, SurfaceEvent, SyncMetrics, TimezoneMode,
};

/// Where the broadcast is right now.
#[derive(Debug, Clone, PartialEq)]
pub struct NowReport {
    pub timezone: TimezoneMode,
    pub wall_time: NaiveDateTime,
    pub offset: DayOffset,
    pub mode: DeliveryMode,

    /// Part key and seconds into it, for segmented modes.
    pub part: Option<(String, u32)>,
}

impl fmt::Display for NowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "clock       {:?}", self.timezone)?;
        writeln!(f, "wall time   {}", self.wall_time.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "day offset  {}", self.offset)?;
        write!(f, "mode        {}", self.mode)?;
        if let Some((ref key, secs)) = self.part {
            write!(f, "\npart        {key} at {secs}s")?;
        }
        Ok(())
    }
}

/// Report the current offset against the system clock.
pub fn now(config: &EngineConfig, tz: Option<TimezoneMode>) -> Result<NowReport> {
    now_with(config, tz, &BroadcastClock::system())
}

pub fn now_with(
    config: &EngineConfig,
    tz: Option<TimezoneMode>,
    clock: &BroadcastClock,
) -> Result<NowReport> {
    let timezone = tz.unwrap_or(config.timezone);
    let mode = DeliveryPlanSelector::latched(config.continuous_failed)
        .select(&config.sources)
        .context("Cannot select a delivery mode")?;

    let wall_time = clock.now(timezone);
    let offset = day_offset(wall_time);
    let part = match (PartLength::for_mode(mode), mode.part_count()) {
        (Ok(length), Some(count)) => {
            let plan = part_plan(offset, length);
            Some((part_key(plan.part_index, count), plan.offset_in_part))
        }
        _ => None,
    };

    Ok(NowReport {
        timezone,
        wall_time,
        offset,
        mode,
        part,
    })
}

/// Failure kinds that can be injected into a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FaultArg {
    Network,
    Media,
    Codec,
    Other,
}

impl From<FaultArg> for FaultKind {
    fn from(arg: FaultArg) -> Self {
        match arg {
            FaultArg::Network => FaultKind::Network,
            FaultArg::Media => FaultKind::Media,
            FaultArg::Codec => FaultKind::UnsupportedCodec,
            FaultArg::Other => FaultKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub seconds: u32,
    pub step: u32,
    pub start: DateTime<Utc>,

    /// Fault to report, and the simulated second to report it at.
    pub fault: Option<(FaultArg, u32)>,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub state: EngineState,
    pub mode: Option<DeliveryMode>,
    pub continuous_failed: bool,
    pub loads: Vec<String>,
    pub seeks: usize,
    pub metrics: SyncMetrics,
}

/// Drive the engine over a scripted surface on simulated time, logging
/// every surface action and engine event.
#[instrument(name = "simulate", skip_all, fields(seconds = options.seconds))]
pub fn simulate(config: EngineConfig, options: &SimulateOptions) -> Result<SimulationReport> {
    ensure!(options.step > 0, "step must be positive");

    let (sink, command_rx) = command_channel();
    let (event_tx, events) = event_channel();
    let surface = ScriptedSurface::new().auto_ready(Some(sink.clone()));
    let backend = ScriptedBackend::new()
        .bound_to(surface.clone())
        .auto_ready(sink.clone());
    let time = Arc::new(ManualTimeSource::utc(options.start));
    let playback = Playback {
        surface: Box::new(surface.clone()),
        backend: Some(Box::new(backend.clone())),
        time_source: time.clone(),
    };
    let mut engine = create_engine(config, playback, command_rx, event_tx)
        .context("Engine rejected the configuration")?;

    let mut now = Instant::now();
    engine.start(now);
    engine.process_pending(now);
    let mut logged = log_actions(&surface, 0);
    drain_events(&events);

    let mut elapsed = 0;
    let mut fault = options.fault;
    while elapsed < options.seconds {
        let step = options.step.min(options.seconds - elapsed);
        elapsed += step;
        time.advance(TimeDelta::seconds(i64::from(step)));
        surface.advance(f64::from(step));
        now += Duration::from_secs(u64::from(step));
        engine.poll(now);

        if let Some((kind, at)) = fault {
            if elapsed >= at {
                fault = None;
                let event = SurfaceEvent::FatalError {
                    kind: kind.into(),
                    detail: "injected".into(),
                };
                info!(elapsed, ?kind, "Injecting failure");
                if !backend.emit(event.clone()) {
                    if let Some(listener) = engine.active_listener() {
                        let _ = sink.try_send(EngineCommand::Surface { listener, event });
                    }
                }
            }
        }

        if !engine.process_pending(now) {
            break;
        }
        logged = log_actions(&surface, logged);
        drain_events(&events);
    }

    let report = SimulationReport {
        state: engine.state(),
        mode: engine.mode(),
        continuous_failed: engine.continuous_failed(),
        loads: surface.loads(),
        seeks: surface.seeks().len(),
        metrics: engine.metrics(now),
    };
    engine.dispose();
    drain_events(&events);
    Ok(report)
}

/// Run the engine on its own thread against the system clock for
/// `duration`, then shut it down.
pub fn watch(config: EngineConfig, duration: Duration) -> Result<()> {
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let surface = ScriptedSurface::new().auto_ready(Some(command_tx.clone()));
    let backend = ScriptedBackend::new()
        .bound_to(surface.clone())
        .auto_ready(command_tx.clone());
    let playback = Playback {
        surface: Box::new(surface.clone()),
        backend: Some(Box::new(backend)),
        time_source: Arc::new(SystemTimeSource),
    };
    let mut engine = create_engine(config, playback, command_rx, event_tx)
        .context("Engine rejected the configuration")?;

    let handle = thread::spawn(move || {
        info!("Engine thread starting");
        engine.run();
        info!("Engine thread stopped");
    });

    let deadline = Instant::now() + duration;
    let mut last = Instant::now();
    while Instant::now() < deadline {
        match event_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        surface.advance(last.elapsed().as_secs_f64());
        last = Instant::now();
    }

    if command_tx.send(EngineCommand::Shutdown).is_err() {
        warn!("Engine already stopped");
    }
    handle
        .join()
        .map_err(|_| anyhow!("Engine thread panicked"))?;
    for event in event_rx.try_iter() {
        log_event(&event);
    }
    Ok(())
}

fn log_actions(surface: &ScriptedSurface, from: usize) -> usize {
    let actions = surface.actions();
    for action in actions.iter().skip(from) {
        info!(?action, "Surface");
    }
    actions.len()
}

fn drain_events(events: &Receiver<EngineEvent>) {
    for event in events.try_iter() {
        log_event(&event);
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged { previous, current } => {
            info!(
                previous = %previous.name(),
                current = %current.name(),
                mode = ?current.mode(),
                "Engine state"
            );
        }
        EngineEvent::ModeChanged(mode) => info!(%mode, "Delivery mode"),
        EngineEvent::ContinuousLatched => warn!("Continuous delivery disabled for this session"),
        EngineEvent::Degraded => warn!("No playable source left"),
        other => debug!(event = ?other, "Engine event"),
    }
}
