//! Scripted playback surface and stream backend.
//!
//! Both are cheap handles over shared state, so a test can keep a clone
//! to script behavior and inspect the recorded actions while the engine
//! owns the other.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::trace;

use daycycle_ipc::{EngineCommand, ListenerId, SurfaceEvent};

use crate::error::SurfaceError;
use crate::surface::{PlaybackSurface, StreamBackend};
use crate::SurfaceResult;

/// A call made on the scripted surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceAction {
    Load(String),
    Seek(f64),
    Play,
    Subscribe(ListenerId),
    Unsubscribe(ListenerId),
}

#[derive(Debug)]
struct SurfaceState {
    resource: Option<String>,
    position: f64,
    duration: Option<f64>,
    paused: bool,
    seekable: bool,
    native_manifest: bool,
    auto_ready: bool,
    reject_play: bool,
    swallowed_seeks: u32,
    durations: HashMap<String, f64>,
    listeners: Vec<ListenerId>,
    next_listener: u64,
    actions: Vec<SurfaceAction>,
    sink: Option<Sender<EngineCommand>>,
}

/// In-memory playback surface.
#[derive(Debug, Clone)]
pub struct ScriptedSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl Default for ScriptedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSurface {
    /// A paused surface with nothing loaded. Loads only become seekable once
    /// the test calls `metadata_loaded`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SurfaceState {
                resource: None,
                position: 0.0,
                duration: None,
                paused: true,
                seekable: false,
                native_manifest: false,
                auto_ready: false,
                reject_play: false,
                swallowed_seeks: 0,
                durations: HashMap::new(),
                listeners: Vec::new(),
                next_listener: 1,
                actions: Vec::new(),
                sink: None,
            })),
        }
    }

    /// Become seekable immediately on load and, with a sink, report
    /// `MetadataReady` to every live listener.
    pub fn auto_ready(self, sink: Option<Sender<EngineCommand>>) -> Self {
        {
            let mut state = self.state.lock();
            state.auto_ready = true;
            state.sink = sink;
        }
        self
    }

    pub fn with_native_manifest(self) -> Self {
        self.state.lock().native_manifest = true;
        self
    }

    /// Duration reported after `resource` loads.
    pub fn set_duration(&self, resource: &str, seconds: f64) {
        self.state
            .lock()
            .durations
            .insert(resource.to_string(), seconds);
    }

    /// Make the loaded resource seekable, as a metadata signal would.
    pub fn metadata_loaded(&self) {
        self.state.lock().seekable = true;
    }

    pub fn set_position(&self, seconds: f64) {
        self.state.lock().position = seconds;
    }

    /// Advance playback if not paused.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.lock();
        if !state.paused && state.resource.is_some() {
            state.position += seconds;
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn reject_play(&self, reject: bool) {
        self.state.lock().reject_play = reject;
    }

    /// The next `count` seeks report success but leave the position as is.
    pub fn swallow_seeks(&self, count: u32) {
        self.state.lock().swallowed_seeks = count;
    }

    pub fn actions(&self) -> Vec<SurfaceAction> {
        self.state.lock().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.state.lock().actions.clear();
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.filter(|a| match a {
            SurfaceAction::Seek(s) => Some(*s),
            _ => None,
        })
    }

    pub fn loads(&self) -> Vec<String> {
        self.filter(|a| match a {
            SurfaceAction::Load(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn live_listeners(&self) -> Vec<ListenerId> {
        self.state.lock().listeners.clone()
    }

    pub fn snapshot_position(&self) -> f64 {
        self.state.lock().position
    }

    fn filter<T>(&self, f: impl Fn(&SurfaceAction) -> Option<T>) -> Vec<T> {
        self.state.lock().actions.iter().filter_map(f).collect()
    }
}

impl PlaybackSurface for ScriptedSurface {
    fn load(&mut self, resource: &str) {
        let mut state = self.state.lock();
        trace!(resource, "scripted load");
        state.actions.push(SurfaceAction::Load(resource.to_string()));
        state.resource = Some(resource.to_string());
        state.position = 0.0;
        state.duration = state.durations.get(resource).copied();
        state.seekable = state.auto_ready;

        if state.auto_ready {
            if let Some(ref sink) = state.sink {
                for listener in &state.listeners {
                    let _ = sink.try_send(EngineCommand::Surface {
                        listener: *listener,
                        event: SurfaceEvent::MetadataReady,
                    });
                }
            }
        }
    }

    fn seek(&mut self, seconds: f64) -> SurfaceResult<()> {
        let mut state = self.state.lock();
        state.actions.push(SurfaceAction::Seek(seconds));
        if state.resource.is_none() {
            return Err(SurfaceError::SeekRefused("nothing loaded".into()));
        }
        if state.swallowed_seeks > 0 {
            state.swallowed_seeks -= 1;
        } else {
            state.position = seconds;
        }
        Ok(())
    }

    fn play(&mut self) -> SurfaceResult<()> {
        let mut state = self.state.lock();
        state.actions.push(SurfaceAction::Play);
        if state.reject_play {
            return Err(SurfaceError::PlayRejected("autoplay blocked".into()));
        }
        state.paused = false;
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn position(&self) -> f64 {
        self.state.lock().position
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn can_accept_seek(&self) -> bool {
        let state = self.state.lock();
        state.resource.is_some() && state.seekable
    }

    fn current_resource(&self) -> Option<String> {
        self.state.lock().resource.clone()
    }

    fn supports_native_manifest(&self) -> bool {
        self.state.lock().native_manifest
    }

    fn subscribe(&mut self) -> ListenerId {
        let mut state = self.state.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push(id);
        state.actions.push(SurfaceAction::Subscribe(id));
        id
    }

    fn unsubscribe(&mut self, listener: ListenerId) {
        let mut state = self.state.lock();
        state.listeners.retain(|l| *l != listener);
        state.actions.push(SurfaceAction::Unsubscribe(listener));
    }
}

/// A call made on the scripted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAction {
    Attach(String, ListenerId),
    StartLoad,
    RecoverMediaError,
    Detach,
}

#[derive(Debug, Default)]
struct BackendState {
    listener: Option<ListenerId>,
    manifest: Option<String>,
    surface: Option<ScriptedSurface>,
    auto_ready: bool,
    sink: Option<Sender<EngineCommand>>,
    actions: Vec<BackendAction>,
}

/// In-memory adaptive-stream backend.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `ManifestParsed` through `sink` after every attach or reload.
    pub fn auto_ready(self, sink: Sender<EngineCommand>) -> Self {
        {
            let mut state = self.state.lock();
            state.auto_ready = true;
            state.sink = Some(sink);
        }
        self
    }

    /// Load the manifest into `surface` on attach and reload, as a real
    /// backend feeds the media element it is attached to.
    pub fn bound_to(self, surface: ScriptedSurface) -> Self {
        self.state.lock().surface = Some(surface);
        self
    }

    /// Stop reporting `ManifestParsed`, as a backend stuck reloading would.
    pub fn stall(&self) {
        self.state.lock().auto_ready = false;
    }

    pub fn actions(&self) -> Vec<BackendAction> {
        self.state.lock().actions.clone()
    }

    /// Listener the manifest is attached under, if attached.
    pub fn listener(&self) -> Option<ListenerId> {
        self.state.lock().listener
    }

    /// Report `event` to the attached listener through the sink.
    pub fn emit(&self, event: SurfaceEvent) -> bool {
        let state = self.state.lock();
        match (&state.sink, state.listener) {
            (Some(sink), Some(listener)) => sink
                .try_send(EngineCommand::Surface { listener, event })
                .is_ok(),
            _ => false,
        }
    }

    fn feed_surface(state: &BackendState) {
        if let (Some(surface), Some(manifest)) = (&state.surface, &state.manifest) {
            surface.clone().load(manifest);
        }
    }

    fn announce_ready(state: &BackendState) {
        if !state.auto_ready {
            return;
        }
        if let (Some(sink), Some(listener)) = (&state.sink, state.listener) {
            let _ = sink.try_send(EngineCommand::Surface {
                listener,
                event: SurfaceEvent::ManifestParsed,
            });
        }
    }
}

impl StreamBackend for ScriptedBackend {
    fn attach(&mut self, manifest: &str, listener: ListenerId) {
        let mut state = self.state.lock();
        state
            .actions
            .push(BackendAction::Attach(manifest.to_string(), listener));
        state.listener = Some(listener);
        state.manifest = Some(manifest.to_string());
        Self::feed_surface(&state);
        Self::announce_ready(&state);
    }

    fn start_load(&mut self) {
        let mut state = self.state.lock();
        state.actions.push(BackendAction::StartLoad);
        Self::feed_surface(&state);
        Self::announce_ready(&state);
    }

    fn recover_media_error(&mut self) {
        self.state.lock().actions.push(BackendAction::RecoverMediaError);
    }

    fn detach(&mut self) {
        let mut state = self.state.lock();
        state.actions.push(BackendAction::Detach);
        state.listener = None;
        state.manifest = None;
    }
}
