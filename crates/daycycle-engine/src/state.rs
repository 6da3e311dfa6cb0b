//! Ownership of the single live delivery adapter.

use tracing::{debug, info, instrument};

use daycycle_delivery::{DeliveryAdapter, PlaybackSurface};
use daycycle_ipc::{DeliveryMode, ListenerId};

/// Holds at most one adapter and makes sure the previous one is torn down
/// before another is installed.
#[derive(Default)]
pub struct AdapterSlot {
    active: Option<Box<dyn DeliveryAdapter>>,
}

impl AdapterSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `adapter`, tearing down whatever was live.
    pub fn install(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        adapter: Box<dyn DeliveryAdapter>,
    ) -> &mut dyn DeliveryAdapter {
        self.teardown(surface);
        debug!(mode = %adapter.mode(), listener = %adapter.listener(), "Adapter installed");
        self.active.insert(adapter).as_mut()
    }

    /// Tear down the live adapter, if any. Its listener stops receiving
    /// surface signals.
    #[instrument(name = "teardown_adapter", skip_all)]
    pub fn teardown(&mut self, surface: &mut dyn PlaybackSurface) {
        if let Some(mut adapter) = self.active.take() {
            info!(mode = %adapter.mode(), listener = %adapter.listener(), "Tearing down adapter");
            adapter.teardown(surface);
        }
    }

    /// Whether `listener` belongs to the live adapter.
    pub fn is_live(&self, listener: ListenerId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|adapter| adapter.listener() == listener)
    }

    pub fn mode(&self) -> Option<DeliveryMode> {
        self.active.as_ref().map(|adapter| adapter.mode())
    }

    pub fn listener(&self) -> Option<ListenerId> {
        self.active.as_ref().map(|adapter| adapter.listener())
    }

    pub fn get(&self) -> Option<&dyn DeliveryAdapter> {
        self.active.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut dyn DeliveryAdapter> {
        match self.active {
            Some(ref mut adapter) => Some(adapter.as_mut()),
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }
}
