//! Delivery mode selection and playback-surface adapters.
//!
//! This crate decides how the broadcast reaches the playback surface
//! (continuous adaptive stream or segmented files) and translates day
//! offsets into load and seek calls for the chosen delivery.

mod continuous;
mod error;
mod policy;
mod segmented;
mod selector;
mod surface;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::time::Duration;

pub use continuous::{ContinuousAdapter, StreamStatus};
pub use error::{ConfigurationError, DeliveryError, SurfaceError};
pub use policy::{RecoveryPolicy, SeekRetryPolicy};
pub use segmented::SegmentedAdapter;
pub use selector::{part_key, DeliveryPlanSelector};
pub use surface::{AdapterSignal, DeliveryAdapter, PlaybackSurface, SeekOutcome, StreamBackend};

/// Result type for playback surface calls.
pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Time a transient continuous-stream error has to recover.
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Delay before a silently failed seek is re-applied.
pub const SEEK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum re-applications of a silently failed seek.
pub const MAX_SEEK_RETRIES: u32 = 1;

/// A seek landing within this many seconds of its target counts as applied.
pub const SEEK_TOLERANCE_SECS: f64 = 1.0;
