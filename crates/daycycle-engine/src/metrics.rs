//! Sync statistics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use daycycle_ipc::SyncMetrics;

/// Counts what the engine did to keep playback aligned.
#[derive(Debug, Default)]
pub struct SyncStats {
    start_time: RwLock<Option<Instant>>,
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    drift_corrections: AtomicU64,
    part_switches: AtomicU64,
    play_requests: AtomicU64,
    play_rejections: AtomicU64,
    recoveries: AtomicU64,
    fallbacks: AtomicU64,
    last_drift: RwLock<Option<u32>>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the uptime clock. Later calls keep the first start.
    pub fn start(&self, now: Instant) {
        let mut start = self.start_time.write();
        if start.is_none() {
            *start = Some(now);
        }
    }

    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Record a resync evaluation and the drift it measured.
    pub fn record_tick(&self, drift: Option<u32>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_drift.write() = drift;
    }

    pub fn record_skip(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a correction. A part switch is counted separately from a
    /// plain reseek.
    pub fn record_correction(&self, part_switch: bool) {
        if part_switch {
            self.part_switches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.drift_corrections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_play(&self, rejected: bool) {
        self.play_requests.fetch_add(1, Ordering::Relaxed);
        if rejected {
            self.play_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot.
    pub fn snapshot(&self, now: Instant) -> SyncMetrics {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.saturating_duration_since(s).as_secs())
            .unwrap_or(0);

        SyncMetrics {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            drift_corrections: self.drift_corrections.load(Ordering::Relaxed),
            part_switches: self.part_switches.load(Ordering::Relaxed),
            play_requests: self.play_requests.load(Ordering::Relaxed),
            play_rejections: self.play_rejections.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            last_drift_secs: *self.last_drift.read(),
            uptime_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = SyncStats::new();
        let t0 = Instant::now();
        stats.start(t0);
        stats.start(t0 + Duration::from_secs(3));

        stats.record_tick(Some(2));
        stats.record_tick(Some(45));
        stats.record_skip();
        stats.record_correction(false);
        stats.record_correction(true);
        stats.record_play(true);
        stats.record_play(false);

        let snapshot = stats.snapshot(t0 + Duration::from_secs(12));
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.skipped_ticks, 1);
        assert_eq!(snapshot.drift_corrections, 1);
        assert_eq!(snapshot.part_switches, 1);
        assert_eq!(snapshot.play_requests, 2);
        assert_eq!(snapshot.play_rejections, 1);
        assert_eq!(snapshot.last_drift_secs, Some(45));
        assert_eq!(snapshot.uptime_seconds, 12);

        stats.stop();
        assert_eq!(stats.snapshot(t0 + Duration::from_secs(20)).uptime_seconds, 0);
    }
}
