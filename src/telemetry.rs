use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::camera::FitKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    Refresh,
    MarkerCreated,
    PointSkipped,
    ThumbnailApplied,
    ThumbnailFailed,
    StaleCompletion,
    Fit(FitKind),
    LocationFix,
    LocationError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub refreshes: u64,
    pub markers_created: u64,
    pub points_skipped: u64,
    pub thumbnails_applied: u64,
    pub thumbnails_failed: u64,
    pub stale_completions: u64,
    pub fits_initial: u64,
    pub fits_location: u64,
    pub location_fixes: u64,
    pub location_errors: u64,
    pub last_fit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncTelemetry {
    stats: Arc<Mutex<SyncStats>>,
}

impl SyncTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, signal: SyncSignal) {
        let mut stats = self.stats.lock();
        match signal {
            SyncSignal::Refresh => stats.refreshes += 1,
            SyncSignal::MarkerCreated => stats.markers_created += 1,
            SyncSignal::PointSkipped => stats.points_skipped += 1,
            SyncSignal::ThumbnailApplied => stats.thumbnails_applied += 1,
            SyncSignal::ThumbnailFailed => stats.thumbnails_failed += 1,
            SyncSignal::StaleCompletion => stats.stale_completions += 1,
            SyncSignal::Fit(kind) => {
                match kind {
                    FitKind::Initial => stats.fits_initial += 1,
                    FitKind::Location => stats.fits_location += 1,
                }
                stats.last_fit_at = Some(Utc::now());
            }
            SyncSignal::LocationFix => stats.location_fixes += 1,
            SyncSignal::LocationError => stats.location_errors += 1,
        }
    }

    pub fn snapshot(&self) -> SyncStats {
        self.stats.lock().clone()
    }
}
