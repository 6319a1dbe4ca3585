use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::bounds::BoundsAccumulator;
use crate::camera::{CameraCommand, CameraFitController, FitGate, FitKind};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::fetcher::{resolve_locations, PointFetcher};
use crate::location::{
    LocationCoordinator, LocationEvent, LocationOptions, LocationProvider, LocationState,
    LocationUpdate,
};
use crate::model::{FetchContext, LatLng, Point, PointKey};
use crate::notice::Notice;
use crate::registry::{ApplyOutcome, MarkerRegistry, Upsert};
use crate::surface::{IconState, MapSurface, MarkerHandle, MarkerIcon};
use crate::telemetry::{SyncSignal, SyncTelemetry};
use crate::thumbnails::{
    HttpThumbnailLoader, ThumbnailCompletion, ThumbnailDispatcher, ThumbnailLoader,
};

// Receiving ends of the background channels; drained on the map thread.
pub struct EngineInbox {
    pub thumbnails: UnboundedReceiver<ThumbnailCompletion>,
    pub locations: UnboundedReceiver<LocationEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub cycle: u64,
    pub markers: usize,
    pub skipped: usize,
    pub unresolved: usize,
}

pub struct MapSyncEngine<S: MapSurface> {
    surface: S,
    registry: MarkerRegistry,
    bounds: BoundsAccumulator,
    gate: FitGate,
    camera: CameraFitController,
    thumbnails: ThumbnailDispatcher,
    location: LocationCoordinator,
    telemetry: SyncTelemetry,
    notices: VecDeque<Notice>,
    location_marker: Option<MarkerHandle>,
    surface_ready: bool,
    deferred_fits: Vec<FitKind>,
    pending_resolution: Vec<Point>,
    cycle: u64,
}

impl<S: MapSurface> MapSyncEngine<S> {
    pub fn new(
        surface: S,
        config: &AppConfig,
        loader: Arc<dyn ThumbnailLoader>,
        provider: Box<dyn LocationProvider>,
        runtime: Handle,
    ) -> (Self, EngineInbox) {
        let (thumbnails, thumbnail_rx) =
            ThumbnailDispatcher::new(loader, runtime, config.thumbnail_max_concurrency);
        let (location, location_rx) =
            LocationCoordinator::new(provider, LocationOptions::from_config(config));
        let engine = Self {
            surface,
            registry: MarkerRegistry::new(),
            bounds: BoundsAccumulator::new(),
            gate: FitGate::new(),
            camera: CameraFitController::from_config(config),
            thumbnails,
            location,
            telemetry: SyncTelemetry::new(),
            notices: VecDeque::new(),
            location_marker: None,
            surface_ready: false,
            deferred_fits: Vec::new(),
            pending_resolution: Vec::new(),
            cycle: 0,
        };
        let inbox = EngineInbox {
            thumbnails: thumbnail_rx,
            locations: location_rx,
        };
        (engine, inbox)
    }

    pub fn from_config(
        surface: S,
        config: &AppConfig,
        provider: Box<dyn LocationProvider>,
        runtime: Handle,
    ) -> AppResult<(Self, EngineInbox)> {
        let loader = Arc::new(HttpThumbnailLoader::new(config)?);
        Ok(Self::new(surface, config, loader, provider, runtime))
    }

    pub fn refresh(&mut self, points: &[Point]) -> RefreshSummary {
        self.begin_cycle();
        let (markers, skipped) = self.place(points);
        self.request_fit(FitKind::Initial);
        let summary = RefreshSummary {
            cycle: self.cycle,
            markers,
            skipped,
            unresolved: self.pending_resolution.len(),
        };
        info!(
            cycle = summary.cycle,
            markers,
            skipped,
            unresolved = summary.unresolved,
            "map points refreshed"
        );
        summary
    }

    pub fn append(&mut self, points: &[Point]) -> usize {
        let (markers, _) = self.place(points);
        self.request_fit(FitKind::Initial);
        markers
    }

    pub fn append_resolved(&mut self, cycle: u64, points: &[Point]) -> bool {
        if cycle != self.cycle {
            debug!(cycle, current = self.cycle, "dropping points resolved for an old cycle");
            return false;
        }
        self.append(points);
        true
    }

    pub fn apply_fetch(&mut self, result: AppResult<Vec<Point>>) -> RefreshSummary {
        match result {
            Ok(points) => self.refresh(&points),
            Err(err) => {
                warn!(?err, "failed to fetch map points");
                self.begin_cycle();
                self.notices.push_back(Notice::fetch_failed(err.notice_text()));
                RefreshSummary {
                    cycle: self.cycle,
                    ..RefreshSummary::default()
                }
            }
        }
    }

    pub async fn refresh_from(
        &mut self,
        fetcher: &dyn PointFetcher,
        context: &FetchContext,
    ) -> RefreshSummary {
        let result = fetcher.fetch_points(context).await;
        let summary = self.apply_fetch(result);
        let pending = self.take_pending_resolution();
        if !pending.is_empty() {
            let resolved = resolve_locations(fetcher, &pending).await;
            self.append_resolved(summary.cycle, &resolved);
        }
        summary
    }

    pub fn take_pending_resolution(&mut self) -> Vec<Point> {
        std::mem::take(&mut self.pending_resolution)
    }

    pub fn handle_thumbnail(&mut self, completion: ThumbnailCompletion) -> ApplyOutcome {
        let outcome = if self.thumbnails.settle(completion.key, completion.token) {
            self.registry.apply_thumbnail(completion, &mut self.surface)
        } else {
            ApplyOutcome::Stale
        };
        match outcome {
            ApplyOutcome::Applied(IconState::Failed) => {
                self.telemetry.record(SyncSignal::ThumbnailFailed)
            }
            ApplyOutcome::Applied(_) => self.telemetry.record(SyncSignal::ThumbnailApplied),
            ApplyOutcome::Stale => {
                self.telemetry.record(SyncSignal::StaleCompletion);
                if cfg!(debug_assertions) {
                    debug!("discarded thumbnail completion for a released marker");
                }
            }
        }
        outcome
    }

    pub fn handle_location(&mut self, event: LocationEvent) -> Option<CameraCommand> {
        let update = self.location.accept(&event)?.clone();
        match update {
            LocationUpdate::Fix(fix) => {
                let position = match LatLng::new(fix.lat, fix.lng) {
                    Ok(position) => position,
                    Err(err) => {
                        warn!(?err, "discarding invalid location fix");
                        return None;
                    }
                };
                self.telemetry.record(SyncSignal::LocationFix);
                self.show_location(position);
                self.bounds.include(position);
                let command = self.request_fit(FitKind::Location);
                if self.location.options().once {
                    self.location.stop();
                }
                command
            }
            LocationUpdate::Error(message) => {
                self.telemetry.record(SyncSignal::LocationError);
                if self.location.should_report_error() {
                    self.notices
                        .push_back(Notice::location_unavailable(&message));
                }
                None
            }
        }
    }

    pub fn start_location(&mut self) -> LocationState {
        self.location.request_permission()
    }

    pub fn on_location_permission(&mut self, granted: bool) -> LocationState {
        match self.location.on_permission_result(granted) {
            Ok(state) => state,
            Err(AppError::PermissionDenied) => {
                self.notices.push_back(Notice::permission_denied());
                self.location.state()
            }
            Err(err) => {
                self.notices
                    .push_back(Notice::location_unavailable(err.notice_text()));
                self.location.state()
            }
        }
    }

    pub fn retry_location_permission(&mut self) -> LocationState {
        self.location.retry_permission()
    }

    pub fn pause(&mut self) -> LocationState {
        self.hide_location();
        self.location.pause()
    }

    pub fn stop_location(&mut self) -> LocationState {
        self.hide_location();
        self.location.stop()
    }

    pub fn resume(&mut self) -> LocationState {
        match self.location.resume() {
            Ok(state) => state,
            Err(err) => {
                self.notices
                    .push_back(Notice::location_unavailable(err.notice_text()));
                self.location.state()
            }
        }
    }

    pub fn teardown(&mut self) {
        self.clear_cycle();
        self.stop_location();
        self.surface_ready = false;
        info!(cycle = self.cycle, "map view torn down");
    }

    /// Issues fits requested before the surface could take camera commands.
    pub fn on_surface_ready(&mut self) -> Vec<CameraCommand> {
        self.surface_ready = true;
        let deferred = std::mem::take(&mut self.deferred_fits);
        [FitKind::Initial, FitKind::Location]
            .into_iter()
            .filter(|kind| deferred.contains(kind))
            .filter_map(|kind| self.request_fit(kind))
            .collect()
    }

    pub fn on_marker_tapped(&self, handle: MarkerHandle) -> Option<PointKey> {
        self.registry.on_marker_tapped(handle).map(Point::key)
    }

    pub fn drain(&mut self, inbox: &mut EngineInbox) -> usize {
        let mut handled = 0;
        while let Ok(completion) = inbox.thumbnails.try_recv() {
            self.handle_thumbnail(completion);
            handled += 1;
        }
        while let Ok(event) = inbox.locations.try_recv() {
            self.handle_location(event);
            handled += 1;
        }
        handled
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn marker_count(&self) -> usize {
        self.registry.len()
    }

    pub fn location_marker(&self) -> Option<MarkerHandle> {
        self.location_marker
    }

    pub fn bounds(&self) -> &BoundsAccumulator {
        &self.bounds
    }

    pub fn gate(&self) -> &FitGate {
        &self.gate
    }

    pub fn location_state(&self) -> LocationState {
        self.location.state()
    }

    pub fn in_flight_thumbnails(&self) -> usize {
        self.thumbnails.in_flight_count()
    }

    pub fn telemetry(&self) -> &SyncTelemetry {
        &self.telemetry
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn begin_cycle(&mut self) {
        self.clear_cycle();
        self.telemetry.record(SyncSignal::Refresh);
    }

    fn clear_cycle(&mut self) {
        self.registry.reset(&mut self.surface, &mut self.thumbnails);
        self.bounds.reset();
        self.gate.reset();
        self.deferred_fits.clear();
        self.pending_resolution.clear();
        self.cycle += 1;
    }

    // The live position marker sits outside the registry and survives refreshes.
    fn show_location(&mut self, position: LatLng) {
        let icon = MarkerIcon::location(position);
        match self.location_marker {
            Some(handle) => {
                self.surface.move_marker(handle, position);
                self.surface.set_icon(handle, &icon);
            }
            None => self.location_marker = Some(self.surface.add_marker(position, &icon)),
        }
    }

    fn hide_location(&mut self) {
        if let Some(handle) = self.location_marker.take() {
            self.surface.remove_marker(handle);
        }
    }

    fn place(&mut self, points: &[Point]) -> (usize, usize) {
        let mut created = 0;
        let mut skipped = 0;
        for point in points {
            match self.registry.upsert(point, &mut self.surface) {
                Some(Upsert::Created(_)) => {
                    created += 1;
                    self.telemetry.record(SyncSignal::MarkerCreated);
                    if let Some(position) = point.position() {
                        self.bounds.include(position);
                    }
                    if let Some(url) = point.thumbnail_url.as_deref() {
                        let token = self.thumbnails.request(point.key(), url);
                        self.registry.attach_request(point.key(), token);
                    }
                }
                Some(Upsert::Existing(_)) => {
                    debug!(point = %point.key(), "point already on map");
                }
                None => {
                    skipped += 1;
                    self.telemetry.record(SyncSignal::PointSkipped);
                    if point.needs_resolution() {
                        self.pending_resolution.push(point.clone());
                    } else {
                        debug!(point = %point.key(), "point has no coordinates");
                    }
                }
            }
        }
        (created, skipped)
    }

    fn request_fit(&mut self, kind: FitKind) -> Option<CameraCommand> {
        if !self.surface_ready {
            if !self.gate.is_latched(kind) && !self.deferred_fits.contains(&kind) {
                self.deferred_fits.push(kind);
            }
            return None;
        }
        let command = self
            .camera
            .request_fit(kind, &self.bounds, &mut self.gate, &mut self.surface)?;
        self.telemetry.record(SyncSignal::Fit(kind));
        debug!(?kind, ?command, "camera fit issued");
        Some(command)
    }
}
