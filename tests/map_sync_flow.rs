use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httptest::matchers::request;
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::timeout;

use travel_map_sync::{
    init_tracing, AppConfig, AppResult, ApplyOutcome, CameraCommand, EngineInbox, FetchContext,
    FitKind, HeadlessSurface, HttpPointFetcher, IconState, LocationOptions, LocationProvider,
    LocationSink, LocationState, MapSyncEngine, MarkerHandle, NoticeKind, Point, PointKey,
    PointKind, RequestToken, SurfaceCommand, Thumbnail, ThumbnailCompletion, ThumbnailLoader,
};

#[derive(Clone, Default)]
struct ManualProvider {
    sink: Arc<Mutex<Option<LocationSink>>>,
}

impl ManualProvider {
    fn sink(&self) -> LocationSink {
        self.sink.lock().clone().expect("provider started")
    }
}

impl LocationProvider for ManualProvider {
    fn start(&mut self, _options: &LocationOptions, sink: LocationSink) -> AppResult<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {}
}

// Holds every load until the test releases it.
struct GatedLoader {
    gate: Arc<Notify>,
}

#[async_trait]
impl ThumbnailLoader for GatedLoader {
    async fn load(&self, url: &str) -> AppResult<Thumbnail> {
        self.gate.notified().await;
        Ok(Thumbnail {
            url: url.to_string(),
            content_type: Some("image/png".into()),
            bytes: Arc::from(vec![9_u8; 4]),
        })
    }
}

fn config_for(server: &Server) -> AppConfig {
    AppConfig {
        api_base_url: server.url("/").to_string(),
        ..AppConfig::default()
    }
}

fn ready_engine(
    config: &AppConfig,
    loader: Arc<dyn ThumbnailLoader>,
    provider: ManualProvider,
) -> (MapSyncEngine<HeadlessSurface>, EngineInbox) {
    init_tracing();
    let (mut engine, inbox) = MapSyncEngine::new(
        HeadlessSurface::new(),
        config,
        loader,
        Box::new(provider),
        Handle::current(),
    );
    engine.on_surface_ready();
    (engine, inbox)
}

fn marker_handle(engine: &MapSyncEngine<HeadlessSurface>, title: &str) -> MarkerHandle {
    engine
        .surface()
        .commands()
        .iter()
        .rev()
        .find_map(|cmd| match cmd {
            SurfaceCommand::AddMarker { handle, title: t, .. } if t == title => Some(*handle),
            _ => None,
        })
        .expect("marker added")
}

#[tokio::test]
async fn overview_places_markers_fits_bounds_and_patches_thumbnails() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/api/scenics/map")).respond_with(
            json_encoded(json!({
                "code": 200,
                "msg": "OK",
                "data": [
                    {"id": 1, "name": "West Lake", "latitude": 30.24, "longitude": 120.14, "cover_image": "a.jpg"},
                    {"id": 2, "name": "Lingyin Temple", "latitude": 30.24, "longitude": 120.10, "cover_image": "b.jpg"},
                    {"id": 3, "name": "Leifeng Pagoda", "latitude": 30.23, "longitude": 120.15, "cover_image": ""},
                    {"id": 4, "name": "Unmapped", "latitude": null, "longitude": null, "cover_image": "c.jpg"}
                ]
            })),
        ),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/a.jpg")).respond_with(
            status_code(200)
                .append_header("content-type", "image/jpeg")
                .body(vec![1_u8; 32]),
        ),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/b.jpg"))
            .respond_with(status_code(404)),
    );

    let config = config_for(&server);
    let fetcher = HttpPointFetcher::new(&config).unwrap();
    init_tracing();
    let (mut engine, mut inbox) = MapSyncEngine::from_config(
        HeadlessSurface::new(),
        &config,
        Box::new(ManualProvider::default()),
        Handle::current(),
    )
    .unwrap();
    engine.on_surface_ready();

    let summary = engine
        .refresh_from(&fetcher, &FetchContext::MapOverview)
        .await;

    assert_eq!(summary.markers, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(engine.marker_count(), 3);
    assert_eq!(engine.bounds().count(), 3);
    let cameras = engine.surface().camera_commands();
    assert_eq!(cameras.len(), 1);
    assert!(matches!(
        cameras[0],
        SurfaceCommand::CameraToBounds { padding_px: 80, .. }
    ));
    assert_eq!(engine.in_flight_thumbnails(), 2);

    for _ in 0..2 {
        let completion = timeout(Duration::from_secs(5), inbox.thumbnails.recv())
            .await
            .expect("thumbnail completion")
            .expect("channel open");
        assert!(matches!(
            engine.handle_thumbnail(completion),
            ApplyOutcome::Applied(_)
        ));
    }

    let lake = marker_handle(&engine, "West Lake");
    let temple = marker_handle(&engine, "Lingyin Temple");
    assert_eq!(engine.surface().icon_of(lake), Some(IconState::Loaded));
    assert_eq!(engine.surface().icon_of(temple), Some(IconState::Failed));

    let stats = engine.telemetry().snapshot();
    assert_eq!(stats.thumbnails_applied, 1);
    assert_eq!(stats.thumbnails_failed, 1);
    assert_eq!(stats.fits_initial, 1);
    assert!(engine.take_notices().is_empty());
}

#[tokio::test]
async fn single_detail_point_centers_at_close_zoom() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/api/scenics/12")).respond_with(
            json_encoded(json!({
                "code": 200,
                "msg": "OK",
                "data": {"id": 12, "name": "Bund", "address": "Zhongshan Rd", "latitude": 31.24, "longitude": 121.49}
            })),
        ),
    );

    let config = config_for(&server);
    let fetcher = HttpPointFetcher::new(&config).unwrap();
    let gate = Arc::new(Notify::new());
    let (mut engine, _inbox) =
        ready_engine(&config, Arc::new(GatedLoader { gate }), ManualProvider::default());

    engine
        .refresh_from(&fetcher, &FetchContext::Detail(PointKey::scenic(12)))
        .await;

    assert_eq!(engine.marker_count(), 1);
    assert_eq!(engine.bounds().count(), 1);
    assert!(matches!(
        engine.surface().camera_commands().as_slice(),
        [SurfaceCommand::CameraToPoint { zoom, .. }] if *zoom == 13.0
    ));
}

#[tokio::test]
async fn first_location_fix_fits_once_after_initial() {
    let provider = ManualProvider::default();
    let gate = Arc::new(Notify::new());
    let (mut engine, mut inbox) = ready_engine(
        &AppConfig::default(),
        Arc::new(GatedLoader { gate }),
        provider.clone(),
    );

    engine.refresh(&[
        Point::new(PointKind::Scenic, 1, "A").with_position(30.0, 120.0),
        Point::new(PointKind::Scenic, 2, "B").with_position(30.5, 120.5),
    ]);
    assert!(engine.gate().is_latched(FitKind::Initial));

    engine.start_location();
    assert_eq!(engine.on_location_permission(true), LocationState::Active);
    let sink = provider.sink();

    sink.fix(31.0, 121.0, Some(8.0));
    let first = inbox.locations.recv().await.unwrap();
    let command = engine.handle_location(first);
    assert!(matches!(command, Some(CameraCommand::FitBounds { .. })));
    assert_eq!(engine.bounds().count(), 3);
    assert!(engine.location_marker().is_some());

    sink.fix(31.1, 121.1, Some(8.0));
    let second = inbox.locations.recv().await.unwrap();
    assert!(engine.handle_location(second).is_none());
    assert_eq!(engine.bounds().count(), 4);

    assert_eq!(engine.surface().camera_commands().len(), 2);
    let stats = engine.telemetry().snapshot();
    assert_eq!(stats.fits_initial, 1);
    assert_eq!(stats.fits_location, 1);
}

#[tokio::test]
async fn fixes_after_pause_are_ignored() {
    let provider = ManualProvider::default();
    let gate = Arc::new(Notify::new());
    let (mut engine, mut inbox) = ready_engine(
        &AppConfig::default(),
        Arc::new(GatedLoader { gate }),
        provider.clone(),
    );
    engine.refresh(&[Point::new(PointKind::Scenic, 1, "A").with_position(30.0, 120.0)]);
    engine.start_location();
    engine.on_location_permission(true);
    let sink = provider.sink();

    assert_eq!(engine.pause(), LocationState::Paused);
    sink.fix(31.0, 121.0, None);
    engine.drain(&mut inbox);

    assert_eq!(engine.bounds().count(), 1);
    assert!(!engine.gate().is_latched(FitKind::Location));
}

#[tokio::test]
async fn new_cycle_discards_previous_cycle_thumbnails() {
    let gate = Arc::new(Notify::new());
    let (mut engine, mut inbox) = ready_engine(
        &AppConfig::default(),
        Arc::new(GatedLoader { gate: gate.clone() }),
        ManualProvider::default(),
    );
    let marker = Point::new(PointKind::Scenic, 1, "M")
        .with_position(30.0, 120.0)
        .with_thumbnail("http://img/m.png");

    engine.refresh(&[marker.clone()]);
    assert_eq!(engine.in_flight_thumbnails(), 1);
    let first_cycle_token = RequestToken(1);

    engine.refresh(&[
        marker.clone(),
        Point::new(PointKind::Scenic, 2, "N").with_position(31.0, 121.0),
    ]);
    assert_eq!(engine.in_flight_thumbnails(), 1);
    let handle = engine.surface().commands().iter().rev().find_map(|cmd| match cmd {
        SurfaceCommand::AddMarker { handle, title, .. } if title == "M" => Some(*handle),
        _ => None,
    });
    let handle = handle.unwrap();

    let late = ThumbnailCompletion {
        key: marker.key(),
        token: first_cycle_token,
        result: Ok(Thumbnail {
            url: "http://img/m.png".into(),
            content_type: None,
            bytes: Arc::from(vec![0_u8; 4]),
        }),
    };
    assert_eq!(engine.handle_thumbnail(late), ApplyOutcome::Stale);
    assert_eq!(engine.surface().icon_of(handle), Some(IconState::Placeholder));
    assert_eq!(engine.surface().orphan_writes(), 0);

    gate.notify_waiters();
    gate.notify_one();
    let current = timeout(Duration::from_secs(5), inbox.thumbnails.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.handle_thumbnail(current), ApplyOutcome::Applied(IconState::Loaded));
    assert_eq!(engine.surface().icon_of(handle), Some(IconState::Loaded));
    assert_eq!(engine.telemetry().snapshot().stale_completions, 1);
}

#[tokio::test]
async fn teardown_releases_markers_and_drops_late_work() {
    let provider = ManualProvider::default();
    let gate = Arc::new(Notify::new());
    let (mut engine, mut inbox) = ready_engine(
        &AppConfig::default(),
        Arc::new(GatedLoader { gate: gate.clone() }),
        provider.clone(),
    );
    engine.refresh(&[Point::new(PointKind::Scenic, 1, "A")
        .with_position(30.0, 120.0)
        .with_thumbnail("http://img/a.png")]);
    engine.start_location();
    engine.on_location_permission(true);
    let sink = provider.sink();

    engine.teardown();
    gate.notify_waiters();
    sink.fix(30.0, 120.0, None);
    tokio::task::yield_now().await;
    engine.drain(&mut inbox);

    assert_eq!(engine.marker_count(), 0);
    assert_eq!(engine.surface().marker_count(), 0);
    assert_eq!(engine.surface().orphan_writes(), 0);
    assert_eq!(engine.bounds().count(), 0);
    assert_eq!(engine.location_state(), LocationState::Stopped);
    assert_eq!(engine.in_flight_thumbnails(), 0);
}

#[tokio::test]
async fn order_items_without_coordinates_are_resolved_and_fitted() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/api/orders/31")).respond_with(
            json_encoded(json!({
                "code": 200,
                "msg": "OK",
                "data": {
                    "order": {"id": 31, "status": "PAID"},
                    "items": [
                        {"product_id": 5, "name": "Lake Ticket", "scenic_id": 1, "quantity": 2, "price": 80.0, "type": "TICKET"},
                        {"product_id": 6, "name": "Boat Ride", "scenic_id": 1, "quantity": 1, "price": 55.0, "type": "TRAVEL"}
                    ]
                }
            })),
        ),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/api/scenics/1")).respond_with(
            json_encoded(json!({
                "code": 200,
                "msg": "OK",
                "data": {"id": 1, "name": "West Lake", "latitude": 30.24, "longitude": 120.14}
            })),
        ),
    );

    let config = config_for(&server);
    let fetcher = HttpPointFetcher::new(&config).unwrap();
    let gate = Arc::new(Notify::new());
    let (mut engine, _inbox) =
        ready_engine(&config, Arc::new(GatedLoader { gate }), ManualProvider::default());

    let summary = engine
        .refresh_from(&fetcher, &FetchContext::Order { order_id: 31 })
        .await;

    assert_eq!(summary.markers, 0);
    assert_eq!(summary.unresolved, 2);
    assert_eq!(engine.marker_count(), 2);
    assert_eq!(engine.bounds().count(), 2);
    assert_eq!(engine.surface().camera_commands().len(), 1);
    assert!(engine.gate().is_latched(FitKind::Initial));

    let handle = marker_handle(&engine, "Lake Ticket");
    assert_eq!(engine.on_marker_tapped(handle), Some(PointKey::order_item(5)));
}

#[tokio::test]
async fn fetch_failure_shows_notice_and_keeps_camera_still() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/api/scenics"))
            .times(3)
            .respond_with(status_code(503)),
    );

    let config = config_for(&server);
    let fetcher = HttpPointFetcher::new(&config).unwrap();
    let gate = Arc::new(Notify::new());
    let (mut engine, _inbox) =
        ready_engine(&config, Arc::new(GatedLoader { gate }), ManualProvider::default());

    let summary = engine
        .refresh_from(&fetcher, &FetchContext::Nearby { keyword: None })
        .await;

    assert_eq!(summary.markers, 0);
    assert_eq!(engine.bounds().count(), 0);
    assert!(engine.surface().camera_commands().is_empty());
    let notices = engine.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::FetchFailed);
}
