mod bounds;
mod camera;
mod config;
mod engine;
mod errors;
mod fetcher;
mod location;
mod model;
mod notice;
mod registry;
mod shared;
mod surface;
mod telemetry;
mod thumbnails;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use bounds::{BoundsAccumulator, GeoRegion};
pub use camera::{CameraCommand, CameraFitController, FitGate, FitKind};
pub use config::{
    AppConfig, PublicAppConfig, DEFAULT_BOUNDS_PADDING_PX, DEFAULT_LOCATION_ZOOM,
    DEFAULT_SINGLE_POINT_ZOOM,
};
pub use engine::{EngineInbox, MapSyncEngine, RefreshSummary};
pub use errors::{AppError, AppResult};
pub use fetcher::{resolve_locations, HttpPointFetcher, PointFetcher};
pub use location::{
    LocationCoordinator, LocationEvent, LocationFix, LocationOptions, LocationProvider,
    LocationSink, LocationState, LocationUpdate,
};
pub use model::{FetchContext, LatLng, Point, PointId, PointKey, PointKind};
pub use notice::{Notice, NoticeKind};
pub use registry::{ApplyOutcome, MarkerRegistry, Upsert};
pub use shared::SharedMapSync;
pub use surface::{
    HeadlessMarker, HeadlessSurface, IconState, MapSurface, MarkerHandle, MarkerIcon,
    SurfaceCommand, DEFAULT_MARKER_TITLE, LOCATION_MARKER_TITLE,
};
pub use telemetry::{SyncSignal, SyncStats, SyncTelemetry};
pub use thumbnails::{
    HttpThumbnailLoader, RequestToken, Thumbnail, ThumbnailCompletion, ThumbnailDispatcher,
    ThumbnailLoader,
};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,travel_map_sync=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
