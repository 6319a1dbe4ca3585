use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::{EngineInbox, MapSyncEngine, RefreshSummary};
use crate::fetcher::{resolve_locations, PointFetcher};
use crate::model::FetchContext;
use crate::surface::MapSurface;

// The lock is held per operation and never across an await.
pub struct SharedMapSync<S: MapSurface> {
    engine: Arc<Mutex<MapSyncEngine<S>>>,
    refresh_seq: Arc<AtomicU64>,
}

impl<S: MapSurface> Clone for SharedMapSync<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            refresh_seq: Arc::clone(&self.refresh_seq),
        }
    }
}

impl<S: MapSurface + Send + 'static> SharedMapSync<S> {
    pub fn new(engine: MapSyncEngine<S>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            refresh_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MapSyncEngine<S>) -> R) -> R {
        let mut engine = self.engine.lock();
        f(&mut engine)
    }

    /// Fetches outside the lock. Returns `None` when the view moved on while
    /// fetching: a newer refresh, a direct refresh or a teardown.
    pub async fn refresh_from(
        &self,
        fetcher: Arc<dyn PointFetcher>,
        context: FetchContext,
    ) -> Option<RefreshSummary> {
        let (ticket, cycle) = {
            let engine = self.engine.lock();
            (self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1, engine.cycle())
        };
        let result = fetcher.fetch_points(&context).await;

        let (summary, pending) = {
            let mut engine = self.engine.lock();
            if self.refresh_seq.load(Ordering::SeqCst) != ticket || engine.cycle() != cycle {
                debug!(ticket, cycle, current = engine.cycle(), "discarding superseded refresh");
                return None;
            }
            let summary = engine.apply_fetch(result);
            (summary, engine.take_pending_resolution())
        };

        if !pending.is_empty() {
            let resolved = resolve_locations(fetcher.as_ref(), &pending).await;
            self.engine.lock().append_resolved(summary.cycle, &resolved);
        }
        Some(summary)
    }

    pub fn spawn_pump(&self, mut inbox: EngineInbox) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut thumbnails_open = true;
            let mut locations_open = true;
            while thumbnails_open || locations_open {
                tokio::select! {
                    completion = inbox.thumbnails.recv(), if thumbnails_open => match completion {
                        Some(completion) => {
                            engine.lock().handle_thumbnail(completion);
                        }
                        None => thumbnails_open = false,
                    },
                    event = inbox.locations.recv(), if locations_open => match event {
                        Some(event) => {
                            engine.lock().handle_location(event);
                        }
                        None => locations_open = false,
                    },
                }
            }
            debug!("map sync pump stopped");
        })
    }
}
