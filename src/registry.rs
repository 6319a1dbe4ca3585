use std::collections::HashMap;

use tracing::{debug, warn};

use crate::model::{Point, PointKey};
use crate::surface::{IconState, MapSurface, MarkerHandle, MarkerIcon};
use crate::thumbnails::{RequestToken, ThumbnailCompletion, ThumbnailDispatcher};

#[derive(Debug, Clone)]
struct MarkerEntry {
    handle: MarkerHandle,
    point: Point,
    icon: IconState,
    request: Option<RequestToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created(MarkerHandle),
    Existing(MarkerHandle),
}

impl Upsert {
    pub fn handle(&self) -> MarkerHandle {
        match self {
            Upsert::Created(handle) | Upsert::Existing(handle) => *handle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(IconState),
    Stale,
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    entries: HashMap<PointKey, MarkerEntry>,
    by_handle: HashMap<MarkerHandle, PointKey>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(
        &mut self,
        surface: &mut dyn MapSurface,
        thumbnails: &mut ThumbnailDispatcher,
    ) -> usize {
        let cancelled = thumbnails.cancel_all();
        let removed = self.entries.len();
        for (_, entry) in self.entries.drain() {
            surface.remove_marker(entry.handle);
        }
        self.by_handle.clear();
        if removed > 0 || cancelled > 0 {
            debug!(removed, cancelled, "marker registry reset");
        }
        removed
    }

    pub fn upsert(&mut self, point: &Point, surface: &mut dyn MapSurface) -> Option<Upsert> {
        let key = point.key();
        if let Some(entry) = self.entries.get(&key) {
            return Some(Upsert::Existing(entry.handle));
        }
        let position = point.position()?;
        let handle = surface.add_marker(position, &MarkerIcon::placeholder(&point.title));
        self.by_handle.insert(handle, key);
        self.entries.insert(
            key,
            MarkerEntry {
                handle,
                point: point.clone(),
                icon: IconState::Placeholder,
                request: None,
            },
        );
        Some(Upsert::Created(handle))
    }

    pub fn attach_request(&mut self, key: PointKey, token: RequestToken) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.request = Some(token);
                true
            }
            None => false,
        }
    }

    // Completions for removed markers or superseded requests are dropped.
    pub fn apply_thumbnail(
        &mut self,
        completion: ThumbnailCompletion,
        surface: &mut dyn MapSurface,
    ) -> ApplyOutcome {
        let ThumbnailCompletion { key, token, result } = completion;
        let Some(entry) = self.entries.get_mut(&key) else {
            return ApplyOutcome::Stale;
        };
        if entry.request != Some(token) {
            return ApplyOutcome::Stale;
        }
        entry.request = None;

        let icon = match result {
            Ok(image) => MarkerIcon::thumbnail(&entry.point.title, image),
            Err(err) => {
                warn!(?err, point = %key, "thumbnail failed; using fallback icon");
                MarkerIcon::fallback(&entry.point.title)
            }
        };
        entry.icon = icon.state();
        surface.set_icon(entry.handle, &icon);
        ApplyOutcome::Applied(entry.icon)
    }

    pub fn on_marker_tapped(&self, handle: MarkerHandle) -> Option<&Point> {
        let key = self.by_handle.get(&handle)?;
        self.entries.get(key).map(|entry| &entry.point)
    }

    pub fn handle_of(&self, key: PointKey) -> Option<MarkerHandle> {
        self.entries.get(&key).map(|entry| entry.handle)
    }

    pub fn icon_state(&self, key: PointKey) -> Option<IconState> {
        self.entries.get(&key).map(|entry| entry.icon)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
