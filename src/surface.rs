use std::collections::HashMap;

use serde::Serialize;

use crate::bounds::GeoRegion;
use crate::model::LatLng;
use crate::thumbnails::Thumbnail;

pub const DEFAULT_MARKER_TITLE: &str = "Scenic spot";
pub const LOCATION_MARKER_TITLE: &str = "My location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarkerHandle(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerIcon {
    Placeholder { title: String },
    Thumbnail { title: String, image: Thumbnail },
    Fallback { title: String },
    Location { snippet: String },
}

impl MarkerIcon {
    pub fn placeholder(title: &str) -> Self {
        Self::Placeholder {
            title: marker_title(title),
        }
    }

    pub fn thumbnail(title: &str, image: Thumbnail) -> Self {
        Self::Thumbnail {
            title: marker_title(title),
            image,
        }
    }

    pub fn fallback(title: &str) -> Self {
        Self::Fallback {
            title: marker_title(title),
        }
    }

    pub fn location(position: LatLng) -> Self {
        Self::Location {
            snippet: format!("{:.6}, {:.6}", position.lat, position.lng),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Placeholder { title }
            | Self::Thumbnail { title, .. }
            | Self::Fallback { title } => title,
            Self::Location { .. } => LOCATION_MARKER_TITLE,
        }
    }

    pub fn snippet(&self) -> Option<&str> {
        match self {
            Self::Location { snippet } => Some(snippet),
            _ => None,
        }
    }

    pub fn state(&self) -> IconState {
        match self {
            Self::Placeholder { .. } => IconState::Placeholder,
            Self::Thumbnail { .. } => IconState::Loaded,
            Self::Fallback { .. } => IconState::Failed,
            Self::Location { .. } => IconState::Location,
        }
    }
}

fn marker_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        DEFAULT_MARKER_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IconState {
    Placeholder,
    Loaded,
    Failed,
    Location,
}

pub trait MapSurface {
    fn add_marker(&mut self, position: LatLng, icon: &MarkerIcon) -> MarkerHandle;
    fn set_icon(&mut self, handle: MarkerHandle, icon: &MarkerIcon);
    fn move_marker(&mut self, handle: MarkerHandle, position: LatLng);
    fn remove_marker(&mut self, handle: MarkerHandle);
    fn move_camera_to_point(&mut self, target: LatLng, zoom: f32);
    fn move_camera_to_bounds(&mut self, region: &GeoRegion, padding_px: u32);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCommand {
    AddMarker {
        handle: MarkerHandle,
        position: LatLng,
        title: String,
    },
    SetIcon {
        handle: MarkerHandle,
        state: IconState,
    },
    MoveMarker {
        handle: MarkerHandle,
        position: LatLng,
    },
    RemoveMarker {
        handle: MarkerHandle,
    },
    CameraToPoint {
        target: LatLng,
        zoom: f32,
    },
    CameraToBounds {
        region: GeoRegion,
        padding_px: u32,
    },
}

impl SurfaceCommand {
    pub fn is_camera(&self) -> bool {
        matches!(
            self,
            SurfaceCommand::CameraToPoint { .. } | SurfaceCommand::CameraToBounds { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessMarker {
    pub position: LatLng,
    pub icon: MarkerIcon,
}

// Map surface without a renderer; records every command it receives.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    next_handle: u64,
    markers: HashMap<MarkerHandle, HeadlessMarker>,
    commands: Vec<SurfaceCommand>,
    orphan_writes: usize,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[SurfaceCommand] {
        &self.commands
    }

    pub fn camera_commands(&self) -> Vec<&SurfaceCommand> {
        self.commands.iter().filter(|cmd| cmd.is_camera()).collect()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn marker(&self, handle: MarkerHandle) -> Option<&HeadlessMarker> {
        self.markers.get(&handle)
    }

    pub fn icon_of(&self, handle: MarkerHandle) -> Option<IconState> {
        self.markers.get(&handle).map(|m| m.icon.state())
    }

    // Writes addressed to handles that are no longer on the map.
    pub fn orphan_writes(&self) -> usize {
        self.orphan_writes
    }
}

impl MapSurface for HeadlessSurface {
    fn add_marker(&mut self, position: LatLng, icon: &MarkerIcon) -> MarkerHandle {
        self.next_handle += 1;
        let handle = MarkerHandle(self.next_handle);
        self.markers.insert(
            handle,
            HeadlessMarker {
                position,
                icon: icon.clone(),
            },
        );
        self.commands.push(SurfaceCommand::AddMarker {
            handle,
            position,
            title: icon.title().to_string(),
        });
        handle
    }

    fn set_icon(&mut self, handle: MarkerHandle, icon: &MarkerIcon) {
        match self.markers.get_mut(&handle) {
            Some(marker) => {
                marker.icon = icon.clone();
                self.commands.push(SurfaceCommand::SetIcon {
                    handle,
                    state: icon.state(),
                });
            }
            None => self.orphan_writes += 1,
        }
    }

    fn move_marker(&mut self, handle: MarkerHandle, position: LatLng) {
        match self.markers.get_mut(&handle) {
            Some(marker) => {
                marker.position = position;
                self.commands.push(SurfaceCommand::MoveMarker { handle, position });
            }
            None => self.orphan_writes += 1,
        }
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        if self.markers.remove(&handle).is_some() {
            self.commands.push(SurfaceCommand::RemoveMarker { handle });
        } else {
            self.orphan_writes += 1;
        }
    }

    fn move_camera_to_point(&mut self, target: LatLng, zoom: f32) {
        self.commands.push(SurfaceCommand::CameraToPoint { target, zoom });
    }

    fn move_camera_to_bounds(&mut self, region: &GeoRegion, padding_px: u32) {
        self.commands.push(SurfaceCommand::CameraToBounds {
            region: *region,
            padding_px,
        });
    }
}
