use serde::Serialize;

use crate::bounds::{BoundsAccumulator, GeoRegion};
use crate::config::AppConfig;
use crate::model::LatLng;
use crate::surface::MapSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitKind {
    Initial,
    Location,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitGate {
    fitted_initial: bool,
    fitted_location: bool,
}

impl FitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.fitted_initial = false;
        self.fitted_location = false;
    }

    pub fn is_latched(&self, kind: FitKind) -> bool {
        match kind {
            FitKind::Initial => self.fitted_initial,
            FitKind::Location => self.fitted_location,
        }
    }

    fn latch(&mut self, kind: FitKind) {
        match kind {
            FitKind::Initial => self.fitted_initial = true,
            FitKind::Location => self.fitted_location = true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CameraCommand {
    CenterOn { target: LatLng, zoom: f32 },
    FitBounds { region: GeoRegion, padding_px: u32 },
}

impl CameraCommand {
    pub fn issue(&self, surface: &mut dyn MapSurface) {
        match self {
            CameraCommand::CenterOn { target, zoom } => {
                surface.move_camera_to_point(*target, *zoom)
            }
            CameraCommand::FitBounds { region, padding_px } => {
                surface.move_camera_to_bounds(region, *padding_px)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFitController {
    single_point_zoom: f32,
    location_zoom: f32,
    padding_px: u32,
}

impl CameraFitController {
    pub fn new(single_point_zoom: f32, location_zoom: f32, padding_px: u32) -> Self {
        Self {
            single_point_zoom,
            location_zoom,
            padding_px,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.single_point_zoom,
            config.location_zoom,
            config.bounds_padding_px,
        )
    }

    fn close_zoom(&self, kind: FitKind) -> f32 {
        match kind {
            FitKind::Initial => self.single_point_zoom,
            FitKind::Location => self.location_zoom,
        }
    }

    pub fn plan(&self, kind: FitKind, bounds: &BoundsAccumulator) -> Option<CameraCommand> {
        match bounds.count() {
            0 => None,
            1 => bounds.last_point().map(|target| CameraCommand::CenterOn {
                target,
                zoom: self.close_zoom(kind),
            }),
            _ => match bounds.region_snapshot() {
                // Identical coordinates cannot be framed as bounds.
                Some(region) if region.is_degenerate() => Some(CameraCommand::CenterOn {
                    target: region.center(),
                    zoom: self.close_zoom(kind),
                }),
                Some(region) => Some(CameraCommand::FitBounds {
                    region,
                    padding_px: self.padding_px,
                }),
                None => None,
            },
        }
    }

    pub fn request_fit(
        &self,
        kind: FitKind,
        bounds: &BoundsAccumulator,
        gate: &mut FitGate,
        surface: &mut dyn MapSurface,
    ) -> Option<CameraCommand> {
        if gate.is_latched(kind) {
            return None;
        }
        let command = self.plan(kind, bounds)?;
        command.issue(surface);
        gate.latch(kind);
        Some(command)
    }
}
