use serde::Serialize;

use crate::model::LatLng;

// Antimeridian wrapping is left to the map surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoRegion {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoRegion {
    pub fn around(point: LatLng) -> Self {
        Self {
            south: point.lat,
            west: point.lng,
            north: point.lat,
            east: point.lng,
        }
    }

    pub fn extend(&mut self, point: LatLng) {
        self.south = self.south.min(point.lat);
        self.north = self.north.max(point.lat);
        self.west = self.west.min(point.lng);
        self.east = self.east.max(point.lng);
    }

    pub fn contains(&self, point: LatLng) -> bool {
        (self.south..=self.north).contains(&point.lat)
            && (self.west..=self.east).contains(&point.lng)
    }

    pub fn center(&self) -> LatLng {
        LatLng {
            lat: (self.south + self.north) / 2.0,
            lng: (self.west + self.east) / 2.0,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.south == self.north && self.west == self.east
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoundsAccumulator {
    count: usize,
    last_point: Option<LatLng>,
    region: Option<GeoRegion>,
}

impl BoundsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_point = None;
        self.region = None;
    }

    pub fn include(&mut self, point: LatLng) {
        self.count += 1;
        self.last_point = Some(point);
        match self.region.as_mut() {
            Some(region) => region.extend(point),
            None => self.region = Some(GeoRegion::around(point)),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn last_point(&self) -> Option<LatLng> {
        self.last_point
    }

    pub fn region_snapshot(&self) -> Option<GeoRegion> {
        self.region
    }
}
