use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(pub i64);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Scenic,
    Product,
    OrderItem,
}

impl PointKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            PointKind::Scenic => "scenic",
            PointKind::Product => "product",
            PointKind::OrderItem => "order_item",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointKey {
    pub kind: PointKind,
    pub id: PointId,
}

impl PointKey {
    pub fn new(kind: PointKind, id: i64) -> Self {
        Self {
            kind,
            id: PointId(id),
        }
    }

    pub fn scenic(id: i64) -> Self {
        Self::new(PointKind::Scenic, id)
    }

    pub fn product(id: i64) -> Self {
        Self::new(PointKind::Product, id)
    }

    pub fn order_item(id: i64) -> Self {
        Self::new(PointKind::OrderItem, id)
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_tag(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> AppResult<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        if valid {
            Ok(Self { lat, lng })
        } else {
            Err(AppError::InvalidCoordinate { lat, lng })
        }
    }

    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Self::new(lat, lng).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub kind: PointKind,
    pub title: String,
    pub snippet: Option<String>,
    pub position: Option<LatLng>,
    pub thumbnail_url: Option<String>,
    pub location_ref: Option<PointKey>,
}

impl Point {
    pub fn new(kind: PointKind, id: i64, title: impl Into<String>) -> Self {
        Self {
            id: PointId(id),
            kind,
            title: title.into(),
            snippet: None,
            position: None,
            thumbnail_url: None,
            location_ref: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = non_empty(snippet.into());
        self
    }

    pub fn with_position(mut self, lat: f64, lng: f64) -> Self {
        self.position = LatLng::from_parts(Some(lat), Some(lng));
        self
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = non_empty(url.into());
        self
    }

    pub fn with_location_ref(mut self, key: PointKey) -> Self {
        self.location_ref = Some(key);
        self
    }

    pub fn key(&self) -> PointKey {
        PointKey {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn position(&self) -> Option<LatLng> {
        self.position
    }

    pub fn is_mappable(&self) -> bool {
        self.position.is_some()
    }

    pub fn needs_resolution(&self) -> bool {
        self.position.is_none() && self.location_ref.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchContext {
    MapOverview,
    Nearby { keyword: Option<String> },
    Order { order_id: i64 },
    Detail(PointKey),
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
