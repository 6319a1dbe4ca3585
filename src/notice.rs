use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    FetchFailed,
    LocationUnavailable,
    PermissionDenied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn fetch_failed(detail: impl AsRef<str>) -> Self {
        Self {
            kind: NoticeKind::FetchFailed,
            message: format!("Failed to load map points: {}", detail.as_ref()),
        }
    }

    pub fn location_unavailable(detail: impl AsRef<str>) -> Self {
        Self {
            kind: NoticeKind::LocationUnavailable,
            message: format!("Unable to get current location: {}", detail.as_ref()),
        }
    }

    pub fn permission_denied() -> Self {
        Self {
            kind: NoticeKind::PermissionDenied,
            message: "Location permission is required to show your position".to_string(),
        }
    }
}
