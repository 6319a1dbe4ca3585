use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_BASE: &str = "http://10.0.2.2:5001/";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BOUNDS_PADDING_PX: u32 = 80;
pub const DEFAULT_SINGLE_POINT_ZOOM: f32 = 13.0;
pub const DEFAULT_LOCATION_ZOOM: f32 = 16.0;
const DEFAULT_LOCATION_INTERVAL_MS: u64 = 2_000;
const DEFAULT_THUMBNAIL_MAX_CONCURRENCY: usize = 4;
const DEFAULT_THUMBNAIL_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_THUMBNAIL_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_token: Option<SecretString>,
    pub request_timeout_ms: u64,
    pub bounds_padding_px: u32,
    pub single_point_zoom: f32,
    pub location_zoom: f32,
    pub location_interval_ms: u64,
    pub location_high_accuracy: bool,
    pub location_once: bool,
    pub thumbnail_max_concurrency: usize,
    pub thumbnail_max_bytes: u64,
    pub thumbnail_timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub api_base_url: String,
    pub has_api_token: bool,
    pub request_timeout_ms: u64,
    pub bounds_padding_px: u32,
    pub single_point_zoom: f32,
    pub location_zoom: f32,
    pub location_interval_ms: u64,
    pub location_high_accuracy: bool,
    pub location_once: bool,
    pub thumbnail_max_concurrency: usize,
    pub thumbnail_max_bytes: u64,
    pub thumbnail_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            api_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            bounds_padding_px: DEFAULT_BOUNDS_PADDING_PX,
            single_point_zoom: DEFAULT_SINGLE_POINT_ZOOM,
            location_zoom: DEFAULT_LOCATION_ZOOM,
            location_interval_ms: DEFAULT_LOCATION_INTERVAL_MS,
            location_high_accuracy: true,
            location_once: false,
            thumbnail_max_concurrency: DEFAULT_THUMBNAIL_MAX_CONCURRENCY,
            thumbnail_max_bytes: DEFAULT_THUMBNAIL_MAX_BYTES,
            thumbnail_timeout_ms: DEFAULT_THUMBNAIL_TIMEOUT_MS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            api_base_url: env::var("TRAVEL_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_token: env::var("TRAVEL_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            request_timeout_ms: parse_u64("TRAVEL_API_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            bounds_padding_px: parse_u32("MAP_BOUNDS_PADDING_PX", DEFAULT_BOUNDS_PADDING_PX),
            single_point_zoom: parse_f32("MAP_SINGLE_POINT_ZOOM", DEFAULT_SINGLE_POINT_ZOOM),
            location_zoom: parse_f32("MAP_LOCATION_ZOOM", DEFAULT_LOCATION_ZOOM),
            location_interval_ms: parse_u64(
                "LOCATION_INTERVAL_MS",
                DEFAULT_LOCATION_INTERVAL_MS,
            )
            .max(100),
            location_high_accuracy: parse_bool("LOCATION_HIGH_ACCURACY", true),
            location_once: parse_bool("LOCATION_ONCE", false),
            thumbnail_max_concurrency: parse_usize(
                "THUMBNAIL_MAX_CONCURRENCY",
                DEFAULT_THUMBNAIL_MAX_CONCURRENCY,
            )
            .max(1),
            thumbnail_max_bytes: parse_u64("THUMBNAIL_MAX_BYTES", DEFAULT_THUMBNAIL_MAX_BYTES),
            thumbnail_timeout_ms: parse_u64("THUMBNAIL_TIMEOUT_MS", DEFAULT_THUMBNAIL_TIMEOUT_MS),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            api_base_url: self.api_base_url.clone(),
            has_api_token: self.api_token.is_some(),
            request_timeout_ms: self.request_timeout_ms,
            bounds_padding_px: self.bounds_padding_px,
            single_point_zoom: self.single_point_zoom,
            location_zoom: self.location_zoom,
            location_interval_ms: self.location_interval_ms,
            location_high_accuracy: self.location_high_accuracy,
            location_once: self.location_once,
            thumbnail_max_concurrency: self.thumbnail_max_concurrency,
            thumbnail_max_bytes: self.thumbnail_max_bytes,
            thumbnail_timeout_ms: self.thumbnail_timeout_ms,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_f32(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}
