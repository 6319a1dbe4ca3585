use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::{Client, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::{non_empty, FetchContext, LatLng, Point, PointKey, PointKind};

const SUCCESS_CODE: i64 = 200;
const NOT_FOUND_CODE: i64 = 404;
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

#[async_trait]
pub trait PointFetcher: Send + Sync {
    async fn fetch_points(&self, context: &FetchContext) -> AppResult<Vec<Point>>;
    async fn fetch_detail(&self, key: PointKey) -> AppResult<Option<Point>>;
}

/// Fills in coordinates for points that only carry a location reference.
/// Points whose reference cannot be resolved are dropped.
pub async fn resolve_locations(fetcher: &dyn PointFetcher, points: &[Point]) -> Vec<Point> {
    let mut refs: Vec<PointKey> = points.iter().filter_map(|p| p.location_ref).collect();
    refs.sort_by_key(|key| (key.kind.as_tag(), key.id));
    refs.dedup();

    let lookups = refs.iter().map(|key| async move {
        match fetcher.fetch_detail(*key).await {
            Ok(Some(point)) => point.position().map(|position| (*key, position)),
            Ok(None) => {
                debug!(point = %key, "referenced point no longer exists");
                None
            }
            Err(err) => {
                warn!(?err, point = %key, "failed to resolve point location");
                None
            }
        }
    });
    let resolved: HashMap<PointKey, LatLng> =
        join_all(lookups).await.into_iter().flatten().collect();

    points
        .iter()
        .filter(|point| point.needs_resolution())
        .filter_map(|point| {
            let position = point.location_ref.and_then(|key| resolved.get(&key).copied())?;
            let mut placed = point.clone();
            placed.position = Some(position);
            Some(placed)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScenicRecord {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default)]
    cover_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductRecord {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hotel_address: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default)]
    cover_image: Option<String>,
    #[serde(default)]
    scenic_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrderItemRecord {
    product_id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hotel_address: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default)]
    cover_image: Option<String>,
    #[serde(default)]
    scenic_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    #[serde(default)]
    items: Vec<OrderItemRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScenicPage {
    Paged { list: Vec<ScenicRecord> },
    Flat(Vec<ScenicRecord>),
}

pub struct HttpPointFetcher {
    http: Client,
    base: Url,
    token: Option<SecretString>,
    jitter_rng: Mutex<StdRng>,
}

impl HttpPointFetcher {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base: normalize_base(&config.api_base_url)?,
            token: config.api_token.clone(),
            jitter_rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base
            .join(path)
            .map_err(|err| AppError::Config(format!("invalid endpoint {path}: {err}")))
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.http.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn call_with_retry<T, F>(&self, build: F) -> AppResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call(build()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        ?err,
                        attempt, "backend request failed; retrying after {:?}", delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt - 1).min(4);
        let base = Duration::from_millis(BASE_BACKOFF_MS * (1 << exponent));
        let jitter_ms = self.jitter_rng.lock().gen_range(0..BASE_BACKOFF_MS);
        base + Duration::from_millis(jitter_ms)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope = match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(AppError::Api {
                    code: i64::from(status.as_u16()),
                    message: status.canonical_reason().unwrap_or("request failed").to_string(),
                })
            }
            Err(err) => return Err(AppError::Parse(format!("malformed envelope: {err}"))),
        };

        if envelope.code != SUCCESS_CODE {
            return Err(AppError::Api {
                code: envelope.code,
                message: envelope.msg.unwrap_or_default(),
            });
        }
        let data = envelope.data.unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|err| AppError::Parse(err.to_string()))
    }

    async fn scenic_detail(&self, id: i64) -> AppResult<Point> {
        let url = self.endpoint(&format!("api/scenics/{id}"))?;
        let record: ScenicRecord = self.call_with_retry(|| self.get(url.clone())).await?;
        Ok(self.scenic_point(record))
    }

    async fn product_detail(&self, id: i64) -> AppResult<Point> {
        let url = self.endpoint(&format!("api/products/{id}"))?;
        let record: ProductRecord = self.call_with_retry(|| self.get(url.clone())).await?;
        Ok(self.product_point(record))
    }

    fn scenic_point(&self, record: ScenicRecord) -> Point {
        let mut point = Point::new(
            PointKind::Scenic,
            record.id,
            record.name.unwrap_or_default(),
        );
        point.snippet = record.address.and_then(non_empty).or(record.city.and_then(non_empty));
        point.position = LatLng::from_parts(record.latitude, record.longitude);
        point.thumbnail_url = self.image_url(record.cover_image);
        point
    }

    fn product_point(&self, record: ProductRecord) -> Point {
        let mut point = Point::new(
            PointKind::Product,
            record.id,
            record.name.unwrap_or_default(),
        );
        point.snippet = record
            .hotel_address
            .and_then(non_empty)
            .or(record.address.and_then(non_empty));
        point.position = LatLng::from_parts(record.latitude, record.longitude);
        point.thumbnail_url = self.image_url(record.cover_image);
        point.location_ref = record.scenic_id.map(PointKey::scenic);
        point
    }

    fn order_item_point(&self, record: OrderItemRecord) -> Point {
        let mut point = Point::new(
            PointKind::OrderItem,
            record.product_id,
            record.name.unwrap_or_default(),
        );
        point.snippet = record
            .hotel_address
            .and_then(non_empty)
            .or(record.address.and_then(non_empty));
        point.position = LatLng::from_parts(record.latitude, record.longitude);
        point.thumbnail_url = self.image_url(record.cover_image);
        point.location_ref = record.scenic_id.map(PointKey::scenic);
        point
    }

    fn image_url(&self, raw: Option<String>) -> Option<String> {
        let raw = raw.and_then(non_empty)?;
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Some(trimmed.to_string());
        }
        match self.base.join(trimmed.trim_start_matches('/')) {
            Ok(url) => Some(url.to_string()),
            Err(err) => {
                debug!(?err, image = trimmed, "dropping unresolvable image path");
                None
            }
        }
    }
}

#[async_trait]
impl PointFetcher for HttpPointFetcher {
    async fn fetch_points(&self, context: &FetchContext) -> AppResult<Vec<Point>> {
        match context {
            FetchContext::MapOverview => {
                let url = self.endpoint("api/scenics/map")?;
                let records: Vec<ScenicRecord> =
                    self.call_with_retry(|| self.get(url.clone())).await?;
                Ok(records.into_iter().map(|r| self.scenic_point(r)).collect())
            }
            FetchContext::Nearby { keyword } => {
                let url = self.endpoint("api/scenics")?;
                let keyword = keyword.as_deref().map(str::trim).filter(|k| !k.is_empty());
                let page = self
                    .call_with_retry::<ScenicPage, _>(|| match keyword {
                        Some(keyword) => self.get(url.clone()).query(&[("keyword", keyword)]),
                        None => self.get(url.clone()),
                    })
                    .await?;
                let records = match page {
                    ScenicPage::Paged { list } | ScenicPage::Flat(list) => list,
                };
                Ok(records.into_iter().map(|r| self.scenic_point(r)).collect())
            }
            FetchContext::Order { order_id } => {
                let url = self.endpoint(&format!("api/orders/{order_id}"))?;
                let detail: OrderDetail = self.call_with_retry(|| self.get(url.clone())).await?;
                Ok(detail
                    .items
                    .into_iter()
                    .map(|r| self.order_item_point(r))
                    .collect())
            }
            FetchContext::Detail(key) => Ok(self.fetch_detail(*key).await?.into_iter().collect()),
        }
    }

    async fn fetch_detail(&self, key: PointKey) -> AppResult<Option<Point>> {
        let result = match key.kind {
            PointKind::Scenic => self.scenic_detail(key.id.0).await,
            PointKind::Product | PointKind::OrderItem => self.product_detail(key.id.0).await,
        };
        match result {
            Ok(mut point) => {
                point.kind = key.kind;
                Ok(Some(point))
            }
            Err(AppError::Api { code, .. }) if code == NOT_FOUND_CODE => Ok(None),
            Err(err) => Err(err),
        }
    }
}

// Dropped connections, timeouts and an overloaded backend are worth another try.
fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::Http(err) => err.is_connect() || err.is_timeout(),
        AppError::Api { code, .. } => matches!(code, 429 | 503),
        _ => false,
    }
}

fn normalize_base(raw: &str) -> AppResult<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|err| AppError::Config(format!("invalid API base {raw}: {err}")))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
