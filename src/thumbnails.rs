use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::PointKey;

#[derive(Clone, PartialEq)]
pub struct Thumbnail {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[async_trait]
pub trait ThumbnailLoader: Send + Sync {
    async fn load(&self, url: &str) -> AppResult<Thumbnail>;
}

pub struct HttpThumbnailLoader {
    http: Client,
    max_bytes: u64,
}

impl HttpThumbnailLoader {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.thumbnail_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            max_bytes: config.thumbnail_max_bytes,
        })
    }
}

#[async_trait]
impl ThumbnailLoader for HttpThumbnailLoader {
    async fn load(&self, url: &str) -> AppResult<Thumbnail> {
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(total) = response.content_length() {
            if total > self.max_bytes {
                return Err(AppError::Thumbnail(format!(
                    "{url} is {total} bytes, limit is {}",
                    self.max_bytes
                )));
            }
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (buffer.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(AppError::Thumbnail(format!(
                    "{url} exceeded {} bytes",
                    self.max_bytes
                )));
            }
            buffer.extend_from_slice(&chunk);
        }
        if buffer.is_empty() {
            return Err(AppError::Thumbnail(format!("{url} returned no data")));
        }

        Ok(Thumbnail {
            url: url.to_string(),
            content_type,
            bytes: buffer.into(),
        })
    }
}

/// Identifies one load; a marker only accepts the completion of its latest token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

#[derive(Debug)]
pub struct ThumbnailCompletion {
    pub key: PointKey,
    pub token: RequestToken,
    pub result: AppResult<Thumbnail>,
}

struct InFlight {
    token: RequestToken,
    task: JoinHandle<()>,
}

pub struct ThumbnailDispatcher {
    loader: Arc<dyn ThumbnailLoader>,
    runtime: Handle,
    limiter: Arc<Semaphore>,
    completions: UnboundedSender<ThumbnailCompletion>,
    in_flight: HashMap<PointKey, InFlight>,
    next_token: u64,
}

impl ThumbnailDispatcher {
    pub fn new(
        loader: Arc<dyn ThumbnailLoader>,
        runtime: Handle,
        max_concurrency: usize,
    ) -> (Self, UnboundedReceiver<ThumbnailCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            loader,
            runtime,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            completions: tx,
            in_flight: HashMap::new(),
            next_token: 0,
        };
        (dispatcher, rx)
    }

    pub fn request(&mut self, key: PointKey, url: &str) -> RequestToken {
        self.cancel(key);
        self.next_token += 1;
        let token = RequestToken(self.next_token);

        let loader = Arc::clone(&self.loader);
        let limiter = Arc::clone(&self.limiter);
        let completions = self.completions.clone();
        let url = url.to_string();
        let task = self.runtime.spawn(async move {
            let result = match limiter.acquire_owned().await {
                Ok(_permit) => loader.load(&url).await,
                Err(_) => Err(AppError::Thumbnail("loader shut down".into())),
            };
            if completions
                .send(ThumbnailCompletion { key, token, result })
                .is_err()
            {
                trace!(point = %key, "thumbnail receiver dropped");
            }
        });
        self.in_flight.insert(key, InFlight { token, task });
        token
    }

    pub fn cancel(&mut self, key: PointKey) -> bool {
        match self.in_flight.remove(&key) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.in_flight.len();
        for (_, entry) in self.in_flight.drain() {
            entry.task.abort();
        }
        cancelled
    }

    pub fn settle(&mut self, key: PointKey, token: RequestToken) -> bool {
        match self.in_flight.get(&key) {
            Some(entry) if entry.token == token => {
                self.in_flight.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Drop for ThumbnailDispatcher {
    fn drop(&mut self) {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "dropping dispatcher with thumbnails in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::request;
    use httptest::responders::status_code;
    use httptest::{Expectation, Server};
    use tokio::sync::Notify;
    use tokio::time::timeout;

    struct GatedLoader {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ThumbnailLoader for GatedLoader {
        async fn load(&self, url: &str) -> AppResult<Thumbnail> {
            self.gate.notified().await;
            Ok(Thumbnail {
                url: url.to_string(),
                content_type: None,
                bytes: Arc::from(vec![1_u8, 2, 3]),
            })
        }
    }

    struct InstantLoader;

    #[async_trait]
    impl ThumbnailLoader for InstantLoader {
        async fn load(&self, url: &str) -> AppResult<Thumbnail> {
            Err(AppError::Thumbnail(format!("{url} unavailable")))
        }
    }

    #[tokio::test]
    async fn delivers_completion_with_matching_token() {
        let (mut dispatcher, mut rx) =
            ThumbnailDispatcher::new(Arc::new(InstantLoader), Handle::current(), 2);
        let key = PointKey::scenic(1);
        let token = dispatcher.request(key, "http://img/1.png");

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.key, key);
        assert_eq!(completion.token, token);
        assert!(completion.result.is_err());
        assert!(dispatcher.settle(key, token));
        assert_eq!(dispatcher.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn reissuing_cancels_the_stale_request() {
        let gate = Arc::new(Notify::new());
        let (mut dispatcher, mut rx) = ThumbnailDispatcher::new(
            Arc::new(GatedLoader { gate: gate.clone() }),
            Handle::current(),
            4,
        );
        let key = PointKey::product(9);
        let stale = dispatcher.request(key, "http://img/old.png");
        let fresh = dispatcher.request(key, "http://img/new.png");
        assert_ne!(stale, fresh);
        assert_eq!(dispatcher.in_flight_count(), 1);
        assert!(!dispatcher.settle(key, stale));

        gate.notify_waiters();
        gate.notify_one();
        let completion = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completion.token, fresh);
        assert_eq!(completion.result.unwrap().url, "http://img/new.png");
    }

    #[tokio::test]
    async fn cancel_all_suppresses_late_completions() {
        let gate = Arc::new(Notify::new());
        let (mut dispatcher, mut rx) = ThumbnailDispatcher::new(
            Arc::new(GatedLoader { gate: gate.clone() }),
            Handle::current(),
            4,
        );
        dispatcher.request(PointKey::scenic(1), "http://img/1.png");
        dispatcher.request(PointKey::scenic(2), "http://img/2.png");
        assert_eq!(dispatcher.cancel_all(), 2);

        gate.notify_waiters();
        let late = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(late.is_err());
    }

    #[tokio::test]
    async fn http_loader_enforces_byte_limit() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/big.jpg"))
                .respond_with(status_code(200).body(vec![0_u8; 64])),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/small.jpg")).respond_with(
                status_code(200)
                    .append_header("content-type", "image/jpeg")
                    .body(vec![7_u8; 8]),
            ),
        );

        let config = AppConfig {
            thumbnail_max_bytes: 16,
            ..AppConfig::default()
        };
        let loader = HttpThumbnailLoader::new(&config).unwrap();

        let err = loader
            .load(&server.url("/big.jpg").to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Thumbnail(_)));

        let thumb = loader
            .load(&server.url("/small.jpg").to_string())
            .await
            .unwrap();
        assert_eq!(thumb.bytes.len(), 8);
        assert_eq!(thumb.content_type.as_deref(), Some("image/jpeg"));
    }
}
