//! Thumbnail fetching with a shared concurrency ceiling and write-through caching.

use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use log::{debug, warn};
use tokio::sync::Semaphore;

use crate::config::FetchConfig;
use crate::error::{RenderError, RenderResult};
use crate::image_cache::ImageCache;
use crate::image_pipeline::decode_rgb;

/// Issues one GET and returns the raw response body.
///
/// Non-success statuses and transport errors must surface as
/// [`RenderError::FetchFailed`].
pub trait HttpSource: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = RenderResult<Vec<u8>>> + Send;
}

/// HTTP source backed by a blocking `ureq` agent run on tokio's blocking pool.
#[derive(Clone)]
pub struct UreqSource {
    http_client: ureq::Agent,
    max_body_bytes: u64,
}

impl UreqSource {
    pub fn new(config: &FetchConfig) -> Self {
        let read_timeout = Duration::from_secs(config.read_timeout_secs.max(1));
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .timeout(connect_timeout + read_timeout)
            .build();
        Self {
            http_client,
            max_body_bytes: config.max_body_bytes.max(1),
        }
    }

    fn get_blocking(
        http_client: &ureq::Agent,
        url: &str,
        max_body_bytes: u64,
    ) -> RenderResult<Vec<u8>> {
        let response = match http_client.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(RenderError::fetch_failed(
                    url,
                    Some(code),
                    "non-success status",
                ))
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(RenderError::fetch_failed(url, None, transport.to_string()))
            }
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(max_body_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|error| RenderError::fetch_failed(url, None, error.to_string()))?;
        if bytes.len() as u64 > max_body_bytes {
            return Err(RenderError::fetch_failed(
                url,
                None,
                format!("body exceeds {max_body_bytes} bytes"),
            ));
        }
        Ok(bytes)
    }
}

impl HttpSource for UreqSource {
    async fn get(&self, url: &str) -> RenderResult<Vec<u8>> {
        let http_client = self.http_client.clone();
        let owned_url = url.to_string();
        let max_body_bytes = self.max_body_bytes;
        tokio::task::spawn_blocking(move || {
            Self::get_blocking(&http_client, &owned_url, max_body_bytes)
        })
        .await
        .map_err(|error| {
            RenderError::fetch_failed(url, None, format!("fetch task failed: {error}"))
        })?
    }
}

/// Fetches and decodes thumbnails.
///
/// Cache hits never touch the limiter; only network fetches hold a permit.
/// The limiter may be shared with other fetchers to bound several batches together.
pub struct BoundedFetcher<S> {
    source: S,
    cache: ImageCache,
    limiter: Arc<Semaphore>,
}

impl<S: HttpSource> BoundedFetcher<S> {
    pub fn new(source: S, cache: ImageCache, limiter: Arc<Semaphore>) -> Self {
        Self {
            source,
            cache,
            limiter,
        }
    }

    pub fn with_capacity(source: S, cache: ImageCache, capacity: usize) -> Self {
        Self::new(source, cache, Arc::new(Semaphore::new(capacity.max(1))))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<Semaphore> {
        &self.limiter
    }

    pub async fn fetch(&self, url: &str) -> RenderResult<RgbImage> {
        if let Some(bytes) = self.cache.read(url).await {
            match decode_rgb(url, &bytes) {
                Ok(image) => {
                    debug!("thumbnail cache hit url={url}");
                    return Ok(image);
                }
                Err(error) => {
                    warn!("discarding unreadable cache entry url={url} error={error}");
                    self.cache.evict(url).await;
                }
            }
        }

        debug!("thumbnail cache miss url={url}");
        let bytes = {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| RenderError::fetch_failed(url, None, "fetch limiter closed"))?;
            let bytes = self.source.get(url).await?;
            if let Err(error) = self.cache.store(url, &bytes).await {
                warn!("failed to cache thumbnail url={url} error={error}");
            }
            bytes
        };
        decode_rgb(url, &bytes)
    }
}
