//! HTTP transport with exponential backoff retry logic.
//!
//! The module uses a trait-based design:
//! - [`Fetch`]: the transport seam the rest of the pipeline talks to
//! - [`HttpFetcher`]: `reqwest`-backed implementation with separate timeout
//!   budgets for listing calls and bulk content downloads
//! - [`RetryFetch`]: decorator that adds retry logic to any [`Fetch`]
//!   implementation
//!
//! The fetcher itself never retries; retry policy belongs to the run
//! coordinator, which wraps its fetcher in [`RetryFetch`].
//!
//! # Retry strategy
//!
//! - Exponential backoff starting at the base delay
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to avoid lockstep retries

use crate::error::{PipelineError, Result};
use crate::models::RawPayload;
use rand::{rng, Rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Transport seam: perform an HTTP GET with a timeout, return the body.
///
/// Each call is best-effort; callers handle failure themselves.
pub trait Fetch {
    /// Fetch a listing or indirection response as text (listing timeout).
    async fn get_text(&self, url: &str) -> Result<String>;

    /// Fetch file content as bytes (content timeout; feeds can be tens of
    /// megabytes).
    async fn get_bytes(&self, url: &str) -> Result<RawPayload>;
}

impl<T: Fetch> Fetch for &T {
    async fn get_text(&self, url: &str) -> Result<String> {
        (**self).get_text(url).await
    }

    async fn get_bytes(&self, url: &str) -> Result<RawPayload> {
        (**self).get_bytes(url).await
    }
}

/// `reqwest`-backed fetcher with per-call-kind timeout budgets.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    listing_timeout: Duration,
    content_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(listing_timeout: Duration, content_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("price_atlas/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Config {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            listing_timeout,
            content_timeout,
        })
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| PipelineError::FetchFailed {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::FetchFailed {
                url: url.to_string(),
                cause: format!("status {status}"),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::FetchFailed {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        if body.is_empty() {
            return Err(PipelineError::FetchFailed {
                url: url.to_string(),
                cause: "empty body".to_string(),
            });
        }

        debug!(
            %url,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );
        Ok(body.to_vec())
    }
}

impl Fetch for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        let bytes = self.get(url, self.listing_timeout).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get_bytes(&self, url: &str) -> Result<RawPayload> {
        let bytes = self.get(url, self.content_timeout).await?;
        Ok(RawPayload::new(bytes, url))
    }
}

/// Decorator that adds exponential backoff retry logic to any [`Fetch`]
/// implementation.
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    async fn with_retries<F, Fut, R>(&self, url: &str, call: F) -> Result<R>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut attempt = 0usize;
        loop {
            match call().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        %url,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    async fn get_text(&self, url: &str) -> Result<String> {
        self.with_retries(url, || self.inner.get_text(url)).await
    }

    async fn get_bytes(&self, url: &str) -> Result<RawPayload> {
        self.with_retries(url, || self.inner.get_bytes(url)).await
    }
}
