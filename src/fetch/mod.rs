//! Bounded, retried page fetching.
//!
//! A [`PageBackend`] performs exactly one request. [`BoundedFetcher`] wraps any
//! backend with the shared concurrency ceiling, the retry loop and the
//! provider-failure sentinel check, so both backends behave identically to
//! callers.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{BackendKind, Settings};

#[cfg(feature = "browser")]
pub mod browser;
pub mod http;

/// Body text the upstream CDN serves, with a 200 status, when its TLS handshake
/// to the origin fails.
pub const SSL_HANDSHAKE_SENTINEL: &str = "525: SSL handshake failed";

/// Browser-like headers sent with every request.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("Dnt", "1"),
    ("Priority", "u=0, i"),
    ("Referer", "https://www.google.com/"),
    (
        "Sec-Ch-Ua",
        "\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"126\", \"Microsoft Edge\";v=\"126\"",
    ),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", "\"Windows\""),
    ("Upgrade-Insecure-Requests", "1"),
];

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network: {0}")]
    Network(String),
    #[error("http status {status}")]
    Status { status: u16 },
    #[error("provider returned the SSL handshake failure page")]
    SslHandshake,
    #[error("browser: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// One request, no retries. Implementations must be shareable across tasks.
#[async_trait]
pub trait PageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, url: &str) -> Result<RawResponse, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per URL, including the first.
    pub attempts: u32,
    /// Fixed pause between attempts. The concurrency slot stays held while sleeping.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::config::DEFAULT_RETRY_LIMIT,
            delay: Duration::from_millis(crate::config::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

pub struct BoundedFetcher {
    backend: Arc<dyn PageBackend>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl BoundedFetcher {
    pub fn new(backend: Arc<dyn PageBackend>, concurrency: usize, retry: RetryPolicy) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            backend,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry: RetryPolicy {
                attempts: retry.attempts.max(1),
                delay: retry.delay,
            },
        }
    }

    /// Builds the configured backend. This is the only place the backend kind is branched on.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let backend: Arc<dyn PageBackend> = match settings.backend {
            BackendKind::Http => Arc::new(http::HttpBackend::new(
                &settings.user_agent,
                settings.request_timeout,
            )?),
            BackendKind::Browser => browser_backend(settings).await?,
        };
        let retry = RetryPolicy {
            attempts: settings.retry_limit,
            delay: settings.retry_delay,
        };
        let fetcher = Self::new(backend, settings.concurrency, retry);
        info!(
            backend = fetcher.backend_name(),
            concurrency = fetcher.concurrency(),
            attempts = fetcher.retry_policy().attempts,
            delay_ms = fetcher.retry_policy().delay.as_millis() as u64,
            "fetcher configured"
        );
        Ok(fetcher)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Body of `url`, or `None` once every attempt has failed.
    pub async fn fetch(&self, url: &str) -> Option<Bytes> {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(url = %url, "fetch semaphore closed");
                return None;
            }
        };

        let attempts = self.retry.attempts;
        for attempt in 1..=attempts {
            match self.attempt(url).await {
                Ok(body) => {
                    debug!(url = %url, attempt, bytes = body.len(), "fetched");
                    return Some(body);
                }
                Err(err) => {
                    warn!(url = %url, attempt, error = %err, "fetch attempt failed");
                    if attempt < attempts {
                        sleep(self.retry.delay).await;
                    }
                }
            }
        }
        error!(url = %url, attempts, "giving up after exhausting retries");
        None
    }

    /// Fetches every URL under the shared ceiling. Each result stays paired with its URL;
    /// the output order matches the input order.
    pub async fn fetch_all<I>(&self, urls: I) -> Vec<(String, Option<Bytes>)>
    where
        I: IntoIterator<Item = String>,
    {
        let tasks = urls.into_iter().map(|url| async move {
            let body = self.fetch(&url).await;
            (url, body)
        });
        join_all(tasks).await
    }

    async fn attempt(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.backend.get(url).await?;
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Status {
                status: response.status,
            });
        }
        if contains_sentinel(&response.body) {
            return Err(FetchError::SslHandshake);
        }
        Ok(response.body)
    }
}

fn contains_sentinel(body: &[u8]) -> bool {
    let needle = SSL_HANDSHAKE_SENTINEL.as_bytes();
    body.windows(needle.len()).any(|w| w == needle)
}

#[cfg(feature = "browser")]
async fn browser_backend(settings: &Settings) -> anyhow::Result<Arc<dyn PageBackend>> {
    let backend = browser::BrowserBackend::launch(&settings.user_agent).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "browser"))]
async fn browser_backend(_settings: &Settings) -> anyhow::Result<Arc<dyn PageBackend>> {
    anyhow::bail!("browser backend requested but this build lacks the `browser` feature")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend shared by the crate's async tests.
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedBackend {
        pages: Mutex<HashMap<String, (u16, String)>>,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub latency: Duration,
    }

    impl ScriptedBackend {
        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        pub fn page(self, url: &str, status: u16, body: &str) -> Self {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), (status, body.to_string()));
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let page = self.pages.lock().unwrap().get(url).cloned();
            match page {
                Some((status, body)) => Ok(RawResponse {
                    status,
                    body: Bytes::from(body),
                }),
                None => Err(FetchError::Network(format!("no route to {url}"))),
            }
        }
    }

    pub fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{fast_retry, ScriptedBackend};
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn from_settings_builds_the_http_backend_with_clamped_limits() {
        let settings = Settings {
            concurrency: 0,
            retry_limit: 0,
            retry_delay: Duration::from_millis(250),
            ..Settings::default()
        };
        let fetcher = BoundedFetcher::from_settings(&settings).await.unwrap();
        assert_eq!(fetcher.backend_name(), "http");
        assert_eq!(fetcher.concurrency(), 1);
        assert_eq!(fetcher.retry_policy().attempts, 1);
        assert_eq!(fetcher.retry_policy().delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn permanently_failing_url_is_tried_exactly_retry_limit_times() {
        let backend = Arc::new(ScriptedBackend::default().page("https://x/fail", 503, ""));
        let fetcher = BoundedFetcher::new(backend.clone(), 5, fast_retry());

        assert!(fetcher.fetch("https://x/fail").await.is_none());
        assert_eq!(backend.calls(), 3);

        assert!(fetcher.fetch("https://x/unreachable").await.is_none());
        assert_eq!(backend.calls(), 6);
    }

    #[tokio::test]
    async fn ssl_sentinel_with_ok_status_counts_as_failure() {
        let body = "<html><body>Error 525: SSL handshake failed</body></html>";
        let backend = Arc::new(ScriptedBackend::default().page("https://x/cdn", 200, body));
        let fetcher = BoundedFetcher::new(backend.clone(), 5, fast_retry());

        assert!(fetcher.fetch("https://x/cdn").await.is_none());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn success_returns_body_after_single_attempt() {
        let backend = Arc::new(ScriptedBackend::default().page("https://x/ok", 200, "hello"));
        let fetcher = BoundedFetcher::new(backend.clone(), 5, fast_retry());

        let body = fetcher.fetch("https://x/ok").await.unwrap();
        assert_eq!(&body[..], b"hello");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn in_flight_fetches_never_exceed_ceiling() {
        let mut backend = ScriptedBackend::with_latency(Duration::from_millis(20));
        for i in 0..30 {
            backend = backend.page(&format!("https://x/{i}"), 200, "ok");
        }
        let backend = Arc::new(backend);
        let fetcher = BoundedFetcher::new(backend.clone(), 5, fast_retry());

        let urls: Vec<String> = (0..30).map(|i| format!("https://x/{i}")).collect();
        let results = fetcher.fetch_all(urls.clone()).await;

        assert_eq!(results.len(), 30);
        for ((url, body), expected) in results.iter().zip(&urls) {
            assert_eq!(url, expected);
            assert!(body.is_some());
        }
        let peak = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak in-flight {peak} exceeded ceiling");
        assert!(peak >= 2, "expected fetches to overlap, peak was {peak}");
    }

    #[tokio::test]
    async fn retries_hold_the_slot() {
        // One slot: a failing URL retrying must block the next URL from starting.
        let backend = Arc::new(
            ScriptedBackend::with_latency(Duration::from_millis(5))
                .page("https://x/a", 500, "")
                .page("https://x/b", 200, "b"),
        );
        let fetcher = BoundedFetcher::new(backend.clone(), 1, fast_retry());
        let results = fetcher
            .fetch_all(vec!["https://x/a".to_string(), "https://x/b".to_string()])
            .await;

        assert!(results[0].1.is_none());
        assert!(results[1].1.is_some());
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls(), 4);
    }

    #[test]
    fn sentinel_scan_handles_short_bodies() {
        assert!(!contains_sentinel(b""));
        assert!(!contains_sentinel(b"525"));
        assert!(contains_sentinel(SSL_HANDSHAKE_SENTINEL.as_bytes()));
    }
}
