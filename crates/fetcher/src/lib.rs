pub mod metrics;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use sitewatch_core::FetchError;

pub use metrics::{FetchMetrics, FetchMetricsSnapshot};

/// Response from a successful fetch. `final_url` differs from the requested
/// URL when the server redirected; the caller uses that to record
/// canonicalization rather than re-deriving it.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: Url,
}

#[derive(Debug, Clone, Copy)]
pub enum ProxyProvider {
    Tor,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub provider: ProxyProvider,
    pub socks_addr: String,
    /// Request identity rotation every N successful fetches (10 recommended).
    pub rotate_every: Option<u32>,
    pub allow_direct_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub max_concurrent: usize,
    pub request_timeout: Duration,
    pub redirect_cap: u8,
    pub min_host_delay: Duration,
    pub retry_attempts: u32,
    pub max_body_bytes: usize,
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            request_timeout: Duration::from_secs(15),
            redirect_cap: 10,
            min_host_delay: Duration::from_millis(100),
            retry_attempts: 3,
            max_body_bytes: 20 * 1024 * 1024,
            user_agent: "sitewatch/0.1".to_string(),
            proxy: None,
        }
    }
}

/// Bounded-concurrency HTTP client. One instance is created per run and
/// released on every exit path (§9 "scoped async fetcher context").
pub struct Fetcher {
    client: reqwest::Client,
    proxy_client: Option<reqwest::Client>,
    semaphore: Arc<Semaphore>,
    host_last_start: DashMap<String, Instant>,
    config: FetcherConfig,
    metrics: Arc<FetchMetrics>,
    successes_since_rotation: AtomicU32,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = build_client(&config, None)?;
        let proxy_client = match &config.proxy {
            Some(p) => Some(build_client(&config, Some(p))?),
            None => None,
        };
        Ok(Self {
            client,
            proxy_client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            host_last_start: DashMap::new(),
            config,
            metrics: Arc::new(FetchMetrics::default()),
            successes_since_rotation: AtomicU32::new(0),
        })
    }

    pub fn metrics(&self) -> Arc<FetchMetrics> {
        self.metrics.clone()
    }

    /// Fetches `url`, retrying transient failures with exponential backoff
    /// (base 1s, factor 2, ±25% jitter) up to `retry_attempts` total tries.
    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("fetch semaphore never closed");
        self.respect_host_delay(url).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.metrics.record_attempt();
            match self.fetch_once(url).await {
                Ok(resp) => {
                    self.metrics.record_success(resp.body.len() as u64);
                    self.note_proxy_success();
                    return Ok(resp);
                }
                Err(err) if err.is_transient() && attempt < self.config.retry_attempts => {
                    self.metrics.record_retry();
                    let backoff = backoff_duration(attempt);
                    warn!(url = %url, attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "retrying fetch");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    self.metrics.record_failure();
                    return Err(err);
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let client = self.active_client();
        let resp = client
            .get(url.clone())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_client_error() {
            return Err(FetchError::HttpClientError(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(FetchError::HttpServerError(status.as_u16()));
        }

        let bytes = resp.bytes().await.map_err(classify_reqwest_error)?;
        if bytes.len() > self.config.max_body_bytes {
            return Err(FetchError::TooLarge);
        }

        debug!(url = %url, status = status.as_u16(), bytes = bytes.len(), "fetched");
        Ok(FetchResponse {
            status: status.as_u16(),
            body: bytes.to_vec(),
            content_type,
            final_url,
        })
    }

    fn active_client(&self) -> &reqwest::Client {
        self.proxy_client.as_ref().unwrap_or(&self.client)
    }

    fn note_proxy_success(&self) {
        let Some(proxy) = &self.config.proxy else {
            return;
        };
        let Some(rotate_every) = proxy.rotate_every else {
            return;
        };
        let count = self.successes_since_rotation.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= rotate_every {
            self.successes_since_rotation.store(0, Ordering::Relaxed);
            debug!(provider = ?proxy.provider, "requesting proxy identity rotation");
        }
    }

    async fn respect_host_delay(&self, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        let host = host.to_string();
        let now = Instant::now();
        let wait = {
            let entry = self.host_last_start.get(&host);
            entry.and_then(|last| {
                let elapsed = now.saturating_duration_since(*last);
                self.config.min_host_delay.checked_sub(elapsed)
            })
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
        self.host_last_start.insert(host, Instant::now());
    }
}

fn build_client(
    config: &FetcherConfig,
    proxy: Option<&ProxyConfig>,
) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(config.redirect_cap as usize))
        .timeout(config.request_timeout);

    if let Some(proxy) = proxy {
        let proxy_url = format!("socks5h://{}", proxy.socks_addr);
        match reqwest::Proxy::all(&proxy_url) {
            Ok(p) => builder = builder.proxy(p),
            Err(_) if proxy.allow_direct_fallback => {
                warn!(addr = %proxy.socks_addr, "proxy config invalid, falling back to direct connection");
            }
            Err(_) => return Err(FetchError::ConnectionRefused),
        }
    }

    builder
        .build()
        .map_err(|e| FetchError::TlsFailure(e.to_string()))
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    if err.is_connect() {
        let msg = err.to_string();
        if msg.contains("dns") || msg.contains("resolve") || msg.contains("lookup") {
            return FetchError::Dns(msg);
        }
        return FetchError::ConnectionRefused;
    }
    if err.is_decode() || err.is_body() {
        return FetchError::PayloadDecodeFailed(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.is_client_error() {
            return FetchError::HttpClientError(status.as_u16());
        }
        if status.is_server_error() {
            return FetchError::HttpServerError(status.as_u16());
        }
    }
    FetchError::PayloadDecodeFailed(err.to_string())
}

fn backoff_duration(attempt: u32) -> Duration {
    let base_ms: u64 = 1000 * 2u64.pow(attempt.saturating_sub(1).min(10));
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let millis = (base_ms as f64 * (1.0 + jitter_frac)).max(0.0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/ok", server.uri())).unwrap();
        let resp = fetcher.fetch(&url).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
    }

    #[tokio::test]
    async fn retries_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let mut config = FetcherConfig::default();
        config.retry_attempts = 3;
        let fetcher = Fetcher::new(config).unwrap();
        let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();
        let resp = fetcher.fetch(&url).await.unwrap();
        assert_eq!(resp.body, b"recovered");
        assert_eq!(fetcher.metrics().snapshot().retries, 1);
    }

    #[tokio::test]
    async fn permanent_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err, FetchError::HttpClientError(404));
        assert_eq!(fetcher.metrics().snapshot().attempts, 1);
    }
}
