// src/collect/fetcher.rs
//! Single-page GET with timeout, bounded retries and exponential backoff.
//!
//! Fetching never fails as a Rust error: every outcome is folded into a
//! [`FetchResult`] so one broken endpoint cannot unwind a whole run.

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use std::time::{Duration, Instant};

use crate::collect::types::{FetchResult, FetchStatus};

/// Descriptive client identifier sent with every request.
pub const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (electricity price collector)"
);

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Logged in place of `url` (e.g. with the API key stripped).
    pub display_url: Option<String>,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub verify_tls: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            display_url: None,
            timeout,
            headers: Vec::new(),
            verify_tls: true,
        }
    }

    pub fn with_display_url(mut self, display: impl Into<String>) -> Self {
        self.display_url = Some(display.into());
        self
    }

    /// URL safe to log.
    pub fn log_url(&self) -> &str {
        self.display_url.as_deref().unwrap_or(&self.url)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> FetchResult;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (1-based `attempt`): base, 2×base, 4×base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// reqwest-backed fetcher. Keeps a second client with certificate checks
/// disabled for endpoints flagged `insecure_tls`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        let insecure_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            insecure_client,
            retry,
        })
    }

    async fn attempt(&self, req: &FetchRequest) -> Attempt {
        let client = if req.verify_tls {
            &self.client
        } else {
            &self.insecure_client
        };
        let mut builder = client.get(&req.url).timeout(req.timeout);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        let rsp = match builder.send().await {
            Ok(r) => r,
            Err(e) => return Attempt::from_error(e),
        };
        let code = rsp.status();
        if !code.is_success() {
            return Attempt {
                status: FetchStatus::HttpError,
                code: Some(code.as_u16()),
                body: None,
                error: Some(format!("HTTP {code}")),
                retryable: code.is_server_error() || code.as_u16() == 429,
            };
        }
        match rsp.text().await {
            Ok(body) => Attempt {
                status: FetchStatus::Ok,
                code: Some(code.as_u16()),
                body: Some(body),
                error: None,
                retryable: false,
            },
            Err(e) => Attempt {
                code: Some(code.as_u16()),
                ..Attempt::from_error(e)
            },
        }
    }
}

struct Attempt {
    status: FetchStatus,
    code: Option<u16>,
    body: Option<String>,
    error: Option<String>,
    retryable: bool,
}

impl Attempt {
    /// The URL is dropped from the message: it may carry an API key.
    fn from_error(e: reqwest::Error) -> Self {
        let status = if e.is_timeout() {
            FetchStatus::Timeout
        } else {
            FetchStatus::NetworkError
        };
        // Builder errors (bad header, bad URL) fail identically every time.
        let retryable = !e.is_builder();
        Self {
            status,
            code: None,
            body: None,
            error: Some(e.without_url().to_string()),
            retryable,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: &FetchRequest) -> FetchResult {
        let attempted_at = Utc::now();
        let t0 = Instant::now();
        if !req.verify_tls {
            tracing::warn!(url = %req.log_url(), "TLS verification disabled for endpoint");
        }

        let max = self.retry.max_attempts.max(1);
        let mut n = 0u32;
        let last = loop {
            n += 1;
            let a = self.attempt(req).await;
            counter!("collect_fetch_total").increment(1);
            if a.status == FetchStatus::Ok || !a.retryable || n >= max {
                break a;
            }
            let delay = self.retry.backoff(n);
            tracing::debug!(
                url = %req.log_url(),
                attempt = n,
                status = ?a.status,
                error = a.error.as_deref().unwrap_or_default(),
                delay_ms = delay.as_millis() as u64,
                "fetch failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        histogram!("collect_fetch_ms").record(elapsed_ms as f64);
        if last.status != FetchStatus::Ok {
            counter!("collect_fetch_errors_total").increment(1);
            tracing::warn!(
                url = %req.log_url(),
                status = ?last.status,
                http_status = ?last.code,
                attempts = n,
                error = last.error.as_deref().unwrap_or_default(),
                "fetch failed"
            );
        }

        FetchResult {
            status: last.status,
            http_status_code: last.code,
            raw_content: last.body,
            attempted_at,
            elapsed_ms,
            attempts: n,
            error: last.error,
        }
    }
}
