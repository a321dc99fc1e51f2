//! Thin HTTP client for bundle transfers
//!
//! One [`FetchClient`] is shared by every download task; reqwest pools
//! connections per host underneath. The client issues plain and ranged
//! GETs plus a HEAD variant that exposes the caching-relevant response
//! headers. It never retries: retry is a decision for the layer that owns
//! user-visible intent.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, ETAG, LAST_MODIFIED, RANGE};
use reqwest::{Client, Response};
use tracing::{debug, trace};
use url::Url;

use crate::{Error, Result};

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle connections kept per host.
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 20;

/// Response headers exposed after a HEAD request completes.
#[derive(Debug, Clone, Default)]
pub struct HeadInfo {
    /// Entity tag of the remote file, if the server sent one
    pub etag: Option<String>,
    /// Last-Modified header value, if the server sent one
    pub last_modified: Option<String>,
    /// Declared content length, if the server sent one
    pub content_length: Option<u64>,
}

/// HTTP client wrapper used by download tasks.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    headers: Vec<(String, String)>,
}

impl FetchClient {
    /// Create a client with default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the client.
    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::new()
    }

    /// Issue a GET for `url`, optionally resuming from a byte offset.
    ///
    /// A `Some(offset)` adds a `Range: bytes=<offset>-` header. The
    /// response is returned as-is, status unchecked, so the caller can
    /// apply its own policy to partial-content and error answers.
    pub async fn get(&self, url: &str, resume_from: Option<u64>) -> Result<Response> {
        let url = Url::parse(url)?;
        let mut request = self.client.get(url.clone());
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(offset) = resume_from {
            trace!(%url, offset, "ranged GET");
            request = request.header(RANGE, format!("bytes={offset}-"));
        } else {
            trace!(%url, "GET");
        }
        Ok(request.send().await?)
    }

    /// Issue a HEAD for `url` and expose the cached response headers.
    pub async fn head(&self, url: &str) -> Result<HeadInfo> {
        let url = Url::parse(url)?;
        let mut request = self.client.head(url.clone());
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let header_str = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let info = HeadInfo {
            etag: header_str(ETAG),
            last_modified: header_str(LAST_MODIFIED),
            content_length: response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
        };
        debug!(%url, ?info, "HEAD complete");
        Ok(info)
    }
}

/// Builder for [`FetchClient`].
#[derive(Debug, Default)]
pub struct FetchClientBuilder {
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    pool_max_idle_per_host: Option<usize>,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
}

impl FetchClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set an overall per-request timeout.
    ///
    /// Off by default: large bundles over slow links may legitimately run
    /// for a long time, and the per-task stall watchdog already covers
    /// dead connections.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle connections kept per host.
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    /// Set a custom user agent string.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<FetchClient> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(
                self.connect_timeout
                    .unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            )
            .pool_max_idle_per_host(
                self.pool_max_idle_per_host
                    .unwrap_or(DEFAULT_POOL_MAX_IDLE_PER_HOST),
            )
            .gzip(true)
            .deflate(true);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(FetchClient {
            client: builder.build()?,
            headers: self.headers,
        })
    }
}
