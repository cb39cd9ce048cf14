use futures::StreamExt;
use reqwest::header::{
    HeaderMap, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER,
    USER_AGENT,
};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, ParseError, UnifiedFeed};
use crate::config::Config;
use crate::storage::CacheValidators;

/// Identifying product string sent with every request.
pub const PRODUCT_USER_AGENT: &str = concat!("gator/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 5;

/// Errors that can occur during a single feed fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Shutdown was requested while the request was in flight
    #[error("Request cancelled")]
    Cancelled,
    /// Server answered 429 Too Many Requests
    #[error("Rate limited by server")]
    RateLimited { retry_after: Option<Duration> },
    /// HTTP status other than 200, 304 or 429
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Body was not a usable RSS or Atom document
    #[error("Malformed feed: {0}")]
    Malformed(#[from] ParseError),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// 429s are skipped until the next poll rather than reported as failures.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// True for failures below HTTP: connection, timeout, cancellation, truncated body.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Timeout
                | FetchError::Cancelled
                | FetchError::IncompleteResponse { .. }
        )
    }
}

/// Result of a conditional GET that reached a usable answer.
#[derive(Debug)]
pub enum FetchOutcome {
    /// 304: the cached copy is current. Carries any validators the server re-sent.
    NotModified { validators: CacheValidators },
    /// 200: the decoded feed plus the validators to replay next time.
    Updated {
        feed: UnifiedFeed,
        validators: CacheValidators,
    },
}

/// HTTP GET with `If-None-Match` / `If-Modified-Since` replay.
#[derive(Debug, Clone)]
pub struct ConditionalFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl ConditionalFetcher {
    /// Builds a fetcher with its own client configured from `config`.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(redirect_policy())
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(
            client,
            config.request_timeout(),
            config.max_feed_bytes,
        ))
    }

    /// Uses a caller-supplied client. `timeout` covers the request and the body read.
    pub fn with_client(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    /// Fetches `url`, replaying whichever validators are present.
    ///
    /// # Errors
    ///
    /// - [`FetchError::RateLimited`] for 429, distinct from other statuses
    /// - [`FetchError::HttpStatus`] for anything else that is not 200 or 304
    /// - [`FetchError::Malformed`] if a 200 body does not parse
    /// - transport errors ([`FetchError::is_transport`])
    pub async fn fetch(
        &self,
        url: &str,
        validators: &CacheValidators,
    ) -> Result<FetchOutcome, FetchError> {
        tokio::time::timeout(self.timeout, self.fetch_inner(url, validators))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn fetch_inner(
        &self,
        url: &str,
        validators: &CacheValidators,
    ) -> Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(url).header(USER_AGENT, PRODUCT_USER_AGENT);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::NOT_MODIFIED => {
                tracing::debug!(url = %url, "Feed not modified");
                Ok(FetchOutcome::NotModified {
                    validators: response_validators(response.headers()),
                })
            }
            StatusCode::OK => {
                let validators = response_validators(response.headers());
                let content_type = header_string(response.headers(), CONTENT_TYPE.as_str());
                let bytes = read_limited_bytes(response, self.max_bytes).await?;
                let feed = parse_feed(&bytes, content_type.as_deref())?;
                tracing::debug!(
                    url = %url,
                    items = feed.items.len(),
                    bytes = bytes.len(),
                    "Feed downloaded"
                );
                Ok(FetchOutcome::Updated { feed, validators })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited {
                retry_after: header_string(response.headers(), RETRY_AFTER.as_str())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
            }),
            other => Err(FetchError::HttpStatus(other.as_u16())),
        }
    }
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Header value as a string; absent, empty and non-ASCII values are all `None`.
fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn response_validators(headers: &HeaderMap) -> CacheValidators {
    CacheValidators {
        etag: header_string(headers, ETAG.as_str()),
        last_modified: header_string(headers, LAST_MODIFIED.as_str()),
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: the connection can drop mid-body without a stream error
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
