//! Blocking HTTP client with timeout, cookie jar and retries. Implements [Fetcher].
//!
//! Rate limiting lives in the level policy (per-level delay), so the client itself never sleeps
//! except for retry backoff. All methods take `&self`, so one client serves a whole
//! bounded-parallel sibling group.

use super::{FetchError, Fetcher, Page, Resource};
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; webbook/0.1; +https://github.com/webbook)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for a request (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 2] = [1, 2];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

#[derive(Debug, Clone)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Client with default User-Agent, timeout and retries.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET with retries for transient failures.
    ///
    /// Retries on: timeout, connection errors, HTTP 5xx, and HTTP 429. Non-retryable errors
    /// (e.g. 4xx except 429) are returned immediately. A non-success final status is an error.
    pub fn get_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            input: url.to_string(),
            reason: e.to_string(),
        })?;
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0u32;
        loop {
            let last_attempt = attempt + 1 >= max_attempts;
            match self.inner.get(parsed.clone()).send() {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if retryable && !last_attempt {
                        let backoff = if status.as_u16() == 429 {
                            pick_backoff(&BACKOFF_429_SECS, attempt)
                        } else {
                            pick_backoff(&self.backoff_secs, attempt)
                        };
                        debug!(url, status = status.as_u16(), backoff, "retrying");
                        std::thread::sleep(Duration::from_secs(backoff));
                        attempt += 1;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if retryable && !last_attempt {
                        let backoff = pick_backoff(&self.backoff_secs, attempt);
                        debug!(url, error = %e, backoff, "retrying");
                        std::thread::sleep(Duration::from_secs(backoff));
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }
    }
}

fn pick_backoff(table: &[u64], attempt: u32) -> u64 {
    table
        .get(attempt as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(1)
}

impl Fetcher for PoliteClient {
    fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        debug!(url, "fetching page");
        let response = self.get_with_retry(url)?;
        // Redirects may change the base for relative links.
        let final_url = response.url().to_string();
        let markup = response.text().map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        Ok(Page {
            url: final_url,
            markup,
        })
    }

    fn fetch_bytes(&self, url: &str) -> Result<Resource, FetchError> {
        debug!(url, "fetching resource");
        let response = self.get_with_retry(url)?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        Ok(Resource {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Builder for PoliteClient with optional User-Agent, timeout, and retry settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Number of HTTP attempts for transient failures (default 3, minimum 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry. If shorter than retry_count - 1, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            // Exponential 1, 2, 4, ... for (retry_count - 1) steps
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_backoff_reuses_last_value() {
        assert_eq!(pick_backoff(&[1, 2], 0), 1);
        assert_eq!(pick_backoff(&[1, 2], 1), 2);
        assert_eq!(pick_backoff(&[1, 2], 5), 2);
        assert_eq!(pick_backoff(&[], 0), 1);
    }

    #[test]
    fn builder_defaults_build() {
        let client = PoliteClient::builder()
            .timeout_secs(5)
            .retry_count(0)
            .retry_backoff_secs(vec![])
            .build()
            .unwrap();
        assert_eq!(client.retry_count, 1);
        assert!(client.backoff_secs.is_empty());
    }

    #[test]
    fn builder_exponential_backoff_when_empty() {
        let client = PoliteClient::builder()
            .retry_count(4)
            .retry_backoff_secs(vec![])
            .build()
            .unwrap();
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
    }

    #[test]
    fn invalid_url_is_rejected_before_sending() {
        let client = PoliteClient::builder().retry_count(1).build().unwrap();
        let result = client.fetch_page("not a url");
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }
}
