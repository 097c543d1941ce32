//! Blocking HTTP client with configurable politeness (delay between requests) and optional retries.
//!
//! The delay is a floor of [MIN_DELAY_MS] regardless of configuration.

use super::error::ScraperError;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_SECS: u64 = 1;
const MAX_REDIRECTS: usize = 10;
/// Shortest gap allowed between two requests, even when the configured delay is 0.
pub const MIN_DELAY_MS: u64 = 200;

/// Default number of attempts for fetch_text (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 2] = [1, 2];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Blocking HTTP client that enforces a delay between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// One GET, after waiting out the politeness delay.
    pub fn get(&mut self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        self.wait_delay();
        let result = self.inner.get(url).send();
        self.last_request = Some(Instant::now());
        result
    }

    /// GET `url` and return the body as text.
    ///
    /// Timeouts, connect errors, 5xx and 429 are retried up to the attempt
    /// limit; anything else fails at once. `context` labels status errors
    /// (e.g. "novel page", "chapter list page 3").
    pub fn fetch_text(&mut self, url: &str, context: &str) -> Result<String, ScraperError> {
        let attempts = self.retry_count.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(url, context) {
                Ok(body) => return Ok(body),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Transient { error, .. }) if attempt >= attempts => return Err(error),
                Err(Attempt::Transient { error, rate_limited }) => {
                    let backoff = self.backoff_for(attempt, rate_limited);
                    warn!(%url, error = %error, attempt, backoff, "retrying request");
                    std::thread::sleep(Duration::from_secs(backoff));
                    attempt += 1;
                }
            }
        }
    }

    /// GET `url` once and return the body as text. Same delay and status
    /// checks as [PoliteClient::fetch_text], but no failure is retried.
    pub fn fetch_text_once(&mut self, url: &str, context: &str) -> Result<String, ScraperError> {
        self.attempt(url, context).map_err(|a| match a {
            Attempt::Transient { error, .. } | Attempt::Fatal(error) => error,
        })
    }

    fn attempt(&mut self, url: &str, context: &str) -> Result<String, Attempt> {
        let response = self.get(url).map_err(|e| {
            let transient = e.is_timeout() || e.is_connect();
            let error = ScraperError::Network {
                url: url.to_string(),
                source: e,
            };
            if transient {
                Attempt::Transient {
                    error,
                    rate_limited: false,
                }
            } else {
                Attempt::Fatal(error)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let error = ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                context: Some(context.to_string()),
            };
            let rate_limited = status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            return Err(if rate_limited || status.is_server_error() {
                Attempt::Transient {
                    error,
                    rate_limited,
                }
            } else {
                Attempt::Fatal(error)
            });
        }
        response.text().map_err(|e| {
            Attempt::Fatal(ScraperError::BodyRead {
                url: url.to_string(),
                source: e,
            })
        })
    }

    /// Seconds to wait after failed attempt `attempt` (1-based). Past the end of a table the last entry repeats.
    fn backoff_for(&self, attempt: u32, rate_limited: bool) -> u64 {
        let table: &[u64] = if rate_limited {
            &BACKOFF_429_SECS
        } else {
            &self.backoff_secs
        };
        let i = (attempt.saturating_sub(1) as usize).min(table.len().saturating_sub(1));
        table.get(i).copied().unwrap_or(1)
    }

    fn wait_delay(&mut self) {
        let Some(last) = self.last_request else {
            return;
        };
        if let Some(remaining) = self.delay.checked_sub(last.elapsed()) {
            debug!(wait_ms = remaining.as_millis() as u64, "politeness delay");
            std::thread::sleep(remaining);
        }
    }
}

/// Failed attempt, split by whether another try could help.
enum Attempt {
    Transient {
        error: ScraperError,
        rate_limited: bool,
    },
    Fatal(ScraperError),
}

/// Settings for [PoliteClient]; every field has a default.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    /// Browser-like when unset.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Minimum gap between requests. Values below [MIN_DELAY_MS] are raised to it.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Total attempts per request, including the first.
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Seconds to wait before each retry. Empty means doubling from 1s.
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
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs).max(Duration::from_millis(MIN_DELAY_MS)),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_reuses_last_value() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder()
            .retry_count(5)
            .retry_backoff_secs(vec![3, 7])
            .build()?;
        assert_eq!(client.backoff_for(1, false), 3);
        assert_eq!(client.backoff_for(2, false), 7);
        assert_eq!(client.backoff_for(4, false), 7);
        Ok(())
    }

    #[test]
    fn empty_backoff_becomes_exponential() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .build()?;
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        Ok(())
    }

    #[test]
    fn rate_limit_backoff_is_long() -> Result<(), reqwest::Error> {
        let client = PoliteClient::new()?;
        assert_eq!(client.backoff_for(1, true), 30);
        assert_eq!(client.backoff_for(9, true), 120);
        Ok(())
    }

    #[test]
    fn zero_delay_is_raised_to_floor() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder().delay_secs(0).build()?;
        assert_eq!(client.delay, Duration::from_millis(MIN_DELAY_MS));
        let client = PoliteClient::builder().delay_secs(2).build()?;
        assert_eq!(client.delay, Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn retry_count_is_at_least_one() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder().retry_count(0).build()?;
        assert_eq!(client.retry_count, 1);
        Ok(())
    }
}
