//! Back-off retry around a byte transport.
//!
//! Only "service temporarily unavailable" (HTTP 503) is retried, after
//! sleeping for the next delay in the configured schedule. Every other
//! failure goes straight back to the caller. This is the single place in
//! the pipeline that retries anything.

use std::time::Duration;

use crate::error::FetchError;
use crate::transport::{Fetched, Fetcher};

/// Public HTTPS endpoint of the archive
pub const DEFAULT_BASE_URL: &str = "https://data.commoncrawl.org";

/// Default back-off schedule for container fetches
pub const DEFAULT_THROTTLE_SECONDS: [u64; 4] = [30, 120, 600, 1800];

/// Shorter schedule for index shards and path lists
pub const DEFAULT_INDEX_THROTTLE_SECONDS: [u64; 2] = [30, 120];

/// Convert a schedule in seconds into durations
pub fn throttle_schedule(seconds: &[u64]) -> Vec<Duration> {
    seconds.iter().map(|s| Duration::from_secs(*s)).collect()
}

/// Something that can block the current thread. Injectable so tests can
/// count sleeps without waiting for them.
pub trait Sleeper: Send {
    fn sleep(&self, duration: Duration);
}

/// Blocks the worker thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Transport wrapper: resolves relative identifiers and backs off on 503.
///
/// With `m` delays a fetch makes at most `m + 1` attempts and sleeps once
/// before each retry. When the last attempt still sees 503 the result is
/// [`FetchError::Throttled`], never a plain HTTP error.
#[derive(Debug)]
pub struct BackoffFetcher<F, S = ThreadSleeper> {
    inner: F,
    delays: Vec<Duration>,
    base_url: Option<String>,
    sleeper: S,
}

impl<F: Fetcher> BackoffFetcher<F> {
    pub fn new(inner: F, delays: Vec<Duration>) -> Self {
        Self {
            inner,
            delays,
            base_url: None,
            sleeper: ThreadSleeper,
        }
    }
}

impl<F: Fetcher, S: Sleeper> BackoffFetcher<F, S> {
    /// Resolve identifiers that are not already URLs against `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> BackoffFetcher<F, S2> {
        BackoffFetcher {
            inner: self.inner,
            delays: self.delays,
            base_url: self.base_url,
            sleeper,
        }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Turn a (possibly relative) identifier into the one sent to the transport.
    pub fn resolve(&self, id: &str) -> String {
        match &self.base_url {
            Some(base) if !is_absolute_url(id) => {
                format!("{}/{}", base.trim_end_matches('/'), id.trim_start_matches('/'))
            }
            _ => id.to_string(),
        }
    }

    fn with_backoff(
        &self,
        id: &str,
        mut attempt_fn: impl FnMut(&str) -> Result<Fetched, FetchError>,
    ) -> Result<Fetched, FetchError> {
        let resolved = self.resolve(id);
        let mut retries = 0usize;
        loop {
            match attempt_fn(&resolved) {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_unavailable() => match self.delays.get(retries) {
                    Some(delay) => {
                        retries += 1;
                        log::warn!(
                            "got backoff warning (#{retries}) for {resolved}. Will sleep {} seconds. Message: {e}",
                            delay.as_secs()
                        );
                        self.sleeper.sleep(*delay);
                    }
                    None => {
                        log::error!("{resolved}: still unavailable after {} attempts", retries + 1);
                        return Err(FetchError::Throttled {
                            resource: resolved,
                            attempts: retries + 1,
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl<F: Fetcher, S: Sleeper> Fetcher for BackoffFetcher<F, S> {
    fn fetch(&self, id: &str) -> Result<Fetched, FetchError> {
        self.with_backoff(id, |url| self.inner.fetch(url))
    }

    fn fetch_range(&self, id: &str, start: u64, end: u64) -> Result<Fetched, FetchError> {
        self.with_backoff(id, |url| self.inner.fetch_range(url, start, end))
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

fn is_absolute_url(id: &str) -> bool {
    id.starts_with("http://") || id.starts_with("https://")
}
