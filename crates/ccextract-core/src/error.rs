//! Error types for fetching archive bytes and running the shard pipeline

use std::time::Duration;

/// Error from fetching a resource (whole or byte range) from a transport.
#[derive(Debug)]
pub enum FetchError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error (local filesystem, broken body stream, gunzip)
    Io(std::io::Error),
    /// The store kept answering "temporarily unavailable" until the
    /// back-off schedule ran out.
    Throttled { resource: String, attempts: usize },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Throttled { resource, attempts } => {
                write!(f, "throttled: {resource} still unavailable after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl FetchError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    /// "Service temporarily unavailable": the only condition the back-off fetcher retries.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Http {
                status: Some(503),
                ..
            }
        )
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == Some(404),
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::Throttled { .. } => false,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Fatal pipeline error. Anything in here aborts the whole run.
#[derive(Debug)]
pub enum PipelineError {
    /// A worker waited too long for the next shard
    Stalled(Duration),
    /// Path lists could not be fetched or read
    Enumeration(FetchError),
    /// A record processor failed to set up or close its resources
    Processor(std::io::Error),
    /// Thread pool could not be built
    ThreadPool(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stalled(waited) => write!(
                f,
                "pipeline stalled: waited {} minutes for a new shard",
                waited.as_secs() / 60
            ),
            Self::Enumeration(e) => write!(f, "shard enumeration failed: {e}"),
            Self::Processor(e) => write!(f, "record processor: {e}"),
            Self::ThreadPool(msg) => write!(f, "thread pool: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Enumeration(e) => Some(e),
            Self::Processor(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn http_err(status: u16) -> FetchError {
        FetchError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn http_503_unavailable() {
        assert!(http_err(503).is_unavailable());
    }

    #[test]
    fn other_statuses_not_unavailable() {
        for status in [400, 403, 404, 429, 500, 502, 504] {
            assert!(!http_err(status).is_unavailable(), "{status}");
        }
    }

    #[test]
    fn io_never_unavailable() {
        let err = FetchError::Io(std::io::Error::new(ErrorKind::TimedOut, "timeout"));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn throttled_is_distinct() {
        let err = FetchError::Throttled {
            resource: "crawl-data/x.warc.gz".into(),
            attempts: 5,
        };
        assert!(err.is_throttled());
        assert!(!err.is_unavailable());
        assert!(!err.is_not_found());
        assert!(format!("{err}").contains("5 attempts"));
    }

    #[test]
    fn not_found_http_and_io() {
        assert!(http_err(404).is_not_found());
        let err = FetchError::Io(std::io::Error::new(ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        assert!(!http_err(503).is_not_found());
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", http_err(404)), "HTTP 404: test");
    }

    #[test]
    fn display_http_without_status() {
        let err = FetchError::Http {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP error: connection refused");
    }

    #[test]
    fn display_stalled_in_minutes() {
        let err = PipelineError::Stalled(Duration::from_secs(120 * 60));
        assert!(format!("{err}").contains("120 minutes"));
    }
}
