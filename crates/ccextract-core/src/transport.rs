//! Byte transports: fetch a whole resource or an inclusive byte range of it.
//!
//! The pipeline only ever needs "give me these bytes of that named resource".
//! Backends are selected once from configuration and then used through
//! [`Fetcher`]; nothing downstream inspects which variant it got.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::FetchError;
use crate::stream::{self, ByteStream, READ_TIMEOUT};

/// Bytes returned by a transport, with the length when the backend knows it.
pub struct Fetched {
    pub stream: ByteStream,
    pub length: Option<u64>,
}

impl std::fmt::Debug for Fetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetched")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl Fetched {
    /// Drain the stream into memory.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, FetchError> {
        let mut buf = Vec::with_capacity(self.length.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        self.stream.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Capability shared by every byte transport.
pub trait Fetcher: Send {
    /// Fetch the whole resource.
    fn fetch(&self, id: &str) -> Result<Fetched, FetchError>;

    /// Fetch bytes `start..=end` of the resource.
    fn fetch_range(&self, id: &str, start: u64, end: u64) -> Result<Fetched, FetchError>;

    /// Short backend name for log lines
    fn name(&self) -> &'static str;
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch(&self, id: &str) -> Result<Fetched, FetchError> {
        (**self).fetch(id)
    }

    fn fetch_range(&self, id: &str, start: u64, end: u64) -> Result<Fetched, FetchError> {
        (**self).fetch_range(id, start, end)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Plain HTTP(S) transport. Identifiers must already be absolute URLs;
/// wrap in [`crate::backoff::BackoffFetcher`] to resolve relative ones.
pub struct HttpFetcher {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: stream::build_client()?,
            read_timeout: READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, id: &str) -> Result<Fetched, FetchError> {
        let (stream, length) = stream::http_get(&self.client, id, None, self.read_timeout)?;
        Ok(Fetched { stream, length })
    }

    fn fetch_range(&self, id: &str, start: u64, end: u64) -> Result<Fetched, FetchError> {
        let (stream, length) =
            stream::http_get(&self.client, id, Some((start, end)), self.read_timeout)?;
        Ok(Fetched { stream, length })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Local filesystem transport rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FileSystemFetcher {
    base_path: PathBuf,
}

impl FileSystemFetcher {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve an identifier under the base path; `..` components are rejected.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(id.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path escapes base directory: {id}"),
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

impl Fetcher for FileSystemFetcher {
    fn fetch(&self, id: &str) -> Result<Fetched, FetchError> {
        let path = self.resolve(id)?;
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        Ok(Fetched {
            stream: Box::new(BufReader::new(file)),
            length: Some(length),
        })
    }

    fn fetch_range(&self, id: &str, start: u64, end: u64) -> Result<Fetched, FetchError> {
        if end < start {
            return Err(FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("empty range {start}-{end} for {id}"),
            )));
        }
        let path = self.resolve(id)?;
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if start >= file_len {
            return Err(FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range start {start} beyond end of {} ({file_len} bytes)", path.display()),
            )));
        }
        file.seek(SeekFrom::Start(start))?;
        let length = (end - start + 1).min(file_len - start);
        Ok(Fetched {
            stream: Box::new(BufReader::new(file).take(length)),
            length: Some(length),
        })
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, FileSystemFetcher) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("crawl-data")).unwrap();
        std::fs::write(dir.path().join("crawl-data/a.bin"), b"0123456789").unwrap();
        let fetcher = FileSystemFetcher::new(dir.path());
        (dir, fetcher)
    }

    #[test]
    fn fetch_whole_file() {
        let (_dir, fetcher) = fixture();
        let fetched = fetcher.fetch("crawl-data/a.bin").unwrap();
        assert_eq!(fetched.length, Some(10));
        assert_eq!(fetched.into_bytes().unwrap(), b"0123456789");
    }

    #[test]
    fn fetch_range_is_inclusive() {
        let (_dir, fetcher) = fixture();
        let fetched = fetcher.fetch_range("crawl-data/a.bin", 2, 5).unwrap();
        assert_eq!(fetched.length, Some(4));
        assert_eq!(fetched.into_bytes().unwrap(), b"2345");
    }

    #[test]
    fn leading_slash_stays_under_base() {
        let (_dir, fetcher) = fixture();
        let bytes = fetcher.fetch("/crawl-data/a.bin").unwrap().into_bytes().unwrap();
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn range_past_end_is_clamped() {
        let (_dir, fetcher) = fixture();
        let bytes = fetcher
            .fetch_range("crawl-data/a.bin", 8, 100)
            .unwrap()
            .into_bytes()
            .unwrap();
        assert_eq!(bytes, b"89");
    }

    #[test]
    fn range_start_beyond_file_fails() {
        let (_dir, fetcher) = fixture();
        assert!(fetcher.fetch_range("crawl-data/a.bin", 10, 20).is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_dir, fetcher) = fixture();
        let err = fetcher.fetch("crawl-data/missing.bin").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn parent_dir_rejected() {
        let (_dir, fetcher) = fixture();
        assert!(fetcher.fetch("../etc/passwd").is_err());
    }
}
