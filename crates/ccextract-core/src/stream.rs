//! HTTP byte streams with read timeout, byte counting and gzip line reading.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync interface so rayon workers can read with `std::io`.

use std::io::{self, BufReader, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::task::Context;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::FetchError;

/// Default read timeout for stall detection
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer size for gzip stream reader (256KB)
const GZIP_BUF_SIZE: usize = 256 * 1024;

/// Owned, sendable byte stream handed out by every transport.
pub type ByteStream = Box<dyn Read + Send>;

/// Shared byte counter for progress tracking
pub type ByteCounter = Arc<AtomicU64>;

/// Buffered reader over a (possibly multi-member) gzip stream with byte counting
pub type GzipReader = BufReader<MultiGzDecoder<CountingReader<ByteStream>>>;

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Build an HTTP client. Each fetcher owns one so workers do not contend on a pool.
pub fn build_client() -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(2)
        .user_agent(concat!("ccextract/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::from_reqwest(&e))
}

/// HTTP GET (optionally with an inclusive byte range) → sync reader.
///
/// Returns (reader, content_length). A range request answered with anything
/// other than 206 is an error: a full body would silently start at byte 0.
pub fn http_get(
    client: &reqwest::Client,
    url: &str,
    range: Option<(u64, u64)>,
    read_timeout: Duration,
) -> Result<(ByteStream, Option<u64>), FetchError> {
    SHARED_RUNTIME.handle().block_on(async {
        let mut request = client.get(url);
        if let Some((start, end)) = range {
            request = request.header(reqwest::header::RANGE, format!("bytes={start}-{end}"));
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::from_reqwest(&e))?;

        if range.is_some() && response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::Http {
                status: Some(response.status().as_u16()),
                message: format!("range request not honored for {url}"),
            });
        }

        let total_bytes = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        // Convert response body stream to AsyncRead
        let stream = response.bytes_stream();
        let async_reader = tokio_util::io::StreamReader::new(
            stream.map(|result| result.map_err(io::Error::other)),
        );

        let reader: ByteStream = Box::new(TimeoutReader::new(Box::pin(async_reader), read_timeout));
        Ok((reader, total_bytes))
    })
}

/// Wrap a byte stream: count compressed bytes → gunzip all members → buffer.
pub fn gzip_reader(stream: ByteStream) -> (GzipReader, ByteCounter) {
    let counter = Arc::new(AtomicU64::new(0));
    let counting_reader = CountingReader {
        inner: stream,
        count: counter.clone(),
    };
    let gz = MultiGzDecoder::new(counting_reader);
    (BufReader::with_capacity(GZIP_BUF_SIZE, gz), counter)
}

/// Reader wrapper that tracks bytes read
pub struct CountingReader<R> {
    inner: R,
    count: ByteCounter,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Async-to-sync bridge with read timeout.
///
/// Each read operation has a timeout - if no data arrives within the
/// configured window, returns a TimedOut error.
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    timeout: Duration,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send>>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(timeout, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s with no data)", timeout.as_secs()),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{BufRead, Write};

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn gzip_reader_reads_all_members() {
        // CDX shards are concatenations of many gzip members
        let mut bytes = gz(b"a 1 {}\n");
        bytes.extend(gz(b"b 2 {}\n"));
        let compressed_len = bytes.len() as u64;

        let (reader, counter) = gzip_reader(Box::new(io::Cursor::new(bytes)));
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a 1 {}", "b 2 {}"]);
        assert_eq!(counter.load(Ordering::Relaxed), compressed_len);
    }

    #[test]
    fn gzip_reader_rejects_plain_bytes() {
        let (mut reader, _) = gzip_reader(Box::new(io::Cursor::new(b"not gzip".to_vec())));
        let mut out = String::new();
        assert!(reader.read_line(&mut out).is_err());
    }

    #[test]
    fn counting_reader_counts() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut reader = CountingReader {
            inner: io::Cursor::new(vec![0u8; 1000]),
            count: counter.clone(),
        };
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1000);
    }
}
