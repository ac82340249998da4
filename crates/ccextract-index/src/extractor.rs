//! Pull one archived payload out of its WARC container and write it to the sink.

use std::fmt;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use ccextract_core::{EmitOutcome, Emitter, FetchError, Fetcher, SharedCounters};
use flate2::read::MultiGzDecoder;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::path_rewriter::{TargetPathRewriter, TemplateError};
use crate::record::IndexRecord;
use crate::side_log::{ExtractedEntry, SideLogs};
use crate::warc::{WarcError, WarcRecord};

#[derive(Debug)]
pub enum ExtractError {
    /// Record lacks filename, offset or a positive length
    MissingLocation,
    Fetch(FetchError),
    Warc(WarcError),
    Io(io::Error),
    Template(TemplateError),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLocation => f.write_str("record has no WARC filename/offset/length"),
            Self::Fetch(e) => write!(f, "fetch: {e}"),
            Self::Warc(e) => write!(f, "warc: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Template(e) => write!(f, "target path: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Warc(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Template(e) => Some(e),
            Self::MissingLocation => None,
        }
    }
}

impl From<FetchError> for ExtractError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

impl From<WarcError> for ExtractError {
    fn from(e: WarcError) -> Self {
        Self::Warc(e)
    }
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<TemplateError> for ExtractError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted {
        entry: ExtractedEntry,
        emitted: EmitOutcome,
    },
    /// First WARC record was not an HTTP response
    NotHttpResponse,
    EmptyPayload,
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    sha1: Sha1,
    sha256: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            written: 0,
        }
    }

    /// (base32 SHA-1, hex SHA-256, byte count)
    fn finish(mut self) -> io::Result<(String, String, u64)> {
        self.inner.flush()?;
        Ok((
            data_encoding::BASE32.encode(&self.sha1.finalize()),
            hex::encode(self.sha256.finalize()),
            self.written,
        ))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.sha1.update(&buf[..n]);
        self.sha256.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Per-worker extractor: owns its fetcher and emitter.
pub struct PayloadExtractor {
    fetcher: Box<dyn Fetcher>,
    emitter: Box<dyn Emitter>,
    rewriter: TargetPathRewriter,
    counters: Arc<SharedCounters>,
    side_logs: Arc<SideLogs>,
    extract_truncated: bool,
    staging_dir: Option<PathBuf>,
}

impl PayloadExtractor {
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        emitter: Box<dyn Emitter>,
        rewriter: TargetPathRewriter,
        counters: Arc<SharedCounters>,
        side_logs: Arc<SideLogs>,
    ) -> Self {
        Self {
            fetcher,
            emitter,
            rewriter,
            counters,
            side_logs,
            extract_truncated: false,
            staging_dir: None,
        }
    }

    /// Record the truncation reason in success entries.
    pub fn with_extract_truncated(mut self, extract_truncated: bool) -> Self {
        self.extract_truncated = extract_truncated;
        self
    }

    /// Stage payloads here instead of the system temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn extract(&self, record: &IndexRecord) -> Result<ExtractOutcome, ExtractError> {
        let (Some(filename), Some((start, end))) = (record.filename.as_deref(), record.byte_range())
        else {
            return Err(ExtractError::MissingLocation);
        };
        log::debug!("fetching {filename} {start}-{end}");
        let fetched = self.fetcher.fetch_range(filename, start, end)?;
        let mut reader = BufReader::new(MultiGzDecoder::new(fetched.stream));
        let warc = WarcRecord::read_from(&mut reader)?;

        if !warc.is_http_response() {
            log::debug!(
                "skipping {} record ({:?}) for {:?}",
                warc.warc_type().unwrap_or("untyped"),
                warc.content_type_base(),
                record.url
            );
            return Ok(ExtractOutcome::NotHttpResponse);
        }
        let http = warc.http_response()?;
        let Some(payload) = http.payload() else {
            log::warn!("empty payload for {}", record.url.as_deref().unwrap_or("?"));
            self.counters.inc_empty_payload();
            return Ok(ExtractOutcome::EmptyPayload);
        };

        // Deleted on drop, whichever way this function returns.
        let staged = match &self.staging_dir {
            Some(dir) => tempfile::Builder::new().prefix("ccextract-").tempfile_in(dir)?,
            None => tempfile::Builder::new().prefix("ccextract-").tempfile()?,
        };
        let mut writer = HashingWriter::new(io::BufWriter::new(staged.as_file()));
        writer.write_all(payload)?;
        let (sha1, sha256, length) = writer.finish()?;

        if record.digest.as_deref() != Some(sha1.as_str()) {
            log::warn!(
                "bad digest for url={} ccindex={} sha1={sha1}",
                record.url.as_deref().unwrap_or("?"),
                record.digest.as_deref().unwrap_or("")
            );
        }

        let target = self.rewriter.rewrite(&sha256)?;
        let emitted = self.emitter.emit(&target, staged.path())?;
        if emitted == EmitOutcome::Skipped {
            log::debug!("{target} already present");
        }

        let entry = ExtractedEntry {
            url: record.url.clone(),
            mime: record.normalized_mime(),
            mime_detected: record.normalized_mime_detected(),
            warc_file: Some(filename.to_string()),
            warc_offset: record.offset,
            warc_length: record.length,
            truncated: if self.extract_truncated {
                record.truncated().map(str::to_string)
            } else {
                None
            },
            sha256,
            length,
            path: target,
        };
        self.side_logs.log_extracted(&entry)?;
        Ok(ExtractOutcome::Extracted { entry, emitted })
    }
}
