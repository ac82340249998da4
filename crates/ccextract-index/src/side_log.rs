//! Append-only side outputs shared by all workers.
//!
//! - `extracted-urls.jsonl`: one [`ExtractedEntry`] per extracted file
//! - `truncated-urls.txt`: URLs of truncated captures that were not extracted
//! - `truncated-urls-full.jsonl`: the full index record for each of those

use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use crate::record::IndexRecord;

pub const EXTRACTED_FILE: &str = "extracted-urls.jsonl";
pub const TRUNCATED_URLS_FILE: &str = "truncated-urls.txt";
pub const TRUNCATED_FULL_FILE: &str = "truncated-urls-full.jsonl";

/// Success record for one extracted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedEntry {
    pub url: Option<String>,
    pub mime: Option<String>,
    pub mime_detected: Option<String>,
    pub warc_file: Option<String>,
    pub warc_offset: Option<u64>,
    pub warc_length: Option<u64>,
    /// Only written when truncated captures are being extracted too
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<String>,
    pub sha256: String,
    pub length: u64,
    pub path: String,
}

type Sink = Mutex<LineWriter<File>>;

fn open_append(path: &Path) -> io::Result<Sink> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Mutex::new(LineWriter::new(file)))
}

fn write_line(sink: &Sink, line: &str) -> io::Result<()> {
    let mut w = sink
        .lock()
        .map_err(|_| io::Error::other("side log lock poisoned"))?;
    writeln!(w, "{line}")
}

/// The side logs of one run. Absent sinks are silently skipped.
#[derive(Debug, Default)]
pub struct SideLogs {
    dir: Option<PathBuf>,
    extracted: Option<Sink>,
    truncated_urls: Option<Sink>,
    truncated_full: Option<Sink>,
}

impl SideLogs {
    /// Open (appending) under `dir`. The truncated logs are only opened
    /// when truncated captures are skipped rather than extracted.
    pub fn open(dir: &Path, extract_truncated: bool) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let (truncated_urls, truncated_full) = if extract_truncated {
            (None, None)
        } else {
            (
                Some(open_append(&dir.join(TRUNCATED_URLS_FILE))?),
                Some(open_append(&dir.join(TRUNCATED_FULL_FILE))?),
            )
        };
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            extracted: Some(open_append(&dir.join(EXTRACTED_FILE))?),
            truncated_urls,
            truncated_full,
        })
    }

    /// No files; everything is dropped.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn log_extracted(&self, entry: &ExtractedEntry) -> io::Result<()> {
        if let Some(sink) = &self.extracted {
            write_line(sink, &serde_json::to_string(entry).map_err(io::Error::other)?)?;
        }
        Ok(())
    }

    pub fn log_truncated(&self, record: &IndexRecord) -> io::Result<()> {
        if let Some(sink) = &self.truncated_urls {
            write_line(sink, record.url.as_deref().unwrap_or(""))?;
        }
        if let Some(sink) = &self.truncated_full {
            write_line(sink, &serde_json::to_string(record).map_err(io::Error::other)?)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        for sink in [&self.extracted, &self.truncated_urls, &self.truncated_full]
            .into_iter()
            .flatten()
        {
            sink.lock()
                .map_err(|_| io::Error::other("side log lock poisoned"))?
                .flush()?;
        }
        Ok(())
    }
}
