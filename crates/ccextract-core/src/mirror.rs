//! Shard mirroring: copy index files byte for byte into a local tree, so
//! later runs can read them through a `FileSystemFetcher`.

use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::ProgressBar;

use crate::enumerator::ShardRef;
use crate::error::FetchError;
use crate::pool::{Flow, ShardHandler};
use crate::progress;
use crate::shutdown::AbortFlag;
use crate::sink::{EmitOutcome, Emitter};
use crate::transport::Fetcher;

const COPY_BUF: usize = 64 * 1024;

/// Per-worker tally, merged at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: usize,
    /// Already present in the mirror, not fetched again
    pub skipped: usize,
    pub bytes: u64,
}

impl CopyStats {
    pub fn merge(&mut self, other: &CopyStats) {
        self.copied += other.copied;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

/// Shard handler that stages each fetched file unchanged and emits it under
/// its own path.
pub struct ShardCopier {
    emitter: Arc<dyn Emitter>,
    staging_dir: Option<PathBuf>,
    stats: CopyStats,
}

impl ShardCopier {
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        Self {
            emitter,
            staging_dir: None,
            stats: CopyStats::default(),
        }
    }

    /// Stage files here instead of the system temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn stats(&self) -> &CopyStats {
        &self.stats
    }

    /// Copy a single file outside the pool (path lists).
    pub fn copy_file(
        &mut self,
        fetcher: &dyn Fetcher,
        path: &str,
        abort: &AbortFlag,
    ) -> Result<(), FetchError> {
        self.copy(fetcher, path, abort, &ProgressBar::hidden())
    }

    fn copy(
        &mut self,
        fetcher: &dyn Fetcher,
        path: &str,
        abort: &AbortFlag,
        pb: &ProgressBar,
    ) -> Result<(), FetchError> {
        if self.emitter.exists(path)? {
            log::debug!("{path} already mirrored");
            self.stats.skipped += 1;
            return Ok(());
        }

        let mut fetched = fetcher.fetch(path)?;
        if let Some(total) = fetched.length {
            progress::show_bytes(pb, total);
        }

        // Deleted on drop, so an aborted or failed copy leaves nothing behind.
        let staged = match &self.staging_dir {
            Some(dir) => tempfile::Builder::new()
                .prefix(".ccextract-")
                .tempfile_in(dir)?,
            None => tempfile::Builder::new().prefix("ccextract-").tempfile()?,
        };
        let mut out = BufWriter::new(staged.as_file());
        let mut buf = vec![0u8; COPY_BUF];
        let mut bytes = 0u64;
        loop {
            if abort.is_requested() {
                log::debug!("{path}: aborted after {bytes} bytes");
                return Ok(());
            }
            let n = match fetched.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            out.write_all(&buf[..n])?;
            bytes += n as u64;
            pb.set_position(bytes);
        }
        out.flush()?;
        drop(out);

        if let Some(expected) = fetched.length {
            if bytes != expected {
                return Err(FetchError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{path}: got {bytes} of {expected} bytes"),
                )));
            }
        }

        match self.emitter.emit(path, staged.path())? {
            EmitOutcome::Written(n) => {
                log::info!("mirrored {path} ({} bytes)", progress::fmt_num(n));
                self.stats.copied += 1;
                self.stats.bytes += n;
            }
            EmitOutcome::Skipped => self.stats.skipped += 1,
        }
        Ok(())
    }
}

impl ShardHandler for ShardCopier {
    fn handle_shard(
        &mut self,
        shard: &ShardRef,
        fetcher: &dyn Fetcher,
        abort: &AbortFlag,
        pb: &ProgressBar,
    ) -> Result<(u64, Flow), FetchError> {
        self.copy(fetcher, &shard.path, abort, pb)?;
        let flow = if abort.is_requested() {
            Flow::Stop
        } else {
            Flow::Continue
        };
        Ok((0, flow))
    }

    fn finish(&mut self) -> io::Result<()> {
        log::debug!(
            "copier done: {} copied, {} skipped",
            self.stats.copied,
            self.stats.skipped
        );
        Ok(())
    }
}
