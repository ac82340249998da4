//! Run entry points: wire configuration, processors and the worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ccextract_core::{
    AbortFlag, CopyStats, Emitter, FileSystemEmitter, PathSpec, ProgressContext, ShardCopier,
    SharedCounters, ShardWorker, fmt_num, run_pool,
};

use crate::config::ExtractorConfig;
use crate::extractor::PayloadExtractor;
use crate::mime_counter::{MimeCountProcessor, MimeCounts};
use crate::processor::{ExtractProcessor, ExtractStats};
use crate::side_log::SideLogs;

/// What a whole pool run did, independent of the processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolTotals {
    pub shards_enumerated: usize,
    pub shards_done: usize,
    pub shards_failed: usize,
    pub lines: u64,
    pub records_read: u64,
    pub truncated_seen: u64,
    pub elapsed: Duration,
}

impl PoolTotals {
    fn log(&self) {
        log::info!(
            "Shards: {}/{} completed ({} failed)",
            self.shards_done,
            self.shards_enumerated,
            self.shards_failed
        );
        log::info!(
            "Records: {} read from {} lines, {} truncated",
            fmt_num(self.records_read),
            fmt_num(self.lines),
            fmt_num(self.truncated_seen)
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        let secs = self.elapsed.as_secs_f64();
        if self.records_read > 0 && secs > 0.0 {
            log::info!("Throughput: {:.0} records/sec", self.records_read as f64 / secs);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub totals: PoolTotals,
    pub stats: ExtractStats,
    pub files_extracted: u64,
    pub empty_payload: u64,
    pub dry_run: bool,
    pub docs_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ExtractSummary {
    pub fn log(&self) {
        log::info!("=== Extraction Summary ===");
        self.totals.log();
        if self.dry_run {
            log::info!("Dry run: {} files would have been extracted", fmt_num(self.stats.dry_run));
        } else {
            log::info!(
                "Files: {} extracted ({} already present) into {}",
                fmt_num(self.stats.extracted),
                fmt_num(self.stats.already_present),
                self.docs_dir.display()
            );
        }
        log::info!(
            "Skipped: {} not HTTP responses, {} empty payloads, {} failed, {} truncated logged",
            fmt_num(self.stats.not_http),
            fmt_num(self.empty_payload),
            fmt_num(self.stats.failed),
            fmt_num(self.stats.truncated_logged)
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct MimeCountSummary {
    pub totals: PoolTotals,
    pub counts: MimeCounts,
    pub reports: Vec<PathBuf>,
}

impl MimeCountSummary {
    pub fn log(&self) {
        log::info!("=== MIME Count Summary ===");
        self.totals.log();
        log::info!("Distinct detected MIME types: {}", self.counts.total.len());
        for path in &self.reports {
            log::info!("Wrote {}", path.display());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchIndicesSummary {
    pub totals: PoolTotals,
    /// Shards and path lists together
    pub copy: CopyStats,
    pub mirror_dir: PathBuf,
}

impl FetchIndicesSummary {
    pub fn log(&self) {
        log::info!("=== Index Mirror Summary ===");
        log::info!(
            "Shards: {}/{} completed ({} failed)",
            self.totals.shards_done,
            self.totals.shards_enumerated,
            self.totals.shards_failed
        );
        log::info!(
            "Files: {} copied ({} bytes), {} already present, into {}",
            fmt_num(self.copy.copied as u64),
            fmt_num(self.copy.bytes),
            fmt_num(self.copy.skipped as u64),
            self.mirror_dir.display()
        );
        log::info!("Time: {:.1}s", self.totals.elapsed.as_secs_f64());
    }
}

fn totals<P>(outcome: &ccextract_core::PoolOutcome<P>, counters: &SharedCounters) -> PoolTotals {
    PoolTotals {
        shards_enumerated: outcome.shards_enumerated,
        shards_done: outcome.shards_done(),
        shards_failed: outcome.shards_failed(),
        lines: outcome.lines(),
        records_read: counters.records_read(),
        truncated_seen: counters.truncated_seen(),
        elapsed: outcome.elapsed,
    }
}

/// Extract every selected payload named by the configured index shards.
pub fn run_extract(
    config: &ExtractorConfig,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<ExtractSummary> {
    config.validate()?;
    let enumerator = config.shard_enumerator()?;
    let rewriter = config.target_path_rewriter()?;

    if !config.dry_run {
        std::fs::create_dir_all(&config.docs.path).with_context(|| {
            format!("Failed to create docs directory: {}", config.docs.path.display())
        })?;
    }
    let side_logs = Arc::new(
        SideLogs::open(&config.logs.dir, config.extract_truncated).with_context(|| {
            format!("Failed to open side logs in {}", config.logs.dir.display())
        })?,
    );
    let counters = Arc::new(SharedCounters::new());
    let selector = Arc::new(config.record_selector.clone());

    log::info!(
        "Extracting with {} workers from {} index path(s); WARCs from {}",
        config.num_threads,
        config.indices.paths.len(),
        config.fetcher.describe()
    );

    let mut workers = Vec::with_capacity(config.num_threads);
    for idx in 0..config.num_threads {
        let extractor = PayloadExtractor::new(
            config.new_fetcher()?,
            config.new_emitter(),
            rewriter.clone(),
            Arc::clone(&counters),
            Arc::clone(&side_logs),
        )
        .with_extract_truncated(config.extract_truncated);
        let processor = ExtractProcessor::new(
            Arc::clone(&selector),
            Arc::clone(&counters),
            Arc::clone(&side_logs),
            extractor,
            config.limits(),
        )
        .with_report_every(config.report_every())
        .with_dry_run(config.dry_run)
        .with_extract_truncated(config.extract_truncated);
        workers.push(ShardWorker::new(idx, config.new_index_fetcher()?, processor));
    }

    let outcome = run_pool(
        &config.pool_config(),
        &enumerator,
        config.new_index_fetcher()?,
        workers,
        abort,
        progress,
    )
    .context("Extraction failed")?;
    side_logs.flush().context("Failed to flush side logs")?;

    let totals = totals(&outcome, &counters);
    let mut stats = ExtractStats::default();
    for processor in outcome.into_processors() {
        stats.merge(processor.stats());
    }

    Ok(ExtractSummary {
        totals,
        stats,
        files_extracted: counters.files_extracted(),
        empty_payload: counters.empty_payload(),
        dry_run: config.dry_run,
        docs_dir: config.docs.path.clone(),
        logs_dir: config.logs.dir.clone(),
    })
}

/// Count detected MIME types over the configured shards and write the
/// three CSV reports into `report_dir`.
pub fn run_mime_count(
    config: &ExtractorConfig,
    report_dir: &Path,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<MimeCountSummary> {
    config.validate()?;
    let enumerator = config.shard_enumerator()?;
    let counters = Arc::new(SharedCounters::new());
    let selector = Arc::new(config.record_selector.clone());

    log::info!(
        "Counting MIME types with {} workers from {} index path(s)",
        config.num_threads,
        config.indices.paths.len()
    );

    let mut workers = Vec::with_capacity(config.num_threads);
    for idx in 0..config.num_threads {
        let processor = MimeCountProcessor::new(
            Arc::clone(&selector),
            Arc::clone(&counters),
            config.max_records,
            config.max_files_truncated,
        );
        let processor = match config.report_every {
            Some(n) => processor.with_report_every(n),
            None => processor,
        };
        workers.push(ShardWorker::new(idx, config.new_index_fetcher()?, processor));
    }

    let outcome = run_pool(
        &config.pool_config(),
        &enumerator,
        config.new_index_fetcher()?,
        workers,
        abort,
        progress,
    )
    .context("MIME counting failed")?;

    log::info!("finished processing; writing reports");
    let totals = totals(&outcome, &counters);
    let mut counts = MimeCounts::default();
    for processor in outcome.into_processors() {
        counts.merge(processor.counts());
    }
    let reports = counts
        .write_reports(report_dir)
        .with_context(|| format!("Failed to write reports to {}", report_dir.display()))?;

    Ok(MimeCountSummary {
        totals,
        counts,
        reports,
    })
}

/// Copy the configured index shards, and any path lists naming them, into
/// `mirror_dir` under their original relative paths. Files already in the
/// mirror are not fetched again.
pub fn run_fetch_indices(
    config: &ExtractorConfig,
    mirror_dir: &Path,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<FetchIndicesSummary> {
    config.validate()?;
    let enumerator = config.shard_enumerator()?;
    std::fs::create_dir_all(mirror_dir).with_context(|| {
        format!("Failed to create mirror directory: {}", mirror_dir.display())
    })?;
    let emitter: Arc<dyn Emitter> = Arc::new(FileSystemEmitter::new(mirror_dir));
    let new_copier = || ShardCopier::new(Arc::clone(&emitter)).with_staging_dir(mirror_dir);

    log::info!(
        "Mirroring {} index path(s) from {} into {} with {} workers",
        config.indices.paths.len(),
        config.indices.source().describe(),
        mirror_dir.display(),
        config.num_threads
    );

    // Path lists first, so the mirror can be enumerated the same way.
    let mut lists = new_copier();
    let list_fetcher = config.new_index_fetcher()?;
    for spec in enumerator.specs() {
        if let PathSpec::PathList(path) = spec {
            lists
                .copy_file(list_fetcher.as_ref(), path, abort)
                .with_context(|| format!("Failed to mirror path list {path}"))?;
        }
    }

    let mut workers = Vec::with_capacity(config.num_threads);
    for idx in 0..config.num_threads {
        workers.push(ShardWorker::new(idx, config.new_index_fetcher()?, new_copier()));
    }

    let outcome = run_pool(
        &config.pool_config(),
        &enumerator,
        list_fetcher,
        workers,
        abort,
        progress,
    )
    .context("Mirroring index shards failed")?;

    let totals = PoolTotals {
        shards_enumerated: outcome.shards_enumerated,
        shards_done: outcome.shards_done(),
        shards_failed: outcome.shards_failed(),
        elapsed: outcome.elapsed,
        ..Default::default()
    };
    let mut copy = *lists.stats();
    for copier in outcome.into_processors() {
        copy.merge(copier.stats());
    }

    Ok(FetchIndicesSummary {
        totals,
        copy,
        mirror_dir: mirror_dir.to_path_buf(),
    })
}
