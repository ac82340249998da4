//! Counting mode: tally normalized detected MIME types instead of extracting.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ccextract_core::{Flow, Limit, RecordProcessor, SharedCounters};
use rustc_hash::FxHashMap;

use crate::record::IndexRecord;
use crate::selector::RecordSelector;

/// Records between progress log lines in counting mode
pub const COUNT_REPORT_EVERY: u64 = 1_000_000;

/// Key used for records without a detected MIME type
const NO_MIME: &str = "";

/// MIME → count tables for one worker, or the merge of several.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeCounts {
    pub total: FxHashMap<String, u64>,
    pub truncated: FxHashMap<String, u64>,
}

impl MimeCounts {
    pub fn merge(&mut self, other: &MimeCounts) {
        for (mime, n) in &other.total {
            *self.total.entry(mime.clone()).or_default() += n;
        }
        for (mime, n) in &other.truncated {
            *self.truncated.entry(mime.clone()).or_default() += n;
        }
    }

    /// Total minus truncated, for every MIME seen at all.
    pub fn non_truncated(&self) -> FxHashMap<String, u64> {
        self.total
            .iter()
            .map(|(mime, n)| {
                let t = self.truncated.get(mime).copied().unwrap_or(0);
                (mime.clone(), n.saturating_sub(t))
            })
            .collect()
    }

    /// Write `total.csv`, `truncated.csv` and `non-truncated.csv` under `dir`.
    pub fn write_reports(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(3);
        for (name, table) in [
            ("total", &self.total),
            ("truncated", &self.truncated),
            ("non-truncated", &self.non_truncated()),
        ] {
            let path = dir.join(format!("{name}.csv"));
            write_csv(&path, table)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Rows sorted by count, highest first; ties by MIME.
pub fn sorted_rows(table: &FxHashMap<String, u64>) -> Vec<(&str, u64)> {
    let mut rows: Vec<(&str, u64)> = table.iter().map(|(m, n)| (m.as_str(), *n)).collect();
    rows.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    rows
}

fn write_csv(path: &Path, table: &FxHashMap<String, u64>) -> io::Result<()> {
    // Excel dialect: CRLF rows, fields quoted only when needed
    let mut w = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_path(path)?;
    w.write_record(["mime", "count"])?;
    for (mime, count) in sorted_rows(table) {
        w.write_record([mime, count.to_string().as_str()])?;
    }
    w.flush()
}

pub struct MimeCountProcessor {
    selector: Arc<RecordSelector>,
    counters: Arc<SharedCounters>,
    max_records: Limit,
    max_files_truncated: Limit,
    report_every: u64,
    counts: MimeCounts,
}

impl MimeCountProcessor {
    pub fn new(
        selector: Arc<RecordSelector>,
        counters: Arc<SharedCounters>,
        max_records: Limit,
        max_files_truncated: Limit,
    ) -> Self {
        Self {
            selector,
            counters,
            max_records,
            max_files_truncated,
            report_every: COUNT_REPORT_EVERY,
            counts: MimeCounts::default(),
        }
    }

    pub fn with_report_every(mut self, report_every: u64) -> Self {
        self.report_every = report_every.max(1);
        self
    }

    pub fn counts(&self) -> &MimeCounts {
        &self.counts
    }

    pub fn into_counts(self) -> MimeCounts {
        self.counts
    }
}

impl RecordProcessor for MimeCountProcessor {
    fn process(&mut self, line: &str) -> io::Result<Flow> {
        let total_read = self.counters.inc_records_read();
        if total_read % self.report_every == 0 {
            log::info!("processed: {}", self.counters);
        }
        if self.max_records.is_reached(total_read) {
            log::info!("hit max read");
            return Ok(Flow::Stop);
        }

        let Some(record) = IndexRecord::parse(line) else {
            return Ok(Flow::Continue);
        };
        if !self.selector.select(&record) {
            return Ok(Flow::Continue);
        }

        let mime = record
            .normalized_mime_detected()
            .unwrap_or_else(|| NO_MIME.to_string());
        *self.counts.total.entry(mime.clone()).or_default() += 1;

        if record.is_truncated() {
            let seen = self.counters.inc_truncated_seen();
            if self.max_files_truncated.is_reached(seen) {
                log::info!("hit max truncated files");
                return Ok(Flow::Stop);
            }
            *self.counts.truncated.entry(mime).or_default() += 1;
        }
        Ok(Flow::Continue)
    }
}
