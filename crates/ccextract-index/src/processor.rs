//! The extraction record processor: parse, select, apply limits, extract.

use std::io;
use std::sync::Arc;

use ccextract_core::{EmitOutcome, Flow, Limit, RecordProcessor, SharedCounters};

use crate::extractor::{ExtractOutcome, PayloadExtractor};
use crate::record::IndexRecord;
use crate::selector::RecordSelector;
use crate::side_log::SideLogs;

/// Records between progress log lines
pub const DEFAULT_REPORT_EVERY: u64 = 100_000;

/// Progress interval for runs with more than 10 workers
pub const BUSY_REPORT_EVERY: u64 = 1_000_000;

/// Pick the progress interval for a worker count.
pub fn report_every_for(num_threads: usize) -> u64 {
    if num_threads > 10 {
        BUSY_REPORT_EVERY
    } else {
        DEFAULT_REPORT_EVERY
    }
}

/// Global stop conditions, compared against post-increment counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_records: Limit,
    pub max_files_extracted: Limit,
    pub max_files_truncated: Limit,
}

/// Per-worker tallies, summed by the runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub unparsable: u64,
    pub selected: u64,
    pub extracted: u64,
    pub already_present: u64,
    pub not_http: u64,
    pub failed: u64,
    pub truncated_logged: u64,
    pub dry_run: u64,
}

impl ExtractStats {
    pub fn merge(&mut self, other: &ExtractStats) {
        self.unparsable += other.unparsable;
        self.selected += other.selected;
        self.extracted += other.extracted;
        self.already_present += other.already_present;
        self.not_http += other.not_http;
        self.failed += other.failed;
        self.truncated_logged += other.truncated_logged;
        self.dry_run += other.dry_run;
    }
}

pub struct ExtractProcessor {
    selector: Arc<RecordSelector>,
    counters: Arc<SharedCounters>,
    side_logs: Arc<SideLogs>,
    extractor: PayloadExtractor,
    limits: Limits,
    report_every: u64,
    dry_run: bool,
    extract_truncated: bool,
    stats: ExtractStats,
}

impl ExtractProcessor {
    pub fn new(
        selector: Arc<RecordSelector>,
        counters: Arc<SharedCounters>,
        side_logs: Arc<SideLogs>,
        extractor: PayloadExtractor,
        limits: Limits,
    ) -> Self {
        Self {
            selector,
            counters,
            side_logs,
            extractor,
            limits,
            report_every: DEFAULT_REPORT_EVERY,
            dry_run: false,
            extract_truncated: false,
            stats: ExtractStats::default(),
        }
    }

    pub fn with_report_every(mut self, report_every: u64) -> Self {
        self.report_every = report_every.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_extract_truncated(mut self, extract_truncated: bool) -> Self {
        self.extract_truncated = extract_truncated;
        self
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    fn extract(&mut self, record: &IndexRecord) {
        let url = record.url.as_deref().unwrap_or("?");
        match self.extractor.extract(record) {
            Ok(ExtractOutcome::Extracted { emitted, entry }) => {
                self.stats.extracted += 1;
                if emitted == EmitOutcome::Skipped {
                    self.stats.already_present += 1;
                }
                log::debug!("extracted {url} -> {}", entry.path);
            }
            Ok(ExtractOutcome::NotHttpResponse) => self.stats.not_http += 1,
            Ok(ExtractOutcome::EmptyPayload) => {}
            Err(e) => {
                self.stats.failed += 1;
                log::warn!("couldn't extract {url}: {e}");
            }
        }
    }
}

impl RecordProcessor for ExtractProcessor {
    fn process(&mut self, line: &str) -> io::Result<Flow> {
        let total_read = self.counters.inc_records_read();
        if total_read % self.report_every == 0 {
            log::info!("processed: {}", self.counters);
        }
        if self.limits.max_records.is_reached(total_read) {
            log::info!("hit max read");
            return Ok(Flow::Stop);
        }

        let Some(record) = IndexRecord::parse(line) else {
            self.stats.unparsable += 1;
            return Ok(Flow::Continue);
        };
        if !self.selector.select(&record) {
            return Ok(Flow::Continue);
        }
        self.stats.selected += 1;

        let truncated = record.is_truncated();
        if truncated {
            let seen = self.counters.inc_truncated_seen();
            if self.limits.max_files_truncated.is_reached(seen) {
                log::info!("hit max truncated files");
                return Ok(Flow::Stop);
            }
        }

        if self.extract_truncated || !truncated {
            let extracted = self.counters.inc_files_extracted();
            if self.limits.max_files_extracted.is_reached(extracted) {
                log::info!("hit max extracted files");
                return Ok(Flow::Stop);
            }
            if self.dry_run {
                self.stats.dry_run += 1;
                log::info!(
                    "dry run, but would have extracted {} ({} {:?})",
                    record.url.as_deref().unwrap_or("?"),
                    record.filename.as_deref().unwrap_or("?"),
                    record.byte_range()
                );
                return Ok(Flow::Continue);
            }
            self.extract(&record);
        } else {
            self.side_logs.log_truncated(&record)?;
            self.stats.truncated_logged += 1;
        }
        Ok(Flow::Continue)
    }

    fn close(&mut self) -> io::Result<()> {
        self.side_logs.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_rewriter::TargetPathRewriter;
    use ccextract_core::{FileSystemEmitter, FileSystemFetcher};
    use tempfile::TempDir;

    fn line(url: &str, truncated: Option<&str>) -> String {
        let truncated = truncated
            .map(|t| format!(r#", "truncated": "{t}""#))
            .unwrap_or_default();
        format!(
            r#"surt 20230201000000 {{"url": "{url}", "mime-detected": "application/pdf", "filename": "w.warc.gz", "offset": "0", "length": "10"{truncated}}}"#
        )
    }

    struct Harness {
        _dirs: Vec<TempDir>,
        logs: TempDir,
        counters: Arc<SharedCounters>,
    }

    fn processor(limits: Limits, dry_run: bool, extract_truncated: bool) -> (ExtractProcessor, Harness) {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let counters = Arc::new(SharedCounters::new());
        let side_logs = Arc::new(SideLogs::open(logs.path(), extract_truncated).unwrap());
        let extractor = PayloadExtractor::new(
            Box::new(FileSystemFetcher::new(input.path())),
            Box::new(FileSystemEmitter::new(output.path())),
            TargetPathRewriter::default(),
            Arc::clone(&counters),
            Arc::clone(&side_logs),
        );
        let p = ExtractProcessor::new(
            Arc::new(RecordSelector::accept_all()),
            Arc::clone(&counters),
            side_logs,
            extractor,
            limits,
        )
        .with_dry_run(dry_run)
        .with_extract_truncated(extract_truncated);
        (
            p,
            Harness {
                _dirs: vec![input, output],
                logs,
                counters,
            },
        )
    }

    #[test]
    fn max_records_stops_on_reaching_limit() {
        let limits = Limits {
            max_records: Limit::at(3),
            ..Limits::default()
        };
        let (mut p, h) = processor(limits, true, false);
        let l = line("http://a.org/x.pdf", None);
        assert_eq!(p.process(&l).unwrap(), Flow::Continue);
        assert_eq!(p.process(&l).unwrap(), Flow::Continue);
        assert_eq!(p.process(&l).unwrap(), Flow::Stop);
        assert_eq!(h.counters.records_read(), 3);
    }

    #[test]
    fn dry_run_counts_without_fetching() {
        let (mut p, h) = processor(Limits::default(), true, false);
        for _ in 0..5 {
            assert_eq!(p.process(&line("http://a.org/x.pdf", None)).unwrap(), Flow::Continue);
        }
        assert_eq!(h.counters.files_extracted(), 5);
        assert_eq!(p.stats().dry_run, 5);
        assert_eq!(p.stats().failed, 0);
    }

    #[test]
    fn max_files_extracted_stops() {
        let limits = Limits {
            max_files_extracted: Limit::at(2),
            ..Limits::default()
        };
        let (mut p, _h) = processor(limits, true, false);
        let l = line("http://a.org/x.pdf", None);
        assert_eq!(p.process(&l).unwrap(), Flow::Continue);
        assert_eq!(p.process(&l).unwrap(), Flow::Stop);
    }

    #[test]
    fn truncated_records_logged_not_extracted() {
        let (mut p, h) = processor(Limits::default(), false, false);
        p.process(&line("http://a.org/big.zip", Some("length"))).unwrap();
        p.close().unwrap();

        assert_eq!(h.counters.truncated_seen(), 1);
        assert_eq!(h.counters.files_extracted(), 0);
        assert_eq!(p.stats().truncated_logged, 1);
        let urls =
            std::fs::read_to_string(h.logs.path().join(crate::side_log::TRUNCATED_URLS_FILE)).unwrap();
        assert_eq!(urls.trim(), "http://a.org/big.zip");
    }

    #[test]
    fn truncated_records_extracted_when_asked() {
        let (mut p, h) = processor(Limits::default(), true, true);
        p.process(&line("http://a.org/big.zip", Some("length"))).unwrap();
        assert_eq!(h.counters.truncated_seen(), 1);
        assert_eq!(h.counters.files_extracted(), 1);
    }

    #[test]
    fn max_files_truncated_stops() {
        let limits = Limits {
            max_files_truncated: Limit::at(1),
            ..Limits::default()
        };
        let (mut p, _h) = processor(limits, true, false);
        assert_eq!(p.process(&line("http://a.org/x.pdf", None)).unwrap(), Flow::Continue);
        assert_eq!(
            p.process(&line("http://a.org/big.zip", Some("length"))).unwrap(),
            Flow::Stop
        );
    }

    #[test]
    fn bad_lines_and_failed_fetches_continue() {
        let (mut p, h) = processor(Limits::default(), false, false);
        assert_eq!(p.process("garbage").unwrap(), Flow::Continue);
        // container file does not exist
        assert_eq!(p.process(&line("http://a.org/x.pdf", None)).unwrap(), Flow::Continue);
        assert_eq!(p.stats().unparsable, 1);
        assert_eq!(p.stats().failed, 1);
        assert_eq!(h.counters.records_read(), 2);
    }

    #[test]
    fn report_interval_by_thread_count() {
        assert_eq!(report_every_for(2), DEFAULT_REPORT_EVERY);
        assert_eq!(report_every_for(10), DEFAULT_REPORT_EVERY);
        assert_eq!(report_every_for(11), BUSY_REPORT_EVERY);
    }

    #[test]
    fn stats_merge() {
        let mut a = ExtractStats {
            extracted: 2,
            failed: 1,
            ..Default::default()
        };
        a.merge(&ExtractStats {
            extracted: 3,
            not_http: 4,
            ..Default::default()
        });
        assert_eq!(a.extracted, 5);
        assert_eq!(a.failed, 1);
        assert_eq!(a.not_http, 4);
    }
}
