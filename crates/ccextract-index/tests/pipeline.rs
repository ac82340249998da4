//! End-to-end runs over a local mirror: one gzip index shard pointing into
//! one multi-member WARC container.

use std::io::Write;
use std::path::Path;

use ccextract_core::{AbortFlag, Limit, ProgressContext};
use ccextract_index::side_log::{EXTRACTED_FILE, TRUNCATED_URLS_FILE};
use ccextract_index::{ExtractorConfig, RecordSelector, run_extract, run_mime_count};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const WARC_PATH: &str = "crawl-data/CC-MAIN-2023-06/segments/1/warc/x.warc.gz";
const SHARD_PATH: &str = "cc-index/collections/CC-MAIN-2023-06/indexes/cdx-00000.gz";
const PDF: &[u8] = b"%PDF-1.4 a small document";

struct Capture {
    url: &'static str,
    mime: &'static str,
    body: &'static [u8],
    truncated: bool,
}

const CAPTURES: [Capture; 4] = [
    Capture {
        url: "https://example.org/a.pdf",
        mime: "application/pdf",
        body: PDF,
        truncated: false,
    },
    Capture {
        url: "https://example.org/index.html",
        mime: "text/html",
        body: b"<html></html>",
        truncated: false,
    },
    Capture {
        url: "https://example.org/big.pdf",
        mime: "application/pdf",
        body: b"%PDF-1.4 cut",
        truncated: true,
    },
    Capture {
        url: "https://example.com/b.pdf",
        mime: "Application/PDF",
        body: b"%PDF-1.7 another",
        truncated: false,
    },
];

fn gz(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

fn warc_record(url: &str, mime: &str, body: &[u8]) -> Vec<u8> {
    let mut http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {mime}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    http.extend_from_slice(body);
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: {url}\r\n\
         Content-Type: application/http; msgtype=response\r\nContent-Length: {}\r\n\r\n",
        http.len()
    )
    .into_bytes();
    out.extend(http);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// Lay out the mirror under `root` and return nothing; paths are constants.
fn write_mirror(root: &Path) {
    let mut container = Vec::new();
    let mut index = Vec::new();
    for c in &CAPTURES {
        let member = gz(&warc_record(c.url, c.mime, c.body));
        let truncated = if c.truncated {
            r#", "truncated": "length""#
        } else {
            ""
        };
        writeln!(
            index,
            r#"org,example)/x 20230201000000 {{"url": "{}", "mime": "{}", "mime-detected": "{}", "status": "200", "offset": "{}", "length": "{}", "filename": "{WARC_PATH}"{truncated}}}"#,
            c.url,
            c.mime,
            c.mime,
            container.len(),
            member.len()
        )
        .unwrap();
        container.extend(member);
    }
    writeln!(index).unwrap();

    let warc = root.join(WARC_PATH);
    std::fs::create_dir_all(warc.parent().unwrap()).unwrap();
    std::fs::write(warc, container).unwrap();
    let shard = root.join(SHARD_PATH);
    std::fs::create_dir_all(shard.parent().unwrap()).unwrap();
    std::fs::write(shard, gz(&index)).unwrap();
}

fn config(mirror: &TempDir, out: &TempDir) -> ExtractorConfig {
    let mut config = ExtractorConfig::default();
    config.indices.paths = vec![SHARD_PATH.to_string()];
    config.indices.base_path = Some(mirror.path().to_path_buf());
    config.fetcher.base_path = Some(mirror.path().to_path_buf());
    config.docs.path = out.path().join("docs");
    config.logs.dir = out.path().join("logs");
    config.target_path_pattern = "xx/xx".to_string();
    config.record_selector = serde_json::from_str(
        r#"{"should": {"mime_detected": [{"match": "application/pdf", "case_sensitive": false}]}}"#,
    )
    .unwrap();
    config
}

#[test]
fn extracts_selected_payloads() {
    let mirror = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_mirror(mirror.path());
    let config = config(&mirror, &out);

    let summary = run_extract(&config, &AbortFlag::new(), &ProgressContext::hidden()).unwrap();
    summary.log();

    assert_eq!(summary.totals.shards_done, 1);
    assert_eq!(summary.totals.records_read, 4);
    assert_eq!(summary.totals.truncated_seen, 1);
    assert_eq!(summary.stats.selected, 3);
    assert_eq!(summary.stats.extracted, 2);
    assert_eq!(summary.stats.truncated_logged, 1);
    assert_eq!(summary.stats.failed, 0);

    let sha = hex::encode(Sha256::digest(PDF));
    let target = config.docs.path.join(&sha[..2]).join(&sha);
    assert_eq!(std::fs::read(target).unwrap(), PDF);

    let extracted = std::fs::read_to_string(config.logs.dir.join(EXTRACTED_FILE)).unwrap();
    assert_eq!(extracted.lines().count(), 2);
    assert!(extracted.contains(&sha));
    let truncated = std::fs::read_to_string(config.logs.dir.join(TRUNCATED_URLS_FILE)).unwrap();
    assert_eq!(truncated.trim(), "https://example.org/big.pdf");
}

#[test]
fn rerun_leaves_existing_files() {
    let mirror = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_mirror(mirror.path());
    let config = config(&mirror, &out);

    run_extract(&config, &AbortFlag::new(), &ProgressContext::hidden()).unwrap();
    let again = run_extract(&config, &AbortFlag::new(), &ProgressContext::hidden()).unwrap();
    assert_eq!(again.stats.extracted, 2);
    assert_eq!(again.stats.already_present, 2);
}

#[test]
fn dry_run_writes_no_payloads() {
    let mirror = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_mirror(mirror.path());
    let mut config = config(&mirror, &out);
    config.dry_run = true;

    let summary = run_extract(&config, &AbortFlag::new(), &ProgressContext::hidden()).unwrap();
    assert_eq!(summary.stats.dry_run, 2);
    assert_eq!(summary.files_extracted, 2);
    assert!(!config.docs.path.exists());
}

#[test]
fn record_limit_stops_early() {
    let mirror = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_mirror(mirror.path());
    let mut config = config(&mirror, &out);
    config.num_threads = 1;
    config.max_records = Limit::at(2);

    let summary = run_extract(&config, &AbortFlag::new(), &ProgressContext::hidden()).unwrap();
    assert_eq!(summary.totals.records_read, 2);
    assert_eq!(summary.stats.extracted, 1);
}

#[test]
fn counts_detected_mime_types() {
    let mirror = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_mirror(mirror.path());
    let mut config = config(&mirror, &out);
    config.record_selector = RecordSelector::accept_all();
    let reports = out.path().join("reports");

    let summary =
        run_mime_count(&config, &reports, &AbortFlag::new(), &ProgressContext::hidden()).unwrap();
    assert_eq!(summary.counts.total["application/pdf"], 3);
    assert_eq!(summary.counts.total["text/html"], 1);
    assert_eq!(summary.counts.truncated["application/pdf"], 1);

    let total = std::fs::read_to_string(reports.join("total.csv")).unwrap();
    let lines: Vec<&str> = total.lines().collect();
    assert_eq!(lines, vec!["mime,count", "application/pdf,3", "text/html,1"]);
    let non = std::fs::read_to_string(reports.join("non-truncated.csv")).unwrap();
    assert!(non.contains("application/pdf,2"));
}

#[test]
fn aborted_run_reads_nothing() {
    let mirror = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_mirror(mirror.path());
    let config = config(&mirror, &out);
    let abort = AbortFlag::new();
    abort.request();

    let summary = run_extract(&config, &abort, &ProgressContext::hidden()).unwrap();
    assert_eq!(summary.totals.records_read, 0);
}
