//! Mirroring index shards from one local tree into another, then reading
//! the mirror back.

use std::io::Write;
use std::path::Path;

use ccextract_core::{AbortFlag, ProgressContext};
use ccextract_index::{ExtractorConfig, RecordSelector, run_fetch_indices, run_mime_count};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

const INDEXES: &str = "cc-index/collections/CC-MAIN-2023-06/indexes";

fn gz(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

fn shard_path(n: usize) -> String {
    format!("{INDEXES}/cdx-{n:05}.gz")
}

fn list_path() -> String {
    format!("{INDEXES}/cc-index.paths")
}

/// Two shards of two records each, plus a path list naming them.
fn write_source(root: &Path) {
    std::fs::create_dir_all(root.join(INDEXES)).unwrap();
    for n in 0..2 {
        let mut lines = Vec::new();
        for (i, mime) in ["application/pdf", "text/html"].iter().enumerate() {
            writeln!(
                lines,
                r#"org,example)/{n}/{i} 20230201000000 {{"url": "https://example.org/{n}/{i}", "mime-detected": "{mime}", "status": "200"}}"#
            )
            .unwrap();
        }
        std::fs::write(root.join(shard_path(n)), gz(&lines)).unwrap();
    }
    let list = format!("{}\n{}\n{INDEXES}/cluster.idx\n", shard_path(0), shard_path(1));
    std::fs::write(root.join(list_path()), list).unwrap();
}

fn config(source: &Path) -> ExtractorConfig {
    let mut config = ExtractorConfig::default();
    config.indices.paths = vec![list_path()];
    config.indices.base_path = Some(source.to_path_buf());
    config
}

#[test]
fn mirrors_listed_shards() {
    let source = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    write_source(source.path());

    let summary = run_fetch_indices(
        &config(source.path()),
        mirror.path(),
        &AbortFlag::new(),
        &ProgressContext::hidden(),
    )
    .unwrap();
    summary.log();

    assert_eq!(summary.totals.shards_enumerated, 2);
    assert_eq!(summary.totals.shards_done, 2);
    assert_eq!(summary.totals.shards_failed, 0);
    assert_eq!(summary.copy.copied, 3);
    assert_eq!(summary.copy.skipped, 0);

    for path in [shard_path(0), shard_path(1), list_path()] {
        assert_eq!(
            std::fs::read(mirror.path().join(&path)).unwrap(),
            std::fs::read(source.path().join(&path)).unwrap(),
            "{path}"
        );
    }
    let leftovers: Vec<_> = std::fs::read_dir(mirror.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name.to_string_lossy().starts_with(".ccextract-"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn second_run_fetches_nothing() {
    let source = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    write_source(source.path());
    let config = config(source.path());

    run_fetch_indices(&config, mirror.path(), &AbortFlag::new(), &ProgressContext::hidden())
        .unwrap();
    let again =
        run_fetch_indices(&config, mirror.path(), &AbortFlag::new(), &ProgressContext::hidden())
            .unwrap();
    assert_eq!(again.copy.copied, 0);
    assert_eq!(again.copy.skipped, 3);
    assert_eq!(again.totals.shards_done, 2);
}

#[test]
fn mirror_reads_like_the_source() {
    let source = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    let reports = TempDir::new().unwrap();
    write_source(source.path());

    let mut config = config(source.path());
    config.indices.paths = vec![shard_path(0), shard_path(1)];
    run_fetch_indices(&config, mirror.path(), &AbortFlag::new(), &ProgressContext::hidden())
        .unwrap();
    assert!(!mirror.path().join(list_path()).exists());

    config.indices.base_path = Some(mirror.path().to_path_buf());
    config.record_selector = RecordSelector::accept_all();
    let counted =
        run_mime_count(&config, reports.path(), &AbortFlag::new(), &ProgressContext::hidden())
            .unwrap();
    assert_eq!(counted.totals.records_read, 4);
    assert_eq!(counted.counts.total["application/pdf"], 2);
    assert_eq!(counted.counts.total["text/html"], 2);
}

#[test]
fn aborted_mirror_copies_nothing() {
    let source = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    write_source(source.path());
    let abort = AbortFlag::new();
    abort.request();

    let summary = run_fetch_indices(
        &config(source.path()),
        mirror.path(),
        &abort,
        &ProgressContext::hidden(),
    )
    .unwrap();
    assert_eq!(summary.copy.copied, 0);
    assert!(!mirror.path().join(shard_path(0)).exists());
}
