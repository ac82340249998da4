//! Shard enumeration: expand configured path specs into individual CDX
//! shards and feed them to the bounded work queue.

use std::io::{BufRead, BufReader, Read};
use std::sync::LazyLock;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use flate2::read::MultiGzDecoder;
use regex::Regex;

use crate::error::FetchError;
use crate::shutdown::AbortFlag;
use crate::transport::Fetcher;

/// Capacity of the shard queue between the enumerator and the workers
pub const QUEUE_CAPACITY: usize = 1000;

/// How often a blocked enumerator re-checks the abort flag
const SEND_POLL: Duration = Duration::from_secs(1);

static SHARD_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"indexes/cdx-\d{5}\.gz$").expect("valid regex"));

const PATH_LIST_SUFFIXES: [&str; 2] = ["cc-index.paths.gz", "cc-index.paths"];

/// One shard to process, numbered in enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRef {
    pub idx: usize,
    pub path: String,
}

impl ShardRef {
    /// Short label for progress lines: the file name.
    pub fn label(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A configured index path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    /// A single `.../indexes/cdx-NNNNN.gz` shard
    Shard(String),
    /// A `cc-index.paths[.gz]` list naming many shards
    PathList(String),
}

impl PathSpec {
    pub fn parse(path: &str) -> Result<Self, PathSpecError> {
        let path = path.trim();
        if SHARD_PATH.is_match(path) {
            Ok(Self::Shard(path.to_string()))
        } else if PATH_LIST_SUFFIXES.iter().any(|s| path.ends_with(s)) {
            Ok(Self::PathList(path.to_string()))
        } else {
            Err(PathSpecError(path.to_string()))
        }
    }
}

/// A configured index path that is neither a shard nor a path list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpecError(pub String);

impl std::fmt::Display for PathSpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "index path must end in indexes/cdx-NNNNN.gz or cc-index.paths[.gz]: {:?}",
            self.0
        )
    }
}

impl std::error::Error for PathSpecError {}

/// Expands path specs into shards, one at a time, into the queue.
#[derive(Debug, Clone)]
pub struct ShardEnumerator {
    specs: Vec<PathSpec>,
}

impl ShardEnumerator {
    /// Validate every path up front so a typo fails before any work starts.
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Result<Self, PathSpecError> {
        let specs = paths
            .iter()
            .map(|p| PathSpec::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[PathSpec] {
        &self.specs
    }

    /// Push every shard into `sender`; returns how many were queued.
    ///
    /// Dropping `sender` afterwards is what tells the workers there is no
    /// more work. Stops early, without error, when the abort flag is set or
    /// every receiver has gone away.
    pub fn enumerate(
        &self,
        fetcher: &dyn Fetcher,
        sender: &Sender<ShardRef>,
        abort: &AbortFlag,
    ) -> Result<usize, FetchError> {
        let mut queued = 0usize;
        for spec in &self.specs {
            let paths = match spec {
                PathSpec::Shard(path) => vec![path.clone()],
                PathSpec::PathList(list) => {
                    let paths = read_path_list(fetcher, list)?;
                    log::info!("{list}: {} shards", paths.len());
                    paths
                }
            };
            for path in paths {
                let shard = ShardRef { idx: queued, path };
                if !offer(sender, shard, abort) {
                    log::debug!("enumeration stopped after {queued} shards");
                    return Ok(queued);
                }
                queued += 1;
            }
        }
        log::debug!("enumerated {queued} shards");
        Ok(queued)
    }
}

/// Blocking send that gives up when the run is aborted or nobody is listening.
fn offer(sender: &Sender<ShardRef>, mut shard: ShardRef, abort: &AbortFlag) -> bool {
    loop {
        if abort.is_requested() {
            return false;
        }
        match sender.send_timeout(shard, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => shard = back,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Fetch a path list and return the shard paths it names.
pub fn read_path_list(fetcher: &dyn Fetcher, list: &str) -> Result<Vec<String>, FetchError> {
    let fetched = fetcher.fetch(list)?;
    let reader: Box<dyn Read> = if list.ends_with(".gz") {
        Box::new(MultiGzDecoder::new(fetched.stream))
    } else {
        fetched.stream
    };
    parse_path_list(BufReader::new(reader))
}

fn parse_path_list(reader: impl BufRead) -> Result<Vec<String>, FetchError> {
    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.ends_with(".gz") {
            log::debug!("skipping non-shard line in path list: {line}");
            continue;
        }
        paths.push(line.to_string());
    }
    Ok(paths)
}
