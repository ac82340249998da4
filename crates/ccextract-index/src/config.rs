//! Job configuration: which shards to read, which records to keep, where
//! payloads and side logs go.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ccextract_core::{
    BackoffFetcher, DEFAULT_BASE_URL, DEFAULT_INDEX_THROTTLE_SECONDS, DEFAULT_THROTTLE_SECONDS,
    Emitter, Fetcher, FileSystemEmitter, FileSystemFetcher, HttpFetcher, Limit, PoolConfig,
    ShardEnumerator, throttle_schedule,
};
use serde::{Deserialize, Serialize};

use crate::path_rewriter::TargetPathRewriter;
use crate::processor::{Limits, report_every_for};
use crate::selector::RecordSelector;

/// Where shards or WARC containers are read from: a local mirror when
/// `base_path` is set, otherwise HTTP(S) under `base_url` with backoff.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub base_url: String,
    pub base_path: Option<PathBuf>,
    pub throttle_seconds: Vec<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            base_path: None,
            throttle_seconds: DEFAULT_THROTTLE_SECONDS.to_vec(),
        }
    }
}

impl SourceConfig {
    pub fn new_fetcher(&self) -> Result<Box<dyn Fetcher>> {
        if let Some(base) = &self.base_path {
            return Ok(Box::new(FileSystemFetcher::new(base)));
        }
        let http = HttpFetcher::new().context("Failed to build HTTP client")?;
        Ok(Box::new(
            BackoffFetcher::new(http, throttle_schedule(&self.throttle_seconds))
                .with_base_url(&self.base_url),
        ))
    }

    /// Human-readable origin, for summaries.
    pub fn describe(&self) -> String {
        match &self.base_path {
            Some(p) => p.display().to_string(),
            None => self.base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicesConfig {
    /// Shard paths (`.../indexes/cdx-NNNNN.gz`) or path lists (`cc-index.paths[.gz]`)
    pub paths: Vec<String>,
    pub base_url: String,
    pub base_path: Option<PathBuf>,
    pub throttle_seconds: Vec<u64>,
}

impl Default for IndicesConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            base_path: None,
            throttle_seconds: DEFAULT_INDEX_THROTTLE_SECONDS.to_vec(),
        }
    }
}

impl IndicesConfig {
    pub fn source(&self) -> SourceConfig {
        SourceConfig {
            base_url: self.base_url.clone(),
            base_path: self.base_path.clone(),
            throttle_seconds: self.throttle_seconds.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocsConfig {
    pub path: PathBuf,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogsConfig {
    pub dir: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorConfig {
    pub num_threads: usize,
    pub max_records: Limit,
    pub max_files_extracted: Limit,
    pub max_files_truncated: Limit,
    pub dry_run: bool,
    pub extract_truncated: bool,
    pub target_path_pattern: String,
    pub record_selector: RecordSelector,
    pub indices: IndicesConfig,
    pub fetcher: SourceConfig,
    pub docs: DocsConfig,
    pub logs: LogsConfig,
    /// Records between progress lines; derived from `num_threads` when unset
    pub report_every: Option<u64>,
    pub queue_timeout_minutes: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            num_threads: 2,
            max_records: Limit::UNBOUNDED,
            max_files_extracted: Limit::UNBOUNDED,
            max_files_truncated: Limit::UNBOUNDED,
            dry_run: false,
            extract_truncated: false,
            target_path_pattern: String::new(),
            record_selector: RecordSelector::accept_all(),
            indices: IndicesConfig::default(),
            fetcher: SourceConfig::default(),
            docs: DocsConfig::default(),
            logs: LogsConfig::default(),
            report_every: None,
            queue_timeout_minutes: 120,
        }
    }
}

impl ExtractorConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid JSON configuration")
    }

    /// Catch configuration errors before any thread starts.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            bail!("num_threads must be at least 1");
        }
        if self.queue_timeout_minutes == 0 {
            bail!("queue_timeout_minutes must be at least 1");
        }
        if self.indices.paths.is_empty() {
            bail!("no index paths configured (indices.paths)");
        }
        self.shard_enumerator()?;
        self.target_path_rewriter()?;
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_records: self.max_records,
            max_files_extracted: self.max_files_extracted,
            max_files_truncated: self.max_files_truncated,
        }
    }

    pub fn report_every(&self) -> u64 {
        self.report_every
            .unwrap_or_else(|| report_every_for(self.num_threads))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            num_workers: self.num_threads,
            pop_timeout: Duration::from_secs(self.queue_timeout_minutes * 60),
        }
    }

    pub fn shard_enumerator(&self) -> Result<ShardEnumerator> {
        ShardEnumerator::new(self.indices.paths.as_slice()).context("Invalid index path")
    }

    pub fn target_path_rewriter(&self) -> Result<TargetPathRewriter> {
        TargetPathRewriter::new(&self.target_path_pattern).context("Invalid target_path_pattern")
    }

    /// Transport for index shards and path lists.
    pub fn new_index_fetcher(&self) -> Result<Box<dyn Fetcher>> {
        self.indices.source().new_fetcher()
    }

    /// Transport for WARC containers.
    pub fn new_fetcher(&self) -> Result<Box<dyn Fetcher>> {
        self.fetcher.new_fetcher()
    }

    pub fn new_emitter(&self) -> Box<dyn Emitter> {
        Box::new(FileSystemEmitter::new(&self.docs.path))
    }
}
