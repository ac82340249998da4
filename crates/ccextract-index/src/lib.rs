//! Common Crawl CDX index processing.
//!
//! Reads index shards through the core worker pool, selects records with a
//! declarative [`RecordSelector`], and either extracts each selected
//! record's HTTP payload from its WARC container ([`run_extract`]) or tallies
//! detected MIME types ([`run_mime_count`]). [`run_fetch_indices`] copies
//! the shards themselves into a local mirror.
//!
//! Extracted files are named by the hex SHA-256 of their bytes, fanned out
//! into directories by [`TargetPathRewriter`].

pub mod config;
pub mod extractor;
pub mod mime_counter;
pub mod path_rewriter;
pub mod processor;
pub mod record;
pub mod runner;
pub mod selector;
pub mod side_log;
pub mod warc;

pub use config::{DocsConfig, ExtractorConfig, IndicesConfig, LogsConfig, SourceConfig};
pub use extractor::{ExtractError, ExtractOutcome, PayloadExtractor};
pub use mime_counter::{MimeCountProcessor, MimeCounts};
pub use path_rewriter::{TargetPathRewriter, TemplateError};
pub use processor::{ExtractProcessor, ExtractStats, Limits};
pub use record::{IndexRecord, RecordError, normalize_mime, parse_line, tld_of};
pub use runner::{
    ExtractSummary, FetchIndicesSummary, MimeCountSummary, PoolTotals, run_extract,
    run_fetch_indices, run_mime_count,
};
pub use selector::{Clause, RecordField, RecordSelector, SelectorError};
pub use side_log::{ExtractedEntry, SideLogs};
pub use warc::{HttpResponse, WarcError, WarcRecord};
