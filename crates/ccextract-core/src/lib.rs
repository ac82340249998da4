//! ccextract core - transport, queueing and worker-pool plumbing for
//! reading Common Crawl index shards and WARC byte ranges.
//!
//! Nothing in here knows what a CDX record means; the index crate plugs
//! its record processors into [`pool::run_pool`]. [`mirror::ShardCopier`]
//! runs through the same pool to copy shards into a local mirror.

pub mod backoff;
pub mod counters;
pub mod enumerator;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod pool;
pub mod progress;
pub mod shutdown;
pub mod sink;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use backoff::{
    BackoffFetcher, DEFAULT_BASE_URL, DEFAULT_INDEX_THROTTLE_SECONDS, DEFAULT_THROTTLE_SECONDS,
    Sleeper, ThreadSleeper, throttle_schedule,
};
pub use counters::{Limit, SharedCounters};
pub use enumerator::{PathSpec, PathSpecError, QUEUE_CAPACITY, ShardEnumerator, ShardRef};
pub use error::{FetchError, PipelineError};
pub use logging::{IndicatifLogger, Verbosity, init_logging};
pub use mirror::{CopyStats, ShardCopier};
pub use pool::{
    DEFAULT_POP_TIMEOUT, Flow, PoolConfig, PoolOutcome, RecordProcessor, ShardHandler,
    ShardWorker, WorkerReport, run_pool,
};
pub use progress::{ProgressContext, fmt_num};
pub use shutdown::AbortFlag;
pub use sink::{EmitOutcome, Emitter, FileSystemEmitter};
pub use stream::{ByteStream, GzipReader, SHARED_RUNTIME, gzip_reader};
pub use transport::{Fetched, Fetcher, FileSystemFetcher, HttpFetcher};
