//! Worker pool: one enumerator feeding N shard workers through a bounded queue.
//!
//! ```text
//! enumerator ──► bounded(1000) ──► worker 0 ─┐
//!                               ├─► worker 1 ─┼─► completions ─► supervisor
//!                               └─► worker N ─┘
//! ```
//!
//! The queue is closed by dropping the enumerator's sender; every worker sees
//! that close exactly once. The supervisor waits for N worker completions
//! plus the enumerator's, and the first failure aborts the rest.

use std::io::{self, BufRead};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use indicatif::ProgressBar;

use crate::enumerator::{QUEUE_CAPACITY, ShardEnumerator, ShardRef};
use crate::error::{FetchError, PipelineError};
use crate::progress::{self, ProgressContext};
use crate::shutdown::AbortFlag;
use crate::stream::gzip_reader;
use crate::transport::Fetcher;

/// Default time a worker waits for the next shard before the run is declared stalled
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(120 * 60);

/// Slice of the pop timeout between abort-flag checks
const POP_POLL: Duration = Duration::from_millis(500);

/// Lines between progress bar refreshes
const PROGRESS_EVERY: u64 = 4096;

/// Whether a worker keeps going after a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Per-worker consumer of raw CDX lines. Each worker owns one; the
/// supervisor gets it back at the end to merge results.
pub trait RecordProcessor: Send {
    fn process(&mut self, line: &str) -> io::Result<Flow>;

    /// Called once when the worker finishes, however it finishes.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What a worker does with each shard it takes off the queue.
///
/// Every [`RecordProcessor`] is one: the shard is gunzipped and fed to it
/// line by line. Handlers that want the shard bytes as they are (mirroring)
/// implement this directly.
pub trait ShardHandler: Send {
    /// Returns the lines handled and whether the worker should keep going.
    fn handle_shard(
        &mut self,
        shard: &ShardRef,
        fetcher: &dyn Fetcher,
        abort: &AbortFlag,
        pb: &ProgressBar,
    ) -> Result<(u64, Flow), FetchError>;

    /// Called once when the worker finishes, however it finishes.
    fn finish(&mut self) -> io::Result<()>;
}

impl<P: RecordProcessor> ShardHandler for P {
    fn handle_shard(
        &mut self,
        shard: &ShardRef,
        fetcher: &dyn Fetcher,
        abort: &AbortFlag,
        pb: &ProgressBar,
    ) -> Result<(u64, Flow), FetchError> {
        let fetched = fetcher.fetch(&shard.path)?;
        if let Some(total) = fetched.length {
            progress::show_bytes(pb, total);
        }
        let (mut reader, counter) = gzip_reader(fetched.stream);

        let mut buf = Vec::with_capacity(4096);
        let mut lines = 0u64;
        loop {
            if abort.is_requested() {
                return Ok((lines, Flow::Stop));
            }
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            if lines % PROGRESS_EVERY == 0 {
                pb.set_position(counter.load(std::sync::atomic::Ordering::Relaxed));
            }
            match self.process(line) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return Ok((lines, Flow::Stop)),
                Err(e) => log::warn!("{}: record failed: {e}", shard.label()),
            }
        }
        Ok((lines, Flow::Continue))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.close()
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub pop_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            pop_timeout: DEFAULT_POP_TIMEOUT,
        }
    }
}

/// What a finished worker hands back.
#[derive(Debug)]
pub struct WorkerReport<P> {
    pub idx: usize,
    pub processor: P,
    pub shards_done: usize,
    pub shards_failed: usize,
    pub lines: u64,
}

/// Result of a whole pool run.
#[derive(Debug)]
pub struct PoolOutcome<P> {
    pub workers: Vec<WorkerReport<P>>,
    pub shards_enumerated: usize,
    pub elapsed: Duration,
}

impl<P> PoolOutcome<P> {
    pub fn shards_done(&self) -> usize {
        self.workers.iter().map(|w| w.shards_done).sum()
    }

    pub fn shards_failed(&self) -> usize {
        self.workers.iter().map(|w| w.shards_failed).sum()
    }

    pub fn lines(&self) -> u64 {
        self.workers.iter().map(|w| w.lines).sum()
    }

    /// Consume the outcome, keeping only the processors for merging.
    pub fn into_processors(self) -> Vec<P> {
        self.workers.into_iter().map(|w| w.processor).collect()
    }
}

enum Next {
    Shard(ShardRef),
    Closed,
    Aborted,
}

/// One worker: owns its shard fetcher and its shard handler.
pub struct ShardWorker<P> {
    idx: usize,
    fetcher: Box<dyn Fetcher>,
    processor: P,
}

impl<P: ShardHandler> ShardWorker<P> {
    pub fn new(idx: usize, fetcher: Box<dyn Fetcher>, processor: P) -> Self {
        Self {
            idx,
            fetcher,
            processor,
        }
    }

    /// Take shards until the queue closes, a processor says stop, or the run aborts.
    pub fn run(
        mut self,
        queue: Receiver<ShardRef>,
        pop_timeout: Duration,
        abort: &AbortFlag,
        progress: &ProgressContext,
    ) -> Result<WorkerReport<P>, PipelineError> {
        let pb = progress.worker_line(self.idx);
        let mut report = (0usize, 0usize, 0u64);

        let outcome = loop {
            match next_shard(&queue, pop_timeout, abort) {
                Ok(Next::Shard(shard)) => {
                    progress.start_shard(&pb, shard.label());
                    match self
                        .processor
                        .handle_shard(&shard, self.fetcher.as_ref(), abort, &pb)
                    {
                        Ok((lines, flow)) => {
                            report.0 += 1;
                            report.2 += lines;
                            log::debug!("worker {}: {} done, {lines} lines", self.idx, shard.path);
                            if flow == Flow::Stop {
                                log::debug!("worker {}: stopping", self.idx);
                                break Ok(());
                            }
                        }
                        Err(e) => {
                            report.1 += 1;
                            log::error!("worker {}: shard {} failed: {e}", self.idx, shard.path);
                        }
                    }
                }
                Ok(Next::Closed) => {
                    log::debug!("worker {}: queue closed", self.idx);
                    break Ok(());
                }
                Ok(Next::Aborted) => {
                    log::debug!("worker {}: aborted", self.idx);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        // Release the queue before closing so a blocked enumerator can notice.
        drop(queue);
        pb.finish_and_clear();
        let closed = self.processor.finish();
        outcome?;
        closed.map_err(PipelineError::Processor)?;

        Ok(WorkerReport {
            idx: self.idx,
            processor: self.processor,
            shards_done: report.0,
            shards_failed: report.1,
            lines: report.2,
        })
    }
}

fn next_shard(
    queue: &Receiver<ShardRef>,
    pop_timeout: Duration,
    abort: &AbortFlag,
) -> Result<Next, PipelineError> {
    let deadline = Instant::now() + pop_timeout;
    loop {
        if abort.is_requested() {
            return Ok(Next::Aborted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PipelineError::Stalled(pop_timeout));
        }
        match queue.recv_timeout(POP_POLL.min(deadline - now)) {
            Ok(shard) => return Ok(Next::Shard(shard)),
            Err(RecvTimeoutError::Disconnected) => return Ok(Next::Closed),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

enum Completion<P> {
    Enumerator(Result<usize, FetchError>),
    Worker(usize, Result<WorkerReport<P>, PipelineError>),
}

/// Run the enumerator and `workers` on a dedicated pool until all finish.
///
/// Returns every worker's report, ordered by worker index. Fails with the
/// first error any task reported, after the others have wound down.
pub fn run_pool<P: ShardHandler>(
    config: &PoolConfig,
    enumerator: &ShardEnumerator,
    index_fetcher: Box<dyn Fetcher>,
    workers: Vec<ShardWorker<P>>,
    abort: &AbortFlag,
    progress: &ProgressContext,
) -> Result<PoolOutcome<P>, PipelineError> {
    let start = Instant::now();
    let num_workers = workers.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers + 1)
        .thread_name(|i| format!("cc-{i}"))
        .build()
        .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

    let (shard_tx, shard_rx) = crossbeam_channel::bounded::<ShardRef>(QUEUE_CAPACITY);
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<Completion<P>>();
    let status = progress.status_line("shards");
    let pop_timeout = config.pop_timeout;

    let mut reports = Vec::with_capacity(num_workers);
    let mut shards_enumerated = 0usize;
    let mut first_error: Option<PipelineError> = None;

    pool.in_place_scope(|scope| {
        {
            let done_tx = done_tx.clone();
            scope.spawn(move |_| {
                let result = enumerator.enumerate(index_fetcher.as_ref(), &shard_tx, abort);
                drop(shard_tx);
                let _ = done_tx.send(Completion::Enumerator(result));
            });
        }
        for worker in workers {
            let queue = shard_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move |_| {
                let idx = worker.idx;
                let result = worker.run(queue, pop_timeout, abort, progress);
                let _ = done_tx.send(Completion::Worker(idx, result));
            });
        }
        drop(shard_rx);
        drop(done_tx);

        let mut pending = num_workers + 1;
        while pending > 0 {
            let Ok(completion) = done_rx.recv() else {
                break;
            };
            pending -= 1;
            let error = match completion {
                Completion::Enumerator(Ok(n)) => {
                    shards_enumerated = n;
                    status.set_message(format!("{} shards queued", progress::fmt_num(n as u64)));
                    log::info!("enumeration finished: {n} shards");
                    None
                }
                Completion::Enumerator(Err(e)) => Some(PipelineError::Enumeration(e)),
                Completion::Worker(_, Ok(report)) => {
                    reports.push(report);
                    None
                }
                Completion::Worker(idx, Err(e)) => {
                    log::error!("worker {idx} failed: {e}");
                    Some(e)
                }
            };
            if let Some(e) = error {
                abort.request();
                first_error.get_or_insert(e);
            }
        }
    });
    status.finish_and_clear();

    if let Some(e) = first_error {
        return Err(e);
    }
    reports.sort_by_key(|r| r.idx);
    Ok(PoolOutcome {
        workers: reports,
        shards_enumerated,
        elapsed: start.elapsed(),
    })
}
