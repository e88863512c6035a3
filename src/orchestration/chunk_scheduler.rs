//! # Chunk Scheduler
//!
//! Partitions an operation's records into fixed-size chunks and runs them
//! with bounded parallelism. A counting semaphore sized `max_concurrency`
//! gates chunk workers; a chunk holds its permit for its whole run and the
//! permit is released on drop.
//!
//! Inside a chunk, records run sequentially in input order. Across chunks no
//! ordering is guaranteed. With `continue_on_error == false` a chunk stops
//! after its first failing record; other chunks carry on. The operation's
//! cancellation token is checked before a chunk takes a permit and between
//! records.

use futures::future::join_all;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::executor::{OperationExecutor, OperationRun};
use super::progress::ProgressSender;
use crate::store::ProgressCounters;

/// Split `len` indexes into consecutive ranges of `chunk_size` (last may be shorter).
pub fn partition(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let size = chunk_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// What one chunk worker did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    pub chunk_index: usize,
    pub range: Range<usize>,
    pub counters: ProgressCounters,
    /// Stopped at a failure with `continue_on_error == false`
    pub stopped_early: bool,
    pub cancelled: bool,
}

impl ChunkReport {
    fn new(chunk_index: usize, range: Range<usize>) -> Self {
        Self {
            chunk_index,
            range,
            counters: ProgressCounters::default(),
            stopped_early: false,
            cancelled: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkSummary {
    pub chunks: Vec<ChunkReport>,
    /// Chunk tasks that panicked or were aborted
    pub failed_tasks: usize,
}

impl ChunkSummary {
    /// Sum of counters reported by the chunk workers.
    pub fn counters(&self) -> ProgressCounters {
        self.chunks
            .iter()
            .fold(ProgressCounters::default(), |mut total, chunk| {
                total.processed += chunk.counters.processed;
                total.successful += chunk.counters.successful;
                total.failed += chunk.counters.failed;
                total.skipped += chunk.counters.skipped;
                total
            })
    }
}

#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl ChunkScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Spawn one worker per chunk and wait for all of them.
    ///
    /// `progress` is dropped once every worker has finished, which closes
    /// the aggregator's channel.
    pub async fn run(
        &self,
        executor: OperationExecutor,
        run: Arc<OperationRun>,
        progress: ProgressSender,
    ) -> ChunkSummary {
        let chunks = partition(run.record_count(), run.options.chunk_size);
        info!(
            operation_id = %run.operation_id,
            records = run.record_count(),
            chunks = chunks.len(),
            chunk_size = run.options.chunk_size,
            max_concurrency = self.max_concurrency,
            "CHUNK: Scheduling chunk workers"
        );

        let handles: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, range)| {
                let semaphore = self.semaphore.clone();
                let executor = executor.clone();
                let run = run.clone();
                let progress = progress.clone();
                tokio::spawn(async move {
                    Self::run_chunk(semaphore, executor, run, progress, chunk_index, range).await
                })
            })
            .collect();
        drop(progress);

        let mut summary = ChunkSummary::default();
        for result in join_all(handles).await {
            match result {
                Ok(report) => summary.chunks.push(report),
                Err(e) => {
                    error!(operation_id = %run.operation_id, error = %e, "CHUNK: Worker task failed");
                    summary.failed_tasks += 1;
                }
            }
        }
        summary.chunks.sort_by_key(|c| c.chunk_index);

        debug!(
            operation_id = %run.operation_id,
            completed_chunks = summary.chunks.len(),
            failed_tasks = summary.failed_tasks,
            "CHUNK: All chunk workers finished"
        );
        summary
    }

    async fn run_chunk(
        semaphore: Arc<Semaphore>,
        executor: OperationExecutor,
        run: Arc<OperationRun>,
        progress: ProgressSender,
        chunk_index: usize,
        range: Range<usize>,
    ) -> ChunkReport {
        let mut report = ChunkReport::new(chunk_index, range.clone());

        let _permit = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => {
                report.cancelled = true;
                return report;
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(operation_id = %run.operation_id, chunk_index, "CHUNK: Semaphore closed");
                    return report;
                }
            },
        };

        for index in range {
            if run.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let result = executor.process_record(&run, index).await;
            let event = result.progress_event();
            event.apply_to(&mut report.counters);
            if progress.send(event).await.is_err() {
                warn!(
                    operation_id = %run.operation_id,
                    chunk_index,
                    "CHUNK: Progress channel closed"
                );
            }

            if !result.is_success() && !run.options.continue_on_error {
                debug!(
                    operation_id = %run.operation_id,
                    chunk_index,
                    record_index = index,
                    "CHUNK: Stopping chunk at first failure"
                );
                report.stopped_early = true;
                break;
            }
        }

        report
    }
}
