//! # Progress Aggregation
//!
//! Chunk workers never write the operation row. They send one
//! [`ProgressEvent`] per record into a bounded channel; a single
//! [`ProgressAggregator`] task owns the running counters and flushes them to
//! the store on a fixed interval and once more when the channel closes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::DetailOutcome;
use crate::store::{OperationStore, ProgressCounters};

/// Incremental outcome of one or more records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl ProgressEvent {
    pub fn success() -> Self {
        Self {
            processed: 1,
            successful: 1,
            ..Default::default()
        }
    }

    pub fn failure() -> Self {
        Self {
            processed: 1,
            failed: 1,
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            processed: 1,
            skipped: 1,
            ..Default::default()
        }
    }

    pub fn from_outcome(outcome: &DetailOutcome) -> Self {
        if outcome.is_success() {
            Self::success()
        } else {
            Self::failure()
        }
    }

    /// Fold this event into running counters.
    pub fn apply_to(&self, counters: &mut ProgressCounters) {
        counters.processed += self.processed;
        counters.successful += self.successful;
        counters.failed += self.failed;
        counters.skipped += self.skipped;
    }
}

pub type ProgressSender = mpsc::Sender<ProgressEvent>;

/// Single consumer of the outcome channel for one operation
pub struct ProgressAggregator {
    operation_id: Uuid,
    store: Arc<dyn OperationStore>,
    receiver: mpsc::Receiver<ProgressEvent>,
    flush_interval: Duration,
    counters: ProgressCounters,
    flushed: Option<ProgressCounters>,
}

impl ProgressAggregator {
    /// Create the bounded channel and its aggregator.
    pub fn channel(
        operation_id: Uuid,
        store: Arc<dyn OperationStore>,
        capacity: usize,
        flush_interval: Duration,
    ) -> (ProgressSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let aggregator = Self {
            operation_id,
            store,
            receiver,
            flush_interval,
            counters: ProgressCounters::default(),
            flushed: None,
        };
        (sender, aggregator)
    }

    /// Drain events until every sender is dropped, then flush a final time.
    pub async fn run(mut self) -> ProgressCounters {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(event) => event.apply_to(&mut self.counters),
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.is_dirty() {
                        self.flush().await;
                    }
                }
            }
        }

        self.flush().await;
        debug!(
            operation_id = %self.operation_id,
            processed = self.counters.processed,
            successful = self.counters.successful,
            failed = self.counters.failed,
            "PROGRESS: Channel closed, final counters flushed"
        );
        self.counters
    }

    pub fn spawn(self) -> JoinHandle<ProgressCounters> {
        tokio::spawn(self.run())
    }

    fn is_dirty(&self) -> bool {
        self.flushed != Some(self.counters)
    }

    async fn flush(&mut self) {
        match self
            .store
            .update_progress(self.operation_id, self.counters)
            .await
        {
            Ok(()) => self.flushed = Some(self.counters),
            Err(e) => warn!(
                operation_id = %self.operation_id,
                error = %e,
                "PROGRESS: Failed to flush counters"
            ),
        }
    }
}
