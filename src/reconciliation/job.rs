//! # Reconciliation Job
//!
//! Long-lived timer loop healing drift between local records and the
//! identity authority. The job owns explicit state (its task handle, a
//! cancellation token and a pass-in-progress flag) so several independent
//! jobs can coexist in one process.
//!
//! `run_now` and the scheduled loop share one pass implementation and the
//! same run guard: two passes never overlap.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::report::{PendingCounts, ReconciliationReport};
use super::sweeps::Sweeper;
use crate::config::ReconciliationConfig;
use crate::error::{EngineError, Result};
use crate::identity::IdentityAuthority;
use crate::logging::log_reconciliation;
use crate::store::EntityStore;

/// Resets the pass-in-progress flag when dropped
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct JobState {
    entities: Arc<dyn EntityStore>,
    sweeper: Sweeper,
    config: ReconciliationConfig,
    pass_running: AtomicBool,
    passes: AtomicU64,
    last_report: RwLock<Option<ReconciliationReport>>,
}

impl JobState {
    async fn run_pass(&self, cancel: &CancellationToken) -> Result<ReconciliationReport> {
        if self
            .pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::ReconciliationInProgress);
        }
        let _guard = PassGuard(&self.pass_running);

        let report = self.sweeper.run_pass(cancel).await;

        if report.has_work() {
            log_reconciliation(&report);
        } else {
            debug!("RECONCILE: Idle pass");
        }

        *self.last_report.write() = Some(report.clone());
        self.passes.fetch_add(1, Ordering::Release);
        Ok(report)
    }
}

pub struct ReconciliationJob {
    state: Arc<JobState>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<CancellationToken>,
}

impl std::fmt::Debug for ReconciliationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationJob")
            .field("config", &self.state.config)
            .field("is_running", &self.is_running())
            .finish()
    }
}

impl ReconciliationJob {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        identity: Arc<dyn IdentityAuthority>,
        config: ReconciliationConfig,
    ) -> Self {
        let sweeper = Sweeper::new(entities.clone(), identity, config.clone());
        Self {
            state: Arc::new(JobState {
                entities,
                sweeper,
                config,
                pass_running: AtomicBool::new(false),
                passes: AtomicU64::new(0),
                last_report: RwLock::new(None),
            }),
            task: Mutex::new(None),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Spawn the timer loop. The first pass runs immediately.
    ///
    /// Returns `false` if the loop is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let token = self.shutdown.lock().clone();
        let state = self.state.clone();
        let interval = state.config.interval();

        info!(
            interval_secs = interval.as_secs(),
            batch_size = state.config.batch_size,
            "RECONCILE: 🚀 Starting reconciliation job"
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match state.run_pass(&token).await {
                            Ok(_) => {}
                            Err(EngineError::ReconciliationInProgress) => {
                                debug!("RECONCILE: Pass already in progress, skipping tick");
                            }
                            Err(e) => warn!(error = %e, "RECONCILE: Pass failed"),
                        }
                    }
                }
            }
            info!("RECONCILE: Reconciliation loop stopped");
        }));
        true
    }

    /// Cancel the loop and any pass in flight, then wait for the task.
    pub async fn stop(&self) {
        let old = std::mem::replace(&mut *self.shutdown.lock(), CancellationToken::new());
        old.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "RECONCILE: Loop task ended abnormally");
            }
        }
    }

    /// Run exactly one pass now, sharing the scheduled path's logic.
    #[instrument(skip(self))]
    pub async fn run_now(&self) -> Result<ReconciliationReport> {
        let token = self.shutdown.lock().clone();
        self.state.run_pass(&token).await
    }

    pub async fn pending_counts(&self) -> Result<PendingCounts> {
        let entities = &self.state.entities;
        Ok(PendingCounts {
            role_assignments: entities.count_role_pending().await?,
            secondary_links: entities.count_secondary_link_pending().await?,
            tracked_entities: entities.count_entities().await?,
        })
    }

    /// Whether the timer loop is active.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn last_report(&self) -> Option<ReconciliationReport> {
        self.state.last_report.read().clone()
    }

    pub fn passes_completed(&self) -> u64 {
        self.state.passes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityAuthority;
    use crate::store::InMemoryEntityStore;
    use std::time::Duration;

    fn job(interval_seconds: u64) -> ReconciliationJob {
        ReconciliationJob::new(
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(InMemoryIdentityAuthority::new()),
            ReconciliationConfig {
                interval_seconds,
                verification_delay_ms: 1,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let job = job(3600);
        assert!(!job.is_running());
        assert!(job.start());
        assert!(!job.start());
        assert!(job.is_running());

        // First tick is immediate
        tokio::time::timeout(Duration::from_secs(5), async {
            while job.passes_completed() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        job.stop().await;
        assert!(!job.is_running());

        // A stopped job can still run on demand
        let report = job.run_now().await.unwrap();
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_run_now_rejected_while_pass_in_progress() {
        let job = job(3600);
        job.state.pass_running.store(true, Ordering::Release);

        assert!(matches!(
            job.run_now().await,
            Err(EngineError::ReconciliationInProgress)
        ));

        job.state.pass_running.store(false, Ordering::Release);
        assert!(job.run_now().await.is_ok());
        assert!(job.last_report().is_some());
    }

    #[tokio::test]
    async fn test_independent_jobs_do_not_share_state() {
        let a = job(3600);
        let b = job(3600);
        a.run_now().await.unwrap();
        assert_eq!(a.passes_completed(), 1);
        assert_eq!(b.passes_completed(), 0);
        assert!(b.last_report().is_none());
    }
}
