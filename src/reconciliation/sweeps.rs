//! # Reconciliation Sweeps
//!
//! The three independent sweeps of a pass. Each is bounded to `batch_size`
//! rows, checks the cancellation token before every record and accumulates
//! errors into the report instead of stopping.
//!
//! Every sweep keeps a keyset cursor across passes: a pass resumes after the
//! last row the previous pass visited and wraps to the start once a short
//! page reaches the end, so rows past the first batch are always reached.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::report::ReconciliationReport;
use crate::config::ReconciliationConfig;
use crate::identity::{IdentityAuthority, IdentityError};
use crate::models::RegisteredEntity;
use crate::store::{EntityStore, StoreResult};

pub const ORPHAN_CLEANUP: &str = "orphan_cleanup";
pub const ROLE_HEALING: &str = "role_healing";
pub const SECONDARY_LINKS: &str = "secondary_links";

/// Answer to "does this identity still exist upstream?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existence {
    Present,
    Absent,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Linked,
    RolePending,
    SecondaryLinkPending,
}

#[derive(Debug, Default)]
struct SweepCursors {
    linked: Mutex<Option<String>>,
    role_pending: Mutex<Option<String>>,
    secondary_link_pending: Mutex<Option<String>>,
}

impl SweepCursors {
    fn get(&self, scan: Scan) -> &Mutex<Option<String>> {
        match scan {
            Scan::Linked => &self.linked,
            Scan::RolePending => &self.role_pending,
            Scan::SecondaryLinkPending => &self.secondary_link_pending,
        }
    }
}

#[derive(Clone)]
pub struct Sweeper {
    entities: Arc<dyn EntityStore>,
    identity: Arc<dyn IdentityAuthority>,
    config: ReconciliationConfig,
    cursors: Arc<SweepCursors>,
}

impl Sweeper {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        identity: Arc<dyn IdentityAuthority>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            entities,
            identity,
            config,
            cursors: Arc::default(),
        }
    }

    /// Run all three sweeps into one report.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> ReconciliationReport {
        let mut report = ReconciliationReport::new(Utc::now());
        self.cleanup_orphans(cancel, &mut report).await;
        self.heal_pending_roles(cancel, &mut report).await;
        self.heal_secondary_links(cancel, &mut report).await;
        report.finish(Utc::now());
        report
    }

    async fn list(&self, scan: Scan, after: Option<&str>) -> StoreResult<Vec<RegisteredEntity>> {
        let limit = self.config.batch_size;
        match scan {
            Scan::Linked => self.entities.list_linked_entities(after, limit).await,
            Scan::RolePending => self.entities.list_role_pending(after, limit).await,
            Scan::SecondaryLinkPending => {
                self.entities.list_secondary_link_pending(after, limit).await
            }
        }
    }

    /// Next page of `scan`, wrapping to the start when nothing is left past the cursor.
    async fn next_page(&self, scan: Scan) -> StoreResult<Vec<RegisteredEntity>> {
        let after = self.cursors.get(scan).lock().clone();
        let page = self.list(scan, after.as_deref()).await?;
        if page.is_empty() && after.is_some() {
            return self.list(scan, None).await;
        }
        Ok(page)
    }

    /// Move the cursor of `scan` past the first `visited` rows of `page`.
    fn advance(&self, scan: Scan, page: &[RegisteredEntity], visited: usize) {
        let position = if visited < page.len() {
            match visited {
                0 => return,
                n => Some(page[n - 1].id.clone()),
            }
        } else if page.len() < self.config.batch_size {
            None
        } else {
            page.last().map(|e| e.id.clone())
        };
        *self.cursors.get(scan).lock() = position;
    }

    async fn existence(&self, identity_id: &str) -> Result<Existence, IdentityError> {
        match self.identity.user_exists(identity_id).await {
            Ok(true) => Ok(Existence::Present),
            Ok(false) => Ok(Existence::Absent),
            Err(e) if e.is_not_found() => Ok(Existence::Absent),
            Err(e) if e.is_transient() => Ok(Existence::Unknown),
            Err(e) => Err(e),
        }
    }

    /// Delete local records whose upstream identity is definitively gone.
    pub async fn cleanup_orphans(&self, cancel: &CancellationToken, report: &mut ReconciliationReport) {
        let candidates = match self.next_page(Scan::Linked).await {
            Ok(candidates) => candidates,
            Err(e) => {
                report.record_error(ORPHAN_CLEANUP, "list", e);
                return;
            }
        };

        for (visited, entity) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                self.advance(Scan::Linked, &candidates, visited);
                report.record_cancelled(ORPHAN_CLEANUP);
                return;
            }
            let Some(identity_id) = entity.identity_id.as_deref() else {
                continue;
            };
            report.orphans_checked += 1;

            match self.existence(identity_id).await {
                Ok(Existence::Present) => {}
                Ok(Existence::Unknown) => {
                    debug!(entity_id = %entity.id, "RECONCILE: Identity lookup inconclusive, skipping");
                    report.orphans_skipped += 1;
                }
                Ok(Existence::Absent) => match self.entities.delete_entity_cascade(&entity.id).await {
                    Ok(rows) => {
                        info!(
                            entity_id = %entity.id,
                            identity_id = %identity_id,
                            rows,
                            "RECONCILE: 🧹 Deleted orphaned record"
                        );
                        report.orphans_deleted += 1;
                        report.rows_deleted += rows;
                    }
                    Err(e) => report.record_error(ORPHAN_CLEANUP, &entity.id, e),
                },
                Err(e) => {
                    report.orphans_skipped += 1;
                    report.record_error(ORPHAN_CLEANUP, &entity.id, e);
                }
            }
        }
        self.advance(Scan::Linked, &candidates, candidates.len());
    }

    /// Finish role assignments that were deferred or never verified.
    pub async fn heal_pending_roles(
        &self,
        cancel: &CancellationToken,
        report: &mut ReconciliationReport,
    ) {
        let pending = match self.next_page(Scan::RolePending).await {
            Ok(pending) => pending,
            Err(e) => {
                report.record_error(ROLE_HEALING, "list", e);
                return;
            }
        };

        for (visited, entity) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                self.advance(Scan::RolePending, &pending, visited);
                report.record_cancelled(ROLE_HEALING);
                return;
            }
            report.roles_processed += 1;

            match self.heal_role(entity, cancel).await {
                Ok(true) => match self.entities.clear_role_pending(&entity.id, Utc::now()).await {
                    Ok(()) => report.roles_fixed += 1,
                    Err(e) => {
                        report.roles_still_pending += 1;
                        report.record_error(ROLE_HEALING, &entity.id, e);
                    }
                },
                Ok(false) => report.roles_still_pending += 1,
                Err(message) => {
                    report.roles_still_pending += 1;
                    report.record_error(ROLE_HEALING, &entity.id, message);
                }
            }
        }
        self.advance(Scan::RolePending, &pending, pending.len());
    }

    /// `Ok(true)` once the role is verified present upstream.
    async fn heal_role(
        &self,
        entity: &RegisteredEntity,
        cancel: &CancellationToken,
    ) -> Result<bool, String> {
        let identity_id = entity
            .identity_id
            .as_deref()
            .ok_or_else(|| "no linked identity".to_string())?;
        let role = self.config.role.as_str();

        if self
            .identity
            .check_role(identity_id, role)
            .await
            .map_err(|e| e.to_string())?
        {
            return Ok(true);
        }

        self.identity
            .assign_role(identity_id, &entity.organization_id, role)
            .await
            .map_err(|e| e.to_string())?;

        let attempts = self.config.verification_attempts.max(1);
        for attempt in 1..=attempts {
            match self.identity.check_role(identity_id, role).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => warn!(
                    entity_id = %entity.id,
                    attempt,
                    error = %e,
                    "RECONCILE: Role verification failed"
                ),
            }
            if attempt < attempts
                && !pause(self.config.verification_delay(), cancel).await
            {
                return Ok(false);
            }
        }
        Ok(false)
    }

    /// Acknowledge pending secondary links; the link itself is retried on demand elsewhere.
    pub async fn heal_secondary_links(
        &self,
        cancel: &CancellationToken,
        report: &mut ReconciliationReport,
    ) {
        let pending = match self.next_page(Scan::SecondaryLinkPending).await {
            Ok(pending) => pending,
            Err(e) => {
                report.record_error(SECONDARY_LINKS, "list", e);
                return;
            }
        };

        for (visited, entity) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                self.advance(Scan::SecondaryLinkPending, &pending, visited);
                report.record_cancelled(SECONDARY_LINKS);
                return;
            }
            report.secondary_links_processed += 1;

            match self
                .entities
                .acknowledge_secondary_link(&entity.id, Utc::now())
                .await
            {
                Ok(()) => report.secondary_links_fixed += 1,
                Err(e) => {
                    report.secondary_links_still_pending += 1;
                    report.record_error(SECONDARY_LINKS, &entity.id, e);
                }
            }
        }
        self.advance(Scan::SecondaryLinkPending, &pending, pending.len());
    }
}

/// Sleep for `delay` unless cancelled first. Returns false on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
