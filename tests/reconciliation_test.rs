//! Reconciliation passes against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use bulk_engine::config::ReconciliationConfig;
use bulk_engine::constants::metadata_keys;
use bulk_engine::identity::{IdentityUser, InMemoryIdentityAuthority};
use bulk_engine::models::{DependentRecord, RegisteredEntity};
use bulk_engine::reconciliation::ReconciliationJob;
use bulk_engine::store::{EntityStore, InMemoryEntityStore};

struct Fixture {
    entities: Arc<InMemoryEntityStore>,
    identity: Arc<InMemoryIdentityAuthority>,
    job: ReconciliationJob,
}

fn fixture() -> Fixture {
    fixture_with_batch(ReconciliationConfig::default().batch_size)
}

fn fixture_with_batch(batch_size: usize) -> Fixture {
    let entities = Arc::new(InMemoryEntityStore::new());
    let identity = Arc::new(InMemoryIdentityAuthority::new());
    let job = ReconciliationJob::new(
        entities.clone(),
        identity.clone(),
        ReconciliationConfig {
            interval_seconds: 3600,
            batch_size,
            verification_attempts: 3,
            verification_delay_ms: 1,
            ..Default::default()
        },
    );
    Fixture {
        entities,
        identity,
        job,
    }
}

fn user(id: &str, phone: &str) -> IdentityUser {
    IdentityUser {
        id: id.to_string(),
        phone: phone.to_string(),
        name: format!("User {id}"),
        email: None,
    }
}

async fn linked_entity(fx: &Fixture, identity_id: &str, phone: &str) -> RegisteredEntity {
    let entity = RegisteredEntity::new("org-1", "Farmer", phone).with_identity(identity_id);
    fx.entities.insert_entity(&entity).await.unwrap();
    entity
}

#[tokio::test]
async fn test_orphan_cleanup_is_idempotent() {
    let fx = fixture();
    fx.identity.add_user(user("u-live", "9000000001"));
    let live = linked_entity(&fx, "u-live", "9000000001").await;
    let orphan = linked_entity(&fx, "u-gone", "9000000002").await;
    fx.entities
        .add_dependent(DependentRecord::new(&orphan.id, "farm", 1));
    fx.entities
        .add_dependent(DependentRecord::new(&orphan.id, "crop_cycle", 2));

    let first = fx.job.run_now().await.unwrap();
    assert_eq!(first.orphans_checked, 2);
    assert_eq!(first.orphans_deleted, 1);
    assert_eq!(first.rows_deleted, 3);
    assert!(first.errors.is_empty());
    assert!(fx.entities.get_entity(&orphan.id).await.unwrap().is_none());
    assert!(fx.entities.dependents_of(&orphan.id).is_empty());
    assert!(fx.entities.get_entity(&live.id).await.unwrap().is_some());

    // Nothing changed upstream; a second pass is a no-op
    let second = fx.job.run_now().await.unwrap();
    assert_eq!(second.orphans_deleted, 0);
    assert_eq!(second.rows_deleted, 0);
    assert!(!second.has_work());
    assert_eq!(fx.entities.count_entities().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreachable_identity_is_never_deleted() {
    let fx = fixture();
    let entity = linked_entity(&fx, "u-flaky", "9000000003").await;
    fx.identity.make_unreachable("u-flaky");

    let report = fx.job.run_now().await.unwrap();
    assert_eq!(report.orphans_deleted, 0);
    assert_eq!(report.orphans_skipped, 1);
    assert!(fx.entities.get_entity(&entity.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cascade_delete_failure_rolls_back_everything() {
    let fx = fixture();
    let orphan = linked_entity(&fx, "u-gone", "9000000004").await;
    fx.entities
        .add_dependent(DependentRecord::new(&orphan.id, "address", 1));
    fx.entities
        .add_dependent(DependentRecord::new(&orphan.id, "farm", 1));
    fx.entities
        .add_dependent(DependentRecord::new(&orphan.id, "crop_cycle", 2));
    fx.entities.fail_next_delete_after(2);

    let report = fx.job.run_now().await.unwrap();
    assert_eq!(report.orphans_deleted, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("orphan_cleanup:"));
    assert!(fx.entities.get_entity(&orphan.id).await.unwrap().is_some());
    assert_eq!(fx.entities.dependents_of(&orphan.id).len(), 3);

    // The fault was one-shot; the next pass finishes the job
    let retry = fx.job.run_now().await.unwrap();
    assert_eq!(retry.orphans_deleted, 1);
    assert_eq!(retry.rows_deleted, 4);
}

#[tokio::test]
async fn test_role_already_present_is_fixed_without_assignment() {
    let fx = fixture();
    fx.identity.add_user(user("u-1", "9000000005"));
    fx.identity.grant_role("u-1", "farmer");
    let entity = RegisteredEntity::new("org-1", "Farmer", "9000000005")
        .with_identity("u-1")
        .with_flag(metadata_keys::ROLE_ASSIGNMENT_PENDING);
    fx.entities.insert_entity(&entity).await.unwrap();

    let report = fx.job.run_now().await.unwrap();
    assert_eq!(report.roles_processed, 1);
    assert_eq!(report.roles_fixed, 1);
    assert_eq!(fx.identity.assign_role_calls(), 0);

    let stored = fx.entities.get_entity(&entity.id).await.unwrap().unwrap();
    assert!(!stored.role_assignment_pending());
    assert!(stored
        .metadata
        .contains_key(metadata_keys::ROLE_ASSIGNMENT_FIXED_AT));
    assert_eq!(fx.job.pending_counts().await.unwrap().role_assignments, 0);
}

#[tokio::test]
async fn test_failed_role_assignment_stays_pending() {
    let fx = fixture();
    fx.identity.add_user(user("u-2", "9000000006"));
    fx.identity.set_fail_role_assignment(true);
    let entity = RegisteredEntity::new("org-1", "Farmer", "9000000006")
        .with_identity("u-2")
        .with_flag(metadata_keys::ROLE_ASSIGNMENT_PENDING);
    fx.entities.insert_entity(&entity).await.unwrap();

    let report = fx.job.run_now().await.unwrap();
    assert_eq!(report.roles_fixed, 0);
    assert_eq!(report.roles_still_pending, 1);
    assert!(report.errors.iter().any(|e| e.starts_with("role_healing:")));
    assert_eq!(fx.job.pending_counts().await.unwrap().role_assignments, 1);
}

#[tokio::test]
async fn test_secondary_links_are_acknowledged() {
    let fx = fixture();
    for i in 0..3 {
        let entity = RegisteredEntity::new("org-1", "Farmer", format!("900000001{i}"))
            .with_flag(metadata_keys::SECONDARY_LINK_PENDING);
        fx.entities.insert_entity(&entity).await.unwrap();
    }
    assert_eq!(fx.job.pending_counts().await.unwrap().secondary_links, 3);

    let report = fx.job.run_now().await.unwrap();
    assert_eq!(report.secondary_links_processed, 3);
    assert_eq!(report.secondary_links_fixed, 3);

    let counts = fx.job.pending_counts().await.unwrap();
    assert_eq!(counts.secondary_links, 0);
    assert_eq!(counts.tracked_entities, 3);
}

#[tokio::test]
async fn test_scheduled_loop_runs_and_stops() {
    let fx = fixture();
    let orphan = linked_entity(&fx, "u-gone", "9000000020").await;

    assert!(fx.job.start());
    tokio::time::timeout(Duration::from_secs(5), async {
        while fx.job.passes_completed() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first pass runs immediately");

    assert!(fx.entities.get_entity(&orphan.id).await.unwrap().is_none());
    let last = fx.job.last_report().unwrap();
    assert_eq!(last.orphans_deleted, 1);

    fx.job.stop().await;
    assert!(!fx.job.is_running());

    // Restartable after stop
    assert!(fx.job.start());
    fx.job.stop().await;
}

#[tokio::test]
async fn test_orphan_cleanup_reaches_rows_past_first_batch() {
    let fx = fixture_with_batch(2);
    let mut linked = Vec::new();
    for i in 0..5 {
        let user_id = format!("u-{i}");
        let phone = format!("900000003{i}");
        fx.identity.add_user(user(&user_id, &phone));
        linked.push(linked_entity(&fx, &user_id, &phone).await);
    }
    linked.sort_by(|a, b| a.id.cmp(&b.id));
    let last = linked.last().unwrap().clone();
    fx.identity
        .remove_user(last.identity_id.as_deref().unwrap());

    // Pages of two: the orphan sits in the third page
    for _ in 0..2 {
        let report = fx.job.run_now().await.unwrap();
        assert_eq!(report.orphans_checked, 2);
        assert_eq!(report.orphans_deleted, 0);
    }
    let third = fx.job.run_now().await.unwrap();
    assert_eq!(third.orphans_checked, 1);
    assert_eq!(third.orphans_deleted, 1);
    assert!(fx.entities.get_entity(&last.id).await.unwrap().is_none());

    // Wrapped around to the start
    let fourth = fx.job.run_now().await.unwrap();
    assert_eq!(fourth.orphans_checked, 2);
    assert_eq!(fx.entities.count_entities().await.unwrap(), 4);
}

#[tokio::test]
async fn test_stuck_role_assignments_do_not_starve_the_rest() {
    let fx = fixture_with_batch(2);
    let mut pending = Vec::new();
    for i in 0..3 {
        let user_id = format!("u-{i}");
        let phone = format!("900000004{i}");
        fx.identity.add_user(user(&user_id, &phone));
        let entity = RegisteredEntity::new("org-1", "Farmer", phone)
            .with_identity(user_id)
            .with_flag(metadata_keys::ROLE_ASSIGNMENT_PENDING);
        fx.entities.insert_entity(&entity).await.unwrap();
        pending.push(entity);
    }
    pending.sort_by(|a, b| a.id.cmp(&b.id));
    // The first page never heals
    for entity in &pending[..2] {
        fx.identity
            .make_unreachable(entity.identity_id.as_deref().unwrap());
    }

    let first = fx.job.run_now().await.unwrap();
    assert_eq!(first.roles_processed, 2);
    assert_eq!(first.roles_still_pending, 2);

    let second = fx.job.run_now().await.unwrap();
    assert_eq!(second.roles_processed, 1);
    assert_eq!(second.roles_fixed, 1);
    let healed = fx.entities.get_entity(&pending[2].id).await.unwrap().unwrap();
    assert!(!healed.role_assignment_pending());
    assert_eq!(fx.job.pending_counts().await.unwrap().role_assignments, 2);
}
