//! In-process identity authority
//!
//! Keeps users, organizations and role grants in memory. Supports fault
//! injection (transient failures per user or per operation) and delayed
//! role visibility to mimic an authority that applies grants asynchronously.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;

use super::{
    IdentityAuthority, IdentityError, IdentityOrganization, IdentityResult, IdentityUser,
    NewIdentityUser,
};

#[derive(Default)]
struct AuthorityState {
    users: HashMap<String, IdentityUser>,
    organizations: HashMap<String, IdentityOrganization>,
    roles: HashSet<(String, String)>,
    /// Grants accepted but not yet visible: (user, role) -> remaining checks
    pending_grants: HashMap<(String, String), u32>,
    unreachable_users: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryIdentityAuthority {
    state: RwLock<AuthorityState>,
    unavailable: AtomicBool,
    fail_role_assignment: AtomicBool,
    /// Number of `check_role` calls a new grant stays invisible for
    grant_visibility_delay: AtomicU32,
    assign_role_calls: AtomicU64,
    create_user_calls: AtomicU64,
    user_exists_calls: AtomicU64,
}

impl InMemoryIdentityAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: IdentityUser) {
        self.state.write().users.insert(user.id.clone(), user);
    }

    pub fn add_organization(&self, id: &str, name: &str) {
        self.state.write().organizations.insert(
            id.to_string(),
            IdentityOrganization {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn remove_user(&self, user_id: &str) {
        let mut state = self.state.write();
        state.users.remove(user_id);
        state.roles.retain(|(u, _)| u != user_id);
    }

    pub fn grant_role(&self, user_id: &str, role: &str) {
        self.state
            .write()
            .roles
            .insert((user_id.to_string(), role.to_string()));
    }

    /// Every call fails with a transient error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_role_assignment(&self, fail: bool) {
        self.fail_role_assignment.store(fail, Ordering::SeqCst);
    }

    /// Lookups for this user fail transiently.
    pub fn make_unreachable(&self, user_id: &str) {
        self.state
            .write()
            .unreachable_users
            .insert(user_id.to_string());
    }

    pub fn set_grant_visibility_delay(&self, checks: u32) {
        self.grant_visibility_delay.store(checks, Ordering::SeqCst);
    }

    pub fn assign_role_calls(&self) -> u64 {
        self.assign_role_calls.load(Ordering::SeqCst)
    }

    pub fn create_user_calls(&self) -> u64 {
        self.create_user_calls.load(Ordering::SeqCst)
    }

    pub fn user_exists_calls(&self) -> u64 {
        self.user_exists_calls.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> usize {
        self.state.read().users.len()
    }

    fn ensure_available(&self, operation: &str) -> IdentityResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdentityError::transient(operation, "authority unavailable"));
        }
        Ok(())
    }

    fn ensure_reachable(&self, operation: &str, user_id: &str) -> IdentityResult<()> {
        self.ensure_available(operation)?;
        if self.state.read().unreachable_users.contains(user_id) {
            return Err(IdentityError::transient(operation, "request timed out"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityAuthority for InMemoryIdentityAuthority {
    async fn user_exists(&self, user_id: &str) -> IdentityResult<bool> {
        self.user_exists_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable("user_exists", user_id)?;
        Ok(self.state.read().users.contains_key(user_id))
    }

    async fn get_user(&self, user_id: &str) -> IdentityResult<IdentityUser> {
        self.ensure_reachable("get_user", user_id)?;
        self.state
            .read()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound {
                resource: "user",
                id: user_id.to_string(),
            })
    }

    async fn get_organization(&self, org_id: &str) -> IdentityResult<IdentityOrganization> {
        self.ensure_available("get_organization")?;
        self.state
            .read()
            .organizations
            .get(org_id)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound {
                resource: "organization",
                id: org_id.to_string(),
            })
    }

    async fn create_or_get_user(&self, request: &NewIdentityUser) -> IdentityResult<IdentityUser> {
        self.create_user_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available("create_or_get_user")?;

        let mut state = self.state.write();
        if let Some(existing) = state.users.values().find(|u| u.phone == request.phone) {
            return Ok(existing.clone());
        }
        let user = IdentityUser {
            id: Uuid::new_v4().to_string(),
            phone: request.phone.clone(),
            name: request.name.clone(),
            email: request.email.clone(),
        };
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn check_role(&self, user_id: &str, role: &str) -> IdentityResult<bool> {
        self.ensure_reachable("check_role", user_id)?;

        let key = (user_id.to_string(), role.to_string());
        let mut state = self.state.write();
        if let Some(remaining) = state.pending_grants.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
            state.pending_grants.remove(&key);
            state.roles.insert(key.clone());
        }
        Ok(state.roles.contains(&key))
    }

    async fn assign_role(&self, user_id: &str, _org_id: &str, role: &str) -> IdentityResult<()> {
        self.assign_role_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable("assign_role", user_id)?;
        if self.fail_role_assignment.load(Ordering::SeqCst) {
            return Err(IdentityError::transient("assign_role", "role service error"));
        }

        let mut state = self.state.write();
        if !state.users.contains_key(user_id) {
            return Err(IdentityError::NotFound {
                resource: "user",
                id: user_id.to_string(),
            });
        }
        let key = (user_id.to_string(), role.to_string());
        let delay = self.grant_visibility_delay.load(Ordering::SeqCst);
        if delay == 0 {
            state.roles.insert(key);
        } else {
            state.pending_grants.insert(key, delay);
        }
        Ok(())
    }

    async fn health_check(&self) -> IdentityResult<()> {
        self.ensure_available("health_check")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(phone: &str) -> NewIdentityUser {
        NewIdentityUser {
            phone: phone.to_string(),
            name: "Test".to_string(),
            email: None,
            organization_id: "org-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_or_get_is_idempotent_per_phone() {
        let authority = InMemoryIdentityAuthority::new();
        let first = authority.create_or_get_user(&request("9000000001")).await.unwrap();
        let second = authority.create_or_get_user(&request("9000000001")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(authority.user_count(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_distinct_from_transient() {
        let authority = InMemoryIdentityAuthority::new();
        assert!(!authority.user_exists("ghost").await.unwrap());

        authority.make_unreachable("ghost");
        let err = authority.user_exists("ghost").await.unwrap_err();
        assert!(err.is_transient());
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_delayed_grant_visibility() {
        let authority = InMemoryIdentityAuthority::new();
        let user = authority.create_or_get_user(&request("9000000002")).await.unwrap();
        authority.set_grant_visibility_delay(2);
        authority.assign_role(&user.id, "org-1", "farmer").await.unwrap();

        assert!(!authority.check_role(&user.id, "farmer").await.unwrap());
        assert!(!authority.check_role(&user.id, "farmer").await.unwrap());
        assert!(authority.check_role(&user.id, "farmer").await.unwrap());
    }
}
