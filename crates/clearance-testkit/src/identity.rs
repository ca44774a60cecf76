//! In-memory identity directory with an outage switch

use async_trait::async_trait;
use clearance_core::{DepartmentId, IdentityEffects, IdentityError, UserAccessProfile, UserId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Directory stub. Profiles, managers and admins can be changed mid-test.
#[derive(Debug, Default)]
pub struct DirectoryStub {
    profiles: RwLock<BTreeMap<UserId, UserAccessProfile>>,
    managers: RwLock<BTreeMap<DepartmentId, Vec<UserId>>>,
    admins: RwLock<Vec<UserId>>,
    offline: AtomicBool,
    yield_on_admins: AtomicBool,
    lookups: AtomicUsize,
}

impl DirectoryStub {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile.
    pub fn with_profile(self, profile: UserAccessProfile) -> Self {
        self.put_profile(profile);
        self
    }

    /// Set the managers of `dept`.
    pub fn with_managers(self, dept: u64, managers: impl IntoIterator<Item = u64>) -> Self {
        self.managers
            .write()
            .insert(DepartmentId(dept), managers.into_iter().map(UserId).collect());
        self
    }

    /// Set the administrators.
    pub fn with_admins(self, admins: impl IntoIterator<Item = u64>) -> Self {
        *self.admins.write() = admins.into_iter().map(UserId).collect();
        self
    }

    /// Add or replace a profile in place.
    pub fn put_profile(&self, profile: UserAccessProfile) {
        self.profiles.write().insert(profile.user_id, profile);
    }

    /// Make every lookup fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Yield to the scheduler before answering administrator lookups, so
    /// concurrent callers interleave there.
    pub fn set_yield_on_admins(&self, enabled: bool) {
        self.yield_on_admins.store(enabled, Ordering::SeqCst);
    }

    /// Number of profile lookups served.
    pub fn profile_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), IdentityError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(IdentityError::Unavailable {
                reason: "directory stub is offline".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IdentityEffects for DirectoryStub {
    async fn user_access_profile(&self, user: UserId) -> Result<UserAccessProfile, IdentityError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.profiles
            .read()
            .get(&user)
            .cloned()
            .ok_or(IdentityError::UnknownUser(user))
    }

    async fn department_managers(
        &self,
        department: DepartmentId,
    ) -> Result<Vec<UserId>, IdentityError> {
        self.check_online()?;
        Ok(self
            .managers
            .read()
            .get(&department)
            .cloned()
            .unwrap_or_default())
    }

    async fn administrators(&self) -> Result<Vec<UserId>, IdentityError> {
        if self.yield_on_admins.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.check_online()?;
        Ok(self.admins.read().clone())
    }
}
