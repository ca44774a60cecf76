//! In-memory ledger derived from the fact journal
//!
//! The ledger holds the current version of every override and request plus
//! the indexes the store's query patterns need:
//!
//! | Pattern                  | Index               |
//! |--------------------------|---------------------|
//! | by user + active         | `active_by_user`    |
//! | by expiry + active       | `active_by_expiry`  |
//! | by user + scope          | `by_user_scope`     |
//! | by department + scope    | `pending_by_scope`  |
//! | by status (pending)      | `pending_by_created`|
//!
//! Facts are applied in two steps. [`AccessLedger::stage`] validates a batch
//! against current state and computes the post-image of every entity the
//! batch touches without mutating anything. [`AccessLedger::install`] swaps
//! those post-images in and re-indexes them. Readers therefore observe either
//! the pre-batch or the post-batch state.

use crate::facts::AccessFact;
use chrono::{DateTime, Utc};
use clearance_core::{
    AccessError, AccessResult, Override, OverrideId, OverrideRequest, RequestId, Scope, UserId,
};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Post-images of everything a batch touches.
#[derive(Debug, Default)]
pub struct StagedBatch {
    overrides: BTreeMap<OverrideId, Override>,
    requests: BTreeMap<RequestId, OverrideRequest>,
}

impl StagedBatch {
    /// Number of entities touched.
    pub fn touched(&self) -> usize {
        self.overrides.len() + self.requests.len()
    }
}

/// Current store state and indexes.
#[derive(Debug, Default)]
pub struct AccessLedger {
    overrides: HashMap<OverrideId, Override>,
    requests: HashMap<RequestId, OverrideRequest>,

    all_by_user: BTreeMap<UserId, BTreeSet<OverrideId>>,
    active_by_user: BTreeMap<UserId, BTreeSet<OverrideId>>,
    active_by_expiry: BTreeSet<(DateTime<Utc>, OverrideId)>,
    by_user_scope: BTreeMap<(UserId, Scope), BTreeSet<OverrideId>>,

    requests_by_user: BTreeMap<UserId, BTreeSet<RequestId>>,
    pending_by_scope: BTreeMap<Scope, BTreeSet<RequestId>>,
    pending_by_created: BTreeSet<(DateTime<Utc>, RequestId)>,
}

impl AccessLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `facts` in order and compute their post-images.
    pub fn stage(&self, facts: &[AccessFact]) -> AccessResult<StagedBatch> {
        let mut staged = StagedBatch::default();
        for fact in facts {
            self.stage_fact(&mut staged, fact)?;
        }
        self.check_approvals_carry_grants(&staged)?;
        Ok(staged)
    }

    /// Swap staged post-images in.
    pub fn install(&mut self, staged: StagedBatch) {
        for (id, next) in staged.overrides {
            if let Some(prev) = self.overrides.remove(&id) {
                self.unindex_override(&prev);
            }
            self.index_override(&next);
            self.overrides.insert(id, next);
        }
        for (id, next) in staged.requests {
            if let Some(prev) = self.requests.remove(&id) {
                self.unindex_request(&prev);
            }
            self.index_request(&next);
            self.requests.insert(id, next);
        }
    }

    fn stage_fact(&self, staged: &mut StagedBatch, fact: &AccessFact) -> AccessResult<()> {
        match fact {
            AccessFact::OverrideGranted { grant } => {
                if self.overrides.contains_key(&grant.id) || staged.overrides.contains_key(&grant.id)
                {
                    return Err(AccessError::invalid_request(format!(
                        "override {} already exists",
                        grant.id
                    )));
                }
                if grant.valid_until <= grant.valid_from {
                    return Err(AccessError::InvalidOverrideWindow {
                        valid_from: grant.valid_from,
                        valid_until: grant.valid_until,
                    });
                }
                if grant.reason.trim().is_empty() || !grant.level.is_grantable() {
                    return Err(AccessError::invalid_request(format!(
                        "override {} is malformed",
                        grant.id
                    )));
                }
                staged.overrides.insert(grant.id, grant.clone());
            }
            AccessFact::OverrideRevoked {
                override_id,
                revoked_by,
                revoked_at,
            } => {
                let grant = self.staged_override(staged, *override_id)?;
                if grant.is_active {
                    grant.is_active = false;
                    grant.revoked_at = Some(*revoked_at);
                    grant.revoked_by = Some(*revoked_by);
                }
            }
            AccessFact::OverrideExtended {
                override_id,
                valid_until,
                ..
            } => {
                let grant = self.staged_override(staged, *override_id)?;
                if !grant.is_active {
                    return Err(AccessError::invalid_request(format!(
                        "override {override_id} is no longer active"
                    )));
                }
                if *valid_until <= grant.valid_until {
                    return Err(AccessError::invalid_request(format!(
                        "extension of {override_id} must move the end of its window later"
                    )));
                }
                grant.valid_until = *valid_until;
                grant.expiry_notice_sent = false;
            }
            AccessFact::OverrideExpired { override_id, .. } => {
                self.staged_override(staged, *override_id)?.is_active = false;
            }
            AccessFact::OverrideExpiryNoticed { override_id, .. } => {
                self.staged_override(staged, *override_id)?.expiry_notice_sent = true;
            }
            AccessFact::RequestOpened { request } => {
                if self.requests.contains_key(&request.id) || staged.requests.contains_key(&request.id)
                {
                    return Err(AccessError::invalid_request(format!(
                        "request {} already exists",
                        request.id
                    )));
                }
                if self.has_pending(staged, request.requester_id, &request.scope) {
                    return Err(AccessError::invalid_request(format!(
                        "{} already has a pending request for {}",
                        request.requester_id, request.scope
                    )));
                }
                staged.requests.insert(request.id, request.clone());
            }
            AccessFact::RequestApproved {
                request_id,
                decision,
                override_id,
                granted_duration_hours,
            } => {
                self.staged_request(staged, *request_id)?.approve(
                    decision.clone(),
                    *override_id,
                    *granted_duration_hours,
                )?;
            }
            AccessFact::RequestDenied {
                request_id,
                decision,
            } => {
                self.staged_request(staged, *request_id)?
                    .deny(decision.clone())?;
            }
            AccessFact::RequestCancelled {
                request_id,
                cancelled_by,
                cancelled_at,
            } => {
                self.staged_request(staged, *request_id)?
                    .cancel(*cancelled_by, *cancelled_at)?;
            }
            AccessFact::RequestEscalated {
                request_id,
                added_approvers,
                escalated_at,
            } => {
                self.staged_request(staged, *request_id)?
                    .escalate(added_approvers.iter().copied(), *escalated_at)?;
            }
            AccessFact::RequestExpired {
                request_id,
                expired_at,
            } => {
                self.staged_request(staged, *request_id)?
                    .expire(*expired_at)?;
            }
        }
        Ok(())
    }

    fn staged_override<'a>(
        &self,
        staged: &'a mut StagedBatch,
        id: OverrideId,
    ) -> AccessResult<&'a mut Override> {
        match staged.overrides.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let current = self
                    .overrides
                    .get(&id)
                    .cloned()
                    .ok_or(AccessError::OverrideNotFound { override_id: id })?;
                Ok(entry.insert(current))
            }
        }
    }

    fn staged_request<'a>(
        &self,
        staged: &'a mut StagedBatch,
        id: RequestId,
    ) -> AccessResult<&'a mut OverrideRequest> {
        match staged.requests.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let current = self
                    .requests
                    .get(&id)
                    .cloned()
                    .ok_or(AccessError::RequestNotFound { request_id: id })?;
                Ok(entry.insert(current))
            }
        }
    }

    fn has_pending(&self, staged: &StagedBatch, requester: UserId, scope: &Scope) -> bool {
        let committed = self
            .pending_by_scope
            .get(scope)
            .into_iter()
            .flatten()
            .filter_map(|id| staged.requests.get(id).or_else(|| self.requests.get(id)));
        let in_batch = staged
            .requests
            .values()
            .filter(|r| !self.requests.contains_key(&r.id));

        committed
            .chain(in_batch)
            .any(|r| r.requester_id == requester && r.scope == *scope && r.state.is_pending())
    }

    /// An approval transition is only valid together with the override it created.
    fn check_approvals_carry_grants(&self, staged: &StagedBatch) -> AccessResult<()> {
        for request in staged.requests.values() {
            let clearance_core::RequestState::Approved { override_id, .. } = &request.state else {
                continue;
            };
            let newly_approved = self
                .requests
                .get(&request.id)
                .map_or(true, |prev| prev.state.is_pending());
            if !newly_approved {
                continue;
            }
            let carried = staged.overrides.get(override_id).is_some_and(|grant| {
                !self.overrides.contains_key(override_id)
                    && grant.request_id == Some(request.id)
                    && grant.user_id == request.requester_id
                    && grant.scope == request.scope
            });
            if !carried {
                return Err(AccessError::invalid_request(format!(
                    "approval of {} must commit override {override_id} in the same batch",
                    request.id
                )));
            }
        }
        Ok(())
    }

    fn index_override(&mut self, grant: &Override) {
        self.all_by_user
            .entry(grant.user_id)
            .or_default()
            .insert(grant.id);
        self.by_user_scope
            .entry((grant.user_id, grant.scope))
            .or_default()
            .insert(grant.id);
        if grant.is_active {
            self.active_by_user
                .entry(grant.user_id)
                .or_default()
                .insert(grant.id);
            self.active_by_expiry.insert((grant.valid_until, grant.id));
        }
    }

    fn unindex_override(&mut self, grant: &Override) {
        remove_from(&mut self.all_by_user, &grant.user_id, &grant.id);
        remove_from(&mut self.by_user_scope, &(grant.user_id, grant.scope), &grant.id);
        remove_from(&mut self.active_by_user, &grant.user_id, &grant.id);
        self.active_by_expiry.remove(&(grant.valid_until, grant.id));
    }

    fn index_request(&mut self, request: &OverrideRequest) {
        self.requests_by_user
            .entry(request.requester_id)
            .or_default()
            .insert(request.id);
        if request.state.is_pending() {
            self.pending_by_scope
                .entry(request.scope)
                .or_default()
                .insert(request.id);
            self.pending_by_created
                .insert((request.created_at, request.id));
        }
    }

    fn unindex_request(&mut self, request: &OverrideRequest) {
        remove_from(&mut self.requests_by_user, &request.requester_id, &request.id);
        remove_from(&mut self.pending_by_scope, &request.scope, &request.id);
        self.pending_by_created
            .remove(&(request.created_at, request.id));
    }

    /// Override by id.
    pub fn override_by_id(&self, id: OverrideId) -> Option<&Override> {
        self.overrides.get(&id)
    }

    /// Request by id.
    pub fn request_by_id(&self, id: RequestId) -> Option<&OverrideRequest> {
        self.requests.get(&id)
    }

    /// Overrides of `user` still flagged active, whatever their window.
    pub fn active_overrides_for(&self, user: UserId) -> impl Iterator<Item = &Override> {
        self.active_by_user
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|id| self.overrides.get(id))
    }

    /// Overrides of `user` effective at `at`.
    pub fn effective_overrides_for(&self, user: UserId, at: DateTime<Utc>) -> Vec<Override> {
        self.active_overrides_for(user)
            .filter(|o| o.is_effective(at))
            .cloned()
            .collect()
    }

    /// Every override `user` ever held.
    pub fn overrides_for(&self, user: UserId) -> impl Iterator<Item = &Override> {
        self.all_by_user
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|id| self.overrides.get(id))
    }

    /// Every override `user` ever held for exactly `scope`.
    pub fn overrides_for_scope(&self, user: UserId, scope: Scope) -> impl Iterator<Item = &Override> {
        self.by_user_scope
            .get(&(user, scope))
            .into_iter()
            .flatten()
            .filter_map(|id| self.overrides.get(id))
    }

    /// Active overrides whose window ended strictly before `now`.
    pub fn lapsed_active(&self, now: DateTime<Utc>) -> Vec<&Override> {
        self.active_by_expiry
            .iter()
            .take_while(|(until, _)| *until < now)
            .filter_map(|(_, id)| self.overrides.get(id))
            .collect()
    }

    /// Active overrides ending within `[now, horizon]` that have not been noticed yet.
    pub fn expiring_unnoticed(&self, now: DateTime<Utc>, horizon: DateTime<Utc>) -> Vec<&Override> {
        self.active_by_expiry
            .iter()
            .skip_while(|(until, _)| *until < now)
            .take_while(|(until, _)| *until <= horizon)
            .filter_map(|(_, id)| self.overrides.get(id))
            .filter(|o| !o.expiry_notice_sent && o.is_effective(now))
            .collect()
    }

    /// Pending requests for `scope`, oldest first.
    pub fn pending_for_scope(&self, scope: Scope) -> Vec<&OverrideRequest> {
        let mut pending: Vec<&OverrideRequest> = self
            .pending_by_scope
            .get(&scope)
            .into_iter()
            .flatten()
            .filter_map(|id| self.requests.get(id))
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &OverrideRequest> {
        self.pending_by_created
            .iter()
            .filter_map(|(_, id)| self.requests.get(id))
    }

    /// Pending requests created at or before `cutoff`, oldest first.
    pub fn pending_created_until(&self, cutoff: DateTime<Utc>) -> Vec<&OverrideRequest> {
        self.pending_by_created
            .iter()
            .take_while(|(created, _)| *created <= cutoff)
            .filter_map(|(_, id)| self.requests.get(id))
            .collect()
    }

    /// Every request `user` opened.
    pub fn requests_for(&self, user: UserId) -> impl Iterator<Item = &OverrideRequest> {
        self.requests_by_user
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|id| self.requests.get(id))
    }

    /// Number of overrides on record.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    /// Number of requests on record.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

fn remove_from<K: Ord, V: Ord>(index: &mut BTreeMap<K, BTreeSet<V>>, key: &K, value: &V) {
    if let Some(set) = index.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            index.remove(key);
        }
    }
}
