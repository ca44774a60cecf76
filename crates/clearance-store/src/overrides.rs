//! Override store
//!
//! Durable lifecycle of granted elevations: create, revoke, extend, and the
//! hygiene sweep that deactivates lapsed overrides. The validity check in the
//! resolver already ignores lapsed overrides, so the sweep only keeps the
//! "active" listings honest.

use crate::facts::AccessFact;
use crate::store::AccessStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clearance_core::{
    AccessError, AccessEvent, AccessResult, NewOverride, NotificationEffects, Override,
    OverrideId, OverrideSource, Scope, UserId,
};
use std::sync::Arc;

/// Override lifecycle operations.
#[derive(Clone)]
pub struct OverrideStore {
    store: Arc<AccessStore>,
    notifier: Arc<dyn NotificationEffects>,
}

impl OverrideStore {
    /// Create the override store over a shared [`AccessStore`].
    pub fn new(store: Arc<AccessStore>, notifier: Arc<dyn NotificationEffects>) -> Self {
        Self { store, notifier }
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    /// Validate and persist a new override.
    ///
    /// Rejects `valid_until <= valid_from` and empty reasons before anything
    /// reaches the journal.
    pub async fn create_override(&self, input: NewOverride) -> AccessResult<Override> {
        let grant = Override::create(OverrideId::new(), input, self.now())?;
        self.store
            .commit(vec![AccessFact::OverrideGranted {
                grant: grant.clone(),
            }])
            .await?;

        tracing::info!(
            override_id = %grant.id,
            user_id = %grant.user_id,
            scope = %grant.scope,
            level = %grant.level,
            valid_until = %grant.valid_until,
            granted_by = %grant.granted_by,
            "override granted"
        );
        Ok(grant)
    }

    /// Set `is_active = false`. Revoking an inactive override is a no-op.
    pub async fn revoke(&self, id: OverrideId, revoked_by: UserId) -> AccessResult<Override> {
        let current = self.get(id).await?;
        if !current.is_active {
            tracing::debug!(override_id = %id, "override already inactive");
            return Ok(current);
        }

        self.store
            .commit(vec![AccessFact::OverrideRevoked {
                override_id: id,
                revoked_by,
                revoked_at: self.now(),
            }])
            .await?;

        let revoked = self.get(id).await?;
        tracing::info!(override_id = %id, user_id = %revoked.user_id, revoked_by = %revoked_by, "override revoked");
        self.notifier.notify(AccessEvent::OverrideRevoked {
            override_id: id,
            user_id: revoked.user_id,
            revoked_by,
        });
        Ok(revoked)
    }

    /// Move `valid_until` later on an override that has not lapsed.
    pub async fn extend(
        &self,
        id: OverrideId,
        valid_until: DateTime<Utc>,
        extended_by: UserId,
    ) -> AccessResult<Override> {
        let now = self.now();
        let current = self.get(id).await?;

        if valid_until <= now {
            return Err(AccessError::invalid_request(format!(
                "cannot extend {id} into the past ({valid_until})"
            )));
        }
        if !current.is_active || current.is_lapsed(now) {
            return Err(AccessError::invalid_request(format!(
                "override {id} is no longer in effect"
            )));
        }

        self.store
            .commit(vec![AccessFact::OverrideExtended {
                override_id: id,
                valid_until,
                extended_by,
                extended_at: now,
            }])
            .await?;

        tracing::info!(
            override_id = %id,
            previous_until = %current.valid_until,
            valid_until = %valid_until,
            extended_by = %extended_by,
            "override extended"
        );
        self.get(id).await
    }

    /// Deactivate every active override whose window ended before now.
    pub async fn cleanup_expired(&self) -> AccessResult<Vec<OverrideId>> {
        let now = self.now();
        let lapsed: Vec<OverrideId> = self
            .store
            .read()
            .await
            .lapsed_active(now)
            .into_iter()
            .map(|o| o.id)
            .collect();

        if lapsed.is_empty() {
            return Ok(lapsed);
        }

        self.store
            .commit(
                lapsed
                    .iter()
                    .map(|id| AccessFact::OverrideExpired {
                        override_id: *id,
                        expired_at: now,
                    })
                    .collect(),
            )
            .await?;

        tracing::info!(count = lapsed.len(), "deactivated lapsed overrides");
        Ok(lapsed)
    }

    /// Send one expiring-soon notice per override ending within `horizon`.
    pub async fn notify_expiring(&self, horizon: Duration) -> AccessResult<usize> {
        let now = self.now();
        let expiring: Vec<Override> = self
            .store
            .read()
            .await
            .expiring_unnoticed(now, now + horizon)
            .into_iter()
            .cloned()
            .collect();

        if expiring.is_empty() {
            return Ok(0);
        }

        self.store
            .commit(
                expiring
                    .iter()
                    .map(|o| AccessFact::OverrideExpiryNoticed {
                        override_id: o.id,
                        noticed_at: now,
                    })
                    .collect(),
            )
            .await?;

        for grant in &expiring {
            self.notifier.notify(AccessEvent::OverrideExpiringSoon {
                override_id: grant.id,
                user_id: grant.user_id,
                valid_until: grant.valid_until,
            });
        }
        Ok(expiring.len())
    }

    /// Override by id.
    pub async fn get(&self, id: OverrideId) -> AccessResult<Override> {
        self.store
            .read()
            .await
            .override_by_id(id)
            .cloned()
            .ok_or(AccessError::OverrideNotFound { override_id: id })
    }

    /// Overrides of `user`, newest first. `active_only` keeps those still flagged active.
    pub async fn list_for_user(&self, user: UserId, active_only: bool) -> Vec<Override> {
        let view = self.store.read().await;
        let mut grants: Vec<Override> = if active_only {
            view.active_overrides_for(user).cloned().collect()
        } else {
            view.overrides_for(user).cloned().collect()
        };
        grants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        grants
    }

    /// Overrides of `user` granted for exactly `scope`, newest first.
    pub async fn list_for_scope(&self, user: UserId, scope: Scope) -> Vec<Override> {
        let mut grants: Vec<Override> = self
            .store
            .read()
            .await
            .overrides_for_scope(user, scope)
            .cloned()
            .collect();
        grants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        grants
    }
}

#[async_trait]
impl OverrideSource for OverrideStore {
    async fn effective_overrides(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> AccessResult<Vec<Override>> {
        Ok(self.store.read().await.effective_overrides_for(user, at))
    }
}
