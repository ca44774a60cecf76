//! Override request workflow
//!
//! Turns an "access denied" into a routed request and drives it through the
//! [`OverrideRequest`] state machine. Approvers are resolved from scope:
//!
//! ```text
//! Department(d) → managers of d, else administrators
//! OrgWide       → administrators
//! ```
//!
//! The requester is never their own approver. Approval commits the state
//! transition and the resulting override in one batch.

use crate::facts::AccessFact;
use crate::store::AccessStore;
use chrono::{DateTime, Duration, Utc};
use clearance_core::{
    AccessError, AccessEvent, AccessResult, Decision, IdentityEffects, NewOverride,
    NewOverrideRequest, NotificationEffects, Override, OverrideId, OverrideRequest, RequestId,
    RequestState, RequestStatus, Scope, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Timing and duration limits of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowPolicy {
    /// Undecided requests older than this get admins added
    pub escalation_timeout: Duration,
    /// Undecided requests older than this expire
    pub request_ttl: Duration,
    /// Duration used when a request asks for 0 hours
    pub default_duration_hours: u32,
    /// Upper bound for requested and approved durations
    pub max_duration_hours: u32,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            escalation_timeout: Duration::hours(48),
            request_ttl: Duration::hours(168),
            default_duration_hours: 24,
            max_duration_hours: 720,
        }
    }
}

/// Request lifecycle operations.
#[derive(Clone)]
pub struct RequestWorkflow {
    store: Arc<AccessStore>,
    identity: Arc<dyn IdentityEffects>,
    notifier: Arc<dyn NotificationEffects>,
    policy: WorkflowPolicy,
}

impl RequestWorkflow {
    /// Create the workflow over a shared [`AccessStore`].
    pub fn new(
        store: Arc<AccessStore>,
        identity: Arc<dyn IdentityEffects>,
        notifier: Arc<dyn NotificationEffects>,
        policy: WorkflowPolicy,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            policy,
        }
    }

    /// Active policy.
    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    /// Persist a `Pending` request routed to the approvers for its scope.
    pub async fn create_request(
        &self,
        mut input: NewOverrideRequest,
    ) -> AccessResult<OverrideRequest> {
        if input.requested_duration_hours == 0 {
            input.requested_duration_hours = self.policy.default_duration_hours;
        }

        let approvers = self.route(input.requester_id, &input.scope).await?;
        if approvers.is_empty() {
            return Err(AccessError::invalid_request(format!(
                "no approver is available for {}",
                input.scope
            )));
        }

        let request = OverrideRequest::open(
            RequestId::new(),
            input,
            approvers,
            self.policy.max_duration_hours,
            self.now(),
        )?;
        self.store
            .commit(vec![AccessFact::RequestOpened {
                request: request.clone(),
            }])
            .await?;

        tracing::info!(
            request_id = %request.id,
            requester_id = %request.requester_id,
            scope = %request.scope,
            level = %request.requested_level,
            approvers = request.approver_ids.len(),
            "override request opened"
        );
        self.notifier.notify(AccessEvent::RequestCreated {
            request_id: request.id,
            requester_id: request.requester_id,
            scope: request.scope,
            requested_level: request.requested_level,
            approvers: request.approver_ids.iter().copied().collect(),
        });
        Ok(request)
    }

    async fn route(&self, requester: UserId, scope: &Scope) -> AccessResult<BTreeSet<UserId>> {
        let identity_down = |e: clearance_core::IdentityError| {
            AccessError::identity_unavailable(format!("approver lookup failed: {e}"))
        };

        let mut approvers: BTreeSet<UserId> = match scope {
            Scope::Department(dept) => self
                .identity
                .department_managers(*dept)
                .await
                .map_err(identity_down)?
                .into_iter()
                .collect(),
            Scope::OrgWide => BTreeSet::new(),
        };
        approvers.remove(&requester);

        if approvers.is_empty() {
            approvers = self
                .identity
                .administrators()
                .await
                .map_err(identity_down)?
                .into_iter()
                .collect();
            approvers.remove(&requester);
        }
        Ok(approvers)
    }

    /// `Pending → Approved`, creating the override in the same commit.
    ///
    /// The override starts now and lasts `duration_override` hours if given,
    /// else the requested duration.
    pub async fn approve(
        &self,
        request_id: RequestId,
        approver: UserId,
        notes: Option<String>,
        duration_override: Option<u32>,
    ) -> AccessResult<(OverrideRequest, Override)> {
        let now = self.now();
        let request = self.get(request_id).await?;
        let hours = duration_override.unwrap_or(request.requested_duration_hours);
        request.check_approval(approver, hours, self.policy.max_duration_hours)?;
        let valid_until = now
            .checked_add_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| {
                AccessError::invalid_request(format!("{hours} hours runs past the calendar"))
            })?;

        let grant = Override::create(
            OverrideId::new(),
            NewOverride {
                user_id: request.requester_id,
                scope: request.scope,
                level: request.requested_level,
                valid_from: now,
                valid_until,
                reason: format!("Approved {request_id}: {}", request.reason),
                granted_by: approver,
                request_id: Some(request_id),
            },
            now,
        )?;

        self.store
            .commit(vec![
                AccessFact::OverrideGranted {
                    grant: grant.clone(),
                },
                AccessFact::RequestApproved {
                    request_id,
                    decision: Decision {
                        approver_id: approver,
                        notes,
                        decided_at: now,
                    },
                    override_id: grant.id,
                    granted_duration_hours: hours,
                },
            ])
            .await?;

        tracing::info!(
            request_id = %request_id,
            approver_id = %approver,
            override_id = %grant.id,
            hours,
            "override request approved"
        );
        self.notify_decided(&request, RequestStatus::Approved, approver);
        Ok((self.get(request_id).await?, grant))
    }

    /// `Pending → Denied`.
    pub async fn deny(
        &self,
        request_id: RequestId,
        approver: UserId,
        notes: Option<String>,
    ) -> AccessResult<OverrideRequest> {
        let request = self.get(request_id).await?;
        request.check_denial(approver)?;

        self.store
            .commit(vec![AccessFact::RequestDenied {
                request_id,
                decision: Decision {
                    approver_id: approver,
                    notes,
                    decided_at: self.now(),
                },
            }])
            .await?;

        tracing::info!(request_id = %request_id, approver_id = %approver, "override request denied");
        self.notify_decided(&request, RequestStatus::Denied, approver);
        self.get(request_id).await
    }

    /// `Pending → Cancelled`, by the requester only.
    pub async fn cancel(&self, request_id: RequestId, user: UserId) -> AccessResult<OverrideRequest> {
        self.get(request_id).await?.check_cancel(user)?;

        self.store
            .commit(vec![AccessFact::RequestCancelled {
                request_id,
                cancelled_by: user,
                cancelled_at: self.now(),
            }])
            .await?;

        tracing::info!(request_id = %request_id, "override request cancelled");
        self.get(request_id).await
    }

    /// Add administrators to every request left undecided past the escalation timeout.
    ///
    /// Original approvers keep their eligibility. Each request commits on its
    /// own so a decision racing the sweep only skips that request.
    pub async fn escalate_stale(&self) -> AccessResult<Vec<RequestId>> {
        let now = self.now();
        let timeout = self.policy.escalation_timeout;
        let stale: Vec<OverrideRequest> = self
            .store
            .read()
            .await
            .pending_created_until(now - timeout)
            .into_iter()
            .filter(|r| r.is_stale(timeout, now))
            .cloned()
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let admins: BTreeSet<UserId> = self
            .identity
            .administrators()
            .await
            .map_err(|e| AccessError::identity_unavailable(format!("admin lookup failed: {e}")))?
            .into_iter()
            .collect();
        if admins.is_empty() {
            tracing::warn!(stale = stale.len(), "escalating with no administrators configured");
        }

        let mut escalated = Vec::with_capacity(stale.len());
        for request in stale {
            let added: Vec<UserId> = admins
                .iter()
                .filter(|a| !request.approver_ids.contains(a) && **a != request.requester_id)
                .copied()
                .collect();

            let committed = self
                .store
                .commit(vec![AccessFact::RequestEscalated {
                    request_id: request.id,
                    added_approvers: added.clone(),
                    escalated_at: now,
                }])
                .await;
            if let Err(err) = committed {
                if self.left_pending(request.id).await {
                    tracing::debug!(
                        request_id = %request.id,
                        error = %err,
                        "request escalated or decided concurrently, skipping"
                    );
                    continue;
                }
                return Err(err);
            }

            tracing::info!(
                request_id = %request.id,
                added = added.len(),
                age_hours = (now - request.created_at).num_hours(),
                "override request auto-escalated"
            );
            self.notifier.notify(AccessEvent::RequestEscalated {
                request_id: request.id,
                requester_id: request.requester_id,
                added_approvers: added,
            });
            escalated.push(request.id);
        }
        Ok(escalated)
    }

    /// Expire requests left undecided past the request lifetime.
    pub async fn expire_abandoned(&self) -> AccessResult<Vec<RequestId>> {
        let now = self.now();
        let ttl = self.policy.request_ttl;
        let abandoned: Vec<RequestId> = self
            .store
            .read()
            .await
            .pending_created_until(now - ttl)
            .into_iter()
            .filter(|r| r.is_abandoned(ttl, now))
            .map(|r| r.id)
            .collect();

        let mut expired = Vec::with_capacity(abandoned.len());
        for request_id in abandoned {
            match self
                .store
                .commit(vec![AccessFact::RequestExpired {
                    request_id,
                    expired_at: now,
                }])
                .await
            {
                Ok(()) => expired.push(request_id),
                Err(AccessError::AlreadyDecided { .. }) => continue,
                Err(err) => return Err(err),
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired abandoned override requests");
        }
        Ok(expired)
    }

    /// Whether `request_id` moved out of plain `Pending` since it was listed.
    async fn left_pending(&self, request_id: RequestId) -> bool {
        self.store
            .read()
            .await
            .request_by_id(request_id)
            .is_some_and(|r| r.state != RequestState::Pending)
    }

    /// Request by id.
    pub async fn get(&self, request_id: RequestId) -> AccessResult<OverrideRequest> {
        self.store
            .read()
            .await
            .request_by_id(request_id)
            .cloned()
            .ok_or(AccessError::RequestNotFound { request_id })
    }

    /// Pending requests `approver` may decide, oldest first.
    pub async fn pending_for_approver(&self, approver: UserId) -> Vec<OverrideRequest> {
        self.store
            .read()
            .await
            .pending()
            .filter(|r| r.can_be_decided_by(approver))
            .cloned()
            .collect()
    }

    /// Pending requests for `scope`, oldest first.
    pub async fn pending_for_scope(&self, scope: Scope) -> Vec<OverrideRequest> {
        self.store
            .read()
            .await
            .pending_for_scope(scope)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Requests opened by `user`, newest first.
    pub async fn requests_for_user(&self, user: UserId) -> Vec<OverrideRequest> {
        let mut requests: Vec<OverrideRequest> =
            self.store.read().await.requests_for(user).cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }

    fn notify_decided(&self, request: &OverrideRequest, status: RequestStatus, approver: UserId) {
        self.notifier.notify(AccessEvent::RequestDecided {
            request_id: request.id,
            requester_id: request.requester_id,
            status,
            approver_id: approver,
        });
    }
}
