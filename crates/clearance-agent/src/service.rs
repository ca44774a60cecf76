//! Request-facing service surface
//!
//! `query` is the hot path: resolve access, derive the security-scoped cache
//! key, serve a hit or run adaptive retrieval, and cache only successes. Every
//! other operation is a thin pass-through to the resolver, override store or
//! request workflow, with cache invalidation where a grant shrinks.

use crate::response::QueryResponse;
use chrono::{DateTime, Utc};
use clearance_cache::{
    normalize_query, CacheNamespace, CacheScope, CacheStats, ConversationLog, ConversationTurn,
    ScopePolicy, ScopedCache, SingleFlight,
};
use clearance_core::{
    AccessError, AccessLevel, AccessResult, DepartmentId, NewOverride, NewOverrideRequest,
    Override, OverrideId, OverrideRequest, PermissionResolver, PermissionSummary, PhysicalClock,
    RequestId, Scope, UserId,
};
use clearance_retrieval::{AdaptiveRetriever, RetrievalFailure, RetrievalOutcome};
use clearance_store::{OverrideStore, RequestWorkflow};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Flights = SingleFlight<Result<RetrievalOutcome, RetrievalFailure>>;

/// Collaborators and options the service is assembled from.
pub struct ServiceParts {
    /// Effective permission resolver
    pub resolver: PermissionResolver,
    /// Override lifecycle
    pub overrides: OverrideStore,
    /// Override request lifecycle
    pub workflow: RequestWorkflow,
    /// Scoped cache shared by retrieval results and conversation history
    pub cache: Arc<ScopedCache>,
    /// Adaptive retrieval orchestrator
    pub retriever: AdaptiveRetriever,
    /// When department scoping applies
    pub scope_policy: ScopePolicy,
    /// Coalesce concurrent misses per key
    pub single_flight: bool,
    /// Turns kept per conversation
    pub conversation_max_turns: usize,
    /// Time source for conversation turns
    pub clock: Arc<dyn PhysicalClock>,
}

/// The access-controlled retrieval service.
#[derive(Clone)]
pub struct ClearanceService {
    resolver: PermissionResolver,
    overrides: OverrideStore,
    workflow: RequestWorkflow,
    cache: Arc<ScopedCache>,
    conversations: ConversationLog,
    retriever: AdaptiveRetriever,
    flights: Option<Arc<Flights>>,
    scope_policy: ScopePolicy,
    clock: Arc<dyn PhysicalClock>,
}

impl ClearanceService {
    /// Assemble the service.
    pub fn new(parts: ServiceParts) -> Self {
        Self {
            conversations: ConversationLog::new(parts.cache.clone(), parts.conversation_max_turns),
            resolver: parts.resolver,
            overrides: parts.overrides,
            workflow: parts.workflow,
            cache: parts.cache,
            retriever: parts.retriever,
            flights: parts.single_flight.then(|| Arc::new(Flights::new())),
            scope_policy: parts.scope_policy,
            clock: parts.clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Answer `text` for `user` with only the documents they are cleared for.
    ///
    /// Never returns an error: outages and denials become a failed
    /// [`QueryResponse`] with a stable code. Failures are never cached.
    pub async fn query(&self, text: &str, user: UserId) -> QueryResponse {
        let snapshot = match self.resolver.snapshot(user).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(user_id = %user, error = %error, "query refused: access could not be resolved");
                return QueryResponse::from_access_error(&error);
            }
        };
        let access = snapshot.access;

        if access.org_level == AccessLevel::NONE && !access.has_department_access() {
            debug!(user_id = %user, "query refused: user holds no clearance");
            return QueryResponse::from_access_error(&AccessError::AccessDenied {
                scope: Scope::OrgWide,
                required: AccessLevel::GENERAL,
                effective: AccessLevel::NONE,
            });
        }

        let scope = CacheScope::for_access(&access, self.scope_policy);
        let normalized = normalize_query(text);
        let key = self.cache.retrieval_key(&normalized, &scope);

        if let Some(outcome) = self
            .cache
            .get_json::<RetrievalOutcome>(CacheNamespace::Retrieval, &key)
            .await
        {
            debug!(user_id = %user, scope = scope.kind(), "retrieval served from cache");
            self.record_turn(user, text, &outcome).await;
            return QueryResponse::from_outcome(outcome, true, scope.kind());
        }

        let result = match &self.flights {
            Some(flights) => {
                flights
                    .run(&key, || self.retrieve_and_store(&normalized, &scope, &key))
                    .await
            }
            None => self.retrieve_and_store(&normalized, &scope, &key).await,
        };

        match result {
            Ok(outcome) => {
                self.record_turn(user, text, &outcome).await;
                QueryResponse::from_outcome(outcome, false, scope.kind())
            }
            Err(failure) => {
                warn!(
                    user_id = %user,
                    scope = scope.kind(),
                    code = failure.error_code(),
                    error = %failure,
                    "retrieval failed"
                );
                QueryResponse::from_failure(&failure, scope.kind())
            }
        }
    }

    async fn retrieve_and_store(
        &self,
        normalized: &str,
        scope: &CacheScope,
        key: &str,
    ) -> Result<RetrievalOutcome, RetrievalFailure> {
        let outcome = self.retriever.retrieve(normalized, &scope.filter()).await?;
        self.cache
            .put_json(CacheNamespace::Retrieval, key, &outcome)
            .await;
        Ok(outcome)
    }

    async fn record_turn(&self, user: UserId, text: &str, outcome: &RetrievalOutcome) {
        let turn = ConversationTurn {
            query: text.to_string(),
            document_ids: outcome
                .documents
                .iter()
                .map(|d| d.document_id.clone())
                .collect(),
            at: self.now(),
        };
        self.conversations.record(user, turn).await;
    }

    /// Whether `user` may see a document with the given classification.
    ///
    /// Fails closed: if access cannot be resolved the answer is `false`.
    pub async fn can_access_document(
        &self,
        user: UserId,
        document_level: AccessLevel,
        document_department: Option<DepartmentId>,
        department_only: bool,
    ) -> bool {
        let access = self.resolver.effective_access(user).await;
        clearance_core::can_access_document(
            &access,
            document_level,
            document_department,
            department_only,
        )
    }

    /// Like [`can_access_document`](Self::can_access_document), but explains
    /// a refusal: `AccessDenied` carries the scope and levels for an override
    /// request, and an identity outage is reported as such.
    pub async fn check_document_access(
        &self,
        user: UserId,
        document_level: AccessLevel,
        document_department: Option<DepartmentId>,
        department_only: bool,
    ) -> AccessResult<()> {
        let access = self.resolver.snapshot(user).await?.access;
        if clearance_core::can_access_document(
            &access,
            document_level,
            document_department,
            department_only,
        ) {
            return Ok(());
        }
        let scope = document_department.map_or(Scope::OrgWide, Scope::Department);
        Err(AccessError::AccessDenied {
            scope,
            required: document_level,
            effective: access.level_for(&scope),
        })
    }

    /// Base clearance, effective overrides and effective level per scope.
    pub async fn permission_summary(&self, user: UserId) -> AccessResult<PermissionSummary> {
        let snapshot = self.resolver.snapshot(user).await?;
        Ok(PermissionSummary::new(
            &snapshot.profile,
            snapshot.overrides,
            &snapshot.access,
        ))
    }

    /// Grant an override directly (administrative path).
    pub async fn grant_override(&self, input: NewOverride) -> AccessResult<Override> {
        self.overrides.create_override(input).await
    }

    /// Revoke an override and flush cached retrieval results.
    ///
    /// Scope keying already keeps the revoked level's entries away from the
    /// user; the flush bounds how long results computed before the
    /// revocation stay around.
    pub async fn revoke_override(&self, id: OverrideId, revoked_by: UserId) -> AccessResult<Override> {
        let revoked = self.overrides.revoke(id, revoked_by).await?;
        let flushed = self.cache.invalidate(CacheNamespace::Retrieval).await;
        info!(override_id = %id, flushed, "retrieval cache invalidated after revocation");
        Ok(revoked)
    }

    /// Move an override's end later.
    pub async fn extend_override(
        &self,
        id: OverrideId,
        valid_until: DateTime<Utc>,
        extended_by: UserId,
    ) -> AccessResult<Override> {
        self.overrides.extend(id, valid_until, extended_by).await
    }

    /// Open an override request.
    pub async fn request_access(&self, input: NewOverrideRequest) -> AccessResult<OverrideRequest> {
        self.workflow.create_request(input).await
    }

    /// Approve a pending request, creating its override.
    pub async fn approve_request(
        &self,
        request_id: RequestId,
        approver: UserId,
        notes: Option<String>,
        duration_override: Option<u32>,
    ) -> AccessResult<(OverrideRequest, Override)> {
        self.workflow
            .approve(request_id, approver, notes, duration_override)
            .await
    }

    /// Deny a pending request.
    pub async fn deny_request(
        &self,
        request_id: RequestId,
        approver: UserId,
        notes: Option<String>,
    ) -> AccessResult<OverrideRequest> {
        self.workflow.deny(request_id, approver, notes).await
    }

    /// Withdraw a pending request.
    pub async fn cancel_request(&self, request_id: RequestId, user: UserId) -> AccessResult<OverrideRequest> {
        self.workflow.cancel(request_id, user).await
    }

    /// Pending requests `approver` may decide.
    pub async fn pending_for_approver(&self, approver: UserId) -> Vec<OverrideRequest> {
        self.workflow.pending_for_approver(approver).await
    }

    /// Recent turns for `user`, oldest first.
    pub async fn conversation_history(&self, user: UserId) -> Vec<ConversationTurn> {
        self.conversations.history(user).await
    }

    /// Forget `user`'s conversation.
    pub async fn clear_conversation(&self, user: UserId) {
        self.conversations.clear(user).await;
    }

    /// Cache hit, miss, write and error counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Override lifecycle.
    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    /// Request lifecycle.
    pub fn workflow(&self) -> &RequestWorkflow {
        &self.workflow
    }

    /// Permission resolver.
    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }
}
