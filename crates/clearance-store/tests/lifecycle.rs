//! Override store and request workflow lifecycle tests.

use assert_matches::assert_matches;
use chrono::Duration;
use clearance_core::{
    AccessError, AccessLevel, DepartmentId, NewOverride, NewOverrideRequest, OverrideSource,
    PermissionResolver, PhysicalClock, RequestState, RequestStatus, Scope, SimulatedClock, UserId,
};
use async_trait::async_trait;
use clearance_store::{
    AccessStore, FactBatch, FactJournal, FileJournal, MaintenanceSweep, MemoryJournal,
    OverrideStore, RequestWorkflow, StoreError, StoreResult, WorkflowPolicy,
};
use clearance_testkit::{fixtures, DirectoryStub, RecordingNotifier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ADMIN: u64 = 1;
const MANAGER_D3: u64 = 30;
const ALICE: u64 = 100;
const BOB: u64 = 101;

struct Harness {
    store: Arc<AccessStore>,
    clock: SimulatedClock,
    directory: Arc<DirectoryStub>,
    notifier: Arc<RecordingNotifier>,
    overrides: OverrideStore,
    workflow: RequestWorkflow,
    sweep: MaintenanceSweep,
}

async fn harness_over(journal: Arc<dyn FactJournal>, clock: SimulatedClock) -> Harness {
    harness_with_policy(journal, clock, WorkflowPolicy::default()).await
}

async fn harness_with_policy(
    journal: Arc<dyn FactJournal>,
    clock: SimulatedClock,
    policy: WorkflowPolicy,
) -> Harness {
    let directory = Arc::new(
        DirectoryStub::new()
            .with_profile(fixtures::profile(ALICE, 1))
            .with_profile(fixtures::department_profile(BOB, 2, 3, 2))
            .with_managers(3, [MANAGER_D3])
            .with_admins([ADMIN]),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let store = Arc::new(
        AccessStore::open(journal, Arc::new(clock.clone()))
            .await
            .unwrap(),
    );
    let overrides = OverrideStore::new(store.clone(), notifier.clone());
    let workflow = RequestWorkflow::new(
        store.clone(),
        directory.clone(),
        notifier.clone(),
        policy,
    );
    let sweep = MaintenanceSweep::new(overrides.clone(), workflow.clone(), Duration::hours(24));

    Harness {
        store,
        clock,
        directory,
        notifier,
        overrides,
        workflow,
        sweep,
    }
}

async fn harness() -> Harness {
    harness_over(Arc::new(MemoryJournal::new()), fixtures::clock()).await
}

fn grant_for(h: &Harness, user: u64, scope: Scope, hours: i64) -> NewOverride {
    NewOverride {
        user_id: UserId(user),
        scope,
        level: AccessLevel::CONFIDENTIAL,
        valid_from: h.clock.now(),
        valid_until: h.clock.now() + Duration::hours(hours),
        reason: "incident review".into(),
        granted_by: UserId(ADMIN),
        request_id: None,
    }
}

fn ask(user: u64, scope: Scope, hours: u32) -> NewOverrideRequest {
    NewOverrideRequest {
        requester_id: UserId(user),
        scope,
        requested_level: AccessLevel::CONFIDENTIAL,
        requested_duration_hours: hours,
        reason: "need the Q3 forecast".into(),
        trigger_query: Some("q3 forecast".into()),
        trigger_document_id: None,
    }
}

#[tokio::test]
async fn invalid_window_is_rejected_before_persistence() {
    let journal = Arc::new(MemoryJournal::new());
    let h = harness_over(journal.clone(), fixtures::clock()).await;

    let mut input = grant_for(&h, ALICE, Scope::OrgWide, 1);
    input.valid_until = input.valid_from;
    assert_matches!(
        h.overrides.create_override(input).await,
        Err(AccessError::InvalidOverrideWindow { .. })
    );

    let mut input = grant_for(&h, ALICE, Scope::OrgWide, 1);
    input.reason = "   ".into();
    assert_matches!(
        h.overrides.create_override(input).await,
        Err(AccessError::InvalidRequest { .. })
    );
    assert!(journal.is_empty());
}

#[tokio::test]
async fn revoke_twice_matches_revoke_once() {
    let journal = Arc::new(MemoryJournal::new());
    let h = harness_over(journal.clone(), fixtures::clock()).await;
    let grant = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 8))
        .await
        .unwrap();

    let once = h.overrides.revoke(grant.id, UserId(ADMIN)).await.unwrap();
    h.clock.advance(Duration::minutes(5));
    let twice = h.overrides.revoke(grant.id, UserId(ADMIN)).await.unwrap();

    assert_eq!(once, twice);
    assert!(!twice.is_active);
    assert_eq!(journal.len(), 2);
    assert_eq!(h.notifier.count("override_revoked"), 1);
}

#[tokio::test]
async fn revoke_unknown_override_is_not_found() {
    let h = harness().await;
    assert_matches!(
        h.overrides
            .revoke(clearance_core::OverrideId::new(), UserId(ADMIN))
            .await,
        Err(AccessError::OverrideNotFound { .. })
    );
}

#[tokio::test]
async fn extend_moves_window_forward_only() {
    let h = harness().await;
    let grant = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 8))
        .await
        .unwrap();

    let past = h.clock.now() - Duration::hours(1);
    assert_matches!(
        h.overrides.extend(grant.id, past, UserId(ADMIN)).await,
        Err(AccessError::InvalidRequest { .. })
    );

    let later = grant.valid_until + Duration::days(2);
    let extended = h.overrides.extend(grant.id, later, UserId(ADMIN)).await.unwrap();
    assert_eq!(extended.valid_until, later);

    h.clock.advance(Duration::days(3));
    assert_matches!(
        h.overrides
            .extend(grant.id, h.clock.now() + Duration::days(1), UserId(ADMIN))
            .await,
        Err(AccessError::InvalidRequest { .. })
    );
}

#[tokio::test]
async fn lapsed_override_stops_counting_before_and_after_sweep() {
    let h = harness().await;
    let grant = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 2))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(3));
    let effective = h
        .overrides
        .effective_overrides(UserId(ALICE), h.clock.now())
        .await
        .unwrap();
    assert!(effective.is_empty());
    assert_eq!(h.overrides.list_for_user(UserId(ALICE), true).await.len(), 1);

    let report = h.sweep.run_once().await.unwrap();
    assert_eq!(report.overrides_expired, 1);
    assert!(h.overrides.list_for_user(UserId(ALICE), true).await.is_empty());
    assert!(!h.overrides.get(grant.id).await.unwrap().is_active);
    assert_eq!(h.overrides.list_for_user(UserId(ALICE), false).await.len(), 1);
}

#[tokio::test]
async fn expiring_soon_notice_goes_out_once() {
    let h = harness().await;
    h.overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 30))
        .await
        .unwrap();

    assert_eq!(h.sweep.run_once().await.unwrap().expiry_notices, 0);
    h.clock.advance(Duration::hours(8));
    assert_eq!(h.sweep.run_once().await.unwrap().expiry_notices, 1);
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.sweep.run_once().await.unwrap().expiry_notices, 0);
    assert_eq!(h.notifier.count("override_expiring_soon"), 1);
}

#[tokio::test]
async fn listings_are_scoped_and_newest_first() {
    let h = harness().await;
    let first = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 8))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5));
    let dept = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::Department(DepartmentId(3)), 8))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5));
    let latest = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 8))
        .await
        .unwrap();

    let org_ids: Vec<_> = h
        .overrides
        .list_for_scope(UserId(ALICE), Scope::OrgWide)
        .await
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(org_ids, [latest.id, first.id]);
    let dept_ids: Vec<_> = h
        .overrides
        .list_for_scope(UserId(ALICE), Scope::Department(DepartmentId(3)))
        .await
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(dept_ids, [dept.id]);

    let older = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5));
    let newer = h
        .workflow
        .create_request(ask(ALICE, Scope::OrgWide, 24))
        .await
        .unwrap();

    let request_ids: Vec<_> = h
        .workflow
        .requests_for_user(UserId(ALICE))
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(request_ids, [newer.id, older.id]);
    assert!(h.workflow.requests_for_user(UserId(BOB)).await.is_empty());
}

#[tokio::test]
async fn requests_route_by_scope() {
    let h = harness().await;

    let dept = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();
    assert_eq!(dept.approver_ids.iter().copied().collect::<Vec<_>>(), [UserId(MANAGER_D3)]);

    let unmanaged = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(9)), 24))
        .await
        .unwrap();
    assert_eq!(unmanaged.approver_ids.iter().copied().collect::<Vec<_>>(), [UserId(ADMIN)]);

    let org = h
        .workflow
        .create_request(ask(ALICE, Scope::OrgWide, 24))
        .await
        .unwrap();
    assert_eq!(org.approver_ids.iter().copied().collect::<Vec<_>>(), [UserId(ADMIN)]);
    assert_eq!(h.notifier.count("request_created"), 3);
}

#[tokio::test]
async fn manager_requesting_for_own_department_goes_to_admins() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(MANAGER_D3, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();
    assert!(!request.can_be_decided_by(UserId(MANAGER_D3)));
    assert!(request.can_be_decided_by(UserId(ADMIN)));
}

#[tokio::test]
async fn duplicate_pending_request_is_rejected() {
    let h = harness().await;
    h.workflow
        .create_request(ask(ALICE, Scope::OrgWide, 24))
        .await
        .unwrap();
    assert_matches!(
        h.workflow.create_request(ask(ALICE, Scope::OrgWide, 12)).await,
        Err(AccessError::InvalidRequest { .. })
    );
}

#[tokio::test]
async fn zero_duration_uses_policy_default() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::OrgWide, 0))
        .await
        .unwrap();
    assert_eq!(request.requested_duration_hours, 24);
}

#[tokio::test]
async fn approval_creates_override_starting_now() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(2));
    let (approved, grant) = h
        .workflow
        .approve(request.id, UserId(MANAGER_D3), Some("ok for audit".into()), Some(6))
        .await
        .unwrap();

    assert_eq!(approved.status(), RequestStatus::Approved);
    assert_eq!(approved.approver_id(), Some(UserId(MANAGER_D3)));
    assert_eq!(approved.decided_at(), Some(h.clock.now()));
    assert_eq!(approved.approval_notes(), Some("ok for audit"));
    assert_matches!(
        approved.state,
        RequestState::Approved { override_id, granted_duration_hours: 6, .. } if override_id == grant.id
    );

    assert_eq!(grant.valid_from, h.clock.now());
    assert_eq!(grant.valid_until, h.clock.now() + Duration::hours(6));
    assert_eq!(grant.request_id, Some(request.id));
    assert_eq!(grant.scope, Scope::Department(DepartmentId(3)));

    let resolver = PermissionResolver::new(
        h.directory.clone(),
        Arc::new(h.overrides.clone()),
        Arc::new(h.clock.clone()),
    );
    assert_eq!(
        resolver
            .resolve(UserId(ALICE), Scope::Department(DepartmentId(3)))
            .await,
        AccessLevel::CONFIDENTIAL
    );
    assert_eq!(
        resolver.resolve(UserId(ALICE), Scope::OrgWide).await,
        AccessLevel::GENERAL
    );
}

#[tokio::test]
async fn approval_past_the_calendar_is_rejected() {
    let policy = WorkflowPolicy {
        max_duration_hours: u32::MAX,
        ..WorkflowPolicy::default()
    };
    let journal = Arc::new(MemoryJournal::new());
    let h = harness_with_policy(journal.clone(), fixtures::clock(), policy).await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();

    assert_matches!(
        h.workflow
            .approve(request.id, UserId(MANAGER_D3), None, Some(u32::MAX))
            .await,
        Err(AccessError::InvalidRequest { .. })
    );
    assert_eq!(
        h.workflow.get(request.id).await.unwrap().status(),
        RequestStatus::Pending
    );
    assert_eq!(journal.len(), 1);
}

#[tokio::test]
async fn decisions_are_final_and_restricted_to_approvers() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();

    assert_matches!(
        h.workflow.approve(request.id, UserId(BOB), None, None).await,
        Err(AccessError::NotAnApprover { .. })
    );
    assert_matches!(
        h.workflow
            .approve(request.id, UserId(MANAGER_D3), None, Some(10_000))
            .await,
        Err(AccessError::InvalidRequest { .. })
    );

    h.workflow
        .deny(request.id, UserId(MANAGER_D3), Some("not needed".into()))
        .await
        .unwrap();
    assert_matches!(
        h.workflow.approve(request.id, UserId(MANAGER_D3), None, None).await,
        Err(AccessError::AlreadyDecided {
            status: RequestStatus::Denied,
            ..
        })
    );
    assert!(h.overrides.list_for_user(UserId(ALICE), false).await.is_empty());
    assert_eq!(h.notifier.count("request_decided"), 1);
}

#[tokio::test]
async fn only_requester_can_cancel() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::OrgWide, 24))
        .await
        .unwrap();

    assert_matches!(
        h.workflow.cancel(request.id, UserId(BOB)).await,
        Err(AccessError::InvalidRequest { .. })
    );
    let cancelled = h.workflow.cancel(request.id, UserId(ALICE)).await.unwrap();
    assert_eq!(cancelled.status(), RequestStatus::Cancelled);
    assert!(h.workflow.pending_for_approver(UserId(ADMIN)).await.is_empty());
}

#[tokio::test]
async fn stale_department_request_escalates_to_admins() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();
    assert!(!request.can_be_decided_by(UserId(ADMIN)));

    h.clock.advance(Duration::hours(47));
    assert_eq!(h.sweep.run_once().await.unwrap().requests_escalated, 0);

    h.clock.advance(Duration::hours(2));
    assert_eq!(h.sweep.run_once().await.unwrap().requests_escalated, 1);

    let escalated = h.workflow.get(request.id).await.unwrap();
    assert!(escalated.auto_escalated());
    assert_eq!(escalated.escalated_at, Some(h.clock.now()));
    assert!(escalated.can_be_decided_by(UserId(MANAGER_D3)));
    assert_eq!(
        h.workflow.pending_for_approver(UserId(ADMIN)).await.len(),
        1
    );

    assert_eq!(h.sweep.run_once().await.unwrap().requests_escalated, 0);

    let (approved, _) = h
        .workflow
        .approve(request.id, UserId(ADMIN), None, None)
        .await
        .unwrap();
    assert_eq!(approved.status(), RequestStatus::Approved);
    assert_eq!(h.notifier.count("request_escalated"), 1);
}

#[tokio::test]
async fn overlapping_sweeps_escalate_each_request_once() {
    let h = harness().await;
    let first = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();
    let second = h
        .workflow
        .create_request(ask(BOB, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(49));
    h.directory.set_yield_on_admins(true);

    let (a, b) = tokio::join!(h.workflow.escalate_stale(), h.workflow.escalate_stale());
    let mut escalated = a.unwrap();
    escalated.extend(b.unwrap());
    escalated.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(escalated, expected);

    for id in [first.id, second.id] {
        assert!(h.workflow.get(id).await.unwrap().auto_escalated());
    }
    assert_eq!(h.notifier.count("request_escalated"), 2);
}

#[tokio::test]
async fn abandoned_requests_expire() {
    let h = harness().await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::OrgWide, 24))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(169));
    let report = h.sweep.run_once().await.unwrap();
    assert_eq!(report.requests_expired, 1);
    assert_eq!(report.requests_escalated, 0);
    assert_eq!(
        h.workflow.get(request.id).await.unwrap().status(),
        RequestStatus::Expired
    );
}

#[tokio::test]
async fn identity_outage_blocks_request_routing() {
    let h = harness().await;
    h.directory.set_offline(true);
    assert_matches!(
        h.workflow.create_request(ask(ALICE, Scope::OrgWide, 24)).await,
        Err(AccessError::IdentityUnavailable { .. })
    );
}

#[tokio::test]
async fn state_survives_reopen_from_file_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.jsonl");
    let clock = fixtures::clock();

    let (request_id, grant_id, revoked_id) = {
        let journal = Arc::new(FileJournal::open(&path).await.unwrap());
        let h = harness_over(journal, clock.clone()).await;
        let request = h
            .workflow
            .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
            .await
            .unwrap();
        let (_, grant) = h
            .workflow
            .approve(request.id, UserId(MANAGER_D3), None, None)
            .await
            .unwrap();
        let revoked = h
            .overrides
            .create_override(grant_for(&h, BOB, Scope::OrgWide, 4))
            .await
            .unwrap();
        h.overrides.revoke(revoked.id, UserId(ADMIN)).await.unwrap();
        (request.id, grant.id, revoked.id)
    };

    let journal = Arc::new(FileJournal::open(&path).await.unwrap());
    let h = harness_over(journal, clock).await;

    assert_eq!(
        h.workflow.get(request_id).await.unwrap().status(),
        RequestStatus::Approved
    );
    assert!(h.overrides.get(grant_id).await.unwrap().is_active);
    assert!(!h.overrides.get(revoked_id).await.unwrap().is_active);
    assert_eq!(
        h.overrides
            .effective_overrides(UserId(ALICE), h.clock.now())
            .await
            .unwrap()
            .len(),
        1
    );
}

/// Journal whose next append reaches storage and then reports a sync failure.
#[derive(Default)]
struct SyncFailsOnce {
    inner: Arc<MemoryJournal>,
    armed: AtomicBool,
}

impl SyncFailsOnce {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FactJournal for SyncFailsOnce {
    async fn load(&self) -> StoreResult<Vec<FactBatch>> {
        self.inner.load().await
    }

    async fn append(&self, batch: &FactBatch) -> StoreResult<()> {
        self.inner.append(batch).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "facts.jsonl".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "sync failed"),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn uncertain_append_blocks_commits_until_reopen() {
    let journal = Arc::new(SyncFailsOnce::default());
    let clock = fixtures::clock();
    let h = harness_over(journal.clone(), clock.clone()).await;
    let grant = h
        .overrides
        .create_override(grant_for(&h, ALICE, Scope::OrgWide, 8))
        .await
        .unwrap();

    journal.arm();
    assert_matches!(
        h.overrides.revoke(grant.id, UserId(ADMIN)).await,
        Err(AccessError::Storage { .. })
    );
    assert!(h.store.is_poisoned().await);

    assert_matches!(
        h.overrides.revoke(grant.id, UserId(ADMIN)).await,
        Err(AccessError::Storage { .. })
    );
    assert_matches!(
        h.overrides
            .create_override(grant_for(&h, BOB, Scope::OrgWide, 8))
            .await,
        Err(AccessError::Storage { .. })
    );
    assert_eq!(journal.inner.len(), 2);

    let reopened = harness_over(journal.inner.clone(), clock).await;
    assert!(!reopened.store.is_poisoned().await);
    assert!(!reopened.overrides.get(grant.id).await.unwrap().is_active);
}

#[tokio::test]
async fn failed_approval_is_not_applied_twice() {
    let journal = Arc::new(SyncFailsOnce::default());
    let clock = fixtures::clock();
    let h = harness_over(journal.clone(), clock.clone()).await;
    let request = h
        .workflow
        .create_request(ask(ALICE, Scope::Department(DepartmentId(3)), 24))
        .await
        .unwrap();

    journal.arm();
    assert!(h
        .workflow
        .approve(request.id, UserId(MANAGER_D3), None, None)
        .await
        .is_err());
    assert!(h
        .workflow
        .approve(request.id, UserId(MANAGER_D3), None, None)
        .await
        .is_err());

    let reopened = harness_over(journal.inner.clone(), clock).await;
    assert_eq!(
        reopened.workflow.get(request.id).await.unwrap().status(),
        RequestStatus::Approved
    );
    assert_eq!(
        reopened
            .overrides
            .effective_overrides(UserId(ALICE), reopened.clock.now())
            .await
            .unwrap()
            .len(),
        1
    );
}
