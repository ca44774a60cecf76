//! Adaptive retrieval against scripted collaborators.

use assert_matches::assert_matches;
use clearance_core::{AccessFilter, AccessLevel, DepartmentId};
use clearance_retrieval::{
    AdaptiveRetriever, RetrievalConfig, RetrievalFailure, RerankEffects, SearchError,
};
use clearance_testkit::{candidate, department_candidate, ScriptedReranker, ScriptedSearch};
use std::sync::Arc;
use std::time::Duration;

fn config(rerank_enabled: bool) -> RetrievalConfig {
    RetrievalConfig {
        min_k: 3,
        max_k: 10,
        quality_threshold: 0.5,
        rerank_enabled,
        ..RetrievalConfig::default()
    }
}

fn retriever(
    search: &Arc<ScriptedSearch>,
    reranker: Option<Arc<ScriptedReranker>>,
    rerank_enabled: bool,
) -> AdaptiveRetriever {
    AdaptiveRetriever::new(
        search.clone(),
        reranker.map(|r| r as Arc<dyn RerankEffects>),
        config(rerank_enabled),
    )
}

fn internal() -> AccessFilter {
    AccessFilter::org_only(AccessLevel::INTERNAL)
}

fn low_hits(n: usize) -> Vec<clearance_retrieval::DocumentCandidate> {
    (0..n)
        .map(|i| candidate(&format!("low-{i}"), 0.3 - i as f64 * 0.01, 1))
        .collect()
}

#[tokio::test]
async fn low_quality_at_min_k_escalates_and_succeeds() {
    let mut better = vec![candidate("good", 0.8, 2)];
    better.extend(low_hits(5));
    let search = Arc::new(ScriptedSearch::new().respond(3, low_hits(3)).respond(6, better));

    let outcome = retriever(&search, None, false)
        .retrieve("What is the Revenue Report?", &internal())
        .await
        .unwrap();

    assert_eq!(
        search.calls(),
        vec![("revenue report".to_string(), 3), ("revenue report".to_string(), 6)]
    );
    assert!(outcome.quality_passed);
    assert_eq!(outcome.searches, 2);
    assert_eq!(outcome.k, 6);
    assert_eq!(outcome.documents[0].document_id.0, "good");
    assert_eq!(outcome.max_access_level_seen, AccessLevel::INTERNAL);
    assert!(!outcome.reranked);
}

#[tokio::test]
async fn high_quality_at_min_k_returns_immediately() {
    let search = Arc::new(ScriptedSearch::new().respond(1, vec![candidate("a", 0.9, 1)]));
    let outcome = retriever(&search, None, false)
        .retrieve("revenue", &internal())
        .await
        .unwrap();
    assert_eq!(search.call_count(), 1);
    assert_eq!(outcome.k, 3);
}

#[tokio::test]
async fn rerank_runs_once_after_max_k() {
    let search = Arc::new(ScriptedSearch::new().respond(1, low_hits(10)));
    let reranker = Arc::new(ScriptedReranker::new().score("low-7", 0.9));

    let outcome = retriever(&search, Some(reranker.clone()), true)
        .retrieve("revenue", &internal())
        .await
        .unwrap();

    let ks: Vec<usize> = search.calls().into_iter().map(|(_, k)| k).collect();
    assert_eq!(ks, [3, 6, 10]);
    assert_eq!(reranker.call_count(), 1);
    assert!(outcome.reranked);
    assert!(outcome.quality_passed);
    assert_eq!(outcome.documents[0].document_id.0, "low-7");
}

#[tokio::test]
async fn exhausted_escalation_without_rerank_reports_low_quality() {
    let search = Arc::new(ScriptedSearch::new().respond(1, low_hits(10)));
    let reranker = Arc::new(ScriptedReranker::new().score("low-0", 0.9));

    let outcome = retriever(&search, Some(reranker.clone()), false)
        .retrieve("revenue", &internal())
        .await
        .unwrap();

    assert_eq!(search.call_count(), 3);
    assert_eq!(reranker.call_count(), 0);
    assert!(!outcome.quality_passed);
    assert_eq!(outcome.documents.len(), 10);
}

#[tokio::test]
async fn infrastructure_failure_is_not_escalated() {
    let search = Arc::new(ScriptedSearch::new().respond(1, low_hits(3)));
    search.fail_with(SearchError::Unavailable("connection refused".into()));

    let result = retriever(&search, None, false)
        .retrieve("revenue", &internal())
        .await;

    assert_matches!(
        result,
        Err(RetrievalFailure::CollaboratorUnavailable { ref stage, .. }) if stage == "search"
    );
    assert_eq!(search.call_count(), 1);
}

#[tokio::test]
async fn rerank_failure_propagates() {
    let search = Arc::new(ScriptedSearch::new().respond(1, low_hits(10)));
    let reranker =
        Arc::new(ScriptedReranker::new().failing(SearchError::Rejected("quota".into())));

    let result = retriever(&search, Some(reranker), true)
        .retrieve("revenue", &internal())
        .await;
    assert_matches!(
        result,
        Err(RetrievalFailure::CollaboratorUnavailable { ref stage, .. }) if stage == "rerank"
    );
}

#[tokio::test(start_paused = true)]
async fn hung_collaborator_times_out() {
    let search = Arc::new(ScriptedSearch::new());
    search.hang();

    let mut config = config(false);
    config.collaborator_timeout = Duration::from_millis(250);
    let result = AdaptiveRetriever::new(search.clone(), None, config)
        .retrieve("revenue", &internal())
        .await;

    assert_matches!(result, Err(RetrievalFailure::Timeout { after, .. }) if after == Duration::from_millis(250));
    assert_eq!(search.call_count(), 1);
}

#[tokio::test]
async fn nothing_permitted_after_full_escalation_is_a_failure() {
    let search = Arc::new(ScriptedSearch::new().respond(1, vec![candidate("secret", 0.9, 4)]));

    let result = retriever(&search, None, false)
        .retrieve("revenue", &internal())
        .await;

    assert_matches!(result, Err(RetrievalFailure::NoCandidates { k: 10 }));
    assert_eq!(search.call_count(), 3);
}

#[tokio::test]
async fn candidates_are_filtered_locally() {
    let search = Arc::new(ScriptedSearch::new().respond(
        1,
        vec![
            candidate("too-high", 0.99, 4),
            department_candidate("other-dept-only", 0.95, 1, 20, true),
            department_candidate("own-dept-only", 0.9, 3, 10, true),
            candidate("public", 0.6, 1),
        ],
    ));
    let filter = AccessFilter {
        org_level: AccessLevel::INTERNAL,
        departments: [(DepartmentId(10), AccessLevel::CONFIDENTIAL)].into_iter().collect(),
    };

    let config = RetrievalConfig {
        min_k: 4,
        ..config(false)
    };

    let outcome = AdaptiveRetriever::new(search.clone(), None, config)
        .retrieve("revenue", &filter)
        .await
        .unwrap();

    assert_eq!(search.calls(), vec![("revenue".to_string(), 4)]);
    let ids: Vec<&str> = outcome
        .documents
        .iter()
        .map(|d| d.document_id.0.as_str())
        .collect();
    assert_eq!(ids, ["own-dept-only", "public"]);
    assert_eq!(outcome.max_access_level_seen, AccessLevel::CONFIDENTIAL);
}

#[tokio::test]
async fn equal_scores_keep_collaborator_order() {
    let search = Arc::new(ScriptedSearch::new().respond(
        1,
        vec![
            candidate("first", 0.7, 1),
            candidate("second", 0.7, 1),
            candidate("third", 0.7, 1),
        ],
    ));

    let retriever = retriever(&search, None, false);
    for _ in 0..2 {
        let outcome = retriever.retrieve("revenue", &internal()).await.unwrap();
        let ids: Vec<&str> = outcome
            .documents
            .iter()
            .map(|d| d.document_id.0.as_str())
            .collect();
        assert_eq!(ids, ["first", "second", "third"]);
    }
}
