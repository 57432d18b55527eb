//! FanOutExecutor against the in-memory case store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, reference, refs, test_config};
use multiples_sync::application::{
    BulkCreation, CaseStoreError, FanOutExecutor, FanOutItem, PropagationMode, RetryPolicy,
    RoundStatus,
};
use multiples_sync::domain::{ChangeSet, MultipleCase, MultipleReference, SingleCase};
use multiples_sync::infrastructure::{AppConfig, InMemoryCaseStore};
use rstest::rstest;

const CASES: [&str; 5] = [
    "1800001/2024",
    "1800002/2024",
    "1800003/2024",
    "1800004/2024",
    "1800005/2024",
];

fn store() -> InMemoryCaseStore {
    InMemoryCaseStore::with_cases(CASES.iter().map(|value| SingleCase::new(reference(value))))
}

fn executor(store: &InMemoryCaseStore, retry: RetryPolicy) -> FanOutExecutor {
    FanOutExecutor::try_new(Arc::new(store.clone()), "ET_EnglandWales", 2, retry).unwrap()
}

fn attach_all() -> Vec<FanOutItem> {
    let multiple = MultipleReference::new("6000001").unwrap();
    CASES
        .iter()
        .map(|value| FanOutItem::new(reference(value), ChangeSet::attach(multiple.clone(), false)))
        .collect()
}

// =============================================================================
// Executor
// =============================================================================

#[rstest]
#[tokio::test]
async fn third_of_five_failing_leaves_four_applied() {
    let store = store();
    store.fail_always(reference(CASES[2]), CaseStoreError::Transport("connection reset".to_string()));

    let report = executor(&store, RetryPolicy::no_retry()).execute(attach_all()).await;

    assert_eq!(report.total(), 5);
    assert_eq!(report.applied.len(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].case_reference, reference(CASES[2]));
    assert_eq!(
        report.failures[0].to_string(),
        "case 1800003/2024 failed: transport error: connection reset"
    );
    assert!(store.case(&reference(CASES[2])).unwrap().multiple_reference.is_none());
    assert!(store.case(&reference(CASES[4])).unwrap().multiple_reference.is_some());
}

#[rstest]
#[tokio::test]
async fn transient_failure_is_retried() {
    let store = store();
    store.fail_on(reference(CASES[0]), CaseStoreError::Timeout(100), 2);
    let retry = RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
    };

    let report = executor(&store, retry).execute(attach_all()).await;

    assert!(report.is_complete());
    let attempts = store
        .submissions()
        .iter()
        .filter(|(case, _)| case == &reference(CASES[0]))
        .count();
    assert_eq!(attempts, 3);
}

#[rstest]
#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let store = store();
    store.fail_always(reference(CASES[1]), CaseStoreError::Conflict("locked".to_string()));
    let retry = RetryPolicy {
        max_attempts: 5,
        base_backoff: Duration::from_millis(1),
    };

    let report = executor(&store, retry).execute(attach_all()).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(store.submissions().len(), 5);
}

#[rstest]
#[tokio::test]
async fn empty_input_returns_empty_report() {
    let report = executor(&store(), RetryPolicy::default()).execute(Vec::new()).await;

    assert_eq!(report.total(), 0);
    assert!(report.is_complete());
}

// =============================================================================
// Through a Creation Round
// =============================================================================

#[rstest]
#[tokio::test]
async fn partial_round_commits_only_written_cases() {
    let harness = Harness::with_config(
        AppConfig {
            retry: RetryPolicy::no_retry(),
            ..test_config()
        },
        &CASES,
    );
    harness
        .cases
        .fail_always(reference(CASES[2]), CaseStoreError::Transport("connection reset".to_string()));

    let outcome = harness
        .dependencies
        .creation_coordinator()
        .create_bulk(BulkCreation {
            multiple: MultipleCase::new("Acme Ltd"),
            requested: refs(&CASES),
            matched: Vec::new(),
            mode: PropagationMode::SynchronousFanOut,
        })
        .await
        .unwrap();

    assert_eq!(outcome.status(), RoundStatus::Partial { failed: 1 });
    assert_eq!(
        Harness::describe(&outcome.multiple),
        vec!["1800001/2024*", "1800002/2024", "1800004/2024", "1800005/2024"]
    );
    assert_eq!(outcome.multiple.case_counter(), 4);
    assert!(outcome.multiple.check_invariants().is_ok());
}
