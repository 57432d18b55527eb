//! Bounded concurrent application of change sets.
//!
//! [`FanOutExecutor`] spawns one task per case and gates every case-store call
//! behind a shared [`Semaphore`]. The semaphore is created once per executor
//! and shared by clones, so the whole process never has more than `workers`
//! case writes in flight no matter how many rounds run concurrently.
//!
//! `execute` awaits every spawned task before returning. A task that panics
//! is reported as a failure of its case, so the report always accounts for
//! every input item.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::ports::{CaseStoreClient, CaseStoreError};
use crate::domain::{CaseReference, ChangeSet, PropagationFailure, SingleCase};

// =============================================================================
// Error Types
// =============================================================================

/// Invalid executor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutError {
    /// The worker count was zero.
    InvalidWorkerCount,
    /// The attempt limit was zero.
    InvalidAttemptLimit,
}

impl fmt::Display for FanOutError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkerCount => {
                write!(formatter, "fan-out worker count must be greater than 0")
            }
            Self::InvalidAttemptLimit => {
                write!(formatter, "fan-out attempt limit must be greater than 0")
            }
        }
    }
}

impl std::error::Error for FanOutError {}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry with exponential backoff for retryable case-store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per case, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

// =============================================================================
// Items and Report
// =============================================================================

/// One case write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutItem {
    /// The case to write.
    pub case_reference: CaseReference,
    /// What to write.
    pub change_set: ChangeSet,
}

impl FanOutItem {
    /// Creates an item.
    #[must_use]
    pub const fn new(case_reference: CaseReference, change_set: ChangeSet) -> Self {
        Self {
            case_reference,
            change_set,
        }
    }
}

/// Result of one `execute` call.
///
/// `applied.len() + failures.len()` equals the number of input items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FanOutReport {
    /// Cases as returned by the store after a successful write, in input order.
    pub applied: Vec<SingleCase>,
    /// Cases whose write failed, in input order.
    pub failures: Vec<PropagationFailure>,
}

impl FanOutReport {
    /// Number of items accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.applied.len() + self.failures.len()
    }

    /// Returns `true` if every write succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// References of the successfully written cases.
    #[must_use]
    pub fn applied_references(&self) -> Vec<CaseReference> {
        self.applied
            .iter()
            .map(|case| case.case_reference.clone())
            .collect()
    }

    /// Appends `other` to this report.
    pub fn merge(&mut self, other: Self) {
        self.applied.extend(other.applied);
        self.failures.extend(other.failures);
    }
}

// =============================================================================
// FanOutExecutor
// =============================================================================

/// Applies change sets to many cases with bounded concurrency.
///
/// Cloning shares the worker permits.
#[derive(Clone)]
pub struct FanOutExecutor {
    client: Arc<dyn CaseStoreClient>,
    case_type_id: Arc<str>,
    permits: Arc<Semaphore>,
    workers: usize,
    retry: RetryPolicy,
}

impl fmt::Debug for FanOutExecutor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FanOutExecutor")
            .field("case_type_id", &self.case_type_id)
            .field("workers", &self.workers)
            .field("available", &self.permits.available_permits())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl FanOutExecutor {
    /// Creates an executor with `workers` concurrent case writes.
    ///
    /// # Errors
    ///
    /// Returns [`FanOutError::InvalidWorkerCount`] if `workers` is 0, or
    /// [`FanOutError::InvalidAttemptLimit`] if `retry.max_attempts` is 0.
    pub fn try_new(
        client: Arc<dyn CaseStoreClient>,
        case_type_id: impl Into<String>,
        workers: usize,
        retry: RetryPolicy,
    ) -> Result<Self, FanOutError> {
        if workers == 0 {
            return Err(FanOutError::InvalidWorkerCount);
        }
        if retry.max_attempts == 0 {
            return Err(FanOutError::InvalidAttemptLimit);
        }
        let case_type_id: String = case_type_id.into();
        Ok(Self {
            client,
            case_type_id: Arc::from(case_type_id),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            retry,
        })
    }

    /// Maximum number of concurrent case writes.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// The retry policy applied to every write.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Writes every item and waits for all of them, retries included.
    ///
    /// Never fails as a whole: each item ends up in either `applied` or
    /// `failures`.
    pub async fn execute(&self, items: Vec<FanOutItem>) -> FanOutReport {
        let total = items.len();
        tracing::debug!(
            items = total,
            workers = self.workers,
            "fanning out case writes"
        );

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let reference = item.case_reference.clone();
                let handle = tokio::spawn(apply_with_retry(
                    Arc::clone(&self.client),
                    Arc::clone(&self.case_type_id),
                    Arc::clone(&self.permits),
                    self.retry,
                    item,
                ));
                (reference, handle)
            })
            .collect();

        let mut report = FanOutReport {
            applied: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        for (reference, handle) in handles {
            match handle.await {
                Ok(Ok(case)) => report.applied.push(case),
                Ok(Err(failure)) => report.failures.push(failure),
                Err(join_error) => {
                    tracing::error!(
                        case_reference = %reference,
                        error = %join_error,
                        "case write task aborted"
                    );
                    report.failures.push(PropagationFailure::new(
                        reference,
                        format!("worker task failed: {join_error}"),
                    ));
                }
            }
        }
        report
    }
}

async fn apply_with_retry(
    client: Arc<dyn CaseStoreClient>,
    case_type_id: Arc<str>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    item: FanOutItem,
) -> Result<SingleCase, PropagationFailure> {
    let mut attempt = 1;
    loop {
        let result = {
            let Ok(_permit) = permits.acquire().await else {
                return Err(PropagationFailure::new(
                    item.case_reference,
                    "worker pool closed",
                ));
            };
            client
                .submit_update(&case_type_id, &item.case_reference, &item.change_set)
                .await
        };

        match result {
            Ok(case) => return Ok(case),
            Err(error) if should_retry(&error, attempt, retry) => {
                let delay = retry.backoff_for(attempt);
                tracing::warn!(
                    case_reference = %item.case_reference,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "retrying case write"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::warn!(
                    case_reference = %item.case_reference,
                    attempts = attempt,
                    error = %error,
                    "case write failed"
                );
                return Err(PropagationFailure::new(
                    item.case_reference,
                    error.to_string(),
                ));
            }
        }
    }
}

const fn should_retry(error: &CaseStoreError, attempt: u32, retry: RetryPolicy) -> bool {
    error.is_retryable() && attempt < retry.max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::application::ports::SearchCriteria;

    fn reference(value: &str) -> CaseReference {
        CaseReference::new(value).unwrap()
    }

    /// Scripted client: each reference fails with the queued errors first.
    #[derive(Default)]
    struct ScriptedClient {
        scripts: Mutex<HashMap<CaseReference, Vec<CaseStoreError>>>,
        calls: AtomicUsize,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ScriptedClient {
        fn failing(self, value: &str, errors: Vec<CaseStoreError>) -> Self {
            self.scripts.lock().insert(reference(value), errors);
            self
        }
    }

    impl CaseStoreClient for ScriptedClient {
        fn retrieve(
            &self,
            _case_type_id: &str,
            _jurisdiction: &str,
            case_reference: &CaseReference,
        ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>> {
            let case = SingleCase::new(case_reference.clone());
            async move { Ok(case) }.boxed()
        }

        fn search(
            &self,
            _case_type_id: &str,
            _criteria: &SearchCriteria,
        ) -> BoxFuture<'static, Result<Vec<SingleCase>, CaseStoreError>> {
            async move { Ok(Vec::new()) }.boxed()
        }

        fn submit_update(
            &self,
            _case_type_id: &str,
            case_reference: &CaseReference,
            change_set: &ChangeSet,
        ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = {
                let mut scripts = self.scripts.lock();
                scripts
                    .get_mut(case_reference)
                    .and_then(|errors| (!errors.is_empty()).then(|| errors.remove(0)))
            };
            let updated = change_set.apply_to(&SingleCase::new(case_reference.clone()));
            let in_flight = Arc::clone(&self.in_flight);
            let peak = Arc::clone(&self.peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                scripted.map_or(Ok(updated), Err)
            }
            .boxed()
        }
    }

    fn items(values: &[&str]) -> Vec<FanOutItem> {
        values
            .iter()
            .map(|value| FanOutItem::new(reference(value), ChangeSet::set_lead(false)))
            .collect()
    }

    fn executor(client: Arc<ScriptedClient>, workers: usize, retry: RetryPolicy) -> FanOutExecutor {
        FanOutExecutor::try_new(client, "ET_EnglandWales", workers, retry).unwrap()
    }

    // =========================================================================
    // Construction Tests
    // =========================================================================

    #[rstest]
    fn zero_workers_is_rejected() {
        let result = FanOutExecutor::try_new(
            Arc::new(ScriptedClient::default()),
            "ET_EnglandWales",
            0,
            RetryPolicy::default(),
        );
        assert_eq!(result.err(), Some(FanOutError::InvalidWorkerCount));
    }

    #[rstest]
    fn zero_attempts_is_rejected() {
        let retry = RetryPolicy {
            max_attempts: 0,
            base_backoff: Duration::ZERO,
        };
        let result = FanOutExecutor::try_new(
            Arc::new(ScriptedClient::default()),
            "ET_EnglandWales",
            4,
            retry,
        );
        assert_eq!(result.err(), Some(FanOutError::InvalidAttemptLimit));
    }

    #[rstest]
    #[case(1, Duration::from_millis(100))]
    #[case(2, Duration::from_millis(200))]
    #[case(3, Duration::from_millis(400))]
    fn backoff_doubles(#[case] attempt: u32, #[case] expected: Duration) {
        assert_eq!(RetryPolicy::default().backoff_for(attempt), expected);
    }

    // =========================================================================
    // execute Tests
    // =========================================================================

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn every_item_is_accounted_for() {
        let client = Arc::new(ScriptedClient::default().failing(
            "C3",
            vec![CaseStoreError::NotFound("C3".to_string())],
        ));
        let report = executor(Arc::clone(&client), 2, RetryPolicy::no_retry())
            .execute(items(&["C1", "C2", "C3", "C4", "C5"]))
            .await;

        assert_eq!(report.total(), 5);
        assert_eq!(
            report.applied_references(),
            vec![reference("C1"), reference("C2"), reference("C4"), reference("C5")]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].case_reference, reference("C3"));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_workers() {
        let client = Arc::new(ScriptedClient::default());
        let values: Vec<String> = (0..20).map(|index| format!("C{index}")).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();

        let report = executor(Arc::clone(&client), 3, RetryPolicy::no_retry())
            .execute(items(&refs))
            .await;

        assert_eq!(report.applied.len(), 20);
        assert!(client.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(client.in_flight.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let client = Arc::new(ScriptedClient::default().failing(
            "A",
            vec![
                CaseStoreError::Timeout(5000),
                CaseStoreError::Transport("reset".to_string()),
            ],
        ));

        let report = executor(Arc::clone(&client), 2, RetryPolicy::default())
            .execute(items(&["A"]))
            .await;

        assert!(report.is_complete());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_attempt_limit() {
        let client = Arc::new(ScriptedClient::default().failing(
            "A",
            vec![CaseStoreError::Timeout(5000); 5],
        ));

        let report = executor(Arc::clone(&client), 2, RetryPolicy::default())
            .execute(items(&["A"]))
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reason, "timed out after 5000ms");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let client = Arc::new(ScriptedClient::default().failing(
            "A",
            vec![CaseStoreError::Conflict("locked".to_string())],
        ));

        let report = executor(Arc::clone(&client), 2, RetryPolicy::default())
            .execute(items(&["A"]))
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn empty_input_returns_empty_report() {
        let report = executor(Arc::new(ScriptedClient::default()), 2, RetryPolicy::default())
            .execute(Vec::new())
            .await;
        assert_eq!(report, FanOutReport::default());
    }
}
