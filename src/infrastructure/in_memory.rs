//! In-memory store adapters.
//!
//! Used when no case store URL is configured, and by the tests. Both stores
//! share state through `Arc`, so a clone handed to a coordinator and a clone
//! kept by a test observe the same records.
//!
//! Failures can be scripted per case ([`InMemoryCaseStore::fail_on`]) to
//! exercise retry and partial-success paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::{Mutex, RwLock};

use crate::application::{
    CaseStoreClient, CaseStoreError, MultipleStore, MultipleStoreError, SearchCriteria,
};
use crate::domain::{CaseReference, ChangeSet, MultipleCase, MultipleReference, SingleCase};

// =============================================================================
// Scripted Failures
// =============================================================================

#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: CaseStoreError,
    /// `None` fails every call.
    remaining: Option<usize>,
}

impl ScriptedFailure {
    /// Consumes one failure, returning the error to report.
    fn take(&mut self) -> Option<CaseStoreError> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(remaining) => {
                *remaining -= 1;
                Some(self.error.clone())
            }
        }
    }
}

// =============================================================================
// In-Memory Case Store
// =============================================================================

/// [`CaseStoreClient`] over a hash map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCaseStore {
    cases: Arc<RwLock<HashMap<CaseReference, SingleCase>>>,
    failures: Arc<Mutex<HashMap<CaseReference, ScriptedFailure>>>,
    search_failure: Arc<Mutex<Option<CaseStoreError>>>,
    submissions: Arc<Mutex<Vec<(CaseReference, ChangeSet)>>>,
}

impl InMemoryCaseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `cases`.
    #[must_use]
    pub fn with_cases(cases: impl IntoIterator<Item = SingleCase>) -> Self {
        let store = Self::new();
        for case in cases {
            store.insert(case);
        }
        store
    }

    /// Inserts or replaces a case.
    pub fn insert(&self, case: SingleCase) {
        self.cases.write().insert(case.case_reference.clone(), case);
    }

    /// Returns the stored case.
    #[must_use]
    pub fn case(&self, case_reference: &CaseReference) -> Option<SingleCase> {
        self.cases.read().get(case_reference).cloned()
    }

    /// Fails the next `times` writes to `case_reference` with `error`.
    pub fn fail_on(&self, case_reference: CaseReference, error: CaseStoreError, times: usize) {
        self.failures.lock().insert(
            case_reference,
            ScriptedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Fails every write to `case_reference` with `error`.
    pub fn fail_always(&self, case_reference: CaseReference, error: CaseStoreError) {
        self.failures.lock().insert(
            case_reference,
            ScriptedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Fails the next search with `error`.
    pub fn fail_next_search(&self, error: CaseStoreError) {
        *self.search_failure.lock() = Some(error);
    }

    /// Every write attempt, in arrival order, including failed ones.
    #[must_use]
    pub fn submissions(&self) -> Vec<(CaseReference, ChangeSet)> {
        self.submissions.lock().clone()
    }

    fn apply(
        &self,
        case_reference: &CaseReference,
        change_set: &ChangeSet,
    ) -> Result<SingleCase, CaseStoreError> {
        self.submissions
            .lock()
            .push((case_reference.clone(), change_set.clone()));

        if let Some(error) = self
            .failures
            .lock()
            .get_mut(case_reference)
            .and_then(ScriptedFailure::take)
        {
            return Err(error);
        }

        let mut cases = self.cases.write();
        let stored = cases
            .get_mut(case_reference)
            .ok_or_else(|| CaseStoreError::NotFound(case_reference.to_string()))?;
        *stored = change_set.apply_to(stored);
        Ok(stored.clone())
    }
}

impl CaseStoreClient for InMemoryCaseStore {
    fn retrieve(
        &self,
        _case_type_id: &str,
        _jurisdiction: &str,
        case_reference: &CaseReference,
    ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>> {
        let result = self
            .case(case_reference)
            .ok_or_else(|| CaseStoreError::NotFound(case_reference.to_string()));
        future::ready(result).boxed()
    }

    fn search(
        &self,
        _case_type_id: &str,
        criteria: &SearchCriteria,
    ) -> BoxFuture<'static, Result<Vec<SingleCase>, CaseStoreError>> {
        let result = match self.search_failure.lock().take() {
            Some(error) => Err(error),
            None => {
                let mut found: Vec<SingleCase> = self
                    .cases
                    .read()
                    .values()
                    .filter(|case| criteria.matches(case))
                    .cloned()
                    .collect();
                found.sort_by(|left, right| left.case_reference.cmp(&right.case_reference));
                Ok(found)
            }
        };
        future::ready(result).boxed()
    }

    fn submit_update(
        &self,
        _case_type_id: &str,
        case_reference: &CaseReference,
        change_set: &ChangeSet,
    ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>> {
        future::ready(self.apply(case_reference, change_set)).boxed()
    }
}

// =============================================================================
// In-Memory Multiple Store
// =============================================================================

/// Office prefix of references allocated by [`InMemoryMultipleStore::new`].
pub const DEFAULT_OFFICE_PREFIX: u32 = 60;

/// [`MultipleStore`] over a hash map, with versioned compare-and-swap commits.
#[derive(Debug, Clone)]
pub struct InMemoryMultipleStore {
    multiples: Arc<RwLock<HashMap<MultipleReference, MultipleCase>>>,
    sequence: Arc<AtomicU64>,
    office_prefix: u32,
    commit_failure: Arc<Mutex<Option<MultipleStoreError>>>,
}

impl Default for InMemoryMultipleStore {
    fn default() -> Self {
        Self::with_office_prefix(DEFAULT_OFFICE_PREFIX)
    }
}

impl InMemoryMultipleStore {
    /// Creates an empty store allocating references under
    /// [`DEFAULT_OFFICE_PREFIX`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store allocating references under `office_prefix`.
    #[must_use]
    pub fn with_office_prefix(office_prefix: u32) -> Self {
        Self {
            multiples: Arc::new(RwLock::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
            office_prefix,
            commit_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Stores `multiple` as version 1, bypassing the version check.
    ///
    /// # Errors
    ///
    /// Returns [`MultipleStoreError::MissingReference`] if `multiple` has no
    /// reference.
    pub fn seed(&self, multiple: MultipleCase) -> Result<MultipleCase, MultipleStoreError> {
        let reference = multiple
            .reference()
            .cloned()
            .ok_or(MultipleStoreError::MissingReference)?;
        let stored = multiple.with_version(1);
        self.multiples.write().insert(reference, stored.clone());
        Ok(stored)
    }

    /// Returns the stored record.
    #[must_use]
    pub fn get(&self, reference: &MultipleReference) -> Option<MultipleCase> {
        self.multiples.read().get(reference).cloned()
    }

    /// Fails the next commit with `error`.
    pub fn fail_next_commit(&self, error: MultipleStoreError) {
        *self.commit_failure.lock() = Some(error);
    }

    fn next_reference(&self) -> MultipleReference {
        let multiples = self.multiples.read();
        loop {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let reference = MultipleReference::from_sequence(self.office_prefix, sequence);
            if !multiples.contains_key(&reference) {
                return reference;
            }
        }
    }

    fn compare_and_swap(
        &self,
        multiple: &MultipleCase,
        expected_version: Option<u64>,
    ) -> Result<MultipleCase, MultipleStoreError> {
        if let Some(error) = self.commit_failure.lock().take() {
            return Err(error);
        }
        let reference = multiple
            .reference()
            .cloned()
            .ok_or(MultipleStoreError::MissingReference)?;

        let mut multiples = self.multiples.write();
        let actual = multiples.get(&reference).and_then(MultipleCase::version);
        if actual != expected_version {
            return Err(MultipleStoreError::ConcurrentModification {
                reference: reference.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let committed = multiple
            .clone()
            .with_version(actual.map_or(1, |version| version + 1));
        multiples.insert(reference, committed.clone());
        Ok(committed)
    }
}

impl MultipleStore for InMemoryMultipleStore {
    fn load(
        &self,
        _case_type_id: &str,
        reference: &MultipleReference,
    ) -> BoxFuture<'static, Result<Option<MultipleCase>, MultipleStoreError>> {
        future::ready(Ok(self.get(reference))).boxed()
    }

    fn allocate_reference(
        &self,
        _case_type_id: &str,
    ) -> BoxFuture<'static, Result<MultipleReference, MultipleStoreError>> {
        future::ready(Ok(self.next_reference())).boxed()
    }

    fn commit(
        &self,
        _case_type_id: &str,
        multiple: &MultipleCase,
        expected_version: Option<u64>,
    ) -> BoxFuture<'static, Result<MultipleCase, MultipleStoreError>> {
        future::ready(self.compare_and_swap(multiple, expected_version)).boxed()
    }
}
