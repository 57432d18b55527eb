//! Ports consumed by the coordination core.
//!
//! The case store, the multiple store and the durable update queue are external
//! collaborators. Each is reached through a narrow trait returning a boxed
//! future, so coordinators hold them as `Arc<dyn Trait>` and tests swap in the
//! in-memory adapters.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    CaseReference, ChangeSet, MultipleCase, MultipleReference, SingleCase, UpdateJob,
};

// =============================================================================
// Case Scope
// =============================================================================

/// Case types and jurisdiction every store call is made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseScope {
    /// Case type of single cases.
    pub single_case_type_id: String,
    /// Case type of multiples.
    pub multiple_case_type_id: String,
    /// Jurisdiction passed to `retrieve`.
    pub jurisdiction: String,
}

impl Default for CaseScope {
    fn default() -> Self {
        Self {
            single_case_type_id: "ET_EnglandWales".to_string(),
            multiple_case_type_id: "ET_EnglandWales_Multiple".to_string(),
            jurisdiction: "EMPLOYMENT".to_string(),
        }
    }
}

// =============================================================================
// Case Store
// =============================================================================

/// Errors returned by the case store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseStoreError {
    /// The request did not reach the store or the store failed to answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request timed out.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The case does not exist.
    #[error("case {0} not found")]
    NotFound(String),

    /// The store rejected the write.
    #[error("write rejected: {0}")]
    Conflict(String),

    /// The store returned something that could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CaseStoreError {
    /// Returns `true` for failures that a retry may resolve.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Filter passed to [`CaseStoreClient::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SearchCriteria {
    /// Cases with any of the given references.
    References {
        /// References to look up.
        case_references: Vec<CaseReference>,
    },
    /// Cases whose multiple reference is the given one.
    Multiple {
        /// The multiple to list.
        multiple_reference: MultipleReference,
    },
}

impl SearchCriteria {
    /// Search for the given references.
    #[must_use]
    pub fn by_references(case_references: &[CaseReference]) -> Self {
        Self::References {
            case_references: case_references.to_vec(),
        }
    }

    /// Search for the members of a multiple.
    #[must_use]
    pub const fn by_multiple(multiple_reference: MultipleReference) -> Self {
        Self::Multiple { multiple_reference }
    }

    /// Returns `true` if `case` satisfies the criteria.
    #[must_use]
    pub fn matches(&self, case: &SingleCase) -> bool {
        match self {
            Self::References { case_references } => case_references.contains(&case.case_reference),
            Self::Multiple { multiple_reference } => {
                case.multiple_reference.as_ref() == Some(multiple_reference)
            }
        }
    }
}

/// Read and write access to single cases.
pub trait CaseStoreClient: Send + Sync {
    /// Retrieves one case.
    fn retrieve(
        &self,
        case_type_id: &str,
        jurisdiction: &str,
        case_reference: &CaseReference,
    ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>>;

    /// Returns every case of `case_type_id` satisfying `criteria`.
    fn search(
        &self,
        case_type_id: &str,
        criteria: &SearchCriteria,
    ) -> BoxFuture<'static, Result<Vec<SingleCase>, CaseStoreError>>;

    /// Applies `change_set` to one case and returns the stored result.
    fn submit_update(
        &self,
        case_type_id: &str,
        case_reference: &CaseReference,
        change_set: &ChangeSet,
    ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>>;
}

// =============================================================================
// Multiple Store
// =============================================================================

/// Errors returned by the multiple store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipleStoreError {
    /// The stored version differs from the one the round read.
    #[error("multiple {reference} was modified concurrently: expected version {expected:?}, found {actual:?}")]
    ConcurrentModification {
        /// The multiple being committed.
        reference: String,
        /// Version the round read (`None` for a new record).
        expected: Option<u64>,
        /// Version currently stored (`None` if absent).
        actual: Option<u64>,
    },

    /// The record has no reference to commit under.
    #[error("multiple has no reference")]
    MissingReference,

    /// The request did not reach the store or the store failed to answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store returned something that could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persistence of the grouping record, with compare-and-swap commits.
pub trait MultipleStore: Send + Sync {
    /// Loads a multiple, stamped with its current version.
    fn load(
        &self,
        case_type_id: &str,
        reference: &MultipleReference,
    ) -> BoxFuture<'static, Result<Option<MultipleCase>, MultipleStoreError>>;

    /// Allocates a fresh, unused multiple reference.
    fn allocate_reference(
        &self,
        case_type_id: &str,
    ) -> BoxFuture<'static, Result<MultipleReference, MultipleStoreError>>;

    /// Persists `multiple` if the stored version equals `expected_version`.
    ///
    /// `None` creates a new record and fails if one exists. Returns the
    /// record stamped with its new version.
    fn commit(
        &self,
        case_type_id: &str,
        multiple: &MultipleCase,
        expected_version: Option<u64>,
    ) -> BoxFuture<'static, Result<MultipleCase, MultipleStoreError>>;
}

// =============================================================================
// Durable Update Queue
// =============================================================================

/// Errors returned when enqueuing a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The broker refused the message.
    #[error("broker rejected job: {0}")]
    Rejected(String),

    /// The broker could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The job could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Broker acknowledgement of an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAck {
    /// The acknowledged job.
    pub job_id: Uuid,
    /// Broker-assigned message id.
    pub message_id: String,
}

/// At-least-once transport for update jobs.
pub trait DurableUpdateQueue: Send + Sync {
    /// Enqueues `job`, resolving once the broker has acknowledged it.
    fn enqueue(&self, job: UpdateJob) -> BoxFuture<'static, Result<QueueAck, QueueError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn reference(value: &str) -> CaseReference {
        CaseReference::new(value).unwrap()
    }

    #[rstest]
    #[case(CaseStoreError::Transport("reset".to_string()), true)]
    #[case(CaseStoreError::Timeout(5000), true)]
    #[case(CaseStoreError::NotFound("A".to_string()), false)]
    #[case(CaseStoreError::Conflict("locked".to_string()), false)]
    #[case(CaseStoreError::Serialization("bad json".to_string()), false)]
    fn retryable_errors(#[case] error: CaseStoreError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[rstest]
    fn search_by_references_matches_listed_cases() {
        let criteria = SearchCriteria::by_references(&[reference("A"), reference("B")]);
        assert!(criteria.matches(&SingleCase::new(reference("A"))));
        assert!(!criteria.matches(&SingleCase::new(reference("C"))));
    }

    #[rstest]
    fn search_by_multiple_matches_members() {
        let multiple = MultipleReference::new("6000001").unwrap();
        let criteria = SearchCriteria::by_multiple(multiple.clone());

        assert!(criteria.matches(&SingleCase::new(reference("A")).in_multiple(multiple)));
        assert!(!criteria.matches(&SingleCase::new(reference("B"))));
    }

    #[rstest]
    fn search_criteria_serializes_with_tag() {
        let criteria = SearchCriteria::by_references(&[reference("A")]);
        let json = serde_json::to_value(&criteria).unwrap();
        assert_eq!(json["by"], "references");
        assert_eq!(json["case_references"][0], "A");
    }

    #[rstest]
    fn default_scope_is_england_wales() {
        let scope = CaseScope::default();
        assert_eq!(scope.single_case_type_id, "ET_EnglandWales");
        assert_eq!(scope.multiple_case_type_id, "ET_EnglandWales_Multiple");
        assert_eq!(scope.jurisdiction, "EMPLOYMENT");
    }
}
