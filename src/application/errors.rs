//! Round-level errors.
//!
//! A [`CoordinationError`] means the round did not complete: it was rejected
//! before any write, its durable submission was not acknowledged, or its
//! commit lost a compare-and-swap race. Per-case write failures are never
//! reported here; they travel as [`PropagationFailure`](crate::domain::PropagationFailure)
//! values in the round outcome.

use thiserror::Error;
use uuid::Uuid;

use super::ports::{CaseStoreError, MultipleStoreError, QueueError};
use crate::domain::ValidationError;

/// Why a coordination round was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The request was rejected before any propagation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Another round committed the multiple after this one read it.
    #[error("multiple {reference} was modified concurrently: expected version {expected:?}, found {actual:?}")]
    ConcurrentModification {
        /// The multiple being committed.
        reference: String,
        /// Version this round read.
        expected: Option<u64>,
        /// Version found at commit time.
        actual: Option<u64>,
    },

    /// The durable queue did not acknowledge a job.
    #[error("failed to enqueue update job {job_id}: {source}")]
    QueueSubmission {
        /// The job that was not acknowledged.
        job_id: Uuid,
        /// Broker error.
        source: QueueError,
    },

    /// A case store call needed before propagation failed.
    #[error("case store error: {0}")]
    CaseStore(#[from] CaseStoreError),

    /// The multiple store failed.
    #[error("multiple store error: {0}")]
    MultipleStore(MultipleStoreError),
}

impl From<MultipleStoreError> for CoordinationError {
    fn from(error: MultipleStoreError) -> Self {
        match error {
            MultipleStoreError::ConcurrentModification {
                reference,
                expected,
                actual,
            } => Self::ConcurrentModification {
                reference,
                expected,
                actual,
            },
            MultipleStoreError::MissingReference => {
                Self::Validation(ValidationError::MissingReference)
            }
            other => Self::MultipleStore(other),
        }
    }
}
