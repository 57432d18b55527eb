//! Propagation of a round's writes to the single cases.
//!
//! The caller picks the path with [`PropagationMode`]. Both paths issue every
//! detach before any other write of the round: the synchronous path waits for
//! the detach fan-out to drain before starting the write fan-out, the durable
//! path enqueues all detach jobs before the first write job.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::CoordinationError;
use super::fan_out::{FanOutExecutor, FanOutItem};
use super::ports::{DurableUpdateQueue, QueueAck};
use crate::domain::{CaseReference, ChangeSet, MultipleReference, PropagationFailure, UpdateJob};

/// How a round's writes reach the single cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    /// Write through the fan-out executor and wait for every write.
    #[default]
    SynchronousFanOut,
    /// Enqueue update jobs and return once the broker acknowledged them.
    DurableQueue,
}

/// The writes of one round, split into the detach phase and the rest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropagationPlan {
    /// Detach writes, issued first.
    pub detach: Vec<FanOutItem>,
    /// Attach, lead and field writes.
    pub write: Vec<FanOutItem>,
}

impl PropagationPlan {
    /// Returns `true` if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detach.is_empty() && self.write.is_empty()
    }

    /// Number of case writes in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detach.len() + self.write.len()
    }
}

/// What propagation achieved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropagationOutcome {
    /// Cases written (synchronous) or durably enqueued (queue).
    pub written: Vec<CaseReference>,
    /// Cases whose synchronous write failed. Always empty on the queue path.
    pub failures: Vec<PropagationFailure>,
    /// Broker acknowledgements, one per job. Empty on the synchronous path.
    pub acknowledgements: Vec<QueueAck>,
}

/// Dispatches a [`PropagationPlan`] to the fan-out executor or the queue.
#[derive(Clone)]
pub struct Propagator {
    executor: FanOutExecutor,
    queue: Arc<dyn DurableUpdateQueue>,
    batch_size: NonZeroUsize,
}

impl std::fmt::Debug for Propagator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Propagator")
            .field("executor", &self.executor)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Propagator {
    /// Creates a propagator. Update jobs carry at most `batch_size` cases.
    #[must_use]
    pub fn new(
        executor: FanOutExecutor,
        queue: Arc<dyn DurableUpdateQueue>,
        batch_size: NonZeroUsize,
    ) -> Self {
        Self {
            executor,
            queue,
            batch_size,
        }
    }

    /// Applies `plan` for the multiple `multiple_reference`, whose record
    /// the round read at `base_version`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::QueueSubmission`] if any job is not
    /// acknowledged on the durable path. Jobs acknowledged before the failing
    /// one stay enqueued; their change sets are idempotent.
    pub async fn propagate(
        &self,
        multiple_reference: &MultipleReference,
        base_version: Option<u64>,
        plan: PropagationPlan,
        mode: PropagationMode,
    ) -> Result<PropagationOutcome, CoordinationError> {
        match mode {
            PropagationMode::SynchronousFanOut => Ok(self.fan_out(plan).await),
            PropagationMode::DurableQueue => {
                self.enqueue(multiple_reference, base_version, plan).await
            }
        }
    }

    async fn fan_out(&self, plan: PropagationPlan) -> PropagationOutcome {
        let mut report = self.executor.execute(plan.detach).await;
        report.merge(self.executor.execute(plan.write).await);

        PropagationOutcome {
            written: report.applied_references(),
            failures: report.failures,
            acknowledgements: Vec::new(),
        }
    }

    async fn enqueue(
        &self,
        multiple_reference: &MultipleReference,
        base_version: Option<u64>,
        plan: PropagationPlan,
    ) -> Result<PropagationOutcome, CoordinationError> {
        let mut jobs = build_jobs(multiple_reference, base_version, &plan.detach, self.batch_size);
        jobs.extend(build_jobs(
            multiple_reference,
            base_version,
            &plan.write,
            self.batch_size,
        ));

        let mut outcome = PropagationOutcome::default();
        for job in jobs {
            let job_id = job.job_id;
            let case_references = job.case_references.clone();
            let acknowledgement = self.queue.enqueue(job).await.map_err(|source| {
                tracing::error!(
                    multiple_reference = %multiple_reference,
                    job_id = %job_id,
                    error = %source,
                    "update job was not acknowledged"
                );
                CoordinationError::QueueSubmission { job_id, source }
            })?;
            tracing::debug!(
                multiple_reference = %multiple_reference,
                job_id = %job_id,
                cases = case_references.len(),
                "update job enqueued"
            );
            outcome.written.extend(case_references);
            outcome.acknowledgements.push(acknowledgement);
        }
        Ok(outcome)
    }
}

/// Groups items with identical change sets into jobs of at most `batch_size`
/// cases, keeping first-seen order.
#[must_use]
pub fn build_jobs(
    multiple_reference: &MultipleReference,
    base_version: Option<u64>,
    items: &[FanOutItem],
    batch_size: NonZeroUsize,
) -> Vec<UpdateJob> {
    let mut groups: Vec<(ChangeSet, Vec<CaseReference>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        let key = item.change_set.content_key();
        let position = *index.entry(key).or_insert_with(|| {
            groups.push((item.change_set.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[position].1.push(item.case_reference.clone());
    }

    groups
        .into_iter()
        .flat_map(|(change_set, references)| {
            references
                .chunks(batch_size.get())
                .map(|chunk| {
                    UpdateJob::new(
                        multiple_reference.clone(),
                        base_version,
                        chunk.to_vec(),
                        change_set.clone(),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
