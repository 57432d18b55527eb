//! The unit of work handed to the durable update queue.
//!
//! Once enqueued a job belongs to the external consumer. Its identity is
//! derived from its content and the version of the multiple the round started
//! from, so a job re-submitted by a retried round is recognisable as the same
//! work while a later round writing the same content is not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change_set::ChangeSet;
use super::references::{CaseReference, MultipleReference};
use super::single::SingleCase;

/// Namespace for job and per-case idempotency identifiers.
const UPDATE_JOB_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x8a, 0x52, 0x6e, 0x0b, 0x4d, 0x9a, 0xa1, 0x7c, 0x25, 0xe4, 0x90, 0x6d, 0x12,
    0xb8,
]);

/// A change set addressed to a batch of single cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJob {
    /// Identity derived from the content and `base_version`.
    pub job_id: Uuid,
    /// The multiple this job belongs to.
    pub multiple_reference: MultipleReference,
    /// Version of the multiple record the round read; `None` for a multiple
    /// the round creates.
    #[serde(default)]
    pub base_version: Option<u64>,
    /// The cases to update.
    pub case_references: Vec<CaseReference>,
    /// What to write into each case.
    pub change_set: ChangeSet,
    /// Number of cases the round expected to update with this job.
    pub expected_batch_size: usize,
    /// When the job was built.
    pub created_at: DateTime<Utc>,
}

impl UpdateJob {
    /// Builds a job, deriving its id from the multiple and its base version,
    /// the cases and the change set content.
    #[must_use]
    pub fn new(
        multiple_reference: MultipleReference,
        base_version: Option<u64>,
        case_references: Vec<CaseReference>,
        change_set: ChangeSet,
    ) -> Self {
        let mut key = String::from(multiple_reference.as_str());
        key.push('@');
        if let Some(version) = base_version {
            key.push_str(&version.to_string());
        }
        for reference in &case_references {
            key.push('\u{1f}');
            key.push_str(reference.as_str());
        }
        key.push('\u{1e}');
        key.push_str(&change_set.content_key());

        Self {
            job_id: Uuid::new_v5(&UPDATE_JOB_NAMESPACE, key.as_bytes()),
            expected_batch_size: case_references.len(),
            multiple_reference,
            base_version,
            case_references,
            change_set,
            created_at: Utc::now(),
        }
    }

    /// Idempotency key for applying this job's change set to one case.
    ///
    /// Depends only on the case reference and the change set content, so the
    /// same write carried by two different jobs shares a key.
    #[must_use]
    pub fn idempotency_key(&self, case_reference: &CaseReference) -> Uuid {
        let key = format!(
            "{}\u{1e}{}",
            case_reference.as_str(),
            self.change_set.content_key()
        );
        Uuid::new_v5(&UPDATE_JOB_NAMESPACE, key.as_bytes())
    }

    /// Returns `true` if `case_reference` is addressed by this job.
    #[must_use]
    pub fn targets(&self, case_reference: &CaseReference) -> bool {
        self.case_references.contains(case_reference)
    }

    /// Replays the job against `case`.
    ///
    /// Cases not addressed by the job are returned unchanged. Replaying a
    /// delivered job again yields the same state.
    #[must_use]
    pub fn apply_to(&self, case: &SingleCase) -> SingleCase {
        if self.targets(&case.case_reference) {
            self.change_set.apply_to(case)
        } else {
            case.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldEdits;
    use rstest::rstest;
    use serde_json::json;

    fn reference(value: &str) -> CaseReference {
        CaseReference::new(value).unwrap()
    }

    fn multiple() -> MultipleReference {
        MultipleReference::new("6000001").unwrap()
    }

    fn job(cases: &[&str], change_set: ChangeSet) -> UpdateJob {
        UpdateJob::new(
            multiple(),
            Some(1),
            cases.iter().map(|value| reference(value)).collect(),
            change_set,
        )
    }

    // =========================================================================
    // Identity Tests
    // =========================================================================

    #[rstest]
    fn job_id_is_deterministic() {
        let first = job(&["A", "B"], ChangeSet::attach(multiple(), false));
        let second = job(&["A", "B"], ChangeSet::attach(multiple(), false));

        assert_eq!(first.job_id, second.job_id);
        assert_eq!(first.expected_batch_size, 2);
    }

    #[rstest]
    #[case(&["A", "C"], ChangeSet::attach(multiple(), false))]
    #[case(&["A", "B"], ChangeSet::attach(multiple(), true))]
    #[case(&["A", "B"], ChangeSet::detach(multiple()))]
    fn job_id_changes_with_content(#[case] cases: &[&str], #[case] change_set: ChangeSet) {
        let base = job(&["A", "B"], ChangeSet::attach(multiple(), false));
        assert_ne!(base.job_id, job(cases, change_set).job_id);
    }

    #[rstest]
    fn later_round_with_same_content_gets_new_job_id() {
        let cases = vec![reference("A")];
        let change = ChangeSet::attach(multiple(), false);
        let first_attach = UpdateJob::new(multiple(), Some(1), cases.clone(), change.clone());
        let second_attach = UpdateJob::new(multiple(), Some(3), cases.clone(), change.clone());
        let retried = UpdateJob::new(multiple(), Some(1), cases, change);

        assert_ne!(first_attach.job_id, second_attach.job_id);
        assert_eq!(first_attach.job_id, retried.job_id);
        assert_eq!(
            first_attach.idempotency_key(&reference("A")),
            second_attach.idempotency_key(&reference("A"))
        );
    }

    #[rstest]
    fn new_multiple_and_first_version_differ() {
        let change = ChangeSet::attach(multiple(), true);
        let creating = UpdateJob::new(multiple(), None, vec![reference("A")], change.clone());
        let extending = UpdateJob::new(multiple(), Some(1), vec![reference("A")], change);

        assert_ne!(creating.job_id, extending.job_id);
    }

    #[rstest]
    fn idempotency_key_is_shared_across_jobs() {
        let change = ChangeSet::empty().with_fields(&FieldEdits::new().with("venue", json!("Leeds")));
        let first = job(&["A", "B"], change.clone());
        let second = job(&["A"], change);

        assert_ne!(first.job_id, second.job_id);
        assert_eq!(
            first.idempotency_key(&reference("A")),
            second.idempotency_key(&reference("A"))
        );
        assert_ne!(
            first.idempotency_key(&reference("A")),
            first.idempotency_key(&reference("B"))
        );
    }

    // =========================================================================
    // Replay Tests
    // =========================================================================

    #[rstest]
    fn apply_twice_equals_apply_once() {
        let update = job(&["A"], ChangeSet::attach(multiple(), true));
        let case = SingleCase::new(reference("A"));

        let once = update.apply_to(&case);
        let twice = update.apply_to(&once);

        assert_eq!(once, twice);
        assert_eq!(once.multiple_reference, Some(multiple()));
    }

    #[rstest]
    fn apply_ignores_unaddressed_case() {
        let update = job(&["A"], ChangeSet::attach(multiple(), true));
        let case = SingleCase::new(reference("Z"));

        assert_eq!(update.apply_to(&case), case);
    }
}
