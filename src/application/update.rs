//! Bulk update: reconcile an existing multiple after a user-driven edit.
//!
//! Two shapes of round exist:
//!
//! - **In place.** The proposed membership is `requested ∪ matched`; field
//!   edits and the sub-group tag go to the matched cases. Cases that would
//!   join but belong to another multiple are reported and left out.
//! - **Move.** With a target reference, the matched members leave the current
//!   multiple and join the target, carrying the field edits with them.
//!
//! In both shapes every case write completes (or is durably enqueued) before
//! either multiple record is committed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::Instrument;

use super::errors::CoordinationError;
use super::lead::{RoundKind, elect_lead};
use super::membership::{ordered_union, resolve_membership};
use super::ports::{CaseScope, CaseStoreClient, MultipleStore};
use super::propagation::{PropagationMode, Propagator};
use super::round::{
    Reconciliation, RoundOutcome, Targeting, check_joiners, plan_reconciliation, reconcile,
    settle_members,
};
use crate::domain::{
    CaseReference, FieldEdits, MultipleCase, MultipleReference, PropagationFailure,
    ValidationError,
};

/// An update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkUpdate {
    /// The multiple as the caller last read it.
    pub multiple: MultipleCase,
    /// The membership the caller wants, in order. Ignored when moving.
    pub requested: Vec<CaseReference>,
    /// Cases selected by the caller's filter; they receive the edits.
    pub matched: Vec<CaseReference>,
    /// Field values written to every matched case.
    pub field_edits: FieldEdits,
    /// Move the matched members into this multiple.
    pub target_reference: Option<MultipleReference>,
    /// Sub-group tag for the matched members.
    pub sub_group: Option<String>,
    /// How writes reach the cases.
    pub mode: PropagationMode,
}

/// Orchestrates update rounds.
#[derive(Clone)]
pub struct BulkUpdateCoordinator {
    scope: CaseScope,
    case_store: Arc<dyn CaseStoreClient>,
    multiples: Arc<dyn MultipleStore>,
    propagator: Propagator,
}

impl fmt::Debug for BulkUpdateCoordinator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BulkUpdateCoordinator")
            .field("scope", &self.scope)
            .field("propagator", &self.propagator)
            .finish_non_exhaustive()
    }
}

impl BulkUpdateCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        scope: CaseScope,
        case_store: Arc<dyn CaseStoreClient>,
        multiples: Arc<dyn MultipleStore>,
        propagator: Propagator,
    ) -> Self {
        Self {
            scope,
            case_store,
            multiples,
            propagator,
        }
    }

    /// Runs one update round.
    ///
    /// Cases the round would attach that are unknown to the store or belong
    /// to another multiple are reported as failures and stay out.
    ///
    /// # Errors
    ///
    /// - [`CoordinationError::Validation`] if the multiple has no reference,
    ///   carries two leads, or the target reference is missing or equal to the
    ///   current one. Nothing is written in that case.
    /// - [`CoordinationError::QueueSubmission`] if the durable queue did not
    ///   acknowledge a job.
    /// - [`CoordinationError::ConcurrentModification`] if either multiple was
    ///   committed by another round after it was read.
    /// - [`CoordinationError::MultipleStore`] for multiple store failures.
    pub async fn update_bulk(&self, request: BulkUpdate) -> Result<RoundOutcome, CoordinationError> {
        let span = tracing::info_span!(
            "bulk_update",
            multiple_reference = tracing::field::Empty,
            mode = ?request.mode,
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: BulkUpdate) -> Result<RoundOutcome, CoordinationError> {
        request.multiple.validate_incoming()?;
        let reference = request
            .multiple
            .reference()
            .cloned()
            .ok_or(ValidationError::MissingReference)?;
        tracing::Span::current().record("multiple_reference", tracing::field::display(&reference));

        let expected_version = match request.multiple.version() {
            Some(version) => Some(version),
            None => self
                .multiples
                .load(&self.scope.multiple_case_type_id, &reference)
                .await?
                .and_then(|stored| stored.version()),
        };

        let outcome = match request.target_reference.clone() {
            Some(target) => {
                let target = self.load_target(&reference, &target).await?;
                self.move_cases(request, reference.clone(), expected_version, target)
                    .await?
            }
            None => self.update_in_place(request, expected_version).await?,
        };

        tracing::info!(
            multiple_reference = %reference,
            members = outcome.multiple.case_counter(),
            moved_to = ?outcome.moved_to.as_ref().and_then(MultipleCase::reference).map(MultipleReference::as_str),
            failed = outcome.failures.len(),
            enqueued_jobs = outcome.enqueued_jobs,
            "bulk update committed"
        );
        Ok(outcome)
    }

    async fn update_in_place(
        &self,
        request: BulkUpdate,
        expected_version: Option<u64>,
    ) -> Result<RoundOutcome, CoordinationError> {
        let BulkUpdate {
            multiple,
            requested,
            matched,
            field_edits,
            sub_group,
            mode,
            ..
        } = request;

        let reference = multiple
            .reference()
            .cloned()
            .ok_or(ValidationError::MissingReference)?;
        let current = multiple.member_references();
        let mut delta = resolve_membership(&current, &requested, &matched);
        let (_, failures) = check_joiners(
            self.case_store.as_ref(),
            &self.scope,
            &reference,
            &delta.to_attach,
        )
        .await;
        if !failures.is_empty() {
            let rejected: HashSet<&CaseReference> =
                failures.iter().map(|failure| &failure.case_reference).collect();
            let admitted = |references: &[CaseReference]| -> Vec<CaseReference> {
                references
                    .iter()
                    .filter(|case| !rejected.contains(case))
                    .cloned()
                    .collect()
            };
            delta = resolve_membership(&current, &admitted(&requested), &admitted(&matched));
        }
        let kind = if delta.is_membership_change() {
            RoundKind::MembershipChange
        } else {
            RoundKind::FieldUpdate
        };
        let lead = elect_lead(&delta.proposed, multiple.lead_case(), kind);

        reconcile(
            &self.propagator,
            self.multiples.as_ref(),
            &self.scope,
            Reconciliation {
                multiple,
                delta,
                lead,
                targeting: Targeting::new(&matched, field_edits, sub_group),
                mode,
                expected_version,
                failures,
            },
        )
        .await
    }

    /// Loads the move target, rejecting a missing target or the current
    /// multiple itself.
    async fn load_target(
        &self,
        current: &MultipleReference,
        target: &MultipleReference,
    ) -> Result<MultipleCase, CoordinationError> {
        let invalid = || ValidationError::InvalidTargetReference {
            target: target.to_string(),
            current: current.to_string(),
        };
        if target == current {
            return Err(invalid().into());
        }
        let stored = self
            .multiples
            .load(&self.scope.multiple_case_type_id, target)
            .await?
            .ok_or_else(invalid)?;
        stored.validate_incoming()?;
        Ok(stored)
    }

    async fn move_cases(
        &self,
        request: BulkUpdate,
        reference: MultipleReference,
        expected_version: Option<u64>,
        target: MultipleCase,
    ) -> Result<RoundOutcome, CoordinationError> {
        let BulkUpdate {
            multiple,
            matched,
            field_edits,
            sub_group,
            mode,
            ..
        } = request;
        let target_reference = target
            .reference()
            .cloned()
            .ok_or(ValidationError::MissingReference)?;

        let current = multiple.member_references();
        let mut failures = Vec::new();
        let mut moving = Vec::new();
        for case_reference in ordered_union(&matched, &[]) {
            if multiple.member(&case_reference).is_some() {
                moving.push(case_reference);
            } else {
                failures.push(PropagationFailure::new(
                    case_reference,
                    format!("not a member of multiple {reference}"),
                ));
            }
        }
        let moving_set: HashSet<&CaseReference> = moving.iter().collect();
        let remaining: Vec<CaseReference> = current
            .iter()
            .filter(|case_reference| !moving_set.contains(case_reference))
            .cloned()
            .collect();

        // Source: moved members leave without a detach write.
        let source_delta = resolve_membership(&current, &remaining, &[]);
        let source_lead = elect_lead(
            &source_delta.proposed,
            multiple.lead_case(),
            RoundKind::MembershipChange,
        );
        let mut source_writes = plan_reconciliation(
            &reference,
            &multiple,
            &source_delta,
            source_lead.as_ref(),
            &Targeting::default(),
        );
        source_writes.plan.detach.clear();

        // Target: keeps its lead when it has one.
        let target_members = target.member_references();
        let target_delta = resolve_membership(&target_members, &target_members, &moving);
        let target_lead = target
            .lead_case()
            .filter(|lead| target_delta.proposed.contains(lead))
            .cloned()
            .or_else(|| elect_lead(&target_delta.proposed, None, RoundKind::MembershipChange));
        let targeting = Targeting::new(&moving, field_edits, sub_group);
        let mut target_writes = plan_reconciliation(
            &target_reference,
            &target,
            &target_delta,
            target_lead.as_ref(),
            &targeting,
        );

        tracing::debug!(
            multiple_reference = %reference,
            target_reference = %target_reference,
            moving = moving.len(),
            "moving cases between multiples"
        );

        let target_outcome = self
            .propagator
            .propagate(
                &target_reference,
                target.version(),
                std::mem::take(&mut target_writes.plan),
                mode,
            )
            .await?;
        let source_outcome = self
            .propagator
            .propagate(
                &reference,
                expected_version,
                std::mem::take(&mut source_writes.plan),
                mode,
            )
            .await?;

        let written: HashSet<CaseReference> = target_outcome
            .written
            .iter()
            .chain(&source_outcome.written)
            .cloned()
            .collect();
        failures.extend(target_outcome.failures);
        failures.extend(source_outcome.failures);

        let (target_final, target_failures) = settle_members(
            &self.propagator,
            &target,
            &target_delta,
            target_lead.as_ref(),
            &targeting,
            &target_writes.planned_lead,
            &written,
            mode,
        )
        .await?;
        failures.extend(target_failures);

        // A moved case counts as gone from the source once its attach to the
        // target was written.
        let (source_final, source_failures) = settle_members(
            &self.propagator,
            &multiple,
            &source_delta,
            source_lead.as_ref(),
            &Targeting::default(),
            &source_writes.planned_lead,
            &written,
            mode,
        )
        .await?;
        failures.extend(source_failures);

        let case_type_id = &self.scope.multiple_case_type_id;
        let target_version = target.version();
        let committed_target = self
            .multiples
            .commit(
                case_type_id,
                &target.with_members(target_final).clear_search_collection(),
                target_version,
            )
            .await?;
        let committed_source = self
            .multiples
            .commit(
                case_type_id,
                &multiple.with_members(source_final).clear_search_collection(),
                expected_version,
            )
            .await?;

        Ok(RoundOutcome {
            multiple: committed_source,
            moved_to: Some(committed_target),
            failures,
            mode,
            enqueued_jobs: target_outcome.acknowledgements.len()
                + source_outcome.acknowledgements.len(),
        })
    }
}
