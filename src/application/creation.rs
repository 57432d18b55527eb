//! Bulk creation: establish a multiple, or extend one, from matched cases.

use std::fmt;
use std::sync::Arc;

use tracing::Instrument;

use super::errors::CoordinationError;
use super::lead::{RoundKind, elect_lead};
use super::membership::{ordered_union, resolve_membership};
use super::ports::{CaseScope, CaseStoreClient, MultipleStore};
use super::propagation::{PropagationMode, Propagator};
use super::round::{Reconciliation, RoundOutcome, Targeting, check_joiners, reconcile};
use crate::domain::{CaseReference, MultipleCase, ValidationError};

/// Steps of a creation round, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    /// Validate the request.
    Initialize,
    /// Allocate a reference if the multiple has none.
    AssignReference,
    /// Check the matched cases and compute the membership delta.
    PopulateOrReconcileMembers,
    /// Pick the lead.
    ElectLead,
    /// Write the cases and commit the multiple.
    Propagate,
    /// The round committed.
    Done,
}

impl CreationStage {
    /// The stage after this one; `Done` is terminal.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Initialize => Self::AssignReference,
            Self::AssignReference => Self::PopulateOrReconcileMembers,
            Self::PopulateOrReconcileMembers => Self::ElectLead,
            Self::ElectLead => Self::Propagate,
            Self::Propagate | Self::Done => Self::Done,
        }
    }
}

impl fmt::Display for CreationStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::AssignReference => "assign_reference",
            Self::PopulateOrReconcileMembers => "populate_or_reconcile_members",
            Self::ElectLead => "elect_lead",
            Self::Propagate => "propagate",
            Self::Done => "done",
        };
        formatter.write_str(name)
    }
}

/// A creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCreation {
    /// The multiple in progress. Without a reference a new one is allocated.
    pub multiple: MultipleCase,
    /// Cases the caller listed explicitly.
    pub requested: Vec<CaseReference>,
    /// Cases matched by the caller's search.
    pub matched: Vec<CaseReference>,
    /// How writes reach the cases.
    pub mode: PropagationMode,
}

/// Orchestrates creation rounds.
#[derive(Clone)]
pub struct BulkCreationCoordinator {
    scope: CaseScope,
    case_store: Arc<dyn CaseStoreClient>,
    multiples: Arc<dyn MultipleStore>,
    propagator: Propagator,
}

impl fmt::Debug for BulkCreationCoordinator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BulkCreationCoordinator")
            .field("scope", &self.scope)
            .field("propagator", &self.propagator)
            .finish_non_exhaustive()
    }
}

impl BulkCreationCoordinator {
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

    /// Runs one creation round.
    ///
    /// A multiple without members is populated from the eligible cases; one
    /// with members keeps them and gains the eligible cases. Cases the store
    /// does not know, or that belong to another multiple, are reported as
    /// failures and left out.
    ///
    /// # Errors
    ///
    /// - [`CoordinationError::Validation`] if nothing was requested, the
    ///   multiple is inconsistent, or a new multiple would have no eligible
    ///   case. Nothing is committed in that case.
    /// - [`CoordinationError::QueueSubmission`] if the durable queue did not
    ///   acknowledge a job.
    /// - [`CoordinationError::ConcurrentModification`] if the multiple was
    ///   committed by another round in the meantime.
    /// - [`CoordinationError::MultipleStore`] for multiple store failures.
    pub async fn create_bulk(
        &self,
        request: BulkCreation,
    ) -> Result<RoundOutcome, CoordinationError> {
        let span = tracing::info_span!(
            "bulk_create",
            multiple_reference = tracing::field::Empty,
            mode = ?request.mode,
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: BulkCreation) -> Result<RoundOutcome, CoordinationError> {
        let BulkCreation {
            multiple,
            requested,
            matched,
            mode,
        } = request;

        let mut stage = CreationStage::Initialize;
        multiple.validate_incoming()?;
        let union = ordered_union(&requested, &matched);
        if union.is_empty() {
            return Err(ValidationError::EmptyRequest.into());
        }

        stage = self.advance(stage);
        let (multiple, expected_version) = self.assign_reference(multiple).await?;
        let reference = multiple
            .reference()
            .cloned()
            .ok_or(ValidationError::MissingReference)?;
        tracing::Span::current().record("multiple_reference", tracing::field::display(&reference));

        stage = self.advance(stage);
        let (eligible, failures) =
            check_joiners(self.case_store.as_ref(), &self.scope, &reference, &union).await;
        let current = multiple.member_references();
        if current.is_empty() && eligible.is_empty() {
            tracing::warn!(
                multiple_reference = %reference,
                rejected = failures.len(),
                "no requested case can join the multiple"
            );
            return Err(ValidationError::NoEligibleCases { failures }.into());
        }
        let delta = if current.is_empty() {
            resolve_membership(&[], &eligible, &[])
        } else {
            resolve_membership(&current, &current, &eligible)
        };

        stage = self.advance(stage);
        let lead = elect_lead(
            &delta.proposed,
            multiple.lead_case(),
            RoundKind::MembershipChange,
        );

        stage = self.advance(stage);
        let outcome = reconcile(
            &self.propagator,
            self.multiples.as_ref(),
            &self.scope,
            Reconciliation {
                multiple,
                delta,
                lead,
                targeting: Targeting::default(),
                mode,
                expected_version,
                failures,
            },
        )
        .await?;

        self.advance(stage);
        tracing::info!(
            multiple_reference = %reference,
            members = outcome.multiple.case_counter(),
            failed = outcome.failures.len(),
            enqueued_jobs = outcome.enqueued_jobs,
            "bulk creation committed"
        );
        Ok(outcome)
    }

    fn advance(&self, stage: CreationStage) -> CreationStage {
        let next = stage.next();
        tracing::debug!(
            case_type_id = %self.scope.multiple_case_type_id,
            stage = %next,
            "creation stage"
        );
        next
    }

    async fn assign_reference(
        &self,
        multiple: MultipleCase,
    ) -> Result<(MultipleCase, Option<u64>), CoordinationError> {
        let case_type_id = &self.scope.multiple_case_type_id;
        match multiple.reference().cloned() {
            None => {
                let reference = self.multiples.allocate_reference(case_type_id).await?;
                tracing::debug!(multiple_reference = %reference, "allocated multiple reference");
                Ok((multiple.with_reference(reference), None))
            }
            Some(reference) => {
                let stored = self.multiples.load(case_type_id, &reference).await?;
                let expected = multiple
                    .version()
                    .or_else(|| stored.as_ref().and_then(MultipleCase::version));
                Ok((multiple, expected))
            }
        }
    }
}
