//! Building blocks shared by the creation and update coordinators.
//!
//! A reconciliation round on one multiple runs in four steps:
//!
//! 1. plan the case writes from a [`MembershipDelta`] and the elected lead,
//! 2. propagate them,
//! 3. derive the final member list from what was actually written,
//! 4. commit the multiple with compare-and-swap.
//!
//! On the synchronous path a lead whose write failed is replaced before the
//! commit, so the committed record names a lead whose flag was written
//! whenever any member's lead write succeeds.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::errors::CoordinationError;
use super::fan_out::FanOutItem;
use super::lead::{RoundKind, elect_lead};
use super::membership::MembershipDelta;
use super::ports::{CaseScope, CaseStoreClient, CaseStoreError, MultipleStore, SearchCriteria};
use super::propagation::{PropagationMode, PropagationPlan, Propagator};
use crate::domain::{
    CaseReference, ChangeSet, FieldEdits, MemberEntry, MultipleCase, MultipleReference,
    PropagationFailure, SingleCase, ValidationError,
};

// =============================================================================
// Round Outcome
// =============================================================================

/// Whether every case write of a round succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundStatus {
    /// Every write succeeded (or was durably enqueued).
    Complete,
    /// Some writes failed.
    Partial {
        /// Number of recorded failures.
        failed: usize,
    },
}

/// Result of a committed coordination round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    /// The multiple as committed.
    pub multiple: MultipleCase,
    /// The target multiple as committed, when cases were moved.
    pub moved_to: Option<MultipleCase>,
    /// Per-case write failures.
    pub failures: Vec<PropagationFailure>,
    /// How the writes were propagated.
    pub mode: PropagationMode,
    /// Number of update jobs acknowledged by the durable queue.
    pub enqueued_jobs: usize,
}

impl RoundOutcome {
    /// Complete or partial.
    #[must_use]
    pub fn status(&self) -> RoundStatus {
        if self.failures.is_empty() {
            RoundStatus::Complete
        } else {
            RoundStatus::Partial {
                failed: self.failures.len(),
            }
        }
    }
}

// =============================================================================
// Targeting
// =============================================================================

/// Field edits and sub-group tag applied to a subset of the cases.
#[derive(Debug, Clone, Default)]
pub struct Targeting {
    targeted: HashSet<CaseReference>,
    edits: FieldEdits,
    sub_group: Option<String>,
}

impl Targeting {
    pub fn new(
        targeted: &[CaseReference],
        edits: FieldEdits,
        sub_group: Option<String>,
    ) -> Self {
        Self {
            targeted: targeted.iter().cloned().collect(),
            edits,
            sub_group,
        }
    }

    pub fn is_targeted(&self, reference: &CaseReference) -> bool {
        self.targeted.contains(reference)
    }

    /// Adds the edits and tag to `change_set` when `reference` is targeted.
    pub fn decorate(&self, reference: &CaseReference, change_set: ChangeSet) -> ChangeSet {
        if !self.is_targeted(reference) {
            return change_set;
        }
        let change_set = change_set.with_fields(&self.edits);
        match &self.sub_group {
            Some(sub_group) => change_set.with_sub_group(sub_group.as_str()),
            None => change_set,
        }
    }

    /// Tag to record on the member entry.
    pub fn tag_for(
        &self,
        reference: &CaseReference,
        previous: Option<&String>,
        written: bool,
    ) -> Option<String> {
        match &self.sub_group {
            Some(sub_group) if written && self.is_targeted(reference) => Some(sub_group.clone()),
            _ => previous.cloned(),
        }
    }
}

// =============================================================================
// Membership Pre-check
// =============================================================================

/// Splits `candidates` into cases that may join `reference` and failures.
///
/// A case the store does not know, or one that belongs to another multiple,
/// is reported and left out.
pub async fn check_joiners(
    case_store: &dyn CaseStoreClient,
    scope: &CaseScope,
    reference: &MultipleReference,
    candidates: &[CaseReference],
) -> (Vec<CaseReference>, Vec<PropagationFailure>) {
    if candidates.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let found = load_cases(case_store, scope, candidates).await;
    let mut failures = Vec::new();
    let mut eligible = Vec::with_capacity(candidates.len());

    for case_reference in candidates {
        match found.iter().find(|(loaded, _)| loaded == case_reference) {
            Some((_, Ok(case))) if case.belongs_elsewhere(Some(reference)) => {
                let other = case
                    .multiple_reference
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string);
                failures.push(PropagationFailure::new(
                    case_reference.clone(),
                    format!("already belongs to multiple {other}"),
                ));
            }
            Some((_, Ok(_))) => eligible.push(case_reference.clone()),
            Some((_, Err(error))) => {
                failures.push(PropagationFailure::new(case_reference.clone(), error.to_string()));
            }
            None => failures.push(PropagationFailure::new(case_reference.clone(), "not found")),
        }
    }

    for failure in &failures {
        tracing::warn!(
            multiple_reference = %reference,
            case_reference = %failure.case_reference,
            reason = %failure.reason,
            "case cannot join multiple"
        );
    }
    (eligible, failures)
}

/// Loads the cases with one search, falling back to one retrieve per case if
/// the search fails.
async fn load_cases(
    case_store: &dyn CaseStoreClient,
    scope: &CaseScope,
    candidates: &[CaseReference],
) -> Vec<(CaseReference, Result<SingleCase, CaseStoreError>)> {
    let criteria = SearchCriteria::by_references(candidates);
    match case_store
        .search(&scope.single_case_type_id, &criteria)
        .await
    {
        Ok(cases) => cases
            .into_iter()
            .map(|case| (case.case_reference.clone(), Ok(case)))
            .collect(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                cases = candidates.len(),
                "case search failed, retrieving cases one by one"
            );
            let retrievals = candidates.iter().map(|case_reference| {
                let retrieval = case_store.retrieve(
                    &scope.single_case_type_id,
                    &scope.jurisdiction,
                    case_reference,
                );
                let case_reference = case_reference.clone();
                async move { (case_reference, retrieval.await) }
            });
            join_all(retrievals)
                .await
                .into_iter()
                .filter(|(_, result)| !matches!(result, Err(CaseStoreError::NotFound(_))))
                .collect()
        }
    }
}

// =============================================================================
// Write Planning
// =============================================================================

/// The writes of a round plus the lead flag each write sets.
#[derive(Debug, Default)]
pub struct WritePlan {
    pub plan: PropagationPlan,
    pub planned_lead: HashMap<CaseReference, bool>,
}

impl WritePlan {
    pub fn detach(&mut self, multiple: &MultipleReference, reference: &CaseReference) {
        self.planned_lead.insert(reference.clone(), false);
        self.plan.detach.push(FanOutItem::new(
            reference.clone(),
            ChangeSet::detach(multiple.clone()),
        ));
    }

    pub fn write(&mut self, reference: &CaseReference, change_set: ChangeSet) {
        if change_set.is_empty() {
            return;
        }
        if let Some(lead) = change_set.lead() {
            self.planned_lead.insert(reference.clone(), lead);
        }
        self.plan
            .write
            .push(FanOutItem::new(reference.clone(), change_set));
    }
}

/// Plans the writes reconciling `current` to `delta` with `lead` as lead.
pub fn plan_reconciliation(
    reference: &MultipleReference,
    current: &MultipleCase,
    delta: &MembershipDelta,
    lead: Option<&CaseReference>,
    targeting: &Targeting,
) -> WritePlan {
    let mut writes = WritePlan::default();
    for detached in &delta.to_detach {
        writes.detach(reference, detached);
    }
    for attached in &delta.to_attach {
        let change_set = ChangeSet::attach(reference.clone(), lead == Some(attached));
        writes.write(attached, targeting.decorate(attached, change_set));
    }
    for kept in &delta.unchanged {
        let was_lead = current.member(kept).is_some_and(|member| member.lead);
        let is_lead = lead == Some(kept);
        let change_set = if was_lead == is_lead {
            ChangeSet::empty()
        } else {
            ChangeSet::set_lead(is_lead)
        };
        writes.write(kept, targeting.decorate(kept, change_set));
    }
    writes
}

/// Member list after propagation.
///
/// Proposed members in order, minus attaches that were not written, plus
/// current members whose detach was not written.
pub fn final_members(
    current: &MultipleCase,
    delta: &MembershipDelta,
    lead: Option<&CaseReference>,
    written: &HashSet<CaseReference>,
    targeting: &Targeting,
) -> Vec<MemberEntry> {
    let attaching: HashSet<&CaseReference> = delta.to_attach.iter().collect();
    let mut members: Vec<MemberEntry> = delta
        .proposed
        .iter()
        .filter(|reference| !attaching.contains(reference) || written.contains(*reference))
        .map(|reference| {
            let previous = current
                .member(reference)
                .and_then(|member| member.sub_group.as_ref());
            MemberEntry {
                case_reference: reference.clone(),
                lead: lead == Some(reference),
                sub_group: targeting.tag_for(reference, previous, written.contains(reference)),
            }
        })
        .collect();

    members.extend(
        delta
            .to_detach
            .iter()
            .filter(|reference| !written.contains(*reference))
            .filter_map(|reference| current.member(reference))
            .map(|member| MemberEntry {
                lead: false,
                ..member.clone()
            }),
    );
    members
}

/// Which members' single cases carry the lead flag after propagation.
pub fn lead_claims(
    members: &[MemberEntry],
    previous_leads: &HashSet<CaseReference>,
    planned_lead: &HashMap<CaseReference, bool>,
    written: &HashSet<CaseReference>,
) -> HashMap<CaseReference, bool> {
    members
        .iter()
        .map(|member| {
            let reference = &member.case_reference;
            let claims = match planned_lead.get(reference) {
                Some(planned) if written.contains(reference) => *planned,
                _ => previous_leads.contains(reference),
            };
            (reference.clone(), claims)
        })
        .collect()
}

/// References of the members flagged as lead in `multiple`.
pub fn previous_leads(multiple: &MultipleCase) -> HashSet<CaseReference> {
    multiple.lead_case().into_iter().cloned().collect()
}

// =============================================================================
// Lead Repair
// =============================================================================

/// Makes sure the lead named in `members` has its flag written.
///
/// Starts from the member currently flagged as lead (or the first member if
/// none is), writes `set_lead(true)` where the case does not claim the role
/// yet, and re-elects among the remaining members when that write fails. If
/// no member's write succeeds the first member stays lead.
pub async fn repair_lead(
    propagator: &Propagator,
    reference: &MultipleReference,
    mut members: Vec<MemberEntry>,
    mut claims: HashMap<CaseReference, bool>,
) -> Result<(Vec<MemberEntry>, Vec<PropagationFailure>), CoordinationError> {
    let references: Vec<CaseReference> = members
        .iter()
        .map(|member| member.case_reference.clone())
        .collect();
    let mut lead = members
        .iter()
        .find(|member| member.lead)
        .map(|member| member.case_reference.clone())
        .or_else(|| references.first().cloned());
    let mut excluded: HashSet<CaseReference> = HashSet::new();
    let mut failures = Vec::new();

    while let Some(candidate) = lead.clone() {
        if claims.get(&candidate).copied().unwrap_or(false) {
            break;
        }
        let plan = PropagationPlan {
            detach: Vec::new(),
            write: vec![FanOutItem::new(candidate.clone(), ChangeSet::set_lead(true))],
        };
        let outcome = propagator
            .propagate(reference, None, plan, PropagationMode::SynchronousFanOut)
            .await?;
        if outcome.written.contains(&candidate) {
            claims.insert(candidate, true);
            break;
        }

        tracing::warn!(
            multiple_reference = %reference,
            case_reference = %candidate,
            "lead flag write failed, re-electing"
        );
        failures.extend(outcome.failures);
        excluded.insert(candidate);
        let remaining: Vec<CaseReference> = references
            .iter()
            .filter(|case| !excluded.contains(*case))
            .cloned()
            .collect();
        lead = elect_lead(&remaining, None, RoundKind::MembershipChange);
        if lead.is_none() {
            tracing::error!(
                multiple_reference = %reference,
                "no member accepted the lead flag"
            );
            lead = references.first().cloned();
            break;
        }
    }

    for member in &mut members {
        member.lead = lead.as_ref() == Some(&member.case_reference);
    }
    Ok((members, failures))
}

/// Final member list of `multiple` after its writes, with the lead repaired
/// on the synchronous path.
#[allow(clippy::too_many_arguments)]
pub async fn settle_members(
    propagator: &Propagator,
    multiple: &MultipleCase,
    delta: &MembershipDelta,
    lead: Option<&CaseReference>,
    targeting: &Targeting,
    planned_lead: &HashMap<CaseReference, bool>,
    written: &HashSet<CaseReference>,
    mode: PropagationMode,
) -> Result<(Vec<MemberEntry>, Vec<PropagationFailure>), CoordinationError> {
    let members = final_members(multiple, delta, lead, written, targeting);
    if mode == PropagationMode::DurableQueue || members.is_empty() {
        return Ok((members, Vec::new()));
    }
    let reference = multiple
        .reference()
        .ok_or(ValidationError::MissingReference)?;
    let claims = lead_claims(&members, &previous_leads(multiple), planned_lead, written);
    repair_lead(propagator, reference, members, claims).await
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Everything needed to reconcile one multiple.
#[derive(Debug)]
pub struct Reconciliation {
    pub multiple: MultipleCase,
    pub delta: MembershipDelta,
    pub lead: Option<CaseReference>,
    pub targeting: Targeting,
    pub mode: PropagationMode,
    pub expected_version: Option<u64>,
    pub failures: Vec<PropagationFailure>,
}

/// Propagates and commits a single-multiple round.
pub async fn reconcile(
    propagator: &Propagator,
    multiples: &dyn MultipleStore,
    scope: &CaseScope,
    round: Reconciliation,
) -> Result<RoundOutcome, CoordinationError> {
    let Reconciliation {
        multiple,
        delta,
        lead,
        targeting,
        mode,
        expected_version,
        mut failures,
    } = round;
    let reference = multiple
        .reference()
        .cloned()
        .ok_or(ValidationError::MissingReference)?;

    let writes = plan_reconciliation(&reference, &multiple, &delta, lead.as_ref(), &targeting);
    tracing::debug!(
        multiple_reference = %reference,
        attach = delta.to_attach.len(),
        detach = delta.to_detach.len(),
        unchanged = delta.unchanged.len(),
        writes = writes.plan.len(),
        lead = ?lead.as_ref().map(CaseReference::as_str),
        "planned reconciliation"
    );

    let outcome = propagator
        .propagate(&reference, expected_version, writes.plan, mode)
        .await?;
    let written: HashSet<CaseReference> = outcome.written.iter().cloned().collect();
    failures.extend(outcome.failures);

    let (members, settle_failures) = settle_members(
        propagator,
        &multiple,
        &delta,
        lead.as_ref(),
        &targeting,
        &writes.planned_lead,
        &written,
        mode,
    )
    .await?;
    failures.extend(settle_failures);

    let record = multiple.with_members(members).clear_search_collection();
    let committed = multiples
        .commit(&scope.multiple_case_type_id, &record, expected_version)
        .await?;

    Ok(RoundOutcome {
        multiple: committed,
        moved_to: None,
        failures,
        mode,
        enqueued_jobs: outcome.acknowledgements.len(),
    })
}
