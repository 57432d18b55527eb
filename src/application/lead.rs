//! Lead election.

use crate::domain::CaseReference;

/// What kind of round the election runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundKind {
    /// Cases joined or left the multiple.
    MembershipChange,
    /// Only fields changed; membership is the same.
    FieldUpdate,
}

/// Picks the lead among `candidates`.
///
/// The first candidate leads, except in a [`RoundKind::FieldUpdate`] round
/// where `existing_lead` is still a candidate: then it keeps the role.
/// No candidates means no lead.
///
/// # Examples
///
/// ```rust
/// use multiples_sync::application::{RoundKind, elect_lead};
/// use multiples_sync::domain::CaseReference;
///
/// let a = CaseReference::new("A").unwrap();
/// let b = CaseReference::new("B").unwrap();
/// let candidates = vec![a.clone(), b.clone()];
///
/// assert_eq!(elect_lead(&candidates, Some(&b), RoundKind::FieldUpdate), Some(b.clone()));
/// assert_eq!(elect_lead(&candidates, Some(&b), RoundKind::MembershipChange), Some(a));
/// assert_eq!(elect_lead(&[], Some(&b), RoundKind::FieldUpdate), None);
/// ```
#[must_use]
pub fn elect_lead(
    candidates: &[CaseReference],
    existing_lead: Option<&CaseReference>,
    kind: RoundKind,
) -> Option<CaseReference> {
    if kind == RoundKind::FieldUpdate
        && let Some(lead) = existing_lead
        && candidates.contains(lead)
    {
        return Some(lead.clone());
    }
    candidates.first().cloned()
}
