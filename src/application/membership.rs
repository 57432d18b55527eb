//! Membership resolution.
//!
//! Pure set arithmetic over case references. Order is preserved so that the
//! lead elector sees the caller's ordering: `to_attach` and `proposed` follow
//! the order of `requested` then `matched`, `to_detach` and `unchanged` follow
//! the current membership.

use std::collections::HashSet;

use crate::domain::CaseReference;

/// Partition of a proposed member set against the current one.
///
/// `to_attach`, `to_detach` and `unchanged` are pairwise disjoint, and their
/// union is `current ∪ proposed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipDelta {
    /// Proposed members not currently attached.
    pub to_attach: Vec<CaseReference>,
    /// Current members not in the proposal.
    pub to_detach: Vec<CaseReference>,
    /// Current members that stay.
    pub unchanged: Vec<CaseReference>,
    /// The proposed membership, `requested ∪ matched`, in order.
    pub proposed: Vec<CaseReference>,
}

impl MembershipDelta {
    /// Returns `true` if any case joins or leaves.
    #[must_use]
    pub fn is_membership_change(&self) -> bool {
        !self.to_attach.is_empty() || !self.to_detach.is_empty()
    }

    /// Number of distinct references across all three partitions.
    #[must_use]
    pub fn touched(&self) -> usize {
        self.to_attach.len() + self.to_detach.len() + self.unchanged.len()
    }
}

/// Concatenates `requested` and `matched`, keeping the first occurrence of
/// every reference.
#[must_use]
pub fn ordered_union(requested: &[CaseReference], matched: &[CaseReference]) -> Vec<CaseReference> {
    let mut seen = HashSet::with_capacity(requested.len() + matched.len());
    requested
        .iter()
        .chain(matched)
        .filter(|reference| seen.insert(*reference))
        .cloned()
        .collect()
}

/// Classifies `requested ∪ matched` against `current`.
///
/// An empty union with a non-empty `current` detaches every current member.
///
/// # Examples
///
/// ```rust
/// use multiples_sync::application::resolve_membership;
/// use multiples_sync::domain::CaseReference;
///
/// let refs = |values: &[&str]| -> Vec<CaseReference> {
///     values.iter().map(|value| CaseReference::new(*value).unwrap()).collect()
/// };
///
/// let delta = resolve_membership(&refs(&["A", "B"]), &refs(&["B", "C"]), &[]);
///
/// assert_eq!(delta.to_attach, refs(&["C"]));
/// assert_eq!(delta.to_detach, refs(&["A"]));
/// assert_eq!(delta.unchanged, refs(&["B"]));
/// ```
#[must_use]
pub fn resolve_membership(
    current: &[CaseReference],
    requested: &[CaseReference],
    matched: &[CaseReference],
) -> MembershipDelta {
    let proposed = ordered_union(requested, matched);
    let proposed_set: HashSet<&CaseReference> = proposed.iter().collect();

    let mut seen_current = HashSet::with_capacity(current.len());
    let (unchanged, to_detach): (Vec<_>, Vec<_>) = current
        .iter()
        .filter(|reference| seen_current.insert(*reference))
        .cloned()
        .partition(|reference| proposed_set.contains(reference));

    let to_attach = proposed
        .iter()
        .filter(|reference| !seen_current.contains(reference))
        .cloned()
        .collect();

    MembershipDelta {
        to_attach,
        to_detach,
        unchanged,
        proposed,
    }
}
