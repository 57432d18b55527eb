//! Change sets: what to write into a single case.
//!
//! A [`ChangeSet`] is immutable once built and is applied by exactly one of
//! the fan-out executor or the durable queue. Every operation it can express
//! is a *set*, never an increment, so applying it twice leaves the case in the
//! same state as applying it once. Redelivery by the durable queue relies on
//! this.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::references::MultipleReference;
use super::single::SingleCase;

/// How a change set affects the case's multiple membership.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "multiple_reference", rename_all = "snake_case")]
pub enum MembershipChange {
    /// Leave the multiple reference untouched.
    #[default]
    Keep,
    /// Set the multiple reference.
    Attach(MultipleReference),
    /// Clear the multiple reference, the lead flag and the sub-group tag,
    /// provided the case still belongs to this multiple.
    Detach(MultipleReference),
}

/// Field values to overwrite on a case.
///
/// Keys are kept sorted so that the serialized form (and therefore job
/// identity) does not depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldEdits(BTreeMap<String, serde_json::Value>);

impl FieldEdits {
    /// Creates an empty set of edits.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns a copy with `field` set to `value`.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Returns `true` if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of fields edited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over `(field, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, serde_json::Value)> for FieldEdits {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A description of what to write into one or more single cases.
///
/// # Examples
///
/// ```rust
/// use multiples_sync::domain::{CaseReference, ChangeSet, MultipleReference, SingleCase};
///
/// let multiple = MultipleReference::new("6000001").unwrap();
/// let change = ChangeSet::attach(multiple.clone(), true);
///
/// let case = SingleCase::new(CaseReference::new("A").unwrap());
/// let once = change.apply_to(&case);
/// let twice = change.apply_to(&once);
///
/// assert_eq!(once.multiple_reference, Some(multiple));
/// assert!(once.lead_claimant);
/// assert_eq!(once, twice);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    membership: MembershipChange,
    lead: Option<bool>,
    sub_group: Option<String>,
    fields: FieldEdits,
}

impl ChangeSet {
    /// A change set that writes nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            membership: MembershipChange::Keep,
            lead: None,
            sub_group: None,
            fields: FieldEdits::new(),
        }
    }

    /// Attach to `multiple_reference` with the given lead flag.
    #[must_use]
    pub const fn attach(multiple_reference: MultipleReference, lead: bool) -> Self {
        Self {
            membership: MembershipChange::Attach(multiple_reference),
            lead: Some(lead),
            sub_group: None,
            fields: FieldEdits::new(),
        }
    }

    /// Detach from `multiple_reference`. A case that has since joined
    /// another multiple is left alone.
    #[must_use]
    pub const fn detach(multiple_reference: MultipleReference) -> Self {
        Self {
            membership: MembershipChange::Detach(multiple_reference),
            lead: None,
            sub_group: None,
            fields: FieldEdits::new(),
        }
    }

    /// Set only the lead flag.
    #[must_use]
    pub const fn set_lead(lead: bool) -> Self {
        Self {
            membership: MembershipChange::Keep,
            lead: Some(lead),
            sub_group: None,
            fields: FieldEdits::new(),
        }
    }

    /// Returns a copy that also writes the lead flag.
    #[must_use]
    pub fn with_lead(mut self, lead: bool) -> Self {
        self.lead = Some(lead);
        self
    }

    /// Returns a copy that also writes the sub-group tag.
    #[must_use]
    pub fn with_sub_group(mut self, sub_group: impl Into<String>) -> Self {
        self.sub_group = Some(sub_group.into());
        self
    }

    /// Returns a copy that also writes `fields`; later values win.
    #[must_use]
    pub fn with_fields(mut self, fields: &FieldEdits) -> Self {
        for (field, value) in fields.iter() {
            self.fields.0.insert(field.clone(), value.clone());
        }
        self
    }

    /// The membership part of the change.
    #[must_use]
    pub const fn membership(&self) -> &MembershipChange {
        &self.membership
    }

    /// The lead flag to write, if any.
    #[must_use]
    pub const fn lead(&self) -> Option<bool> {
        self.lead
    }

    /// The sub-group tag to write, if any.
    #[must_use]
    pub fn sub_group(&self) -> Option<&str> {
        self.sub_group.as_deref()
    }

    /// The field edits to write.
    #[must_use]
    pub const fn fields(&self) -> &FieldEdits {
        &self.fields
    }

    /// Returns `true` if applying this change set writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.membership, MembershipChange::Keep)
            && self.lead.is_none()
            && self.sub_group.is_none()
            && self.fields.is_empty()
    }

    /// Stable textual form of the change, used for job identity and grouping.
    #[must_use]
    pub fn content_key(&self) -> String {
        // String keys and JSON values only: serialization is infallible here.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Applies the change to `case`, returning the updated copy.
    ///
    /// A detach clears the lead flag and sub-group tag only when the case
    /// still belongs to the detaching multiple; explicit lead or sub-group
    /// values in the same change set are applied afterwards.
    #[must_use]
    pub fn apply_to(&self, case: &SingleCase) -> SingleCase {
        let mut updated = case.clone();
        match &self.membership {
            MembershipChange::Keep => {}
            MembershipChange::Attach(reference) => {
                updated.multiple_reference = Some(reference.clone());
            }
            MembershipChange::Detach(reference) => {
                if updated.multiple_reference.as_ref() != Some(reference) {
                    return updated;
                }
                updated.multiple_reference = None;
                updated.lead_claimant = false;
                updated.sub_group = None;
            }
        }
        if let Some(lead) = self.lead {
            updated.lead_claimant = lead;
        }
        if let Some(sub_group) = &self.sub_group {
            updated.sub_group = Some(sub_group.clone());
        }
        for (field, value) in self.fields.iter() {
            updated.fields.insert(field.clone(), value.clone());
        }
        updated
    }
}
