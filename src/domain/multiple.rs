//! The multiple: a grouping record over independently-owned single cases.
//!
//! # Invariants
//!
//! - `case_id_collection` and `case_counter` always mirror `members`; the only
//!   way to change the members is [`MultipleCase::with_members`], which
//!   recomputes both.
//! - At most one member carries the lead flag, and a non-empty multiple has
//!   exactly one once a coordination round has committed it.
//! - The search collection is transient: it holds the caller's last filter
//!   result and is cleared by every reconciliation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::references::{CaseReference, MultipleReference};

/// One member of a multiple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    /// The member case.
    pub case_reference: CaseReference,
    /// Whether the member is the lead case.
    #[serde(default)]
    pub lead: bool,
    /// Optional sub-group ("sub-multiple") tag.
    #[serde(default)]
    pub sub_group: Option<String>,
}

impl MemberEntry {
    /// Creates a non-lead, untagged member.
    #[must_use]
    pub const fn new(case_reference: CaseReference) -> Self {
        Self {
            case_reference,
            lead: false,
            sub_group: None,
        }
    }

    /// Returns a copy marked as lead.
    #[must_use]
    pub fn as_lead(mut self) -> Self {
        self.lead = true;
        self
    }

    /// Returns a copy tagged with `sub_group`.
    #[must_use]
    pub fn with_sub_group(mut self, sub_group: impl Into<String>) -> Self {
        self.sub_group = Some(sub_group.into());
        self
    }
}

/// The grouping record.
///
/// # Examples
///
/// ```rust
/// use multiples_sync::domain::{CaseReference, MemberEntry, MultipleCase};
///
/// let a = CaseReference::new("A").unwrap();
/// let b = CaseReference::new("B").unwrap();
///
/// let multiple = MultipleCase::new("Acme Ltd claims")
///     .with_members(vec![MemberEntry::new(a.clone()).as_lead(), MemberEntry::new(b)]);
///
/// assert_eq!(multiple.case_counter(), 2);
/// assert_eq!(multiple.case_id_collection().len(), 2);
/// assert_eq!(multiple.lead_case(), Some(&a));
/// assert!(multiple.check_invariants().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipleCase {
    #[serde(default)]
    reference: Option<MultipleReference>,
    name: String,
    #[serde(default)]
    members: Vec<MemberEntry>,
    #[serde(default)]
    case_id_collection: Vec<CaseReference>,
    #[serde(default)]
    case_counter: usize,
    #[serde(default)]
    search_collection: Vec<CaseReference>,
    #[serde(default)]
    version: Option<u64>,
}

impl MultipleCase {
    /// Creates an empty, unpersisted multiple without a reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            reference: None,
            name: name.into(),
            members: Vec::new(),
            case_id_collection: Vec::new(),
            case_counter: 0,
            search_collection: Vec::new(),
            version: None,
        }
    }

    /// Returns a copy carrying `reference`.
    #[must_use]
    pub fn with_reference(mut self, reference: MultipleReference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Returns a copy whose members are `members`, with the case-id
    /// collection and counter recomputed.
    #[must_use]
    pub fn with_members(mut self, members: Vec<MemberEntry>) -> Self {
        self.case_id_collection = members
            .iter()
            .map(|member| member.case_reference.clone())
            .collect();
        self.case_counter = members.len();
        self.members = members;
        self
    }

    /// Returns a copy holding the caller's latest filter result.
    #[must_use]
    pub fn with_search_collection(mut self, search_collection: Vec<CaseReference>) -> Self {
        self.search_collection = search_collection;
        self
    }

    /// Returns a copy with the transient search collection cleared.
    #[must_use]
    pub fn clear_search_collection(mut self) -> Self {
        self.search_collection.clear();
        self
    }

    /// Returns a copy stamped with the store version it was read at.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// The multiple reference, if one has been assigned.
    #[must_use]
    pub const fn reference(&self) -> Option<&MultipleReference> {
        self.reference.as_ref()
    }

    /// Display name of the multiple.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in order.
    #[must_use]
    pub fn members(&self) -> &[MemberEntry] {
        &self.members
    }

    /// Member case references in order.
    #[must_use]
    pub fn member_references(&self) -> Vec<CaseReference> {
        self.members
            .iter()
            .map(|member| member.case_reference.clone())
            .collect()
    }

    /// The case-id collection kept in sync with the members.
    #[must_use]
    pub fn case_id_collection(&self) -> &[CaseReference] {
        &self.case_id_collection
    }

    /// Number of members.
    #[must_use]
    pub const fn case_counter(&self) -> usize {
        self.case_counter
    }

    /// The caller's last filter result.
    #[must_use]
    pub fn search_collection(&self) -> &[CaseReference] {
        &self.search_collection
    }

    /// Store version this record was read at; `None` if never persisted.
    #[must_use]
    pub const fn version(&self) -> Option<u64> {
        self.version
    }

    /// The lead member's reference, if any member carries the lead flag.
    #[must_use]
    pub fn lead_case(&self) -> Option<&CaseReference> {
        self.members
            .iter()
            .find(|member| member.lead)
            .map(|member| &member.case_reference)
    }

    /// Looks up the member entry for `reference`.
    #[must_use]
    pub fn member(&self, reference: &CaseReference) -> Option<&MemberEntry> {
        self.members
            .iter()
            .find(|member| &member.case_reference == reference)
    }

    /// Validates a multiple received from a caller before a round starts.
    ///
    /// A missing lead on a non-empty multiple is accepted (the round elects
    /// one); two or more leads and duplicate members are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MultipleLeads`] or
    /// [`ValidationError::DuplicateMember`].
    pub fn validate_incoming(&self) -> Result<(), ValidationError> {
        let leads: Vec<String> = self
            .members
            .iter()
            .filter(|member| member.lead)
            .map(|member| member.case_reference.to_string())
            .collect();
        if leads.len() > 1 {
            return Err(ValidationError::MultipleLeads {
                reference: self.display_reference(),
                leads,
            });
        }

        let mut seen = HashSet::with_capacity(self.members.len());
        for member in &self.members {
            if !seen.insert(&member.case_reference) {
                return Err(ValidationError::DuplicateMember {
                    reference: self.display_reference(),
                    case_reference: member.case_reference.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks the invariants every committed multiple must satisfy.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a [`ValidationError`].
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        self.validate_incoming()?;
        let consistent = self.case_counter == self.members.len()
            && self.case_id_collection.len() == self.members.len()
            && self
                .members
                .iter()
                .zip(&self.case_id_collection)
                .all(|(member, reference)| &member.case_reference == reference);
        if !consistent {
            return Err(ValidationError::InconsistentMembers {
                reference: self.display_reference(),
                members: self.members.len(),
                collection: self.case_id_collection.len(),
                counter: self.case_counter,
            });
        }
        if !self.members.is_empty() && self.lead_case().is_none() {
            return Err(ValidationError::MissingLead {
                reference: self.display_reference(),
            });
        }
        Ok(())
    }

    fn display_reference(&self) -> String {
        self.reference
            .as_ref()
            .map_or_else(|| "<unassigned>".to_string(), ToString::to_string)
    }
}
