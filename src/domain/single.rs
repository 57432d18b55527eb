//! Single case record.
//!
//! A single case is owned and persisted by the case store. The coordination
//! core only reads it and proposes [`ChangeSet`](super::ChangeSet)s against it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::references::{CaseReference, MultipleReference};

/// Whether a case is live or has been struck out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// The case is live.
    #[default]
    Active,
    /// The case has been struck out. It may still be grouped.
    Struck,
}

/// An independently-owned case record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleCase {
    /// The case's own reference.
    pub case_reference: CaseReference,
    /// The multiple the case currently belongs to, if any.
    #[serde(default)]
    pub multiple_reference: Option<MultipleReference>,
    /// Whether this case is the lead claimant of its multiple.
    #[serde(default)]
    pub lead_claimant: bool,
    /// Sub-group tag within the multiple.
    #[serde(default)]
    pub sub_group: Option<String>,
    /// Live or struck out.
    #[serde(default)]
    pub status: CaseStatus,
    /// Free-form case fields touched by bulk edits.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl SingleCase {
    /// Creates an active, ungrouped case with no fields.
    #[must_use]
    pub const fn new(case_reference: CaseReference) -> Self {
        Self {
            case_reference,
            multiple_reference: None,
            lead_claimant: false,
            sub_group: None,
            status: CaseStatus::Active,
            fields: BTreeMap::new(),
        }
    }

    /// Returns a copy that belongs to `multiple_reference`.
    #[must_use]
    pub fn in_multiple(mut self, multiple_reference: MultipleReference) -> Self {
        self.multiple_reference = Some(multiple_reference);
        self
    }

    /// Returns a copy with the given status.
    #[must_use]
    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns `true` if the case belongs to a multiple other than `reference`.
    #[must_use]
    pub fn belongs_elsewhere(&self, reference: Option<&MultipleReference>) -> bool {
        match (&self.multiple_reference, reference) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(reference)) => current != reference,
        }
    }
}
