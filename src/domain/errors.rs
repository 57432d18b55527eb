//! Domain-level errors and failure values.
//!
//! Two kinds of problems exist in a coordination round:
//!
//! - [`ValidationError`]: the caller's input is structurally invalid. The
//!   round is rejected before any case is written.
//! - [`PropagationFailure`]: one single-case write failed. This is a *value*
//!   collected alongside the round's result, never an error return, so sibling
//!   writes are unaffected.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::references::CaseReference;

/// Structural problems with a coordination request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// A case or multiple reference was blank.
    #[error("reference must not be empty")]
    EmptyReference,

    /// Neither requested nor matched cases were supplied.
    #[error("no case references were requested or matched")]
    EmptyRequest,

    /// The operation needs a multiple that already has a reference.
    #[error("multiple has no reference")]
    MissingReference,

    /// The move target does not exist or is the current multiple.
    #[error("multiple reference {target} does not exist or is the same as the current multiple {current}")]
    InvalidTargetReference {
        /// The reference the caller asked to move cases into.
        target: String,
        /// The reference of the multiple being edited.
        current: String,
    },

    /// More than one member carries the lead flag.
    #[error("multiple {reference} has more than one lead case: {leads:?}")]
    MultipleLeads {
        /// The multiple reference (or `<unassigned>`).
        reference: String,
        /// Every member carrying the lead flag.
        leads: Vec<String>,
    },

    /// The member list disagrees with the case id collection or the counter.
    #[error(
        "multiple {reference} is inconsistent: {members} members, {collection} collection entries, counter {counter}"
    )]
    InconsistentMembers {
        /// The multiple reference (or `<unassigned>`).
        reference: String,
        /// Length of the member list.
        members: usize,
        /// Length of the case id collection.
        collection: usize,
        /// The stored case counter.
        counter: usize,
    },

    /// A multiple with members has no lead case.
    #[error("multiple {reference} has members but no lead case")]
    MissingLead {
        /// The multiple reference (or `<unassigned>`).
        reference: String,
    },

    /// Every requested case was rejected before any write.
    #[error("no requested case can join the multiple: {}", describe(.failures))]
    NoEligibleCases {
        /// Why each case was rejected.
        failures: Vec<PropagationFailure>,
    },

    /// The same case appears twice in a member collection.
    #[error("case {case_reference} appears more than once in multiple {reference}")]
    DuplicateMember {
        /// The multiple reference (or `<unassigned>`).
        reference: String,
        /// The duplicated case.
        case_reference: String,
    },
}

/// A single-case write that did not succeed.
///
/// # Examples
///
/// ```rust
/// use multiples_sync::domain::{CaseReference, PropagationFailure};
///
/// let failure = PropagationFailure::new(
///     CaseReference::new("C3").unwrap(),
///     "transport error: connection reset",
/// );
/// assert_eq!(failure.to_string(), "case C3 failed: transport error: connection reset");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationFailure {
    /// The case whose write failed.
    pub case_reference: CaseReference,
    /// Why it failed.
    pub reason: String,
}

fn describe(failures: &[PropagationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PropagationFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(case_reference: CaseReference, reason: impl Into<String>) -> Self {
        Self {
            case_reference,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PropagationFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "case {} failed: {}",
            self.case_reference, self.reason
        )
    }
}
