//! Request and response bodies.
//!
//! Requests deserialize straight into domain types; references are validated
//! on the way in, so an empty reference is rejected by the JSON extractor.

use serde::{Deserialize, Serialize};

use crate::application::{BulkCreation, BulkUpdate, PropagationMode, RoundOutcome, RoundStatus};
use crate::domain::{CaseReference, FieldEdits, MultipleCase, MultipleReference, PropagationFailure};

/// Body of `POST /multiples/bulk-create`.
///
/// # Example JSON
///
/// ```json
/// {
///     "multiple": { "name": "Acme Ltd claims" },
///     "requested": ["1800001/2024"],
///     "matched": ["1800002/2024", "1800003/2024"],
///     "mode": "synchronous_fan_out"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkCreateRequest {
    /// The multiple in progress; without a reference one is allocated.
    pub multiple: MultipleCase,
    /// Cases listed explicitly.
    #[serde(default)]
    pub requested: Vec<CaseReference>,
    /// Cases matched by the caller's search.
    #[serde(default)]
    pub matched: Vec<CaseReference>,
    /// Propagation mode.
    #[serde(default)]
    pub mode: PropagationMode,
}

impl From<BulkCreateRequest> for BulkCreation {
    fn from(request: BulkCreateRequest) -> Self {
        Self {
            multiple: request.multiple,
            requested: request.requested,
            matched: request.matched,
            mode: request.mode,
        }
    }
}

/// Body of `POST /multiples/bulk-update`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkUpdateRequest {
    /// The multiple as the caller last read it.
    pub multiple: MultipleCase,
    /// Requested membership.
    #[serde(default)]
    pub requested: Vec<CaseReference>,
    /// Cases receiving the edits.
    #[serde(default)]
    pub matched: Vec<CaseReference>,
    /// Field values to write.
    #[serde(default)]
    pub field_edits: FieldEdits,
    /// Move the matched cases into this multiple.
    #[serde(default)]
    pub target_reference: Option<MultipleReference>,
    /// Sub-group tag for the matched cases.
    #[serde(default)]
    pub sub_group: Option<String>,
    /// Propagation mode.
    #[serde(default)]
    pub mode: PropagationMode,
}

impl From<BulkUpdateRequest> for BulkUpdate {
    fn from(request: BulkUpdateRequest) -> Self {
        Self {
            multiple: request.multiple,
            requested: request.requested,
            matched: request.matched,
            field_edits: request.field_edits,
            target_reference: request.target_reference,
            sub_group: request.sub_group,
            mode: request.mode,
        }
    }
}

/// Response of both bulk endpoints.
///
/// # Example JSON
///
/// ```json
/// {
///     "status": "partial",
///     "failed": 1,
///     "multiple": { "reference": "6000001", "name": "Acme Ltd claims", "...": "..." },
///     "moved_to": null,
///     "failures": [{ "case_reference": "1800003/2024", "reason": "not found" }],
///     "mode": "synchronous_fan_out",
///     "enqueued_jobs": 0
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResponse {
    /// `complete` or `partial`.
    #[serde(flatten)]
    pub status: RoundStatus,
    /// The committed multiple.
    pub multiple: MultipleCase,
    /// The committed move target.
    pub moved_to: Option<MultipleCase>,
    /// Per-case failures.
    pub failures: Vec<PropagationFailure>,
    /// How writes were propagated.
    pub mode: PropagationMode,
    /// Jobs acknowledged by the durable queue.
    pub enqueued_jobs: usize,
}

impl From<RoundOutcome> for RoundResponse {
    fn from(outcome: RoundOutcome) -> Self {
        Self {
            status: outcome.status(),
            multiple: outcome.multiple,
            moved_to: outcome.moved_to,
            failures: outcome.failures,
            mode: outcome.mode,
            enqueued_jobs: outcome.enqueued_jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn create_request_defaults_lists_and_mode() {
        let request: BulkCreateRequest =
            serde_json::from_value(json!({ "multiple": { "name": "Acme" } })).unwrap();

        assert!(request.requested.is_empty());
        assert!(request.matched.is_empty());
        assert_eq!(request.mode, PropagationMode::SynchronousFanOut);
    }

    #[rstest]
    fn create_request_rejects_blank_reference() {
        let result = serde_json::from_value::<BulkCreateRequest>(json!({
            "multiple": { "name": "Acme" },
            "requested": ["  "],
        }));

        assert!(result.is_err());
    }

    #[rstest]
    fn update_request_reads_target_and_edits() {
        let request: BulkUpdateRequest = serde_json::from_value(json!({
            "multiple": { "reference": "6000001", "name": "Acme" },
            "matched": ["A"],
            "field_edits": { "hearing_stage": "listed" },
            "target_reference": "6000002",
            "mode": "durable_queue",
        }))
        .unwrap();
        let update = BulkUpdate::from(request);

        assert_eq!(update.target_reference.unwrap().as_str(), "6000002");
        assert_eq!(update.field_edits.len(), 1);
        assert_eq!(update.mode, PropagationMode::DurableQueue);
    }

    #[rstest]
    fn partial_response_flattens_status() {
        let response = RoundResponse {
            status: RoundStatus::Partial { failed: 1 },
            multiple: MultipleCase::new("Acme"),
            moved_to: None,
            failures: vec![PropagationFailure::new(
                CaseReference::new("C").unwrap(),
                "not found",
            )],
            mode: PropagationMode::SynchronousFanOut,
            enqueued_jobs: 0,
        };

        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["status"], "partial");
        assert_eq!(value["failed"], 1);
        assert_eq!(value["failures"][0]["reason"], "not found");
    }
}
