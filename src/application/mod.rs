//! Application layer: the coordination core.
//!
//! - [`membership`] - classifies proposed members against current ones
//! - [`lead`] - elects the lead case
//! - [`fan_out`] - bounded, retrying, concurrent case writes
//! - [`propagation`] - chooses between fan-out and the durable queue
//! - [`creation`] - bulk creation rounds
//! - [`update`] - bulk update rounds
//! - [`ports`] - traits for the external stores and the queue
//!
//! Coordinators never fail a round because a single case write failed; such
//! failures are returned in the [`RoundOutcome`] next to the committed
//! multiple.

pub mod creation;
pub mod errors;
pub mod fan_out;
pub mod lead;
pub mod membership;
pub mod ports;
pub mod propagation;
mod round;
pub mod update;

pub use creation::{BulkCreation, BulkCreationCoordinator, CreationStage};
pub use errors::CoordinationError;
pub use fan_out::{FanOutError, FanOutExecutor, FanOutItem, FanOutReport, RetryPolicy};
pub use lead::{RoundKind, elect_lead};
pub use membership::{MembershipDelta, ordered_union, resolve_membership};
pub use ports::{
    CaseScope, CaseStoreClient, CaseStoreError, DurableUpdateQueue, MultipleStore,
    MultipleStoreError, QueueAck, QueueError, SearchCriteria,
};
pub use propagation::{
    PropagationMode, PropagationOutcome, PropagationPlan, Propagator, build_jobs,
};
pub use round::{RoundOutcome, RoundStatus};
pub use update::{BulkUpdate, BulkUpdateCoordinator};
