//! Domain layer for the multiples synchronization engine.
//!
//! Plain data and pure functions only: no I/O and no async.
//!
//! # Structure
//!
//! - [`references`] - validated case and multiple references
//! - [`single`] - the single case record as this engine sees it
//! - [`multiple`] - the multiple (grouping record) and its members
//! - [`change_set`] - idempotent writes proposed against single cases
//! - [`update_job`] - batches of writes handed to the durable queue
//! - [`errors`] - validation errors and per-case failure values

pub mod change_set;
pub mod errors;
pub mod multiple;
pub mod references;
pub mod single;
pub mod update_job;

pub use change_set::{ChangeSet, FieldEdits, MembershipChange};
pub use errors::{PropagationFailure, ValidationError};
pub use multiple::{MemberEntry, MultipleCase};
pub use references::{CaseReference, MultipleReference};
pub use single::{CaseStatus, SingleCase};
pub use update_job::UpdateJob;
