//! # multiples-sync
//!
//! Keeps a *multiple* (a grouping record over many independently-owned case
//! records) consistent with its member cases.
//!
//! A bulk round computes the membership delta, elects a lead case, writes the
//! resulting change sets to every affected case (through a bounded, retrying
//! fan-out or a durable update queue) and only then commits the multiple
//! under compare-and-swap.
//!
//! ## Layers
//!
//! - [`domain`]: references, cases, change sets, update jobs
//! - [`application`]: membership resolution, lead election, fan-out,
//!   propagation and the two coordinators
//! - [`infrastructure`]: store and queue adapters, configuration, tracing
//! - [`api`]: the HTTP surface
//!
//! ## Example
//!
//! ```rust
//! use multiples_sync::application::{RoundKind, elect_lead, resolve_membership};
//! use multiples_sync::domain::CaseReference;
//!
//! let a = CaseReference::new("A").unwrap();
//! let b = CaseReference::new("B").unwrap();
//! let c = CaseReference::new("C").unwrap();
//!
//! let delta = resolve_membership(&[a.clone(), b.clone()], &[b.clone()], &[c.clone()]);
//! assert_eq!(delta.to_detach, vec![a.clone()]);
//! assert_eq!(delta.proposed, vec![b.clone(), c]);
//!
//! let lead = elect_lead(&delta.proposed, Some(&a), RoundKind::MembershipChange);
//! assert_eq!(lead, Some(b));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod api;
pub mod application;
pub mod domain;
pub mod infrastructure;
