//! Shared fixtures for the integration tests.
//!
//! Every harness runs against the in-memory adapters; the test keeps clones
//! of the stores and the queue to inspect what a round wrote.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use multiples_sync::application::RetryPolicy;
use multiples_sync::domain::{
    CaseReference, MemberEntry, MultipleCase, MultipleReference, SingleCase,
};
use multiples_sync::infrastructure::{
    AppConfig, AppDependencies, InMemoryCaseStore, InMemoryMultipleStore, InMemoryUpdateQueue,
};

pub fn reference(value: &str) -> CaseReference {
    CaseReference::new(value).unwrap()
}

pub fn refs(values: &[&str]) -> Vec<CaseReference> {
    values.iter().map(|value| reference(value)).collect()
}

pub fn multiple_reference(value: &str) -> MultipleReference {
    MultipleReference::new(value).unwrap()
}

/// Small pool, two attempts, millisecond backoff.
pub fn test_config() -> AppConfig {
    AppConfig {
        fan_out_workers: 4,
        retry: RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        },
        ..AppConfig::default()
    }
}

/// In-memory adapters wired into one dependency container.
pub struct Harness {
    pub cases: InMemoryCaseStore,
    pub multiples: InMemoryMultipleStore,
    pub queue: InMemoryUpdateQueue,
    pub dependencies: AppDependencies,
}

impl Harness {
    /// Creates a harness whose case store holds ungrouped `cases`.
    pub fn with_cases(cases: &[&str]) -> Self {
        Self::with_config(test_config(), cases)
    }

    pub fn with_config(config: AppConfig, cases: &[&str]) -> Self {
        let case_store =
            InMemoryCaseStore::with_cases(cases.iter().map(|value| SingleCase::new(reference(value))));
        let multiples = InMemoryMultipleStore::new();
        let queue = InMemoryUpdateQueue::new();
        let dependencies = AppDependencies::new(
            config,
            Arc::new(case_store.clone()),
            Arc::new(multiples.clone()),
            Arc::new(queue.clone()),
        )
        .unwrap();
        Self {
            cases: case_store,
            multiples,
            queue,
            dependencies,
        }
    }

    /// Stores a multiple whose members are `members` (the first one leads) and
    /// attaches the member cases to it. Returns the stored record.
    pub fn seed_multiple(&self, reference_value: &str, members: &[&str]) -> MultipleCase {
        let multiple_reference = multiple_reference(reference_value);
        let entries = members
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let entry = MemberEntry::new(reference(value));
                if index == 0 { entry.as_lead() } else { entry }
            })
            .collect();
        for (index, value) in members.iter().enumerate() {
            let mut case = SingleCase::new(reference(value)).in_multiple(multiple_reference.clone());
            case.lead_claimant = index == 0;
            self.cases.insert(case);
        }
        self.multiples
            .seed(
                MultipleCase::new(format!("Multiple {reference_value}"))
                    .with_reference(multiple_reference)
                    .with_members(entries),
            )
            .unwrap()
    }

    pub fn case(&self, value: &str) -> SingleCase {
        self.cases.case(&reference(value)).unwrap()
    }

    /// Member references of `multiple`, flagging the lead with `*`.
    pub fn describe(multiple: &MultipleCase) -> Vec<String> {
        multiple
            .members()
            .iter()
            .map(|member| {
                if member.lead {
                    format!("{}*", member.case_reference)
                } else {
                    member.case_reference.to_string()
                }
            })
            .collect()
    }
}
