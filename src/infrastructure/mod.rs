//! Infrastructure layer: adapters, configuration and process wiring.
//!
//! - [`case_store`] - HTTP adapter for cases and multiples
//! - [`in_memory`] - in-memory stores with scripted failures
//! - [`update_queue`] - SQS and in-memory durable queues
//! - [`config`] - environment configuration
//! - [`telemetry`] - tracing subscriber setup
//! - [`dependencies`] - the dependency container

pub mod case_store;
pub mod config;
pub mod dependencies;
pub mod in_memory;
pub mod telemetry;
pub mod update_queue;

pub use case_store::HttpCaseStore;
pub use config::{AppConfig, ConfigError, LogFormat};
pub use dependencies::AppDependencies;
pub use in_memory::{DEFAULT_OFFICE_PREFIX, InMemoryCaseStore, InMemoryMultipleStore};
pub use telemetry::{DEFAULT_FILTER, init_tracing};
pub use update_queue::{InMemoryUpdateQueue, SqsUpdateQueue};
