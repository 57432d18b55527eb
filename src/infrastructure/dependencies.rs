//! Dependency container.
//!
//! [`AppDependencies`] owns the adapters and the process-wide
//! [`FanOutExecutor`]. Every coordinator it hands out shares that one
//! executor, so the fan-out bound holds across concurrent rounds.
//!
//! # Example
//!
//! ```rust,ignore
//! use multiples_sync::infrastructure::{AppConfig, AppDependencies};
//!
//! let dependencies = AppDependencies::connect(AppConfig::from_env()?).await?;
//! let outcome = dependencies.creation_coordinator().create_bulk(request).await?;
//! ```

use std::fmt;
use std::sync::Arc;

use super::case_store::HttpCaseStore;
use super::config::AppConfig;
use super::in_memory::{InMemoryCaseStore, InMemoryMultipleStore};
use super::update_queue::{InMemoryUpdateQueue, SqsUpdateQueue};
use crate::application::{
    BulkCreationCoordinator, BulkUpdateCoordinator, CaseStoreClient, DurableUpdateQueue,
    FanOutError, FanOutExecutor, MultipleStore, Propagator,
};

/// Application dependency container.
#[derive(Clone)]
pub struct AppDependencies {
    config: AppConfig,
    case_store: Arc<dyn CaseStoreClient>,
    multiples: Arc<dyn MultipleStore>,
    update_queue: Arc<dyn DurableUpdateQueue>,
    executor: FanOutExecutor,
}

impl fmt::Debug for AppDependencies {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppDependencies")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl AppDependencies {
    /// Creates a container around the given adapters.
    ///
    /// # Errors
    ///
    /// Returns [`FanOutError`] if the configured pool size or retry policy
    /// is invalid.
    pub fn new(
        config: AppConfig,
        case_store: Arc<dyn CaseStoreClient>,
        multiples: Arc<dyn MultipleStore>,
        update_queue: Arc<dyn DurableUpdateQueue>,
    ) -> Result<Self, FanOutError> {
        let executor = FanOutExecutor::try_new(
            Arc::clone(&case_store),
            config.scope.single_case_type_id.clone(),
            config.fan_out_workers,
            config.retry,
        )?;
        Ok(Self {
            config,
            case_store,
            multiples,
            update_queue,
            executor,
        })
    }

    /// Creates a container with in-memory stores and queue.
    ///
    /// # Errors
    ///
    /// Returns [`FanOutError`] if the configured pool size or retry policy
    /// is invalid.
    pub fn in_memory(config: AppConfig) -> Result<Self, FanOutError> {
        Self::new(
            config,
            Arc::new(InMemoryCaseStore::new()),
            Arc::new(InMemoryMultipleStore::new()),
            Arc::new(InMemoryUpdateQueue::new()),
        )
    }

    /// Creates a container from configuration: the HTTP store when
    /// `case_store_url` is set and SQS when `sqs_update_queue_url` is set,
    /// in-memory adapters otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`FanOutError`] if the configured pool size or retry policy
    /// is invalid.
    pub async fn connect(config: AppConfig) -> Result<Self, FanOutError> {
        let (case_store, multiples): (Arc<dyn CaseStoreClient>, Arc<dyn MultipleStore>) =
            match config.case_store_url.as_deref() {
                Some(url) => {
                    tracing::info!(case_store_url = %url, "using HTTP case store");
                    let store = Arc::new(HttpCaseStore::new(url, config.case_store_timeout));
                    let case_store: Arc<dyn CaseStoreClient> = store.clone();
                    let multiples: Arc<dyn MultipleStore> = store;
                    (case_store, multiples)
                }
                None => {
                    tracing::warn!("CASE_STORE_URL not set, using in-memory case store");
                    let case_store: Arc<dyn CaseStoreClient> = Arc::new(InMemoryCaseStore::new());
                    let multiples: Arc<dyn MultipleStore> = Arc::new(InMemoryMultipleStore::new());
                    (case_store, multiples)
                }
            };

        let update_queue: Arc<dyn DurableUpdateQueue> = match config.sqs_update_queue_url.as_deref()
        {
            Some(queue_url) => {
                tracing::info!(queue_url = %queue_url, "using SQS update queue");
                Arc::new(SqsUpdateQueue::connect(config.sqs_endpoint.as_deref(), queue_url).await)
            }
            None => {
                tracing::warn!("SQS_UPDATE_QUEUE_URL not set, using in-memory update queue");
                Arc::new(InMemoryUpdateQueue::new())
            }
        };

        Self::new(config, case_store, multiples, update_queue)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the case store.
    #[must_use]
    pub fn case_store(&self) -> &Arc<dyn CaseStoreClient> {
        &self.case_store
    }

    /// Returns the multiple store.
    #[must_use]
    pub fn multiples(&self) -> &Arc<dyn MultipleStore> {
        &self.multiples
    }

    /// Returns the shared executor.
    #[must_use]
    pub const fn executor(&self) -> &FanOutExecutor {
        &self.executor
    }

    /// Builds a propagator over the shared executor.
    #[must_use]
    pub fn propagator(&self) -> Propagator {
        Propagator::new(
            self.executor.clone(),
            Arc::clone(&self.update_queue),
            self.config.queue_batch_size,
        )
    }

    /// Builds a creation coordinator.
    #[must_use]
    pub fn creation_coordinator(&self) -> BulkCreationCoordinator {
        BulkCreationCoordinator::new(
            self.config.scope.clone(),
            Arc::clone(&self.case_store),
            Arc::clone(&self.multiples),
            self.propagator(),
        )
    }

    /// Builds an update coordinator.
    #[must_use]
    pub fn update_coordinator(&self) -> BulkUpdateCoordinator {
        BulkUpdateCoordinator::new(
            self.config.scope.clone(),
            Arc::clone(&self.case_store),
            Arc::clone(&self.multiples),
            self.propagator(),
        )
    }
}
