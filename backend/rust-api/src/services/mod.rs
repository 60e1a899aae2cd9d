use anyhow::Context;
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::store::{AttemptStore, InMemoryAttemptStore, MongoAttemptStore};
use crate::utils::{Clock, SystemClock};

pub mod attempt_service;
pub mod locks;
pub mod progress;
pub mod scoring;
pub mod time_guard;

pub use attempt_service::{AttemptService, RecoveryReport};
pub use progress::{ProgressPublisher, ProgressSubscription};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AttemptStore>,
    pub publisher: Arc<ProgressPublisher>,
    pub attempts: AttemptService,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn AttemptStore> = match config.store_backend {
            StoreBackend::Mongo => {
                tracing::info!("Connecting to MongoDB database '{}'", config.mongo_database);
                let store = MongoAttemptStore::connect(&config.mongo_uri, &config.mongo_database)
                    .await
                    .context("Failed to connect to MongoDB")?;
                store
                    .ensure_indexes()
                    .await
                    .context("Failed to create MongoDB indexes")?;
                tracing::info!("MongoDB attempt store ready");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                let store = match &config.tests_seed_path {
                    Some(path) => InMemoryAttemptStore::from_seed_file(path)
                        .with_context(|| format!("Failed to seed tests from {}", path))?,
                    None => InMemoryAttemptStore::new(),
                };
                tracing::warn!("Using in-memory attempt store, attempts are lost on restart");
                Arc::new(store)
            }
        };

        Ok(Self::with_store(config, store, Arc::new(SystemClock)))
    }

    /// Wires the engine over an existing store and clock.
    pub fn with_store(config: Config, store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>) -> Self {
        let publisher = ProgressPublisher::start(config.events_channel_capacity);
        let attempts = AttemptService::new(
            store.clone(),
            clock,
            publisher.clone(),
            config.store_timeout(),
        );

        Self {
            config,
            store,
            publisher,
            attempts,
        }
    }
}
