use std::sync::Arc;
use std::time::Duration;
use tcc_config::{validate_config, AppConfig, LoggingConfig};
use tcc_metrics::{init_tracing, TracingError};
use tcc_repository::{
    EventPublisher, ParticipantCache, SerializerRegistry, StoreRegistry, TransactionRepository,
    TransactionStore,
};
use tracing::{error, info, warn};

use crate::error::InitializationError;
use crate::executor::InvocationExecutor;
use crate::lifecycle::{PipelineCloser, Registry, ShutdownHook, StoreCloser};
use crate::recovery::RecoveryScheduler;

/// Slack on top of the pipeline drain timeout before a close is abandoned
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Install the global tracing subscriber described by `config`
pub fn init_logging(config: &LoggingConfig) -> Result<(), TracingError> {
    init_tracing(&config.level, config.json)
}

/// A running coordinator: store, event pipeline, participant cache,
/// repository and recovery scheduler, wired together and registered for
/// lookup and shutdown.
pub struct Coordinator {
    config: AppConfig,
    registry: Registry,
    shutdown: ShutdownHook,
    repository: TransactionRepository,
    scheduler: Arc<RecoveryScheduler>,
}

impl Coordinator {
    /// Start with the built-in stores and serializers
    pub async fn start(
        config: AppConfig,
        executor: Arc<dyn InvocationExecutor>,
    ) -> Result<Self, InitializationError> {
        Self::start_with(
            config,
            executor,
            &StoreRegistry::with_defaults(),
            &SerializerRegistry::with_defaults(),
        )
        .await
    }

    /// Start with caller-supplied store and serializer registries.
    ///
    /// On error, whatever was already started is closed again before returning.
    pub async fn start_with(
        config: AppConfig,
        executor: Arc<dyn InvocationExecutor>,
        stores: &StoreRegistry,
        serializers: &SerializerRegistry,
    ) -> Result<Self, InitializationError> {
        validate_config(&config)?;

        let repository_config = &config.repository;
        let serializer = serializers.create(&repository_config.serializer).ok_or_else(|| {
            InitializationError::UnknownSerializer {
                name: repository_config.serializer.clone(),
                available: serializers.names().join(", "),
            }
        })?;
        let mut store = stores.create(&repository_config.kind).ok_or_else(|| {
            InitializationError::UnknownRepository {
                name: repository_config.kind.clone(),
                available: stores.names().join(", "),
            }
        })?;

        store.set_serializer(serializer.clone());
        if let Err(e) = store.init(repository_config).await {
            error!(
                repository = %repository_config.kind,
                error = %e,
                "Store initialization failed"
            );
            if let Err(close_err) = store.close().await {
                warn!(
                    repository = %repository_config.kind,
                    error = %close_err,
                    "Failed to close store after initialization failure"
                );
            }
            return Err(e.into());
        }
        let store: Arc<dyn TransactionStore> = Arc::from(store);

        let cache = Arc::new(ParticipantCache::new(store.clone(), config.cache.max_entries));
        let publisher = Arc::new(EventPublisher::start(store.clone(), &config.pipeline));
        let repository = TransactionRepository::new(store.clone(), publisher.clone(), cache.clone());
        let scheduler = Arc::new(RecoveryScheduler::new(
            repository.clone(),
            executor,
            config.recovery.clone(),
        ));

        let drain_timeout = config.pipeline.drain_timeout();
        let shutdown = ShutdownHook::new(drain_timeout + CLOSE_GRACE);
        shutdown.register(scheduler.clone());
        shutdown.register(Arc::new(PipelineCloser::new(publisher.clone(), drain_timeout)));
        shutdown.register(Arc::new(StoreCloser::new(store.clone())));

        let registry = Registry::new();
        let registered = registry
            .register(Arc::new(config.clone()))
            .and_then(|_| registry.register(cache))
            .and_then(|_| registry.register(publisher))
            .and_then(|_| registry.register(Arc::new(repository.clone())))
            .and_then(|_| registry.register(scheduler.clone()));
        if let Err(e) = registered {
            shutdown.close_all().await;
            return Err(e.into());
        }

        scheduler.start();

        info!(
            repository = %store.name(),
            serializer = %serializer.name(),
            consumers = config.pipeline.consumer_threads,
            cache_entries = config.cache.max_entries,
            "Coordinator started"
        );

        Ok(Self {
            config,
            registry,
            shutdown,
            repository,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn repository(&self) -> &TransactionRepository {
        &self.repository
    }

    pub fn scheduler(&self) -> &Arc<RecoveryScheduler> {
        &self.scheduler
    }

    /// Stop recovery, drain the pipeline and close the store, in that order.
    /// Returns the components that did not close cleanly.
    pub async fn shutdown(&self) -> Vec<String> {
        info!("Coordinator shutting down");
        let failed = self.shutdown.close_all().await;
        if failed.is_empty() {
            info!("Coordinator stopped");
        } else {
            error!(failed = ?failed, "Coordinator stopped with errors");
        }
        failed
    }

    /// Block until Ctrl-C, then shut down
    pub async fn run_until_shutdown_signal(self) -> Vec<String> {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        self.shutdown().await
    }
}
