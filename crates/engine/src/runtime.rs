//! Service wiring: store, queues, worker pools and the scheduler.

use std::sync::Arc;

use axum::Router;
use tracing::{info, warn};

use rigger_infra::processors::{
    ComplianceProcessor, MatchingProcessor, NotificationProcessor, Notifier, PaymentProcessor,
    Processor, ProcessorContext,
};
use rigger_infra::queue::{
    InMemoryTaskStore, QueueError, QueueName, QueueService, WorkerConfig, WorkerPool,
    WorkerPoolHandle, WorkerStats,
};
use rigger_infra::scheduler::{SchedulerError, SchedulerHandle, SchedulerService, SchedulerSettings};
use rigger_infra::store::{
    InMemoryMarketplaceStore, MarketplaceStore, PostgresMarketplaceStore, StoreError,
};
use rigger_infra::{Clock, EngineConfig};

use crate::app::{AppState, build_app};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Postgres when `DATABASE_URL` is set (tables created if missing), otherwise
/// an empty in-memory store.
pub async fn connect_store(
    config: &EngineConfig,
) -> Result<Arc<dyn MarketplaceStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store =
                PostgresMarketplaceStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            info!("connected to postgres");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory marketplace store");
            Ok(InMemoryMarketplaceStore::arc())
        }
    }
}

/// A running engine: one worker pool per queue plus the scheduler loop.
pub struct Engine {
    state: Arc<AppState>,
    pools: Vec<WorkerPoolHandle>,
    scheduler: SchedulerHandle,
}

impl Engine {
    pub async fn start(
        config: &EngineConfig,
        store: Arc<dyn MarketplaceStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let queues = QueueService::new(InMemoryTaskStore::arc(), clock.clone());
        let cleaned = queues.clean_all().await?;
        info!(cleaned, "queues cleaned at startup");

        let settings = SchedulerSettings {
            memory_threshold_bytes: config.memory_threshold_bytes(),
            ..SchedulerSettings::default()
        };
        let scheduler =
            SchedulerService::new(store.clone(), queues.clone(), clock.clone(), settings)?;

        let ctx = ProcessorContext::new(store.clone(), queues.clone(), clock.clone());
        let processors: Vec<Arc<dyn Processor>> = vec![
            Arc::new(MatchingProcessor::new(ctx.clone())),
            Arc::new(NotificationProcessor::new(ctx.clone(), notifier)),
            Arc::new(PaymentProcessor::new(ctx.clone())),
            Arc::new(ComplianceProcessor::new(ctx)),
        ];
        let worker_config = WorkerConfig {
            poll_interval: config.poll_interval,
            stall_timeout: config.stall_timeout,
        };
        let pools = processors
            .into_iter()
            .map(|processor| WorkerPool::spawn(queues.clone(), processor, worker_config))
            .collect();

        let scheduler = Arc::new(scheduler).spawn();
        info!("automation engine started");

        Ok(Self {
            state: Arc::new(AppState::new(store, queues, clock)),
            pools,
            scheduler,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        build_app(self.state.clone())
    }

    pub fn worker_stats(&self) -> Vec<(QueueName, WorkerStats)> {
        self.pools.iter().map(|p| (p.queue(), p.stats())).collect()
    }

    /// Stop the scheduler, then drain every worker pool.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        for pool in self.pools {
            pool.shutdown().await;
        }
        info!("automation engine stopped");
    }
}
