//! Wires C1-C9 together into one process: an in-memory KV backend, the
//! advisory lock manager, the Four-Phase Executor, the per-user Scheduler,
//! and the Side-Effect Gateway, all behind one `AppState` the HTTP layer
//! shares across requests (spec §5 "the only mutable process-wide state is
//! the Scheduler's in-memory per-user task table and connection pools").

use std::sync::Arc;

use vf_core::clock::{system_clock, SharedClock};
use vf_core::config::Config;
use vf_engine::asset_alloc::AssetIdAllocator;
use vf_engine::executor::FourPhaseExecutor;
use vf_engine::failpoint::FailpointRegistry;
use vf_engine::store::Store;
use vf_gateway::{Gateway, LoggingEmailSender, LoggingPushSender, LoggingSmsSender};
use vf_harness::circuit_breaker::CircuitBreakerConfig;
use vf_harness::shutdown::ShutdownSignal;
use vf_kv::InMemoryKv;
use vf_lock::LockManager;
use vf_scheduler::Scheduler;

pub struct AppState {
    pub config: Config,
    pub store: Arc<Store<InMemoryKv>>,
    pub allocator: Arc<AssetIdAllocator<InMemoryKv>>,
    pub scheduler: Arc<Scheduler<InMemoryKv>>,
    pub gateway: Arc<Gateway>,
    pub clock: SharedClock,
    pub shutdown: ShutdownSignal,
}

impl AppState {
    /// Builds the service graph from `config`, then spawns the Scheduler's
    /// worker pool. A fresh `InMemoryKv` is the only backend this
    /// repository ships (spec §10.7 non-goal: no production DynamoDB
    /// driver); `config.kv.backend` is read only to log a warning if a
    /// caller asked for something else.
    pub fn new(config: Config, worker_count: usize) -> Arc<Self> {
        if config.kv.backend != "memory" {
            tracing::warn!(backend = %config.kv.backend, "only the in-memory KV backend is implemented, ignoring configured backend");
        }

        let kv = Arc::new(InMemoryKv::new());
        let clock = system_clock();
        let store = Arc::new(Store::new(kv.clone()));
        let lock_manager = Arc::new(LockManager::new(
            kv,
            clock.clone(),
            config.lock.abandonment_secs,
            config.lock.lock_renewal_secs,
        ));
        let executor = Arc::new(FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new())));
        let allocator = Arc::new(AssetIdAllocator::new(store.clone()));
        let scheduler = Scheduler::new(store.clone(), lock_manager, executor, clock.clone(), config.scheduler.clone());
        scheduler.spawn_workers(worker_count);

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.gateway.circuit_failure_threshold,
            timeout: std::time::Duration::from_secs(config.gateway.circuit_reset_secs),
            ..CircuitBreakerConfig::default()
        };
        if config.gateway.backend != "logging" {
            tracing::warn!(backend = %config.gateway.backend, "only the logging gateway backend is implemented, ignoring configured backend");
        }
        let gateway = Arc::new(Gateway::with_config(
            Arc::new(LoggingPushSender::new()),
            Arc::new(LoggingEmailSender::new()),
            Arc::new(LoggingSmsSender::new()),
            breaker_config,
        ));

        Arc::new(AppState {
            config,
            store,
            allocator,
            scheduler,
            gateway,
            clock,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Startup orphan scan (spec §4.4): picks up work left behind by a
    /// crashed host before this process starts serving requests.
    pub async fn scan_for_orphans(&self) {
        if !self.config.scheduler.scan_ops_on_startup {
            return;
        }
        match self.scheduler.scan_for_orphans().await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(users = count, "startup orphan scan enqueued pending work");
                }
            }
            Err(e) => tracing::warn!(error = %e, "startup orphan scan failed"),
        }
    }
}
