use std::sync::Arc;
use std::time::Duration;

use super::runtime::{EnrichmentWorker, WorkerConfig};
use crate::enrich::Enricher;
use crate::retry::RetryPolicy;
use crate::store::{EntityStore, StoreError};

/// Builder for configuring an EnrichmentWorker.
pub struct WorkerBuilder<S: EntityStore, E: Enricher> {
    store: Arc<S>,
    enricher: E,
    config: WorkerConfig,
}

impl<S: EntityStore + 'static, E: Enricher + 'static> WorkerBuilder<S, E> {
    /// Create a builder for a worker that runs `enricher` against `store`.
    pub fn new(store: Arc<S>, enricher: E) -> Self {
        Self {
            store,
            enricher,
            config: WorkerConfig::default(),
        }
    }

    /// Set the reconciliation sweep interval. Defaults to 60 seconds.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set whether to sweep once before listening. Defaults to false.
    pub fn run_on_start(mut self, run: bool) -> Self {
        self.config.run_on_start = run;
        self
    }

    /// Set the maximum items handled per sweep. Defaults to 50.
    pub fn sweep_batch(mut self, batch: usize) -> Self {
        self.config.sweep_batch = batch.max(1);
        self
    }

    /// Set the inline retry policy for retryable lookup failures.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Stop sweeping items that already failed this many times.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = Some(attempts);
        self
    }

    /// Build the worker.
    ///
    /// The subscription is opened here, so notifications published between
    /// `build` and `run` are still delivered.
    pub fn build(self) -> Result<EnrichmentWorker<S, E>, StoreError> {
        let capability = self.enricher.capability();
        let entity = self
            .store
            .triggers()
            .entity_for(capability)
            .ok_or_else(|| StoreError::UnknownCapability(capability.to_string()))?;

        let subscription = self.store.bus().subscribe(&[entity.topic()]);

        Ok(EnrichmentWorker::new(
            self.store,
            self.enricher,
            subscription,
            self.config,
        ))
    }
}
