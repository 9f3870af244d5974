//! Worker loop: bus listener plus a concurrently running reconciliation sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bus::Subscription;
use crate::enrich::{EnrichError, Enricher, Enrichment, WorkItem};
use crate::retry::RetryPolicy;
use crate::store::{EntityStore, StoreError};
use crate::workflow::Capability;

#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub sweep_interval: Duration,
    pub sweep_batch: usize,
    pub run_on_start: bool,
    pub retry: RetryPolicy,
    pub max_attempts: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 50,
            run_on_start: false,
            retry: RetryPolicy::none(),
            max_attempts: None,
        }
    }
}

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Lookup succeeded and the result was written back.
    Completed,
    /// The capability was already done; no lookup was made.
    AlreadyDone,
    /// Lookup failed permanently or ran out of retries. The failure is
    /// recorded and the sweep will offer the item again.
    Failed { attempts: u32, error: String },
}

/// Runs one enricher against the store.
pub struct EnrichmentWorker<S: EntityStore, E: Enricher> {
    core: Arc<WorkerCore<S, E>>,
    subscription: Subscription,
}

/// State shared by the listener and the sweep task.
struct WorkerCore<S: EntityStore, E: Enricher> {
    store: Arc<S>,
    enricher: E,
    config: WorkerConfig,
}

/// Aborts the sweep task when the listener stops or is dropped.
struct SweepTask(JoinHandle<()>);

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<S: EntityStore + 'static, E: Enricher + 'static> EnrichmentWorker<S, E> {
    pub(crate) fn new(
        store: Arc<S>,
        enricher: E,
        subscription: Subscription,
        config: WorkerConfig,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore {
                store,
                enricher,
                config,
            }),
            subscription,
        }
    }

    pub fn capability(&self) -> Capability {
        self.core.enricher.capability()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.core.store
    }

    /// Listen until the bus closes. The sweep runs on its own task, so a
    /// slow lookup on one side never stalls the other.
    pub async fn run(mut self) {
        let capability = self.capability();
        info!(
            worker = self.core.enricher.name(),
            capability = %capability,
            sweep_interval_secs = self.core.config.sweep_interval.as_secs(),
            run_on_start = self.core.config.run_on_start,
            "Starting enrichment worker"
        );

        let core = self.core.clone();
        let _sweeper = SweepTask(tokio::spawn(async move { core.run_sweeps().await }));

        while let Some(notification) = self.subscription.recv().await {
            let item = WorkItem::from_notification(capability, notification);
            if let Err(e) = self.core.process(&item).await {
                error!(
                    capability = %capability,
                    error = %e,
                    "Failed to process notification"
                );
            }
        }
        info!(capability = %capability, "Bus closed, stopping worker");
    }

    /// Run one reconciliation sweep. Returns how many items were handled.
    pub async fn sweep(&self) -> usize {
        self.core.sweep().await
    }

    /// Handle one work item.
    ///
    /// Payloads are snapshots, so the workflow record is re-fetched first and
    /// the lookup is skipped if another worker already finished it.
    pub async fn process(&self, item: &WorkItem) -> Result<ProcessOutcome, StoreError> {
        self.core.process(item).await
    }
}

impl<S: EntityStore + 'static, E: Enricher + 'static> WorkerCore<S, E> {
    async fn run_sweeps(&self) {
        if self.config.run_on_start {
            self.sweep().await;
        }

        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Consume immediate first tick

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) -> usize {
        let capability = self.enricher.capability();
        debug!(capability = %capability, "Sweeping for pending work");

        let items = match self
            .store
            .pending(capability, self.config.sweep_batch, self.config.max_attempts)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                error!(capability = %capability, error = %e, "Reconciliation query failed");
                return 0;
            }
        };

        if items.is_empty() {
            debug!(capability = %capability, "No pending work");
            return 0;
        }

        info!(
            capability = %capability,
            count = items.len(),
            "Reconciling pending work"
        );

        let mut handled = 0;
        for item in &items {
            match self.process(item).await {
                Ok(_) => handled += 1,
                Err(e) => error!(
                    capability = %capability,
                    error = %e,
                    "Failed to process pending item"
                ),
            }
        }
        handled
    }

    async fn process(&self, item: &WorkItem) -> Result<ProcessOutcome, StoreError> {
        let capability = self.enricher.capability();

        if let Some(workflow_id) = item.workflow_id {
            match self.store.workflow(workflow_id).await? {
                Some(state) if state.is_done(capability) => {
                    debug!(
                        workflow_id = %workflow_id,
                        capability = %capability,
                        "Already done, skipping"
                    );
                    return Ok(ProcessOutcome::AlreadyDone);
                }
                Some(_) => {}
                None => warn!(workflow_id = %workflow_id, "Workflow record not found"),
            }
        }

        match self.enrich_with_retry(item).await {
            Ok(enrichment) => {
                let updated = self
                    .store
                    .complete(item.workflow_id, capability, enrichment)
                    .await?;
                info!(
                    worker = self.enricher.name(),
                    capability = %capability,
                    source = ?item.source,
                    updated = updated,
                    "Enrichment complete"
                );
                Ok(ProcessOutcome::Completed)
            }
            Err((err, attempts)) => {
                let message = err.to_string();
                error!(
                    worker = self.enricher.name(),
                    capability = %capability,
                    attempts = attempts,
                    error = %message,
                    "Enrichment failed"
                );
                if let Some(workflow_id) = item.workflow_id {
                    self.store
                        .record_failure(workflow_id, capability, &message)
                        .await?;
                }
                Ok(ProcessOutcome::Failed {
                    attempts,
                    error: message,
                })
            }
        }
    }

    async fn enrich_with_retry(&self, item: &WorkItem) -> Result<Enrichment, (EnrichError, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.enricher.enrich(item).await {
                Ok(enrichment) => return Ok(enrichment),
                Err(e) if e.is_retryable() => match self.config.retry.delay_before(attempt) {
                    Some(delay) => {
                        debug!(
                            worker = self.enricher.name(),
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying lookup"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err((e, attempt)),
                },
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}
