//! # Playflow
//!
//! Workflow coordination for a music play-ingestion system.
//!
//! Each played track is ingested as one transaction that upserts its artist,
//! album and track, records the play and opens a workflow record. Inserts
//! fire triggers that mark enrichment work as required and publish
//! notifications. Independent workers pick that work up from the bus, and
//! sweep the store for anything the bus never delivered.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use playflow::{NotificationBus, PlayEvent, SqliteEntityStore, EntityStore, WorkerBuilder};
//!
//! let bus = NotificationBus::default();
//! let store = Arc::new(SqliteEntityStore::new(pool, bus.clone()));
//! store.run_migrations().await?;
//!
//! let worker = WorkerBuilder::new(store.clone(), GenreLookup)
//!     .sweep_interval(Duration::from_secs(60))
//!     .retry(RetryPolicy::exponential(3))
//!     .build()?;
//! tokio::spawn(worker.run());
//!
//! store.ingest(&PlayEvent::new("Boards of Canada", "Roygbiv", 142_000, Utc::now())).await?;
//! ```
//!
//! ## Delivery
//!
//! Notifications are at-most-once and published only after the writing
//! transaction commits. Completion is always recorded in the store, so the
//! reconciliation sweep makes processing at-least-once.
//!
//! ## Feature Flags
//!
//! - `sqlite` - Enable the SQLite-backed entity store and download queue

pub mod bus;
pub mod enrich;
pub mod model;
pub mod retry;
pub mod skip;
pub mod store;
pub mod trigger;
pub mod worker;
pub mod workflow;

pub use bus::{Notification, NotificationBus, Subscription, Topic};
pub use enrich::{EnrichError, Enricher, Enrichment, WorkItem, WorkSource};
pub use model::{Artist, DownloadStatus, Play, PlayEvent, PlaySummary, Track};
pub use retry::{Backoff, RetryPolicy};
pub use skip::SkipPolicy;
pub use store::{DownloadQueue, EntityStore, IngestOutcome, StoreError};
pub use trigger::{Effect, EntityKind, TriggerRule, TriggerSet};
pub use worker::{CompletionWatcher, EnrichmentWorker, ProcessOutcome, WorkerBuilder};
pub use workflow::{Capability, Progress, WorkflowId, WorkflowState};

#[cfg(feature = "sqlite")]
pub use store::SqliteEntityStore;
