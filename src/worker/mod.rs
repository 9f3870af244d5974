//! Enrichment workers and progress consumers.
//!
//! A worker owns one capability. It listens for inserts of the entity that
//! makes its capability required and, on an independent interval, sweeps the
//! store for work the bus never delivered.

mod builder;
mod runtime;
mod watcher;

pub use builder::WorkerBuilder;
pub use runtime::{EnrichmentWorker, ProcessOutcome};
pub use watcher::CompletionWatcher;
