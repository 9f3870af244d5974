//! Enricher trait and the work items it consumes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::bus::Notification;
use crate::workflow::{Capability, WorkflowId};

/// Error returned by an enrichment lookup.
#[derive(Error, Debug)]
pub enum EnrichError {
    /// Transient failure, such as a network error. Worth retrying.
    #[error("retryable: {0}")]
    Retryable(#[source] anyhow::Error),

    /// Permanent failure. Retrying won't help.
    #[error("permanent: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl EnrichError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Result of a successful lookup, written back together with the done flag.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    /// Genres for an artist. An empty list is a valid result.
    Genres { artist_id: i64, genres: Vec<String> },
    /// Alternate-source code for a track. `None` means nothing was found.
    AlternateSource { track_id: i64, code: Option<String> },
    /// Nothing to write; only flip the done flag.
    Nothing,
}

/// Where a work item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSource {
    Notification,
    Sweep,
}

/// One entity row awaiting enrichment.
///
/// Items from the bus and from a reconciliation sweep have the same payload
/// shape: the JSON form of the owning entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub capability: Capability,
    pub workflow_id: Option<WorkflowId>,
    pub payload: serde_json::Value,
    pub source: WorkSource,
}

impl WorkItem {
    pub fn from_notification(capability: Capability, notification: Notification) -> Self {
        Self {
            capability,
            workflow_id: notification.workflow_id(),
            payload: notification.payload,
            source: WorkSource::Notification,
        }
    }

    /// Decode the payload into a row type. A payload that doesn't decode is a
    /// permanent failure.
    pub fn row<T: DeserializeOwned>(&self) -> Result<T, EnrichError> {
        T::deserialize(&self.payload).map_err(EnrichError::permanent)
    }
}

/// An external lookup that fulfils one capability.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &'static str;

    /// The capability this enricher completes.
    fn capability(&self) -> Capability;

    /// Perform the lookup for one item.
    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment, EnrichError>;
}
