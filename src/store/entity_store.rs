//! Entity storage traits and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::bus::NotificationBus;
use crate::enrich::{Enrichment, WorkItem};
use crate::model::{Artist, Play, PlayEvent, PlaySummary, Track};
use crate::trigger::TriggerSet;
use crate::workflow::{Capability, WorkflowId, WorkflowState};

/// Longest error text stored on a row.
pub const MAX_ERROR_LEN: usize = 1000;

/// Error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    StorageError(String),

    /// A constraint other than an expected uniqueness conflict. Fatal for
    /// the operation; retrying the same data won't help.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("malformed play event: {0}")]
    MalformedEvent(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        if let Some(db) = e.as_database_error() {
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    return Self::ConstraintViolation(db.message().to_string());
                }
                // Older SQLite builds report only the primary result code.
                _ if db.message().contains("constraint failed") => {
                    return Self::ConstraintViolation(db.message().to_string());
                }
                _ => {}
            }
        }
        Self::StorageError(e.to_string())
    }
}

/// Result of ingesting one play event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The play was new and is now recorded.
    Recorded {
        workflow_id: WorkflowId,
        play: Play,
        /// Id of the preceding play, if this one marked it skipped.
        skipped_previous: Option<i64>,
    },
    /// The same track at the same timestamp was already on record.
    AlreadyRecorded,
}

impl IngestOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }

    pub fn workflow_id(&self) -> Option<WorkflowId> {
        match self {
            Self::Recorded { workflow_id, .. } => Some(*workflow_id),
            Self::AlreadyRecorded => None,
        }
    }
}

/// Storage for entities and workflow records.
///
/// Every mutating operation is one transaction. Trigger effects run inside
/// it, and notifications are published on the store's bus only after it
/// commits, in commit order. A rolled-back operation publishes nothing.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Triggers this store fires on insert.
    fn triggers(&self) -> &TriggerSet;

    /// Bus the store publishes on.
    fn bus(&self) -> &NotificationBus;

    /// Record a play and upsert its artist, album and track.
    async fn ingest(&self, event: &PlayEvent) -> Result<IngestOutcome, StoreError>;

    /// Insert an artist outside of any ingestion. Returns the existing row if
    /// the name is already known.
    async fn seed_artist(&self, name: &str) -> Result<Artist, StoreError>;

    /// Current state of a workflow record.
    async fn workflow(&self, id: WorkflowId) -> Result<Option<WorkflowState>, StoreError>;

    /// Write an enrichment result and set the capability's done flag in one
    /// transaction. Returns whether a workflow record was updated.
    async fn complete(
        &self,
        workflow_id: Option<WorkflowId>,
        capability: Capability,
        enrichment: Enrichment,
    ) -> Result<bool, StoreError>;

    /// Set the capability's done flag without writing anything else.
    async fn mark_done(
        &self,
        workflow_id: WorkflowId,
        capability: Capability,
    ) -> Result<bool, StoreError> {
        self.complete(Some(workflow_id), capability, Enrichment::Nothing)
            .await
    }

    /// Record a failed lookup. The done flag is left untouched. For track
    /// capabilities the error is also written to the track's
    /// `resolution_error`.
    async fn record_failure(
        &self,
        workflow_id: WorkflowId,
        capability: Capability,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// Reconciliation query: owning entity rows whose capability is required
    /// but not done, oldest first. With `max_attempts`, rows that already
    /// failed that many times are left out.
    async fn pending(
        &self,
        capability: Capability,
        limit: usize,
        max_attempts: Option<u32>,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Denormalized view of the play recorded by a workflow.
    async fn play_summary(&self, workflow_id: WorkflowId)
        -> Result<Option<PlaySummary>, StoreError>;

    /// The most recent play strictly before `before`.
    async fn previous_play_summary(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Option<PlaySummary>, StoreError>;
}

/// Queue of tracks waiting for a local copy.
#[async_trait]
pub trait DownloadQueue: Send + Sync {
    /// Queue a track that is not downloaded (or failed before).
    async fn queue_download(&self, track_id: i64) -> Result<bool, StoreError>;

    /// Atomically claim the oldest queued track that has an alternate-source
    /// code.
    async fn claim_next_download(&self) -> Result<Option<Track>, StoreError>;

    async fn finish_download(&self, track_id: i64, file_path: &str) -> Result<(), StoreError>;

    async fn fail_download(&self, track_id: i64, error: &str) -> Result<(), StoreError>;
}

/// Cut error text to [`MAX_ERROR_LEN`] characters.
#[cfg_attr(not(feature = "sqlite"), allow(dead_code))]
pub(crate) fn truncate_error(error: &str) -> &str {
    match error.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => &error[..idx],
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let short = "boom";
        assert_eq!(truncate_error(short), "boom");

        let long = "é".repeat(MAX_ERROR_LEN + 10);
        let cut = truncate_error(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_LEN);
    }
}
