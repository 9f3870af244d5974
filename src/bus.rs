//! In-process publish/subscribe bus for row notifications.
//!
//! Delivery is at-most-once. Nothing is persisted or replayed: a subscriber
//! that is not listening when a notification is published, or that falls
//! further behind than the channel capacity, never sees it. Workers recover
//! from that with a reconciliation sweep against the store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::workflow::WorkflowId;

/// Notification topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    PlayInserted,
    TrackInserted,
    ArtistInserted,
    WorkflowProgress,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::PlayInserted,
        Topic::TrackInserted,
        Topic::ArtistInserted,
        Topic::WorkflowProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayInserted => "play_inserted",
            Self::TrackInserted => "track_inserted",
            Self::ArtistInserted => "artist_inserted",
            Self::WorkflowProgress => "workflow_progress",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic plus a point-in-time JSON snapshot of the row that triggered it.
///
/// The payload is not a live reference. Consumers that need current state
/// re-fetch by primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self { topic, payload }
    }

    /// Snapshot a row.
    pub fn encode<T: Serialize>(topic: Topic, row: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic,
            payload: serde_json::to_value(row)?,
        })
    }

    /// Decode the payload into a row type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// The owning workflow, if the row has one.
    pub fn workflow_id(&self) -> Option<WorkflowId> {
        self.payload
            .get("workflow_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// Process-wide notification channel multiplexing every [`Topic`].
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Default number of buffered notifications per subscriber.
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification. Returns how many subscribers it reached; with
    /// none listening, the notification is dropped.
    pub fn publish(&self, notification: Notification) -> usize {
        let topic = notification.topic;
        match self.tx.send(notification) {
            Ok(count) => {
                debug!(topic = %topic, subscribers = count, "Published notification");
                count
            }
            Err(_) => {
                debug!(topic = %topic, "No subscribers; notification dropped");
                0
            }
        }
    }

    /// Subscribe to the given topics. Only notifications published after this
    /// call are delivered.
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topics: topics.to_vec(),
            missed: 0,
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&Topic::ALL)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// A receiver filtered to a set of topics.
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    topics: Vec<Topic>,
    missed: u64,
}

impl Subscription {
    /// Wait for the next matching notification. Returns `None` once every
    /// publisher has been dropped.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.topics.contains(&n.topic) => return Some(n),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.note_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching notification that is already buffered, if any.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(n) if self.topics.contains(&n.topic) => return Some(n),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => self.note_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Notification> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Notifications lost to lag since this subscription was created.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    fn note_lag(&mut self, skipped: u64) {
        self.missed += skipped;
        warn!(
            skipped = skipped,
            "Subscriber lagged; missed notifications are left to reconciliation"
        );
    }
}
