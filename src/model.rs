//! Entity rows and the ingestion input.
//!
//! Field names mirror the column names, so the serde form of a row is also
//! the notification payload for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::workflow::WorkflowId;

/// An artist, identified by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub external_id: Option<String>,
    /// Set only when the artist was created by an ingestion.
    pub workflow_id: Option<WorkflowId>,
    pub created_at: DateTime<Utc>,
}

/// Progress of fetching a local copy of a track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    None,
    Queued,
    Downloading,
    Done,
    Error,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "queued" => Ok(Self::Queued),
            "downloading" => Ok(Self::Downloading),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown download status: {other}")),
        }
    }
}

/// A track.
///
/// Tracks are unique by external id (when present), by `(album_id, title)`
/// and by `(artist_id, album_id, title)` at the same time, since ingestion
/// and resolvers each fill in different columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub external_id: Option<String>,
    pub artist_id: i64,
    pub album_id: i64,
    pub title: String,
    pub duration_ms: i64,
    /// Alternate-source code, filled in by the resolver.
    pub youtube_code: Option<String>,
    pub download_status: DownloadStatus,
    pub file_path: Option<String>,
    pub resolution_error: Option<String>,
    pub workflow_id: Option<WorkflowId>,
    pub created_at: DateTime<Utc>,
}

/// A single playback event, unique by `(track_id, played_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub id: i64,
    pub track_id: i64,
    pub played_at: DateTime<Utc>,
    pub skipped: bool,
    pub workflow_id: Option<WorkflowId>,
}

/// One played-track event as reported by the streaming service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
    #[serde(default)]
    pub track_external_id: Option<String>,
    pub title: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub album_title: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_external_id: Option<String>,
    pub played_at: DateTime<Utc>,
    #[serde(default)]
    pub genres: Vec<String>,
}

impl PlayEvent {
    pub fn new(
        artist_name: impl Into<String>,
        title: impl Into<String>,
        duration_ms: i64,
        played_at: DateTime<Utc>,
    ) -> Self {
        Self {
            track_external_id: None,
            title: title.into(),
            duration_ms,
            album_title: String::new(),
            artist_name: artist_name.into(),
            artist_external_id: None,
            played_at,
            genres: Vec::new(),
        }
    }

    pub fn with_album(mut self, album_title: impl Into<String>) -> Self {
        self.album_title = album_title.into();
        self
    }

    pub fn with_track_external_id(mut self, id: impl Into<String>) -> Self {
        self.track_external_id = Some(id.into());
        self
    }

    pub fn with_artist_external_id(mut self, id: impl Into<String>) -> Self {
        self.artist_external_id = Some(id.into());
        self
    }

    pub fn with_genres<I, G>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        self.genres = genres.into_iter().map(Into::into).collect();
        self
    }

    /// Reject events that cannot identify an artist or a track.
    pub fn validate(&self) -> Result<(), String> {
        if self.artist_name.trim().is_empty() {
            return Err("artist name is empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("track title is empty".to_string());
        }
        if self.duration_ms <= 0 {
            return Err(format!("duration must be positive, got {}", self.duration_ms));
        }
        Ok(())
    }
}

/// Denormalized view of one play, as a chat bridge would post it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaySummary {
    pub play_id: i64,
    pub workflow_id: Option<WorkflowId>,
    pub played_at: DateTime<Utc>,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genres: Vec<String>,
    pub skipped: bool,
    pub youtube_code: Option<String>,
}

impl PlaySummary {
    /// Same title by the same artist.
    pub fn is_repeat_of(&self, other: &PlaySummary) -> bool {
        self.title == other.title && self.artist == other.artist
    }

    /// Skipped plays and back-to-back repeats are not announced.
    pub fn should_announce(&self, previous: Option<&PlaySummary>) -> bool {
        if self.skipped {
            return false;
        }
        !previous.is_some_and(|prev| self.is_repeat_of(prev))
    }
}
