//! SQLite schema.
//!
//! Uniqueness constraints carry ingestion idempotence: every upsert is
//! "insert, do nothing on conflict". Statements are separated by `;` and
//! contain none internally.

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_state (
    workflow_id TEXT PRIMARY KEY,
    init_done INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS workflow_capabilities (
    workflow_id TEXT NOT NULL REFERENCES workflow_state(workflow_id),
    capability TEXT NOT NULL,
    required INTEGER NOT NULL DEFAULT 0,
    done INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    PRIMARY KEY (workflow_id, capability)
);

CREATE TABLE IF NOT EXISTS artists (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    external_id TEXT UNIQUE,
    workflow_id TEXT REFERENCES workflow_state(workflow_id),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY,
    artist_id INTEGER NOT NULL REFERENCES artists(id),
    title TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (artist_id, title)
);

CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY,
    external_id TEXT UNIQUE,
    artist_id INTEGER NOT NULL REFERENCES artists(id),
    album_id INTEGER NOT NULL REFERENCES albums(id),
    title TEXT NOT NULL,
    duration_ms INTEGER NOT NULL CHECK (duration_ms >= 0),
    youtube_code TEXT,
    download_status TEXT NOT NULL DEFAULT 'none'
        CHECK (download_status IN ('none', 'queued', 'downloading', 'done', 'error')),
    file_path TEXT,
    resolution_error TEXT,
    downloaded_at TEXT,
    workflow_id TEXT REFERENCES workflow_state(workflow_id),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (album_id, title),
    UNIQUE (artist_id, album_id, title)
);

CREATE TABLE IF NOT EXISTS plays (
    id INTEGER PRIMARY KEY,
    track_id INTEGER NOT NULL REFERENCES tracks(id),
    played_at INTEGER NOT NULL,
    skipped INTEGER NOT NULL DEFAULT 0,
    workflow_id TEXT REFERENCES workflow_state(workflow_id),
    UNIQUE (track_id, played_at)
);

CREATE TABLE IF NOT EXISTS genres (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS artist_genres (
    artist_id INTEGER NOT NULL REFERENCES artists(id),
    genre_id INTEGER NOT NULL REFERENCES genres(id),
    PRIMARY KEY (artist_id, genre_id)
);

CREATE INDEX IF NOT EXISTS idx_workflow_capabilities_pending
    ON workflow_capabilities(capability, required, done);
CREATE INDEX IF NOT EXISTS idx_artists_workflow ON artists(workflow_id);
CREATE INDEX IF NOT EXISTS idx_tracks_workflow ON tracks(workflow_id);
CREATE INDEX IF NOT EXISTS idx_tracks_download ON tracks(download_status, created_at);
CREATE INDEX IF NOT EXISTS idx_plays_played_at ON plays(played_at);
CREATE INDEX IF NOT EXISTS idx_plays_workflow ON plays(workflow_id)
"#;

/// Schema statements, one per entry.
pub(crate) fn statements() -> impl Iterator<Item = &'static str> {
    SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
