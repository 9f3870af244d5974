//! SQLite implementation of EntityStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::entity_store::{
    truncate_error, DownloadQueue, EntityStore, IngestOutcome, StoreError,
};
use super::schema;
use crate::bus::{Notification, NotificationBus, Topic};
use crate::enrich::{Enrichment, WorkItem, WorkSource};
use crate::model::{Artist, DownloadStatus, Play, PlayEvent, PlaySummary, Track};
use crate::skip::SkipPolicy;
use crate::trigger::{Effect, EntityKind, TriggerSet};
use crate::workflow::{Capability, Progress, WorkflowId, WorkflowState};

const ARTIST_COLUMNS: &str = "id, name, external_id, workflow_id, created_at";

const TRACK_COLUMNS: &str = "id, external_id, artist_id, album_id, title, duration_ms, \
     youtube_code, download_status, file_path, resolution_error, workflow_id, created_at";

const PLAY_COLUMNS: &str = "id, track_id, played_at, skipped, workflow_id";

const SUMMARY_SELECT: &str = r#"
    SELECT
        p.id AS play_id,
        p.workflow_id,
        p.played_at,
        p.skipped,
        t.title,
        t.youtube_code,
        a.id AS artist_id,
        a.name AS artist,
        al.title AS album
    FROM plays p
    JOIN tracks t ON t.id = p.track_id
    JOIN artists a ON a.id = t.artist_id
    JOIN albums al ON al.id = t.album_id
"#;

/// SQLite-backed entity store.
///
/// Notifications go to the bus passed in at construction, after commit.
pub struct SqliteEntityStore {
    pool: SqlitePool,
    bus: NotificationBus,
    triggers: TriggerSet,
    skip_policy: SkipPolicy,
    // Held across commit + publish so delivery order matches commit order.
    publish_lock: Mutex<()>,
}

impl SqliteEntityStore {
    /// Create a store with the standard triggers and skip policy.
    pub fn new(pool: SqlitePool, bus: NotificationBus) -> Self {
        Self {
            pool,
            bus,
            triggers: TriggerSet::standard(),
            skip_policy: SkipPolicy::default(),
            publish_lock: Mutex::new(()),
        }
    }

    pub fn with_triggers(mut self, triggers: TriggerSet) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run migrations to create the tables.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in schema::statements() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn commit_and_publish(
        &self,
        tx: Transaction<'_, Sqlite>,
        outbox: Vec<Notification>,
    ) -> Result<(), StoreError> {
        let _order = self.publish_lock.lock().await;
        tx.commit().await?;
        for notification in outbox {
            self.bus.publish(notification);
        }
        Ok(())
    }

    /// Run the insert triggers for a freshly inserted row.
    async fn fire<T: Serialize + Sync>(
        &self,
        conn: &mut SqliteConnection,
        entity: EntityKind,
        workflow_id: Option<WorkflowId>,
        row: &T,
        outbox: &mut Vec<Notification>,
    ) -> Result<(), StoreError> {
        let effects = self
            .triggers
            .fire(entity, workflow_id, serde_json::to_value(row)?);
        apply_effects(conn, effects, outbox).await
    }

    async fn create_workflow(
        &self,
        conn: &mut SqliteConnection,
        workflow_id: WorkflowId,
    ) -> Result<(), StoreError> {
        let id = workflow_id.to_string();
        sqlx::query("INSERT INTO workflow_state (workflow_id) VALUES (?)")
            .bind(&id)
            .execute(&mut *conn)
            .await?;

        for capability in self.triggers.capabilities() {
            sqlx::query(
                "INSERT INTO workflow_capabilities (workflow_id, capability) VALUES (?, ?)",
            )
            .bind(&id)
            .bind(capability.name())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn upsert_artist(
        &self,
        conn: &mut SqliteConnection,
        event: &PlayEvent,
        workflow_id: WorkflowId,
        outbox: &mut Vec<Notification>,
    ) -> Result<Artist, StoreError> {
        let sql = format!(
            "INSERT INTO artists (name, external_id, workflow_id) VALUES (?, ?, ?) \
             ON CONFLICT DO NOTHING RETURNING {ARTIST_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(&event.artist_name)
            .bind(event.artist_external_id.as_deref())
            .bind(workflow_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        match inserted {
            Some(row) => {
                let artist = artist_from_row(&row)?;
                debug!(artist_id = artist.id, name = %artist.name, "Inserted artist");
                self.fire(conn, EntityKind::Artist, artist.workflow_id, &artist, outbox)
                    .await?;
                Ok(artist)
            }
            None => {
                find_artist(conn, &event.artist_name, event.artist_external_id.as_deref()).await
            }
        }
    }

    async fn upsert_track(
        &self,
        conn: &mut SqliteConnection,
        event: &PlayEvent,
        artist_id: i64,
        album_id: i64,
        workflow_id: WorkflowId,
        outbox: &mut Vec<Notification>,
    ) -> Result<Track, StoreError> {
        let sql = format!(
            "INSERT INTO tracks (external_id, artist_id, album_id, title, duration_ms, workflow_id) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING RETURNING {TRACK_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(event.track_external_id.as_deref())
            .bind(artist_id)
            .bind(album_id)
            .bind(&event.title)
            .bind(event.duration_ms)
            .bind(workflow_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        match inserted {
            Some(row) => {
                let track = track_from_row(&row)?;
                debug!(track_id = track.id, title = %track.title, "Inserted track");
                self.fire(conn, EntityKind::Track, track.workflow_id, &track, outbox)
                    .await?;
                Ok(track)
            }
            None => {
                find_track(
                    conn,
                    event.track_external_id.as_deref(),
                    album_id,
                    &event.title,
                )
                .await
            }
        }
    }

    /// Mark the play right before `play` skipped if it was cut short.
    async fn mark_previous_skipped(
        &self,
        conn: &mut SqliteConnection,
        play: &Play,
    ) -> Result<Option<i64>, StoreError> {
        let played_at = play.played_at.timestamp_millis();
        let previous: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT p.id, p.played_at, t.duration_ms
            FROM plays p
            JOIN tracks t ON t.id = p.track_id
            WHERE p.played_at < ?
            ORDER BY p.played_at DESC, p.id DESC
            LIMIT 1
            "#,
        )
        .bind(played_at)
        .fetch_optional(&mut *conn)
        .await?;

        let Some((previous_id, previous_at, duration_ms)) = previous else {
            return Ok(None);
        };

        if !self.skip_policy.is_skip(played_at - previous_at, duration_ms) {
            return Ok(None);
        }

        sqlx::query("UPDATE plays SET skipped = 1 WHERE id = ?")
            .bind(previous_id)
            .execute(&mut *conn)
            .await?;
        debug!(
            play_id = previous_id,
            elapsed_ms = played_at - previous_at,
            duration_ms = duration_ms,
            "Marked previous play skipped"
        );
        Ok(Some(previous_id))
    }

    async fn summary(&self, row: Option<SqliteRow>) -> Result<Option<PlaySummary>, StoreError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let artist_id: i64 = row.try_get("artist_id")?;
        let genres: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT g.name
            FROM artist_genres ag
            JOIN genres g ON g.id = ag.genre_id
            WHERE ag.artist_id = ?
            ORDER BY g.name
            "#,
        )
        .bind(artist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(PlaySummary {
            play_id: row.try_get("play_id")?,
            workflow_id: parse_workflow_id(row.try_get("workflow_id")?)?,
            played_at: millis_to_datetime(row.try_get("played_at")?)?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            album: row.try_get("album")?,
            genres,
            skipped: row.try_get("skipped")?,
            youtube_code: row.try_get("youtube_code")?,
        }))
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    async fn ingest(&self, event: &PlayEvent) -> Result<IngestOutcome, StoreError> {
        event.validate().map_err(StoreError::MalformedEvent)?;

        let workflow_id = WorkflowId::new();
        let mut outbox = Vec::new();
        let mut tx = self.pool.begin().await?;

        self.create_workflow(&mut tx, workflow_id).await?;
        let artist = self
            .upsert_artist(&mut tx, event, workflow_id, &mut outbox)
            .await?;
        let album_id = upsert_album(&mut tx, artist.id, &event.album_title).await?;
        let track = self
            .upsert_track(&mut tx, event, artist.id, album_id, workflow_id, &mut outbox)
            .await?;

        let sql = format!(
            "INSERT INTO plays (track_id, played_at, workflow_id) VALUES (?, ?, ?) \
             ON CONFLICT DO NOTHING RETURNING {PLAY_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(track.id)
            .bind(event.played_at.timestamp_millis())
            .bind(workflow_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = inserted else {
            tx.rollback().await?;
            debug!(
                track_id = track.id,
                played_at = %event.played_at,
                "Play already recorded"
            );
            return Ok(IngestOutcome::AlreadyRecorded);
        };

        let play = play_from_row(&row)?;
        self.fire(&mut tx, EntityKind::Play, Some(workflow_id), &play, &mut outbox)
            .await?;

        let skipped_previous = self.mark_previous_skipped(&mut tx, &play).await?;
        attach_genres(&mut tx, artist.id, &event.genres).await?;

        sqlx::query("UPDATE workflow_state SET init_done = 1 WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .execute(&mut *tx)
            .await?;
        queue_progress(&mut tx, workflow_id, &mut outbox).await?;

        let notifications = outbox.len();
        self.commit_and_publish(tx, outbox).await?;

        info!(
            workflow_id = %workflow_id,
            play_id = play.id,
            track_id = track.id,
            artist_id = artist.id,
            notifications = notifications,
            "Recorded play"
        );

        Ok(IngestOutcome::Recorded {
            workflow_id,
            play,
            skipped_previous,
        })
    }

    async fn seed_artist(&self, name: &str) -> Result<Artist, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::MalformedEvent("artist name is empty".to_string()));
        }

        let mut outbox = Vec::new();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO artists (name) VALUES (?) ON CONFLICT DO NOTHING RETURNING {ARTIST_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

        let artist = match inserted {
            Some(row) => {
                let artist = artist_from_row(&row)?;
                self.fire(&mut tx, EntityKind::Artist, None, &artist, &mut outbox)
                    .await?;
                info!(artist_id = artist.id, name = %artist.name, "Seeded artist");
                artist
            }
            None => find_artist(&mut tx, name, None).await?,
        };

        self.commit_and_publish(tx, outbox).await?;
        Ok(artist)
    }

    async fn workflow(&self, id: WorkflowId) -> Result<Option<WorkflowState>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_workflow(&mut conn, id).await
    }

    async fn complete(
        &self,
        workflow_id: Option<WorkflowId>,
        capability: Capability,
        enrichment: Enrichment,
    ) -> Result<bool, StoreError> {
        let mut outbox = Vec::new();
        let mut tx = self.pool.begin().await?;

        match &enrichment {
            Enrichment::Genres { artist_id, genres } => {
                let attached = attach_genres(&mut tx, *artist_id, genres).await?;
                debug!(artist_id = *artist_id, attached = attached, "Wrote genres");
            }
            Enrichment::AlternateSource { track_id, code } => {
                let code = code.as_deref().filter(|c| !c.is_empty());
                let result = sqlx::query(
                    r#"
                    UPDATE tracks
                    SET youtube_code = COALESCE(?, youtube_code),
                        resolution_error = CASE WHEN ? IS NOT NULL THEN NULL ELSE resolution_error END,
                        download_status = CASE
                            WHEN ? IS NOT NULL AND download_status = 'none' THEN 'queued'
                            ELSE download_status
                        END
                    WHERE id = ?
                    "#,
                )
                .bind(code)
                .bind(code)
                .bind(code)
                .bind(*track_id)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    warn!(track_id = *track_id, "No track row updated when writing alternate-source code");
                }
            }
            Enrichment::Nothing => {}
        }

        let updated = match workflow_id {
            Some(id) => {
                let result = sqlx::query(
                    "UPDATE workflow_capabilities SET done = 1 WHERE workflow_id = ? AND capability = ?",
                )
                .bind(id.to_string())
                .bind(capability.name())
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() > 0 {
                    queue_progress(&mut tx, id, &mut outbox).await?;
                    true
                } else {
                    warn!(
                        workflow_id = %id,
                        capability = %capability,
                        "No workflow row updated when finishing task"
                    );
                    false
                }
            }
            None => false,
        };

        self.commit_and_publish(tx, outbox).await?;

        if let Some(id) = workflow_id {
            debug!(workflow_id = %id, capability = %capability, updated = updated, "Finished workflow task");
        }
        Ok(updated)
    }

    async fn record_failure(
        &self,
        workflow_id: WorkflowId,
        capability: Capability,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut outbox = Vec::new();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_capabilities
            SET attempts = attempts + 1, last_error = ?
            WHERE workflow_id = ? AND capability = ?
            "#,
        )
        .bind(truncate_error(error))
        .bind(workflow_id.to_string())
        .bind(capability.name())
        .execute(&mut *tx)
        .await?;

        // Track lookups also leave the error on the track the workflow created
        if self.triggers.entity_for(capability) == Some(EntityKind::Track) {
            sqlx::query("UPDATE tracks SET resolution_error = ? WHERE workflow_id = ?")
                .bind(truncate_error(error))
                .bind(workflow_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        let updated = result.rows_affected() > 0;
        if updated {
            queue_progress(&mut tx, workflow_id, &mut outbox).await?;
        }
        self.commit_and_publish(tx, outbox).await?;
        Ok(updated)
    }

    async fn pending(
        &self,
        capability: Capability,
        limit: usize,
        max_attempts: Option<u32>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let entity = self
            .triggers
            .entity_for(capability)
            .ok_or_else(|| StoreError::UnknownCapability(capability.to_string()))?;

        let (table, columns) = match entity {
            EntityKind::Artist => ("artists", ARTIST_COLUMNS),
            EntityKind::Track => ("tracks", TRACK_COLUMNS),
            EntityKind::Play => ("plays", PLAY_COLUMNS),
        };

        let sql = format!(
            r#"
            SELECT {columns} FROM {table}
            WHERE workflow_id IN (
                SELECT workflow_id FROM workflow_capabilities
                WHERE capability = ?
                  AND required = 1
                  AND done = 0
                  AND (? IS NULL OR attempts < ?)
            )
            ORDER BY id
            LIMIT ?
            "#
        );
        let max_attempts = max_attempts.map(i64::from);
        let rows = sqlx::query(&sql)
            .bind(capability.name())
            .bind(max_attempts)
            .bind(max_attempts)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<WorkItem, StoreError> {
                let (workflow_id, payload) = match entity {
                    EntityKind::Artist => {
                        let artist = artist_from_row(row)?;
                        (artist.workflow_id, serde_json::to_value(&artist)?)
                    }
                    EntityKind::Track => {
                        let track = track_from_row(row)?;
                        (track.workflow_id, serde_json::to_value(&track)?)
                    }
                    EntityKind::Play => {
                        let play = play_from_row(row)?;
                        (play.workflow_id, serde_json::to_value(&play)?)
                    }
                };
                Ok(WorkItem {
                    capability,
                    workflow_id,
                    payload,
                    source: WorkSource::Sweep,
                })
            })
            .collect()
    }

    async fn play_summary(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<PlaySummary>, StoreError> {
        let sql = format!("{SUMMARY_SELECT} WHERE p.workflow_id = ?");
        let row = sqlx::query(&sql)
            .bind(workflow_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        self.summary(row).await
    }

    async fn previous_play_summary(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Option<PlaySummary>, StoreError> {
        let sql = format!(
            "{SUMMARY_SELECT} WHERE p.played_at < ? ORDER BY p.played_at DESC, p.id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(before.timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;
        self.summary(row).await
    }
}

#[async_trait]
impl DownloadQueue for SqliteEntityStore {
    async fn queue_download(&self, track_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tracks
            SET download_status = 'queued', resolution_error = NULL
            WHERE id = ? AND download_status IN ('none', 'error')
            "#,
        )
        .bind(track_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_next_download(&self) -> Result<Option<Track>, StoreError> {
        // Single statement, so selection and status change are atomic.
        let sql = format!(
            r#"
            UPDATE tracks
            SET download_status = 'downloading'
            WHERE download_status = 'queued'
              AND id = (
                SELECT id FROM tracks
                WHERE download_status = 'queued' AND youtube_code IS NOT NULL
                ORDER BY created_at, id
                LIMIT 1
              )
            RETURNING {TRACK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let track = track_from_row(&row)?;
                info!(track_id = track.id, title = %track.title, "Claimed track for download");
                Ok(Some(track))
            }
            None => Ok(None),
        }
    }

    async fn finish_download(&self, track_id: i64, file_path: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tracks
            SET download_status = 'done',
                file_path = ?,
                resolution_error = NULL,
                downloaded_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?
            "#,
        )
        .bind(file_path)
        .bind(track_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_download(&self, track_id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tracks
            SET download_status = 'error', resolution_error = ?
            WHERE id = ?
            "#,
        )
        .bind(truncate_error(error))
        .bind(track_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

async fn apply_effects(
    conn: &mut SqliteConnection,
    effects: Vec<Effect>,
    outbox: &mut Vec<Notification>,
) -> Result<(), StoreError> {
    for effect in effects {
        match effect {
            Effect::Require {
                workflow_id,
                capability,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO workflow_capabilities (workflow_id, capability, required)
                    VALUES (?, ?, 1)
                    ON CONFLICT (workflow_id, capability) DO UPDATE SET required = 1
                    "#,
                )
                .bind(workflow_id.to_string())
                .bind(capability.name())
                .execute(&mut *conn)
                .await?;

                debug!(workflow_id = %workflow_id, capability = %capability, "Capability required");
                queue_progress(conn, workflow_id, outbox).await?;
            }
            Effect::Emit(notification) => outbox.push(notification),
        }
    }
    Ok(())
}

/// Any update to a workflow record is announced with its full new state.
async fn queue_progress(
    conn: &mut SqliteConnection,
    workflow_id: WorkflowId,
    outbox: &mut Vec<Notification>,
) -> Result<(), StoreError> {
    let state = load_workflow(conn, workflow_id).await?.ok_or_else(|| {
        StoreError::StorageError(format!("workflow {workflow_id} missing after update"))
    })?;
    outbox.push(Notification::encode(Topic::WorkflowProgress, &state)?);
    Ok(())
}

async fn load_workflow(
    conn: &mut SqliteConnection,
    workflow_id: WorkflowId,
) -> Result<Option<WorkflowState>, StoreError> {
    let id = workflow_id.to_string();
    let row: Option<(bool, String)> = sqlx::query_as(
        "SELECT init_done, created_at FROM workflow_state WHERE workflow_id = ?",
    )
    .bind(&id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((init_done, created_at)) = row else {
        return Ok(None);
    };

    let flags: Vec<(String, bool, bool)> = sqlx::query_as(
        "SELECT capability, required, done FROM workflow_capabilities WHERE workflow_id = ?",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(WorkflowState {
        workflow_id,
        init_done,
        created_at: parse_timestamp(&created_at)?,
        capabilities: flags
            .into_iter()
            .map(|(name, required, done)| (name, Progress { required, done }))
            .collect(),
    }))
}

async fn upsert_album(
    conn: &mut SqliteConnection,
    artist_id: i64,
    title: &str,
) -> Result<i64, StoreError> {
    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO albums (artist_id, title) VALUES (?, ?) ON CONFLICT DO NOTHING RETURNING id",
    )
    .bind(artist_id)
    .bind(title)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = inserted {
        return Ok(id);
    }

    let id = sqlx::query_scalar("SELECT id FROM albums WHERE artist_id = ? AND title = ?")
        .bind(artist_id)
        .bind(title)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

async fn find_artist(
    conn: &mut SqliteConnection,
    name: &str,
    external_id: Option<&str>,
) -> Result<Artist, StoreError> {
    let sql = format!("SELECT {ARTIST_COLUMNS} FROM artists WHERE name = ?");
    if let Some(row) = sqlx::query(&sql).bind(name).fetch_optional(&mut *conn).await? {
        return artist_from_row(&row);
    }

    if let Some(external_id) = external_id {
        let sql = format!("SELECT {ARTIST_COLUMNS} FROM artists WHERE external_id = ?");
        if let Some(row) = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await?
        {
            return artist_from_row(&row);
        }
    }

    Err(StoreError::StorageError(format!(
        "artist {name:?} conflicted but no matching row exists"
    )))
}

async fn find_track(
    conn: &mut SqliteConnection,
    external_id: Option<&str>,
    album_id: i64,
    title: &str,
) -> Result<Track, StoreError> {
    if let Some(external_id) = external_id {
        let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE external_id = ?");
        if let Some(row) = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await?
        {
            return track_from_row(&row);
        }
    }

    let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE album_id = ? AND title = ?");
    match sqlx::query(&sql)
        .bind(album_id)
        .bind(title)
        .fetch_optional(&mut *conn)
        .await?
    {
        Some(row) => track_from_row(&row),
        None => Err(StoreError::StorageError(format!(
            "track {title:?} conflicted but no matching row exists"
        ))),
    }
}

/// Associate genres with an artist, ignoring ones already attached.
async fn attach_genres(
    conn: &mut SqliteConnection,
    artist_id: i64,
    genres: &[String],
) -> Result<u64, StoreError> {
    let mut attached = 0;
    for genre in genres.iter().map(|g| g.trim()).filter(|g| !g.is_empty()) {
        sqlx::query("INSERT INTO genres (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(genre)
            .execute(&mut *conn)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO artist_genres (artist_id, genre_id)
            SELECT ?, id FROM genres WHERE name = ?
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(artist_id)
        .bind(genre)
        .execute(&mut *conn)
        .await?;
        attached += result.rows_affected();
    }
    Ok(attached)
}

fn artist_from_row(row: &SqliteRow) -> Result<Artist, StoreError> {
    Ok(Artist {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        external_id: row.try_get("external_id")?,
        workflow_id: parse_workflow_id(row.try_get("workflow_id")?)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn track_from_row(row: &SqliteRow) -> Result<Track, StoreError> {
    let status: String = row.try_get("download_status")?;
    Ok(Track {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        artist_id: row.try_get("artist_id")?,
        album_id: row.try_get("album_id")?,
        title: row.try_get("title")?,
        duration_ms: row.try_get("duration_ms")?,
        youtube_code: row.try_get("youtube_code")?,
        download_status: status
            .parse::<DownloadStatus>()
            .map_err(StoreError::StorageError)?,
        file_path: row.try_get("file_path")?,
        resolution_error: row.try_get("resolution_error")?,
        workflow_id: parse_workflow_id(row.try_get("workflow_id")?)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn play_from_row(row: &SqliteRow) -> Result<Play, StoreError> {
    Ok(Play {
        id: row.try_get("id")?,
        track_id: row.try_get("track_id")?,
        played_at: millis_to_datetime(row.try_get("played_at")?)?,
        skipped: row.try_get("skipped")?,
        workflow_id: parse_workflow_id(row.try_get("workflow_id")?)?,
    })
}

fn parse_workflow_id(raw: Option<String>) -> Result<Option<WorkflowId>, StoreError> {
    raw.map(|s| {
        s.parse::<WorkflowId>()
            .map_err(|e| StoreError::StorageError(format!("bad workflow id {s:?}: {e}")))
    })
    .transpose()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(&format!("{}Z", raw.replace(' ', "T"))))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::StorageError(format!("bad timestamp {raw:?}: {e}")))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::StorageError(format!("timestamp out of range: {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_accepts_both_sqlite_forms() {
        let iso = parse_timestamp("2024-05-01T10:00:00.250Z").unwrap();
        let plain = parse_timestamp("2024-05-01 10:00:00").unwrap();
        assert_eq!(iso.timestamp_millis() - plain.timestamp_millis(), 250);
    }

    #[test]
    fn test_parse_workflow_id_rejects_garbage() {
        assert!(parse_workflow_id(None).unwrap().is_none());
        assert!(parse_workflow_id(Some("nope".into())).is_err());
        let id = WorkflowId::new();
        assert_eq!(parse_workflow_id(Some(id.to_string())).unwrap(), Some(id));
    }
}
