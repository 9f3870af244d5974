//! Basic usage example for playflow.
//!
//! This example demonstrates:
//! - Setting up an in-memory SQLite store and a notification bus
//! - Implementing the Enricher trait for genre and alternate-source lookups
//! - Running workers and a completion watcher
//! - Ingesting plays, including a skip and a duplicate

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use playflow::{
    Artist, Capability, CompletionWatcher, EnrichError, Enricher, Enrichment, EntityStore,
    NotificationBus, PlayEvent, RetryPolicy, SqliteEntityStore, Track, WorkItem, WorkerBuilder,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Genre lookup backed by a fixed table.
struct GenreLookup;

#[async_trait]
impl Enricher for GenreLookup {
    fn name(&self) -> &'static str {
        "genre_lookup"
    }

    fn capability(&self) -> Capability {
        Capability::GENRE
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment, EnrichError> {
        let artist: Artist = item.row()?;
        let genres = match artist.name.as_str() {
            "Boards of Canada" => vec!["idm", "downtempo"],
            "Aphex Twin" => vec!["idm", "ambient"],
            _ => vec![],
        };
        Ok(Enrichment::Genres {
            artist_id: artist.id,
            genres: genres.into_iter().map(String::from).collect(),
        })
    }
}

/// Alternate-source resolver that fails the first time it sees a track.
struct AlternateSourceLookup {
    seen: std::sync::Mutex<std::collections::HashSet<i64>>,
}

#[async_trait]
impl Enricher for AlternateSourceLookup {
    fn name(&self) -> &'static str {
        "alternate_source_lookup"
    }

    fn capability(&self) -> Capability {
        Capability::ALTERNATE_SOURCE
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment, EnrichError> {
        let track: Track = item.row()?;
        let first_time = self
            .seen
            .lock()
            .map_err(|e| EnrichError::permanent(anyhow::anyhow!("poisoned: {e}")))?
            .insert(track.id);

        if first_time {
            // Simulated network hiccup
            return Err(EnrichError::retryable(anyhow::anyhow!("search timed out")));
        }

        Ok(Enrichment::AlternateSource {
            track_id: track.id,
            code: Some(format!("vid{:05}", track.id)),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("playflow=info")),
        )
        .init();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    let bus = NotificationBus::default();
    let store = Arc::new(SqliteEntityStore::new(pool, bus.clone()));
    store.run_migrations().await?;

    let genre_worker = WorkerBuilder::new(store.clone(), GenreLookup)
        .sweep_interval(Duration::from_secs(5))
        .build()?;

    let source_worker = WorkerBuilder::new(
        store.clone(),
        AlternateSourceLookup {
            seen: Default::default(),
        },
    )
    .retry(RetryPolicy::fixed(2, Duration::from_millis(100)))
    .sweep_interval(Duration::from_secs(5))
    .build()?;

    let mut watcher = CompletionWatcher::new(&bus);

    let genre_handle = tokio::spawn(genre_worker.run());
    let source_handle = tokio::spawn(source_worker.run());

    let start = Utc::now() - ChronoDuration::minutes(10);
    let plays = vec![
        PlayEvent::new("Boards of Canada", "Roygbiv", 142_000, start).with_album("Music Has the Right to Children"),
        // 30 seconds later: the previous play is marked skipped
        PlayEvent::new("Aphex Twin", "Xtal", 293_000, start + ChronoDuration::seconds(30))
            .with_album("Selected Ambient Works 85-92"),
        PlayEvent::new("Boards of Canada", "Olson", 91_000, start + ChronoDuration::seconds(400))
            .with_album("Music Has the Right to Children"),
    ];

    for event in &plays {
        let outcome = store.ingest(event).await?;
        println!("Ingested {} - {}: {:?}", event.artist_name, event.title, outcome.workflow_id());
    }

    // Same track at the same time again: a no-op
    let duplicate = store.ingest(&plays[0]).await?;
    println!("Duplicate recorded again? {}", duplicate.is_recorded());

    for _ in 0..plays.len() {
        let Ok(Some(state)) =
            tokio::time::timeout(Duration::from_secs(10), watcher.next_complete()).await
        else {
            println!("Timed out waiting for completion");
            break;
        };

        if let Some(summary) = store.play_summary(state.workflow_id).await? {
            println!(
                "Complete: {} - {} [{}] skipped={} code={:?}",
                summary.artist,
                summary.title,
                summary.genres.join(", "),
                summary.skipped,
                summary.youtube_code
            );
        }
    }

    genre_handle.abort();
    source_handle.abort();
    Ok(())
}
