//! Tests for play ingestion.

#![cfg(feature = "sqlite")]

use chrono::{DateTime, TimeZone, Utc};
use playflow::{
    Artist, Capability, EntityStore, IngestOutcome, NotificationBus, PlayEvent,
    SqliteEntityStore, StoreError, Topic, Track, WorkflowState,
};
use sqlx::sqlite::SqlitePoolOptions;

async fn setup_store() -> SqliteEntityStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteEntityStore::new(pool, NotificationBus::default());
    store.run_migrations().await.unwrap();
    store
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

async fn count(store: &SqliteEntityStore, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_new_play_creates_entities_and_workflow() {
    let store = setup_store().await;

    let event = PlayEvent::new("Stereolab", "French Disko", 200_000, at(0))
        .with_album("Jenny Ondioline")
        .with_track_external_id("sp:track:1")
        .with_artist_external_id("sp:artist:1");

    let outcome = store.ingest(&event).await.unwrap();
    let IngestOutcome::Recorded {
        workflow_id,
        play,
        skipped_previous,
    } = outcome
    else {
        panic!("expected a recorded play");
    };

    assert_eq!(play.played_at, at(0));
    assert!(!play.skipped);
    assert_eq!(play.workflow_id, Some(workflow_id));
    assert_eq!(skipped_previous, None);

    assert_eq!(count(&store, "artists").await, 1);
    assert_eq!(count(&store, "albums").await, 1);
    assert_eq!(count(&store, "tracks").await, 1);
    assert_eq!(count(&store, "plays").await, 1);

    let state = store.workflow(workflow_id).await.unwrap().unwrap();
    assert!(state.init_done);
    assert!(state.is_required(Capability::GENRE));
    assert!(state.is_required(Capability::ALTERNATE_SOURCE));
    assert!(!state.is_done(Capability::GENRE));
    assert!(!state.is_done(Capability::ALTERNATE_SOURCE));
    assert!(!state.is_complete());
}

#[tokio::test]
async fn test_new_play_notification_order() {
    let store = setup_store().await;
    let mut sub = store.bus().subscribe_all();

    let event = PlayEvent::new("Broadcast", "Tears in the Typing Pool", 180_000, at(0))
        .with_album("Tender Buttons");
    let workflow_id = store.ingest(&event).await.unwrap().workflow_id().unwrap();

    let received = sub.drain();
    let topics: Vec<Topic> = received.iter().map(|n| n.topic).collect();
    assert_eq!(
        topics,
        vec![
            Topic::WorkflowProgress,
            Topic::ArtistInserted,
            Topic::WorkflowProgress,
            Topic::TrackInserted,
            Topic::PlayInserted,
            Topic::WorkflowProgress,
        ]
    );

    // Each progress notification carries the full record at that point
    let first: WorkflowState = received[0].decode().unwrap();
    assert_eq!(first.workflow_id, workflow_id);
    assert!(first.is_required(Capability::GENRE));
    assert!(!first.is_required(Capability::ALTERNATE_SOURCE));
    assert!(!first.init_done);

    let artist: Artist = received[1].decode().unwrap();
    assert_eq!(artist.name, "Broadcast");
    assert_eq!(artist.workflow_id, Some(workflow_id));

    let second: WorkflowState = received[2].decode().unwrap();
    assert!(second.is_required(Capability::ALTERNATE_SOURCE));

    let track: Track = received[3].decode().unwrap();
    assert_eq!(track.title, "Tears in the Typing Pool");
    assert_eq!(received[3].payload["duration_ms"], 180_000);
    assert_eq!(received[3].payload["download_status"], "none");

    let last: WorkflowState = received[5].decode().unwrap();
    assert!(last.init_done);
    assert_eq!(received[5].payload["genre_required"], true);
    assert_eq!(received[5].payload["yt_done"], false);
}

#[tokio::test]
async fn test_duplicate_play_is_already_recorded() {
    let store = setup_store().await;

    let event = PlayEvent::new("Low", "Words", 300_000, at(0));
    assert!(store.ingest(&event).await.unwrap().is_recorded());

    let mut sub = store.bus().subscribe_all();
    let outcome = store.ingest(&event).await.unwrap();

    assert_eq!(outcome, IngestOutcome::AlreadyRecorded);
    assert_eq!(count(&store, "plays").await, 1);
    // Rolled back: no second workflow record, nothing published
    assert_eq!(count(&store, "workflow_state").await, 1);
    assert!(sub.drain().is_empty());
}

#[tokio::test]
async fn test_known_track_does_not_require_enrichment() {
    let store = setup_store().await;

    let first = PlayEvent::new("Low", "Words", 300_000, at(0));
    store.ingest(&first).await.unwrap();

    let mut sub = store.bus().subscribe_all();
    let again = PlayEvent::new("Low", "Words", 300_000, at(400));
    let workflow_id = store.ingest(&again).await.unwrap().workflow_id().unwrap();

    let topics: Vec<Topic> = sub.drain().iter().map(|n| n.topic).collect();
    assert_eq!(topics, vec![Topic::PlayInserted, Topic::WorkflowProgress]);

    let state = store.workflow(workflow_id).await.unwrap().unwrap();
    assert!(!state.is_required(Capability::GENRE));
    assert!(!state.is_required(Capability::ALTERNATE_SOURCE));
    assert!(state.is_complete());

    assert_eq!(count(&store, "tracks").await, 1);
    assert_eq!(count(&store, "plays").await, 2);
}

#[tokio::test]
async fn test_track_matched_by_external_id() {
    let store = setup_store().await;

    let first = PlayEvent::new("Can", "Vitamin C", 211_000, at(0))
        .with_album("Ege Bamyasi")
        .with_track_external_id("sp:track:vc");
    let second = PlayEvent::new("Can", "Vitamin C (Remastered)", 211_000, at(600))
        .with_album("Ege Bamyasi")
        .with_track_external_id("sp:track:vc");

    let IngestOutcome::Recorded { play: p1, .. } = store.ingest(&first).await.unwrap() else {
        panic!("expected a recorded play");
    };
    let IngestOutcome::Recorded { play: p2, .. } = store.ingest(&second).await.unwrap() else {
        panic!("expected a recorded play");
    };

    assert_eq!(p1.track_id, p2.track_id);
    assert_eq!(count(&store, "tracks").await, 1);
}

#[tokio::test]
async fn test_same_title_on_different_albums_are_distinct_tracks() {
    let store = setup_store().await;

    store
        .ingest(&PlayEvent::new("Can", "Halleluhwah", 1_100_000, at(0)).with_album("Tago Mago"))
        .await
        .unwrap();
    store
        .ingest(
            &PlayEvent::new("Can", "Halleluhwah", 600_000, at(2_000)).with_album("Anthology"),
        )
        .await
        .unwrap();

    assert_eq!(count(&store, "artists").await, 1);
    assert_eq!(count(&store, "albums").await, 2);
    assert_eq!(count(&store, "tracks").await, 2);
}

#[tokio::test]
async fn test_genres_attached_on_ingest() {
    let store = setup_store().await;

    let event = PlayEvent::new("Slowdive", "Alison", 230_000, at(0))
        .with_album("Souvlaki")
        .with_genres(["shoegaze", "dream pop", " ", "shoegaze"]);
    let workflow_id = store.ingest(&event).await.unwrap().workflow_id().unwrap();

    let summary = store.play_summary(workflow_id).await.unwrap().unwrap();
    assert_eq!(summary.genres, vec!["dream pop", "shoegaze"]);
    assert_eq!(count(&store, "genres").await, 2);
}

#[tokio::test]
async fn test_blank_artist_is_malformed() {
    let store = setup_store().await;
    let mut sub = store.bus().subscribe_all();

    let event = PlayEvent::new("   ", "Untitled", 100_000, at(0));
    let err = store.ingest(&event).await.unwrap_err();

    assert!(matches!(err, StoreError::MalformedEvent(_)));
    assert_eq!(count(&store, "workflow_state").await, 0);
    assert!(sub.drain().is_empty());
}

#[tokio::test]
async fn test_non_positive_duration_is_malformed() {
    let store = setup_store().await;
    let mut sub = store.bus().subscribe_all();

    for duration_ms in [0, -5] {
        let event = PlayEvent::new("Autechre", "Bad Length", duration_ms, at(0));
        let err = store.ingest(&event).await.unwrap_err();
        assert!(matches!(err, StoreError::MalformedEvent(_)), "got {err:?}");
    }

    assert_eq!(count(&store, "workflow_state").await, 0);
    assert_eq!(count(&store, "artists").await, 0);
    assert!(sub.drain().is_empty());
}

#[tokio::test]
async fn test_seed_artist_notifies_without_workflow() {
    let store = setup_store().await;
    let mut sub = store.bus().subscribe_all();

    let artist = store.seed_artist("Cocteau Twins").await.unwrap();
    assert_eq!(artist.workflow_id, None);

    let received = sub.drain();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic, Topic::ArtistInserted);
    assert!(received[0].payload["workflow_id"].is_null());
    assert_eq!(count(&store, "workflow_state").await, 0);

    // Seeding again returns the existing row and stays quiet
    let again = store.seed_artist("Cocteau Twins").await.unwrap();
    assert_eq!(again.id, artist.id);
    assert!(sub.drain().is_empty());

    // A play by the seeded artist no longer requires genre lookup
    let workflow_id = store
        .ingest(&PlayEvent::new("Cocteau Twins", "Heaven or Las Vegas", 297_000, at(0)))
        .await
        .unwrap()
        .workflow_id()
        .unwrap();
    let state = store.workflow(workflow_id).await.unwrap().unwrap();
    assert!(!state.is_required(Capability::GENRE));
    assert!(state.is_required(Capability::ALTERNATE_SOURCE));
}

#[tokio::test]
async fn test_notification_only_after_commit() {
    let store = std::sync::Arc::new(setup_store().await);
    let mut sub = store.bus().subscribe(&[Topic::PlayInserted]);

    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            let notification = sub.recv().await.unwrap();
            let workflow_id = notification.workflow_id().unwrap();
            // The row behind the notification is already visible
            store.workflow(workflow_id).await.unwrap()
        })
    };

    store
        .ingest(&PlayEvent::new("Grouper", "Heavy Water", 240_000, at(0)))
        .await
        .unwrap();

    let state = reader.await.unwrap().expect("workflow visible to reader");
    assert!(state.init_done);
}

#[tokio::test]
async fn test_previous_play_summary_and_announce_gate() {
    let store = setup_store().await;

    store
        .ingest(&PlayEvent::new("Low", "Words", 300_000, at(0)).with_album("I Could Live in Hope"))
        .await
        .unwrap();
    let workflow_id = store
        .ingest(&PlayEvent::new("Low", "Words", 300_000, at(400)).with_album("I Could Live in Hope"))
        .await
        .unwrap()
        .workflow_id()
        .unwrap();

    let current = store.play_summary(workflow_id).await.unwrap().unwrap();
    assert_eq!(current.artist, "Low");
    assert_eq!(current.album, "I Could Live in Hope");

    let previous = store
        .previous_play_summary(current.played_at)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(previous.played_at, at(0));
    assert!(current.is_repeat_of(&previous));
    assert!(!current.should_announce(Some(&previous)));

    assert!(store.previous_play_summary(at(0)).await.unwrap().is_none());
}
