//! Entity storage.

mod entity_store;

#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite_store;

pub use entity_store::{DownloadQueue, EntityStore, IngestOutcome, StoreError, MAX_ERROR_LEN};

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteEntityStore;
