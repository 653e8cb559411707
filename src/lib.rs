//! Hoodie Store
//!
//! CRUD on plain JSON objects over a local revisioned document database,
//! with continuous replication to a per-identity remote collection.
//!
//! ```no_run
//! use hoodie_store::{MemoryBackend, RemoteConfig, Store};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), hoodie_store::StoreError> {
//! let mut store = Store::new(
//!     MemoryBackend::new(),
//!     RemoteConfig::new("http://localhost:8080/_api", "hoodie123"),
//! );
//! let todo = store.add(json!({"title": "buy milk"})).await?;
//! let id = todo["id"].as_str().unwrap_or_default().to_string();
//! store.update(&id, json!({"done": true})).await?;
//!
//! store.connect().await;
//! store.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod document;
pub mod error;
pub mod remote;
pub mod revision;
pub mod store;
pub mod sync;

pub use backend::{DocumentBackend, MemoryBackend, SqliteBackend, WriteOk};
pub use document::{to_document, to_object, Document, Object, ObjectKey};
pub use error::{BackendError, BulkError, BulkErrorKind, StoreError};
pub use remote::RemoteConfig;
pub use store::{BulkOutcome, Store};
pub use sync::{SyncEvent, SyncHandle, SyncOptions, SyncStatus};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
