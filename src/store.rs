//! The object store.
//!
//! [`Store`] exposes CRUD on plain JSON objects over a [`DocumentBackend`].
//! Revisions are handled for the caller: reads return `_rev`, writes carry
//! the revision of the object just read so the backend can reject updates
//! that raced with another writer. Conflicts are surfaced, never retried.
//!
//! The store also owns at most one replication session with the remote
//! collection of its identity (see [`Store::connect`]).

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{BulkEntry, DocumentBackend};
use crate::document::{
    merge, object_to_document, to_document, to_object, Document, Object, ObjectKey, DELETED, ID,
    REV,
};
use crate::error::{BulkError, StoreError};
use crate::remote::RemoteConfig;
use crate::sync::{SyncHandle, SyncOptions};

/// Result of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    /// Every object the operation touched, in listing order. Objects whose
    /// write succeeded carry the new `_rev`; failed ones keep the old one.
    pub objects: Vec<Object>,
    /// Entries the backend rejected.
    pub failures: Vec<BulkError>,
}

impl BulkOutcome {
    /// True when no entry failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// CRUD facade over a revisioned backend, plus the replication session.
pub struct Store<B> {
    backend: B,
    remote: RemoteConfig,
    sync_options: SyncOptions,
    session: Option<SyncHandle>,
}

impl<B: DocumentBackend> Store<B> {
    pub fn new(backend: B, remote: RemoteConfig) -> Self {
        Self {
            backend,
            remote,
            sync_options: SyncOptions::default(),
            session: None,
        }
    }

    /// Overrides how sessions started by [`Store::connect`] run.
    pub fn with_sync_options(mut self, options: SyncOptions) -> Self {
        self.sync_options = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// URL of the remote collection this store replicates with.
    pub fn remote_url(&self) -> String {
        self.remote.remote_url()
    }

    /// Stores a new object and returns it as persisted.
    ///
    /// The backend assigns an `id` when the object has none. `null` or any
    /// non-object value is rejected with `Invalid object`.
    pub async fn add(&self, object: impl Into<Value>) -> Result<Object, StoreError> {
        let document = to_document(&object.into())?;
        let created = self.backend.create(document).await?;
        debug!(id = %created.id, rev = %created.rev, "Added object");
        // Re-read to hand back exactly what the backend stored
        self.find(created.id.as_str()).await
    }

    /// Fetches an object by id, or by the `id` field of an object.
    pub async fn find<K: ObjectKey + ?Sized>(&self, key: &K) -> Result<Object, StoreError> {
        let id = key
            .object_id()
            .ok_or(StoreError::InvalidArgument("Invalid id"))?
            .to_owned();
        let document = self.backend.get(&id).await?;
        Ok(to_object(&document))
    }

    /// Returns the object at `id`, creating it from `object` if it cannot be
    /// found. An existing object is returned untouched.
    ///
    /// Any lookup failure leads to creation, not only a missing document.
    pub async fn find_or_add(&self, id: &str, object: impl Into<Value>) -> Result<Object, StoreError> {
        match self.find(id).await {
            Ok(found) => Ok(found),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(id, "Lookup failed, creating object anyway: {}", e);
                }
                let mut object = match object.into() {
                    Value::Object(map) => map,
                    _ => return Err(StoreError::InvalidArgument("Invalid object")),
                };
                object.insert(ID.to_string(), Value::String(id.to_string()));
                self.add(object).await
            }
        }
    }

    /// Every stored object, in backend order.
    pub async fn find_all(&self) -> Result<Vec<Object>, StoreError> {
        let documents = self.backend.list_all().await?;
        Ok(documents.iter().map(to_object).collect())
    }

    /// Merges `changes` onto the object at `id` and writes it back.
    ///
    /// Fails with `Conflict` if the object changed between the read and the
    /// write.
    pub async fn update(&self, id: &str, changes: impl Into<Value>) -> Result<Object, StoreError> {
        let changes = changes.into();
        if !changes.is_object() {
            return Err(StoreError::InvalidArgument("Invalid change"));
        }

        let mut object = self.find(id).await?;
        merge(&mut object, &changes);
        let written = self.backend.put(object_to_document(&object)).await?;
        debug!(id = %written.id, rev = %written.rev, "Updated object");

        self.find(written.id.as_str()).await
    }

    /// Updates the object at `id`, or creates it from `properties` when it
    /// does not exist. Other failures are returned as-is.
    pub async fn update_or_add(&self, id: &str, properties: impl Into<Value>) -> Result<Object, StoreError> {
        let properties = properties.into();
        let result = match self.find(id).await {
            Ok(existing) => {
                let existing_id = existing.object_id().unwrap_or(id).to_owned();
                self.update(&existing_id, properties.clone()).await
            }
            Err(e) => Err(e),
        };

        match result {
            Err(e) if e.is_not_found() => {
                let mut object = match properties {
                    Value::Object(map) => map,
                    _ => return Err(StoreError::InvalidArgument("Invalid object")),
                };
                object.insert(ID.to_string(), Value::String(id.to_string()));
                self.add(object).await
            }
            other => other,
        }
    }

    /// Merges `changes` onto every stored object in one bulk write.
    pub async fn update_all(&self, changes: impl Into<Value>) -> Result<BulkOutcome, StoreError> {
        let changes = changes.into();
        let mut objects = self.find_all().await?;
        for object in &mut objects {
            merge(object, &changes);
        }

        let documents: Vec<Document> = objects.iter().map(object_to_document).collect();
        let results = self.backend.bulk_write(documents).await?;
        let outcome = reconcile(objects, results);
        debug!(
            updated = outcome.objects.len() - outcome.failures.len(),
            failed = outcome.failures.len(),
            "Updated all objects"
        );
        Ok(outcome)
    }

    /// Deletes the object at `id`, returning its last field values with the
    /// tombstone revision.
    pub async fn remove(&self, id: &str) -> Result<Object, StoreError> {
        let mut object = self.find(id).await?;
        let rev = object
            .get(REV)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let deleted = self.backend.delete(id, &rev).await?;
        debug!(id, rev = %deleted.rev, "Removed object");

        object.insert(REV.to_string(), Value::String(deleted.rev));
        Ok(object)
    }

    /// Deletes every stored object in one bulk write.
    pub async fn remove_all(&self) -> Result<BulkOutcome, StoreError> {
        let objects = self.find_all().await?;
        let documents: Vec<Document> = objects
            .iter()
            .map(|object| {
                let mut document = object_to_document(object);
                document.insert(DELETED.to_string(), Value::Bool(true));
                document
            })
            .collect();

        let results = self.backend.bulk_write(documents).await?;
        let outcome = reconcile(objects, results);
        debug!(
            removed = outcome.objects.len() - outcome.failures.len(),
            failed = outcome.failures.len(),
            "Removed all objects"
        );
        Ok(outcome)
    }

    /// Starts continuous replication with the remote collection.
    ///
    /// Keeps the existing session if one is already running. Replication
    /// errors are reported on the session's event channel, not here.
    pub async fn connect(&mut self) {
        if self.is_connected() {
            debug!("Already connected, keeping the live session");
            return;
        }
        // A finished one-shot session is replaced
        if let Some(finished) = self.session.take() {
            finished.cancel().await;
        }

        let url = self.remote.remote_url();
        info!(remote = %url, "Connecting");
        self.session = Some(self.backend.start_sync(&url, self.sync_options.clone()));
    }

    /// Stops replication. Does nothing when not connected.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel().await;
            info!("Disconnected");
        }
    }

    /// True while a replication session is running. A one-shot session
    /// counts as disconnected once its round has finished.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(SyncHandle::is_active)
    }

    /// The current replication session, if any, including a finished
    /// one-shot session that has not been disconnected yet.
    pub fn session(&self) -> Option<&SyncHandle> {
        self.session.as_ref()
    }

    /// Destroys the local collection outright.
    ///
    /// Stops replication first so the wiped collection is not refilled.
    /// Unlike [`Store::remove_all`] nothing is reported per object.
    pub async fn clear(&mut self) -> Result<(), StoreError> {
        self.disconnect().await;
        self.backend.destroy().await?;
        info!("Cleared local collection");
        Ok(())
    }
}

/// Applies positional bulk results to the objects that produced them.
fn reconcile(mut objects: Vec<Object>, results: Vec<BulkEntry>) -> BulkOutcome {
    let mut failures = Vec::new();
    for (object, result) in objects.iter_mut().zip(results) {
        match result {
            Ok(written) => {
                object.insert(REV.to_string(), Value::String(written.rev));
            }
            Err(e) => {
                warn!("Bulk write rejected {}", e);
                failures.push(e);
            }
        }
    }
    BulkOutcome { objects, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::BulkErrorKind;
    use crate::revision::generation;
    use crate::sync::SyncStatus;
    use serde_json::json;
    use std::time::Duration;

    /// Store whose remote points at a port nothing listens on.
    fn test_store() -> Store<MemoryBackend> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Store::new(
            MemoryBackend::new(),
            RemoteConfig::new(format!("http://{}/_api", addr), "hoodie123"),
        )
    }

    fn rev_of(object: &Object) -> String {
        object[REV].as_str().unwrap().to_string()
    }

    fn rev_generation(object: &Object) -> u64 {
        generation(&rev_of(object)).unwrap()
    }

    #[tokio::test]
    async fn test_add_with_valid_object() {
        let store = test_store();
        let object = store.add(json!({"foo": "bar"})).await.unwrap();
        assert_eq!(object["foo"], json!("bar"));
        assert!(object["id"].as_str().is_some());
        assert_eq!(rev_generation(&object), 1);
    }

    #[tokio::test]
    async fn test_add_with_object_id() {
        let store = test_store();
        let object = store.add(json!({"id": "thing"})).await.unwrap();
        assert_eq!(object["id"], json!("thing"));
        assert!(!object.contains_key("_id"));
    }

    #[tokio::test]
    async fn test_add_with_invalid_object() {
        let store = test_store();
        let err = store.add(Value::Null).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "Invalid object");

        let err = store.add(None::<Object>).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid object");
    }

    #[tokio::test]
    async fn test_add_then_find_returns_input_plus_rev() {
        let store = test_store();
        let added = store
            .add(json!({"id": "thing", "title": "milk", "amount": 2}))
            .await
            .unwrap();
        let found = store.find("thing").await.unwrap();
        assert_eq!(found, added);
        assert_eq!(found["title"], json!("milk"));
        assert_eq!(found["amount"], json!(2));
        assert!(found.contains_key("_rev"));
    }

    #[tokio::test]
    async fn test_find_with_existing_object() {
        let store = test_store();
        store.add(json!({"id": "exists"})).await.unwrap();
        let object = store.find("exists").await.unwrap();
        assert_eq!(object["id"], json!("exists"));
    }

    #[tokio::test]
    async fn test_find_without_existing_object() {
        let store = test_store();
        let err = store.find("thing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "missing");
    }

    #[tokio::test]
    async fn test_find_by_object() {
        let store = test_store();
        store.add(json!({"id": "exists"})).await.unwrap();
        let object = store.find(&json!({"id": "exists"})).await.unwrap();
        assert_eq!(object["id"], json!("exists"));

        let added = store.find("exists").await.unwrap();
        assert_eq!(store.find(&added).await.unwrap(), added);
    }

    #[tokio::test]
    async fn test_find_by_object_without_id() {
        let store = test_store();
        let err = store.find(&json!({"foo": "bar"})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument("Invalid id")));
    }

    #[tokio::test]
    async fn test_find_or_add_finds_existing() {
        let store = test_store();
        let existing = store.add(json!({"id": "exists"})).await.unwrap();
        let object = store
            .find_or_add("exists", json!({"foo": "bar"}))
            .await
            .unwrap();
        assert_eq!(object, existing);
        assert!(!object.contains_key("foo"));
    }

    #[tokio::test]
    async fn test_find_or_add_adds_missing() {
        let store = test_store();
        let object = store
            .find_or_add("thing", json!({"foo": "bar"}))
            .await
            .unwrap();
        assert_eq!(object["id"], json!("thing"));
        assert_eq!(object["foo"], json!("bar"));
        assert_eq!(rev_generation(&object), 1);
    }

    #[tokio::test]
    async fn test_find_or_add_without_object() {
        let store = test_store();
        let err = store.find_or_add("thing", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid object");
    }

    #[tokio::test]
    async fn test_find_all() {
        let store = test_store();
        store.add(json!({"id": "exists"})).await.unwrap();
        let objects = store.find_all().await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["id"], json!("exists"));
    }

    #[tokio::test]
    async fn test_find_all_empty() {
        let store = test_store();
        assert!(store.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_with_object() {
        let store = test_store();
        let added = store.add(json!({"id": "exists"})).await.unwrap();
        let object = store.update("exists", json!({"foo": "bar"})).await.unwrap();

        assert_eq!(object["id"], json!("exists"));
        assert_eq!(object["foo"], json!("bar"));
        assert_eq!(rev_generation(&object), 2);
        assert_ne!(rev_of(&object), rev_of(&added));
    }

    #[tokio::test]
    async fn test_update_preserves_other_fields() {
        let store = test_store();
        store
            .add(json!({"id": "a", "keep": "me", "foo": "old"}))
            .await
            .unwrap();
        let object = store.update("a", json!({"foo": "new"})).await.unwrap();
        assert_eq!(object["keep"], json!("me"));
        assert_eq!(object["foo"], json!("new"));
    }

    #[tokio::test]
    async fn test_update_without_object() {
        let store = test_store();
        let err = store.update("nothinghere", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid change");
    }

    #[tokio::test]
    async fn test_update_missing_object() {
        let store = test_store();
        let err = store
            .update("nothinghere", json!({"foo": "bar"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_with_stale_revision_conflicts() {
        let store = test_store();
        let added = store.add(json!({"id": "a"})).await.unwrap();
        store.update("a", json!({"n": 1})).await.unwrap();

        // An explicit stale `_rev` in the changes is written as the expected revision
        let err = store
            .update("a", json!({"n": 2, "_rev": rev_of(&added)}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.find("a").await.unwrap()["n"], json!(1));
    }

    #[tokio::test]
    async fn test_update_or_add_updates() {
        let store = test_store();
        store.add(json!({"id": "exists"})).await.unwrap();
        let object = store
            .update_or_add("exists", json!({"foo": "bar"}))
            .await
            .unwrap();
        assert_eq!(rev_generation(&object), 2);
        assert_eq!(object["foo"], json!("bar"));
    }

    #[tokio::test]
    async fn test_update_or_add_adds() {
        let store = test_store();
        let object = store
            .update_or_add("thing", json!({"foo": "bar"}))
            .await
            .unwrap();
        assert_eq!(object["id"], json!("thing"));
        assert_eq!(rev_generation(&object), 1);
        assert_eq!(object["foo"], json!("bar"));
    }

    #[tokio::test]
    async fn test_update_or_add_surfaces_invalid_change() {
        let store = test_store();
        store.add(json!({"id": "exists"})).await.unwrap();
        let err = store.update_or_add("exists", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid change");
    }

    #[tokio::test]
    async fn test_update_all_with_objects() {
        let store = test_store();
        store.add(json!({"id": "exists"})).await.unwrap();
        store.add(json!({"id": "other", "foo": "old"})).await.unwrap();

        let outcome = store.update_all(json!({"foo": "bar"})).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.objects.len(), 2);
        for object in &outcome.objects {
            assert_eq!(object["foo"], json!("bar"));
            assert_eq!(rev_generation(object), 2);
        }
        assert_eq!(outcome.objects[0]["id"], json!("exists"));
        assert_eq!(
            store.find("other").await.unwrap(),
            outcome.objects[1]
        );
    }

    #[tokio::test]
    async fn test_update_all_without_objects() {
        let store = test_store();
        let outcome = store.update_all(json!({"foo": "bar"})).await.unwrap();
        assert!(outcome.objects.is_empty());
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_update_all_reports_conflicting_entry() {
        let store = test_store();
        let a = store.add(json!({"id": "a"})).await.unwrap();
        store.add(json!({"id": "b", "other": true})).await.unwrap();

        // Every object gets the same stale `_rev`; only `a` still matches it
        let outcome = store
            .update_all(json!({"_rev": rev_of(&a), "x": 1}))
            .await
            .unwrap();

        assert_eq!(outcome.objects.len(), 2);
        assert_eq!(rev_generation(&outcome.objects[0]), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].id, "b");
        assert_eq!(outcome.failures[0].reason, BulkErrorKind::Conflict);
        // The failed entry keeps the revision it was submitted with
        assert_eq!(rev_of(&outcome.objects[1]), rev_of(&a));
    }

    #[tokio::test]
    async fn test_remove_with_object() {
        let store = test_store();
        let added = store
            .add(json!({"id": "exists", "foo": "bar"}))
            .await
            .unwrap();
        let object = store.remove("exists").await.unwrap();

        assert_eq!(object["foo"], json!("bar"));
        assert_eq!(object["id"], json!("exists"));
        assert_ne!(rev_of(&object), rev_of(&added));
        assert_eq!(rev_generation(&object), 2);
        assert!(store.find("exists").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_without_object() {
        let store = test_store();
        let err = store.remove("exists").await.unwrap_err();
        assert_eq!(err.to_string(), "missing");
    }

    #[tokio::test]
    async fn test_remove_all_with_objects() {
        let store = test_store();
        store
            .add(json!({"id": "exists", "foo": "bar"}))
            .await
            .unwrap();
        store.add(json!({"id": "second"})).await.unwrap();

        let outcome = store.remove_all().await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.objects.len(), 2);
        assert_eq!(outcome.objects[0]["id"], json!("exists"));
        assert_eq!(outcome.objects[0]["foo"], json!("bar"));
        assert_eq!(rev_generation(&outcome.objects[0]), 2);
        assert!(store.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_without_objects() {
        let store = test_store();
        let outcome = store.remove_all().await.unwrap();
        assert!(outcome.objects.is_empty());
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let mut store = test_store();
        assert!(!store.is_connected());

        store.connect().await;
        assert!(store.is_connected());
        assert_eq!(store.session().unwrap().status(), SyncStatus::Active);

        store.disconnect().await;
        assert!(!store.is_connected());
        assert!(store.session().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let mut store = test_store();
        store.disconnect().await;
        store.disconnect().await;
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn test_connect_twice_keeps_one_session() {
        let mut store = test_store();
        store.connect().await;
        store.connect().await;
        assert!(store.is_connected());
        store.disconnect().await;
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn test_connect_reports_unreachable_remote_as_event() {
        let mut store = test_store().with_sync_options(SyncOptions {
            live: true,
            interval: Duration::from_millis(20),
        });
        store.connect().await;
        let mut events = store.session().unwrap().subscribe();

        let event = tokio::time::timeout(Duration::from_secs(40), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, crate::sync::SyncEvent::Error(_)));

        store.disconnect().await;
    }

    #[tokio::test]
    async fn test_clear_destroys_local_collection() {
        let mut store = test_store();
        store.add(json!({"id": "a"})).await.unwrap();
        store.connect().await;

        store.clear().await.unwrap();
        assert!(!store.is_connected());
        assert!(store.find_all().await.unwrap().is_empty());
        assert!(store.backend().revision("a").await.is_none());
    }

    #[tokio::test]
    async fn test_remote_url() {
        let store = Store::new(
            MemoryBackend::new(),
            RemoteConfig::new("http://localhost:8080/_api/", "hoodie123"),
        );
        assert_eq!(store.remote_url(), "http://localhost:8080/_api/user%2Fhoodie123");
    }

    #[tokio::test]
    async fn test_finished_one_shot_session_is_not_connected() {
        let mut store = test_store().with_sync_options(SyncOptions::once());
        store.connect().await;

        let status = store.session().unwrap().wait().await;
        assert_eq!(status, SyncStatus::Complete);
        assert!(!store.is_connected());

        // Connecting again starts a fresh session
        store.connect().await;
        assert!(store.session().is_some());
        store.disconnect().await;
        assert!(store.session().is_none());
    }
}
