//! Revisioned document backends.
//!
//! A backend persists documents keyed by `_id`, assigns a fresh `_rev` on
//! every write and rejects writes whose expected revision is stale. Deleted
//! documents stay behind as tombstones so replication can carry the delete.
//!
//! Two implementations ship with the crate:
//! - [`MemoryBackend`]: in-process, for tests and throwaway stores
//! - [`SqliteBackend`]: a single SQLite file via sqlx

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::document::{Document, StoredRevision, DELETED, DOC_ID, REV};
use crate::error::{BackendError, BulkError, BulkErrorKind};
use crate::revision;
use crate::sync::{SyncHandle, SyncOptions};

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOk {
    pub id: String,
    pub rev: String,
}

/// Positional result of one bulk write entry.
pub type BulkEntry = Result<WriteOk, BulkError>;

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Stores a new document, generating an `_id` when none is given.
    async fn create(&self, document: Document) -> Result<WriteOk, BackendError>;

    /// Fetches the live document at `id`.
    async fn get(&self, id: &str) -> Result<Document, BackendError>;

    /// Writes a document whose `_rev` must match the stored revision.
    async fn put(&self, document: Document) -> Result<WriteOk, BackendError>;

    /// Deletes `id`, which must currently be at revision `rev`.
    async fn delete(&self, id: &str, rev: &str) -> Result<WriteOk, BackendError>;

    /// Applies each document with `put` semantics; one result per input, in
    /// input order. Documents flagged `_deleted` are deleted.
    async fn bulk_write(&self, documents: Vec<Document>) -> Result<Vec<BulkEntry>, BackendError>;

    /// Every live document, ascending by id.
    async fn list_all(&self) -> Result<Vec<Document>, BackendError>;

    /// Removes every document, tombstones included.
    async fn destroy(&self) -> Result<(), BackendError>;

    /// Starts replicating with the remote collection at `remote_url`.
    fn start_sync(&self, remote_url: &str, options: SyncOptions) -> SyncHandle;
}

/// Fills in a generated id and drops any caller-supplied revision so the
/// document is written as a brand-new one.
pub(crate) fn prepare_create(mut document: Document) -> Document {
    let has_id = matches!(document.get(DOC_ID), Some(Value::String(_)));
    if !has_id {
        document.insert(DOC_ID.to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    document.remove(REV);
    document
}

/// Returns the `_id` of a document or an invalid-document error.
pub(crate) fn document_id(document: &Document) -> Result<String, BulkErrorKind> {
    match document.get(DOC_ID) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(BulkErrorKind::Invalid("missing _id".to_string())),
    }
}

/// Validates a write against the current stored revision and produces the
/// revision to persist.
///
/// Rules:
/// - live document: `_rev` must equal the stored revision
/// - tombstone or absent: `_rev` may be omitted (re-create); a given `_rev`
///   must match the tombstone, or the write is `NotFound` when nothing exists
/// - deleting something that is not live is `NotFound`
pub(crate) fn prepare_write(
    current: Option<&StoredRevision>,
    mut document: Document,
) -> Result<StoredRevision, BulkErrorKind> {
    let id = document_id(&document)?;
    document.remove(DOC_ID);
    let expected = match document.remove(REV) {
        Some(Value::String(rev)) => Some(rev),
        Some(Value::Null) | None => None,
        Some(_) => return Err(BulkErrorKind::Invalid("_rev must be a string".to_string())),
    };
    let deleted = matches!(document.remove(DELETED), Some(Value::Bool(true)));

    let live = current.filter(|c| !c.deleted);
    match (live, current, expected.as_deref()) {
        (Some(live), _, Some(expected)) if live.rev == expected => {}
        (Some(_), _, _) => return Err(BulkErrorKind::Conflict),
        (None, _, _) if deleted => return Err(BulkErrorKind::NotFound),
        (None, None, Some(_)) => return Err(BulkErrorKind::NotFound),
        (None, Some(tombstone), Some(expected)) if tombstone.rev != expected => {
            return Err(BulkErrorKind::Conflict)
        }
        (None, _, _) => {}
    }

    let rev = revision::next(current.map(|c| c.rev.as_str()), &document, deleted);
    Ok(StoredRevision {
        id,
        rev,
        deleted,
        body: document,
    })
}

/// Decides whether a replicated revision should replace the local one.
pub(crate) fn accepts_replicated(current: Option<&StoredRevision>, incoming: &StoredRevision) -> bool {
    match current {
        None => true,
        Some(current) => revision::wins(&incoming.rev, &current.rev),
    }
}

/// Builds the tombstone request for a single delete.
pub(crate) fn delete_request(id: &str, rev: &str) -> Document {
    let mut document = Document::new();
    document.insert(DOC_ID.to_string(), Value::String(id.to_string()));
    document.insert(REV.to_string(), Value::String(rev.to_string()));
    document.insert(DELETED.to_string(), Value::Bool(true));
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn stored(rev: &str, deleted: bool) -> StoredRevision {
        StoredRevision {
            id: "a".to_string(),
            rev: rev.to_string(),
            deleted,
            body: Document::new(),
        }
    }

    #[test]
    fn test_prepare_create_generates_id() {
        let document = prepare_create(doc(json!({"foo": "bar", "_rev": "9-z"})));
        assert!(document.get("_id").and_then(Value::as_str).is_some());
        assert!(!document.contains_key("_rev"));
    }

    #[test]
    fn test_prepare_create_keeps_given_id() {
        let document = prepare_create(doc(json!({"_id": "thing"})));
        assert_eq!(document.get("_id"), Some(&json!("thing")));
    }

    #[test]
    fn test_new_document_without_rev() {
        let written = prepare_write(None, doc(json!({"_id": "a", "foo": 1}))).unwrap();
        assert_eq!(written.id, "a");
        assert!(written.rev.starts_with("1-"));
        assert_eq!(written.body.get("foo"), Some(&json!(1)));
        assert!(!written.body.contains_key("_id"));
    }

    #[test]
    fn test_update_requires_matching_rev() {
        let current = stored("1-abc", false);
        assert_eq!(
            prepare_write(Some(&current), doc(json!({"_id": "a"}))).unwrap_err(),
            BulkErrorKind::Conflict
        );
        assert_eq!(
            prepare_write(Some(&current), doc(json!({"_id": "a", "_rev": "1-zzz"}))).unwrap_err(),
            BulkErrorKind::Conflict
        );
        let written = prepare_write(Some(&current), doc(json!({"_id": "a", "_rev": "1-abc"}))).unwrap();
        assert!(written.rev.starts_with("2-"));
    }

    #[test]
    fn test_rev_for_absent_document_is_not_found() {
        assert_eq!(
            prepare_write(None, doc(json!({"_id": "a", "_rev": "1-abc"}))).unwrap_err(),
            BulkErrorKind::NotFound
        );
    }

    #[test]
    fn test_delete_of_absent_document_is_not_found() {
        let tombstone = stored("2-abc", true);
        assert_eq!(
            prepare_write(Some(&tombstone), delete_request("a", "2-abc")).unwrap_err(),
            BulkErrorKind::NotFound
        );
    }

    #[test]
    fn test_recreate_over_tombstone_continues_generation() {
        let tombstone = stored("2-abc", true);
        let written = prepare_write(Some(&tombstone), doc(json!({"_id": "a"}))).unwrap();
        assert!(written.rev.starts_with("3-"));
        assert!(!written.deleted);
    }

    #[test]
    fn test_missing_id_is_invalid() {
        assert!(matches!(
            prepare_write(None, doc(json!({"foo": 1}))),
            Err(BulkErrorKind::Invalid(_))
        ));
    }

    #[test]
    fn test_accepts_replicated() {
        let current = stored("2-abc", false);
        assert!(accepts_replicated(None, &current));
        assert!(accepts_replicated(Some(&stored("1-abc", false)), &current));
        assert!(!accepts_replicated(Some(&stored("3-abc", false)), &current));
    }
}
