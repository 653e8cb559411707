//! In-memory backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    accepts_replicated, delete_request, document_id, prepare_create, prepare_write, BulkEntry,
    DocumentBackend, WriteOk,
};
use crate::document::{Document, StoredRevision};
use crate::error::{BackendError, BulkError};
use crate::sync::{ChangeBatch, Checkpoint, HttpPeer, ReplicationPeer, Replicator, SyncHandle, SyncOptions};

/// Backend holding every revision in process memory.
///
/// Clones share the same underlying collection.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: BTreeMap<String, Entry>,
    seq: u64,
}

#[derive(Debug)]
struct Entry {
    revision: StoredRevision,
    seq: u64,
}

impl MemoryState {
    fn current(&self, id: &str) -> Option<&StoredRevision> {
        self.documents.get(id).map(|entry| &entry.revision)
    }

    fn store(&mut self, revision: StoredRevision) -> WriteOk {
        self.seq += 1;
        let ok = WriteOk {
            id: revision.id.clone(),
            rev: revision.rev.clone(),
        };
        self.documents.insert(
            revision.id.clone(),
            Entry {
                revision,
                seq: self.seq,
            },
        );
        ok
    }

    fn write(&mut self, document: Document) -> BulkEntry {
        let id = document_id(&document).unwrap_or_default();
        let revision = prepare_write(self.current(&id), document)
            .map_err(|reason| BulkError { id, reason })?;
        Ok(self.store(revision))
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live documents.
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state
            .documents
            .values()
            .filter(|entry| !entry.revision.deleted)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Latest revision for `id`, tombstones included.
    pub async fn revision(&self, id: &str) -> Option<StoredRevision> {
        let state = self.state.read().await;
        state.current(id).cloned()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn create(&self, document: Document) -> Result<WriteOk, BackendError> {
        let document = prepare_create(document);
        let mut state = self.state.write().await;
        state.write(document).map_err(|e| e.reason.into())
    }

    async fn get(&self, id: &str) -> Result<Document, BackendError> {
        let state = self.state.read().await;
        match state.current(id) {
            Some(revision) if !revision.deleted => Ok(revision.to_document()),
            _ => Err(BackendError::NotFound),
        }
    }

    async fn put(&self, document: Document) -> Result<WriteOk, BackendError> {
        let mut state = self.state.write().await;
        state.write(document).map_err(|e| e.reason.into())
    }

    async fn delete(&self, id: &str, rev: &str) -> Result<WriteOk, BackendError> {
        let mut state = self.state.write().await;
        state
            .write(delete_request(id, rev))
            .map_err(|e| e.reason.into())
    }

    async fn bulk_write(&self, documents: Vec<Document>) -> Result<Vec<BulkEntry>, BackendError> {
        let mut state = self.state.write().await;
        Ok(documents
            .into_iter()
            .map(|document| state.write(document))
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Document>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .values()
            .filter(|entry| !entry.revision.deleted)
            .map(|entry| entry.revision.to_document())
            .collect())
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.documents.clear();
        state.seq = 0;
        Ok(())
    }

    fn start_sync(&self, remote_url: &str, options: SyncOptions) -> SyncHandle {
        Replicator::new(self.clone(), HttpPeer::new(remote_url), options).spawn()
    }
}

#[async_trait]
impl ReplicationPeer for MemoryBackend {
    async fn changes_since(&self, since: &Checkpoint) -> Result<ChangeBatch, BackendError> {
        let since = since.as_local();
        let state = self.state.read().await;
        let mut entries: Vec<&Entry> = state
            .documents
            .values()
            .filter(|entry| entry.seq > since)
            .collect();
        entries.sort_by_key(|entry| entry.seq);

        let last_seq = entries.last().map(|entry| entry.seq).unwrap_or(since);
        Ok(ChangeBatch {
            changes: entries.into_iter().map(|entry| entry.revision.clone()).collect(),
            last_seq: Checkpoint::local(last_seq),
        })
    }

    async fn apply_replicated(&self, revisions: Vec<StoredRevision>) -> Result<usize, BackendError> {
        let mut state = self.state.write().await;
        let mut applied = 0;
        for revision in revisions {
            if accepts_replicated(state.current(&revision.id), &revision) {
                state.store(revision);
                applied += 1;
            }
        }
        Ok(applied)
    }
}
