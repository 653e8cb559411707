//! SQLite backend.
//!
//! Every document lives in one row of the `documents` table; the body is
//! stored as JSON text. Each write takes the next value of a table-wide
//! sequence so the change feed is a simple range scan on `seq`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use super::{
    accepts_replicated, delete_request, document_id, prepare_create, prepare_write, BulkEntry,
    DocumentBackend, WriteOk,
};
use crate::document::{Document, StoredRevision};
use crate::error::{BackendError, BulkError};
use crate::sync::{ChangeBatch, Checkpoint, HttpPeer, ReplicationPeer, Replicator, SyncHandle, SyncOptions};

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    rev: String,
    deleted: bool,
    seq: i64,
    body: String,
}

impl DocumentRow {
    fn into_revision(self) -> Result<StoredRevision, BackendError> {
        let body: Map<String, Value> = serde_json::from_str(&self.body)?;
        Ok(StoredRevision {
            id: self.id,
            rev: self.rev,
            deleted: self.deleted,
            body,
        })
    }
}

/// Backend persisting documents in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BackendError::Io(parent.to_path_buf(), e))?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        // A single connection serializes writers, which keeps the
        // read-check-write sequence in `write` free of lock upgrades.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!("Opened document database at {}", path.display());
        Ok(Self { pool, path })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn current(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Option<StoredRevision>, BackendError> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT id, rev, deleted, seq, body FROM documents WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        row.map(DocumentRow::into_revision).transpose()
    }

    async fn store(
        tx: &mut Transaction<'_, Sqlite>,
        revision: &StoredRevision,
    ) -> Result<WriteOk, BackendError> {
        let (max_seq,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM documents")
            .fetch_one(&mut **tx)
            .await?;
        let body = serde_json::to_string(&revision.body)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, rev, deleted, seq, body)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                rev = excluded.rev,
                deleted = excluded.deleted,
                seq = excluded.seq,
                body = excluded.body
            "#,
        )
        .bind(&revision.id)
        .bind(&revision.rev)
        .bind(revision.deleted)
        .bind(max_seq + 1)
        .bind(&body)
        .execute(&mut **tx)
        .await?;

        Ok(WriteOk {
            id: revision.id.clone(),
            rev: revision.rev.clone(),
        })
    }

    /// Validates and stores one document inside `tx`.
    ///
    /// The outer error is a storage fault; the inner one is the per-document
    /// verdict.
    async fn write(
        tx: &mut Transaction<'_, Sqlite>,
        document: Document,
    ) -> Result<BulkEntry, BackendError> {
        let id = document_id(&document).unwrap_or_default();
        let current = Self::current(tx, &id).await?;
        match prepare_write(current.as_ref(), document) {
            Ok(revision) => Ok(Ok(Self::store(tx, &revision).await?)),
            Err(reason) => Ok(Err(BulkError { id, reason })),
        }
    }

    async fn write_one(&self, document: Document) -> Result<WriteOk, BackendError> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::write(&mut tx, document).await?;
        match entry {
            Ok(ok) => {
                tx.commit().await?;
                Ok(ok)
            }
            Err(e) => Err(e.reason.into()),
        }
    }
}

#[async_trait]
impl DocumentBackend for SqliteBackend {
    async fn create(&self, document: Document) -> Result<WriteOk, BackendError> {
        self.write_one(prepare_create(document)).await
    }

    async fn get(&self, id: &str) -> Result<Document, BackendError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, rev, deleted, seq, body FROM documents WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_revision()?.to_document()),
            None => Err(BackendError::NotFound),
        }
    }

    async fn put(&self, document: Document) -> Result<WriteOk, BackendError> {
        self.write_one(document).await
    }

    async fn delete(&self, id: &str, rev: &str) -> Result<WriteOk, BackendError> {
        self.write_one(delete_request(id, rev)).await
    }

    async fn bulk_write(&self, documents: Vec<Document>) -> Result<Vec<BulkEntry>, BackendError> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(Self::write(&mut tx, document).await?);
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn list_all(&self) -> Result<Vec<Document>, BackendError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, rev, deleted, seq, body FROM documents WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_revision().map(|revision| revision.to_document()))
            .collect()
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?;
        tracing::debug!("Destroyed document database at {}", self.path.display());
        Ok(())
    }

    fn start_sync(&self, remote_url: &str, options: SyncOptions) -> SyncHandle {
        Replicator::new(self.clone(), HttpPeer::new(remote_url), options).spawn()
    }
}

#[async_trait]
impl ReplicationPeer for SqliteBackend {
    async fn changes_since(&self, since: &Checkpoint) -> Result<ChangeBatch, BackendError> {
        let since = since.as_local();
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, rev, deleted, seq, body FROM documents WHERE seq > ? ORDER BY seq",
        )
        .bind(since as i64)
        .fetch_all(&self.pool)
        .await?;

        let last_seq = rows
            .last()
            .map(|row| row.seq as u64)
            .unwrap_or(since);
        let changes = rows
            .into_iter()
            .map(DocumentRow::into_revision)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ChangeBatch {
            changes,
            last_seq: Checkpoint::local(last_seq),
        })
    }

    async fn apply_replicated(&self, revisions: Vec<StoredRevision>) -> Result<usize, BackendError> {
        let mut tx = self.pool.begin().await?;
        let mut applied = 0;
        for revision in revisions {
            let current = Self::current(&mut tx, &revision.id).await?;
            if accepts_replicated(current.as_ref(), &revision) {
                Self::store(&mut tx, &revision).await?;
                applied += 1;
            }
        }
        tx.commit().await?;
        Ok(applied)
    }
}
