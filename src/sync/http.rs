//! Remote peer speaking the CouchDB replication endpoints.
//!
//! - `GET <url>/_changes?since=<seq>&include_docs=true&limit=<n>`
//! - `POST <url>/_bulk_docs` with `new_edits: false`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::peer::{ChangeBatch, Checkpoint, ReplicationPeer};
use crate::document::{Document, StoredRevision};
use crate::error::BackendError;

/// Timeout for a single request to the remote collection.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Changes requested per page.
const CHANGES_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    results: Vec<ChangeRow>,
    last_seq: Value,
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    #[serde(default)]
    doc: Option<Document>,
}

#[derive(Debug, Serialize)]
struct BulkDocsRequest {
    docs: Vec<Document>,
    new_edits: bool,
}

/// Per-document entry of a `_bulk_docs` response. With `new_edits: false`
/// servers may list only the rejected documents.
#[derive(Debug, Deserialize)]
struct BulkDocsRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl BulkDocsRow {
    fn describe_failure(&self) -> Option<String> {
        let error = self.error.as_deref()?;
        Some(format!(
            "{}: {} ({})",
            self.id.as_deref().unwrap_or("?"),
            error,
            self.reason.as_deref().unwrap_or("no reason")
        ))
    }
}

/// Remote collection addressed by URL.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the collection URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }
}

#[async_trait]
impl ReplicationPeer for HttpPeer {
    async fn changes_since(&self, since: &Checkpoint) -> Result<ChangeBatch, BackendError> {
        let limit = CHANGES_LIMIT.to_string();
        let response = self
            .client
            .get(self.endpoint("_changes"))
            .query(&[
                ("since", since.as_query().as_str()),
                ("include_docs", "true"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Http(format!(
                "GET _changes returned status {}",
                response.status()
            )));
        }

        let body: ChangesResponse = response.json().await?;
        let mut changes = Vec::with_capacity(body.results.len());
        for row in body.results {
            // Rows without a body (e.g. design documents filtered server-side)
            if let Some(doc) = row.doc {
                changes.push(StoredRevision::from_document(doc)?);
            }
        }

        Ok(ChangeBatch {
            changes,
            last_seq: Checkpoint::from_value(body.last_seq),
        })
    }

    async fn apply_replicated(&self, revisions: Vec<StoredRevision>) -> Result<usize, BackendError> {
        if revisions.is_empty() {
            return Ok(0);
        }

        let count = revisions.len();
        let request = BulkDocsRequest {
            docs: revisions.iter().map(StoredRevision::to_document).collect(),
            new_edits: false,
        };

        let response = self
            .client
            .post(self.endpoint("_bulk_docs"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Http(format!(
                "POST _bulk_docs returned status {}",
                response.status()
            )));
        }

        // A 201 can still carry per-document rejections
        let rows: Vec<BulkDocsRow> = response.json().await?;
        let failures: Vec<String> = rows.iter().filter_map(BulkDocsRow::describe_failure).collect();
        if !failures.is_empty() {
            return Err(BackendError::Http(format!(
                "_bulk_docs rejected {} of {} documents: {}",
                failures.len(),
                count,
                failures.join(", ")
            )));
        }

        Ok(count)
    }
}
