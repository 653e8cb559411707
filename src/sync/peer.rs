//! The replication seam: anything that can list its changes and accept
//! revisions written elsewhere.

use async_trait::async_trait;
use serde_json::Value;

use crate::document::StoredRevision;
use crate::error::BackendError;

/// Position in a peer's change feed.
///
/// Local backends use integer sequence numbers; remote peers may hand out
/// opaque tokens, which are passed back verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint(Value);

impl Checkpoint {
    /// The beginning of every feed.
    pub fn start() -> Self {
        Checkpoint(Value::from(0u64))
    }

    pub fn local(seq: u64) -> Self {
        Checkpoint(Value::from(seq))
    }

    pub fn from_value(value: Value) -> Self {
        Checkpoint(value)
    }

    /// Interprets the checkpoint as a local sequence number; unknown shapes
    /// restart from zero.
    pub fn as_local(&self) -> u64 {
        match &self.0 {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Renders the checkpoint for a `since=` query parameter.
    pub fn as_query(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::start()
    }
}

/// One page of a change feed.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Latest revision of every document changed after the requested
    /// checkpoint, tombstones included, oldest change first.
    pub changes: Vec<StoredRevision>,
    /// Checkpoint to request next.
    pub last_seq: Checkpoint,
}

#[async_trait]
pub trait ReplicationPeer: Send + Sync + 'static {
    async fn changes_since(&self, since: &Checkpoint) -> Result<ChangeBatch, BackendError>;

    /// Stores revisions produced by another replica, keeping their revision
    /// tokens. Returns how many replaced the local state.
    async fn apply_replicated(&self, revisions: Vec<StoredRevision>) -> Result<usize, BackendError>;
}
