//! Replication between the local collection and its remote counterpart.
//!
//! ## Model
//!
//! Both sides expose a change feed ([`ReplicationPeer::changes_since`]) and
//! accept revisions written elsewhere ([`ReplicationPeer::apply_replicated`]).
//! A [`Replicator`] pumps changes in both directions; revision conflicts are
//! settled deterministically (higher generation, then greater token), so
//! every replica converges on the same winner.
//!
//! ## Remote
//!
//! [`HttpPeer`] talks to a CouchDB-compatible collection over HTTP.

mod http;
mod peer;
mod replicator;

pub use http::HttpPeer;
pub use peer::{ChangeBatch, Checkpoint, ReplicationPeer};
pub use replicator::{
    Checkpoints, Replicator, RoundStats, SyncEvent, SyncHandle, SyncOptions, SyncStatus,
};
