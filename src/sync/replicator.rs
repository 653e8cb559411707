//! Background replication between a local backend and a remote peer.
//!
//! Each round pushes local changes to the remote, then pulls remote changes
//! into the local backend. A live session repeats rounds on a fixed interval
//! until cancelled; a one-shot session runs a single round.
//!
//! Errors never end a live session: they are logged, published as
//! [`SyncEvent::Error`], and the round is retried on the next tick.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::peer::{Checkpoint, ReplicationPeer};
use crate::document::StoredRevision;
use crate::error::BackendError;

/// Upper bound on change-feed pages drained per direction per round.
const MAX_PAGES_PER_ROUND: usize = 100;
/// Capacity of the event channel; slow subscribers miss old events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How a replication session runs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Keep replicating until cancelled.
    pub live: bool,
    /// Delay between rounds of a live session.
    pub interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            live: true,
            interval: Duration::from_secs(5),
        }
    }
}

impl SyncOptions {
    /// A session that runs one round and stops.
    pub fn once() -> Self {
        Self {
            live: false,
            ..Self::default()
        }
    }
}

/// Notifications published by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Local revisions accepted by the remote.
    Pushed(usize),
    /// Remote revisions that replaced local state.
    Pulled(usize),
    /// A round failed; it will be retried if the session is live.
    Error(String),
}

/// Lifecycle of a session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Active,
    /// A one-shot session finished its round.
    Complete,
    Cancelled,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Active)
    }
}

/// Counts from one replication round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub pushed: usize,
    pub pulled: usize,
}

/// Per-session feed positions, one per direction.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    pub push: Checkpoint,
    pub pull: Checkpoint,
    /// Revisions pulled from the remote that have not yet passed through
    /// the local feed; they are not pushed back.
    received: HashSet<RevisionKey>,
}

type RevisionKey = (String, String);

fn revision_key(revision: &StoredRevision) -> RevisionKey {
    (revision.id.clone(), revision.rev.clone())
}

/// Replicates between `local` and `remote`.
pub struct Replicator<L, R> {
    local: L,
    remote: R,
    options: SyncOptions,
}

impl<L, R> Replicator<L, R>
where
    L: ReplicationPeer,
    R: ReplicationPeer,
{
    pub fn new(local: L, remote: R, options: SyncOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    /// Runs one push-then-pull round, advancing `checkpoints`.
    pub async fn run_once(&self, checkpoints: &mut Checkpoints) -> Result<RoundStats, BackendError> {
        let push = transfer(
            &self.local,
            &self.remote,
            &mut checkpoints.push,
            &checkpoints.received,
            None,
        )
        .await?;
        if push.drained {
            checkpoints.received.clear();
        }

        let pull = transfer(
            &self.remote,
            &self.local,
            &mut checkpoints.pull,
            &HashSet::new(),
            Some(&mut checkpoints.received),
        )
        .await?;

        Ok(RoundStats {
            pushed: push.applied,
            pulled: pull.applied,
        })
    }

    /// Spawns the session onto the current tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        let cancel = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SyncStatus::Active);

        let task_cancel = cancel.clone();
        let task_events = events.clone();
        let task = tokio::spawn(async move {
            let status = self.run(task_cancel, task_events).await;
            let _ = status_tx.send(status);
        });

        SyncHandle {
            cancel,
            task: Some(task),
            events,
            status: status_rx,
        }
    }

    async fn run(self, cancel: CancellationToken, events: broadcast::Sender<SyncEvent>) -> SyncStatus {
        let mut checkpoints = Checkpoints::default();
        let mut ticker = interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            live = self.options.live,
            interval_secs = self.options.interval.as_secs(),
            "Replication session started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_once(&mut checkpoints) => result,
            };

            match result {
                Ok(stats) => {
                    if stats.pushed > 0 {
                        let _ = events.send(SyncEvent::Pushed(stats.pushed));
                    }
                    if stats.pulled > 0 {
                        let _ = events.send(SyncEvent::Pulled(stats.pulled));
                    }
                    debug!(pushed = stats.pushed, pulled = stats.pulled, "Replication round done");
                }
                Err(e) => {
                    warn!("Replication round failed: {}", e);
                    let _ = events.send(SyncEvent::Error(e.to_string()));
                }
            }

            if !self.options.live {
                info!("Replication session complete");
                return SyncStatus::Complete;
            }
        }

        info!("Replication session cancelled");
        SyncStatus::Cancelled
    }
}

struct Transfer {
    applied: usize,
    /// The source feed was read to its end.
    drained: bool,
}

/// Drains `from`'s change feed past `checkpoint` into `to`, skipping the
/// revisions in `skip` and recording what was sent in `sent`.
async fn transfer<F, T>(
    from: &F,
    to: &T,
    checkpoint: &mut Checkpoint,
    skip: &HashSet<RevisionKey>,
    mut sent: Option<&mut HashSet<RevisionKey>>,
) -> Result<Transfer, BackendError>
where
    F: ReplicationPeer,
    T: ReplicationPeer,
{
    let mut applied = 0;
    for _ in 0..MAX_PAGES_PER_ROUND {
        let batch = from.changes_since(checkpoint).await?;
        if batch.changes.is_empty() {
            *checkpoint = batch.last_seq;
            return Ok(Transfer {
                applied,
                drained: true,
            });
        }

        let mut changes = batch.changes;
        changes.retain(|change| !skip.contains(&revision_key(change)));
        if let Some(sent) = sent.as_deref_mut() {
            sent.extend(changes.iter().map(revision_key));
        }
        if !changes.is_empty() {
            applied += to.apply_replicated(changes).await?;
        }
        *checkpoint = batch.last_seq;
    }
    Ok(Transfer {
        applied,
        drained: false,
    })
}

/// Handle to a running replication session.
///
/// Dropping the handle cancels the session without waiting for it.
#[derive(Debug)]
pub struct SyncHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    events: broadcast::Sender<SyncEvent>,
    status: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Subscribes to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn is_active(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Waits until the session stops on its own or is cancelled.
    pub async fn wait(&self) -> SyncStatus {
        let mut status = self.status.clone();
        status
            .wait_for(SyncStatus::is_terminal)
            .await
            .map(|current| *current)
            // Sender dropped: the task is gone
            .unwrap_or(SyncStatus::Cancelled)
    }

    /// Stops the session and waits for its task to exit.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Replication task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
