/// Offline-tolerant change queue with durable JSON snapshots and bounded
/// exponential retry.
///
/// The queue is a two-flag state machine: `{is_online, sync_in_progress}`.
/// A flush in progress suppresses a second concurrent flush; going offline
/// only parks the queue — nothing is lost.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use textop::Operation;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    ChangeId, CollabError, CollabEvent, ConflictResolver, FileId, GroupId, HostCallbacks,
    RecordStore, Result, Transport,
};

/// A change dropped after this many retries is reported as terminal
pub const MAX_RETRY_COUNT: u32 = 3;

/// Base retry delay; the nth retry waits `RETRY_DELAY * 2^n`
pub const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

const QUEUE_FILE: &str = "sync_queue.json";

/// An operation wrapped with queue metadata, awaiting server acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedChange {
    pub id: ChangeId,
    pub group_id: GroupId,
    pub file_id: FileId,
    pub operation: Operation,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,

    /// Earliest instant the next attempt may run; not persisted — a restart
    /// retries immediately
    #[serde(skip)]
    not_before: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub is_online: bool,
    pub sync_in_progress: bool,
}

enum Attempt {
    /// Acknowledged by the store at the returned version, with the operation
    /// as actually applied (possibly transformed during reconciliation)
    Applied { version: u64, operation: Operation },
    /// Version divergence reconciled into conflicts already reported to the
    /// host; the change leaves the queue
    ConflictReported,
    /// Worth retrying under the backoff budget
    Transient(CollabError),
    /// Never retried; reported once
    Fatal(CollabError),
}

pub struct SyncQueue {
    changes: Vec<QueuedChange>,
    is_online: bool,
    sync_in_progress: bool,
    storage_dir: PathBuf,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    callbacks: Arc<dyn HostCallbacks>,
}

impl SyncQueue {
    pub fn new(
        storage_dir: impl AsRef<Path>,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Self {
        Self {
            changes: Vec::new(),
            is_online: true,
            sync_in_progress: false,
            storage_dir: storage_dir.as_ref().to_path_buf(),
            store,
            transport,
            callbacks,
        }
    }

    /// Append a change, persist the full queue snapshot, and attempt a flush
    /// if currently online.
    pub async fn queue_change(
        &mut self,
        group_id: GroupId,
        file_id: FileId,
        operation: Operation,
        resolver: &ConflictResolver,
    ) -> Result<()> {
        self.changes.push(QueuedChange {
            id: ChangeId::new(),
            group_id,
            file_id,
            operation,
            queued_at: Utc::now(),
            retry_count: 0,
            not_before: None,
        });
        self.save_snapshot().await?;
        if self.is_online {
            self.process_pending_changes(resolver).await?;
        }
        Ok(())
    }

    /// Flush the queue against the record store. No-op when already flushing,
    /// offline, or empty. Per-change failures never reach the caller; they go
    /// through the host callbacks.
    pub async fn process_pending_changes(
        &mut self,
        resolver: &ConflictResolver,
    ) -> Result<()> {
        if self.sync_in_progress || !self.is_online || self.changes.is_empty() {
            return Ok(());
        }
        self.sync_in_progress = true;

        let now = Instant::now();
        let snapshot = std::mem::take(&mut self.changes);
        let (due, deferred): (Vec<_>, Vec<_>) = snapshot
            .into_iter()
            .partition(|c| c.not_before.map_or(true, |t| t <= now));
        self.changes = deferred;

        for mut change in due {
            match self.apply_one(&change, resolver).await {
                Attempt::Applied { version, operation } => {
                    debug!(change = %change.id, file = %change.file_id, version, "change acknowledged");
                    self.callbacks.on_file_updated(change.file_id, version);
                    // Announce only what the store actually accepted, at the
                    // version it assigned.
                    let event = CollabEvent::ChangeApplied {
                        file_id: change.file_id,
                        operation,
                        version,
                    };
                    if let Err(err) = self.transport.broadcast(change.group_id, event).await {
                        warn!(change = %change.id, %err, "failed to broadcast acknowledged change");
                    }
                }
                Attempt::ConflictReported => {
                    debug!(change = %change.id, file = %change.file_id, "change left queue pending manual resolution");
                }
                Attempt::Fatal(err) => {
                    warn!(change = %change.id, %err, "change failed permanently");
                    self.callbacks.on_sync_error(&err);
                }
                Attempt::Transient(err) => {
                    if change.retry_count >= MAX_RETRY_COUNT {
                        warn!(change = %change.id, %err, "retry budget exhausted");
                        self.callbacks
                            .on_sync_error(&CollabError::SyncRetryExceeded(change.id));
                    } else {
                        let delay = RETRY_DELAY * 2u32.pow(change.retry_count);
                        change.retry_count += 1;
                        change.not_before = Some(now + delay);
                        debug!(change = %change.id, retry = change.retry_count, ?delay, %err, "change re-queued");
                        self.changes.push(change);
                    }
                }
            }
        }

        self.sync_in_progress = false;
        if let Err(err) = self.save_snapshot().await {
            warn!(%err, "failed to persist queue snapshot");
        }
        Ok(())
    }

    async fn apply_one(&self, change: &QueuedChange, resolver: &ConflictResolver) -> Attempt {
        let file = match self.store.get_file(change.file_id).await {
            Ok(file) => file,
            Err(err) => return Attempt::Transient(err),
        };

        let operation = if file.version == change.operation.version {
            change.operation.clone()
        } else {
            // The file moved on while this change was queued: reconcile
            // against the server-side operations instead of applying blindly.
            let local = std::slice::from_ref(&change.operation);
            let sync = match resolver
                .synchronize_with_server(
                    change.file_id,
                    local,
                    change.operation.version,
                    self.store.as_ref(),
                )
                .await
            {
                Ok(sync) => sync,
                Err(err) => return Attempt::Transient(err),
            };
            if !sync.conflicts.is_empty() {
                self.callbacks
                    .on_conflict_detected(change.file_id, &sync.conflicts);
                return Attempt::ConflictReported;
            }
            match sync.transformed_changes.into_iter().next() {
                Some(op) => op,
                None => {
                    return Attempt::Fatal(CollabError::Validation(
                        "reconciliation produced no operation".into(),
                    ))
                }
            }
        };

        let new_content = match textop::apply(&file.content, &operation) {
            Ok(content) => content,
            Err(err) => return Attempt::Fatal(err.into()),
        };
        match self
            .store
            .apply_change(change.file_id, &new_content, file.version)
            .await
        {
            Ok(version) => Attempt::Applied { version, operation },
            Err(err) => Attempt::Transient(err),
        }
    }

    /// Connectivity transition. Going online re-triggers a flush; going
    /// offline only updates the flag — queued changes stay put.
    pub async fn set_online(
        &mut self,
        online: bool,
        resolver: &ConflictResolver,
    ) -> Result<()> {
        if self.is_online == online {
            return Ok(());
        }
        self.is_online = online;
        self.callbacks.on_connection_status_changed(online);
        if online {
            self.process_pending_changes(resolver).await?;
        }
        Ok(())
    }

    /// Manual flush escape hatch, independent of connectivity events: backoff
    /// deadlines are cleared so every queued change is attempted now.
    pub async fn force_sync(&mut self, resolver: &ConflictResolver) -> Result<()> {
        for change in &mut self.changes {
            change.not_before = None;
        }
        self.process_pending_changes(resolver).await
    }

    pub async fn clear_queue(&mut self) {
        self.changes.clear();
        if let Err(err) = self.save_snapshot().await {
            warn!(%err, "failed to remove queue snapshot");
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.changes.len(),
            is_online: self.is_online,
            sync_in_progress: self.sync_in_progress,
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    fn snapshot_path(&self) -> PathBuf {
        self.storage_dir.join(QUEUE_FILE)
    }

    /// Persist the full queue as a JSON snapshot; an empty queue removes the
    /// snapshot file.
    async fn save_snapshot(&self) -> Result<()> {
        let path = self.snapshot_path();
        if self.changes.is_empty() {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(CollabError::Storage(err.to_string())),
            }
            return Ok(());
        }
        fs::create_dir_all(&self.storage_dir)
            .await
            .map_err(|err| CollabError::Storage(err.to_string()))?;
        let json = serde_json::to_string_pretty(&self.changes)
            .map_err(|err| CollabError::Storage(err.to_string()))?;
        fs::write(&path, json)
            .await
            .map_err(|err| CollabError::Storage(err.to_string()))?;
        Ok(())
    }

    /// Restore a persisted snapshot, typically on startup after a crash or
    /// restart while offline.
    pub async fn load_snapshot(&mut self) -> Result<()> {
        match fs::read_to_string(self.snapshot_path()).await {
            Ok(json) => {
                self.changes = serde_json::from_str(&json)
                    .map_err(|err| CollabError::Storage(err.to_string()))?;
                debug!(pending = self.changes.len(), "restored queue snapshot");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CollabError::Storage(err.to_string())),
        }
    }
}
