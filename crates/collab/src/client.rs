/// Facade over the edit path: permission gate → conflict resolution →
/// durable queue → transport broadcast. One instance per client process;
/// all mutation happens on the caller's cooperative timeline.
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use textop::{Conflict, Operation};
use tracing::warn;

use crate::{
    AuthProvider, CollabError, CollabUser, ConflictResolver, FileId, GroupId, HostCallbacks,
    Membership, ProcessOutcome, QueueStatus, RecordStore, ResolverStats, Result, Session,
    SessionManager, SessionStore, SyncQueue, Transport, UserId,
};

pub struct CollabClient {
    resolver: ConflictResolver,
    queue: SyncQueue,
    sessions: SessionManager,
}

impl CollabClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage_dir: impl AsRef<Path>,
        store: Arc<dyn RecordStore>,
        session_store: Arc<dyn SessionStore>,
        auth: Arc<dyn AuthProvider>,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Self {
        Self {
            resolver: ConflictResolver::new(),
            queue: SyncQueue::new(storage_dir, store, transport.clone(), callbacks),
            sessions: SessionManager::new(auth, membership, transport, session_store),
        }
    }

    /// Restore any queue snapshot left by a previous run
    pub async fn start(&mut self) -> Result<()> {
        self.queue.load_snapshot().await
    }

    /// Submit a local edit on behalf of its origin user. Requires an active
    /// writable session in `group_id`. The resolved operation is queued for
    /// durable sync; the queue broadcasts it to other sessions once the
    /// server acknowledges it, at the server-assigned version.
    pub async fn submit_edit(
        &mut self,
        group_id: GroupId,
        file_id: FileId,
        change: Operation,
        current_content: &str,
    ) -> Result<ProcessOutcome> {
        let session = self
            .sessions
            .session(group_id, change.origin_user)
            .ok_or_else(|| {
                CollabError::NotFound(format!(
                    "no session for user {} in group {}",
                    change.origin_user, group_id
                ))
            })?;
        if !session.permissions.can_write {
            return Err(CollabError::Permission(format!(
                "user {} may not write in group {}",
                change.origin_user, group_id
            )));
        }

        let outcome = self
            .resolver
            .process_change(file_id, change, current_content)?;
        self.queue
            .queue_change(
                group_id,
                file_id,
                outcome.resolved_change.clone(),
                &self.resolver,
            )
            .await?;
        Ok(outcome)
    }

    pub async fn join_session(&mut self, group_id: GroupId, user: CollabUser) -> Result<Session> {
        self.sessions.join_session(group_id, user).await
    }

    pub async fn leave_session(&mut self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.sessions.leave_session(group_id, user_id).await
    }

    pub async fn heartbeat(&mut self, group_id: GroupId, user_id: UserId) {
        self.sessions.update_user_activity(group_id, user_id).await;
    }

    pub async fn set_online(&mut self, online: bool) -> Result<()> {
        self.queue.set_online(online, &self.resolver).await
    }

    pub async fn force_sync(&mut self) -> Result<()> {
        self.queue.force_sync(&self.resolver).await
    }

    /// Periodic housekeeping the host drives on [`crate::CLEANUP_INTERVAL`]:
    /// stale-session eviction, pending-operation hygiene, and a queue flush
    /// so backed-off retries run once their deadline passes.
    pub async fn run_maintenance(&mut self) {
        let now = Utc::now();
        self.resolver.evict_stale_pending(now);
        self.sessions.evict_stale(now).await;
        if let Err(err) = self.queue.process_pending_changes(&self.resolver).await {
            warn!(%err, "maintenance queue flush failed");
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.queue_status()
    }

    pub fn pending_conflicts(&self) -> &[Conflict] {
        self.resolver.pending_conflicts()
    }

    pub fn resolver_stats(&self) -> ResolverStats {
        self.resolver.stats()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn resolver_mut(&mut self) -> &mut ConflictResolver {
        &mut self.resolver
    }
}
