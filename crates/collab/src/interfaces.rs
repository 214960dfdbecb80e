/// Abstract contracts for the external collaborators this core consumes:
/// the durable record store, the pub/sub transport, authentication, and
/// group membership. The core never implements these; hosts bind them.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use textop::{Conflict, Operation, UserId};
use tokio::sync::mpsc;

use crate::{CollabError, CollabEvent, FileId, GroupId, Result, SessionRecord};

/// File content together with its monotonically increasing version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub content: String,
    pub version: u64,
}

/// Durable store for file content and version numbers
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_file(&self, file_id: FileId) -> Result<FileRecord>;

    /// Replace the file's content iff its stored version still equals
    /// `expected_version`, returning the new version. A diverged version
    /// fails with [`crate::CollabError::VersionConflict`]; it is never overwritten
    /// silently.
    async fn apply_change(
        &self,
        file_id: FileId,
        content: &str,
        expected_version: u64,
    ) -> Result<u64>;

    /// Server-authored operations with version greater than `version`
    async fn get_changes_since(&self, file_id: FileId, version: u64) -> Result<Vec<Operation>>;
}

/// Durable store for session participation records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn upsert_session(&self, record: &SessionRecord) -> Result<()>;

    async fn mark_session_offline(&self, group_id: GroupId, user_id: UserId) -> Result<()>;
}

/// Publish/subscribe channel delivering change and presence events to other
/// connected clients.
///
/// Delivery ordering is not guaranteed by this core: implementors must
/// re-sequence delivered operations by `(timestamp, version)` — see
/// [`resequence`] — before feeding them into the transform path.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, group_id: GroupId, event: CollabEvent) -> Result<()>;

    async fn subscribe(&self, group_id: GroupId)
        -> Result<mpsc::UnboundedReceiver<CollabEvent>>;
}

/// Sort operations into the order the transform path requires
pub fn resequence(ops: &mut [Operation]) {
    ops.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.version.cmp(&b.version))
    });
}

/// Authenticated principal provider
pub trait AuthProvider: Send + Sync {
    fn current_principal(&self) -> Option<UserId>;
}

/// Membership role within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

/// Group membership and ownership lookup used to derive permissions
#[async_trait]
pub trait Membership: Send + Sync {
    async fn role(&self, group_id: GroupId, user_id: UserId) -> Result<Option<Role>>;

    /// Ownership is a separate lookup, distinct from the membership role
    async fn owner(&self, group_id: GroupId) -> Result<UserId>;
}

/// Callback surface exposed to the host application. Asynchronous failures
/// during flush or reconciliation arrive here instead of being thrown into
/// the caller's edit path. Default bodies are no-ops so hosts implement only
/// what they observe.
pub trait HostCallbacks: Send + Sync {
    fn on_file_updated(&self, _file_id: FileId, _version: u64) {}

    fn on_file_created(&self, _file_id: FileId) {}

    fn on_file_deleted(&self, _file_id: FileId) {}

    fn on_conflict_detected(&self, _file_id: FileId, _conflicts: &[Conflict]) {}

    fn on_sync_error(&self, _error: &CollabError) {}

    fn on_connection_status_changed(&self, _online: bool) {}
}

/// Host that ignores every notification
pub struct NoopCallbacks;

impl HostCallbacks for NoopCallbacks {}
