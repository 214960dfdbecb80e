/// Session lifecycle, permission derivation, presence heartbeats, and
/// timeout-based eviction for group collaboration.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use textop::UserId;
use tracing::{debug, warn};

use crate::{
    AuthProvider, CollabError, CollabEvent, GroupId, Membership, Result, Role, SessionId,
    SessionStore, Transport,
};

/// Sessions idle longer than this many seconds are force-left
pub const SESSION_TIMEOUT_SECS: i64 = 30 * 60;

/// How often the host should drive [`SessionManager::evict_stale`]
pub const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Derived capability flags for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_manage_users: bool,
    pub is_owner: bool,
}

impl PermissionSet {
    /// Every flag false: the non-member permission set
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Idle,
    Offline,
}

/// Color assigned to a user for cursor highlighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl UserColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Deterministic color derived from the user id
    pub fn from_user_id(user_id: UserId) -> Self {
        let bytes = user_id.0.as_bytes();
        Self {
            r: bytes[0],
            g: bytes[1],
            b: bytes[2],
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Presentation record shown to other participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollabUser {
    pub id: UserId,
    pub display_name: String,
    pub status: PresenceStatus,
    pub cursor_color: UserColor,
}

impl CollabUser {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            status: PresenceStatus::Active,
            cursor_color: UserColor::from_user_id(id),
        }
    }
}

/// One user's participation in one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub permissions: PermissionSet,
    pub user: CollabUser,
}

/// Durable row persisted through the session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub online: bool,
}

impl SessionRecord {
    fn from_session(session: &Session, online: bool) -> Self {
        Self {
            session_id: session.id,
            group_id: session.group_id,
            user_id: session.user_id,
            joined_at: session.joined_at,
            last_activity: session.last_activity,
            online,
        }
    }
}

/// Tracks live sessions per `(group, user)` and derives their permissions.
/// Owns its map exclusively; all mutation happens through `&mut self` on the
/// caller's cooperative timeline.
pub struct SessionManager {
    sessions: HashMap<(GroupId, UserId), Session>,
    auth: Arc<dyn AuthProvider>,
    membership: Arc<dyn Membership>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            auth,
            membership,
            transport,
            store,
        }
    }

    /// Join `group_id` as the authenticated principal. `user` carries the
    /// presentation record; its id must match the principal. Fails when no
    /// principal is available, or when the derived permissions deny reading.
    pub async fn join_session(&mut self, group_id: GroupId, user: CollabUser) -> Result<Session> {
        let principal = self
            .auth
            .current_principal()
            .ok_or_else(|| CollabError::Authentication("no authenticated principal".into()))?;
        if user.id != principal {
            return Err(CollabError::Authentication(format!(
                "user {} does not match authenticated principal {}",
                user.id, principal
            )));
        }

        let permissions = self.check_user_permissions(group_id, principal).await?;
        if !permissions.can_read {
            return Err(CollabError::Permission(format!(
                "user {} may not read group {}",
                principal, group_id
            )));
        }

        let now = Utc::now();
        let session = Session {
            id: SessionId::new(),
            group_id,
            user_id: principal,
            joined_at: now,
            last_activity: now,
            permissions,
            user: user.clone(),
        };

        self.store
            .upsert_session(&SessionRecord::from_session(&session, true))
            .await?;
        self.transport
            .broadcast(group_id, CollabEvent::SessionJoined { group_id, user })
            .await?;
        self.sessions.insert((group_id, principal), session.clone());

        Ok(session)
    }

    /// Derive the permission set for a user in a group. Non-members get every
    /// flag false; members read and write; delete/manage require the admin
    /// role or ownership.
    ///
    /// Role and ownership are two independent lookups and are not atomic
    /// against a concurrent ownership transfer.
    pub async fn check_user_permissions(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<PermissionSet> {
        let Some(role) = self.membership.role(group_id, user_id).await? else {
            return Ok(PermissionSet::none());
        };
        let owner = self.membership.owner(group_id).await?;
        let is_owner = owner == user_id;
        let manage = role == Role::Admin || is_owner;
        Ok(PermissionSet {
            can_read: true,
            can_write: true,
            can_delete: manage,
            can_manage_users: manage,
            is_owner,
        })
    }

    /// Leave a group: deregister from the transport, mark the durable record
    /// offline, and drop the local entry.
    pub async fn leave_session(&mut self, group_id: GroupId, user_id: UserId) -> Result<()> {
        if !self.sessions.contains_key(&(group_id, user_id)) {
            return Err(CollabError::NotFound(format!(
                "no session for user {} in group {}",
                user_id, group_id
            )));
        }
        self.transport
            .broadcast(group_id, CollabEvent::SessionLeft { group_id, user_id })
            .await?;
        self.store.mark_session_offline(group_id, user_id).await?;
        self.sessions.remove(&(group_id, user_id));
        Ok(())
    }

    /// Heartbeat: refresh local and durable `last_activity` and re-broadcast
    /// presence. Best-effort — failures are logged, never propagated, since
    /// heartbeats must not block editing.
    pub async fn update_user_activity(&mut self, group_id: GroupId, user_id: UserId) {
        let Some(session) = self.sessions.get_mut(&(group_id, user_id)) else {
            debug!(%group_id, %user_id, "heartbeat for unknown session ignored");
            return;
        };
        session.last_activity = Utc::now();
        let record = SessionRecord::from_session(session, true);
        let event = CollabEvent::PresenceUpdated {
            group_id,
            user_id,
            status: session.user.status,
            last_activity: session.last_activity,
        };

        if let Err(err) = self.store.upsert_session(&record).await {
            warn!(%group_id, %user_id, %err, "failed to persist activity heartbeat");
        }
        if let Err(err) = self.transport.broadcast(group_id, event).await {
            warn!(%group_id, %user_id, %err, "failed to broadcast presence");
        }
    }

    pub fn session(&self, group_id: GroupId, user_id: UserId) -> Option<&Session> {
        self.sessions.get(&(group_id, user_id))
    }

    /// All live sessions in a group
    pub fn active_sessions(&self, group_id: GroupId) -> Vec<&Session> {
        self.sessions
            .values()
            .filter(|s| s.group_id == group_id)
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Force-leave every session whose `last_activity` is older than
    /// [`SESSION_TIMEOUT_SECS`] relative to `now`. Returns the evicted pairs.
    /// Transport and store failures during eviction are logged, not
    /// propagated.
    pub async fn evict_stale(&mut self, now: DateTime<Utc>) -> Vec<(GroupId, UserId)> {
        let stale: Vec<(GroupId, UserId)> = self
            .sessions
            .iter()
            .filter(|(_, s)| (now - s.last_activity).num_seconds() > SESSION_TIMEOUT_SECS)
            .map(|(key, _)| *key)
            .collect();

        for (group_id, user_id) in &stale {
            debug!(%group_id, %user_id, "evicting stale session");
            if let Err(err) = self.leave_session(*group_id, *user_id).await {
                warn!(%group_id, %user_id, %err, "failed to evict stale session");
                self.sessions.remove(&(*group_id, *user_id));
            }
        }
        stale
    }
}
