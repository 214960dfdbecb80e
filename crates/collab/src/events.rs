/// Events carried over the transport channel between connected clients
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use textop::{Operation, UserId};

use crate::{CollabUser, FileId, GroupId, PresenceStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CollabEvent {
    /// A server-acknowledged operation other clients must transform against
    #[serde(rename = "change_applied")]
    ChangeApplied {
        file_id: FileId,
        operation: Operation,
        version: u64,
    },

    #[serde(rename = "file_created")]
    FileCreated { file_id: FileId },

    #[serde(rename = "file_deleted")]
    FileDeleted { file_id: FileId },

    #[serde(rename = "session_joined")]
    SessionJoined { group_id: GroupId, user: CollabUser },

    #[serde(rename = "session_left")]
    SessionLeft { group_id: GroupId, user_id: UserId },

    /// Presence heartbeat re-broadcast
    #[serde(rename = "presence")]
    PresenceUpdated {
        group_id: GroupId,
        user_id: UserId,
        status: PresenceStatus,
        last_activity: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_tagged_wire_encoding() {
        let event = CollabEvent::FileCreated {
            file_id: FileId::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"file_created\""));
        let back: CollabEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, CollabEvent::FileCreated { .. }));
    }
}
