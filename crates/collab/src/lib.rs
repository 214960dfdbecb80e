/// Collaboration layer over the transform engine: per-file conflict
/// resolution, an offline-tolerant sync queue, and session/permission
/// management for group-scoped editing.
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod interfaces;
pub use interfaces::*;

mod events;
pub use events::*;

mod resolver;
pub use resolver::*;

mod queue;
pub use queue::*;

mod session;
pub use session::*;

mod client;
pub use client::*;

pub use textop::UserId;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not authenticated: {0}")]
    Authentication(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("sync retry budget exceeded for change {0}")]
    SyncRetryExceeded(ChangeId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Engine(#[from] textop::OtError),
}

pub type Result<T> = std::result::Result<T, CollabError>;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Identifier of one collaboratively edited file
    FileId
);
id_type!(
    /// Identifier of a collaboration group
    GroupId
);
id_type!(
    /// Identifier of one user's participation in a group
    SessionId
);
id_type!(
    /// Identifier of a queued, not-yet-acknowledged change
    ChangeId
);
