/// Operational-transform core for collaborative text editing
/// Pure operation algebra: no I/O, no async, no shared state
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod operation;
pub use operation::*;

mod conflict;
pub use conflict::*;

mod transform;
pub use transform::*;

#[derive(Debug, Error)]
pub enum OtError {
    #[error("cannot compose an empty operation sequence")]
    EmptyComposition,

    #[error("conflict is not auto-resolvable: {0}")]
    NotAutoResolvable(String),

    #[error("range out of bounds: {0}")]
    InvalidRange(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, OtError>;

/// User identifier attached to every operation as provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
