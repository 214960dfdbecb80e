/// Conflict classification between concurrently-authored operations
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Operation;

/// How the two operations' ranges relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Ranges share exactly one boundary position
    Adjacent,

    /// Ranges intersect (including the identical-range case)
    Overlap,

    /// One range fully contains the other
    Nested,
}

/// Whether a conflict may be reconciled without user intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Automatic,
    Manual,
}

/// Two concurrently-authored operations whose ranges interact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub operation1: Operation,
    pub operation2: Operation,
    pub kind: ConflictKind,
    pub resolution: Resolution,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Adjacent conflicts are automatic by default; everything else is manual
    pub fn new(operation1: Operation, operation2: Operation, kind: ConflictKind) -> Self {
        let resolution = match kind {
            ConflictKind::Adjacent => Resolution::Automatic,
            ConflictKind::Overlap | ConflictKind::Nested => Resolution::Manual,
        };
        Self {
            operation1,
            operation2,
            kind,
            resolution,
            detected_at: Utc::now(),
        }
    }

    /// Caller explicitly opts this conflict into automatic resolution
    pub fn marked_auto_resolvable(mut self) -> Self {
        self.resolution = Resolution::Automatic;
        self
    }

    /// True iff the conflict was marked automatic or is adjacent
    pub fn can_auto_resolve(&self) -> bool {
        self.resolution == Resolution::Automatic || self.kind == ConflictKind::Adjacent
    }
}
