/// Per-file pending-operation tracking and conflict resolution.
///
/// Each open file keeps the locally resolved but not-yet-acknowledged
/// operations; incoming changes transform against them in insertion order.
/// Non-auto-resolvable conflicts accumulate in one manual-resolution queue.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use textop::{self, Conflict, Operation, Range};

use crate::{CollabError, FileId, RecordStore, Result};

/// Pending operations older than this many seconds are evicted
const PENDING_MAX_AGE_SECS: i64 = 5 * 60;

/// Per-file pending list cap; oldest entries are evicted first
const PENDING_MAX_ENTRIES: usize = 50;

/// Outcome of [`ConflictResolver::process_change`]
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub resolved_change: Operation,
    pub conflicts: Vec<Conflict>,
    pub final_content: String,
}

/// Outcome of [`ConflictResolver::synchronize_with_server`]
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub transformed_changes: Vec<Operation>,
    pub conflicts: Vec<Conflict>,
}

/// Outcome of draining the manual queue of auto-resolvable entries
#[derive(Debug, Clone)]
pub struct AutoResolveOutcome {
    pub resolved: Vec<Operation>,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
    pub open_files: usize,
    pub pending_operations: usize,
    pub pending_conflicts: usize,
}

/// Manual resolution strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Keep the local operation, discard the remote
    AcceptLocal,

    /// Keep the remote operation, discard the local
    AcceptRemote,

    /// Synthesize a new operation spanning both ranges with caller-provided
    /// merged content
    Merge,
}

struct PendingOp {
    op: Operation,
    recorded_at: DateTime<Utc>,
}

/// Stateful orchestrator; owns its pending maps exclusively. One instance per
/// client, passed explicitly — never a process-wide singleton.
#[derive(Default)]
pub struct ConflictResolver {
    pending: HashMap<FileId, Vec<PendingOp>>,
    manual_queue: Vec<Conflict>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform `change` against every pending operation for `file_id` in
    /// insertion order, resolve what can be resolved automatically, queue the
    /// rest for manual resolution, and apply the resolved operation to
    /// `current_content`.
    pub fn process_change(
        &mut self,
        file_id: FileId,
        change: Operation,
        current_content: &str,
    ) -> Result<ProcessOutcome> {
        if change.is_noop() {
            return Err(CollabError::Validation(
                "operation inserts nothing and removes nothing".into(),
            ));
        }

        let now = Utc::now();
        let mut resolved = change;
        let mut conflicts_out = Vec::new();

        let entry = self.pending.entry(file_id).or_default();
        for pending in entry.iter_mut() {
            let result = textop::transform(&resolved, &pending.op);
            // Primed operations update both the incoming and the stored
            // pending operation; manual conflicts additionally surface to the
            // caller and the manual queue with the best-effort adjustment
            // kept in place.
            resolved = result.operation1;
            pending.op = result.operation2;
            for conflict in result.conflicts {
                if conflict.can_auto_resolve() {
                    debug!(%file_id, kind = ?conflict.kind, "auto-resolved conflict");
                } else {
                    conflicts_out.push(conflict.clone());
                    self.manual_queue.push(conflict);
                }
            }
        }

        let final_content = textop::apply(current_content, &resolved)?;

        let entry = self.pending.entry(file_id).or_default();
        entry.push(PendingOp {
            op: resolved.clone(),
            recorded_at: now,
        });
        Self::cleanup_pending(entry, now);

        Ok(ProcessOutcome {
            resolved_change: resolved,
            conflicts: conflicts_out,
            final_content,
        })
    }

    fn cleanup_pending(entry: &mut Vec<PendingOp>, now: DateTime<Utc>) {
        entry.retain(|p| (now - p.recorded_at).num_seconds() <= PENDING_MAX_AGE_SECS);
        if entry.len() > PENDING_MAX_ENTRIES {
            let excess = entry.len() - PENDING_MAX_ENTRIES;
            entry.drain(..excess);
        }
    }

    /// Resolve a manual conflict with an explicit strategy. `Merge` requires
    /// `merged_content` and synthesizes an operation spanning the union of
    /// both ranges at `max(v1, v2) + 1`. The conflict leaves the manual queue
    /// on success.
    pub fn resolve_conflict_manually(
        &mut self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        merged_content: Option<String>,
    ) -> Result<Operation> {
        let resolved = match strategy {
            ResolutionStrategy::AcceptLocal => conflict.operation1.clone(),
            ResolutionStrategy::AcceptRemote => conflict.operation2.clone(),
            ResolutionStrategy::Merge => {
                let merged = merged_content.ok_or_else(|| {
                    CollabError::Validation("merge strategy requires merged content".into())
                })?;
                let (op1, op2) = (&conflict.operation1, &conflict.operation2);
                let range = op1.range.union(&op2.range);
                let replaced_length = op1.replaced_length.max(op2.replaced_length);
                Operation {
                    range,
                    inserted_text: merged,
                    replaced_length,
                    origin_user: op1.origin_user,
                    timestamp: Utc::now(),
                    version: op1.version.max(op2.version) + 1,
                }
            }
        };
        self.manual_queue.retain(|c| {
            !(c.operation1 == conflict.operation1 && c.operation2 == conflict.operation2)
        });
        Ok(resolved)
    }

    /// Transform each local change against every server-authored operation
    /// newer than `server_version`, in sequence, accumulating conflicts.
    /// Reads no resolver state; pending tracking is unaffected.
    pub async fn synchronize_with_server(
        &self,
        file_id: FileId,
        local_changes: &[Operation],
        server_version: u64,
        store: &dyn RecordStore,
    ) -> Result<SyncOutcome> {
        let server_ops = store.get_changes_since(file_id, server_version).await?;
        let mut transformed = Vec::with_capacity(local_changes.len());
        let mut conflicts = Vec::new();

        for change in local_changes {
            let mut current = change.clone();
            for server_op in &server_ops {
                let result = textop::transform(&current, server_op);
                conflicts.extend(result.conflicts);
                current = result.operation1;
            }
            transformed.push(current);
        }

        Ok(SyncOutcome {
            transformed_changes: transformed,
            conflicts,
        })
    }

    /// Conflicts awaiting manual resolution
    pub fn pending_conflicts(&self) -> &[Conflict] {
        &self.manual_queue
    }

    /// Drop all pending operations for a file
    pub fn clear_pending_changes(&mut self, file_id: FileId) {
        self.pending.remove(&file_id);
    }

    /// Pending operations currently tracked for a file
    pub fn pending_operations(&self, file_id: FileId) -> Vec<&Operation> {
        self.pending
            .get(&file_id)
            .map(|ops| ops.iter().map(|p| &p.op).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            open_files: self.pending.len(),
            pending_operations: self.pending.values().map(Vec::len).sum(),
            pending_conflicts: self.manual_queue.len(),
        }
    }

    /// Drain the manual queue, applying accept-local to every entry that can
    /// auto-resolve and leaving the rest queued.
    pub fn process_auto_resolvable_conflicts(&mut self) -> AutoResolveOutcome {
        let queue = std::mem::take(&mut self.manual_queue);
        let mut resolved = Vec::new();
        for conflict in queue {
            if conflict.can_auto_resolve() {
                resolved.push(conflict.operation1);
            } else {
                self.manual_queue.push(conflict);
            }
        }
        AutoResolveOutcome {
            resolved,
            remaining: self.manual_queue.len(),
        }
    }

    /// Evict pending operations older than the age limit and enforce the
    /// per-file cap, across all files. Takes `now` explicitly so callers and
    /// tests control the clock.
    pub fn evict_stale_pending(&mut self, now: DateTime<Utc>) {
        for entry in self.pending.values_mut() {
            Self::cleanup_pending(entry, now);
        }
        self.pending.retain(|_, entry| !entry.is_empty());
    }
}

/// Convenience for tests and merge tooling: the union range of a conflict
pub fn conflict_span(conflict: &Conflict) -> Range {
    conflict.operation1.range.union(&conflict.operation2.range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use textop::{Position, UserId};

    fn op(range: Range, text: &str, replaced: usize, version: u64) -> Operation {
        Operation::new(range, text, replaced, UserId::new(), version)
    }

    #[test]
    fn process_change_rejects_noops() {
        let mut resolver = ConflictResolver::new();
        let noop = op(Range::caret(Position::new(0, 0)), "", 0, 1);
        let err = resolver
            .process_change(FileId::new(), noop, "content")
            .unwrap_err();
        assert!(matches!(err, CollabError::Validation(_)));
    }

    #[test]
    fn process_change_applies_and_tracks_pending() {
        let mut resolver = ConflictResolver::new();
        let file = FileId::new();
        let change = op(Range::single_line(0, 6, 11), "Universe", 5, 1);
        let outcome = resolver.process_change(file, change, "Hello World").unwrap();
        assert_eq!(outcome.final_content, "Hello Universe");
        assert!(outcome.conflicts.is_empty());
        assert_eq!(resolver.pending_operations(file).len(), 1);
    }

    #[test]
    fn concurrent_disjoint_changes_both_apply() {
        let mut resolver = ConflictResolver::new();
        let file = FileId::new();
        let content = "The quick brown fox";

        let first = op(Range::single_line(0, 4, 9), "slow", 5, 1);
        let outcome1 = resolver.process_change(file, first, content).unwrap();
        assert_eq!(outcome1.final_content, "The slow brown fox");

        let second = op(Range::single_line(0, 16, 19), "dog", 3, 1);
        let outcome2 = resolver
            .process_change(file, second, &outcome1.final_content)
            .unwrap();
        assert!(outcome2.conflicts.is_empty());
        assert_eq!(outcome2.final_content, "The slow brown dog");
    }

    #[test]
    fn overlapping_change_lands_in_manual_queue() {
        let mut resolver = ConflictResolver::new();
        let file = FileId::new();

        let first = op(Range::single_line(0, 6, 11), "Universe", 5, 1);
        let outcome1 = resolver.process_change(file, first, "Hello World").unwrap();

        let second = op(Range::single_line(0, 6, 11), "Earth", 5, 1);
        let outcome2 = resolver
            .process_change(file, second, &outcome1.final_content)
            .unwrap();
        assert_eq!(outcome2.conflicts.len(), 1);
        assert_eq!(resolver.pending_conflicts().len(), 1);
    }

    #[test]
    fn manual_merge_requires_content_and_bumps_version() {
        let mut resolver = ConflictResolver::new();
        let a = op(Range::single_line(0, 6, 11), "Universe", 5, 3);
        let b = op(Range::single_line(0, 6, 11), "Earth", 5, 5);
        let conflict = textop::transform(&a, &b).conflicts.remove(0);

        let err = resolver
            .resolve_conflict_manually(&conflict, ResolutionStrategy::Merge, None)
            .unwrap_err();
        assert!(matches!(err, CollabError::Validation(_)));

        let merged = resolver
            .resolve_conflict_manually(
                &conflict,
                ResolutionStrategy::Merge,
                Some("Universe and Earth".into()),
            )
            .unwrap();
        assert_eq!(merged.version, 6);
        assert_eq!(merged.inserted_text, "Universe and Earth");
        assert_eq!(merged.range, conflict_span(&conflict));
    }

    #[test]
    fn accept_strategies_pick_a_side_and_dequeue() {
        let mut resolver = ConflictResolver::new();
        let file = FileId::new();
        let first = op(Range::single_line(0, 6, 11), "Universe", 5, 1);
        let content = resolver
            .process_change(file, first.clone(), "Hello World")
            .unwrap()
            .final_content;
        let second = op(Range::single_line(0, 6, 11), "Earth", 5, 1);
        resolver.process_change(file, second, &content).unwrap();

        let conflict = resolver.pending_conflicts()[0].clone();
        let local = resolver
            .resolve_conflict_manually(&conflict, ResolutionStrategy::AcceptLocal, None)
            .unwrap();
        assert_eq!(local, conflict.operation1);
        assert!(resolver.pending_conflicts().is_empty());
    }

    #[test]
    fn pending_list_is_capped_and_age_evicted() {
        let mut resolver = ConflictResolver::new();
        let file = FileId::new();
        let mut content = "ab\n".repeat(60);
        for line in 0..60 {
            let change = op(Range::single_line(line, 0, 1), "X", 1, line as u64);
            content = resolver
                .process_change(file, change, &content)
                .unwrap()
                .final_content;
        }
        assert_eq!(resolver.pending_operations(file).len(), PENDING_MAX_ENTRIES);

        resolver.evict_stale_pending(Utc::now() + Duration::seconds(PENDING_MAX_AGE_SECS + 1));
        assert!(resolver.pending_operations(file).is_empty());
        assert_eq!(resolver.stats().open_files, 0);
    }

    #[tokio::test]
    async fn server_sync_transforms_local_changes_through_a_shared_borrow() {
        struct ServerOps(Vec<Operation>);

        #[async_trait::async_trait]
        impl RecordStore for ServerOps {
            async fn get_file(&self, _: FileId) -> Result<crate::FileRecord> {
                unimplemented!()
            }

            async fn apply_change(&self, _: FileId, _: &str, _: u64) -> Result<u64> {
                unimplemented!()
            }

            async fn get_changes_since(&self, _: FileId, version: u64) -> Result<Vec<Operation>> {
                Ok(self
                    .0
                    .iter()
                    .filter(|o| o.version > version)
                    .cloned()
                    .collect())
            }
        }

        let resolver = ConflictResolver::new();
        let server = ServerOps(vec![op(Range::single_line(0, 0, 3), "xy", 3, 2)]);
        let local = [op(Range::single_line(0, 10, 12), "z", 2, 1)];

        let outcome = resolver
            .synchronize_with_server(FileId::new(), &local, 1, &server)
            .await
            .unwrap();
        assert!(outcome.conflicts.is_empty());
        // shifted by the server edit's net delta of -1
        assert_eq!(
            outcome.transformed_changes[0].range,
            Range::single_line(0, 9, 11)
        );
    }

    #[test]
    fn auto_resolvable_queue_entries_drain_with_accept_local() {
        let mut resolver = ConflictResolver::new();
        let a = op(Range::single_line(0, 0, 4), "ab", 4, 1);
        let b = op(Range::single_line(0, 2, 6), "cd", 4, 1);
        let manual = textop::transform(&a, &b).conflicts.remove(0);
        let marked = manual.clone().marked_auto_resolvable();

        resolver.manual_queue.push(manual);
        resolver.manual_queue.push(marked.clone());

        let outcome = resolver.process_auto_resolvable_conflicts();
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.remaining, 1);
        assert_eq!(outcome.resolved[0], marked.operation1);
    }
}
