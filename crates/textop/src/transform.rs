/// Transforming, composing, and auto-resolving concurrent operations
use serde::{Deserialize, Serialize};

use crate::{char_len, Conflict, ConflictKind, Operation, OtError, Range, Result};

/// Relationship between two operation ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeRelation {
    Disjoint,
    Adjacent,
    Overlap,
    Nested,
}

/// Classify how two ranges interact. Identical ranges classify as `Overlap`,
/// not `Nested`, so the equal-range edit collision surfaces as a manual
/// conflict rather than a containment.
pub fn classify(a: &Range, b: &Range) -> RangeRelation {
    if a == b {
        return RangeRelation::Overlap;
    }
    if a.contains(b) || b.contains(a) {
        return RangeRelation::Nested;
    }
    if a.intersects(b) {
        return RangeRelation::Overlap;
    }
    if a.touches(b) {
        return RangeRelation::Adjacent;
    }
    RangeRelation::Disjoint
}

/// The two primed operations plus any conflicts detected between them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub operation1: Operation,
    pub operation2: Operation,
    pub conflicts: Vec<Conflict>,
}

/// Transform two concurrently-authored operations against each other.
///
/// Disjoint ranges: the earlier-positioned operation is unaffected and the
/// later one shifts by the earlier's net length delta. Adjacent ranges do the
/// same but report an automatic conflict. Overlapping or nested ranges report
/// a manual conflict; a best-effort positional adjustment of the later
/// operation is still computed, but correctness is the caller's
/// responsibility via its resolution policy.
pub fn transform(op1: &Operation, op2: &Operation) -> TransformResult {
    let relation = classify(&op1.range, &op2.range);
    let (mut prime1, mut prime2) = (op1.clone(), op2.clone());

    // The earlier-positioned operation shifts the later one.
    if op1.range.start <= op2.range.start {
        prime2.range = op1.map_range(&op2.range);
    } else {
        prime1.range = op2.map_range(&op1.range);
    }

    let conflicts = match relation {
        RangeRelation::Disjoint => Vec::new(),
        RangeRelation::Adjacent => {
            vec![Conflict::new(op1.clone(), op2.clone(), ConflictKind::Adjacent)]
        }
        RangeRelation::Overlap => {
            vec![Conflict::new(op1.clone(), op2.clone(), ConflictKind::Overlap)]
        }
        RangeRelation::Nested => {
            vec![Conflict::new(op1.clone(), op2.clone(), ConflictKind::Nested)]
        }
    };

    TransformResult {
        operation1: prime1,
        operation2: prime2,
        conflicts,
    }
}

/// Merge a sequence of operations authored against `content` into one
/// equivalent operation.
///
/// Fails on an empty slice; returns a singleton unchanged. Otherwise sorts by
/// ascending start position and folds pairwise. Text between two non-touching
/// ranges is spliced from `content` into the combined insertion, so the
/// composed operation preserves the net text effect; the composed timestamp
/// and version are the max of the inputs.
pub fn compose(ops: &[Operation], content: &str) -> Result<Operation> {
    if ops.len() == 1 {
        return Ok(ops[0].clone());
    }
    let mut sorted = ops.to_vec();
    sorted.sort_by(|a, b| a.range.start.cmp(&b.range.start));
    let mut iter = sorted.into_iter();
    let Some(mut acc) = iter.next() else {
        return Err(OtError::EmptyComposition);
    };
    for op in iter {
        acc = merge_pair(acc, op, content)?;
    }
    Ok(acc)
}

/// Combine two position-ordered operations into one spanning both; the text
/// between disjoint ranges is carried over from `content` unchanged
fn merge_pair(a: Operation, b: Operation, content: &str) -> Result<Operation> {
    let mut inserted = a.inserted_text;
    let mut replaced_length = a.replaced_length + b.replaced_length;
    if a.range.end < b.range.start {
        let gap = crate::extract(content, &Range::new(a.range.end, b.range.start))?;
        replaced_length += char_len(&gap);
        inserted.push_str(&gap);
    }
    inserted.push_str(&b.inserted_text);
    Ok(Operation {
        range: a.range.union(&b.range),
        inserted_text: inserted,
        replaced_length,
        origin_user: a.origin_user,
        timestamp: a.timestamp.max(b.timestamp),
        version: a.version.max(b.version),
    })
}

/// True iff the conflict is adjacent or was explicitly marked automatic
pub fn can_auto_resolve(conflict: &Conflict) -> bool {
    conflict.can_auto_resolve()
}

/// Resolve an adjacent conflict by ordering the two operations by start
/// position and shifting the later one by the earlier's net length delta.
/// Anything other than an adjacent conflict fails: overlap and nesting have
/// no mechanical resolution.
pub fn auto_resolve(conflict: &Conflict) -> Result<TransformResult> {
    if conflict.kind != ConflictKind::Adjacent {
        return Err(OtError::NotAutoResolvable(format!(
            "{:?} conflicts require manual resolution",
            conflict.kind
        )));
    }
    let (op1, op2) = (&conflict.operation1, &conflict.operation2);
    let (mut prime1, mut prime2) = (op1.clone(), op2.clone());
    if op1.range.start <= op2.range.start {
        prime2.range = op1.map_range(&op2.range);
    } else {
        prime1.range = op2.map_range(&op1.range);
    }
    Ok(TransformResult {
        operation1: prime1,
        operation2: prime2,
        conflicts: Vec::new(),
    })
}

/// Net character delta an operation applies to the document
pub fn net_length_delta(op: &Operation) -> i64 {
    char_len(&op.inserted_text) as i64 - op.replaced_length as i64
}
