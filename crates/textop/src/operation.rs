/// Text operations addressed by line/column ranges
/// Positions are zero-based; columns count characters, not bytes
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OtError, Result, UserId};

/// A position in a document
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Half-open range over the pre-edit document: `start` inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Range within a single line, from `start_column` up to (excluding) `end_column`
    pub const fn single_line(line: usize, start_column: usize, end_column: usize) -> Self {
        Self {
            start: Position::new(line, start_column),
            end: Position::new(line, end_column),
        }
    }

    /// An empty range at `pos` (pure insertion point)
    pub const fn caret(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Both endpoints of `other` fall within this range
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The interiors of the two ranges share at least one position
    pub fn intersects(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The ranges share exactly one boundary position
    pub fn touches(&self, other: &Range) -> bool {
        self.end == other.start || other.end == self.start
    }

    /// Smallest range covering both
    pub fn union(&self, other: &Range) -> Range {
        Range::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// The atomic edit unit: replace the text in `range` with `inserted_text`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Range over the pre-edit document this operation replaces
    pub range: Range,

    /// Replacement text (may be empty for a pure deletion)
    pub inserted_text: String,

    /// Number of characters the range removes
    pub replaced_length: usize,

    /// User who authored this operation
    pub origin_user: UserId,

    /// Authoring time, monotonic per origin
    pub timestamp: DateTime<Utc>,

    /// Document version the operation was authored against
    pub version: u64,
}

impl Operation {
    pub fn new(
        range: Range,
        inserted_text: impl Into<String>,
        replaced_length: usize,
        origin_user: UserId,
        version: u64,
    ) -> Self {
        Self {
            range,
            inserted_text: inserted_text.into(),
            replaced_length,
            origin_user,
            timestamp: Utc::now(),
            version,
        }
    }

    /// Empty insertion that removes nothing; such operations are rejected upstream
    pub fn is_noop(&self) -> bool {
        self.inserted_text.is_empty() && self.replaced_length == 0
    }

    /// Position where the replaced span ends once `inserted_text` has landed
    pub fn end_after_insert(&self) -> Position {
        let newlines = self.inserted_text.matches('\n').count();
        if newlines == 0 {
            Position::new(
                self.range.start.line,
                self.range.start.column + char_len(&self.inserted_text),
            )
        } else {
            let last = self.inserted_text.rsplit('\n').next().unwrap_or("");
            Position::new(self.range.start.line + newlines, char_len(last))
        }
    }

    /// Map a position through this operation's edit.
    ///
    /// Positions before the range are untouched; positions inside the range
    /// clamp to the post-insert end; positions at or after the range end shift
    /// by the operation's net line/column delta. This is computed from the
    /// operation's own range and the newline structure of its inserted text,
    /// never from an assumed line width.
    pub fn map_position(&self, pos: Position) -> Position {
        if pos <= self.range.start {
            return pos;
        }
        let end = self.range.end;
        let new_end = self.end_after_insert();
        let p = if pos < end { end } else { pos };
        if p.line == end.line {
            Position::new(new_end.line, new_end.column + (p.column - end.column))
        } else {
            let line = (p.line as i64 + new_end.line as i64 - end.line as i64) as usize;
            Position::new(line, p.column)
        }
    }

    /// Map a whole range through this operation's edit
    pub fn map_range(&self, range: &Range) -> Range {
        Range::new(self.map_position(range.start), self.map_position(range.end))
    }
}

/// Splice an operation into `content`, reconstructing the first and last
/// affected lines and replacing whole intermediate lines with the inserted
/// text's intermediate lines.
pub fn apply(content: &str, op: &Operation) -> Result<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let (s, e) = (op.range.start, op.range.end);
    if e < s {
        return Err(OtError::InvalidRange(format!(
            "range end {}:{} precedes start {}:{}",
            e.line, e.column, s.line, s.column
        )));
    }
    if e.line >= lines.len() {
        return Err(OtError::InvalidRange(format!(
            "line {} beyond document ({} lines)",
            e.line,
            lines.len()
        )));
    }
    let prefix = char_prefix(lines[s.line], s.column)?;
    let suffix = char_suffix(lines[e.line], e.column)?;

    let mut out = String::with_capacity(content.len() + op.inserted_text.len());
    for line in &lines[..s.line] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(prefix);
    out.push_str(&op.inserted_text);
    out.push_str(suffix);
    for line in &lines[e.line + 1..] {
        out.push('\n');
        out.push_str(line);
    }
    Ok(out)
}

/// Compute the operation that undoes `op` against the content it was applied
/// to, satisfying `apply(apply(c, op), invert(op, c)) == c`.
pub fn invert(op: &Operation, original: &str) -> Result<Operation> {
    let removed = extract(original, &op.range)?;
    Ok(Operation {
        range: Range::new(op.range.start, op.end_after_insert()),
        inserted_text: removed,
        replaced_length: char_len(&op.inserted_text),
        origin_user: op.origin_user,
        timestamp: op.timestamp,
        version: op.version,
    })
}

/// The text a range covers in `content`
pub fn extract(content: &str, range: &Range) -> Result<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let (s, e) = (range.start, range.end);
    if e < s || e.line >= lines.len() {
        return Err(OtError::InvalidRange(format!(
            "range {}:{}..{}:{} invalid for document of {} lines",
            s.line,
            s.column,
            e.line,
            e.column,
            lines.len()
        )));
    }
    if s.line == e.line {
        let line = lines[s.line];
        let head = char_suffix(line, s.column)?;
        let keep = e.column - s.column;
        return Ok(head.chars().take(keep).collect());
    }
    let mut out = String::new();
    out.push_str(char_suffix(lines[s.line], s.column)?);
    for line in &lines[s.line + 1..e.line] {
        out.push('\n');
        out.push_str(line);
    }
    out.push('\n');
    out.push_str(char_prefix(lines[e.line], e.column)?);
    Ok(out)
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn char_boundary(line: &str, column: usize) -> Result<usize> {
    if column == 0 {
        return Ok(0);
    }
    let mut seen = 0;
    for (idx, _) in line.char_indices() {
        if seen == column {
            return Ok(idx);
        }
        seen += 1;
    }
    if seen == column {
        return Ok(line.len());
    }
    Err(OtError::InvalidRange(format!(
        "column {} beyond line of {} characters",
        column, seen
    )))
}

fn char_prefix(line: &str, column: usize) -> Result<&str> {
    Ok(&line[..char_boundary(line, column)?])
}

fn char_suffix(line: &str, column: usize) -> Result<&str> {
    Ok(&line[char_boundary(line, column)?..])
}
