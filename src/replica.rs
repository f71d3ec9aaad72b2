//! The `Replica` trait: one document copy that converges with its peers.
//!
//! Two strategies implement it:
//! - [`TextReplica`](crate::crdt::rga::TextReplica): a tombstone CRDT that
//!   integrates operations in any delivery order.
//! - [`OtDocument`](crate::ot::document::OtDocument): a plain string that
//!   relies on operational transformation (and an upstream sequencer) for
//!   concurrent edits.
//!
//! The session facade is generic over this trait so the strategies can be
//! swapped without touching presence or history handling.

use crate::crdt::primitives::UserId;
use crate::error::Result;
use crate::op::Operation;

/// A replica of a shared text document.
///
/// Positions are in terms of visible characters. Local edits return the
/// operation to broadcast; remote operations are applied idempotently.
pub trait Replica {
    /// The user this replica issues local operations as.
    fn author(&self) -> &UserId;

    /// Insert `content` at a visible position and return the operation.
    fn insert(&mut self, position: usize, content: &str) -> Result<Operation>;

    /// Delete `length` visible characters at `position` and return the
    /// operation.
    fn delete(&mut self, position: usize, length: usize) -> Result<Operation>;

    /// Apply an operation issued elsewhere.
    ///
    /// Returns true if the operation was applied now, false if it was
    /// already applied (or is waiting on causal dependencies).
    fn apply_operation(&mut self, op: &Operation) -> Result<bool>;

    /// Apply an operation issued elsewhere and report what it changed.
    ///
    /// Returns None if nothing was applied. Otherwise returns the changes
    /// to this replica's visible text as positional operations, in order.
    /// These can differ from `op` itself: a concurrent CRDT insert may land
    /// away from its nominal position, and applying one operation can
    /// release others that were waiting on it.
    fn apply_remote(&mut self, op: &Operation) -> Result<Option<Vec<Operation>>> {
        if self.apply_operation(op)? {
            return Ok(Some(vec![op.clone()]));
        }
        return Ok(None);
    }

    /// Apply a batch of remote operations in order.
    ///
    /// Returns how many of them changed the document.
    fn apply_operations(&mut self, ops: &[Operation]) -> Result<usize> {
        let mut applied = 0;
        for op in ops {
            if self.apply_operation(op)? {
                applied += 1;
            }
        }
        return Ok(applied);
    }

    /// The visible text.
    fn text(&self) -> String;

    /// The visible length in characters.
    fn len(&self) -> usize;

    /// Check if the document is empty.
    fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// The visible characters in `[start, end)`.
    ///
    /// Returns None if the range is out of bounds.
    fn slice(&self, start: usize, end: usize) -> Option<String> {
        return crate::op::char_slice(&self.text(), start, end).map(str::to_string);
    }
}
