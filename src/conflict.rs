//! Detecting and resolving semantically conflicting concurrent operations.
//!
//! OT and the CRDT both converge on their own; convergence is not the same
//! as intent. Two people typing at the same offset, or one person editing
//! text another just deleted, produce a merged result nobody asked for.
//! The resolver finds those pairs and rewrites them under a configured
//! strategy per conflict kind.
//!
//! Detection is a pairwise scan, O(n²) in the number of operations.

use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;
use smallvec::smallvec;
use tracing::warn;

use crate::op::Operation;

/// The shape of a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two inserts at the same position.
    InsertInsert,
    /// An insert strictly inside a concurrently deleted range.
    DeleteModify,
    /// Two overlapping deletes.
    ConcurrentEdit,
}

/// A set of concurrent operations that need a policy decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// The conflicting operations. For delete-modify the delete comes
    /// first; otherwise input order is kept.
    pub operations: SmallVec<[Operation; 2]>,
    pub position: usize,
}

/// How to order two inserts at the same position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertInsertStrategy {
    /// The later insert keeps the position, the earlier one follows it.
    #[default]
    LastWriterWins,
    /// Both are kept, ordered by content.
    MergeLexicographically,
}

/// What happens to text inserted inside a concurrently deleted range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteModifyStrategy {
    /// The delete stands and the insert is dropped.
    #[default]
    DeleteWins,
    /// The delete stands and the insert is moved to the deletion point.
    InsertWins,
}

/// How to combine two overlapping deletes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentEditStrategy {
    /// One delete covering both ranges.
    #[default]
    MergeRanges,
    /// Only the later delete.
    LastWriterWins,
}

/// Strategy per conflict kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub insert_insert: InsertInsertStrategy,
    pub delete_modify: DeleteModifyStrategy,
    pub concurrent_edit: ConcurrentEditStrategy,
}

/// The outcome of resolving one conflict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub conflict: Conflict,
    /// Operations to apply, in order.
    pub operations: Vec<Operation>,
    /// Operations the strategy discarded.
    pub dropped: Vec<Operation>,
}

/// Detects conflicts and resolves them under a fixed [`ResolverConfig`].
#[derive(Clone, Debug, Default)]
pub struct ConflictResolver {
    config: ResolverConfig,
}

impl ConflictResolver {
    pub fn new(config: ResolverConfig) -> ConflictResolver {
        return ConflictResolver { config };
    }

    pub fn config(&self) -> &ResolverConfig {
        return &self.config;
    }

    /// Every conflicting pair within `ops`.
    pub fn detect_conflicts(&self, ops: &[Operation]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (i, a) in ops.iter().enumerate() {
            for b in &ops[i + 1..] {
                conflicts.extend(classify(a, b));
            }
        }
        return conflicts;
    }

    /// Conflicting pairs with one operation from each side.
    ///
    /// Operations on the same side were made in sequence and never conflict
    /// with each other.
    pub fn detect_conflicts_between(&self, left: &[Operation], right: &[Operation]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for a in left {
            for b in right {
                conflicts.extend(classify(a, b));
            }
        }
        return conflicts;
    }

    /// Rewrite a conflict under the configured strategy.
    pub fn resolve(&self, conflict: &Conflict) -> Resolution {
        let mut resolution = Resolution {
            conflict: conflict.clone(),
            operations: conflict.operations.to_vec(),
            dropped: Vec::new(),
        };
        let [a, b] = match conflict.operations.as_slice() {
            [a, b, ..] => [a, b],
            _ => return resolution,
        };

        match conflict.kind {
            ConflictKind::InsertInsert => {
                let (first, second) = match self.config.insert_insert {
                    InsertInsertStrategy::LastWriterWins => {
                        let (earlier, later) = by_time(a, b);
                        (later, earlier)
                    }
                    InsertInsertStrategy::MergeLexicographically => {
                        if (a.content(), &a.author) <= (b.content(), &b.author) { (a, b) } else { (b, a) }
                    }
                };
                let mut second = second.clone();
                second.position = first.position + first.len();
                resolution.operations = vec![first.clone(), second];
            }
            ConflictKind::DeleteModify => {
                let (delete, insert) = (a, b);
                match self.config.delete_modify {
                    DeleteModifyStrategy::DeleteWins => {
                        warn!(
                            author = %insert.author,
                            position = insert.position,
                            "insert dropped inside concurrently deleted range"
                        );
                        resolution.operations = vec![delete.clone()];
                        resolution.dropped = vec![insert.clone()];
                    }
                    DeleteModifyStrategy::InsertWins => {
                        let mut moved = insert.clone();
                        moved.position = delete.position;
                        moved.anchor = None;
                        resolution.operations = vec![delete.clone(), moved];
                    }
                }
            }
            ConflictKind::ConcurrentEdit => {
                let (earlier, later) = by_time(a, b);
                match self.config.concurrent_edit {
                    ConcurrentEditStrategy::MergeRanges => {
                        let start = a.position.min(b.position);
                        let end = a.end().max(b.end());
                        let mut covering = Operation::delete(start, end - start, later.author.clone())
                            .issued_at(later.issued_at);
                        covering.operation_id = later.operation_id;
                        resolution.operations = vec![covering];
                    }
                    ConcurrentEditStrategy::LastWriterWins => {
                        resolution.operations = vec![later.clone()];
                        resolution.dropped = vec![earlier.clone()];
                    }
                }
            }
        }
        return resolution;
    }

    /// The operations to apply for a resolution, no-ops removed.
    pub fn apply_resolution(&self, resolution: Resolution) -> Vec<Operation> {
        return resolution.operations.into_iter().filter(|op| !op.is_noop()).collect();
    }
}

/// Order two operations by `issued_at`, then author, then operation id.
fn by_time<'a>(a: &'a Operation, b: &'a Operation) -> (&'a Operation, &'a Operation) {
    let key = |op: &'a Operation| (op.issued_at, &op.author, op.operation_id);
    if key(a) <= key(b) {
        return (a, b);
    }
    return (b, a);
}

fn classify(a: &Operation, b: &Operation) -> Option<Conflict> {
    if a.is_insert() && b.is_insert() && a.position == b.position {
        return Some(Conflict {
            kind: ConflictKind::InsertInsert,
            operations: smallvec![a.clone(), b.clone()],
            position: a.position,
        });
    }

    let delete_insert = match (a.is_delete(), b.is_delete()) {
        (true, false) if b.is_insert() => Some((a, b)),
        (false, true) if a.is_insert() => Some((b, a)),
        _ => None,
    };
    if let Some((delete, insert)) = delete_insert {
        if delete.position < insert.position && insert.position < delete.end() {
            return Some(Conflict {
                kind: ConflictKind::DeleteModify,
                operations: smallvec![delete.clone(), insert.clone()],
                position: insert.position,
            });
        }
        return None;
    }

    if a.is_delete() && b.is_delete() && a.position < b.end() && b.position < a.end() {
        return Some(Conflict {
            kind: ConflictKind::ConcurrentEdit,
            operations: smallvec![a.clone(), b.clone()],
            position: a.position.min(b.position),
        });
    }
    return None;
}
