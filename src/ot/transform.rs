//! Pairwise operational transformation.
//!
//! `transform(a, b)` takes two operations issued against the same document
//! and returns `(a', b')` such that applying `a` then `b'` produces the
//! same text as applying `b` then `a'`.
//!
//! | a \ b  | insert                 | delete                      |
//! |--------|------------------------|-----------------------------|
//! | insert | lower position first   | shift, or absorb if inside  |
//! | delete | shift, or absorb       | keep only the undeleted part |
//!
//! Retains are identities and only have their position carried along.

use std::cmp::Ordering;

use tracing::error;
use tracing::trace;

use crate::error::Error;
use crate::error::Result;
use crate::op::OpKind;
use crate::op::Operation;
use crate::op::char_len;
use crate::op::char_slice;

/// Transform two concurrent operations against each other.
///
/// Both operations must have been issued against the same base document.
/// Operations sharing an `(author, operation_id)` are the same logical
/// edit and cannot be transformed; that is rejected with
/// [`Error::SameOrigin`].
pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation)> {
    if let (Some(a_id), Some(b_id)) = (a.op_id(), b.op_id()) {
        if a_id == b_id {
            error!(author = %a_id.author, operation_id = a_id.seq, "transform of same-origin operations");
            return Err(Error::SameOrigin { author: a_id.author, operation_id: a_id.seq });
        }
    }

    let pair = match (&a.kind, &b.kind) {
        (OpKind::Retain(_), _) | (_, OpKind::Retain(_)) => {
            (moved(a, transform_position(a.position, b)), moved(b, transform_position(b.position, a)))
        }
        (OpKind::Insert(_), OpKind::Insert(_)) => insert_insert(a, b),
        (OpKind::Insert(_), OpKind::Delete(_)) => insert_delete(a, b),
        (OpKind::Delete(_), OpKind::Insert(_)) => {
            let (ins, del) = insert_delete(b, a);
            (del, ins)
        }
        (OpKind::Delete(_), OpKind::Delete(_)) => delete_delete(a, b),
    };

    trace!(?a, ?b, a_prime = ?pair.0, b_prime = ?pair.1, "transformed");
    return Ok(pair);
}

/// Transform an ordered batch of concurrent operations so the result can
/// be applied one after another in arrival order.
///
/// Every operation is transformed against each earlier (already
/// transformed) operation in turn.
pub fn transform_batch(operations: &[Operation]) -> Result<Vec<Operation>> {
    let mut out: Vec<Operation> = Vec::with_capacity(operations.len());
    for op in operations {
        let mut current = op.clone();
        for earlier in &out {
            let (_, next) = transform(earlier, &current)?;
            current = next;
        }
        out.push(current);
    }
    return Ok(out);
}

/// Rebase the sequence `ours` so it applies after the sequence `theirs`.
///
/// Both sequences must start from the same document. Each sequence is
/// internally sequential (every operation applies after the previous).
pub fn rebase(ours: &[Operation], theirs: &[Operation]) -> Result<Vec<Operation>> {
    let mut ours = ours.to_vec();
    for their in theirs {
        let mut their = their.clone();
        for our in ours.iter_mut() {
            let (our_next, their_next) = transform(our, &their)?;
            *our = our_next;
            their = their_next;
        }
    }
    return Ok(ours);
}

/// Move a single character position across an operation.
///
/// - A position strictly past an insert point shifts right by the
///   inserted length.
/// - A position inside a deleted range collapses to the deletion start.
/// - A position past a deleted range shifts left by the deleted length.
pub fn transform_position(pos: usize, op: &Operation) -> usize {
    match &op.kind {
        OpKind::Insert(content) => {
            if pos > op.position {
                return pos + char_len(content);
            }
            return pos;
        }
        OpKind::Delete(length) => {
            if pos <= op.position {
                return pos;
            }
            if pos < op.position + length {
                return op.position;
            }
            return pos - length;
        }
        OpKind::Retain(_) => return pos,
    }
}

/// Fold a run of same-author operations into one equivalent operation.
///
/// Handled pairs:
/// - insert then insert landing inside or right after it (typing)
/// - insert then delete entirely inside the inserted text (correction)
/// - delete then delete at the same point (forward delete) or right
///   before it (backspace)
///
/// Any other pair returns [`Error::Incomposable`] so the caller keeps the
/// operations separate instead of losing one of them.
pub fn compose(operations: &[Operation]) -> Result<Operation> {
    let Some((first, rest)) = operations.split_first() else {
        return Err(Error::Incomposable("no operations".to_string()));
    };
    let mut acc = first.clone();
    for next in rest {
        acc = compose_pair(&acc, next)?;
    }
    return Ok(acc);
}

fn compose_pair(a: &Operation, b: &Operation) -> Result<Operation> {
    if a.author != b.author {
        return Err(Error::Incomposable(format!("authors {} and {} differ", a.author, b.author)));
    }
    if b.is_noop() {
        return Ok(a.clone());
    }
    if a.is_noop() {
        return Ok(b.clone());
    }

    let kind = match (&a.kind, &b.kind) {
        (OpKind::Insert(first), OpKind::Insert(second))
            if b.position >= a.position && b.position <= a.end() =>
        {
            let split = b.position - a.position;
            let mut content = String::with_capacity(first.len() + second.len());
            content.push_str(char_slice(first, 0, split).unwrap_or_default());
            content.push_str(second);
            content.push_str(char_slice(first, split, char_len(first)).unwrap_or_default());
            Some(OpKind::Insert(content))
        }
        (OpKind::Insert(first), OpKind::Delete(length))
            if b.position >= a.position && b.position + length <= a.end() =>
        {
            let start = b.position - a.position;
            let mut content = String::with_capacity(first.len());
            content.push_str(char_slice(first, 0, start).unwrap_or_default());
            content.push_str(char_slice(first, start + length, char_len(first)).unwrap_or_default());
            if content.is_empty() {
                Some(OpKind::Retain(0))
            } else {
                Some(OpKind::Insert(content))
            }
        }
        (OpKind::Delete(first), OpKind::Delete(second)) if b.position == a.position => {
            Some(OpKind::Delete(first + second))
        }
        (OpKind::Delete(first), OpKind::Delete(second)) if b.position + second == a.position => {
            return Ok(Operation {
                kind: OpKind::Delete(first + second),
                position: b.position,
                author: b.author.clone(),
                issued_at: b.issued_at.max(a.issued_at),
                operation_id: b.operation_id,
                anchor: None,
            });
        }
        _ => None,
    };

    let Some(kind) = kind else {
        return Err(Error::Incomposable(format!(
            "{} at {} then {} at {}",
            kind_name(&a.kind),
            a.position,
            kind_name(&b.kind),
            b.position,
        )));
    };
    return Ok(Operation {
        kind,
        position: a.position,
        author: b.author.clone(),
        issued_at: b.issued_at.max(a.issued_at),
        operation_id: b.operation_id,
        anchor: None,
    });
}

/// Produce the operation that undoes `op`.
///
/// `document_text` must be the document as it was *before* `op` was
/// applied; for deletes the removed text is read from it.
pub fn invert(op: &Operation, document_text: &str) -> Result<Operation> {
    let inverse = match &op.kind {
        OpKind::Insert(content) => Operation::delete(op.position, char_len(content), op.author.clone()),
        OpKind::Delete(length) => {
            let end = op.position + length;
            let Some(removed) = char_slice(document_text, op.position, end) else {
                return Err(Error::RangeOutOfBounds {
                    start: op.position,
                    end,
                    len: char_len(document_text),
                });
            };
            Operation::insert(op.position, removed, op.author.clone())
        }
        OpKind::Retain(length) => Operation::retain(op.position, *length, op.author.clone()),
    };
    return Ok(inverse.issued_at(op.issued_at));
}

fn insert_insert(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let a_first = match a.position.cmp(&b.position) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => tie_order(a, b) != Ordering::Greater,
    };
    if a_first {
        return (a.clone(), moved(b, b.position + a.len()));
    }
    return (moved(a, a.position + b.len()), b.clone());
}

/// Deterministic order for inserts at the same position: author, then
/// timestamp, then operation id, then content. The lower one goes left.
fn tie_order(a: &Operation, b: &Operation) -> Ordering {
    return a
        .author
        .cmp(&b.author)
        .then(a.issued_at.cmp(&b.issued_at))
        .then(a.operation_id.cmp(&b.operation_id))
        .then(a.content().cmp(&b.content()));
}

/// Returns (insert', delete').
fn insert_delete(ins: &Operation, del: &Operation) -> (Operation, Operation) {
    let inserted = ins.len();
    let deleted = del.len();

    if ins.position <= del.position {
        return (ins.clone(), moved(del, del.position + inserted));
    }
    if ins.position >= del.position + deleted {
        return (moved(ins, ins.position - deleted), del.clone());
    }

    // The insert landed strictly inside the deleted range. The delete grows
    // to cover it, so the insert is clamped to the delete's start and
    // neutralised.
    let absorbed = resized(ins, OpKind::Retain(0), del.position);
    let extended = resized(del, OpKind::Delete(deleted + inserted), del.position);
    return (absorbed, extended);
}

fn delete_delete(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let (a_start, a_end) = (a.position, a.end());
    let (b_start, b_end) = (b.position, b.end());

    if a_end <= b_start {
        return (a.clone(), moved(b, b_start - a.len()));
    }
    if b_end <= a_start {
        return (moved(a, a_start - b.len()), b.clone());
    }

    // Overlap: each side only removes what the other left behind.
    let overlap = a_end.min(b_end) - a_start.max(b_start);
    let start = a_start.min(b_start);
    return (shrunk(a, start, a.len() - overlap), shrunk(b, start, b.len() - overlap));
}

fn shrunk(op: &Operation, position: usize, length: usize) -> Operation {
    if length == 0 {
        return resized(op, OpKind::Retain(0), position);
    }
    return resized(op, OpKind::Delete(length), position);
}

/// Same operation at a new position. Anchors stay valid: they refer to
/// record identities, not offsets.
fn moved(op: &Operation, position: usize) -> Operation {
    let mut out = op.clone();
    out.position = position;
    return out;
}

/// Operation with a new kind. The anchor no longer describes it.
fn resized(op: &Operation, kind: OpKind, position: usize) -> Operation {
    let mut out = op.clone();
    out.kind = kind;
    out.position = position;
    out.anchor = None;
    return out;
}

fn kind_name(kind: &OpKind) -> &'static str {
    match kind {
        OpKind::Insert(_) => return "insert",
        OpKind::Delete(_) => return "delete",
        OpKind::Retain(_) => return "retain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(base: &str, ops: &[&Operation]) -> String {
        let mut text = base.to_string();
        for op in ops {
            op.apply_to(&mut text).unwrap();
        }
        return text;
    }

    /// Apply both orders and check they agree; returns the converged text.
    fn converge(base: &str, a: &Operation, b: &Operation) -> String {
        let (a2, b2) = transform(a, b).unwrap();
        let left = apply(base, &[a, &b2]);
        let right = apply(base, &[b, &a2]);
        assert_eq!(left, right, "a={:?} b={:?}", a, b);
        return left;
    }

    #[test]
    fn insert_insert_lower_position_first() {
        let a = Operation::insert(1, "X", "alice");
        let b = Operation::insert(3, "YY", "bob");
        let (a2, b2) = transform(&a, &b).unwrap();
        assert_eq!(a2.position, 1);
        assert_eq!(b2.position, 4);
        assert_eq!(converge("abcd", &a, &b), "aXbcYYd");
    }

    #[test]
    fn insert_insert_tie_breaks_on_author() {
        let a = Operation::insert(0, "bob", "bob").issued_at(1);
        let b = Operation::insert(0, "alice", "alice").issued_at(9);
        assert_eq!(converge("", &a, &b), "alicebob");
        assert_eq!(converge("", &b, &a), "alicebob");
    }

    #[test]
    fn insert_insert_tie_breaks_on_timestamp() {
        let a = Operation::insert(2, "late", "alice").issued_at(5);
        let b = Operation::insert(2, "early", "alice").issued_at(2);
        assert_eq!(converge("xy", &a, &b), "xyearlylate");
    }

    #[test]
    fn insert_before_delete_shifts_delete() {
        let ins = Operation::insert(1, "ZZ", "alice");
        let del = Operation::delete(2, 2, "bob");
        let (i2, d2) = transform(&ins, &del).unwrap();
        assert_eq!(i2.position, 1);
        assert_eq!(d2.position, 4);
        assert_eq!(converge("abcdef", &ins, &del), "aZZbef");
    }

    #[test]
    fn insert_after_delete_shifts_insert() {
        let ins = Operation::insert(5, "Q", "alice");
        let del = Operation::delete(1, 2, "bob");
        let (i2, _) = transform(&ins, &del).unwrap();
        assert_eq!(i2.position, 3);
        assert_eq!(converge("abcdef", &ins, &del), "adeQf");
    }

    #[test]
    fn insert_inside_delete_is_absorbed() {
        let ins = Operation::insert(3, "XX", "alice");
        let del = Operation::delete(1, 4, "bob");
        let (i2, d2) = transform(&ins, &del).unwrap();
        assert_eq!(i2.kind, OpKind::Retain(0));
        assert_eq!(i2.position, 1);
        assert_eq!(d2.kind, OpKind::Delete(6));
        assert_eq!(d2.position, 1);
        assert_eq!(converge("abcdefg", &ins, &del), "afg");

        // Same result with the arguments swapped
        assert_eq!(converge("abcdefg", &del, &ins), "afg");
    }

    #[test]
    fn delete_delete_disjoint() {
        let a = Operation::delete(0, 2, "alice");
        let b = Operation::delete(4, 2, "bob");
        assert_eq!(converge("abcdefg", &a, &b), "cdg");
    }

    #[test]
    fn delete_delete_overlapping() {
        let a = Operation::delete(1, 3, "alice");
        let b = Operation::delete(2, 4, "bob");
        let (a2, b2) = transform(&a, &b).unwrap();
        assert_eq!((a2.position, a2.len()), (1, 1));
        assert_eq!((b2.position, b2.len()), (1, 2));
        assert_eq!(converge("abcdefgh", &a, &b), "agh");
    }

    #[test]
    fn delete_delete_identical_range_does_not_double_shrink() {
        let a = Operation::delete(2, 3, "alice");
        let b = Operation::delete(2, 3, "bob");
        let (a2, b2) = transform(&a, &b).unwrap();
        assert!(a2.is_noop());
        assert!(b2.is_noop());
        assert_eq!(converge("abcdefg", &a, &b), "abfg");
    }

    #[test]
    fn delete_delete_contained() {
        let outer = Operation::delete(1, 5, "alice");
        let inner = Operation::delete(2, 2, "bob");
        let (o2, i2) = transform(&outer, &inner).unwrap();
        assert_eq!(o2.kind, OpKind::Delete(3));
        assert_eq!(i2.kind, OpKind::Retain(0));
        assert_eq!(converge("abcdefgh", &outer, &inner), "agh");
    }

    #[test]
    fn retain_is_identity() {
        let a = Operation::retain(3, 0, "alice");
        let b = Operation::insert(0, "xy", "bob");
        let (a2, b2) = transform(&a, &b).unwrap();
        assert_eq!(a2.position, 5);
        assert_eq!(b2, b);
        assert_eq!(converge("abc", &a, &b), "xyabc");
    }

    #[test]
    fn same_origin_is_rejected() {
        let a = Operation::insert(0, "a", "alice").with_id(1);
        let b = Operation::delete(0, 1, "alice").with_id(1);
        let err = transform(&a, &b);
        assert!(matches!(err, Err(Error::SameOrigin { operation_id: 1, .. })));

        // Same author, different ids is fine
        let c = Operation::insert(0, "c", "alice").with_id(2);
        assert!(transform(&a, &c).is_ok());
    }

    #[test]
    fn batch_applies_in_arrival_order() {
        let ops = vec![
            Operation::insert(0, "A", "alice"),
            Operation::insert(3, "B", "bob"),
            Operation::delete(1, 1, "carol"),
        ];
        let batch = transform_batch(&ops).unwrap();
        let mut text = "xyz".to_string();
        for op in &batch {
            op.apply_to(&mut text).unwrap();
        }
        assert_eq!(text, "AxzB");
    }

    #[test]
    fn rebase_sequence_onto_sequence() {
        let base = "0123456789";
        let ours = vec![Operation::insert(8, "ab", "alice"), Operation::delete(0, 1, "alice")];
        let theirs = vec![Operation::insert(2, "XYZ", "bob"), Operation::delete(5, 1, "bob")];
        let rebased = rebase(&ours, &theirs).unwrap();

        let mut text = base.to_string();
        for op in theirs.iter().chain(rebased.iter()) {
            op.apply_to(&mut text).unwrap();
        }
        assert_eq!(text, "1XYZ34567ab89");
    }

    #[test]
    fn position_rules() {
        let ins = Operation::insert(2, "abc", "alice");
        assert_eq!(transform_position(5, &ins), 8);
        assert_eq!(transform_position(2, &ins), 2);
        assert_eq!(transform_position(1, &ins), 1);

        let del = Operation::delete(2, 3, "alice");
        assert_eq!(transform_position(1, &del), 1);
        assert_eq!(transform_position(3, &del), 2);
        assert_eq!(transform_position(5, &del), 2);
        assert_eq!(transform_position(9, &del), 6);
    }

    #[test]
    fn compose_typing_run() {
        let ops = vec![
            Operation::insert(4, "h", "alice").issued_at(1),
            Operation::insert(5, "e", "alice").issued_at(2),
            Operation::insert(6, "y", "alice").issued_at(3),
        ];
        let op = compose(&ops).unwrap();
        assert_eq!(op.kind, OpKind::Insert("hey".to_string()));
        assert_eq!(op.position, 4);
        assert_eq!(op.issued_at, 3);
    }

    #[test]
    fn compose_insert_inside_insert_splices() {
        let ops = vec![Operation::insert(0, "hllo", "alice"), Operation::insert(1, "e", "alice")];
        assert_eq!(compose(&ops).unwrap().content(), Some("hello"));
    }

    #[test]
    fn compose_correction_shrinks_insert() {
        let ops = vec![Operation::insert(2, "helxlo", "alice"), Operation::delete(5, 1, "alice")];
        let op = compose(&ops).unwrap();
        assert_eq!(op.content(), Some("hello"));
        assert_eq!(op.position, 2);
    }

    #[test]
    fn compose_backspace_and_forward_delete() {
        let backspace = vec![Operation::delete(5, 1, "alice"), Operation::delete(4, 1, "alice")];
        let op = compose(&backspace).unwrap();
        assert_eq!((op.position, op.kind), (4, OpKind::Delete(2)));

        let forward = vec![Operation::delete(5, 1, "alice"), Operation::delete(5, 2, "alice")];
        let op = compose(&forward).unwrap();
        assert_eq!((op.position, op.kind), (5, OpKind::Delete(3)));
    }

    #[test]
    fn compose_rejects_lossy_pairs() {
        let replace = vec![Operation::delete(0, 3, "alice"), Operation::insert(0, "x", "alice")];
        assert!(matches!(compose(&replace), Err(Error::Incomposable(_))));

        let far = vec![Operation::insert(0, "a", "alice"), Operation::insert(10, "b", "alice")];
        assert!(matches!(compose(&far), Err(Error::Incomposable(_))));

        let authors = vec![Operation::insert(0, "a", "alice"), Operation::insert(1, "b", "bob")];
        assert!(matches!(compose(&authors), Err(Error::Incomposable(_))));

        assert!(matches!(compose(&[]), Err(Error::Incomposable(_))));
    }

    #[test]
    fn invert_round_trips() {
        let base = "hello world";
        let del = Operation::delete(5, 6, "alice");
        let inv = invert(&del, base).unwrap();
        assert_eq!(inv.content(), Some(" world"));
        assert_eq!(apply(base, &[&del, &inv]), base);

        let ins = Operation::insert(0, "¡", "alice");
        let inv = invert(&ins, base).unwrap();
        assert_eq!(apply(base, &[&ins, &inv]), base);
    }

    #[test]
    fn invert_needs_the_removed_text() {
        let del = Operation::delete(3, 5, "alice");
        assert!(matches!(invert(&del, "abc"), Err(Error::RangeOutOfBounds { .. })));
    }
}
