//! Identifier types for operations and character records.
//!
//! # Identifier Hierarchy
//!
//! - `OpId`: identifies an operation (author, sequence number)
//! - `RecordId`: identifies one character inserted by an operation
//!   (author, id space, sequence number, offset)
//!
//! Both are totally ordered so concurrent inserts can be placed
//! deterministically on every replica.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// An opaque user identifier.
pub type UserId = String;

/// An operation identifier.
///
/// The (author, seq) pair is globally unique as long as authors are
/// unique and every author numbers its operations monotonically.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpId {
    /// The author who issued the operation.
    pub author: UserId,
    /// The author's sequence number for the operation.
    pub seq: u64,
}

impl OpId {
    /// Create a new operation ID.
    pub fn new(author: impl Into<UserId>, seq: u64) -> OpId {
        return OpId { author: author.into(), seq };
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.author.cmp(&other.author) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            other => other,
        }
    }
}

/// Where a record's sequence number comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSpace {
    /// The author's own operation sequence.
    #[default]
    Issued,
    /// A replica-local counter, for operations that arrive without an id.
    Minted,
}

impl IdSpace {
    fn is_issued(&self) -> bool {
        return *self == IdSpace::Issued;
    }
}

/// A character record identifier.
///
/// Multi-character inserts share the operation's (author, seq) and are
/// told apart by `offset`. Minted ids never collide with issued ones.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// The author who inserted this record.
    pub author: UserId,
    /// Which counter `seq` belongs to.
    #[serde(default, skip_serializing_if = "IdSpace::is_issued")]
    pub space: IdSpace,
    /// The sequence number of the inserting operation.
    pub seq: u64,
    /// Offset of the character within the inserting operation.
    pub offset: u32,
}

impl RecordId {
    /// Create a new record ID.
    pub fn new(author: impl Into<UserId>, seq: u64, offset: u32) -> RecordId {
        return RecordId { author: author.into(), space: IdSpace::Issued, seq, offset };
    }

    /// Create a record ID from a replica-local counter.
    pub fn minted(author: impl Into<UserId>, seq: u64, offset: u32) -> RecordId {
        return RecordId { author: author.into(), space: IdSpace::Minted, seq, offset };
    }

    /// The id of the character `offset` places further into the same insert.
    pub fn at_offset(&self, offset: u32) -> RecordId {
        return RecordId { offset, ..self.clone() };
    }

    /// Get the operation ID for this record.
    pub fn op_id(&self) -> OpId {
        return OpId::new(self.author.clone(), self.seq);
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.space {
            IdSpace::Issued => "",
            IdSpace::Minted => "~",
        };
        return write!(f, "RecordId({}, {}{}, {})", self.author, marker, self.seq, self.offset);
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare by author, then id space, then seq, then offset
        return self
            .author
            .cmp(&other.author)
            .then(self.space.cmp(&other.space))
            .then(self.seq.cmp(&other.seq))
            .then(self.offset.cmp(&other.offset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_ordering() {
        let a = OpId::new("alice", 1);
        let b = OpId::new("alice", 2);
        let c = OpId::new("bob", 1);

        assert!(a < b);
        assert!(a < c); // "alice" < "bob"
        assert!(b < c);
    }

    #[test]
    fn record_id_ordering() {
        let a = RecordId::new("alice", 1, 0);
        let b = RecordId::new("alice", 1, 1);
        let c = RecordId::new("alice", 2, 0);
        let d = RecordId::new("bob", 0, 0);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn minted_ids_are_distinct_from_issued() {
        let issued = RecordId::new("alice", 3, 0);
        let minted = RecordId::minted("alice", 3, 0);
        assert_ne!(issued, minted);
        assert!(issued < minted);
        assert!(minted < RecordId::new("bob", 0, 0));
        assert_eq!(minted.at_offset(2), RecordId::minted("alice", 3, 2));
        assert_eq!(format!("{minted:?}"), "RecordId(alice, ~3, 0)");
    }

    #[test]
    fn record_id_to_op_id() {
        let record = RecordId::new("alice", 42, 5);
        let op = record.op_id();

        assert_eq!(op.author, "alice");
        assert_eq!(op.seq, 42);
    }
}
