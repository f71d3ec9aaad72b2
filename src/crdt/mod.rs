//! Conflict-free replicated text.
//!
//! `primitives` holds the identity and clock types every replica shares;
//! `rga` is the character-level sequence CRDT.

pub mod primitives;
pub mod rga;

pub use rga::CharRecord;
pub use rga::TextReplica;

/// A CRDT is a data type with a merge operator that is commutative,
/// associative, and idempotent.
pub trait Crdt {
    /// Merge another instance into this one.
    fn merge(&mut self, other: &Self);
}
