//! A plain-string replica driven by operational transformation.
//!
//! The document keeps the log of every operation it applied. A remote
//! operation that was issued against an older version is transformed
//! against the log entries it has not seen before being applied, which is
//! the classic central-sequencer OT integration.

use rustc_hash::FxHashSet;
use tracing::debug;

use super::transform::transform;
use crate::crdt::primitives::LamportClock;
use crate::crdt::primitives::OpId;
use crate::crdt::primitives::UserId;
use crate::error::Error;
use crate::error::Result;
use crate::op::Operation;
use crate::op::char_len;
use crate::replica::Replica;

/// A text document replicated through operational transformation.
#[derive(Clone, Debug)]
pub struct OtDocument {
    author: UserId,
    text: String,
    clock: LamportClock,
    next_seq: u64,
    /// Every applied operation, in application order.
    log: Vec<Operation>,
    /// Ids of applied operations, for redelivery detection.
    seen: FxHashSet<OpId>,
}

impl OtDocument {
    /// Create an empty document.
    pub fn new(author: impl Into<UserId>) -> OtDocument {
        return OtDocument {
            author: author.into(),
            text: String::new(),
            clock: LamportClock::new(),
            next_seq: 0,
            log: Vec::new(),
            seen: FxHashSet::default(),
        };
    }

    /// The number of operations applied so far.
    ///
    /// Peers pass this back to [`OtDocument::apply_concurrent`] to say
    /// which state their operation was issued against.
    pub fn version(&self) -> usize {
        return self.log.len();
    }

    /// The applied operations, in order.
    pub fn log(&self) -> &[Operation] {
        return &self.log;
    }

    /// Apply an operation issued against `known_version` of this document.
    ///
    /// The operation is transformed against every operation applied since
    /// that version, then applied.
    pub fn apply_concurrent(&mut self, op: &Operation, known_version: usize) -> Result<bool> {
        if self.already_applied(op) {
            return Ok(false);
        }
        if known_version > self.log.len() {
            return Err(Error::OutOfBounds { position: known_version, len: self.log.len() });
        }

        let mut op = op.clone();
        for applied in &self.log[known_version..] {
            let (next, _) = transform(&op, applied)?;
            op = next;
        }
        self.integrate(op)?;
        return Ok(true);
    }

    fn already_applied(&self, op: &Operation) -> bool {
        match op.op_id() {
            Some(id) => return self.seen.contains(&id),
            None => return false,
        }
    }

    fn integrate(&mut self, op: Operation) -> Result<()> {
        op.apply_to(&mut self.text)?;
        self.clock.observe(op.issued_at);
        if let Some(id) = op.op_id() {
            self.seen.insert(id);
        }
        debug!(author = %op.author, position = op.position, kind = ?op.kind, "applied");
        self.log.push(op);
        return Ok(());
    }

    fn issue(&mut self, op: Operation) -> Result<Operation> {
        op.validate(self.len())?;
        let seq = self.next_seq;
        self.next_seq += 1;
        let op = op.issued_at(self.clock.tick()).with_id(seq);
        self.integrate(op.clone())?;
        return Ok(op);
    }
}

impl Replica for OtDocument {
    fn author(&self) -> &UserId {
        return &self.author;
    }

    fn insert(&mut self, position: usize, content: &str) -> Result<Operation> {
        if content.is_empty() {
            return Err(Error::EmptyInsert);
        }
        let op = Operation::insert(position, content, self.author.clone());
        return self.issue(op);
    }

    fn delete(&mut self, position: usize, length: usize) -> Result<Operation> {
        let op = Operation::delete(position, length, self.author.clone());
        return self.issue(op);
    }

    fn apply_operation(&mut self, op: &Operation) -> Result<bool> {
        if self.already_applied(op) {
            return Ok(false);
        }
        self.integrate(op.clone())?;
        return Ok(true);
    }

    fn text(&self) -> String {
        return self.text.clone();
    }

    fn len(&self) -> usize {
        return char_len(&self.text);
    }
}
