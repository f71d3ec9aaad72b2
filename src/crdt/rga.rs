//! Replicated Growable Array (RGA) over individual characters.
//!
//! Every inserted character becomes a [`CharRecord`] with a globally unique
//! [`RecordId`]. Records are never removed; deletes set a tombstone flag so
//! operations that reference old records can still be resolved.
//!
//! Placement rule: a record goes right after its origin (the record it was
//! typed after), skipping any records with a greater `(issued_at, id)` key.
//! Because a Lamport timestamp always exceeds the timestamps of everything
//! its issuer had seen, the records skipped this way are exactly the
//! concurrent inserts that must sort first. Every replica therefore builds
//! the same sequence no matter the delivery order.
//!
//! Operations whose origin or delete targets have not arrived yet are held
//! back and retried after each successful application.
//!
//! Inserts that carry an `operation_id` get records in the author's issued id
//! space and are applied at most once. Inserts without one cannot be told
//! apart from a redelivery, so each application mints fresh records from a
//! replica-local counter.
//!
//! Complexity (n = records, including tombstones):
//! - insert/delete by position: O(n) walk
//! - text: O(n)
//! - len: O(1)

use rustc_hash::FxHashSet;
use tracing::debug;

use super::Crdt;
use super::primitives::LamportClock;
use super::primitives::OpId;
use super::primitives::RecordId;
use super::primitives::UserId;
use crate::error::Error;
use crate::error::Result;
use crate::op::Anchor;
use crate::op::OpKind;
use crate::op::Operation;
use crate::op::char_len;
use crate::replica::Replica;

/// One inserted character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharRecord {
    /// Globally unique identity.
    pub id: RecordId,
    /// The character.
    pub content: char,
    /// The record this one was inserted after (None = beginning).
    pub origin: Option<RecordId>,
    /// Timestamp of the inserting operation.
    pub issued_at: u64,
    /// Tombstone flag.
    pub deleted: bool,
}

impl CharRecord {
    /// The user who inserted this record.
    pub fn author(&self) -> &UserId {
        return &self.id.author;
    }

    /// Sort key among concurrent siblings; greater keys sort first.
    fn key(&self) -> (u64, &RecordId) {
        return (self.issued_at, &self.id);
    }
}

/// The result of integrating one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Applied,
    Duplicate,
    Deferred,
}

/// A CRDT text replica.
#[derive(Clone, Debug)]
pub struct TextReplica {
    /// The local user.
    author: UserId,
    /// All records in document order, tombstones included.
    records: Vec<CharRecord>,
    /// Every record id present in `records`.
    known: FxHashSet<RecordId>,
    /// Every applied operation id.
    applied: FxHashSet<OpId>,
    /// Operations waiting for their origin or targets.
    pending: Vec<Operation>,
    /// Number of non-deleted records.
    visible: usize,
    clock: LamportClock,
    /// Next sequence number for local operations.
    next_seq: u64,
    /// Next sequence number for records of id-less inserts.
    next_minted: u64,
}

impl TextReplica {
    /// Create an empty replica for `author`.
    pub fn new(author: impl Into<UserId>) -> TextReplica {
        return TextReplica {
            author: author.into(),
            records: Vec::new(),
            known: FxHashSet::default(),
            applied: FxHashSet::default(),
            pending: Vec::new(),
            visible: 0,
            clock: LamportClock::new(),
            next_seq: 0,
            next_minted: 0,
        };
    }

    /// The stored sequence, tombstones included.
    pub fn records(&self) -> &[CharRecord] {
        return &self.records;
    }

    /// Number of operations waiting on causal dependencies.
    pub fn pending_len(&self) -> usize {
        return self.pending.len();
    }

    /// The current Lamport time.
    pub fn time(&self) -> u64 {
        return self.clock.time();
    }

    /// Storage index of the visible character at `pos`.
    fn visible_index(&self, pos: usize) -> Option<usize> {
        let mut seen = 0;
        for (i, record) in self.records.iter().enumerate() {
            if record.deleted {
                continue;
            }
            if seen == pos {
                return Some(i);
            }
            seen += 1;
        }
        return None;
    }

    fn index_of(&self, id: &RecordId) -> Option<usize> {
        if !self.known.contains(id) {
            return None;
        }
        return self.records.iter().position(|r| &r.id == id);
    }

    /// First index at or after `start` where `record` belongs among its
    /// concurrent siblings.
    fn place(&self, start: usize, record: &CharRecord) -> usize {
        let mut i = start;
        while i < self.records.len() && self.records[i].key() > record.key() {
            i += 1;
        }
        return i;
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        return seq;
    }

    /// Whether an insert with this id was already integrated.
    fn seen_insert(&self, op: &Operation) -> bool {
        return match op.operation_id {
            Some(seq) => self.known.contains(&RecordId::new(op.author.clone(), seq, 0)),
            None => false,
        };
    }

    /// Id of the first record an insert creates.
    fn first_record_id(&mut self, op: &Operation) -> RecordId {
        match op.operation_id {
            Some(seq) => return RecordId::new(op.author.clone(), seq, 0),
            None => {
                let seq = self.next_minted;
                self.next_minted += 1;
                return RecordId::minted(op.author.clone(), seq, 0);
            }
        }
    }

    /// Apply one operation without draining the pending queue.
    ///
    /// Visible changes are appended to `effects` as positional operations
    /// against this replica's text.
    fn integrate(&mut self, op: &Operation, effects: &mut Vec<Operation>) -> Result<Outcome> {
        if let Some(id) = op.op_id() {
            if self.applied.contains(&id) {
                return Ok(Outcome::Duplicate);
            }
        }

        let outcome = match (&op.kind, &op.anchor) {
            (OpKind::Insert(content), Some(Anchor::After(origin))) => {
                self.integrate_insert(op, content, origin.as_ref(), effects)?
            }
            (OpKind::Insert(content), _) => self.integrate_positional_insert(op, content, effects)?,
            (OpKind::Delete(_), Some(Anchor::Targets(targets))) => self.integrate_delete(op, targets, effects),
            (OpKind::Delete(length), _) => self.integrate_positional_delete(op, *length, effects)?,
            (OpKind::Retain(_), _) => Outcome::Applied,
        };

        if outcome == Outcome::Applied {
            self.clock.observe(op.issued_at);
            if let Some(id) = op.op_id() {
                self.applied.insert(id);
            }
        }
        return Ok(outcome);
    }

    fn integrate_insert(
        &mut self,
        op: &Operation,
        content: &str,
        origin: Option<&RecordId>,
        effects: &mut Vec<Operation>,
    ) -> Result<Outcome> {
        if content.is_empty() {
            return Err(Error::EmptyInsert);
        }
        if self.seen_insert(op) {
            return Ok(Outcome::Duplicate);
        }
        let start = match origin {
            None => 0,
            Some(origin) => match self.index_of(origin) {
                Some(i) => i + 1,
                None => return Ok(Outcome::Deferred),
            },
        };
        let first = self.first_record_id(op);
        self.splice(op, first, content, origin.cloned(), start, true, effects);
        return Ok(Outcome::Applied);
    }

    /// Insert at a visible position, for operations that carry no anchor.
    fn integrate_positional_insert(
        &mut self,
        op: &Operation,
        content: &str,
        effects: &mut Vec<Operation>,
    ) -> Result<Outcome> {
        if content.is_empty() {
            return Err(Error::EmptyInsert);
        }
        if self.seen_insert(op) {
            return Ok(Outcome::Duplicate);
        }
        op.validate(self.visible)?;
        let (origin, start) = match op.position {
            0 => (None, 0),
            position => match self.visible_index(position - 1) {
                Some(i) => (Some(self.records[i].id.clone()), i + 1),
                None => return Err(Error::OutOfBounds { position, len: self.visible }),
            },
        };
        let first = self.first_record_id(op);
        self.splice(op, first, content, origin, start, false, effects);
        return Ok(Outcome::Applied);
    }

    /// Insert one record per character, chaining each to the previous.
    fn splice(
        &mut self,
        op: &Operation,
        first: RecordId,
        content: &str,
        origin: Option<RecordId>,
        start: usize,
        ordered: bool,
        effects: &mut Vec<Operation>,
    ) {
        let mut index = start;
        let mut prev = origin;
        for (offset, ch) in content.chars().enumerate() {
            let record = CharRecord {
                id: first.at_offset(offset as u32),
                content: ch,
                origin: prev.take(),
                issued_at: op.issued_at,
                deleted: false,
            };
            if ordered {
                index = self.place(index, &record);
            }
            prev = Some(record.id.clone());
            push_insert(effects, op, self.visible_before(index), ch);
            self.known.insert(record.id.clone());
            self.records.insert(index, record);
            self.visible += 1;
            index += 1;
        }
    }

    fn integrate_delete(&mut self, op: &Operation, targets: &[RecordId], effects: &mut Vec<Operation>) -> Outcome {
        if targets.iter().any(|id| !self.known.contains(id)) {
            return Outcome::Deferred;
        }
        let targets: FxHashSet<&RecordId> = targets.iter().collect();
        // Visible position after the deletions made so far.
        let mut seen = 0;
        for record in self.records.iter_mut() {
            if record.deleted {
                continue;
            }
            if targets.contains(&record.id) {
                record.deleted = true;
                self.visible -= 1;
                push_delete(effects, op, seen);
            } else {
                seen += 1;
            }
        }
        return Outcome::Applied;
    }

    /// Tombstone `length` visible characters starting at `position`.
    fn integrate_positional_delete(
        &mut self,
        op: &Operation,
        length: usize,
        effects: &mut Vec<Operation>,
    ) -> Result<Outcome> {
        let position = op.position;
        if position + length > self.visible {
            return Err(Error::RangeOutOfBounds { start: position, end: position + length, len: self.visible });
        }
        let mut seen = 0;
        let mut remaining = length;
        for record in self.records.iter_mut() {
            if remaining == 0 {
                break;
            }
            if record.deleted {
                continue;
            }
            if seen >= position {
                record.deleted = true;
                remaining -= 1;
            }
            seen += 1;
        }
        self.visible -= length;
        if length > 0 {
            effects.push(effect(op, OpKind::Delete(length), position));
        }
        return Ok(Outcome::Applied);
    }

    /// Retry held-back operations until no more of them apply.
    fn drain_pending(&mut self, effects: &mut Vec<Operation>) -> Result<()> {
        loop {
            let mut progressed = false;
            for op in std::mem::take(&mut self.pending) {
                match self.integrate(&op, effects)? {
                    Outcome::Deferred => self.pending.push(op),
                    Outcome::Applied | Outcome::Duplicate => progressed = true,
                }
            }
            if !progressed || self.pending.is_empty() {
                return Ok(());
            }
        }
    }

    fn visible_before(&self, index: usize) -> usize {
        return self.records[..index].iter().filter(|r| !r.deleted).count();
    }

    /// Apply a remote operation and everything it unblocks.
    ///
    /// Returns None if nothing was applied, else the visible changes.
    fn receive(&mut self, op: &Operation) -> Result<Option<Vec<Operation>>> {
        let mut effects = Vec::new();
        match self.integrate(op, &mut effects)? {
            Outcome::Applied => {
                debug!(author = %op.author, position = op.position, kind = ?op.kind, "applied");
                self.drain_pending(&mut effects)?;
                return Ok(Some(effects));
            }
            Outcome::Duplicate => return Ok(None),
            Outcome::Deferred => {
                if !self.pending.contains(op) {
                    debug!(author = %op.author, position = op.position, "deferred until dependencies arrive");
                    self.pending.push(op.clone());
                }
                return Ok(None);
            }
        }
    }

    fn visible_ids(&self, position: usize, length: usize) -> Vec<RecordId> {
        return self
            .records
            .iter()
            .filter(|r| !r.deleted)
            .skip(position)
            .take(length)
            .map(|r| r.id.clone())
            .collect();
    }
}

impl Replica for TextReplica {
    fn author(&self) -> &UserId {
        return &self.author;
    }

    fn insert(&mut self, position: usize, content: &str) -> Result<Operation> {
        if content.is_empty() {
            return Err(Error::EmptyInsert);
        }
        if position > self.visible {
            return Err(Error::OutOfBounds { position, len: self.visible });
        }
        let origin = match position {
            0 => None,
            _ => self.visible_index(position - 1).map(|i| self.records[i].id.clone()),
        };
        let seq = self.next_seq();
        let op = Operation::insert(position, content, self.author.clone())
            .issued_at(self.clock.tick())
            .with_id(seq)
            .with_anchor(Anchor::After(origin));
        self.integrate(&op, &mut Vec::new())?;
        return Ok(op);
    }

    fn delete(&mut self, position: usize, length: usize) -> Result<Operation> {
        if position + length > self.visible {
            return Err(Error::RangeOutOfBounds { start: position, end: position + length, len: self.visible });
        }
        let targets = self.visible_ids(position, length);
        let seq = self.next_seq();
        let op = Operation::delete(position, length, self.author.clone())
            .issued_at(self.clock.tick())
            .with_id(seq)
            .with_anchor(Anchor::Targets(targets));
        self.integrate(&op, &mut Vec::new())?;
        return Ok(op);
    }

    fn apply_operation(&mut self, op: &Operation) -> Result<bool> {
        return Ok(self.receive(op)?.is_some());
    }

    fn apply_remote(&mut self, op: &Operation) -> Result<Option<Vec<Operation>>> {
        return self.receive(op);
    }

    fn text(&self) -> String {
        return self.records.iter().filter(|r| !r.deleted).map(|r| r.content).collect();
    }

    fn len(&self) -> usize {
        return self.visible;
    }
}

impl Crdt for TextReplica {
    fn merge(&mut self, other: &Self) {
        // Origins precede their records in storage order, so walking the
        // other sequence front to back always finds the origin present.
        for record in &other.records {
            if self.known.contains(&record.id) {
                continue;
            }
            let start = match &record.origin {
                Some(origin) => self.index_of(origin).map_or(self.records.len(), |i| i + 1),
                None => 0,
            };
            let mut fresh = record.clone();
            fresh.deleted = false;
            let index = self.place(start, &fresh);
            self.known.insert(fresh.id.clone());
            self.records.insert(index, fresh);
            self.visible += 1;
        }

        let deleted: FxHashSet<&RecordId> = other.records.iter().filter(|r| r.deleted).map(|r| &r.id).collect();
        for record in self.records.iter_mut() {
            if !record.deleted && deleted.contains(&record.id) {
                record.deleted = true;
                self.visible -= 1;
            }
        }

        self.applied.extend(other.applied.iter().cloned());
        self.clock.observe(other.clock.time());
    }
}

/// A positional operation attributed to `op`.
fn effect(op: &Operation, kind: OpKind, position: usize) -> Operation {
    return Operation {
        kind,
        position,
        author: op.author.clone(),
        issued_at: op.issued_at,
        operation_id: op.operation_id,
        anchor: None,
    };
}

fn same_source(a: &Operation, b: &Operation) -> bool {
    return a.author == b.author && a.issued_at == b.issued_at && a.operation_id == b.operation_id;
}

/// Record one inserted character, extending the previous insert if the
/// character lands right after it.
fn push_insert(effects: &mut Vec<Operation>, op: &Operation, position: usize, ch: char) {
    if let Some(last) = effects.last_mut() {
        if same_source(last, op) {
            if let OpKind::Insert(content) = &mut last.kind {
                if last.position + char_len(content) == position {
                    content.push(ch);
                    return;
                }
            }
        }
    }
    effects.push(effect(op, OpKind::Insert(ch.to_string()), position));
}

/// Record one deleted character at `position`.
fn push_delete(effects: &mut Vec<Operation>, op: &Operation, position: usize) {
    if let Some(last) = effects.last_mut() {
        if same_source(last, op) && last.position == position {
            if let OpKind::Delete(length) = &mut last.kind {
                *length += 1;
                return;
            }
        }
    }
    effects.push(effect(op, OpKind::Delete(1), position));
}
