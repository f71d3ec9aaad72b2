//! Operations: the atomic unit of change shared by every component.
//!
//! An operation describes an edit against the document *as it exists
//! before the operation is applied*. Positions and lengths count
//! characters (Unicode scalar values), not bytes.
//!
//! Positional fields are what the OT engine rewrites. Operations issued
//! by the CRDT replica additionally carry an [`Anchor`] that pins the edit
//! to record identities, which is what lets that replica integrate them
//! in any delivery order:
//!
//! - Insert: "I inserted this content after record X"
//! - Delete: "I deleted records X, Y, Z"

use serde::Deserialize;
use serde::Serialize;

use crate::crdt::primitives::OpId;
use crate::crdt::primitives::RecordId;
use crate::crdt::primitives::UserId;
use crate::error::Error;
use crate::error::Result;

/// The kind of an operation together with its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Insert the given text.
    Insert(String),
    /// Delete this many characters.
    Delete(usize),
    /// Leave the document unchanged. Transforms produce zero-length
    /// retains when an operation has been absorbed by a concurrent one.
    Retain(usize),
}

/// Identity-based placement produced by the CRDT replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// The inserted content goes after this record (None = beginning).
    After(Option<RecordId>),
    /// The records removed by a delete.
    Targets(Vec<RecordId>),
}

/// An edit issued by one author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// What the operation does.
    pub kind: OpKind,
    /// Character offset into the pre-operation document.
    pub position: usize,
    /// The issuing user.
    pub author: UserId,
    /// Logical timestamp used for tie-breaking.
    pub issued_at: u64,
    /// Per-author unique id, if the issuer assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<u64>,
    /// Record-level placement, if the issuer was a CRDT replica.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
}

impl Operation {
    /// Create an insert of `content` at `position`.
    pub fn insert(position: usize, content: impl Into<String>, author: impl Into<UserId>) -> Operation {
        return Operation::new(OpKind::Insert(content.into()), position, author);
    }

    /// Create a delete of `length` characters starting at `position`.
    pub fn delete(position: usize, length: usize, author: impl Into<UserId>) -> Operation {
        return Operation::new(OpKind::Delete(length), position, author);
    }

    /// Create a retain (no-op).
    pub fn retain(position: usize, length: usize, author: impl Into<UserId>) -> Operation {
        return Operation::new(OpKind::Retain(length), position, author);
    }

    fn new(kind: OpKind, position: usize, author: impl Into<UserId>) -> Operation {
        return Operation {
            kind,
            position,
            author: author.into(),
            issued_at: 0,
            operation_id: None,
            anchor: None,
        };
    }

    /// Set the logical timestamp.
    pub fn issued_at(mut self, issued_at: u64) -> Operation {
        self.issued_at = issued_at;
        return self;
    }

    /// Set the per-author operation id.
    pub fn with_id(mut self, operation_id: u64) -> Operation {
        self.operation_id = Some(operation_id);
        return self;
    }

    /// Attach a CRDT anchor.
    pub fn with_anchor(mut self, anchor: Anchor) -> Operation {
        self.anchor = Some(anchor);
        return self;
    }

    /// The inserted text, for inserts.
    pub fn content(&self) -> Option<&str> {
        match &self.kind {
            OpKind::Insert(content) => return Some(content),
            _ => return None,
        }
    }

    /// Number of characters this operation inserts, removes, or retains.
    pub fn len(&self) -> usize {
        match &self.kind {
            OpKind::Insert(content) => return char_len(content),
            OpKind::Delete(length) | OpKind::Retain(length) => return *length,
        }
    }

    /// True if the operation covers zero characters.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn is_insert(&self) -> bool {
        return matches!(self.kind, OpKind::Insert(_));
    }

    pub fn is_delete(&self) -> bool {
        return matches!(self.kind, OpKind::Delete(_));
    }

    /// True if applying the operation leaves the document unchanged.
    pub fn is_noop(&self) -> bool {
        return match &self.kind {
            OpKind::Retain(_) => true,
            OpKind::Delete(0) => true,
            OpKind::Insert(content) => content.is_empty(),
            OpKind::Delete(_) => false,
        };
    }

    /// The end of the affected range (exclusive).
    pub fn end(&self) -> usize {
        return self.position + self.len();
    }

    /// The (author, operation_id) pair, if an id was assigned.
    pub fn op_id(&self) -> Option<OpId> {
        return self.operation_id.map(|seq| OpId::new(self.author.clone(), seq));
    }

    /// Change in document length caused by applying this operation.
    pub fn len_delta(&self) -> isize {
        match &self.kind {
            OpKind::Insert(content) => return char_len(content) as isize,
            OpKind::Delete(length) => return -(*length as isize),
            OpKind::Retain(_) => return 0,
        }
    }

    /// Check the operation fits a document of `len` characters.
    pub fn validate(&self, len: usize) -> Result<()> {
        match &self.kind {
            OpKind::Insert(_) if self.position > len => {
                return Err(Error::OutOfBounds { position: self.position, len });
            }
            OpKind::Delete(length) if self.position + length > len => {
                return Err(Error::RangeOutOfBounds {
                    start: self.position,
                    end: self.position + length,
                    len,
                });
            }
            _ => return Ok(()),
        }
    }

    /// Apply the operation to a plain string.
    pub fn apply_to(&self, text: &mut String) -> Result<()> {
        self.validate(char_len(text))?;
        match &self.kind {
            OpKind::Insert(content) => {
                let at = byte_offset(text, self.position);
                text.insert_str(at, content);
            }
            OpKind::Delete(length) => {
                let start = byte_offset(text, self.position);
                let end = byte_offset(text, self.position + length);
                text.replace_range(start..end, "");
            }
            OpKind::Retain(_) => {}
        }
        return Ok(());
    }
}

/// Number of characters in `text`.
#[inline]
pub fn char_len(text: &str) -> usize {
    return str_indices::chars::count(text);
}

/// Byte offset of the character at `char_idx` (clamped to the end).
#[inline]
pub fn byte_offset(text: &str, char_idx: usize) -> usize {
    return str_indices::chars::to_byte_idx(text, char_idx);
}

/// The characters in `[start, end)`, or None if out of bounds.
pub fn char_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end || end > char_len(text) {
        return None;
    }
    return Some(&text[byte_offset(text, start)..byte_offset(text, end)]);
}
