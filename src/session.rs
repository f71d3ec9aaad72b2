//! The per-document facade an editor talks to.
//!
//! A [`Session`] owns one replica plus everything around it: the presence
//! table, the version history, and the undo and redo stacks. Local edits go
//! in through `insert_text`/`delete_text`, remote operations through
//! `apply_operation`, and listeners hear about every resulting change.
//!
//! Undo works on inverse operations. Each local edit pushes its inverse;
//! edits in quick succession are folded into one entry with
//! [`compose`](crate::ot::compose). Remote operations transform the pending
//! inverses so undo never clobbers someone else's work. Undo and redo are
//! edits like any other: they return the operation peers need.
//!
//! The history's `main` branch always replays to the replica's text. Other
//! branches are free to edit; merging one into `main` goes through
//! [`Session::merge_branch`], which applies the merged changes to the
//! replica as well.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::config::Config;
use crate::conflict::Conflict;
use crate::conflict::ConflictResolver;
use crate::crdt::TextReplica;
use crate::crdt::primitives::UserId;
use crate::error::Error;
use crate::error::Result;
use crate::history::BranchId;
use crate::history::MergeResult;
use crate::history::VersionGraph;
use crate::history::VersionId;
use crate::op::OpKind;
use crate::op::Operation;
use crate::ot::compose;
use crate::ot::invert;
use crate::ot::transform;
use crate::presence::Cursor;
use crate::presence::CursorUpdate;
use crate::presence::PresenceTracker;
use crate::presence::Selection;
use crate::presence::now_ms;
use crate::replica::Replica;

/// Undo settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Local edits closer together than this undo as one. 0 disables.
    pub coalesce_window_ms: u64,
    /// Oldest entries are forgotten past this depth.
    pub max_depth: usize,
}

impl Default for UndoConfig {
    fn default() -> UndoConfig {
        return UndoConfig { coalesce_window_ms: 500, max_depth: 1_000 };
    }
}

/// What listeners are told.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    TextChanged(String),
    CursorsChanged(Vec<Cursor>),
}

type Listener = Box<dyn FnMut(&SessionEvent)>;

/// The outcome of [`Session::merge_branch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchMerge {
    /// `main` and the replica now hold the branch's changes. `operations`
    /// carry them to peers.
    Merged { head: VersionId, operations: Vec<Operation> },
    /// Nothing changed; resolve these and call
    /// [`Session::complete_merge`].
    Conflicts(Vec<Conflict>),
}

/// One entry of the undo or redo stack.
#[derive(Clone, Debug)]
struct UndoEntry {
    /// Applies to the current document.
    op: Operation,
    /// When the entry was last extended.
    at: u64,
}

/// A collaborative editing session over replica `R`.
pub struct Session<R: Replica = TextReplica> {
    replica: R,
    presence: PresenceTracker,
    history: VersionGraph,
    undo_config: UndoConfig,
    undo_stack: Vec<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
    listeners: Vec<Listener>,
}

impl Session<TextReplica> {
    /// A CRDT-backed session with the default configuration.
    pub fn new(user_id: impl Into<UserId>) -> Session<TextReplica> {
        return Session::with_config(TextReplica::new(user_id), Config::default());
    }
}

impl<R: Replica> Session<R> {
    pub fn with_config(replica: R, config: Config) -> Session<R> {
        return Session {
            replica,
            presence: PresenceTracker::new(config.presence),
            history: VersionGraph::new(ConflictResolver::new(config.resolver)),
            undo_config: config.undo,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            listeners: Vec::new(),
        };
    }

    pub fn user_id(&self) -> &UserId {
        return self.replica.author();
    }

    pub fn text(&self) -> String {
        return self.replica.text();
    }

    pub fn len(&self) -> usize {
        return self.replica.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.replica.is_empty();
    }

    pub fn replica(&self) -> &R {
        return &self.replica;
    }

    pub fn presence(&self) -> &PresenceTracker {
        return &self.presence;
    }

    pub fn history(&self) -> &VersionGraph {
        return &self.history;
    }

    /// Start a branch at `from` (default: the head of `main`).
    pub fn create_branch(&mut self, name: &str, from: Option<VersionId>) -> Result<BranchId> {
        return self.history.create_branch(name, from);
    }

    /// Record an operation on a branch other than `main`.
    pub fn commit_to_branch(&mut self, op: Operation, branch: BranchId) -> Result<VersionId> {
        if branch == self.history.main() {
            return Err(Error::LiveBranch(branch));
        }
        return self.history.apply_operation(op, branch);
    }

    pub fn abandon_branch(&mut self, branch: BranchId) -> Result<()> {
        if branch == self.history.main() {
            return Err(Error::LiveBranch(branch));
        }
        return self.history.abandon_branch(branch);
    }

    /// Merge `source` into `main` and apply the result to the replica.
    pub fn merge_branch(&mut self, source: BranchId) -> Result<BranchMerge> {
        let main = self.history.main();
        let (head, appended) = match self.history.merge_branch(source, main)? {
            MergeResult::Merged { head, appended } => (head, appended),
            MergeResult::Conflicts(conflicts) => return Ok(BranchMerge::Conflicts(conflicts)),
        };
        let mut merged = Vec::new();
        for id in appended {
            merged.extend(self.history.version(id)?.operations.iter().cloned());
        }
        let operations = self.apply_merged(&merged)?;
        debug!(%source, %head, operations = operations.len(), "merged into main");
        return Ok(BranchMerge::Merged { head, operations });
    }

    /// Finish a conflicted merge into `main` with operations that apply to
    /// the current text. Returns the operations for peers.
    pub fn complete_merge(&mut self, source: BranchId, resolved: Vec<Operation>) -> Result<Vec<Operation>> {
        let mut check = self.replica.text();
        for op in &resolved {
            op.apply_to(&mut check)?;
        }
        let main = self.history.main();
        let author = self.replica.author().clone();
        self.history.complete_merge(source, main, resolved.clone(), author)?;
        return self.apply_merged(&resolved);
    }

    /// Bring the replica up to operations `main` already holds.
    fn apply_merged(&mut self, ops: &[Operation]) -> Result<Vec<Operation>> {
        let mut issued = Vec::with_capacity(ops.len());
        for op in ops {
            if op.is_noop() {
                continue;
            }
            let replica_op = match &op.kind {
                OpKind::Insert(content) => self.replica.insert(op.position, content)?,
                OpKind::Delete(length) => self.replica.delete(op.position, *length)?,
                OpKind::Retain(_) => continue,
            };
            self.presence.transform_cursors(op);
            self.rebase_stacks(op);
            issued.push(replica_op);
        }
        if !issued.is_empty() {
            self.notify();
        }
        return Ok(issued);
    }

    /// Every known cursor, ordered by user id.
    pub fn cursors(&self) -> Vec<Cursor> {
        return self.presence.get_all_cursors();
    }

    /// Register a listener for text and cursor changes.
    pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&mut self, event: SessionEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    pub fn insert_text(&mut self, position: usize, content: &str) -> Result<Operation> {
        return self.insert_text_at(position, content, now_ms());
    }

    /// Insert at `position`, with an explicit clock for undo coalescing.
    pub fn insert_text_at(&mut self, position: usize, content: &str, now: u64) -> Result<Operation> {
        let op = self.replica.insert(position, content)?;
        let inverse = invert(&op, "")?;
        self.record_local(&op, inverse, now)?;
        return Ok(op);
    }

    pub fn delete_text(&mut self, position: usize, length: usize) -> Result<Operation> {
        return self.delete_text_at(position, length, now_ms());
    }

    /// Delete `length` characters, with an explicit clock for undo
    /// coalescing.
    pub fn delete_text_at(&mut self, position: usize, length: usize, now: u64) -> Result<Operation> {
        let before = self.replica.text();
        let op = self.replica.delete(position, length)?;
        let inverse = invert(&op, &before)?;
        self.record_local(&op, inverse, now)?;
        return Ok(op);
    }

    /// Push the inverse of a fresh local edit and publish the edit.
    fn record_local(&mut self, op: &Operation, inverse: Operation, now: u64) -> Result<()> {
        self.redo_stack.clear();
        let window = self.undo_config.coalesce_window_ms;
        let coalesced = match self.undo_stack.last_mut() {
            Some(top) if window > 0 && now.saturating_sub(top.at) <= window => {
                match compose(&[inverse.clone(), top.op.clone()]) {
                    Ok(folded) => {
                        top.op = folded;
                        top.at = now;
                        true
                    }
                    Err(_) => false,
                }
            }
            _ => false,
        };
        if !coalesced {
            push_bounded(&mut self.undo_stack, UndoEntry { op: inverse, at: now }, self.undo_config.max_depth);
        }
        return self.publish(std::slice::from_ref(op), true, now);
    }

    /// Presence, history, and listeners for applied changes.
    fn publish(&mut self, effects: &[Operation], local: bool, now: u64) -> Result<()> {
        let main = self.history.main();
        for op in effects {
            self.presence.transform_cursors(op);
            self.history.apply_operation(op.clone(), main)?;
        }
        if let (true, Some(op)) = (local, effects.last()) {
            let caret = match &op.kind {
                OpKind::Insert(_) => op.end(),
                _ => op.position,
            };
            let author = self.replica.author().clone();
            self.presence.update_user_cursor_at(&author, CursorUpdate::at(caret), now);
        }
        self.notify();
        return Ok(());
    }

    fn notify(&mut self) {
        let text = self.replica.text();
        self.emit(SessionEvent::TextChanged(text));
        let cursors = self.presence.get_all_cursors();
        self.emit(SessionEvent::CursorsChanged(cursors));
    }

    /// Move the local cursor and selection.
    pub fn set_cursor(&mut self, position: usize, selection: Option<Selection>) -> Result<()> {
        let len = self.replica.len();
        if position > len {
            return Err(Error::OutOfBounds { position, len });
        }
        if let Some(selection) = selection {
            if selection.end > len {
                return Err(Error::RangeOutOfBounds { start: selection.start, end: selection.end, len });
            }
        }
        let author = self.replica.author().clone();
        self.presence.update_user_cursor(&author, CursorUpdate::at(position).with_selection(selection));
        let cursors = self.presence.get_all_cursors();
        self.emit(SessionEvent::CursorsChanged(cursors));
        return Ok(());
    }

    /// Presence update received from another user.
    pub fn update_remote_cursor(&mut self, user_id: &str, update: CursorUpdate) {
        self.presence.update_user_cursor(user_id, update);
        let cursors = self.presence.get_all_cursors();
        self.emit(SessionEvent::CursorsChanged(cursors));
    }

    /// A user left the session.
    pub fn remove_user(&mut self, user_id: &str) -> Option<Cursor> {
        let removed = self.presence.remove_user(user_id);
        if removed.is_some() {
            let cursors = self.presence.get_all_cursors();
            self.emit(SessionEvent::CursorsChanged(cursors));
        }
        return removed;
    }

    pub fn sweep_presence(&mut self) -> Vec<UserId> {
        return self.sweep_presence_at(now_ms());
    }

    /// Drop users idle past the configured timeout.
    pub fn sweep_presence_at(&mut self, now: u64) -> Vec<UserId> {
        let timeout = self.presence.config().inactivity_timeout_ms;
        let removed = self.presence.cleanup_inactive_users_at(timeout, now);
        if !removed.is_empty() {
            let cursors = self.presence.get_all_cursors();
            self.emit(SessionEvent::CursorsChanged(cursors));
        }
        return removed;
    }

    /// Apply an operation from another replica.
    ///
    /// Returns false if it was a duplicate or is waiting on dependencies.
    pub fn apply_operation(&mut self, op: &Operation) -> Result<bool> {
        let Some(effects) = self.replica.apply_remote(op)? else {
            return Ok(false);
        };
        for effect in &effects {
            self.rebase_stacks(effect);
        }
        self.publish(&effects, false, now_ms())?;
        return Ok(true);
    }

    /// Apply remote operations in order. Returns how many were applied.
    pub fn apply_operations(&mut self, ops: &[Operation]) -> Result<usize> {
        let mut applied = 0;
        for op in ops {
            if self.apply_operation(op)? {
                applied += 1;
            }
        }
        return Ok(applied);
    }

    /// Transform pending undo and redo entries past a remote operation.
    fn rebase_stacks(&mut self, remote: &Operation) {
        for stack in [&mut self.undo_stack, &mut self.redo_stack] {
            if let Err(err) = rebase_stack(stack, remote) {
                warn!(%err, "dropping undo history that no longer applies");
                stack.clear();
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        return !self.undo_stack.is_empty();
    }

    pub fn can_redo(&self) -> bool {
        return !self.redo_stack.is_empty();
    }

    /// Revert the most recent local edit.
    ///
    /// Returns the operation to send to peers, or None if there was
    /// nothing to undo.
    pub fn undo(&mut self) -> Result<Option<Operation>> {
        let Some(entry) = self.pop_effective(true) else {
            return Ok(None);
        };
        let (op, inverse) = self.apply_local(&entry.op)?;
        push_bounded(&mut self.redo_stack, UndoEntry { op: inverse, at: entry.at }, self.undo_config.max_depth);
        debug!(redo = self.redo_stack.len(), "undo");
        return Ok(Some(op));
    }

    /// Reapply the most recently undone edit.
    ///
    /// Returns the operation to send to peers, or None if there was
    /// nothing to redo.
    pub fn redo(&mut self) -> Result<Option<Operation>> {
        let Some(entry) = self.pop_effective(false) else {
            return Ok(None);
        };
        let (op, inverse) = self.apply_local(&entry.op)?;
        push_bounded(&mut self.undo_stack, UndoEntry { op: inverse, at: entry.at }, self.undo_config.max_depth);
        debug!(undo = self.undo_stack.len(), "redo");
        return Ok(Some(op));
    }

    /// Pop entries until one still does something.
    fn pop_effective(&mut self, undo: bool) -> Option<UndoEntry> {
        let stack = if undo { &mut self.undo_stack } else { &mut self.redo_stack };
        while let Some(entry) = stack.pop() {
            if !entry.op.is_noop() {
                return Some(entry);
            }
        }
        return None;
    }

    /// Run an undo or redo step as a fresh local edit. Returns the edit and
    /// its inverse.
    fn apply_local(&mut self, step: &Operation) -> Result<(Operation, Operation)> {
        let before = self.replica.text();
        let op = match &step.kind {
            OpKind::Insert(content) => self.replica.insert(step.position, content)?,
            OpKind::Delete(length) => self.replica.delete(step.position, *length)?,
            OpKind::Retain(_) => return Ok((step.clone(), step.clone())),
        };
        let inverse = invert(&op, &before)?;
        self.publish(std::slice::from_ref(&op), true, now_ms())?;
        return Ok((op, inverse));
    }
}

fn push_bounded(stack: &mut Vec<UndoEntry>, entry: UndoEntry, max_depth: usize) {
    stack.push(entry);
    if stack.len() > max_depth {
        let excess = stack.len() - max_depth;
        stack.drain(..excess);
    }
}

/// Newest entry first: each entry applies to the document the entry above
/// it leaves behind, so the remote operation is carried down the stack.
fn rebase_stack(stack: &mut [UndoEntry], remote: &Operation) -> Result<()> {
    let mut remote = remote.clone();
    for entry in stack.iter_mut().rev() {
        let (op, next) = transform(&entry.op, &remote)?;
        entry.op = op;
        remote = next;
    }
    return Ok(());
}
