//! Remote cursors and selections.
//!
//! The tracker keeps one [`Cursor`] per user and moves every cursor through
//! each applied operation so it keeps pointing at the same text. Users that
//! stop sending updates are swept after an inactivity timeout.
//!
//! Timestamps are milliseconds since the Unix epoch. Every time-dependent
//! method has an `_at` variant taking an explicit `now`.

use std::collections::BTreeMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::crdt::primitives::UserId;
use crate::op::Operation;
use crate::ot::transform_position;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    return SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64);
}

/// A selected range, `start` inclusive, `end` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Selection {
        return Selection { start: start.min(end), end: start.max(end) };
    }

    pub fn is_empty(&self) -> bool {
        return self.start == self.end;
    }
}

/// One user's presence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub user_id: UserId,
    pub position: usize,
    pub selection: Option<Selection>,
    pub display_color: String,
    pub display_name: String,
    /// Last update, in milliseconds.
    pub last_seen: u64,
}

/// A partial cursor update. Unset fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorUpdate {
    pub position: Option<usize>,
    /// `Some(None)` clears the selection.
    pub selection: Option<Option<Selection>>,
    pub display_name: Option<String>,
    pub display_color: Option<String>,
}

impl CursorUpdate {
    /// An update that moves the cursor.
    pub fn at(position: usize) -> CursorUpdate {
        return CursorUpdate { position: Some(position), ..CursorUpdate::default() };
    }

    pub fn with_selection(mut self, selection: Option<Selection>) -> CursorUpdate {
        self.selection = Some(selection);
        return self;
    }

    pub fn named(mut self, name: impl Into<String>) -> CursorUpdate {
        self.display_name = Some(name.into());
        return self;
    }

    pub fn colored(mut self, color: impl Into<String>) -> CursorUpdate {
        self.display_color = Some(color.into());
        return self;
    }
}

/// Presence settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Users silent for longer than this are removed.
    pub inactivity_timeout_ms: u64,
    /// Display colors assigned to new users.
    pub palette: Vec<String>,
}

impl Default for PresenceConfig {
    fn default() -> PresenceConfig {
        let palette = [
            "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F", "#BB8FCE",
            "#85C1E9", "#F8B500", "#00CED1",
        ];
        return PresenceConfig {
            inactivity_timeout_ms: 30_000,
            palette: palette.iter().map(|c| c.to_string()).collect(),
        };
    }
}

/// The cursors of everyone in a session.
#[derive(Clone, Debug, Default)]
pub struct PresenceTracker {
    config: PresenceConfig,
    cursors: BTreeMap<UserId, Cursor>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> PresenceTracker {
        return PresenceTracker { config, cursors: BTreeMap::new() };
    }

    pub fn config(&self) -> &PresenceConfig {
        return &self.config;
    }

    /// The color a user gets on first sight.
    pub fn color_for(&self, user_id: &str) -> String {
        return palette_color(&self.config.palette, user_id);
    }

    pub fn update_user_cursor(&mut self, user_id: &str, update: CursorUpdate) -> &Cursor {
        return self.update_user_cursor_at(user_id, update, now_ms());
    }

    /// Merge `update` into the user's cursor, creating it if needed.
    pub fn update_user_cursor_at(&mut self, user_id: &str, update: CursorUpdate, now: u64) -> &Cursor {
        let palette = &self.config.palette;
        let cursor = self.cursors.entry(user_id.to_string()).or_insert_with(|| {
            debug!(user = user_id, "new presence");
            return Cursor {
                user_id: user_id.to_string(),
                position: 0,
                selection: None,
                display_color: palette_color(palette, user_id),
                display_name: user_id.to_string(),
                last_seen: now,
            };
        });
        if let Some(position) = update.position {
            cursor.position = position;
        }
        if let Some(selection) = update.selection {
            cursor.selection = selection;
        }
        if let Some(name) = update.display_name {
            cursor.display_name = name;
        }
        if let Some(color) = update.display_color {
            cursor.display_color = color;
        }
        cursor.last_seen = cursor.last_seen.max(now);
        return cursor;
    }

    /// Move every cursor and selection through `op`.
    pub fn transform_cursors(&mut self, op: &Operation) {
        if op.is_noop() {
            return;
        }
        for cursor in self.cursors.values_mut() {
            cursor.position = transform_position(cursor.position, op);
            if let Some(selection) = cursor.selection {
                cursor.selection = Some(Selection::new(
                    transform_position(selection.start, op),
                    transform_position(selection.end, op),
                ));
            }
        }
    }

    pub fn cleanup_inactive_users(&mut self, timeout_ms: u64) -> Vec<UserId> {
        return self.cleanup_inactive_users_at(timeout_ms, now_ms());
    }

    /// Remove users not seen within `timeout_ms` of `now`.
    ///
    /// Returns the removed user ids.
    pub fn cleanup_inactive_users_at(&mut self, timeout_ms: u64, now: u64) -> Vec<UserId> {
        let stale: Vec<UserId> = self
            .cursors
            .values()
            .filter(|c| now.saturating_sub(c.last_seen) > timeout_ms)
            .map(|c| c.user_id.clone())
            .collect();
        for user in &stale {
            debug!(user = %user, "presence expired");
            self.cursors.remove(user);
        }
        return stale;
    }

    /// Explicit departure.
    pub fn remove_user(&mut self, user_id: &str) -> Option<Cursor> {
        return self.cursors.remove(user_id);
    }

    pub fn get_cursor(&self, user_id: &str) -> Option<&Cursor> {
        return self.cursors.get(user_id);
    }

    /// A snapshot of every cursor, ordered by user id.
    pub fn get_all_cursors(&self) -> Vec<Cursor> {
        return self.cursors.values().cloned().collect();
    }

    pub fn len(&self) -> usize {
        return self.cursors.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.cursors.is_empty();
    }
}

/// Stable across sessions and replicas: the user id is hashed with blake3
/// and indexed into the palette. An empty palette falls back to the hash
/// bytes themselves.
fn palette_color(palette: &[String], user_id: &str) -> String {
    let hash = blake3::hash(user_id.as_bytes());
    let bytes = hash.as_bytes();
    if palette.is_empty() {
        return format!("#{:02X}{:02X}{:02X}", bytes[0], bytes[1], bytes[2]);
    }
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    let index = (u64::from_le_bytes(word) % palette.len() as u64) as usize;
    return palette[index].clone();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_creates_cursor() {
        let mut presence = PresenceTracker::default();
        let cursor = presence.update_user_cursor_at("alice", CursorUpdate::at(3), 100).clone();

        assert_eq!(cursor.position, 3);
        assert_eq!(cursor.display_name, "alice");
        assert_eq!(cursor.last_seen, 100);
        assert!(presence.config().palette.contains(&cursor.display_color));
    }

    #[test]
    fn colors_are_deterministic() {
        let a = PresenceTracker::default();
        let b = PresenceTracker::default();
        assert_eq!(a.color_for("alice"), b.color_for("alice"));

        let bare = PresenceTracker::new(PresenceConfig { palette: Vec::new(), ..PresenceConfig::default() });
        let color = bare.color_for("alice");
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
    }

    #[test]
    fn partial_updates_keep_other_fields() {
        let mut presence = PresenceTracker::default();
        presence.update_user_cursor_at("alice", CursorUpdate::at(3).named("Alice").colored("#000000"), 1);
        presence.update_user_cursor_at(
            "alice",
            CursorUpdate::default().with_selection(Some(Selection::new(5, 2))),
            2,
        );

        let cursor = presence.get_cursor("alice").unwrap();
        assert_eq!(cursor.position, 3);
        assert_eq!(cursor.display_name, "Alice");
        assert_eq!(cursor.display_color, "#000000");
        assert_eq!(cursor.selection, Some(Selection { start: 2, end: 5 }));

        presence.update_user_cursor_at("alice", CursorUpdate::default().with_selection(None), 3);
        assert_eq!(presence.get_cursor("alice").unwrap().selection, None);
    }

    #[test]
    fn remote_insert_before_cursor_shifts_it() {
        let mut presence = PresenceTracker::default();
        presence.update_user_cursor_at("alice", CursorUpdate::at(5), 0);
        presence.transform_cursors(&Operation::insert(2, "abc", "bob"));
        assert_eq!(presence.get_cursor("alice").unwrap().position, 8);
    }

    #[test]
    fn insert_at_cursor_does_not_move_it() {
        let mut presence = PresenceTracker::default();
        presence.update_user_cursor_at("alice", CursorUpdate::at(5), 0);
        presence.transform_cursors(&Operation::insert(5, "abc", "bob"));
        assert_eq!(presence.get_cursor("alice").unwrap().position, 5);
    }

    #[test]
    fn deletes_collapse_and_shift() {
        let mut presence = PresenceTracker::default();
        presence.update_user_cursor_at("inside", CursorUpdate::at(4), 0);
        presence.update_user_cursor_at("after", CursorUpdate::at(10), 0);
        presence.update_user_cursor_at(
            "selecting",
            CursorUpdate::at(1).with_selection(Some(Selection::new(1, 5))),
            0,
        );

        presence.transform_cursors(&Operation::delete(2, 4, "bob"));

        assert_eq!(presence.get_cursor("inside").unwrap().position, 2);
        assert_eq!(presence.get_cursor("after").unwrap().position, 6);
        assert_eq!(presence.get_cursor("selecting").unwrap().selection, Some(Selection::new(1, 2)));
    }

    #[test]
    fn cleanup_removes_only_stale_users() {
        let mut presence = PresenceTracker::default();
        presence.update_user_cursor_at("old", CursorUpdate::at(0), 1_000);
        presence.update_user_cursor_at("new", CursorUpdate::at(0), 40_000);

        let removed = presence.cleanup_inactive_users_at(30_000, 45_000);
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(presence.cleanup_inactive_users_at(30_000, 45_000).is_empty());
        assert_eq!(presence.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_user() {
        let mut presence = PresenceTracker::default();
        for user in ["carol", "alice", "bob"] {
            presence.update_user_cursor_at(user, CursorUpdate::at(0), 0);
        }
        let users: Vec<_> = presence.get_all_cursors().into_iter().map(|c| c.user_id).collect();
        assert_eq!(users, ["alice", "bob", "carol"]);

        assert!(presence.remove_user("bob").is_some());
        assert!(presence.remove_user("bob").is_none());
        assert_eq!(presence.len(), 2);
    }
}
