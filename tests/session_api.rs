//! End-to-end tests of the session facade.

use std::cell::RefCell;
use std::rc::Rc;

use coedit::Anchor;
use coedit::Config;
use coedit::CursorUpdate;
use coedit::Operation;
use coedit::OtDocument;
use coedit::Replica;
use coedit::Selection;
use coedit::Session;
use coedit::SessionEvent;
use coedit::TextReplica;
use coedit::crdt::primitives::RecordId;
use coedit::history::VersionNode;
use coedit::presence::Cursor;

// =============================================================================
// Convergence through sessions
// =============================================================================

#[test]
fn concurrent_inserts_at_the_same_point_converge() {
    let mut alice = Session::new("alice");
    let mut bob = Session::new("bob");

    let cat = alice.insert_text(0, "cat").unwrap();
    let dog = bob.insert_text(0, "dog").unwrap();
    alice.apply_operation(&dog).unwrap();
    bob.apply_operation(&cat).unwrap();

    assert_eq!(alice.text(), bob.text());
    assert!(alice.text() == "catdog" || alice.text() == "dogcat");
}

#[test]
fn three_way_editing_converges() {
    let mut sessions: Vec<Session> = ["alice", "bob", "carol"].into_iter().map(Session::new).collect();
    let seed = sessions[0].insert_text(0, "The quick fox").unwrap();
    for session in sessions.iter_mut().skip(1) {
        session.apply_operation(&seed).unwrap();
    }

    let ops = vec![
        sessions[0].insert_text(10, "brown ").unwrap(),
        sessions[1].delete_text(0, 4).unwrap(),
        sessions[2].insert_text(13, " jumps").unwrap(),
    ];
    for (index, session) in sessions.iter_mut().enumerate() {
        for (author, op) in ops.iter().enumerate() {
            if author != index {
                session.apply_operation(op).unwrap();
            }
        }
    }

    assert_eq!(sessions[0].text(), "quick brown fox jumps");
    assert_eq!(sessions[1].text(), sessions[0].text());
    assert_eq!(sessions[2].text(), sessions[0].text());
}

#[test]
fn batch_application_counts_new_operations() {
    let mut alice = TextReplica::new("alice");
    let ops = vec![alice.insert(0, "ab").unwrap(), alice.insert(2, "c").unwrap()];

    let mut bob = Session::new("bob");
    assert_eq!(bob.apply_operations(&ops).unwrap(), 2);
    assert_eq!(bob.apply_operations(&ops).unwrap(), 0);
    assert_eq!(bob.text(), "abc");
}

// =============================================================================
// Undo and redo
// =============================================================================

#[test]
fn undo_redo_round_trip() {
    let mut session = Session::new("alice");
    session.insert_text_at(0, "Hello", 0).unwrap();
    session.insert_text_at(5, " World", 5_000).unwrap();
    session.delete_text_at(0, 6, 10_000).unwrap();
    assert_eq!(session.text(), "World");

    session.undo().unwrap();
    assert_eq!(session.text(), "Hello World");
    session.undo().unwrap();
    assert_eq!(session.text(), "Hello");
    session.redo().unwrap();
    session.redo().unwrap();
    assert_eq!(session.text(), "World");
    assert!(session.redo().unwrap().is_none());
}

#[test]
fn undo_keeps_concurrent_remote_text() {
    let mut alice = Session::new("alice");
    let mut bob = Session::new("bob");
    let seed = alice.insert_text_at(0, "0123456789", 0).unwrap();
    bob.apply_operation(&seed).unwrap();

    let mine = alice.insert_text_at(5, "MINE", 10_000).unwrap();
    let theirs = bob.insert_text(0, "THEIRS").unwrap();
    alice.apply_operation(&theirs).unwrap();
    bob.apply_operation(&mine).unwrap();
    assert_eq!(alice.text(), "THEIRS01234MINE56789");

    let before = alice.history().head(alice.history().main()).unwrap();
    let undo = alice.undo().unwrap().unwrap();
    assert_eq!(alice.text(), "THEIRS0123456789");
    assert_ne!(alice.history().head(alice.history().main()).unwrap(), before);

    bob.apply_operation(&undo).unwrap();
    assert_eq!(bob.text(), alice.text());
}

#[test]
fn undo_redo_over_ot_sessions_stay_in_sync() {
    let mut alice = Session::with_config(OtDocument::new("alice"), Config::default());
    let mut bob = Session::with_config(OtDocument::new("bob"), Config::default());
    let op = alice.insert_text_at(0, "abc", 0).unwrap();
    bob.apply_operation(&op).unwrap();
    let op = alice.insert_text_at(3, "def", 10_000).unwrap();
    bob.apply_operation(&op).unwrap();

    let undo = alice.undo().unwrap().unwrap();
    bob.apply_operation(&undo).unwrap();
    assert_eq!(bob.text(), "abc");

    let redo = alice.redo().unwrap().unwrap();
    bob.apply_operation(&redo).unwrap();
    assert_eq!(bob.text(), "abcdef");
}

#[test]
fn undo_on_ot_session() {
    let mut session = Session::with_config(OtDocument::new("alice"), Config::default());
    session.insert_text_at(0, "abc", 0).unwrap();
    session.insert_text_at(3, "def", 10_000).unwrap();
    session.undo().unwrap();
    assert_eq!(session.text(), "abc");
    session.redo().unwrap();
    assert_eq!(session.text(), "abcdef");
}

// =============================================================================
// Presence
// =============================================================================

#[test]
fn remote_insert_before_cursor_shifts_it() {
    let mut alice = Session::new("alice");
    let mut bob = Session::new("bob");
    let seed = alice.insert_text(0, "0123456789").unwrap();
    bob.apply_operation(&seed).unwrap();
    alice.set_cursor(5, None).unwrap();

    let remote = bob.insert_text(2, "abc").unwrap();
    alice.apply_operation(&remote).unwrap();

    assert_eq!(alice.presence().get_cursor("alice").unwrap().position, 8);
}

#[test]
fn selections_follow_remote_deletes() {
    let mut alice = Session::new("alice");
    let mut bob = Session::new("bob");
    let seed = alice.insert_text(0, "0123456789").unwrap();
    bob.apply_operation(&seed).unwrap();
    alice.set_cursor(8, Some(Selection::new(6, 8))).unwrap();

    let remote = bob.delete_text(0, 3).unwrap();
    alice.apply_operation(&remote).unwrap();

    let cursor = alice.presence().get_cursor("alice").unwrap();
    assert_eq!(cursor.position, 5);
    assert_eq!(cursor.selection, Some(Selection::new(3, 5)));
}

#[test]
fn listeners_receive_text_and_cursor_events() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();

    let mut session = Session::new("alice");
    session.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    session.insert_text(0, "hi").unwrap();
    session.update_remote_cursor("bob", CursorUpdate::at(1).named("Bob"));
    session.remove_user("bob");

    let events = events.borrow();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], SessionEvent::TextChanged("hi".to_string()));
    match &events[2] {
        SessionEvent::CursorsChanged(cursors) => {
            let names: Vec<&str> = cursors.iter().map(|c| c.display_name.as_str()).collect();
            assert_eq!(names, ["alice", "Bob"]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(&events[3], SessionEvent::CursorsChanged(cursors) if cursors.len() == 1));
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn operations_survive_json() {
    let mut replica = TextReplica::new("alice");
    let insert = replica.insert(0, "héllo").unwrap();
    let delete = replica.delete(1, 2).unwrap();

    for op in [insert, delete, Operation::retain(3, 2, "bob")] {
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}

#[test]
fn operation_json_shape() {
    let op = Operation::insert(2, "x", "alice")
        .issued_at(7)
        .with_id(3)
        .with_anchor(Anchor::After(Some(RecordId::new("bob", 1, 0))));
    let value = serde_json::to_value(&op).unwrap();
    assert_eq!(value["kind"]["insert"], "x");
    assert_eq!(value["position"], 2);
    assert_eq!(value["author"], "alice");
    assert_eq!(value["issued_at"], 7);
    assert_eq!(value["operation_id"], 3);

    let bare = serde_json::to_value(Operation::delete(0, 1, "alice")).unwrap();
    assert!(bare.get("anchor").is_none());
    assert!(bare.get("operation_id").is_none());
}

#[test]
fn cursors_and_versions_survive_json() {
    let mut session = Session::new("alice");
    session.insert_text(0, "abc").unwrap();
    session.set_cursor(1, Some(Selection::new(1, 3))).unwrap();

    let cursor = session.cursors().remove(0);
    let back: Cursor = serde_json::from_str(&serde_json::to_string(&cursor).unwrap()).unwrap();
    assert_eq!(back, cursor);

    let history = session.history();
    let head = history.version(history.head(history.main()).unwrap()).unwrap();
    let back: VersionNode = serde_json::from_str(&serde_json::to_string(head).unwrap()).unwrap();
    assert_eq!(&back, head);
}
