//! Two users editing one document, replayed on the terminal.
//!
//! Set `RUST_LOG=coedit=debug` to see every applied operation.

use coedit::BranchMerge;
use coedit::Config;
use coedit::CursorUpdate;
use coedit::Replica;
use coedit::Session;
use coedit::SessionEvent;
use coedit::TextReplica;
use tracing_subscriber::EnvFilter;

fn main() -> coedit::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut alice = Session::with_config(TextReplica::new("alice"), config.clone());
    let mut bob = Session::with_config(TextReplica::new("bob"), config);
    alice.subscribe(|event| {
        if let SessionEvent::TextChanged(text) = event {
            println!("alice sees: {text:?}");
        }
    });

    // Both start from the same text.
    let seed = alice.insert_text(0, "The quick fox")?;
    bob.apply_operation(&seed)?;
    bob.update_remote_cursor("alice", CursorUpdate::at(alice.len()).named("Alice"));

    // Concurrent edits, delivered crosswise.
    let from_alice = alice.insert_text(10, "brown ")?;
    let from_bob = bob.insert_text(13, " jumps")?;
    alice.apply_operation(&from_bob)?;
    bob.apply_operation(&from_alice)?;
    println!("converged: {}", alice.text() == bob.text());

    for cursor in bob.cursors() {
        println!("{} ({}) at {}", cursor.display_name, cursor.display_color, cursor.position);
    }

    // Undo and redo are edits too; bob has to hear about them.
    if let Some(op) = alice.undo()? {
        bob.apply_operation(&op)?;
    }
    println!("after undo: {:?}", alice.text());
    if let Some(op) = alice.redo()? {
        bob.apply_operation(&op)?;
    }

    // A draft branch off alice's history, merged back into her text.
    let draft = alice.create_branch("draft", None)?;
    alice.commit_to_branch(coedit::Operation::insert(alice.len(), "!", "alice"), draft)?;
    match alice.merge_branch(draft)? {
        BranchMerge::Merged { operations, .. } => {
            bob.apply_operations(&operations)?;
            println!("merged draft: {:?}", alice.text());
        }
        BranchMerge::Conflicts(conflicts) => println!("draft conflicts: {}", conflicts.len()),
    }
    println!("still converged: {}", alice.text() == bob.text());

    println!("bob's replica holds {} records", bob.replica().records().len());
    println!("bob's text: {:?}", bob.replica().text());
    return Ok(());
}
