//! Coedit - collaborative text synchronization.
//!
//! Several users edit one document at once. Each participant holds a
//! replica; local edits produce [`Operation`]s that are shipped to peers
//! and applied there, and every replica ends up with the same text.
//!
//! Two replica strategies share the [`Replica`] trait:
//! - [`TextReplica`]: a tombstone sequence CRDT (RGA) that converges under
//!   any delivery order.
//! - [`OtDocument`]: a plain string kept consistent by operational
//!   transformation.
//!
//! Around them sit a [`ConflictResolver`] for concurrent edits that
//! converge but clash in intent, a [`PresenceTracker`] for remote cursors,
//! a branchable [`VersionGraph`], and the [`Session`] facade that wires it
//! all together with undo and redo.
//!
//! # Quick Start
//!
//! ```
//! use coedit::Replica;
//! use coedit::Session;
//! use coedit::TextReplica;
//!
//! let mut alice = Session::new("alice");
//! let mut bob = TextReplica::new("bob");
//!
//! let op = alice.insert_text(0, "Hello").unwrap();
//! bob.apply_operation(&op).unwrap();
//!
//! let op = bob.insert(5, ", World!").unwrap();
//! alice.apply_operation(&op).unwrap();
//!
//! assert_eq!(alice.text(), "Hello, World!");
//! assert_eq!(bob.text(), alice.text());
//! ```

pub mod config;
pub mod conflict;
pub mod crdt;
pub mod error;
pub mod history;
pub mod op;
pub mod ot;
pub mod presence;
pub mod replica;
pub mod session;

pub use config::Config;
pub use conflict::Conflict;
pub use conflict::ConflictKind;
pub use conflict::ConflictResolver;
pub use conflict::ResolverConfig;
pub use crdt::Crdt;
pub use crdt::TextReplica;
pub use error::Error;
pub use error::Result;
pub use history::MergeResult;
pub use history::VersionGraph;
pub use op::Anchor;
pub use op::OpKind;
pub use op::Operation;
pub use ot::OtDocument;
pub use presence::Cursor;
pub use presence::CursorUpdate;
pub use presence::PresenceTracker;
pub use presence::Selection;
pub use replica::Replica;
pub use session::BranchMerge;
pub use session::Session;
pub use session::SessionEvent;
