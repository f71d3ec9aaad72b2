//! Shared primitives for the CRDT replica.
//!
//! ## Clocks
//! - `LamportClock`: monotonic counter that observes remote timestamps
//!
//! ## IDs
//! - `UserId`: opaque collaborator identifier
//! - `OpId`: operation identifier (author, seq)
//! - `RecordId`: character identifier (author, id space, seq, offset)

pub mod clock;
pub mod id;

pub use clock::LamportClock;
pub use id::IdSpace;
pub use id::OpId;
pub use id::RecordId;
pub use id::UserId;
