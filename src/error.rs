//! Error types for document sessions.
//!
//! Duplicate delivery and merge conflicts are expected outcomes and are
//! reported through return values, never through this type.

use thiserror::Error;

use crate::history::BranchId;
use crate::history::VersionId;

/// Result type for collaboration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while editing, transforming, or navigating history.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("position {position} out of bounds (len={len})")]
    OutOfBounds { position: usize, len: usize },

    #[error("range {start}..{end} out of bounds (len={len})")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("cannot insert empty content")]
    EmptyInsert,

    #[error("cannot transform operation {operation_id} by {author} against itself")]
    SameOrigin { author: String, operation_id: u64 },

    #[error("operations cannot be composed: {0}")]
    Incomposable(String),

    #[error("unknown version {0}")]
    UnknownVersion(VersionId),

    #[error("unknown branch {0}")]
    UnknownBranch(BranchId),

    #[error("branch name already in use: {0}")]
    DuplicateBranch(String),

    #[error("branch {0} was abandoned")]
    BranchAbandoned(BranchId),

    #[error("cannot merge branch {0} into itself")]
    SelfMerge(BranchId),

    #[error("branch {0} follows the live document and only changes through the session")]
    LiveBranch(BranchId),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
