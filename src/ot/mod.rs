//! Operational transformation.
//!
//! `transform` is a pure function library over [`Operation`](crate::op::Operation):
//! pairwise and batch transformation, sequence rebasing, composition,
//! and inversion. `OtDocument` is the replica built on top of it.

pub mod document;
pub mod transform;

pub use document::OtDocument;
pub use transform::compose;
pub use transform::invert;
pub use transform::rebase;
pub use transform::transform;
pub use transform::transform_batch;
pub use transform::transform_position;
