//! # cascade-store
//!
//! The store data model for the Cascade streaming engine.
//!
//! A store is a typed key→value container owned by a single store module.
//! Every mutation is recorded as an ordinal-ordered [`Delta`]; per-block
//! delta batches feed the client response stream and a bounded reorg
//! window that supports fork undo. Partial store segments persisted during
//! back-processing are recombined with a policy-driven [`Store::merge`].
//!
//! ## Invariants
//!
//! - Keys prefixed `__!__` are reserved for segment self-description and
//!   are rejected on write.
//! - Delta ordinals never move backward within a block.
//! - Applying a block's deltas in ordinal order to the pre-block state
//!   yields the post-block state.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod delta;
pub mod error;
pub mod segment;
pub mod store;
pub mod value;

pub use delta::{Delta, DeltaOp};
pub use error::{Error, Result};
pub use segment::{SegmentRange, SegmentStore};
pub use store::Store;
pub use value::{UpdatePolicy, ValueType};

/// Key prefix reserved for internal segment metadata.
pub const RESERVED_PREFIX: &str = "__!__";
