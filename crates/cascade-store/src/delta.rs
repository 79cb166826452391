//! Store mutation records.
//!
//! Every successful store mutation emits a [`Delta`]. Deltas within one
//! block are ordered by ordinal; replaying them in order over the
//! pre-block state reproduces the post-block state, and reverse-applying
//! them supports fork undo.

use bytes::Bytes;

/// The kind of mutation a delta records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    /// The key did not exist before.
    Create,
    /// The key existed with a different value.
    Update,
    /// The key was removed.
    Delete,
}

/// One store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Mutation kind.
    pub op: DeltaOp,
    /// Position of this mutation within its block.
    pub ordinal: u64,
    /// The mutated key.
    pub key: String,
    /// Value before the mutation (empty for `Create`).
    pub old_value: Bytes,
    /// Value after the mutation (empty for `Delete`).
    pub new_value: Bytes,
}

impl Delta {
    /// Creates a `Create` delta.
    #[must_use]
    pub fn create(ordinal: u64, key: impl Into<String>, new_value: Bytes) -> Self {
        Self {
            op: DeltaOp::Create,
            ordinal,
            key: key.into(),
            old_value: Bytes::new(),
            new_value,
        }
    }

    /// Creates an `Update` delta.
    #[must_use]
    pub fn update(
        ordinal: u64,
        key: impl Into<String>,
        old_value: Bytes,
        new_value: Bytes,
    ) -> Self {
        Self {
            op: DeltaOp::Update,
            ordinal,
            key: key.into(),
            old_value,
            new_value,
        }
    }

    /// Creates a `Delete` delta.
    #[must_use]
    pub fn delete(ordinal: u64, key: impl Into<String>, old_value: Bytes) -> Self {
        Self {
            op: DeltaOp::Delete,
            ordinal,
            key: key.into(),
            old_value,
            new_value: Bytes::new(),
        }
    }
}
