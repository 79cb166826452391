//! Block model for ordered event streams.
//!
//! Cascade consumes blockchain-like streams: ordered blocks identified by
//! `(id, num)` with a parent link and fork-step metadata. The block payload
//! itself is opaque to the engine; modules interpret it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

/// A reference to a block: its chain identifier and number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Chain-level block identifier (e.g. a hash).
    pub id: String,
    /// Block number.
    pub num: u64,
}

impl BlockRef {
    /// Creates a new block reference.
    #[must_use]
    pub fn new(id: impl Into<String>, num: u64) -> Self {
        Self { id: id.into(), num }
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.num, self.id)
    }
}

/// Fork step attached to a delivered block.
///
/// The wire encoding (used inside cursors) is a small integer; unknown
/// values are rejected at decode time with an invalid-cursor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// The block is newly seen on the current fork.
    New,
    /// The block was forked out and must be reverted.
    Undo,
    /// The block has become irreversible.
    Irreversible,
    /// The block is newly seen and already irreversible.
    NewIrreversible,
}

impl Step {
    /// Returns the wire number used in cursor encoding.
    #[must_use]
    pub const fn as_wire(self) -> u8 {
        match self {
            Self::New => 1,
            Self::Undo => 2,
            Self::Irreversible => 3,
            Self::NewIrreversible => 4,
        }
    }

    /// Parses a wire number back into a step.
    ///
    /// Returns `None` for unknown or zero values; callers surface that as
    /// an invalid-cursor error.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::New),
            2 => Some(Self::Undo),
            3 => Some(Self::Irreversible),
            4 => Some(Self::NewIrreversible),
            _ => None,
        }
    }

    /// Returns true when the step delivers new block content to execute.
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::New | Self::NewIrreversible)
    }
}

/// One ordered unit of input with identity and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Chain-level block identifier.
    pub id: String,
    /// Block number.
    pub num: u64,
    /// Identifier of the parent block.
    pub parent_id: String,
    /// Opaque block payload handed to modules.
    pub payload: Bytes,
}

impl Block {
    /// Returns a reference to this block.
    #[must_use]
    pub fn to_ref(&self) -> BlockRef {
        BlockRef::new(self.id.clone(), self.num)
    }
}

/// A block as delivered by the source stream, with step metadata and the
/// cursor marking its position.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// The block itself.
    pub block: Block,
    /// Fork status of this delivery.
    pub step: Step,
    /// Last irreversible block number at the time of delivery.
    pub lib_num: u64,
    /// Resumable position after this delivery.
    pub cursor: Cursor,
}
