//! Opaque resumable cursors.
//!
//! A cursor encodes `(step, block, lib, head)` into a stable, reversible
//! token. Clients treat it as opaque; the engine decodes it to resume a
//! stream exactly where the client left off.
//!
//! The encoding is versioned: a `c1:`-prefixed colon-joined payload,
//! wrapped in unpadded URL-safe base64. Block identifiers may not contain
//! `:`; they are chain hashes in practice.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::block::{BlockRef, Step};
use crate::error::{Error, Result};

/// A decoded stream position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Step of the last delivered block.
    pub step: Step,
    /// The last delivered block.
    pub block: BlockRef,
    /// Last irreversible block at delivery time.
    pub lib: BlockRef,
    /// Head block at delivery time.
    pub head: BlockRef,
}

impl Cursor {
    /// Creates a new cursor.
    #[must_use]
    pub const fn new(step: Step, block: BlockRef, lib: BlockRef, head: BlockRef) -> Self {
        Self {
            step,
            block,
            lib,
            head,
        }
    }

    /// Encodes this cursor into its opaque string form.
    #[must_use]
    pub fn to_opaque(&self) -> String {
        let payload = format!(
            "c1:{}:{}:{}:{}:{}:{}:{}",
            self.step.as_wire(),
            self.block.num,
            self.block.id,
            self.lib.num,
            self.lib.id,
            self.head.num,
            self.head.id,
        );
        URL_SAFE_NO_PAD.encode(payload)
    }

    /// Decodes an opaque cursor string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCursor`] when the token is not valid base64,
    /// has the wrong version or field count, carries a non-numeric block
    /// number, or names an unknown step (including the zero step).
    pub fn from_opaque(opaque: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(opaque)
            .map_err(|e| Error::invalid_cursor(format!("not base64: {e}")))?;
        let payload = String::from_utf8(raw)
            .map_err(|_| Error::invalid_cursor("payload is not valid UTF-8"))?;

        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 8 || parts[0] != "c1" {
            return Err(Error::invalid_cursor("malformed payload"));
        }

        let step_wire: u8 = parts[1]
            .parse()
            .map_err(|_| Error::invalid_cursor("non-numeric step"))?;
        let step = Step::from_wire(step_wire)
            .ok_or_else(|| Error::invalid_cursor(format!("unknown step {step_wire}")))?;

        Ok(Self {
            step,
            block: BlockRef::new(parts[3], parse_num(parts[2])?),
            lib: BlockRef::new(parts[5], parse_num(parts[4])?),
            head: BlockRef::new(parts[7], parse_num(parts[6])?),
        })
    }
}

fn parse_num(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::invalid_cursor(format!("non-numeric block number {value:?}")))
}
