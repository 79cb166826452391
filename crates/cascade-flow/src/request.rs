//! The client-facing streaming request.

use std::collections::HashMap;

use cascade_core::Step;

use crate::graph::Module;

/// Metadata key flagging a back-processing sub-request from the
/// orchestrator to a worker.
pub const PARTIAL_MODE_METADATA_KEY: &str = "substreams-partial-mode";

/// A `Blocks` streaming request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Requested start block; negative means relative to the live head.
    pub start_block_num: i64,
    /// Exclusive stop block; zero means unbounded.
    pub stop_block_num: u64,
    /// Opaque cursor to resume from; empty when starting fresh.
    pub start_cursor: String,
    /// Which fork steps the client wants delivered.
    pub fork_steps: Vec<Step>,
    /// Irreversibility condition expression (opaque to the engine).
    pub irreversibility_condition: String,
    /// The module manifest.
    pub modules: Vec<Module>,
    /// Names of modules whose outputs the client wants.
    pub output_modules: Vec<String>,
    /// Production mode enables parallel back-processing of history.
    pub production_mode: bool,
}

/// Incoming request metadata (transport headers).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: HashMap<String, String>,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a metadata entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Reads a metadata entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns true when this request is flagged as a sub-request.
    #[must_use]
    pub fn is_partial_mode(&self) -> bool {
        self.get(PARTIAL_MODE_METADATA_KEY) == Some("true")
    }
}
