//! The response envelope streamed back to clients, and the sink that
//! carries it.
//!
//! Envelopes for one request are emitted in strict block order. A sink
//! transmission failure surfaces as `Unavailable`: the client went away,
//! not the engine.

use async_trait::async_trait;
use bytes::Bytes;

use cascade_core::{BlockRef, Step};
use cascade_store::Delta;

use crate::error::Result;

/// Output of one requested module for one block.
#[derive(Debug, Clone)]
pub struct ModuleOutput {
    /// The module's name.
    pub module: String,
    /// What the module produced.
    pub data: OutputData,
}

/// The payload of a module output.
#[derive(Debug, Clone)]
pub enum OutputData {
    /// A mapper's output bytes.
    MapOutput(Bytes),
    /// A store module's deltas for the block.
    StoreDeltas(Vec<Delta>),
}

/// Progress report for one module during initialization or
/// back-processing.
#[derive(Debug, Clone)]
pub enum ModuleProgress {
    /// Block ranges processed so far.
    ProcessedRanges {
        /// The module's name.
        module: String,
        /// Processed `[start, end)` ranges.
        ranges: Vec<(u64, u64)>,
    },
    /// Persisted state was found and loaded up to a block.
    InitialState {
        /// The module's name.
        module: String,
        /// Exclusive end of the loaded state.
        available_up_to: u64,
    },
    /// Bytes processed so far.
    ProcessedBytes {
        /// The module's name.
        module: String,
        /// Total bytes read.
        total_bytes_read: u64,
    },
    /// The module failed.
    Failed {
        /// The module's name.
        module: String,
        /// Failure reason.
        reason: String,
        /// Captured module logs.
        logs: Vec<String>,
        /// True when logs were truncated.
        logs_truncated: bool,
    },
}

/// One streamed response.
#[derive(Debug, Clone)]
pub enum Response {
    /// Block outputs and deltas for one block.
    BlockScopedData {
        /// The block these outputs belong to.
        block: BlockRef,
        /// Fork step of the delivery.
        step: Step,
        /// Resumable cursor after this block.
        cursor: String,
        /// Outputs of the requested modules, in manifest order.
        outputs: Vec<ModuleOutput>,
    },
    /// A previously delivered block was forked out.
    BlockUndoSignal {
        /// The last block still valid.
        last_valid_block: u64,
        /// Cursor to resume from.
        cursor: String,
    },
    /// Module progress update.
    Progress(ModuleProgress),
    /// Debug snapshot of store state (dev tooling).
    DebugSnapshot {
        /// The store module's name.
        module: String,
        /// Current deltas.
        deltas: Vec<Delta>,
    },
}

/// Where responses go.
///
/// The gRPC transport implements this against its server stream; tests
/// collect into memory.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Transmits one response.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unavailable` when the client cannot be reached.
    async fn send(&self, response: Response) -> Result<()>;

    /// Sets a response header before the first send. Default: no-op.
    async fn set_header(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// A sink collecting responses in memory, for tests and tooling.
#[derive(Debug, Default)]
pub struct VecSink {
    responses: std::sync::Mutex<Vec<Response>>,
    headers: std::sync::Mutex<Vec<(String, String)>>,
}

impl VecSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected responses.
    ///
    /// # Panics
    ///
    /// Panics when the interior lock is poisoned.
    #[must_use]
    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().expect("sink lock").clone()
    }

    /// Returns the collected headers.
    ///
    /// # Panics
    ///
    /// Panics when the interior lock is poisoned.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.headers.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl ResponseSink for VecSink {
    async fn send(&self, response: Response) -> Result<()> {
        self.responses.lock().expect("sink lock").push(response);
        Ok(())
    }

    async fn set_header(&self, key: &str, value: &str) -> Result<()> {
        self.headers
            .lock()
            .expect("sink lock")
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}
