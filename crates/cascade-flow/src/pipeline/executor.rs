//! Seams between the pipeline and its external collaborators: the
//! module runtime and the block source.
//!
//! Module code runs inside a WASM runtime with host-function bindings
//! onto store operations; that runtime lives behind [`ModuleExecutor`].
//! The ordered block stream, with its fork/undo semantics, lives behind
//! [`BlockSource`].

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;

use cascade_core::{Block, BlockData};
use cascade_store::Store;

use crate::error::Result;
use crate::graph::Module;

/// Read-only views of the inputs a module declared: mapper outputs
/// computed earlier in the current block, and input stores at their
/// current state.
///
/// Topological execution order guarantees every input is fully updated
/// for the block before a dependent module reads it.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInputs<'a> {
    mapper_outputs: &'a HashMap<String, Bytes>,
    stores: &'a HashMap<String, Store>,
}

impl<'a> ExecutionInputs<'a> {
    /// Bundles the block's intermediate state into an input view.
    #[must_use]
    pub const fn new(
        mapper_outputs: &'a HashMap<String, Bytes>,
        stores: &'a HashMap<String, Store>,
    ) -> Self {
        Self {
            mapper_outputs,
            stores,
        }
    }

    /// The current block's output of an upstream mapper.
    #[must_use]
    pub fn mapper_output(&self, module: &str) -> Option<&'a Bytes> {
        self.mapper_outputs.get(module)
    }

    /// An upstream store at its current state, read-only.
    #[must_use]
    pub fn store(&self, module: &str) -> Option<&'a Store> {
        self.stores.get(module)
    }
}

/// Executes module code for one block.
///
/// Implementations suspend on host-function completion and must honor
/// cooperative cancellation of the surrounding context.
#[async_trait]
pub trait ModuleExecutor: Send + Sync + 'static {
    /// Runs a mapper module, producing its output bytes for the block.
    async fn execute_mapper(
        &self,
        module: &Module,
        block: &Block,
        inputs: ExecutionInputs<'_>,
    ) -> Result<Bytes>;

    /// Runs a store module, mutating its owned store through the host
    /// bindings.
    async fn execute_store(
        &self,
        module: &Module,
        block: &Block,
        inputs: ExecutionInputs<'_>,
        store: &mut Store,
    ) -> Result<()>;
}

/// Delivers ordered blocks with step metadata.
#[async_trait]
pub trait BlockSource: Send {
    /// The next block, or `None` at end of stream.
    async fn next_block(&mut self) -> Result<Option<BlockData>>;
}

/// A scripted block source for tests and tooling.
#[derive(Debug, Default)]
pub struct VecBlockSource {
    blocks: VecDeque<BlockData>,
}

impl VecBlockSource {
    /// Creates a source delivering the given blocks in order.
    #[must_use]
    pub fn new(blocks: impl Into<VecDeque<BlockData>>) -> Self {
        Self {
            blocks: blocks.into(),
        }
    }
}

#[async_trait]
impl BlockSource for VecBlockSource {
    async fn next_block(&mut self) -> Result<Option<BlockData>> {
        Ok(self.blocks.pop_front())
    }
}
