//! The per-block pipeline driver.
//!
//! One pipeline serves one request: it seeds stores from persisted
//! segments, then drives delivered blocks through the required modules
//! in topological order, routes deltas, emits one response envelope per
//! block in strict block order, snapshots stores at interval boundaries,
//! and maintains reorg windows across undo and LIB advancement.

pub mod executor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use cascade_core::{BlockData, ObjectStore, Step};
use cascade_store::{SegmentRange, SegmentStore, Store};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Module, ModuleGraph, ModuleKind};
use crate::metrics::FlowMetrics;
use crate::resolver::RequestDetails;
use crate::response::{ModuleOutput, ModuleProgress, OutputData, Response, ResponseSink};

pub use executor::{BlockSource, ExecutionInputs, ModuleExecutor, VecBlockSource};

/// Drives per-block execution for one request.
pub struct Pipeline<E: ModuleExecutor> {
    details: RequestDetails,
    output_modules: Vec<String>,
    /// Required modules in topological execution order.
    execution_order: Vec<Module>,
    executor: Arc<E>,
    segments: SegmentStore,
    stores: HashMap<String, Store>,
    snapshot_interval: u64,
    /// Step kinds the client asked for; empty means all.
    fork_steps: Vec<Step>,
    metrics: FlowMetrics,
}

impl<E: ModuleExecutor> Pipeline<E> {
    /// Assembles a pipeline: resolves the required modules and creates
    /// one empty store per required store module.
    ///
    /// # Errors
    ///
    /// Fails when an output module is unknown.
    pub fn new(
        graph: &ModuleGraph,
        details: RequestDetails,
        output_modules: Vec<String>,
        executor: Arc<E>,
        objects: Arc<dyn ObjectStore>,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let execution_order: Vec<Module> = graph
            .required_modules(&output_modules)?
            .into_iter()
            .cloned()
            .collect();

        let mut stores = HashMap::new();
        for module in &execution_order {
            if let ModuleKind::Store {
                update_policy,
                value_type,
            } = &module.kind
            {
                stores.insert(
                    module.name.clone(),
                    Store::new(
                        module.name.clone(),
                        graph.hash(&module.name)?.to_string(),
                        module.start_block,
                        *update_policy,
                        *value_type,
                    ),
                );
            }
        }

        Ok(Self {
            details,
            output_modules,
            execution_order,
            executor,
            segments: SegmentStore::new(objects),
            stores,
            snapshot_interval: config.store_snapshots_save_interval,
            fork_steps: Vec::new(),
            metrics: FlowMetrics::new(),
        })
    }

    /// Restricts block-data emission to the given step kinds. An empty
    /// set delivers everything. Undo signals are always delivered; a
    /// client cannot opt out of learning about reorgs.
    #[must_use]
    pub fn with_fork_steps(mut self, fork_steps: Vec<Step>) -> Self {
        self.fork_steps = fork_steps;
        self
    }

    /// The block the source stream must begin at for this pipeline.
    ///
    /// Sub-requests stream their unit range; production main requests
    /// stream live from the handoff (history comes from merged
    /// segments); dev-mode requests replay linearly from the effective
    /// start to rebuild state.
    #[must_use]
    pub const fn stream_start_block(&self) -> u64 {
        if self.details.is_sub_request {
            self.details.request_start_block_num
        } else if self.details.production_mode {
            self.details.linear_handoff_block_num
        } else {
            self.details.effective_start_block_num
        }
    }

    /// Read access to a store, mainly for tests and debug snapshots.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<&Store> {
        self.stores.get(name)
    }

    /// Seeds stores by merging persisted segments up to the handoff
    /// block and reports the loaded state to the client.
    ///
    /// Sub-requests skip seeding: partial stores build from empty over
    /// their unit range.
    ///
    /// # Errors
    ///
    /// Surfaces segment assembly failures (gaps, merge violations).
    pub async fn init(&mut self, sink: &dyn ResponseSink) -> Result<()> {
        if self.details.is_sub_request || !self.details.production_mode {
            return Ok(());
        }

        let handoff = self.details.linear_handoff_block_num;
        for store in self.stores.values_mut() {
            let Some(seeded) = self
                .segments
                .load_merged(store.module_hash(), store.module_start_block(), handoff)
                .await?
            else {
                continue;
            };
            tracing::info!(
                store = store.name(),
                up_to = handoff,
                keys = seeded.len(),
                "seeded store from persisted segments"
            );
            *store = seeded;
            sink.send(Response::Progress(ModuleProgress::InitialState {
                module: store.name().to_string(),
                available_up_to: handoff,
            }))
            .await?;
        }
        Ok(())
    }

    /// Consumes the block stream until the stop block (exclusive), end
    /// of stream, or cancellation.
    ///
    /// # Errors
    ///
    /// Surfaces the first module, store, sink, or source failure;
    /// cancellation surfaces as `Error::Cancelled`.
    pub async fn run(
        &mut self,
        token: &CancellationToken,
        source: &mut dyn BlockSource,
        sink: &dyn ResponseSink,
    ) -> Result<()> {
        self.metrics.set_active_pipelines(1);
        let result = self.run_loop(token, source, sink).await;
        self.metrics.set_active_pipelines(0);
        result
    }

    async fn run_loop(
        &mut self,
        token: &CancellationToken,
        source: &mut dyn BlockSource,
        sink: &dyn ResponseSink,
    ) -> Result<()> {
        let stop = self.details.stop_block_num;
        loop {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let next = tokio::select! {
                () = token.cancelled() => return Err(Error::Cancelled),
                next = source.next_block() => next?,
            };
            let Some(data) = next else {
                break;
            };
            if stop != 0 && data.block.num >= stop {
                tracing::debug!(block = data.block.num, stop, "reached stop block");
                break;
            }
            self.process_block(&data, sink).await?;
        }

        if self.details.is_sub_request {
            self.save_partial_segments().await?;
        }
        Ok(())
    }

    async fn process_block(&mut self, data: &BlockData, sink: &dyn ResponseSink) -> Result<()> {
        let started = Instant::now();
        match data.step {
            Step::Undo => {
                let target = data.block.num.saturating_sub(1);
                for store in self.stores.values_mut() {
                    store.undo(target);
                }
                sink.send(Response::BlockUndoSignal {
                    last_valid_block: target,
                    cursor: data.cursor.to_opaque(),
                })
                .await?;
            }
            Step::New | Step::NewIrreversible => {
                let mapper_outputs = self.execute_block(data, sink).await?;
                self.emit_block(data, &mapper_outputs, sink).await?;
                self.flush_stores(data.block.num);
                self.maybe_snapshot(data.block.num).await?;
                if data.step == Step::NewIrreversible {
                    self.advance_lib(data.lib_num);
                }
            }
            Step::Irreversible => {
                self.advance_lib(data.lib_num);
            }
        }
        self.metrics.record_block_processed();
        self.metrics
            .observe_block_duration(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Invokes each required module in topological order and returns the
    /// block's mapper outputs. Store modules temporarily take ownership
    /// of their store so the remaining map serves as read-only input
    /// views.
    async fn execute_block(
        &mut self,
        data: &BlockData,
        sink: &dyn ResponseSink,
    ) -> Result<HashMap<String, Bytes>> {
        let mut mapper_outputs: HashMap<String, Bytes> = HashMap::new();

        for module in &self.execution_order {
            if module.start_block > data.block.num {
                continue;
            }
            match &module.kind {
                ModuleKind::Mapper { .. } => {
                    let inputs = ExecutionInputs::new(&mapper_outputs, &self.stores);
                    let output = self
                        .executor
                        .execute_mapper(module, &data.block, inputs)
                        .await;
                    match output {
                        Ok(bytes) => {
                            mapper_outputs.insert(module.name.clone(), bytes);
                        }
                        Err(err) => {
                            return Err(report_module_failure(sink, &module.name, err).await);
                        }
                    }
                }
                ModuleKind::Store { .. } => {
                    let Some(mut store) = self.stores.remove(&module.name) else {
                        return Err(Error::Core(cascade_core::Error::internal(format!(
                            "store {:?} missing from pipeline state",
                            module.name
                        ))));
                    };
                    let inputs = ExecutionInputs::new(&mapper_outputs, &self.stores);
                    let result = self
                        .executor
                        .execute_store(module, &data.block, inputs, &mut store)
                        .await;
                    self.stores.insert(module.name.clone(), store);
                    if let Err(err) = result {
                        return Err(report_module_failure(sink, &module.name, err).await);
                    }
                }
            }
        }

        Ok(mapper_outputs)
    }

    /// Serializes the block's requested outputs plus store deltas into
    /// one envelope. Blocks before the requested start run only to build
    /// state and are not emitted.
    async fn emit_block(
        &self,
        data: &BlockData,
        mapper_outputs: &HashMap<String, Bytes>,
        sink: &dyn ResponseSink,
    ) -> Result<()> {
        if data.block.num < self.details.request_start_block_num {
            return Ok(());
        }
        if !self.fork_steps.is_empty() && !self.fork_steps.contains(&data.step) {
            return Ok(());
        }
        let mut outputs = Vec::with_capacity(self.output_modules.len());
        for name in &self.output_modules {
            let output = if let Some(bytes) = mapper_outputs.get(name) {
                Some(OutputData::MapOutput(bytes.clone()))
            } else {
                self.stores
                    .get(name)
                    .map(|store| OutputData::StoreDeltas(store.deltas().to_vec()))
            };
            if let Some(output_data) = output {
                outputs.push(ModuleOutput {
                    module: name.clone(),
                    data: output_data,
                });
            }
        }
        sink.send(Response::BlockScopedData {
            block: data.block.to_ref(),
            step: data.step,
            cursor: data.cursor.to_opaque(),
            outputs,
        })
        .await?;
        self.metrics.record_response();
        Ok(())
    }

    fn flush_stores(&mut self, block_num: u64) {
        for store in self.stores.values_mut() {
            store.flush(block_num);
        }
    }

    /// Writes full-state snapshots when crossing an interval boundary.
    /// Sub-requests never snapshot; they save partials at the end.
    async fn maybe_snapshot(&mut self, block_num: u64) -> Result<()> {
        if self.details.is_sub_request || self.snapshot_interval == 0 {
            return Ok(());
        }
        let end = block_num + 1;
        if end % self.snapshot_interval != 0 {
            return Ok(());
        }
        for store in self.stores.values() {
            if store.module_start_block() >= end {
                continue;
            }
            self.segments
                .save(store, SegmentRange::new(store.module_start_block(), end))
                .await?;
        }
        Ok(())
    }

    fn advance_lib(&mut self, lib_num: u64) {
        for store in self.stores.values_mut() {
            store.prune(lib_num);
        }
    }

    /// Persists each store's accumulated partial state for the unit
    /// range this sub-request covered.
    async fn save_partial_segments(&self) -> Result<()> {
        let stop = self.details.stop_block_num;
        if stop == 0 {
            return Err(Error::invalid_argument(
                "sub-request without a stop block cannot produce a segment",
            ));
        }
        for store in self.stores.values() {
            let start = self
                .details
                .request_start_block_num
                .max(store.module_start_block());
            if start >= stop {
                continue;
            }
            self.segments
                .save(store, SegmentRange::new(start, stop))
                .await?;
        }
        Ok(())
    }
}

/// Reports a module failure to the client before surfacing the error.
/// A sink failure at this point is logged, not propagated: the module
/// error is the root cause.
async fn report_module_failure(
    sink: &dyn ResponseSink,
    module: &str,
    err: Error,
) -> Error {
    let failure = Response::Progress(ModuleProgress::Failed {
        module: module.to_string(),
        reason: err.to_string(),
        logs: Vec::new(),
        logs_truncated: false,
    });
    if let Err(send_err) = sink.send(failure).await {
        tracing::warn!(error = %send_err, "could not report module failure to client");
    }
    Error::ModuleExecution {
        module: module.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cascade_core::{Block, BlockRef, Cursor, MemoryStore};
    use cascade_store::value::{combine_numeric, NumericOp};
    use cascade_store::{UpdatePolicy, ValueType};

    use crate::graph::ModuleInput;
    use crate::response::VecSink;

    /// Counts blocks: the mapper echoes the payload, the store sums the
    /// payload into a running total.
    struct CountingExecutor;

    #[async_trait]
    impl ModuleExecutor for CountingExecutor {
        async fn execute_mapper(
            &self,
            _module: &Module,
            block: &Block,
            _inputs: ExecutionInputs<'_>,
        ) -> Result<Bytes> {
            Ok(block.payload.clone())
        }

        async fn execute_store(
            &self,
            _module: &Module,
            block: &Block,
            inputs: ExecutionInputs<'_>,
            store: &mut Store,
        ) -> Result<()> {
            let increment = inputs
                .mapper_output("map_events")
                .cloned()
                .unwrap_or_else(|| block.payload.clone());
            let prior = store.get_last("total").unwrap_or_default();
            let total =
                combine_numeric(NumericOp::Sum, ValueType::Int64, &prior, &increment)?;
            store.set(1, "total", Bytes::from(total))?;
            Ok(())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ModuleExecutor for FailingExecutor {
        async fn execute_mapper(
            &self,
            module: &Module,
            _block: &Block,
            _inputs: ExecutionInputs<'_>,
        ) -> Result<Bytes> {
            Err(Error::ModuleExecution {
                module: module.name.clone(),
                message: "wasm trap: unreachable".into(),
            })
        }

        async fn execute_store(
            &self,
            _module: &Module,
            _block: &Block,
            _inputs: ExecutionInputs<'_>,
            _store: &mut Store,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn manifest() -> Vec<Module> {
        vec![
            Module {
                name: "map_events".into(),
                kind: ModuleKind::Mapper {
                    output_type: "proto:test.Events".into(),
                },
                code: Bytes::from_static(b"\0asm-map"),
                start_block: 0,
                inputs: vec![ModuleInput::Source],
            },
            Module {
                name: "store_totals".into(),
                kind: ModuleKind::Store {
                    update_policy: UpdatePolicy::Sum,
                    value_type: ValueType::Int64,
                },
                code: Bytes::from_static(b"\0asm-store"),
                start_block: 0,
                inputs: vec![ModuleInput::Map {
                    module: "map_events".into(),
                }],
            },
        ]
    }

    fn graph() -> ModuleGraph {
        ModuleGraph::new(manifest()).unwrap()
    }

    fn outputs() -> Vec<String> {
        vec!["map_events".to_string(), "store_totals".to_string()]
    }

    fn details(request_start: u64, stop: u64) -> RequestDetails {
        RequestDetails {
            request_start_block_num: request_start,
            effective_start_block_num: request_start,
            linear_handoff_block_num: request_start,
            stop_block_num: stop,
            is_sub_request: false,
            production_mode: false,
        }
    }

    fn new_block(num: u64, step: Step) -> BlockData {
        let block_ref = BlockRef::new(format!("{num}a"), num);
        BlockData {
            block: Block {
                id: block_ref.id.clone(),
                num,
                parent_id: format!("{}a", num.saturating_sub(1)),
                payload: Bytes::from_static(b"1"),
            },
            step,
            lib_num: num.saturating_sub(2),
            cursor: Cursor::new(
                step,
                block_ref.clone(),
                BlockRef::new("lib", num.saturating_sub(2)),
                block_ref,
            ),
        }
    }

    fn pipeline(
        details: RequestDetails,
        objects: Arc<MemoryStore>,
        config: &RuntimeConfig,
    ) -> Pipeline<CountingExecutor> {
        Pipeline::new(
            &graph(),
            details,
            outputs(),
            Arc::new(CountingExecutor),
            objects,
            config,
        )
        .unwrap()
    }

    fn total_of(pipe: &Pipeline<CountingExecutor>) -> Option<Bytes> {
        pipe.store("store_totals").unwrap().get_last("total")
    }

    fn emitted_block_nums(sink: &VecSink) -> Vec<u64> {
        sink.responses()
            .iter()
            .filter_map(|r| match r {
                Response::BlockScopedData { block, .. } => Some(block.num),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn processes_blocks_in_order_and_stops_before_stop_block() {
        let objects = Arc::new(MemoryStore::new());
        let mut pipe = pipeline(details(0, 5), objects, &RuntimeConfig::default());
        let sink = VecSink::new();
        let mut source =
            VecBlockSource::new((0..=5).map(|n| new_block(n, Step::New)).collect::<Vec<_>>());

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        assert_eq!(emitted_block_nums(&sink), vec![0, 1, 2, 3, 4]);
        // Block 5 (== stop) was never executed.
        assert_eq!(total_of(&pipe), Some(Bytes::from("5")));

        // Each envelope carries both requested modules.
        for response in sink.responses() {
            if let Response::BlockScopedData { outputs, cursor, .. } = response {
                assert_eq!(outputs.len(), 2);
                assert!(!cursor.is_empty());
                assert!(matches!(outputs[0].data, OutputData::MapOutput(_)));
                match &outputs[1].data {
                    OutputData::StoreDeltas(deltas) => assert_eq!(deltas.len(), 1),
                    OutputData::MapOutput(_) => panic!("expected store deltas"),
                }
            }
        }
    }

    #[tokio::test]
    async fn blocks_before_request_start_build_state_without_emission() {
        let objects = Arc::new(MemoryStore::new());
        let mut plan = details(3, 5);
        plan.effective_start_block_num = 0;
        let mut pipe = pipeline(plan, objects, &RuntimeConfig::default());
        let sink = VecSink::new();
        let mut source =
            VecBlockSource::new((0..=5).map(|n| new_block(n, Step::New)).collect::<Vec<_>>());

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        assert_eq!(emitted_block_nums(&sink), vec![3, 4]);
        // State was still built from the effective start.
        assert_eq!(total_of(&pipe), Some(Bytes::from("5")));
    }

    #[tokio::test]
    async fn undo_reverts_store_state_and_signals_the_client() {
        let objects = Arc::new(MemoryStore::new());
        let mut pipe = pipeline(details(0, 0), objects, &RuntimeConfig::default());
        let sink = VecSink::new();
        let mut source = VecBlockSource::new(vec![
            new_block(0, Step::New),
            new_block(1, Step::New),
            new_block(2, Step::New),
            new_block(2, Step::Undo),
            new_block(2, Step::New),
        ]);

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        // Three additive blocks, one reverted, one replayed.
        assert_eq!(total_of(&pipe), Some(Bytes::from("3")));
        let undo_signals: Vec<u64> = sink
            .responses()
            .iter()
            .filter_map(|r| match r {
                Response::BlockUndoSignal {
                    last_valid_block, ..
                } => Some(*last_valid_block),
                _ => None,
            })
            .collect();
        assert_eq!(undo_signals, vec![1]);
    }

    #[tokio::test]
    async fn lib_advancement_prunes_reorg_windows() {
        let objects = Arc::new(MemoryStore::new());
        let mut pipe = pipeline(details(0, 0), objects, &RuntimeConfig::default());
        let sink = VecSink::new();
        let mut blocks: Vec<BlockData> = (0..4).map(|n| new_block(n, Step::New)).collect();
        let mut final_mark = new_block(3, Step::Irreversible);
        final_mark.lib_num = 2;
        blocks.push(final_mark);
        let mut source = VecBlockSource::new(blocks);

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        // Blocks 0..=2 are final; only block 3 stays in the window.
        assert_eq!(pipe.store("store_totals").unwrap().window_len(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_written_at_interval_boundaries() {
        let objects = Arc::new(MemoryStore::new());
        let config = RuntimeConfig {
            store_snapshots_save_interval: 2,
            ..RuntimeConfig::default()
        };
        let mut pipe = pipeline(details(0, 0), Arc::clone(&objects), &config);
        let sink = VecSink::new();
        let mut source =
            VecBlockSource::new((0..6).map(|n| new_block(n, Step::New)).collect::<Vec<_>>());

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        let hash = graph().hash("store_totals").unwrap().to_string();
        let segments = SegmentStore::new(objects);
        let ranges = segments.list(&hash).await.unwrap();
        let bounds: Vec<(u64, u64)> = ranges.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(bounds, vec![(0, 2), (0, 4), (0, 6)]);
    }

    #[tokio::test]
    async fn sub_request_saves_partial_segment_instead_of_snapshots() {
        let objects = Arc::new(MemoryStore::new());
        let plan = RequestDetails {
            is_sub_request: true,
            ..details(10, 12)
        };
        let mut pipe = pipeline(plan, Arc::clone(&objects), &RuntimeConfig::default());
        let sink = VecSink::new();
        let mut source = VecBlockSource::new(vec![
            new_block(10, Step::New),
            new_block(11, Step::New),
            new_block(12, Step::New),
        ]);

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        let hash = graph().hash("store_totals").unwrap().to_string();
        let segments = SegmentStore::new(objects);
        let loaded = segments
            .load(&hash, SegmentRange::new(10, 12))
            .await
            .unwrap();
        assert_eq!(loaded.get_last("total"), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn init_seeds_stores_from_persisted_segments() {
        let objects = Arc::new(MemoryStore::new());
        let hash = graph().hash("store_totals").unwrap().to_string();

        // Two adjacent partial segments covering [0, 20).
        let segments = SegmentStore::new(Arc::clone(&objects) as Arc<dyn ObjectStore>);
        for (start, end, value) in [(0u64, 10u64, "10"), (10, 20, "7")] {
            let mut partial =
                Store::new("store_totals", hash.clone(), 0, UpdatePolicy::Sum, ValueType::Int64);
            partial.set(1, "total", Bytes::from(value)).unwrap();
            partial.flush(end - 1);
            segments
                .save(&partial, SegmentRange::new(start, end))
                .await
                .unwrap();
        }

        let plan = RequestDetails {
            production_mode: true,
            linear_handoff_block_num: 20,
            ..details(20, 22)
        };
        let mut pipe = pipeline(plan, Arc::clone(&objects), &RuntimeConfig::default());
        let sink = VecSink::new();
        pipe.init(&sink).await.unwrap();

        assert_eq!(total_of(&pipe), Some(Bytes::from("17")));
        assert!(sink.responses().iter().any(|r| matches!(
            r,
            Response::Progress(ModuleProgress::InitialState {
                available_up_to: 20,
                ..
            })
        )));

        // Live streaming continues on top of the seeded state.
        let mut source = VecBlockSource::new(vec![
            new_block(20, Step::New),
            new_block(21, Step::New),
        ]);
        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();
        assert_eq!(total_of(&pipe), Some(Bytes::from("19")));
    }

    #[tokio::test]
    async fn fork_steps_filter_limits_emission_but_not_state() {
        let objects = Arc::new(MemoryStore::new());
        let mut pipe = pipeline(details(0, 3), objects, &RuntimeConfig::default())
            .with_fork_steps(vec![Step::NewIrreversible]);
        let sink = VecSink::new();
        let mut source =
            VecBlockSource::new((0..3).map(|n| new_block(n, Step::New)).collect::<Vec<_>>());

        pipe.run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap();

        // Nothing matched the filter, but execution still happened.
        assert!(emitted_block_nums(&sink).is_empty());
        assert_eq!(total_of(&pipe), Some(Bytes::from("3")));
    }

    #[tokio::test]
    async fn module_failure_reports_progress_then_surfaces() {
        let objects = Arc::new(MemoryStore::new());
        let mut pipe: Pipeline<FailingExecutor> = Pipeline::new(
            &graph(),
            details(0, 5),
            outputs(),
            Arc::new(FailingExecutor),
            objects,
            &RuntimeConfig::default(),
        )
        .unwrap();
        let sink = VecSink::new();
        let mut source = VecBlockSource::new(vec![new_block(0, Step::New)]);

        let err = pipe
            .run(&CancellationToken::new(), &mut source, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ModuleExecution { .. }));
        assert!(sink.responses().iter().any(|r| matches!(
            r,
            Response::Progress(ModuleProgress::Failed { .. })
        )));
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_block() {
        let objects = Arc::new(MemoryStore::new());
        let mut pipe = pipeline(details(0, 0), objects, &RuntimeConfig::default());
        let sink = VecSink::new();
        let mut source =
            VecBlockSource::new((0..100).map(|n| new_block(n, Step::New)).collect::<Vec<_>>());

        let token = CancellationToken::new();
        token.cancel();
        let err = pipe.run(&token, &mut source, &sink).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(sink.responses().is_empty());
    }

    #[test]
    fn stream_start_depends_on_request_shape() {
        let objects = Arc::new(MemoryStore::new());
        let config = RuntimeConfig::default();

        let sub = RequestDetails {
            is_sub_request: true,
            ..details(100, 200)
        };
        assert_eq!(
            pipeline(sub, Arc::clone(&objects), &config).stream_start_block(),
            100
        );

        let production = RequestDetails {
            production_mode: true,
            linear_handoff_block_num: 500,
            ..details(100, 0)
        };
        assert_eq!(
            pipeline(production, Arc::clone(&objects), &config).stream_start_block(),
            500
        );

        let mut dev = details(100, 0);
        dev.effective_start_block_num = 40;
        assert_eq!(pipeline(dev, objects, &config).stream_start_block(), 40);
    }
}
