//! The streaming service entry point.
//!
//! `Service::blocks` is the engine-side implementation of the
//! `Blocks(Request) → stream Response` RPC: it validates the manifest,
//! detects orchestrator sub-requests, resolves the request into a plan,
//! back-processes missing store history, then drives the pipeline over
//! the block source. Exactly one error surfaces per request, mapped to
//! an RPC status for the transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cascade_core::{Error as CoreError, ObjectStore};
use cascade_store::SegmentStore;

use crate::config::RuntimeConfig;
use crate::error::{Code, Error, Result, Status};
use crate::graph::ModuleGraph;
use crate::orchestrator::{plan_work_units, Orchestrator, StoreCoverage, Worker};
use crate::pipeline::{BlockSource, ModuleExecutor, Pipeline};
use crate::request::{Metadata, Request};
use crate::resolver::build_request_details;
use crate::response::ResponseSink;

/// Environment variable: when `true`, the server names itself in a
/// response header.
const ENV_SEND_HOSTNAME: &str = "SUBSTREAMS_SEND_HOSTNAME";

/// Monotone id tag for sub-request logging.
static WORKER_ID: AtomicU64 = AtomicU64::new(0);

/// One service instance handling streaming requests.
///
/// Each request gets its own pipeline; the service itself holds only
/// shared immutable collaborators and configuration.
pub struct Service<E: ModuleExecutor, W: Worker> {
    config: RuntimeConfig,
    objects: Arc<dyn ObjectStore>,
    executor: Arc<E>,
    worker: Arc<W>,
}

impl<E: ModuleExecutor, W: Worker> Service<E, W> {
    /// Creates a service instance.
    #[must_use]
    pub fn new(
        config: RuntimeConfig,
        objects: Arc<dyn ObjectStore>,
        executor: Arc<E>,
        worker: Arc<W>,
    ) -> Self {
        Self {
            config,
            objects,
            executor,
            worker,
        }
    }

    /// Serves one streaming request, emitting responses in strict block
    /// order until the stop block, end of stream, or failure.
    ///
    /// # Errors
    ///
    /// Returns the single mapped [`Status`] for any failure.
    pub async fn blocks<F, S>(
        &self,
        request: Request,
        metadata: &Metadata,
        live_head: F,
        source_factory: S,
        sink: &dyn ResponseSink,
        token: CancellationToken,
    ) -> std::result::Result<(), Status>
    where
        F: Fn() -> std::result::Result<u64, CoreError>,
        S: FnOnce(u64, &str) -> Result<Box<dyn BlockSource>>,
    {
        match self
            .run_blocks(request, metadata, live_head, source_factory, sink, token)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let status = err.to_status();
                if status.code == Code::Internal {
                    tracing::info!(error = %err, "unexpected termination of blocks stream");
                }
                Err(status)
            }
        }
    }

    async fn run_blocks<F, S>(
        &self,
        request: Request,
        metadata: &Metadata,
        live_head: F,
        source_factory: S,
        sink: &dyn ResponseSink,
        token: CancellationToken,
    ) -> Result<()>
    where
        F: Fn() -> std::result::Result<u64, CoreError>,
        S: FnOnce(u64, &str) -> Result<Box<dyn BlockSource>>,
    {
        send_hostname_header(sink).await;

        let is_sub_request = self.check_sub_request(metadata)?;
        if is_sub_request {
            let worker_id = WORKER_ID.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(worker_id, "serving back-processing sub-request");
        }

        let graph = ModuleGraph::new(request.modules.clone())?;
        let request = resolve_negative_start(request, &live_head)?;

        let mut details = build_request_details(&request, is_sub_request, || live_head())?;
        details.effective_start_block_num = graph
            .effective_start_block(&request.output_modules, details.request_start_block_num)?;
        graph.validate_effective_start_block(
            &request.output_modules,
            details.effective_start_block_num,
        )?;

        tracing::info!(
            request_start = details.request_start_block_num,
            effective_start = details.effective_start_block_num,
            handoff = details.linear_handoff_block_num,
            stop = details.stop_block_num,
            is_sub_request,
            production = details.production_mode,
            outputs = ?request.output_modules,
            "initializing pipeline"
        );

        if !is_sub_request && details.production_mode {
            self.back_process(&graph, &request, details.linear_handoff_block_num, &token)
                .await?;
        }

        let mut pipeline = Pipeline::new(
            &graph,
            details,
            request.output_modules.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.objects),
            &self.config,
        )?
        .with_fork_steps(request.fork_steps.clone());
        pipeline.init(sink).await?;

        let mut source = source_factory(pipeline.stream_start_block(), &request.start_cursor)?;
        pipeline.run(&token, source.as_mut(), sink).await
    }

    /// Closes every required store's persisted-coverage gap up to the
    /// handoff block by dispatching work units to remote workers.
    async fn back_process(
        &self,
        graph: &ModuleGraph,
        request: &Request,
        handoff: u64,
        token: &CancellationToken,
    ) -> Result<()> {
        let segments = SegmentStore::new(Arc::clone(&self.objects));
        let mut coverage = Vec::new();
        for module in graph.required_stores(&request.output_modules)? {
            let module_hash = graph.hash(&module.name)?.to_string();
            let last_saved_end = segments
                .last_contiguous_end(&module_hash, module.start_block)
                .await?;
            coverage.push(StoreCoverage {
                module_name: module.name.clone(),
                module_hash,
                module_start_block: module.start_block,
                last_saved_end,
            });
        }

        let units = plan_work_units(
            &coverage,
            handoff,
            self.config.block_range_size_sub_requests,
        );
        Orchestrator::new(Arc::clone(&self.worker), &self.config)
            .run(token, units)
            .await
    }

    fn check_sub_request(&self, metadata: &Metadata) -> Result<bool> {
        if !metadata.is_partial_mode() {
            return Ok(false);
        }
        if !self.config.partial_mode_enabled {
            return Err(Error::invalid_argument(
                "substreams-partial-mode not enabled on this instance",
            ));
        }
        Ok(true)
    }
}

impl<E: ModuleExecutor, W: Worker> std::fmt::Debug for Service<E, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolves a negative (head-relative) start block against the live
/// head. Positive starts and cursor-bearing requests pass through.
fn resolve_negative_start<F>(mut request: Request, live_head: &F) -> Result<Request>
where
    F: Fn() -> std::result::Result<u64, CoreError>,
{
    if request.start_block_num >= 0 || !request.start_cursor.is_empty() {
        return Ok(request);
    }
    let head = live_head().map_err(|err| {
        Error::invalid_argument(format!(
            "cannot resolve head-relative start block {}: {err}",
            request.start_block_num
        ))
    })?;
    let resolved = head.saturating_sub(request.start_block_num.unsigned_abs());
    request.start_block_num = i64::try_from(resolved).unwrap_or(i64::MAX);
    Ok(request)
}

async fn send_hostname_header(sink: &dyn ResponseSink) {
    send_hostname_header_with(|key| std::env::var(key).ok(), sink).await;
}

async fn send_hostname_header_with<F>(get_env: F, sink: &dyn ResponseSink)
where
    F: Fn(&str) -> Option<String>,
{
    if get_env(ENV_SEND_HOSTNAME).as_deref() != Some("true") {
        return;
    }
    let hostname = get_env("HOSTNAME").unwrap_or_else(|| "unknown host".to_string());
    if let Err(err) = sink.set_header("host", &hostname).await {
        tracing::warn!(error = %err, "cannot send hostname header");
    }
}
