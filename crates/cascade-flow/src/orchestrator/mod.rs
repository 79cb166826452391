//! Back-processing orchestration.
//!
//! Before live streaming can begin, every required store must hold state
//! up to the handoff block. The orchestrator decomposes each store's
//! unbuilt history into [`WorkUnit`]s, dispatches them to remote workers
//! through a bounded pool, and retries transient failures with capped
//! exponential backoff. Completion order does not matter: workers write
//! partial segments to the object store, and assembly merges them
//! oldest-first afterwards.

pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cascade_store::SegmentRange;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::metrics::FlowMetrics;

pub use worker::Worker;

/// Base backoff duration between work-unit attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(250);
/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(4);

/// A `(module, range)` job executed by a remote worker to produce one
/// partial store segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// The store module to back-process.
    pub module_name: String,
    /// The module's deterministic hash (keys the output segment).
    pub module_hash: String,
    /// The block range to build, exclusive end.
    pub range: SegmentRange,
}

/// Per-store facts the planner needs: what exists, what is missing.
#[derive(Debug, Clone)]
pub struct StoreCoverage {
    /// The store module's name.
    pub module_name: String,
    /// The store module's hash.
    pub module_hash: String,
    /// The module's start block.
    pub module_start_block: u64,
    /// Exclusive end of contiguous persisted coverage.
    pub last_saved_end: u64,
}

/// Plans the work units closing each store's gap up to the handoff.
///
/// A store needs no work when the handoff sits at its start block or its
/// persisted coverage already reaches the handoff. Otherwise the missing
/// range `[max(last_saved_end, start_block), handoff)` splits into units
/// of at most `chunk_size` blocks.
#[must_use]
pub fn plan_work_units(
    stores: &[StoreCoverage],
    handoff: u64,
    chunk_size: u64,
) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    for store in stores {
        if handoff == store.module_start_block {
            continue;
        }
        if store.last_saved_end >= handoff {
            continue;
        }
        let mut cursor = store.last_saved_end.max(store.module_start_block);
        while cursor < handoff {
            let end = handoff.min(cursor.saturating_add(chunk_size.max(1)));
            units.push(WorkUnit {
                module_name: store.module_name.clone(),
                module_hash: store.module_hash.clone(),
                range: SegmentRange::new(cursor, end),
            });
            cursor = end;
        }
    }
    units
}

/// Dispatches work units to workers with bounded parallelism and capped
/// retry.
pub struct Orchestrator<W: Worker> {
    worker: Arc<W>,
    parallel_sub_requests: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    metrics: FlowMetrics,
}

impl<W: Worker> Orchestrator<W> {
    /// Creates an orchestrator with limits from the runtime config.
    #[must_use]
    pub fn new(worker: Arc<W>, config: &RuntimeConfig) -> Self {
        Self {
            worker,
            parallel_sub_requests: usize::try_from(config.parallel_sub_requests)
                .unwrap_or(usize::MAX)
                .max(1),
            max_attempts: u32::try_from(config.work_unit_max_attempts)
                .unwrap_or(u32::MAX)
                .max(1),
            backoff_base: BACKOFF_BASE,
            backoff_max: BACKOFF_MAX,
            metrics: FlowMetrics::new(),
        }
    }

    /// Overrides the retry backoff window.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Runs all units to completion.
    ///
    /// At most `parallel_sub_requests` units are in flight at once. A
    /// unit that exhausts its attempts aborts the whole run: remaining
    /// units are cancelled (best effort) and their results discarded.
    ///
    /// # Errors
    ///
    /// Returns the first permanent unit failure, or `Cancelled` when the
    /// surrounding context was cancelled.
    pub async fn run(&self, token: &CancellationToken, units: Vec<WorkUnit>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        tracing::info!(
            units = units.len(),
            parallel = self.parallel_sub_requests,
            "dispatching back-processing work"
        );

        // A child token lets a permanent failure cancel siblings without
        // touching the request-level context.
        let run_token = token.child_token();
        let semaphore = Arc::new(Semaphore::new(self.parallel_sub_requests));
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();

        for unit in units {
            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);
            let run_token = run_token.clone();
            let max_attempts = self.max_attempts;
            let backoff = (self.backoff_base, self.backoff_max);
            let metrics = self.metrics;
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?;
                run_unit(worker.as_ref(), &run_token, &unit, max_attempts, backoff, metrics)
                    .await
            });
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = join_set.join_next().await {
            let unit_result = match joined {
                Ok(result) => result,
                Err(join_err) if join_err.is_cancelled() => Err(Error::Cancelled),
                Err(join_err) => Err(Error::Core(cascade_core::Error::internal(format!(
                    "work unit task panicked: {join_err}"
                )))),
            };
            if let Err(err) = unit_result {
                if first_error.is_none() {
                    // Abort siblings; keep draining so nothing leaks.
                    run_token.cancel();
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) if token.is_cancelled() => {
                // The surrounding request was cancelled; report that, not
                // whatever secondary error the cancellation caused.
                tracing::debug!(error = %err, "back-processing cancelled");
                Err(Error::Cancelled)
            }
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<W: Worker> std::fmt::Debug for Orchestrator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("parallel_sub_requests", &self.parallel_sub_requests)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

async fn run_unit<W: Worker>(
    worker: &W,
    token: &CancellationToken,
    unit: &WorkUnit,
    max_attempts: u32,
    (backoff_base, backoff_max): (Duration, Duration),
    metrics: FlowMetrics,
) -> Result<()> {
    let mut attempts: u32 = 0;
    let mut backoff = backoff_base;
    metrics.record_work_unit("dispatched");

    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outcome = tokio::select! {
            () = token.cancelled() => return Err(Error::Cancelled),
            result = worker.work(token, unit) => result,
        };

        match outcome {
            Ok(()) => {
                metrics.record_work_unit("completed");
                return Ok(());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                attempts += 1;
                if attempts >= max_attempts {
                    metrics.record_work_unit("failed");
                    return Err(Error::WorkUnitFailed {
                        module: unit.module_name.clone(),
                        start: unit.range.start,
                        end: unit.range.end,
                        attempts,
                        source: Box::new(err),
                    });
                }
                metrics.record_work_unit("retried");
                tracing::warn!(
                    module = %unit.module_name,
                    range = %unit.range,
                    attempt = attempts,
                    error = %err,
                    "work unit failed, retrying"
                );
                let delay = backoff.min(backoff_max) + jitter();
                tokio::select! {
                    () = token.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                backoff = backoff.saturating_mul(2);
            }
        }
    }
}

/// Random jitter for backoff (0-50ms).
fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..50))
}
