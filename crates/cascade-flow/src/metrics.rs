//! Observability metrics for the flow engine.
//!
//! Exposed through the `metrics` crate facade; install any exporter at
//! application startup.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `cascade_flow_blocks_processed_total` | Counter | Blocks driven through a pipeline |
//! | `cascade_flow_responses_total` | Counter | Response envelopes emitted |
//! | `cascade_flow_work_units_total` | Counter | Work unit outcomes, by `outcome` |
//! | `cascade_flow_active_pipelines` | Gauge | Pipelines currently running |
//! | `cascade_flow_block_duration_seconds` | Histogram | Per-block execution time |

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: blocks driven through a pipeline.
    pub const BLOCKS_PROCESSED_TOTAL: &str = "cascade_flow_blocks_processed_total";
    /// Counter: response envelopes emitted.
    pub const RESPONSES_TOTAL: &str = "cascade_flow_responses_total";
    /// Counter: work unit outcomes, labeled by `outcome`.
    pub const WORK_UNITS_TOTAL: &str = "cascade_flow_work_units_total";
    /// Gauge: pipelines currently running.
    pub const ACTIVE_PIPELINES: &str = "cascade_flow_active_pipelines";
    /// Histogram: per-block execution time in seconds.
    pub const BLOCK_DURATION_SECONDS: &str = "cascade_flow_block_duration_seconds";
}

/// Handle for recording flow metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a metrics handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records one processed block.
    pub fn record_block_processed(&self) {
        counter!(names::BLOCKS_PROCESSED_TOTAL).increment(1);
    }

    /// Records one emitted response envelope.
    pub fn record_response(&self) {
        counter!(names::RESPONSES_TOTAL).increment(1);
    }

    /// Records a work unit outcome: `dispatched`, `retried`, `completed`,
    /// or `failed`.
    pub fn record_work_unit(&self, outcome: &'static str) {
        counter!(names::WORK_UNITS_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Updates the active-pipelines gauge.
    pub fn set_active_pipelines(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(names::ACTIVE_PIPELINES).set(count as f64);
    }

    /// Observes one block's execution duration.
    pub fn observe_block_duration(&self, seconds: f64) {
        histogram!(names::BLOCK_DURATION_SECONDS).record(seconds);
    }
}
