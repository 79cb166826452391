//! Observability infrastructure for Cascade.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used across components.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `cascade_flow=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for per-request pipeline execution.
#[must_use]
pub fn pipeline_span(operation: &str, output_modules: &str) -> Span {
    tracing::info_span!("pipeline", op = operation, outputs = output_modules)
}

/// Creates a span for back-processing orchestration.
#[must_use]
pub fn orchestration_span(operation: &str, module: &str, start: u64, end: u64) -> Span {
    tracing::info_span!(
        "orchestration",
        op = operation,
        module = module,
        start_block = start,
        end_block = end,
    )
}
