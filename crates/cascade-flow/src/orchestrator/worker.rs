//! The remote worker seam.
//!
//! A worker executes one [`WorkUnit`] by running the module over the
//! unit's range in partial mode and writing the resulting segment to the
//! shared object store. The transport (gRPC client pool, in-process
//! executor) is an external collaborator behind the [`Worker`] trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::orchestrator::WorkUnit;
use crate::request::{Metadata, Request, PARTIAL_MODE_METADATA_KEY};

/// Executes work units remotely.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Builds the unit's segment. The implementation reports transient
    /// failures as errors; the orchestrator owns retry policy.
    ///
    /// # Errors
    ///
    /// Any error marks the attempt failed; `Error::Cancelled` stops
    /// retrying immediately.
    async fn work(&self, token: &CancellationToken, unit: &WorkUnit) -> Result<()>;
}

/// Derives the sub-request a worker must issue for a unit: same
/// manifest and conditions as the original request, narrowed to the
/// unit's module and range, flagged with partial-mode metadata.
#[must_use]
pub fn sub_request_for_unit(request: &Request, unit: &WorkUnit) -> (Request, Metadata) {
    let sub_request = Request {
        start_block_num: i64::try_from(unit.range.start).unwrap_or(i64::MAX),
        stop_block_num: unit.range.end,
        start_cursor: String::new(),
        fork_steps: request.fork_steps.clone(),
        irreversibility_condition: request.irreversibility_condition.clone(),
        modules: request.modules.clone(),
        output_modules: vec![unit.module_name.clone()],
        production_mode: false,
    };
    let mut metadata = Metadata::new();
    metadata.insert(PARTIAL_MODE_METADATA_KEY, "true");
    (sub_request, metadata)
}
