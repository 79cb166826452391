//! Error types for the flow domain, and their mapping onto RPC status
//! codes.
//!
//! The pipeline wraps every internal failure with context and surfaces
//! exactly one error to the transport layer, which converts it with
//! [`Error::to_status`]. Already-emitted partial results are never rolled
//! back; clients resume from their last cursor.

/// The result type used throughout cascade-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in flow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The client request was malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the defect.
        message: String,
    },

    /// A cycle was detected in the module graph.
    #[error("cycle detected in module graph: {cycle:?}")]
    CycleDetected {
        /// Module names along the cycle.
        cycle: Vec<String>,
    },

    /// A module referenced by name does not exist.
    #[error("module not found: {name}")]
    ModuleNotFound {
        /// The missing module name.
        name: String,
    },

    /// The response sink could not transmit to the client.
    #[error("client unavailable: {message}")]
    Unavailable {
        /// Description of the transmission failure.
        message: String,
    },

    /// A module's execution failed inside the runtime.
    #[error("executing module {module}: {message}")]
    ModuleExecution {
        /// The failing module.
        module: String,
        /// Runtime detail.
        message: String,
    },

    /// A back-processing work unit exhausted its retries.
    #[error("work unit {module} [{start}, {end}) failed after {attempts} attempts")]
    WorkUnitFailed {
        /// The module being back-processed.
        module: String,
        /// Unit range start.
        start: u64,
        /// Unit range end (exclusive).
        end: u64,
        /// Attempts made.
        attempts: u32,
        /// The final worker error.
        #[source]
        source: Box<Error>,
    },

    /// A remote worker rejected or failed a sub-request.
    #[error("worker error: {message}")]
    Worker {
        /// Worker-reported detail.
        message: String,
    },

    /// The live head could not be obtained when the plan required it.
    #[error("cannot determine live handoff block: {message}")]
    NoLiveHead {
        /// Probe detail.
        message: String,
    },

    /// The operation was cancelled through its context handle.
    #[error("cancelled")]
    Cancelled,

    /// An error from the store domain.
    #[error(transparent)]
    Store(#[from] cascade_store::Error),

    /// An error from cascade-core.
    #[error(transparent)]
    Core(#[from] cascade_core::Error),
}

impl Error {
    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a worker error.
    #[must_use]
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Returns the RPC status code this error maps to.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Cancelled => Code::Cancelled,
            Self::InvalidArgument { .. }
            | Self::CycleDetected { .. }
            | Self::ModuleNotFound { .. } => Code::InvalidArgument,
            Self::Unavailable { .. } => Code::Unavailable,
            Self::WorkUnitFailed { source, .. } => match source.code() {
                // A cancelled or expired unit propagates its own code; any
                // other worker failure is an internal error by the time it
                // has exhausted retries.
                Code::Cancelled => Code::Cancelled,
                Code::DeadlineExceeded => Code::DeadlineExceeded,
                _ => Code::Internal,
            },
            Self::Core(core) => core_code(core),
            Self::Store(cascade_store::Error::Core(core)) => core_code(core),
            _ => Code::Internal,
        }
    }

    /// Converts this error into the status surfaced to the RPC layer.
    #[must_use]
    pub fn to_status(&self) -> Status {
        Status {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

fn core_code(core: &cascade_core::Error) -> Code {
    match core {
        cascade_core::Error::Cancelled => Code::Cancelled,
        cascade_core::Error::DeadlineExceeded => Code::DeadlineExceeded,
        cascade_core::Error::InvalidCursor { .. } => Code::InvalidArgument,
        _ => Code::Internal,
    }
}

/// RPC status codes recognized by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// The request was cancelled by the client or server.
    Cancelled,
    /// The request outlived its deadline.
    DeadlineExceeded,
    /// The request was malformed.
    InvalidArgument,
    /// The client could not be reached.
    Unavailable,
    /// Anything else.
    Internal,
}

/// The single status surfaced to the RPC layer for a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// The mapped code.
    pub code: Code,
    /// The string form of the underlying error.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_maps_to_cancelled() {
        assert_eq!(Error::Cancelled.code(), Code::Cancelled);
        assert_eq!(
            Error::Core(cascade_core::Error::Cancelled).code(),
            Code::Cancelled
        );
    }

    #[test]
    fn deadline_propagates_verbatim() {
        assert_eq!(
            Error::Core(cascade_core::Error::DeadlineExceeded).code(),
            Code::DeadlineExceeded
        );
    }

    #[test]
    fn invalid_cursor_is_invalid_argument() {
        let err = Error::Core(cascade_core::Error::invalid_cursor("unknown step 0"));
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn sink_failure_is_unavailable() {
        let err = Error::Unavailable {
            message: "client went away".into(),
        };
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[test]
    fn store_and_execution_failures_are_internal() {
        let merge = Error::Store(cascade_store::Error::IncompatibleMerge {
            store: "totals".into(),
            reason: "value type mismatch".into(),
        });
        assert_eq!(merge.code(), Code::Internal);

        let exec = Error::ModuleExecution {
            module: "map_events".into(),
            message: "trap".into(),
        };
        assert_eq!(exec.code(), Code::Internal);
    }

    #[test]
    fn work_unit_failure_keeps_cancellation_code() {
        let cancelled = Error::WorkUnitFailed {
            module: "totals".into(),
            start: 0,
            end: 100,
            attempts: 3,
            source: Box::new(Error::Cancelled),
        };
        assert_eq!(cancelled.code(), Code::Cancelled);

        let exhausted = Error::WorkUnitFailed {
            module: "totals".into(),
            start: 0,
            end: 100,
            attempts: 3,
            source: Box::new(Error::worker("connection reset")),
        };
        assert_eq!(exhausted.code(), Code::Internal);
    }

    #[test]
    fn status_carries_error_string() {
        let status = Error::invalid_argument("bad cursor").to_status();
        assert_eq!(status.code, Code::InvalidArgument);
        assert!(status.message.contains("bad cursor"));
    }
}
