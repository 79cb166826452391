//! Error types for the store domain.

/// The result type used throughout cascade-store.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A write targeted the reserved `__!__` key space.
    #[error("key prefix {prefix:?} is reserved for internal use (key {key:?})")]
    ReservedKey {
        /// The reserved prefix.
        prefix: &'static str,
        /// The offending key.
        key: String,
    },

    /// A mutation carried an ordinal lower than one already seen this block.
    #[error("ordinal {ordinal} moved backward (watermark {watermark}) in store {store}")]
    OrdinalReversed {
        /// The offending ordinal.
        ordinal: u64,
        /// The highest ordinal seen so far this block.
        watermark: u64,
        /// The store name.
        store: String,
    },

    /// Two segments could not be merged.
    #[error("incompatible merge of store {store}: {reason}")]
    IncompatibleMerge {
        /// The store name.
        store: String,
        /// Which precondition failed.
        reason: String,
    },

    /// A stored value could not be parsed under its declared type.
    #[error("cannot parse value {value:?} as {value_type}: {message}")]
    ValueParse {
        /// The raw value, lossily decoded for display.
        value: String,
        /// The declared value type.
        value_type: crate::value::ValueType,
        /// Parser detail.
        message: String,
    },

    /// The update policy does not apply to the declared value type.
    #[error("update policy {policy} is not supported for value type {value_type}")]
    UnsupportedPolicy {
        /// The declared policy.
        policy: crate::value::UpdatePolicy,
        /// The declared value type.
        value_type: crate::value::ValueType,
    },

    /// A persisted segment is malformed.
    #[error("malformed segment at {path}: {message}")]
    MalformedSegment {
        /// Object path of the segment.
        path: String,
        /// Description of the defect.
        message: String,
    },

    /// Persisted segments do not cover the range required for assembly.
    #[error("segments for module {module_hash} leave a gap at block {gap_at}, need [{from}, {to})")]
    CoverageGap {
        /// The module hash whose segments were assembled.
        module_hash: String,
        /// First block not covered.
        gap_at: u64,
        /// Required range start.
        from: u64,
        /// Required range end (exclusive).
        to: u64,
    },

    /// An error from cascade-core (storage, cancellation).
    #[error(transparent)]
    Core(#[from] cascade_core::Error),
}
