//! Custom error types for the trace engine.
//!
//! This module defines the primary error type, `TraceError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failure modes of trace mutation, formula evaluation, persistence and import.
//!
//! ## Error Hierarchy
//!
//! - **Dependency errors** - `DomainMismatch`, `CyclicDependency`, `SelfDependency`:
//!   a formula source was rejected. The mutation is refused, nothing else changes.
//! - **Evaluation errors** - `Expression`, `OutOfRangeEvaluation`: the affected cells
//!   of one math trace are set to the undefined sentinel or the pass is skipped.
//!   The trace is flagged through its status, other traces are unaffected.
//! - **Persistence errors** - `UnresolvedSourceReference`, `UnknownTransform`, `Json`, `Io`:
//!   reported while loading a setup; the record degrades instead of failing the batch.
//! - **Configuration errors** - `Config`, `Configuration`.
//!
//! None of these terminate the process.

use thiserror::Error;

use crate::sample::Domain;
use crate::trace::TraceId;

/// Convenience alias for results using the crate error type.
pub type TraceResult<T> = std::result::Result<T, TraceError>;

/// Primary error type for trace handling.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Formula sources of one trace must share a single domain.
    #[error("Domain mismatch: formula sources are {expected}, candidate is {found}")]
    DomainMismatch {
        /// Domain of the sources already bound.
        expected: Domain,
        /// Domain of the rejected candidate.
        found: Domain,
    },

    /// The candidate source (transitively) depends on the consumer.
    #[error("Adding {source_trace} as a source of {consumer} would create a dependency loop")]
    CyclicDependency {
        /// Trace that would consume the source.
        consumer: TraceId,
        /// Rejected source.
        source_trace: TraceId,
    },

    /// A trace cannot use itself as a formula source.
    #[error("Trace {0} cannot be a formula source of itself")]
    SelfDependency(TraceId),

    /// Expression could not be parsed or evaluated.
    #[error("Expression error: {0}")]
    Expression(String),

    /// A pending evaluation range lies outside the current grid.
    #[error("Evaluation range {begin}..{end} outside of {len} samples")]
    OutOfRangeEvaluation {
        /// First requested index.
        begin: usize,
        /// One past the last requested index.
        end: usize,
        /// Number of samples in the grid.
        len: usize,
    },

    /// A persisted formula source hash matched no loaded trace.
    #[error("No trace with hash {hash} for variable '{variable}'")]
    UnresolvedSourceReference {
        /// Persisted identity hash.
        hash: u64,
        /// Variable the source was bound to.
        variable: String,
    },

    /// Trace handle does not refer to a live trace.
    #[error("Unknown trace {0}")]
    UnknownTrace(TraceId),

    /// Transform kind not present in the registry.
    #[error("Transform '{0}' not found")]
    UnknownTransform(String),

    /// Transform index out of range or the identity node.
    #[error("Invalid transform index {0}")]
    InvalidTransformIndex(usize),

    /// Transform cannot process input of this domain.
    #[error("Transform '{transform}' does not support {domain} input")]
    UnsupportedDomain {
        /// Transform kind name.
        transform: String,
        /// Offending input domain.
        domain: Domain,
    },

    /// Imported data could not be mapped to a trace.
    #[error("Import error: {0}")]
    Import(String),

    /// Invalid transform settings or configuration values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Whether the error was caused by a rejected formula source.
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            TraceError::DomainMismatch { .. }
                | TraceError::CyclicDependency { .. }
                | TraceError::SelfDependency(_)
        )
    }
}
