//! # DAQ Traces
//!
//! Measurement trace engine for an instrument-control application. A trace is
//! an ordered series of `(coordinate, complex value)` samples fed by live
//! acquisition, by a file import, or by a formula over other traces. Every
//! trace runs its samples through a chain of transforms before anyone sees
//! them.
//!
//! ## Crate Structure
//!
//! - **`sample`**: `Sample`, the undefined sentinel and the small enums
//!   (`Domain`, `Source`, `MergePolicy`, `LiveParameter`).
//! - **`interpolation`**: index lookup and linear interpolation over sorted samples.
//! - **`store`**: `SampleStore`, the sorted raw samples of one trace.
//! - **`transform`**: the `Transform` trait, `TransformChain` and the built-in
//!   transform kinds with their registry.
//! - **`expression`**: rhai-backed complex expression evaluator.
//! - **`formula`**: evaluation grid, dirty range, debounce and evaluation pass
//!   of formula traces.
//! - **`graph`**: `DependencyGraph` between formula traces and their sources,
//!   with cycle and domain checks.
//! - **`trace`**: `Trace`, tying store, chain and formula state together.
//! - **`model`**: `TraceModel`, the owner of all traces that routes change
//!   events, deletes in two phases and fires debounce timers.
//! - **`events`**: change notifications.
//! - **`clock`**: time sources (`SystemClock`, `ManualClock`).
//! - **`persistence`**: persisted records and identity hashing.
//! - **`import`**: column tables, network-parameter data and file loaders.
//! - **`config`**, **`logging`**, **`error`**: ambient infrastructure.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod expression;
pub mod formula;
pub mod graph;
pub mod import;
pub mod interpolation;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod sample;
pub mod store;
pub mod trace;
pub mod transform;

pub use error::{TraceError, TraceResult};
pub use model::TraceModel;
pub use trace::{Trace, TraceId};
