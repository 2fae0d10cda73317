//! Per-trace transform pipeline.
//!
//! A trace's raw samples pass through an ordered chain of transforms. Each
//! enabled transform reads the output of the nearest enabled predecessor; the
//! trace shows the output of the last enabled one.
//!
//! - [`chain`]: the chain itself (wiring, toggling, change propagation)
//! - [`registry`]: creates transforms from persisted kind names and settings
//! - [`median`], [`expression`], [`time_domain`]: built-in transforms

pub mod chain;
pub mod expression;
pub mod median;
pub mod registry;
pub mod time_domain;

use std::ops::Range;

use crate::error::TraceResult;
use crate::sample::{Domain, Sample};

pub use chain::TransformChain;
pub use expression::ExpressionTransform;
pub use median::MedianFilter;
pub use registry::TransformRegistry;
pub use time_domain::{TimeDomainMode, TimeDomainTransform, Window};

/// One processing step of a transform chain.
///
/// Implementations must be deterministic for a given input so that
/// incremental and full recomputation agree.
pub trait Transform: Send {
    /// Persisted kind name, also the registry key.
    fn kind(&self) -> &'static str;

    /// Short human-readable summary including settings.
    fn description(&self) -> String;

    /// Domain of the output for input of domain `input`.
    fn output_domain(&self, input: Domain) -> Domain {
        input
    }

    /// Compute the full output from `input`.
    fn apply(&mut self, input: &[Sample], domain: Domain) -> TraceResult<Vec<Sample>>;

    /// Update `output` after input indices `changed` were modified.
    ///
    /// Returns the output index range that changed. The default recomputes
    /// everything.
    fn apply_range(
        &mut self,
        input: &[Sample],
        domain: Domain,
        output: &mut Vec<Sample>,
        changed: Range<usize>,
    ) -> TraceResult<Range<usize>> {
        let _ = changed;
        *output = self.apply(input, domain)?;
        Ok(0..output.len())
    }

    /// Settings in their persisted JSON form.
    fn settings(&self) -> serde_json::Value;

    /// Restore settings from their persisted JSON form.
    fn load_settings(&mut self, settings: &serde_json::Value) -> TraceResult<()>;
}
