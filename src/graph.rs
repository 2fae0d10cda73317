//! Dependency tracking between formula traces and their sources.
//!
//! The graph records, for every formula (math) trace, the traces it reads
//! from and the variable name each one is bound to. A reverse index maps every
//! source to the consumers subscribed to it; that index is what routes a
//! source's change and deletion notifications.
//!
//! # Invariants
//!
//! - No trace is a source of itself.
//! - The graph is acyclic: a candidate is rejected when it already depends,
//!   directly or transitively, on the consumer.
//! - All sources of one consumer share one output domain.
//!
//! # Example
//!
//! ```rust
//! use daq_traces::graph::DependencyGraph;
//! use daq_traces::sample::Domain;
//! use daq_traces::trace::TraceId;
//!
//! let (a, b, m) = (TraceId(1), TraceId(2), TraceId(3));
//! let domain_of = |_id: TraceId| Some(Domain::Frequency);
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_source(m, a, "a", domain_of).unwrap();
//! graph.add_source(m, b, "b", domain_of).unwrap();
//!
//! // `a` cannot read from `m`: `m` already reads from `a`.
//! assert!(!graph.can_add_source(a, m, domain_of));
//! assert_eq!(graph.consumers_of(a), vec![m]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{TraceError, TraceResult};
use crate::sample::Domain;
use crate::trace::TraceId;

/// A source bound to a formula variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    /// Source trace.
    pub source: TraceId,
    /// Variable name inside the consumer's expression.
    pub variable: String,
}

/// Consumer/source edges of all formula traces.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    // consumer -> bindings, in insertion order
    sources: BTreeMap<TraceId, Vec<SourceBinding>>,
    // source -> subscribed consumers
    consumers: BTreeMap<TraceId, BTreeSet<TraceId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether `candidate` may become a source of `consumer`.
    ///
    /// `domain_of` reports the current output domain of a trace.
    ///
    /// # Errors
    ///
    /// - [`TraceError::SelfDependency`] if `candidate == consumer`
    /// - [`TraceError::CyclicDependency`] if `candidate` depends on `consumer`
    /// - [`TraceError::DomainMismatch`] if the consumer already has sources of
    ///   another domain
    pub fn validate_source(
        &self,
        consumer: TraceId,
        candidate: TraceId,
        domain_of: impl Fn(TraceId) -> Option<Domain>,
    ) -> TraceResult<()> {
        if candidate == consumer {
            return Err(TraceError::SelfDependency(consumer));
        }
        if self.depends_on(candidate, consumer) {
            return Err(TraceError::CyclicDependency {
                consumer,
                source_trace: candidate,
            });
        }
        let existing = self
            .sources_of(consumer)
            .iter()
            .find(|b| b.source != candidate)
            .and_then(|b| domain_of(b.source));
        if let (Some(expected), Some(found)) = (existing, domain_of(candidate)) {
            if expected != found {
                return Err(TraceError::DomainMismatch { expected, found });
            }
        }
        Ok(())
    }

    /// [`validate_source`](Self::validate_source) as a yes/no answer.
    pub fn can_add_source(
        &self,
        consumer: TraceId,
        candidate: TraceId,
        domain_of: impl Fn(TraceId) -> Option<Domain>,
    ) -> bool {
        self.validate_source(consumer, candidate, domain_of).is_ok()
    }

    /// Binds `source` to `variable` in `consumer`'s formula.
    ///
    /// Binding an already bound source again only renames its variable.
    pub fn add_source(
        &mut self,
        consumer: TraceId,
        source: TraceId,
        variable: &str,
        domain_of: impl Fn(TraceId) -> Option<Domain>,
    ) -> TraceResult<()> {
        self.validate_source(consumer, source, domain_of)?;
        let bindings = self.sources.entry(consumer).or_default();
        match bindings.iter_mut().find(|b| b.source == source) {
            Some(binding) => binding.variable = variable.to_string(),
            None => bindings.push(SourceBinding {
                source,
                variable: variable.to_string(),
            }),
        }
        self.consumers.entry(source).or_default().insert(consumer);
        Ok(())
    }

    /// Unbinds `source` from `consumer`. Returns whether an edge existed.
    pub fn remove_source(&mut self, consumer: TraceId, source: TraceId) -> bool {
        let Some(bindings) = self.sources.get_mut(&consumer) else {
            return false;
        };
        let before = bindings.len();
        bindings.retain(|b| b.source != source);
        let removed = bindings.len() != before;
        if bindings.is_empty() {
            self.sources.remove(&consumer);
        }
        if let Some(set) = self.consumers.get_mut(&source) {
            set.remove(&consumer);
            if set.is_empty() {
                self.consumers.remove(&source);
            }
        }
        removed
    }

    /// Unbinds every source of `consumer`, returning the former sources.
    pub fn clear_sources(&mut self, consumer: TraceId) -> Vec<TraceId> {
        let sources: Vec<TraceId> = self.sources_of(consumer).iter().map(|b| b.source).collect();
        for &source in &sources {
            self.remove_source(consumer, source);
        }
        sources
    }

    /// Removes every edge touching `trace`.
    ///
    /// Returns the `(consumer, source)` pairs that were removed, consumers of
    /// `trace` first.
    pub fn detach(&mut self, trace: TraceId) -> Vec<(TraceId, TraceId)> {
        let mut removed: Vec<(TraceId, TraceId)> = self
            .consumers_of(trace)
            .into_iter()
            .map(|consumer| (consumer, trace))
            .collect();
        for &(consumer, source) in &removed {
            self.remove_source(consumer, source);
        }
        removed.extend(
            self.clear_sources(trace)
                .into_iter()
                .map(|source| (trace, source)),
        );
        removed
    }

    /// Bindings of `consumer` in insertion order.
    pub fn sources_of(&self, consumer: TraceId) -> &[SourceBinding] {
        self.sources
            .get(&consumer)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Variable bound to `source` in `consumer`'s formula.
    pub fn variable_for(&self, consumer: TraceId, source: TraceId) -> Option<&str> {
        self.sources_of(consumer)
            .iter()
            .find(|b| b.source == source)
            .map(|b| b.variable.as_str())
    }

    /// Consumers subscribed to `source`, ascending.
    pub fn consumers_of(&self, source: TraceId) -> Vec<TraceId> {
        self.consumers
            .get(&source)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `trace` reads from `target`, directly or through other formulas.
    pub fn depends_on(&self, trace: TraceId, target: TraceId) -> bool {
        self.sources_of(trace)
            .iter()
            .any(|b| b.source == target || self.depends_on(b.source, target))
    }

    /// Whether `trace` reads from `target` directly.
    pub fn depends_directly_on(&self, trace: TraceId, target: TraceId) -> bool {
        self.sources_of(trace).iter().any(|b| b.source == target)
    }
}
