//! Collection of traces and the engine that keeps formula traces current.
//!
//! [`TraceModel`] owns every [`Trace`], the [`DependencyGraph`] between
//! formula traces and their sources, and the event queue. All mutation goes
//! through the model so that it can deliver change notifications in order:
//!
//! 1. the mutated trace queues its events,
//! 2. the model pops them one by one; a `DataChanged` of a source is handed to
//!    every consumer subscribed through the graph (grid reconciliation, dirty
//!    range translation, debounced evaluation),
//! 3. every event then lands in the outbox read by [`TraceModel::drain_events`].
//!
//! Evaluation is debounced per trace. A host loop calls [`TraceModel::poll`]
//! (sleeping until [`TraceModel::next_deadline`] in between) to fire due
//! timers, or [`TraceModel::flush`] to evaluate everything pending right away.
//!
//! # Example
//!
//! ```rust
//! use daq_traces::model::TraceModel;
//! use daq_traces::sample::{Domain, Sample};
//!
//! let mut model = TraceModel::new();
//! let a = model.create_trace("A");
//! let b = model.create_trace("B");
//! for x in 1..=3 {
//!     let x = x as f64;
//!     model.add_data(a, Sample::real(x, x), Domain::Frequency, 50.0, None).unwrap();
//!     model.add_data(b, Sample::real(x, x + 3.0), Domain::Frequency, 50.0, None).unwrap();
//! }
//!
//! let m = model.create_trace("M");
//! model.set_math(m).unwrap();
//! model.set_expression(m, "a*b").unwrap();
//! model.add_source(m, a, "a").unwrap();
//! model.add_source(m, b, "b").unwrap();
//! model.flush();
//!
//! let values: Vec<f64> = model.trace(m).unwrap().output().iter().map(|s| s.y.re).collect();
//! assert_eq!(values, vec![4.0, 10.0, 18.0]);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{TraceError, TraceResult};
use crate::events::{EventQueue, TraceEvent};
use crate::expression::{ExpressionEngine, DEFAULT_OPERATION_LIMIT};
use crate::formula::{translate_source_change, EvaluationGrid, EvaluationOutcome, Schedule};
use crate::graph::{DependencyGraph, SourceBinding};
use crate::import::{ColumnTable, NetworkParameterData};
use crate::sample::{Domain, LiveParameter, MergePolicy, Sample, Source};
use crate::trace::{
    Trace, TraceId, TraceStatus, DEFAULT_REFERENCE_IMPEDANCE, DEFAULT_VELOCITY_FACTOR,
};
use crate::transform::TransformRegistry;

/// Tunables of a [`TraceModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    /// Minimum spacing between two evaluation passes of one formula trace.
    pub update_interval: Duration,
    /// Velocity factor of new traces.
    pub velocity_factor: f64,
    /// Reference impedance of new traces.
    pub reference_impedance: f64,
    /// Operation limit of one expression evaluation.
    pub operation_limit: u64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(100),
            velocity_factor: DEFAULT_VELOCITY_FACTOR,
            reference_impedance: DEFAULT_REFERENCE_IMPEDANCE,
            operation_limit: DEFAULT_OPERATION_LIMIT,
        }
    }
}

impl From<&EngineConfig> for ModelOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            update_interval: Duration::from_millis(config.math_update_interval_ms),
            velocity_factor: config.default_velocity_factor,
            reference_impedance: config.default_reference_impedance,
            operation_limit: config.expression_operation_limit,
        }
    }
}

/// Owner of all traces and their formula dependencies.
pub struct TraceModel {
    pub(crate) traces: BTreeMap<TraceId, Trace>,
    pub(crate) graph: DependencyGraph,
    pub(crate) registry: TransformRegistry,
    queue: EventQueue,
    outbox: Vec<TraceEvent>,
    next_id: u32,
    clock: Arc<dyn Clock>,
    engine: ExpressionEngine,
    options: ModelOptions,
}

impl Default for TraceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceModel {
    /// Model with default options on the system clock.
    pub fn new() -> Self {
        Self::with_options(ModelOptions::default(), Arc::new(SystemClock))
    }

    /// Model configured from an [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_options(ModelOptions::from(config), Arc::new(SystemClock))
    }

    /// Model with explicit options and time source.
    pub fn with_options(options: ModelOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            traces: BTreeMap::new(),
            graph: DependencyGraph::new(),
            registry: TransformRegistry::new(),
            queue: EventQueue::default(),
            outbox: Vec::new(),
            next_id: 1,
            clock,
            engine: ExpressionEngine::with_operation_limit(options.operation_limit),
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Registry used to recreate persisted transforms.
    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Mutable registry, to add custom transform kinds.
    pub fn registry_mut(&mut self) -> &mut TransformRegistry {
        &mut self.registry
    }

    // ---- trace lifecycle ----------------------------------------------------

    /// Create an empty live trace.
    pub fn create_trace(&mut self, name: &str) -> TraceId {
        let id = TraceId(self.next_id);
        self.next_id += 1;
        let mut trace = Trace::new(id, name);
        trace.set_velocity_factor(self.options.velocity_factor);
        trace.set_reference_impedance(self.options.reference_impedance);
        self.traces.insert(id, trace);
        debug!(%id, name, "Created trace");
        id
    }

    /// Delete a trace.
    ///
    /// Edges are detached first: every consumer loses the trace as a source and
    /// recomputes its grid. Only then is the trace freed and `Deleted` emitted.
    pub fn delete(&mut self, id: TraceId) -> TraceResult<()> {
        self.require(id)?;
        let removed = self.graph.detach(id);
        for &(consumer, source) in &removed {
            self.queue.push(TraceEvent::SourceRemoved { consumer, source });
        }
        if let Some(mut trace) = self.traces.remove(&id) {
            self.queue.extend(trace.take_events());
            info!(%id, name = trace.name(), "Deleted trace");
        }
        self.queue.push(TraceEvent::Deleted(id));

        for (consumer, _) in removed.into_iter().filter(|&(_, source)| source == id) {
            if let Some(t) = self.traces.get(&consumer) {
                t.invalidate_hash();
            }
            self.refresh_formula(consumer);
            self.mark_all_dirty(consumer);
            self.schedule(consumer);
        }
        self.dispatch();
        Ok(())
    }

    /// Trace by handle.
    pub fn trace(&self, id: TraceId) -> Option<&Trace> {
        self.traces.get(&id)
    }

    /// All traces in creation order.
    pub fn traces(&self) -> impl Iterator<Item = &Trace> + '_ {
        self.traces.values()
    }

    /// Handles in creation order.
    pub fn ids(&self) -> Vec<TraceId> {
        self.traces.keys().copied().collect()
    }

    /// First trace named `name`.
    pub fn find_by_name(&self, name: &str) -> Option<TraceId> {
        self.traces.values().find(|t| t.name() == name).map(Trace::id)
    }

    /// Number of traces.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether the model holds no trace.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Run `f` on a trace and deliver the events it caused.
    pub fn update<R>(&mut self, id: TraceId, f: impl FnOnce(&mut Trace) -> R) -> TraceResult<R> {
        let trace = self.traces.get_mut(&id).ok_or(TraceError::UnknownTrace(id))?;
        let result = f(trace);
        self.dispatch();
        Ok(result)
    }

    // ---- data ingestion -----------------------------------------------------

    /// Write an acquired sample into a trace. See [`Trace::add_data`].
    pub fn add_data(
        &mut self,
        id: TraceId,
        sample: Sample,
        domain: Domain,
        reference_impedance: f64,
        index: Option<usize>,
    ) -> TraceResult<bool> {
        self.update(id, |t| t.add_data(sample, domain, reference_impedance, index))
    }

    /// Clear a trace (ignored while paused unless forced).
    pub fn clear(&mut self, id: TraceId, force: bool) -> TraceResult<()> {
        self.update(id, |t| t.clear(force))
    }

    /// Switch a trace to live acquisition, dropping its formula sources.
    pub fn set_live(
        &mut self,
        id: TraceId,
        policy: MergePolicy,
        parameter: LiveParameter,
    ) -> TraceResult<()> {
        self.require(id)?;
        self.detach_sources(id);
        self.update(id, |t| t.set_live(policy, parameter))
    }

    /// Fill a trace from trace group `parameter` of a column table.
    ///
    /// Returns the group's name.
    pub fn fill_from_table(
        &mut self,
        id: TraceId,
        table: &ColumnTable,
        parameter: usize,
    ) -> TraceResult<String> {
        self.require(id)?;
        self.detach_sources(id);
        self.update(id, |t| t.fill_from_table(table, parameter))?
    }

    /// Fill a trace from one parameter of network-parameter data.
    pub fn fill_from_network(
        &mut self,
        id: TraceId,
        data: &NetworkParameterData,
        parameter: usize,
    ) -> TraceResult<()> {
        self.require(id)?;
        self.detach_sources(id);
        self.update(id, |t| t.fill_from_network(data, parameter))?
    }

    /// One trace per trace group of a column table, named after the group.
    pub fn create_from_table(&mut self, table: &ColumnTable) -> TraceResult<Vec<TraceId>> {
        if table.headers().len() < 2 {
            return Err(TraceError::Import(format!(
                "{}: not enough columns",
                table.filename()
            )));
        }
        let groups = table.trace_groups();
        let mut created = Vec::with_capacity(groups.len());
        for (parameter, group) in groups.iter().enumerate() {
            let id = self.create_trace(&group.name);
            if let Err(e) = self.fill_from_table(id, table, parameter) {
                self.delete(id)?;
                return Err(e);
            }
            created.push(id);
        }
        Ok(created)
    }

    /// One trace per parameter of network-parameter data, named `S<sink><source>`.
    pub fn create_from_network(&mut self, data: &NetworkParameterData) -> TraceResult<Vec<TraceId>> {
        let mut created = Vec::with_capacity(data.parameter_count());
        for parameter in 0..data.parameter_count() {
            let id = self.create_trace(&data.parameter_name(parameter));
            self.fill_from_network(id, data, parameter)?;
            created.push(id);
        }
        Ok(created)
    }

    // ---- pausing -----------------------------------------------------------

    /// Whether pausing `id` has any effect: live traces and formulas over them.
    pub fn can_be_paused(&self, id: TraceId) -> bool {
        match self.traces.get(&id).map(Trace::source) {
            Some(Source::Live) => true,
            Some(Source::Math) => self
                .graph
                .sources_of(id)
                .iter()
                .any(|b| self.can_be_paused(b.source)),
            _ => false,
        }
    }

    /// Freeze a trace's data.
    pub fn pause(&mut self, id: TraceId) -> TraceResult<()> {
        self.update(id, |t| {
            t.set_paused_flag(true);
        })
    }

    /// Unfreeze a trace; formula work retained while paused is rescheduled.
    pub fn resume(&mut self, id: TraceId) -> TraceResult<()> {
        let resumed = self.update(id, |t| t.set_paused_flag(false))?;
        let pending = self
            .traces
            .get(&id)
            .is_some_and(|t| t.formula().pending().is_some());
        if resumed && pending {
            self.schedule(id);
            self.dispatch();
        }
        Ok(())
    }

    // ---- formulas ------------------------------------------------------------

    /// Turn a trace into a formula trace over its bound sources.
    pub fn set_math(&mut self, id: TraceId) -> TraceResult<()> {
        self.require(id)?;
        if let Some(t) = self.traces.get_mut(&id) {
            t.set_math();
        }
        self.refresh_formula(id);
        self.mark_all_dirty(id);
        self.schedule(id);
        self.dispatch();
        Ok(())
    }

    /// Replace the expression of a formula trace and re-evaluate it.
    pub fn set_expression(&mut self, id: TraceId, expression: &str) -> TraceResult<()> {
        self.require(id)?;
        if let Some(t) = self.traces.get_mut(&id) {
            t.set_expression(expression);
        }
        self.mark_all_dirty(id);
        self.schedule(id);
        self.dispatch();
        Ok(())
    }

    /// Check whether `candidate` may become a source of `consumer`.
    pub fn validate_source(&self, consumer: TraceId, candidate: TraceId) -> TraceResult<()> {
        self.require(consumer)?;
        self.require(candidate)?;
        let traces = &self.traces;
        self.graph.validate_source(consumer, candidate, |id| {
            traces.get(&id).map(Trace::output_domain)
        })
    }

    /// [`validate_source`](Self::validate_source) as a yes/no answer.
    pub fn can_add_source(&self, consumer: TraceId, candidate: TraceId) -> bool {
        self.validate_source(consumer, candidate).is_ok()
    }

    /// Bind `source` to `variable` in `consumer`'s formula.
    ///
    /// Rejected bindings leave everything unchanged. On success the grid is
    /// rebuilt and the whole formula re-evaluated.
    pub fn add_source(&mut self, consumer: TraceId, source: TraceId, variable: &str) -> TraceResult<()> {
        self.require(consumer)?;
        self.require(source)?;
        let traces = &self.traces;
        if let Err(e) = self.graph.add_source(consumer, source, variable, |id| {
            traces.get(&id).map(Trace::output_domain)
        }) {
            debug!(%consumer, %source, error = %e, "Rejected formula source");
            return Err(e);
        }
        if let Some(t) = self.traces.get(&consumer) {
            t.invalidate_hash();
        }
        self.queue.push(TraceEvent::SourceAdded { consumer, source });
        self.refresh_formula(consumer);
        self.mark_all_dirty(consumer);
        self.schedule(consumer);
        self.dispatch();
        Ok(())
    }

    /// Unbind `source` from `consumer`. Computed samples are kept.
    pub fn remove_source(&mut self, consumer: TraceId, source: TraceId) -> bool {
        if !self.graph.remove_source(consumer, source) {
            return false;
        }
        if let Some(t) = self.traces.get(&consumer) {
            t.invalidate_hash();
        }
        self.queue.push(TraceEvent::SourceRemoved { consumer, source });
        self.dispatch();
        true
    }

    /// Bindings of `consumer`'s formula.
    pub fn sources_of(&self, consumer: TraceId) -> &[SourceBinding] {
        self.graph.sources_of(consumer)
    }

    /// Formula traces reading from `source`.
    pub fn consumers_of(&self, source: TraceId) -> Vec<TraceId> {
        self.graph.consumers_of(source)
    }

    /// Whether `trace` depends on `target`, directly or transitively.
    pub fn depends_on(&self, trace: TraceId, target: TraceId) -> bool {
        self.graph.depends_on(trace, target)
    }

    /// Check that the formula compiles and only names bound variables (or `x`).
    pub fn check_formula(&self, id: TraceId) -> TraceResult<()> {
        let trace = self.require(id)?;
        let mut variables: Vec<&str> = self
            .graph
            .sources_of(id)
            .iter()
            .map(|b| b.variable.as_str())
            .collect();
        variables.push("x");
        self.engine
            .compile_for(trace.expression(), &variables)
            .map(|_| ())
    }

    /// [`check_formula`](Self::check_formula) as a yes/no answer.
    pub fn is_formula_valid(&self, id: TraceId) -> bool {
        self.check_formula(id).is_ok()
    }

    // ---- timers and events ---------------------------------------------------

    /// Fire every debounce timer that is due. Returns how many fired.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();
        let due: Vec<TraceId> = self
            .traces
            .iter_mut()
            .filter_map(|(id, t)| t.formula_mut().take_due(now).then_some(*id))
            .collect();
        for &id in &due {
            self.evaluate(id);
        }
        self.dispatch();
        due.len()
    }

    /// Earliest armed debounce timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.traces
            .values()
            .filter_map(|t| t.formula().deadline())
            .min()
    }

    /// Evaluate all pending formula work now, ignoring the debounce interval.
    ///
    /// Paused traces keep their pending ranges.
    pub fn flush(&mut self) {
        self.dispatch();
        for _ in 0..=self.traces.len() {
            let pending: Vec<TraceId> = self
                .traces
                .values()
                .filter(|t| {
                    t.source() == Source::Math && !t.is_paused() && t.formula().pending().is_some()
                })
                .map(Trace::id)
                .collect();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                self.evaluate(id);
            }
            self.dispatch();
        }
    }

    /// Take every event delivered since the last call.
    pub fn drain_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn dispatch(&mut self) {
        self.collect_events();
        while let Some(event) = self.queue.pop() {
            match event {
                TraceEvent::DataChanged { trace, begin, end } => {
                    for consumer in self.graph.consumers_of(trace) {
                        self.source_changed(consumer, trace, begin..end);
                    }
                }
                TraceEvent::TypeChanged(trace) => {
                    for consumer in self.graph.consumers_of(trace) {
                        self.source_retyped(consumer);
                    }
                }
                _ => {}
            }
            self.outbox.push(event);
            self.collect_events();
        }
    }

    fn collect_events(&mut self) {
        for trace in self.traces.values_mut() {
            self.queue.extend(trace.take_events());
        }
    }

    // ---- formula plumbing ------------------------------------------------------

    fn source_changed(&mut self, consumer: TraceId, source: TraceId, changed: std::ops::Range<usize>) {
        if self.traces.get(&consumer).map(Trace::source) != Some(Source::Math) {
            return;
        }
        if !self.refresh_formula(consumer) {
            let dirty = match (self.traces.get(&source), self.traces.get(&consumer)) {
                (Some(src), Some(dst)) => translate_source_change(src.output(), changed, dst.samples()),
                _ => return,
            };
            if let Some(t) = self.traces.get_mut(&consumer) {
                t.formula_mut().mark_dirty(dirty);
            }
        }
        self.schedule(consumer);
    }

    /// A source changed its output domain or reference data; re-check the
    /// binding domains and re-evaluate the whole grid.
    fn source_retyped(&mut self, consumer: TraceId) {
        if self.traces.get(&consumer).map(Trace::source) != Some(Source::Math) {
            return;
        }
        if let Some(error) = self.domain_mismatch(consumer) {
            warn!(%consumer, %error, "Formula sources no longer share a domain");
            if let Some(t) = self.traces.get_mut(&consumer) {
                t.set_status(TraceStatus::Error(error.to_string()));
            }
        }
        if !self.refresh_formula(consumer) {
            self.mark_all_dirty(consumer);
        }
        self.schedule(consumer);
    }

    /// First bound source whose output domain differs from the first source's.
    fn domain_mismatch(&self, consumer: TraceId) -> Option<TraceError> {
        let mut domains = self
            .graph
            .sources_of(consumer)
            .iter()
            .filter_map(|b| self.traces.get(&b.source).map(Trace::output_domain));
        let expected = domains.next()?;
        domains
            .find(|&found| found != expected)
            .map(|found| TraceError::DomainMismatch { expected, found })
    }

    fn grid_for(&self, consumer: TraceId) -> Option<EvaluationGrid> {
        let outputs: Vec<&[Sample]> = self
            .graph
            .sources_of(consumer)
            .iter()
            .filter_map(|b| self.traces.get(&b.source).map(Trace::output))
            .collect();
        EvaluationGrid::for_sources(outputs)
    }

    /// Reconcile a formula trace's grid with its sources.
    fn refresh_formula(&mut self, consumer: TraceId) -> bool {
        if self.traces.get(&consumer).map(Trace::source) != Some(Source::Math) {
            return false;
        }
        let grid = self.grid_for(consumer);
        let Some(trace) = self.traces.get_mut(&consumer) else {
            return false;
        };
        let (formula, store) = trace.formula_parts();
        let changed = formula.update_grid(store, grid);
        if changed {
            trace.raw_replaced();
        }
        changed
    }

    fn mark_all_dirty(&mut self, id: TraceId) {
        if let Some(t) = self.traces.get_mut(&id) {
            let len = t.samples().len();
            t.formula_mut().mark_all_dirty(len);
        }
    }

    fn schedule(&mut self, id: TraceId) {
        let now = self.clock.now();
        let interval = self.options.update_interval;
        let Some(trace) = self.traces.get_mut(&id) else {
            return;
        };
        if trace.source() != Source::Math {
            return;
        }
        match trace.formula_mut().schedule(now, interval) {
            Schedule::Now => self.evaluate(id),
            Schedule::Deferred(at) => {
                debug!(%id, in_ms = at.saturating_duration_since(now).as_millis() as u64, "Formula evaluation deferred");
            }
        }
    }

    /// One evaluation pass of formula trace `id`.
    fn evaluate(&mut self, id: TraceId) {
        // take the consumer out so its sources can be borrowed alongside it
        let Some(mut trace) = self.traces.remove(&id) else {
            return;
        };
        let now = self.clock.now();
        let paused = trace.is_paused();
        let mismatch = if paused { None } else { self.domain_mismatch(id) };
        let outcome = {
            let sources: Vec<(&str, &[Sample])> = self
                .graph
                .sources_of(id)
                .iter()
                .filter_map(|b| {
                    self.traces
                        .get(&b.source)
                        .map(|s| (b.variable.as_str(), s.output()))
                })
                .collect();
            let (formula, store) = trace.formula_parts();
            match mismatch {
                Some(error) => EvaluationOutcome::Evaluated {
                    range: formula.reject(store, now),
                    error: Some(error.to_string()),
                },
                None => formula.evaluate(store, &sources, &self.engine, now, paused),
            }
        };

        match outcome {
            EvaluationOutcome::Evaluated { range, error } => {
                match error {
                    Some(message) => {
                        warn!(%id, name = trace.name(), error = %message, "Formula evaluation failed");
                        trace.set_status(TraceStatus::Error(message));
                    }
                    None => trace.set_status(TraceStatus::Ok),
                }
                trace.raw_changed(range);
            }
            EvaluationOutcome::OutOfRange { begin, end, len } => {
                let error = TraceError::OutOfRangeEvaluation { begin, end, len };
                trace.set_status(TraceStatus::Warning(error.to_string()));
            }
            EvaluationOutcome::Paused => debug!(%id, "Trace paused, keeping pending formula range"),
            EvaluationOutcome::Idle => {}
        }
        self.traces.insert(id, trace);
    }

    fn detach_sources(&mut self, id: TraceId) {
        for source in self.graph.clear_sources(id) {
            self.queue.push(TraceEvent::SourceRemoved { consumer: id, source });
        }
    }

    pub(crate) fn require(&self, id: TraceId) -> TraceResult<&Trace> {
        self.traces.get(&id).ok_or(TraceError::UnknownTrace(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transform::{TimeDomainMode, TimeDomainTransform, Window};

    fn model() -> (TraceModel, ManualClock) {
        let clock = ManualClock::new();
        let model = TraceModel::with_options(ModelOptions::default(), Arc::new(clock.clone()));
        (model, clock)
    }

    fn filled(model: &mut TraceModel, name: &str, values: &[(f64, f64)]) -> TraceId {
        let id = model.create_trace(name);
        for &(x, y) in values {
            model
                .add_data(id, Sample::real(x, y), Domain::Frequency, 50.0, None)
                .unwrap();
        }
        id
    }

    fn re(model: &TraceModel, id: TraceId) -> Vec<f64> {
        model.trace(id).unwrap().output().iter().map(|s| s.y.re).collect()
    }

    #[test]
    fn source_updates_trigger_incremental_evaluation() {
        let (mut model, clock) = model();
        let a = filled(&mut model, "A", &[(0.0, 1.0), (1.0, 2.0), (2.0, 3.0), (3.0, 4.0)]);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a + 1").unwrap();
        model.add_source(m, a, "a").unwrap();
        model.flush();
        assert_eq!(re(&model, m), vec![2.0, 3.0, 4.0, 5.0]);

        clock.advance(Duration::from_secs(1));
        model.drain_events();
        model
            .add_data(a, Sample::real(3.0, 10.0), Domain::Frequency, 50.0, None)
            .unwrap();
        assert_eq!(re(&model, m), vec![2.0, 3.0, 4.0, 11.0]);
        let events = model.drain_events();
        assert!(events.contains(&TraceEvent::DataChanged {
            trace: m,
            begin: 2,
            end: 4
        }));
    }

    #[test]
    fn debounce_defers_until_the_interval_elapsed() {
        let (mut model, clock) = model();
        let a = filled(&mut model, "A", &[(0.0, 1.0), (1.0, 1.0)]);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a").unwrap();
        model.add_source(m, a, "a").unwrap();
        model.flush();

        model
            .add_data(a, Sample::real(1.0, 5.0), Domain::Frequency, 50.0, None)
            .unwrap();
        assert_eq!(re(&model, m), vec![1.0, 1.0]);
        let deadline = model.next_deadline().unwrap();
        assert_eq!(model.poll(), 0);

        clock.advance(Duration::from_millis(100));
        assert!(clock.now() >= deadline);
        assert_eq!(model.poll(), 1);
        assert_eq!(re(&model, m), vec![1.0, 5.0]);
        assert!(model.next_deadline().is_none());
    }

    #[test]
    fn paused_formula_keeps_its_dirty_range_until_resumed() {
        let (mut model, clock) = model();
        let a = filled(&mut model, "A", &[(0.0, 1.0), (1.0, 1.0)]);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a * 2").unwrap();
        model.add_source(m, a, "a").unwrap();
        model.flush();
        assert!(model.can_be_paused(m));

        model.pause(m).unwrap();
        clock.advance(Duration::from_secs(1));
        model
            .add_data(a, Sample::real(0.0, 4.0), Domain::Frequency, 50.0, None)
            .unwrap();
        model.flush();
        assert_eq!(re(&model, m), vec![2.0, 2.0]);
        assert!(model.trace(m).unwrap().formula().pending().is_some());

        clock.advance(Duration::from_secs(1));
        model.resume(m).unwrap();
        assert_eq!(re(&model, m), vec![8.0, 2.0]);
    }

    #[test]
    fn formula_errors_mark_cells_undefined_and_recover() {
        let (mut model, _clock) = model();
        let a = filled(&mut model, "A", &[(0.0, 1.0), (1.0, 2.0)]);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.add_source(m, a, "a").unwrap();
        model.flush();
        assert!(matches!(model.trace(m).unwrap().status(), TraceStatus::Error(_)));
        assert!(model.trace(m).unwrap().output().iter().all(Sample::is_undefined));

        model.set_expression(m, "a").unwrap();
        model.flush();
        assert_eq!(model.trace(m).unwrap().status(), &TraceStatus::Ok);
        assert_eq!(re(&model, m), vec![1.0, 2.0]);
    }

    #[test]
    fn indexed_writes_into_an_empty_source_evaluate_without_panicking() {
        let (mut model, _clock) = model();
        let a = model.create_trace("A");
        model
            .add_data(a, Sample::real(3.0, 1.0), Domain::Frequency, 50.0, Some(2))
            .unwrap();
        assert!(model.trace(a).unwrap().samples().iter().all(|s| !s.x.is_nan()));

        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a").unwrap();
        model.add_source(m, a, "a").unwrap();
        model.flush();

        let out = model.trace(m).unwrap().output().to_vec();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].x, 0.0);
        assert!(out[0].is_undefined());
        assert_eq!(out[2].x, 3.0);
        assert_eq!(out[2].y.re, 1.0);
    }

    #[test]
    fn a_source_changing_domain_turns_the_formula_into_an_error() {
        let (mut model, _clock) = model();
        let points: Vec<(f64, f64)> = (1..=8).map(|i| (i as f64, i as f64)).collect();
        let a = filled(&mut model, "A", &points);
        let b = filled(&mut model, "B", &points);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a + b").unwrap();
        model.add_source(m, a, "a").unwrap();
        model.add_source(m, b, "b").unwrap();
        model.flush();
        assert_eq!(model.trace(m).unwrap().status(), &TraceStatus::Ok);

        model
            .update(b, |t| {
                t.add_transform(Box::new(TimeDomainTransform::new(
                    TimeDomainMode::Lowpass,
                    Window::Hann,
                )))
            })
            .unwrap();
        model.flush();
        let trace = model.trace(m).unwrap();
        assert!(matches!(trace.status(), TraceStatus::Error(msg) if msg.starts_with("Domain mismatch")));
        assert!(trace.output().iter().all(Sample::is_undefined));
        assert_eq!(model.sources_of(m).len(), 2);

        model.update(b, |t| t.remove_transform(1).map(|_| ())).unwrap().unwrap();
        model.flush();
        assert_eq!(model.trace(m).unwrap().status(), &TraceStatus::Ok);
        let expected: Vec<f64> = (1..=8).map(|i| 2.0 * i as f64).collect();
        assert_eq!(re(&model, m), expected);
    }

    #[test]
    fn formula_validation_checks_variable_names() {
        let (mut model, _clock) = model();
        let a = filled(&mut model, "A", &[(0.0, 1.0)]);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.add_source(m, a, "a").unwrap();
        model.set_expression(m, "a * x").unwrap();
        assert!(model.is_formula_valid(m));
        model.set_expression(m, "a * b").unwrap();
        assert!(!model.is_formula_valid(m));
        model.set_expression(m, "").unwrap();
        assert!(!model.is_formula_valid(m));
    }

    #[test]
    fn switching_to_live_drops_sources() {
        let (mut model, _clock) = model();
        let a = filled(&mut model, "A", &[(0.0, 1.0)]);
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.add_source(m, a, "a").unwrap();
        model
            .set_live(m, MergePolicy::Overwrite, LiveParameter::S21)
            .unwrap();
        assert!(model.sources_of(m).is_empty());
        assert!(model.consumers_of(a).is_empty());
        assert!(model
            .drain_events()
            .contains(&TraceEvent::SourceRemoved { consumer: m, source: a }));
    }

    #[test]
    fn file_traces_cannot_be_paused() {
        let (mut model, _clock) = model();
        let table = ColumnTable::new(
            "t.csv",
            vec!["Frequency".into(), "S21_Real".into()],
            vec![vec![1.0, 2.0], vec![0.5, 0.6]],
        )
        .unwrap();
        let ids = model.create_from_table(&table).unwrap();
        assert_eq!(ids.len(), 1);
        let t = model.trace(ids[0]).unwrap();
        assert_eq!(t.name(), "S21");
        assert_eq!(t.source(), Source::File);
        assert_eq!(t.len(), 2);
        assert!(!model.can_be_paused(ids[0]));
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let (mut model, _clock) = model();
        let a = model.create_trace("A");
        model.delete(a).unwrap();
        assert!(matches!(model.delete(a), Err(TraceError::UnknownTrace(_))));
        assert!(matches!(
            model.add_data(a, Sample::real(0.0, 0.0), Domain::Frequency, 50.0, None),
            Err(TraceError::UnknownTrace(_))
        ));
    }
}
