//! A single measurement trace.
//!
//! A [`Trace`] owns its raw [`SampleStore`], its [`TransformChain`] and, for
//! math traces, its [`FormulaState`]. Everything that concerns other traces
//! (formula sources, pausing through dependencies, identity hashes of
//! sources) lives in [`TraceModel`](crate::model::TraceModel).
//!
//! Mutations queue [`TraceEvent`]s inside the trace; the model collects and
//! dispatches them after every operation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::events::TraceEvent;
use crate::formula::FormulaState;
use crate::import::{ColumnTable, NetworkParameterData};
use crate::interpolation;
use crate::sample::{undefined, Domain, LiveParameter, MergePolicy, Sample, Source};
use crate::store::SampleStore;
use crate::transform::{Transform, TransformChain};

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Velocity factor of new traces.
pub const DEFAULT_VELOCITY_FACTOR: f64 = 0.66;

/// Reference impedance of new traces, ohms.
pub const DEFAULT_REFERENCE_IMPEDANCE: f64 = 50.0;

/// Color of new traces.
pub const DEFAULT_COLOR: &str = "#ffff00";

/// Stable handle of a trace inside a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(pub u32);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Health of a trace's data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TraceStatus {
    /// Data is valid.
    #[default]
    Ok,
    /// Usable but noteworthy (e.g. no data yet).
    Warning(String),
    /// Data could not be produced (e.g. formula failure).
    Error(String),
}

/// Named, colored series of samples with a source and a transform chain.
pub struct Trace {
    id: TraceId,
    name: String,
    color: String,
    visible: bool,
    domain: Domain,
    source: Source,
    merge_policy: MergePolicy,
    live_parameter: LiveParameter,
    file_name: String,
    file_parameter: usize,
    reference_impedance: f64,
    reflection: bool,
    velocity_factor: f64,
    paused: bool,
    store: SampleStore,
    chain: TransformChain,
    formula: FormulaState,
    status: TraceStatus,
    hash: Cell<Option<u64>>,
    // source hashes the cached hash was computed from
    hash_inputs: RefCell<Vec<u64>>,
    events: Vec<TraceEvent>,
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("domain", &self.domain)
            .field("samples", &self.store.len())
            .field("transforms", &(self.chain.len() - 1))
            .field("paused", &self.paused)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Trace {
    /// Empty live trace.
    pub fn new(id: TraceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: DEFAULT_COLOR.to_string(),
            visible: true,
            domain: Domain::Frequency,
            source: Source::Live,
            merge_policy: MergePolicy::Overwrite,
            live_parameter: LiveParameter::S11,
            file_name: String::new(),
            file_parameter: 0,
            reference_impedance: DEFAULT_REFERENCE_IMPEDANCE,
            reflection: true,
            velocity_factor: DEFAULT_VELOCITY_FACTOR,
            paused: false,
            store: SampleStore::new(),
            chain: TransformChain::new(),
            formula: FormulaState::default(),
            status: TraceStatus::Ok,
            hash: Cell::new(None),
            hash_inputs: RefCell::new(Vec::new()),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.invalidate_hash();
    }

    /// Display color as `#rrggbb`.
    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
        self.invalidate_hash();
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.invalidate_hash();
        }
    }

    /// Domain of the raw samples.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Domain of the chain output.
    pub fn output_domain(&self) -> Domain {
        self.chain.output_domain(self.domain)
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn set_merge_policy(&mut self, policy: MergePolicy) {
        self.merge_policy = policy;
        self.invalidate_hash();
    }

    pub fn live_parameter(&self) -> LiveParameter {
        self.live_parameter
    }

    /// File the data was imported from (file traces only).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Trace group or parameter index inside the file.
    pub fn file_parameter(&self) -> usize {
        self.file_parameter
    }

    pub fn reference_impedance(&self) -> f64 {
        self.reference_impedance
    }

    pub fn is_reflection(&self) -> bool {
        self.reflection
    }

    pub fn set_reflection(&mut self, reflection: bool) {
        self.reflection = reflection;
        self.invalidate_hash();
    }

    pub fn velocity_factor(&self) -> f64 {
        self.velocity_factor
    }

    pub fn set_velocity_factor(&mut self, velocity_factor: f64) {
        self.velocity_factor = velocity_factor;
        self.invalidate_hash();
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn status(&self) -> &TraceStatus {
        &self.status
    }

    /// Formula text of a math trace.
    pub fn expression(&self) -> &str {
        self.formula.expression()
    }

    /// Formula bookkeeping (grid, pending range, timer).
    pub fn formula(&self) -> &FormulaState {
        &self.formula
    }

    /// Raw samples, before any transform.
    pub fn samples(&self) -> &[Sample] {
        self.store.as_slice()
    }

    /// Output of the last active transform.
    pub fn output(&self) -> &[Sample] {
        self.chain.output(self.store.as_slice())
    }

    /// Number of output samples.
    pub fn len(&self) -> usize {
        self.chain.sample_count(self.store.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Output sample at `index`.
    pub fn sample(&self, index: usize) -> Option<Sample> {
        self.chain.sample_at(self.store.as_slice(), index)
    }

    /// Output interpolated at `x`, saturating at the edges.
    pub fn interpolated_sample(&self, x: f64) -> Sample {
        self.chain.interpolated_at(self.store.as_slice(), x)
    }

    /// Index of the first output sample at or after `x` (last index beyond the end).
    pub fn index_of(&self, x: f64) -> usize {
        interpolation::index_for_coordinate(self.output(), x)
    }

    pub fn min_x(&self) -> Option<f64> {
        self.output().first().map(|s| s.x)
    }

    pub fn max_x(&self) -> Option<f64> {
        self.output().last().map(|s| s.x)
    }

    /// Coordinate of the largest (`max`) or smallest magnitude.
    pub fn find_extremum(&self, max: bool) -> Option<f64> {
        let magnitude = |s: &&Sample| s.y.norm();
        let best = if max {
            self.output()
                .iter()
                .max_by(|a, b| magnitude(a).total_cmp(&magnitude(b)))
        } else {
            self.output()
                .iter()
                .min_by(|a, b| magnitude(a).total_cmp(&magnitude(b)))
        };
        best.map(|s| s.x)
    }

    /// Coordinates of up to `max_peaks` peaks, ascending.
    ///
    /// A peak must reach `min_level_db` and be separated from its surroundings
    /// by valleys at least `min_valley_db` deep. When more peaks qualify, the
    /// highest ones are kept. Only frequency-domain output has peaks.
    pub fn find_peaks(&self, max_peaks: usize, min_level_db: f64, min_valley_db: f64) -> Vec<f64> {
        if self.output_domain() != Domain::Frequency {
            return Vec::new();
        }
        let mut peaks: Vec<(f64, f64)> = Vec::new();
        let mut candidate: Option<f64> = None;
        let mut max_db = -200.0;
        let mut min_db = 200.0;
        for s in self.output() {
            let db = 20.0 * s.y.norm().log10();
            if db >= max_db && min_db <= db - min_valley_db {
                candidate = Some(s.x);
                max_db = db;
            }
            if db <= min_db {
                min_db = db;
            }
            if let Some(x) = candidate {
                if db <= max_db - min_valley_db && max_db >= min_level_db {
                    peaks.push((x, max_db));
                    candidate = None;
                    max_db = -200.0;
                    min_db = db;
                }
            }
        }
        if peaks.len() > max_peaks {
            peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
            peaks.truncate(max_peaks);
            peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        peaks.into_iter().map(|(x, _)| x).collect()
    }

    /// Propagation time to distance, halved for reflections.
    pub fn time_to_distance(&self, time: f64) -> f64 {
        let distance = time * SPEED_OF_LIGHT * self.velocity_factor;
        if self.reflection {
            distance / 2.0
        } else {
            distance
        }
    }

    /// Inverse of [`time_to_distance`](Self::time_to_distance).
    pub fn distance_to_time(&self, distance: f64) -> f64 {
        let time = distance / (SPEED_OF_LIGHT * self.velocity_factor);
        if self.reflection {
            time * 2.0
        } else {
            time
        }
    }

    /// Write one acquired sample.
    ///
    /// A different `domain` clears the trace first. Writes to a paused live
    /// trace are dropped; the return value tells whether the write happened.
    pub fn add_data(
        &mut self,
        sample: Sample,
        domain: Domain,
        reference_impedance: f64,
        index: Option<usize>,
    ) -> bool {
        if self.paused && self.source == Source::Live {
            return false;
        }
        if self.domain != domain {
            self.clear(true);
            self.domain = domain;
            self.emit(TraceEvent::TypeChanged(self.id));
        }
        let policy = if self.source == Source::Live {
            self.merge_policy
        } else {
            MergePolicy::Overwrite
        };
        let range = self.store.upsert(sample, index, policy);
        if self.reference_impedance != reference_impedance {
            self.reference_impedance = reference_impedance;
            self.emit(TraceEvent::TypeChanged(self.id));
        }
        self.set_status(TraceStatus::Ok);
        if !range.is_empty() {
            self.raw_changed(range);
        }
        true
    }

    /// Remove all samples. Ignored while paused unless `force` is set.
    pub fn clear(&mut self, force: bool) {
        if self.paused && !force {
            return;
        }
        self.store.clear();
        self.set_status(TraceStatus::Warning("No data".to_string()));
        self.emit(TraceEvent::Cleared(self.id));
        self.raw_replaced();
    }

    /// Mark as calibration data, which is never persisted.
    pub fn set_calibration(&mut self) {
        self.source = Source::Calibration;
        self.invalidate_hash();
        self.emit(TraceEvent::TypeChanged(self.id));
    }

    pub(crate) fn set_live(&mut self, policy: MergePolicy, parameter: LiveParameter) {
        self.source = Source::Live;
        self.merge_policy = policy;
        self.live_parameter = parameter;
        self.reflection = parameter.is_reflection();
        self.formula.cancel_timer();
        self.invalidate_hash();
        self.emit(TraceEvent::TypeChanged(self.id));
    }

    pub(crate) fn set_math(&mut self) {
        let expression = self.formula.expression().to_string();
        self.formula = FormulaState::default();
        self.formula.set_expression(&expression);
        self.source = Source::Math;
        self.clear(true);
        self.emit(TraceEvent::TypeChanged(self.id));
    }

    pub(crate) fn set_expression(&mut self, expression: &str) {
        self.formula.set_expression(expression);
        self.invalidate_hash();
    }

    pub(crate) fn set_reference_impedance(&mut self, reference_impedance: f64) {
        self.reference_impedance = reference_impedance;
    }

    /// Record the file a trace was imported from without loading its data.
    pub(crate) fn set_file_origin(&mut self, filename: &str, parameter: usize) {
        self.file_name = filename.to_string();
        self.file_parameter = parameter;
        self.source = Source::File;
        self.paused = false;
        self.formula.cancel_timer();
        self.invalidate_hash();
        self.emit(TraceEvent::TypeChanged(self.id));
    }

    pub(crate) fn set_paused_flag(&mut self, paused: bool) -> bool {
        if self.paused == paused {
            return false;
        }
        self.paused = paused;
        self.invalidate_hash();
        self.emit(TraceEvent::PauseChanged(self.id));
        true
    }

    /// Replace the samples with trace group `parameter` of a column table.
    ///
    /// Returns the group's name.
    pub(crate) fn fill_from_table(
        &mut self,
        table: &ColumnTable,
        parameter: usize,
    ) -> TraceResult<String> {
        let (name, rows) = table.trace_rows(parameter)?;
        self.store.clear();
        self.domain = table.domain();
        for (x, y) in rows {
            self.store
                .upsert(Sample::new(x, y), None, MergePolicy::Overwrite);
        }
        self.file_name = table.filename().to_string();
        self.file_parameter = parameter;
        self.reflection = false;
        self.become_file();
        Ok(name)
    }

    /// Replace the samples with one parameter of network-parameter data.
    pub(crate) fn fill_from_network(
        &mut self,
        data: &NetworkParameterData,
        parameter: usize,
    ) -> TraceResult<()> {
        if parameter >= data.parameter_count() {
            return Err(TraceError::Import(format!(
                "Parameter {parameter} out of range for {} ports",
                data.ports
            )));
        }
        self.store.clear();
        self.domain = Domain::Frequency;
        for point in &data.points {
            let y = point.parameters.get(parameter).copied().unwrap_or_else(undefined);
            self.store
                .upsert(Sample::new(point.frequency, y), None, MergePolicy::Overwrite);
        }
        self.file_name = data.filename.clone();
        self.file_parameter = parameter;
        self.reflection = data.is_reflection(parameter);
        self.reference_impedance = data.reference_impedance;
        self.become_file();
        Ok(())
    }

    fn become_file(&mut self) {
        self.source = Source::File;
        self.paused = false;
        self.formula.cancel_timer();
        self.invalidate_hash();
        self.set_status(TraceStatus::Ok);
        self.emit(TraceEvent::TypeChanged(self.id));
        self.raw_replaced();
    }

    /// Transform chain (read-only).
    pub fn transforms(&self) -> &TransformChain {
        &self.chain
    }

    /// Append a transform at the end of the chain.
    pub fn add_transform(&mut self, transform: Box<dyn Transform>) {
        let before = self.chain_state();
        self.chain.append(transform);
        self.chain_changed(before);
    }

    /// Remove transform `index` (1-based; 0 is the raw data).
    pub fn remove_transform(&mut self, index: usize) -> TraceResult<Box<dyn Transform>> {
        let before = self.chain_state();
        let removed = self.chain.remove(index)?;
        self.chain_changed(before);
        Ok(removed)
    }

    /// Enable or disable transform `index`.
    pub fn set_transform_enabled(&mut self, index: usize, enabled: bool) -> TraceResult<()> {
        let before = self.chain_state();
        self.chain.set_enabled(index, enabled)?;
        self.chain_changed(before);
        Ok(())
    }

    /// Exchange transforms `index` and `index + 1`.
    pub fn swap_transforms(&mut self, index: usize) -> TraceResult<()> {
        let before = self.chain_state();
        self.chain.swap(index)?;
        self.chain_changed(before);
        Ok(())
    }

    /// Switch the whole chain on or off.
    pub fn set_transforms_enabled(&mut self, enabled: bool) {
        let before = self.chain_state();
        self.chain.set_transforms_enabled(enabled);
        self.chain_changed(before);
    }

    /// Load new settings into transform `index`.
    pub fn update_transform_settings(
        &mut self,
        index: usize,
        settings: &serde_json::Value,
    ) -> TraceResult<()> {
        let before = self.chain_state();
        self.chain
            .transform_mut(index)
            .ok_or(TraceError::InvalidTransformIndex(index))?
            .load_settings(settings)?;
        self.chain_changed(before);
        Ok(())
    }

    fn chain_state(&self) -> (usize, Domain) {
        (self.chain.last_active(), self.output_domain())
    }

    fn chain_changed(&mut self, before: (usize, Domain)) {
        let changed = self
            .chain
            .propagate(self.store.as_slice(), self.domain, None);
        self.invalidate_hash();
        if self.chain_state() != before {
            self.emit(TraceEvent::TypeChanged(self.id));
            self.emit_data_changed(0..self.len());
        } else if let Some(range) = changed {
            self.emit_data_changed(range);
        }
    }

    /// Push a change of raw indices `range` through the chain.
    pub(crate) fn raw_changed(&mut self, range: Range<usize>) {
        if let Some(out) = self
            .chain
            .propagate(self.store.as_slice(), self.domain, Some(range))
        {
            self.emit_data_changed(out);
        }
    }

    /// Recompute the whole chain after the raw samples were replaced.
    pub(crate) fn raw_replaced(&mut self) {
        self.chain.invalidate();
        let len = self.store.len();
        self.raw_changed(0..len);
    }

    /// Store and formula state together, for the evaluation pass.
    pub(crate) fn formula_parts(&mut self) -> (&mut FormulaState, &mut SampleStore) {
        (&mut self.formula, &mut self.store)
    }

    pub(crate) fn formula_mut(&mut self) -> &mut FormulaState {
        &mut self.formula
    }

    pub(crate) fn set_status(&mut self, status: TraceStatus) {
        if self.status != status {
            self.status = status;
            self.emit(TraceEvent::StatusChanged(self.id));
        }
    }

    /// Cached identity hash, if computed or loaded.
    pub fn cached_hash(&self) -> Option<u64> {
        self.hash.get()
    }

    /// Cached hash, provided it was computed from the same source hashes.
    pub(crate) fn cached_hash_for(&self, inputs: &[u64]) -> Option<u64> {
        let hash = self.hash.get()?;
        (self.hash_inputs.borrow().as_slice() == inputs).then_some(hash)
    }

    pub(crate) fn cache_hash(&self, hash: u64, inputs: Vec<u64>) {
        self.hash.set(Some(hash));
        *self.hash_inputs.borrow_mut() = inputs;
    }

    pub(crate) fn invalidate_hash(&self) {
        self.hash.set(None);
    }

    fn emit_data_changed(&mut self, range: Range<usize>) {
        self.emit(TraceEvent::DataChanged {
            trace: self.id,
            begin: range.start,
            end: range.end,
        });
    }

    fn emit(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub(crate) fn take_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }
}
