//! Formula evaluation state of a math trace.
//!
//! A math trace computes its own samples on a fixed grid derived from its
//! sources. This module holds the per-trace bookkeeping: the expression text,
//! the grid, the pending dirty index range and the debounce timer, plus the
//! evaluation pass itself. The model supplies the source outputs; the state
//! never touches other traces.

use std::ops::Range;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::expression::{Bindings, ExpressionEngine};
use crate::interpolation::{index_for_coordinate, interpolated_value};
use crate::sample::{undefined, Sample};
use crate::store::SampleStore;

/// Evaluation grid shared by all sources of a formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationGrid {
    /// First coordinate.
    pub start: f64,
    /// Last coordinate of the source intersection.
    pub stop: f64,
    /// Coordinate spacing.
    pub step: f64,
    /// Number of grid cells.
    pub count: usize,
}

impl EvaluationGrid {
    /// Grid over the intersection of `sources`' coordinate ranges.
    ///
    /// The step is the finest average step of the sources. Returns `None`
    /// without sources; a grid of zero cells when a source is empty or the
    /// ranges do not overlap.
    pub fn for_sources<'a>(sources: impl IntoIterator<Item = &'a [Sample]>) -> Option<Self> {
        let mut start = f64::NEG_INFINITY;
        let mut stop = f64::INFINITY;
        let mut step = f64::INFINITY;
        let mut any = false;
        let mut empty = false;
        for samples in sources {
            any = true;
            let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
                empty = true;
                continue;
            };
            start = start.max(first.x);
            stop = stop.min(last.x);
            if samples.len() > 1 {
                step = step.min((last.x - first.x) / (samples.len() - 1) as f64);
            }
        }
        if !any {
            return None;
        }
        let count = if empty || !(start.is_finite() && stop.is_finite()) || stop < start {
            0
        } else if !(step.is_finite() && step > 0.0) {
            1
        } else {
            ((stop - start) / step).round() as usize + 1
        };
        Some(Self {
            start,
            stop,
            step,
            count,
        })
    }

    /// Coordinate of cell `index`.
    pub fn coordinate(&self, index: usize) -> f64 {
        if index == 0 || !self.step.is_finite() {
            self.start
        } else {
            self.start + index as f64 * self.step
        }
    }
}

/// Result of [`FormulaState::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Debounce interval elapsed; evaluate now.
    Now,
    /// A timer fires at the given instant.
    Deferred(Instant),
}

/// What an evaluation pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Trace is paused; the dirty range is kept.
    Paused,
    /// Nothing was dirty.
    Idle,
    /// Dirty range did not fit the grid and was dropped.
    OutOfRange {
        /// First requested index.
        begin: usize,
        /// One past the last requested index.
        end: usize,
        /// Grid size.
        len: usize,
    },
    /// Cells in `range` were written.
    Evaluated {
        /// Evaluated cells.
        range: Range<usize>,
        /// Set when the expression failed and the cells are undefined.
        error: Option<String>,
    },
}

/// Expression, grid and pending work of one formula trace.
#[derive(Debug, Clone)]
pub struct FormulaState {
    expression: String,
    grid: Option<EvaluationGrid>,
    update_begin: usize,
    update_end: usize,
    last_evaluation: Option<Instant>,
    deadline: Option<Instant>,
}

impl Default for FormulaState {
    fn default() -> Self {
        Self {
            expression: String::new(),
            grid: None,
            update_begin: usize::MAX,
            update_end: 0,
            last_evaluation: None,
            deadline: None,
        }
    }
}

impl FormulaState {
    /// Expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Replace the expression text.
    pub fn set_expression(&mut self, expression: &str) {
        self.expression = expression.to_string();
    }

    /// Current grid, `None` without sources.
    pub fn grid(&self) -> Option<EvaluationGrid> {
        self.grid
    }

    /// Pending dirty range, if any.
    pub fn pending(&self) -> Option<Range<usize>> {
        (self.update_begin < self.update_end).then_some(self.update_begin..self.update_end)
    }

    /// Armed debounce deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Widen the dirty range to include `range`.
    pub fn mark_dirty(&mut self, range: Range<usize>) {
        if range.start >= range.end {
            return;
        }
        self.update_begin = self.update_begin.min(range.start);
        self.update_end = self.update_end.max(range.end);
    }

    /// Mark all `len` cells dirty, discarding ranges of an older grid.
    pub fn mark_all_dirty(&mut self, len: usize) {
        self.reset_dirty();
        self.mark_dirty(0..len);
    }

    fn reset_dirty(&mut self) {
        self.update_begin = usize::MAX;
        self.update_end = 0;
    }

    /// Reconcile `store` with `grid`. Returns whether the grid changed.
    ///
    /// Any change of start, step or size resizes the store (keeping values at
    /// coordinates that still exist) and marks the whole grid dirty.
    pub fn update_grid(&mut self, store: &mut SampleStore, grid: Option<EvaluationGrid>) -> bool {
        let count = grid.map_or(0, |g| g.count);
        let unchanged = self.grid == grid && store.len() == count;
        if unchanged {
            return false;
        }
        debug!(?grid, "Formula grid changed");
        match grid {
            Some(g) => store.resize_to(g.count, |i| g.coordinate(i)),
            None => store.resize_to(0, |_| 0.0),
        }
        self.grid = grid;
        self.mark_all_dirty(count);
        true
    }

    /// Debounce an evaluation request at `now`.
    ///
    /// Evaluates immediately on the first request and whenever `interval`
    /// elapsed since the last pass; otherwise arms a single timer. An armed
    /// timer is never postponed.
    pub fn schedule(&mut self, now: Instant, interval: Duration) -> Schedule {
        match self.last_evaluation {
            Some(last) if now.duration_since(last) < interval => {
                let deadline = *self.deadline.get_or_insert(last + interval);
                Schedule::Deferred(deadline)
            }
            _ => Schedule::Now,
        }
    }

    /// Disarm the timer if it is due at `now`. Returns whether it fired.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Disarm the timer.
    pub fn cancel_timer(&mut self) {
        self.deadline = None;
    }

    /// Run one evaluation pass over the dirty range.
    ///
    /// `sources` pairs every bound variable with the source's output. The
    /// coordinate is bound as `x`.
    pub fn evaluate(
        &mut self,
        store: &mut SampleStore,
        sources: &[(&str, &[Sample])],
        engine: &ExpressionEngine,
        now: Instant,
        paused: bool,
    ) -> EvaluationOutcome {
        if paused {
            return EvaluationOutcome::Paused;
        }
        self.last_evaluation = Some(now);
        self.deadline = None;
        let Some(range) = self.pending() else {
            return EvaluationOutcome::Idle;
        };
        let len = store.len();
        if range.start >= len || range.end > len {
            warn!(
                begin = range.start,
                end = range.end,
                len,
                "Not evaluating formula, range out of limits"
            );
            self.reset_dirty();
            return EvaluationOutcome::OutOfRange {
                begin: range.start,
                end: range.end,
                len,
            };
        }

        let error = match self.evaluate_range(store, sources, engine, range.clone()) {
            Ok(()) => None,
            Err(message) => {
                for i in range.clone() {
                    store.set_value(i, undefined());
                }
                Some(message)
            }
        };
        self.reset_dirty();
        EvaluationOutcome::Evaluated { range, error }
    }

    /// Fill every cell with the undefined sentinel instead of evaluating,
    /// consuming the pending range. Returns the written range.
    pub fn reject(&mut self, store: &mut SampleStore, now: Instant) -> Range<usize> {
        self.last_evaluation = Some(now);
        self.deadline = None;
        self.reset_dirty();
        for i in 0..store.len() {
            store.set_value(i, undefined());
        }
        0..store.len()
    }

    fn evaluate_range(
        &self,
        store: &mut SampleStore,
        sources: &[(&str, &[Sample])],
        engine: &ExpressionEngine,
        range: Range<usize>,
    ) -> Result<(), String> {
        if self.expression.trim().is_empty() {
            return Err("Expression is empty".to_string());
        }
        let compiled = engine.compile(&self.expression).map_err(|e| e.to_string())?;
        let mut bindings = Bindings::new();
        let mut values = Vec::with_capacity(range.len());
        for i in range.clone() {
            let Some(x) = store.get(i).map(|s| s.x) else {
                continue;
            };
            bindings.set_real("x", x);
            for (variable, samples) in sources {
                bindings.set(variable, interpolated_value(samples, x));
            }
            values.push(engine.evaluate(&compiled, &mut bindings).map_err(|e| e.to_string())?);
        }
        // no partial results on failure
        for (i, y) in range.zip(values) {
            store.set_value(i, y);
        }
        Ok(())
    }
}

/// Translate a source change into a dirty range of the consumer grid.
///
/// The changed source indices are widened by one neighbour on each side, since
/// interpolation between them changes too, then mapped to the consumer cells
/// bracketing their coordinates. An empty change or an empty source means the
/// whole grid.
pub fn translate_source_change(
    source: &[Sample],
    changed: Range<usize>,
    consumer: &[Sample],
) -> Range<usize> {
    if consumer.is_empty() {
        return 0..0;
    }
    if changed.start >= changed.end || source.is_empty() {
        return 0..consumer.len();
    }
    let last = source.len() - 1;
    let begin = changed.start.saturating_sub(1).min(last);
    let end = changed.end.min(last);
    let i0 = index_for_coordinate(consumer, source[begin].x);
    let i1 = index_for_coordinate(consumer, source[end].x);
    i0..(i1 + 1).min(consumer.len())
}
