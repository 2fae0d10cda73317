//! Ordered, individually switchable transform nodes over a raw sample store.
//!
//! Nodes live in an index arena. Node 0 is the identity node standing for the
//! trace's own samples; it is always enabled and can never be removed. Every
//! other enabled node caches the index of the node it reads from (its nearest
//! enabled predecessor). Toggling a node rewires only its enabled neighbours,
//! and removal shifts the cached indices above the removed slot.
//!
//! The chain does not own the raw samples. Callers pass them to
//! [`TransformChain::propagate`] and [`TransformChain::output`].

use std::ops::Range;

use tracing::warn;

use crate::error::{TraceError, TraceResult};
use crate::interpolation;
use crate::sample::{Domain, Sample};
use crate::transform::Transform;

struct ChainNode {
    transform: Option<Box<dyn Transform>>,
    enabled: bool,
    input: Option<usize>,
    output: Vec<Sample>,
    domain: Domain,
    stale: bool,
}

impl ChainNode {
    fn identity() -> Self {
        Self {
            transform: None,
            enabled: true,
            input: None,
            output: Vec::new(),
            domain: Domain::default(),
            stale: false,
        }
    }
}

/// Transform pipeline of one trace.
pub struct TransformChain {
    nodes: Vec<ChainNode>,
    last_active: usize,
    bypassed: bool,
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformChain {
    /// Chain holding only the identity node.
    pub fn new() -> Self {
        Self {
            nodes: vec![ChainNode::identity()],
            last_active: 0,
            bypassed: false,
        }
    }

    /// Number of nodes including the identity node.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the chain holds no transforms besides the identity node.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Transform at `index` (`None` for the identity node or out of range).
    pub fn transform(&self, index: usize) -> Option<&dyn Transform> {
        self.nodes.get(index)?.transform.as_deref()
    }

    /// Mutable transform at `index`. Marks the node for recomputation.
    pub fn transform_mut(&mut self, index: usize) -> Option<&mut (dyn Transform + 'static)> {
        let node = self.nodes.get_mut(index)?;
        node.stale = true;
        node.transform.as_deref_mut()
    }

    /// Whether node `index` is enabled.
    pub fn is_enabled(&self, index: usize) -> bool {
        self.nodes.get(index).is_some_and(|n| n.enabled)
    }

    /// Index of the node `index` reads from, if it is enabled.
    pub fn input_of(&self, index: usize) -> Option<usize> {
        self.nodes.get(index).and_then(|n| n.input)
    }

    /// Node whose output the chain exposes.
    pub fn last_active(&self) -> usize {
        self.last_active
    }

    /// Whether transforms are applied at all.
    ///
    /// This is the chain-wide switch, independent of the per-node flags.
    pub fn transforms_enabled(&self) -> bool {
        !self.bypassed
    }

    /// Switch all transforms on or off without touching per-node flags.
    pub fn set_transforms_enabled(&mut self, enabled: bool) {
        self.bypassed = !enabled;
        self.update_last_active();
    }

    /// Add `transform` at the tail, reading from the current last enabled node.
    pub fn append(&mut self, transform: Box<dyn Transform>) {
        let input = self.last_enabled_node();
        self.nodes.push(ChainNode {
            transform: Some(transform),
            enabled: true,
            input: Some(input),
            output: Vec::new(),
            domain: Domain::default(),
            stale: true,
        });
        self.update_last_active();
    }

    /// Delete node `index`, returning its transform.
    pub fn remove(&mut self, index: usize) -> TraceResult<Box<dyn Transform>> {
        self.check_index(index)?;
        if self.nodes[index].enabled {
            self.set_enabled(index, false)?;
        }
        let node = self.nodes.remove(index);
        for n in &mut self.nodes {
            if let Some(input) = n.input.as_mut() {
                if *input > index {
                    *input -= 1;
                }
            }
        }
        self.update_last_active();
        node.transform
            .ok_or(TraceError::InvalidTransformIndex(index))
    }

    /// Enable or disable node `index`, rewiring its enabled neighbours.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> TraceResult<()> {
        self.check_index(index)?;
        if self.nodes[index].enabled == enabled {
            return Ok(());
        }
        let prev = (0..index)
            .rev()
            .find(|&i| self.nodes[i].enabled)
            .unwrap_or(0);
        let next = (index + 1..self.nodes.len()).find(|&i| self.nodes[i].enabled);

        if enabled {
            let node = &mut self.nodes[index];
            node.input = Some(prev);
            node.stale = true;
            if let Some(next) = next {
                self.nodes[next].input = Some(index);
                self.nodes[next].stale = true;
            }
        } else {
            if let Some(next) = next {
                self.nodes[next].input = Some(prev);
                self.nodes[next].stale = true;
            }
            let node = &mut self.nodes[index];
            node.input = None;
            node.output.clear();
        }
        self.nodes[index].enabled = enabled;
        self.update_last_active();
        Ok(())
    }

    /// Exchange nodes `index` and `index + 1`, keeping each node's enabled flag.
    pub fn swap(&mut self, index: usize) -> TraceResult<()> {
        self.check_index(index)?;
        self.check_index(index + 1)?;
        let first = self.nodes[index].enabled;
        let second = self.nodes[index + 1].enabled;
        self.set_enabled(index, false)?;
        self.set_enabled(index + 1, false)?;
        self.nodes.swap(index, index + 1);
        // the node now at `index` was the second one
        self.set_enabled(index, second)?;
        self.set_enabled(index + 1, first)?;
        Ok(())
    }

    /// Mark every transform for full recomputation.
    pub fn invalidate(&mut self) {
        for node in self.nodes.iter_mut().skip(1) {
            node.stale = true;
        }
    }

    /// Push a change of `raw` through every enabled node.
    ///
    /// `changed` is the modified raw index range, or `None` when only stale
    /// nodes need work. Returns the changed range of the chain's output, or
    /// `None` when the output did not change.
    pub fn propagate(
        &mut self,
        raw: &[Sample],
        raw_domain: Domain,
        changed: Option<Range<usize>>,
    ) -> Option<Range<usize>> {
        let mut ranges: Vec<Option<Range<usize>>> = vec![None; self.nodes.len()];
        ranges[0] = changed;
        self.nodes[0].domain = raw_domain;

        for i in 1..self.nodes.len() {
            let (head, tail) = self.nodes.split_at_mut(i);
            let node = &mut tail[0];
            let (Some(input), true) = (node.input, node.enabled) else {
                continue;
            };
            let (input_samples, input_domain) = if input == 0 {
                (raw, raw_domain)
            } else {
                (head[input].output.as_slice(), head[input].domain)
            };
            let Some(transform) = node.transform.as_mut() else {
                continue;
            };

            let result = if node.stale {
                transform.apply(input_samples, input_domain).map(|out| {
                    node.output = out;
                    0..node.output.len()
                })
            } else if let Some(range) = ranges[input].clone() {
                transform.apply_range(input_samples, input_domain, &mut node.output, range)
            } else {
                continue;
            };

            node.domain = transform.output_domain(input_domain);
            node.stale = false;
            ranges[i] = Some(match result {
                Ok(range) => range,
                Err(e) => {
                    warn!(transform = transform.kind(), error = %e, "Transform failed");
                    node.output.clear();
                    0..0
                }
            });
        }
        ranges[self.last_active].clone()
    }

    /// Chain output given the raw samples.
    pub fn output<'a>(&'a self, raw: &'a [Sample]) -> &'a [Sample] {
        if self.last_active == 0 {
            raw
        } else {
            &self.nodes[self.last_active].output
        }
    }

    /// Domain of the chain output for raw samples of `raw_domain`.
    pub fn output_domain(&self, raw_domain: Domain) -> Domain {
        if self.last_active == 0 {
            raw_domain
        } else {
            self.nodes[self.last_active].domain
        }
    }

    /// Number of output samples.
    pub fn sample_count(&self, raw: &[Sample]) -> usize {
        self.output(raw).len()
    }

    /// Output sample at `index`.
    pub fn sample_at(&self, raw: &[Sample], index: usize) -> Option<Sample> {
        self.output(raw).get(index).copied()
    }

    /// Output interpolated at `x`.
    pub fn interpolated_at(&self, raw: &[Sample], x: f64) -> Sample {
        interpolation::interpolated_sample(self.output(raw), x)
    }

    /// Iterate over `(index, transform, enabled)` of the non-identity nodes.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn Transform, bool)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.transform.as_deref().map(|t| (i, t, n.enabled)))
    }

    fn check_index(&self, index: usize) -> TraceResult<()> {
        if index == 0 || index >= self.nodes.len() {
            return Err(TraceError::InvalidTransformIndex(index));
        }
        Ok(())
    }

    fn last_enabled_node(&self) -> usize {
        self.nodes
            .iter()
            .rposition(|n| n.enabled)
            .unwrap_or(0)
    }

    fn update_last_active(&mut self) {
        self.last_active = if self.bypassed {
            0
        } else {
            self.last_enabled_node()
        };
    }
}
