//! Coordinate-sorted sample container of a single trace.

use std::ops::Range;

use num_complex::Complex64;

use crate::sample::{MergePolicy, Sample};

/// Ordered, duplicate-free samples of one trace.
///
/// Writes without an explicit index keep the samples strictly sorted by
/// coordinate. Indexed writes are reserved for fixed-grid math output, where
/// the caller owns the ordering.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    samples: Vec<Sample>,
}

impl SampleStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a sample and return the half-open index range that changed.
    ///
    /// With `index`, the sample is written at that position, growing the store
    /// with undefined cells if needed. Gap cells repeat the coordinate of the
    /// last existing sample (0 in an empty store). Without it, the position is found by
    /// coordinate: a new coordinate is inserted in order, an existing one is
    /// resolved with `policy`. The returned range is empty when the policy kept
    /// the old sample.
    pub fn upsert(
        &mut self,
        sample: Sample,
        index: Option<usize>,
        policy: MergePolicy,
    ) -> Range<usize> {
        if let Some(index) = index {
            if self.samples.len() <= index {
                let x = self.samples.last().map_or(0.0, |s| s.x);
                self.samples.resize(index + 1, Sample::undefined_at(x));
            }
            self.samples[index] = sample;
            return index..index + 1;
        }

        let idx = self.samples.partition_point(|s| s.x < sample.x);
        match self.samples.get_mut(idx) {
            Some(existing) if existing.x == sample.x => {
                if policy.replaces(existing.y, sample.y) {
                    *existing = sample;
                    idx..idx + 1
                } else {
                    idx..idx
                }
            }
            _ => {
                self.samples.insert(idx, sample);
                idx..idx + 1
            }
        }
    }

    /// Overwrite the value of an existing cell, keeping its coordinate.
    pub fn set_value(&mut self, index: usize, y: Complex64) {
        if let Some(s) = self.samples.get_mut(index) {
            s.y = y;
        }
    }

    /// Remove every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Match an externally imposed grid of `n` cells.
    ///
    /// Cell `i` gets coordinate `coordinate(i)`. Values survive where the new
    /// coordinate equals an old one; every other cell holds the undefined
    /// sentinel.
    pub fn resize_to(&mut self, n: usize, coordinate: impl Fn(usize) -> f64) {
        let old = std::mem::take(&mut self.samples);
        self.samples = (0..n)
            .map(|i| {
                let x = coordinate(i);
                let pos = old.partition_point(|s| s.x < x);
                match old.get(pos) {
                    Some(s) if s.x == x => *s,
                    _ => Sample::undefined_at(x),
                }
            })
            .collect();
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `index`.
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    /// All samples in coordinate order.
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(store: &SampleStore) -> Vec<f64> {
        store.as_slice().iter().map(|s| s.x).collect()
    }

    #[test]
    fn unindexed_writes_stay_sorted_and_unique() {
        let mut store = SampleStore::new();
        for x in [5.0, 1.0, 3.0, 1.0, 9.0, 3.0, 0.5] {
            store.upsert(Sample::real(x, x), None, MergePolicy::Overwrite);
        }
        assert_eq!(coords(&store), vec![0.5, 1.0, 3.0, 5.0, 9.0]);
    }

    #[test]
    fn random_write_sequences_stay_strictly_sorted() {
        // xorshift, so every run sees the same sequences
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let policies = [MergePolicy::Overwrite, MergePolicy::MinHold, MergePolicy::MaxHold];
        for round in 0..200 {
            let mut store = SampleStore::new();
            let policy = policies[round % policies.len()];
            let writes = 1 + (next() % 64) as usize;
            let mut distinct = std::collections::BTreeSet::new();
            for _ in 0..writes {
                // small coordinate range forces duplicates
                let x = (next() % 32) as f64 * 0.25 - 2.0;
                let y = (next() % 100) as f64 - 50.0;
                store.upsert(Sample::real(x, y), None, policy);
                distinct.insert((x * 4.0) as i64);
                assert!(
                    store.as_slice().windows(2).all(|w| w[0].x < w[1].x),
                    "round {round}: {:?}",
                    coords(&store)
                );
                assert_eq!(store.len(), distinct.len());
            }
        }
    }

    #[test]
    fn upsert_reports_touched_range() {
        let mut store = SampleStore::new();
        assert_eq!(
            store.upsert(Sample::real(2.0, 0.0), None, MergePolicy::Overwrite),
            0..1
        );
        assert_eq!(
            store.upsert(Sample::real(1.0, 0.0), None, MergePolicy::Overwrite),
            0..1
        );
        assert_eq!(
            store.upsert(Sample::real(3.0, 0.0), None, MergePolicy::Overwrite),
            2..3
        );
    }

    #[test]
    fn max_hold_keeps_larger_magnitude_in_any_order() {
        for (first, second) in [(1.0, 4.0), (4.0, 1.0)] {
            let mut store = SampleStore::new();
            store.upsert(Sample::real(1.0, first), None, MergePolicy::MaxHold);
            store.upsert(Sample::real(1.0, second), None, MergePolicy::MaxHold);
            assert_eq!(store.len(), 1);
            assert_eq!(store.as_slice()[0].y.re, 4.0);
        }
    }

    #[test]
    fn min_hold_keeps_smaller_magnitude_in_any_order() {
        for (first, second) in [(-2.0, 7.0), (7.0, -2.0)] {
            let mut store = SampleStore::new();
            store.upsert(Sample::real(1.0, first), None, MergePolicy::MinHold);
            let range = store.upsert(Sample::real(1.0, second), None, MergePolicy::MinHold);
            assert_eq!(store.as_slice()[0].y.re, -2.0);
            assert_eq!(range.is_empty(), first == -2.0);
        }
    }

    #[test]
    fn indexed_write_extends_with_undefined_cells() {
        let mut store = SampleStore::new();
        let range = store.upsert(Sample::real(30.0, 1.0), Some(3), MergePolicy::Overwrite);
        assert_eq!(range, 3..4);
        assert_eq!(store.len(), 4);
        assert!(store.as_slice()[..3].iter().all(Sample::is_undefined));
        assert_eq!(coords(&store), vec![0.0, 0.0, 0.0, 30.0]);
        assert_eq!(store.as_slice()[3].y.re, 1.0);

        store.upsert(Sample::real(40.0, 2.0), Some(5), MergePolicy::Overwrite);
        assert_eq!(coords(&store), vec![0.0, 0.0, 0.0, 30.0, 30.0, 40.0]);
        assert!(store.as_slice().iter().all(|s| !s.x.is_nan()));
    }

    #[test]
    fn resize_preserves_values_at_shared_coordinates() {
        let mut store = SampleStore::new();
        for x in 0..4 {
            store.upsert(Sample::real(x as f64, 10.0 + x as f64), None, MergePolicy::Overwrite);
        }
        store.resize_to(6, |i| i as f64 * 0.5 + 1.0);
        assert_eq!(coords(&store), vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5]);
        assert_eq!(store.as_slice()[0].y.re, 11.0);
        assert!(store.as_slice()[1].is_undefined());
        assert_eq!(store.as_slice()[2].y.re, 12.0);
        assert_eq!(store.as_slice()[4].y.re, 13.0);
        assert!(store.as_slice()[5].is_undefined());

        store.resize_to(0, |i| i as f64);
        assert!(store.is_empty());
    }
}
