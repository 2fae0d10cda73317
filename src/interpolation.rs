//! Binary search and linear interpolation over coordinate-sorted samples.
//!
//! Queries outside the covered range saturate at the edge samples; nothing here
//! extrapolates or panics on out-of-domain coordinates.

use num_complex::Complex64;

use crate::sample::{undefined, Sample};

/// Index of the first sample with coordinate `>= x`.
///
/// Saturates at the last valid index when `x` lies beyond the last sample and
/// returns 0 for an empty slice.
pub fn index_for_coordinate(samples: &[Sample], x: f64) -> usize {
    let idx = samples.partition_point(|s| s.x < x);
    if idx >= samples.len() {
        samples.len().saturating_sub(1)
    } else {
        idx
    }
}

/// Value at `x`, linearly interpolated in the complex plane.
///
/// At or beyond the edges the edge sample's value is returned. An empty slice
/// or a NaN coordinate yields the undefined sentinel.
pub fn interpolated_value(samples: &[Sample], x: f64) -> Complex64 {
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return undefined(),
    };
    if x.is_nan() {
        return undefined();
    }
    if x <= first.x {
        return first.y;
    }
    if x >= last.x {
        return last.y;
    }
    let upper = samples.partition_point(|s| s.x < x);
    let (Some(lo), Some(hi)) = (upper.checked_sub(1).and_then(|i| samples.get(i)), samples.get(upper))
    else {
        // only reachable on unsorted input
        return samples.get(upper.min(samples.len() - 1)).map_or_else(undefined, |s| s.y);
    };
    if hi.x == x || hi.x == lo.x {
        return hi.y;
    }
    let t = (x - lo.x) / (hi.x - lo.x);
    lo.y + (hi.y - lo.y) * t
}

/// [`interpolated_value`] packed into a sample at `x`.
pub fn interpolated_sample(samples: &[Sample], x: f64) -> Sample {
    Sample::new(x, interpolated_value(samples, x))
}
