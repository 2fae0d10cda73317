//! Sliding median over magnitude.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::sample::{Domain, Sample};
use crate::transform::Transform;

/// Persisted settings of [`MedianFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedianSettings {
    /// Window length, always odd.
    pub kernel_size: usize,
}

impl Default for MedianSettings {
    fn default() -> Self {
        Self { kernel_size: 3 }
    }
}

/// Replaces every sample by the sample of median magnitude in a centered
/// window.
///
/// The window is clipped at both ends of the trace. The chosen sample keeps its
/// complex value; only the coordinate is taken from the center.
#[derive(Debug, Clone, Default)]
pub struct MedianFilter {
    settings: MedianSettings,
}

impl MedianFilter {
    /// Filter with the given window length (rounded up to the next odd number).
    pub fn new(kernel_size: usize) -> Self {
        Self {
            settings: MedianSettings {
                kernel_size: odd(kernel_size),
            },
        }
    }

    /// Window length.
    pub fn kernel_size(&self) -> usize {
        self.settings.kernel_size
    }

    fn half(&self) -> usize {
        self.settings.kernel_size / 2
    }

    fn filtered(&self, input: &[Sample], index: usize) -> Sample {
        let lo = index.saturating_sub(self.half());
        let hi = (index + self.half() + 1).min(input.len());
        let mut window: Vec<Sample> = input[lo..hi].to_vec();
        window.sort_by(|a, b| a.y.norm().total_cmp(&b.y.norm()));
        let median = window[window.len() / 2];
        Sample::new(input[index].x, median.y)
    }
}

fn odd(n: usize) -> usize {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

impl Transform for MedianFilter {
    fn kind(&self) -> &'static str {
        "Median filter"
    }

    fn description(&self) -> String {
        format!("Median filter, kernel size {}", self.settings.kernel_size)
    }

    fn apply(&mut self, input: &[Sample], _domain: Domain) -> TraceResult<Vec<Sample>> {
        Ok((0..input.len()).map(|i| self.filtered(input, i)).collect())
    }

    fn apply_range(
        &mut self,
        input: &[Sample],
        domain: Domain,
        output: &mut Vec<Sample>,
        changed: Range<usize>,
    ) -> TraceResult<Range<usize>> {
        if output.len() != input.len() {
            *output = self.apply(input, domain)?;
            return Ok(0..output.len());
        }
        let begin = changed.start.saturating_sub(self.half());
        let end = (changed.end + self.half()).min(input.len());
        for i in begin..end {
            output[i] = self.filtered(input, i);
        }
        Ok(begin..end.max(begin))
    }

    fn settings(&self) -> serde_json::Value {
        serde_json::to_value(self.settings).unwrap_or_default()
    }

    fn load_settings(&mut self, settings: &serde_json::Value) -> TraceResult<()> {
        let mut loaded: MedianSettings = serde_json::from_value(settings.clone())?;
        if loaded.kernel_size == 0 {
            return Err(TraceError::Configuration(
                "Median filter kernel size must be positive".to_string(),
            ));
        }
        loaded.kernel_size = odd(loaded.kernel_size);
        self.settings = loaded;
        Ok(())
    }
}
