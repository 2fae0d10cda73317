//! Frequency-to-time conversion via inverse FFT.
//!
//! The input is treated as a uniformly spaced frequency sweep. In
//! [`TimeDomainMode::Lowpass`] the sweep is assumed to be harmonic (the first
//! point approximates DC), the spectrum is mirrored into a Hermitian-symmetric
//! one and the result is a real impulse response. In
//! [`TimeDomainMode::Bandpass`] the sweep is transformed as-is and the result
//! is complex.
//!
//! Output sample `k` sits at `t = k / (n_fft * df)`, where `df` is the average
//! frequency step of the input.

use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner, Length};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TraceError, TraceResult};
use crate::sample::{Domain, Sample};
use crate::transform::Transform;

/// Spectrum interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeDomainMode {
    /// Harmonic sweep, real step/impulse response.
    #[default]
    Lowpass,
    /// Arbitrary sweep, complex response.
    Bandpass,
}

/// Window applied to the spectrum before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Window {
    /// No windowing.
    Rectangular,
    /// Hann window.
    #[default]
    Hann,
}

/// Persisted settings of [`TimeDomainTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeDomainSettings {
    /// Spectrum interpretation.
    pub mode: TimeDomainMode,
    /// Spectral window.
    pub window: Window,
}

/// Inverse-FFT transform producing a time-domain trace.
#[derive(Default)]
pub struct TimeDomainTransform {
    settings: TimeDomainSettings,
    plan: Option<Arc<dyn Fft<f64>>>,
}

impl TimeDomainTransform {
    /// Transform with the given mode and window.
    pub fn new(mode: TimeDomainMode, window: Window) -> Self {
        Self {
            settings: TimeDomainSettings { mode, window },
            plan: None,
        }
    }

    fn inverse_plan(&mut self, len: usize) -> Arc<dyn Fft<f64>> {
        match &self.plan {
            Some(plan) if plan.len() == len => Arc::clone(plan),
            _ => {
                debug!(len, "Planning inverse FFT");
                let plan = FftPlanner::new().plan_fft_inverse(len);
                self.plan = Some(Arc::clone(&plan));
                plan
            }
        }
    }

    /// Window weights for `n` spectral points.
    fn weights(&self, n: usize) -> Vec<f64> {
        match self.settings.window {
            Window::Rectangular => vec![1.0; n],
            Window::Hann if n < 2 => vec![1.0; n],
            Window::Hann => match self.settings.mode {
                // decaying half of a Hann window, centred on DC
                TimeDomainMode::Lowpass => (0..n)
                    .map(|k| {
                        0.5 * (1.0 + (std::f64::consts::PI * k as f64 / n as f64).cos())
                    })
                    .collect(),
                TimeDomainMode::Bandpass => (0..n)
                    .map(|k| {
                        0.5 * (1.0
                            - (2.0 * std::f64::consts::PI * k as f64 / (n - 1) as f64).cos())
                    })
                    .collect(),
            },
        }
    }
}

impl Transform for TimeDomainTransform {
    fn kind(&self) -> &'static str {
        "Time domain"
    }

    fn description(&self) -> String {
        format!(
            "Time domain ({:?}, {:?} window)",
            self.settings.mode, self.settings.window
        )
    }

    fn output_domain(&self, _input: Domain) -> Domain {
        Domain::Time
    }

    fn apply(&mut self, input: &[Sample], domain: Domain) -> TraceResult<Vec<Sample>> {
        if domain != Domain::Frequency {
            return Err(TraceError::UnsupportedDomain {
                transform: self.kind().to_string(),
                domain,
            });
        }
        let n = input.len();
        if n < 2 {
            return Ok(Vec::new());
        }
        let df = (input[n - 1].x - input[0].x) / (n - 1) as f64;
        if df <= 0.0 {
            return Ok(Vec::new());
        }

        let weights = self.weights(n);
        let mut spectrum: Vec<Complex64> = match self.settings.mode {
            TimeDomainMode::Lowpass => {
                let n_fft = 2 * n - 1;
                let mut buf = vec![Complex64::new(0.0, 0.0); n_fft];
                buf[0] = Complex64::new(input[0].y.re * weights[0], 0.0);
                for k in 1..n {
                    let v = input[k].y * weights[k];
                    buf[k] = v;
                    buf[n_fft - k] = v.conj();
                }
                buf
            }
            TimeDomainMode::Bandpass => input
                .iter()
                .zip(&weights)
                .map(|(s, w)| s.y * *w)
                .collect(),
        };

        let n_fft = spectrum.len();
        self.inverse_plan(n_fft).process(&mut spectrum);

        let scale = 1.0 / n_fft as f64;
        let dt = 1.0 / (n_fft as f64 * df);
        Ok(spectrum
            .iter()
            .enumerate()
            .map(|(k, v)| {
                let y = match self.settings.mode {
                    TimeDomainMode::Lowpass => Complex64::new(v.re * scale, 0.0),
                    TimeDomainMode::Bandpass => *v * scale,
                };
                Sample::new(k as f64 * dt, y)
            })
            .collect())
    }

    fn settings(&self) -> serde_json::Value {
        serde_json::to_value(self.settings).unwrap_or_default()
    }

    fn load_settings(&mut self, settings: &serde_json::Value) -> TraceResult<()> {
        self.settings = serde_json::from_value(settings.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_sweep(n: usize, df: f64) -> Vec<Sample> {
        (0..n).map(|k| Sample::real(k as f64 * df, 1.0)).collect()
    }

    #[test]
    fn flat_lowpass_spectrum_is_an_impulse() {
        let mut t = TimeDomainTransform::new(TimeDomainMode::Lowpass, Window::Rectangular);
        let out = t.apply(&flat_sweep(8, 1e6), Domain::Frequency).unwrap();
        assert_eq!(out.len(), 15);
        assert!((out[0].y.re - 1.0).abs() < 1e-9);
        assert!(out[1..].iter().all(|s| s.y.re.abs() < 1e-9));
        assert!((out[1].x - 1.0 / (15.0 * 1e6)).abs() < 1e-18);
    }

    #[test]
    fn bandpass_keeps_length_and_complex_values() {
        let mut t = TimeDomainTransform::new(TimeDomainMode::Bandpass, Window::Hann);
        let out = t.apply(&flat_sweep(16, 1e3), Domain::Frequency).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(t.output_domain(Domain::Frequency), Domain::Time);
    }

    #[test]
    fn rejects_non_frequency_input() {
        let mut t = TimeDomainTransform::default();
        assert!(matches!(
            t.apply(&flat_sweep(4, 1.0), Domain::Time),
            Err(TraceError::UnsupportedDomain { .. })
        ));
    }

    #[test]
    fn degenerate_sweeps_give_empty_output() {
        let mut t = TimeDomainTransform::default();
        assert!(t.apply(&flat_sweep(1, 1.0), Domain::Frequency).unwrap().is_empty());
        assert!(t.apply(&[], Domain::Frequency).unwrap().is_empty());
    }

    #[test]
    fn settings_use_variant_names() {
        let t = TimeDomainTransform::new(TimeDomainMode::Bandpass, Window::Rectangular);
        assert_eq!(
            t.settings(),
            serde_json::json!({ "mode": "Bandpass", "window": "Rectangular" })
        );
    }
}
