//! Sample type and the small enums that describe a trace.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// A single point of a trace: coordinate on the domain axis and complex value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Coordinate (frequency in Hz, time in s, power in dBm).
    pub x: f64,
    /// Measured or computed value.
    pub y: Complex64,
}

impl Sample {
    /// Create a sample from coordinate and value.
    pub fn new(x: f64, y: Complex64) -> Self {
        Self { x, y }
    }

    /// Create a sample with a purely real value.
    pub fn real(x: f64, y: f64) -> Self {
        Self {
            x,
            y: Complex64::new(y, 0.0),
        }
    }

    /// Cell at coordinate `x` holding the undefined sentinel.
    pub fn undefined_at(x: f64) -> Self {
        Self { x, y: undefined() }
    }

    /// Whether the value is the undefined sentinel (either part NaN).
    pub fn is_undefined(&self) -> bool {
        self.y.re.is_nan() || self.y.im.is_nan()
    }
}

/// The "undefined" value: NaN in both parts.
pub fn undefined() -> Complex64 {
    Complex64::new(f64::NAN, f64::NAN)
}

/// Semantics of a trace's coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Domain {
    /// Frequency sweep.
    #[default]
    Frequency,
    /// Time axis (e.g. impulse response).
    Time,
    /// Spectrum analyzer in zero-span mode.
    TimeZeroSpan,
    /// Power sweep.
    Power,
}

impl Domain {
    /// Domain selected by the header of an imported coordinate column.
    ///
    /// Matching is case-insensitive; anything unknown is a frequency axis.
    pub fn from_axis_header(header: &str) -> Self {
        match header.trim().to_lowercase().as_str() {
            "time" => Domain::Time,
            "power" => Domain::Power,
            "time (zero span)" => Domain::TimeZeroSpan,
            _ => Domain::Frequency,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Domain::Frequency => "frequency",
            Domain::Time => "time",
            Domain::TimeZeroSpan => "time (zero span)",
            Domain::Power => "power",
        };
        write!(f, "{}", label)
    }
}

/// Where a trace's samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Source {
    /// Live instrument acquisition.
    #[default]
    Live,
    /// One-shot file import.
    File,
    /// Formula over other traces.
    Math,
    /// Calibration data (never persisted).
    Calibration,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::Live => "Live",
            Source::File => "File",
            Source::Math => "Math",
            Source::Calibration => "Calibration",
        };
        write!(f, "{}", label)
    }
}

/// Resolution of a live write landing on an occupied coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MergePolicy {
    /// Replace the stored sample.
    #[default]
    Overwrite,
    /// Keep the sample with the larger magnitude.
    MaxHold,
    /// Keep the sample with the smaller magnitude.
    MinHold,
}

impl MergePolicy {
    /// Whether `new` replaces `current` under this policy.
    pub fn replaces(self, current: Complex64, new: Complex64) -> bool {
        match self {
            MergePolicy::Overwrite => true,
            MergePolicy::MaxHold => new.norm() > current.norm(),
            MergePolicy::MinHold => new.norm() < current.norm(),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OVERWRITE" => Ok(MergePolicy::Overwrite),
            "MAXHOLD" => Ok(MergePolicy::MaxHold),
            "MINHOLD" => Ok(MergePolicy::MinHold),
            _ => Err(format!("Unknown merge policy '{s}'")),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MergePolicy::Overwrite => "Overwrite",
            MergePolicy::MaxHold => "MaxHold",
            MergePolicy::MinHold => "MinHold",
        };
        write!(f, "{}", label)
    }
}

/// Instrument quantity a live trace displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LiveParameter {
    /// Port 1 reflection.
    #[default]
    S11,
    /// Reverse transmission.
    S12,
    /// Forward transmission.
    S21,
    /// Port 2 reflection.
    S22,
    /// Spectrum analyzer input 1.
    Port1,
    /// Spectrum analyzer input 2.
    Port2,
}

impl LiveParameter {
    /// S11 and S22 are reflection measurements.
    pub fn is_reflection(self) -> bool {
        matches!(self, LiveParameter::S11 | LiveParameter::S22)
    }

    /// Vector network analyzer parameter.
    pub fn is_vna(self) -> bool {
        matches!(
            self,
            LiveParameter::S11 | LiveParameter::S12 | LiveParameter::S21 | LiveParameter::S22
        )
    }

    /// Spectrum analyzer parameter.
    pub fn is_sa(self) -> bool {
        !self.is_vna()
    }
}

impl FromStr for LiveParameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "S11" => Ok(LiveParameter::S11),
            "S12" => Ok(LiveParameter::S12),
            "S21" => Ok(LiveParameter::S21),
            "S22" => Ok(LiveParameter::S22),
            "PORT1" => Ok(LiveParameter::Port1),
            "PORT2" => Ok(LiveParameter::Port2),
            _ => Err(format!("Unknown live parameter '{s}'")),
        }
    }
}

impl fmt::Display for LiveParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LiveParameter::S11 => "S11",
            LiveParameter::S12 => "S12",
            LiveParameter::S21 => "S21",
            LiveParameter::S22 => "S22",
            LiveParameter::Port1 => "Port1",
            LiveParameter::Port2 => "Port2",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_header_selects_domain() {
        assert_eq!(Domain::from_axis_header("Time"), Domain::Time);
        assert_eq!(Domain::from_axis_header("POWER"), Domain::Power);
        assert_eq!(
            Domain::from_axis_header("time (zero span)"),
            Domain::TimeZeroSpan
        );
        assert_eq!(Domain::from_axis_header("Frequency"), Domain::Frequency);
        assert_eq!(Domain::from_axis_header("whatever"), Domain::Frequency);
    }

    #[test]
    fn hold_policies_compare_magnitudes() {
        let small = Complex64::new(0.0, 1.0);
        let large = Complex64::new(-3.0, 0.0);
        assert!(MergePolicy::MaxHold.replaces(small, large));
        assert!(!MergePolicy::MaxHold.replaces(large, small));
        assert!(MergePolicy::MinHold.replaces(large, small));
        assert!(!MergePolicy::MinHold.replaces(small, large));
        assert!(MergePolicy::Overwrite.replaces(large, small));
    }

    #[test]
    fn live_parameter_names_round_trip() {
        for p in [
            LiveParameter::S11,
            LiveParameter::S12,
            LiveParameter::S21,
            LiveParameter::S22,
            LiveParameter::Port1,
            LiveParameter::Port2,
        ] {
            assert_eq!(p.to_string().parse::<LiveParameter>(), Ok(p));
        }
        assert!("S33".parse::<LiveParameter>().is_err());
        assert!(LiveParameter::S22.is_reflection());
        assert!(!LiveParameter::S21.is_reflection());
        assert!(LiveParameter::Port2.is_sa());
    }

    #[test]
    fn undefined_sentinel_is_nan() {
        let s = Sample::undefined_at(3.0);
        assert!(s.is_undefined());
        assert!(!Sample::real(1.0, 2.0).is_undefined());
    }
}
