//! File-import collaborators.
//!
//! Parsing of the two supported file formats happens elsewhere; the trace
//! engine consumes their parsed form:
//!
//! - [`ColumnTable`]: a delimited-column export. Column 0 holds the
//!   coordinates and its header names the axis. Every other column is named
//!   `<trace>_<axis>`; consecutive columns with the same trace name form one
//!   trace group.
//! - [`NetworkParameterData`]: an n-port network-parameter (touchstone) file.
//!
//! [`CsvFileLoader`] reads delimited tables from disk with the `csv` crate and
//! implements [`FileLoader`], which setup loading uses to refill file traces.

use std::collections::BTreeMap;
use std::path::Path;

use num_complex::Complex64;
use tracing::debug;

use crate::error::{TraceError, TraceResult};
use crate::sample::Domain;

/// Parsed delimited-column table.
///
/// Built through [`ColumnTable::new`], which guarantees one header per column
/// and columns of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTable {
    filename: String,
    headers: Vec<String>,
    // column-major
    columns: Vec<Vec<f64>>,
}

/// How a value column contributes to the complex sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueAxis {
    /// Real part.
    Real,
    /// Imaginary part.
    Imaginary,
    /// Linear magnitude.
    Magnitude,
    /// Magnitude in dB.
    MagnitudeDb,
    /// Phase in degrees.
    Phase,
}

impl ValueAxis {
    /// Axis for a column-name suffix, including the legacy `real`/`imag`.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "real" | "Real" => Some(ValueAxis::Real),
            "imag" | "Imaginary" => Some(ValueAxis::Imaginary),
            "Magnitude" => Some(ValueAxis::Magnitude),
            "Magnitude (dB)" => Some(ValueAxis::MagnitudeDb),
            "Phase" => Some(ValueAxis::Phase),
            _ => None,
        }
    }

    /// Column-name suffix written for this axis.
    pub fn suffix(self) -> &'static str {
        match self {
            ValueAxis::Real => "Real",
            ValueAxis::Imaginary => "Imaginary",
            ValueAxis::Magnitude => "Magnitude",
            ValueAxis::MagnitudeDb => "Magnitude (dB)",
            ValueAxis::Phase => "Phase",
        }
    }
}

/// Rebuild a complex value from the available axis values.
///
/// Cartesian parts take precedence over polar ones; a missing counterpart is
/// treated as zero (imaginary part, phase).
pub fn reconstruct_value(values: &BTreeMap<ValueAxis, f64>) -> Complex64 {
    let get = |axis: ValueAxis| values.get(&axis).copied();
    let phase = get(ValueAxis::Phase).unwrap_or(0.0).to_radians();
    if let Some(re) = get(ValueAxis::Real) {
        return Complex64::new(re, get(ValueAxis::Imaginary).unwrap_or(0.0));
    }
    if let Some(im) = get(ValueAxis::Imaginary) {
        return Complex64::new(0.0, im);
    }
    if let Some(mag) = get(ValueAxis::Magnitude) {
        return Complex64::from_polar(mag, phase);
    }
    if let Some(db) = get(ValueAxis::MagnitudeDb) {
        return Complex64::from_polar(10f64.powf(db / 20.0), phase);
    }
    Complex64::new(f64::NAN, f64::NAN)
}

/// Columns of one trace group inside a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceColumns {
    /// Trace name (header text before the last `_`).
    pub name: String,
    /// Column index per axis.
    pub columns: BTreeMap<ValueAxis, usize>,
}

impl ColumnTable {
    /// Table from headers and columns of equal length.
    pub fn new(
        filename: impl Into<String>,
        headers: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> TraceResult<Self> {
        if headers.len() != columns.len() {
            return Err(TraceError::Import(format!(
                "{} headers for {} columns",
                headers.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map_or(0, Vec::len);
        if columns.iter().any(|c| c.len() != rows) {
            return Err(TraceError::Import("Columns differ in length".to_string()));
        }
        Ok(Self {
            filename: filename.into(),
            headers,
            columns,
        })
    }

    /// File the table was read from.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// One header per column.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Values of column `index`.
    pub fn column(&self, index: usize) -> Option<&[f64]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    /// Domain named by the coordinate column header.
    pub fn domain(&self) -> Domain {
        self.headers
            .first()
            .map(|h| Domain::from_axis_header(h))
            .unwrap_or_default()
    }

    /// Trace groups in column order.
    ///
    /// Columns without `_` are skipped, as are axis suffixes that are not
    /// understood.
    pub fn trace_groups(&self) -> Vec<TraceColumns> {
        let mut groups: Vec<TraceColumns> = Vec::new();
        for (index, header) in self.headers.iter().enumerate().skip(1) {
            let Some((name, suffix)) = header.rsplit_once('_') else {
                continue;
            };
            if groups.last().map_or(true, |g| g.name != name) {
                groups.push(TraceColumns {
                    name: name.to_string(),
                    columns: BTreeMap::new(),
                });
            }
            if let (Some(axis), Some(group)) = (ValueAxis::from_suffix(suffix), groups.last_mut()) {
                group.columns.insert(axis, index);
            }
        }
        groups
    }

    /// Coordinate column.
    pub fn coordinates(&self) -> &[f64] {
        self.columns.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// `(coordinate, value)` rows of trace group `parameter`, with its name.
    pub fn trace_rows(&self, parameter: usize) -> TraceResult<(String, Vec<(f64, Complex64)>)> {
        let groups = self.trace_groups();
        let group = groups.get(parameter).ok_or_else(|| {
            TraceError::Import(format!(
                "Not enough traces in {}: requested #{parameter}, found {}",
                self.filename,
                groups.len()
            ))
        })?;
        if group.columns.is_empty() {
            return Err(TraceError::Import(format!(
                "No data for trace '{}' in {}",
                group.name, self.filename
            )));
        }
        let rows = self
            .coordinates()
            .iter()
            .enumerate()
            .map(|(row, &x)| {
                let values: BTreeMap<ValueAxis, f64> = group
                    .columns
                    .iter()
                    .filter_map(|(&axis, &col)| {
                        self.columns.get(col)?.get(row).map(|&v| (axis, v))
                    })
                    .collect();
                (x, reconstruct_value(&values))
            })
            .collect();
        Ok((group.name.clone(), rows))
    }
}

/// One frequency point of a network-parameter file.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPoint {
    /// Frequency in Hz.
    pub frequency: f64,
    /// Parameters in row-major order, `ports * ports` entries.
    pub parameters: Vec<Complex64>,
}

/// Parsed n-port network-parameter data.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParameterData {
    /// File the data was read from.
    pub filename: String,
    /// Number of ports.
    pub ports: usize,
    /// Reference impedance in ohms.
    pub reference_impedance: f64,
    /// Frequency points.
    pub points: Vec<NetworkPoint>,
}

impl NetworkParameterData {
    /// Number of parameters (`ports²`).
    pub fn parameter_count(&self) -> usize {
        self.ports * self.ports
    }

    /// Whether `parameter` is a diagonal (reflection) element.
    pub fn is_reflection(&self, parameter: usize) -> bool {
        (0..self.ports).any(|i| parameter == i * self.ports + i)
    }

    /// Conventional name `S<sink><source>` of `parameter`.
    pub fn parameter_name(&self, parameter: usize) -> String {
        let ports = self.ports.max(1);
        format!("S{}{}", parameter / ports + 1, parameter % ports + 1)
    }
}

/// Parsed content of an importable file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileData {
    /// Delimited-column table.
    Table(ColumnTable),
    /// Network-parameter data.
    Network(NetworkParameterData),
}

/// Source of file content for file-backed traces.
pub trait FileLoader {
    /// Load and parse `filename`.
    fn load(&self, filename: &str) -> TraceResult<FileData>;
}

/// Reads comma-separated column tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFileLoader;

impl CsvFileLoader {
    /// Read a column table from `path`.
    pub fn read_table(path: &Path) -> TraceResult<ColumnTable> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| TraceError::Import(format!("{}: {e}", path.display())))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| TraceError::Import(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut columns = vec![Vec::new(); headers.len()];
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| TraceError::Import(e.to_string()))?;
            for (column, field) in columns.iter_mut().zip(record.iter()) {
                let value = field.trim().parse::<f64>().map_err(|e| {
                    TraceError::Import(format!("Row {}: '{field}': {e}", line + 2))
                })?;
                column.push(value);
            }
        }
        debug!(path = %path.display(), columns = headers.len(), "Read column table");
        ColumnTable::new(path.display().to_string(), headers, columns)
    }
}

impl FileLoader for CsvFileLoader {
    fn load(&self, filename: &str) -> TraceResult<FileData> {
        if !filename.to_lowercase().ends_with(".csv") {
            return Err(TraceError::Import(format!(
                "{filename}: only .csv tables can be read"
            )));
        }
        Self::read_table(Path::new(filename)).map(FileData::Table)
    }
}
