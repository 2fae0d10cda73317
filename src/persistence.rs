//! Persisted trace setups.
//!
//! A setup is a list of [`TraceRecord`]s, one per non-calibration trace.
//! Formula sources are stored by identity hash instead of handle: handles do
//! not survive a reload, hashes do. The identity hash is the first eight bytes
//! (big-endian) of the SHA-256 of the compact JSON record with the hash field
//! left out.
//!
//! Loading creates every trace first and binds a formula source as soon as its
//! hash resolves. References that do not resolve yet are retried once the
//! whole batch exists; whatever still fails is reported in the [`LoadReport`]
//! and leaves the formula with fewer bound variables.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{TraceError, TraceResult};
use crate::import::{FileData, FileLoader};
use crate::model::TraceModel;
use crate::sample::{LiveParameter, MergePolicy, Source};
use crate::trace::{TraceId, TraceStatus, DEFAULT_COLOR, DEFAULT_VELOCITY_FACTOR};

/// Persisted form of one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// Identity hash at save time.
    #[serde(default, alias = "hash", skip_serializing_if = "Option::is_none")]
    pub identity_hash: Option<u64>,
    /// Display name.
    pub name: String,
    /// Display color.
    #[serde(default = "default_color")]
    pub color: String,
    /// Visibility.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Origin of the samples.
    #[serde(flatten)]
    pub source: SourceRecord,
    /// Velocity factor for time/distance conversion.
    #[serde(default = "default_velocity_factor")]
    pub velocity_factor: f64,
    /// Reflection measurement flag.
    #[serde(default)]
    pub is_reflection: bool,
    /// Transform chain, identity node excluded.
    #[serde(default)]
    pub transforms: Vec<TransformRecord>,
    /// Chain-wide transform switch.
    #[serde(default = "default_true")]
    pub math_enabled: bool,
}

/// Source-specific part of a [`TraceRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum SourceRecord {
    /// Live acquisition.
    Live {
        /// Displayed instrument quantity.
        #[serde(default)]
        parameter: LiveParameter,
        /// Merge policy for repeated coordinates.
        #[serde(default, rename = "mergePolicy")]
        merge_policy: MergePolicy,
        /// Frozen flag.
        #[serde(default)]
        paused: bool,
    },
    /// File import.
    File {
        /// Imported file.
        filename: String,
        /// Trace group or parameter index inside the file.
        #[serde(default, rename = "parameterIndex")]
        parameter_index: usize,
    },
    /// Formula over other traces.
    Math {
        /// Formula text.
        #[serde(default)]
        expression: String,
        /// Bound sources by identity hash.
        #[serde(default)]
        sources: Vec<SourceReference>,
    },
}

/// Formula source stored by identity hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    /// Identity hash of the source trace.
    pub trace_hash: u64,
    /// Variable the source is bound to.
    pub variable_name: String,
}

/// Persisted transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    /// Registry kind name.
    pub kind: String,
    /// Per-node enable flag.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Kind-specific settings.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_true() -> bool {
    true
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_velocity_factor() -> f64 {
    DEFAULT_VELOCITY_FACTOR
}

/// A formula source that could not be bound while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// Formula trace missing the source.
    pub trace: TraceId,
    /// Hash that matched no loaded trace.
    pub hash: u64,
    /// Variable left unbound.
    pub variable: String,
}

/// Outcome of [`TraceModel::load_setup`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Traces created, in record order.
    pub created: Vec<TraceId>,
    /// References still unresolved after the retry.
    pub unresolved: Vec<UnresolvedReference>,
    /// Non-fatal problems, as (trace name, message).
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    /// Whether every record loaded without problems.
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty() && self.failed.is_empty()
    }
}

/// Identity hash of a record: SHA-256 of its compact JSON without the hash field.
pub fn identity_hash(record: &TraceRecord) -> TraceResult<u64> {
    let mut record = record.clone();
    record.identity_hash = None;
    let json = serde_json::to_vec(&record)?;
    let digest = Sha256::digest(&json);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(bytes))
}

impl TraceModel {
    /// Identity hash of a trace, computed on first use and cached until the
    /// trace or any of its (transitive) formula sources changes.
    pub fn identity_hash(&self, id: TraceId) -> TraceResult<u64> {
        let trace = self.require(id)?;
        let inputs = self.source_hashes(id)?;
        if let Some(hash) = trace.cached_hash_for(&inputs) {
            return Ok(hash);
        }
        let hash = identity_hash(&self.record_with(id, &inputs)?)?;
        trace.cache_hash(hash, inputs);
        Ok(hash)
    }

    /// Persisted form of one trace, without its own hash.
    pub fn record_of(&self, id: TraceId) -> TraceResult<TraceRecord> {
        let inputs = self.source_hashes(id)?;
        self.record_with(id, &inputs)
    }

    /// Identity hashes of the bound formula sources, in binding order.
    fn source_hashes(&self, id: TraceId) -> TraceResult<Vec<u64>> {
        self.graph
            .sources_of(id)
            .iter()
            .map(|b| self.identity_hash(b.source))
            .collect()
    }

    fn record_with(&self, id: TraceId, source_hashes: &[u64]) -> TraceResult<TraceRecord> {
        let trace = self.require(id)?;
        let source = match trace.source() {
            Source::Live | Source::Calibration => SourceRecord::Live {
                parameter: trace.live_parameter(),
                merge_policy: trace.merge_policy(),
                paused: trace.is_paused(),
            },
            Source::File => SourceRecord::File {
                filename: trace.file_name().to_string(),
                parameter_index: trace.file_parameter(),
            },
            Source::Math => SourceRecord::Math {
                expression: trace.expression().to_string(),
                sources: self
                    .graph
                    .sources_of(id)
                    .iter()
                    .zip(source_hashes)
                    .map(|(b, &trace_hash)| SourceReference {
                        trace_hash,
                        variable_name: b.variable.clone(),
                    })
                    .collect(),
            },
        };
        Ok(TraceRecord {
            identity_hash: None,
            name: trace.name().to_string(),
            color: trace.color().to_string(),
            visible: trace.is_visible(),
            source,
            velocity_factor: trace.velocity_factor(),
            is_reflection: trace.is_reflection(),
            transforms: trace
                .transforms()
                .iter()
                .map(|(_, t, enabled)| TransformRecord {
                    kind: t.kind().to_string(),
                    enabled,
                    settings: t.settings(),
                })
                .collect(),
            math_enabled: trace.transforms().transforms_enabled(),
        })
    }

    /// Records of all non-calibration traces, each with a freshly computed hash.
    pub fn save_setup(&self) -> TraceResult<Vec<TraceRecord>> {
        for trace in self.traces() {
            trace.invalidate_hash();
        }
        let mut records = Vec::with_capacity(self.len());
        for trace in self.traces().filter(|t| t.source() != Source::Calibration) {
            let mut record = self.record_of(trace.id())?;
            record.identity_hash = Some(self.identity_hash(trace.id())?);
            records.push(record);
        }
        Ok(records)
    }

    /// Write [`save_setup`](Self::save_setup) to `path` as pretty JSON.
    pub fn save_setup_to_path(&self, path: impl AsRef<Path>) -> TraceResult<()> {
        let json = serde_json::to_string_pretty(&self.save_setup()?)?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "Saved trace setup");
        Ok(())
    }

    /// Load a JSON setup file. See [`load_setup`](Self::load_setup).
    pub fn load_setup_from_path(
        &mut self,
        path: impl AsRef<Path>,
        loader: Option<&dyn FileLoader>,
    ) -> TraceResult<LoadReport> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<TraceRecord> = serde_json::from_str(&text)?;
        let report = self.load_setup(&records, loader);
        info!(
            path = %path.as_ref().display(),
            traces = report.created.len(),
            unresolved = report.unresolved.len(),
            "Loaded trace setup"
        );
        Ok(report)
    }

    /// Create one trace per record and bind formula sources by hash.
    ///
    /// File traces are filled through `loader`; without one they keep their
    /// file reference but no samples. Stored hashes are kept as the identity of
    /// the loaded traces.
    pub fn load_setup(&mut self, records: &[TraceRecord], loader: Option<&dyn FileLoader>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut stored: BTreeMap<TraceId, u64> = BTreeMap::new();
        let mut deferred: Vec<(TraceId, SourceReference)> = Vec::new();

        for record in records {
            let id = self.create_trace(&record.name);
            report.created.push(id);
            self.apply_record(id, record, loader, &mut report);
            if let Some(hash) = record.identity_hash {
                stored.insert(id, hash);
            }
            if let SourceRecord::Math { sources, .. } = &record.source {
                for reference in sources {
                    if !self.bind_reference(id, reference, &stored, &mut report) {
                        deferred.push((id, reference.clone()));
                    }
                }
            }
        }

        for (id, reference) in deferred {
            if !self.bind_reference(id, &reference, &stored, &mut report) {
                let error = TraceError::UnresolvedSourceReference {
                    hash: reference.trace_hash,
                    variable: reference.variable_name.clone(),
                };
                warn!(trace = %id, %error, "Formula source left unbound");
                report.unresolved.push(UnresolvedReference {
                    trace: id,
                    hash: reference.trace_hash,
                    variable: reference.variable_name,
                });
            }
        }

        for (id, hash) in &stored {
            let inputs: Vec<u64> = self
                .graph
                .sources_of(*id)
                .iter()
                .filter_map(|b| stored.get(&b.source).copied())
                .collect();
            if let Some(trace) = self.trace(*id) {
                trace.cache_hash(*hash, inputs);
            }
        }
        self.flush();
        report
    }

    fn apply_record(
        &mut self,
        id: TraceId,
        record: &TraceRecord,
        loader: Option<&dyn FileLoader>,
        report: &mut LoadReport,
    ) {
        let mut note = |message: String| {
            warn!(trace = %id, name = %record.name, "{message}");
            report.failed.push((record.name.clone(), message));
        };

        let applied = match &record.source {
            SourceRecord::Live {
                parameter,
                merge_policy,
                paused,
            } => self.set_live(id, *merge_policy, *parameter).and_then(|()| {
                if *paused {
                    self.pause(id)
                } else {
                    Ok(())
                }
            }),
            SourceRecord::File {
                filename,
                parameter_index,
            } => match loader.map(|l| l.load(filename)) {
                Some(Ok(FileData::Table(table))) => self
                    .fill_from_table(id, &table, *parameter_index)
                    .map(|_| ()),
                Some(Ok(FileData::Network(data))) => {
                    self.fill_from_network(id, &data, *parameter_index)
                }
                Some(Err(e)) => {
                    let _ = self.update(id, |t| {
                        t.set_file_origin(filename, *parameter_index);
                        t.set_status(TraceStatus::Error(e.to_string()));
                    });
                    Err(e)
                }
                None => self.update(id, |t| {
                    t.set_file_origin(filename, *parameter_index);
                    t.set_status(TraceStatus::Warning("File data not loaded".to_string()));
                }),
            },
            SourceRecord::Math { expression, .. } => self
                .set_math(id)
                .and_then(|()| self.set_expression(id, expression)),
        };
        if let Err(e) = applied {
            note(e.to_string());
        }

        let mut transforms = Vec::with_capacity(record.transforms.len());
        for t in &record.transforms {
            match self.registry.create(&t.kind, &t.settings) {
                Ok(transform) => transforms.push((transform, t.enabled)),
                Err(e) => note(e.to_string()),
            }
        }
        let color = record.color.clone();
        let result = self.update(id, |trace| -> TraceResult<()> {
            trace.set_color(color);
            trace.set_visible(record.visible);
            trace.set_velocity_factor(record.velocity_factor);
            trace.set_reflection(record.is_reflection);
            for (transform, enabled) in transforms {
                trace.add_transform(transform);
                if !enabled {
                    let index = trace.transforms().len() - 1;
                    trace.set_transform_enabled(index, false)?;
                }
            }
            trace.set_transforms_enabled(record.math_enabled);
            Ok(())
        });
        if let Err(e) = result.and_then(|r| r) {
            note(e.to_string());
        }
    }

    /// Bind a persisted reference if its hash resolves. Returns `false` when
    /// the reference should be retried later.
    fn bind_reference(
        &mut self,
        consumer: TraceId,
        reference: &SourceReference,
        stored: &BTreeMap<TraceId, u64>,
        report: &mut LoadReport,
    ) -> bool {
        let Some(source) = self.find_by_hash(reference.trace_hash, stored) else {
            return false;
        };
        if let Err(e) = self.add_source(consumer, source, &reference.variable_name) {
            let name = self
                .trace(consumer)
                .map(|t| t.name().to_string())
                .unwrap_or_default();
            warn!(trace = %consumer, variable = %reference.variable_name, error = %e, "Persisted formula source rejected");
            report.failed.push((name, e.to_string()));
        }
        true
    }

    fn find_by_hash(&self, hash: u64, stored: &BTreeMap<TraceId, u64>) -> Option<TraceId> {
        if let Some((&id, _)) = stored.iter().find(|&(_, &h)| h == hash) {
            return Some(id);
        }
        self.ids()
            .into_iter()
            .filter(|id| !stored.contains_key(id))
            .find(|&id| self.identity_hash(id).is_ok_and(|h| h == hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Domain, Sample};
    use crate::transform::MedianFilter;
    use tracing_test::traced_test;

    fn record(name: &str, source: SourceRecord) -> TraceRecord {
        TraceRecord {
            identity_hash: None,
            name: name.to_string(),
            color: DEFAULT_COLOR.to_string(),
            visible: true,
            source,
            velocity_factor: DEFAULT_VELOCITY_FACTOR,
            is_reflection: false,
            transforms: Vec::new(),
            math_enabled: true,
        }
    }

    #[test]
    fn hash_ignores_the_stored_hash_field() {
        let mut r = record(
            "A",
            SourceRecord::File {
                filename: "a.csv".into(),
                parameter_index: 0,
            },
        );
        let plain = identity_hash(&r).unwrap();
        r.identity_hash = Some(42);
        assert_eq!(identity_hash(&r).unwrap(), plain);
        r.name = "B".into();
        assert_ne!(identity_hash(&r).unwrap(), plain);
    }

    #[test]
    fn record_shape_uses_source_tag() {
        let r = record(
            "M",
            SourceRecord::Math {
                expression: "a+1".into(),
                sources: vec![SourceReference {
                    trace_hash: 7,
                    variable_name: "a".into(),
                }],
            },
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["source"], "Math");
        assert_eq!(json["sources"][0]["traceHash"], 7);
        assert_eq!(json["velocityFactor"], 0.66);
        assert!(json.get("identityHash").is_none());
        let back: TraceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn hash_is_cached_until_the_trace_changes() {
        let mut model = TraceModel::new();
        let a = model.create_trace("A");
        let first = model.identity_hash(a).unwrap();
        assert_eq!(model.trace(a).unwrap().cached_hash(), Some(first));
        model.update(a, |t| t.set_name("B")).unwrap();
        assert_eq!(model.trace(a).unwrap().cached_hash(), None);
        assert_ne!(model.identity_hash(a).unwrap(), first);
    }

    #[test]
    fn renaming_a_source_refreshes_every_consumer_hash() {
        let mut model = TraceModel::new();
        let a = model.create_trace("A");
        model
            .add_data(a, Sample::real(1.0, 1.0), Domain::Frequency, 50.0, None)
            .unwrap();
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a").unwrap();
        model.add_source(m, a, "a").unwrap();
        let n = model.create_trace("N");
        model.set_math(n).unwrap();
        model.set_expression(n, "m * 2").unwrap();
        model.add_source(n, m, "m").unwrap();

        let m_before = model.identity_hash(m).unwrap();
        let n_before = model.identity_hash(n).unwrap();
        model.update(a, |t| t.set_name("A renamed")).unwrap();
        let m_after = model.identity_hash(m).unwrap();
        let n_after = model.identity_hash(n).unwrap();
        assert_ne!(m_after, m_before);
        assert_ne!(n_after, n_before);

        let records = model.save_setup().unwrap();
        let saved = |name: &str| {
            records
                .iter()
                .find(|r| r.name == name)
                .and_then(|r| r.identity_hash)
        };
        assert_eq!(saved("M"), Some(m_after));
        assert_eq!(saved("N"), Some(n_after));
    }

    #[test]
    fn loaded_formula_traces_keep_their_stored_hash() {
        let mut model = TraceModel::new();
        let a = model.create_trace("A");
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.set_expression(m, "a").unwrap();
        model.add_source(m, a, "a").unwrap();
        let mut records = model.save_setup().unwrap();
        records[1].identity_hash = Some(0xdead_beef);

        let mut loaded = TraceModel::new();
        let report = loaded.load_setup(&records, None);
        let m = report.created[1];
        assert_eq!(loaded.identity_hash(m).unwrap(), 0xdead_beef);

        loaded.update(report.created[0], |t| t.set_name("B")).unwrap();
        assert_ne!(loaded.identity_hash(m).unwrap(), 0xdead_beef);
    }

    #[test]
    fn calibration_traces_are_not_saved() {
        let mut model = TraceModel::new();
        model.create_trace("A");
        let cal = model.create_trace("Cal");
        model.update(cal, |t| t.set_calibration()).unwrap();
        let records = model.save_setup().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "A");
        assert!(records[0].identity_hash.is_some());
    }

    #[test]
    fn transforms_and_flags_survive_a_reload() {
        let mut model = TraceModel::new();
        let a = model.create_trace("A");
        model
            .add_data(a, Sample::real(1.0, 1.0), Domain::Frequency, 50.0, None)
            .unwrap();
        model
            .update(a, |t| {
                t.add_transform(Box::new(MedianFilter::new(5)));
                t.set_transform_enabled(1, false).unwrap();
                t.set_transforms_enabled(false);
                t.set_color("#00ff00");
            })
            .unwrap();
        let records = model.save_setup().unwrap();

        let mut loaded = TraceModel::new();
        let report = loaded.load_setup(&records, None);
        assert!(report.is_clean());
        let t = loaded.trace(report.created[0]).unwrap();
        assert_eq!(t.color(), "#00ff00");
        assert_eq!(t.transforms().len(), 2);
        assert!(!t.transforms().is_enabled(1));
        assert!(!t.transforms().transforms_enabled());
        assert_eq!(t.transforms().transform(1).unwrap().settings()["kernelSize"], 5);
        assert_eq!(t.cached_hash(), records[0].identity_hash);
    }

    #[test]
    fn unknown_transform_kinds_are_reported() {
        let mut r = record(
            "A",
            SourceRecord::Live {
                parameter: LiveParameter::S21,
                merge_policy: MergePolicy::MaxHold,
                paused: true,
            },
        );
        r.transforms.push(TransformRecord {
            kind: "Sparkle".into(),
            enabled: true,
            settings: serde_json::Value::Null,
        });
        let mut model = TraceModel::new();
        let report = model.load_setup(&[r], None);
        assert_eq!(report.failed.len(), 1);
        let t = model.trace(report.created[0]).unwrap();
        assert!(t.is_paused());
        assert_eq!(t.merge_policy(), MergePolicy::MaxHold);
        assert_eq!(t.live_parameter(), LiveParameter::S21);
        assert!(t.transforms().is_empty());
    }

    #[test]
    #[traced_test]
    fn unresolved_references_are_logged_and_reported() {
        let r = record(
            "M",
            SourceRecord::Math {
                expression: "a".into(),
                sources: vec![SourceReference {
                    trace_hash: 12345,
                    variable_name: "a".into(),
                }],
            },
        );
        let mut model = TraceModel::new();
        let report = model.load_setup(&[r], None);
        assert_eq!(
            report.unresolved,
            vec![UnresolvedReference {
                trace: report.created[0],
                hash: 12345,
                variable: "a".into(),
            }]
        );
        assert!(model.sources_of(report.created[0]).is_empty());
        assert!(logs_contain("Formula source left unbound"));
    }
}
