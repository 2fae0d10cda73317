use std::collections::HashMap;

use crate::error::{TraceError, TraceResult};
use crate::transform::{ExpressionTransform, MedianFilter, TimeDomainTransform, Transform};

type TransformFactory = Box<dyn Fn(&serde_json::Value) -> TraceResult<Box<dyn Transform>> + Send + Sync>;

/// Creates transforms from their persisted kind name and settings.
pub struct TransformRegistry {
    factories: HashMap<String, TransformFactory>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    /// Registry holding the built-in kinds.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("Median filter", |settings| {
            let mut filter = MedianFilter::default();
            filter.load_settings(settings)?;
            Ok(Box::new(filter))
        });
        registry.register("Expression", |settings| {
            let mut transform = ExpressionTransform::default();
            transform.load_settings(settings)?;
            Ok(Box::new(transform))
        });
        registry.register("Time domain", |settings| {
            let mut transform = TimeDomainTransform::default();
            transform.load_settings(settings)?;
            Ok(Box::new(transform))
        });
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> TraceResult<Box<dyn Transform>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Create a transform of `kind` with `settings`.
    pub fn create(&self, kind: &str, settings: &serde_json::Value) -> TraceResult<Box<dyn Transform>> {
        self.factories
            .get(kind)
            .ok_or_else(|| TraceError::UnknownTransform(kind.to_string()))
            .and_then(|factory| factory(settings))
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
