//! Per-sample expression transform.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::expression::{Bindings, CompiledExpression, ExpressionEngine};
use crate::sample::{Domain, Sample};
use crate::transform::Transform;

/// Persisted settings of [`ExpressionTransform`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionSettings {
    /// Expression over `x` (coordinate) and `y` (input value).
    pub expression: String,
}

impl Default for ExpressionSettings {
    fn default() -> Self {
        Self {
            expression: "y".to_string(),
        }
    }
}

/// Maps every sample `(x, y)` to `(x, f(x, y))`.
#[derive(Debug, Clone)]
pub struct ExpressionTransform {
    settings: ExpressionSettings,
    compiled: Option<CompiledExpression>,
}

impl Default for ExpressionTransform {
    fn default() -> Self {
        Self {
            settings: ExpressionSettings::default(),
            compiled: None,
        }
    }
}

impl ExpressionTransform {
    /// Transform evaluating `expression`.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            settings: ExpressionSettings {
                expression: expression.into(),
            },
            compiled: None,
        }
    }

    /// Expression text.
    pub fn expression(&self) -> &str {
        &self.settings.expression
    }

    fn compiled(&mut self) -> TraceResult<&CompiledExpression> {
        if self.compiled.is_none() {
            let expr = ExpressionEngine::shared().compile_for(&self.settings.expression, &["x", "y"])?;
            self.compiled = Some(expr);
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| TraceError::Expression("Expression not compiled".to_string()))
    }

    fn evaluate_into(
        &mut self,
        input: &[Sample],
        output: &mut [Sample],
        range: Range<usize>,
    ) -> TraceResult<()> {
        let engine = ExpressionEngine::shared();
        let expr = self.compiled()?;
        let mut bindings = Bindings::new();
        for i in range {
            let s = input[i];
            bindings.set_real("x", s.x);
            bindings.set("y", s.y);
            output[i] = Sample::new(s.x, engine.evaluate(expr, &mut bindings)?);
        }
        Ok(())
    }
}

impl Transform for ExpressionTransform {
    fn kind(&self) -> &'static str {
        "Expression"
    }

    fn description(&self) -> String {
        format!("Expression: {}", self.settings.expression)
    }

    fn apply(&mut self, input: &[Sample], _domain: Domain) -> TraceResult<Vec<Sample>> {
        let mut output = input.to_vec();
        self.evaluate_into(input, &mut output, 0..input.len())?;
        Ok(output)
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
        let end = changed.end.min(input.len());
        let begin = changed.start.min(end);
        self.evaluate_into(input, output, begin..end)?;
        Ok(begin..end)
    }

    fn settings(&self) -> serde_json::Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    fn load_settings(&mut self, settings: &serde_json::Value) -> TraceResult<()> {
        self.settings = serde_json::from_value(settings.clone())?;
        self.compiled = None;
        Ok(())
    }
}
